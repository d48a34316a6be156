//! Tool catalogue. Each tool maps onto exactly one v1 endpoint.

use reqwest::Method;
use serde_json::{Map, Value, json};

use crate::error::{Result, ToolError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    String,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ArgType {
    fn json_type(self) -> &'static str {
        match self {
            ArgType::String => "string",
            ArgType::Integer => "integer",
            ArgType::Boolean => "boolean",
            ArgType::Array => "array",
            ArgType::Object => "object",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            ArgType::String => value.is_string(),
            ArgType::Integer => value.is_i64() || value.is_u64(),
            ArgType::Boolean => value.is_boolean(),
            ArgType::Array => value.is_array(),
            ArgType::Object => value.is_object(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Arg {
    pub name: &'static str,
    pub kind: ArgType,
    pub required: bool,
    pub description: &'static str,
}

const fn req(name: &'static str, kind: ArgType, description: &'static str) -> Arg {
    Arg { name, kind, required: true, description }
}

const fn opt(name: &'static str, kind: ArgType, description: &'static str) -> Arg {
    Arg { name, kind, required: false, description }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
    Patch,
    Delete,
}

impl Verb {
    pub fn method(self) -> Method {
        match self {
            Verb::Get => Method::GET,
            Verb::Post => Method::POST,
            Verb::Patch => Method::PATCH,
            Verb::Delete => Method::DELETE,
        }
    }

    fn has_body(self) -> bool {
        matches!(self, Verb::Post | Verb::Patch)
    }
}

#[derive(Debug)]
pub struct Tool {
    pub name: &'static str,
    pub description: &'static str,
    pub verb: Verb,
    /// Relative to `/api/v1`; `{name}` segments are filled from arguments
    pub path: &'static str,
    pub args: &'static [Arg],
}

use ArgType::{Array, Boolean, Integer, Object, String as Str};

const PAGE: [Arg; 2] = [
    opt("cursor", Str, "Cursor from a previous page"),
    opt("limit", Integer, "Page size, 1-100"),
];

pub static TOOLS: &[Tool] = &[
    // Products
    Tool {
        name: "list_products",
        description: "List products, newest first",
        verb: Verb::Get,
        path: "/products",
        args: &[PAGE[0], PAGE[1], opt("status", Str, "active | inactive | all"), opt("search", Str, "Substring of name or slug")],
    },
    Tool {
        name: "get_product",
        description: "Get one product",
        verb: Verb::Get,
        path: "/products/{id}",
        args: &[req("id", Str, "Product id")],
    },
    Tool {
        name: "create_product",
        description: "Create a product. Prices are in cents; extra product fields are passed through",
        verb: Verb::Post,
        path: "/products",
        args: &[
            req("name", Str, "Product name"),
            req("price_cents", Integer, "Price in cents"),
            opt("currency", Str, "ISO currency code, default USD"),
            opt("slug", Str, "URL slug, generated from the name when absent"),
            opt("description", Str, "Description"),
            opt("content", Object, "Delivery: {type: content|redirect|download, ...}"),
        ],
    },
    Tool {
        name: "update_product",
        description: "Update product fields; omitted fields stay unchanged, null clears",
        verb: Verb::Patch,
        path: "/products/{id}",
        args: &[
            req("id", Str, "Product id"),
            opt("name", Str, "Product name"),
            opt("price_cents", Integer, "Price in cents"),
            opt("sale_price_cents", Integer, "Sale price in cents"),
            opt("is_active", Boolean, "Whether the product is on sale"),
        ],
    },
    Tool {
        name: "delete_product",
        description: "Delete a product that has never been sold",
        verb: Verb::Delete,
        path: "/products/{id}",
        args: &[req("id", Str, "Product id")],
    },
    Tool {
        name: "get_product_content",
        description: "Delivery details of a product; download links are signed and short-lived",
        verb: Verb::Get,
        path: "/products/{id}/content",
        args: &[req("id", Str, "Product id")],
    },
    Tool {
        name: "get_product_price_history",
        description: "Price changes of a product, oldest first",
        verb: Verb::Get,
        path: "/products/{id}/price-history",
        args: &[req("id", Str, "Product id"), opt("since", Integer, "Unix seconds")],
    },
    Tool {
        name: "list_order_bumps",
        description: "Order bumps offered with a product",
        verb: Verb::Get,
        path: "/products/{id}/order-bumps",
        args: &[req("id", Str, "Product id")],
    },
    Tool {
        name: "create_order_bump",
        description: "Offer another product as a checkout add-on",
        verb: Verb::Post,
        path: "/products/{id}/order-bumps",
        args: &[
            req("id", Str, "Main product id"),
            req("bump_product_id", Str, "Product offered as the bump"),
            req("title", Str, "Checkbox label"),
            opt("bump_price_cents", Integer, "Override the bump product's price"),
        ],
    },
    Tool {
        name: "delete_order_bump",
        description: "Remove an order bump",
        verb: Verb::Delete,
        path: "/products/{id}/order-bumps/{bump_id}",
        args: &[req("id", Str, "Main product id"), req("bump_id", Str, "Order bump id")],
    },
    // Payments
    Tool {
        name: "list_payments",
        description: "List payments, newest first",
        verb: Verb::Get,
        path: "/payments",
        args: &[
            PAGE[0],
            PAGE[1],
            opt("status", Str, "completed | refunded | partially_refunded"),
            opt("product_id", Str, "Filter by product"),
            opt("email", Str, "Filter by buyer email"),
        ],
    },
    Tool {
        name: "get_payment",
        description: "Get one payment",
        verb: Verb::Get,
        path: "/payments/{id}",
        args: &[req("id", Str, "Payment id")],
    },
    Tool {
        name: "refund_payment",
        description: "Refund a payment fully, or partially with amount_cents",
        verb: Verb::Post,
        path: "/payments/{id}/refund",
        args: &[
            req("id", Str, "Payment id"),
            opt("amount_cents", Integer, "Amount to refund, default all that remains"),
            opt("reason", Str, "Reason passed to the processor"),
        ],
    },
    Tool {
        name: "list_refund_requests",
        description: "List refund requests",
        verb: Verb::Get,
        path: "/refund-requests",
        args: &[PAGE[0], PAGE[1], opt("status", Str, "pending | approved | rejected")],
    },
    Tool {
        name: "create_refund_request",
        description: "Ask for a refund of one of your payments",
        verb: Verb::Post,
        path: "/refund-requests",
        args: &[req("transaction_id", Str, "Payment id"), opt("reason", Str, "Why")],
    },
    Tool {
        name: "approve_refund_request",
        description: "Approve a pending request and refund the payment",
        verb: Verb::Post,
        path: "/refund-requests/{id}/approve",
        args: &[req("id", Str, "Refund request id"), opt("admin_response", Str, "Note to the buyer")],
    },
    Tool {
        name: "reject_refund_request",
        description: "Reject a pending refund request",
        verb: Verb::Post,
        path: "/refund-requests/{id}/reject",
        args: &[req("id", Str, "Refund request id"), opt("admin_response", Str, "Note to the buyer")],
    },
    // Coupons
    Tool {
        name: "list_coupons",
        description: "List coupons",
        verb: Verb::Get,
        path: "/coupons",
        args: &PAGE,
    },
    Tool {
        name: "get_coupon",
        description: "Get one coupon",
        verb: Verb::Get,
        path: "/coupons/{id}",
        args: &[req("id", Str, "Coupon id")],
    },
    Tool {
        name: "create_coupon",
        description: "Create a coupon",
        verb: Verb::Post,
        path: "/coupons",
        args: &[
            req("code", Str, "Coupon code"),
            req("discount_type", Str, "percentage | fixed"),
            req("discount_value", Integer, "Percent (1-100) or cents"),
            opt("currency", Str, "Required for fixed discounts"),
            opt("allowed_emails", Array, "Restrict to these buyers"),
            opt("allowed_product_ids", Array, "Restrict to these products"),
            opt("usage_limit_global", Integer, "Total redemptions"),
            opt("usage_limit_per_user", Integer, "Redemptions per buyer"),
            opt("expires_at", Integer, "Unix seconds"),
        ],
    },
    Tool {
        name: "update_coupon",
        description: "Update coupon fields",
        verb: Verb::Patch,
        path: "/coupons/{id}",
        args: &[
            req("id", Str, "Coupon id"),
            opt("is_active", Boolean, "Enable or disable"),
            opt("discount_value", Integer, "Percent (1-100) or cents"),
            opt("expires_at", Integer, "Unix seconds"),
        ],
    },
    Tool {
        name: "delete_coupon",
        description: "Delete a coupon",
        verb: Verb::Delete,
        path: "/coupons/{id}",
        args: &[req("id", Str, "Coupon id")],
    },
    // Users
    Tool {
        name: "get_me",
        description: "The user that owns the API key",
        verb: Verb::Get,
        path: "/me",
        args: &[],
    },
    Tool {
        name: "list_users",
        description: "List users",
        verb: Verb::Get,
        path: "/users",
        args: &[PAGE[0], PAGE[1], opt("search", Str, "Substring of email or name")],
    },
    Tool {
        name: "create_user",
        description: "Create a user",
        verb: Verb::Post,
        path: "/users",
        args: &[
            req("email", Str, "Email address"),
            opt("full_name", Str, "Display name"),
            opt("is_admin", Boolean, "Grant admin rights"),
        ],
    },
    Tool {
        name: "get_user",
        description: "Get one user",
        verb: Verb::Get,
        path: "/users/{id}",
        args: &[req("id", Str, "User id")],
    },
    Tool {
        name: "list_user_access",
        description: "Products a user has access to",
        verb: Verb::Get,
        path: "/users/{id}/access",
        args: &[req("id", Str, "User id")],
    },
    Tool {
        name: "grant_access",
        description: "Grant or extend a user's access to a product",
        verb: Verb::Post,
        path: "/users/{id}/access",
        args: &[
            req("id", Str, "User id"),
            req("product_id", Str, "Product id"),
            opt("duration_days", Integer, "Days of access, default the product's setting"),
        ],
    },
    Tool {
        name: "revoke_access",
        description: "Revoke a user's access to a product",
        verb: Verb::Delete,
        path: "/users/{id}/access/{product_id}",
        args: &[req("id", Str, "User id"), req("product_id", Str, "Product id")],
    },
    // Webhooks
    Tool {
        name: "list_webhooks",
        description: "List webhook endpoints",
        verb: Verb::Get,
        path: "/webhooks",
        args: &PAGE,
    },
    Tool {
        name: "create_webhook",
        description: "Register a webhook endpoint; the signing secret is returned once",
        verb: Verb::Post,
        path: "/webhooks",
        args: &[
            req("url", Str, "https URL"),
            req("events", Array, "purchase.completed, refund.issued, access.granted, access.revoked"),
            opt("description", Str, "Note"),
        ],
    },
    Tool {
        name: "get_webhook",
        description: "Get one webhook endpoint",
        verb: Verb::Get,
        path: "/webhooks/{id}",
        args: &[req("id", Str, "Endpoint id")],
    },
    Tool {
        name: "update_webhook",
        description: "Update a webhook endpoint",
        verb: Verb::Patch,
        path: "/webhooks/{id}",
        args: &[
            req("id", Str, "Endpoint id"),
            opt("url", Str, "https URL"),
            opt("events", Array, "Subscribed events"),
            opt("is_active", Boolean, "Enable or disable"),
        ],
    },
    Tool {
        name: "delete_webhook",
        description: "Delete a webhook endpoint and its logs",
        verb: Verb::Delete,
        path: "/webhooks/{id}",
        args: &[req("id", Str, "Endpoint id")],
    },
    Tool {
        name: "test_webhook",
        description: "Send a webhook.test event now",
        verb: Verb::Post,
        path: "/webhooks/{id}/test",
        args: &[req("id", Str, "Endpoint id")],
    },
    Tool {
        name: "list_webhook_logs",
        description: "Webhook delivery attempts",
        verb: Verb::Get,
        path: "/webhook-logs",
        args: &[
            PAGE[0],
            PAGE[1],
            opt("endpoint_id", Str, "Filter by endpoint"),
            opt("status", Str, "success | failed | retried"),
        ],
    },
    Tool {
        name: "retry_webhook",
        description: "Re-send a failed delivery",
        verb: Verb::Post,
        path: "/webhook-logs/{id}/retry",
        args: &[req("id", Str, "Log id")],
    },
    // One-time offers
    Tool {
        name: "list_oto_offers",
        description: "List one-time offers",
        verb: Verb::Get,
        path: "/oto-offers",
        args: &[],
    },
    Tool {
        name: "create_oto_offer",
        description: "Offer a discounted product right after another is bought",
        verb: Verb::Post,
        path: "/oto-offers",
        args: &[
            req("source_product_id", Str, "Product whose buyers see the offer"),
            req("oto_product_id", Str, "Product offered"),
            req("discount_type", Str, "percentage | fixed"),
            req("discount_value", Integer, "Percent (1-100) or cents"),
            opt("duration_minutes", Integer, "How long the offer lasts, default 15"),
        ],
    },
    Tool {
        name: "delete_oto_offer",
        description: "Delete a one-time offer",
        verb: Verb::Delete,
        path: "/oto-offers/{id}",
        args: &[req("id", Str, "Offer id")],
    },
    // Analytics
    Tool {
        name: "get_dashboard",
        description: "Revenue and order totals per currency",
        verb: Verb::Get,
        path: "/analytics/dashboard",
        args: &[],
    },
    Tool {
        name: "get_revenue",
        description: "Net revenue per day",
        verb: Verb::Get,
        path: "/analytics/revenue",
        args: &[
            opt("from", Integer, "Unix seconds, inclusive"),
            opt("to", Integer, "Unix seconds, exclusive"),
            opt("product_id", Str, "Restrict to one product"),
        ],
    },
    // Administration
    Tool {
        name: "list_api_keys",
        description: "List API keys",
        verb: Verb::Get,
        path: "/api-keys",
        args: &PAGE,
    },
    Tool {
        name: "create_api_key",
        description: "Create an API key; the full key is returned once",
        verb: Verb::Post,
        path: "/api-keys",
        args: &[
            req("name", Str, "Label"),
            opt("user_id", Str, "Owner, default the caller"),
            opt("scopes", Array, "e.g. [\"products:read\"], default full access"),
            opt("expires_in_days", Integer, "Lifetime in days"),
        ],
    },
    Tool {
        name: "revoke_api_key",
        description: "Revoke an API key",
        verb: Verb::Delete,
        path: "/api-keys/{id}",
        args: &[req("id", Str, "Key id")],
    },
    Tool {
        name: "list_audit_logs",
        description: "Admin actions, newest first",
        verb: Verb::Get,
        path: "/audit-logs",
        args: &[
            PAGE[0],
            PAGE[1],
            opt("user_id", Str, "Filter by actor"),
            opt("action", Str, "e.g. update_coupon"),
            opt("resource_type", Str, "e.g. product"),
        ],
    },
];

pub fn find(name: &str) -> Option<&'static Tool> {
    TOOLS.iter().find(|t| t.name == name)
}

impl Tool {
    /// JSON Schema advertised in `tools/list`.
    pub fn input_schema(&self) -> Value {
        let properties: Map<std::string::String, Value> = self
            .args
            .iter()
            .map(|a| {
                let mut prop = json!({ "type": a.kind.json_type(), "description": a.description });
                if a.kind == Array {
                    prop["items"] = json!({});
                }
                (a.name.to_string(), prop)
            })
            .collect();
        let required: Vec<&str> = self.args.iter().filter(|a| a.required).map(|a| a.name).collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": self.verb.has_body(),
        })
    }

    /// Turn tool arguments into the request path (with query) and JSON body.
    pub fn build_request(&self, args: &Map<std::string::String, Value>) -> Result<(std::string::String, Option<Value>)> {
        for arg in self.args {
            match args.get(arg.name) {
                Some(Value::Null) | None if arg.required => {
                    return Err(ToolError::InvalidArguments(format!("{} is required", arg.name)));
                }
                Some(v) if !v.is_null() && !arg.kind.matches(v) => {
                    return Err(ToolError::InvalidArguments(format!(
                        "{} must be a {}",
                        arg.name,
                        arg.kind.json_type()
                    )));
                }
                _ => {}
            }
        }

        let mut path = format!("/api/v1{}", self.path);
        let mut rest = args.clone();
        for arg in self.args {
            let placeholder = format!("{{{}}}", arg.name);
            if path.contains(&placeholder) {
                let value = rest
                    .remove(arg.name)
                    .and_then(|v| v.as_str().map(str::to_string))
                    .ok_or_else(|| ToolError::InvalidArguments(format!("{} is required", arg.name)))?;
                path = path.replace(&placeholder, &urlencoding::encode(&value));
            }
        }

        if self.verb.has_body() {
            return Ok((path, Some(Value::Object(rest))));
        }

        let query: Vec<std::string::String> = rest
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| {
                let raw = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                format!("{}={}", urlencoding::encode(k), urlencoding::encode(&raw))
            })
            .collect();
        if !query.is_empty() {
            path.push('?');
            path.push_str(&query.join("&"));
        }
        Ok((path, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: Value) -> Map<std::string::String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_tool_names_are_unique() {
        let mut names: Vec<&str> = TOOLS.iter().map(|t| t.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), TOOLS.len());
    }

    #[test]
    fn test_path_params_are_declared_required() {
        for tool in TOOLS {
            for segment in tool.path.split('/').filter(|s| s.starts_with('{')) {
                let name = segment.trim_matches(|c| c == '{' || c == '}');
                let arg = tool.args.iter().find(|a| a.name == name);
                assert!(arg.is_some_and(|a| a.required), "{}: {}", tool.name, name);
            }
        }
    }

    #[test]
    fn test_get_arguments_become_query_string() {
        let tool = find("list_payments").unwrap();
        let (path, body) = tool
            .build_request(&args(json!({"status": "refunded", "limit": 10})))
            .unwrap();
        assert!(body.is_none());
        assert!(path.starts_with("/api/v1/payments?"));
        assert!(path.contains("status=refunded"));
        assert!(path.contains("limit=10"));
    }

    #[test]
    fn test_post_arguments_become_body_without_path_params() {
        let tool = find("refund_payment").unwrap();
        let (path, body) = tool
            .build_request(&args(json!({"id": "tx 1", "amount_cents": 500})))
            .unwrap();
        assert_eq!(path, "/api/v1/payments/tx%201/refund");
        assert_eq!(body, Some(json!({"amount_cents": 500})));
    }

    #[test]
    fn test_missing_required_argument() {
        let tool = find("get_user").unwrap();
        let err = tool.build_request(&Map::new()).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn test_wrong_argument_type() {
        let tool = find("create_coupon").unwrap();
        let err = tool
            .build_request(&args(json!({"code": "X", "discount_type": "fixed", "discount_value": "ten"})))
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
