use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Totals for one currency. Amounts are never summed across currencies.
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct CurrencyTotals {
    pub currency: String,
    pub revenue_cents: i64,
    pub refunded_cents: i64,
    pub orders: i64,
    pub today_revenue_cents: i64,
    pub today_orders: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DashboardStats {
    pub totals: Vec<CurrencyTotals>,
    pub total_users: i64,
    pub active_products: i64,
    pub pending_refund_requests: i64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RevenuePoint {
    /// UTC day, `YYYY-MM-DD`
    pub date: String,
    pub currency: String,
    pub revenue_cents: i64,
    pub orders: i64,
}

#[derive(Debug, Deserialize, Default)]
pub struct RevenueQuery {
    /// Unix seconds, inclusive; defaults to 30 days before `to`
    #[serde(default)]
    pub from: Option<i64>,
    /// Unix seconds, exclusive; defaults to now
    #[serde(default)]
    pub to: Option<i64>,
    #[serde(default)]
    pub product_id: Option<String>,
}
