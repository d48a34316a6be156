use serde::Serialize;
use utoipa::ToSchema;

/// Throwaway-mailbox providers. A listed domain also covers its subdomains.
const DISPOSABLE_DOMAINS: &[&str] = &[
    "10minutemail.com",
    "10minutemail.net",
    "20minutemail.com",
    "33mail.com",
    "anonbox.net",
    "burnermail.io",
    "discard.email",
    "dispostable.com",
    "emailondeck.com",
    "fakeinbox.com",
    "getairmail.com",
    "getnada.com",
    "guerrillamail.biz",
    "guerrillamail.com",
    "guerrillamail.de",
    "guerrillamail.info",
    "guerrillamail.net",
    "guerrillamail.org",
    "guerrillamailblock.com",
    "harakirimail.com",
    "incognitomail.org",
    "mailcatch.com",
    "maildrop.cc",
    "mailinator.com",
    "mailinator.net",
    "mailnesia.com",
    "mintemail.com",
    "moakt.com",
    "mohmal.com",
    "mytemp.email",
    "nada.email",
    "sharklasers.com",
    "spam4.me",
    "spamgourmet.com",
    "temp-mail.io",
    "temp-mail.org",
    "tempail.com",
    "tempmail.com",
    "tempmail.dev",
    "tempmailo.com",
    "tempr.email",
    "throwawaymail.com",
    "trashmail.com",
    "trashmail.de",
    "trashmail.net",
    "yopmail.com",
    "yopmail.fr",
    "yopmail.net",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmailCheck {
    pub valid: bool,
    pub is_disposable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

/// Practical address check: one `@`, a non-empty local part, and a dotted
/// domain of letters, digits and dashes.
pub fn is_valid_email_syntax(email: &str) -> bool {
    let email = email.trim();
    if email.len() > 254 || email.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || local.len() > 64 || domain.contains('@') {
        return false;
    }
    if local.starts_with('.') || local.ends_with('.') || local.contains("..") {
        return false;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2
        && labels.iter().all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
        && labels
            .last()
            .is_some_and(|tld| tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic()))
}

pub fn is_disposable_domain(domain: &str) -> bool {
    let domain = domain.trim().trim_end_matches('.').to_ascii_lowercase();
    DISPOSABLE_DOMAINS.iter().any(|d| {
        domain == *d
            || domain
                .strip_suffix(d)
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}

pub fn check_email(email: &str) -> EmailCheck {
    let email = email.trim();
    if !is_valid_email_syntax(email) {
        return EmailCheck {
            valid: false,
            is_disposable: false,
            domain: None,
        };
    }
    let domain = email
        .rsplit_once('@')
        .map(|(_, d)| d.to_ascii_lowercase())
        .unwrap_or_default();
    EmailCheck {
        valid: true,
        is_disposable: is_disposable_domain(&domain),
        domain: Some(domain),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax() {
        assert!(is_valid_email_syntax("jan.kowalski@example.pl"));
        assert!(is_valid_email_syntax("a+tag@sub.example.com"));
        assert!(!is_valid_email_syntax("no-at-sign.example.com"));
        assert!(!is_valid_email_syntax("two@@example.com"));
        assert!(!is_valid_email_syntax("user@localhost"));
        assert!(!is_valid_email_syntax("user@-bad.com"));
        assert!(!is_valid_email_syntax("sp ace@example.com"));
        assert!(!is_valid_email_syntax(".dot@example.com"));
        assert!(!is_valid_email_syntax("user@example.c0m"));
    }

    #[test]
    fn test_disposable_detection() {
        let check = check_email("someone@Mailinator.com");
        assert!(check.valid);
        assert!(check.is_disposable);
        assert_eq!(check.domain.as_deref(), Some("mailinator.com"));

        assert!(is_disposable_domain("eu.guerrillamail.com"));
        assert!(!is_disposable_domain("notmailinator.com"));
        assert!(!check_email("buyer@gmail.com").is_disposable);
    }

    #[test]
    fn test_invalid_email_is_not_disposable() {
        let check = check_email("mailinator.com");
        assert!(!check.valid);
        assert!(!check.is_disposable);
    }

    #[test]
    fn test_serialized_field_names() {
        let json = serde_json::to_value(check_email("x@yopmail.com")).unwrap();
        assert_eq!(json["isDisposable"], true);
        assert_eq!(json["valid"], true);
    }
}
