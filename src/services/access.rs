use rusqlite::Connection;

use super::SECS_PER_DAY;
use crate::db::queries;
use crate::error::{AppError, Result};
use crate::models::UserAccess;

/// Expiry for a new or extended grant.
///
/// A lifetime grant stays lifetime. A timed grant on top of access that is
/// still running starts where the current one ends.
pub fn extended_expiry(current: Option<&UserAccess>, duration_days: Option<i32>, now: i64) -> Option<i64> {
    let days = duration_days?;
    let start = match current {
        Some(access) => match access.access_expires_at {
            None => return None,
            Some(exp) => exp.max(now),
        },
        None => now,
    };
    Some(start + days as i64 * SECS_PER_DAY)
}

pub fn has_access(conn: &Connection, user_id: &str, product_id: &str, now: i64) -> Result<bool> {
    Ok(queries::get_access(conn, user_id, product_id)?.is_some_and(|a| a.is_active_at(now)))
}

/// Grant (or extend) access. `duration_days = None` means lifetime.
pub fn grant_access(
    conn: &Connection,
    user_id: &str,
    product_id: &str,
    duration_days: Option<i32>,
    transaction_id: Option<&str>,
    now: i64,
) -> Result<UserAccess> {
    if duration_days.is_some_and(|d| d <= 0) {
        return Err(AppError::validation("duration_days", "Must be a positive number of days"));
    }
    let current = queries::get_access(conn, user_id, product_id)?;
    let expires_at = extended_expiry(current.as_ref(), duration_days, now);
    queries::upsert_access(conn, user_id, product_id, expires_at, transaction_id)?;

    tracing::info!(
        "Access granted: user={}, product={}, expires_at={:?}",
        user_id,
        product_id,
        expires_at
    );

    queries::get_access(conn, user_id, product_id)?
        .ok_or_else(|| AppError::Internal("Access row missing after grant".into()))
}

pub fn revoke_access(conn: &Connection, user_id: &str, product_id: &str) -> Result<bool> {
    let revoked = queries::revoke_access(conn, user_id, product_id)?;
    if revoked {
        tracing::info!("Access revoked: user={}, product={}", user_id, product_id);
    }
    Ok(revoked)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn access(expires_at: Option<i64>) -> UserAccess {
        UserAccess {
            id: "a1".into(),
            user_id: "u1".into(),
            product_id: "p1".into(),
            product_name: "Course".into(),
            product_slug: "course".into(),
            access_granted_at: 0,
            access_expires_at: expires_at,
            transaction_id: None,
        }
    }

    #[test]
    fn test_new_grant_starts_now() {
        assert_eq!(extended_expiry(None, Some(2), 1000), Some(1000 + 2 * SECS_PER_DAY));
        assert_eq!(extended_expiry(None, None, 1000), None);
    }

    #[test]
    fn test_running_grant_is_extended_from_its_end() {
        let current = access(Some(5000));
        assert_eq!(
            extended_expiry(Some(&current), Some(1), 1000),
            Some(5000 + SECS_PER_DAY)
        );
    }

    #[test]
    fn test_expired_grant_restarts_now() {
        let current = access(Some(500));
        assert_eq!(
            extended_expiry(Some(&current), Some(1), 1000),
            Some(1000 + SECS_PER_DAY)
        );
    }

    #[test]
    fn test_lifetime_wins() {
        let lifetime = access(None);
        assert_eq!(extended_expiry(Some(&lifetime), Some(30), 1000), None);
        let timed = access(Some(5000));
        assert_eq!(extended_expiry(Some(&timed), None, 1000), None);
    }
}
