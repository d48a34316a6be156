//! Cursor-based pagination for the v1 API.
//!
//! Lists are ordered by `(created_at DESC, id DESC)`. The cursor is an opaque
//! base64url token of the last row's `created_at|id`; queries fetch `limit + 1`
//! rows so `has_more` can be answered without a COUNT.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

pub const DEFAULT_LIMIT: i64 = 50;
pub const MAX_LIMIT: i64 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub created_at: i64,
    pub id: String,
}

impl Cursor {
    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(format!("{}|{}", self.created_at, self.id))
    }

    pub fn decode(token: &str) -> Result<Self> {
        let invalid = || AppError::validation("cursor", "Invalid cursor");
        let bytes = URL_SAFE_NO_PAD.decode(token.trim()).map_err(|_| invalid())?;
        let raw = String::from_utf8(bytes).map_err(|_| invalid())?;
        let (ts, id) = raw.split_once('|').ok_or_else(invalid)?;
        let created_at = ts.parse::<i64>().map_err(|_| invalid())?;
        if id.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            created_at,
            id: id.to_string(),
        })
    }
}

/// Rows that can be paginated by cursor.
pub trait Cursored {
    fn cursor(&self) -> Cursor;
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct CursorQuery {
    pub cursor: Option<String>,
    pub limit: Option<i64>,
}

impl CursorQuery {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    /// The decoded cursor, if one was supplied.
    pub fn after(&self) -> Result<Option<Cursor>> {
        match self.cursor.as_deref().filter(|c| !c.is_empty()) {
            Some(token) => Cursor::decode(token).map(Some),
            None => Ok(None),
        }
    }

    /// The number of rows a query should fetch.
    pub fn fetch_limit(&self) -> i64 {
        self.limit() + 1
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PageInfo {
    pub cursor: Option<String>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
    pub limit: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub pagination: PageInfo,
}

impl<T: Cursored> Paginated<T> {
    /// Build a page from rows fetched with `query.fetch_limit()`.
    pub fn from_rows(mut rows: Vec<T>, query: &CursorQuery) -> Self {
        let limit = query.limit();
        let has_more = rows.len() as i64 > limit;
        rows.truncate(limit as usize);

        let next_cursor = if has_more {
            rows.last().map(|r| r.cursor().encode())
        } else {
            None
        };

        Self {
            data: rows,
            pagination: PageInfo {
                cursor: query.cursor.clone().filter(|c| !c.is_empty()),
                next_cursor,
                has_more,
                limit,
            },
        }
    }
}

/// Append the keyset condition for `after` to a WHERE clause.
pub fn push_cursor_clause(
    where_clause: &mut String,
    params: &mut Vec<Box<dyn rusqlite::ToSql>>,
    after: Option<Cursor>,
    table_alias: &str,
) {
    if let Some(c) = after {
        let prefix = if table_alias.is_empty() {
            String::new()
        } else {
            format!("{}.", table_alias)
        };
        let n = params.len();
        where_clause.push_str(&format!(
            " AND ({p}created_at < ?{a} OR ({p}created_at = ?{a} AND {p}id < ?{b}))",
            p = prefix,
            a = n + 1,
            b = n + 2
        ));
        params.push(Box::new(c.created_at));
        params.push(Box::new(c.id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Row(i64, &'static str);

    impl Cursored for Row {
        fn cursor(&self) -> Cursor {
            Cursor {
                created_at: self.0,
                id: self.1.to_string(),
            }
        }
    }

    #[test]
    fn test_cursor_decode_rejects_garbage() {
        assert!(Cursor::decode("not base64!!").is_err());
        let no_sep = URL_SAFE_NO_PAD.encode("12345");
        assert!(Cursor::decode(&no_sep).is_err());
        let bad_ts = URL_SAFE_NO_PAD.encode("abc|id");
        assert!(Cursor::decode(&bad_ts).is_err());
    }

    #[test]
    fn test_cursor_encodes_created_at_and_id() {
        let cursor = Cursor {
            created_at: 1_700_000_000,
            id: "abc-123".into(),
        };
        assert_eq!(Cursor::decode(&cursor.encode()).unwrap(), cursor);
    }

    #[test]
    fn test_limit_is_clamped() {
        let q = CursorQuery { cursor: None, limit: Some(1000) };
        assert_eq!(q.limit(), MAX_LIMIT);
        let q = CursorQuery { cursor: None, limit: Some(0) };
        assert_eq!(q.limit(), 1);
        assert_eq!(CursorQuery::default().limit(), DEFAULT_LIMIT);
    }

    #[test]
    fn test_from_rows_sets_has_more_and_next_cursor() {
        let q = CursorQuery { cursor: None, limit: Some(2) };
        let page = Paginated::from_rows(vec![Row(3, "c"), Row(2, "b"), Row(1, "a")], &q);
        assert_eq!(page.data.len(), 2);
        assert!(page.pagination.has_more);
        let next = Cursor::decode(page.pagination.next_cursor.as_deref().unwrap()).unwrap();
        assert_eq!(next.created_at, 2);
        assert_eq!(next.id, "b");
    }

    #[test]
    fn test_last_page_has_no_next_cursor() {
        let q = CursorQuery { cursor: None, limit: Some(5) };
        let page = Paginated::from_rows(vec![Row(1, "a")], &q);
        assert!(!page.pagination.has_more);
        assert!(page.pagination.next_cursor.is_none());
    }
}
