//! Keyset pagination.
//!
//! List endpoints order rows by `(created_at DESC, id DESC)` and page with
//! opaque cursors: Base64URL of UTF-8 JSON `{"id", "created_at"}`. Page
//! transitions are O(1) regardless of dataset size.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::GovernanceError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

impl Cursor {
    pub fn new(id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            created_at,
        }
    }

    pub fn encode(&self) -> String {
        let payload = json!({
            "id": self.id,
            "created_at": self.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        });
        URL_SAFE_NO_PAD.encode(payload.to_string())
    }

    pub fn decode(token: &str) -> Result<Self, GovernanceError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| GovernanceError::validation("malformed pagination cursor"))?;
        let payload: Value = serde_json::from_slice(&bytes)
            .map_err(|_| GovernanceError::validation("malformed pagination cursor"))?;

        let id = payload["id"]
            .as_str()
            .ok_or_else(|| GovernanceError::validation("cursor missing id"))?
            .to_string();
        let created_at = payload["created_at"]
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| GovernanceError::validation("cursor missing created_at"))?;

        Ok(Self { id, created_at })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Prev,
}

/// Parsed, bounds-checked paging parameters for one list call.
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub cursor: Option<Cursor>,
    pub direction: Direction,
    pub limit: i64,
}

impl PageRequest {
    pub fn new(
        cursor: Option<&str>,
        direction: Direction,
        limit: Option<i64>,
        default_limit: i64,
        max_limit: i64,
    ) -> Result<Self, GovernanceError> {
        let limit = match limit {
            None => default_limit,
            Some(l) if l < 1 => {
                return Err(GovernanceError::validation("limit must be at least 1"))
            }
            Some(l) => l.min(max_limit),
        };
        let cursor = cursor.map(Cursor::decode).transpose()?;
        if cursor.is_none() && direction == Direction::Prev {
            return Err(GovernanceError::validation(
                "prev paging requires a cursor",
            ));
        }
        Ok(Self {
            cursor,
            direction,
            limit,
        })
    }

    pub fn first_page(limit: Option<i64>, default_limit: i64, max_limit: i64) -> Self {
        Self {
            cursor: None,
            direction: Direction::Next,
            limit: limit
                .unwrap_or(default_limit)
                .clamp(1, max_limit),
        }
    }
}

/// Response envelope for list operations.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
    pub prev_cursor: Option<String>,
    pub has_next: bool,
    pub has_prev: bool,
    pub limit: i64,
}

/// Assemble a page from `limit + 1` fetched rows.
///
/// `items` must arrive in display order `(created_at DESC, id DESC)` for
/// `Next`, and in reverse display order (ascending, nearest the cursor
/// first) for `Prev`; `key` extracts each row's sort key.
pub fn assemble<T>(
    mut items: Vec<T>,
    request: &PageRequest,
    key: impl Fn(&T) -> Cursor,
) -> Page<T> {
    let overflow = items.len() as i64 > request.limit;
    if overflow {
        items.truncate(request.limit as usize);
    }
    if request.direction == Direction::Prev {
        items.reverse();
    }

    let (has_next, has_prev) = match request.direction {
        Direction::Next => (overflow, request.cursor.is_some()),
        Direction::Prev => (request.cursor.is_some(), overflow),
    };

    let next_cursor = if has_next {
        items.last().map(|item| key(item).encode())
    } else {
        None
    };
    let prev_cursor = if has_prev {
        items.first().map(|item| key(item).encode())
    } else {
        None
    };

    Page {
        items,
        next_cursor,
        prev_cursor,
        has_next,
        has_prev,
        limit: request.limit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).unwrap()
    }

    #[test]
    fn cursor_round_trips() {
        let cursor = Cursor::new("0198c1a2-0000-7000-8000-000000000001", ts(1_700_000_000));
        let decoded = Cursor::decode(&cursor.encode()).unwrap();
        assert_eq!(decoded, cursor);
    }

    #[test]
    fn cursor_payload_is_base64url_json() {
        let cursor = Cursor::new("abc", ts(0));
        let bytes = URL_SAFE_NO_PAD.decode(cursor.encode()).unwrap();
        let payload: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(payload["id"], "abc");
        assert_eq!(payload["created_at"], "1970-01-01T00:00:00.000Z");
    }

    #[test]
    fn garbage_cursor_is_a_validation_error() {
        let err = Cursor::decode("not-base64!!").unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
    }

    #[test]
    fn limit_defaults_and_caps() {
        let req = PageRequest::new(None, Direction::Next, None, 50, 100).unwrap();
        assert_eq!(req.limit, 50);
        let req = PageRequest::new(None, Direction::Next, Some(500), 50, 100).unwrap();
        assert_eq!(req.limit, 100);
        assert!(PageRequest::new(None, Direction::Next, Some(0), 50, 100).is_err());
    }

    #[test]
    fn next_page_overflow_sets_has_next() {
        let req = PageRequest::first_page(Some(2), 50, 100);
        let rows = vec![("c", ts(30)), ("b", ts(20)), ("a", ts(10))];
        let page = assemble(rows, &req, |(id, at)| Cursor::new(*id, *at));
        assert_eq!(page.items.len(), 2);
        assert!(page.has_next);
        assert!(!page.has_prev);
        assert!(page.next_cursor.is_some());
        assert!(page.prev_cursor.is_none());
    }

    #[test]
    fn prev_page_reverses_into_display_order() {
        let cursor = Cursor::new("a", ts(10));
        let req = PageRequest::new(
            Some(cursor.encode().as_str()),
            Direction::Prev,
            Some(2),
            50,
            100,
        )
        .unwrap();
        // Ascending fetch: nearest-after-cursor first.
        let rows = vec![("b", ts(20)), ("c", ts(30)), ("d", ts(40))];
        let page = assemble(rows, &req, |(id, at)| Cursor::new(*id, *at));
        let ids: Vec<&str> = page.items.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec!["c", "b"]);
        assert!(page.has_prev);
        assert!(page.has_next);
    }
}
