//! Append-only audit log.
//!
//! Every state-changing operation inserts one entry inside the same
//! transaction as the change it describes. Creates and terminal
//! transitions record full snapshots; updates record structural
//! `{field: {from, to}}` diffs.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use sqlx::SqliteConnection;

use crate::database::models::AuditEntry;
use crate::database::{format_ts, Database};
use crate::error::GovernanceError;
use crate::ids;
use crate::pagination::{self, Cursor, Page, PageRequest};

pub const DEFAULT_PAGE_LIMIT: i64 = 100;
pub const MAX_PAGE_LIMIT: i64 = 1000;

/// Insert one audit entry on the caller's transaction.
pub async fn record(
    conn: &mut SqliteConnection,
    entity_type: &str,
    entity_id: &str,
    action: &str,
    old_value: Option<&Value>,
    new_value: Option<&Value>,
    performed_by: &str,
) -> Result<AuditEntry, GovernanceError> {
    let entry = AuditEntry {
        audit_id: ids::generate(),
        entity_type: entity_type.to_string(),
        entity_id: entity_id.to_string(),
        action: action.to_string(),
        old_value: old_value.cloned(),
        new_value: new_value.cloned(),
        performed_by: performed_by.to_string(),
        performed_at: Utc::now(),
    };

    sqlx::query(
        "INSERT INTO audit_log (audit_id, entity_type, entity_id, action, old_value, new_value, \
         performed_by, performed_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&entry.audit_id)
    .bind(&entry.entity_type)
    .bind(&entry.entity_id)
    .bind(&entry.action)
    .bind(entry.old_value.as_ref().map(|v| v.to_string()))
    .bind(entry.new_value.as_ref().map(|v| v.to_string()))
    .bind(&entry.performed_by)
    .bind(format_ts(&entry.performed_at))
    .execute(conn)
    .await?;

    Ok(entry)
}

/// Shallow structural diff between two object snapshots.
///
/// Keys present in either side with differing values appear as
/// `{"from": old, "to": new}`; missing sides render as null.
pub fn diff(old: &Value, new: &Value) -> Value {
    let empty = Map::new();
    let old_map = old.as_object().unwrap_or(&empty);
    let new_map = new.as_object().unwrap_or(&empty);

    let mut changes = Map::new();
    for (key, old_item) in old_map {
        match new_map.get(key) {
            Some(new_item) if new_item == old_item => {}
            Some(new_item) => {
                changes.insert(key.clone(), json!({"from": old_item, "to": new_item}));
            }
            None => {
                changes.insert(key.clone(), json!({"from": old_item, "to": null}));
            }
        }
    }
    for (key, new_item) in new_map {
        if !old_map.contains_key(key) {
            changes.insert(key.clone(), json!({"from": null, "to": new_item}));
        }
    }
    Value::Object(changes)
}

/// Filters for audit reads; all optional, combined with AND.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub action: Option<String>,
    pub performed_by: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct AuditService {
    db: Database,
}

impl AuditService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn list(
        &self,
        query: &AuditQuery,
        request: &PageRequest,
    ) -> Result<Page<AuditEntry>, GovernanceError> {
        let mut sql = String::from("SELECT * FROM audit_log WHERE 1 = 1");
        let mut binds: Vec<String> = Vec::new();

        if let Some(entity_type) = &query.entity_type {
            sql.push_str(" AND entity_type = ?");
            binds.push(entity_type.clone());
        }
        if let Some(entity_id) = &query.entity_id {
            sql.push_str(" AND entity_id = ?");
            binds.push(entity_id.clone());
        }
        if let Some(action) = &query.action {
            sql.push_str(" AND action = ?");
            binds.push(action.clone());
        }
        if let Some(performed_by) = &query.performed_by {
            sql.push_str(" AND performed_by = ?");
            binds.push(performed_by.clone());
        }
        if let Some(since) = &query.since {
            sql.push_str(" AND performed_at >= ?");
            binds.push(format_ts(since));
        }
        if let Some(until) = &query.until {
            sql.push_str(" AND performed_at <= ?");
            binds.push(format_ts(until));
        }

        if let Some(cursor) = &request.cursor {
            match request.direction {
                pagination::Direction::Next => {
                    sql.push_str(
                        " AND (performed_at < ? OR (performed_at = ? AND audit_id < ?))",
                    );
                }
                pagination::Direction::Prev => {
                    sql.push_str(
                        " AND (performed_at > ? OR (performed_at = ? AND audit_id > ?))",
                    );
                }
            }
            let ts = format_ts(&cursor.created_at);
            binds.push(ts.clone());
            binds.push(ts);
            binds.push(cursor.id.clone());
        }

        match request.direction {
            pagination::Direction::Next => {
                sql.push_str(" ORDER BY performed_at DESC, audit_id DESC LIMIT ?")
            }
            pagination::Direction::Prev => {
                sql.push_str(" ORDER BY performed_at ASC, audit_id ASC LIMIT ?")
            }
        }

        let mut q = sqlx::query(&sql);
        for bind in &binds {
            q = q.bind(bind);
        }
        q = q.bind(request.limit + 1);

        let rows = q.fetch_all(self.db.pool()).await?;
        let entries = rows
            .iter()
            .map(AuditEntry::from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(pagination::assemble(entries, request, |entry| {
            Cursor::new(entry.audit_id.clone(), entry.performed_at)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_reports_changed_keys_only() {
        let old = json!({"status": "DRAFT", "priority": 100, "name": "same"});
        let new = json!({"status": "PENDING_APPROVAL", "priority": 100, "name": "same"});
        let d = diff(&old, &new);
        assert_eq!(
            d,
            json!({"status": {"from": "DRAFT", "to": "PENDING_APPROVAL"}})
        );
    }

    #[test]
    fn diff_handles_added_and_removed_keys() {
        let old = json!({"a": 1});
        let new = json!({"b": 2});
        let d = diff(&old, &new);
        assert_eq!(d["a"], json!({"from": 1, "to": null}));
        assert_eq!(d["b"], json!({"from": null, "to": 2}));
    }

    #[tokio::test]
    async fn record_and_read_back() {
        let db = Database::new_in_memory().await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        record(
            &mut conn,
            "RULE",
            "r1",
            "CREATE",
            None,
            Some(&json!({"rule_name": "test"})),
            "maker-1",
        )
        .await
        .unwrap();
        drop(conn);

        let service = AuditService::new(db);
        let page = service
            .list(
                &AuditQuery {
                    entity_id: Some("r1".to_string()),
                    ..Default::default()
                },
                &PageRequest::first_page(None, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT),
            )
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].action, "CREATE");
        assert_eq!(page.items[0].new_value, Some(json!({"rule_name": "test"})));
    }
}
