//! Immutable audit trail.
//!
//! Audit rows double as the replay source for settlement and cancellation:
//! the recorded summary of a terminal contest is read back instead of
//! recomputed, so a second invocation observes exactly what the first one
//! did.

use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use fanledger_core::{AdminId, LedgerResult};
use fanledger_database::{AuditLogRecord, DatabaseManager};

use crate::map_db_err;

/// Appends an audit row inside the caller's transaction.
pub async fn record_audit_in(
    tx: &mut Transaction<'static, Postgres>,
    admin_id: Option<AdminId>,
    action: &str,
    entity: Option<(&str, Uuid)>,
    details: serde_json::Value,
) -> LedgerResult<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO audit_logs (id, admin_id, action, entity_type, entity_id, details) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(id)
    .bind(admin_id)
    .bind(action)
    .bind(entity.map(|(kind, _)| kind))
    .bind(entity.map(|(_, target)| target))
    .bind(details)
    .execute(&mut **tx)
    .await
    .map_err(map_db_err)?;
    Ok(id)
}

/// Latest audit row for an action/entity pair.
pub async fn find_latest_audit(
    db: &DatabaseManager,
    action: &str,
    entity_id: Uuid,
) -> LedgerResult<Option<AuditLogRecord>> {
    sqlx::query_as::<_, AuditLogRecord>(
        "SELECT * FROM audit_logs WHERE action = $1 AND entity_id = $2 \
         ORDER BY created_at DESC LIMIT 1",
    )
    .bind(action)
    .bind(entity_id)
    .fetch_optional(db.pool())
    .await
    .map_err(map_db_err)
}

/// Transaction-scoped variant of [`find_latest_audit`].
pub async fn find_latest_audit_in(
    tx: &mut Transaction<'static, Postgres>,
    action: &str,
    entity_id: Uuid,
) -> LedgerResult<Option<AuditLogRecord>> {
    sqlx::query_as::<_, AuditLogRecord>(
        "SELECT * FROM audit_logs WHERE action = $1 AND entity_id = $2 \
         ORDER BY created_at DESC LIMIT 1",
    )
    .bind(action)
    .bind(entity_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(map_db_err)
}
