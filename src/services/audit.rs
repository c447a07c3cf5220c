use lazy_static::lazy_static;
use regex::Regex;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::db::rls;
use crate::error::ApiError;
use crate::models::audit::{AuditLogRow, AuditQuery};

lazy_static! {
    static ref UUID_RE: Regex = Regex::new(
        r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}"
    )
    .unwrap();
    static ref EMAIL_RE: Regex = Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+").unwrap();
    static ref PHONE_RE: Regex = Regex::new(r"\+?\d[\d().\-\s]{5,}\d").unwrap();
}

/// An audit entry to record alongside a mutation.
pub struct AuditEntry {
    pub user_id: Uuid,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<Uuid>,
}

/// Strip identifier, email and phone patterns from free-text action strings.
/// PHI never reaches the audit table outside the opaque entity_id column.
pub fn scrub(action: &str) -> String {
    let scrubbed = UUID_RE.replace_all(action, "[REDACTED]");
    let scrubbed = EMAIL_RE.replace_all(&scrubbed, "[REDACTED]");
    let scrubbed = PHONE_RE.replace_all(&scrubbed, "[REDACTED]");
    scrubbed.into_owned()
}

/// Append an audit record inside the caller's transaction so the record
/// commits or rolls back with the mutation it describes.
pub async fn record(
    tx: &mut Transaction<'static, Postgres>,
    clinic_id: Uuid,
    entry: AuditEntry,
) -> Result<(), ApiError> {
    sqlx::query(
        "INSERT INTO audit_log (clinic_id, user_id, action, entity_type, entity_id)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(clinic_id)
    .bind(entry.user_id)
    .bind(scrub(&entry.action))
    .bind(&entry.entity_type)
    .bind(entry.entity_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Fire-and-forget variant for non-transactional paths (login events).
/// Never blocks the request handler, never propagates errors.
pub fn record_detached(pool: PgPool, clinic_id: Uuid, entry: AuditEntry) {
    tokio::spawn(async move {
        let result = async {
            let mut tx = rls::clinic_tx(&pool, clinic_id).await?;
            record(&mut tx, clinic_id, entry).await?;
            tx.commit().await.map_err(ApiError::from)
        }
        .await;

        if let Err(e) = result {
            tracing::warn!("audit log insert failed for clinic {clinic_id}: {e}");
        }
    });
}

/// ADMIN-only paginated listing; rows from other clinics are invisible by
/// construction (row policies + clinic filter).
pub async fn list(
    pool: &PgPool,
    clinic_id: Uuid,
    query: &AuditQuery,
) -> Result<(Vec<AuditLogRow>, i64), ApiError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let page = query.page.unwrap_or(1).max(1);
    let offset = (page - 1) * limit;

    let mut conditions = vec!["clinic_id = $1".to_string()];
    if query.action.is_some() {
        conditions.push(format!("action LIKE ${}", conditions.len() + 1));
    }
    if query.entity_type.is_some() {
        conditions.push(format!("entity_type = ${}", conditions.len() + 1));
    }
    if query.user_id.is_some() {
        conditions.push(format!("user_id = ${}", conditions.len() + 1));
    }
    let where_clause = conditions.join(" AND ");

    let select = format!(
        "SELECT id, user_id, action, entity_type, entity_id, created_at
         FROM audit_log WHERE {where_clause}
         ORDER BY created_at DESC
         LIMIT {limit} OFFSET {offset}"
    );
    let count = format!("SELECT COUNT(*) FROM audit_log WHERE {where_clause}");

    let mut tx = rls::clinic_tx(pool, clinic_id).await?;

    let mut rows_q = sqlx::query_as::<_, AuditLogRow>(&select).bind(clinic_id);
    let mut count_q = sqlx::query_scalar::<_, i64>(&count).bind(clinic_id);
    if let Some(action) = &query.action {
        let pattern = format!("{action}%");
        rows_q = rows_q.bind(pattern.clone());
        count_q = count_q.bind(pattern);
    }
    if let Some(entity_type) = &query.entity_type {
        rows_q = rows_q.bind(entity_type.clone());
        count_q = count_q.bind(entity_type.clone());
    }
    if let Some(user_id) = query.user_id {
        rows_q = rows_q.bind(user_id);
        count_q = count_q.bind(user_id);
    }

    let rows = rows_q.fetch_all(&mut *tx).await?;
    let total = count_q.fetch_one(&mut *tx).await?;
    tx.commit().await?;

    Ok((rows, total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrubs_identifiers() {
        let action = "updated patient 550e8400-e29b-41d4-a716-446655440000 record";
        assert_eq!(scrub(action), "updated patient [REDACTED] record");
    }

    #[test]
    fn scrubs_emails() {
        assert_eq!(
            scrub("invited jane.doe@example.com to portal"),
            "invited [REDACTED] to portal"
        );
        // Addresses without a TLD still never reach storage.
        assert_eq!(scrub("login for a@c"), "login for [REDACTED]");
    }

    #[test]
    fn scrubs_phone_numbers() {
        assert_eq!(scrub("patient phone +1 (555) 123-4567"), "patient phone [REDACTED]");
        assert_eq!(scrub("call 555-123-4567 back"), "call [REDACTED] back");
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(scrub("PATIENT_CREATE"), "PATIENT_CREATE");
        assert_eq!(scrub("soft-archived 1 row"), "soft-archived 1 row");
    }

    #[test]
    fn scrub_is_idempotent() {
        let once = scrub("mail bob@clinic.org, id 550e8400-e29b-41d4-a716-446655440000");
        assert_eq!(scrub(&once), once);
    }
}
