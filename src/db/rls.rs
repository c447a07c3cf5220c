use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::ApiError;

/// Begin a transaction with the clinic id bound to the database session.
/// Row-level policies filter every statement executed on the returned
/// transaction; application-level `clinic_id` filters stay in the queries as
/// a second, independent layer.
pub async fn clinic_tx(pool: &PgPool, clinic_id: Uuid) -> Result<Transaction<'static, Postgres>, ApiError> {
    let mut tx = pool.begin().await.map_err(|e| {
        tracing::error!("failed to open clinic transaction: {e}");
        ApiError::Forbidden
    })?;

    sqlx::query("SELECT set_config('app.clinic_id', $1, true)")
        .bind(clinic_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            tracing::error!("failed to bind clinic id to session: {e}");
            ApiError::Forbidden
        })?;

    Ok(tx)
}

/// Begin a transaction for pre-tenant credential lookups (login, invite
/// redemption). Only the dedicated `credential_check` SELECT policies apply;
/// callers must rebind the clinic id (`bind_clinic`) before any write.
pub async fn credential_tx(pool: &PgPool) -> Result<Transaction<'static, Postgres>, ApiError> {
    let mut tx = pool.begin().await?;
    sqlx::query("SELECT set_config('app.auth_context', 'credential_check', true)")
        .execute(&mut *tx)
        .await?;
    Ok(tx)
}

/// Bind (or rebind) the clinic id on an already-open transaction.
pub async fn bind_clinic(tx: &mut Transaction<'static, Postgres>, clinic_id: Uuid) -> Result<(), ApiError> {
    sqlx::query("SELECT set_config('app.clinic_id', $1, true)")
        .bind(clinic_id.to_string())
        .execute(&mut **tx)
        .await?;
    Ok(())
}
