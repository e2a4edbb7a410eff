//! Postgres-backed stores.
//!
//! All three stores share one `PgPool`. The schema is applied with
//! [`ensure_schema`] at startup; every statement in it is idempotent.

mod blobs;
mod clinic;
mod jobs;

pub use blobs::PgBlobStaging;
pub use clinic::PgClinicStore;
pub use jobs::PgJobStore;

use sqlx::PgPool;
use tracing::instrument;

const SCHEMA: &str = include_str!("../../migrations/0001_medscribe.sql");

/// Create tables and indexes if they do not exist yet.
#[instrument(skip(pool), err)]
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}

/// How a database failure should surface to the store's caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DbFailure {
    /// Unique violation (23505).
    Conflict(String),
    /// Foreign key violation (23503).
    MissingReference(String),
    Other(String),
}

impl DbFailure {
    pub(crate) fn into_message(self) -> String {
        match self {
            DbFailure::Conflict(msg) | DbFailure::MissingReference(msg) | DbFailure::Other(msg) => {
                msg
            }
        }
    }
}

pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> DbFailure {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => DbFailure::Conflict(msg),
                Some("23503") => DbFailure::MissingReference(msg),
                // 23514 (check violation) and everything else
                _ => DbFailure::Other(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            DbFailure::Other(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::PoolTimedOut => {
            DbFailure::Other(format!("connection pool timed out in {}", operation))
        }
        other => DbFailure::Other(format!("sqlx error in {}: {}", operation, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_errors_name_the_operation() {
        let failure = map_sqlx_error("claim_next", sqlx::Error::PoolClosed);
        assert_eq!(
            failure,
            DbFailure::Other("connection pool closed in claim_next".into())
        );
    }

    #[test]
    fn schema_creates_every_table() {
        for table in [
            "patients",
            "consultations",
            "consultation_resources",
            "jobs",
            "staged_blobs",
        ] {
            assert!(
                SCHEMA.contains(&format!("CREATE TABLE IF NOT EXISTS {table} (")),
                "missing table {table}"
            );
        }
    }
}
