//! # Database Migration System
//!
//! Embedded, versioned schema migrations for PostgreSQL. Each migration is
//! compiled into the binary, checksummed with SHA-256 and recorded in
//! `schema_migrations`; a checksum that no longer matches an applied
//! version aborts startup instead of silently diverging the schema.

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{debug, info, instrument};

use crate::database::DatabaseManager;
use crate::error::{DatabaseError, DatabaseResult};

/// One embedded schema migration
#[derive(Debug, Clone, Copy)]
pub struct EmbeddedMigration {
    pub version: i64,
    pub name: &'static str,
    pub sql: &'static str,
}

/// The full schema, in application order.
pub const MIGRATIONS: &[EmbeddedMigration] = &[
    EmbeddedMigration {
        version: 1,
        name: "create_wallets",
        sql: r#"
            CREATE TABLE IF NOT EXISTS wallets (
                id UUID PRIMARY KEY,
                user_id UUID NOT NULL,
                deposit_balance NUMERIC(30,8) NOT NULL DEFAULT 0 CHECK (deposit_balance >= 0),
                winning_balance NUMERIC(30,8) NOT NULL DEFAULT 0 CHECK (winning_balance >= 0),
                bonus_balance NUMERIC(30,8) NOT NULL DEFAULT 0 CHECK (bonus_balance >= 0),
                held_balance NUMERIC(30,8) NOT NULL DEFAULT 0 CHECK (held_balance >= 0),
                currency TEXT NOT NULL DEFAULT 'USDT',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                CONSTRAINT wallets_user_id_key UNIQUE (user_id)
            )
        "#,
    },
    EmbeddedMigration {
        version: 2,
        name: "create_transactions",
        sql: r#"
            CREATE TABLE IF NOT EXISTS transactions (
                id UUID PRIMARY KEY,
                user_id UUID,
                tx_type TEXT NOT NULL,
                status TEXT NOT NULL,
                amount NUMERIC(30,8) NOT NULL,
                currency TEXT NOT NULL DEFAULT 'USDT',
                related_entity TEXT,
                related_id UUID,
                idempotency_key TEXT,
                tx_hash TEXT,
                confirmations INT NOT NULL DEFAULT 0,
                block_number BIGINT,
                metadata JSONB NOT NULL DEFAULT '{}',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                CONSTRAINT transactions_idempotency_key_key UNIQUE (idempotency_key),
                CONSTRAINT transactions_tx_hash_key UNIQUE (tx_hash)
            );
            CREATE INDEX IF NOT EXISTS idx_transactions_user_created
                ON transactions (user_id, created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_transactions_type_status
                ON transactions (tx_type, status)
        "#,
    },
    EmbeddedMigration {
        version: 3,
        name: "create_contests",
        sql: r#"
            CREATE TABLE IF NOT EXISTS contests (
                id UUID PRIMARY KEY,
                code TEXT NOT NULL,
                title TEXT NOT NULL,
                entry_fee NUMERIC(30,8) NOT NULL CHECK (entry_fee > 0),
                currency TEXT NOT NULL DEFAULT 'USDT',
                max_players INT NOT NULL CHECK (max_players >= 2),
                commission_pct NUMERIC(5,2) NOT NULL DEFAULT 0
                    CHECK (commission_pct >= 0 AND commission_pct <= 100),
                prize_structure JSONB NOT NULL DEFAULT '[]',
                status TEXT NOT NULL DEFAULT 'scheduled',
                starts_at TIMESTAMPTZ,
                settled_at TIMESTAMPTZ,
                created_by UUID,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                CONSTRAINT contests_code_key UNIQUE (code)
            );
            CREATE INDEX IF NOT EXISTS idx_contests_status ON contests (status)
        "#,
    },
    EmbeddedMigration {
        version: 4,
        name: "create_contest_entries",
        sql: r#"
            CREATE TABLE IF NOT EXISTS contest_entries (
                id UUID PRIMARY KEY,
                contest_id UUID NOT NULL REFERENCES contests(id) ON DELETE CASCADE,
                user_id UUID NOT NULL,
                entry_code TEXT NOT NULL,
                amount_debited NUMERIC(30,8) NOT NULL,
                winner_rank INT,
                payout_tx_id UUID,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                CONSTRAINT contest_entries_entry_code_key UNIQUE (entry_code),
                CONSTRAINT contest_entries_contest_id_user_id_key UNIQUE (contest_id, user_id)
            );
            CREATE INDEX IF NOT EXISTS idx_contest_entries_contest
                ON contest_entries (contest_id, created_at)
        "#,
    },
    EmbeddedMigration {
        version: 5,
        name: "create_audit_logs",
        sql: r#"
            CREATE TABLE IF NOT EXISTS audit_logs (
                id UUID PRIMARY KEY,
                admin_id UUID,
                action TEXT NOT NULL,
                entity_type TEXT,
                entity_id UUID,
                details JSONB NOT NULL DEFAULT '{}',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            CREATE INDEX IF NOT EXISTS idx_audit_logs_entity
                ON audit_logs (entity_type, entity_id, created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_audit_logs_action
                ON audit_logs (action, created_at DESC)
        "#,
    },
];

/// Outcome of one migration run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationReport {
    pub total: usize,
    pub applied: usize,
    pub skipped: usize,
    pub total_time_ms: u64,
}

/// Applies every pending migration and verifies checksums of the already
/// applied ones.
#[instrument(skip(db))]
pub async fn run_migrations(db: &DatabaseManager) -> DatabaseResult<MigrationReport> {
    info!("Running schema migrations");
    let started = Instant::now();

    ensure_schema_table(db.pool()).await?;
    let recorded = load_applied(db.pool()).await?;

    let mut applied = 0usize;
    let mut skipped = 0usize;

    for migration in MIGRATIONS {
        let checksum = checksum(migration.sql);

        if let Some(existing) = recorded.get(&migration.version) {
            if existing != &checksum {
                return Err(DatabaseError::ChecksumMismatch {
                    version: migration.version,
                    expected: existing.clone(),
                    found: checksum,
                });
            }
            debug!(version = migration.version, "migration already applied");
            skipped += 1;
            continue;
        }

        let migration_started = Instant::now();
        db.execute_transaction(move |tx| {
            Box::pin(async move {
                for statement in split_statements(migration.sql) {
                    sqlx::query(statement).execute(&mut **tx).await?;
                }

                sqlx::query(
                    "INSERT INTO schema_migrations (version, name, checksum, execution_time_ms) \
                     VALUES ($1, $2, $3, $4)",
                )
                .bind(migration.version)
                .bind(migration.name)
                .bind(&checksum)
                .bind(migration_started.elapsed().as_millis() as i64)
                .execute(&mut **tx)
                .await?;

                Ok(())
            })
        })
        .await?;

        info!(
            version = migration.version,
            name = migration.name,
            "applied migration"
        );
        applied += 1;
    }

    let report = MigrationReport {
        total: MIGRATIONS.len(),
        applied,
        skipped,
        total_time_ms: started.elapsed().as_millis() as u64,
    };
    info!(
        applied = report.applied,
        skipped = report.skipped,
        "schema migrations complete"
    );
    Ok(report)
}

async fn ensure_schema_table(pool: &PgPool) -> DatabaseResult<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (\
             version BIGINT PRIMARY KEY,\
             name TEXT NOT NULL,\
             checksum VARCHAR(64) NOT NULL,\
             applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),\
             execution_time_ms BIGINT\
         )",
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn load_applied(pool: &PgPool) -> DatabaseResult<HashMap<i64, String>> {
    let rows: Vec<(i64, String)> =
        sqlx::query_as("SELECT version, checksum FROM schema_migrations ORDER BY version")
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().collect())
}

/// SHA-256 checksum of migration SQL, hex encoded.
fn checksum(content: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Splits a migration body into individual statements.
fn split_statements(sql: &str) -> impl Iterator<Item = &str> {
    sql.split(';')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty() && !s.starts_with("--"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions_are_unique_and_ascending() {
        let mut last = 0;
        for migration in MIGRATIONS {
            assert!(
                migration.version > last,
                "version {} out of order",
                migration.version
            );
            last = migration.version;
        }
    }

    #[test]
    fn test_checksum_is_sha256_hex() {
        let sum = checksum("CREATE TABLE t (id UUID PRIMARY KEY)");
        assert_eq!(sum.len(), 64);
        assert!(sum.chars().all(|c| c.is_ascii_hexdigit()));
        // Same input, same checksum.
        assert_eq!(sum, checksum("CREATE TABLE t (id UUID PRIMARY KEY)"));
    }

    #[test]
    fn test_split_statements() {
        let sql = "CREATE TABLE a (id INT);\n  CREATE INDEX i ON a (id);\n";
        let statements: Vec<&str> = split_statements(sql).collect();
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("CREATE TABLE"));
        assert!(statements[1].starts_with("CREATE INDEX"));
    }

    #[test]
    fn test_schema_names_unique_constraints() {
        // The service layer maps 23505 violations by constraint name; the
        // embedded DDL must keep those names stable.
        let all_sql: String = MIGRATIONS.iter().map(|m| m.sql).collect();
        for constraint in [
            "transactions_idempotency_key_key",
            "transactions_tx_hash_key",
            "contest_entries_contest_id_user_id_key",
            "wallets_user_id_key",
        ] {
            assert!(
                all_sql.contains(constraint),
                "missing constraint {constraint}"
            );
        }
    }

    #[test]
    fn test_every_balance_column_is_guarded() {
        let wallets_sql = MIGRATIONS[0].sql;
        for bucket in [
            "deposit_balance",
            "winning_balance",
            "bonus_balance",
            "held_balance",
        ] {
            assert!(wallets_sql.contains(&format!("CHECK ({bucket} >= 0)")));
        }
    }
}
