//! Client-local secret store keyed by order ID

use crate::config::StorageConfig;
use crate::error::{CoordinatorError, CoordinatorResult};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// Secret material derived for one order
#[derive(Clone, PartialEq, Eq)]
pub struct SecretMaterial {
    pub order_id: String,
    pub nonce: String,
    pub secret: [u8; 32],
    pub secret_hash: [u8; 32],
    pub created_at: DateTime<Utc>,
}

impl SecretMaterial {
    pub fn new(order_id: &str, nonce: &str, secret: [u8; 32], secret_hash: [u8; 32]) -> Self {
        Self {
            order_id: order_id.to_string(),
            nonce: nonce.to_string(),
            secret,
            secret_hash,
            created_at: Utc::now(),
        }
    }
}

// The secret itself is never printed
impl fmt::Debug for SecretMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretMaterial")
            .field("order_id", &self.order_id)
            .field("nonce", &self.nonce)
            .field("secret_hash", &hex::encode(self.secret_hash))
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Keyed persistence of secret material
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, order_id: &str) -> CoordinatorResult<Option<SecretMaterial>>;

    /// Store material unless the order already has some; returns the stored value
    async fn put(&self, material: SecretMaterial) -> CoordinatorResult<SecretMaterial>;
}

/// In-memory store for tests and ephemeral sessions
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: DashMap<String, SecretMaterial>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, order_id: &str) -> CoordinatorResult<Option<SecretMaterial>> {
        Ok(self.secrets.get(order_id).map(|m| m.clone()))
    }

    async fn put(&self, material: SecretMaterial) -> CoordinatorResult<SecretMaterial> {
        Ok(self
            .secrets
            .entry(material.order_id.clone())
            .or_insert(material)
            .clone())
    }
}

/// Durable SQLite-backed store
pub struct SqliteSecretStore {
    pool: SqlitePool,
}

impl SqliteSecretStore {
    /// Open (creating if needed) the database and run migrations
    pub async fn connect(config: &StorageConfig) -> CoordinatorResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.database_url)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("Secret store ready at {}", config.database_url);
        Ok(store)
    }

    async fn run_migrations(&self) -> CoordinatorResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS swap_secrets (
                order_id TEXT PRIMARY KEY,
                nonce TEXT NOT NULL,
                secret TEXT NOT NULL,
                secret_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Health check
    pub async fn health_check(&self) -> CoordinatorResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn decode_32(field: &str, value: &str) -> CoordinatorResult<[u8; 32]> {
    let bytes = hex::decode(value)
        .map_err(|e| CoordinatorError::Internal(format!("corrupt {}: {}", field, e)))?;
    bytes
        .try_into()
        .map_err(|_| CoordinatorError::Internal(format!("corrupt {}: wrong length", field)))
}

#[async_trait]
impl SecretStore for SqliteSecretStore {
    async fn get(&self, order_id: &str) -> CoordinatorResult<Option<SecretMaterial>> {
        let row = sqlx::query(
            "SELECT order_id, nonce, secret, secret_hash, created_at FROM swap_secrets WHERE order_id = ?",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let secret: String = row.try_get("secret")?;
        let secret_hash: String = row.try_get("secret_hash")?;

        Ok(Some(SecretMaterial {
            order_id: row.try_get("order_id")?,
            nonce: row.try_get("nonce")?,
            secret: decode_32("secret", &secret)?,
            secret_hash: decode_32("secret_hash", &secret_hash)?,
            created_at: row.try_get("created_at")?,
        }))
    }

    async fn put(&self, material: SecretMaterial) -> CoordinatorResult<SecretMaterial> {
        let result = sqlx::query(
            r#"
            INSERT INTO swap_secrets (order_id, nonce, secret, secret_hash, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(&material.order_id)
        .bind(&material.nonce)
        .bind(hex::encode(material.secret))
        .bind(hex::encode(material.secret_hash))
        .bind(material.created_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            debug!("Persisted secret for order {}", material.order_id);
            return Ok(material);
        }

        self.get(&material.order_id)
            .await?
            .ok_or_else(|| CoordinatorError::Internal("secret vanished after insert".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn material(order_id: &str, byte: u8) -> SecretMaterial {
        SecretMaterial::new(order_id, "0xnonce", [byte; 32], [byte.wrapping_add(1); 32])
    }

    #[tokio::test]
    async fn test_memory_store_first_write_wins() {
        let store = MemorySecretStore::new();
        assert!(store.get("ord-1").await.unwrap().is_none());

        let first = store.put(material("ord-1", 1)).await.unwrap();
        let second = store.put(material("ord-1", 9)).await.unwrap();

        assert_eq!(first.secret, [1; 32]);
        assert_eq!(second.secret, [1; 32]);
    }

    #[tokio::test]
    async fn test_sqlite_store_persists_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            database_url: format!("sqlite://{}", dir.path().join("secrets.db").display()),
            max_connections: 1,
        };

        let store = SqliteSecretStore::connect(&config).await.unwrap();
        store.health_check().await.unwrap();
        store.put(material("ord-1", 3)).await.unwrap();
        let kept = store.put(material("ord-1", 4)).await.unwrap();
        assert_eq!(kept.secret, [3; 32]);
        drop(store);

        let reopened = SqliteSecretStore::connect(&config).await.unwrap();
        let loaded = reopened.get("ord-1").await.unwrap().unwrap();
        assert_eq!(loaded.secret, [3; 32]);
        assert_eq!(loaded.secret_hash, [4; 32]);
        assert_eq!(loaded.nonce, "0xnonce");
        assert!(reopened.get("ord-2").await.unwrap().is_none());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", material("ord-1", 0xab));
        assert!(!rendered.contains(&hex::encode([0xab; 32])));
        assert!(rendered.contains("ord-1"));
    }
}
