//! MySQL fact store
//!
//! Reads and writes (entity, attribute, answer) rows of a single table
//! using SQLx. Queries are parameterised; the table name is checked to be
//! a plain identifier because it cannot be bound.

use async_trait::async_trait;
use kbqa_core::{DatabaseConfig, FactStore, FactTriple, KbqaError, Result};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::FromRow;

/// MySQL fact store
pub struct MySqlFactStore {
    pool: MySqlPool,
    table: String,
}

impl MySqlFactStore {
    /// Create a new store connection
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        validate_table_name(&config.table)?;

        let pool = MySqlPoolOptions::new()
            .max_connections(config.pool_size)
            .connect(&config.mysql_url)
            .await
            .map_err(|e| KbqaError::DatabaseError(format!("MySQL connection failed: {e}")))?;

        tracing::info!("Connected to fact store table {}", config.table);
        Ok(Self {
            pool,
            table: config.table.clone(),
        })
    }

    /// Create the fact table if missing (run once on setup)
    pub async fn init_schema(&self) -> Result<()> {
        let ddl = schema_ddl(&self.table);

        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .map_err(|e| KbqaError::DatabaseError(format!("Schema init failed: {e}")))?;

        Ok(())
    }
}

/// Triple row from database
#[derive(Debug, FromRow)]
struct TripleRow {
    entity: String,
    attribute: String,
    answer: String,
}

impl From<TripleRow> for FactTriple {
    fn from(row: TripleRow) -> Self {
        FactTriple::new(row.entity, row.attribute, row.answer)
    }
}

/// One row per (entity, attribute)
fn schema_ddl(table: &str) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id BIGINT AUTO_INCREMENT PRIMARY KEY,
            entity VARCHAR(255) NOT NULL,
            attribute VARCHAR(255) NOT NULL,
            answer TEXT NOT NULL,
            INDEX idx_entity (entity),
            UNIQUE KEY uniq_entity_attribute (entity, attribute)
        ) DEFAULT CHARSET = utf8mb4
        "#
    )
}

fn insert_sql(table: &str) -> String {
    format!("INSERT IGNORE INTO {table} (entity, attribute, answer) VALUES (?, ?, ?)")
}

/// Table names are interpolated into SQL, so only `[A-Za-z0-9_]` is accepted
fn validate_table_name(table: &str) -> Result<()> {
    let valid = !table.is_empty()
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(KbqaError::ConfigError(format!(
            "Invalid fact table name: {table:?}"
        )))
    }
}

#[async_trait]
impl FactStore for MySqlFactStore {
    async fn find_by_entity(&self, entity: &str) -> Result<Vec<FactTriple>> {
        let sql = format!(
            "SELECT entity, attribute, answer FROM {} WHERE entity = ?",
            self.table
        );

        let rows: Vec<TripleRow> = sqlx::query_as(&sql)
            .bind(entity)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                KbqaError::DatabaseError(format!("Unable to fetch facts for {entity}: {e}"))
            })?;

        tracing::debug!("Fetched {} facts for {}", rows.len(), entity);
        Ok(rows.into_iter().map(FactTriple::from).collect())
    }

    async fn insert(&self, triple: &FactTriple) -> Result<()> {
        let sql = insert_sql(&self.table);

        sqlx::query(&sql)
            .bind(&triple.entity)
            .bind(&triple.attribute)
            .bind(&triple.answer)
            .execute(&self.pool)
            .await
            .map_err(|e| KbqaError::DatabaseError(format!("Failed to store fact: {e}")))?;

        Ok(())
    }

    async fn insert_batch(&self, triples: &[FactTriple]) -> Result<u64> {
        let sql = insert_sql(&self.table);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| KbqaError::DatabaseError(format!("Failed to begin transaction: {e}")))?;

        let mut written = 0;
        for triple in triples {
            let result = sqlx::query(&sql)
                .bind(&triple.entity)
                .bind(&triple.attribute)
                .bind(&triple.answer)
                .execute(&mut *tx)
                .await
                .map_err(|e| KbqaError::DatabaseError(format!("Failed to store fact: {e}")))?;
            written += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| KbqaError::DatabaseError(format!("Failed to commit facts: {e}")))?;

        Ok(written)
    }

    fn name(&self) -> &str {
        "mysql"
    }
}
