// PostgreSQL inventory

use async_trait::async_trait;
use calsync_core::{FleetInstance, RegisterInstance};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{error, instrument};

use super::{InstanceStore, InventoryError};

const COLUMNS: &str =
    "id, name, routing_url, identity_prefix, shared_secret, created_at, updated_at";

#[derive(Clone)]
pub struct PostgresInstanceStore {
    pool: PgPool,
}

impl PostgresInstanceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the inventory migrations. Sync schema versions in a shared database are ignored.
    pub async fn migrate(pool: &PgPool) -> Result<(), InventoryError> {
        let mut migrator = sqlx::migrate!("./migrations");
        migrator.set_ignore_missing(true);
        migrator.run(pool).await.map_err(|e| {
            error!("Failed to run migrations: {}", e);
            InventoryError::Database(e.to_string())
        })
    }
}

fn db_error(context: &str, e: sqlx::Error) -> InventoryError {
    error!("{}: {}", context, e);
    InventoryError::Database(e.to_string())
}

fn instance_from_row(row: &PgRow) -> FleetInstance {
    FleetInstance {
        id: row.get("id"),
        name: row.get("name"),
        routing_url: row.get("routing_url"),
        identity_prefix: row.get("identity_prefix"),
        shared_secret: row.get("shared_secret"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[async_trait]
impl InstanceStore for PostgresInstanceStore {
    #[instrument(skip(self, request), fields(prefix = %request.identity_prefix))]
    async fn register(&self, request: RegisterInstance) -> Result<FleetInstance, InventoryError> {
        let instance = request.into_instance();
        let result = sqlx::query(
            r#"
            INSERT INTO fleet_instances
                (id, name, routing_url, identity_prefix, shared_secret, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(instance.id)
        .bind(&instance.name)
        .bind(&instance.routing_url)
        .bind(&instance.identity_prefix)
        .bind(&instance.shared_secret)
        .bind(instance.created_at)
        .bind(instance.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(instance),
            Err(e)
                if e
                    .as_database_error()
                    .and_then(|d| d.code())
                    .is_some_and(|code| code == "23505") =>
            {
                Err(InventoryError::PrefixTaken(instance.identity_prefix))
            }
            Err(e) => Err(db_error("Failed to register instance", e)),
        }
    }

    #[instrument(skip(self))]
    async fn deregister(&self, prefix: &str) -> Result<FleetInstance, InventoryError> {
        let row = sqlx::query(&format!(
            "DELETE FROM fleet_instances WHERE identity_prefix = $1 RETURNING {COLUMNS}"
        ))
        .bind(prefix)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to deregister instance", e))?;

        row.as_ref()
            .map(instance_from_row)
            .ok_or_else(|| InventoryError::NotFound(prefix.to_string()))
    }

    async fn get_by_prefix(&self, prefix: &str) -> Result<Option<FleetInstance>, InventoryError> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM fleet_instances WHERE identity_prefix = $1"
        ))
        .bind(prefix)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load instance", e))?;
        Ok(row.as_ref().map(instance_from_row))
    }

    async fn list(&self) -> Result<Vec<FleetInstance>, InventoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM fleet_instances ORDER BY identity_prefix"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list instances", e))?;
        Ok(rows.iter().map(instance_from_row).collect())
    }
}
