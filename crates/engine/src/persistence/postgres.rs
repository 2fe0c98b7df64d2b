//! PostgreSQL implementation of SyncStore
//!
//! Production persistence shared by every fleet instance:
//! - Tenant claims as leases taken with SKIP LOCKED + UPDATE ... RETURNING
//! - Unique constraints on event links so lookup-or-create never duplicates
//! - Append-only sync log rows

use std::time::Duration;

use async_trait::async_trait;
use calsync_core::{
    Calendar, CalendarStatus, EventLink, LogRecord, NewEventLink, PlanTier, Remediation,
    Severity, Tenant,
};
use chrono::{NaiveDate, NaiveTime};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::*;

const TENANT_COLUMNS: &str = "id, plan, paused, stopped, google_access_token, google_refresh_token, \
     callback_version, notion_token, database_id, time_min_days, time_max_days, last_synced_at, \
     claimed_by, claimed_until, created_at";

const LINK_COLUMNS: &str =
    "id, calendar_event_id, page_id, calendar_id, tenant_id, will_remove, created_at, updated_at";

/// PostgreSQL implementation of SyncStore
///
/// # Example
///
/// ```ignore
/// use calsync_engine::PostgresSyncStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/calsync").await?;
/// PostgresSyncStore::migrate(&pool).await?;
/// let store = PostgresSyncStore::new(pool);
/// ```
#[derive(Clone)]
pub struct PostgresSyncStore {
    pool: PgPool,
}

impl PostgresSyncStore {
    /// Create a new PostgreSQL store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema migrations
    ///
    /// The control plane may share the database with its own migrations, so
    /// versions unknown to this crate are ignored.
    pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
        let mut migrator = sqlx::migrate!("./migrations");
        migrator.set_ignore_missing(true);
        migrator.run(pool).await.map_err(|e| {
            error!("Failed to run migrations: {}", e);
            StoreError::Database(e.to_string())
        })
    }
}

fn db_error(context: &str, e: sqlx::Error) -> StoreError {
    let unique_violation = e
        .as_database_error()
        .and_then(|d| d.code())
        .is_some_and(|code| code == "23505");
    if unique_violation {
        return StoreError::Conflict(format!("{context}: {e}"));
    }
    error!("{}: {}", context, e);
    StoreError::Database(e.to_string())
}

fn secs(d: Duration) -> f64 {
    d.as_secs_f64()
}

fn tenant_from_row(row: &PgRow) -> Result<Tenant, StoreError> {
    let plan: String = row.get("plan");
    let plan = plan
        .parse::<PlanTier>()
        .map_err(StoreError::Serialization)?;
    Ok(Tenant {
        id: row.get("id"),
        plan,
        paused: row.get("paused"),
        stopped: row.get("stopped"),
        google_access_token: row.get("google_access_token"),
        google_refresh_token: row.get("google_refresh_token"),
        callback_version: row.get("callback_version"),
        notion_token: row.get("notion_token"),
        database_id: row.get("database_id"),
        time_min_days: row.get("time_min_days"),
        time_max_days: row.get("time_max_days"),
        last_synced_at: row.get("last_synced_at"),
        claimed_by: row.get("claimed_by"),
        claimed_until: row.get("claimed_until"),
        created_at: row.get("created_at"),
    })
}

fn calendar_from_row(row: &PgRow) -> Calendar {
    let status: String = row.get("status");
    Calendar {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        provider_calendar_id: row.get("provider_calendar_id"),
        access_role: row.get("access_role"),
        property_binding: row.get("property_binding"),
        status: CalendarStatus::from(status.as_str()),
        primary: row.get("is_primary"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn link_from_row(row: &PgRow) -> EventLink {
    EventLink {
        id: row.get("id"),
        calendar_event_id: row.get("calendar_event_id"),
        page_id: row.get("page_id"),
        calendar_id: row.get("calendar_id"),
        tenant_id: row.get("tenant_id"),
        will_remove: row.get("will_remove"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn log_from_row(row: &PgRow) -> LogRecord {
    let level: String = row.get("level");
    let remediation: String = row.get("remediation");
    LogRecord {
        id: row.get("id"),
        code: row.get("code"),
        source_system: row.get("source_system"),
        description: row.get("description"),
        detail: row.get("detail"),
        stack: row.get("stack"),
        level: Severity::from(level.as_str()),
        remediation: Remediation::from(remediation.as_str()),
        archive: row.get("archive"),
        finish_work: row.get("finish_work"),
        tenant_id: row.get("tenant_id"),
        instance_prefix: row.get("instance_prefix"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[async_trait]
impl SyncStore for PostgresSyncStore {
    // =========================================================================
    // Tenants
    // =========================================================================

    #[instrument(skip(self, tenant), fields(tenant_id = %tenant.id))]
    async fn insert_tenant(&self, tenant: &Tenant) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO tenants (id, plan, paused, stopped, google_access_token, google_refresh_token,
                                 callback_version, notion_token, database_id, time_min_days,
                                 time_max_days, last_synced_at, claimed_by, claimed_until, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(tenant.id)
        .bind(tenant.plan.as_str())
        .bind(tenant.paused)
        .bind(tenant.stopped)
        .bind(&tenant.google_access_token)
        .bind(&tenant.google_refresh_token)
        .bind(&tenant.callback_version)
        .bind(&tenant.notion_token)
        .bind(&tenant.database_id)
        .bind(tenant.time_min_days)
        .bind(tenant.time_max_days)
        .bind(tenant.last_synced_at)
        .bind(&tenant.claimed_by)
        .bind(tenant.claimed_until)
        .bind(tenant.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to insert tenant", e))?;

        Ok(())
    }

    async fn get_tenant(&self, tenant_id: Uuid) -> Result<Tenant, StoreError> {
        let row = sqlx::query(&format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE id = $1"))
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to get tenant", e))?
            .ok_or_else(|| StoreError::not_found("tenant", tenant_id))?;

        tenant_from_row(&row)
    }

    #[instrument(skip(self, request), fields(owner = %request.owner, tier = %request.tier))]
    async fn claim_next_tenant(&self, request: ClaimRequest<'_>) -> Result<Option<Tenant>, StoreError> {
        // Lease-based claim:
        // 1. Candidates: matching tier, not paused/stopped, lease absent or expired, due
        // 2. Earliest due first (never-synced tenants first)
        // 3. SKIP LOCKED so concurrent loops never wait on each other's candidate
        // 4. Lease written in the same statement
        let row = sqlx::query(
            r#"
            WITH candidate AS (
                SELECT id
                FROM tenants
                WHERE plan = $1
                  AND NOT paused
                  AND NOT stopped
                  AND (claimed_until IS NULL OR claimed_until <= NOW())
                  AND (last_synced_at IS NULL OR last_synced_at <= NOW() - make_interval(secs => $2))
                ORDER BY last_synced_at NULLS FIRST, created_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE tenants t
            SET claimed_by = $3,
                claimed_until = NOW() + make_interval(secs => $4)
            FROM candidate c
            WHERE t.id = c.id
            RETURNING t.*
            "#,
        )
        .bind(request.tier.as_str())
        .bind(secs(request.min_interval))
        .bind(request.owner)
        .bind(secs(request.lease))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to claim tenant", e))?;

        match row {
            Some(row) => {
                let tenant = tenant_from_row(&row)?;
                debug!(tenant_id = %tenant.id, "Claimed tenant");
                Ok(Some(tenant))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn claim_tenant(
        &self,
        tenant_id: Uuid,
        owner: &str,
        lease: Duration,
    ) -> Result<Option<Tenant>, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE tenants
            SET claimed_by = $2,
                claimed_until = NOW() + make_interval(secs => $3)
            WHERE id = $1
              AND (claimed_by = $2 OR claimed_until IS NULL OR claimed_until <= NOW())
            RETURNING {TENANT_COLUMNS}
            "#
        ))
        .bind(tenant_id)
        .bind(owner)
        .bind(secs(lease))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to renew tenant claim", e))?;

        row.as_ref().map(tenant_from_row).transpose()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn release_tenant(&self, tenant_id: Uuid, owner: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE tenants
            SET claimed_by = NULL,
                claimed_until = NULL,
                last_synced_at = NOW()
            WHERE id = $1 AND claimed_by = $2
            "#,
        )
        .bind(tenant_id)
        .bind(owner)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to release tenant", e))?;

        Ok(())
    }

    // =========================================================================
    // Calendars
    // =========================================================================

    async fn insert_calendar(&self, calendar: &Calendar) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO calendars (id, tenant_id, provider_calendar_id, access_role, property_binding,
                                   status, is_primary, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(calendar.id)
        .bind(calendar.tenant_id)
        .bind(&calendar.provider_calendar_id)
        .bind(&calendar.access_role)
        .bind(&calendar.property_binding)
        .bind(calendar.status.to_string())
        .bind(calendar.primary)
        .bind(calendar.created_at)
        .bind(calendar.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to insert calendar", e))?;

        Ok(())
    }

    async fn list_calendars(&self, tenant_id: Uuid) -> Result<Vec<Calendar>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, provider_calendar_id, access_role, property_binding, status,
                   is_primary, created_at, updated_at
            FROM calendars
            WHERE tenant_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list calendars", e))?;

        Ok(rows.iter().map(calendar_from_row).collect())
    }

    async fn update_calendar_status(
        &self,
        calendar_id: Uuid,
        status: CalendarStatus,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE calendars SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(calendar_id)
            .bind(status.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to update calendar status", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("calendar", calendar_id));
        }
        Ok(())
    }

    // =========================================================================
    // Event links
    // =========================================================================

    async fn find_link(&self, key: &LinkKey) -> Result<Option<EventLink>, StoreError> {
        let (event_id, calendar_id) = match &key.calendar_event {
            Some((event_id, calendar_id)) => (Some(event_id.as_str()), Some(*calendar_id)),
            None => (None, None),
        };

        let row = sqlx::query(&format!(
            r#"
            SELECT {LINK_COLUMNS}
            FROM event_links
            WHERE tenant_id = $1
              AND (page_id = $2 OR (calendar_event_id = $3 AND calendar_id = $4))
            ORDER BY created_at
            LIMIT 1
            "#
        ))
        .bind(key.tenant_id)
        .bind(key.page_id.as_deref())
        .bind(event_id)
        .bind(calendar_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to find event link", e))?;

        Ok(row.as_ref().map(link_from_row))
    }

    #[instrument(skip(self, new_link), fields(tenant_id = %new_link.tenant_id))]
    async fn link_or_create(&self, new_link: NewEventLink) -> Result<LinkOutcome, StoreError> {
        let link = new_link
            .clone()
            .into_link()
            .ok_or_else(|| StoreError::Conflict("event link needs at least one side".into()))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        // Either unique constraint firing means someone else owns this event
        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO event_links ({LINK_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, FALSE, $6, $6)
            ON CONFLICT DO NOTHING
            RETURNING {LINK_COLUMNS}
            "#
        ))
        .bind(link.id)
        .bind(&link.calendar_event_id)
        .bind(&link.page_id)
        .bind(link.calendar_id)
        .bind(link.tenant_id)
        .bind(link.created_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to insert event link", e))?;

        if let Some(row) = inserted {
            tx.commit()
                .await
                .map_err(|e| db_error("Failed to commit event link", e))?;
            return Ok(LinkOutcome {
                link: link_from_row(&row),
                created: true,
            });
        }

        let existing = sqlx::query(&format!(
            r#"
            SELECT {LINK_COLUMNS}
            FROM event_links
            WHERE tenant_id = $1
              AND (page_id = $2 OR (calendar_event_id = $3 AND calendar_id = $4))
            ORDER BY created_at
            LIMIT 1
            FOR UPDATE
            "#
        ))
        .bind(link.tenant_id)
        .bind(&link.page_id)
        .bind(&link.calendar_event_id)
        .bind(link.calendar_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to load existing event link", e))?
        .ok_or_else(|| StoreError::Conflict("event link vanished during lookup-or-create".into()))?;

        let existing = link_from_row(&existing);

        let filled = sqlx::query(&format!(
            r#"
            UPDATE event_links
            SET page_id = COALESCE(page_id, $2),
                calendar_event_id = COALESCE(calendar_event_id, $3),
                updated_at = NOW()
            WHERE id = $1
              AND ((page_id IS NULL AND $2::text IS NOT NULL)
                   OR (calendar_event_id IS NULL AND $3::text IS NOT NULL))
            RETURNING {LINK_COLUMNS}
            "#
        ))
        .bind(existing.id)
        .bind(&link.page_id)
        .bind(&link.calendar_event_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to complete event link", e))?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit event link", e))?;

        Ok(LinkOutcome {
            link: filled.as_ref().map(link_from_row).unwrap_or(existing),
            created: false,
        })
    }

    async fn attach_page(&self, link_id: Uuid, page_id: &str) -> Result<EventLink, StoreError> {
        let row = sqlx::query(&format!(
            "UPDATE event_links SET page_id = $2, updated_at = NOW() WHERE id = $1 RETURNING {LINK_COLUMNS}"
        ))
        .bind(link_id)
        .bind(page_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to attach page", e))?
        .ok_or_else(|| StoreError::not_found("event_link", link_id))?;

        Ok(link_from_row(&row))
    }

    async fn attach_event(&self, link_id: Uuid, event_id: &str) -> Result<EventLink, StoreError> {
        let row = sqlx::query(&format!(
            "UPDATE event_links SET calendar_event_id = $2, updated_at = NOW() WHERE id = $1 RETURNING {LINK_COLUMNS}"
        ))
        .bind(link_id)
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to attach event", e))?
        .ok_or_else(|| StoreError::not_found("event_link", link_id))?;

        Ok(link_from_row(&row))
    }

    async fn touch_link(&self, link_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE event_links SET updated_at = NOW() WHERE id = $1")
            .bind(link_id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to touch event link", e))?;
        Ok(())
    }

    async fn mark_for_removal(&self, link_id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE event_links SET will_remove = TRUE, updated_at = NOW() WHERE id = $1",
        )
        .bind(link_id)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to mark event link for removal", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("event_link", link_id));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn linked_pages(&self, tenant_id: Uuid) -> Result<Vec<EventLink>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, calendar_event_id, page_id, calendar_id, tenant_id, will_remove,
                   created_at, updated_at
            FROM event_links
            WHERE tenant_id = $1 AND page_id IS NOT NULL AND NOT will_remove
            ORDER BY created_at
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list linked pages", e))?;

        Ok(rows.iter().map(link_from_row).collect())
    }

    async fn pending_removals(&self, tenant_id: Uuid) -> Result<Vec<PendingRemoval>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT l.id, l.calendar_event_id, l.page_id, l.calendar_id, l.tenant_id, l.will_remove,
                   l.created_at, l.updated_at,
                   c.id AS c_id, c.tenant_id AS c_tenant_id, c.provider_calendar_id, c.access_role,
                   c.property_binding, c.status, c.is_primary,
                   c.created_at AS c_created_at, c.updated_at AS c_updated_at
            FROM event_links l
            JOIN calendars c ON c.id = l.calendar_id
            WHERE l.tenant_id = $1 AND l.will_remove
            ORDER BY l.created_at
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list pending removals", e))?;

        Ok(rows
            .iter()
            .map(|row| {
                let status: String = row.get("status");
                PendingRemoval {
                    link: link_from_row(row),
                    calendar: Calendar {
                        id: row.get("c_id"),
                        tenant_id: row.get("c_tenant_id"),
                        provider_calendar_id: row.get("provider_calendar_id"),
                        access_role: row.get("access_role"),
                        property_binding: row.get("property_binding"),
                        status: CalendarStatus::from(status.as_str()),
                        primary: row.get("is_primary"),
                        created_at: row.get("c_created_at"),
                        updated_at: row.get("c_updated_at"),
                    },
                }
            })
            .collect())
    }

    async fn delete_link(&self, link_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM event_links WHERE id = $1")
            .bind(link_id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to delete event link", e))?;
        Ok(())
    }

    // =========================================================================
    // Sync logs
    // =========================================================================

    async fn append_log(&self, record: &LogRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sync_logs (id, code, source_system, description, detail, stack, level,
                                   remediation, archive, finish_work, tenant_id, instance_prefix,
                                   created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(record.id)
        .bind(&record.code)
        .bind(&record.source_system)
        .bind(&record.description)
        .bind(&record.detail)
        .bind(&record.stack)
        .bind(record.level.to_string())
        .bind(record.remediation.to_string())
        .bind(record.archive)
        .bind(record.finish_work)
        .bind(record.tenant_id)
        .bind(&record.instance_prefix)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to append sync log", e))?;

        Ok(())
    }

    async fn logs_for_day(
        &self,
        instance_prefix: &str,
        day: NaiveDate,
    ) -> Result<Vec<LogRecord>, StoreError> {
        let start = day.and_time(NaiveTime::MIN).and_utc();
        let end = start + chrono::Duration::days(1);

        let rows = sqlx::query(
            r#"
            SELECT id, code, source_system, description, detail, stack, level, remediation,
                   archive, finish_work, tenant_id, instance_prefix, created_at, updated_at
            FROM sync_logs
            WHERE instance_prefix = $1 AND created_at >= $2 AND created_at < $3
            ORDER BY created_at
            "#,
        )
        .bind(instance_prefix)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to read sync logs", e))?;

        Ok(rows.iter().map(log_from_row).collect())
    }
}
