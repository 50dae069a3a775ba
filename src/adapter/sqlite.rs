use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::SecondsFormat;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, info, instrument, warn};

use super::PersistenceAdapter;
use crate::geometry::{area_hectares, Polygon};
use crate::model::{ChangeKind, ChangeRecord, EntityKind, PaddockPatch};

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized)
        .await
        .with_context(|| format!("failed to open {normalized}"))?;
    sqlx::query("PRAGMA journal_mode=WAL;").execute(&pool).await?;
    sqlx::query("PRAGMA synchronous=FULL;").execute(&pool).await?;
    Ok(pool)
}

/// Expand a leading `~/` in file-backed SQLite URLs and create the parent
/// directory. Adds `mode=rwc` so a missing database file is created.
/// In-memory and non-SQLite URLs pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    let expanded = match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path.to_string(),
    };
    if let Some(parent) = std::path::Path::new(&expanded).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                warn!(%err, dir = %parent.display(), "failed to create database directory");
            }
        }
    }

    let query = match query {
        Some(q) if q.contains("mode=") => q.to_string(),
        Some(q) => format!("{q}&mode=rwc"),
        None => "mode=rwc".to_string(),
    };
    format!("sqlite://{expanded}?{query}")
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// A paddock row as stored by [`SqliteAdapter`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPaddock {
    pub id: String,
    pub geometry: Polygon,
    pub name: Option<String>,
    pub status: Option<String>,
    pub area: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredSection {
    pub id: String,
    pub paddock_id: String,
    pub geometry: Polygon,
}

/// SQLite-backed persistence. A batch runs inside one transaction; records
/// already present in `applied_changes` are skipped, so replays are no-ops.
#[derive(Debug, Clone)]
pub struct SqliteAdapter {
    pool: Pool,
}

impl SqliteAdapter {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database and apply migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = init_pool(database_url).await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub async fn paddocks(&self, farm_id: &str) -> Result<Vec<StoredPaddock>> {
        let rows = sqlx::query(
            "SELECT id, geometry, name, status, area FROM paddocks WHERE farm_id = ? ORDER BY id",
        )
        .bind(farm_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                Ok(StoredPaddock {
                    id: row.get("id"),
                    geometry: decode_geometry(row.get::<String, _>("geometry").as_str())?,
                    name: row.get("name"),
                    status: row.get("status"),
                    area: row.get("area"),
                })
            })
            .collect()
    }

    pub async fn sections(&self, farm_id: &str) -> Result<Vec<StoredSection>> {
        let rows = sqlx::query(
            "SELECT id, paddock_id, geometry FROM sections WHERE farm_id = ? ORDER BY id",
        )
        .bind(farm_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                Ok(StoredSection {
                    id: row.get("id"),
                    paddock_id: row.get("paddock_id"),
                    geometry: decode_geometry(row.get::<String, _>("geometry").as_str())?,
                })
            })
            .collect()
    }

    pub async fn applied_count(&self, farm_id: &str) -> Result<i64> {
        let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM applied_changes WHERE farm_id = ?")
            .bind(farm_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}

fn decode_geometry(raw: &str) -> Result<Polygon> {
    serde_json::from_str(raw).context("stored geometry is not a valid polygon feature")
}

fn encode_geometry(record: &ChangeRecord) -> Result<Option<String>> {
    record
        .geometry
        .as_ref()
        .map(|g| serde_json::to_string(g).context("failed to encode geometry"))
        .transpose()
}

fn recorded_at(record: &ChangeRecord) -> String {
    record.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

async fn already_applied(
    tx: &mut Transaction<'_, Sqlite>,
    farm_id: &str,
    record: &ChangeRecord,
) -> Result<bool> {
    let found = sqlx::query_scalar::<_, i64>(
        "SELECT 1 FROM applied_changes \
         WHERE farm_id = ? AND entity_id = ? AND change_type = ? AND recorded_at = ? AND seq = ?",
    )
    .bind(farm_id)
    .bind(&record.id)
    .bind(record.change_type.as_str())
    .bind(recorded_at(record))
    .bind(seq_param(record)?)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(found.is_some())
}

fn seq_param(record: &ChangeRecord) -> Result<i64> {
    i64::try_from(record.seq).map_err(|_| anyhow!("change seq {} out of range", record.seq))
}

async fn upsert_paddock(
    tx: &mut Transaction<'_, Sqlite>,
    farm_id: &str,
    record: &ChangeRecord,
    geometry: &str,
) -> Result<()> {
    let computed_area = record.geometry.as_ref().map(area_hectares);
    let meta = record.metadata.clone().unwrap_or_default();
    // Absent metadata keeps existing column values.
    sqlx::query(
        "INSERT INTO paddocks (farm_id, id, geometry, name, status, ndvi, rest_days, area, water_access, last_grazed) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(farm_id, id) DO UPDATE SET \
           geometry = excluded.geometry, \
           name = COALESCE(excluded.name, paddocks.name), \
           status = COALESCE(excluded.status, paddocks.status), \
           ndvi = COALESCE(excluded.ndvi, paddocks.ndvi), \
           rest_days = COALESCE(excluded.rest_days, paddocks.rest_days), \
           area = COALESCE(excluded.area, paddocks.area), \
           water_access = COALESCE(excluded.water_access, paddocks.water_access), \
           last_grazed = COALESCE(excluded.last_grazed, paddocks.last_grazed), \
           updated_at = CURRENT_TIMESTAMP",
    )
    .bind(farm_id)
    .bind(&record.id)
    .bind(geometry)
    .bind(meta.name)
    .bind(meta.status.map(|s| s.as_str()))
    .bind(meta.ndvi)
    .bind(meta.rest_days.map(i64::from))
    .bind(meta.area.or(computed_area))
    .bind(meta.water_access)
    .bind(meta.last_grazed)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn upsert_section(
    tx: &mut Transaction<'_, Sqlite>,
    farm_id: &str,
    record: &ChangeRecord,
    geometry: &str,
) -> Result<()> {
    let Some(parent) = record.parent_id.as_deref() else {
        return Err(anyhow!("section {} change carries no parent id", record.id));
    };
    sqlx::query(
        "INSERT INTO sections (farm_id, id, paddock_id, geometry) VALUES (?, ?, ?, ?) \
         ON CONFLICT(farm_id, id) DO UPDATE SET \
           paddock_id = excluded.paddock_id, \
           geometry = excluded.geometry, \
           updated_at = CURRENT_TIMESTAMP",
    )
    .bind(farm_id)
    .bind(&record.id)
    .bind(parent)
    .bind(geometry)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn apply_one(tx: &mut Transaction<'_, Sqlite>, farm_id: &str, record: &ChangeRecord) -> Result<()> {
    match record.change_type {
        ChangeKind::Add | ChangeKind::Update => {
            let Some(geometry) = encode_geometry(record)? else {
                warn!(
                    id = %record.id,
                    change = record.change_type.as_str(),
                    "change carries no geometry; skipping"
                );
                return Ok(());
            };
            match record.entity_type {
                EntityKind::Paddock => upsert_paddock(tx, farm_id, record, &geometry).await?,
                EntityKind::Section => upsert_section(tx, farm_id, record, &geometry).await?,
            }
        }
        ChangeKind::Delete => match record.entity_type {
            EntityKind::Paddock => {
                sqlx::query("DELETE FROM sections WHERE farm_id = ? AND paddock_id = ?")
                    .bind(farm_id)
                    .bind(&record.id)
                    .execute(&mut **tx)
                    .await?;
                sqlx::query("DELETE FROM paddocks WHERE farm_id = ? AND id = ?")
                    .bind(farm_id)
                    .bind(&record.id)
                    .execute(&mut **tx)
                    .await?;
            }
            EntityKind::Section => {
                sqlx::query("DELETE FROM sections WHERE farm_id = ? AND id = ?")
                    .bind(farm_id)
                    .bind(&record.id)
                    .execute(&mut **tx)
                    .await?;
            }
        },
    }

    sqlx::query(
        "INSERT INTO applied_changes (farm_id, entity_id, entity_type, change_type, recorded_at, seq) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(farm_id)
    .bind(&record.id)
    .bind(record.entity_type.as_str())
    .bind(record.change_type.as_str())
    .bind(recorded_at(record))
    .bind(seq_param(record)?)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl PersistenceAdapter for SqliteAdapter {
    #[instrument(skip_all, fields(farm_id = %farm_id, changes = changes.len()))]
    async fn apply_changes(&self, farm_id: &str, changes: &[ChangeRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let mut applied = 0usize;
        for record in changes {
            if already_applied(&mut tx, farm_id, record).await? {
                debug!(id = %record.id, seq = record.seq, "change already applied; skipping");
                continue;
            }
            apply_one(&mut tx, farm_id, record)
                .await
                .with_context(|| format!("failed to apply change {} to {}", record.seq, record.id))?;
            applied += 1;
        }
        tx.commit().await?;
        info!(applied, skipped = changes.len() - applied, "change batch committed");
        Ok(())
    }

    #[instrument(skip_all, fields(farm_id = %farm_id, paddock_id = %paddock_id))]
    async fn update_metadata(
        &self,
        farm_id: &str,
        paddock_id: &str,
        fields: &PaddockPatch,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE paddocks SET \
               name = COALESCE(?, name), \
               status = COALESCE(?, status), \
               ndvi = COALESCE(?, ndvi), \
               rest_days = COALESCE(?, rest_days), \
               area = COALESCE(?, area), \
               water_access = COALESCE(?, water_access), \
               last_grazed = COALESCE(?, last_grazed), \
               updated_at = CURRENT_TIMESTAMP \
             WHERE farm_id = ? AND id = ?",
        )
        .bind(fields.name.as_deref())
        .bind(fields.status.map(|s| s.as_str()))
        .bind(fields.ndvi)
        .bind(fields.rest_days.map(i64::from))
        .bind(fields.area)
        .bind(fields.water_access.as_deref())
        .bind(fields.last_grazed.as_deref())
        .bind(farm_id)
        .bind(paddock_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(anyhow!("paddock {} not found for farm {}", paddock_id, farm_id));
        }
        Ok(())
    }
}
