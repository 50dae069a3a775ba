use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use paddock_sync::adapter::{HttpAdapter, PersistenceAdapter, SqliteAdapter};
use paddock_sync::cache::FileCache;
use paddock_sync::config::{self, Backend, Config};
use paddock_sync::generator::{self, paddock_days};
use paddock_sync::geometry::transform::translate;
use paddock_sync::model::{PaddockPatch, PaddockStatus};
use paddock_sync::store::{EditKind, GeometryStore};
use paddock_sync::sync::{self, SharedStore, SyncPipeline};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print paddocks and their sections
    List,
    /// Generate one section per day for a paddock stay
    Plan {
        paddock_id: String,
        /// Length of the stay; defaults to area / daily consumption
        #[arg(long)]
        days: Option<u32>,
        /// First grazing date (YYYY-MM-DD); defaults to today
        #[arg(long)]
        start: Option<NaiveDate>,
        /// Store the generated sections and sync them
        #[arg(long)]
        apply: bool,
    },
    /// Print alternative sections for one day of a stay
    Alternatives {
        paddock_id: String,
        /// One-based day of the stay
        #[arg(long)]
        day: u32,
        #[arg(long)]
        days: u32,
        #[arg(long, default_value_t = 2)]
        count: usize,
    },
    /// Shift a paddock (and its sections) by a lng/lat offset in degrees
    Move {
        paddock_id: String,
        #[arg(long, allow_negative_numbers = true)]
        d_lng: f64,
        #[arg(long, allow_negative_numbers = true)]
        d_lat: f64,
    },
    /// Change a paddock's grazing status and push it to the backend
    Status {
        paddock_id: String,
        status: String,
        #[arg(long)]
        rest_days: Option<u32>,
    },
    /// Send the full local state to the backend
    Flush,
    /// Drop local edits and return to the initial farm
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let cache = FileCache::in_dir(cfg.data_dir());
    info!(cache = %cache.path().display(), "opening geometry store");
    let store = sync::shared(GeometryStore::open(None, Box::new(cache)));

    match args.command {
        Command::List => list(&store),
        Command::Plan {
            paddock_id,
            days,
            start,
            apply,
        } => {
            plan(&cfg, &store, &paddock_id, days, start, apply)?;
            if apply {
                flush(&cfg, &store).await?;
            }
            Ok(())
        }
        Command::Alternatives {
            paddock_id,
            day,
            days,
            count,
        } => alternatives(&store, &paddock_id, day, days, count),
        Command::Move {
            paddock_id,
            d_lng,
            d_lat,
        } => {
            {
                let mut guard = sync::lock(&store);
                let current = guard
                    .paddock(&paddock_id)
                    .with_context(|| format!("unknown paddock {paddock_id}"))?
                    .geometry
                    .clone();
                let edit = guard.update_paddock_with(
                    &paddock_id,
                    translate(&current, d_lng, d_lat),
                    EditKind::Move,
                )?;
                println!(
                    "moved {paddock_id}: {} section(s) followed",
                    edit.updated_sections.len()
                );
            }
            flush(&cfg, &store).await
        }
        Command::Status {
            paddock_id,
            status,
            rest_days,
        } => {
            let Some(status) = PaddockStatus::parse_status(&status) else {
                bail!("unknown status {status:?}; expected ready, almost_ready, recovering or grazed");
            };
            let patch = PaddockPatch {
                status: Some(status),
                rest_days,
                ..Default::default()
            };
            sync::lock(&store).update_paddock_metadata(&paddock_id, &patch)?;
            let pipeline = pipeline(&cfg).await?;
            pipeline
                .push_metadata(&paddock_id, &patch)
                .await
                .context("metadata saved locally but not pushed")?;
            println!("{paddock_id}: {}", status.as_str());
            Ok(())
        }
        Command::Flush => {
            let queued = sync::lock(&store).enqueue_resync();
            info!(queued, "queued full resync");
            flush(&cfg, &store).await
        }
        Command::Reset => {
            sync::lock(&store).reset_to_initial();
            println!("geometry reset to initial data");
            Ok(())
        }
    }
}

async fn pipeline(cfg: &Config) -> Result<SyncPipeline> {
    let adapter: Arc<dyn PersistenceAdapter> = match cfg.sync.backend {
        Backend::Sqlite => {
            let url = cfg
                .sync
                .database_url
                .as_deref()
                .context("sync.database_url is required for the sqlite backend")?;
            Arc::new(SqliteAdapter::connect(url).await?)
        }
        Backend::Http => {
            let base_url = cfg
                .sync
                .base_url
                .as_deref()
                .context("sync.base_url is required for the http backend")?;
            let token = cfg.sync.token.clone().unwrap_or_default();
            Arc::new(HttpAdapter::new(base_url, token)?)
        }
    };
    Ok(SyncPipeline::new(adapter, cfg.app.farm_id.clone()).with_timeout(cfg.sync_timeout()))
}

async fn flush(cfg: &Config, store: &SharedStore) -> Result<()> {
    let pipeline = pipeline(cfg).await?;
    match pipeline.flush(store).await {
        Ok(report) => {
            println!("synced {} change(s) for {}", report.sent, pipeline.farm_id());
            Ok(())
        }
        Err(err) => {
            warn!(%err, "flush failed");
            Err(err).context("changes are saved locally; run `flush` to resend them")
        }
    }
}

fn list(store: &SharedStore) -> Result<()> {
    let guard = sync::lock(store);
    for paddock in guard.paddocks() {
        println!(
            "{:<12} {:<18} {:>7.2} ha  {:<10} ndvi {:.2}  rest {}d",
            paddock.id,
            paddock.name,
            paddock.area,
            paddock.status.as_str(),
            paddock.ndvi,
            paddock.rest_days
        );
        for section in guard.sections_for(&paddock.id) {
            println!(
                "  {:<40} {}  {:>6.2} ha",
                section.id, section.date, section.target_area
            );
        }
    }
    Ok(())
}

fn plan(
    cfg: &Config,
    store: &SharedStore,
    paddock_id: &str,
    days: Option<u32>,
    start: Option<NaiveDate>,
    apply: bool,
) -> Result<()> {
    let mut guard = sync::lock(store);
    let paddock = guard
        .paddock(paddock_id)
        .with_context(|| format!("unknown paddock {paddock_id}"))?
        .clone();
    let days = days.unwrap_or_else(|| paddock_days(paddock.area, cfg.generator.daily_consumption_ha));
    if days == 0 {
        bail!("--days must be at least 1");
    }
    let start = start.unwrap_or_else(|| Utc::now().date_naive());

    for section in generator::generate_stay(&paddock, days, start) {
        println!(
            "day {:>2}  {}  {:>6.2} ha  confidence {}%",
            section.day_index + 1,
            section.date.unwrap_or(start),
            section.area,
            section.confidence
        );
        for line in &section.justification {
            println!("         {line}");
        }
        if apply {
            let (geometry, draft) = section.into_draft();
            guard.add_section(paddock_id, geometry, draft)?;
        }
    }
    Ok(())
}

fn alternatives(store: &SharedStore, paddock_id: &str, day: u32, days: u32, count: usize) -> Result<()> {
    if day == 0 || day > days {
        bail!("--day must be between 1 and --days");
    }
    let guard = sync::lock(store);
    let paddock = guard
        .paddock(paddock_id)
        .with_context(|| format!("unknown paddock {paddock_id}"))?;
    for alt in generator::generate_alternatives(paddock, day - 1, days, count) {
        println!(
            "{:<32} {:>6.2} ha  confidence {}%  {}",
            alt.id, alt.area, alt.confidence, alt.reasoning
        );
    }
    Ok(())
}
