//! civic-audience — operator CLI for mailing segments and map listings.
//!
//! Loads a record snapshot and the persisted segment definitions, then
//! answers audience and map queries on stdout as JSON.

use std::sync::Arc;

use anyhow::Context;
use audience_core::config::{AppConfig, BboxPolicy};
use audience_core::store::{InMemoryStore, RecordStore};
use audience_geo::parse_bbox;
use audience_map::{MapQuery, MapSearch};
use audience_segmentation::SegmentRegistry;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "civic-audience")]
#[command(about = "Mailing segment resolution and map search")]
#[command(version)]
struct Cli {
    /// TOML config file (environment variables still apply on top)
    #[arg(long, env = "CIVIC_AUDIENCE_CONFIG")]
    config: Option<String>,

    /// Record snapshot path (overrides config)
    #[arg(long, env = "CIVIC_AUDIENCE__STORE__SNAPSHOT_PATH")]
    snapshot: Option<String>,

    /// Segment definitions path (overrides config)
    #[arg(long, env = "CIVIC_AUDIENCE__SEGMENTS__DEFINITIONS_PATH")]
    segments: Option<String>,

    /// Invalid bbox handling for map listings (overrides config)
    #[arg(long, value_enum)]
    bbox_policy: Option<PolicyArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List segments with their estimated audience
    Segments,

    /// Count the subscribers of a segment
    Count {
        /// Segment id
        segment: Uuid,
    },

    /// Print one page of subscribers of a segment
    List {
        /// Segment id
        segment: Uuid,

        /// Start after this member id (last id of the previous page)
        #[arg(long)]
        after: Option<Uuid>,

        /// Page size
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },

    /// Validate a bounding box `[lon1, lat1, lon2, lat2]`
    Bbox {
        raw: String,
    },

    /// Map listings
    Map {
        #[command(subcommand)]
        target: MapTarget,
    },
}

#[derive(Subcommand, Debug)]
enum MapTarget {
    /// Published groups with their current event count
    Groups {
        #[arg(long)]
        bbox: Option<String>,

        /// Subtype label (repeatable)
        #[arg(long = "subtype")]
        subtypes: Vec<String>,
    },

    /// Listed events
    Events {
        #[arg(long)]
        bbox: Option<String>,

        /// Subtype label (repeatable)
        #[arg(long = "subtype")]
        subtypes: Vec<String>,

        /// Include events that are not publicly listed
        #[arg(long, default_value_t = false)]
        include_hidden: bool,

        /// Include events that already ended
        #[arg(long, default_value_t = false)]
        include_past: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PolicyArg {
    Ignore,
    Reject,
}

impl From<PolicyArg> for BboxPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Ignore => BboxPolicy::Ignore,
            PolicyArg::Reject => BboxPolicy::Reject,
        }
    }
}

#[derive(Serialize)]
struct Subscriber<'a> {
    id: Uuid,
    email: Option<&'a str>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = AppConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {e}");
        AppConfig::default()
    });

    init_tracing(&config);

    // Apply CLI overrides
    if let Some(path) = cli.snapshot {
        config.store.snapshot_path = path;
    }
    if let Some(path) = cli.segments {
        config.segments.definitions_path = path;
    }
    if let Some(policy) = cli.bbox_policy {
        config.map.bbox_policy = policy.into();
    }

    info!(
        snapshot = %config.store.snapshot_path,
        segments = %config.segments.definitions_path,
        bbox_policy = ?config.map.bbox_policy,
        "Configuration loaded"
    );

    match cli.command {
        Commands::Bbox { raw } => cmd_bbox(&raw),
        Commands::Segments => {
            let registry = load_registry(&config, load_store(&config)?)?;
            print_json(&registry.summaries()?)
        }
        Commands::Count { segment } => {
            let registry = load_registry(&config, load_store(&config)?)?;
            let count = registry.estimate(&segment)?;
            print_json(&serde_json::json!({ "segment": segment, "subscribers": count }))
        }
        Commands::List {
            segment,
            after,
            limit,
        } => {
            let registry = load_registry(&config, load_store(&config)?)?;
            let definition = registry
                .get(&segment)
                .with_context(|| format!("unknown segment {segment}"))?;
            let page = registry.resolver().resolve_page(&definition, after, limit)?;
            let rows: Vec<Subscriber<'_>> = page
                .iter()
                .map(|m| Subscriber {
                    id: m.id,
                    email: m.primary_email().map(|e| e.address.as_str()),
                })
                .collect();
            print_json(&rows)
        }
        Commands::Map { target } => {
            let search = MapSearch::new(load_store(&config)?, config.map.clone());
            cmd_map(&search, target)
        }
    }
}

fn init_tracing(config: &AppConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.filter.clone().into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_store(config: &AppConfig) -> anyhow::Result<Arc<dyn RecordStore>> {
    let store = InMemoryStore::load(&config.store.snapshot_path)
        .with_context(|| format!("loading snapshot {}", config.store.snapshot_path))?;
    Ok(Arc::new(store))
}

fn load_registry(
    config: &AppConfig,
    store: Arc<dyn RecordStore>,
) -> anyhow::Result<SegmentRegistry> {
    let registry = SegmentRegistry::new(store);
    registry
        .load(&config.segments.definitions_path)
        .with_context(|| format!("loading segments {}", config.segments.definitions_path))?;
    Ok(registry)
}

fn cmd_bbox(raw: &str) -> anyhow::Result<()> {
    match parse_bbox(raw) {
        Some(bbox) => print_json(&bbox),
        None => {
            warn!(bbox = raw, "invalid bbox");
            print_json(&serde_json::Value::Null)
        }
    }
}

fn cmd_map(search: &MapSearch, target: MapTarget) -> anyhow::Result<()> {
    let now = Utc::now();
    info!(cache_control = %search.cache_control(), "map listing");
    match target {
        MapTarget::Groups { bbox, subtypes } => {
            let query = MapQuery {
                bbox,
                subtypes,
                ..Default::default()
            };
            print_json(&search.groups(&query, now)?)
        }
        MapTarget::Events {
            bbox,
            subtypes,
            include_hidden,
            include_past,
        } => {
            let query = MapQuery {
                bbox,
                subtypes,
                include_hidden,
                include_past,
            };
            print_json(&search.events(&query, now)?)
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
