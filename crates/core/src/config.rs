use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `CIVIC_AUDIENCE__` and an optional TOML config file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub segments: SegmentsConfig,
    #[serde(default)]
    pub map: MapConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// JSON snapshot of members, memberships, groups and events.
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SegmentsConfig {
    #[serde(default = "default_definitions_path")]
    pub definitions_path: String,
}

/// What map search does with a bbox parameter that is present but invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BboxPolicy {
    /// Serve an unfiltered result.
    Ignore,
    /// Fail with a validation error.
    Reject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MapConfig {
    #[serde(default = "default_bbox_policy")]
    pub bbox_policy: BboxPolicy,
    #[serde(default = "default_active_past_days")]
    pub active_past_days: i64,
    #[serde(default = "default_active_future_days")]
    pub active_future_days: i64,
    #[serde(default = "default_cache_max_age_secs")]
    pub cache_max_age_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default = "default_log_json")]
    pub json: bool,
}

// Default functions
fn default_snapshot_path() -> String {
    "data/snapshot.json".to_string()
}
fn default_definitions_path() -> String {
    "data/segments.json".to_string()
}
fn default_bbox_policy() -> BboxPolicy {
    BboxPolicy::Reject
}
fn default_active_past_days() -> i64 {
    62
}
fn default_active_future_days() -> i64 {
    31
}
fn default_cache_max_age_secs() -> u64 {
    300
}
fn default_log_filter() -> String {
    "civic_audience=info,audience_segmentation=info,audience_map=info".to_string()
}
fn default_log_json() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
        }
    }
}

impl Default for SegmentsConfig {
    fn default() -> Self {
        Self {
            definitions_path: default_definitions_path(),
        }
    }
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            bbox_policy: default_bbox_policy(),
            active_past_days: default_active_past_days(),
            active_future_days: default_active_future_days(),
            cache_max_age_secs: default_cache_max_age_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: default_log_json(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            segments: SegmentsConfig::default(),
            map: MapConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and an optional config file.
    pub fn load(file: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = file {
            builder = builder.add_source(
                config::File::with_name(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("CIVIC_AUDIENCE")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(","),
            )
            .build()?;
        config.try_deserialize()
    }
}
