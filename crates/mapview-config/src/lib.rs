use serde::{Deserialize, Serialize};
use std::{env, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Local,
    Dev,
    Prod,
}

impl Environment {
    pub fn from_env(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "dev" | "development" => Self::Dev,
            "prod" | "production" => Self::Prod,
            _ => Self::Local,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::Local => "local",
            Self::Dev => "dev",
            Self::Prod => "prod",
        };
        write!(f, "{}", value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub field: &'static str,
    pub message: String,
}

impl ConfigError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigError {}

/// World and level-of-detail parameters. Fixed for the lifetime of an engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub base_width: u32,
    pub base_height: u32,
    pub min_layer: u32,
    pub max_layer: u32,
    pub preview_layer: u32,
    /// Tile edge in pixels at full resolution; coarser layers scale it by their stride.
    pub target_tile_size: u32,
    pub min_view_width: u32,
    pub min_view_height: u32,
    /// Upper bound on GPU-resident tiles. Tiles in the active set are never evicted.
    pub max_cached_tiles: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_width: 21_600,
            base_height: 10_800,
            min_layer: 1,
            max_layer: 6,
            preview_layer: 1,
            target_tile_size: 1024,
            min_view_width: 80,
            min_view_height: 40,
            max_cached_tiles: 512,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let min_layer = env_var_u32("MAPVIEW_MIN_LAYER", defaults.min_layer);
        Self {
            base_width: env_var_u32("MAPVIEW_BASE_WIDTH", defaults.base_width),
            base_height: env_var_u32("MAPVIEW_BASE_HEIGHT", defaults.base_height),
            min_layer,
            max_layer: env_var_u32("MAPVIEW_MAX_LAYER", defaults.max_layer),
            // The preview follows the coarsest layer unless pinned explicitly.
            preview_layer: env_var_u32("MAPVIEW_PREVIEW_LAYER", min_layer),
            target_tile_size: env_var_u32("MAPVIEW_TILE_SIZE", defaults.target_tile_size),
            min_view_width: env_var_u32("MAPVIEW_MIN_VIEW_WIDTH", defaults.min_view_width),
            min_view_height: env_var_u32("MAPVIEW_MIN_VIEW_HEIGHT", defaults.min_view_height),
            max_cached_tiles: env_var_usize("MAPVIEW_MAX_CACHED_TILES", defaults.max_cached_tiles),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_width == 0 || self.base_height == 0 {
            return Err(ConfigError::new(
                "base size",
                format!("{}x{} has no area", self.base_width, self.base_height),
            ));
        }
        if self.min_layer == 0 {
            return Err(ConfigError::new("min_layer", "layers start at 1"));
        }
        if self.min_layer > self.max_layer {
            return Err(ConfigError::new(
                "min_layer",
                format!("{} exceeds max_layer {}", self.min_layer, self.max_layer),
            ));
        }
        if !(self.min_layer..=self.max_layer).contains(&self.preview_layer) {
            return Err(ConfigError::new(
                "preview_layer",
                format!(
                    "{} outside [{}, {}]",
                    self.preview_layer, self.min_layer, self.max_layer
                ),
            ));
        }
        if self.target_tile_size == 0 {
            return Err(ConfigError::new("target_tile_size", "must be positive"));
        }
        if self.min_view_width == 0 || self.min_view_width > self.base_width {
            return Err(ConfigError::new(
                "min_view_width",
                format!("{} outside (0, {}]", self.min_view_width, self.base_width),
            ));
        }
        if self.min_view_height == 0 || self.min_view_height > self.base_height {
            return Err(ConfigError::new(
                "min_view_height",
                format!("{} outside (0, {}]", self.min_view_height, self.base_height),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewerConfig {
    pub service_name: String,
    pub environment: Environment,
    pub log_level: String,
    pub metrics_addr: Option<String>,
    pub tile_base_url: String,
    pub fetch_workers: usize,
    pub request_timeout_secs: u64,
    pub engine: EngineConfig,
}

impl ViewerConfig {
    pub fn from_env(default_service_name: &str) -> Self {
        let service_name = env_var("MAPVIEW_SERVICE_NAME", default_service_name.to_string());
        let environment = Environment::from_env(&env_var("MAPVIEW_ENV", "local".to_string()));
        let log_level = env_var("MAPVIEW_LOG_LEVEL", "info".to_string());
        let metrics_addr = env::var("MAPVIEW_METRICS_ADDR").ok();
        let tile_base_url = env_var("MAPVIEW_TILE_BASE", "http://127.0.0.1:8000".to_string())
            .trim_end_matches('/')
            .to_string();
        let fetch_workers = env_var_usize("MAPVIEW_FETCH_WORKERS", 6).max(1);
        let request_timeout_secs = env_var_u64("MAPVIEW_REQUEST_TIMEOUT_SECS", 30);

        Self {
            service_name,
            environment,
            log_level,
            metrics_addr,
            tile_base_url,
            fetch_workers,
            request_timeout_secs,
            engine: EngineConfig::from_env(),
        }
    }
}

fn env_var(key: &str, default: String) -> String {
    env::var(key).unwrap_or(default)
}

fn env_var_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_var_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_var_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}
