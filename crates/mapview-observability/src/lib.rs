use std::net::SocketAddr;

use mapview_config::ViewerConfig;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

/// Graphics crates log per-frame detail at info; keep them quiet unless asked.
const GRAPHICS_DIRECTIVES: &[&str] = &["wgpu_core=warn", "wgpu_hal=warn", "naga=warn"];

#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub service_name: String,
    pub environment: String,
    pub log_level: String,
    pub metrics_addr: Option<String>,
}

impl From<&ViewerConfig> for ObservabilityConfig {
    fn from(config: &ViewerConfig) -> Self {
        Self {
            service_name: config.service_name.clone(),
            environment: config.environment.to_string(),
            log_level: config.log_level.clone(),
            metrics_addr: config.metrics_addr.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ObservabilityHandle {
    pub service_name: String,
    pub environment: String,
    pub metrics_listener: Option<SocketAddr>,
}

pub fn init(config: &ObservabilityConfig) -> ObservabilityHandle {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(build_filter(&config.log_level))
        .with_target(true)
        // Fetch workers log from their own threads.
        .with_thread_names(true)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let metrics_listener = init_metrics(config);
    if metrics_listener.is_some() {
        describe_metrics();
    }

    ObservabilityHandle {
        service_name: config.service_name.clone(),
        environment: config.environment.clone(),
        metrics_listener,
    }
}

pub fn log_startup(handle: &ObservabilityHandle) {
    tracing::info!(
        service = %handle.service_name,
        environment = %handle.environment,
        metrics = ?handle.metrics_listener,
        "mapview starting"
    );
}

fn build_filter(log_level: &str) -> EnvFilter {
    let mut directives = vec![log_level.trim().to_string()];
    // An explicit directive for a graphics crate in the level string wins.
    for directive in GRAPHICS_DIRECTIVES {
        let target = directive.split('=').next().unwrap_or_default();
        if !log_level.contains(target) {
            directives.push((*directive).to_string());
        }
    }
    EnvFilter::try_new(directives.join(",")).unwrap_or_else(|_| EnvFilter::new("info"))
}

fn parse_metrics_addr(raw: Option<&str>) -> Result<Option<SocketAddr>, String> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value
            .parse::<SocketAddr>()
            .map(Some)
            .map_err(|err| format!("{value}: {err}")),
    }
}

fn init_metrics(config: &ObservabilityConfig) -> Option<SocketAddr> {
    let addr = match parse_metrics_addr(config.metrics_addr.as_deref()) {
        Ok(addr) => addr?,
        Err(err) => {
            tracing::warn!(
                service = %config.service_name,
                error = %err,
                "Invalid MAPVIEW_METRICS_ADDR value"
            );
            return None;
        }
    };

    let installed = PrometheusBuilder::new()
        .with_http_listener(addr)
        .add_global_label("service", config.service_name.clone())
        .add_global_label("environment", config.environment.clone())
        .install();
    match installed {
        Ok(()) => Some(addr),
        Err(err) => {
            tracing::warn!(
                service = %config.service_name,
                error = %err,
                "Failed to initialize Prometheus exporter"
            );
            None
        }
    }
}

fn describe_metrics() {
    metrics::describe_counter!(
        "mapview_tile_requests_total",
        "Tile fetches issued by the scheduler"
    );
    metrics::describe_counter!(
        "mapview_tile_cancellations_total",
        "In-flight tile fetches cancelled by viewport movement or supersession"
    );
    metrics::describe_counter!(
        "mapview_tile_fetch_total",
        "Tile fetch completions by outcome"
    );
    metrics::describe_counter!(
        "mapview_tile_cache_evictions_total",
        "Cached tiles released to stay under the cache bound"
    );
    metrics::describe_gauge!("mapview_tile_cache_entries", "GPU-resident tiles");
    metrics::describe_gauge!("mapview_tiles_in_flight", "Tile fetches currently pending");
}
