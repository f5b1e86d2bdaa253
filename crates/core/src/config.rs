use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `LIFECYCLE__`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub flows: FlowEngineConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub hygiene: HygieneConfig,
}

// ─── Flow Engine Config ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct FlowEngineConfig {
    /// Maximum number of due runs processed per tick.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
    /// Recommendations further out than this are queued instead of sent.
    #[serde(default = "default_schedule_threshold_secs")]
    pub schedule_threshold_secs: i64,
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
}

fn default_batch_limit() -> usize {
    20
}

fn default_schedule_threshold_secs() -> i64 {
    300
}

fn default_tick_interval_secs() -> u64 {
    60
}

impl Default for FlowEngineConfig {
    fn default() -> Self {
        Self {
            batch_limit: default_batch_limit(),
            schedule_threshold_secs: default_schedule_threshold_secs(),
            tick_interval_secs: default_tick_interval_secs(),
        }
    }
}

// ─── Optimizer Config ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default = "default_smoothing_alpha")]
    pub smoothing_alpha: f64,
    /// Prior click rate used when a histogram has no sends at all.
    #[serde(default = "default_prior")]
    pub default_prior: f64,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: i64,
    #[serde(default = "default_cooldown_hours")]
    pub cooldown_hours: i64,
}

fn default_smoothing_alpha() -> f64 {
    5.0
}

fn default_prior() -> f64 {
    0.05
}

fn default_cache_ttl_secs() -> i64 {
    60
}

fn default_cooldown_hours() -> i64 {
    24
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            smoothing_alpha: default_smoothing_alpha(),
            default_prior: default_prior(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cooldown_hours: default_cooldown_hours(),
        }
    }
}

// ─── Hygiene Config ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct HygieneConfig {
    #[serde(default = "default_suppress_high_risk")]
    pub suppress_high_risk: bool,
    #[serde(default)]
    pub sweep_limit: Option<usize>,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_suppress_high_risk() -> bool {
    true
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

impl Default for HygieneConfig {
    fn default() -> Self {
        Self {
            suppress_high_risk: default_suppress_high_risk(),
            sweep_limit: None,
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("LIFECYCLE")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
