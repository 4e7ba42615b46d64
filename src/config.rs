use clap::{Args, Parser, ValueEnum};

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Database connection URL
    #[arg(long, env = "CONFAB_DATABASE_URL")]
    pub database_url: String,

    #[command(flatten)]
    pub server: ServerConfig,

    #[command(flatten)]
    pub auth: AuthConfig,

    #[command(flatten)]
    pub rate_limit: RateLimitConfig,

    #[command(flatten)]
    pub messaging: MessagingConfig,

    #[command(flatten)]
    pub presence: PresenceConfig,

    #[command(flatten)]
    pub typing: TypingConfig,

    #[command(flatten)]
    pub fanout: FanoutConfig,

    #[command(flatten)]
    pub storage: StorageConfig,

    #[command(flatten)]
    pub health: HealthConfig,

    #[command(flatten)]
    pub telemetry: TelemetryConfig,
}

#[derive(Clone, Debug, Args)]
pub struct ServerConfig {
    /// Host to listen on
    #[arg(long, env = "CONFAB_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "CONFAB_PORT", default_value_t = 3000)]
    pub port: u16,

    /// Port for the management server (health probes)
    #[arg(long, env = "CONFAB_MGMT_PORT", default_value_t = 3001)]
    pub mgmt_port: u16,

    /// How long to wait for background tasks to drain on shutdown
    #[arg(long, env = "CONFAB_SHUTDOWN_TIMEOUT_SECS", default_value_t = 10)]
    pub shutdown_timeout_secs: u64,
}

#[derive(Clone, Debug, Args)]
pub struct AuthConfig {
    /// Secret used to verify identity assertions issued by the auth provider
    #[arg(long, env = "CONFAB_JWT_SECRET")]
    pub jwt_secret: String,
}

#[derive(Clone, Debug, Args)]
pub struct RateLimitConfig {
    /// Requests per second allowed per client
    #[arg(long, env = "CONFAB_RATE_LIMIT_PER_SECOND", default_value_t = 25)]
    pub per_second: u32,

    /// Burst allowance per client
    #[arg(long, env = "CONFAB_RATE_LIMIT_BURST", default_value_t = 50)]
    pub burst: u32,
}

#[derive(Clone, Debug, Args)]
pub struct MessagingConfig {
    /// Default page size for message listing
    #[arg(long, env = "CONFAB_PAGE_SIZE_DEFAULT", default_value_t = 50)]
    pub page_size_default: i64,

    /// Maximum page size a client may request
    #[arg(long, env = "CONFAB_PAGE_SIZE_MAX", default_value_t = 100)]
    pub page_size_max: i64,

    /// Maximum message content length in characters
    #[arg(long, env = "CONFAB_MAX_CONTENT_LEN", default_value_t = 4096)]
    pub max_content_len: usize,

    /// Maximum number of search results returned
    #[arg(long, env = "CONFAB_SEARCH_LIMIT", default_value_t = 50)]
    pub search_limit: i64,

    /// Attempts to resolve a direct-conversation creation race
    #[arg(long, env = "CONFAB_DIRECT_RETRY_ATTEMPTS", default_value_t = 3)]
    pub direct_retry_attempts: usize,

    /// Minimum backoff between direct-conversation retries
    #[arg(long, env = "CONFAB_DIRECT_RETRY_MIN_DELAY_MS", default_value_t = 25)]
    pub direct_retry_min_delay_ms: u64,

    /// Attempts for transient store errors before surfacing unavailability
    #[arg(long, env = "CONFAB_STORE_RETRY_ATTEMPTS", default_value_t = 3)]
    pub store_retry_attempts: usize,

    /// Minimum backoff between transient store retries
    #[arg(long, env = "CONFAB_STORE_RETRY_MIN_DELAY_MS", default_value_t = 50)]
    pub store_retry_min_delay_ms: u64,
}

#[derive(Clone, Debug, Args)]
pub struct PresenceConfig {
    /// Silence window after which an online user decays to away
    #[arg(long, env = "CONFAB_PRESENCE_AWAY_AFTER_MS", default_value_t = 30_000)]
    pub away_after_ms: u64,

    /// Silence window after which an away user decays to offline
    #[arg(long, env = "CONFAB_PRESENCE_OFFLINE_AFTER_MS", default_value_t = 300_000)]
    pub offline_after_ms: u64,

    /// How often the presence sweeper checks for decayed entries
    #[arg(long, env = "CONFAB_PRESENCE_SWEEP_INTERVAL_MS", default_value_t = 1_000)]
    pub sweep_interval_ms: u64,
}

#[derive(Clone, Debug, Args)]
pub struct TypingConfig {
    /// How long a typing entry lives without a refresh
    #[arg(long, env = "CONFAB_TYPING_TTL_MS", default_value_t = 3_000)]
    pub ttl_ms: u64,

    /// How often the typing sweeper expires stale entries
    #[arg(long, env = "CONFAB_TYPING_SWEEP_INTERVAL_MS", default_value_t = 500)]
    pub sweep_interval_ms: u64,
}

#[derive(Clone, Debug, Args)]
pub struct FanoutConfig {
    /// Capacity of each channel's event buffer
    #[arg(long, env = "CONFAB_FANOUT_CHANNEL_CAPACITY", default_value_t = 64)]
    pub channel_capacity: usize,

    /// How often to reclaim channels with no subscribers
    #[arg(long, env = "CONFAB_FANOUT_GC_INTERVAL_SECS", default_value_t = 60)]
    pub gc_interval_secs: u64,
}

#[derive(Clone, Debug, Args)]
pub struct StorageConfig {
    /// S3 bucket name for attachment bytes
    #[arg(long, env = "CONFAB_S3_BUCKET", default_value = "confab-attachments")]
    pub bucket: String,

    /// S3 region
    #[arg(long, env = "CONFAB_S3_REGION", default_value = "us-east-1")]
    pub region: String,

    /// Custom S3 endpoint (useful for MinIO)
    #[arg(long, env = "CONFAB_S3_ENDPOINT")]
    pub endpoint: Option<String>,

    /// S3 access key
    #[arg(long, env = "CONFAB_S3_ACCESS_KEY")]
    pub access_key: Option<String>,

    /// S3 secret key
    #[arg(long, env = "CONFAB_S3_SECRET_KEY")]
    pub secret_key: Option<String>,

    /// Force path style (required for many MinIO setups: http://host/bucket/key)
    #[arg(long, env = "CONFAB_S3_FORCE_PATH_STYLE", default_value_t = false)]
    pub force_path_style: bool,

    /// Max attachment size in bytes (Default: 50MB)
    #[arg(long, env = "CONFAB_S3_MAX_SIZE_BYTES", default_value_t = 52_428_800)]
    pub attachment_max_size_bytes: usize,

    /// Minimum progress change (in percent) between progress reports
    #[arg(long, env = "CONFAB_UPLOAD_PROGRESS_STEP_PCT", default_value_t = 5)]
    pub progress_step_pct: u8,
}

#[derive(Clone, Debug, Args)]
pub struct HealthConfig {
    /// Timeout for the database readiness check
    #[arg(long, env = "CONFAB_HEALTH_DB_TIMEOUT_MS", default_value_t = 500)]
    pub db_timeout_ms: u64,

    /// Timeout for the object-storage readiness check
    #[arg(long, env = "CONFAB_HEALTH_STORAGE_TIMEOUT_MS", default_value_t = 500)]
    pub storage_timeout_ms: u64,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Debug, Args)]
pub struct TelemetryConfig {
    /// OTLP endpoint for traces and metrics; telemetry export is disabled when unset
    #[arg(long, env = "CONFAB_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    /// Log output format
    #[arg(long, env = "CONFAB_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Config {
    #[must_use]
    pub fn load() -> Self {
        Self::parse()
    }
}
