//! Core configuration.
//!
//! Loaded once at process start (environment variables with the
//! `SKILLVAULT_` prefix). The KEK is parsed into an immutable binding at
//! startup; there is no other process-wide mutable state.

use skillvault_crypto::Kek;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_RATE_LIMIT_WINDOW_MS: i64 = 600_000;
pub const DEFAULT_RATE_LIMIT_COUNT: u64 = 20;
pub const DEFAULT_PLAINTEXT_MAX_BYTES: usize = 100_000;
pub const DEFAULT_EXTERNAL_TIMEOUT_MS: u64 = 30_000;

/// Where IP anchors look for a public witness.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum WitnessBackendKind {
    Github,
    #[default]
    None,
}

impl FromStr for WitnessBackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, ConfigError> {
        match s {
            "github" => Ok(Self::Github),
            "none" => Ok(Self::None),
            other => Err(ConfigError::Invalid(format!(
                "unknown witness backend: {}",
                other
            ))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CoreConfig {
    /// 64-hex process KEK. Mandatory; absence is a startup fault.
    pub kek_hex: Option<String>,
    /// Platform language-model key. Presence enables hybrid polishing.
    pub anthropic_key: Option<String>,
    pub rate_limit_window_ms: i64,
    pub rate_limit_count: u64,
    pub plaintext_max_bytes: usize,
    pub external_call_timeout_ms: u64,
    pub witness_backend: WitnessBackendKind,
    /// Mandatory iff `witness_backend` is `None`.
    pub ip_anchor_hmac_secret: Option<String>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            kek_hex: None,
            anthropic_key: None,
            rate_limit_window_ms: DEFAULT_RATE_LIMIT_WINDOW_MS,
            rate_limit_count: DEFAULT_RATE_LIMIT_COUNT,
            plaintext_max_bytes: DEFAULT_PLAINTEXT_MAX_BYTES,
            external_call_timeout_ms: DEFAULT_EXTERNAL_TIMEOUT_MS,
            witness_backend: WitnessBackendKind::None,
            ip_anchor_hmac_secret: None,
        }
    }
}

impl CoreConfig {
    /// Read `SKILLVAULT_*` environment variables over the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        config.kek_hex = read_env("SKILLVAULT_KEK");
        config.anthropic_key = read_env("SKILLVAULT_ANTHROPIC_KEY");
        config.ip_anchor_hmac_secret = read_env("SKILLVAULT_ANCHOR_SECRET");

        if let Some(v) = read_env("SKILLVAULT_RATE_LIMIT_WINDOW_MS") {
            config.rate_limit_window_ms = parse_num("SKILLVAULT_RATE_LIMIT_WINDOW_MS", &v)?;
        }
        if let Some(v) = read_env("SKILLVAULT_RATE_LIMIT_COUNT") {
            config.rate_limit_count = parse_num("SKILLVAULT_RATE_LIMIT_COUNT", &v)?;
        }
        if let Some(v) = read_env("SKILLVAULT_PLAINTEXT_MAX_BYTES") {
            config.plaintext_max_bytes = parse_num("SKILLVAULT_PLAINTEXT_MAX_BYTES", &v)?;
        }
        if let Some(v) = read_env("SKILLVAULT_EXTERNAL_TIMEOUT_MS") {
            config.external_call_timeout_ms = parse_num("SKILLVAULT_EXTERNAL_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = read_env("SKILLVAULT_WITNESS_BACKEND") {
            config.witness_backend = v.parse()?;
        }

        Ok(config)
    }

    /// Startup gate. A violation here must abort the process.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.kek()?;
        if self.witness_backend == WitnessBackendKind::None
            && self.ip_anchor_hmac_secret.as_deref().unwrap_or("").is_empty()
        {
            return Err(ConfigError::MissingAnchorSecret);
        }
        if self.rate_limit_window_ms <= 0 {
            return Err(ConfigError::Invalid("rate limit window must be positive".into()));
        }
        Ok(())
    }

    /// Parse the configured KEK.
    pub fn kek(&self) -> Result<Kek, ConfigError> {
        let hex = self.kek_hex.as_deref().ok_or(ConfigError::MissingKek)?;
        Kek::from_hex(hex).map_err(|_| ConfigError::InvalidKek)
    }
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_num<T: FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{} is not a number: {}", name, value)))
}

// ---------------------------------------------------------------------------
// Config error
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    MissingKek,
    InvalidKek,
    MissingAnchorSecret,
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingKek => write!(f, "SKILLVAULT_KEK is not set"),
            Self::InvalidKek => write!(f, "KEK must be 64 hex characters"),
            Self::MissingAnchorSecret => {
                write!(f, "anchor HMAC secret required when no witness backend is configured")
            }
            Self::Invalid(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
