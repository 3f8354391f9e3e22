//! # Latency Band Engine
//!
//! Collects round-trip latency samples for an endpoint and sorts them into
//! three qualitative bands (Fast, Medium, Slow) with a seeded k-means model.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                          LATENCY BAND ENGINE                                │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  OFFLINE:  SAMPLE LOG → SCALER FIT → K-MEANS FIT → MODEL ARTIFACT (disk)    │
//! │  ONLINE:   BATCH → FILTER → SCALE → PREDICT → LABEL RESOLVER → POINTS/JSON  │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Deterministic**: seeded k-means++ and value-ordered labels
//! - **Hot-swappable model**: inference reads an atomically replaced artifact
//! - **Checksummed persistence**: corrupt artifacts are refused, never half-read
//! - **Probe + CLI**: HTTP probing, training, classification and inspection
//!
//! ## Author
//!
//! AIOps Team

// ============================================================================
// SECTION 1: IMPORTS & DEPENDENCIES
// ============================================================================

#![allow(dead_code)]
#![warn(rust_2018_idioms)]
#![warn(missing_debug_implementations)]

// ----------------------------------------------------------------------------
// Standard Library Imports
// ----------------------------------------------------------------------------
use std::fmt::{self, Display, Formatter};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ----------------------------------------------------------------------------
// Async Runtime - Tokio
// ----------------------------------------------------------------------------
use tokio::time::interval;

// ----------------------------------------------------------------------------
// Concurrency Primitives
// ----------------------------------------------------------------------------
use arc_swap::ArcSwapOption;
use parking_lot::Mutex;

// ----------------------------------------------------------------------------
// Serialization
// ----------------------------------------------------------------------------
use serde::{de::DeserializeOwned, Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Error Handling
// ----------------------------------------------------------------------------
use anyhow::{Context as AnyhowContext, Result as AnyhowResult};
use thiserror::Error;

// ----------------------------------------------------------------------------
// Logging & Tracing
// ----------------------------------------------------------------------------
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::{fmt as tracing_fmt, layer::SubscriberExt, EnvFilter};

// ----------------------------------------------------------------------------
// Time & Timestamps
// ----------------------------------------------------------------------------
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

// ----------------------------------------------------------------------------
// Networking
// ----------------------------------------------------------------------------
use reqwest::Client as HttpClient;

// ----------------------------------------------------------------------------
// Statistics & Math
// ----------------------------------------------------------------------------
use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// ----------------------------------------------------------------------------
// Async Traits
// ----------------------------------------------------------------------------
use async_trait::async_trait;

// ----------------------------------------------------------------------------
// UUID & Identifiers
// ----------------------------------------------------------------------------
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};

// ----------------------------------------------------------------------------
// CLI
// ----------------------------------------------------------------------------
use clap::{Parser, Subcommand};

// ============================================================================
// SECTION 2: CONSTANTS & VERSION INFORMATION
// ============================================================================

/// Engine version - follows semantic versioning
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const ENGINE_NAME: &str = "latency-engine";
pub const ENGINE_FULL_NAME: &str = "Latency Band Engine";

// ----------------------------------------------------------------------------
// Clustering
// ----------------------------------------------------------------------------

/// Number of latency bands. Fixed at three: Fast, Medium, Slow.
pub const CLUSTER_COUNT: usize = 3;

/// Minimum number of valid samples for training AND classification.
/// Must stay equal to `CLUSTER_COUNT`; both pipelines read this one constant.
pub const MIN_VALID_SAMPLES: usize = CLUSTER_COUNT;

/// Default seed for k-means++ initialization. Changing it may permute
/// cluster indices between runs, never the resolved labels.
pub const DEFAULT_KMEANS_SEED: u64 = 42;

/// Iteration cap for a single Lloyd run
pub const DEFAULT_MAX_ITERATIONS: usize = 300;

/// Independently seeded runs per fit; the lowest inertia wins
pub const DEFAULT_KMEANS_RESTARTS: usize = 10;

/// Relative tolerance when checking a stored centroid against its scaler
pub const CENTROID_CONSISTENCY_TOLERANCE: f64 = 1e-9;

// ----------------------------------------------------------------------------
// Presentation
// ----------------------------------------------------------------------------

/// Display jitter is drawn from `[-JITTER_HALF_WIDTH, JITTER_HALF_WIDTH)`
pub const JITTER_HALF_WIDTH: f64 = 0.5;

/// Vertical anchor for centroid markers
pub const CENTROID_DISPLAY_Y: f64 = 0.0;

// ----------------------------------------------------------------------------
// Persistence
// ----------------------------------------------------------------------------

/// Envelope format version for persisted records
pub const RECORD_FORMAT_VERSION: u32 = 1;

/// Default model artifact location
pub const DEFAULT_MODEL_PATH: &str = "latency_model.bin";

/// Default sample log location
pub const DEFAULT_SAMPLE_LOG_PATH: &str = "analysis_data.csv";

/// Header line of the sample log
pub const SAMPLE_LOG_HEADER: &str = "timestamp,response_time";

// ----------------------------------------------------------------------------
// Probing
// ----------------------------------------------------------------------------

/// Per-request timeout for HTTP probes (seconds)
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 10;

/// Samples collected per probe session
pub const DEFAULT_PROBE_COUNT: usize = 60;

/// Delay between probes (milliseconds)
pub const DEFAULT_PROBE_INTERVAL_MS: u64 = 1000;

/// Minimum allowed delay between probes (milliseconds)
pub const MIN_PROBE_INTERVAL_MS: u64 = 100;

/// Maximum redirects followed by a probe
pub const MAX_PROBE_REDIRECTS: usize = 5;

// ----------------------------------------------------------------------------
// Performance Thresholds
// ----------------------------------------------------------------------------

/// Warn when a classification batch takes longer than this (milliseconds)
pub const CLASSIFY_SLOW_THRESHOLD_MS: u64 = 250;

/// Warn when a training run takes longer than this (milliseconds)
pub const TRAIN_SLOW_THRESHOLD_MS: u64 = 5_000;

// ============================================================================
// SECTION 3: CORE TYPE SYSTEM
// ============================================================================
// Samples as they arrive from a probe, and the ordered band labels that the
// engine hands back to the presentation layer.
// ============================================================================

// ----------------------------------------------------------------------------
// 3.1 Latency Labels
// ----------------------------------------------------------------------------

/// Qualitative latency band. Ordered `Fast < Medium < Slow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Label {
    Fast,
    Medium,
    Slow,
}

impl Label {
    /// All labels in rank order. Rank `i` goes to the `i`-th smallest centroid.
    pub const ALL: [Label; CLUSTER_COUNT] = [Label::Fast, Label::Medium, Label::Slow];

    /// Position in `ALL`: 0 for Fast, 2 for Slow.
    pub fn rank(&self) -> usize {
        match self {
            Label::Fast => 0,
            Label::Medium => 1,
            Label::Slow => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Fast => "Fast",
            Label::Medium => "Medium",
            Label::Slow => "Slow",
        }
    }
}

impl Display for Label {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// 3.2 Latency Samples
// ----------------------------------------------------------------------------

/// One probe result. `response_time` is `None` when the probe failed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// When the probe was sent
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Round-trip time in milliseconds
    #[serde(default)]
    pub response_time: Option<f64>,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, response_time: Option<f64>) -> Self {
        Self {
            timestamp,
            response_time,
        }
    }

    /// A successful probe recorded now
    pub fn success(response_time_ms: f64) -> Self {
        Self::new(Utc::now(), Some(response_time_ms))
    }

    /// A failed probe recorded now
    pub fn failure() -> Self {
        Self::new(Utc::now(), None)
    }

    /// The response time if it can take part in clustering.
    ///
    /// Missing, non-finite and negative values are excluded.
    #[inline]
    pub fn valid_response_time(&self) -> Option<f64> {
        self.response_time.filter(|v| v.is_finite() && *v >= 0.0)
    }
}

/// Result of filtering a batch down to clusterable values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilteredSamples {
    /// Valid response times, in input order
    pub values: Vec<f64>,
    /// Samples without a response time (failed probes)
    pub missing: usize,
    /// Samples whose response time was non-finite or negative
    pub rejected: usize,
}

/// Drop failed probes and numerically invalid values.
///
/// This is the only gate between raw samples and the scaler/cluster model,
/// so nothing non-finite gets past it.
pub fn filter_valid_samples(samples: &[Sample]) -> FilteredSamples {
    let mut filtered = FilteredSamples {
        values: Vec::with_capacity(samples.len()),
        ..FilteredSamples::default()
    };

    for sample in samples {
        match sample.response_time {
            None => filtered.missing += 1,
            Some(_) => match sample.valid_response_time() {
                Some(value) => filtered.values.push(value),
                None => filtered.rejected += 1,
            },
        }
    }

    if filtered.rejected > 0 {
        warn!(
            target: "latency::samples",
            rejected = filtered.rejected,
            "Dropped non-finite or negative response times"
        );
    }

    trace!(
        target: "latency::samples",
        total = samples.len(),
        valid = filtered.values.len(),
        missing = filtered.missing,
        "Samples filtered"
    );

    filtered
}

/// Shared minimum-count check used by training and classification.
pub fn ensure_min_samples(found: usize) -> LatencyResult<()> {
    if found < MIN_VALID_SAMPLES {
        return Err(LatencyError::InsufficientData {
            required: MIN_VALID_SAMPLES,
            found,
        });
    }
    Ok(())
}

// ============================================================================
// SECTION 4: ERROR HANDLING FRAMEWORK
// ============================================================================
// Every failure the engine can report. All of them are recoverable at the
// CLI boundary: the caller prints a message and a hint, nothing panics.
// ============================================================================

// ----------------------------------------------------------------------------
// 4.1 Core Engine Errors
// ----------------------------------------------------------------------------

/// The main error type for the latency engine.
#[derive(Error, Debug)]
pub enum LatencyError {
    // ---- Model Errors ----
    #[error("Not enough valid samples for clustering: need at least {required}, found {found}")]
    InsufficientData { required: usize, found: usize },

    #[error("Degenerate data: {reason}")]
    DegenerateData { reason: String },

    #[error("Ambiguous centroid ordering: clusters {first} and {second} share the value {value}ms")]
    AmbiguousOrdering { first: usize, second: usize, value: f64 },

    #[error("Model not loaded: {reason}")]
    ModelNotLoaded { reason: String },

    // ---- Input Errors ----
    #[error("Invalid sample: {message}")]
    InvalidSample { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    // ---- Ambient Errors ----
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LatencyError {
    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            LatencyError::InsufficientData { .. } => true,
            LatencyError::DegenerateData { .. } => true,
            LatencyError::AmbiguousOrdering { .. } => true,
            LatencyError::ModelNotLoaded { .. } => true,
            LatencyError::InvalidSample { .. } => true,
            LatencyError::InvalidInput { .. } => true,
            LatencyError::Config(_) => false,
            LatencyError::Storage(e) => e.is_recoverable(),
            LatencyError::Io(_) => true,
            LatencyError::Internal(_) => false,
        }
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            LatencyError::InsufficientData { .. } => "insufficient_data",
            LatencyError::DegenerateData { .. } => "degenerate_data",
            LatencyError::AmbiguousOrdering { .. } => "ambiguous_ordering",
            LatencyError::ModelNotLoaded { .. } => "model_not_loaded",
            LatencyError::InvalidSample { .. } => "invalid_sample",
            LatencyError::InvalidInput { .. } => "invalid_input",
            LatencyError::Config(_) => "config",
            LatencyError::Storage(_) => "storage",
            LatencyError::Io(_) => "io",
            LatencyError::Internal(_) => "internal",
        }
    }

    /// Get suggested recovery action
    pub fn recovery_hint(&self) -> RecoveryHint {
        match self {
            LatencyError::InsufficientData { .. } => RecoveryHint::CollectMoreSamples,
            LatencyError::DegenerateData { .. } => RecoveryHint::CollectMoreSamples,
            LatencyError::AmbiguousOrdering { .. } => RecoveryHint::Retrain,
            LatencyError::ModelNotLoaded { .. } => RecoveryHint::Retrain,
            LatencyError::InvalidSample { .. } | LatencyError::InvalidInput { .. } => {
                RecoveryHint::FixInput
            }
            LatencyError::Config(_) => RecoveryHint::FixConfiguration,
            LatencyError::Storage(e) => e.recovery_hint(),
            LatencyError::Io(_) => RecoveryHint::CheckStorage,
            LatencyError::Internal(_) => RecoveryHint::None,
        }
    }

    pub fn model_not_loaded(reason: impl Into<String>) -> Self {
        LatencyError::ModelNotLoaded {
            reason: reason.into(),
        }
    }

    pub fn degenerate(reason: impl Into<String>) -> Self {
        LatencyError::DegenerateData {
            reason: reason.into(),
        }
    }
}

/// Hints for how to recover from an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryHint {
    /// No recovery possible
    None,
    /// Probe the endpoint longer before training or classifying
    CollectMoreSamples,
    /// Train (or re-train) the model
    Retrain,
    /// Fix the offending input file or payload
    FixInput,
    /// Fix configuration and restart
    FixConfiguration,
    /// Check paths, permissions and disk state
    CheckStorage,
}

impl Display for RecoveryHint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let text = match self {
            RecoveryHint::None => "no automatic recovery available",
            RecoveryHint::CollectMoreSamples => {
                "collect more successful probes with `latency probe` and try again"
            }
            RecoveryHint::Retrain => "run `latency train` to build a fresh model",
            RecoveryHint::FixInput => "check the sample input for malformed values",
            RecoveryHint::FixConfiguration => "fix the configuration and run `latency validate`",
            RecoveryHint::CheckStorage => "check that the file paths exist and are writable",
        };
        f.write_str(text)
    }
}

// ----------------------------------------------------------------------------
// 4.2 Configuration Errors
// ----------------------------------------------------------------------------

/// Errors related to configuration loading and validation
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to parse configuration: {message}")]
    ParseError { message: String },

    #[error("Invalid configuration value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// 4.3 Storage Errors
// ----------------------------------------------------------------------------

/// Errors related to model artifacts and sample logs
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("File not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Serialization failed: {message}")]
    SerializationFailed { message: String },

    #[error("Deserialization failed: {message}")]
    DeserializationFailed { message: String },

    #[error("Data corruption detected: {message}")]
    DataCorruption { message: String },

    #[error("Write failed for {path}: {message}")]
    WriteFailed { path: PathBuf, message: String },

    #[error("Read failed for {path}: {message}")]
    ReadFailed { path: PathBuf, message: String },

    #[error("Malformed record on line {line}: {message}")]
    MalformedRecord { line: usize, message: String },
}

impl StorageError {
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, StorageError::DataCorruption { .. })
    }

    pub fn recovery_hint(&self) -> RecoveryHint {
        match self {
            StorageError::DataCorruption { .. } | StorageError::DeserializationFailed { .. } => {
                RecoveryHint::Retrain
            }
            StorageError::MalformedRecord { .. } => RecoveryHint::FixInput,
            _ => RecoveryHint::CheckStorage,
        }
    }

    fn write_failed(path: &Path, err: impl Display) -> Self {
        StorageError::WriteFailed {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }

    fn read_failed(path: &Path, err: impl Display) -> Self {
        StorageError::ReadFailed {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}

// ----------------------------------------------------------------------------
// 4.4 Result Type Aliases
// ----------------------------------------------------------------------------

/// Standard result type for engine operations
pub type LatencyResult<T> = Result<T, LatencyError>;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

// ============================================================================
// SECTION 5: CONFIGURATION SYSTEM
// ============================================================================
// TOML file + LATENCY_* environment overrides, validated on load. The cluster
// count and the minimum sample count are constants, not configuration.
// ============================================================================

// ----------------------------------------------------------------------------
// 5.1 Main Configuration Structure
// ----------------------------------------------------------------------------

/// Root configuration for the engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Clustering parameters
    #[serde(default)]
    pub model: ClusteringConfig,

    /// File locations
    #[serde(default)]
    pub storage: StorageConfig,

    /// HTTP probe settings
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load configuration from file with environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("LATENCY_").split("__"));

        let config: Self = figment.extract().map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load from string (for testing)
    pub fn from_str(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.max_iterations == 0 {
            return Err(ConfigError::invalid_value(
                "model.max_iterations",
                "at least one Lloyd iteration is required",
            ));
        }

        if self.model.restarts == 0 {
            return Err(ConfigError::invalid_value(
                "model.restarts",
                "at least one k-means run is required",
            ));
        }

        if self.probe.count == 0 {
            return Err(ConfigError::invalid_value(
                "probe.count",
                "a probe session must collect at least one sample",
            ));
        }

        if self.probe.interval_ms < MIN_PROBE_INTERVAL_MS {
            return Err(ConfigError::invalid_value(
                "probe.interval_ms",
                format!("probe interval must be at least {}ms", MIN_PROBE_INTERVAL_MS),
            ));
        }

        if self.probe.timeout_secs == 0 {
            return Err(ConfigError::invalid_value(
                "probe.timeout_secs",
                "probe timeout must be at least one second",
            ));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "compact" | "json") {
            return Err(ConfigError::invalid_value(
                "logging.format",
                format!("unknown format '{}', expected pretty, compact or json", self.logging.format),
            ));
        }

        Ok(())
    }

    /// Render the default configuration as TOML
    pub fn generate_default_config() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

// ----------------------------------------------------------------------------
// 5.2 Clustering Configuration
// ----------------------------------------------------------------------------

/// Parameters of the k-means fit. `k` itself is `CLUSTER_COUNT`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusteringConfig {
    /// Seed for k-means++ initialization; restart `i` uses `seed + i`
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Iteration cap per run
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Number of seeded runs; the lowest inertia is kept
    #[serde(default = "default_restarts")]
    pub restarts: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            max_iterations: default_max_iterations(),
            restarts: default_restarts(),
        }
    }
}

impl ClusteringConfig {
    /// Set random seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set number of restarts
    pub fn with_restarts(mut self, restarts: usize) -> Self {
        self.restarts = restarts;
        self
    }
}

fn default_seed() -> u64 {
    DEFAULT_KMEANS_SEED
}

fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}

fn default_restarts() -> usize {
    DEFAULT_KMEANS_RESTARTS
}

// ----------------------------------------------------------------------------
// 5.3 Storage Configuration
// ----------------------------------------------------------------------------

/// File locations for the model artifact and the sample log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,

    #[serde(default = "default_sample_log_path")]
    pub sample_log_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            sample_log_path: default_sample_log_path(),
        }
    }
}

fn default_model_path() -> PathBuf {
    PathBuf::from(DEFAULT_MODEL_PATH)
}

fn default_sample_log_path() -> PathBuf {
    PathBuf::from(DEFAULT_SAMPLE_LOG_PATH)
}

// ----------------------------------------------------------------------------
// 5.4 Probe Configuration
// ----------------------------------------------------------------------------

/// HTTP probe settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Default target when none is given on the command line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Samples per session
    #[serde(default = "default_probe_count")]
    pub count: usize,

    /// Delay between probes in milliseconds
    #[serde(default = "default_probe_interval")]
    pub interval_ms: u64,

    /// Per-request timeout in seconds
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            url: None,
            count: default_probe_count(),
            interval_ms: default_probe_interval(),
            timeout_secs: default_probe_timeout(),
        }
    }
}

fn default_probe_count() -> usize {
    DEFAULT_PROBE_COUNT
}

fn default_probe_interval() -> u64 {
    DEFAULT_PROBE_INTERVAL_MS
}

fn default_probe_timeout() -> u64 {
    DEFAULT_PROBE_TIMEOUT_SECS
}

// ----------------------------------------------------------------------------
// 5.5 Logging Configuration
// ----------------------------------------------------------------------------

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Enable ANSI colors
    #[serde(default = "default_true")]
    pub colors: bool,

    /// Include source location
    #[serde(default)]
    pub source_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            colors: true,
            source_location: false,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "compact".into()
}

fn default_true() -> bool {
    true
}

// ============================================================================
// SECTION 6: LOGGING & TRACING INFRASTRUCTURE
// ============================================================================
// Logs go to stderr so that `classify` can pipe JSON results on stdout.
// ============================================================================

// ----------------------------------------------------------------------------
// 6.1 Logger Initialization
// ----------------------------------------------------------------------------

/// Initialize the logging system based on configuration
pub fn init_logging(config: &LoggingConfig) -> LatencyResult<()> {
    let level_filter = match config.level.to_lowercase().as_str() {
        "trace" => tracing::level_filters::LevelFilter::TRACE,
        "debug" => tracing::level_filters::LevelFilter::DEBUG,
        "info" => tracing::level_filters::LevelFilter::INFO,
        "warn" | "warning" => tracing::level_filters::LevelFilter::WARN,
        "error" => tracing::level_filters::LevelFilter::ERROR,
        _ => tracing::level_filters::LevelFilter::INFO,
    };

    let env_filter = EnvFilter::builder()
        .with_default_directive(level_filter.into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = match config.format.as_str() {
        "json" => tracing::subscriber::set_global_default(
            registry.with(
                tracing_fmt::layer()
                    .json()
                    .with_writer(io::stderr)
                    .with_target(true)
                    .with_file(config.source_location)
                    .with_line_number(config.source_location),
            ),
        ),
        "pretty" => tracing::subscriber::set_global_default(
            registry.with(
                tracing_fmt::layer()
                    .pretty()
                    .with_writer(io::stderr)
                    .with_ansi(config.colors)
                    .with_target(true)
                    .with_file(config.source_location)
                    .with_line_number(config.source_location),
            ),
        ),
        _ => tracing::subscriber::set_global_default(
            registry.with(
                tracing_fmt::layer()
                    .compact()
                    .with_writer(io::stderr)
                    .with_ansi(config.colors)
                    .with_target(true),
            ),
        ),
    };

    installed.map_err(|e| LatencyError::Internal(format!("Failed to set logger: {}", e)))?;

    debug!(
        target: "latency::init",
        level = %config.level,
        format = %config.format,
        "Logging initialized"
    );

    Ok(())
}

// ----------------------------------------------------------------------------
// 6.2 Performance Timer
// ----------------------------------------------------------------------------

/// Measures one pipeline step and warns when it runs past a threshold.
#[derive(Debug)]
pub struct PerfTimer {
    name: &'static str,
    start: Instant,
    threshold_ms: Option<u64>,
}

impl PerfTimer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
            threshold_ms: None,
        }
    }

    pub fn with_threshold(name: &'static str, threshold_ms: u64) -> Self {
        Self {
            threshold_ms: Some(threshold_ms),
            ..Self::new(name)
        }
    }

    pub fn elapsed_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    /// Stop the timer, log the duration, and return it in microseconds
    pub fn stop(self) -> u64 {
        let elapsed_us = self.elapsed_us();

        match self.threshold_ms {
            Some(threshold) if elapsed_us / 1000 > threshold => warn!(
                target: "latency::perf",
                operation = self.name,
                elapsed_us,
                threshold_ms = threshold,
                "Operation exceeded threshold"
            ),
            _ => trace!(
                target: "latency::perf",
                operation = self.name,
                elapsed_us,
                "Operation completed"
            ),
        }

        elapsed_us
    }
}

// ============================================================================
// SECTION 7: FEATURE SCALER
// ============================================================================
// Standard score normalization fitted once on the training set. Clustering
// runs in scaled space; everything reported to users is in milliseconds.
// ============================================================================

/// Mean and population standard deviation of a training set.
///
/// Invariant: both finite and `std > 0`. `new`, `fit` and `validate` enforce it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalerParams {
    mean: f64,
    std: f64,
}

impl ScalerParams {
    /// Build params from known values, e.g. when restoring from storage.
    pub fn new(mean: f64, std: f64) -> LatencyResult<Self> {
        let params = Self { mean, std };
        params.validate()?;
        Ok(params)
    }

    /// Fit mean and population standard deviation.
    ///
    /// Fails with `InsufficientData` on empty input and `DegenerateData` when
    /// every value is identical (the standard deviation would be zero).
    pub fn fit(values: &[f64]) -> LatencyResult<Self> {
        let first = *values.first().ok_or(LatencyError::InsufficientData {
            required: 1,
            found: 0,
        })?;

        if let Some(position) = values.iter().position(|v| !v.is_finite()) {
            return Err(LatencyError::InvalidSample {
                message: format!("non-finite value at position {} reached the scaler", position),
            });
        }

        // Exact equality: a mean of identical values can round away from them
        // and leave a tiny but non-zero spread.
        if values.iter().all(|v| *v == first) {
            return Err(LatencyError::degenerate(format!(
                "all {} values equal {}ms, standard deviation is zero",
                values.len(),
                first
            )));
        }

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

        Self::new(mean, variance.sqrt())
    }

    /// Check the scaler invariant.
    pub fn validate(&self) -> LatencyResult<()> {
        if !self.mean.is_finite() {
            return Err(LatencyError::degenerate(format!("scaler mean {} is not finite", self.mean)));
        }
        if !(self.std.is_finite() && self.std > 0.0) {
            return Err(LatencyError::degenerate(format!(
                "scaler standard deviation {} must be finite and positive",
                self.std
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn mean(&self) -> f64 {
        self.mean
    }

    #[inline]
    pub fn std(&self) -> f64 {
        self.std
    }

    /// `(value - mean) / std`
    #[inline]
    pub fn transform(&self, value: f64) -> f64 {
        (value - self.mean) / self.std
    }

    /// `scaled * std + mean`, the inverse of `transform`
    #[inline]
    pub fn inverse_transform(&self, scaled: f64) -> f64 {
        scaled * self.std + self.mean
    }

    pub fn transform_all(&self, values: &[f64]) -> Vec<f64> {
        values.iter().map(|v| self.transform(*v)).collect()
    }
}

// ============================================================================
// SECTION 8: CLUSTER MODEL
// ============================================================================
// One-dimensional k-means with k = CLUSTER_COUNT:
// - k-means++ seeding from a fixed seed
// - Lloyd iterations until assignments stop changing or the cap is hit
// - Several seeded restarts, lowest inertia wins
// Cluster indices carry no meaning; see the label resolver.
// ============================================================================

// ----------------------------------------------------------------------------
// 8.1 Centroids
// ----------------------------------------------------------------------------

/// A cluster center in both scaled and original (millisecond) units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Centroid {
    pub scaled_value: f64,
    pub original_value: f64,
}

impl Centroid {
    pub fn from_scaled(scaled_value: f64, scaler: &ScalerParams) -> Self {
        Self {
            scaled_value,
            original_value: scaler.inverse_transform(scaled_value),
        }
    }
}

// ----------------------------------------------------------------------------
// 8.2 Fitted Model
// ----------------------------------------------------------------------------

/// A fitted three-cluster model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterModel {
    centroids: [Centroid; CLUSTER_COUNT],
    /// Lloyd iterations of the winning run
    iterations: usize,
    /// Sum of squared scaled distances to the nearest centroid
    inertia: f64,
}

impl ClusterModel {
    /// Fit the model on already-scaled values.
    pub fn fit(
        scaled_values: &[f64],
        scaler: &ScalerParams,
        config: &ClusteringConfig,
    ) -> LatencyResult<Self> {
        ensure_min_samples(scaled_values.len())?;

        if let Some(position) = scaled_values.iter().position(|v| !v.is_finite()) {
            return Err(LatencyError::InvalidSample {
                message: format!("non-finite scaled value at position {}", position),
            });
        }

        let mut best: Option<LloydRun> = None;

        for restart in 0..config.restarts.max(1) {
            let seed = config.seed.wrapping_add(restart as u64);
            let run = run_lloyd(scaled_values, config.max_iterations, seed);

            trace!(
                target: "latency::cluster",
                restart,
                seed,
                iterations = run.iterations,
                inertia = run.inertia,
                "k-means run finished"
            );

            if best.as_ref().map_or(true, |b| run.inertia < b.inertia) {
                best = Some(run);
            }
        }

        let best = best.ok_or_else(|| LatencyError::Internal("no k-means run was executed".into()))?;

        let model = Self {
            centroids: best.centroids.map(|c| Centroid::from_scaled(c, scaler)),
            iterations: best.iterations,
            inertia: best.inertia,
        };

        if let Some((first, second)) = model.tied_centroids() {
            warn!(
                target: "latency::cluster",
                first,
                second,
                value_ms = model.centroids[first].original_value,
                "Degenerate fit: two centroids coincide, labels will be low-confidence"
            );
        }

        Ok(model)
    }

    /// Build a model from known scaled centroid positions.
    pub fn from_scaled_centroids(
        scaled: [f64; CLUSTER_COUNT],
        scaler: &ScalerParams,
    ) -> LatencyResult<Self> {
        if let Some(position) = scaled.iter().position(|v| !v.is_finite()) {
            return Err(LatencyError::InvalidSample {
                message: format!("centroid {} is not finite", position),
            });
        }
        Ok(Self {
            centroids: scaled.map(|c| Centroid::from_scaled(c, scaler)),
            iterations: 0,
            inertia: 0.0,
        })
    }

    /// Index of the nearest centroid by squared distance.
    ///
    /// Equidistant centroids resolve to the lowest index.
    #[inline]
    pub fn predict(&self, scaled_value: f64) -> usize {
        nearest_centroid(scaled_value, &self.scaled_centroids()).0
    }

    pub fn centroids(&self) -> &[Centroid; CLUSTER_COUNT] {
        &self.centroids
    }

    pub fn scaled_centroids(&self) -> [f64; CLUSTER_COUNT] {
        self.centroids.map(|c| c.scaled_value)
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn inertia(&self) -> f64 {
        self.inertia
    }

    /// First pair of centroids sharing an original value, if any.
    pub fn tied_centroids(&self) -> Option<(usize, usize)> {
        for first in 0..CLUSTER_COUNT {
            for second in (first + 1)..CLUSTER_COUNT {
                if self.centroids[first].original_value == self.centroids[second].original_value {
                    return Some((first, second));
                }
            }
        }
        None
    }

    /// Check that stored centroids are finite and agree with `scaler`.
    pub fn validate_against(&self, scaler: &ScalerParams) -> LatencyResult<()> {
        for (index, centroid) in self.centroids.iter().enumerate() {
            if !centroid.scaled_value.is_finite() || !centroid.original_value.is_finite() {
                return Err(LatencyError::degenerate(format!("centroid {} is not finite", index)));
            }
            let expected = scaler.inverse_transform(centroid.scaled_value);
            let tolerance = CENTROID_CONSISTENCY_TOLERANCE * expected.abs().max(1.0);
            if (expected - centroid.original_value).abs() > tolerance {
                return Err(LatencyError::degenerate(format!(
                    "centroid {} stores {}ms but its scaled value maps to {}ms",
                    index, centroid.original_value, expected
                )));
            }
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// 8.3 Lloyd's Algorithm
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct LloydRun {
    centroids: [f64; CLUSTER_COUNT],
    iterations: usize,
    inertia: f64,
}

/// Nearest centroid and its squared distance. Strict `<` keeps the lowest
/// index on ties.
fn nearest_centroid(value: f64, centroids: &[f64]) -> (usize, f64) {
    let mut best_index = 0;
    let mut best_distance = f64::INFINITY;
    for (index, centroid) in centroids.iter().enumerate() {
        let distance = (value - centroid).powi(2);
        if distance < best_distance {
            best_index = index;
            best_distance = distance;
        }
    }
    (best_index, best_distance)
}

/// k-means++ seeding: first center uniform, the rest weighted by squared
/// distance to the closest center chosen so far.
fn kmeans_plus_plus(values: &[f64], rng: &mut StdRng) -> [f64; CLUSTER_COUNT] {
    let mut centroids = [0.0; CLUSTER_COUNT];
    centroids[0] = values[rng.gen_range(0..values.len())];

    for chosen in 1..CLUSTER_COUNT {
        let distances: Vec<f64> = values
            .iter()
            .map(|v| nearest_centroid(*v, &centroids[..chosen]).1)
            .collect();
        let total: f64 = distances.iter().sum();

        if !(total > 0.0 && total.is_finite()) {
            // Every point already sits on a center.
            centroids[chosen] = values[rng.gen_range(0..values.len())];
            continue;
        }

        let threshold = rng.gen::<f64>() * total;
        let mut cumulative = 0.0;
        let mut selected = 0;
        for (index, distance) in distances.iter().enumerate() {
            if *distance <= 0.0 {
                continue;
            }
            cumulative += distance;
            selected = index;
            if cumulative >= threshold {
                break;
            }
        }
        centroids[chosen] = values[selected];
    }

    centroids
}

/// The point farthest from its nearest centroid; re-seeds an emptied cluster.
fn farthest_point(values: &[f64], centroids: &[f64]) -> f64 {
    let mut farthest = values[0];
    let mut farthest_distance = f64::NEG_INFINITY;
    for value in values {
        let distance = nearest_centroid(*value, centroids).1;
        if distance > farthest_distance {
            farthest = *value;
            farthest_distance = distance;
        }
    }
    farthest
}

fn run_lloyd(values: &[f64], max_iterations: usize, seed: u64) -> LloydRun {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut centroids = kmeans_plus_plus(values, &mut rng);
    let mut assignments = vec![usize::MAX; values.len()];
    let mut iterations = 0;

    for iteration in 0..max_iterations.max(1) {
        iterations = iteration + 1;

        let mut changed = false;
        for (slot, value) in assignments.iter_mut().zip(values) {
            let (nearest, _) = nearest_centroid(*value, &centroids);
            if *slot != nearest {
                *slot = nearest;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut sums = [0.0; CLUSTER_COUNT];
        let mut counts = [0usize; CLUSTER_COUNT];
        for (value, cluster) in values.iter().zip(&assignments) {
            sums[*cluster] += value;
            counts[*cluster] += 1;
        }

        for cluster in 0..CLUSTER_COUNT {
            centroids[cluster] = if counts[cluster] > 0 {
                sums[cluster] / counts[cluster] as f64
            } else {
                farthest_point(values, &centroids)
            };
        }
    }

    let inertia = values
        .iter()
        .map(|v| nearest_centroid(*v, &centroids).1)
        .sum();

    LloydRun {
        centroids,
        iterations,
        inertia,
    }
}

// ============================================================================
// SECTION 9: LABEL RESOLVER
// ============================================================================
// Cluster index → label, decided by sorting explicit (index, value) pairs on
// the original millisecond value. Never by index, never by float-keyed lookup.
// ============================================================================

/// Label for each cluster index of one model, and the inverse.
///
/// Only built by the resolver from a full ranking, so both arrays are
/// permutations of each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelMapping {
    by_cluster: [Label; CLUSTER_COUNT],
    by_label: [usize; CLUSTER_COUNT],
}

impl LabelMapping {
    /// Label of a cluster index returned by `ClusterModel::predict`.
    ///
    /// # Panics
    ///
    /// Panics if `cluster >= CLUSTER_COUNT`; `predict` never returns such an index.
    #[inline]
    pub fn label_of(&self, cluster: usize) -> Label {
        self.by_cluster[cluster]
    }

    /// Cluster index carrying `label`.
    pub fn cluster_of(&self, label: Label) -> usize {
        self.by_label[label.rank()]
    }

    pub fn as_array(&self) -> [Label; CLUSTER_COUNT] {
        self.by_cluster
    }
}

/// Centroids as `(cluster, original_value)` sorted ascending by value, then index.
fn rank_centroids(centroids: &[Centroid; CLUSTER_COUNT]) -> [(usize, f64); CLUSTER_COUNT] {
    let mut ranked: [(usize, f64); CLUSTER_COUNT] =
        std::array::from_fn(|index| (index, centroids[index].original_value));
    ranked.sort_by_key(|(index, value)| (OrderedFloat(*value), *index));
    ranked
}

fn assign_by_rank(ranked: &[(usize, f64); CLUSTER_COUNT]) -> LabelMapping {
    let mut by_cluster = [Label::Fast; CLUSTER_COUNT];
    let mut by_label = [0; CLUSTER_COUNT];
    for (label, (cluster, _)) in Label::ALL.iter().zip(ranked.iter()) {
        by_cluster[*cluster] = *label;
        by_label[label.rank()] = *cluster;
    }
    LabelMapping {
        by_cluster,
        by_label,
    }
}

fn find_tie(ranked: &[(usize, f64); CLUSTER_COUNT]) -> Option<LatencyError> {
    ranked
        .windows(2)
        .find(|pair| pair[0].1 == pair[1].1)
        .map(|pair| LatencyError::AmbiguousOrdering {
            first: pair[0].0,
            second: pair[1].0,
            value: pair[0].1,
        })
}

/// Map cluster indices to Fast/Medium/Slow by ascending centroid value.
///
/// Fails with `AmbiguousOrdering` when two centroids share a value.
pub fn resolve_labels(centroids: &[Centroid; CLUSTER_COUNT]) -> LatencyResult<LabelMapping> {
    let ranked = rank_centroids(centroids);
    match find_tie(&ranked) {
        Some(err) => Err(err),
        None => Ok(assign_by_rank(&ranked)),
    }
}

/// Like `resolve_labels`, but breaks value ties by cluster index and reports
/// whether it had to (`true` = low confidence).
pub fn resolve_labels_lenient(centroids: &[Centroid; CLUSTER_COUNT]) -> (LabelMapping, bool) {
    let ranked = rank_centroids(centroids);
    let tie = find_tie(&ranked);
    if let Some(err) = &tie {
        warn!(target: "latency::labels", error = %err, "Breaking centroid tie by cluster index");
    }
    (assign_by_rank(&ranked), tie.is_some())
}

// ============================================================================
// SECTION 10: MODEL ARTIFACT & PERSISTENCE
// ============================================================================
// The persisted unit is a ModelArtifact (scaler + cluster model + metadata),
// bincode-encoded inside a versioned, CRC-32 checksummed envelope.
// ============================================================================

// ----------------------------------------------------------------------------
// 10.1 Record Envelope
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordEnvelope {
    format_version: u32,
    checksum: u32,
    payload: Vec<u8>,
}

/// CRC-32 (IEEE, reflected) of `data`.
fn crc32_checksum(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for byte in data {
        crc ^= *byte as u32;
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}

/// Serialize any record into a checksummed envelope.
pub fn encode_record<T: Serialize>(value: &T) -> StorageResult<Vec<u8>> {
    let payload = bincode::serialize(value).map_err(|e| StorageError::SerializationFailed {
        message: e.to_string(),
    })?;
    let envelope = RecordEnvelope {
        format_version: RECORD_FORMAT_VERSION,
        checksum: crc32_checksum(&payload),
        payload,
    };
    bincode::serialize(&envelope).map_err(|e| StorageError::SerializationFailed {
        message: e.to_string(),
    })
}

/// Decode a record written by `encode_record`, verifying version and checksum.
pub fn decode_record<T: DeserializeOwned>(bytes: &[u8]) -> StorageResult<T> {
    let envelope: RecordEnvelope =
        bincode::deserialize(bytes).map_err(|e| StorageError::DeserializationFailed {
            message: e.to_string(),
        })?;

    if envelope.format_version != RECORD_FORMAT_VERSION {
        return Err(StorageError::DataCorruption {
            message: format!(
                "unsupported record format version {} (expected {})",
                envelope.format_version, RECORD_FORMAT_VERSION
            ),
        });
    }

    let actual = crc32_checksum(&envelope.payload);
    if actual != envelope.checksum {
        return Err(StorageError::DataCorruption {
            message: format!(
                "checksum mismatch: stored {:#010x}, computed {:#010x}",
                envelope.checksum, actual
            ),
        });
    }

    bincode::deserialize(&envelope.payload).map_err(|e| StorageError::DeserializationFailed {
        message: e.to_string(),
    })
}

/// Write via a sibling temp file and rename, so readers never see a partial file.
fn write_atomically(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| StorageError::write_failed(parent, e))?;
    }

    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path).map_err(|e| StorageError::write_failed(&tmp_path, e))?;
        file.write_all(bytes)
            .and_then(|_| file.sync_all())
            .map_err(|e| StorageError::write_failed(&tmp_path, e))?;
    }
    fs::rename(&tmp_path, path).map_err(|e| StorageError::write_failed(path, e))
}

// ----------------------------------------------------------------------------
// 10.2 Model Artifact
// ----------------------------------------------------------------------------

/// Everything one training run produces; read-only once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    /// Unique id of this training run
    pub model_id: Uuid,
    /// When training finished
    pub trained_at: DateTime<Utc>,
    /// Valid samples the model was fitted on
    pub sample_count: usize,
    pub scaler: ScalerParams,
    pub model: ClusterModel,
}

impl ModelArtifact {
    pub fn new(scaler: ScalerParams, model: ClusterModel, sample_count: usize) -> Self {
        Self {
            model_id: Uuid::new_v4(),
            trained_at: Utc::now(),
            sample_count,
            scaler,
            model,
        }
    }

    /// Check the scaler invariant and centroid consistency.
    pub fn validate(&self) -> LatencyResult<()> {
        self.scaler.validate()?;
        self.model.validate_against(&self.scaler)
    }

    /// Strict label mapping for this model.
    pub fn label_mapping(&self) -> LatencyResult<LabelMapping> {
        resolve_labels(self.model.centroids())
    }

    /// Centroids in label order with `y` fixed at the display anchor.
    pub fn labeled_centroids(&self, mapping: &LabelMapping) -> Vec<LabeledCentroid> {
        Label::ALL
            .iter()
            .map(|label| LabeledCentroid {
                x: self.model.centroids()[mapping.cluster_of(*label)].original_value,
                y: CENTROID_DISPLAY_Y,
                cluster: *label,
            })
            .collect()
    }

    pub fn to_bytes(&self) -> StorageResult<Vec<u8>> {
        encode_record(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> LatencyResult<Self> {
        let artifact: Self = decode_record(bytes)?;
        artifact.validate()?;
        Ok(artifact)
    }

    /// Persist to `path`, replacing any previous artifact atomically.
    pub fn save(&self, path: impl AsRef<Path>) -> LatencyResult<()> {
        let path = path.as_ref();
        let bytes = self.to_bytes()?;
        write_atomically(path, &bytes)?;
        info!(
            target: "latency::storage",
            path = %path.display(),
            model_id = %self.model_id,
            bytes = bytes.len(),
            "Model artifact saved"
        );
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> LatencyResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(StorageError::NotFound {
                path: path.to_path_buf(),
            }
            .into());
        }
        let bytes = fs::read(path).map_err(|e| StorageError::read_failed(path, e))?;
        let artifact = Self::from_bytes(&bytes)?;
        debug!(
            target: "latency::storage",
            path = %path.display(),
            model_id = %artifact.model_id,
            "Model artifact loaded"
        );
        Ok(artifact)
    }
}

// ----------------------------------------------------------------------------
// 10.3 Sample Log
// ----------------------------------------------------------------------------
// CSV with a `timestamp,response_time` header. An empty response time marks
// a failed probe. Timestamps are RFC 3339, or naive ISO-8601 read as UTC.
// ----------------------------------------------------------------------------

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    raw.parse::<NaiveDateTime>()
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn parse_response_time(raw: &str) -> Result<Option<f64>, String> {
    match raw.to_ascii_lowercase().as_str() {
        "" | "nan" | "null" | "none" => Ok(None),
        other => other
            .parse::<f64>()
            .map(Some)
            .map_err(|e| format!("bad response time '{}': {}", raw, e)),
    }
}

fn parse_sample_line(line: &str, line_number: usize) -> StorageResult<Sample> {
    let malformed = |message: String| StorageError::MalformedRecord {
        line: line_number,
        message,
    };

    let (raw_ts, raw_rt) = line
        .split_once(',')
        .ok_or_else(|| malformed(format!("expected 2 columns, got '{}'", line)))?;

    let timestamp = parse_timestamp(raw_ts.trim())
        .ok_or_else(|| malformed(format!("bad timestamp '{}'", raw_ts.trim())))?;
    let response_time = parse_response_time(raw_rt.trim()).map_err(malformed)?;

    Ok(Sample::new(timestamp, response_time))
}

/// Parse a sample log from any reader. Blank lines are skipped.
pub fn parse_sample_log<R: BufRead>(reader: R) -> LatencyResult<Vec<Sample>> {
    let mut samples = Vec::new();
    let mut seen_content = false;
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let first_content = !seen_content;
        seen_content = true;
        if first_content && trimmed.to_ascii_lowercase().starts_with("timestamp") {
            continue;
        }
        samples.push(parse_sample_line(trimmed, index + 1)?);
    }
    Ok(samples)
}

/// Read every sample from a sample log file.
pub fn read_sample_log(path: impl AsRef<Path>) -> LatencyResult<Vec<Sample>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            StorageError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            StorageError::read_failed(path, e)
        }
    })?;
    let samples = parse_sample_log(BufReader::new(file))?;
    debug!(
        target: "latency::storage",
        path = %path.display(),
        samples = samples.len(),
        "Sample log read"
    );
    Ok(samples)
}

/// Append samples to a sample log, writing the header for a new file.
pub fn append_sample_log(path: impl AsRef<Path>, samples: &[Sample]) -> LatencyResult<usize> {
    let path = path.as_ref();
    let is_new = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| StorageError::write_failed(path, e))?;
    let mut writer = BufWriter::new(file);

    let write_all = |writer: &mut BufWriter<File>| -> io::Result<()> {
        if is_new {
            writeln!(writer, "{}", SAMPLE_LOG_HEADER)?;
        }
        for sample in samples {
            let response_time = sample
                .response_time
                .map(|v| v.to_string())
                .unwrap_or_default();
            writeln!(writer, "{},{}", sample.timestamp.to_rfc3339(), response_time)?;
        }
        writer.flush()
    };
    write_all(&mut writer).map_err(|e| StorageError::write_failed(path, e))?;

    debug!(
        target: "latency::storage",
        path = %path.display(),
        appended = samples.len(),
        "Sample log updated"
    );
    Ok(samples.len())
}

// ============================================================================
// SECTION 11: TRAINING PIPELINE
// ============================================================================

/// Fit scaler and cluster model on historical samples.
///
/// Failed probes are dropped first; at least `MIN_VALID_SAMPLES` must remain.
pub fn train(samples: &[Sample], config: &ClusteringConfig) -> LatencyResult<ModelArtifact> {
    let timer = PerfTimer::with_threshold("train", TRAIN_SLOW_THRESHOLD_MS);

    let filtered = filter_valid_samples(samples);
    ensure_min_samples(filtered.values.len())?;

    let scaler = ScalerParams::fit(&filtered.values)?;
    let scaled = scaler.transform_all(&filtered.values);
    let model = ClusterModel::fit(&scaled, &scaler, config)?;
    let artifact = ModelArtifact::new(scaler, model, filtered.values.len());

    let (mapping, low_confidence) = resolve_labels_lenient(artifact.model.centroids());
    let centroids = artifact.labeled_centroids(&mapping);
    info!(
        target: "latency::train",
        model_id = %artifact.model_id,
        samples = artifact.sample_count,
        skipped = filtered.missing + filtered.rejected,
        mean_ms = scaler.mean(),
        std_ms = scaler.std(),
        fast_ms = centroids[0].x,
        medium_ms = centroids[1].x,
        slow_ms = centroids[2].x,
        iterations = artifact.model.iterations(),
        low_confidence,
        "Model trained"
    );

    timer.stop();
    Ok(artifact)
}

// ============================================================================
// SECTION 12: INFERENCE PIPELINE
// ============================================================================

/// A classified sample. `y` is plot jitter with no meaning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabeledPoint {
    pub x: f64,
    pub y: f64,
    pub cluster: Label,
}

/// A centroid marker for plotting; `y` is always `CENTROID_DISPLAY_Y`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabeledCentroid {
    pub x: f64,
    pub y: f64,
    pub cluster: Label,
}

/// Output of one classified batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub points: Vec<LabeledPoint>,
    /// One entry per cluster, ordered Fast, Medium, Slow
    pub centroids: Vec<LabeledCentroid>,
    /// Set when tied centroids had to be ordered by index
    #[serde(default)]
    pub low_confidence: bool,
    /// Artifact that produced this result
    pub model_id: Uuid,
}

impl ClassificationResult {
    pub fn count(&self, label: Label) -> usize {
        self.points.iter().filter(|p| p.cluster == label).count()
    }
}

/// Classify a batch against a persisted model, with thread-local jitter.
pub fn classify_batch(
    batch: &[Sample],
    artifact: &ModelArtifact,
) -> LatencyResult<ClassificationResult> {
    classify_batch_with_rng(batch, artifact, &mut rand::thread_rng())
}

/// Classify a batch; `rng` only drives the display jitter.
///
/// Labels are resolved once for the whole batch so every point and centroid
/// uses the same ordering. The model is never re-fitted here.
pub fn classify_batch_with_rng<R: Rng>(
    batch: &[Sample],
    artifact: &ModelArtifact,
    rng: &mut R,
) -> LatencyResult<ClassificationResult> {
    let timer = PerfTimer::with_threshold("classify_batch", CLASSIFY_SLOW_THRESHOLD_MS);

    let filtered = filter_valid_samples(batch);
    ensure_min_samples(filtered.values.len())?;

    let (mapping, low_confidence) = resolve_labels_lenient(artifact.model.centroids());

    let points: Vec<LabeledPoint> = filtered
        .values
        .iter()
        .map(|&x| {
            let cluster = artifact.model.predict(artifact.scaler.transform(x));
            LabeledPoint {
                x,
                y: rng.gen_range(-JITTER_HALF_WIDTH..JITTER_HALF_WIDTH),
                cluster: mapping.label_of(cluster),
            }
        })
        .collect();

    let result = ClassificationResult {
        points,
        centroids: artifact.labeled_centroids(&mapping),
        low_confidence,
        model_id: artifact.model_id,
    };

    debug!(
        target: "latency::classify",
        model_id = %artifact.model_id,
        batch = batch.len(),
        valid = result.points.len(),
        missing = filtered.missing,
        fast = result.count(Label::Fast),
        medium = result.count(Label::Medium),
        slow = result.count(Label::Slow),
        low_confidence,
        "Batch classified"
    );

    timer.stop();
    Ok(result)
}

// ============================================================================
// SECTION 13: MODEL STORE
// ============================================================================
// Single-writer / many-reader holder of the current artifact. Readers take
// an Arc snapshot per batch; retraining builds a new artifact off to the side
// and publishes it with one atomic swap.
// ============================================================================

/// Injectable holder for the active model.
#[derive(Debug, Default)]
pub struct ModelStore {
    current: ArcSwapOption<ModelArtifact>,
    path: Option<PathBuf>,
    writer: Mutex<()>,
}

impl ModelStore {
    /// An empty, memory-only store
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty store that persists retrained models to `path`
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// A memory-only store holding `artifact`
    pub fn with_artifact(artifact: ModelArtifact) -> Self {
        let store = Self::new();
        store.current.store(Some(Arc::new(artifact)));
        store
    }

    /// Store bound to `path`, loading the artifact there if it is usable.
    ///
    /// A missing or corrupt artifact leaves the store empty; classification
    /// then fails with `ModelNotLoaded` instead of the process failing here.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let store = Self::at_path(path);
        if let Err(err) = store.reload() {
            warn!(target: "latency::store", error = %err, "Starting without a model");
        }
        store
    }

    /// Re-read the artifact from disk and publish it.
    pub fn reload(&self) -> LatencyResult<Arc<ModelArtifact>> {
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| LatencyError::model_not_loaded("store has no artifact path"))?;

        // Held across the read so a concurrent retrain cannot be overwritten
        // by an older file.
        let _guard = self.writer.lock();
        let artifact = ModelArtifact::load(path).map_err(|err| {
            LatencyError::model_not_loaded(format!("{}: {}", path.display(), err))
        })?;

        Ok(self.publish(artifact))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_loaded(&self) -> bool {
        self.current.load().is_some()
    }

    /// The current artifact, shared read-only.
    pub fn snapshot(&self) -> LatencyResult<Arc<ModelArtifact>> {
        self.current.load_full().ok_or_else(|| {
            let reason = match &self.path {
                Some(path) => format!("no usable model at {}", path.display()),
                None => "no model has been trained".to_string(),
            };
            LatencyError::model_not_loaded(reason)
        })
    }

    /// Publish `artifact` in place of the current one.
    pub fn replace(&self, artifact: ModelArtifact) -> Arc<ModelArtifact> {
        let _guard = self.writer.lock();
        self.publish(artifact)
    }

    /// Train on `samples`, persist (if bound to a path), then publish.
    ///
    /// On any failure the previously published model stays in place.
    pub fn retrain(
        &self,
        samples: &[Sample],
        config: &ClusteringConfig,
    ) -> LatencyResult<Arc<ModelArtifact>> {
        let _guard = self.writer.lock();
        let artifact = train(samples, config)?;
        if let Some(path) = &self.path {
            artifact.save(path)?;
        }
        Ok(self.publish(artifact))
    }

    /// Classify a batch against the current snapshot.
    pub fn classify(&self, batch: &[Sample]) -> LatencyResult<ClassificationResult> {
        let artifact = self.snapshot()?;
        classify_batch(batch, &artifact)
    }

    fn publish(&self, artifact: ModelArtifact) -> Arc<ModelArtifact> {
        let artifact = Arc::new(artifact);
        let previous = self.current.swap(Some(Arc::clone(&artifact)));
        info!(
            target: "latency::store",
            model_id = %artifact.model_id,
            replaced = ?previous.map(|p| p.model_id),
            "Model published"
        );
        artifact
    }
}

// ============================================================================
// SECTION 14: LATENCY PROBES
// ============================================================================
// Sample producers. The engine only consumes `Sample`s; this is the thin HTTP
// collaborator the CLI uses to gather them.
// ============================================================================

// ----------------------------------------------------------------------------
// 14.1 Probe Trait
// ----------------------------------------------------------------------------

/// Something that can measure one round trip to a target.
#[async_trait]
pub trait LatencyProbe: Send + Sync {
    /// Target description for logs
    fn target(&self) -> &str;

    /// Measure once. Failures are recorded as samples without a response time.
    async fn probe(&self) -> Sample;
}

/// Run `probe` `count` times, one probe per `every`.
pub async fn collect_samples<P>(probe: &P, count: usize, every: Duration) -> Vec<Sample>
where
    P: LatencyProbe + ?Sized,
{
    let mut ticker = interval(every.max(Duration::from_millis(1)));
    let mut samples = Vec::with_capacity(count);

    for _ in 0..count {
        ticker.tick().await;
        samples.push(probe.probe().await);
    }

    let failed = samples.iter().filter(|s| s.response_time.is_none()).count();
    info!(
        target: "latency::probe",
        target_url = probe.target(),
        collected = samples.len(),
        failed,
        "Probe session complete"
    );

    samples
}

// ----------------------------------------------------------------------------
// 14.2 HTTP Probe
// ----------------------------------------------------------------------------

/// Prefix `https://` when the URL has no http(s) scheme.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

/// Elapsed time in milliseconds, rounded to two decimals.
fn round_millis(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 1000.0 * 100.0).round() / 100.0
}

/// Times a full GET (headers and body) against one URL.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: HttpClient,
    url: String,
}

impl HttpProbe {
    pub fn new(url: &str, timeout: Duration) -> LatencyResult<Self> {
        let client = HttpClient::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(MAX_PROBE_REDIRECTS))
            .build()
            .map_err(|e| LatencyError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: normalize_url(url),
        })
    }

    pub fn from_config(url: &str, config: &ProbeConfig) -> LatencyResult<Self> {
        Self::new(url, Duration::from_secs(config.timeout_secs))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl LatencyProbe for HttpProbe {
    fn target(&self) -> &str {
        &self.url
    }

    async fn probe(&self) -> Sample {
        let timestamp = Utc::now();
        let start = Instant::now();

        let outcome = match self.client.get(&self.url).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                response.bytes().await.map(|_| status)
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(status) => {
                let elapsed_ms = round_millis(start.elapsed());
                trace!(
                    target: "latency::probe",
                    url = %self.url,
                    status,
                    elapsed_ms,
                    "Probe succeeded"
                );
                Sample::new(timestamp, Some(elapsed_ms))
            }
            Err(e) => {
                warn!(
                    target: "latency::probe",
                    url = %self.url,
                    timeout = e.is_timeout(),
                    error = %e,
                    "Probe failed"
                );
                Sample::new(timestamp, None)
            }
        }
    }
}

// ============================================================================
// SECTION 15: CLI & COMMAND LINE INTERFACE
// ============================================================================

// ----------------------------------------------------------------------------
// 15.1 CLI Argument Parser
// ----------------------------------------------------------------------------

/// Latency Band Engine CLI
#[derive(Parser, Debug)]
#[command(
    name = "latency",
    author = "AIOps Team",
    version,
    about = "Probe an endpoint and classify its latency into Fast/Medium/Slow bands",
    long_about = "Collects round-trip latency samples, trains a seeded three-cluster \
                  k-means model on them, and labels fresh batches as Fast, Medium \
                  or Slow for plotting."
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "latency.toml", env = "LATENCY_CONFIG")]
    pub config: PathBuf,

    /// Log level override
    #[arg(short, long, env = "LATENCY_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a model from the sample log and persist it
    Train {
        /// Sample log to train on (default: storage.sample_log_path)
        #[arg(long)]
        data: Option<PathBuf>,

        /// Where to write the model (default: storage.model_path)
        #[arg(short, long)]
        model: Option<PathBuf>,
    },

    /// Classify a JSON batch of samples with the persisted model
    Classify {
        /// JSON file with `[{"timestamp": ..., "response_time": ...}]` or `{"data": [...]}`; `-` reads stdin
        input: PathBuf,

        /// Model artifact (default: storage.model_path)
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// Append the batch's valid samples to the sample log
        #[arg(long)]
        record: bool,

        /// Print compact JSON instead of pretty JSON
        #[arg(long)]
        compact: bool,
    },

    /// Probe a URL and append the samples to the sample log
    Probe {
        /// Target URL; `https://` is assumed when no scheme is given
        url: Option<String>,

        /// Number of probes (default: probe.count)
        #[arg(short = 'n', long)]
        count: Option<usize>,

        /// Delay between probes in milliseconds (default: probe.interval_ms)
        #[arg(short, long)]
        interval_ms: Option<u64>,

        /// Classify the collected batch with the persisted model
        #[arg(long)]
        classify: bool,
    },

    /// Show the persisted model
    Inspect {
        /// Model artifact (default: storage.model_path)
        #[arg(short, long)]
        model: Option<PathBuf>,
    },

    /// Validate configuration file
    Validate {
        /// Show full parsed configuration
        #[arg(short, long)]
        verbose: bool,
    },

    /// Generate default configuration file
    GenerateConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show version and build info
    Version,
}

/// Input accepted by `classify`: a bare array or the collector's `{data: [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BatchInput {
    Samples(Vec<Sample>),
    Wrapped { data: Vec<Sample> },
}

impl BatchInput {
    fn into_samples(self) -> Vec<Sample> {
        match self {
            BatchInput::Samples(samples) | BatchInput::Wrapped { data: samples } => samples,
        }
    }
}

/// Parse a classification batch from JSON text.
pub fn parse_batch_json(text: &str) -> LatencyResult<Vec<Sample>> {
    serde_json::from_str::<BatchInput>(text)
        .map(BatchInput::into_samples)
        .map_err(|e| LatencyError::InvalidInput {
            message: format!("expected a JSON array of samples or {{\"data\": [...]}}: {}", e),
        })
}

fn read_batch(input: &Path) -> LatencyResult<Vec<Sample>> {
    let mut text = String::new();
    if input.as_os_str() == "-" {
        io::stdin().read_to_string(&mut text)?;
    } else {
        text = fs::read_to_string(input).map_err(|e| StorageError::read_failed(input, e))?;
    }
    parse_batch_json(&text)
}

// ----------------------------------------------------------------------------
// 15.2 CLI Handler Functions
// ----------------------------------------------------------------------------

fn print_result(result: &ClassificationResult, compact: bool) -> LatencyResult<()> {
    let rendered = if compact {
        serde_json::to_string(result)
    } else {
        serde_json::to_string_pretty(result)
    }
    .map_err(|e| LatencyError::Internal(format!("Failed to render result: {}", e)))?;
    println!("{}", rendered);
    Ok(())
}

/// Handle the train subcommand
fn handle_train(config: &EngineConfig, data: &Path, model_path: &Path) -> LatencyResult<()> {
    let samples = read_sample_log(data)?;
    let store = ModelStore::at_path(model_path);
    let artifact = store.retrain(&samples, &config.model)?;

    let (mapping, low_confidence) = resolve_labels_lenient(artifact.model.centroids());
    println!("✅ Model trained on {} samples from {}", artifact.sample_count, data.display());
    println!("  • Model id: {}", artifact.model_id);
    println!(
        "  • Scaler: mean={:.2}ms std={:.2}ms",
        artifact.scaler.mean(),
        artifact.scaler.std()
    );
    for centroid in artifact.labeled_centroids(&mapping) {
        println!("  • {:<6} ≈ {:.2}ms", centroid.cluster, centroid.x);
    }
    if low_confidence {
        println!("⚠️  Two centroids coincide; collect more varied samples and retrain.");
    }
    println!("  • Saved to: {}", model_path.display());
    Ok(())
}

/// Handle the classify subcommand
fn handle_classify(
    config: &EngineConfig,
    input: &Path,
    model_path: &Path,
    record: bool,
    compact: bool,
) -> LatencyResult<()> {
    let store = ModelStore::open(model_path);
    let batch = read_batch(input)?;
    let result = store.classify(&batch)?;

    if record {
        let valid: Vec<Sample> = batch
            .iter()
            .filter(|s| s.valid_response_time().is_some())
            .copied()
            .collect();
        append_sample_log(&config.storage.sample_log_path, &valid)?;
    }

    print_result(&result, compact)
}

/// Handle the probe subcommand
async fn handle_probe(
    config: &EngineConfig,
    url: &str,
    count: usize,
    interval_ms: u64,
    classify: bool,
) -> LatencyResult<()> {
    if count == 0 {
        return Err(ConfigError::invalid_value("count", "must be at least 1").into());
    }
    if interval_ms < MIN_PROBE_INTERVAL_MS {
        return Err(ConfigError::invalid_value(
            "interval_ms",
            format!("must be at least {}ms", MIN_PROBE_INTERVAL_MS),
        )
        .into());
    }

    let probe = HttpProbe::from_config(url, &config.probe)?;
    eprintln!("📡 Probing {} ({} samples, every {}ms)...", probe.url(), count, interval_ms);

    let samples = collect_samples(&probe, count, Duration::from_millis(interval_ms)).await;
    let failed = samples.iter().filter(|s| s.response_time.is_none()).count();
    append_sample_log(&config.storage.sample_log_path, &samples)?;

    eprintln!(
        "✅ Collected {} samples ({} failed), appended to {}",
        samples.len(),
        failed,
        config.storage.sample_log_path.display()
    );

    if classify {
        let store = ModelStore::open(&config.storage.model_path);
        let result = store.classify(&samples)?;
        print_result(&result, false)?;
    }
    Ok(())
}

/// Handle the inspect subcommand
fn handle_inspect(model_path: &Path) -> LatencyResult<()> {
    let store = ModelStore::open(model_path);
    let artifact = store.snapshot()?;
    let (mapping, low_confidence) = resolve_labels_lenient(artifact.model.centroids());

    println!("🧠 Model {}", artifact.model_id);
    println!("  • Trained at: {}", artifact.trained_at.to_rfc3339());
    println!("  • Samples: {}", artifact.sample_count);
    println!(
        "  • Scaler: mean={:.4}ms std={:.4}ms",
        artifact.scaler.mean(),
        artifact.scaler.std()
    );
    println!(
        "  • Fit: {} iterations, inertia {:.6}",
        artifact.model.iterations(),
        artifact.model.inertia()
    );
    println!("  • Bands:");
    for label in Label::ALL {
        let cluster = mapping.cluster_of(label);
        let centroid = artifact.model.centroids()[cluster];
        println!(
            "    - {:<6} cluster {} at {:.2}ms (scaled {:+.4})",
            label, cluster, centroid.original_value, centroid.scaled_value
        );
    }
    if low_confidence {
        println!("⚠️  Centroid values are tied; labels were ordered by cluster index.");
    }
    Ok(())
}

/// Handle the validate subcommand
fn handle_validate(config_path: &Path, verbose: bool) -> LatencyResult<()> {
    println!("Validating configuration file: {}", config_path.display());

    match EngineConfig::load(config_path) {
        Ok(config) => {
            println!("✅ Configuration is valid!");

            if verbose {
                println!("\n📋 Parsed configuration:");
                println!("{}", "=".repeat(60));
                match toml::to_string_pretty(&config) {
                    Ok(s) => println!("{}", s),
                    Err(e) => println!("Failed to serialize: {}", e),
                }
            }

            println!("\n📊 Configuration Summary:");
            println!("  • Model path: {}", config.storage.model_path.display());
            println!("  • Sample log: {}", config.storage.sample_log_path.display());
            println!(
                "  • k-means: seed={} restarts={} max_iterations={}",
                config.model.seed, config.model.restarts, config.model.max_iterations
            );
            println!(
                "  • Probe: {} samples every {}ms, timeout {}s",
                config.probe.count, config.probe.interval_ms, config.probe.timeout_secs
            );
            Ok(())
        }
        Err(e) => {
            println!("❌ Configuration validation failed!");
            Err(LatencyError::Config(e))
        }
    }
}

/// Handle the generate-config subcommand
fn handle_generate_config(output: Option<&Path>) -> LatencyResult<()> {
    let config_str = EngineConfig::generate_default_config();

    match output {
        Some(path) => {
            fs::write(path, &config_str)?;
            println!("✅ Default configuration written to: {}", path.display());
        }
        None => println!("{}", config_str),
    }

    Ok(())
}

/// Handle the version subcommand
fn handle_version() {
    println!("🧠 {} v{}", ENGINE_FULL_NAME, ENGINE_VERSION);
    println!();
    println!("Build Information:");
    println!("  • Target: {}", std::env::consts::ARCH);
    println!("  • OS: {}", std::env::consts::OS);
    println!();
    println!("Model:");
    println!("  • Clusters: {} (Fast, Medium, Slow)", CLUSTER_COUNT);
    println!("  • Minimum valid samples: {}", MIN_VALID_SAMPLES);
    println!("  • Default seed: {}", DEFAULT_KMEANS_SEED);
    println!();
    println!("License: MIT");
}

fn report_failure(err: &LatencyError) {
    error!(
        target: "latency::cli",
        category = err.category(),
        recoverable = err.is_recoverable(),
        "{}",
        err
    );
    eprintln!("❌ {}", err);
    eprintln!("   hint: {}", err.recovery_hint());
}

async fn dispatch(command: Commands, config: &EngineConfig) -> LatencyResult<()> {
    let model_or_default =
        |model: Option<PathBuf>| model.unwrap_or_else(|| config.storage.model_path.clone());

    match command {
        Commands::Train { data, model } => {
            let data = data.unwrap_or_else(|| config.storage.sample_log_path.clone());
            handle_train(config, &data, &model_or_default(model))
        }
        Commands::Classify {
            input,
            model,
            record,
            compact,
        } => handle_classify(config, &input, &model_or_default(model), record, compact),
        Commands::Probe {
            url,
            count,
            interval_ms,
            classify,
        } => {
            let url = url.or_else(|| config.probe.url.clone()).ok_or_else(|| {
                ConfigError::invalid_value("probe.url", "no URL given on the command line or in config")
            })?;
            handle_probe(
                config,
                &url,
                count.unwrap_or(config.probe.count),
                interval_ms.unwrap_or(config.probe.interval_ms),
                classify,
            )
            .await
        }
        Commands::Inspect { model } => handle_inspect(&model_or_default(model)),
        Commands::Validate { .. } | Commands::GenerateConfig { .. } | Commands::Version => Ok(()),
    }
}

// ============================================================================
// SECTION 16: MAIN ENTRY POINT
// ============================================================================

#[tokio::main]
async fn main() -> AnyhowResult<()> {
    let cli = Cli::parse();

    // Subcommands that don't need logging or a loaded config
    match &cli.command {
        Commands::Version => {
            handle_version();
            return Ok(());
        }
        Commands::GenerateConfig { output } => {
            handle_generate_config(output.as_deref())?;
            return Ok(());
        }
        Commands::Validate { verbose } => {
            handle_validate(&cli.config, *verbose)?;
            return Ok(());
        }
        _ => {}
    }

    let config_found = cli.config.exists();
    let config = if config_found {
        EngineConfig::load(&cli.config)
            .with_context(|| format!("Failed to load config from {}", cli.config.display()))?
    } else {
        EngineConfig::default()
    };

    let mut logging_config = config.logging.clone();
    if let Some(level) = &cli.log_level {
        logging_config.level = level.clone();
    }
    if cli.debug {
        logging_config.level = "debug".into();
    }
    init_logging(&logging_config)?;

    if !config_found {
        debug!(
            target: "latency::init",
            path = %cli.config.display(),
            "Config file not found, using defaults"
        );
    }

    if let Err(err) = dispatch(cli.command, &config).await {
        report_failure(&err);
        std::process::exit(1);
    }

    Ok(())
}

// ============================================================================
// SECTION 17: TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn unit_scaler() -> ScalerParams {
        ScalerParams::new(0.0, 1.0).unwrap()
    }

    fn model_from(scaled: [f64; CLUSTER_COUNT]) -> ClusterModel {
        ClusterModel::from_scaled_centroids(scaled, &unit_scaler()).unwrap()
    }

    #[test]
    fn test_label_order_and_display() {
        assert!(Label::Fast < Label::Medium);
        assert!(Label::Medium < Label::Slow);
        assert_eq!(Label::ALL, [Label::Fast, Label::Medium, Label::Slow]);
        assert_eq!(format!("{:<6}|", Label::Fast), "Fast  |");
        assert_eq!(serde_json::to_string(&Label::Slow).unwrap(), "\"Slow\"");
    }

    #[test]
    fn test_filter_drops_missing_and_invalid() {
        let samples = vec![
            Sample::success(10.0),
            Sample::failure(),
            Sample::success(f64::NAN),
            Sample::success(-3.0),
            Sample::success(f64::INFINITY),
            Sample::success(0.0),
        ];

        let filtered = filter_valid_samples(&samples);

        assert_eq!(filtered.values, vec![10.0, 0.0]);
        assert_eq!(filtered.missing, 1);
        assert_eq!(filtered.rejected, 3);
    }

    #[test]
    fn test_scaler_fit_population_std() {
        let scaler = ScalerParams::fit(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert_eq!(scaler.mean(), 5.0);
        assert_eq!(scaler.std(), 2.0);
        assert_eq!(scaler.transform(9.0), 2.0);
        assert_eq!(scaler.inverse_transform(-1.5), 2.0);
    }

    #[test]
    fn test_scaler_rejects_bad_input() {
        assert!(matches!(
            ScalerParams::fit(&[]),
            Err(LatencyError::InsufficientData { required: 1, found: 0 })
        ));
        assert!(matches!(
            ScalerParams::fit(&[5.0, 5.0, 5.0]),
            Err(LatencyError::DegenerateData { .. })
        ));
        assert!(matches!(
            ScalerParams::fit(&[1.0, f64::NAN]),
            Err(LatencyError::InvalidSample { .. })
        ));
        assert!(ScalerParams::new(1.0, 0.0).is_err());
        assert!(ScalerParams::new(1.0, -2.0).is_err());
        assert!(ScalerParams::new(f64::NAN, 1.0).is_err());
        assert!(ScalerParams::new(1.0, f64::INFINITY).is_err());
    }

    #[test]
    fn test_predict_tie_goes_to_lowest_index() {
        let model = model_from([-1.0, 1.0, 3.0]);
        assert_eq!(model.predict(0.0), 0);
        assert_eq!(model.predict(2.0), 1);
        assert_eq!(model.predict(2.1), 2);
        assert_eq!(model.predict(-50.0), 0);
    }

    #[test]
    fn test_labels_follow_value_not_index() {
        let model = model_from([2.0, -1.0, 0.0]);
        let mapping = resolve_labels(model.centroids()).unwrap();

        assert_eq!(mapping.as_array(), [Label::Slow, Label::Fast, Label::Medium]);
        assert_eq!(mapping.cluster_of(Label::Fast), 1);
        assert_eq!(mapping.cluster_of(Label::Medium), 2);
        assert_eq!(mapping.cluster_of(Label::Slow), 0);
    }

    #[test]
    fn test_label_lookups_are_inverse() {
        let strict = resolve_labels(model_from([2.0, -1.0, 0.0]).centroids()).unwrap();
        let (lenient, _) = resolve_labels_lenient(model_from([0.5, -1.0, 0.5]).centroids());

        for mapping in [strict, lenient] {
            for label in Label::ALL {
                assert_eq!(mapping.label_of(mapping.cluster_of(label)), label);
            }
            for cluster in 0..CLUSTER_COUNT {
                assert_eq!(mapping.cluster_of(mapping.label_of(cluster)), cluster);
            }
        }

        assert_eq!(Label::ALL.map(|l| l.rank()), [0, 1, 2]);
    }

    #[test]
    fn test_tied_centroids_are_ambiguous() {
        let model = model_from([0.5, -1.0, 0.5]);

        match resolve_labels(model.centroids()) {
            Err(LatencyError::AmbiguousOrdering { first, second, value }) => {
                assert_eq!((first, second), (0, 2));
                assert_eq!(value, 0.5);
            }
            other => panic!("expected AmbiguousOrdering, got {:?}", other),
        }

        let (mapping, low_confidence) = resolve_labels_lenient(model.centroids());
        assert!(low_confidence);
        assert_eq!(mapping.as_array(), [Label::Medium, Label::Fast, Label::Slow]);
        assert_eq!(model.tied_centroids(), Some((0, 2)));
    }

    #[test]
    fn test_centroid_consistency_check() {
        let scaler = ScalerParams::new(100.0, 10.0).unwrap();
        let model = ClusterModel::from_scaled_centroids([-1.0, 0.0, 1.0], &scaler).unwrap();
        assert!(model.validate_against(&scaler).is_ok());

        let other = ScalerParams::new(50.0, 10.0).unwrap();
        assert!(model.validate_against(&other).is_err());
    }

    #[test]
    fn test_kmeans_separates_obvious_groups() {
        let values = [-2.0, -2.1, -1.9, 0.0, 0.1, -0.1, 2.0, 2.1, 1.9];
        let model = ClusterModel::fit(&values, &unit_scaler(), &ClusteringConfig::default()).unwrap();

        let mut centers: Vec<f64> = model.scaled_centroids().to_vec();
        centers.sort_by_key(|c| OrderedFloat(*c));
        assert!((centers[0] + 2.0).abs() < 1e-9);
        assert!(centers[1].abs() < 1e-9);
        assert!((centers[2] - 2.0).abs() < 1e-9);
        assert!(model.iterations() >= 1);
        assert!(model.inertia() < 0.07);
    }

    #[test]
    fn test_kmeans_rejects_non_finite() {
        let result = ClusterModel::fit(
            &[0.0, 1.0, f64::NAN],
            &unit_scaler(),
            &ClusteringConfig::default(),
        );
        assert!(matches!(result, Err(LatencyError::InvalidSample { .. })));
    }

    #[test]
    fn test_error_hints() {
        let err = LatencyError::InsufficientData { required: 3, found: 2 };
        assert!(err.is_recoverable());
        assert_eq!(err.category(), "insufficient_data");
        assert_eq!(err.recovery_hint(), RecoveryHint::CollectMoreSamples);

        let err = LatencyError::from(StorageError::DataCorruption {
            message: "bad".into(),
        });
        assert!(!err.is_recoverable());
        assert_eq!(err.recovery_hint(), RecoveryHint::Retrain);

        let err = LatencyError::model_not_loaded("missing");
        assert_eq!(err.to_string(), "Model not loaded: missing");
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("example.com"), "https://example.com");
        assert_eq!(normalize_url(" http://example.com "), "http://example.com");
        assert_eq!(normalize_url("https://example.com/x"), "https://example.com/x");
    }

    #[test]
    fn test_round_millis() {
        assert_eq!(round_millis(Duration::from_micros(12_346)), 12.35);
        assert_eq!(round_millis(Duration::from_millis(7)), 7.0);
    }

    proptest! {
        #[test]
        fn prop_scaler_round_trip(
            mean in -1.0e3f64..1.0e3,
            std in 0.01f64..1.0e3,
            value in -1.0e4f64..1.0e4,
        ) {
            let scaler = ScalerParams::new(mean, std).unwrap();
            let back = scaler.inverse_transform(scaler.transform(value));
            prop_assert!((back - value).abs() <= 1e-6 * value.abs().max(1.0));
        }

        #[test]
        fn prop_labels_ordered_by_value(
            a in -1.0e3f64..1.0e3,
            b in -1.0e3f64..1.0e3,
            c in -1.0e3f64..1.0e3,
        ) {
            prop_assume!(a != b && b != c && a != c);
            let model = model_from([a, b, c]);
            let mapping = resolve_labels(model.centroids()).unwrap();
            let value_of = |label| model.centroids()[mapping.cluster_of(label)].original_value;

            prop_assert!(value_of(Label::Fast) < value_of(Label::Medium));
            prop_assert!(value_of(Label::Medium) < value_of(Label::Slow));
        }

        #[test]
        fn prop_predict_is_deterministic(
            a in -10.0f64..10.0,
            b in -10.0f64..10.0,
            c in -10.0f64..10.0,
            value in -20.0f64..20.0,
        ) {
            let model = model_from([a, b, c]);
            let first = model.predict(value);
            prop_assert!(first < CLUSTER_COUNT);
            prop_assert_eq!(first, model.predict(value));
        }
    }
}

#[cfg(test)]
mod pipeline_tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::rngs::StdRng;
    use rstest::rstest;

    const TRAINING_SET: [f64; 9] = [10.0, 12.0, 11.0, 100.0, 105.0, 98.0, 500.0, 510.0, 495.0];

    fn samples(values: &[Option<f64>]) -> Vec<Sample> {
        values.iter().map(|v| Sample::new(Utc::now(), *v)).collect()
    }

    fn trained() -> ModelArtifact {
        let data: Vec<Option<f64>> = TRAINING_SET.iter().copied().map(Some).collect();
        train(&samples(&data), &ClusteringConfig::default()).unwrap()
    }

    #[test]
    fn test_end_to_end_train() {
        let artifact = trained();

        assert_eq!(artifact.sample_count, 9);
        assert!((artifact.scaler.mean() - 1841.0 / 9.0).abs() < 1e-9);

        let mapping = artifact.label_mapping().unwrap();
        let expected = [(Label::Fast, 11.0), (Label::Medium, 101.0), (Label::Slow, 1505.0 / 3.0)];
        for (label, value) in expected {
            let centroid = artifact.model.centroids()[mapping.cluster_of(label)];
            assert!(
                (centroid.original_value - value).abs() < 1e-6,
                "{} centroid at {} instead of {}",
                label,
                centroid.original_value,
                value
            );
        }
    }

    #[test]
    fn test_end_to_end_classify() {
        let artifact = trained();
        let batch = samples(&[Some(9.0), Some(103.0), Some(520.0), None]);
        let mut rng = StdRng::seed_from_u64(7);

        let result = classify_batch_with_rng(&batch, &artifact, &mut rng).unwrap();

        let labels: Vec<Label> = result.points.iter().map(|p| p.cluster).collect();
        assert_eq!(labels, vec![Label::Fast, Label::Medium, Label::Slow]);
        let xs: Vec<f64> = result.points.iter().map(|p| p.x).collect();
        assert_eq!(xs, vec![9.0, 103.0, 520.0]);
        assert!(result
            .points
            .iter()
            .all(|p| p.y >= -JITTER_HALF_WIDTH && p.y < JITTER_HALF_WIDTH));

        assert_eq!(result.centroids.len(), CLUSTER_COUNT);
        let centroid_labels: Vec<Label> = result.centroids.iter().map(|c| c.cluster).collect();
        assert_eq!(centroid_labels, Label::ALL.to_vec());
        assert!(result.centroids.iter().all(|c| c.y == CENTROID_DISPLAY_Y));
        assert!(result.centroids[0].x < result.centroids[1].x);
        assert!(result.centroids[1].x < result.centroids[2].x);
        assert!(!result.low_confidence);
        assert_eq!(result.model_id, artifact.model_id);
    }

    #[test]
    fn test_classify_jitter_is_reproducible() {
        let artifact = trained();
        let batch = samples(&[Some(9.0), Some(103.0), Some(520.0)]);

        let first = classify_batch_with_rng(&batch, &artifact, &mut StdRng::seed_from_u64(1)).unwrap();
        let second = classify_batch_with_rng(&batch, &artifact, &mut StdRng::seed_from_u64(1)).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_classification_json_shape() {
        let artifact = trained();
        let batch = samples(&[Some(9.0), Some(103.0), Some(520.0)]);
        let result = classify_batch_with_rng(&batch, &artifact, &mut StdRng::seed_from_u64(3)).unwrap();

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["points"][0]["cluster"], "Fast");
        assert!(json["points"][0]["x"].is_number());
        assert!(json["points"][0]["y"].is_number());
        assert_eq!(json["centroids"][2]["cluster"], "Slow");
        assert_eq!(json["centroids"][2]["y"], 0.0);
    }

    #[rstest]
    #[case::two_valid(vec![Some(10.0), Some(20.0)], false)]
    #[case::three_valid(vec![Some(10.0), Some(20.0), Some(30.0)], true)]
    #[case::nulls_filtered_first(vec![Some(10.0), None, Some(20.0), None], false)]
    #[case::nan_rejected(vec![Some(10.0), Some(f64::NAN), Some(20.0)], false)]
    #[case::nulls_around_three(vec![None, Some(1.0), Some(2.0), None, Some(3.0)], true)]
    fn test_training_minimum(#[case] values: Vec<Option<f64>>, #[case] succeeds: bool) {
        let result = train(&samples(&values), &ClusteringConfig::default());
        match result {
            Ok(artifact) => {
                assert!(succeeds);
                assert_eq!(artifact.sample_count, MIN_VALID_SAMPLES);
            }
            Err(err) => {
                assert!(!succeeds);
                assert!(matches!(
                    err,
                    LatencyError::InsufficientData { required: 3, found: 2 }
                ));
            }
        }
    }

    #[rstest]
    #[case::two_valid(vec![Some(10.0), Some(20.0)], false)]
    #[case::three_valid(vec![Some(10.0), Some(20.0), Some(30.0)], true)]
    #[case::nulls_filtered_first(vec![Some(10.0), None, None, Some(20.0)], false)]
    #[case::negative_rejected(vec![Some(10.0), Some(-1.0), Some(20.0)], false)]
    fn test_classify_minimum(#[case] values: Vec<Option<f64>>, #[case] succeeds: bool) {
        let artifact = trained();
        let result = classify_batch(&samples(&values), &artifact);
        match result {
            Ok(result) => {
                assert!(succeeds);
                assert_eq!(result.points.len(), 3);
            }
            Err(err) => {
                assert!(!succeeds);
                assert!(matches!(
                    err,
                    LatencyError::InsufficientData { required: 3, found: 2 }
                ));
            }
        }
    }

    #[test]
    fn test_training_identical_values_is_degenerate() {
        let result = train(
            &samples(&[Some(5.0), Some(5.0), Some(5.0)]),
            &ClusteringConfig::default(),
        );
        assert!(matches!(result, Err(LatencyError::DegenerateData { .. })));
    }

    #[test]
    fn test_two_distinct_values_give_low_confidence() {
        let data = samples(&[Some(1.0), Some(1.0), Some(1.0), Some(2.0), Some(2.0), Some(2.0)]);
        let artifact = train(&data, &ClusteringConfig::default()).unwrap();

        assert!(artifact.model.tied_centroids().is_some());
        assert!(matches!(
            artifact.label_mapping(),
            Err(LatencyError::AmbiguousOrdering { .. })
        ));

        let result = classify_batch(&data, &artifact).unwrap();
        assert!(result.low_confidence);
        assert_eq!(result.points.len(), 6);
    }

    #[test]
    fn test_training_is_deterministic() {
        let first = trained();
        let second = trained();

        assert_eq!(first.scaler, second.scaler);
        assert_eq!(first.model, second.model);
        assert_ne!(first.model_id, second.model_id);
    }

    #[test]
    fn test_seed_changes_never_change_labels() {
        let data: Vec<Option<f64>> = TRAINING_SET.iter().copied().map(Some).collect();
        let batch = samples(&[Some(9.0), Some(103.0), Some(520.0)]);

        for seed in [0, 1, 42, 1234] {
            let config = ClusteringConfig::default().with_seed(seed).with_restarts(3);
            let artifact = train(&samples(&data), &config).unwrap();
            let result = classify_batch(&batch, &artifact).unwrap();
            let labels: Vec<Label> = result.points.iter().map(|p| p.cluster).collect();
            assert_eq!(labels, vec![Label::Fast, Label::Medium, Label::Slow]);
        }
    }

    #[test]
    fn test_store_without_model() {
        let store = ModelStore::new();
        assert!(!store.is_loaded());
        assert!(matches!(
            store.classify(&samples(&[Some(1.0), Some(2.0), Some(3.0)])),
            Err(LatencyError::ModelNotLoaded { .. })
        ));
        assert!(matches!(store.reload(), Err(LatencyError::ModelNotLoaded { .. })));
    }

    #[test]
    fn test_store_failed_retrain_keeps_previous_model() {
        let artifact = trained();
        let id = artifact.model_id;
        let store = ModelStore::with_artifact(artifact);

        let result = store.retrain(&samples(&[Some(1.0)]), &ClusteringConfig::default());

        assert!(result.is_err());
        assert_eq!(store.snapshot().unwrap().model_id, id);
    }

    #[test]
    fn test_store_readers_see_whole_models_during_swap() {
        let first = trained();
        let second = trained();
        let ids = [first.model_id, second.model_id];
        let store = ModelStore::with_artifact(first.clone());
        let batch = samples(&[Some(9.0), Some(103.0), Some(520.0)]);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..50 {
                        let result = store.classify(&batch).unwrap();
                        assert!(ids.contains(&result.model_id));
                        assert_eq!(result.points.len(), 3);
                    }
                });
            }
            scope.spawn(|| {
                for i in 0..20 {
                    let next = if i % 2 == 0 { second.clone() } else { first.clone() };
                    store.replace(next);
                }
            });
        });

        assert!(store.is_loaded());
    }

    #[test]
    fn test_batch_json_formats() {
        let bare = r#"[{"timestamp":"2024-01-01T00:00:00Z","response_time":12.5},
                       {"timestamp":"2024-01-01T00:00:01Z","response_time":null}]"#;
        let wrapped = r#"{"data":[{"response_time":3.0},{}]}"#;

        let bare = parse_batch_json(bare).unwrap();
        assert_eq!(bare.len(), 2);
        assert_eq!(bare[0].response_time, Some(12.5));
        assert_eq!(bare[1].response_time, None);

        let wrapped = parse_batch_json(wrapped).unwrap();
        assert_eq!(wrapped.len(), 2);
        assert_eq!(wrapped[0].response_time, Some(3.0));
        assert_eq!(wrapped[1].response_time, None);

        assert!(matches!(
            parse_batch_json("{\"rows\": 1}"),
            Err(LatencyError::InvalidInput { .. })
        ));
    }
}
