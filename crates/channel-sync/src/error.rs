//! Domain error carried across every engine boundary
//!
//! Internal plumbing (storage, config, HTTP) works with `anyhow::Result`.
//! Anything that crosses a component boundary (provider calls, the
//! orchestrator, the mode manager, host commands) is converted into a
//! [`SyncError`] tagged with a stable [`ErrorCode`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result alias for provider and orchestrator operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Prefix shared by provider codes that are always safe to retry
pub const TRANSIENT_PROVIDER_PREFIX: &str = "PROVIDER_TRANSIENT";

/// Stable error codes surfaced to hosts and persisted on failed sync runs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ErrorCode {
    /// Malformed command input, rejected before any state mutation
    Validation,
    RateLimitExceeded,
    ProviderTemporary,
    ProviderTimeout,
    ProviderUnavailable,
    ProviderAuthFailed,
    ProviderRequestFailed,
    ProviderNotConfigured,
    DataNotFound,
    /// Provider answered for a different channel than the one requested
    ContractMismatch,
    RetriesExhausted,
    Persistence,
    Pipeline,
    SyncAlreadyRunning,
    SyncRunNotFound,
    SyncAlreadyCompleted,
    ModeUnavailable,
    FixtureInvalid,
    /// Codes minted by external adapters
    Custom(String),
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::ProviderTemporary => "PROVIDER_TEMPORARY",
            Self::ProviderTimeout => "PROVIDER_TIMEOUT",
            Self::ProviderUnavailable => "PROVIDER_UNAVAILABLE",
            Self::ProviderAuthFailed => "PROVIDER_AUTH_FAILED",
            Self::ProviderRequestFailed => "PROVIDER_REQUEST_FAILED",
            Self::ProviderNotConfigured => "PROVIDER_NOT_CONFIGURED",
            Self::DataNotFound => "DATA_NOT_FOUND",
            Self::ContractMismatch => "PROVIDER_CONTRACT_MISMATCH",
            Self::RetriesExhausted => "RETRIES_EXHAUSTED",
            Self::Persistence => "PERSISTENCE_ERROR",
            Self::Pipeline => "PIPELINE_FAILED",
            Self::SyncAlreadyRunning => "SYNC_ALREADY_RUNNING",
            Self::SyncRunNotFound => "SYNC_RUN_NOT_FOUND",
            Self::SyncAlreadyCompleted => "SYNC_ALREADY_COMPLETED",
            Self::ModeUnavailable => "MODE_UNAVAILABLE",
            Self::FixtureInvalid => "FIXTURE_INVALID",
            Self::Custom(code) => code,
        }
    }

    /// Transient provider failures that the collect stage retries
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimitExceeded
            | Self::ProviderTemporary
            | Self::ProviderTimeout
            | Self::ProviderUnavailable => true,
            Self::Custom(code) => code.starts_with(TRANSIENT_PROVIDER_PREFIX),
            _ => false,
        }
    }

    /// Provider failures that no amount of retrying will fix
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::DataNotFound | Self::ProviderNotConfigured)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> Self {
        code.as_str().to_string()
    }
}

impl From<String> for ErrorCode {
    fn from(code: String) -> Self {
        match code.as_str() {
            "VALIDATION_ERROR" => Self::Validation,
            "RATE_LIMIT_EXCEEDED" => Self::RateLimitExceeded,
            "PROVIDER_TEMPORARY" => Self::ProviderTemporary,
            "PROVIDER_TIMEOUT" => Self::ProviderTimeout,
            "PROVIDER_UNAVAILABLE" => Self::ProviderUnavailable,
            "PROVIDER_AUTH_FAILED" => Self::ProviderAuthFailed,
            "PROVIDER_REQUEST_FAILED" => Self::ProviderRequestFailed,
            "PROVIDER_NOT_CONFIGURED" => Self::ProviderNotConfigured,
            "DATA_NOT_FOUND" => Self::DataNotFound,
            "PROVIDER_CONTRACT_MISMATCH" => Self::ContractMismatch,
            "RETRIES_EXHAUSTED" => Self::RetriesExhausted,
            "PERSISTENCE_ERROR" => Self::Persistence,
            "PIPELINE_FAILED" => Self::Pipeline,
            "SYNC_ALREADY_RUNNING" => Self::SyncAlreadyRunning,
            "SYNC_RUN_NOT_FOUND" => Self::SyncRunNotFound,
            "SYNC_ALREADY_COMPLETED" => Self::SyncAlreadyCompleted,
            "MODE_UNAVAILABLE" => Self::ModeUnavailable,
            "FIXTURE_INVALID" => Self::FixtureInvalid,
            _ => Self::Custom(code),
        }
    }
}

/// How loudly a host should surface an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Error value returned by providers, the mode manager, and the orchestrator
#[derive(Debug)]
pub struct SyncError {
    pub code: ErrorCode,
    pub message: String,
    pub severity: Severity,
    pub retryable: bool,
    /// Free-form diagnostic context (sync run id, stage, counters so far)
    pub context: BTreeMap<String, Value>,
    /// Original failure, kept for diagnostics
    pub cause: Option<anyhow::Error>,
}

impl SyncError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            severity: Severity::Error,
            retryable: false,
            context: BTreeMap::new(),
            cause: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, message)
    }

    pub fn not_configured(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ProviderNotConfigured, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DataNotFound, message)
    }

    /// Throttled by the local token bucket or by the remote API
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RateLimitExceeded, message)
            .with_severity(Severity::Warning)
            .with_retryable(true)
    }

    /// Build a provider error; transient codes are marked retryable
    pub fn provider(code: ErrorCode, message: impl Into<String>) -> Self {
        let retryable = code.is_transient();
        Self::new(code, message).with_retryable(retryable)
    }

    pub fn persistence(cause: anyhow::Error) -> Self {
        Self::new(ErrorCode::Persistence, format!("Warehouse write failed: {cause:#}"))
            .with_cause(cause)
    }

    pub fn already_running(open_run: Option<i64>) -> Self {
        let err = Self::new(ErrorCode::SyncAlreadyRunning, "A sync is already running")
            .with_severity(Severity::Warning);
        match open_run {
            Some(id) => err.with_context("openSyncRunId", id),
            None => err,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_cause(mut self, cause: impl Into<anyhow::Error>) -> Self {
        self.cause = Some(cause.into());
        self
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_ref().map(|cause| {
            let source: &(dyn std::error::Error + 'static) = cause.as_ref();
            source
        })
    }
}
