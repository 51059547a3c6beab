//! Typed error hierarchy for the campaign orchestrator.
//!
//! One `thiserror`-derived enum per subsystem boundary:
//! - `OrchestratorError` — state machine and phase-orchestration failures
//! - `EventStoreError` — event append/read/snapshot failures
//! - `CacheError` — read-through cache failures
//! - `PipelineError` — HTTP keyword + scoring worker failures
//! - `ApiError` — the HTTP-surface error, built from any of the above
//!
//! Every subsystem enum maps onto [`ErrorKind`], the wire-level taxonomy from
//! the external-interfaces contract. `ApiError` is the only one that knows how
//! to render an HTTP response.

use thiserror::Error;

/// The wire-level taxonomy every subsystem error ultimately collapses into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Conflict,
    IllegalState,
    Unavailable,
    Timeout,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::IllegalState => "illegal_state",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Errors from the campaign state machine and phase orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("campaign {id} not found")]
    CampaignNotFound { id: String },

    #[error("phase {phase} is not configured for campaign {id}")]
    NotConfigured { id: String, phase: String },

    #[error("invalid config for phase {phase}: {message}")]
    InvalidConfig { phase: String, message: String },

    #[error("campaign {id} is in state {state}, operation not allowed")]
    IllegalState { id: String, state: String },

    #[error("campaign {id} is running, configuration is immutable")]
    RunningConflict { id: String },

    #[error("sequence collision for campaign {id}: expected {expected}, found {found}")]
    SequenceConflict {
        id: String,
        expected: i64,
        found: i64,
    },

    #[error(transparent)]
    EventStore(#[from] EventStoreError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::CampaignNotFound { .. } => ErrorKind::NotFound,
            OrchestratorError::NotConfigured { .. } => ErrorKind::InvalidInput,
            OrchestratorError::InvalidConfig { .. } => ErrorKind::InvalidInput,
            OrchestratorError::IllegalState { .. } => ErrorKind::IllegalState,
            OrchestratorError::RunningConflict { .. } => ErrorKind::Conflict,
            OrchestratorError::SequenceConflict { .. } => ErrorKind::Conflict,
            OrchestratorError::EventStore(inner) => inner.kind(),
            OrchestratorError::Other(_) => ErrorKind::Internal,
        }
    }
}

/// Errors from event append, read, and snapshot operations.
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("sequence conflict for campaign {campaign_id}: expected next {expected}, caller had {found}")]
    SequenceConflict {
        campaign_id: String,
        expected: i64,
        found: i64,
    },

    #[error("event store unavailable: {0}")]
    Unavailable(String),

    #[error("snapshot for campaign {campaign_id} references sequence {last_event_sequence} past the log's max {max_sequence}")]
    SnapshotPastLog {
        campaign_id: String,
        last_event_sequence: i64,
        max_sequence: i64,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EventStoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EventStoreError::SequenceConflict { .. } => ErrorKind::Conflict,
            EventStoreError::Unavailable(_) => ErrorKind::Unavailable,
            EventStoreError::SnapshotPastLog { .. } => ErrorKind::Internal,
            EventStoreError::Other(_) => ErrorKind::Internal,
        }
    }
}

/// Errors from the read-through cache layer.
///
/// The cache never surfaces these to callers in the read-through path (it
/// falls back to the store of record and logs); they exist so the fallback
/// path itself has something typed to log and so tests can assert on miss
/// causes.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("backing store unavailable: {0}")]
    StoreUnavailable(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CacheError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CacheError::StoreUnavailable(_) => ErrorKind::Unavailable,
            CacheError::Other(_) => ErrorKind::Internal,
        }
    }
}

/// Errors from the HTTP keyword + scoring pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("request to {domain} timed out after {timeout_secs}s")]
    Timeout { domain: String, timeout_secs: u64 },

    #[error("request to {domain} failed: {message}")]
    TransientFetch { domain: String, message: String },

    #[error("request to {domain} failed non-transiently: {message}")]
    FatalFetch { domain: String, message: String },

    #[error("domain {domain} not found in campaign {campaign_id}")]
    DomainNotFound {
        campaign_id: String,
        domain: String,
    },

    #[error("feature vector missing for {domain} in campaign {campaign_id}")]
    FeatureVectorMissing {
        campaign_id: String,
        domain: String,
    },

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Timeout { .. } => ErrorKind::Timeout,
            PipelineError::TransientFetch { .. } => ErrorKind::Unavailable,
            PipelineError::FatalFetch { .. } => ErrorKind::InvalidInput,
            PipelineError::DomainNotFound { .. } => ErrorKind::NotFound,
            PipelineError::FeatureVectorMissing { .. } => ErrorKind::NotFound,
            PipelineError::Cancelled => ErrorKind::Cancelled,
            PipelineError::Other(_) => ErrorKind::Internal,
        }
    }

    /// Transient errors are retried with backoff; fatal ones are recorded and not retried (§4.3 step 3).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PipelineError::Timeout { .. } | PipelineError::TransientFetch { .. }
        )
    }
}

/// The HTTP-surface error. Implements `IntoResponse`, rendering the uniform
/// `{success, data?, error?}` envelope.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match err.kind() {
            ErrorKind::NotFound => ApiError::NotFound(err.to_string()),
            ErrorKind::InvalidInput => ApiError::BadRequest(err.to_string()),
            ErrorKind::Conflict | ErrorKind::IllegalState => ApiError::Conflict(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err.kind() {
            ErrorKind::NotFound => ApiError::NotFound(err.to_string()),
            ErrorKind::InvalidInput => ApiError::BadRequest(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::NotFound(_) => ErrorKind::NotFound,
            ApiError::BadRequest(_) => ErrorKind::InvalidInput,
            ApiError::Conflict(_) => ErrorKind::Conflict,
            ApiError::Internal(_) => ErrorKind::Internal,
        }
    }

    fn status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        use axum::Json;
        let status = self.status();
        let body = serde_json::json!({
            "success": false,
            "error": {
                "code": self.kind().as_str(),
                "message": self.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orchestrator_error_campaign_not_found_maps_to_not_found() {
        let err = OrchestratorError::CampaignNotFound {
            id: "c1".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("c1"));
    }

    #[test]
    fn orchestrator_error_sequence_conflict_maps_to_conflict() {
        let err = OrchestratorError::SequenceConflict {
            id: "c1".to_string(),
            expected: 5,
            found: 4,
        };
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn event_store_error_converts_into_orchestrator_error() {
        let inner = EventStoreError::Unavailable("disk full".to_string());
        let outer: OrchestratorError = inner.into();
        assert_eq!(outer.kind(), ErrorKind::Unavailable);
    }

    #[test]
    fn pipeline_error_transient_classification() {
        let timeout = PipelineError::Timeout {
            domain: "a.com".to_string(),
            timeout_secs: 5,
        };
        assert!(timeout.is_transient());

        let fatal = PipelineError::FatalFetch {
            domain: "a.com".to_string(),
            message: "404".to_string(),
        };
        assert!(!fatal.is_transient());
    }

    #[test]
    fn pipeline_error_not_found_variants_map_correctly() {
        let err = PipelineError::FeatureVectorMissing {
            campaign_id: "c1".to_string(),
            domain: "a.com".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn api_error_from_orchestrator_not_found_is_not_found() {
        let orch = OrchestratorError::CampaignNotFound {
            id: "c1".to_string(),
        };
        let api: ApiError = orch.into();
        assert!(matches!(api, ApiError::NotFound(_)));
        assert_eq!(api.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn api_error_from_pipeline_feature_vector_missing_is_not_found() {
        let pipe = PipelineError::FeatureVectorMissing {
            campaign_id: "c1".to_string(),
            domain: "a.com".to_string(),
        };
        let api: ApiError = pipe.into();
        assert!(matches!(api, ApiError::NotFound(_)));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&OrchestratorError::RunningConflict {
            id: "c1".to_string(),
        });
        assert_std_error(&EventStoreError::Unavailable("x".into()));
        assert_std_error(&CacheError::StoreUnavailable("x".into()));
        assert_std_error(&PipelineError::Cancelled);
    }

    #[test]
    fn error_kind_as_str_round_trips_taxonomy_terms() {
        assert_eq!(ErrorKind::InvalidInput.as_str(), "invalid_input");
        assert_eq!(ErrorKind::IllegalState.as_str(), "illegal_state");
        assert_eq!(ErrorKind::Cancelled.as_str(), "cancelled");
    }
}
