//! Typed event payloads — one variant per wire event from §6's SSE table,
//! plus the purely-internal transitions the orchestrator appends to the log.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CampaignEventPayload {
    ModeChanged {
        mode: String,
        message: String,
        correlation_id: Option<String>,
    },
    PhaseStarted {
        phase: String,
        message: String,
        correlation_id: Option<String>,
    },
    PhaseAutoStarted {
        phase: String,
        message: String,
        correlation_id: Option<String>,
    },
    PhaseCompleted {
        phase: String,
        status: String,
        progress_pct: f64,
        message: String,
        correlation_id: Option<String>,
    },
    PhaseFailed {
        phase: String,
        error: String,
        message: String,
        correlation_id: Option<String>,
    },
    CampaignProgress {
        progress_pct: f64,
        processed: u64,
        total: u64,
        correlation_id: Option<String>,
    },
    CampaignCompleted {
        duration_ms: u64,
        overall_status: String,
        message: String,
        correlation_id: Option<String>,
    },
    HttpEnrichment {
        count: u64,
        sample: Vec<Value>,
        microcrawl: bool,
        #[serde(rename = "microMaxPages")]
        micro_max_pages: u32,
        #[serde(rename = "microByteBudget")]
        micro_byte_budget: u64,
        #[serde(rename = "correlationId")]
        correlation_id: String,
    },
    DomainScored {
        count: u64,
        sample: Vec<Value>,
        #[serde(rename = "correlationId")]
        correlation_id: String,
    },
    RescoreCompleted {
        timestamp: String,
        #[serde(rename = "correlationId")]
        correlation_id: String,
    },
    Error {
        error: String,
        message: String,
        correlation_id: Option<String>,
    },
}

impl CampaignEventPayload {
    /// The `event_type` column value / SSE `event:` line name.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::ModeChanged { .. } => "mode_changed",
            Self::PhaseStarted { .. } => "phase_started",
            Self::PhaseAutoStarted { .. } => "phase_auto_started",
            Self::PhaseCompleted { .. } => "phase_completed",
            Self::PhaseFailed { .. } => "phase_failed",
            Self::CampaignProgress { .. } => "campaign_progress",
            Self::CampaignCompleted { .. } => "campaign_completed",
            Self::HttpEnrichment { .. } => "http_enrichment",
            Self::DomainScored { .. } => "domain_scored",
            Self::RescoreCompleted { .. } => "rescore_completed",
            Self::Error { .. } => "error",
        }
    }

    /// The correlation ID carried by this event, if any.
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::ModeChanged { correlation_id, .. }
            | Self::PhaseStarted { correlation_id, .. }
            | Self::PhaseAutoStarted { correlation_id, .. }
            | Self::PhaseCompleted { correlation_id, .. }
            | Self::PhaseFailed { correlation_id, .. }
            | Self::CampaignProgress { correlation_id, .. }
            | Self::CampaignCompleted { correlation_id, .. }
            | Self::Error { correlation_id, .. } => correlation_id.as_deref(),
            Self::HttpEnrichment { correlation_id, .. }
            | Self::DomainScored { correlation_id, .. }
            | Self::RescoreCompleted { correlation_id, .. } => Some(correlation_id),
        }
    }

    /// Render just the data fields (no `type` tag) — the `data:` line of an
    /// SSE frame, where the event name already lives in the `event:` line.
    pub fn to_sse_data(&self, campaign_id: &str) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(json!({}));
        if let Value::Object(ref mut map) = value {
            map.remove("type");
            map.entry("campaign_id").or_insert_with(|| json!(campaign_id));
            map.entry("campaignId").or_insert_with(|| json!(campaign_id));
        }
        value
    }
}
