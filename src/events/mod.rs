//! Event store: append-only campaign event log, snapshots, and transition
//! audit records (§4.2).
//!
//! Events carry a typed, tagged payload rather than free-form JSON (design
//! note in §9 on dynamic typed payloads) so the orchestrator, workers, and
//! SSE fan-out all agree on shape without re-parsing an envelope.

pub mod payload;
pub mod store;

pub use payload::CampaignEventPayload;
pub use store::SqliteEventStore;

use serde::{Deserialize, Serialize};

/// A single durable event for one campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignEvent {
    pub campaign_id: String,
    pub sequence_number: i64,
    pub global_sequence: i64,
    pub payload: CampaignEventPayload,
    pub occurred_at: String,
    pub correlation_id: Option<String>,
}

/// Materialized campaign state, persisted periodically to accelerate replay
/// (§4.2 `SaveSnapshot`, §8 invariant 2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignSnapshot {
    pub campaign_id: String,
    pub last_event_sequence: i64,
    pub state: String,
    pub state_data: Vec<u8>,
    pub checksum: String,
}

impl CampaignSnapshot {
    /// Checksum is a content hash of `state_data` (§4.2).
    pub fn compute_checksum(state_data: &[u8]) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(state_data);
        format!("{:x}", hasher.finalize())
    }

    pub fn new(campaign_id: impl Into<String>, last_event_sequence: i64, state: String, state_data: Vec<u8>) -> Self {
        let checksum = Self::compute_checksum(&state_data);
        Self {
            campaign_id: campaign_id.into(),
            last_event_sequence,
            state,
            state_data,
            checksum,
        }
    }

    pub fn verify(&self) -> bool {
        self.checksum == Self::compute_checksum(&self.state_data)
    }
}

/// A validated state transition, recorded separately for audit (§4.2
/// `RecordTransition`) in addition to being present in the event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub campaign_id: String,
    pub from_state: String,
    pub to_state: String,
    pub reason: Option<String>,
    pub occurred_at: String,
}
