//! Campaign phase orchestrator (§4.1): the state machine that drives a
//! campaign through generation, DNS validation, and HTTP keyword scoring.
//!
//! The orchestrator owns campaign lifecycle transitions and phase
//! configuration; it does not run phase work itself. Phase workers hold an
//! [`Emitter`] rather than a back-reference to the orchestrator, so the
//! workers can report progress and completion without a cyclic dependency
//! (§9 design note).

pub mod repository;
pub mod runner;

use chrono::Utc;

use crate::db::DbHandle;
use crate::domain::{Campaign, CampaignState, Phase, PhaseConfig};
use crate::errors::OrchestratorError;
use crate::events::{CampaignEventPayload, SqliteEventStore, StateTransition};
use crate::sse::Fanout;

use repository::CampaignRepository;

/// Narrow capability a phase worker needs to report back to the campaign
/// without holding a reference to the orchestrator itself.
pub trait Emitter: Send + Sync {
    fn emit(&self, payload: CampaignEventPayload);
}

/// Default emitter: appends to the event log (optimistic concurrency against
/// the per-campaign sequence) and fans the event out over SSE. A failed
/// append is logged and swallowed — event persistence failure must not crash
/// a worker's batch loop, per §7.
pub struct EventLogEmitter {
    campaign_id: String,
    events: std::sync::Arc<SqliteEventStore>,
    fanout: Fanout,
    last_sequence: std::sync::atomic::AtomicI64,
}

impl EventLogEmitter {
    pub fn new(
        campaign_id: impl Into<String>,
        events: std::sync::Arc<SqliteEventStore>,
        fanout: Fanout,
        starting_sequence: i64,
    ) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            events,
            fanout,
            last_sequence: std::sync::atomic::AtomicI64::new(starting_sequence),
        }
    }
}

impl Emitter for EventLogEmitter {
    fn emit(&self, payload: CampaignEventPayload) {
        use std::sync::atomic::Ordering;
        loop {
            let expected = self.last_sequence.load(Ordering::SeqCst);
            match self.events.append_event(&self.campaign_id, expected, &payload) {
                Ok(event) => {
                    self.last_sequence.store(event.sequence_number, Ordering::SeqCst);
                    self.fanout.publish(&self.campaign_id, &event.payload);
                    return;
                }
                Err(crate::errors::EventStoreError::SequenceConflict { found, .. }) => {
                    // Another writer advanced the log; resync and retry once.
                    self.last_sequence.store(found, Ordering::SeqCst);
                    continue;
                }
                Err(err) => {
                    tracing::warn!(
                        campaign_id = %self.campaign_id,
                        error = %err,
                        "failed to append campaign event, dropping"
                    );
                    return;
                }
            }
        }
    }
}

/// Legal transitions out of each campaign state (§4.1). `Start` from
/// `Failed` is deliberately absent — a failed campaign must go through
/// `Reset` back to `Draft` before it can be started again (resolved open
/// question, see DESIGN.md).
fn allowed_transitions(state: CampaignState) -> &'static [CampaignState] {
    use CampaignState::*;
    match state {
        Draft => &[Queued],
        Queued => &[Running, Cancelled],
        Running => &[Paused, Completed, Failed, Cancelled],
        Paused => &[Running, Cancelled],
        Completed => &[],
        Failed => &[Draft],
        Cancelled => &[],
    }
}

fn transition_allowed(from: CampaignState, to: CampaignState) -> bool {
    allowed_transitions(from).contains(&to)
}

pub struct Orchestrator {
    repo: CampaignRepository,
    events: std::sync::Arc<SqliteEventStore>,
    fanout: Fanout,
}

impl Orchestrator {
    pub fn new(db: DbHandle, events: std::sync::Arc<SqliteEventStore>, fanout: Fanout) -> Self {
        Self {
            repo: CampaignRepository::new(db),
            events,
            fanout,
        }
    }

    pub fn create_campaign(
        &self,
        name: &str,
        owner: &str,
        campaign_type: &str,
    ) -> Result<Campaign, OrchestratorError> {
        self.repo
            .create(name, owner, campaign_type)
            .map_err(OrchestratorError::Other)
    }

    pub fn get_campaign(&self, id: &str) -> Result<Campaign, OrchestratorError> {
        self.repo
            .get(id)
            .map_err(OrchestratorError::Other)?
            .ok_or_else(|| OrchestratorError::CampaignNotFound { id: id.to_string() })
    }

    /// `ConfigurePhase` (§4.1): validates and persists a phase's configuration.
    /// Rejected while the campaign is `running`, since the active phase's
    /// worker may already have read the prior config for this batch.
    pub fn configure_phase(&self, campaign_id: &str, config: PhaseConfig) -> Result<(), OrchestratorError> {
        let campaign = self.get_campaign(campaign_id)?;

        if campaign.state == CampaignState::Running {
            return Err(OrchestratorError::RunningConflict {
                id: campaign_id.to_string(),
            });
        }

        config.validate().map_err(|message| OrchestratorError::InvalidConfig {
            phase: config.phase().as_str().to_string(),
            message,
        })?;

        self.repo
            .upsert_phase_config(campaign_id, 0, &config)
            .map_err(OrchestratorError::Other)?;

        Ok(())
    }

    /// `Start` (§4.1): moves `draft`/`queued` campaigns to `running` and
    /// begins the first configured phase. A `failed` campaign returns
    /// `IllegalState` — callers must call `reset` first.
    pub fn start(&self, campaign_id: &str) -> Result<Campaign, OrchestratorError> {
        let campaign = self.get_campaign(campaign_id)?;

        if campaign.state == CampaignState::Draft {
            self.transition(&campaign, CampaignState::Queued, None)?;
        } else if !matches!(campaign.state, CampaignState::Queued) {
            return Err(OrchestratorError::IllegalState {
                id: campaign_id.to_string(),
                state: campaign.state.as_str().to_string(),
            });
        }

        for phase in Phase::ORDER {
            if self
                .repo
                .get_phase_config(campaign_id, phase)
                .map_err(OrchestratorError::Other)?
                .is_none()
            {
                return Err(OrchestratorError::NotConfigured {
                    id: campaign_id.to_string(),
                    phase: phase.as_str().to_string(),
                });
            }
        }

        self.transition(&campaign, CampaignState::Running, None)?;

        let emitter = self.emitter_for(campaign_id, 0);
        emitter.emit(CampaignEventPayload::PhaseAutoStarted {
            phase: Phase::Generation.as_str().to_string(),
            message: "campaign started".to_string(),
            correlation_id: None,
        });
        emitter.emit(CampaignEventPayload::PhaseStarted {
            phase: Phase::Generation.as_str().to_string(),
            message: "campaign started".to_string(),
            correlation_id: None,
        });

        self.get_campaign(campaign_id)
    }

    pub fn pause(&self, campaign_id: &str) -> Result<Campaign, OrchestratorError> {
        let campaign = self.get_campaign(campaign_id)?;
        if campaign.state != CampaignState::Running {
            return Err(OrchestratorError::IllegalState {
                id: campaign_id.to_string(),
                state: campaign.state.as_str().to_string(),
            });
        }
        self.transition(&campaign, CampaignState::Paused, Some("paused by operator".to_string()))?;
        self.get_campaign(campaign_id)
    }

    pub fn resume(&self, campaign_id: &str) -> Result<Campaign, OrchestratorError> {
        let campaign = self.get_campaign(campaign_id)?;
        if campaign.state != CampaignState::Paused {
            return Err(OrchestratorError::IllegalState {
                id: campaign_id.to_string(),
                state: campaign.state.as_str().to_string(),
            });
        }
        self.transition(&campaign, CampaignState::Running, Some("resumed by operator".to_string()))?;
        self.get_campaign(campaign_id)
    }

    pub fn cancel(&self, campaign_id: &str) -> Result<Campaign, OrchestratorError> {
        let campaign = self.get_campaign(campaign_id)?;
        if campaign.state.is_terminal() {
            return Err(OrchestratorError::IllegalState {
                id: campaign_id.to_string(),
                state: campaign.state.as_str().to_string(),
            });
        }
        self.transition(&campaign, CampaignState::Cancelled, Some("cancelled by operator".to_string()))?;
        self.get_campaign(campaign_id)
    }

    /// `Reset` (§4.1, resolved open question): a `failed` campaign returns to
    /// `draft` so it can be reconfigured and restarted. Valid from `failed`
    /// only — resetting a campaign mid-run would orphan its running worker.
    pub fn reset(&self, campaign_id: &str) -> Result<Campaign, OrchestratorError> {
        let campaign = self.get_campaign(campaign_id)?;
        if campaign.state != CampaignState::Failed {
            return Err(OrchestratorError::IllegalState {
                id: campaign_id.to_string(),
                state: campaign.state.as_str().to_string(),
            });
        }
        self.transition(&campaign, CampaignState::Draft, Some("reset after failure".to_string()))?;
        self.get_campaign(campaign_id)
    }

    /// `PhaseDone`: advances to the next phase, or completes the campaign
    /// when the HTTP phase is the one finishing.
    pub fn phase_done(&self, campaign_id: &str, phase: Phase) -> Result<Campaign, OrchestratorError> {
        let campaign = self.get_campaign(campaign_id)?;
        if campaign.state != CampaignState::Running {
            return Err(OrchestratorError::IllegalState {
                id: campaign_id.to_string(),
                state: campaign.state.as_str().to_string(),
            });
        }

        let emitter = self.emitter_for(campaign_id, 0);
        emitter.emit(CampaignEventPayload::PhaseCompleted {
            phase: phase.as_str().to_string(),
            status: "completed".to_string(),
            progress_pct: 100.0,
            message: format!("{} complete", phase.as_str()),
            correlation_id: None,
        });

        match phase.next() {
            Some(next_phase) => {
                emitter.emit(CampaignEventPayload::PhaseAutoStarted {
                    phase: next_phase.as_str().to_string(),
                    message: format!("starting {}", next_phase.as_str()),
                    correlation_id: None,
                });
                emitter.emit(CampaignEventPayload::PhaseStarted {
                    phase: next_phase.as_str().to_string(),
                    message: format!("starting {}", next_phase.as_str()),
                    correlation_id: None,
                });
                self.get_campaign(campaign_id)
            }
            None => {
                self.transition(&campaign, CampaignState::Completed, Some("all phases complete".to_string()))?;
                emitter.emit(CampaignEventPayload::CampaignCompleted {
                    duration_ms: 0,
                    overall_status: "completed".to_string(),
                    message: "campaign completed".to_string(),
                    correlation_id: None,
                });
                self.get_campaign(campaign_id)
            }
        }
    }

    /// `PhaseFail`: a phase worker hit an unrecoverable error; the campaign
    /// moves straight to `failed` regardless of which phase it was in.
    pub fn phase_fail(
        &self,
        campaign_id: &str,
        phase: Phase,
        error: impl Into<String>,
    ) -> Result<Campaign, OrchestratorError> {
        let campaign = self.get_campaign(campaign_id)?;
        if campaign.state != CampaignState::Running {
            return Err(OrchestratorError::IllegalState {
                id: campaign_id.to_string(),
                state: campaign.state.as_str().to_string(),
            });
        }

        let error = error.into();
        let emitter = self.emitter_for(campaign_id, 0);
        emitter.emit(CampaignEventPayload::PhaseFailed {
            phase: phase.as_str().to_string(),
            error: error.clone(),
            message: format!("{} failed: {error}", phase.as_str()),
            correlation_id: None,
        });

        self.transition(&campaign, CampaignState::Failed, Some(error))?;
        self.get_campaign(campaign_id)
    }

    /// Builds an [`Emitter`] bound to a campaign, starting from its current
    /// max sequence so the first append's optimistic-concurrency check
    /// succeeds. `cursor_hint` is accepted for callers that already know the
    /// last sequence they observed; pass 0 to have the emitter self-correct
    /// on its first conflict.
    pub fn emitter_for(&self, campaign_id: &str, cursor_hint: i64) -> EventLogEmitter {
        EventLogEmitter::new(campaign_id, self.events.clone(), self.fanout.clone(), cursor_hint)
    }

    pub fn repository(&self) -> &CampaignRepository {
        &self.repo
    }

    /// Recovery on process start (§4.1 Recovery): every `running`/`paused`
    /// campaign in the database is still in that state, since all
    /// orchestrator state lives in SQLite rather than only in-process.
    /// Callers use this to re-schedule phase workers at their last persisted
    /// cursor; the orchestrator holds no runtime state beyond what's already
    /// in the `campaigns`/`campaign_jobs` tables.
    pub fn recoverable_campaigns(&self) -> Result<Vec<Campaign>, OrchestratorError> {
        self.repo.list_recoverable().map_err(OrchestratorError::Other)
    }

    fn transition(
        &self,
        campaign: &Campaign,
        to: CampaignState,
        reason: Option<String>,
    ) -> Result<(), OrchestratorError> {
        if !transition_allowed(campaign.state, to) {
            return Err(OrchestratorError::IllegalState {
                id: campaign.id.clone(),
                state: campaign.state.as_str().to_string(),
            });
        }

        self.repo
            .update_state(&campaign.id, to)
            .map_err(OrchestratorError::Other)?;

        self.events
            .record_transition(&StateTransition {
                campaign_id: campaign.id.clone(),
                from_state: campaign.state.as_str().to_string(),
                to_state: to.as_str().to_string(),
                reason,
                occurred_at: Utc::now().to_rfc3339(),
            })
            .map_err(OrchestratorError::EventStore)?;

        let emitter = self.emitter_for(&campaign.id, 0);
        emitter.emit(CampaignEventPayload::ModeChanged {
            mode: to.as_str().to_string(),
            message: format!("transitioned to {}", to.as_str()),
            correlation_id: None,
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    fn orchestrator() -> Orchestrator {
        let db = Db::open_in_memory().unwrap();
        let handle = DbHandle::new(db);
        let events = std::sync::Arc::new(SqliteEventStore::new(handle.clone()));
        Orchestrator::new(handle, events, Fanout::new(16))
    }

    fn http_config() -> PhaseConfig {
        PhaseConfig::Http {
            timeout_secs: 5,
            max_retries: 3,
            concurrency: 4,
            batch_size: 16,
            content_length_cap: 512 * 1024,
            keyword_set_ids: vec!["k1".to_string()],
            weights: Default::default(),
            parked_penalty_factor: 0.5,
            tf_lite_enabled: false,
            persona_ids: vec!["p1".to_string()],
            advanced_lang_detection: false,
        }
    }

    fn gen_config() -> PhaseConfig {
        PhaseConfig::Generation {
            pattern: "{word}{word}".to_string(),
            tlds: vec!["com".to_string()],
            offset: 0,
            count: 100,
        }
    }

    fn dns_config() -> PhaseConfig {
        PhaseConfig::Dns {
            timeout_secs: 2,
            max_retries: 3,
        }
    }

    /// `Start` requires every phase in the fixed order configured, not just
    /// generation (§4.1) — configure all three so tests that only care about
    /// lifecycle transitions don't need to restate this each time.
    fn configure_all_phases(orch: &Orchestrator, campaign_id: &str) {
        orch.configure_phase(campaign_id, gen_config()).unwrap();
        orch.configure_phase(campaign_id, dns_config()).unwrap();
        orch.configure_phase(campaign_id, http_config()).unwrap();
    }

    #[test]
    fn start_without_generation_config_returns_not_configured() {
        let orch = orchestrator();
        let campaign = orch.create_campaign("C1", "alice", "lead_gen").unwrap();
        let err = orch.start(&campaign.id).unwrap_err();
        assert!(matches!(err, OrchestratorError::NotConfigured { .. }));
    }

    #[test]
    fn start_moves_draft_campaign_to_running() {
        let orch = orchestrator();
        let campaign = orch.create_campaign("C1", "alice", "lead_gen").unwrap();
        configure_all_phases(&orch, &campaign.id);
        let started = orch.start(&campaign.id).unwrap();
        assert_eq!(started.state, CampaignState::Running);
    }

    #[test]
    fn start_on_failed_campaign_is_illegal_state_not_silently_allowed() {
        let orch = orchestrator();
        let campaign = orch.create_campaign("C1", "alice", "lead_gen").unwrap();
        configure_all_phases(&orch, &campaign.id);
        let started = orch.start(&campaign.id).unwrap();
        orch.phase_fail(&started.id, Phase::Generation, "boom").unwrap();

        let err = orch.start(&started.id).unwrap_err();
        assert!(matches!(err, OrchestratorError::IllegalState { .. }));
    }

    #[test]
    fn reset_returns_failed_campaign_to_draft() {
        let orch = orchestrator();
        let campaign = orch.create_campaign("C1", "alice", "lead_gen").unwrap();
        configure_all_phases(&orch, &campaign.id);
        let started = orch.start(&campaign.id).unwrap();
        orch.phase_fail(&started.id, Phase::Generation, "boom").unwrap();

        let reset = orch.reset(&started.id).unwrap();
        assert_eq!(reset.state, CampaignState::Draft);

        configure_all_phases(&orch, &reset.id);
        let restarted = orch.start(&reset.id).unwrap();
        assert_eq!(restarted.state, CampaignState::Running);
    }

    #[test]
    fn reset_on_non_failed_campaign_is_rejected() {
        let orch = orchestrator();
        let campaign = orch.create_campaign("C1", "alice", "lead_gen").unwrap();
        let err = orch.reset(&campaign.id).unwrap_err();
        assert!(matches!(err, OrchestratorError::IllegalState { .. }));
    }

    #[test]
    fn pause_then_resume_round_trips_through_running() {
        let orch = orchestrator();
        let campaign = orch.create_campaign("C1", "alice", "lead_gen").unwrap();
        configure_all_phases(&orch, &campaign.id);
        let started = orch.start(&campaign.id).unwrap();

        let paused = orch.pause(&started.id).unwrap();
        assert_eq!(paused.state, CampaignState::Paused);
        let resumed = orch.resume(&paused.id).unwrap();
        assert_eq!(resumed.state, CampaignState::Running);
    }

    #[test]
    fn pause_on_non_running_campaign_is_rejected() {
        let orch = orchestrator();
        let campaign = orch.create_campaign("C1", "alice", "lead_gen").unwrap();
        let err = orch.pause(&campaign.id).unwrap_err();
        assert!(matches!(err, OrchestratorError::IllegalState { .. }));
    }

    #[test]
    fn phase_done_on_http_completes_the_campaign() {
        let orch = orchestrator();
        let campaign = orch.create_campaign("C1", "alice", "lead_gen").unwrap();
        configure_all_phases(&orch, &campaign.id);
        let started = orch.start(&campaign.id).unwrap();

        orch.phase_done(&started.id, Phase::Generation).unwrap();
        orch.phase_done(&started.id, Phase::Dns).unwrap();
        let done = orch.phase_done(&started.id, Phase::Http).unwrap();
        assert_eq!(done.state, CampaignState::Completed);
        assert!(done.completed_at.is_some());
    }

    #[test]
    fn phase_fail_moves_campaign_to_failed_regardless_of_phase() {
        let orch = orchestrator();
        let campaign = orch.create_campaign("C1", "alice", "lead_gen").unwrap();
        configure_all_phases(&orch, &campaign.id);
        let started = orch.start(&campaign.id).unwrap();

        let failed = orch.phase_fail(&started.id, Phase::Dns, "dns resolver down").unwrap();
        assert_eq!(failed.state, CampaignState::Failed);
    }

    #[test]
    fn cancel_is_rejected_once_terminal() {
        let orch = orchestrator();
        let campaign = orch.create_campaign("C1", "alice", "lead_gen").unwrap();
        configure_all_phases(&orch, &campaign.id);
        let started = orch.start(&campaign.id).unwrap();
        let cancelled = orch.cancel(&started.id).unwrap();
        assert_eq!(cancelled.state, CampaignState::Cancelled);

        let err = orch.cancel(&cancelled.id).unwrap_err();
        assert!(matches!(err, OrchestratorError::IllegalState { .. }));
    }

    #[test]
    fn configure_phase_rejects_invalid_http_config() {
        let orch = orchestrator();
        let campaign = orch.create_campaign("C1", "alice", "lead_gen").unwrap();
        let mut bad = http_config();
        if let PhaseConfig::Http { keyword_set_ids, .. } = &mut bad {
            keyword_set_ids.clear();
        }
        let err = orch.configure_phase(&campaign.id, bad).unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidConfig { .. }));
    }

    #[test]
    fn configure_phase_is_rejected_while_running() {
        let orch = orchestrator();
        let campaign = orch.create_campaign("C1", "alice", "lead_gen").unwrap();
        configure_all_phases(&orch, &campaign.id);
        let started = orch.start(&campaign.id).unwrap();

        let err = orch.configure_phase(&started.id, http_config()).unwrap_err();
        assert!(matches!(err, OrchestratorError::RunningConflict { .. }));
    }

    #[test]
    fn recoverable_campaigns_lists_running_and_paused_only() {
        let orch = orchestrator();
        let c1 = orch.create_campaign("C1", "alice", "lead_gen").unwrap();
        configure_all_phases(&orch, &c1.id);
        let started = orch.start(&c1.id).unwrap();
        orch.pause(&started.id).unwrap();

        let c2 = orch.create_campaign("C2", "alice", "lead_gen").unwrap();

        let recoverable = orch.recoverable_campaigns().unwrap();
        let ids: Vec<&str> = recoverable.iter().map(|c| c.id.as_str()).collect();
        assert!(ids.contains(&c1.id.as_str()));
        assert!(!ids.contains(&c2.id.as_str()));
    }
}
