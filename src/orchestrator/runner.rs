//! Drives phase workers in response to campaign state (§4.1, §4.3, §5).
//!
//! `Orchestrator` only ever flips persisted state and appends events; it has
//! no handle back to this scheduler, the same inversion as the
//! worker/[`Emitter`] relationship. `PhaseRunner` is the piece that actually
//! calls `GenerationWorker` -> `DnsWorker` -> `HttpWorker` for a campaign a
//! caller has started or resumed, and schedules the periodic snapshot writer
//! alongside it.
//!
//! A campaign's phase loop always restarts at `Phase::Generation` on
//! (re)spawn rather than resuming mid-phase from a saved cursor: generation
//! is idempotent (`insert` is `ON CONFLICT DO NOTHING`) and DNS/HTTP only
//! ever pull `pending_*` rows, so replaying from the top is both correct and
//! exactly how recovery is meant to work (§4.1 Recovery).

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::ReadThroughCache;
use crate::db::DbHandle;
use crate::domain::{Campaign, CampaignState, KeywordSet, Persona, Phase, PhaseConfig, Proxy};
use crate::errors::OrchestratorError;
use crate::events::{CampaignSnapshot, SqliteEventStore};
use crate::pipeline::dns::TokioDnsResolver;
use crate::pipeline::http::ReqwestFetcher;
use crate::pipeline::resources::{KeywordSetRepository, PersonaRepository, ProxyRepository};
use crate::pipeline::{CancellationToken, DnsWorker, DomainRepository, GenerationWorker, HttpWorker};

use super::{Emitter, Orchestrator};

const DEFAULT_LB_STRATEGY: &str = "weighted_round_robin";
const SNAPSHOT_MIN_TICK: Duration = Duration::from_secs(1);
const SNAPSHOT_MAX_TICK: Duration = Duration::from_secs(5);

struct RunningTask {
    token: CancellationToken,
    drive: JoinHandle<()>,
    snapshot: JoinHandle<()>,
}

#[derive(Serialize)]
struct MaterializedState<'a> {
    campaign: &'a Campaign,
    total_domains: u64,
}

/// Ties campaign state transitions to worker execution. Kept separate from
/// `Orchestrator` so a CLI process can create campaigns, configure phases,
/// and flip state without ever pulling in `reqwest`/`tokio::net` worker
/// machinery — only the long-lived server process builds one of these.
pub struct PhaseRunner {
    orchestrator: Arc<Orchestrator>,
    events: Arc<SqliteEventStore>,
    domains: DomainRepository,
    persona_cache: Arc<ReadThroughCache<Persona, PersonaRepository>>,
    proxy_cache: Arc<ReadThroughCache<Proxy, ProxyRepository>>,
    keyword_cache: Arc<ReadThroughCache<KeywordSet, KeywordSetRepository>>,
    proxy_repo: Arc<ProxyRepository>,
    default_batch_size: i64,
    snapshot_event_interval: i64,
    snapshot_time_interval: Duration,
    tasks: DashMap<String, RunningTask>,
}

impl PhaseRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: DbHandle,
        orchestrator: Arc<Orchestrator>,
        domains: DomainRepository,
        persona_cache: Arc<ReadThroughCache<Persona, PersonaRepository>>,
        proxy_cache: Arc<ReadThroughCache<Proxy, ProxyRepository>>,
        keyword_cache: Arc<ReadThroughCache<KeywordSet, KeywordSetRepository>>,
        proxy_repo: Arc<ProxyRepository>,
        default_batch_size: i64,
        snapshot_event_interval: i64,
        snapshot_time_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            orchestrator,
            events: Arc::new(SqliteEventStore::new(db)),
            domains,
            persona_cache,
            proxy_cache,
            keyword_cache,
            proxy_repo,
            default_batch_size,
            snapshot_event_interval,
            snapshot_time_interval,
            tasks: DashMap::new(),
        })
    }

    /// Starts (or restarts) the phase loop for `campaign_id`. Idempotent: a
    /// prior task for the same campaign is aborted first, since by the time
    /// a caller asks to (re)spawn, the persisted campaign/phase-config state
    /// is already the only source of truth a fresh task needs.
    pub fn spawn(self: &Arc<Self>, campaign_id: impl Into<String>) {
        let campaign_id = campaign_id.into();
        if let Some((_, old)) = self.tasks.remove(&campaign_id) {
            old.drive.abort();
            old.snapshot.abort();
        }

        let token = CancellationToken::new();
        let drive = tokio::spawn(Arc::clone(self).drive(campaign_id.clone(), token.clone()));
        let snapshot = tokio::spawn(Arc::clone(self).snapshot_loop(campaign_id.clone()));
        self.tasks.insert(campaign_id, RunningTask { token, drive, snapshot });
    }

    /// Cooperative stop signal for pause/cancel (§5). The running phase
    /// worker notices at its next batch boundary; there is no hard kill.
    pub fn request_stop(&self, campaign_id: &str) {
        if let Some(task) = self.tasks.get(campaign_id) {
            task.token.cancel();
        }
    }

    /// Recovery on process start (§4.1): re-schedules every campaign the
    /// database still says is `running`. `paused` campaigns stay idle until
    /// an operator calls `resume` — recovering them automatically would
    /// silently undo an operator's pause.
    pub fn recover(self: &Arc<Self>) {
        let campaigns = match self.orchestrator.recoverable_campaigns() {
            Ok(campaigns) => campaigns,
            Err(err) => {
                warn!(error = %err, "failed to list recoverable campaigns");
                return;
            }
        };
        for campaign in campaigns {
            if campaign.state == CampaignState::Running {
                info!(campaign_id = %campaign.id, "resuming phase worker after restart");
                self.spawn(campaign.id);
            }
        }
    }

    async fn drive(self: Arc<Self>, campaign_id: String, token: CancellationToken) {
        for phase in Phase::ORDER {
            let campaign = match self.orchestrator.get_campaign(&campaign_id) {
                Ok(c) => c,
                Err(err) => {
                    warn!(campaign_id = %campaign_id, error = %err, "phase runner could not load campaign");
                    return;
                }
            };
            if campaign.state != CampaignState::Running {
                return;
            }

            let config = match self.orchestrator.repository().get_phase_config(&campaign_id, phase) {
                Ok(Some(config)) => config,
                Ok(None) => {
                    let _ = self.orchestrator.phase_fail(
                        &campaign_id,
                        phase,
                        format!("{} is not configured", phase.as_str()),
                    );
                    return;
                }
                Err(err) => {
                    let _ = self.orchestrator.phase_fail(&campaign_id, phase, err.to_string());
                    return;
                }
            };

            let emitter = self.orchestrator.emitter_for(&campaign_id, 0);
            if let Err(err) = self.run_phase(phase, &campaign_id, &config, &emitter, &token).await {
                warn!(campaign_id = %campaign_id, phase = phase.as_str(), error = %err, "phase worker failed");
                let _ = self.orchestrator.phase_fail(&campaign_id, phase, err.to_string());
                return;
            }

            if token.is_cancelled() {
                return;
            }

            if let Err(err) = self.orchestrator.phase_done(&campaign_id, phase) {
                warn!(campaign_id = %campaign_id, phase = phase.as_str(), error = %err, "failed to record phase completion");
                return;
            }
        }
    }

    async fn run_phase(
        &self,
        phase: Phase,
        campaign_id: &str,
        config: &PhaseConfig,
        emitter: &dyn Emitter,
        token: &CancellationToken,
    ) -> Result<u64, OrchestratorError> {
        match phase {
            Phase::Generation => GenerationWorker::new(self.domains.clone()).run(campaign_id, config, emitter),
            Phase::Dns => {
                DnsWorker::new(self.domains.clone(), TokioDnsResolver)
                    .run(campaign_id, config, self.default_batch_size, emitter, token)
                    .await
            }
            Phase::Http => {
                let batch_size = match config {
                    PhaseConfig::Http { batch_size, .. } => *batch_size as i64,
                    _ => self.default_batch_size,
                };
                let worker = HttpWorker::new(
                    self.domains.clone(),
                    self.persona_cache.clone(),
                    self.proxy_cache.clone(),
                    self.keyword_cache.clone(),
                    self.proxy_repo.clone(),
                    DEFAULT_LB_STRATEGY,
                    ReqwestFetcher,
                );
                worker.run(campaign_id, config, batch_size, emitter, token).await
            }
        }
    }

    /// Periodic snapshot writer (§5): triggers every `snapshot_event_interval`
    /// events or `snapshot_time_interval`, whichever comes first, checked on
    /// a short tick so neither threshold overshoots by much. Exits once the
    /// campaign leaves `running` — a fresh snapshot loop starts with the next
    /// `spawn` if it's resumed.
    async fn snapshot_loop(self: Arc<Self>, campaign_id: String) {
        let tick = self.snapshot_time_interval.clamp(SNAPSHOT_MIN_TICK, SNAPSHOT_MAX_TICK);
        let mut interval = tokio::time::interval(tick);
        let mut last_snapshotted_seq = 0i64;
        let mut last_snapshot_at = Instant::now();

        loop {
            interval.tick().await;

            let campaign = match self.orchestrator.get_campaign(&campaign_id) {
                Ok(c) => c,
                Err(_) => return,
            };

            let current_seq = match self.events.last_sequence(&campaign_id) {
                Ok(seq) => seq,
                Err(err) => {
                    warn!(campaign_id = %campaign_id, error = %err, "snapshot writer could not read sequence");
                    continue;
                }
            };

            let events_due = current_seq - last_snapshotted_seq >= self.snapshot_event_interval;
            let time_due = last_snapshot_at.elapsed() >= self.snapshot_time_interval;
            if current_seq > last_snapshotted_seq && (events_due || time_due) {
                match self.write_snapshot(&campaign, current_seq) {
                    Ok(()) => {
                        last_snapshotted_seq = current_seq;
                        last_snapshot_at = Instant::now();
                    }
                    Err(err) => warn!(campaign_id = %campaign_id, error = %err, "failed to write campaign snapshot"),
                }
            }

            if campaign.state != CampaignState::Running {
                return;
            }
        }
    }

    fn write_snapshot(&self, campaign: &Campaign, sequence: i64) -> anyhow::Result<()> {
        let total_domains = self.domains.count_total(&campaign.id)?;
        let state_data = serde_json::to_vec(&MaterializedState { campaign, total_domains })?;
        let snapshot = CampaignSnapshot::new(campaign.id.clone(), sequence, campaign.state.as_str().to_string(), state_data);
        self.events.save_snapshot(&snapshot).map_err(|e| anyhow::anyhow!(e))
    }
}
