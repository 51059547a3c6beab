//! DNS validation phase worker (§4.3 implicit step between generation and
//! HTTP): resolves each pending domain, classifying failures into the fixed
//! `DnsStatus` taxonomy and retrying only the transient ones.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;

use crate::domain::{DnsStatus, PhaseConfig};
use crate::errors::OrchestratorError;
use crate::events::CampaignEventPayload;
use crate::orchestrator::Emitter;

use super::domains::DomainRepository;
use super::{CancellationToken, backoff_delay};

/// Outcome of a single resolution attempt, already classified the way
/// `DnsStatus` needs it: `NxDomain` is fatal and not retried, `TimedOut`
/// and `Failed` are retried up to the phase's `max_retries`.
pub enum DnsOutcome {
    Resolved(Vec<String>),
    NxDomain,
    TimedOut,
    Failed(String),
}

/// Narrow resolver capability so tests can fake DNS without touching the
/// network (mirrors the `Emitter`/`CacheStore` narrow-trait pattern).
#[async_trait]
pub trait DnsResolver: Send + Sync {
    async fn resolve(&self, domain: &str) -> DnsOutcome;
}

/// Production resolver built on `tokio::net::lookup_host`. No dedicated
/// resolver crate is pulled in; the standard getaddrinfo-backed lookup is
/// sufficient since the pipeline only needs A/AAAA records, not full DNS
/// record-type control.
pub struct TokioDnsResolver;

#[async_trait]
impl DnsResolver for TokioDnsResolver {
    async fn resolve(&self, domain: &str) -> DnsOutcome {
        // lookup_host requires a socket address shape; port is discarded.
        match tokio::net::lookup_host((domain, 0)).await {
            Ok(addrs) => {
                let ips: Vec<String> = addrs.map(|a| a.ip().to_string()).collect();
                if ips.is_empty() {
                    DnsOutcome::NxDomain
                } else {
                    DnsOutcome::Resolved(ips)
                }
            }
            Err(err) => {
                let message = err.to_string();
                let lowered = message.to_lowercase();
                if lowered.contains("not known")
                    || lowered.contains("nodename nor servname")
                    || lowered.contains("no such host")
                    || lowered.contains("nxdomain")
                {
                    DnsOutcome::NxDomain
                } else {
                    DnsOutcome::Failed(message)
                }
            }
        }
    }
}

pub struct DnsWorker<R: DnsResolver> {
    domains: DomainRepository,
    resolver: R,
}

impl<R: DnsResolver> DnsWorker<R> {
    pub fn new(domains: DomainRepository, resolver: R) -> Self {
        Self { domains, resolver }
    }

    /// Runs the DNS phase to completion for `campaign_id`, batching over
    /// `pending_dns` rows and checking `token` between batches (§5).
    pub async fn run(
        &self,
        campaign_id: &str,
        config: &PhaseConfig,
        batch_size: i64,
        emitter: &dyn Emitter,
        token: &CancellationToken,
    ) -> Result<u64, OrchestratorError> {
        let (timeout_secs, max_retries) = match config {
            PhaseConfig::Dns {
                timeout_secs,
                max_retries,
            } => (*timeout_secs, *max_retries),
            _ => {
                return Err(OrchestratorError::InvalidConfig {
                    phase: "dns".to_string(),
                    message: "dns worker invoked with a non-dns config".to_string(),
                });
            }
        };

        let mut processed = 0u64;
        loop {
            if token.is_cancelled() {
                break;
            }
            let batch = self
                .domains
                .pending_dns(campaign_id, batch_size)
                .map_err(OrchestratorError::Other)?;
            if batch.is_empty() {
                break;
            }

            for domain in &batch {
                let outcome = self
                    .resolve_with_retry(&domain.name, timeout_secs, max_retries)
                    .await;
                let (status, ips) = match outcome {
                    DnsOutcome::Resolved(ips) => (DnsStatus::Resolved, ips),
                    DnsOutcome::NxDomain => (DnsStatus::NxDomain, Vec::new()),
                    DnsOutcome::TimedOut => (DnsStatus::TimedOut, Vec::new()),
                    DnsOutcome::Failed(_) => (DnsStatus::Failed, Vec::new()),
                };
                self.domains
                    .update_dns_result(campaign_id, &domain.name, status, &ips)
                    .map_err(OrchestratorError::Other)?;
                processed += 1;
            }

            emitter.emit(CampaignEventPayload::CampaignProgress {
                progress_pct: 0.0,
                processed,
                total: processed,
                correlation_id: None,
            });

            if token.is_cancelled() {
                break;
            }
        }

        Ok(processed)
    }

    async fn resolve_with_retry(&self, domain: &str, timeout_secs: u64, max_retries: u32) -> DnsOutcome {
        let deadline = Duration::from_secs(timeout_secs);
        let mut attempt = 0u32;
        loop {
            let outcome = match timeout(deadline, self.resolver.resolve(domain)).await {
                Ok(outcome) => outcome,
                Err(_) => DnsOutcome::TimedOut,
            };

            let retryable = matches!(outcome, DnsOutcome::TimedOut | DnsOutcome::Failed(_));
            if !retryable || attempt >= max_retries {
                return outcome;
            }

            tokio::time::sleep(backoff_delay(attempt)).await;
            attempt += 1;
        }
    }
}
