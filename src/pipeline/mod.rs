//! Phase workers (§4.3): generation, DNS validation, and HTTP keyword
//! scoring. Each worker owns a single campaign phase's domain writes and
//! reports progress through an [`crate::orchestrator::Emitter`] rather than
//! a back-reference to the orchestrator (§9).

pub mod domains;
pub mod dns;
pub mod extract;
pub mod generation;
pub mod http;
pub mod resources;

pub use domains::DomainRepository;
pub use dns::DnsWorker;
pub use generation::GenerationWorker;
pub use http::HttpWorker;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rand::Rng;

/// Cooperative cancellation flag, checked at batch boundaries (§5). Cheap to
/// clone; `cancel()` is visible to every clone immediately.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Exponential backoff with jitter for retried transient failures (§4.3 step
/// 3): base 250ms, capped at 4s, jitter ±20%. `attempt` is zero-based (the
/// delay before the *second* try, i.e. after the first failure).
pub fn backoff_delay(attempt: u32) -> Duration {
    const BASE_MS: u64 = 250;
    const CAP_MS: u64 = 4_000;
    let exp = BASE_MS.saturating_mul(1u64 << attempt.min(8));
    let capped = exp.min(CAP_MS);
    let jitter_frac = rand::thread_rng().gen_range(-0.2..=0.2);
    let jittered = (capped as f64) * (1.0 + jitter_frac);
    Duration::from_millis(jittered.max(0.0) as u64)
}
