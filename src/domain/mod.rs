//! Domain entities: campaigns, phase configs, generated domains, and the
//! resources (personas, proxies, keyword sets) the HTTP pipeline reads
//! through the cache layer.
//!
//! Enums follow the `as_str`/`from_str` round-trip convention used
//! elsewhere in this codebase for columns persisted as SQLite `TEXT`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignState {
    Draft,
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl CampaignState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "draft" => Ok(Self::Draft),
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("invalid campaign state: {s}")),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// The fixed phase order from §4.1: generation, then DNS, then HTTP+scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Generation,
    Dns,
    Http,
}

impl Phase {
    pub const ORDER: [Phase; 3] = [Phase::Generation, Phase::Dns, Phase::Http];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generation => "generation",
            Self::Dns => "dns",
            Self::Http => "http",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "generation" => Ok(Self::Generation),
            "dns" => Ok(Self::Dns),
            "http" => Ok(Self::Http),
            _ => Err(format!("invalid phase: {s}")),
        }
    }

    /// The phase after this one in the fixed order, or `None` if this is the last.
    pub fn next(&self) -> Option<Phase> {
        let idx = Self::ORDER.iter().position(|p| p == self)?;
        Self::ORDER.get(idx + 1).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub campaign_type: String,
    pub state: CampaignState,
    pub configuration: serde_json::Value,
    pub created_at: String,
    pub updated_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

/// Per-(campaign, phase) configuration document (§3). Only one variant is
/// populated per phase; `serde(untagged)` keeps the wire shape flat while
/// `phase_name` lets callers dispatch without matching the payload shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PhaseConfig {
    Generation {
        pattern: String,
        tlds: Vec<String>,
        offset: u64,
        count: u64,
    },
    Dns {
        timeout_secs: u64,
        max_retries: u32,
    },
    Http {
        timeout_secs: u64,
        max_retries: u32,
        concurrency: u32,
        batch_size: u32,
        content_length_cap: u64,
        keyword_set_ids: Vec<String>,
        weights: ScoringWeights,
        parked_penalty_factor: f64,
        tf_lite_enabled: bool,
        persona_ids: Vec<String>,
        /// Gates the §4.3 step 4 heuristic n-gram `primary_lang` detector.
        /// Off by default: the detector costs a full-body scan per domain.
        #[serde(default)]
        advanced_lang_detection: bool,
    },
}

impl PhaseConfig {
    pub fn phase(&self) -> Phase {
        match self {
            PhaseConfig::Generation { .. } => Phase::Generation,
            PhaseConfig::Dns { .. } => Phase::Dns,
            PhaseConfig::Http { .. } => Phase::Http,
        }
    }

    /// §4.1 `ConfigurePhase` validation: required fields present and sane.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            PhaseConfig::Generation {
                pattern,
                tlds,
                count,
                ..
            } => {
                if pattern.is_empty() {
                    return Err("generation pattern must not be empty".to_string());
                }
                if tlds.is_empty() {
                    return Err("generation requires at least one tld".to_string());
                }
                if *count == 0 {
                    return Err("generation count must be nonzero".to_string());
                }
                Ok(())
            }
            PhaseConfig::Dns { timeout_secs, .. } => {
                if *timeout_secs == 0 {
                    return Err("dns timeout_secs must be nonzero".to_string());
                }
                Ok(())
            }
            PhaseConfig::Http {
                timeout_secs,
                concurrency,
                batch_size,
                keyword_set_ids,
                ..
            } => {
                if *timeout_secs == 0 {
                    return Err("http timeout_secs must be nonzero".to_string());
                }
                if *concurrency == 0 {
                    return Err("http concurrency must be nonzero".to_string());
                }
                if *batch_size == 0 {
                    return Err("http batch_size must be nonzero".to_string());
                }
                if keyword_set_ids.is_empty() {
                    return Err("http phase requires at least one keyword set".to_string());
                }
                Ok(())
            }
        }
    }
}

/// Active weight profile for the scoring engine (§4.3 step 6). Missing
/// components are treated as absent from the profile, not zero-weighted —
/// absence removes them from the renormalized sum entirely.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub density: f64,
    pub coverage: f64,
    pub non_parked: f64,
    pub content_length: f64,
    pub title_keyword: f64,
    pub freshness: f64,
    pub tf_lite: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DnsStatus {
    Pending,
    Resolved,
    NxDomain,
    TimedOut,
    Failed,
}

impl DnsStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::NxDomain => "nxdomain",
            Self::TimedOut => "timed_out",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "pending" => Ok(Self::Pending),
            "resolved" => Ok(Self::Resolved),
            "nxdomain" => Ok(Self::NxDomain),
            "timed_out" => Ok(Self::TimedOut),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid dns status: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedDomain {
    pub campaign_id: String,
    pub name: String,
    pub dns_status: DnsStatus,
    pub ips: Vec<String>,
    pub http_status: Option<u16>,
    pub title: Option<String>,
    pub keywords: Vec<String>,
    pub feature_vector: Option<FeatureVector>,
    pub final_score: Option<f64>,
    pub created_at: String,
    pub updated_at: String,
}

impl GeneratedDomain {
    pub fn new(campaign_id: impl Into<String>, name: impl Into<String>, now: &str) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            name: name.into(),
            dns_status: DnsStatus::Pending,
            ips: Vec::new(),
            http_status: None,
            title: None,
            keywords: Vec::new(),
            feature_vector: None,
            final_score: None,
            created_at: now.to_string(),
            updated_at: now.to_string(),
        }
    }
}

/// Per-domain feature vector captured by the HTTP worker (§3, §4.3 step 5).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FeatureVector {
    pub density: f64,
    pub coverage: f64,
    pub non_parked: f64,
    pub content_length: f64,
    pub title_keyword: f64,
    pub freshness: f64,
    pub tf_lite: f64,
    pub parked_confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub name: String,
    pub headers: HashMap<String, String>,
    pub tls_fingerprint: String,
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks4,
    Socks5,
}

impl ProxyProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Socks4 => "socks4",
            Self::Socks5 => "socks5",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            "socks4" => Ok(Self::Socks4),
            "socks5" => Ok(Self::Socks5),
            _ => Err(format!("invalid proxy protocol: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyHealth {
    Unknown,
    Healthy,
    Unhealthy,
}

impl ProxyHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "unknown" => Ok(Self::Unknown),
            "healthy" => Ok(Self::Healthy),
            "unhealthy" => Ok(Self::Unhealthy),
            _ => Err(format!("invalid proxy health: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proxy {
    pub id: String,
    pub address: String,
    pub protocol: ProxyProtocol,
    pub enabled: bool,
    pub health: ProxyHealth,
    pub last_checked_at: Option<String>,
    pub weight: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeywordRuleType {
    Literal,
    Regex,
}

impl KeywordRuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Literal => "literal",
            Self::Regex => "regex",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "literal" => Ok(Self::Literal),
            "regex" => Ok(Self::Regex),
            _ => Err(format!("invalid keyword rule type: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordRule {
    pub pattern: String,
    pub rule_type: KeywordRuleType,
    pub case_sensitive: bool,
    pub category: String,
    pub context_window: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordSet {
    pub id: String,
    pub name: String,
    pub rules: Vec<KeywordRule>,
    pub version: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn campaign_state_round_trips_through_as_str() {
        for state in [
            CampaignState::Draft,
            CampaignState::Queued,
            CampaignState::Running,
            CampaignState::Paused,
            CampaignState::Completed,
            CampaignState::Failed,
            CampaignState::Cancelled,
        ] {
            let s = state.as_str();
            assert_eq!(CampaignState::from_str(s).unwrap(), state);
        }
    }

    #[test]
    fn terminal_states_are_completed_failed_cancelled() {
        assert!(CampaignState::Completed.is_terminal());
        assert!(CampaignState::Failed.is_terminal());
        assert!(CampaignState::Cancelled.is_terminal());
        assert!(!CampaignState::Running.is_terminal());
        assert!(!CampaignState::Draft.is_terminal());
    }

    #[test]
    fn phase_order_is_generation_dns_http() {
        assert_eq!(Phase::Generation.next(), Some(Phase::Dns));
        assert_eq!(Phase::Dns.next(), Some(Phase::Http));
        assert_eq!(Phase::Http.next(), None);
    }

    #[test]
    fn phase_config_validate_rejects_empty_generation_pattern() {
        let cfg = PhaseConfig::Generation {
            pattern: String::new(),
            tlds: vec!["com".to_string()],
            offset: 0,
            count: 4,
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn phase_config_validate_rejects_http_without_keyword_sets() {
        let cfg = PhaseConfig::Http {
            timeout_secs: 5,
            max_retries: 3,
            concurrency: 8,
            batch_size: 32,
            content_length_cap: 512 * 1024,
            keyword_set_ids: Vec::new(),
            weights: ScoringWeights::default(),
            parked_penalty_factor: 0.5,
            tf_lite_enabled: false,
            persona_ids: vec!["p1".to_string()],
            advanced_lang_detection: false,
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn phase_config_validate_accepts_well_formed_dns_config() {
        let cfg = PhaseConfig::Dns {
            timeout_secs: 2,
            max_retries: 1,
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn proxy_protocol_round_trips() {
        for p in [
            ProxyProtocol::Http,
            ProxyProtocol::Https,
            ProxyProtocol::Socks4,
            ProxyProtocol::Socks5,
        ] {
            assert_eq!(ProxyProtocol::from_str(p.as_str()).unwrap(), p);
        }
    }
}
