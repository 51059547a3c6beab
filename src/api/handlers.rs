//! HTTP handlers and router assembly for the campaign API (§6 External
//! Interfaces). Handlers are thin: validation and business logic live in
//! `Orchestrator`, `DomainRepository`, and `scoring::compute_score` — the
//! handler's job is extracting the request, calling through, and shaping
//! the `{success, data?, error?}` envelope.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::domain::{FeatureVector, Phase, PhaseConfig, ScoringWeights};
use crate::errors::{ApiError, PipelineError};
use crate::orchestrator::Emitter;
use crate::scoring;
use crate::sse::sse_response;

use super::env::{Env, SharedEnv};

fn ok_json<T: Serialize>(data: T) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}

pub fn api_router() -> Router<SharedEnv> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v2/campaigns", post(create_campaign))
        .route("/api/v2/campaigns/{campaign_id}", get(get_campaign))
        .route("/api/v2/campaigns/{campaign_id}/phases", put(configure_phase))
        .route("/api/v2/campaigns/{campaign_id}/start", post(start_campaign))
        .route("/api/v2/campaigns/{campaign_id}/pause", post(pause_campaign))
        .route("/api/v2/campaigns/{campaign_id}/resume", post(resume_campaign))
        .route("/api/v2/campaigns/{campaign_id}/cancel", post(cancel_campaign))
        .route("/api/v2/campaigns/{campaign_id}/reset", post(reset_campaign))
        .route("/api/v2/campaigns/{campaign_id}/rescore", post(rescore_campaign))
        .route(
            "/api/v2/campaigns/{campaign_id}/domains/{domain}/score-breakdown",
            get(score_breakdown),
        )
        .route("/api/v2/campaigns/{campaign_id}/events", get(campaign_events))
        .route("/api/v2/events", get(all_events))
}

async fn health_check() -> impl IntoResponse {
    ok_json(json!({ "status": "ok" }))
}

#[derive(Deserialize)]
struct CreateCampaignRequest {
    name: String,
    owner: String,
    #[serde(default = "default_campaign_type")]
    campaign_type: String,
}

fn default_campaign_type() -> String {
    "lead_gen".to_string()
}

async fn create_campaign(
    State(env): State<SharedEnv>,
    Json(req): Json<CreateCampaignRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let campaign = env
        .orchestrator
        .create_campaign(&req.name, &req.owner, &req.campaign_type)?;
    Ok(ok_json(campaign))
}

async fn get_campaign(
    State(env): State<SharedEnv>,
    Path(campaign_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let campaign = env.orchestrator.get_campaign(&campaign_id)?;
    Ok(ok_json(campaign))
}

async fn configure_phase(
    State(env): State<SharedEnv>,
    Path(campaign_id): Path<String>,
    Json(config): Json<PhaseConfig>,
) -> Result<impl IntoResponse, ApiError> {
    env.orchestrator.configure_phase(&campaign_id, config)?;
    let campaign = env.orchestrator.get_campaign(&campaign_id)?;
    Ok(ok_json(campaign))
}

async fn start_campaign(
    State(env): State<SharedEnv>,
    Path(campaign_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let campaign = env.orchestrator.start(&campaign_id)?;
    env.runner.spawn(campaign_id);
    Ok(ok_json(campaign))
}

async fn pause_campaign(
    State(env): State<SharedEnv>,
    Path(campaign_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    env.runner.request_stop(&campaign_id);
    Ok(ok_json(env.orchestrator.pause(&campaign_id)?))
}

async fn resume_campaign(
    State(env): State<SharedEnv>,
    Path(campaign_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let campaign = env.orchestrator.resume(&campaign_id)?;
    env.runner.spawn(campaign_id);
    Ok(ok_json(campaign))
}

async fn cancel_campaign(
    State(env): State<SharedEnv>,
    Path(campaign_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    env.runner.request_stop(&campaign_id);
    Ok(ok_json(env.orchestrator.cancel(&campaign_id)?))
}

async fn reset_campaign(
    State(env): State<SharedEnv>,
    Path(campaign_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ok_json(env.orchestrator.reset(&campaign_id)?))
}

#[derive(Deserialize)]
struct RescoreRequest {
    weights: ScoringWeights,
}

/// `Rescore` (§4.3): recomputes every already-scored domain's final score
/// under a new weight profile, using the campaign's stored parked-penalty
/// factor and tf_lite flag so the only thing that changes is the weights.
/// Does not touch DNS/HTTP-unfinished domains.
async fn rescore_campaign(
    State(env): State<SharedEnv>,
    Path(campaign_id): Path<String>,
    Json(req): Json<RescoreRequest>,
) -> Result<impl IntoResponse, ApiError> {
    env.orchestrator.get_campaign(&campaign_id)?;

    let http_config = env
        .orchestrator
        .repository()
        .get_phase_config(&campaign_id, Phase::Http)
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::BadRequest(format!("http phase not configured for campaign {campaign_id}")))?;

    let (parked_penalty_factor, tf_lite_enabled) = match http_config {
        PhaseConfig::Http {
            parked_penalty_factor,
            tf_lite_enabled,
            ..
        } => (parked_penalty_factor, tf_lite_enabled),
        _ => return Err(ApiError::Internal("http phase config has the wrong shape".to_string())),
    };

    let domains = env
        .domains
        .scored_domains(&campaign_id)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let mut rescored = 0u64;
    for domain in &domains {
        let Some(fv) = &domain.feature_vector else {
            continue;
        };
        let breakdown = scoring::compute_score(fv, &req.weights, parked_penalty_factor, tf_lite_enabled);
        env.domains
            .update_score_only(&campaign_id, &domain.name, breakdown.final_score)
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        rescored += 1;
    }

    let correlation_id = uuid::Uuid::new_v4().to_string();
    let emitter = env.orchestrator.emitter_for(&campaign_id, 0);
    emitter.emit(crate::events::CampaignEventPayload::RescoreCompleted {
        timestamp: chrono::Utc::now().to_rfc3339(),
        correlation_id: correlation_id.clone(),
    });

    Ok(ok_json(json!({
        "campaignId": campaign_id,
        "rescored": rescored,
        "correlationId": correlation_id,
    })))
}

/// The `components` object of a score-breakdown response omits
/// `parked_confidence` (§6) — it drives the hard/soft park decision but
/// isn't one of the weighted components.
#[derive(Serialize)]
struct ScoreComponents {
    density: f64,
    coverage: f64,
    non_parked: f64,
    content_length: f64,
    title_keyword: f64,
    freshness: f64,
    tf_lite: f64,
}

impl From<&FeatureVector> for ScoreComponents {
    fn from(fv: &FeatureVector) -> Self {
        Self {
            density: fv.density,
            coverage: fv.coverage,
            non_parked: fv.non_parked,
            content_length: fv.content_length,
            title_keyword: fv.title_keyword,
            freshness: fv.freshness,
            tf_lite: fv.tf_lite,
        }
    }
}

#[derive(Serialize)]
struct ScoreBreakdownData {
    #[serde(rename = "campaignId")]
    campaign_id: String,
    domain: String,
    components: ScoreComponents,
    #[serde(rename = "final")]
    final_score: f64,
    weights: ScoringWeights,
    #[serde(rename = "parkedPenaltyFactor")]
    parked_penalty_factor: f64,
}

/// `GET .../domains/{domain}/score-breakdown` (§6): read-only, recomputes
/// the score from the stored feature vector and the campaign's active HTTP
/// phase config rather than trusting the persisted `final_score` column —
/// this is what makes it useful for diagnosing a stale rescore.
async fn score_breakdown(
    State(env): State<SharedEnv>,
    Path((campaign_id, domain)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    env.orchestrator.get_campaign(&campaign_id)?;

    let record = env
        .domains
        .get(&campaign_id, &domain)
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| {
            ApiError::from(PipelineError::DomainNotFound {
                campaign_id: campaign_id.clone(),
                domain: domain.clone(),
            })
        })?;

    let feature_vector = record.feature_vector.ok_or_else(|| {
        ApiError::from(PipelineError::FeatureVectorMissing {
            campaign_id: campaign_id.clone(),
            domain: domain.clone(),
        })
    })?;

    let http_config = env
        .orchestrator
        .repository()
        .get_phase_config(&campaign_id, Phase::Http)
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::BadRequest(format!("http phase not configured for campaign {campaign_id}")))?;

    let (weights, parked_penalty_factor, tf_lite_enabled) = match http_config {
        PhaseConfig::Http {
            weights,
            parked_penalty_factor,
            tf_lite_enabled,
            ..
        } => (weights, parked_penalty_factor, tf_lite_enabled),
        _ => return Err(ApiError::Internal("http phase config has the wrong shape".to_string())),
    };

    let breakdown = scoring::compute_score(&feature_vector, &weights, parked_penalty_factor, tf_lite_enabled);

    Ok(ok_json(ScoreBreakdownData {
        campaign_id,
        domain,
        components: ScoreComponents::from(&breakdown.components),
        final_score: breakdown.final_score,
        weights: breakdown.weights,
        parked_penalty_factor: breakdown.parked_penalty_factor,
    }))
}

async fn campaign_events(
    State(env): State<SharedEnv>,
    Path(campaign_id): Path<String>,
) -> Sse<impl futures::Stream<Item = Result<Event, std::convert::Infallible>>> {
    sse_response(&env.fanout, Some(campaign_id), env.config.sse_heartbeat_secs)
}

async fn all_events(
    State(env): State<SharedEnv>,
) -> Sse<impl futures::Stream<Item = Result<Event, std::convert::Infallible>>> {
    sse_response(&env.fanout, None, env.config.sse_heartbeat_secs)
}

pub fn build_router(env: Arc<Env>) -> Router {
    api_router().with_state(env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_router() -> Router {
        build_router(Arc::new(Env::new_in_memory().unwrap()))
    }

    async fn body_json<T: for<'de> Deserialize<'de>>(response: axum::response::Response) -> T {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn gen_config_body() -> Value {
        json!({
            "phase": "generation",
            "pattern": "{word}{word}",
            "tlds": ["com"],
            "offset": 0,
            "count": 10,
        })
    }

    #[tokio::test]
    async fn health_check_reports_ok() {
        let response = test_router()
            .oneshot(axum::http::Request::builder().uri("/health").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn create_then_get_campaign_round_trips() {
        let router = test_router();
        let create = router
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/v2/campaigns")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(
                        json!({"name": "C1", "owner": "alice", "campaign_type": "lead_gen"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(create.status(), axum::http::StatusCode::OK);
        let body: Value = body_json(create).await;
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let get = router
            .oneshot(
                axum::http::Request::builder()
                    .uri(format!("/api/v2/campaigns/{id}"))
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(get.status(), axum::http::StatusCode::OK);
        let body: Value = body_json(get).await;
        assert_eq!(body["data"]["name"], "C1");
    }

    #[tokio::test]
    async fn get_unknown_campaign_is_404_with_error_envelope() {
        let response = test_router()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/v2/campaigns/does-not-exist")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
        let body: Value = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "not_found");
    }

    #[tokio::test]
    async fn score_breakdown_404s_when_domain_has_no_feature_vector() {
        let router = test_router();
        let create = router
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/v2/campaigns")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(json!({"name": "C1", "owner": "alice"}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let body: Value = body_json(create).await;
        let id = body["data"]["id"].as_str().unwrap().to_string();

        router
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method("PUT")
                    .uri(format!("/api/v2/campaigns/{id}/phases"))
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(gen_config_body().to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        let response = router
            .oneshot(
                axum::http::Request::builder()
                    .uri(format!("/api/v2/campaigns/{id}/domains/missing.com/score-breakdown"))
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn campaign_lifecycle_start_requires_generation_config() {
        let router = test_router();
        let create = router
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/v2/campaigns")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(json!({"name": "C1", "owner": "alice"}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let body: Value = body_json(create).await;
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let start = router
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri(format!("/api/v2/campaigns/{id}/start"))
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(start.status(), axum::http::StatusCode::BAD_REQUEST);
    }
}
