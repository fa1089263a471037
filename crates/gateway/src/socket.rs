//! Gateway session supervision.
//!
//! [`GatewayRunner`] owns one [`GatewayTransport`] and keeps a session open:
//! envelopes are acknowledged, then dispatched on their own task so that a slow
//! Discord call for one message never holds up reactions on another. A session
//! that ends in an error is replaced; the retry budget only counts attempts that
//! never got connected.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::events::{EventContext, EventDispatcher, GatewayEnvelope};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("gateway failed to connect: {0}")]
    Connect(String),
    #[error("gateway read failed: {0}")]
    Receive(String),
    #[error("gateway ack failed: {0}")]
    Acknowledge(String),
    #[error("gateway disconnect failed: {0}")]
    Disconnect(String),
    /// The gateway refused the session for a reason reconnecting cannot fix,
    /// such as an invalid token or disallowed intents.
    #[error("gateway rejected the session: {0}")]
    Rejected(String),
}

impl TransportError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Consecutive attempts that may fail before a session is ever established.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let multiplier = 1_u64 << attempt.min(16);
        Duration::from_millis(self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms))
    }
}

/// Source of gateway envelopes. `next_envelope` returning `None` means the stream
/// closed cleanly and the runner should stop.
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    async fn next_envelope(&self) -> Result<Option<GatewayEnvelope>, TransportError>;
    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

struct SessionFailure {
    connected: bool,
    error: TransportError,
}

pub struct GatewayRunner {
    transport: Arc<dyn GatewayTransport>,
    dispatcher: Arc<EventDispatcher>,
    reconnect_policy: ReconnectPolicy,
}

impl GatewayRunner {
    pub fn new(
        transport: Arc<dyn GatewayTransport>,
        dispatcher: Arc<EventDispatcher>,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { transport, dispatcher, reconnect_policy }
    }

    /// Runs sessions until the transport closes cleanly, rejects the session, or
    /// fails to connect more than `max_retries` times in a row.
    pub async fn start(&self) -> Result<()> {
        let max_retries = self.reconnect_policy.max_retries;
        let mut failures = 0_u32;

        loop {
            let Err(failure) = self.run_session().await else {
                return Ok(());
            };

            if failure.error.is_fatal() {
                error!(
                    event_name = "ingress.gateway.session_rejected",
                    error = %failure.error,
                    "gateway rejected the session; not reconnecting"
                );
                return Err(failure.error.into());
            }

            let delay = if failure.connected {
                failures = 0;
                warn!(
                    event_name = "ingress.gateway.session_lost",
                    error = %failure.error,
                    "gateway session dropped; reconnecting"
                );
                self.reconnect_policy.backoff(0)
            } else {
                warn!(
                    event_name = "ingress.gateway.connect_failed",
                    attempt = failures,
                    max_retries,
                    error = %failure.error,
                    "gateway connection attempt failed"
                );
                if failures >= max_retries {
                    warn!(max_retries, "gateway retries exhausted; continuing process without crash");
                    return Ok(());
                }
                failures += 1;
                self.reconnect_policy.backoff(failures - 1)
            };

            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    async fn run_session(&self) -> Result<(), SessionFailure> {
        self.transport
            .connect()
            .await
            .map_err(|error| SessionFailure { connected: false, error })?;
        info!(event_name = "ingress.gateway.connected", "gateway session established");

        let mut in_flight = JoinSet::new();
        let outcome = self.pump(&mut in_flight).await;

        while let Some(joined) = in_flight.join_next().await {
            if let Err(error) = joined {
                warn!(error = %error, "gateway dispatch task panicked");
            }
        }

        if outcome.is_err() {
            if let Err(error) = self.transport.disconnect().await {
                debug!(error = %error, "gateway teardown after a failed session did not complete");
            }
        }
        outcome.map_err(|error| SessionFailure { connected: true, error })
    }

    async fn pump(&self, in_flight: &mut JoinSet<()>) -> Result<(), TransportError> {
        while let Some(envelope) = self.transport.next_envelope().await? {
            let message_id = correlation_message_id(&envelope);
            info!(
                event_name = "ingress.gateway.envelope_received",
                envelope_id = %envelope.envelope_id,
                event_type = ?envelope.event.event_type(),
                correlation_id = %envelope.envelope_id,
                message_id,
                "received gateway envelope"
            );

            match self.transport.acknowledge(&envelope.envelope_id).await {
                Ok(()) => debug!(
                    event_name = "ingress.gateway.ack_sent",
                    correlation_id = %envelope.envelope_id,
                    "acknowledged gateway envelope"
                ),
                Err(error) => warn!(
                    event_name = "ingress.gateway.ack_sent",
                    correlation_id = %envelope.envelope_id,
                    error = %error,
                    "failed to acknowledge gateway envelope"
                ),
            }

            while in_flight.try_join_next().is_some() {}
            in_flight.spawn(dispatch(Arc::clone(&self.dispatcher), envelope));
        }

        info!(event_name = "ingress.gateway.closed", "gateway stream closed");
        self.transport.disconnect().await
    }
}

async fn dispatch(dispatcher: Arc<EventDispatcher>, envelope: GatewayEnvelope) {
    let context = EventContext { correlation_id: envelope.envelope_id.clone() };
    if let Err(error) = dispatcher.dispatch(&envelope, &context).await {
        warn!(
            correlation_id = %envelope.envelope_id,
            message_id = correlation_message_id(&envelope),
            error = %error,
            "event dispatch failed; continuing gateway loop"
        );
    }
}

fn correlation_message_id(envelope: &GatewayEnvelope) -> &str {
    envelope.event.reaction().map(|event| event.message_id.as_str()).unwrap_or("unknown")
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use super::{GatewayRunner, GatewayTransport, ReconnectPolicy, TransportError};
    use crate::events::{
        EventContext, EventDispatcher, EventHandler, EventHandlerError, GatewayEnvelope,
        GatewayEvent, GatewayEventType, HandlerResult, ReactionEvent,
    };
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct ScriptedTransport {
        state: Mutex<ScriptedState>,
    }

    #[derive(Default)]
    struct ScriptedState {
        connect_results: VecDeque<Result<(), TransportError>>,
        envelopes: VecDeque<Result<Option<GatewayEnvelope>, TransportError>>,
        connect_attempts: usize,
        acknowledgements: Vec<String>,
        disconnect_calls: usize,
    }

    impl ScriptedTransport {
        fn with_script(
            connect_results: Vec<Result<(), TransportError>>,
            envelopes: Vec<Result<Option<GatewayEnvelope>, TransportError>>,
        ) -> Self {
            Self {
                state: Mutex::new(ScriptedState {
                    connect_results: connect_results.into(),
                    envelopes: envelopes.into(),
                    ..ScriptedState::default()
                }),
            }
        }

        async fn connect_attempts(&self) -> usize {
            self.state.lock().await.connect_attempts
        }

        async fn acknowledgements(&self) -> Vec<String> {
            self.state.lock().await.acknowledgements.clone()
        }

        async fn disconnect_calls(&self) -> usize {
            self.state.lock().await.disconnect_calls
        }
    }

    #[async_trait]
    impl GatewayTransport for ScriptedTransport {
        async fn connect(&self) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.connect_attempts += 1;
            state.connect_results.pop_front().unwrap_or(Ok(()))
        }

        async fn next_envelope(&self) -> Result<Option<GatewayEnvelope>, TransportError> {
            self.state.lock().await.envelopes.pop_front().unwrap_or(Ok(None))
        }

        async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError> {
            self.state.lock().await.acknowledgements.push(envelope_id.to_owned());
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            self.state.lock().await.disconnect_calls += 1;
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingHandler {
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        fn event_types(&self) -> &'static [GatewayEventType] {
            &[GatewayEventType::ReactionAdded]
        }

        async fn handle(
            &self,
            envelope: &GatewayEnvelope,
            _ctx: &EventContext,
        ) -> Result<HandlerResult, EventHandlerError> {
            tokio::task::yield_now().await;
            self.seen.lock().await.push(envelope.envelope_id.clone());
            Ok(HandlerResult::Ignored)
        }
    }

    fn reaction_envelope(id: &str) -> GatewayEnvelope {
        GatewayEnvelope {
            envelope_id: id.to_owned(),
            event: GatewayEvent::ReactionAdded(ReactionEvent {
                channel_id: "20".to_owned(),
                message_id: "30".to_owned(),
                guild_id: Some("40".to_owned()),
                user_id: Some("10".to_owned()),
                emoji: "⭐".to_owned(),
            }),
        }
    }

    fn runner(transport: Arc<ScriptedTransport>, max_retries: u32) -> GatewayRunner {
        GatewayRunner::new(
            transport,
            Arc::new(EventDispatcher::default()),
            ReconnectPolicy { max_retries, base_delay_ms: 0, max_delay_ms: 0 },
        )
    }

    #[tokio::test]
    async fn reconnects_after_initial_connect_failure() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Err(TransportError::Connect("network down".to_owned())), Ok(())],
            vec![
                Ok(Some(GatewayEnvelope {
                    envelope_id: "env-1".to_owned(),
                    event: GatewayEvent::Unsupported { event_type: "READY".to_owned() },
                })),
                Ok(None),
            ],
        ));

        runner(transport.clone(), 2).start().await.expect("runner should not fail");

        assert_eq!(transport.connect_attempts().await, 2);
        assert_eq!(transport.acknowledgements().await, vec!["env-1"]);
        assert_eq!(transport.disconnect_calls().await, 1);
    }

    #[tokio::test]
    async fn exhausts_retries_without_crashing() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![
                Err(TransportError::Connect("fail-1".to_owned())),
                Err(TransportError::Connect("fail-2".to_owned())),
                Err(TransportError::Connect("fail-3".to_owned())),
            ],
            vec![],
        ));

        runner(transport.clone(), 2).start().await.expect("runner should degrade gracefully");
        assert_eq!(transport.connect_attempts().await, 3);
    }

    #[tokio::test]
    async fn dropped_session_reconnects_even_with_no_retry_budget() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(()), Ok(())],
            vec![
                Err(TransportError::Receive("gateway requested a reconnect".to_owned())),
                Ok(Some(reaction_envelope("env-1"))),
                Ok(None),
            ],
        ));

        runner(transport.clone(), 0).start().await.expect("runner");

        assert_eq!(transport.connect_attempts().await, 2);
        assert_eq!(transport.acknowledgements().await, vec!["env-1"]);
        assert_eq!(transport.disconnect_calls().await, 2);
    }

    #[tokio::test]
    async fn retry_budget_resets_after_a_connected_session() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![
                Err(TransportError::Connect("fail-1".to_owned())),
                Ok(()),
                Err(TransportError::Connect("fail-2".to_owned())),
                Ok(()),
            ],
            vec![Err(TransportError::Receive("reset".to_owned())), Ok(None)],
        ));

        runner(transport.clone(), 1).start().await.expect("runner");
        assert_eq!(transport.connect_attempts().await, 4);
    }

    #[tokio::test]
    async fn rejected_session_stops_the_runner() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Err(TransportError::Rejected("4004 authentication failed".to_owned()))],
            vec![],
        ));

        let error = runner(transport.clone(), 3).start().await.expect_err("fatal close");
        assert!(error.to_string().contains("4004"));
        assert_eq!(transport.connect_attempts().await, 1);
    }

    #[tokio::test]
    async fn drains_in_flight_dispatches_before_returning() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(())],
            vec![
                Ok(Some(reaction_envelope("env-1"))),
                Ok(Some(reaction_envelope("env-2"))),
                Ok(Some(reaction_envelope("env-3"))),
                Ok(None),
            ],
        ));
        let handler = CountingHandler::default();
        let seen = Arc::clone(&handler.seen);
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register(handler);

        let runner = GatewayRunner::new(
            transport.clone(),
            Arc::new(dispatcher),
            ReconnectPolicy { max_retries: 0, base_delay_ms: 0, max_delay_ms: 0 },
        );
        runner.start().await.expect("runner");

        let mut seen = seen.lock().await.clone();
        seen.sort();
        assert_eq!(seen, vec!["env-1", "env-2", "env-3"]);
    }

    #[test]
    fn correlation_uses_reaction_message_id() {
        assert_eq!(super::correlation_message_id(&reaction_envelope("env-9")), "30");
        let unsupported = GatewayEnvelope {
            envelope_id: "env-10".to_owned(),
            event: GatewayEvent::Unsupported { event_type: "READY".to_owned() },
        };
        assert_eq!(super::correlation_message_id(&unsupported), "unknown");
    }

    #[test]
    fn backoff_is_capped() {
        let policy = ReconnectPolicy { max_retries: 5, base_delay_ms: 250, max_delay_ms: 1_000 };
        assert_eq!(policy.backoff(0).as_millis(), 250);
        assert_eq!(policy.backoff(1).as_millis(), 500);
        assert_eq!(policy.backoff(4).as_millis(), 1_000);
    }
}
