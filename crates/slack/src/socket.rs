use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use pocketbook_core::errors::DomainError;

use crate::blocks::MessageTemplate;
use crate::events::{EventContext, EventDispatcher, SlackEnvelope, SlackEvent};
use crate::payload::decode_frame;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport ack failed: {0}")]
    Acknowledge(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
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
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Raw Socket Mode connection. Frames are handed over undecoded; the runner
/// owns decoding.
#[async_trait]
pub trait SocketTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    /// `Ok(None)` means the stream closed cleanly.
    async fn next_frame(&self) -> Result<Option<String>, TransportError>;
    async fn acknowledge(
        &self,
        envelope_id: &str,
        payload: Option<&MessageTemplate>,
    ) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

#[derive(Default)]
pub struct NoopSocketTransport;

#[async_trait]
impl SocketTransport for NoopSocketTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_frame(&self) -> Result<Option<String>, TransportError> {
        Ok(None)
    }

    async fn acknowledge(
        &self,
        _envelope_id: &str,
        _payload: Option<&MessageTemplate>,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

pub struct SocketModeRunner {
    transport: Arc<dyn SocketTransport>,
    dispatcher: EventDispatcher,
    reconnect_policy: ReconnectPolicy,
}

impl SocketModeRunner {
    pub fn new(
        transport: Arc<dyn SocketTransport>,
        dispatcher: EventDispatcher,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { transport, dispatcher, reconnect_policy }
    }

    pub fn with_noop_transport(dispatcher: EventDispatcher) -> Self {
        Self::new(Arc::new(NoopSocketTransport), dispatcher, ReconnectPolicy::default())
    }

    pub fn handler_count(&self) -> usize {
        self.dispatcher.handler_count()
    }

    pub async fn start(&self) -> Result<()> {
        for attempt in 0..=self.reconnect_policy.max_retries {
            match self.connect_and_pump(attempt).await {
                Ok(()) => return Ok(()),
                Err(transport_error) => {
                    warn!(
                        event_name = "ingress.slack.transport_failed",
                        attempt,
                        max_retries = self.reconnect_policy.max_retries,
                        error = %transport_error,
                        "socket mode transport failed"
                    );

                    if attempt >= self.reconnect_policy.max_retries {
                        warn!(
                            event_name = "ingress.slack.retries_exhausted",
                            max_retries = self.reconnect_policy.max_retries,
                            "socket mode retries exhausted; continuing process without crash"
                        );
                        return Ok(());
                    }

                    let delay = self.reconnect_policy.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Ok(())
    }

    async fn connect_and_pump(&self, attempt: u32) -> Result<(), TransportError> {
        info!(attempt, "opening socket mode transport connection");
        self.transport.connect().await?;
        info!(attempt, "socket mode transport connected");

        loop {
            let Some(frame) = self.transport.next_frame().await? else {
                info!(attempt, "socket mode transport stream closed");
                self.transport.disconnect().await?;
                return Ok(());
            };

            self.process_frame(&frame).await;
        }
    }

    async fn process_frame(&self, frame: &str) {
        let envelope = match decode_frame(frame) {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                debug!(event_name = "ingress.slack.control_frame", "skipped socket control frame");
                return;
            }
            Err(decode_error) => {
                let envelope_id = decode_error.envelope_id().map(str::to_owned);
                let error = DomainError::from(decode_error);
                warn!(
                    event_name = "ingress.slack.envelope_malformed",
                    correlation_id = envelope_id.as_deref().unwrap_or("unknown"),
                    error = %error,
                    "dropping malformed slack envelope"
                );
                if let Some(envelope_id) = envelope_id {
                    self.acknowledge(&envelope_id, None, ("unknown", "unknown")).await;
                }
                return;
            }
        };

        let fields = correlation_fields(&envelope);
        info!(
            event_name = "ingress.slack.envelope_received",
            envelope_id = %envelope.envelope_id,
            event_type = ?envelope.event.event_type(),
            correlation_id = %envelope.envelope_id,
            user_id = fields.0,
            team_id = fields.1,
            "received slack envelope"
        );

        let context = EventContext { correlation_id: envelope.envelope_id.clone() };
        if !envelope.event.replies_in_ack() {
            // Nothing to carry back, so the ack does not wait on the store or
            // the response_url post.
            self.acknowledge(&envelope.envelope_id, None, fields).await;
            self.dispatch(&envelope, &context, fields).await;
            return;
        }

        let reply = self.dispatch(&envelope, &context, fields).await;
        self.acknowledge(&envelope.envelope_id, reply.as_ref(), fields).await;
    }

    async fn dispatch(
        &self,
        envelope: &SlackEnvelope,
        context: &EventContext,
        (user_id, team_id): (&str, &str),
    ) -> Option<MessageTemplate> {
        match self.dispatcher.dispatch(envelope, context).await {
            Ok(result) => result.message().cloned(),
            Err(error) => {
                warn!(
                    event_name = "ingress.slack.dispatch_failed",
                    envelope_id = %envelope.envelope_id,
                    correlation_id = %envelope.envelope_id,
                    user_id,
                    team_id,
                    error = %error,
                    "event dispatch failed; continuing socket loop"
                );
                None
            }
        }
    }

    async fn acknowledge(
        &self,
        envelope_id: &str,
        payload: Option<&MessageTemplate>,
        (user_id, team_id): (&str, &str),
    ) {
        if let Err(error) = self.transport.acknowledge(envelope_id, payload).await {
            warn!(
                event_name = "ingress.slack.ack_failed",
                envelope_id,
                correlation_id = envelope_id,
                user_id,
                team_id,
                error = %error,
                "failed to acknowledge slack envelope"
            );
        } else {
            debug!(
                event_name = "ingress.slack.ack_sent",
                envelope_id,
                correlation_id = envelope_id,
                user_id,
                team_id,
                with_payload = payload.is_some(),
                "acknowledged slack envelope"
            );
        }
    }
}

fn correlation_fields(envelope: &SlackEnvelope) -> (&str, &str) {
    match &envelope.event {
        SlackEvent::SlashCommand(payload) => (&payload.user_id, &payload.team_id),
        SlackEvent::BlockAction(event) => (&event.user_id, &event.team_id),
        SlackEvent::Unsupported { .. } => ("unknown", "unknown"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use async_trait::async_trait;
    use pocketbook_core::records::{RecordKey, RecordStore};
    use pocketbook_db::InMemoryRecordStore;
    use serde_json::json;
    use tokio::sync::Mutex;

    use super::{ReconnectPolicy, SocketModeRunner, SocketTransport, TransportError};
    use crate::blocks::MessageTemplate;
    use crate::callback::{CallbackError, CallbackResponder, ResponseUrlReply};
    use crate::events::{default_dispatcher, EventDispatcher, SlackEnvelope, SlackEvent};

    #[derive(Default)]
    struct ScriptedTransport {
        state: Mutex<ScriptedState>,
    }

    #[derive(Default)]
    struct ScriptedState {
        connect_results: VecDeque<Result<(), TransportError>>,
        frames: VecDeque<Result<Option<String>, TransportError>>,
        disconnect_results: VecDeque<Result<(), TransportError>>,
        connect_attempts: usize,
        acknowledgements: Vec<(String, Option<MessageTemplate>)>,
        disconnect_calls: usize,
    }

    impl ScriptedTransport {
        fn with_script(
            connect_results: Vec<Result<(), TransportError>>,
            frames: Vec<Result<Option<String>, TransportError>>,
            disconnect_results: Vec<Result<(), TransportError>>,
        ) -> Self {
            Self {
                state: Mutex::new(ScriptedState {
                    connect_results: connect_results.into(),
                    frames: frames.into(),
                    disconnect_results: disconnect_results.into(),
                    ..ScriptedState::default()
                }),
            }
        }

        async fn connect_attempts(&self) -> usize {
            self.state.lock().await.connect_attempts
        }

        async fn acknowledged_ids(&self) -> Vec<String> {
            self.state.lock().await.acknowledgements.iter().map(|(id, _)| id.clone()).collect()
        }
    }

    #[async_trait]
    impl SocketTransport for ScriptedTransport {
        async fn connect(&self) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.connect_attempts += 1;
            state.connect_results.pop_front().unwrap_or(Ok(()))
        }

        async fn next_frame(&self) -> Result<Option<String>, TransportError> {
            let mut state = self.state.lock().await;
            state.frames.pop_front().unwrap_or(Ok(None))
        }

        async fn acknowledge(
            &self,
            envelope_id: &str,
            payload: Option<&MessageTemplate>,
        ) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.acknowledgements.push((envelope_id.to_owned(), payload.cloned()));
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.disconnect_calls += 1;
            state.disconnect_results.pop_front().unwrap_or(Ok(()))
        }
    }

    struct SilentResponder;

    #[async_trait]
    impl CallbackResponder for SilentResponder {
        async fn respond(
            &self,
            _response_url: &str,
            _reply: &ResponseUrlReply,
        ) -> Result<(), CallbackError> {
            Ok(())
        }
    }

    fn quick_policy() -> ReconnectPolicy {
        ReconnectPolicy { max_retries: 2, base_delay_ms: 0, max_delay_ms: 0 }
    }

    fn slash_frame(envelope_id: &str, text: &str) -> Result<Option<String>, TransportError> {
        Ok(Some(
            json!({
                "envelope_id": envelope_id,
                "type": "slash_commands",
                "payload": {
                    "command": "/pocketbook",
                    "text": text,
                    "user_id": "u1",
                    "team_id": "t1"
                }
            })
            .to_string(),
        ))
    }

    #[tokio::test]
    async fn reconnects_after_initial_connect_failure() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Err(TransportError::Connect("network down".to_owned())), Ok(())],
            vec![
                Ok(Some(json!({ "envelope_id": "env-1", "type": "events_api" }).to_string())),
                Ok(None),
            ],
            vec![Ok(())],
        ));

        let runner =
            SocketModeRunner::new(transport.clone(), EventDispatcher::default(), quick_policy());

        runner.start().await.expect("runner should not fail");

        assert_eq!(transport.connect_attempts().await, 2);
        assert_eq!(transport.acknowledged_ids().await, vec!["env-1"]);
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
            vec![],
        ));

        let runner =
            SocketModeRunner::new(transport.clone(), EventDispatcher::default(), quick_policy());

        runner.start().await.expect("runner should degrade gracefully");
        assert_eq!(transport.connect_attempts().await, 3);
    }

    #[tokio::test]
    async fn receive_failure_reconnects_and_resumes() {
        let store = Arc::new(InMemoryRecordStore::default());
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(()), Ok(())],
            vec![
                slash_frame("env-1", "first"),
                Err(TransportError::Receive("connection reset".to_owned())),
                slash_frame("env-2", "second"),
                Ok(None),
            ],
            vec![Ok(())],
        ));
        let runner = SocketModeRunner::new(
            transport.clone(),
            default_dispatcher(store.clone(), Arc::new(SilentResponder), "/pocketbook"),
            quick_policy(),
        );

        runner.start().await.expect("runner should recover");

        assert_eq!(transport.connect_attempts().await, 2);
        assert_eq!(transport.acknowledged_ids().await, vec!["env-1", "env-2"]);
        assert_eq!(
            store.get(&RecordKey::new("u1", "t1")).await.expect("get"),
            vec!["first", "second"]
        );
    }

    #[tokio::test]
    async fn acknowledgement_carries_handler_reply() {
        let store =
            Arc::new(InMemoryRecordStore::with_records(RecordKey::new("u1", "t1"), ["buy milk"]));
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(())],
            vec![slash_frame("env-1", ""), Ok(None)],
            vec![Ok(())],
        ));
        let runner = SocketModeRunner::new(
            transport.clone(),
            default_dispatcher(store, Arc::new(SilentResponder), "/pocketbook"),
            quick_policy(),
        );

        runner.start().await.expect("runner");

        let state = transport.state.lock().await;
        let (envelope_id, payload) = &state.acknowledgements[0];
        assert_eq!(envelope_id, "env-1");
        assert_eq!(payload.as_ref().map(|message| message.blocks.len()), Some(1));
    }

    #[tokio::test]
    async fn malformed_and_control_frames_do_not_stop_the_loop() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(())],
            vec![
                Ok(Some(r#"{"type":"hello"}"#.to_owned())),
                Ok(Some("garbage".to_owned())),
                Ok(Some(
                    json!({ "envelope_id": "env-bad", "type": "slash_commands" }).to_string(),
                )),
                slash_frame("env-ok", "buy milk"),
                Ok(None),
            ],
            vec![Ok(())],
        ));
        let runner = SocketModeRunner::new(
            transport.clone(),
            default_dispatcher(
                Arc::new(InMemoryRecordStore::default()),
                Arc::new(SilentResponder),
                "/pocketbook",
            ),
            quick_policy(),
        );

        runner.start().await.expect("runner");

        let state = transport.state.lock().await;
        assert_eq!(
            state.acknowledgements,
            vec![("env-bad".to_owned(), None), ("env-ok".to_owned(), None)]
        );
        assert_eq!(state.disconnect_calls, 1);
    }

    struct AckObservingResponder {
        transport: Arc<ScriptedTransport>,
        acked_when_called: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CallbackResponder for AckObservingResponder {
        async fn respond(
            &self,
            _response_url: &str,
            _reply: &ResponseUrlReply,
        ) -> Result<(), CallbackError> {
            let acked = self.transport.acknowledged_ids().await;
            self.acked_when_called.lock().await.extend(acked);
            Ok(())
        }
    }

    #[tokio::test]
    async fn button_clicks_are_acknowledged_before_the_callback_runs() {
        let click = json!({
            "envelope_id": "env-click",
            "type": "interactive",
            "payload": {
                "type": "block_actions",
                "response_url": "https://hooks.slack.test/actions/1",
                "user": { "id": "u1", "name": "Alice" },
                "team": { "id": "t1" },
                "actions": [{ "text": { "type": "plain_text", "text": "send" }, "value": "b" }]
            }
        });
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(())],
            vec![Ok(Some(click.to_string())), Ok(None)],
            vec![Ok(())],
        ));
        let responder = Arc::new(AckObservingResponder {
            transport: transport.clone(),
            acked_when_called: Mutex::default(),
        });
        let runner = SocketModeRunner::new(
            transport.clone(),
            default_dispatcher(
                Arc::new(InMemoryRecordStore::default()),
                responder.clone(),
                "/pocketbook",
            ),
            quick_policy(),
        );

        runner.start().await.expect("runner");

        assert_eq!(*responder.acked_when_called.lock().await, vec!["env-click"]);
        assert_eq!(transport.acknowledged_ids().await, vec!["env-click"]);
    }

    #[test]
    fn extracts_user_and_team_correlation_fields() {
        let envelope = SlackEnvelope {
            envelope_id: "env-2".to_owned(),
            event: SlackEvent::Unsupported { event_type: "events_api".to_owned() },
        };

        assert_eq!(super::correlation_fields(&envelope), ("unknown", "unknown"));
    }
}
