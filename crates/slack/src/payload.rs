//! Socket Mode frame decoding.
//!
//! Raw frames are decoded exactly once into [`SlackEnvelope`]; nothing past
//! this module looks at untyped JSON.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use pocketbook_core::errors::DomainError;

use crate::actions::BlockActionEvent;
use crate::commands::SlashCommandPayload;
use crate::events::{SlackEnvelope, SlackEvent};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("socket frame is not valid JSON: {0}")]
    Json(String),
    #[error("envelope {envelope_id} is malformed: {reason}")]
    Malformed { envelope_id: String, reason: String },
}

impl DecodeError {
    /// Envelope id to acknowledge, when the frame got far enough to carry one.
    pub fn envelope_id(&self) -> Option<&str> {
        match self {
            Self::Json(_) => None,
            Self::Malformed { envelope_id, .. } => Some(envelope_id),
        }
    }
}

impl From<DecodeError> for DomainError {
    fn from(value: DecodeError) -> Self {
        DomainError::MalformedEvent(value.to_string())
    }
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(rename = "type")]
    frame_type: String,
    #[serde(default)]
    payload: Option<Value>,
}

#[derive(Deserialize)]
struct RawSlashCommand {
    command: String,
    #[serde(default)]
    text: String,
    user_id: String,
    team_id: String,
    #[serde(default)]
    channel_id: Option<String>,
}

#[derive(Deserialize)]
struct RawInteractionKind {
    #[serde(rename = "type")]
    interaction_type: String,
}

#[derive(Deserialize)]
struct RawBlockActions {
    response_url: String,
    user: RawUser,
    #[serde(default)]
    team: Option<RawTeam>,
    #[serde(default)]
    actions: Vec<RawAction>,
}

#[derive(Deserialize)]
struct RawUser {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    team_id: Option<String>,
}

#[derive(Deserialize)]
struct RawTeam {
    id: String,
}

#[derive(Deserialize)]
struct RawAction {
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    text: Option<RawText>,
}

#[derive(Deserialize)]
struct RawText {
    text: String,
}

/// Returns `Ok(None)` for control frames (`hello`, `disconnect`) that carry
/// no envelope id and need no acknowledgement.
pub fn decode_frame(raw: &str) -> Result<Option<SlackEnvelope>, DecodeError> {
    let frame: RawFrame =
        serde_json::from_str(raw).map_err(|error| DecodeError::Json(error.to_string()))?;

    let Some(envelope_id) = frame.envelope_id else {
        return Ok(None);
    };

    let event = match frame.frame_type.as_str() {
        "slash_commands" => {
            let payload = require_payload(&envelope_id, frame.payload)?;
            SlackEvent::SlashCommand(decode_slash_command(&envelope_id, payload)?)
        }
        "interactive" => {
            let payload = require_payload(&envelope_id, frame.payload)?;
            decode_interactive(&envelope_id, payload)?
        }
        other => SlackEvent::Unsupported { event_type: other.to_owned() },
    };

    Ok(Some(SlackEnvelope { envelope_id, event }))
}

fn require_payload(envelope_id: &str, payload: Option<Value>) -> Result<Value, DecodeError> {
    payload.ok_or_else(|| malformed(envelope_id, "missing payload"))
}

fn malformed(envelope_id: &str, reason: impl Into<String>) -> DecodeError {
    DecodeError::Malformed { envelope_id: envelope_id.to_owned(), reason: reason.into() }
}

fn decode_slash_command(
    envelope_id: &str,
    payload: Value,
) -> Result<SlashCommandPayload, DecodeError> {
    let raw: RawSlashCommand = serde_json::from_value(payload)
        .map_err(|error| malformed(envelope_id, format!("slash command: {error}")))?;

    Ok(SlashCommandPayload {
        command: raw.command,
        text: raw.text,
        user_id: raw.user_id,
        team_id: raw.team_id,
        channel_id: raw.channel_id,
    })
}

fn decode_interactive(envelope_id: &str, payload: Value) -> Result<SlackEvent, DecodeError> {
    let kind: RawInteractionKind = serde_json::from_value(payload.clone())
        .map_err(|error| malformed(envelope_id, format!("interaction: {error}")))?;

    if kind.interaction_type != "block_actions" {
        return Ok(SlackEvent::Unsupported {
            event_type: format!("interactive.{}", kind.interaction_type),
        });
    }

    let raw: RawBlockActions = serde_json::from_value(payload)
        .map_err(|error| malformed(envelope_id, format!("block actions: {error}")))?;

    let team_id = raw
        .team
        .map(|team| team.id)
        .or(raw.user.team_id)
        .ok_or_else(|| malformed(envelope_id, "block actions: missing team id"))?;
    let action = raw
        .actions
        .into_iter()
        .next()
        .ok_or_else(|| malformed(envelope_id, "block actions: no actions"))?;
    let action_label = action
        .text
        .map(|text| text.text)
        .ok_or_else(|| malformed(envelope_id, "block actions: action has no label"))?;
    let value = action
        .value
        .ok_or_else(|| malformed(envelope_id, "block actions: action has no value"))?;
    let user_name = raw.user.name.or(raw.user.username).unwrap_or_else(|| raw.user.id.clone());

    Ok(SlackEvent::BlockAction(BlockActionEvent {
        response_url: raw.response_url,
        user_id: raw.user.id,
        user_name,
        team_id,
        action_label,
        value,
    }))
}

#[cfg(test)]
mod tests {
    use pocketbook_core::errors::DomainError;
    use serde_json::{json, Value};

    use super::{decode_frame, DecodeError};
    use crate::actions::BlockActionEvent;
    use crate::commands::SlashCommandPayload;
    use crate::events::SlackEvent;

    fn frame(value: Value) -> String {
        value.to_string()
    }

    #[test]
    fn decodes_slash_command_envelope() {
        let envelope = decode_frame(&frame(json!({
            "envelope_id": "env-1",
            "type": "slash_commands",
            "accepts_response_payload": true,
            "payload": {
                "command": "/pocketbook",
                "text": "buy milk",
                "user_id": "u1",
                "team_id": "t1",
                "channel_id": "C1",
                "response_url": "https://hooks.slack.test/commands/1"
            }
        })))
        .expect("decode")
        .expect("envelope");

        assert_eq!(envelope.envelope_id, "env-1");
        assert_eq!(
            envelope.event,
            SlackEvent::SlashCommand(SlashCommandPayload {
                command: "/pocketbook".to_owned(),
                text: "buy milk".to_owned(),
                user_id: "u1".to_owned(),
                team_id: "t1".to_owned(),
                channel_id: Some("C1".to_owned()),
            })
        );
    }

    #[test]
    fn decodes_first_block_action() {
        let envelope = decode_frame(&frame(json!({
            "envelope_id": "env-2",
            "type": "interactive",
            "payload": {
                "type": "block_actions",
                "response_url": "https://hooks.slack.test/actions/2",
                "user": { "id": "u1", "username": "alice", "name": "Alice", "team_id": "t1" },
                "team": { "id": "t1", "domain": "acme" },
                "actions": [
                    {
                        "type": "button",
                        "action_id": "record.send.v1",
                        "text": { "type": "plain_text", "text": "send" },
                        "value": "b"
                    },
                    {
                        "type": "button",
                        "action_id": "record.delete.v1",
                        "text": { "type": "plain_text", "text": "delete" },
                        "value": "ignored"
                    }
                ]
            }
        })))
        .expect("decode")
        .expect("envelope");

        assert_eq!(
            envelope.event,
            SlackEvent::BlockAction(BlockActionEvent {
                response_url: "https://hooks.slack.test/actions/2".to_owned(),
                user_id: "u1".to_owned(),
                user_name: "Alice".to_owned(),
                team_id: "t1".to_owned(),
                action_label: "send".to_owned(),
                value: "b".to_owned(),
            })
        );
    }

    #[test]
    fn team_falls_back_to_user_team_and_name_to_username() {
        let envelope = decode_frame(&frame(json!({
            "envelope_id": "env-3",
            "type": "interactive",
            "payload": {
                "type": "block_actions",
                "response_url": "https://hooks.slack.test/actions/3",
                "user": { "id": "u1", "username": "alice", "team_id": "t9" },
                "actions": [{ "text": { "text": "delete" }, "value": "a" }]
            }
        })))
        .expect("decode")
        .expect("envelope");

        let SlackEvent::BlockAction(event) = envelope.event else {
            panic!("expected block action");
        };
        assert_eq!(event.team_id, "t9");
        assert_eq!(event.user_name, "alice");
    }

    #[test]
    fn other_interactions_are_unsupported() {
        for interaction in ["shortcut", "view_submission"] {
            let envelope = decode_frame(&frame(json!({
                "envelope_id": "env-4",
                "type": "interactive",
                "payload": { "type": interaction }
            })))
            .expect("decode")
            .expect("envelope");

            assert_eq!(
                envelope.event,
                SlackEvent::Unsupported { event_type: format!("interactive.{interaction}") }
            );
        }
    }

    #[test]
    fn other_envelope_types_are_unsupported() {
        let envelope = decode_frame(&frame(json!({
            "envelope_id": "env-5",
            "type": "events_api",
            "payload": { "event": { "type": "app_mention" } }
        })))
        .expect("decode")
        .expect("envelope");

        assert_eq!(envelope.event, SlackEvent::Unsupported { event_type: "events_api".to_owned() });
    }

    #[test]
    fn control_frames_are_skipped() {
        assert_eq!(decode_frame(r#"{"type":"hello","num_connections":1}"#), Ok(None));
        assert_eq!(decode_frame(r#"{"type":"disconnect","reason":"refresh_requested"}"#), Ok(None));
    }

    #[test]
    fn block_action_without_actions_is_malformed_but_ackable() {
        let error = decode_frame(&frame(json!({
            "envelope_id": "env-6",
            "type": "interactive",
            "payload": {
                "type": "block_actions",
                "response_url": "https://hooks.slack.test/actions/6",
                "user": { "id": "u1" },
                "team": { "id": "t1" },
                "actions": []
            }
        })))
        .expect_err("no actions");

        assert_eq!(error.envelope_id(), Some("env-6"));
        assert!(matches!(
            DomainError::from(error),
            DomainError::MalformedEvent(reason) if reason.contains("no actions")
        ));
    }

    #[test]
    fn slash_command_without_user_is_malformed() {
        let error = decode_frame(&frame(json!({
            "envelope_id": "env-7",
            "type": "slash_commands",
            "payload": { "command": "/pocketbook", "team_id": "t1" }
        })))
        .expect_err("missing user");

        assert!(matches!(
            error,
            DecodeError::Malformed { ref envelope_id, .. } if envelope_id == "env-7"
        ));
    }

    #[test]
    fn garbage_is_not_ackable() {
        let error = decode_frame("not json").expect_err("garbage");

        assert_eq!(error.envelope_id(), None);
    }
}
