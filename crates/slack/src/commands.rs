use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use pocketbook_core::errors::{ApplicationError, DomainError};
use pocketbook_core::records::{RecordAction, RecordKey, RecordStore, StoreError};

use crate::blocks::{self, MessageTemplate};

pub const DEFAULT_COMMAND: &str = "/pocketbook";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlashCommandPayload {
    pub command: String,
    pub text: String,
    pub user_id: String,
    pub team_id: String,
    pub channel_id: Option<String>,
}

impl SlashCommandPayload {
    pub fn record_key(&self) -> RecordKey {
        RecordKey::new(self.user_id.clone(), self.team_id.clone())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordCommand {
    List,
    Add { text: String },
    RemovePrompt,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandReply {
    /// Rendered list returned in the socket acknowledgement.
    Records(MessageTemplate),
    /// Bare acknowledgement with no reply body.
    Acknowledged,
}

impl CommandReply {
    pub fn into_message(self) -> Option<MessageTemplate> {
        match self {
            Self::Records(message) => Some(message),
            Self::Acknowledged => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("unsupported slash command: {0}")]
    UnsupportedCommand(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandRouteError {
    #[error(transparent)]
    Parse(#[from] CommandParseError),
    #[error("record storage failed: {0}")]
    Storage(#[from] StoreError),
}

impl From<CommandRouteError> for ApplicationError {
    fn from(value: CommandRouteError) -> Self {
        match value {
            CommandRouteError::Parse(CommandParseError::UnsupportedCommand(command)) => {
                DomainError::UnsupportedCommand(command).into()
            }
            CommandRouteError::Storage(store_error) => store_error.into(),
        }
    }
}

pub fn parse_record_command(input: &str) -> RecordCommand {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return RecordCommand::List;
    }

    if trimmed.eq_ignore_ascii_case("delete") || trimmed.eq_ignore_ascii_case("remove") {
        return RecordCommand::RemovePrompt;
    }

    RecordCommand::Add { text: trimmed.to_owned() }
}

pub struct CommandRouter {
    store: Arc<dyn RecordStore>,
    command_name: String,
}

impl CommandRouter {
    pub fn new(store: Arc<dyn RecordStore>, command_name: impl Into<String>) -> Self {
        Self { store, command_name: command_name.into() }
    }

    pub fn command_name(&self) -> &str {
        &self.command_name
    }

    pub async fn route(
        &self,
        payload: &SlashCommandPayload,
    ) -> Result<CommandReply, CommandRouteError> {
        if payload.command != self.command_name {
            return Err(CommandParseError::UnsupportedCommand(payload.command.clone()).into());
        }

        let key = payload.record_key();
        match parse_record_command(&payload.text) {
            RecordCommand::List => self.render(&key, RecordAction::Send).await,
            RecordCommand::RemovePrompt => self.render(&key, RecordAction::Delete).await,
            RecordCommand::Add { text } => {
                self.store.append(&key, &text).await?;
                info!(
                    event_name = "records.command.added",
                    user_id = %key.user_id,
                    team_id = %key.team_id,
                    "record appended"
                );
                Ok(CommandReply::Acknowledged)
            }
        }
    }

    async fn render(
        &self,
        key: &RecordKey,
        action: RecordAction,
    ) -> Result<CommandReply, CommandRouteError> {
        let records = match self.store.get(key).await {
            Ok(records) => records,
            Err(StoreError::NotFound) => Vec::new(),
            Err(error) => return Err(error.into()),
        };

        Ok(CommandReply::Records(blocks::record_list_message(&records, action)))
    }
}
