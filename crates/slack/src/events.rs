use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info};

use pocketbook_core::errors::ApplicationError;
use pocketbook_core::records::RecordStore;

use crate::{
    actions::{ActionCallbackHandler, ActionError, ActionOutcome, BlockActionEvent},
    blocks::{self, MessageTemplate},
    callback::CallbackResponder,
    commands::{
        parse_record_command, CommandReply, CommandRouteError, CommandRouter, RecordCommand,
        SlashCommandPayload,
    },
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlackEnvelope {
    pub envelope_id: String,
    pub event: SlackEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlackEvent {
    SlashCommand(SlashCommandPayload),
    BlockAction(BlockActionEvent),
    Unsupported { event_type: String },
}

impl SlackEvent {
    pub fn event_type(&self) -> SlackEventType {
        match self {
            Self::SlashCommand(_) => SlackEventType::SlashCommand,
            Self::BlockAction(_) => SlackEventType::BlockAction,
            Self::Unsupported { .. } => SlackEventType::Unsupported,
        }
    }

    /// Only slash commands answer through the envelope acknowledgement;
    /// interactions reply via `response_url`.
    pub fn replies_in_ack(&self) -> bool {
        matches!(self, Self::SlashCommand(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SlackEventType {
    SlashCommand,
    BlockAction,
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    /// Reply carried in the envelope acknowledgement.
    Responded(MessageTemplate),
    Processed,
    Ignored,
}

impl HandlerResult {
    pub fn message(&self) -> Option<&MessageTemplate> {
        match self {
            Self::Responded(message) => Some(message),
            Self::Processed | Self::Ignored => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum EventHandlerError {
    #[error(transparent)]
    Action(#[from] ActionError),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> SlackEventType;
    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<SlackEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

/// Wires the slash command and button handlers to one shared store.
pub fn default_dispatcher(
    store: Arc<dyn RecordStore>,
    responder: Arc<dyn CallbackResponder>,
    command_name: &str,
) -> EventDispatcher {
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(SlashCommandHandler::new(CommandRouter::new(
        Arc::clone(&store),
        command_name,
    )));
    dispatcher.register(BlockActionHandler::new(ActionCallbackHandler::new(store, responder)));
    dispatcher
}

pub struct SlashCommandHandler {
    router: CommandRouter,
}

impl SlashCommandHandler {
    pub fn new(router: CommandRouter) -> Self {
        Self { router }
    }
}

#[async_trait]
impl EventHandler for SlashCommandHandler {
    fn event_type(&self) -> SlackEventType {
        SlackEventType::SlashCommand
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::SlashCommand(payload) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        match self.router.route(payload).await {
            Ok(CommandReply::Records(message)) => Ok(HandlerResult::Responded(message)),
            Ok(CommandReply::Acknowledged) => Ok(HandlerResult::Processed),
            Err(route_error) => {
                let event_name = match (&route_error, parse_record_command(&payload.text)) {
                    (CommandRouteError::Parse(_), _) => "records.command.unsupported",
                    (CommandRouteError::Storage(_), RecordCommand::Add { .. }) => {
                        "records.command.add_failed"
                    }
                    (CommandRouteError::Storage(_), RecordCommand::List) => {
                        "records.command.list_failed"
                    }
                    (CommandRouteError::Storage(_), RecordCommand::RemovePrompt) => {
                        "records.command.remove_prompt_failed"
                    }
                };
                error!(
                    event_name,
                    correlation_id = %ctx.correlation_id,
                    user_id = %payload.user_id,
                    team_id = %payload.team_id,
                    command = %payload.command,
                    error = %route_error,
                    "record command failed"
                );

                let interface =
                    ApplicationError::from(route_error).into_interface(ctx.correlation_id.clone());
                Ok(HandlerResult::Responded(blocks::error_message(
                    interface.user_message(),
                    interface.correlation_id(),
                )))
            }
        }
    }
}

pub struct BlockActionHandler {
    actions: ActionCallbackHandler,
}

impl BlockActionHandler {
    pub fn new(actions: ActionCallbackHandler) -> Self {
        Self { actions }
    }
}

#[async_trait]
impl EventHandler for BlockActionHandler {
    fn event_type(&self) -> SlackEventType {
        SlackEventType::BlockAction
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::BlockAction(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        match self.actions.handle(event, &ctx.correlation_id).await {
            Ok(ActionOutcome::Ignored) => Ok(HandlerResult::Ignored),
            Ok(outcome) => {
                info!(
                    event_name = "records.action.completed",
                    correlation_id = %ctx.correlation_id,
                    user_id = %event.user_id,
                    team_id = %event.team_id,
                    outcome = ?outcome,
                    "button action handled"
                );
                Ok(HandlerResult::Processed)
            }
            Err(action_error) => {
                error!(
                    event_name = "records.action.callback_failed",
                    correlation_id = %ctx.correlation_id,
                    user_id = %event.user_id,
                    team_id = %event.team_id,
                    error = %action_error,
                    "response_url reply failed"
                );
                Err(action_error.into())
            }
        }
    }
}
