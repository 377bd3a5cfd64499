use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};

use pocketbook_core::records::{RecordAction, RecordKey, RecordStore, StoreError};

use crate::callback::{CallbackError, CallbackResponder, ResponseUrlReply};

/// First action of a `block_actions` interaction, flattened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockActionEvent {
    pub response_url: String,
    pub user_id: String,
    pub user_name: String,
    pub team_id: String,
    /// Visible button label; selects the behavior.
    pub action_label: String,
    /// Record text carried as the button value.
    pub value: String,
}

impl BlockActionEvent {
    pub fn record_key(&self) -> RecordKey {
        RecordKey::new(self.user_id.clone(), self.team_id.clone())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionOutcome {
    Removed,
    Sent,
    /// The store could not be reached; nothing was posted back.
    StoreFailed,
    Ignored,
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("reply to response_url failed: {0}")]
    Callback(#[from] CallbackError),
}

pub fn post_text(user_name: &str, value: &str) -> String {
    format!("post from @{user_name} - {value}")
}

pub struct ActionCallbackHandler {
    store: Arc<dyn RecordStore>,
    responder: Arc<dyn CallbackResponder>,
}

impl ActionCallbackHandler {
    pub fn new(store: Arc<dyn RecordStore>, responder: Arc<dyn CallbackResponder>) -> Self {
        Self { store, responder }
    }

    pub async fn handle(
        &self,
        event: &BlockActionEvent,
        correlation_id: &str,
    ) -> Result<ActionOutcome, ActionError> {
        match RecordAction::from_label(&event.action_label) {
            Some(RecordAction::Delete) => self.delete(event, correlation_id).await,
            Some(RecordAction::Send) => {
                let reply = ResponseUrlReply::in_channel_post(post_text(
                    &event.user_name,
                    &event.value,
                ));
                self.responder.respond(&event.response_url, &reply).await?;
                Ok(ActionOutcome::Sent)
            }
            None => Ok(ActionOutcome::Ignored),
        }
    }

    async fn delete(
        &self,
        event: &BlockActionEvent,
        correlation_id: &str,
    ) -> Result<ActionOutcome, ActionError> {
        let key = event.record_key();
        match self.store.remove(&key, &event.value).await {
            Ok(()) => {}
            Err(StoreError::NotFound) => {
                info!(
                    event_name = "records.action.remove_missing",
                    correlation_id,
                    user_id = %key.user_id,
                    team_id = %key.team_id,
                    "no record document to remove from"
                );
            }
            Err(StoreError::Unavailable(reason)) => {
                error!(
                    event_name = "records.action.remove_failed",
                    correlation_id,
                    user_id = %key.user_id,
                    team_id = %key.team_id,
                    error = %reason,
                    "record removal failed"
                );
                return Ok(ActionOutcome::StoreFailed);
            }
        }

        self.responder.respond(&event.response_url, &ResponseUrlReply::delete_original()).await?;
        Ok(ActionOutcome::Removed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use pocketbook_core::records::{RecordKey, RecordStore, StoreError};
    use pocketbook_db::InMemoryRecordStore;
    use tokio::sync::Mutex;

    use super::{ActionCallbackHandler, ActionError, ActionOutcome, BlockActionEvent};
    use crate::callback::{CallbackError, CallbackResponder, ResponseUrlReply};

    #[derive(Default)]
    struct RecordingResponder {
        replies: Mutex<Vec<(String, ResponseUrlReply)>>,
        reject_with: Option<u16>,
    }

    #[async_trait]
    impl CallbackResponder for RecordingResponder {
        async fn respond(
            &self,
            response_url: &str,
            reply: &ResponseUrlReply,
        ) -> Result<(), CallbackError> {
            self.replies.lock().await.push((response_url.to_owned(), reply.clone()));
            match self.reject_with {
                Some(status) => Err(CallbackError::Status(status)),
                None => Ok(()),
            }
        }
    }

    struct DownStore;

    #[async_trait]
    impl RecordStore for DownStore {
        async fn get(&self, _key: &RecordKey) -> Result<Vec<String>, StoreError> {
            Err(StoreError::Unavailable("timeout".to_owned()))
        }

        async fn append(&self, _key: &RecordKey, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("timeout".to_owned()))
        }

        async fn remove(&self, _key: &RecordKey, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("timeout".to_owned()))
        }
    }

    fn click(label: &str, value: &str) -> BlockActionEvent {
        BlockActionEvent {
            response_url: "https://hooks.slack.test/actions/1".to_owned(),
            user_id: "u1".to_owned(),
            user_name: "Alice".to_owned(),
            team_id: "t1".to_owned(),
            action_label: label.to_owned(),
            value: value.to_owned(),
        }
    }

    fn seeded() -> Arc<InMemoryRecordStore> {
        Arc::new(InMemoryRecordStore::with_records(RecordKey::new("u1", "t1"), ["a", "b"]))
    }

    #[tokio::test]
    async fn delete_removes_record_and_deletes_original() {
        let store = seeded();
        let responder = Arc::new(RecordingResponder::default());
        let handler = ActionCallbackHandler::new(store.clone(), responder.clone());

        let outcome = handler.handle(&click("delete", "a"), "env-1").await.expect("handled");

        assert_eq!(outcome, ActionOutcome::Removed);
        assert_eq!(store.get(&RecordKey::new("u1", "t1")).await.expect("get"), vec!["b"]);
        assert_eq!(
            responder.replies.lock().await.as_slice(),
            &[(
                "https://hooks.slack.test/actions/1".to_owned(),
                ResponseUrlReply::delete_original()
            )]
        );
    }

    #[tokio::test]
    async fn delete_on_missing_document_still_clears_original() {
        let responder = Arc::new(RecordingResponder::default());
        let handler =
            ActionCallbackHandler::new(Arc::new(InMemoryRecordStore::default()), responder.clone());

        let outcome = handler.handle(&click("delete", "a"), "env-2").await.expect("handled");

        assert_eq!(outcome, ActionOutcome::Removed);
        assert_eq!(responder.replies.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn store_outage_skips_callback() {
        let responder = Arc::new(RecordingResponder::default());
        let handler = ActionCallbackHandler::new(Arc::new(DownStore), responder.clone());

        let outcome = handler.handle(&click("delete", "a"), "env-3").await.expect("handled");

        assert_eq!(outcome, ActionOutcome::StoreFailed);
        assert!(responder.replies.lock().await.is_empty());
    }

    #[tokio::test]
    async fn send_posts_attributed_text_without_touching_store() {
        let store = seeded();
        let responder = Arc::new(RecordingResponder::default());
        let handler = ActionCallbackHandler::new(store.clone(), responder.clone());

        let outcome = handler.handle(&click("send", "b"), "env-4").await.expect("handled");

        assert_eq!(outcome, ActionOutcome::Sent);
        assert_eq!(
            responder.replies.lock().await[0].1,
            ResponseUrlReply::in_channel_post("post from @Alice - b")
        );
        assert_eq!(store.get(&RecordKey::new("u1", "t1")).await.expect("get"), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn unknown_label_is_ignored() {
        let responder = Arc::new(RecordingResponder::default());
        let handler = ActionCallbackHandler::new(seeded(), responder.clone());

        let outcome = handler.handle(&click("archive", "a"), "env-5").await.expect("handled");

        assert_eq!(outcome, ActionOutcome::Ignored);
        assert!(responder.replies.lock().await.is_empty());
    }

    #[tokio::test]
    async fn rejected_callback_is_reported() {
        let responder = Arc::new(RecordingResponder {
            reject_with: Some(500),
            ..RecordingResponder::default()
        });
        let handler = ActionCallbackHandler::new(seeded(), responder);

        let error = handler.handle(&click("send", "a"), "env-6").await.expect_err("500");

        assert!(matches!(error, ActionError::Callback(CallbackError::Status(500))));
    }
}
