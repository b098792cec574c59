//! The messaging transport as seen by the core.

use std::sync::Arc;

use {anyhow::Result, async_trait::async_trait, tracing::debug};

use crate::{
    error::Error,
    handler::{EventHandler, HandlerTable},
};

/// Reference to a message the transport has sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentMessage {
    pub chat_id: i64,
    pub message_id: i32,
}

/// Send/delete primitives plus handler registration.
///
/// Implementations own a [`HandlerTable`]; inbound updates are matched
/// against it by the [`crate::Dispatcher`] in registration order.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<SentMessage>;

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<()>;

    /// Acknowledge a button click so the client stops showing a spinner.
    async fn answer_button(&self, query_id: &str) -> Result<()>;

    /// The table that [`Transport::add_handler`] registers into.
    fn handler_table(&self) -> Arc<HandlerTable>;

    /// Administrative owner used by owner-level permission checks.
    fn owner_id(&self) -> Option<i64>;

    fn add_handler(&self, handler: EventHandler) {
        debug!(callback = %handler.callback().name(), "registering handler");
        self.handler_table().push(handler);
    }
}

/// Delete a message, retrying immediately up to `max_tries` times.
///
/// Returns `Ok(false)` when every attempt failed. Deleting is idempotent and
/// best-effort, so failures are reported rather than raised.
pub async fn delete_message_with_retry(
    transport: &dyn Transport,
    chat_id: i64,
    message_id: i32,
    max_tries: u32,
) -> crate::Result<bool> {
    if max_tries == 0 {
        return Err(Error::InvalidRetryCount);
    }
    for attempt in 1..=max_tries {
        match transport.delete_message(chat_id, message_id).await {
            Ok(()) => return Ok(true),
            Err(e) => debug!(chat_id, message_id, attempt, error = %e, "delete_message failed"),
        }
    }
    Ok(false)
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    //! In-memory transport that records everything sent through it.

    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering},
    };

    use {anyhow::Result, async_trait::async_trait};

    use super::{SentMessage, Transport};
    use crate::handler::HandlerTable;

    #[derive(Default)]
    pub struct RecordingTransport {
        owner: Option<i64>,
        table: Arc<HandlerTable>,
        sent: Mutex<Vec<(i64, String)>>,
        deleted: Mutex<Vec<(i64, i32)>>,
        answered: Mutex<Vec<String>>,
        next_message_id: AtomicI32,
        fail_sends: AtomicBool,
        delete_failures: AtomicU32,
    }

    impl RecordingTransport {
        pub fn new(owner: Option<i64>) -> Self {
            Self {
                owner,
                ..Self::default()
            }
        }

        /// Make every `send_message` call fail from now on.
        pub fn fail_sends(&self) {
            self.fail_sends.store(true, Ordering::SeqCst);
        }

        /// Make the next `n` deletes fail.
        pub fn fail_next_deletes(&self, n: u32) {
            self.delete_failures.store(n, Ordering::SeqCst);
        }

        pub fn sent(&self) -> Vec<(i64, String)> {
            self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
        }

        pub fn deleted(&self) -> Vec<(i64, i32)> {
            self.deleted.lock().unwrap_or_else(|e| e.into_inner()).clone()
        }

        pub fn answered(&self) -> Vec<String> {
            self.answered.lock().unwrap_or_else(|e| e.into_inner()).clone()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send_message(&self, chat_id: i64, text: &str) -> Result<SentMessage> {
            if self.fail_sends.load(Ordering::SeqCst) {
                anyhow::bail!("send to {chat_id} failed");
            }
            self.sent
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push((chat_id, text.to_string()));
            Ok(SentMessage {
                chat_id,
                message_id: self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1,
            })
        }

        async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<()> {
            let failing = self
                .delete_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                anyhow::bail!("message {message_id} can't be deleted");
            }
            self.deleted
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push((chat_id, message_id));
            Ok(())
        }

        async fn answer_button(&self, query_id: &str) -> Result<()> {
            self.answered
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(query_id.to_string());
            Ok(())
        }

        fn handler_table(&self) -> Arc<HandlerTable> {
            Arc::clone(&self.table)
        }

        fn owner_id(&self) -> Option<i64> {
            self.owner
        }
    }
}
