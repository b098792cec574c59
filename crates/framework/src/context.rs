//! Invocation-scoped context store.
//!
//! The active [`Context`] lives in a tokio task-local slot. Only the callback
//! dispatcher can enter a scope; everything running inside the invocation can
//! read it through [`current`] without threading it through every call. Tasks
//! spawned from a handler start with an empty slot, so one chat's context can
//! never be observed by another invocation.

use std::{future::Future, sync::Arc};

use antares_common::types::ChatType;

use crate::{
    error::{Error, Result},
    update::Update,
};

tokio::task_local! {
    static ACTIVE: Arc<Context>;
}

/// Per-invocation identity of the originating conversation.
#[derive(Debug, Clone)]
pub struct Context {
    update: Update,
    owner_id: Option<i64>,
}

impl Context {
    pub fn new(update: Update, owner_id: Option<i64>) -> Self {
        Self { update, owner_id }
    }

    pub fn chat_id(&self) -> i64 {
        self.update.chat_id
    }

    pub fn chat_type(&self) -> ChatType {
        self.update.chat_type
    }

    /// Chat type as shown to users in denial replies.
    pub fn chat_type_str(&self) -> &'static str {
        self.update.chat_type.as_str()
    }

    pub fn user_id(&self) -> Option<i64> {
        self.update.user_id
    }

    pub fn message_id(&self) -> Option<i32> {
        self.update.message_id
    }

    pub fn update(&self) -> &Update {
        &self.update
    }

    /// Configured owner identity, captured when the invocation started.
    pub fn owner_id(&self) -> Option<i64> {
        self.owner_id
    }

    /// Whether the event comes from the owner, either as the sender or as the
    /// chat itself.
    pub fn is_owner(&self) -> bool {
        self.owner_id
            .is_some_and(|owner| self.chat_id() == owner || self.user_id() == Some(owner))
    }
}

/// Run `fut` with `ctx` as the active context. The slot is cleared when the
/// future completes, including when it returns an error or is dropped.
pub(crate) async fn scope<F: Future>(ctx: Arc<Context>, fut: F) -> F::Output {
    ACTIVE.scope(ctx, fut).await
}

/// The context of the invocation running on the current task, if any.
pub fn current() -> Option<Arc<Context>> {
    ACTIVE.try_with(Arc::clone).ok()
}

/// Like [`current`], but an error outside of an invocation.
pub fn require() -> Result<Arc<Context>> {
    current().ok_or(Error::NoContext)
}
