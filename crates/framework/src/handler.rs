//! Handler table and the delivery loop entry point.

use std::{
    fmt, ops,
    sync::{Arc, OnceLock, RwLock, Weak},
};

use {
    antares_common::types::ChatType,
    regex::Regex,
    tracing::{debug, error, trace},
};

use crate::{
    callback::Callback, language::Language, module::ModuleDescriptor, transport::Transport,
    update::Update,
};

/// Composable condition on an update.
#[derive(Debug, Clone)]
pub enum MessageFilter {
    Any,
    /// The update is a message with text.
    Text,
    Photo,
    ChatType(ChatType),
    Not(Box<MessageFilter>),
    And(Box<MessageFilter>, Box<MessageFilter>),
    Or(Box<MessageFilter>, Box<MessageFilter>),
}

impl MessageFilter {
    /// Photos posted anywhere except channels.
    pub fn photo_outside_channels() -> Self {
        Self::Photo & !Self::ChatType(ChatType::Channel)
    }

    pub fn matches(&self, update: &Update) -> bool {
        match self {
            Self::Any => true,
            Self::Text => update.message_text().is_some(),
            Self::Photo => update.has_photo(),
            Self::ChatType(t) => update.chat_type == *t,
            Self::Not(inner) => !inner.matches(update),
            Self::And(a, b) => a.matches(update) && b.matches(update),
            Self::Or(a, b) => a.matches(update) || b.matches(update),
        }
    }
}

impl ops::BitAnd for MessageFilter {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self::And(Box::new(self), Box::new(rhs))
    }
}

impl ops::BitOr for MessageFilter {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self::Or(Box::new(self), Box::new(rhs))
    }
}

impl ops::Not for MessageFilter {
    type Output = Self;

    fn not(self) -> Self {
        Self::Not(Box::new(self))
    }
}

/// Match on button callback data.
#[derive(Debug, Clone)]
pub enum ButtonPattern {
    /// Literal prefix.
    Prefix(String),
    Regex(Regex),
}

impl ButtonPattern {
    pub fn matches(&self, data: &str) -> bool {
        match self {
            Self::Prefix(prefix) => data.starts_with(prefix.as_str()),
            Self::Regex(re) => re.is_match(data),
        }
    }
}

/// Which updates a handler responds to.
#[derive(Clone)]
pub enum EventFilter {
    Command(String),
    /// Any message, commands included.
    Message,
    /// Button clicks, optionally restricted by their data.
    Button(Option<ButtonPattern>),
    Custom(Arc<dyn Fn(&Update) -> bool + Send + Sync>),
}

impl EventFilter {
    fn matches(&self, update: &Update, bot_username: Option<&str>) -> bool {
        match self {
            Self::Command(name) => update.command().is_some_and(|cmd| {
                cmd.name == name.as_str()
                    && match (cmd.target_bot, bot_username) {
                        (Some(target), Some(me)) => target.eq_ignore_ascii_case(me),
                        _ => true,
                    }
            }),
            Self::Message => !update.is_button_click(),
            Self::Button(pattern) => match (pattern, update.button_data()) {
                (None, _) => update.is_button_click(),
                (Some(pattern), Some(data)) => pattern.matches(data),
                (Some(_), None) => false,
            },
            Self::Custom(predicate) => predicate(update),
        }
    }
}

impl fmt::Debug for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command(name) => f.debug_tuple("Command").field(name).finish(),
            Self::Message => f.write_str("Message"),
            Self::Button(pattern) => f.debug_tuple("Button").field(pattern).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// One registered handler.
#[derive(Debug)]
pub struct EventHandler {
    trigger: EventFilter,
    filter: Option<MessageFilter>,
    block: bool,
    callback: Arc<Callback>,
    /// Module that registered this handler, if any.
    owner: OnceLock<Weak<ModuleDescriptor>>,
}

impl EventHandler {
    pub fn new(
        trigger: EventFilter,
        filter: Option<MessageFilter>,
        block: bool,
        callback: Arc<Callback>,
    ) -> Self {
        Self {
            trigger,
            filter,
            block,
            callback,
            owner: OnceLock::new(),
        }
    }

    pub fn callback(&self) -> &Arc<Callback> {
        &self.callback
    }

    pub fn is_blocking(&self) -> bool {
        self.block
    }

    /// Name of the module that registered this handler.
    pub fn owner(&self) -> Option<String> {
        self.owner
            .get()
            .and_then(Weak::upgrade)
            .map(|d| d.name().to_string())
    }

    /// Handlers without an owner are always live. An owned handler is live
    /// while its module is loaded and enabled.
    pub fn is_live(&self) -> bool {
        match self.owner.get() {
            None => true,
            Some(owner) => owner.upgrade().is_some_and(|d| d.is_enabled()),
        }
    }

    pub fn matches(&self, update: &Update, bot_username: Option<&str>) -> bool {
        self.trigger.matches(update, bot_username)
            && self.filter.as_ref().is_none_or(|f| f.matches(update))
    }
}

/// Registered handlers in registration order.
///
/// Modules register during `post_init`, which runs in priority order, so the
/// first matching handler belongs to the highest-priority module.
#[derive(Debug, Default)]
pub struct HandlerTable {
    handlers: RwLock<Vec<Arc<EventHandler>>>,
    bot_username: RwLock<Option<String>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, handler: EventHandler) {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(handler));
    }

    /// Drop every handler. Used before modules are reloaded.
    pub fn clear(&self) {
        self.handlers.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Registered handlers in order.
    pub fn snapshot(&self) -> Vec<Arc<EventHandler>> {
        self.handlers.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.handlers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attribute every unowned handler registered at or after `from` to
    /// `module`. The registry calls this right after the module's
    /// `post_init`.
    pub fn claim(&self, from: usize, module: &Arc<ModuleDescriptor>) {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        let mut claimed = 0;
        for handler in handlers.iter().skip(from) {
            if handler.owner.set(Arc::downgrade(module)).is_ok() {
                claimed += 1;
            }
        }
        trace!(module = %module.name(), claimed, "attributed handlers");
    }

    /// Commands addressed to another bot (`/cmd@other_bot`) are not matched
    /// once the username is known.
    pub fn set_bot_username(&self, username: impl Into<String>) {
        *self.bot_username.write().unwrap_or_else(|e| e.into_inner()) = Some(username.into());
    }

    pub fn find(&self, update: &Update) -> Option<Arc<EventHandler>> {
        let username = self
            .bot_username
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|h| h.is_live() && h.matches(update, username.as_deref()))
            .cloned()
    }
}

/// Collaborators every invocation needs.
#[derive(Clone)]
pub struct DispatchEnv {
    pub transport: Arc<dyn Transport>,
    pub language: Arc<Language>,
}

impl DispatchEnv {
    pub fn new(transport: Arc<dyn Transport>, language: Arc<Language>) -> Self {
        Self {
            transport,
            language,
        }
    }
}

/// Routes inbound updates to the first matching handler.
#[derive(Clone)]
pub struct Dispatcher {
    table: Arc<HandlerTable>,
    env: DispatchEnv,
}

impl Dispatcher {
    pub fn new(env: DispatchEnv) -> Self {
        Self {
            table: env.transport.handler_table(),
            env,
        }
    }

    pub fn table(&self) -> &Arc<HandlerTable> {
        &self.table
    }

    /// Deliver one update. Returns whether a handler took it.
    ///
    /// Blocking handlers finish before this returns; the rest run on their
    /// own task. Handler failures end here and are logged.
    pub async fn dispatch(&self, update: Update) -> bool {
        let Some(handler) = self.table.find(&update) else {
            trace!(chat_id = update.chat_id, "no handler matched");
            return false;
        };
        debug!(callback = %handler.callback().name(), chat_id = update.chat_id, "dispatching update");

        if handler.is_blocking() {
            run_handler(handler, update, self.env.clone()).await;
        } else {
            tokio::spawn(run_handler(handler, update, self.env.clone()));
        }
        true
    }
}

async fn run_handler(handler: Arc<EventHandler>, update: Update, env: DispatchEnv) {
    let chat_id = update.chat_id;
    if let Err(e) = handler.callback().invoke(update, &env).await {
        error!(callback = %handler.callback().name(), chat_id, error = %e, "callback failed");
    }
}
