//! Callbacks: immutable handler descriptions with a single `invoke` path.
//!
//! A [`Callback`] is assembled with a [`CallbackBuilder`] and never changes
//! afterwards, apart from the one-shot slot holding the module instance a
//! method callback runs against. Every invocation follows the same steps:
//!
//! 1. run the pre-hook, if any (button callbacks acknowledge the click here);
//! 2. enter a fresh task-local [`Context`] for the update;
//! 3. run the handler against the bound instance or as a free function;
//! 4. turn permission denials into a reply in the originating chat.
//!
//! Any other handler failure propagates to the caller.

use std::{
    any::Any,
    fmt,
    future::Future,
    sync::{Arc, OnceLock},
};

use {
    futures::{FutureExt, future::BoxFuture},
    regex::Regex,
    tracing::{debug, error},
};

use crate::{
    context::{self, Context},
    error::Error,
    handler::{ButtonPattern, DispatchEnv, EventFilter, EventHandler, MessageFilter},
    language::Language,
    transport::{SentMessage, Transport},
    update::{Update, UpdateKind},
};

/// Why a handler refused to act.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    InvalidUser,
    InvalidChatType,
    IgnoreChannelUpdate,
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InvalidUser => "invalid user",
            Self::InvalidChatType => "invalid chat type",
            Self::IgnoreChannelUpdate => "channel update ignored",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("permission denied: {0}")]
    Denied(Denial),

    /// The update is not meant for this handler. Nothing is sent.
    #[error("ignored")]
    Ignore,

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl From<Error> for HandlerError {
    fn from(err: Error) -> Self {
        Self::Failed(err.into())
    }
}

pub type HandlerResult = Result<(), HandlerError>;

/// How an invocation ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Handled,
    /// The handler was denied and the user has been told so.
    Denied(Denial),
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    Command,
    Message,
    ButtonClick,
    Custom,
}

/// What a handler receives for one update.
#[derive(Clone)]
pub struct Invocation {
    context: Arc<Context>,
    transport: Arc<dyn Transport>,
    language: Arc<Language>,
}

impl Invocation {
    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn update(&self) -> &Update {
        self.context.update()
    }

    pub fn chat_id(&self) -> i64 {
        self.context.chat_id()
    }

    /// Arguments following the command name, empty for non-command updates.
    pub fn args(&self) -> Vec<&str> {
        self.update()
            .command()
            .map(|cmd| cmd.args)
            .unwrap_or_default()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn language(&self) -> &Language {
        &self.language
    }

    /// Send `text` to the chat the update came from.
    pub async fn reply(&self, text: &str) -> anyhow::Result<SentMessage> {
        self.transport.send_message(self.chat_id(), text).await
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

type PreHook =
    Arc<dyn Fn(Update, Arc<dyn Transport>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;
type FreeFn = Box<dyn Fn(Invocation) -> BoxFuture<'static, HandlerResult> + Send + Sync>;
type MethodFn =
    Box<dyn Fn(Arc<dyn Any + Send + Sync>, Invocation) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

enum Target {
    Free(FreeFn),
    Method {
        run: MethodFn,
        type_name: &'static str,
        instance: OnceLock<Arc<dyn Any + Send + Sync>>,
    },
}

pub struct Callback {
    name: String,
    kind: CallbackKind,
    blocking: bool,
    trigger: EventFilter,
    filter: Option<MessageFilter>,
    pre_hook: Option<PreHook>,
    target: Target,
}

impl Callback {
    /// Handles `/name` commands.
    pub fn command(name: impl Into<String>) -> CallbackBuilder {
        let name = name.into();
        CallbackBuilder::new(CallbackKind::Command, name.clone(), EventFilter::Command(name))
    }

    /// Handles messages accepted by `filter`.
    pub fn message(filter: MessageFilter) -> CallbackBuilder {
        CallbackBuilder::new(CallbackKind::Message, "message".into(), EventFilter::Message)
            .filter(filter)
    }

    /// Handles button clicks whose data matches `pattern`.
    pub fn button(pattern: Regex) -> CallbackBuilder {
        let name = format!("button:{}", pattern.as_str());
        Self::button_with(name, Some(ButtonPattern::Regex(pattern)))
    }

    /// Handles button clicks whose data starts with `prefix`. The prefix is
    /// matched literally.
    pub fn button_prefix(prefix: impl Into<String>) -> CallbackBuilder {
        let prefix = prefix.into();
        let name = format!("button:{prefix}");
        Self::button_with(name, Some(ButtonPattern::Prefix(prefix)))
    }

    /// Handles every button click.
    pub fn any_button() -> CallbackBuilder {
        Self::button_with("button".into(), None)
    }

    fn button_with(name: String, pattern: Option<ButtonPattern>) -> CallbackBuilder {
        let acknowledge: PreHook = Arc::new(|update: Update, transport: Arc<dyn Transport>| {
            acknowledge_click(update, transport).boxed()
        });
        let mut builder =
            CallbackBuilder::new(CallbackKind::ButtonClick, name, EventFilter::Button(pattern));
        builder.pre_hook = Some(acknowledge);
        builder
    }

    /// Handles updates accepted by an arbitrary predicate.
    pub fn custom<P>(label: impl Into<String>, predicate: P) -> CallbackBuilder
    where
        P: Fn(&Update) -> bool + Send + Sync + 'static,
    {
        CallbackBuilder::new(
            CallbackKind::Custom,
            label.into(),
            EventFilter::Custom(Arc::new(predicate)),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CallbackKind {
        self.kind
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Attach the module instance a method callback runs against.
    ///
    /// Only the first call has an effect. Returns whether the instance was
    /// stored; always false for free-function callbacks.
    pub fn bind<M: Send + Sync + 'static>(&self, instance: Arc<M>) -> bool {
        let instance: Arc<dyn Any + Send + Sync> = instance;
        match &self.target {
            Target::Free(_) => false,
            Target::Method { instance: slot, .. } => slot.set(instance).is_ok(),
        }
    }

    pub fn is_bound(&self) -> bool {
        match &self.target {
            Target::Free(_) => true,
            Target::Method { instance, .. } => instance.get().is_some(),
        }
    }

    /// The handler-table entry for this callback.
    pub fn to_handler(self: &Arc<Self>) -> EventHandler {
        EventHandler::new(
            self.trigger.clone(),
            self.filter.clone(),
            self.blocking,
            Arc::clone(self),
        )
    }

    /// Run the callback for one update.
    pub async fn invoke(&self, update: Update, env: &DispatchEnv) -> anyhow::Result<Outcome> {
        if let Some(hook) = &self.pre_hook {
            hook(update.clone(), Arc::clone(&env.transport)).await?;
        }

        let ctx = Arc::new(Context::new(update, env.transport.owner_id()));
        let invocation = Invocation {
            context: Arc::clone(&ctx),
            transport: Arc::clone(&env.transport),
            language: Arc::clone(&env.language),
        };
        let result = context::scope(Arc::clone(&ctx), self.run(invocation)).await;

        match result {
            Ok(()) => Ok(Outcome::Handled),
            Err(HandlerError::Denied(Denial::IgnoreChannelUpdate)) | Err(HandlerError::Ignore) => {
                debug!(callback = %self.name, chat_id = ctx.chat_id(), "update ignored");
                Ok(Outcome::Ignored)
            },
            Err(HandlerError::Denied(denial)) => {
                self.report_denial(denial, &ctx, env).await;
                Ok(Outcome::Denied(denial))
            },
            Err(HandlerError::Failed(e)) => Err(e),
        }
    }

    async fn run(&self, invocation: Invocation) -> HandlerResult {
        match &self.target {
            Target::Free(run) => run(invocation).await,
            Target::Method { run, instance, .. } => {
                let Some(instance) = instance.get() else {
                    return Err(Error::UnboundCallback {
                        callback: self.name.clone(),
                    }
                    .into());
                };
                run(Arc::clone(instance), invocation).await
            },
        }
    }

    async fn report_denial(&self, denial: Denial, ctx: &Context, env: &DispatchEnv) {
        let text = match denial {
            Denial::InvalidUser => env.language.no_permission.clone(),
            Denial::InvalidChatType => env.language.invalid_chat_type(ctx.chat_type_str()),
            Denial::IgnoreChannelUpdate => return,
        };
        if let Err(e) = env.transport.send_message(ctx.chat_id(), &text).await {
            error!(
                callback = %self.name,
                chat_id = ctx.chat_id(),
                %denial,
                error = %e,
                "failed to send permission reply"
            );
        }
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = match &self.target {
            Target::Free(_) => "fn",
            Target::Method { type_name, .. } => type_name,
        };
        f.debug_struct("Callback")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("blocking", &self.blocking)
            .field("target", &target)
            .finish_non_exhaustive()
    }
}

async fn acknowledge_click(update: Update, transport: Arc<dyn Transport>) -> anyhow::Result<()> {
    if let UpdateKind::ButtonClick { query_id, .. } = &update.kind {
        transport.answer_button(query_id).await?;
    }
    Ok(())
}

/// Collects dispatch parameters until the handler is supplied.
pub struct CallbackBuilder {
    name: String,
    kind: CallbackKind,
    blocking: bool,
    trigger: EventFilter,
    filter: Option<MessageFilter>,
    pre_hook: Option<PreHook>,
}

impl CallbackBuilder {
    fn new(kind: CallbackKind, name: String, trigger: EventFilter) -> Self {
        Self {
            name,
            kind,
            blocking: false,
            trigger,
            filter: None,
            pre_hook: None,
        }
    }

    /// Name used in logs. Defaults to the command name or the pattern.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Blocking callbacks are awaited by the delivery loop; others run on
    /// their own task.
    #[must_use]
    pub fn blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    /// Additional condition the update must satisfy.
    #[must_use]
    pub fn filter(mut self, filter: MessageFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Run `hook` before the handler, outside the invocation context.
    /// Replaces the default click acknowledgement of button callbacks.
    #[must_use]
    pub fn pre_hook<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Update, Arc<dyn Transport>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.pre_hook = Some(Arc::new(move |update, transport| hook(update, transport).boxed()));
        self
    }

    /// Finish with a free-function handler.
    pub fn handler<F, Fut>(self, f: F) -> Callback
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.finish(Target::Free(Box::new(move |inv| f(inv).boxed())))
    }

    /// Finish with a handler that runs against a module instance of type `M`,
    /// attached later with [`Callback::bind`].
    pub fn method<M, F, Fut>(self, f: F) -> Callback
    where
        M: Send + Sync + 'static,
        F: Fn(Arc<M>, Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let type_name = std::any::type_name::<M>();
        let run: MethodFn = Box::new(move |instance, inv| match instance.downcast::<M>() {
            Ok(module) => f(module, inv).boxed(),
            Err(_) => async move {
                Err(HandlerError::Failed(anyhow::anyhow!(
                    "bound instance is not a {type_name}"
                )))
            }
            .boxed(),
        });
        self.finish(Target::Method {
            run,
            type_name,
            instance: OnceLock::new(),
        })
    }

    fn finish(self, target: Target) -> Callback {
        Callback {
            name: self.name,
            kind: self.kind,
            blocking: self.blocking,
            trigger: self.trigger,
            filter: self.filter,
            pre_hook: self.pre_hook,
            target,
        }
    }
}

/// Build a command callback named after the handler function.
///
/// `command_callback!(Alarm::alarm)` handles `/alarm` with a method of
/// `Alarm`; `command_callback!(ping)` wraps a free function. Builder options
/// follow as `key = value` pairs:
///
/// ```ignore
/// let cb = command_callback!(Alarm::alarm, blocking = true);
/// ```
#[macro_export]
macro_rules! command_callback {
    ($ty:ident :: $f:ident $(, $opt:ident = $val:expr)* $(,)?) => {
        $crate::Callback::command(stringify!($f))
            $(.$opt($val))*
            .method::<$ty, _, _>($ty::$f)
    };
    ($f:ident $(, $opt:ident = $val:expr)* $(,)?) => {
        $crate::Callback::command(stringify!($f))
            $(.$opt($val))*
            .handler($f)
    };
}
