//! Module registry, lifecycle manager and callback dispatch core.
//!
//! Feature modules register through a typed [`ModuleCatalog`], are ordered by
//! priority in the [`ModuleRegistry`], and expose [`Callback`]s that the
//! transport invokes once per matching inbound [`Update`]. Every invocation
//! runs inside its own task-local [`Context`].

pub mod app;
pub mod callback;
pub mod context;
pub mod discovery;
pub mod error;
pub mod handler;
pub mod internal;
pub mod language;
pub mod module;
pub mod permission;
pub mod registry;
pub mod transport;
pub mod update;

pub use {
    app::{Bot, Owner},
    callback::{
        Callback, CallbackBuilder, CallbackKind, Denial, HandlerError, HandlerResult, Invocation,
        Outcome,
    },
    context::Context,
    discovery::{DirectorySource, Discovery, ModuleCatalog, ModuleSource, StaticSource},
    error::{Error, Result},
    handler::{ButtonPattern, DispatchEnv, Dispatcher, EventFilter, EventHandler, HandlerTable, MessageFilter},
    language::Language,
    module::{LifecycleState, Module, ModuleDescriptor, ModuleKind, ModuleOrigin, ModuleType},
    permission::{CheckLevel, ConditionLimit, PermissionState},
    registry::ModuleRegistry,
    transport::{SentMessage, Transport},
    update::{Command, Update, UpdateKind},
};
