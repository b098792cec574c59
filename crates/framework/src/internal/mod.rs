//! Modules shipped with the framework.

mod module_admin;
mod ping;

pub use {module_admin::ModuleAdmin, ping::Ping};

use crate::discovery::ModuleCatalog;

/// Built-in unit names, loaded before any user module.
pub const UNITS: &[&str] = &["ping", "module_admin"];

pub fn catalog() -> ModuleCatalog {
    ModuleCatalog::new().with::<Ping>().with::<ModuleAdmin>()
}
