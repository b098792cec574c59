use std::{fmt::Write as _, sync::Arc};

use async_trait::async_trait;

use crate::{
    app::Owner,
    callback::{HandlerResult, Invocation},
    command_callback,
    module::{Module, ModuleKind},
    permission::{self, CheckLevel, ConditionLimit},
    transport::Transport,
};

/// Owner-only module inspection over private chat.
pub struct ModuleAdmin {
    owner: Owner,
}

impl ModuleAdmin {
    /// `/modules`: enabled modules in load order, then disabled ones.
    async fn modules(self: Arc<Self>, inv: Invocation) -> HandlerResult {
        permission::check(CheckLevel::OWNER | CheckLevel::PRIVATE, ConditionLimit::All)?;
        let Some(registry) = self.owner.registry() else {
            inv.reply(&inv.language().unknown_error).await?;
            return Ok(());
        };

        let mut text = String::from("Enabled modules:\n");
        for desc in registry.enabled_modules() {
            let _ = writeln!(text, "{:>3}  {}", desc.priority(), desc.name());
        }
        let disabled = registry.disabled_modules();
        if !disabled.is_empty() {
            text.push_str("Disabled modules:\n");
            for desc in disabled {
                let _ = writeln!(text, "{:>3}  {}", desc.priority(), desc.name());
            }
        }
        inv.reply(text.trim_end()).await?;
        Ok(())
    }
}

#[async_trait]
impl Module for ModuleAdmin {
    async fn post_init(self: Arc<Self>, transport: Arc<dyn Transport>) -> anyhow::Result<()> {
        let modules = Arc::new(command_callback!(ModuleAdmin::modules));
        modules.bind(self);
        transport.add_handler(modules.to_handler());
        Ok(())
    }
}

impl ModuleKind for ModuleAdmin {
    const PRIORITY: i32 = 1;
    const TYPE_NAME: &'static str = "ModuleAdmin";

    fn new(owner: &Owner, _settings: &toml::Table) -> anyhow::Result<Self> {
        Ok(Self {
            owner: owner.clone(),
        })
    }
}
