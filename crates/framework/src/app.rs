//! Application lifecycle: wires configuration, transport and registry.

use std::sync::{Arc, Weak};

use {
    antares_config::AntaresConfig,
    tracing::{error, info, warn},
};

use crate::{
    discovery::{Discovery, ModuleCatalog},
    error::Result,
    handler::{DispatchEnv, Dispatcher},
    internal,
    language::Language,
    module::Module,
    registry::ModuleRegistry,
    transport::{self, Transport},
};

/// Handle given to module constructors.
///
/// Cheap to clone; modules may keep one for the lifetime of their instance.
/// Registry access is weak because the registry owns the modules.
#[derive(Clone)]
pub struct Owner {
    config: Arc<AntaresConfig>,
    language: Arc<Language>,
    transport: Arc<dyn Transport>,
    registry: Weak<ModuleRegistry>,
}

impl Owner {
    pub fn config(&self) -> &AntaresConfig {
        &self.config
    }

    pub fn language(&self) -> &Arc<Language> {
        &self.language
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn registry(&self) -> Option<Arc<ModuleRegistry>> {
        self.registry.upgrade()
    }

    /// Another loaded module, by type.
    pub fn module<T: Module>(&self) -> Option<Arc<T>> {
        self.registry()?.get_module_by_class::<T>()
    }

    /// Best-effort delete with the configured number of attempts.
    pub async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<bool> {
        transport::delete_message_with_retry(
            self.transport.as_ref(),
            chat_id,
            message_id,
            self.config.retry.delete_max_tries,
        )
        .await
    }

    /// Send `text` to the configured owner. Returns false when no owner is
    /// configured.
    pub async fn notify_owner(&self, text: &str) -> anyhow::Result<bool> {
        let Some(owner_id) = self.config.owner_id else {
            return Ok(false);
        };
        self.transport.send_message(owner_id, text).await?;
        Ok(true)
    }
}

/// The running bot: registry plus the dispatcher feeding its callbacks.
pub struct Bot {
    owner: Owner,
    registry: Arc<ModuleRegistry>,
    dispatcher: Dispatcher,
}

impl Bot {
    /// `catalog` holds the application's own module types; built-in modules
    /// are added automatically.
    pub fn new(config: AntaresConfig, catalog: ModuleCatalog, transport: Arc<dyn Transport>) -> Self {
        let language = Arc::new(Language::from_config(&config.language));
        let mut full = internal::catalog();
        full.merge(catalog);
        let discovery = Discovery::from_config(full, internal::UNITS.iter().copied(), &config.modules);
        let registry = Arc::new(ModuleRegistry::new(discovery));
        let owner = Owner {
            config: Arc::new(config),
            language: Arc::clone(&language),
            transport: Arc::clone(&transport),
            registry: Arc::downgrade(&registry),
        };
        let dispatcher = Dispatcher::new(DispatchEnv::new(transport, language));
        Self {
            owner,
            registry,
            dispatcher,
        }
    }

    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Load, initialize and post-initialize every module, then greet the
    /// owner. Any failure aborts startup.
    pub async fn start(&self) -> Result<()> {
        self.registry.load_all()?;
        self.bring_up().await?;
        info!(modules = self.registry.len(), "bot started");

        if self.owner.config.notify_owner_on_startup
            && let Err(e) = self.owner.notify_owner(&self.owner.language.startup).await
        {
            warn!(error = %e, "failed to send startup notice");
        }
        Ok(())
    }

    /// Stop every module, forget their callbacks and load everything again
    /// with fresh instances.
    pub async fn reload(&self) -> Result<()> {
        self.stop_all().await;
        self.dispatcher.table().clear();
        self.registry.reload_all()?;
        self.bring_up().await?;
        info!(modules = self.registry.len(), "modules reloaded");
        Ok(())
    }

    /// Stop every module. Returns how many failed to stop.
    pub async fn shutdown(&self) -> usize {
        let failed = self.stop_all().await;
        info!(failed, "bot stopped");
        failed
    }

    async fn bring_up(&self) -> Result<()> {
        self.registry.init_all(&self.owner)?;
        self.registry
            .post_init_all(Arc::clone(&self.owner.transport))
            .await
    }

    async fn stop_all(&self) -> usize {
        let failures = self.registry.stop_all().await;
        for e in &failures {
            error!(error = %e, "module failed to stop");
        }
        failures.len()
    }
}
