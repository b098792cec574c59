//! Feature modules and their lifecycle bookkeeping.

use std::{
    any::{Any, TypeId},
    fmt,
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use {async_trait::async_trait, tracing::debug};

use crate::{
    app::Owner,
    error::{Error, Result},
    transport::Transport,
};

pub const MIN_PRIORITY: i32 = 0;
/// Exclusive upper bound.
pub const MAX_PRIORITY: i32 = 256;
pub const DEFAULT_PRIORITY: i32 = 128;

/// Runtime behaviour of a feature module.
///
/// Construction happens in [`ModuleKind::new`]; the hooks below run in
/// registry order, one module at a time.
#[async_trait]
pub trait Module: Send + Sync + 'static {
    /// Runs right after construction. A failure aborts startup.
    fn init(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs once every module has been initialized. This is where modules
    /// register their callbacks with the transport.
    async fn post_init(self: Arc<Self>, _transport: Arc<dyn Transport>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Static declarations of a concrete module type.
pub trait ModuleKind: Module + Sized {
    /// Name unit files resolve to, e.g. `"ModuleAdmin"` for `module_admin`.
    const TYPE_NAME: &'static str;
    /// Lower runs first. Must lie in `[MIN_PRIORITY, MAX_PRIORITY)`.
    const PRIORITY: i32 = DEFAULT_PRIORITY;
    /// Never load this type, whatever the configuration says.
    const SKIP_LOAD: bool = false;

    fn new(owner: &Owner, settings: &toml::Table) -> anyhow::Result<Self>;
}

/// A constructed module, kept both as a trait object and as `Any` for typed
/// lookups.
#[derive(Clone)]
pub struct ModuleInstance {
    module: Arc<dyn Module>,
    any: Arc<dyn Any + Send + Sync>,
}

type Constructor = fn(&Owner, &toml::Table) -> anyhow::Result<ModuleInstance>;

/// Type-erased handle to a [`ModuleKind`].
#[derive(Clone, Copy)]
pub struct ModuleType {
    type_name: &'static str,
    type_id: TypeId,
    priority: i32,
    skip_load: bool,
    construct: Constructor,
}

impl ModuleType {
    pub fn of<T: ModuleKind>() -> Self {
        Self {
            type_name: T::TYPE_NAME,
            type_id: TypeId::of::<T>(),
            priority: T::PRIORITY,
            skip_load: T::SKIP_LOAD,
            construct: construct::<T>,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn skip_load(&self) -> bool {
        self.skip_load
    }
}

impl fmt::Debug for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleType")
            .field("type_name", &self.type_name)
            .field("priority", &self.priority)
            .field("skip_load", &self.skip_load)
            .finish()
    }
}

fn construct<T: ModuleKind>(owner: &Owner, settings: &toml::Table) -> anyhow::Result<ModuleInstance> {
    let module = Arc::new(T::new(owner, settings)?);
    Ok(ModuleInstance {
        module: Arc::clone(&module) as Arc<dyn Module>,
        any: module,
    })
}

/// Where a unit was discovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleOrigin {
    Internal,
    User { manifest: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unloaded,
    Initialized,
    PostInitialized,
    Stopped,
}

struct Slot {
    instance: Option<ModuleInstance>,
    state: LifecycleState,
}

/// Registry entry for one discovered unit.
pub struct ModuleDescriptor {
    name: String,
    module_type: ModuleType,
    settings: toml::Table,
    origin: ModuleOrigin,
    enabled: AtomicBool,
    // Never held across an await.
    slot: Mutex<Slot>,
}

impl ModuleDescriptor {
    pub fn new(
        name: impl Into<String>,
        module_type: ModuleType,
        settings: toml::Table,
        origin: ModuleOrigin,
    ) -> Self {
        Self {
            name: name.into(),
            module_type,
            settings,
            origin,
            enabled: AtomicBool::new(true),
            slot: Mutex::new(Slot {
                instance: None,
                state: LifecycleState::Unloaded,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> i32 {
        self.module_type.priority
    }

    pub fn module_type(&self) -> &ModuleType {
        &self.module_type
    }

    pub fn type_id(&self) -> TypeId {
        self.module_type.type_id
    }

    pub fn settings(&self) -> &toml::Table {
        &self.settings
    }

    pub fn origin(&self) -> &ModuleOrigin {
        &self.origin
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn state(&self) -> LifecycleState {
        self.lock().state
    }

    pub fn check_priority_valid(&self) -> Result<()> {
        let priority = self.priority();
        if (MIN_PRIORITY..MAX_PRIORITY).contains(&priority) {
            Ok(())
        } else {
            Err(Error::InvalidPriority {
                module: self.name.clone(),
                priority,
            })
        }
    }

    /// Construct the instance and run its `init` hook.
    pub fn do_init(&self, owner: &Owner) -> Result<()> {
        let instance = (self.module_type.construct)(owner, &self.settings)
            .map_err(|e| Error::lifecycle(&self.name, "init", e))?;
        instance
            .module
            .init()
            .map_err(|e| Error::lifecycle(&self.name, "init", e))?;

        let mut slot = self.lock();
        slot.instance = Some(instance);
        slot.state = LifecycleState::Initialized;
        debug!(module = %self.name, "module initialized");
        Ok(())
    }

    pub async fn post_init(&self, transport: Arc<dyn Transport>) -> Result<()> {
        let module = self.instance().ok_or_else(|| {
            Error::lifecycle(&self.name, "post_init", anyhow::anyhow!("module is not initialized"))
        })?;
        module
            .post_init(transport)
            .await
            .map_err(|e| Error::lifecycle(&self.name, "post_init", e))?;
        self.lock().state = LifecycleState::PostInitialized;
        Ok(())
    }

    /// Run the `stop` hook. A descriptor that was never initialized has
    /// nothing to stop.
    pub async fn do_stop(&self) -> Result<()> {
        let Some(module) = self.instance() else {
            return Ok(());
        };
        let result = module
            .stop()
            .await
            .map_err(|e| Error::lifecycle(&self.name, "stop", e));
        self.lock().state = LifecycleState::Stopped;
        result
    }

    pub fn instance(&self) -> Option<Arc<dyn Module>> {
        self.lock().instance.as_ref().map(|i| Arc::clone(&i.module))
    }

    pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let any = self.lock().instance.as_ref().map(|i| Arc::clone(&i.any))?;
        any.downcast::<T>().ok()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("name", &self.name)
            .field("priority", &self.priority())
            .field("type", &self.module_type.type_name)
            .field("origin", &self.origin)
            .field("enabled", &self.is_enabled())
            .field("state", &self.state())
            .finish()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{app::testing::owner, transport::testing::RecordingTransport},
        std::sync::atomic::AtomicUsize,
    };

    static STOPS: AtomicUsize = AtomicUsize::new(0);

    struct Clock {
        zone: String,
    }

    #[async_trait]
    impl Module for Clock {
        async fn stop(&self) -> anyhow::Result<()> {
            STOPS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl ModuleKind for Clock {
        const TYPE_NAME: &'static str = "Clock";

        fn new(_owner: &Owner, settings: &toml::Table) -> anyhow::Result<Self> {
            let zone = settings
                .get("zone")
                .and_then(|v| v.as_str())
                .unwrap_or("UTC")
                .to_string();
            Ok(Self { zone })
        }
    }

    struct Broken;

    impl Module for Broken {
        fn init(&self) -> anyhow::Result<()> {
            anyhow::bail!("no clock source")
        }
    }

    impl ModuleKind for Broken {
        const TYPE_NAME: &'static str = "Broken";
        const PRIORITY: i32 = 300;

        fn new(_owner: &Owner, _settings: &toml::Table) -> anyhow::Result<Self> {
            Ok(Self)
        }
    }

    #[tokio::test]
    async fn lifecycle_moves_through_states() {
        let transport = Arc::new(RecordingTransport::new(None));
        let owner = owner(transport.clone());
        let settings: toml::Table = toml::from_str(r#"zone = "Asia/Tokyo""#).unwrap();
        let desc = ModuleDescriptor::new("clock", ModuleType::of::<Clock>(), settings, ModuleOrigin::Internal);

        assert_eq!(desc.state(), LifecycleState::Unloaded);
        assert!(desc.downcast::<Clock>().is_none());
        assert!(desc.post_init(transport.clone()).await.is_err());

        desc.do_init(&owner).unwrap();
        assert_eq!(desc.state(), LifecycleState::Initialized);
        assert_eq!(desc.downcast::<Clock>().unwrap().zone, "Asia/Tokyo");

        desc.post_init(transport).await.unwrap();
        assert_eq!(desc.state(), LifecycleState::PostInitialized);

        let before = STOPS.load(Ordering::SeqCst);
        desc.do_stop().await.unwrap();
        assert_eq!(desc.state(), LifecycleState::Stopped);
        assert_eq!(STOPS.load(Ordering::SeqCst), before + 1);
    }

    #[tokio::test]
    async fn init_failure_names_the_module() {
        let owner = owner(Arc::new(RecordingTransport::new(None)));
        let desc = ModuleDescriptor::new(
            "broken",
            ModuleType::of::<Broken>(),
            toml::Table::new(),
            ModuleOrigin::Internal,
        );

        let err = desc.do_init(&owner).unwrap_err();
        assert!(matches!(err, Error::Lifecycle { ref module, phase: "init", .. } if module == "broken"));
        assert!(desc.instance().is_none());
    }

    #[test]
    fn priority_range_is_half_open() {
        let broken = ModuleDescriptor::new(
            "broken",
            ModuleType::of::<Broken>(),
            toml::Table::new(),
            ModuleOrigin::Internal,
        );
        assert!(matches!(
            broken.check_priority_valid(),
            Err(Error::InvalidPriority { priority: 300, .. })
        ));
        let clock = ModuleDescriptor::new(
            "clock",
            ModuleType::of::<Clock>(),
            toml::Table::new(),
            ModuleOrigin::Internal,
        );
        assert!(clock.check_priority_valid().is_ok());
        assert_eq!(clock.priority(), DEFAULT_PRIORITY);
    }
}
