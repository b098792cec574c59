//! Priority-ordered module registry.

use std::{
    any::TypeId,
    collections::{BTreeMap, HashMap},
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use tracing::{error, info};

use crate::{
    app::Owner,
    discovery::Discovery,
    error::{Error, Result},
    module::{LifecycleState, Module, ModuleDescriptor},
    transport::Transport,
};

#[derive(Default)]
struct Indexes {
    /// Enabled descriptors in lifecycle and dispatch order.
    ordered: Vec<Arc<ModuleDescriptor>>,
    by_name: HashMap<String, Arc<ModuleDescriptor>>,
    by_type: HashMap<TypeId, Arc<ModuleDescriptor>>,
    disabled_by_name: HashMap<String, Arc<ModuleDescriptor>>,
    disabled_by_type: HashMap<TypeId, Arc<ModuleDescriptor>>,
}

impl Indexes {
    fn from_ordered(ordered: Vec<Arc<ModuleDescriptor>>) -> Self {
        let by_name = ordered
            .iter()
            .map(|d| (d.name().to_string(), Arc::clone(d)))
            .collect();
        let by_type = ordered.iter().map(|d| (d.type_id(), Arc::clone(d))).collect();
        Self {
            ordered,
            by_name,
            by_type,
            ..Self::default()
        }
    }

    fn lookup(&self, name: &str) -> Option<&Arc<ModuleDescriptor>> {
        self.by_name
            .get(name)
            .or_else(|| self.disabled_by_name.get(name))
    }

    fn lookup_type(&self, type_id: TypeId) -> Option<&Arc<ModuleDescriptor>> {
        self.by_type
            .get(&type_id)
            .or_else(|| self.disabled_by_type.get(&type_id))
    }
}

/// Order descriptors by ascending priority, then by name.
///
/// Fails on the first descriptor whose priority is out of range.
pub fn sort_modules(descriptors: Vec<Arc<ModuleDescriptor>>) -> Result<Vec<Arc<ModuleDescriptor>>> {
    let mut buckets: BTreeMap<i32, Vec<Arc<ModuleDescriptor>>> = BTreeMap::new();
    for desc in descriptors {
        desc.check_priority_valid()?;
        buckets.entry(desc.priority()).or_default().push(desc);
    }
    Ok(buckets
        .into_values()
        .flat_map(|mut bucket| {
            bucket.sort_by(|a, b| a.name().cmp(b.name()));
            bucket
        })
        .collect())
}

/// Every discovered module, grouped into enabled and disabled.
///
/// All indexes change together under one write lock. Lifecycle methods
/// iterate a snapshot so no lock is held while a hook runs.
pub struct ModuleRegistry {
    discovery: Discovery,
    indexes: RwLock<Indexes>,
}

impl ModuleRegistry {
    pub fn new(discovery: Discovery) -> Self {
        Self {
            discovery,
            indexes: RwLock::new(Indexes::default()),
        }
    }

    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }

    fn read(&self) -> RwLockReadGuard<'_, Indexes> {
        self.indexes.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Indexes> {
        self.indexes.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Discover and order every module, replacing whatever was loaded.
    ///
    /// Modules with an out-of-range priority are left out and the others
    /// are still registered, but the first such error is returned so the
    /// caller can refuse to start.
    pub fn load_all(&self) -> Result<()> {
        let mut first_invalid = None;
        let mut valid = Vec::new();
        for candidate in self.discovery.discover() {
            let desc = candidate.into_descriptor();
            match desc.check_priority_valid() {
                Ok(()) => valid.push(Arc::new(desc)),
                Err(e) => {
                    error!(module = %desc.name(), error = %e, "rejecting module");
                    first_invalid.get_or_insert(e);
                },
            }
        }

        let ordered = sort_modules(valid)?;
        for desc in &ordered {
            info!(module = %desc.name(), priority = desc.priority(), "loaded module");
        }
        *self.write() = Indexes::from_ordered(ordered);

        match first_invalid {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Drop every instance and load from scratch. Reloaded modules get new
    /// instances on the next `init_all`.
    pub fn reload_all(&self) -> Result<()> {
        self.clear();
        self.load_all()
    }

    /// Forget every module. Stop hooks are not run here; callers stop
    /// running modules first.
    pub fn clear(&self) {
        *self.write() = Indexes::default();
    }

    pub fn len(&self) -> usize {
        self.read().ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enabled modules first, then disabled ones.
    pub fn get_module(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.descriptor(name)?.instance()
    }

    pub fn get_module_by_class<T: Module>(&self) -> Option<Arc<T>> {
        let desc = self.read().lookup_type(TypeId::of::<T>()).cloned()?;
        desc.downcast::<T>()
    }

    pub fn descriptor(&self, name: &str) -> Option<Arc<ModuleDescriptor>> {
        self.read().lookup(name).cloned()
    }

    /// Snapshot of the enabled modules in order.
    pub fn enabled_modules(&self) -> Vec<Arc<ModuleDescriptor>> {
        self.read().ordered.clone()
    }

    pub fn disabled_modules(&self) -> Vec<Arc<ModuleDescriptor>> {
        let mut disabled: Vec<_> = self.read().disabled_by_name.values().cloned().collect();
        disabled.sort_by(|a, b| (a.priority(), a.name()).cmp(&(b.priority(), b.name())));
        disabled
    }

    /// Apply `f` to each enabled module in order, stopping at the first
    /// error. Runs over a snapshot, so `f` may call back into the registry.
    pub fn run_over<F>(&self, f: F) -> Result<()>
    where
        F: FnMut(&Arc<ModuleDescriptor>) -> Result<()>,
    {
        self.enabled_modules().iter().try_for_each(f)
    }

    /// Move a module out of the enabled order. Its handlers stop receiving
    /// updates until it is enabled again; the instance stays alive.
    /// Disabling an already disabled module is a no-op.
    pub fn disable_module(&self, name: &str) -> Result<()> {
        let mut idx = self.write();
        let Some(desc) = idx.by_name.remove(name) else {
            return if idx.disabled_by_name.contains_key(name) {
                Ok(())
            } else {
                Err(Error::not_found(name))
            };
        };
        idx.by_type.remove(&desc.type_id());
        idx.ordered.retain(|d| !Arc::ptr_eq(d, &desc));
        desc.set_enabled(false);
        idx.disabled_by_type.insert(desc.type_id(), Arc::clone(&desc));
        idx.disabled_by_name.insert(name.to_string(), desc);
        info!(module = name, "disabled module");
        Ok(())
    }

    pub fn disable_module_by_class<T: Module>(&self) -> Result<()> {
        let name = self
            .read()
            .lookup_type(TypeId::of::<T>())
            .map(|d| d.name().to_string())
            .ok_or_else(|| Error::not_found(std::any::type_name::<T>()))?;
        self.disable_module(&name)
    }

    /// Put a disabled module back at its place in the order.
    pub fn enable_module(&self, name: &str) -> Result<()> {
        let mut idx = self.write();
        let Some(desc) = idx.disabled_by_name.remove(name) else {
            return if idx.by_name.contains_key(name) {
                Ok(())
            } else {
                Err(Error::not_found(name))
            };
        };
        idx.disabled_by_type.remove(&desc.type_id());
        let key = (desc.priority(), desc.name().to_string());
        let at = idx
            .ordered
            .partition_point(|d| (d.priority(), d.name()) < (key.0, key.1.as_str()));
        idx.ordered.insert(at, Arc::clone(&desc));
        desc.set_enabled(true);
        idx.by_type.insert(desc.type_id(), Arc::clone(&desc));
        idx.by_name.insert(name.to_string(), desc);
        info!(module = name, "enabled module");
        Ok(())
    }

    /// Construct and initialize every enabled module in order. Stops at the
    /// first failure.
    pub fn init_all(&self, owner: &Owner) -> Result<()> {
        self.run_over(|desc| desc.do_init(owner))
    }

    /// Handlers a module registers during its `post_init` are attributed to
    /// it, so disabling the module also takes them out of dispatch.
    pub async fn post_init_all(&self, transport: Arc<dyn Transport>) -> Result<()> {
        let table = transport.handler_table();
        for desc in self.enabled_modules() {
            let first = table.len();
            desc.post_init(Arc::clone(&transport)).await?;
            table.claim(first, &desc);
        }
        Ok(())
    }

    /// Stop every enabled module in order, then every disabled module that
    /// still holds a running instance. Failures are collected instead of
    /// ending the pass.
    pub async fn stop_all(&self) -> Vec<Error> {
        let running_disabled = self.disabled_modules().into_iter().filter(|d| {
            matches!(
                d.state(),
                LifecycleState::Initialized | LifecycleState::PostInitialized
            )
        });
        let mut failures = Vec::new();
        for desc in self.enabled_modules().into_iter().chain(running_disabled) {
            if let Err(e) = desc.do_stop().await {
                failures.push(e);
            }
        }
        failures
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            discovery::{ModuleCatalog, StaticSource},
            module::{ModuleKind, ModuleOrigin, ModuleType},
        },
    };

    macro_rules! test_module {
        ($name:ident, $type_name:literal, $priority:expr) => {
            struct $name;
            impl Module for $name {}
            impl ModuleKind for $name {
                const PRIORITY: i32 = $priority;
                const TYPE_NAME: &'static str = $type_name;

                fn new(_owner: &Owner, _settings: &toml::Table) -> anyhow::Result<Self> {
                    Ok(Self)
                }
            }
        };
    }

    test_module!(Zeta, "Zeta", 10);
    test_module!(Alpha, "Alpha", 10);
    test_module!(Late, "Late", 200);
    test_module!(Early, "Early", 0);
    test_module!(Negative, "Negative", -1);
    test_module!(TooHigh, "TooHigh", 256);

    fn registry(units: &[&str]) -> ModuleRegistry {
        let catalog = ModuleCatalog::new()
            .with::<Zeta>()
            .with::<Alpha>()
            .with::<Late>()
            .with::<Early>()
            .with::<Negative>()
            .with::<TooHigh>();
        let units: Vec<String> = units.iter().map(|u| u.to_string()).collect();
        ModuleRegistry::new(Discovery::new(catalog).with_source(StaticSource::new(units)))
    }

    fn names(registry: &ModuleRegistry) -> Vec<String> {
        registry
            .enabled_modules()
            .iter()
            .map(|d| d.name().to_string())
            .collect()
    }

    #[test]
    fn orders_by_priority_then_name() {
        let registry = registry(&["late", "zeta", "early", "alpha"]);
        registry.load_all().unwrap();
        assert_eq!(names(&registry), vec!["early", "alpha", "zeta", "late"]);
    }

    #[test]
    fn invalid_priority_rejects_only_that_module() {
        let registry = registry(&["late", "too_high", "alpha", "negative"]);
        let err = registry.load_all().unwrap_err();

        assert!(matches!(err, Error::InvalidPriority { ref module, priority: 256 } if module == "too_high"));
        assert_eq!(names(&registry), vec!["alpha", "late"]);
        assert!(registry.descriptor("negative").is_none());
    }

    #[test]
    fn sort_modules_fails_on_out_of_range_priority() {
        let desc = Arc::new(ModuleDescriptor::new(
            "negative",
            ModuleType::of::<Negative>(),
            toml::Table::new(),
            ModuleOrigin::Internal,
        ));
        assert!(matches!(
            sort_modules(vec![desc]),
            Err(Error::InvalidPriority { priority: -1, .. })
        ));
    }

    #[test]
    fn load_all_is_repeatable_and_clear_empties_everything() {
        let registry = registry(&["alpha", "late"]);
        registry.load_all().unwrap();
        registry.disable_module("late").unwrap();
        registry.load_all().unwrap();
        assert_eq!(names(&registry), vec!["alpha", "late"]);
        assert!(registry.disabled_modules().is_empty());

        registry.disable_module("alpha").unwrap();
        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.descriptor("alpha").is_none());
    }

    #[test]
    fn run_over_visits_enabled_modules_in_order_and_stops_on_error() {
        let registry = registry(&["late", "zeta", "early", "alpha"]);
        registry.load_all().unwrap();
        registry.disable_module("zeta").unwrap();

        let mut seen = Vec::new();
        registry
            .run_over(|d| {
                seen.push(d.name().to_string());
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec!["early", "alpha", "late"]);

        let mut seen = Vec::new();
        let err = registry
            .run_over(|d| {
                seen.push(d.name().to_string());
                if d.name() == "alpha" {
                    Err(Error::not_found(d.name()))
                } else {
                    Ok(())
                }
            })
            .unwrap_err();
        assert!(matches!(err, Error::ModuleNotFound { ref name } if name == "alpha"));
        assert_eq!(seen, vec!["early", "alpha"]);
    }

    #[test]
    fn disable_and_enable_move_between_groups() {
        let registry = registry(&["early", "alpha", "zeta", "late"]);
        registry.load_all().unwrap();

        registry.disable_module("alpha").unwrap();
        registry.disable_module_by_class::<Late>().unwrap();
        assert_eq!(names(&registry), vec!["early", "zeta"]);
        let disabled: Vec<_> = registry
            .disabled_modules()
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        assert_eq!(disabled, vec!["alpha", "late"]);

        let alpha = registry.descriptor("alpha").unwrap();
        assert!(!alpha.is_enabled());
        registry.disable_module("alpha").unwrap();

        registry.enable_module("alpha").unwrap();
        assert_eq!(names(&registry), vec!["early", "alpha", "zeta"]);
        assert!(alpha.is_enabled());

        assert!(matches!(
            registry.disable_module("nope"),
            Err(Error::ModuleNotFound { .. })
        ));
        assert!(matches!(
            registry.enable_module("nope"),
            Err(Error::ModuleNotFound { .. })
        ));
    }
}
