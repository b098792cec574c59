//! Module discovery.
//!
//! Module types are registered up front in a [`ModuleCatalog`]. Discovery
//! walks one or more [`ModuleSource`]s, each yielding unit names (built-in
//! units, or `*.toml` manifests under the user module directory), and
//! resolves every unit name to a catalogued type:
//!
//! ```text
//! module_admin.toml  ->  "ModuleAdmin"  ->  ModuleType::of::<ModuleAdmin>()
//! ```
//!
//! A unit that cannot be read or resolved is logged and skipped; it never
//! stops its siblings from loading.

use std::{
    any::TypeId,
    collections::{BTreeMap, HashSet},
    path::{Path, PathBuf},
};

use {
    antares_config::ModulesConfig,
    tracing::{debug, error, info, warn},
    walkdir::WalkDir,
};

use crate::{
    error::{Error, Result},
    module::{ModuleDescriptor, ModuleKind, ModuleOrigin, ModuleType},
};

/// Type name to module type.
#[derive(Debug, Clone, Default)]
pub struct ModuleCatalog {
    types: BTreeMap<&'static str, ModuleType>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with<T: ModuleKind>(mut self) -> Self {
        self.register::<T>();
        self
    }

    pub fn register<T: ModuleKind>(&mut self) -> &mut Self {
        self.insert(ModuleType::of::<T>());
        self
    }

    /// Entries already present win.
    pub fn merge(&mut self, other: ModuleCatalog) {
        for module_type in other.types.into_values() {
            self.insert(module_type);
        }
    }

    fn insert(&mut self, module_type: ModuleType) {
        let name = module_type.type_name();
        if self.types.contains_key(name) {
            warn!(type_name = name, "module type already registered, keeping the first");
            return;
        }
        self.types.insert(name, module_type);
    }

    pub fn get(&self, type_name: &str) -> Option<&ModuleType> {
        self.types.get(type_name)
    }

    /// Resolve a unit name such as `module_admin` to its type.
    pub fn resolve(&self, unit: &str) -> Result<ModuleType> {
        let type_name = unit_type_name(unit);
        self.get(&type_name)
            .copied()
            .ok_or_else(|| Error::module_load(unit, format!("no module type named {type_name}")))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// `module_admin` / `module-admin` -> `ModuleAdmin`.
pub fn unit_type_name(unit: &str) -> String {
    unit.split(['_', '-'])
        .filter(|seg| !seg.is_empty())
        .map(|seg| {
            let mut chars = seg.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect()
}

/// A unit resolved to a module type, not yet ordered.
#[derive(Debug, Clone)]
pub struct UnitCandidate {
    pub unit: String,
    pub module_type: ModuleType,
    pub settings: toml::Table,
    pub origin: ModuleOrigin,
}

impl UnitCandidate {
    pub fn into_descriptor(self) -> ModuleDescriptor {
        ModuleDescriptor::new(self.unit, self.module_type, self.settings, self.origin)
    }
}

/// Somewhere units come from.
pub trait ModuleSource: Send + Sync {
    fn label(&self) -> &str;

    /// Resolvable units in a deterministic order. Failures are logged by the
    /// source and the unit is left out.
    fn discover(&self, catalog: &ModuleCatalog) -> Vec<UnitCandidate>;
}

/// Built-in units compiled into the binary.
#[derive(Debug, Clone)]
pub struct StaticSource {
    units: Vec<String>,
    config: ModulesConfig,
}

impl StaticSource {
    pub fn new<I, S>(units: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            units: units.into_iter().map(Into::into).collect(),
            config: ModulesConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: &ModulesConfig) -> Self {
        self.config = config.clone();
        self
    }
}

impl ModuleSource for StaticSource {
    fn label(&self) -> &str {
        "internal"
    }

    fn discover(&self, catalog: &ModuleCatalog) -> Vec<UnitCandidate> {
        if self.config.skip_all_internal {
            warn!("all internal modules are skipped");
            return Vec::new();
        }
        self.units
            .iter()
            .filter(|unit| {
                let skipped = self.config.skips_internal(unit);
                if skipped {
                    info!(unit = %unit, "skipping internal module");
                }
                !skipped
            })
            .filter_map(|unit| match catalog.resolve(unit) {
                Ok(module_type) => Some(UnitCandidate {
                    unit: unit.clone(),
                    module_type,
                    settings: toml::Table::new(),
                    origin: ModuleOrigin::Internal,
                }),
                Err(e) => {
                    warn!(error = %e, "internal module unit unresolved");
                    None
                },
            })
            .collect()
    }
}

/// `*.toml` unit manifests under a directory tree. The file stem is the
/// unit name and the manifest body becomes the module settings.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    config: ModulesConfig,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            config: ModulesConfig::default(),
        }
    }

    #[must_use]
    /// Only the user skip list is consulted; the scanned root stays the one
    /// given to [`DirectorySource::new`].
    pub fn with_config(mut self, config: &ModulesConfig) -> Self {
        self.config = config.clone();
        self
    }

    fn manifests(&self) -> Vec<PathBuf> {
        WalkDir::new(&self.root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "unreadable entry in module directory");
                    None
                },
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "toml"))
            .collect()
    }
}

fn read_manifest(unit: &str, path: &Path) -> Result<toml::Table> {
    let raw = std::fs::read_to_string(path).map_err(|e| Error::module_load(unit, e))?;
    toml::from_str(&raw).map_err(|e| Error::module_load(unit, e))
}

impl ModuleSource for DirectorySource {
    fn label(&self) -> &str {
        "user"
    }

    fn discover(&self, catalog: &ModuleCatalog) -> Vec<UnitCandidate> {
        if !self.root.is_dir() {
            debug!(dir = %self.root.display(), "module directory does not exist");
            return Vec::new();
        }

        let mut found = Vec::new();
        for path in self.manifests() {
            let Some(unit) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                warn!(path = %path.display(), "module manifest name is not valid UTF-8");
                continue;
            };
            if self.config.skips_user(&unit) {
                info!(unit = %unit, "skipping module");
                continue;
            }
            let module_type = match catalog.resolve(&unit) {
                Ok(module_type) => module_type,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "module unit unresolved");
                    continue;
                },
            };
            let settings = match read_manifest(&unit, &path) {
                Ok(settings) => settings,
                Err(e) => {
                    error!(path = %path.display(), error = %e, "failed to load module manifest");
                    continue;
                },
            };
            found.push(UnitCandidate {
                unit,
                module_type,
                settings,
                origin: ModuleOrigin::User { manifest: path },
            });
        }
        found
    }
}

/// The catalog plus the sources to walk, in order.
pub struct Discovery {
    catalog: ModuleCatalog,
    sources: Vec<Box<dyn ModuleSource>>,
}

impl Discovery {
    pub fn new(catalog: ModuleCatalog) -> Self {
        Self {
            catalog,
            sources: Vec::new(),
        }
    }

    /// Built-in units first, then the configured module directory.
    pub fn from_config<I, S>(catalog: ModuleCatalog, internal_units: I, config: &ModulesConfig) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(catalog)
            .with_source(StaticSource::new(internal_units).with_config(config))
            .with_source(DirectorySource::new(&config.dir).with_config(config))
    }

    #[must_use]
    pub fn with_source(mut self, source: impl ModuleSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    pub fn catalog(&self) -> &ModuleCatalog {
        &self.catalog
    }

    /// Walk every source. Types declaring `SKIP_LOAD` are left out, and a
    /// unit whose name or type is already taken is dropped: the first
    /// occurrence wins.
    pub fn discover(&self) -> Vec<UnitCandidate> {
        let mut names = HashSet::new();
        let mut types: HashSet<TypeId> = HashSet::new();
        let mut out = Vec::new();

        for source in &self.sources {
            for candidate in source.discover(&self.catalog) {
                if candidate.module_type.skip_load() {
                    info!(unit = %candidate.unit, source = source.label(), "module type is marked skip-load");
                    continue;
                }
                if names.contains(&candidate.unit) || types.contains(&candidate.module_type.type_id()) {
                    let duplicate = Error::DuplicateModule {
                        name: candidate.unit,
                    };
                    error!(error = %duplicate, source = source.label(), "dropping duplicate module");
                    continue;
                }
                names.insert(candidate.unit.clone());
                types.insert(candidate.module_type.type_id());
                out.push(candidate);
            }
        }
        out
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{app::Owner, module::Module},
        rstest::rstest,
        std::fs,
    };

    macro_rules! test_module {
        ($name:ident, $type_name:literal, $priority:expr, $skip:expr) => {
            struct $name;
            impl Module for $name {}
            impl ModuleKind for $name {
                const PRIORITY: i32 = $priority;
                const SKIP_LOAD: bool = $skip;
                const TYPE_NAME: &'static str = $type_name;

                fn new(_owner: &Owner, _settings: &toml::Table) -> anyhow::Result<Self> {
                    Ok(Self)
                }
            }
        };
    }

    test_module!(Weather, "Weather", 64, false);
    test_module!(AlarmClock, "AlarmClock", 128, false);
    test_module!(Hidden, "Hidden", 128, true);

    fn catalog() -> ModuleCatalog {
        ModuleCatalog::new()
            .with::<Weather>()
            .with::<AlarmClock>()
            .with::<Hidden>()
    }

    fn units(found: &[UnitCandidate]) -> Vec<&str> {
        found.iter().map(|c| c.unit.as_str()).collect()
    }

    #[rstest]
    #[case("ping", "Ping")]
    #[case("module_admin", "ModuleAdmin")]
    #[case("alarm-clock", "AlarmClock")]
    #[case("WEATHER", "Weather")]
    #[case("a__b", "AB")]
    fn derives_type_names(#[case] unit: &str, #[case] expected: &str) {
        assert_eq!(unit_type_name(unit), expected);
    }

    #[test]
    fn directory_source_reads_manifests_in_sorted_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("weather.toml"), "city = \"Osaka\"\n").unwrap();
        fs::write(dir.path().join("nested/alarm_clock.toml"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "not a unit").unwrap();
        fs::write(dir.path().join("unknown.toml"), "").unwrap();

        let found = DirectorySource::new(dir.path()).discover(&catalog());

        assert_eq!(units(&found), vec!["alarm_clock", "weather"]);
        assert_eq!(found[1].settings.get("city").and_then(|v| v.as_str()), Some("Osaka"));
        assert!(matches!(found[0].origin, ModuleOrigin::User { .. }));
    }

    #[test]
    fn broken_manifest_does_not_stop_siblings() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("alarm_clock.toml"), "this is = = not toml").unwrap();
        fs::write(dir.path().join("weather.toml"), "").unwrap();

        let found = DirectorySource::new(dir.path()).discover(&catalog());
        assert_eq!(units(&found), vec!["weather"]);
    }

    #[test]
    fn missing_directory_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let found = DirectorySource::new(dir.path().join("absent")).discover(&catalog());
        assert!(found.is_empty());
    }

    #[test]
    fn config_skips_apply_per_source() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("weather.toml"), "").unwrap();
        fs::write(dir.path().join("alarm_clock.toml"), "").unwrap();
        let config = ModulesConfig {
            skip_internal: vec!["WEATHER".into()],
            skip: vec!["alarm_clock".into()],
            dir: dir.path().to_path_buf(),
            ..ModulesConfig::default()
        };

        let internal = StaticSource::new(["weather", "alarm_clock"]).with_config(&config);
        assert_eq!(units(&internal.discover(&catalog())), vec!["alarm_clock"]);

        let user = DirectorySource::new(dir.path()).with_config(&config);
        assert_eq!(units(&user.discover(&catalog())), vec!["weather"]);

        let all_off = ModulesConfig {
            skip_all_internal: true,
            ..ModulesConfig::default()
        };
        let internal = StaticSource::new(["weather"]).with_config(&all_off);
        assert!(internal.discover(&catalog()).is_empty());
    }

    #[test]
    fn first_occurrence_wins_and_skip_load_is_honoured() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("weather.toml"), "city = \"user\"\n").unwrap();
        // Same type under a different unit name.
        fs::write(dir.path().join("weather_.toml"), "").unwrap();
        fs::write(dir.path().join("hidden.toml"), "").unwrap();

        let discovery = Discovery::new(catalog())
            .with_source(StaticSource::new(["weather"]))
            .with_source(DirectorySource::new(dir.path()));
        let found = discovery.discover();

        assert_eq!(units(&found), vec!["weather"]);
        assert_eq!(found[0].origin, ModuleOrigin::Internal);
        assert!(found[0].settings.is_empty());
    }
}
