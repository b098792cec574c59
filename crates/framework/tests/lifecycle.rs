//! Module loading, ordering and reload through the public `Bot` API.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    fs,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use {
    antares_config::{AntaresConfig, ModulesConfig},
    antares_framework::{
        Bot, Error, LifecycleState, Module, ModuleCatalog, ModuleKind, Owner, Transport,
        transport::testing::RecordingTransport,
    },
    async_trait::async_trait,
};

// ── Test modules ─────────────────────────────────────────────────────────────

/// Announces itself on chat 0 during `post_init` so the order is observable.
macro_rules! announcing_module {
    ($ty:ident, $type_name:literal $(, priority = $priority:expr)?) => {
        struct $ty {
            stopped: AtomicBool,
        }

        #[async_trait]
        impl Module for $ty {
            async fn post_init(self: Arc<Self>, transport: Arc<dyn Transport>) -> anyhow::Result<()> {
                transport.send_message(0, $type_name).await?;
                Ok(())
            }

            async fn stop(&self) -> anyhow::Result<()> {
                self.stopped.store(true, Ordering::SeqCst);
                Ok(())
            }
        }

        impl ModuleKind for $ty {
            $(const PRIORITY: i32 = $priority;)?
            const TYPE_NAME: &'static str = $type_name;

            fn new(_owner: &Owner, _settings: &toml::Table) -> anyhow::Result<Self> {
                Ok(Self {
                    stopped: AtomicBool::new(false),
                })
            }
        }
    };
}

announcing_module!(BMod, "BMod", priority = 64);
announcing_module!(AMod, "AMod");
announcing_module!(ATool, "ATool", priority = 64);
announcing_module!(OffScale, "OffScale", priority = 256);

/// Fails the lifecycle phase named by its `fail` setting.
struct Faulty {
    fail: String,
    stopped: AtomicBool,
}

#[async_trait]
impl Module for Faulty {
    fn init(&self) -> anyhow::Result<()> {
        if self.fail == "init" {
            anyhow::bail!("init refused");
        }
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.stopped.store(true, Ordering::SeqCst);
        if self.fail == "stop" {
            anyhow::bail!("stop refused");
        }
        Ok(())
    }
}

impl ModuleKind for Faulty {
    const PRIORITY: i32 = 32;
    const TYPE_NAME: &'static str = "Faulty";

    fn new(_owner: &Owner, settings: &toml::Table) -> anyhow::Result<Self> {
        let fail = settings
            .get("fail")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Ok(Self {
            fail,
            stopped: AtomicBool::new(false),
        })
    }
}

fn catalog() -> ModuleCatalog {
    ModuleCatalog::new()
        .with::<BMod>()
        .with::<AMod>()
        .with::<ATool>()
        .with::<OffScale>()
        .with::<Faulty>()
}

fn config(dir: &Path) -> AntaresConfig {
    AntaresConfig {
        modules: ModulesConfig {
            skip_all_internal: true,
            dir: dir.to_path_buf(),
            ..ModulesConfig::default()
        },
        ..AntaresConfig::default()
    }
}

fn write_units(dir: &Path, units: &[(&str, &str)]) {
    for (unit, body) in units {
        fs::write(dir.join(format!("{unit}.toml")), body).unwrap();
    }
}

fn enabled(bot: &Bot) -> Vec<String> {
    bot.registry()
        .enabled_modules()
        .iter()
        .map(|d| d.name().to_string())
        .collect()
}

fn announcements(transport: &RecordingTransport) -> Vec<String> {
    transport.sent().into_iter().map(|(_, text)| text).collect()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn orders_by_priority_then_name_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    write_units(dir.path(), &[("b_mod", ""), ("a_mod", ""), ("a_tool", "")]);
    let transport = Arc::new(RecordingTransport::new(None));
    let bot = Bot::new(config(dir.path()), catalog(), transport.clone());

    bot.start().await.unwrap();

    assert_eq!(enabled(&bot), vec!["a_tool", "b_mod", "a_mod"]);
    assert_eq!(announcements(&transport), vec!["ATool", "BMod", "AMod"]);
    for desc in bot.registry().enabled_modules() {
        assert_eq!(desc.state(), LifecycleState::PostInitialized);
    }
}

#[tokio::test]
async fn invalid_priority_aborts_start_but_keeps_the_others() {
    let dir = tempfile::tempdir().unwrap();
    write_units(dir.path(), &[("a_mod", ""), ("off_scale", "")]);
    let transport = Arc::new(RecordingTransport::new(None));
    let bot = Bot::new(config(dir.path()), catalog(), transport.clone());

    let err = bot.start().await.unwrap_err();

    assert!(matches!(err, Error::InvalidPriority { ref module, .. } if module == "off_scale"));
    assert_eq!(enabled(&bot), vec!["a_mod"]);
    assert!(announcements(&transport).is_empty());
}

#[tokio::test]
async fn duplicate_units_keep_the_first() {
    let dir = tempfile::tempdir().unwrap();
    // Both resolve to `ATool`; `a-tool` sorts first.
    write_units(dir.path(), &[("a-tool", "tag = \"first\"\n"), ("a_tool", "tag = \"second\"\n")]);
    let transport = Arc::new(RecordingTransport::new(None));
    let bot = Bot::new(config(dir.path()), catalog(), transport.clone());

    bot.start().await.unwrap();

    assert_eq!(enabled(&bot), vec!["a-tool"]);
    let kept = bot.registry().descriptor("a-tool").unwrap();
    assert_eq!(kept.settings().get("tag").and_then(|v| v.as_str()), Some("first"));
    assert!(bot.registry().get_module("a-tool").is_some());
    assert!(bot.registry().get_module("a_tool").is_none());
}

#[tokio::test]
async fn reload_replaces_instances_and_forgets_removed_units() {
    let dir = tempfile::tempdir().unwrap();
    write_units(dir.path(), &[("a_tool", ""), ("b_mod", "")]);
    let transport = Arc::new(RecordingTransport::new(None));
    let bot = Bot::new(config(dir.path()), catalog(), transport.clone());
    bot.start().await.unwrap();

    let before = bot.owner().module::<ATool>().unwrap();
    let removed = bot.registry().get_module_by_class::<BMod>().unwrap();
    fs::remove_file(dir.path().join("b_mod.toml")).unwrap();

    bot.reload().await.unwrap();

    let after = bot.owner().module::<ATool>().unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert!(before.stopped.load(Ordering::SeqCst));
    assert!(removed.stopped.load(Ordering::SeqCst));
    assert!(!after.stopped.load(Ordering::SeqCst));
    assert!(bot.registry().get_module("b_mod").is_none());
    assert!(bot.registry().get_module_by_class::<BMod>().is_none());
    assert_eq!(enabled(&bot), vec!["a_tool"]);
}

#[tokio::test]
async fn built_in_modules_come_first_and_can_be_skipped() {
    let dir = tempfile::tempdir().unwrap();
    write_units(dir.path(), &[("a_mod", "")]);
    let transport = Arc::new(RecordingTransport::new(None));
    let mut cfg = config(dir.path());
    cfg.modules.skip_all_internal = false;
    cfg.modules.skip_internal = vec!["module_admin".into()];

    let bot = Bot::new(cfg, catalog(), transport.clone());
    bot.start().await.unwrap();

    assert_eq!(enabled(&bot), vec!["ping", "a_mod"]);
}

#[tokio::test]
async fn init_failure_stops_startup_at_that_module() {
    let dir = tempfile::tempdir().unwrap();
    write_units(dir.path(), &[("faulty", "fail = \"init\"\n"), ("a_tool", ""), ("a_mod", "")]);
    let transport = Arc::new(RecordingTransport::new(None));
    let bot = Bot::new(config(dir.path()), catalog(), transport.clone());

    let err = bot.start().await.unwrap_err();

    assert!(
        matches!(err, Error::Lifecycle { ref module, phase: "init", .. } if module == "faulty"),
        "{err}"
    );
    for name in ["faulty", "a_tool", "a_mod"] {
        let desc = bot.registry().descriptor(name).unwrap();
        assert_eq!(desc.state(), LifecycleState::Unloaded, "{name}");
    }
    assert!(announcements(&transport).is_empty());
}

#[tokio::test]
async fn failed_stop_does_not_keep_later_modules_running() {
    let dir = tempfile::tempdir().unwrap();
    write_units(dir.path(), &[("faulty", "fail = \"stop\"\n"), ("a_tool", ""), ("a_mod", "")]);
    let transport = Arc::new(RecordingTransport::new(None));
    let bot = Bot::new(config(dir.path()), catalog(), transport.clone());
    bot.start().await.unwrap();
    assert_eq!(enabled(&bot), vec!["faulty", "a_tool", "a_mod"]);

    let faulty = bot.owner().module::<Faulty>().unwrap();
    let a_tool = bot.owner().module::<ATool>().unwrap();
    let a_mod = bot.owner().module::<AMod>().unwrap();

    assert_eq!(bot.shutdown().await, 1);
    assert!(faulty.stopped.load(Ordering::SeqCst));
    assert!(a_tool.stopped.load(Ordering::SeqCst));
    assert!(a_mod.stopped.load(Ordering::SeqCst));
    for desc in bot.registry().enabled_modules() {
        assert_eq!(desc.state(), LifecycleState::Stopped, "{}", desc.name());
    }
}

#[tokio::test]
async fn disabled_modules_are_stopped_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    write_units(dir.path(), &[("a_tool", ""), ("b_mod", "")]);
    let transport = Arc::new(RecordingTransport::new(None));
    let bot = Bot::new(config(dir.path()), catalog(), transport.clone());
    bot.start().await.unwrap();

    let b_mod = bot.owner().module::<BMod>().unwrap();
    bot.registry().disable_module("b_mod").unwrap();

    assert_eq!(bot.shutdown().await, 0);
    assert!(b_mod.stopped.load(Ordering::SeqCst));
    assert_eq!(
        bot.registry().descriptor("b_mod").unwrap().state(),
        LifecycleState::Stopped
    );
}

#[tokio::test]
async fn reload_stops_disabled_modules_before_dropping_them() {
    let dir = tempfile::tempdir().unwrap();
    write_units(dir.path(), &[("a_tool", ""), ("b_mod", "")]);
    let transport = Arc::new(RecordingTransport::new(None));
    let bot = Bot::new(config(dir.path()), catalog(), transport.clone());
    bot.start().await.unwrap();

    let old = bot.owner().module::<BMod>().unwrap();
    bot.registry().disable_module("b_mod").unwrap();
    bot.reload().await.unwrap();

    assert!(old.stopped.load(Ordering::SeqCst));
    assert_eq!(enabled(&bot), vec!["a_tool", "b_mod"]);
    let fresh = bot.owner().module::<BMod>().unwrap();
    assert!(!Arc::ptr_eq(&old, &fresh));
}
