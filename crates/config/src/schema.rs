/// Config schema types (owner, modules, language, transport, retry).
use std::path::PathBuf;

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AntaresConfig {
    /// Administrative owner. Compared against both the user and the chat of
    /// an inbound event by owner-level permission checks.
    pub owner_id: Option<i64>,
    /// Send the startup notice to the owner once all modules are up.
    pub notify_owner_on_startup: bool,
    pub modules: ModulesConfig,
    pub language: LanguageConfig,
    pub telegram: TelegramSection,
    pub retry: RetryConfig,
}

impl Default for AntaresConfig {
    fn default() -> Self {
        Self {
            owner_id: None,
            notify_owner_on_startup: true,
            modules: ModulesConfig::default(),
            language: LanguageConfig::default(),
            telegram: TelegramSection::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// Module discovery switches. Only consulted while discovering modules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModulesConfig {
    /// Do not load any built-in module.
    pub skip_all_internal: bool,
    /// Built-in unit names to skip (e.g. `"ping"`).
    pub skip_internal: Vec<String>,
    /// User unit names to skip.
    pub skip: Vec<String>,
    /// Root of the user module tree, scanned recursively for unit manifests.
    pub dir: PathBuf,
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            skip_all_internal: false,
            skip_internal: Vec::new(),
            skip: Vec::new(),
            dir: PathBuf::from("modules"),
        }
    }
}

impl ModulesConfig {
    pub fn skips_internal(&self, unit: &str) -> bool {
        self.skip_internal.iter().any(|s| s.eq_ignore_ascii_case(unit))
    }

    pub fn skips_user(&self, unit: &str) -> bool {
        self.skip.iter().any(|s| s == unit)
    }
}

/// Overrides for user-visible strings. Unset entries fall back to the
/// built-in table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageConfig {
    pub no_permission: Option<String>,
    /// May contain a `{chat_type}` placeholder.
    pub invalid_chat_type: Option<String>,
    pub startup: Option<String>,
    pub unknown_error: Option<String>,
}

/// Telegram transport settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramSection {
    /// Bot token from @BotFather.
    #[serde(serialize_with = "serialize_secret")]
    pub token: Secret<String>,
    /// Long-polling timeout passed to `getUpdates`.
    pub poll_timeout_secs: u32,
}

impl Default for TelegramSection {
    fn default() -> Self {
        Self {
            token: Secret::new(String::new()),
            poll_timeout_secs: 30,
        }
    }
}

impl TelegramSection {
    pub fn has_token(&self) -> bool {
        !self.token.expose_secret().is_empty()
    }
}

impl std::fmt::Debug for TelegramSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSection")
            .field("token", &"[REDACTED]")
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .finish()
    }
}

fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

/// Bounded retries for best-effort side operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub delete_max_tries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delete_max_tries: 5,
        }
    }
}
