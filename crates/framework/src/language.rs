use antares_config::LanguageConfig;

/// User-visible strings produced by the framework itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Language {
    pub no_permission: String,
    /// Contains a `{chat_type}` placeholder.
    pub invalid_chat_type: String,
    pub startup: String,
    pub unknown_error: String,
}

impl Default for Language {
    fn default() -> Self {
        Self {
            no_permission: "You do not have permission to do that.".into(),
            invalid_chat_type: "This command is not available in a {chat_type} chat.".into(),
            startup: "Bot started!".into(),
            unknown_error: "Oops, something went wrong…".into(),
        }
    }
}

impl Language {
    /// Built-in table with the configured overrides applied.
    pub fn from_config(config: &LanguageConfig) -> Self {
        let mut lang = Self::default();
        let overrides = [
            (&mut lang.no_permission, &config.no_permission),
            (&mut lang.invalid_chat_type, &config.invalid_chat_type),
            (&mut lang.startup, &config.startup),
            (&mut lang.unknown_error, &config.unknown_error),
        ];
        for (slot, value) in overrides {
            if let Some(value) = value {
                slot.clone_from(value);
            }
        }
        lang
    }

    pub fn invalid_chat_type(&self, chat_type: &str) -> String {
        self.invalid_chat_type.replace("{chat_type}", chat_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_only_configured_entries() {
        let config = LanguageConfig {
            no_permission: Some("nope".into()),
            invalid_chat_type: Some("not in {chat_type}s".into()),
            ..LanguageConfig::default()
        };
        let lang = Language::from_config(&config);
        assert_eq!(lang.no_permission, "nope");
        assert_eq!(lang.invalid_chat_type("supergroup"), "not in supergroups");
        assert_eq!(lang.startup, Language::default().startup);
    }
}
