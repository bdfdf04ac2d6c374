//! Environment configuration.

use std::env;
use std::path::PathBuf;

pub const CONFIG_PATH_VAR: &str = "AGENT_ENGINE_CONFIG";
pub const LOG_FILTER_VAR: &str = "AGENT_ENGINE_LOG";
pub const LOG_FILE_VAR: &str = "AGENT_ENGINE_LOG_FILE";
pub const PROVIDER_VAR: &str = "AGENT_ENGINE_PROVIDER";
pub const SYSTEM_INSTRUCTIONS_VAR: &str = "AGENT_ENGINE_SYSTEM_INSTRUCTIONS";
pub const RESUME_VAR: &str = "AGENT_ENGINE_RESUME";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub log_filter: Option<String>,
    pub log_file: Option<PathBuf>,
    pub provider: Option<String>,
    pub system_instructions: Option<String>,
    /// Continue the most recent session for the working directory.
    pub resume: bool,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self {
            config_path: env_string_opt(CONFIG_PATH_VAR).map(PathBuf::from),
            log_filter: env_string_opt(LOG_FILTER_VAR),
            log_file: env_string_opt(LOG_FILE_VAR).map(PathBuf::from),
            provider: env_string_opt(PROVIDER_VAR).map(|value| value.trim().to_string()),
            system_instructions: env_string_opt(SYSTEM_INSTRUCTIONS_VAR),
            resume: env_flag(RESUME_VAR),
        }
    }
}

fn env_flag(key: &str) -> bool {
    env::var(key).map(|value| value == "1").unwrap_or(false)
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        if value.trim().is_empty() {
            None
        } else {
            Some(value)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    struct EnvGuard {
        key: &'static str,
        previous: Option<String>,
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(value) = &self.previous {
                env::set_var(self.key, value);
            } else {
                env::remove_var(self.key);
            }
        }
    }

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
            .lock()
            .expect("env lock poisoned")
    }

    fn set_env_guard(key: &'static str, value: Option<&str>) -> EnvGuard {
        let previous = env::var(key).ok();
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
        EnvGuard { key, previous }
    }

    #[test]
    fn unset_environment_yields_defaults() {
        let _lock = env_lock();
        let _g1 = set_env_guard(CONFIG_PATH_VAR, None);
        let _g2 = set_env_guard(LOG_FILTER_VAR, None);
        let _g3 = set_env_guard(LOG_FILE_VAR, None);
        let _g4 = set_env_guard(PROVIDER_VAR, None);
        let _g5 = set_env_guard(SYSTEM_INSTRUCTIONS_VAR, None);
        let _g6 = set_env_guard(RESUME_VAR, None);

        assert_eq!(EnvConfig::from_env(), EnvConfig::default());
    }

    #[test]
    fn values_are_read_and_trimmed() {
        let _lock = env_lock();
        let _g1 = set_env_guard(CONFIG_PATH_VAR, Some("/etc/agent.json"));
        let _g2 = set_env_guard(LOG_FILTER_VAR, Some("debug,reqwest=warn"));
        let _g3 = set_env_guard(LOG_FILE_VAR, Some("/tmp/agent.log"));
        let _g4 = set_env_guard(PROVIDER_VAR, Some(" codex "));
        let _g5 = set_env_guard(SYSTEM_INSTRUCTIONS_VAR, Some("be brief"));
        let _g6 = set_env_guard(RESUME_VAR, Some("1"));

        let config = EnvConfig::from_env();
        assert_eq!(config.config_path, Some(PathBuf::from("/etc/agent.json")));
        assert_eq!(config.log_filter.as_deref(), Some("debug,reqwest=warn"));
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/agent.log")));
        assert_eq!(config.provider.as_deref(), Some("codex"));
        assert_eq!(config.system_instructions.as_deref(), Some("be brief"));
        assert!(config.resume);
    }

    #[test]
    fn blank_values_are_ignored() {
        let _lock = env_lock();
        let _g1 = set_env_guard(PROVIDER_VAR, Some("   "));
        let _g2 = set_env_guard(RESUME_VAR, Some("yes"));
        let config = EnvConfig::from_env();
        assert!(config.provider.is_none());
        assert!(!config.resume);
    }
}
