//! Layered settings: built-in defaults, then the settings file, then the
//! environment, then command-line flags.

use anyhow::{Context, Result};
use declarative::EngineOptions;
use optrace::Backoff;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Overrides the settings file location.
pub const CONFIG_FILE_ENV: &str = "CONFCTL_CONFIG_FILE";

/// Overrides the configs root.
pub const CONFIGS_ROOT_ENV: &str = "CONFCTL_CONFIGS_ROOT";

/// Get the config directory path
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join("confctl"))
}

/// Settings file to read: `$CONFCTL_CONFIG_FILE`, else `~/.config/confctl/config.toml`.
pub fn settings_path() -> Result<PathBuf> {
    match std::env::var(CONFIG_FILE_ENV) {
        Ok(path) if !path.is_empty() => Ok(expand(&path)),
        _ => Ok(config_dir()?.join("config.toml")),
    }
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

// ============================================================================
// Settings
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Directory holding the root build unit (current directory when unset)
    pub configs_root: Option<String>,
    pub build_file: String,
    pub default_resolver: String,
    /// Name of the environment variable holding the sudo password
    pub sudo_password_env: String,
    pub ui: UiSettings,
    pub channel: ChannelSettings,
}

impl Default for Settings {
    fn default() -> Self {
        let engine = EngineOptions::default();
        Self {
            configs_root: None,
            build_file: engine.build_file,
            default_resolver: engine.default_resolver,
            sudo_password_env: engine.sudo_password_env,
            ui: UiSettings::default(),
            channel: ChannelSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UiSettings {
    /// Redraw interval of the live tree
    pub refresh_ms: u64,
    /// Log lines shown under a running operation
    pub max_log_lines: usize,
}

impl Default for UiSettings {
    fn default() -> Self {
        Self {
            refresh_ms: 100,
            max_log_lines: 5,
        }
    }
}

/// Idle backoff of the observer's receive loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelSettings {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub growth: f64,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            min_delay_ms: 50,
            max_delay_ms: 3000,
            growth: 1.5,
        }
    }
}

impl Settings {
    /// Load settings from the usual places, then apply `root` from the CLI.
    pub fn load(root: Option<&Path>) -> Result<Self> {
        let path = settings_path()?;
        let file = if path.is_file() {
            Some(
                fs::read_to_string(&path)
                    .with_context(|| format!("Could not read {}", path.display()))?,
            )
        } else {
            log::debug!("No settings file at {}", path.display());
            None
        };
        let env_root = std::env::var(CONFIGS_ROOT_ENV).ok();
        Self::from_sources(file.as_deref(), env_root.as_deref(), root)
            .with_context(|| format!("Invalid settings in {}", path.display()))
    }

    /// Merge the layers given explicitly; lowest precedence first.
    pub fn from_sources(
        file: Option<&str>,
        env_root: Option<&str>,
        cli_root: Option<&Path>,
    ) -> Result<Self> {
        let mut settings: Self = match file {
            Some(src) => toml::from_str(src).context("Invalid settings format")?,
            None => Self::default(),
        };
        if let Some(root) = env_root.filter(|r| !r.is_empty()) {
            settings.configs_root = Some(root.to_string());
        }
        if let Some(root) = cli_root {
            settings.configs_root = Some(root.display().to_string());
        }
        Ok(settings)
    }

    /// Configs root with `~` expanded.
    pub fn root(&self) -> PathBuf {
        self.configs_root
            .as_deref()
            .map_or_else(|| PathBuf::from("."), expand)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            root: self.root(),
            build_file: self.build_file.clone(),
            default_resolver: self.default_resolver.clone(),
            sudo_password_env: self.sudo_password_env.clone(),
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.channel.min_delay_ms),
            Duration::from_millis(self.channel.max_delay_ms),
            self.channel.growth,
        )
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.ui.refresh_ms.max(10))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let settings = Settings::from_sources(None, None, None).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.build_file, ".confbuild.toml");
        assert_eq!(settings.default_resolver, "conf");
        assert_eq!(settings.ui.max_log_lines, 5);
        assert_eq!(settings.root(), PathBuf::from("."));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let file = r#"
configs_root = "/srv/configs"

[ui]
refresh_ms = 250

[channel]
growth = 2.0
"#;
        let settings = Settings::from_sources(Some(file), None, None).unwrap();
        assert_eq!(settings.root(), PathBuf::from("/srv/configs"));
        assert_eq!(settings.ui.refresh_ms, 250);
        assert_eq!(settings.ui.max_log_lines, 5);
        assert_eq!(settings.channel.growth, 2.0);
        assert_eq!(settings.channel.min_delay_ms, 50);
    }

    #[test]
    fn test_precedence() {
        let file = "configs_root = \"/from/file\"\n";

        let env = Settings::from_sources(Some(file), Some("/from/env"), None).unwrap();
        assert_eq!(env.root(), PathBuf::from("/from/env"));

        let cli =
            Settings::from_sources(Some(file), Some("/from/env"), Some(Path::new("/from/cli")))
                .unwrap();
        assert_eq!(cli.root(), PathBuf::from("/from/cli"));

        let empty_env = Settings::from_sources(Some(file), Some(""), None).unwrap();
        assert_eq!(empty_env.root(), PathBuf::from("/from/file"));
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(Settings::from_sources(Some("colour = true\n"), None, None).is_err());
    }

    #[test]
    fn test_engine_options_follow_settings() {
        let file = "build_file = \"BUILD.toml\"\nsudo_password_env = \"MY_PASS\"\n";
        let options = Settings::from_sources(Some(file), None, Some(Path::new("/cfg")))
            .unwrap()
            .engine_options();
        assert_eq!(options.root, PathBuf::from("/cfg"));
        assert_eq!(options.build_file, "BUILD.toml");
        assert_eq!(options.sudo_password_env, "MY_PASS");
        assert_eq!(options.default_resolver, "conf");
    }

    #[test]
    fn test_backoff_starts_at_min_delay() {
        let settings = Settings::default();
        assert_eq!(settings.backoff().current(), Duration::from_millis(50));
    }
}
