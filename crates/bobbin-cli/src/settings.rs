//! Settings: optional TOML file, then environment / flags on top.
//!
//! ```toml
//! database_url = "postgres://bobbin@localhost/bobbin"
//! max_connections = 8
//! shell = "sh"
//!
//! [scheduler]
//! poll_interval_ms = 5000
//! max_concurrent_workers = 4
//! enabled = true
//! start_timeout_ms = 10000
//! claim_lease_ms = 60000
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bobbin_core::SchedulerConfig;
use clap::Args;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileSettings {
    database_url: Option<String>,
    max_connections: Option<u32>,
    shell: Option<String>,
    scheduler: Option<SchedulerConfig>,
}

/// Scheduler options that may come from the environment or the command line.
/// Anything set here wins over the file.
#[derive(Debug, Clone, Default, Args)]
pub struct SchedulerOverrides {
    /// Interval between scheduling cycles, clamped to [100, 60000]
    #[arg(long, env = "BOBBIN_POLL_INTERVAL_MS")]
    pub poll_interval_ms: Option<u64>,

    /// Cap on simultaneously running tasks, clamped to [1, 128]
    #[arg(long, env = "BOBBIN_MAX_CONCURRENT_WORKERS")]
    pub max_concurrent_workers: Option<u32>,

    /// Kill switch; when false the loop exits instead of dispatching
    #[arg(long, env = "BOBBIN_ENABLED", value_parser = parse_bool_env)]
    pub enabled: Option<bool>,

    /// Bounded wait for a worker to confirm start
    #[arg(long, env = "BOBBIN_START_TIMEOUT_MS")]
    pub start_timeout_ms: Option<u64>,

    /// How long a claim keeps a task away from other schedulers
    #[arg(long, env = "BOBBIN_CLAIM_LEASE_MS")]
    pub claim_lease_ms: Option<u64>,
}

impl SchedulerOverrides {
    fn apply(&self, base: SchedulerConfig) -> SchedulerConfig {
        SchedulerConfig {
            poll_interval_ms: self.poll_interval_ms.unwrap_or(base.poll_interval_ms),
            max_concurrent_workers: self
                .max_concurrent_workers
                .unwrap_or(base.max_concurrent_workers),
            enabled: self.enabled.unwrap_or(base.enabled),
            start_timeout_ms: self.start_timeout_ms.unwrap_or(base.start_timeout_ms),
            claim_lease_ms: self.claim_lease_ms.unwrap_or(base.claim_lease_ms),
        }
        .clamped()
    }
}

/// Accepts "1", "true", "yes", "on" and "0", "false", "no", "off" (any case).
pub fn parse_bool_env(s: &str) -> Result<bool, String> {
    match s.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(format!(
            "invalid boolean value '{s}', expected 1/true/yes/on or 0/false/no/off"
        )),
    }
}

/// Fully resolved settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub shell: String,
    pub scheduler: SchedulerConfig,
}

/// Everything needed to (re)build `Settings`.
#[derive(Debug, Clone)]
pub struct SettingsSource {
    pub file: Option<PathBuf>,
    pub database_url: Option<String>,
    pub shell: Option<String>,
    pub overrides: SchedulerOverrides,
}

impl SettingsSource {
    pub fn load(&self) -> Result<Settings> {
        let file = match &self.file {
            Some(path) => read_file(path)?,
            None => FileSettings::default(),
        };

        Ok(Settings {
            database_url: self.database_url.clone().or(file.database_url),
            max_connections: file.max_connections.unwrap_or(8).max(1),
            shell: self
                .shell
                .clone()
                .or(file.shell)
                .unwrap_or_else(|| "sh".to_string()),
            scheduler: self.overrides.apply(file.scheduler.unwrap_or_default()),
        })
    }
}

fn read_file(path: &Path) -> Result<FileSettings> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading settings file {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing settings file {}", path.display()))
}

impl Settings {
    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .context("no database URL: pass --database-url, set BOBBIN_DATABASE_URL, or add database_url to the settings file")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    fn source(file: Option<PathBuf>) -> SettingsSource {
        SettingsSource {
            file,
            database_url: None,
            shell: None,
            overrides: SchedulerOverrides::default(),
        }
    }

    fn write_settings(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_without_a_file() {
        let settings = source(None).load().unwrap();
        assert_eq!(settings.scheduler, SchedulerConfig::default());
        assert_eq!(settings.shell, "sh");
        assert!(settings.require_database_url().is_err());
    }

    #[test]
    fn file_values_are_clamped() {
        let file = write_settings(
            r#"
            database_url = "postgres://localhost/bobbin"
            [scheduler]
            poll_interval_ms = 10
            max_concurrent_workers = 6
            "#,
        );
        let settings = source(Some(file.path().to_path_buf())).load().unwrap();
        assert_eq!(settings.require_database_url().unwrap(), "postgres://localhost/bobbin");
        assert_eq!(settings.scheduler.poll_interval_ms, 100);
        assert_eq!(settings.scheduler.max_concurrent_workers, 6);
        assert!(settings.scheduler.enabled);
    }

    #[test]
    fn overrides_win_over_the_file() {
        let file = write_settings(
            r#"
            database_url = "postgres://file/bobbin"
            [scheduler]
            max_concurrent_workers = 6
            "#,
        );
        let mut src = source(Some(file.path().to_path_buf()));
        src.database_url = Some("postgres://flag/bobbin".into());
        src.overrides.max_concurrent_workers = Some(2);
        src.overrides.enabled = Some(false);

        let settings = src.load().unwrap();
        assert_eq!(settings.require_database_url().unwrap(), "postgres://flag/bobbin");
        assert_eq!(settings.scheduler.max_concurrent_workers, 2);
        assert!(!settings.scheduler.enabled);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let file = write_settings("pol_interval = 3\n");
        assert!(source(Some(file.path().to_path_buf())).load().is_err());
    }

    #[rstest]
    #[case("1", true)]
    #[case("TRUE", true)]
    #[case("on", true)]
    #[case("0", false)]
    #[case("No", false)]
    fn bool_env_values(#[case] raw: &str, #[case] expected: bool) {
        assert_eq!(parse_bool_env(raw), Ok(expected));
    }

    #[test]
    fn bool_env_rejects_garbage() {
        assert!(parse_bool_env("maybe").is_err());
    }
}
