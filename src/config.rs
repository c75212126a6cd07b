use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::cli::CliArgs;
use crate::controller::ControllerSettings;
use crate::model::{ItemStatus, ListFilters};

/// Effective runtime settings: file values with CLI overrides applied.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub source: Option<String>,
    pub fetch_timeout: Duration,
    pub action_cooldown: Duration,
    pub poll_interval: Option<Duration>,
    pub filters: ListFilters,
    pub namespaces: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct ReleaseDeckConfigFile {
    #[serde(alias = "fetch_timeout")]
    fetch_timeout_ms: u64,
    action_cooldown_ms: u64,
    #[serde(alias = "poll_ms")]
    poll_interval_ms: u64,
    #[serde(alias = "limit")]
    page_limit: usize,
    #[serde(alias = "skip")]
    page_skip: usize,
    status_filter: Option<Vec<String>>,
    namespaces: Vec<String>,
}

impl Default for ReleaseDeckConfigFile {
    fn default() -> Self {
        let defaults = ListFilters::default();
        Self {
            fetch_timeout_ms: 3_000,
            action_cooldown_ms: 500,
            poll_interval_ms: 15_000,
            page_limit: defaults.limit,
            page_skip: defaults.skip,
            status_filter: None,
            namespaces: Vec::new(),
        }
    }
}

impl RuntimeConfig {
    /// Loads the discovered config file, or defaults when there is none.
    pub fn load() -> Result<Self> {
        match discover_config_path() {
            Some(path) => Self::from_path(&path),
            None => Ok(Self::from_file(ReleaseDeckConfigFile::default(), None)),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config {}", path.display()))?;
        let config = Self::from_yaml(&raw)
            .with_context(|| format!("failed to parse runtime config {}", path.display()))?;
        info!(path = %path.display(), "config: loaded");
        Ok(Self {
            source: Some(path.display().to_string()),
            ..config
        })
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let parsed: ReleaseDeckConfigFile = if raw.trim().is_empty() {
            ReleaseDeckConfigFile::default()
        } else {
            serde_yaml::from_str(raw)?
        };
        Ok(Self::from_file(parsed, None))
    }

    fn from_file(file: ReleaseDeckConfigFile, source: Option<String>) -> Self {
        let statuses = match file.status_filter {
            Some(tokens) => tokens
                .iter()
                .map(|token| ItemStatus::from_token(token))
                .collect(),
            None => ListFilters::default().statuses,
        };
        let mut namespaces = file
            .namespaces
            .into_iter()
            .map(|namespace| namespace.trim().to_string())
            .filter(|namespace| !namespace.is_empty())
            .collect::<Vec<_>>();
        namespaces.dedup();

        Self {
            source,
            fetch_timeout: Duration::from_millis(file.fetch_timeout_ms.max(1)),
            action_cooldown: Duration::from_millis(file.action_cooldown_ms),
            poll_interval: poll_interval(file.poll_interval_ms),
            filters: ListFilters {
                statuses,
                limit: file.page_limit,
                skip: file.page_skip,
            },
            namespaces,
        }
    }

    pub fn apply_cli(mut self, args: &CliArgs) -> Self {
        if let Some(timeout_ms) = args.fetch_timeout_ms {
            self.fetch_timeout = Duration::from_millis(timeout_ms.max(1));
        }
        if let Some(poll_ms) = args.poll_ms {
            self.poll_interval = poll_interval(poll_ms);
        }
        self
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            filters: self.filters.clone(),
            fetch_deadline: self.fetch_timeout,
            action_cooldown: self.action_cooldown,
            poll_interval: self.poll_interval,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::from_file(ReleaseDeckConfigFile::default(), None)
    }
}

fn poll_interval(millis: u64) -> Option<Duration> {
    (millis > 0).then(|| Duration::from_millis(millis))
}

fn discover_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("RELEASEDECK_CONFIG")
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }

    let cwd_candidates = [
        PathBuf::from("releasedeck.yaml"),
        PathBuf::from("releasedeck.yml"),
        PathBuf::from(".releasedeck.yaml"),
    ];
    for candidate in cwd_candidates {
        if candidate.exists() {
            return Some(candidate);
        }
    }

    if let Ok(home) = std::env::var("HOME") {
        let user_candidates = [
            PathBuf::from(&home).join(".config/releasedeck/config.yaml"),
            PathBuf::from(&home).join(".config/releasedeck/config.yml"),
        ];
        for candidate in user_candidates {
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::RuntimeConfig;
    use crate::cli::CliArgs;
    use crate::model::{ItemStatus, ListFilters};
    use clap::Parser;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn empty_file_uses_defaults() {
        let config = RuntimeConfig::from_yaml("").unwrap();
        assert_eq!(config.fetch_timeout, Duration::from_millis(3_000));
        assert_eq!(config.action_cooldown, Duration::from_millis(500));
        assert_eq!(config.poll_interval, Some(Duration::from_secs(15)));
        assert_eq!(config.filters, ListFilters::default());
        assert!(config.namespaces.is_empty());
    }

    #[test]
    fn file_values_and_status_filter_are_read() {
        let config = RuntimeConfig::from_yaml(
            r#"
fetch_timeout_ms: 1200
poll_interval_ms: 0
page_limit: 50
status_filter: [deployed, failed, pending_upgrade]
namespaces: [apps, " ", monitoring]
"#,
        )
        .unwrap();

        assert_eq!(config.fetch_timeout, Duration::from_millis(1_200));
        assert_eq!(config.poll_interval, None);
        assert_eq!(config.filters.limit, 50);
        assert_eq!(
            config.filters.statuses,
            vec![
                ItemStatus::Deployed,
                ItemStatus::Failed,
                ItemStatus::PendingUpgrade
            ]
        );
        assert_eq!(config.namespaces, vec!["apps", "monitoring"]);
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        assert!(RuntimeConfig::from_yaml("fetch_timeout_ms: [oops").is_err());
    }

    #[test]
    fn cli_flags_override_file() {
        let args = CliArgs::parse_from(["releasedeck", "--fetch-timeout-ms", "800", "--poll-ms", "0"]);
        let settings = RuntimeConfig::from_yaml("poll_interval_ms: 2000")
            .unwrap()
            .apply_cli(&args)
            .controller_settings();

        assert_eq!(settings.fetch_deadline, Duration::from_millis(800));
        assert_eq!(settings.poll_interval, None);
        assert_eq!(settings.action_cooldown, Duration::from_millis(500));
    }
}
