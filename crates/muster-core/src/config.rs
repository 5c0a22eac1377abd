use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MusterError, Result};

/// Settings for one batch run.
///
/// The concurrency limit has no default on purpose: a batch run without an
/// explicit limit is a caller mistake, caught by [`RunConfig::validate`]
/// before anything is dispatched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Maximum number of nodes with an outstanding command at any instant.
    #[serde(default)]
    pub concurrency: Option<i64>,
    /// Per-node budget from trigger acknowledgment to terminal outcome.
    #[serde(default = "default_node_timeout")]
    pub node_timeout_secs: u64,
    /// Optional budget for the whole run; expiry abandons in-flight nodes.
    #[serde(default)]
    pub run_timeout_secs: Option<u64>,
    /// How long to wait for abandoned trackers to report before
    /// force-recording them.
    #[serde(default = "default_abandon_grace")]
    pub abandon_grace_secs: u64,
    /// Capacity of the scheduler's tracker event channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// Where the JSONL batch report is written, if anywhere.
    #[serde(default)]
    pub report_dir: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: None,
            node_timeout_secs: default_node_timeout(),
            run_timeout_secs: None,
            abandon_grace_secs: default_abandon_grace(),
            event_buffer: default_event_buffer(),
            report_dir: None,
        }
    }
}

fn default_node_timeout() -> u64 {
    300
}

fn default_abandon_grace() -> u64 {
    5
}

fn default_event_buffer() -> usize {
    256
}

impl RunConfig {
    /// Config with an explicit concurrency limit and defaults elsewhere.
    pub fn with_concurrency(limit: i64) -> Self {
        Self {
            concurrency: Some(limit),
            ..Default::default()
        }
    }

    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| MusterError::ConfigNotFound(path.display().to_string()))?;

        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| MusterError::Config(e.to_string()))
    }

    /// Check the concurrency limit and return it as a usable bound.
    pub fn validate(&self) -> Result<usize> {
        match self.concurrency {
            None => Err(MusterError::Config(
                "concurrency limit is required for batch runs".into(),
            )),
            Some(n) if n < 1 => Err(MusterError::InvalidConcurrency(n)),
            Some(n) => Ok(n as usize),
        }
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_secs(self.node_timeout_secs)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    pub fn abandon_grace(&self) -> Duration {
        Duration::from_secs(self.abandon_grace_secs)
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(value) => result.push_str(&value),
                Err(_) => {
                    result.push_str("${");
                    result.push_str(&var_name);
                    result.push('}');
                }
            }
        } else {
            result.push(c);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.concurrency, None);
        assert_eq!(config.node_timeout_secs, 300);
        assert_eq!(config.run_timeout_secs, None);
        assert_eq!(config.abandon_grace_secs, 5);
        assert_eq!(config.event_buffer, 256);
    }

    #[test]
    fn test_validate_requires_concurrency() {
        let err = RunConfig::default().validate().unwrap_err();
        assert!(matches!(err, MusterError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_non_positive() {
        assert!(matches!(
            RunConfig::with_concurrency(0).validate(),
            Err(MusterError::InvalidConcurrency(0))
        ));
        assert!(matches!(
            RunConfig::with_concurrency(-4).validate(),
            Err(MusterError::InvalidConcurrency(-4))
        ));
        assert_eq!(RunConfig::with_concurrency(8).validate().unwrap(), 8);
    }

    #[test]
    fn test_load_from_file_with_env_expansion() {
        std::env::set_var("MUSTER_TEST_TIMEOUT", "42");

        let toml_content = r#"
concurrency = 10
node_timeout_secs = ${MUSTER_TEST_TIMEOUT}
run_timeout_secs = 600
"#;
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(toml_content.as_bytes()).expect("write toml");

        let config = RunConfig::load(tmp.path()).expect("load config");
        assert_eq!(config.concurrency, Some(10));
        assert_eq!(config.node_timeout_secs, 42);
        assert_eq!(config.run_timeout(), Some(Duration::from_secs(600)));
        assert_eq!(config.abandon_grace_secs, 5);
    }

    #[test]
    fn test_load_missing_file() {
        let err = RunConfig::load(Path::new("/nonexistent/muster.toml")).unwrap_err();
        assert!(matches!(err, MusterError::ConfigNotFound(_)));
    }
}
