use std::{path::PathBuf, time::Duration};

use akari_queue::QueueConfig;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcesConfig {
    /// Directory holding one `.resmeta` record per registered resource
    pub metadata_dir: PathBuf,
    /// Background decode workers, 0 decodes on the submitting thread
    pub workers: usize,
    pub thread_name: String,
    /// Upper bound for a single `update`, unlimited if unset
    pub response_budget_ms: Option<u64>,
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        let queue = QueueConfig::default();
        Self {
            metadata_dir: PathBuf::from("metadata"),
            workers: queue.workers,
            thread_name: "akari-resources".to_string(),
            response_budget_ms: None,
        }
    }
}

impl ResourcesConfig {
    pub fn new(metadata_dir: impl Into<PathBuf>) -> Self {
        Self {
            metadata_dir: metadata_dir.into(),
            ..Default::default()
        }
    }
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }
    pub fn with_response_budget(mut self, budget: Duration) -> Self {
        self.response_budget_ms = Some(budget.as_millis().try_into().unwrap_or(u64::MAX));
        self
    }
    pub fn from_file(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        let config = serde_yaml::from_reader(file)?;

        Ok(config)
    }
    pub(crate) fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            workers: self.workers,
            thread_name: self.thread_name.clone(),
        }
    }
    pub(crate) fn response_budget(&self) -> Option<Duration> {
        self.response_budget_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn huge_budget_saturates() {
        let config = ResourcesConfig::default().with_response_budget(Duration::MAX);
        assert_eq!(config.response_budget_ms, Some(u64::MAX));

        let config = ResourcesConfig::default().with_response_budget(Duration::from_secs(2));
        assert_eq!(config.response_budget(), Some(Duration::from_millis(2000)));
    }

    #[test]
    fn partial_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "metadata_dir: project/meta").unwrap();
        writeln!(file, "workers: 3").unwrap();

        let config = ResourcesConfig::from_file(file.path()).unwrap();
        assert_eq!(config.metadata_dir, PathBuf::from("project/meta"));
        assert_eq!(config.workers, 3);
        assert_eq!(config.thread_name, "akari-resources");
        assert!(config.response_budget().is_none());
    }
}
