//! Artifact storage and retrieval
//!
//! One pretty-printed JSON file `{scenario}-{class}.json` per key holding the
//! summary fields, plus the combined `results.json` and `results.md`.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::benchmark::{AggregateTable, SummaryStatistic};

/// Combined JSON table
pub const RESULTS_JSON: &str = "results.json";
/// Combined markdown table
pub const RESULTS_MD: &str = "results.md";

/// Key of one stored summary
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ArtifactKey {
    pub scenario: String,
    pub class: String,
    pub path: PathBuf,
}

impl ArtifactKey {
    /// Split `{scenario}-{class}.json`; class ids never contain `-`
    pub fn parse(path: &Path) -> Option<Self> {
        if path.extension().map(|e| e != "json").unwrap_or(true) {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        let (scenario, class) = stem.rsplit_once('-')?;
        if scenario.is_empty() || class.is_empty() {
            return None;
        }
        Some(Self {
            scenario: scenario.to_string(),
            class: class.to_string(),
            path: path.to_path_buf(),
        })
    }
}

/// Artifact directory manager
pub struct ArtifactStore {
    base_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Ensure storage directory exists
    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.base_dir).with_context(|| {
            format!("Failed to create output directory: {}", self.base_dir.display())
        })
    }

    /// Path of one key's artifact
    pub fn artifact_path(&self, scenario: &str, class: &str) -> PathBuf {
        self.base_dir.join(format!("{scenario}-{class}.json"))
    }

    /// Write one key's summary, replacing any previous artifact
    pub fn save(&self, scenario: &str, class: &str, summary: &SummaryStatistic) -> Result<PathBuf> {
        if scenario.is_empty() || scenario.contains(['/', '\\']) {
            anyhow::bail!("Invalid scenario name for an artifact: '{}'", scenario);
        }
        self.ensure_dir()?;

        let path = self.artifact_path(scenario, class);
        let file = File::create(&path)
            .with_context(|| format!("Failed to create artifact: {}", path.display()))?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, summary).context("Failed to write artifact")?;

        info!("Saved artifact to {}", path.display());
        Ok(path)
    }

    pub fn load_from_path(&self, path: &Path) -> Result<SummaryStatistic> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open artifact: {}", path.display()))?;
        let reader = BufReader::new(file);
        let summary = serde_json::from_reader(reader)
            .with_context(|| format!("Failed to parse artifact: {}", path.display()))?;

        debug!("Loaded artifact from {}", path.display());
        Ok(summary)
    }

    /// All stored keys, sorted by file name
    pub fn list(&self) -> Result<Vec<ArtifactKey>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.base_dir)? {
            let path = entry?.path();
            if path.file_name().map(|n| n == RESULTS_JSON).unwrap_or(false) {
                continue;
            }
            if let Some(key) = ArtifactKey::parse(&path) {
                keys.push(key);
            }
        }

        keys.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(keys)
    }

    /// Combine every readable artifact into one table
    pub fn aggregate(&self) -> Result<AggregateTable> {
        let mut table = AggregateTable::new();
        for key in self.list()? {
            match self.load_from_path(&key.path) {
                Ok(summary) => table.insert(&key.scenario, &key.class, summary),
                Err(e) => debug!("Skipping {}: {:#}", key.path.display(), e),
            }
        }
        Ok(table)
    }

    /// Write `results.json` and `results.md`
    pub fn write_aggregate(&self, table: &AggregateTable) -> Result<(PathBuf, PathBuf)> {
        self.ensure_dir()?;

        let json_path = self.base_dir.join(RESULTS_JSON);
        let file = File::create(&json_path)
            .with_context(|| format!("Failed to create {}", json_path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), table)
            .context("Failed to write aggregate JSON")?;

        let md_path = self.base_dir.join(RESULTS_MD);
        fs::write(&md_path, table.to_markdown())
            .with_context(|| format!("Failed to write {}", md_path.display()))?;

        info!(
            "Wrote aggregate results to {} and {}",
            json_path.display(),
            md_path.display()
        );
        Ok((json_path, md_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn summary(ttfb: i64) -> SummaryStatistic {
        SummaryStatistic {
            ttfb_ms: ttfb,
            ttfb_ms_median: ttfb,
            ..SummaryStatistic::unobserved()
        }
    }

    #[test]
    fn test_artifact_key_parse() {
        let key = ArtifactKey::parse(Path::new("out/assistant-ui-P1.json")).unwrap();
        assert_eq!(key.scenario, "assistant-ui");
        assert_eq!(key.class, "P1");

        assert!(ArtifactKey::parse(Path::new("out/results.md")).is_none());
        assert!(ArtifactKey::parse(Path::new("out/noclass.json")).is_none());
    }

    #[test]
    fn test_save_overwrites() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("artifacts"));

        let first = store.save("nlq", "P1", &summary(100)).unwrap();
        let second = store.save("nlq", "P1", &summary(200)).unwrap();

        assert_eq!(first, second);
        assert_eq!(store.load_from_path(&second).unwrap().ttfb_ms, 200);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_artifact_field_names() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let path = store.save("nlq", "P2", &summary(120)).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(raw["ttfb_ms"], 120);
        assert_eq!(raw["ttfb_ms_median"], 120);
        assert_eq!(raw["bytes_total"], -1);
    }

    #[test]
    fn test_invalid_scenario_name() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        assert!(store.save("../escape", "P1", &summary(1)).is_err());
        assert!(store.save("", "P1", &summary(1)).is_err());
    }

    #[test]
    fn test_aggregate_roundtrip() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.save("assistant-ui", "P1", &summary(100)).unwrap();
        store.save("assistant-ui", "P2", &summary(110)).unwrap();
        store.save("nlq", "P1", &summary(300)).unwrap();
        fs::write(dir.path().join("broken-P1.json"), "not json").unwrap();

        let table = store.aggregate().unwrap();
        assert_eq!(table.rows.len(), 2);

        let (json_path, md_path) = store.write_aggregate(&table).unwrap();
        assert!(json_path.exists());
        let md = fs::read_to_string(md_path).unwrap();
        assert!(md.contains("| assistant-ui | 100 |"));

        // results.json is not mistaken for an artifact
        assert_eq!(store.list().unwrap().len(), 4);
        assert_eq!(store.aggregate().unwrap().rows.len(), 2);
    }

    #[test]
    fn test_list_missing_dir() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("nope"));
        assert!(store.list().unwrap().is_empty());
    }
}
