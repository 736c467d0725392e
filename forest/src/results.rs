use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use serde_json::{Map, Value};

use crate::Result;

/// The scalars recorded for a single round.
pub type RoundMetrics = Map<String, Value>;

/// A JSON file holding one metrics object per round, keyed by the round index.
///
/// Every write reads the whole file, replaces the round's entry and writes it back.
#[derive(Debug, Clone)]
pub struct MetricsFile {
    path: PathBuf,
}

impl MetricsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Picks the first free `{prefix}_{n}.json` inside `dir`, creating `dir` if needed.
    ///
    /// `n` is the amount of files already starting with `prefix` plus one.
    pub fn next_in(dir: &Path, prefix: &str) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let existing = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(prefix))
            .count();

        Ok(Self::new(dir.join(format!("{prefix}_{}.json", existing + 1))))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every recorded round, a missing file is an empty history.
    pub fn load(&self) -> Result<BTreeMap<String, RoundMetrics>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Stores `metrics` under `round`, keeping the other rounds untouched.
    pub fn record(&self, round: usize, metrics: RoundMetrics) -> Result<()> {
        let mut history = self.load()?;
        history.insert(round.to_string(), metrics);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&self.path, serde_json::to_vec_pretty(&history)?)?;
        Ok(())
    }
}
