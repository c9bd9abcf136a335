//! Persistent per-feature override store. Holds the cached outcome of the
//! last downloaded-blocklist evaluation so cooperating processes that never
//! evaluate rules still see the same decisions.

use crate::rule::{Feature, FeatureStatus};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failure id reported for a stored override that carries none.
pub const STORED_OVERRIDE_NO_ID: &str = "FEATURE_FAILURE_BLOCKLIST_PREF";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideEntry {
    pub status: FeatureStatus,
    pub failure_id: String,
}

/// In-memory override state. Every mutation bumps the generation counter;
/// snapshot caches compare generations to decide whether they are stale.
#[derive(Debug, Default)]
pub struct OverrideStore {
    entries: BTreeMap<Feature, OverrideEntry>,
    suggested_version: Option<String>,
    generation: u64,
}

impl OverrideStore {
    pub fn get(&self, feature: Feature) -> Option<&OverrideEntry> {
        self.entries.get(&feature)
    }

    pub fn set(&mut self, feature: Feature, status: FeatureStatus, failure_id: &str) {
        self.entries.insert(
            feature,
            OverrideEntry {
                status,
                failure_id: failure_id.to_string(),
            },
        );
        self.generation += 1;
    }

    pub fn clear(&mut self, feature: Feature) {
        if self.entries.remove(&feature).is_some() {
            self.generation += 1;
        }
    }

    pub fn suggested_version(&self) -> Option<&str> {
        self.suggested_version.as_deref()
    }

    pub fn set_suggested_version(&mut self, version: &str) {
        self.suggested_version = Some(version.to_string());
        self.generation += 1;
    }

    pub fn clear_suggested_version(&mut self) {
        if self.suggested_version.take().is_some() {
            self.generation += 1;
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.suggested_version.is_none()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Feature, &OverrideEntry)> {
        self.entries.iter().map(|(f, e)| (*f, e))
    }
}

/// On-disk form. Feature and status travel as their wire names so the file
/// survives enum reshuffles and builds of different vintages.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OverrideDocument {
    #[serde(default)]
    pub overrides: Vec<PersistedOverride>,
    #[serde(default)]
    pub suggested_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedOverride {
    pub feature: String,
    pub status: String,
    #[serde(default)]
    pub failure_id: String,
}

impl OverrideDocument {
    pub fn from_store(store: &OverrideStore) -> Self {
        OverrideDocument {
            overrides: store
                .iter()
                .map(|(feature, entry)| PersistedOverride {
                    feature: feature.as_str().to_string(),
                    status: entry.status.as_str().to_string(),
                    failure_id: entry.failure_id.clone(),
                })
                .collect(),
            suggested_version: store.suggested_version.clone(),
        }
    }

    /// Validates each record and folds the survivors into a fresh store.
    ///
    /// Records are dropped, never errors: an unrecognized feature is from
    /// another build; a non-blocking status (including DENIED, which the
    /// evaluation path never persists) is stale and reads as absent.
    pub fn into_store(self) -> OverrideStore {
        let mut store = OverrideStore::default();
        for record in self.overrides {
            let Some(feature) = Feature::parse(&record.feature) else {
                warn!(
                    "event=override_load_skipped reason=unknown_feature feature={:?}",
                    record.feature
                );
                continue;
            };
            let status = FeatureStatus::parse(&record.status);
            if !status.is_blocked_or_discouraged() {
                debug!(
                    "event=override_load_skipped reason=non_blocking feature={feature} status={}",
                    status.as_str()
                );
                continue;
            }
            let failure_id = if record.failure_id.is_empty() {
                STORED_OVERRIDE_NO_ID.to_string()
            } else {
                record.failure_id
            };
            store.entries.insert(feature, OverrideEntry { status, failure_id });
        }
        store.suggested_version = self.suggested_version;
        store.generation = 0;
        store
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// JSON-backed override file. Writes go through a temp file plus rename so
/// a crash never leaves a half-written document.
#[derive(Debug, Clone)]
pub struct OverrideStoreFile {
    path: PathBuf,
}

impl OverrideStoreFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load_or_default(&self) -> Result<OverrideStore, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) => {
                let document: OverrideDocument = serde_json::from_slice(&bytes)?;
                Ok(document.into_store())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(OverrideStore::default()),
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    pub fn persist(&self, store: &OverrideStore) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        let mut file = File::create(&tmp)?;
        let payload = serde_json::to_vec_pretty(&OverrideDocument::from_store(store))?;
        file.write_all(&payload)?;
        file.sync_all()?;
        fs::rename(tmp, &self.path)?;
        Ok(())
    }
}
