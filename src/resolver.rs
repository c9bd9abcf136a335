//! Process-scoped resolution context. One authoritative process owns the
//! override store and builds the shared status snapshot; every other
//! process installs that snapshot at startup and never evaluates rules.

use crate::machine::{MachineAttributes, MachineProbe};
use crate::matcher::{self, MatchHook, SecondaryNv310mHook};
use crate::rule::{Feature, FeatureStatus, RuleEntry};
use crate::store::{OverrideStore, OverrideStoreFile, StoreError};
use log::{info, warn};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Failure id when the force-all escape hatch blocks everything.
pub const FORCE_BLOCK_FAILURE_ID: &str = "FEATURE_FAILURE_BLOCK_ALL";
/// Failure id when adapter attributes cannot be obtained at all.
pub const ADAPTER_UNAVAILABLE_FAILURE_ID: &str = "FEATURE_FAILURE_CANT_RESOLVE_ADAPTER";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessRole {
    /// Evaluates rules, owns the override store, builds the snapshot.
    #[default]
    Authoritative,
    /// Reads the installed snapshot only.
    Subordinate,
}

/// Debugging escape hatch: short-circuits every resolution to a fixed
/// answer without consulting any rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForceAllPolicy {
    #[default]
    Disabled,
    BlockAll,
    AllowAll,
}

impl ForceAllPolicy {
    /// Positive forces blocking, negative forces allowing, zero disables.
    pub fn from_setting(value: i32) -> Self {
        match value {
            v if v > 0 => ForceAllPolicy::BlockAll,
            v if v < 0 => ForceAllPolicy::AllowAll,
            _ => ForceAllPolicy::Disabled,
        }
    }
}

/// A feature's resolved status plus the failure id naming the rule or
/// fallback that produced it. The failure id is empty for OK/UNKNOWN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub status: FeatureStatus,
    pub failure_id: String,
}

impl Resolution {
    pub fn new(status: FeatureStatus, failure_id: impl Into<String>) -> Self {
        Resolution {
            status,
            failure_id: failure_id.into(),
        }
    }

    pub fn ok() -> Self {
        Resolution::new(FeatureStatus::Ok, "")
    }

    /// Returned after shutdown; no state was consulted.
    pub fn no_opinion() -> Self {
        Resolution::new(FeatureStatus::Unknown, "")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureStatusEntry {
    pub feature: Feature,
    pub status: FeatureStatus,
    pub failure_id: String,
}

/// Frozen per-feature statuses, built once in the authoritative process and
/// handed to subordinates at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureStatusSnapshot {
    entries: Vec<FeatureStatusEntry>,
}

impl FeatureStatusSnapshot {
    pub fn entries(&self) -> &[FeatureStatusEntry] {
        &self.entries
    }

    pub fn get(&self, feature: Feature) -> Option<&FeatureStatusEntry> {
        self.entries.iter().find(|entry| entry.feature == feature)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no status snapshot installed in this subordinate process")]
    SnapshotMissing,
    #[error("a status snapshot is already installed")]
    SnapshotAlreadyInstalled,
    #[error("feature {0} absent from the installed snapshot")]
    FeatureNotInSnapshot(Feature),
}

/// Construction-time knobs.
#[derive(Debug, Clone, Default)]
pub struct GfxContextConfig {
    pub role: ProcessRole,
    pub force_all: ForceAllPolicy,
    /// Override persistence location; in-memory only when absent.
    pub override_path: Option<PathBuf>,
}

struct ContextState {
    store: OverrideStore,
    snapshot: Option<Arc<FeatureStatusSnapshot>>,
}

/// Owner of all mutable resolution state: override store, cached
/// snapshot, shutdown flag. One instance per process, with explicit
/// construction and shutdown instead of ambient statics.
pub struct GfxContext {
    role: ProcessRole,
    force_all: ForceAllPolicy,
    probe: Arc<dyn MachineProbe>,
    static_rules: Vec<RuleEntry>,
    hooks: Vec<Box<dyn MatchHook>>,
    store_file: Option<OverrideStoreFile>,
    shut_down: AtomicBool,
    state: Mutex<ContextState>,
}

impl GfxContext {
    pub fn new(
        config: GfxContextConfig,
        probe: Arc<dyn MachineProbe>,
        static_rules: Vec<RuleEntry>,
    ) -> Result<Self, StoreError> {
        let store_file = config.override_path.map(OverrideStoreFile::new);
        let store = match (&store_file, config.role) {
            (Some(file), ProcessRole::Authoritative) => file.load_or_default()?,
            _ => OverrideStore::default(),
        };
        info!(
            "event=gfx_context_init role={:?} force_all={:?} overrides={}",
            config.role,
            config.force_all,
            store.iter().count()
        );
        Ok(GfxContext {
            role: config.role,
            force_all: config.force_all,
            probe,
            static_rules,
            hooks: vec![Box::new(SecondaryNv310mHook)],
            store_file,
            shut_down: AtomicBool::new(false),
            state: Mutex::new(ContextState {
                store,
                snapshot: None,
            }),
        })
    }

    pub fn role(&self) -> ProcessRole {
        self.role
    }

    pub fn static_rules(&self) -> &[RuleEntry] {
        &self.static_rules
    }

    /// After this, every resolution answers "no opinion" instead of
    /// touching torn-down state.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        info!("event=gfx_context_shutdown");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Resolves one feature through the full precedence chain: force-all
    /// hatch, override store, snapshot (subordinates), adapter fallback,
    /// rule scan.
    pub fn resolve(&self, feature: Feature) -> Result<Resolution, ResolveError> {
        if self.is_shut_down() {
            return Ok(Resolution::no_opinion());
        }
        match self.force_all {
            ForceAllPolicy::BlockAll => {
                warn!("event=force_all_block feature={feature}");
                return Ok(Resolution::new(
                    FeatureStatus::BlockedDevice,
                    FORCE_BLOCK_FAILURE_ID,
                ));
            }
            ForceAllPolicy::AllowAll => {
                warn!("event=force_all_allow feature={feature}");
                return Ok(Resolution::ok());
            }
            ForceAllPolicy::Disabled => {}
        }
        let state = self.state.lock();
        self.resolve_locked(&state, feature)
    }

    fn resolve_locked(
        &self,
        state: &ContextState,
        feature: Feature,
    ) -> Result<Resolution, ResolveError> {
        if let Some(entry) = state.store.get(feature) {
            return Ok(Resolution::new(entry.status, entry.failure_id.clone()));
        }

        if self.role == ProcessRole::Subordinate {
            let Some(snapshot) = state.snapshot.as_ref() else {
                debug_assert!(false, "subordinate resolved before snapshot install");
                return Err(ResolveError::SnapshotMissing);
            };
            return match snapshot.get(feature) {
                Some(entry) => Ok(Resolution::new(entry.status, entry.failure_id.clone())),
                None => Err(ResolveError::FeatureNotInSnapshot(feature)),
            };
        }

        let (resolution, _) = self.evaluate_with_rules(feature, None);
        Ok(resolution)
    }

    /// Runs the rule scan for one feature with the precedence steps above
    /// the scan skipped. `downloaded` substitutes for the static table when
    /// present. Also reports the winning suggested version, if any.
    pub(crate) fn evaluate_with_rules(
        &self,
        feature: Feature,
        downloaded: Option<&[RuleEntry]>,
    ) -> (Resolution, Option<String>) {
        let machine = MachineAttributes::from_probe(self.probe.as_ref());
        if machine.adapters_unavailable() {
            let resolution = if feature.only_on_known_config() {
                Resolution::new(FeatureStatus::BlockedDevice, ADAPTER_UNAVAILABLE_FAILURE_ID)
            } else {
                Resolution::ok()
            };
            return (resolution, None);
        }

        let rules = downloaded.unwrap_or(&self.static_rules);
        let outcome = matcher::find(rules, feature, &machine, false, &self.hooks);
        if outcome.status != FeatureStatus::Unknown {
            return (
                Resolution::new(outcome.status, outcome.failure_id),
                outcome.suggested_version,
            );
        }

        if !feature.is_allowlist_governed() {
            return (Resolution::ok(), None);
        }

        // The blocklist declined to object; the feature still needs a
        // positive allow rule to run at all.
        let allowed = matcher::find(rules, feature, &machine, true, &self.hooks);
        if allowed.status == FeatureStatus::Unknown {
            (Resolution::new(FeatureStatus::Denied, ""), None)
        } else {
            (
                Resolution::new(allowed.status, allowed.failure_id),
                allowed.suggested_version,
            )
        }
    }

    /// The stored slot wins; otherwise the static table is re-scanned and
    /// the winning rule's suggestion, if any, is reported.
    pub fn suggested_driver_version(&self, feature: Feature) -> Option<String> {
        if self.is_shut_down() {
            return None;
        }
        {
            let state = self.state.lock();
            if let Some(version) = state.store.suggested_version() {
                return Some(version.to_string());
            }
        }
        let (resolution, suggested) = self.evaluate_with_rules(feature, None);
        if resolution.status == FeatureStatus::BlockedDriverVersion {
            suggested
        } else {
            None
        }
    }

    /// Full per-feature statuses. Built at most once in the authoritative
    /// process and cached until an override mutation invalidates it;
    /// subordinates only ever see what was installed.
    pub fn all_feature_statuses(&self) -> Result<Arc<FeatureStatusSnapshot>, ResolveError> {
        let mut state = self.state.lock();
        if let Some(snapshot) = state.snapshot.as_ref() {
            return Ok(Arc::clone(snapshot));
        }
        if self.role == ProcessRole::Subordinate {
            debug_assert!(false, "subordinate asked for statuses before snapshot install");
            return Err(ResolveError::SnapshotMissing);
        }

        let mut entries = Vec::with_capacity(Feature::ALL.len());
        for feature in Feature::ALL {
            let resolution = if self.is_shut_down() {
                Resolution::no_opinion()
            } else {
                match self.force_all {
                    ForceAllPolicy::BlockAll => Resolution::new(
                        FeatureStatus::BlockedDevice,
                        FORCE_BLOCK_FAILURE_ID,
                    ),
                    ForceAllPolicy::AllowAll => Resolution::ok(),
                    ForceAllPolicy::Disabled => self.resolve_locked(&state, feature)?,
                }
            };
            entries.push(FeatureStatusEntry {
                feature,
                status: resolution.status,
                failure_id: resolution.failure_id,
            });
        }
        let snapshot = Arc::new(FeatureStatusSnapshot { entries });
        state.snapshot = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// Installs the authoritative snapshot into a subordinate context.
    /// Installing twice is a programming error.
    pub fn install_snapshot(
        &self,
        snapshot: Arc<FeatureStatusSnapshot>,
    ) -> Result<(), ResolveError> {
        let mut state = self.state.lock();
        if state.snapshot.is_some() {
            debug_assert!(false, "status snapshot installed twice");
            return Err(ResolveError::SnapshotAlreadyInstalled);
        }
        state.snapshot = Some(snapshot);
        Ok(())
    }

    /// Applies a batch of override mutations, drops any cached snapshot so
    /// the next read recomputes, and persists the store if configured.
    pub(crate) fn commit_overrides(
        &self,
        mutate: impl FnOnce(&mut OverrideStore),
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let before = state.store.generation();
        mutate(&mut state.store);
        if state.store.generation() == before {
            return Ok(());
        }
        state.snapshot = None;
        if let Some(file) = &self.store_file {
            file.persist(&state.store)?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn override_status(&self, feature: Feature) -> Option<FeatureStatus> {
        self.state.lock().store.get(feature).map(|entry| entry.status)
    }
}
