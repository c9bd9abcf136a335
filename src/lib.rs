//! gfxgate: graphics-feature blocklist engine.
//!
//! Decides, per graphics capability, whether the current machine may use
//! it, must fall back, or is explicitly allowed. Decisions come from an
//! ordered rule scan over a compiled-in table or a runtime-downloaded
//! batch; downloaded outcomes are cached in a persistent override store
//! shared with processes that never evaluate rules themselves.

pub mod builtin;
pub mod machine;
pub mod matcher;
pub mod parser;
pub mod resolver;
pub mod rule;
pub mod store;
pub mod sync;
pub mod version;

pub use builtin::static_rules;
pub use machine::{
    AdapterAttributes, AdapterSnapshot, DisplayAttributes, MachineAttributes, MachineProbe,
};
pub use matcher::{find, MatchHook, MatchOutcome, SecondaryNv310mHook};
pub use parser::{parse_blocklist, parse_record, ParseRejection};
pub use resolver::{
    FeatureStatusEntry, FeatureStatusSnapshot, ForceAllPolicy, GfxContext, GfxContextConfig,
    ProcessRole, ResolveError, Resolution, ADAPTER_UNAVAILABLE_FAILURE_ID, FORCE_BLOCK_FAILURE_ID,
};
pub use rule::{
    AdapterSlot, BatteryStatus, DeviceFamily, DeviceFamilyError, Feature, FeatureStatus,
    ListedDevices, OperatingSystem, OsFamily, RefreshRateStatus, RuleBuilder, RuleEntry,
    RuleTarget, ScreenSizeStatus, DOWNLOADED_RULE_NO_ID, DOWNLOADED_RULE_PREFIX,
};
pub use store::{
    OverrideDocument, OverrideEntry, OverrideStore, OverrideStoreFile, PersistedOverride,
    StoreError, STORED_OVERRIDE_NO_ID,
};
pub use sync::{apply, apply_raw};
pub use version::{
    compare, compare_i32, format_driver_version, pack_driver_version, parse_driver_version,
    AppVersion, VersionComparison, ALL_DRIVER_VERSIONS,
};
