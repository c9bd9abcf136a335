//! Folds a downloaded rule batch into the override store. The batch itself
//! is never retained; each feature is re-evaluated against it and only the
//! per-feature outcomes persist.

use crate::parser::parse_blocklist;
use crate::resolver::GfxContext;
use crate::rule::{Feature, FeatureStatus, RuleEntry};
use crate::store::StoreError;
use log::{debug, info};

/// Applies a freshly downloaded batch. An empty batch means "defer to the
/// static table" and leaves the store untouched. Safe to call repeatedly;
/// each call fully supersedes the previous evaluation.
pub fn apply(context: &GfxContext, downloaded: &[RuleEntry]) -> Result<(), StoreError> {
    if context.is_shut_down() {
        debug!("event=blocklist_apply_skipped reason=shutdown");
        return Ok(());
    }
    if downloaded.is_empty() {
        info!("event=blocklist_apply_skipped reason=empty_batch");
        return Ok(());
    }

    // Evaluate before taking the store lock; the scan reads no mutable
    // state and must not observe the overrides it is about to replace.
    let mut outcomes = Vec::with_capacity(Feature::ALL.len());
    for feature in Feature::ALL {
        let (resolution, suggested) = context.evaluate_with_rules(feature, Some(downloaded));
        outcomes.push((feature, resolution, suggested));
    }

    context.commit_overrides(|store| {
        for (feature, resolution, suggested) in outcomes {
            match resolution.status {
                // The downloaded list cannot drive the allowlist: allow
                // and DENIED outcomes here only mean "no block rule
                // matched," so any stale override is dropped.
                FeatureStatus::Unknown
                | FeatureStatus::Ok
                | FeatureStatus::AllowAlways
                | FeatureStatus::AllowQualified
                | FeatureStatus::Denied => {
                    store.clear(feature);
                }
                FeatureStatus::BlockedDriverVersion => {
                    match suggested {
                        Some(version) => store.set_suggested_version(&version),
                        None => store.clear_suggested_version(),
                    }
                    store.set(feature, resolution.status, &resolution.failure_id);
                }
                FeatureStatus::BlockedDevice
                | FeatureStatus::BlockedOsVersion
                | FeatureStatus::BlockedMismatchedVersion
                | FeatureStatus::BlockedPlatformTest
                | FeatureStatus::Discouraged => {
                    store.set(feature, resolution.status, &resolution.failure_id);
                }
            }
        }
    })?;
    info!("event=blocklist_applied rules={}", downloaded.len());
    Ok(())
}

/// Parses raw record text and applies it in one step. This is the entry
/// point wired to the external "new blocklist arrived" notification.
pub fn apply_raw(context: &GfxContext, raw_records: &str, host_version: &str) -> Result<(), StoreError> {
    let rules = parse_blocklist(raw_records, host_version);
    apply(context, &rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::{AdapterAttributes, DisplayAttributes, MachineProbe};
    use crate::resolver::{GfxContextConfig, Resolution};
    use crate::rule::{AdapterSlot, OperatingSystem};
    use crate::version::{pack_driver_version, VersionComparison};
    use std::sync::Arc;

    struct IntelProbe;

    impl MachineProbe for IntelProbe {
        fn adapter_attributes(&self, slot: AdapterSlot) -> Option<AdapterAttributes> {
            match slot {
                AdapterSlot::Primary => Some(AdapterAttributes {
                    vendor_id: "0x8086".into(),
                    device_id: "0x2582".into(),
                    driver_vendor: String::new(),
                    driver_version_string: "8.52.322.2200".into(),
                }),
                AdapterSlot::Secondary => None,
            }
        }
        fn operating_system(&self) -> (OperatingSystem, u32, u64) {
            (OperatingSystem::Windows10, 0, 0)
        }
        fn display_attributes(&self) -> DisplayAttributes {
            DisplayAttributes {
                screen_count: 1,
                min_refresh_rate: 60,
                max_refresh_rate: 60,
                total_pixels: 2_073_600,
            }
        }
        fn battery_presence(&self) -> Option<bool> {
            Some(false)
        }
        fn window_system_protocol(&self) -> Option<String> {
            None
        }
        fn host_application_version(&self) -> String {
            "128.0".into()
        }
    }

    fn context() -> GfxContext {
        GfxContext::new(GfxContextConfig::default(), Arc::new(IntelProbe), vec![]).unwrap()
    }

    fn downloaded_block() -> RuleEntry {
        RuleEntry::builder()
            .rule_id("FEATURE_FAILURE_DL_BLOCKLIST_g42")
            .os(OperatingSystem::Windows10)
            .vendor("0x8086")
            .feature(Feature::Webgl)
            .status(FeatureStatus::BlockedDriverVersion)
            .driver_version(
                VersionComparison::LessThan,
                pack_driver_version(9, 0, 0, 0),
            )
            .build()
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let context = context();
        context
            .commit_overrides(|store| {
                store.set(Feature::Webgl, FeatureStatus::BlockedDevice, "FEATURE_FAILURE_OLD")
            })
            .unwrap();
        apply(&context, &[]).unwrap();
        assert_eq!(
            context.override_status(Feature::Webgl),
            Some(FeatureStatus::BlockedDevice)
        );
    }

    #[test]
    fn blocked_outcome_is_persisted_and_served() {
        let context = context();
        apply(&context, &[downloaded_block()]).unwrap();

        let resolution = context.resolve(Feature::Webgl).unwrap();
        assert_eq!(resolution.status, FeatureStatus::BlockedDriverVersion);
        assert_eq!(resolution.failure_id, "FEATURE_FAILURE_DL_BLOCKLIST_g42");
        assert_eq!(
            context.suggested_driver_version(Feature::Webgl).as_deref(),
            Some("9.0.0.0")
        );
        // Unaffected features stay at their static-table outcome.
        assert_eq!(context.resolve(Feature::WebRender).unwrap(), Resolution::ok());
    }

    #[test]
    fn reapplying_without_the_rule_clears_the_override() {
        let context = context();
        apply(&context, &[downloaded_block()]).unwrap();
        assert!(context.override_status(Feature::Webgl).is_some());

        let unrelated = RuleEntry::builder()
            .rule_id("FEATURE_FAILURE_DL_BLOCKLIST_g43")
            .os(OperatingSystem::Linux)
            .feature(Feature::Vulkan)
            .status(FeatureStatus::BlockedDevice)
            .build();
        apply(&context, &[unrelated]).unwrap();
        assert_eq!(context.override_status(Feature::Webgl), None);
        assert_eq!(context.resolve(Feature::Webgl).unwrap(), Resolution::ok());
    }

    #[test]
    fn raw_records_flow_end_to_end() {
        let context = context();
        let text = "blockID:g7\tos:WINNT 10.0\tvendor:0x8086\tfeature:WEBGL\t\
             featureStatus:BLOCKED_DEVICE";
        apply_raw(&context, text, "128.0").unwrap();
        let resolution = context.resolve(Feature::Webgl).unwrap();
        assert_eq!(resolution.status, FeatureStatus::BlockedDevice);
        assert_eq!(resolution.failure_id, "FEATURE_FAILURE_DL_BLOCKLIST_g7");
    }

    #[test]
    fn apply_is_idempotent_on_identical_input() {
        let context = context();
        apply(&context, &[downloaded_block()]).unwrap();
        let first = context.resolve(Feature::Webgl).unwrap();
        apply(&context, &[downloaded_block()]).unwrap();
        assert_eq!(context.resolve(Feature::Webgl).unwrap(), first);
    }
}
