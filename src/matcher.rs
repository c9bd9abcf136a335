//! Ordered-scan match engine: evaluates one machine snapshot against a
//! rule list and reports the first winning rule's status.

use crate::machine::MachineAttributes;
use crate::rule::{
    BatteryStatus, DeviceFamily, Feature, FeatureStatus, OperatingSystem, OsFamily,
    RefreshRateStatus, RuleEntry,
};
use crate::version::{
    compare, compare_i32, format_driver_version, VersionComparison, ALL_DRIVER_VERSIONS,
};
use log::warn;

/// Result of one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOutcome {
    pub status: FeatureStatus,
    pub failure_id: String,
    pub suggested_version: Option<String>,
}

impl MatchOutcome {
    pub fn unknown() -> Self {
        MatchOutcome {
            status: FeatureStatus::Unknown,
            failure_id: String::new(),
            suggested_version: None,
        }
    }
}

/// Reviewed only when the generic scan came back UNKNOWN; a definite
/// result is never overridden. This is where device/feature special cases
/// too awkward for the rule grammar live.
pub trait MatchHook: Send + Sync {
    fn review(&self, feature: Feature, machine: &MachineAttributes)
        -> Option<(FeatureStatus, String)>;
}

/// Historical special case: a secondary NVIDIA 310M poisons Direct2D even
/// though the primary adapter looks fine.
#[derive(Debug, Default)]
pub struct SecondaryNv310mHook;

impl MatchHook for SecondaryNv310mHook {
    fn review(
        &self,
        feature: Feature,
        machine: &MachineAttributes,
    ) -> Option<(FeatureStatus, String)> {
        if feature != Feature::Direct2d {
            return None;
        }
        let secondary = machine.adapters[1].as_ref()?;
        let attrs = &secondary.attributes;
        if attrs.vendor_id.eq_ignore_ascii_case("0x10de")
            && attrs.device_id.eq_ignore_ascii_case("0x0a70")
        {
            return Some((
                FeatureStatus::BlockedDevice,
                "FEATURE_FAILURE_D2D_NV310M_BLOCK".to_string(),
            ));
        }
        None
    }
}

/// Scans `rules` in order and returns the first rule whose predicates all
/// hold for `machine` and whose status family matches `for_allowing`.
/// Falls through to the hook list only when the scan ends UNKNOWN.
pub fn find(
    rules: &[RuleEntry],
    feature: Feature,
    machine: &MachineAttributes,
    for_allowing: bool,
    hooks: &[Box<dyn MatchHook>],
) -> MatchOutcome {
    if machine.adapters_unavailable() {
        return MatchOutcome::unknown();
    }

    let mut outcome = MatchOutcome::unknown();
    let mut winner: Option<&RuleEntry> = None;

    for rule in rules {
        // Allow-family entries belong to allow-mode scans and vice versa.
        if rule.status.is_allowance() != for_allowing {
            continue;
        }
        let Some(adapter) = machine.adapter(rule.adapter_slot) else {
            continue;
        };
        if !os_matches(rule.os, machine.os) {
            continue;
        }
        if rule.os_version != 0 && rule.os_version != machine.os_version {
            continue;
        }
        if !compare(
            machine.os_version_ex,
            rule.os_version_ex_cmp,
            rule.os_version_ex,
            rule.os_version_ex_max,
        ) {
            continue;
        }
        if !refresh_rate_status_matches(machine.refresh_rate_status(), rule.refresh_rate_status) {
            continue;
        }
        if machine.display.screen_count > 0
            && !compare_i32(
                machine.display.min_refresh_rate,
                rule.min_refresh_rate_cmp,
                rule.min_refresh_rate,
                rule.min_refresh_rate_max,
            )
        {
            continue;
        }
        if machine.display.screen_count > 0
            && !compare_i32(
                machine.display.max_refresh_rate,
                rule.max_refresh_rate_cmp,
                rule.max_refresh_rate,
                rule.max_refresh_rate_max,
            )
        {
            continue;
        }
        if !battery_matches(rule.battery, machine.has_battery) {
            continue;
        }
        if !rule.screen.matches(machine.display.total_pixels) {
            continue;
        }
        if !wildcard_eq(&rule.window_protocol, &machine.window_protocol) {
            continue;
        }
        if !wildcard_eq(&rule.vendor, &adapter.attributes.vendor_id) {
            continue;
        }
        if !wildcard_eq(&rule.driver_vendor, &adapter.attributes.driver_vendor) {
            continue;
        }
        if let Some(devices) = rule.devices.as_ref().filter(|d| !d.is_empty()) {
            match devices.contains(&adapter.attributes.device_id) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    // Fail safe toward blocking: a family we cannot search
                    // must not quietly allow, and must not quietly unblock.
                    warn!("event=device_family_lookup_failed rule={} err={err}", rule.failure_id());
                    if for_allowing {
                        continue;
                    }
                }
            }
        }
        if !exact_eq(&rule.hardware, &machine.hardware)
            || !exact_eq(&rule.model, &machine.model)
            || !exact_eq(&rule.product, &machine.product)
            || !exact_eq(&rule.manufacturer, &machine.manufacturer)
        {
            continue;
        }

        let driver_matches = if machine.os.has_driver_version_semantics() {
            compare(
                adapter.driver_version,
                rule.driver_version_cmp,
                rule.driver_version,
                rule.driver_version_max,
            )
        } else {
            // No comparable driver versions on this platform; the OS and
            // device predicates carry the rule.
            true
        };

        if (driver_matches || rule.driver_version == ALL_DRIVER_VERSIONS)
            && rule.target.applies_to(feature)
        {
            outcome.status = rule.status;
            outcome.failure_id = rule.failure_id().to_string();
            winner = Some(rule);
            break;
        }
    }

    if outcome.status == FeatureStatus::Unknown {
        for hook in hooks {
            if let Some((status, failure_id)) = hook.review(feature, machine) {
                outcome.status = status;
                outcome.failure_id = failure_id;
                break;
            }
        }
    }

    if outcome.status == FeatureStatus::BlockedDriverVersion {
        if let Some(rule) = winner {
            outcome.suggested_version = suggest_version(rule);
        }
    }

    outcome
}

/// Family wildcards match any concrete member; an unknown rule OS never
/// matches. The machine side is always a concrete (possibly
/// family-unknown) member, never a wildcard.
fn os_matches(rule_os: OperatingSystem, system_os: OperatingSystem) -> bool {
    debug_assert!(
        !matches!(
            system_os,
            OperatingSystem::Windows | OperatingSystem::Windows10Or11 | OperatingSystem::Macos
        ),
        "machine snapshot reported a wildcard OS"
    );
    match rule_os {
        OperatingSystem::Unknown => false,
        OperatingSystem::All => true,
        OperatingSystem::Windows => system_os.family() == OsFamily::Windows,
        OperatingSystem::Macos => system_os.family() == OsFamily::Macos,
        OperatingSystem::Windows10Or11 => matches!(
            system_os,
            OperatingSystem::Windows10 | OperatingSystem::Windows11
        ),
        concrete => system_os == concrete,
    }
}

fn refresh_rate_status_matches(system: RefreshRateStatus, rule: RefreshRateStatus) -> bool {
    match rule {
        RefreshRateStatus::Any => true,
        RefreshRateStatus::AnySame => matches!(
            system,
            RefreshRateStatus::Single | RefreshRateStatus::MultipleSame
        ),
        other => system == other,
    }
}

fn battery_matches(rule: BatteryStatus, has_battery: bool) -> bool {
    match rule {
        BatteryStatus::All => true,
        BatteryStatus::Present => has_battery,
        BatteryStatus::None => !has_battery,
    }
}

/// `None` is the "All" wildcard; otherwise case-insensitive equality.
fn wildcard_eq(rule_value: &Option<String>, machine_value: &str) -> bool {
    match rule_value {
        None => true,
        Some(value) => value.eq_ignore_ascii_case(machine_value),
    }
}

fn exact_eq(rule_value: &Option<String>, machine_value: &str) -> bool {
    match rule_value {
        None => true,
        Some(value) => value == machine_value,
    }
}

/// An explicit suggestion wins. Otherwise one is decoded from the packed
/// bound, but only for strict LESS_THAN: for LESS_THAN_OR_EQUAL the bound
/// itself is still blocked, and naming it would send users to a broken
/// driver. Kept asymmetric for compatibility with existing rule tables.
fn suggest_version(rule: &RuleEntry) -> Option<String> {
    if let Some(explicit) = &rule.suggested_version {
        return Some(explicit.clone());
    }
    if rule.driver_version_cmp == VersionComparison::LessThan
        && rule.driver_version != ALL_DRIVER_VERSIONS
    {
        return Some(format_driver_version(rule.driver_version));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::{AdapterAttributes, AdapterSnapshot, DisplayAttributes};
    use crate::rule::{DeviceFamily, DeviceFamilyError, RuleEntry, ScreenSizeStatus};
    use crate::version::pack_driver_version;
    use std::sync::Arc;

    fn intel_machine() -> MachineAttributes {
        MachineAttributes {
            os: OperatingSystem::Windows10,
            os_version: 0,
            os_version_ex: 0,
            adapters: [
                Some(AdapterSnapshot {
                    attributes: AdapterAttributes {
                        vendor_id: "0x8086".into(),
                        device_id: "0x2582".into(),
                        driver_vendor: String::new(),
                        driver_version_string: "8.52.322.2200".into(),
                    },
                    driver_version: pack_driver_version(8, 52, 322, 2200),
                }),
                None,
            ],
            display: DisplayAttributes {
                screen_count: 1,
                min_refresh_rate: 60,
                max_refresh_rate: 60,
                total_pixels: 2_073_600,
            },
            has_battery: false,
            window_protocol: String::new(),
            hardware: String::new(),
            model: String::new(),
            product: String::new(),
            manufacturer: String::new(),
        }
    }

    fn intel_block_rule() -> RuleEntry {
        RuleEntry::builder()
            .rule_id("FEATURE_FAILURE_INTEL_OLD_DRIVER")
            .os(OperatingSystem::Windows10)
            .vendor("0x8086")
            .devices(["0x2582", "0x2782"])
            .feature(Feature::Direct3d11Layers)
            .status(FeatureStatus::BlockedDriverVersion)
            .driver_version(
                VersionComparison::LessThanOrEqual,
                pack_driver_version(8, 52, 322, 2202),
            )
            .build()
    }

    #[test]
    fn matching_rule_wins_with_failure_id_and_no_suggestion_for_le() {
        let rules = vec![intel_block_rule()];
        let outcome = find(&rules, Feature::Direct3d11Layers, &intel_machine(), false, &[]);
        assert_eq!(outcome.status, FeatureStatus::BlockedDriverVersion);
        assert_eq!(outcome.failure_id, "FEATURE_FAILURE_INTEL_OLD_DRIVER");
        // LESS_THAN_OR_EQUAL never yields a derived suggestion.
        assert_eq!(outcome.suggested_version, None);
    }

    #[test]
    fn strict_less_than_derives_suggestion_from_bound() {
        let mut rule = intel_block_rule();
        rule.driver_version_cmp = VersionComparison::LessThan;
        let outcome = find(
            &[rule],
            Feature::Direct3d11Layers,
            &intel_machine(),
            false,
            &[],
        );
        assert_eq!(outcome.status, FeatureStatus::BlockedDriverVersion);
        assert_eq!(outcome.suggested_version.as_deref(), Some("8.52.322.2202"));
    }

    #[test]
    fn explicit_suggestion_outranks_derived_one() {
        let mut rule = intel_block_rule();
        rule.driver_version_cmp = VersionComparison::LessThan;
        rule.suggested_version = Some("9.0.0.0".into());
        let outcome = find(
            &[rule],
            Feature::Direct3d11Layers,
            &intel_machine(),
            false,
            &[],
        );
        assert_eq!(outcome.suggested_version.as_deref(), Some("9.0.0.0"));
    }

    #[test]
    fn allow_rules_never_win_block_mode() {
        let allow = RuleEntry::builder()
            .os(OperatingSystem::Windows10)
            .all_features()
            .status(FeatureStatus::AllowAlways)
            .build();
        let outcome = find(&[allow], Feature::WebRender, &intel_machine(), false, &[]);
        assert_eq!(outcome.status, FeatureStatus::Unknown);
    }

    #[test]
    fn empty_device_set_is_unconstrained() {
        let mut rule = intel_block_rule();
        rule.devices = None;
        let mut machine = intel_machine();
        machine.adapters[0].as_mut().unwrap().attributes.device_id = "0xbeef".into();
        let outcome = find(&[rule], Feature::Direct3d11Layers, &machine, false, &[]);
        assert_eq!(outcome.status, FeatureStatus::BlockedDriverVersion);
    }

    #[test]
    fn wrong_device_skips_rule() {
        let mut machine = intel_machine();
        machine.adapters[0].as_mut().unwrap().attributes.device_id = "0x9999".into();
        let outcome = find(
            &[intel_block_rule()],
            Feature::Direct3d11Layers,
            &machine,
            false,
            &[],
        );
        assert_eq!(outcome.status, FeatureStatus::Unknown);
    }

    #[derive(Debug)]
    struct BrokenFamily;
    impl DeviceFamily for BrokenFamily {
        fn contains(&self, _device_id: &str) -> Result<bool, DeviceFamilyError> {
            Err(DeviceFamilyError::Unavailable("table missing".into()))
        }
        fn is_empty(&self) -> bool {
            false
        }
    }

    #[test]
    fn device_lookup_failure_blocks_but_does_not_allow() {
        let mut block = intel_block_rule();
        block.devices = Some(Arc::new(BrokenFamily));
        let outcome = find(
            &[block.clone()],
            Feature::Direct3d11Layers,
            &intel_machine(),
            false,
            &[],
        );
        assert_eq!(outcome.status, FeatureStatus::BlockedDriverVersion);

        let mut allow = block;
        allow.status = FeatureStatus::AllowQualified;
        let outcome = find(
            &[allow],
            Feature::Direct3d11Layers,
            &intel_machine(),
            true,
            &[],
        );
        assert_eq!(outcome.status, FeatureStatus::Unknown);
    }

    #[test]
    fn family_wildcards_cover_concrete_and_unknown_members() {
        assert!(os_matches(OperatingSystem::Windows, OperatingSystem::Windows7));
        assert!(os_matches(
            OperatingSystem::Windows,
            OperatingSystem::WindowsUnknown
        ));
        assert!(os_matches(
            OperatingSystem::Windows10Or11,
            OperatingSystem::Windows11
        ));
        assert!(!os_matches(
            OperatingSystem::Windows10Or11,
            OperatingSystem::Windows8
        ));
        assert!(os_matches(OperatingSystem::Macos, OperatingSystem::Macos14));
        assert!(!os_matches(OperatingSystem::Unknown, OperatingSystem::Linux));
        assert!(os_matches(OperatingSystem::All, OperatingSystem::Android));
    }

    #[test]
    fn refresh_rate_any_same_covers_single_and_identical() {
        assert!(refresh_rate_status_matches(
            RefreshRateStatus::Single,
            RefreshRateStatus::AnySame
        ));
        assert!(refresh_rate_status_matches(
            RefreshRateStatus::MultipleSame,
            RefreshRateStatus::AnySame
        ));
        assert!(!refresh_rate_status_matches(
            RefreshRateStatus::Mixed,
            RefreshRateStatus::AnySame
        ));
    }

    #[test]
    fn screen_category_predicate_applies() {
        let mut rule = intel_block_rule();
        rule.screen = ScreenSizeStatus::Large;
        let outcome = find(
            &[rule],
            Feature::Direct3d11Layers,
            &intel_machine(),
            false,
            &[],
        );
        assert_eq!(outcome.status, FeatureStatus::Unknown);
    }

    #[test]
    fn hook_fires_only_on_unknown() {
        let mut machine = intel_machine();
        machine.adapters[1] = Some(AdapterSnapshot {
            attributes: AdapterAttributes {
                vendor_id: "0x10DE".into(),
                device_id: "0x0A70".into(),
                driver_vendor: String::new(),
                driver_version_string: String::new(),
            },
            driver_version: 0,
        });
        let hooks: Vec<Box<dyn MatchHook>> = vec![Box::new(SecondaryNv310mHook)];

        let outcome = find(&[], Feature::Direct2d, &machine, false, &hooks);
        assert_eq!(outcome.status, FeatureStatus::BlockedDevice);
        assert_eq!(outcome.failure_id, "FEATURE_FAILURE_D2D_NV310M_BLOCK");

        // A definite result from the scan is not overridden.
        let block_all = RuleEntry::builder()
            .os(OperatingSystem::Windows10)
            .feature(Feature::Direct2d)
            .status(FeatureStatus::BlockedOsVersion)
            .rule_id("FEATURE_FAILURE_OS")
            .build();
        let outcome = find(&[block_all], Feature::Direct2d, &machine, false, &hooks);
        assert_eq!(outcome.status, FeatureStatus::BlockedOsVersion);
        assert_eq!(outcome.failure_id, "FEATURE_FAILURE_OS");

        let outcome = find(&[], Feature::WebRender, &machine, false, &hooks);
        assert_eq!(outcome.status, FeatureStatus::Unknown);
    }

    #[test]
    fn secondary_slot_rule_requires_secondary_attributes() {
        let rule = RuleEntry::builder()
            .os(OperatingSystem::Windows10)
            .all_features()
            .status(FeatureStatus::BlockedDevice)
            .rule_id("FEATURE_FAILURE_DUAL_GPU")
            .secondary_adapter()
            .build();
        // No secondary adapter reported: the rule is silently skipped.
        let outcome = find(&[rule], Feature::WebRender, &intel_machine(), false, &[]);
        assert_eq!(outcome.status, FeatureStatus::Unknown);
    }

    #[test]
    fn macos_machines_skip_driver_version_comparison() {
        let mut rule = intel_block_rule();
        rule.os = OperatingSystem::Macos14;
        rule.driver_version_cmp = VersionComparison::Equal;
        rule.driver_version = pack_driver_version(1, 2, 3, 4);
        let mut machine = intel_machine();
        machine.os = OperatingSystem::Macos14;
        let outcome = find(&[rule], Feature::Direct3d11Layers, &machine, false, &[]);
        // The version predicate passes vacuously; device/vendor carried it.
        assert_eq!(outcome.status, FeatureStatus::BlockedDriverVersion);
    }
}
