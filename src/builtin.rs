//! Compiled-in rule table. This is the fallback the engine consults when
//! no downloaded batch has produced an override; the downloaded path can
//! tighten or relax these per feature without a new release.

use crate::rule::{
    BatteryStatus, Feature, FeatureStatus, OperatingSystem, RefreshRateStatus, RuleEntry,
};
use crate::version::{pack_driver_version, VersionComparison};

/// Rule order is significant: the scan stops at the first match.
pub fn static_rules() -> Vec<RuleEntry> {
    vec![
        // Pre-2010 NVIDIA drivers crash in the D3D9/D3D11 layer managers.
        RuleEntry::builder()
            .rule_id("FEATURE_FAILURE_OLD_NVIDIA")
            .os(OperatingSystem::Windows)
            .vendor("0x10de")
            .all_features()
            .status(FeatureStatus::BlockedDriverVersion)
            .driver_version(
                VersionComparison::LessThan,
                pack_driver_version(8, 17, 11, 8265),
            )
            .build(),
        RuleEntry::builder()
            .rule_id("FEATURE_FAILURE_OLD_AMD")
            .os(OperatingSystem::Windows)
            .vendor("0x1002")
            .all_features()
            .status(FeatureStatus::BlockedDriverVersion)
            .driver_version(
                VersionComparison::LessThan,
                pack_driver_version(8, 17, 10, 1070),
            )
            .build(),
        // GMA 950/X3100 era chips render Direct2D text corrupt regardless
        // of driver.
        RuleEntry::builder()
            .rule_id("FEATURE_FAILURE_INTEL_GEN4_D2D")
            .os(OperatingSystem::Windows)
            .vendor("0x8086")
            .devices(["0x2582", "0x2592", "0x2772", "0x2776", "0x27a2", "0x27ae"])
            .feature(Feature::Direct2d)
            .status(FeatureStatus::BlockedDevice)
            .build(),
        RuleEntry::builder()
            .rule_id("FEATURE_FAILURE_WIN7_WR_COMPOSITOR")
            .os(OperatingSystem::Windows7)
            .feature(Feature::WebRenderCompositor)
            .status(FeatureStatus::BlockedOsVersion)
            .build(),
        // Flickers under every compositor we tried; see the tracking entry
        // attached to the failure id.
        RuleEntry::builder()
            .rule_id("FEATURE_FAILURE_GLX_VIDEO_DECODE")
            .os(OperatingSystem::Linux)
            .window_protocol("x11")
            .driver_vendor("mesa/vmwgfx")
            .feature(Feature::HardwareVideoDecoding)
            .status(FeatureStatus::BlockedDevice)
            .build(),
        RuleEntry::builder()
            .rule_id("FEATURE_FAILURE_ANDROID_VULKAN")
            .os(OperatingSystem::Android)
            .feature(Feature::Vulkan)
            .status(FeatureStatus::Discouraged)
            .build(),
        // Battery-backed dual-rate laptops hit pathological power draw with
        // the compositor's partial-present path.
        RuleEntry::builder()
            .rule_id("FEATURE_FAILURE_MIXED_REFRESH_ON_BATTERY")
            .os(OperatingSystem::Windows10Or11)
            .battery(BatteryStatus::Present)
            .refresh_rate_status(RefreshRateStatus::Mixed)
            .feature(Feature::WebRenderCompositor)
            .status(FeatureStatus::Discouraged)
            .build(),
        // Zero-copy video is allowlist-governed: without one of these the
        // resolver reports DENIED.
        RuleEntry::builder()
            .rule_id("FEATURE_ROLLOUT_ZERO_COPY_INTEL")
            .os(OperatingSystem::Windows10Or11)
            .vendor("0x8086")
            .feature(Feature::HwDecodedVideoZeroCopy)
            .status(FeatureStatus::AllowQualified)
            .build(),
        RuleEntry::builder()
            .rule_id("FEATURE_ROLLOUT_ZERO_COPY_NVIDIA")
            .os(OperatingSystem::Windows10Or11)
            .vendor("0x10de")
            .driver_version(
                VersionComparison::GreaterThanOrEqual,
                pack_driver_version(21, 21, 13, 7576),
            )
            .feature(Feature::HwDecodedVideoZeroCopy)
            .status(FeatureStatus::AllowQualified)
            .build(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_well_formed() {
        let rules = static_rules();
        assert!(!rules.is_empty());
        for rule in &rules {
            assert!(!rule.rule_id.is_empty());
            assert_ne!(rule.status, FeatureStatus::Ok);
            assert_ne!(rule.os, OperatingSystem::Unknown);
        }
    }

    #[test]
    fn allow_rules_cover_the_allowlist_governed_feature() {
        let rules = static_rules();
        assert!(rules.iter().any(|rule| {
            rule.status.is_allowance()
                && rule.target.applies_to(Feature::HwDecodedVideoZeroCopy)
        }));
    }
}
