//! Resolution precedence across process roles: override store first, then
//! the shared snapshot for subordinates, then the rule scan with its fixed
//! fallbacks.

use gfxgate::{
    static_rules, AdapterAttributes, AdapterSlot, DisplayAttributes, Feature, FeatureStatus,
    ForceAllPolicy, GfxContext, GfxContextConfig, MachineProbe, OperatingSystem, ProcessRole,
    ResolveError, Resolution, ADAPTER_UNAVAILABLE_FAILURE_ID,
};
use std::sync::Arc;

struct Probe {
    adapter: Option<AdapterAttributes>,
    os: OperatingSystem,
}

impl Probe {
    fn old_nvidia() -> Self {
        Probe {
            adapter: Some(AdapterAttributes {
                vendor_id: "0x10de".into(),
                device_id: "0x1b80".into(),
                driver_vendor: String::new(),
                driver_version_string: "8.17.11.7000".into(),
            }),
            os: OperatingSystem::Windows10,
        }
    }

    fn modern_intel() -> Self {
        Probe {
            adapter: Some(AdapterAttributes {
                vendor_id: "0x8086".into(),
                device_id: "0x5916".into(),
                driver_vendor: String::new(),
                driver_version_string: "31.0.101.2111".into(),
            }),
            os: OperatingSystem::Windows11,
        }
    }
}

impl MachineProbe for Probe {
    fn adapter_attributes(&self, slot: AdapterSlot) -> Option<AdapterAttributes> {
        match slot {
            AdapterSlot::Primary => self.adapter.clone(),
            AdapterSlot::Secondary => None,
        }
    }
    fn operating_system(&self) -> (OperatingSystem, u32, u64) {
        (self.os, 0, 0)
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

fn authoritative(probe: Probe) -> GfxContext {
    GfxContext::new(GfxContextConfig::default(), Arc::new(probe), static_rules()).unwrap()
}

#[test]
fn old_nvidia_driver_blocks_everything_with_a_suggestion() {
    let context = authoritative(Probe::old_nvidia());
    let resolution = context.resolve(Feature::Direct3d11Layers).unwrap();
    assert_eq!(resolution.status, FeatureStatus::BlockedDriverVersion);
    assert_eq!(resolution.failure_id, "FEATURE_FAILURE_OLD_NVIDIA");
    // Strict LESS_THAN bound formats back into the suggested upgrade.
    assert_eq!(
        context
            .suggested_driver_version(Feature::Direct3d11Layers)
            .as_deref(),
        Some("8.17.11.8265")
    );
}

#[test]
fn modern_machine_gets_default_outcomes() {
    let context = authoritative(Probe::modern_intel());
    assert_eq!(
        context.resolve(Feature::WebRender).unwrap(),
        Resolution::ok()
    );
    // The allowlist-governed feature is positively allowed for Intel on
    // Windows 10/11 by the static table.
    let resolution = context.resolve(Feature::HwDecodedVideoZeroCopy).unwrap();
    assert_eq!(resolution.status, FeatureStatus::AllowQualified);
    assert_eq!(resolution.failure_id, "FEATURE_ROLLOUT_ZERO_COPY_INTEL");
}

#[test]
fn allowlist_governed_feature_denied_off_the_allowlist() {
    let mut probe = Probe::modern_intel();
    probe.os = OperatingSystem::Linux;
    let context = authoritative(probe);
    let resolution = context.resolve(Feature::HwDecodedVideoZeroCopy).unwrap();
    assert_eq!(resolution.status, FeatureStatus::Denied);
}

#[test]
fn unavailable_adapter_falls_back_per_feature_policy() {
    let probe = Probe {
        adapter: None,
        os: OperatingSystem::Windows10,
    };
    let context = authoritative(probe);
    let resolution = context.resolve(Feature::WebRender).unwrap();
    assert_eq!(resolution.status, FeatureStatus::BlockedDevice);
    assert_eq!(resolution.failure_id, ADAPTER_UNAVAILABLE_FAILURE_ID);
    // Features exempt from the known-config policy keep working.
    assert_eq!(
        context.resolve(Feature::GpuProcess).unwrap(),
        Resolution::ok()
    );
}

#[test]
fn force_all_short_circuits_before_any_rule() {
    let config = GfxContextConfig {
        force_all: ForceAllPolicy::from_setting(-1),
        ..Default::default()
    };
    let context =
        GfxContext::new(config, Arc::new(Probe::old_nvidia()), static_rules()).unwrap();
    assert_eq!(
        context.resolve(Feature::Direct3d11Layers).unwrap(),
        Resolution::ok()
    );
}

#[test]
fn snapshot_flows_from_authoritative_to_subordinate() {
    let parent = authoritative(Probe::old_nvidia());
    let snapshot = parent.all_feature_statuses().unwrap();
    assert_eq!(snapshot.entries().len(), Feature::ALL.len());

    let child = GfxContext::new(
        GfxContextConfig {
            role: ProcessRole::Subordinate,
            ..Default::default()
        },
        // Subordinates never probe hardware for resolution.
        Arc::new(Probe {
            adapter: None,
            os: OperatingSystem::Unknown,
        }),
        vec![],
    )
    .unwrap();
    child.install_snapshot(Arc::clone(&snapshot)).unwrap();

    for entry in snapshot.entries() {
        let resolution = child.resolve(entry.feature).unwrap();
        assert_eq!(resolution.status, entry.status);
        assert_eq!(resolution.failure_id, entry.failure_id);
    }

    // Installing twice is a contract violation: loud in debug builds, a
    // plain error otherwise.
    let second_install = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        child.install_snapshot(snapshot)
    }));
    if cfg!(debug_assertions) {
        assert!(second_install.is_err());
    } else {
        assert_eq!(
            second_install.unwrap(),
            Err(ResolveError::SnapshotAlreadyInstalled)
        );
    }
}

#[test]
fn shutdown_silences_every_path() {
    let context = authoritative(Probe::old_nvidia());
    context.shutdown();
    assert_eq!(
        context.resolve(Feature::Direct3d11Layers).unwrap(),
        Resolution::no_opinion()
    );
    assert_eq!(context.suggested_driver_version(Feature::Direct3d11Layers), None);
}
