//! Machine snapshot handed to the match engine, and the collaborator
//! contract that supplies it. Hardware discovery itself lives outside this
//! crate; the probe trait is the seam.

use crate::rule::{AdapterSlot, OperatingSystem, RefreshRateStatus};
use crate::version::parse_driver_version;

/// Attributes of one adapter slot as reported by the platform layer.
#[derive(Debug, Clone, Default)]
pub struct AdapterAttributes {
    pub vendor_id: String,
    pub device_id: String,
    pub driver_vendor: String,
    pub driver_version_string: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DisplayAttributes {
    pub screen_count: u32,
    pub min_refresh_rate: i32,
    pub max_refresh_rate: i32,
    pub total_pixels: i64,
}

/// External collaborator that can answer questions about the host. Every
/// accessor is fallible-by-absence; resolution falls back to fixed policy
/// defaults rather than failing.
pub trait MachineProbe: Send + Sync {
    fn adapter_attributes(&self, slot: AdapterSlot) -> Option<AdapterAttributes>;
    /// (os, exact version, extended packed version)
    fn operating_system(&self) -> (OperatingSystem, u32, u64);
    fn display_attributes(&self) -> DisplayAttributes;
    fn battery_presence(&self) -> Option<bool>;
    fn window_system_protocol(&self) -> Option<String>;
    fn host_application_version(&self) -> String;

    fn hardware(&self) -> String {
        String::new()
    }
    fn model(&self) -> String {
        String::new()
    }
    fn product(&self) -> String {
        String::new()
    }
    fn manufacturer(&self) -> String {
        String::new()
    }
}

/// Adapter attributes plus the parsed driver version, fixed per resolution
/// call.
#[derive(Debug, Clone)]
pub struct AdapterSnapshot {
    pub attributes: AdapterAttributes,
    pub driver_version: u64,
}

/// Read-only view of the host used for one resolution pass.
#[derive(Debug, Clone)]
pub struct MachineAttributes {
    pub os: OperatingSystem,
    pub os_version: u32,
    pub os_version_ex: u64,
    pub adapters: [Option<AdapterSnapshot>; 2],
    pub display: DisplayAttributes,
    pub has_battery: bool,
    pub window_protocol: String,
    pub hardware: String,
    pub model: String,
    pub product: String,
    pub manufacturer: String,
}

impl MachineAttributes {
    pub fn from_probe(probe: &dyn MachineProbe) -> Self {
        let (os, os_version, os_version_ex) = probe.operating_system();
        let snapshot = |slot| {
            probe.adapter_attributes(slot).map(|attributes| {
                let driver_version =
                    parse_driver_version(&attributes.driver_version_string).unwrap_or(0);
                AdapterSnapshot {
                    attributes,
                    driver_version,
                }
            })
        };
        MachineAttributes {
            os,
            os_version,
            os_version_ex,
            adapters: [snapshot(AdapterSlot::Primary), snapshot(AdapterSlot::Secondary)],
            display: probe.display_attributes(),
            has_battery: probe.battery_presence().unwrap_or(false),
            window_protocol: probe.window_system_protocol().unwrap_or_default(),
            hardware: probe.hardware(),
            model: probe.model(),
            product: probe.product(),
            manufacturer: probe.manufacturer(),
        }
    }

    pub fn adapter(&self, slot: AdapterSlot) -> Option<&AdapterSnapshot> {
        self.adapters[slot.index()].as_ref()
    }

    /// True when neither slot produced usable attributes; resolution then
    /// falls back to the fixed per-feature default.
    pub fn adapters_unavailable(&self) -> bool {
        self.adapters.iter().all(Option::is_none)
    }

    /// Category of the observed refresh-rate configuration.
    pub fn refresh_rate_status(&self) -> RefreshRateStatus {
        if self.display.screen_count <= 1 {
            RefreshRateStatus::Single
        } else if self.display.min_refresh_rate == self.display.max_refresh_rate {
            RefreshRateStatus::MultipleSame
        } else {
            RefreshRateStatus::Mixed
        }
    }
}
