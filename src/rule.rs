//! Immutable rule model: one pattern-plus-status record, either compiled
//! into the static table or parsed from a downloaded blocklist batch.

use crate::version::{VersionComparison, ALL_DRIVER_VERSIONS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// One graphics capability under blocklist control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Feature {
    Direct2d,
    Direct3d11Layers,
    Direct3d11Angle,
    HardwareVideoDecoding,
    HwDecodedVideoZeroCopy,
    WebRender,
    WebRenderCompositor,
    WebRenderShaderCache,
    GpuProcess,
    Webgl,
    AllowWebglOutOfProcess,
    CanvasAcceleration,
    BackdropFilter,
    Vulkan,
}

impl Feature {
    pub const ALL: [Feature; 14] = [
        Feature::Direct2d,
        Feature::Direct3d11Layers,
        Feature::Direct3d11Angle,
        Feature::HardwareVideoDecoding,
        Feature::HwDecodedVideoZeroCopy,
        Feature::WebRender,
        Feature::WebRenderCompositor,
        Feature::WebRenderShaderCache,
        Feature::GpuProcess,
        Feature::Webgl,
        Feature::AllowWebglOutOfProcess,
        Feature::CanvasAcceleration,
        Feature::BackdropFilter,
        Feature::Vulkan,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Direct2d => "DIRECT2D",
            Feature::Direct3d11Layers => "DIRECT3D_11_LAYERS",
            Feature::Direct3d11Angle => "DIRECT3D_11_ANGLE",
            Feature::HardwareVideoDecoding => "HARDWARE_VIDEO_DECODING",
            Feature::HwDecodedVideoZeroCopy => "HW_DECODED_VIDEO_ZERO_COPY",
            Feature::WebRender => "WEBRENDER",
            Feature::WebRenderCompositor => "WEBRENDER_COMPOSITOR",
            Feature::WebRenderShaderCache => "WEBRENDER_SHADER_CACHE",
            Feature::GpuProcess => "GPU_PROCESS",
            Feature::Webgl => "WEBGL",
            Feature::AllowWebglOutOfProcess => "ALLOW_WEBGL_OUT_OF_PROCESS",
            Feature::CanvasAcceleration => "CANVAS_ACCELERATION",
            Feature::BackdropFilter => "BACKDROP_FILTER",
            Feature::Vulkan => "VULKAN",
        }
    }

    pub fn parse(name: &str) -> Option<Feature> {
        Feature::ALL.iter().copied().find(|f| f.as_str() == name)
    }

    /// Features that must only run on configurations we recognize. When a
    /// rule targets "optional features", only these are affected; the rest
    /// are expected to work even on unknown hardware.
    pub fn only_on_known_config(&self) -> bool {
        !matches!(
            self,
            Feature::GpuProcess
                | Feature::Direct3d11Angle
                | Feature::AllowWebglOutOfProcess
                | Feature::BackdropFilter
        )
    }

    /// Allowlist-governed features default to DENIED instead of OK when no
    /// rule matches.
    pub fn is_allowlist_governed(&self) -> bool {
        matches!(self, Feature::HwDecodedVideoZeroCopy)
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which features a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuleTarget {
    /// Every feature.
    All,
    /// Only features flagged `only_on_known_config`.
    #[default]
    Optional,
    /// Exactly one feature.
    One(Feature),
}

impl RuleTarget {
    pub fn applies_to(&self, feature: Feature) -> bool {
        match self {
            RuleTarget::All => true,
            RuleTarget::Optional => feature.only_on_known_config(),
            RuleTarget::One(f) => *f == feature,
        }
    }
}

/// Outcome assigned to a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FeatureStatus {
    #[default]
    Ok,
    Unknown,
    AllowAlways,
    AllowQualified,
    Denied,
    BlockedDriverVersion,
    BlockedDevice,
    BlockedOsVersion,
    BlockedMismatchedVersion,
    BlockedPlatformTest,
    Discouraged,
}

impl FeatureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureStatus::Ok => "STATUS_OK",
            FeatureStatus::Unknown => "STATUS_UNKNOWN",
            FeatureStatus::AllowAlways => "ALLOW_ALWAYS",
            FeatureStatus::AllowQualified => "ALLOW_QUALIFIED",
            FeatureStatus::Denied => "DENIED",
            FeatureStatus::BlockedDriverVersion => "BLOCKED_DRIVER_VERSION",
            FeatureStatus::BlockedDevice => "BLOCKED_DEVICE",
            FeatureStatus::BlockedOsVersion => "BLOCKED_OS_VERSION",
            FeatureStatus::BlockedMismatchedVersion => "BLOCKED_MISMATCHED_VERSION",
            FeatureStatus::BlockedPlatformTest => "BLOCKED_PLATFORM_TEST",
            FeatureStatus::Discouraged => "DISCOURAGED",
        }
    }

    /// Unrecognized status tokens read as OK, never as an error: a status
    /// this build does not know cannot be allowed to block anything.
    pub fn parse(token: &str) -> FeatureStatus {
        match token {
            "STATUS_OK" => FeatureStatus::Ok,
            "STATUS_UNKNOWN" => FeatureStatus::Unknown,
            "ALLOW_ALWAYS" => FeatureStatus::AllowAlways,
            "ALLOW_QUALIFIED" => FeatureStatus::AllowQualified,
            "DENIED" => FeatureStatus::Denied,
            "BLOCKED_DRIVER_VERSION" => FeatureStatus::BlockedDriverVersion,
            "BLOCKED_DEVICE" => FeatureStatus::BlockedDevice,
            "BLOCKED_OS_VERSION" => FeatureStatus::BlockedOsVersion,
            "BLOCKED_MISMATCHED_VERSION" => FeatureStatus::BlockedMismatchedVersion,
            "BLOCKED_PLATFORM_TEST" => FeatureStatus::BlockedPlatformTest,
            "DISCOURAGED" => FeatureStatus::Discouraged,
            _ => FeatureStatus::Ok,
        }
    }

    /// Allow-family statuses live on the allowlist side of the scan; every
    /// other status belongs to block-mode matching.
    pub fn is_allowance(&self) -> bool {
        matches!(
            self,
            FeatureStatus::AllowAlways | FeatureStatus::AllowQualified
        )
    }

    pub fn is_blocked_or_discouraged(&self) -> bool {
        matches!(
            self,
            FeatureStatus::BlockedDriverVersion
                | FeatureStatus::BlockedDevice
                | FeatureStatus::BlockedOsVersion
                | FeatureStatus::BlockedMismatchedVersion
                | FeatureStatus::BlockedPlatformTest
                | FeatureStatus::Discouraged
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    Windows,
    Macos,
    Linux,
    Android,
    Unknown,
}

/// Operating system as seen by rules and by the machine snapshot.
///
/// `Windows`, `Windows10Or11`, and `Macos` are family wildcards: valid in a
/// rule, never reported by a machine. A machine on an unrecognized member
/// of a family reports the family's `*Unknown` member so the wildcard
/// still covers it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperatingSystem {
    #[default]
    Unknown,
    All,
    Windows,
    Windows7,
    Windows8,
    Windows81,
    Windows10,
    Windows11,
    Windows10Or11,
    WindowsUnknown,
    Macos,
    Macos13,
    Macos14,
    Macos15,
    MacosUnknown,
    Linux,
    Android,
}

impl OperatingSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatingSystem::Unknown => "Unknown",
            OperatingSystem::All => "All",
            OperatingSystem::Windows => "WINNT",
            OperatingSystem::Windows7 => "WINNT 6.1",
            OperatingSystem::Windows8 => "WINNT 6.2",
            OperatingSystem::Windows81 => "WINNT 6.3",
            OperatingSystem::Windows10 => "WINNT 10.0",
            OperatingSystem::Windows11 => "WINNT 11.0",
            OperatingSystem::Windows10Or11 => "WINNT 10.*",
            OperatingSystem::WindowsUnknown => "WINNT Unknown",
            OperatingSystem::Macos => "Darwin",
            OperatingSystem::Macos13 => "Darwin 22",
            OperatingSystem::Macos14 => "Darwin 23",
            OperatingSystem::Macos15 => "Darwin 24",
            OperatingSystem::MacosUnknown => "Darwin Unknown",
            OperatingSystem::Linux => "Linux",
            OperatingSystem::Android => "Android",
        }
    }

    /// Unrecognized names map to `Unknown`, which never matches anything.
    pub fn parse(name: &str) -> OperatingSystem {
        match name {
            "All" => OperatingSystem::All,
            "WINNT" => OperatingSystem::Windows,
            // WINNT 6.0 (Vista) is long gone from support but still appears
            // in old downloaded entries; fold it into the family.
            "WINNT 6.0" => OperatingSystem::WindowsUnknown,
            "WINNT 6.1" => OperatingSystem::Windows7,
            "WINNT 6.2" => OperatingSystem::Windows8,
            "WINNT 6.3" => OperatingSystem::Windows81,
            "WINNT 10.0" => OperatingSystem::Windows10,
            "WINNT 11.0" => OperatingSystem::Windows11,
            "WINNT 10.*" => OperatingSystem::Windows10Or11,
            "Darwin" => OperatingSystem::Macos,
            "Darwin 22" => OperatingSystem::Macos13,
            "Darwin 23" => OperatingSystem::Macos14,
            "Darwin 24" => OperatingSystem::Macos15,
            "Linux" => OperatingSystem::Linux,
            "Android" => OperatingSystem::Android,
            _ => OperatingSystem::Unknown,
        }
    }

    pub fn family(&self) -> OsFamily {
        match self {
            OperatingSystem::Windows
            | OperatingSystem::Windows7
            | OperatingSystem::Windows8
            | OperatingSystem::Windows81
            | OperatingSystem::Windows10
            | OperatingSystem::Windows11
            | OperatingSystem::Windows10Or11
            | OperatingSystem::WindowsUnknown => OsFamily::Windows,
            OperatingSystem::Macos
            | OperatingSystem::Macos13
            | OperatingSystem::Macos14
            | OperatingSystem::Macos15
            | OperatingSystem::MacosUnknown => OsFamily::Macos,
            OperatingSystem::Linux => OsFamily::Linux,
            OperatingSystem::Android => OsFamily::Android,
            OperatingSystem::All | OperatingSystem::Unknown => OsFamily::Unknown,
        }
    }

    /// Whether driver version strings carry comparable semantics on this
    /// platform. Where they do not, driver-version predicates always pass.
    pub fn has_driver_version_semantics(&self) -> bool {
        !matches!(self.family(), OsFamily::Macos)
    }
}

/// Refresh-rate configuration category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshRateStatus {
    /// Matches every configuration.
    #[default]
    Any,
    /// Matches a single screen, or several running at the same rate.
    AnySame,
    Single,
    MultipleSame,
    Mixed,
    Unknown,
}

impl RefreshRateStatus {
    pub fn parse(name: &str) -> RefreshRateStatus {
        match name {
            "Any" => RefreshRateStatus::Any,
            "AnySame" => RefreshRateStatus::AnySame,
            "Single" => RefreshRateStatus::Single,
            "MultipleSame" => RefreshRateStatus::MultipleSame,
            "Mixed" => RefreshRateStatus::Mixed,
            _ => RefreshRateStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatteryStatus {
    #[default]
    All,
    Present,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScreenSizeStatus {
    #[default]
    All,
    Small,
    SmallAndMedium,
    Medium,
    MediumAndLarge,
    Large,
}

/// Small screens top out at 1920x1200, medium at 3440x1440.
pub const MAX_SMALL_PIXELS: i64 = 2_304_000;
pub const MAX_MEDIUM_PIXELS: i64 = 4_953_600;

impl ScreenSizeStatus {
    pub fn matches(&self, screen_pixels: i64) -> bool {
        match self {
            ScreenSizeStatus::All => true,
            ScreenSizeStatus::Small => screen_pixels <= MAX_SMALL_PIXELS,
            ScreenSizeStatus::SmallAndMedium => screen_pixels <= MAX_MEDIUM_PIXELS,
            ScreenSizeStatus::Medium => {
                screen_pixels > MAX_SMALL_PIXELS && screen_pixels <= MAX_MEDIUM_PIXELS
            }
            ScreenSizeStatus::MediumAndLarge => screen_pixels > MAX_SMALL_PIXELS,
            ScreenSizeStatus::Large => screen_pixels > MAX_MEDIUM_PIXELS,
        }
    }
}

/// Which adapter slot a rule inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdapterSlot {
    #[default]
    Primary,
    Secondary,
}

impl AdapterSlot {
    pub fn index(&self) -> usize {
        match self {
            AdapterSlot::Primary => 0,
            AdapterSlot::Secondary => 1,
        }
    }
}

#[derive(Debug, Error)]
pub enum DeviceFamilyError {
    #[error("device family backing data unavailable: {0}")]
    Unavailable(String),
}

/// Set of device ids a rule constrains itself to. The listed form never
/// fails; derived families (ranges resolved from external tables) may.
pub trait DeviceFamily: fmt::Debug + Send + Sync {
    /// Case-insensitive membership check.
    fn contains(&self, device_id: &str) -> Result<bool, DeviceFamilyError>;
    fn is_empty(&self) -> bool;
}

/// Plain owned id list. Ids are normalized to lowercase; empty strings are
/// never stored.
#[derive(Debug, Clone, Default)]
pub struct ListedDevices {
    ids: BTreeSet<String>,
}

impl ListedDevices {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        ListedDevices {
            ids: ids
                .into_iter()
                .map(|s| s.as_ref().trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }
}

impl DeviceFamily for ListedDevices {
    fn contains(&self, device_id: &str) -> Result<bool, DeviceFamilyError> {
        Ok(self.ids.contains(&device_id.to_ascii_lowercase()))
    }

    fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Failure id recorded for downloaded entries that carry no `blockID`.
pub const DOWNLOADED_RULE_NO_ID: &str = "FEATURE_FAILURE_DL_BLOCKLIST_NO_ID";
/// Prefix under which downloaded `blockID` values are namespaced.
pub const DOWNLOADED_RULE_PREFIX: &str = "FEATURE_FAILURE_DL_BLOCKLIST_";

/// One blocklist rule. Immutable once built; replaced wholesale when a new
/// downloaded batch arrives.
#[derive(Debug, Clone)]
pub struct RuleEntry {
    pub rule_id: String,
    pub target: RuleTarget,
    pub status: FeatureStatus,
    pub os: OperatingSystem,
    /// Exact OS version constraint; zero means unconstrained.
    pub os_version: u32,
    pub os_version_ex: u64,
    pub os_version_ex_max: u64,
    pub os_version_ex_cmp: VersionComparison,
    pub refresh_rate_status: RefreshRateStatus,
    pub min_refresh_rate: i32,
    pub min_refresh_rate_max: i32,
    pub min_refresh_rate_cmp: VersionComparison,
    pub max_refresh_rate: i32,
    pub max_refresh_rate_max: i32,
    pub max_refresh_rate_cmp: VersionComparison,
    /// `None` is the "All" wildcard for the three string predicates below.
    pub window_protocol: Option<String>,
    pub vendor: Option<String>,
    pub driver_vendor: Option<String>,
    pub devices: Option<Arc<dyn DeviceFamily>>,
    pub driver_version: u64,
    pub driver_version_max: u64,
    pub driver_version_cmp: VersionComparison,
    pub battery: BatteryStatus,
    pub screen: ScreenSizeStatus,
    pub hardware: Option<String>,
    pub model: Option<String>,
    pub product: Option<String>,
    pub manufacturer: Option<String>,
    pub suggested_version: Option<String>,
    pub adapter_slot: AdapterSlot,
}

impl Default for RuleEntry {
    fn default() -> Self {
        RuleEntry {
            rule_id: String::new(),
            target: RuleTarget::Optional,
            status: FeatureStatus::Ok,
            os: OperatingSystem::All,
            os_version: 0,
            os_version_ex: 0,
            os_version_ex_max: 0,
            os_version_ex_cmp: VersionComparison::Ignored,
            refresh_rate_status: RefreshRateStatus::Any,
            min_refresh_rate: 0,
            min_refresh_rate_max: 0,
            min_refresh_rate_cmp: VersionComparison::Ignored,
            max_refresh_rate: 0,
            max_refresh_rate_max: 0,
            max_refresh_rate_cmp: VersionComparison::Ignored,
            window_protocol: None,
            vendor: None,
            driver_vendor: None,
            devices: None,
            driver_version: ALL_DRIVER_VERSIONS,
            driver_version_max: ALL_DRIVER_VERSIONS,
            driver_version_cmp: VersionComparison::Ignored,
            battery: BatteryStatus::All,
            screen: ScreenSizeStatus::All,
            hardware: None,
            model: None,
            product: None,
            manufacturer: None,
            suggested_version: None,
            adapter_slot: AdapterSlot::Primary,
        }
    }
}

impl RuleEntry {
    pub fn builder() -> RuleBuilder {
        RuleBuilder {
            rule: RuleEntry::default(),
        }
    }

    /// Id reported when this rule wins a scan.
    pub fn failure_id(&self) -> &str {
        if self.rule_id.is_empty() {
            DOWNLOADED_RULE_NO_ID
        } else {
            &self.rule_id
        }
    }
}

/// Fluent construction for compiled-in rules; the parser fills the struct
/// directly.
pub struct RuleBuilder {
    rule: RuleEntry,
}

impl RuleBuilder {
    pub fn rule_id(mut self, id: &str) -> Self {
        self.rule.rule_id = id.to_string();
        self
    }

    pub fn feature(mut self, feature: Feature) -> Self {
        self.rule.target = RuleTarget::One(feature);
        self
    }

    pub fn all_features(mut self) -> Self {
        self.rule.target = RuleTarget::All;
        self
    }

    pub fn status(mut self, status: FeatureStatus) -> Self {
        self.rule.status = status;
        self
    }

    pub fn os(mut self, os: OperatingSystem) -> Self {
        self.rule.os = os;
        self
    }

    pub fn os_version(mut self, version: u32) -> Self {
        self.rule.os_version = version;
        self
    }

    pub fn vendor(mut self, vendor: &str) -> Self {
        self.rule.vendor = Some(vendor.to_string());
        self
    }

    pub fn driver_vendor(mut self, vendor: &str) -> Self {
        self.rule.driver_vendor = Some(vendor.to_string());
        self
    }

    pub fn window_protocol(mut self, protocol: &str) -> Self {
        self.rule.window_protocol = Some(protocol.to_string());
        self
    }

    pub fn devices<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.rule.devices = Some(Arc::new(ListedDevices::new(ids)));
        self
    }

    pub fn device_family(mut self, family: Arc<dyn DeviceFamily>) -> Self {
        self.rule.devices = Some(family);
        self
    }

    pub fn driver_version(mut self, cmp: VersionComparison, lower: u64) -> Self {
        self.rule.driver_version_cmp = cmp;
        self.rule.driver_version = lower;
        self
    }

    pub fn driver_version_range(mut self, cmp: VersionComparison, lower: u64, upper: u64) -> Self {
        self.rule.driver_version_cmp = cmp;
        self.rule.driver_version = lower;
        self.rule.driver_version_max = upper;
        self
    }

    pub fn battery(mut self, battery: BatteryStatus) -> Self {
        self.rule.battery = battery;
        self
    }

    pub fn screen(mut self, screen: ScreenSizeStatus) -> Self {
        self.rule.screen = screen;
        self
    }

    pub fn refresh_rate_status(mut self, status: RefreshRateStatus) -> Self {
        self.rule.refresh_rate_status = status;
        self
    }

    pub fn suggested_version(mut self, version: &str) -> Self {
        self.rule.suggested_version = Some(version.to_string());
        self
    }

    pub fn secondary_adapter(mut self) -> Self {
        self.rule.adapter_slot = AdapterSlot::Secondary;
        self
    }

    pub fn build(self) -> RuleEntry {
        self.rule
    }
}
