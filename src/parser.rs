//! Downloaded blocklist deserialization.
//!
//! A batch is newline-separated records; a record is tab-separated
//! `key:value` pairs, e.g.
//!
//! `os:WINNT 6.0\tvendor:0x8086\tdevices:0x2582,0x2782\tfeature:DIRECT3D_10_LAYERS\t...`
//!
//! Unknown keys are ignored so newer servers can ship fields this build
//! does not understand; a malformed field rejects only its own record.

use crate::rule::{
    DeviceFamily, Feature, FeatureStatus, ListedDevices, OperatingSystem, RefreshRateStatus,
    RuleEntry, RuleTarget, DOWNLOADED_RULE_PREFIX,
};
use crate::version::{parse_driver_version, AppVersion, VersionComparison};
use log::{debug, warn};
use std::sync::Arc;
use thiserror::Error;

const RECORD_DELIMITER: char = '\t';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseRejection {
    #[error("field {0:?} does not split into two non-empty parts")]
    MalformedField(String),
    #[error("unrecognized feature {0:?}")]
    UnknownFeature(String),
    #[error("versionRange {0:?} is not of the form min,max")]
    MalformedVersionRange(String),
    #[error("host version {host} outside rule range {range:?}")]
    OutsideHostVersionRange { host: String, range: String },
}

/// Parses a full downloaded batch. Rejected records are dropped and
/// logged; they never fail the batch.
pub fn parse_blocklist(text: &str, host_version: &str) -> Vec<RuleEntry> {
    let host = AppVersion::new(host_version);
    if host.is_zero() {
        // Range checks against a zero version are meaningless; parse
        // anyway, the versionRange gate simply loses its teeth.
        warn!(
            "event=blocklist_parse_invalid_host_version version={:?}",
            host_version
        );
    }
    let mut rules = Vec::new();
    for record in text.split('\n') {
        if record.trim().is_empty() {
            continue;
        }
        match parse_record(record, &host) {
            Ok(rule) => rules.push(rule),
            Err(ParseRejection::OutsideHostVersionRange { .. }) => {
                // Expected for entries aimed at other releases.
                debug!("event=blocklist_record_skipped reason=version_range");
            }
            Err(err) => {
                warn!("event=blocklist_record_rejected reason={err}");
            }
        }
    }
    rules
}

/// Parses one record. Any pair that does not split into exactly two
/// non-empty parts rejects the record outright.
pub fn parse_record(record: &str, host: &AppVersion) -> Result<RuleEntry, ParseRejection> {
    let mut rule = RuleEntry::default();

    for pair in record.split(RECORD_DELIMITER) {
        let (key, value) = match pair.split_once(':') {
            Some((k, v)) if !k.is_empty() && !v.is_empty() => (k, v),
            _ => return Err(ParseRejection::MalformedField(pair.to_string())),
        };

        match key {
            "blockID" => {
                rule.rule_id = format!("{DOWNLOADED_RULE_PREFIX}{value}");
            }
            "os" => rule.os = OperatingSystem::parse(value),
            "osversion" => rule.os_version = parse_integer(key, value),
            "osVersionEx" => {
                rule.os_version_ex = parse_driver_version(value).unwrap_or(0);
            }
            "osVersionExMax" => {
                rule.os_version_ex_max = parse_driver_version(value).unwrap_or(0);
            }
            "osVersionExComparator" => {
                rule.os_version_ex_cmp = VersionComparison::parse(value);
            }
            "refreshRateStatus" => {
                rule.refresh_rate_status = RefreshRateStatus::parse(value);
            }
            "minRefreshRate" => rule.min_refresh_rate = parse_integer(key, value) as i32,
            "minRefreshRateMax" => rule.min_refresh_rate_max = parse_integer(key, value) as i32,
            "minRefreshRateComparator" => {
                rule.min_refresh_rate_cmp = VersionComparison::parse(value);
            }
            "maxRefreshRate" => rule.max_refresh_rate = parse_integer(key, value) as i32,
            "maxRefreshRateMax" => rule.max_refresh_rate_max = parse_integer(key, value) as i32,
            "maxRefreshRateComparator" => {
                rule.max_refresh_rate_cmp = VersionComparison::parse(value);
            }
            "windowProtocol" => rule.window_protocol = parse_wildcard_string(value),
            "vendor" => rule.vendor = parse_wildcard_string(value),
            "driverVendor" => rule.driver_vendor = parse_wildcard_string(value),
            "feature" => match Feature::parse(value) {
                Some(feature) => rule.target = RuleTarget::One(feature),
                // A feature name we do not recognize may be from a newer
                // build; the record cannot apply to us.
                None => return Err(ParseRejection::UnknownFeature(value.to_string())),
            },
            "featureStatus" => rule.status = FeatureStatus::parse(value),
            "driverVersion" => {
                if let Some(version) = parse_driver_version(value) {
                    rule.driver_version = version;
                }
            }
            "driverVersionMax" => {
                if let Some(version) = parse_driver_version(value) {
                    rule.driver_version_max = version;
                }
            }
            "driverVersionComparator" => {
                rule.driver_version_cmp = VersionComparison::parse(value);
            }
            "model" => rule.model = Some(value.to_string()),
            "product" => rule.product = Some(value.to_string()),
            "manufacturer" => rule.manufacturer = Some(value.to_string()),
            "hardware" => rule.hardware = Some(value.to_string()),
            "suggestedVersion" => rule.suggested_version = Some(value.to_string()),
            "versionRange" => check_version_range(value, host)?,
            "devices" => {
                let devices = ListedDevices::new(value.split(','));
                if !devices.is_empty() {
                    rule.devices = Some(Arc::new(devices));
                }
            }
            _ => {
                // Unknown keys are deliberately ignored.
            }
        }
    }

    Ok(rule)
}

/// `versionRange` gives `min,max` host-application versions. A host
/// outside an open-or-closed bound rejects the record; a bound of zero is
/// open.
fn check_version_range(value: &str, host: &AppVersion) -> Result<(), ParseRejection> {
    let (min, max) = value
        .split_once(',')
        .filter(|(min, max)| !min.contains(',') && !max.contains(','))
        .ok_or_else(|| ParseRejection::MalformedVersionRange(value.to_string()))?;

    let min = AppVersion::new(min);
    let max = AppVersion::new(max);
    if (!min.is_zero() && *host < min) || (!max.is_zero() && *host > max) {
        return Err(ParseRejection::OutsideHostVersionRange {
            host: host.as_str().to_string(),
            range: value.to_string(),
        });
    }
    Ok(())
}

fn parse_wildcard_string(value: &str) -> Option<String> {
    if value.eq_ignore_ascii_case("all") {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_integer(key: &str, value: &str) -> u32 {
    match value.parse() {
        Ok(parsed) => parsed,
        Err(_) => {
            debug!("event=blocklist_bad_integer key={key} value={value:?}");
            0
        }
    }
}
