//! Version comparison algebra shared by driver versions, extended OS
//! versions, and refresh-rate ranges.

use log::warn;
use std::cmp::Ordering;

/// Driver versions are packed into a single ordered value: four 16-bit
/// fields, most significant part first. A rule that does not constrain the
/// version carries [`ALL_DRIVER_VERSIONS`].
pub const ALL_DRIVER_VERSIONS: u64 = u64::MAX;

/// Comparison operator attached to a versioned predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionComparison {
    /// No constraint; always matches.
    #[default]
    Ignored,
    LessThan,
    /// Compares only the low 16 bits (the build id field) of each side.
    BuildIdLessThan,
    LessThanOrEqual,
    BuildIdLessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Equal,
    NotEqual,
    /// lower < system < upper
    BetweenExclusive,
    /// lower <= system <= upper
    BetweenInclusive,
    /// lower <= system < upper
    BetweenInclusiveStart,
}

impl VersionComparison {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionComparison::Ignored => "COMPARISON_IGNORED",
            VersionComparison::LessThan => "LESS_THAN",
            VersionComparison::BuildIdLessThan => "BUILD_ID_LESS_THAN",
            VersionComparison::LessThanOrEqual => "LESS_THAN_OR_EQUAL",
            VersionComparison::BuildIdLessThanOrEqual => "BUILD_ID_LESS_THAN_OR_EQUAL",
            VersionComparison::GreaterThan => "GREATER_THAN",
            VersionComparison::GreaterThanOrEqual => "GREATER_THAN_OR_EQUAL",
            VersionComparison::Equal => "EQUAL",
            VersionComparison::NotEqual => "NOT_EQUAL",
            VersionComparison::BetweenExclusive => "BETWEEN_EXCLUSIVE",
            VersionComparison::BetweenInclusive => "BETWEEN_INCLUSIVE",
            VersionComparison::BetweenInclusiveStart => "BETWEEN_INCLUSIVE_START",
        }
    }

    /// Maps a blocklist comparator token. Unrecognized tokens fall back to
    /// `Ignored`, logged; a bad comparator must never take a record down.
    pub fn parse(token: &str) -> Self {
        match token {
            "LESS_THAN" => VersionComparison::LessThan,
            "BUILD_ID_LESS_THAN" => VersionComparison::BuildIdLessThan,
            "LESS_THAN_OR_EQUAL" => VersionComparison::LessThanOrEqual,
            "BUILD_ID_LESS_THAN_OR_EQUAL" => VersionComparison::BuildIdLessThanOrEqual,
            "GREATER_THAN" => VersionComparison::GreaterThan,
            "GREATER_THAN_OR_EQUAL" => VersionComparison::GreaterThanOrEqual,
            "EQUAL" => VersionComparison::Equal,
            "NOT_EQUAL" => VersionComparison::NotEqual,
            "BETWEEN_EXCLUSIVE" => VersionComparison::BetweenExclusive,
            "BETWEEN_INCLUSIVE" => VersionComparison::BetweenInclusive,
            "BETWEEN_INCLUSIVE_START" => VersionComparison::BetweenInclusiveStart,
            "COMPARISON_IGNORED" => VersionComparison::Ignored,
            other => {
                warn!("event=unknown_comparator token={other} fallback=COMPARISON_IGNORED");
                VersionComparison::Ignored
            }
        }
    }
}

/// Evaluates `system` against `[lower, upper]` under `op`. Works for packed
/// driver versions and for plain integers (refresh rates) alike.
pub fn compare(system: u64, op: VersionComparison, lower: u64, upper: u64) -> bool {
    match op {
        VersionComparison::Ignored => true,
        VersionComparison::LessThan => system < lower,
        VersionComparison::BuildIdLessThan => (system & 0xFFFF) < (lower & 0xFFFF),
        VersionComparison::LessThanOrEqual => system <= lower,
        VersionComparison::BuildIdLessThanOrEqual => (system & 0xFFFF) <= (lower & 0xFFFF),
        VersionComparison::GreaterThan => system > lower,
        VersionComparison::GreaterThanOrEqual => system >= lower,
        VersionComparison::Equal => system == lower,
        VersionComparison::NotEqual => system != lower,
        VersionComparison::BetweenExclusive => lower < system && system < upper,
        VersionComparison::BetweenInclusive => lower <= system && system <= upper,
        VersionComparison::BetweenInclusiveStart => lower <= system && system < upper,
    }
}

/// Signed wrapper for refresh-rate ranges, which arrive as `i32`.
pub fn compare_i32(system: i32, op: VersionComparison, lower: i32, upper: i32) -> bool {
    // Offset into unsigned space so the shared comparator applies.
    let shift = |v: i32| (v as i64 - i32::MIN as i64) as u64;
    compare(shift(system), op, shift(lower), shift(upper))
}

/// Packs a four-part driver version into its ordered 64-bit form.
pub fn pack_driver_version(a: u16, b: u16, c: u16, d: u16) -> u64 {
    ((a as u64) << 48) | ((b as u64) << 32) | ((c as u64) << 16) | (d as u64)
}

/// Parses a dotted driver version string. Up to four numeric parts are
/// accepted; missing trailing parts read as zero. Parts that are not
/// numeric or exceed 16 bits reject the whole string.
pub fn parse_driver_version(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let mut fields = [0u16; 4];
    let mut count = 0;
    for part in raw.split('.') {
        if count == 4 {
            return None;
        }
        fields[count] = part.parse::<u16>().ok()?;
        count += 1;
    }
    Some(pack_driver_version(fields[0], fields[1], fields[2], fields[3]))
}

/// Renders a packed driver version back into its dotted form. Used when a
/// blocked-driver-version rule carries no explicit suggestion.
pub fn format_driver_version(packed: u64) -> String {
    format!(
        "{}.{}.{}.{}",
        (packed >> 48) & 0xFFFF,
        (packed >> 32) & 0xFFFF,
        (packed >> 16) & 0xFFFF,
        packed & 0xFFFF
    )
}

/// Host-application version with dotted, letter-aware ordering.
///
/// Each dot part reads as number / letters / number / letters; a part with
/// a letter suffix sorts before the bare number ("42.0a1" < "42.0"), which
/// is what pre-release tags rely on.
#[derive(Debug, Clone)]
pub struct AppVersion {
    raw: String,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct VersionPart {
    num_a: i64,
    str_b: String,
    num_c: i64,
    str_d: String,
}

impl VersionPart {
    fn parse(part: &str) -> Self {
        if part == "*" {
            return VersionPart {
                num_a: i64::MAX,
                ..VersionPart::default()
            };
        }
        let mut out = VersionPart::default();
        let rest = part;
        let (a, rest) = split_leading_digits(rest);
        out.num_a = a;
        let (b, rest) = split_leading_letters(rest);
        out.str_b = b;
        let (c, rest) = split_leading_digits(rest);
        out.num_c = c;
        out.str_d = rest.to_string();
        out
    }
}

fn split_leading_digits(s: &str) -> (i64, &str) {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let value = s[..end].parse::<i64>().unwrap_or(0);
    (value, &s[end..])
}

fn split_leading_letters(s: &str) -> (String, &str) {
    let end = s.find(|c: char| c.is_ascii_digit()).unwrap_or(s.len());
    (s[..end].to_string(), &s[end..])
}

fn cmp_suffix(a: &str, b: &str) -> Ordering {
    // The empty suffix means "no pre-release tag" and outranks any tag.
    match (a.is_empty(), b.is_empty()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.cmp(b),
    }
}

impl AppVersion {
    pub fn new(raw: impl Into<String>) -> Self {
        AppVersion { raw: raw.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// True when the version failed to resolve to anything meaningful.
    /// Range checks against a zero version are noise, not signal.
    pub fn is_zero(&self) -> bool {
        *self <= AppVersion::new("0")
    }
}

impl PartialEq for AppVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for AppVersion {}

impl PartialOrd for AppVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AppVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let mut left = self.raw.split('.');
        let mut right = other.raw.split('.');
        loop {
            let (l, r) = (left.next(), right.next());
            if l.is_none() && r.is_none() {
                return Ordering::Equal;
            }
            let lp = VersionPart::parse(l.unwrap_or("0"));
            let rp = VersionPart::parse(r.unwrap_or("0"));
            let ord = lp
                .num_a
                .cmp(&rp.num_a)
                .then_with(|| cmp_suffix(&lp.str_b, &rp.str_b))
                .then_with(|| lp.num_c.cmp(&rp.num_c))
                .then_with(|| cmp_suffix(&lp.str_d, &rp.str_d));
            if ord != Ordering::Equal {
                return ord;
            }
        }
    }
}
