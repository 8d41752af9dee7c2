//! Raw-row normalization: address parsing, fingerprint computation, and
//! assembly of the canonical permit record.
//!
//! The address parser is intentionally simple — comma-split components with
//! a leading house number and a trailing `STATE ZIP` scan. It is *not* a
//! general address parser; unparsed pieces stay absent.

use std::sync::LazyLock;

use permit_map_permit_models::{NormalizedPermit, ParsedAddress, Provenance, SourcePlatform};
use regex::Regex;
use sha2::{Digest as _, Sha256};

use crate::classify;

/// Two-letter uppercase state abbreviation, as its own word.
static STATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z]{2})\b").expect("valid regex"));

/// 5-digit ZIP with an optional `-dddd` extension.
static ZIP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{5}(?:-\d{4})?)\b").expect("valid regex"));

/// Splits a raw address on commas and extracts house number, street, city,
/// state, and ZIP.
#[must_use]
pub fn parse_address(raw: &str) -> ParsedAddress {
    let parts: Vec<&str> = raw
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    let mut parsed = ParsedAddress::default();
    let Some(first) = parts.first() else {
        return parsed;
    };

    // House number is the leading integer of the first component.
    let digits: String = first.chars().take_while(char::is_ascii_digit).collect();
    let rest = first[digits.len()..].trim();
    if digits.is_empty() || rest.is_empty() {
        if !first.is_empty() {
            parsed.street = Some((*first).to_string());
        }
    } else {
        parsed.house_number = Some(digits);
        parsed.street = Some(rest.to_string());
    }

    if let Some(city) = parts.get(1) {
        parsed.city = Some((*city).to_string());
    }

    // The last component carries the state abbreviation and ZIP when present.
    if let Some(last) = parts.last()
        && parts.len() > 1
    {
        if let Some(m) = STATE_RE.captures(last) {
            parsed.state = Some(m[1].to_string());
        }
        if let Some(m) = ZIP_RE.captures(last) {
            parsed.zip = Some(m[1].to_string());
        }
    }

    parsed
}

/// Computes the deduplication fingerprint: SHA-256 over the `"|"`-joined
/// sequence of normalized components, absent components contributing the
/// empty string, serialized as lowercase hex.
#[must_use]
pub fn fingerprint(
    address: &ParsedAddress,
    parcel_id: Option<&str>,
    issue_date: Option<&str>,
    permit_type: Option<&str>,
) -> String {
    let street = address
        .street
        .as_deref()
        .map(|s| s.trim().to_lowercase())
        .unwrap_or_default();
    let city = address
        .city
        .as_deref()
        .map(|s| s.trim().to_lowercase())
        .unwrap_or_default();
    let state = address
        .state
        .as_deref()
        .map(|s| s.trim().to_uppercase())
        .unwrap_or_default();
    let parcel = parcel_id.map(str::trim).unwrap_or_default();
    let date = issue_date.map(str::trim).unwrap_or_default();
    let permit_type = permit_type
        .map(|s| s.trim().to_uppercase())
        .unwrap_or_default();

    let joined = [
        street.as_str(),
        city.as_str(),
        state.as_str(),
        parcel,
        date,
        permit_type.as_str(),
    ]
    .join("|");

    hex::encode(Sha256::digest(joined.as_bytes()))
}

/// Everything a connector has extracted from one raw row.
#[derive(Debug, Clone, Default)]
pub struct RawFields {
    /// The portal's own record identifier.
    pub source_record_id: String,
    /// Permit type string.
    pub permit_type: Option<String>,
    /// Work description.
    pub work_description: Option<String>,
    /// Permit status.
    pub permit_status: Option<String>,
    /// Issue date, already normalized to `YYYY-MM-DD`.
    pub issue_date: Option<String>,
    /// Raw address string.
    pub raw_address: Option<String>,
    /// Parcel number.
    pub parcel_id: Option<String>,
    /// Owner name.
    pub owner_name: Option<String>,
    /// Contractor name.
    pub contractor_name: Option<String>,
    /// Declared valuation.
    pub permit_value: Option<f64>,
    /// Latitude (WGS84).
    pub lat: Option<f64>,
    /// Longitude (WGS84).
    pub lon: Option<f64>,
    /// Portal-native geometry JSON.
    pub geom_json: Option<serde_json::Value>,
}

/// Assembles the canonical record from extracted fields: parses the address,
/// applies the source's optional default state, computes the fingerprint,
/// and invokes the roofing classifier.
#[must_use]
pub fn build_permit(
    source_id: i32,
    source_name: &str,
    platform: SourcePlatform,
    fields: RawFields,
    default_state: Option<&str>,
    provenance: Provenance,
) -> NormalizedPermit {
    let mut address_parsed = fields
        .raw_address
        .as_deref()
        .map(parse_address)
        .unwrap_or_default();

    if address_parsed.state.is_none()
        && let Some(default) = default_state
        && !default.is_empty()
    {
        address_parsed.state = Some(default.to_uppercase());
    }

    let fingerprint = fingerprint(
        &address_parsed,
        fields.parcel_id.as_deref(),
        fields.issue_date.as_deref(),
        fields.permit_type.as_deref(),
    );

    let is_roofing = classify::default_rules().is_roofing(
        fields.permit_type.as_deref(),
        fields.work_description.as_deref(),
    );

    NormalizedPermit {
        source_id,
        source_name: source_name.to_string(),
        platform,
        source_record_id: fields.source_record_id,
        permit_type: fields.permit_type,
        work_description: fields.work_description,
        permit_status: fields.permit_status,
        issue_date: fields.issue_date,
        raw_address: fields.raw_address,
        address_parsed,
        parcel_id: fields.parcel_id,
        owner_name: fields.owner_name,
        contractor_name: fields.contractor_name,
        permit_value: fields.permit_value,
        lat: fields.lat,
        lon: fields.lon,
        geom_json: fields.geom_json,
        fingerprint,
        is_roofing,
        provenance,
        raw_ref: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    #[test]
    fn parses_full_address() {
        let parsed = parse_address("700 H Street, Sacramento, CA 95814");
        assert_eq!(parsed.house_number.as_deref(), Some("700"));
        assert_eq!(parsed.street.as_deref(), Some("H Street"));
        assert_eq!(parsed.city.as_deref(), Some("Sacramento"));
        assert_eq!(parsed.state.as_deref(), Some("CA"));
        assert_eq!(parsed.zip.as_deref(), Some("95814"));
    }

    #[test]
    fn parses_bare_street() {
        let parsed = parse_address("H Street");
        assert_eq!(parsed.street.as_deref(), Some("H Street"));
        assert_eq!(parsed.house_number, None);
        assert_eq!(parsed.city, None);
        assert_eq!(parsed.state, None);
        assert_eq!(parsed.zip, None);
    }

    #[test]
    fn parses_zip_plus_four() {
        let parsed = parse_address("1 Main St, Springfield, IL 62704-1234");
        assert_eq!(parsed.state.as_deref(), Some("IL"));
        assert_eq!(parsed.zip.as_deref(), Some("62704-1234"));
    }

    #[test]
    fn empty_address_parses_to_nothing() {
        assert_eq!(parse_address(""), ParsedAddress::default());
        assert_eq!(parse_address(" , , "), ParsedAddress::default());
    }

    #[test]
    fn fingerprint_is_pure_over_case_and_whitespace() {
        let a = ParsedAddress {
            street: Some("H Street".to_string()),
            city: Some("Sacramento".to_string()),
            state: Some("CA".to_string()),
            ..ParsedAddress::default()
        };
        let b = ParsedAddress {
            street: Some("  h STREET ".to_string()),
            city: Some("SACRAMENTO".to_string()),
            state: Some("ca".to_string()),
            ..ParsedAddress::default()
        };
        assert_eq!(
            fingerprint(&a, None, Some("2024-10-15"), Some("Re-Roof")),
            fingerprint(&b, None, Some(" 2024-10-15 "), Some("re-roof")),
        );
    }

    #[test]
    fn fingerprint_differs_when_a_component_differs() {
        let a = ParsedAddress {
            street: Some("H Street".to_string()),
            ..ParsedAddress::default()
        };
        let base = fingerprint(&a, None, Some("2024-10-15"), Some("Re-Roof"));
        assert_ne!(
            base,
            fingerprint(&a, None, Some("2024-10-16"), Some("Re-Roof"))
        );
        assert_ne!(base, fingerprint(&a, Some("123-456"), Some("2024-10-15"), Some("Re-Roof")));
    }

    #[test]
    fn fingerprint_of_all_absent_is_stable_empty_join() {
        let empty = ParsedAddress::default();
        let fp = fingerprint(&empty, None, None, None);
        // SHA-256 of "|||||"
        assert_eq!(fp.len(), 64);
        assert_eq!(fp, fingerprint(&ParsedAddress::default(), None, None, None));
    }

    fn provenance() -> Provenance {
        Provenance {
            platform: "JSON_DATASET".to_string(),
            url: "https://data.example.gov/resource/abcd-1234.json".to_string(),
            fetched_at: Utc::now(),
            fields_map: BTreeMap::new(),
            checksum: None,
            max_record_id: None,
        }
    }

    #[test]
    fn build_permit_applies_default_state_when_unparsed() {
        let permit = build_permit(
            1,
            "Test Source",
            SourcePlatform::JsonDataset,
            RawFields {
                source_record_id: "r1".to_string(),
                raw_address: Some("700 H Street".to_string()),
                ..RawFields::default()
            },
            Some("ca"),
            provenance(),
        );
        assert_eq!(permit.address_parsed.state.as_deref(), Some("CA"));
    }

    #[test]
    fn build_permit_keeps_parsed_state_over_default() {
        let permit = build_permit(
            1,
            "Test Source",
            SourcePlatform::JsonDataset,
            RawFields {
                source_record_id: "r1".to_string(),
                raw_address: Some("700 H Street, Sacramento, WA 98101".to_string()),
                ..RawFields::default()
            },
            Some("CA"),
            provenance(),
        );
        assert_eq!(permit.address_parsed.state.as_deref(), Some("WA"));
    }

    #[test]
    fn build_permit_classifies_roofing() {
        let permit = build_permit(
            1,
            "Test Source",
            SourcePlatform::JsonDataset,
            RawFields {
                source_record_id: "r1".to_string(),
                permit_type: Some("Re-Roof".to_string()),
                issue_date: Some("2024-10-15".to_string()),
                raw_address: Some("700 H Street, Sacramento, CA 95814".to_string()),
                ..RawFields::default()
            },
            None,
            provenance(),
        );
        assert!(permit.is_roofing);
        assert_eq!(permit.fingerprint.len(), 64);
        assert_ne!(
            permit.fingerprint,
            fingerprint(&ParsedAddress::default(), None, None, None)
        );
    }
}
