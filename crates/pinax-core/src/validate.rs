//! Pure schema validation for PINAX records.
//!
//! Operates on raw JSON so partial and malformed records can be checked
//! before they are ever shaped into a [`crate::models::PinaxRecord`].

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::defaults::DCMI_TYPES;

static ULID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^[0-9A-HJKMNP-TV-Z]{26}$").expect("ulid regex"));
static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$")
        .expect("uuid regex")
});
static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}$").expect("year regex"));
static DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})-(\d{2})-(\d{2})$").expect("date regex"));
static LANGUAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z]{2,3}(-[A-Z]{2})?$").expect("language regex"));

/// Fields a record must carry to be valid.
const REQUIRED_FIELDS: [&str; 7] = [
    "id",
    "title",
    "type",
    "creator",
    "institution",
    "created",
    "access_url",
];

/// Result of validating one (possibly partial) PINAX record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub missing_required: Vec<String>,
    pub warnings: Vec<String>,
    /// Per-field messages, prefixed `✓ ` when valid and `⚠ ` when not.
    pub field_validations: BTreeMap<String, String>,
}

/// Validate a record given as raw JSON.
pub fn validate_record(record: &Value) -> ValidationReport {
    let mut report = ValidationReport::default();

    for field in REQUIRED_FIELDS {
        if is_missing(record.get(field), field) {
            report.missing_required.push(field.to_string());
            report
                .field_validations
                .insert(field.to_string(), "⚠ missing required field".to_string());
        }
    }

    if let Some(id) = present_str(record, "id") {
        let message = if ULID_RE.is_match(id) {
            "✓ valid ULID".to_string()
        } else if UUID_RE.is_match(id) {
            "✓ valid UUID".to_string()
        } else {
            "⚠ id must be a ULID or UUID".to_string()
        };
        report.field_validations.insert("id".to_string(), message);
    }

    if let Some(record_type) = present_str(record, "type") {
        let message = if DCMI_TYPES.contains(&record_type) {
            "✓ valid DCMI type".to_string()
        } else {
            format!("⚠ not a DCMI type: {record_type}")
        };
        report.field_validations.insert("type".to_string(), message);
    }

    if let Some(created) = present_str(record, "created") {
        let message = if is_valid_created(created) {
            "✓ valid date".to_string()
        } else {
            "⚠ created must be YYYY or a real YYYY-MM-DD date".to_string()
        };
        report
            .field_validations
            .insert("created".to_string(), message);
    }

    if let Some(language) = present_str(record, "language") {
        let message = if LANGUAGE_RE.is_match(language) {
            "✓ valid language tag".to_string()
        } else {
            "⚠ language must be a BCP-47 tag like en or pt-BR".to_string()
        };
        report
            .field_validations
            .insert("language".to_string(), message);
    }

    if let Some(url) = present_str(record, "access_url") {
        let message = if is_http_url(url) {
            "✓ valid URL".to_string()
        } else {
            "⚠ access_url must be an http or https URL".to_string()
        };
        report
            .field_validations
            .insert("access_url".to_string(), message);
    }

    if present_str(record, "description").is_none() {
        report.warnings.push("description is missing".to_string());
    }
    match record.get("subjects") {
        Some(Value::Array(subjects)) if !subjects.is_empty() => {}
        _ => report
            .warnings
            .push("subjects are missing or empty".to_string()),
    }
    if present_str(record, "language").is_none() {
        report.warnings.push("language is missing".to_string());
    }
    if present_str(record, "source").is_none() {
        report.warnings.push("source is missing".to_string());
    }

    report.valid = report.missing_required.is_empty()
        && !report
            .field_validations
            .values()
            .any(|m| m.starts_with('⚠'));
    report
}

/// Missing means absent, null, an empty string, or (for `creator`) an empty
/// list.
fn is_missing(value: Option<&Value>, field: &str) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(items)) => field == "creator" && items.is_empty(),
        Some(_) => false,
    }
}

fn present_str<'a>(record: &'a Value, field: &str) -> Option<&'a str> {
    record.get(field).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn is_valid_created(value: &str) -> bool {
    if YEAR_RE.is_match(value) {
        let year: i32 = value.parse().unwrap_or(0);
        return (1000..=9999).contains(&year);
    }
    if let Some(caps) = DATE_RE.captures(value) {
        let year: i32 = caps[1].parse().unwrap_or(0);
        let month: u32 = caps[2].parse().unwrap_or(0);
        let day: u32 = caps[3].parse().unwrap_or(0);
        return (1..=12).contains(&month)
            && (1..=31).contains(&day)
            && chrono::NaiveDate::from_ymd_opt(year, month, day).is_some();
    }
    false
}

/// Minimal URL shape check: an http(s) scheme followed by a host.
fn is_http_url(value: &str) -> bool {
    let rest = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"));
    match rest {
        Some(rest) => {
            let host = rest.split(['/', '?', '#']).next().unwrap_or("");
            !host.is_empty() && !rest.contains(char::is_whitespace)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn complete_record() -> Value {
        json!({
            "id": "01HABCDEF0123456789JKMNPQR",
            "title": "X",
            "type": "StillImage",
            "creator": "A",
            "institution": "I",
            "created": "1927",
            "access_url": "https://x/y"
        })
    }

    #[test]
    fn minimal_complete_record_is_valid_with_warnings() {
        let report = validate_record(&complete_record());
        assert!(report.valid, "{report:?}");
        assert!(report.missing_required.is_empty());
        assert_eq!(report.warnings.len(), 4);
        assert!(report.warnings.iter().any(|w| w.contains("description")));
        assert!(report.warnings.iter().any(|w| w.contains("subjects")));
        assert!(report.warnings.iter().any(|w| w.contains("language")));
        assert!(report.warnings.iter().any(|w| w.contains("source")));
    }

    #[test]
    fn fully_annotated_record_has_no_warnings() {
        let mut record = complete_record();
        record["description"] = json!("A description");
        record["subjects"] = json!(["harbors"]);
        record["language"] = json!("en");
        record["source"] = json!("PINAX");
        let report = validate_record(&record);
        assert!(report.valid);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn missing_and_empty_required_fields_are_reported() {
        let report = validate_record(&json!({
            "title": "",
            "creator": [],
            "institution": null
        }));
        assert!(!report.valid);
        for field in REQUIRED_FIELDS {
            assert!(
                report.missing_required.contains(&field.to_string()),
                "{field} should be missing"
            );
        }
        assert_eq!(
            report.field_validations["title"],
            "⚠ missing required field"
        );
    }

    #[test]
    fn creator_list_with_entries_is_present() {
        let mut record = complete_record();
        record["creator"] = json!(["A", "B"]);
        let report = validate_record(&record);
        assert!(!report.missing_required.contains(&"creator".to_string()));
    }

    #[test]
    fn id_accepts_ulid_and_uuid() {
        let mut record = complete_record();
        let report = validate_record(&record);
        assert_eq!(report.field_validations["id"], "✓ valid ULID");

        record["id"] = json!("01habcdef0123456789jkmnpqr");
        assert!(validate_record(&record).valid, "ULID match is case-insensitive");

        record["id"] = json!("6a2f0c1e-9b1d-4c3e-8a5f-0123456789ab");
        let report = validate_record(&record);
        assert_eq!(report.field_validations["id"], "✓ valid UUID");

        record["id"] = json!("not-an-id");
        let report = validate_record(&record);
        assert!(!report.valid);
        assert!(report.field_validations["id"].starts_with('⚠'));

        // I, L, O, U are excluded from the ULID alphabet.
        record["id"] = json!("01HABCDEF0123456789JKMNPQI");
        assert!(!validate_record(&record).valid);
    }

    #[test]
    fn type_is_case_sensitive() {
        let mut record = complete_record();
        record["type"] = json!("stillimage");
        let report = validate_record(&record);
        assert!(!report.valid);
        assert!(report.field_validations["type"].contains("stillimage"));
    }

    #[test]
    fn created_accepts_year_and_real_dates() {
        let mut record = complete_record();
        for good in ["1000", "9999", "2021-06-30", "2020-02-29"] {
            record["created"] = json!(good);
            assert!(validate_record(&record).valid, "{good} should pass");
        }
        for bad in ["999", "21-06-30", "2021-13-01", "2021-00-10", "2021-02-30", "circa 1927"] {
            record["created"] = json!(bad);
            assert!(!validate_record(&record).valid, "{bad} should fail");
        }
    }

    #[test]
    fn language_tag_shapes() {
        let mut record = complete_record();
        for good in ["en", "pol", "pt-BR"] {
            record["language"] = json!(good);
            assert!(validate_record(&record).valid, "{good} should pass");
        }
        for bad in ["EN", "e", "english", "pt-br"] {
            record["language"] = json!(bad);
            assert!(!validate_record(&record).valid, "{bad} should fail");
        }
    }

    #[test]
    fn access_url_requires_http_scheme_and_host() {
        let mut record = complete_record();
        for good in ["http://arke.institute/x", "https://x/y", "https://host"] {
            record["access_url"] = json!(good);
            assert!(validate_record(&record).valid, "{good} should pass");
        }
        for bad in ["ftp://x/y", "arke.institute/x", "https://", "https:// spaced.example"] {
            record["access_url"] = json!(bad);
            assert!(!validate_record(&record).valid, "{bad} should fail");
        }
    }

    #[test]
    fn field_messages_use_check_and_warning_prefixes() {
        let report = validate_record(&complete_record());
        for message in report.field_validations.values() {
            assert!(message.starts_with("✓ ") || message.starts_with("⚠ "));
        }
    }
}
