//! Data model for the PINAX engine: the emitted metadata record, entity
//! snapshots from the object store, and the durable chunk/PI state the
//! batch engine runs on.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// PINAX RECORD
// =============================================================================

/// A field that accepts either a single string or a list of strings
/// (`creator`, `place`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StringOrList {
    One(String),
    Many(Vec<String>),
}

impl StringOrList {
    /// True when the value carries no usable content: an empty string or an
    /// empty list.
    pub fn is_empty(&self) -> bool {
        match self {
            StringOrList::One(s) => s.is_empty(),
            StringOrList::Many(v) => v.is_empty(),
        }
    }
}

impl From<&str> for StringOrList {
    fn from(s: &str) -> Self {
        StringOrList::One(s.to_string())
    }
}

/// The Dublin-Core-derived metadata record this system emits.
///
/// All fields are optional at the type level because partial records flow
/// through post-processing; the validator decides which are required.
/// Unknown incoming fields are ignored, absent fields are omitted on output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PinaxRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// DCMI Type value; serialized as `"type"`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub record_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<StringOrList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institution: Option<String>,
    /// `YYYY` or `YYYY-MM-DD`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_url: Option<String>,
    /// BCP-47 tag, e.g. `en` or `pt-BR`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subjects: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rights: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place: Option<StringOrList>,
}

// =============================================================================
// ENTITY SNAPSHOT
// =============================================================================

/// Snapshot of an archive entity returned by the object store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub pi: String,
    /// Current head hash of the version chain; input to CAS appends.
    #[serde(default)]
    pub tip: Option<String>,
    /// Legacy field name for the head hash; `tip()` falls back to it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_cid: Option<String>,
    #[serde(default)]
    pub version: Option<i64>,
    /// Human label → content address of each component.
    #[serde(default)]
    pub components: BTreeMap<String, String>,
    #[serde(default)]
    pub children_pi: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_pi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl EntitySnapshot {
    /// The CAS tip, read from `tip` or the legacy `manifest_cid` field.
    pub fn tip(&self) -> Option<&str> {
        self.tip.as_deref().or(self.manifest_cid.as_deref())
    }

    /// Directory name shown to the model: the label if set, else the last
    /// characters of the PI.
    pub fn directory_name(&self) -> String {
        match &self.label {
            Some(label) if !label.is_empty() => label.clone(),
            _ => {
                let n = crate::defaults::PI_SUFFIX_LEN;
                let chars: Vec<char> = self.pi.chars().collect();
                let start = chars.len().saturating_sub(n);
                chars[start..].iter().collect()
            }
        }
    }
}

// =============================================================================
// CONTEXT BUNDLE
// =============================================================================

/// One named text input assembled for the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextFile {
    pub name: String,
    pub content: String,
}

/// Everything the extractor sees for one PI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextBundle {
    pub directory_name: String,
    pub files: Vec<ContextFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_pinax: Option<PinaxRecord>,
}

// =============================================================================
// CHUNK STATE
// =============================================================================

/// Phase of the chunk state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkPhase {
    Processing,
    Publishing,
    Callback,
    Done,
    Error,
}

impl ChunkPhase {
    /// String form stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkPhase::Processing => "processing",
            ChunkPhase::Publishing => "publishing",
            ChunkPhase::Callback => "callback",
            ChunkPhase::Done => "done",
            ChunkPhase::Error => "error",
        }
    }

    /// Parse the database string form. Unknown values map to `Error` so a
    /// corrupted row can only short-circuit to callback, never loop.
    pub fn parse(s: &str) -> Self {
        match s {
            "processing" => ChunkPhase::Processing,
            "publishing" => ChunkPhase::Publishing,
            "callback" => ChunkPhase::Callback,
            "done" => ChunkPhase::Done,
            _ => ChunkPhase::Error,
        }
    }

    /// Terminal phases run cleanup on the next tick and do not re-arm.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChunkPhase::Done | ChunkPhase::Error)
    }
}

/// Lifecycle state of one PI within a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiStatus {
    Pending,
    Processing,
    Done,
    Error,
}

impl PiStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PiStatus::Pending => "pending",
            PiStatus::Processing => "processing",
            PiStatus::Done => "done",
            PiStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "pending" => PiStatus::Pending,
            "processing" => PiStatus::Processing,
            "done" => PiStatus::Done,
            _ => PiStatus::Error,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PiStatus::Done | PiStatus::Error)
    }
}

/// Durable state of one chunk (one row per chunk).
#[derive(Debug, Clone)]
pub struct ChunkState {
    pub chunk_id: String,
    pub batch_id: String,
    pub prefix: String,
    pub custom_prompt: Option<String>,
    pub institution: Option<String>,
    pub phase: ChunkPhase,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub callback_retry_count: i64,
    pub global_error: Option<String>,
}

/// Durable state of one PI within a chunk.
#[derive(Debug, Clone)]
pub struct PiState {
    pub pi: String,
    pub status: PiStatus,
    pub retry_count: i64,
    pub pinax_record: Option<PinaxRecord>,
    pub pinax_cid: Option<String>,
    pub new_tip: Option<String>,
    pub new_version: Option<i64>,
    pub error: Option<String>,
}

// =============================================================================
// DISPATCH & STATUS
// =============================================================================

/// Inbound chunk-processing request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRequest {
    pub batch_id: String,
    pub chunk_id: String,
    pub pis: Vec<String>,
    #[serde(default)]
    pub prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institution: Option<String>,
}

/// Outcome of chunk admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Fresh rows were inserted; a worker should be spawned.
    Accepted,
    /// A live chunk with this id exists; report its phase instead.
    AlreadyProcessing(ChunkPhase),
}

/// Per-status PI counts for the status endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub done: i64,
    pub failed: i64,
}

// =============================================================================
// CALLBACK PAYLOAD
// =============================================================================

/// Chunk-level rollup status reported to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkOutcome {
    /// Every PI succeeded.
    Success,
    /// Some succeeded, some failed.
    Partial,
    /// No PI succeeded.
    Error,
}

impl ChunkOutcome {
    /// Roll up per-PI counts into the chunk outcome.
    pub fn from_counts(succeeded: i64, failed: i64) -> Self {
        if failed == 0 {
            ChunkOutcome::Success
        } else if succeeded == 0 {
            ChunkOutcome::Error
        } else {
            ChunkOutcome::Partial
        }
    }
}

/// Per-PI entry in the callback payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiResult {
    pub pi: String,
    pub status: PiOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_tip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_version: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-PI outcome in the callback payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PiOutcome {
    Success,
    Error,
}

/// Aggregate counts in the callback payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackSummary {
    pub total: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub processing_time_ms: i64,
}

/// The single payload delivered to the orchestrator per chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub batch_id: String,
    pub chunk_id: String,
    pub status: ChunkOutcome,
    pub results: Vec<PiResult>,
    pub summary: CallbackSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CallbackPayload {
    /// Assemble the payload from the post-publish snapshot of PI rows.
    ///
    /// A PI counts as succeeded only once it carries a `new_tip`; anything
    /// else is reported as an error (invariant: succeeded + failed = total).
    pub fn assemble(chunk: &ChunkState, pis: &[PiState], now: DateTime<Utc>) -> Self {
        let results: Vec<PiResult> = pis
            .iter()
            .map(|p| {
                if p.status == PiStatus::Done && p.new_tip.is_some() {
                    PiResult {
                        pi: p.pi.clone(),
                        status: PiOutcome::Success,
                        new_tip: p.new_tip.clone(),
                        new_version: p.new_version,
                        error: None,
                    }
                } else {
                    PiResult {
                        pi: p.pi.clone(),
                        status: PiOutcome::Error,
                        new_tip: None,
                        new_version: None,
                        error: p
                            .error
                            .clone()
                            .or_else(|| Some("processing did not complete".to_string())),
                    }
                }
            })
            .collect();

        let succeeded = results
            .iter()
            .filter(|r| r.status == PiOutcome::Success)
            .count() as i64;
        let failed = results.len() as i64 - succeeded;
        let status = if chunk.global_error.is_some() && succeeded == 0 {
            ChunkOutcome::Error
        } else {
            ChunkOutcome::from_counts(succeeded, failed)
        };

        CallbackPayload {
            batch_id: chunk.batch_id.clone(),
            chunk_id: chunk.chunk_id.clone(),
            status,
            results,
            summary: CallbackSummary {
                total: pis.len() as i64,
                succeeded,
                failed,
                processing_time_ms: (now - chunk.started_at).num_milliseconds(),
            },
            error: chunk.global_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunk(global_error: Option<&str>) -> ChunkState {
        ChunkState {
            chunk_id: "c1".into(),
            batch_id: "b1".into(),
            prefix: "".into(),
            custom_prompt: None,
            institution: None,
            phase: ChunkPhase::Callback,
            started_at: Utc::now(),
            completed_at: None,
            callback_retry_count: 0,
            global_error: global_error.map(String::from),
        }
    }

    fn pi(pi: &str, status: PiStatus, tip: Option<&str>, error: Option<&str>) -> PiState {
        PiState {
            pi: pi.into(),
            status,
            retry_count: 0,
            pinax_record: None,
            pinax_cid: tip.map(|_| "cid".into()),
            new_tip: tip.map(String::from),
            new_version: tip.map(|_| 2),
            error: error.map(String::from),
        }
    }

    #[test]
    fn record_serializes_type_field_and_omits_absent() {
        let record = PinaxRecord {
            id: Some("01HABCDEF0123456789JKMNPQR".into()),
            title: Some("Harbor survey".into()),
            record_type: Some("Collection".into()),
            creator: Some("Port Authority".into()),
            ..Default::default()
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "Collection");
        assert_eq!(json["creator"], "Port Authority");
        assert!(json.get("subjects").is_none());
        assert!(json.get("record_type").is_none());
    }

    #[test]
    fn creator_accepts_string_or_list() {
        let one: PinaxRecord = serde_json::from_value(json!({"creator": "A"})).unwrap();
        assert_eq!(one.creator, Some(StringOrList::One("A".into())));

        let many: PinaxRecord =
            serde_json::from_value(json!({"creator": ["A", "B"]})).unwrap();
        assert_eq!(
            many.creator,
            Some(StringOrList::Many(vec!["A".into(), "B".into()]))
        );
        assert!(StringOrList::Many(vec![]).is_empty());
        assert!(StringOrList::One(String::new()).is_empty());
    }

    #[test]
    fn unknown_record_fields_are_ignored() {
        let record: PinaxRecord =
            serde_json::from_value(json!({"title": "X", "confidence": 0.9})).unwrap();
        assert_eq!(record.title.as_deref(), Some("X"));
    }

    #[test]
    fn entity_tip_falls_back_to_manifest_cid() {
        let entity: EntitySnapshot = serde_json::from_value(json!({
            "pi": "arke:entity:0001",
            "manifest_cid": "bafy-old",
            "version": 3
        }))
        .unwrap();
        assert_eq!(entity.tip(), Some("bafy-old"));

        let entity: EntitySnapshot = serde_json::from_value(json!({
            "pi": "arke:entity:0001",
            "tip": "bafy-new",
            "manifest_cid": "bafy-old"
        }))
        .unwrap();
        assert_eq!(entity.tip(), Some("bafy-new"));
    }

    #[test]
    fn directory_name_prefers_label_then_pi_suffix() {
        let mut entity: EntitySnapshot = serde_json::from_value(json!({
            "pi": "arke:entity:00112233",
            "label": "harbor-box-12"
        }))
        .unwrap();
        assert_eq!(entity.directory_name(), "harbor-box-12");

        entity.label = None;
        assert_eq!(entity.directory_name(), "00112233");

        entity.pi = "ab".into();
        assert_eq!(entity.directory_name(), "ab");
    }

    #[test]
    fn phase_and_status_round_trip() {
        for phase in [
            ChunkPhase::Processing,
            ChunkPhase::Publishing,
            ChunkPhase::Callback,
            ChunkPhase::Done,
            ChunkPhase::Error,
        ] {
            assert_eq!(ChunkPhase::parse(phase.as_str()), phase);
        }
        assert_eq!(ChunkPhase::parse("garbage"), ChunkPhase::Error);
        assert!(ChunkPhase::Done.is_terminal());
        assert!(!ChunkPhase::Callback.is_terminal());

        for status in [
            PiStatus::Pending,
            PiStatus::Processing,
            PiStatus::Done,
            PiStatus::Error,
        ] {
            assert_eq!(PiStatus::parse(status.as_str()), status);
        }
        assert!(PiStatus::Error.is_terminal());
        assert!(!PiStatus::Processing.is_terminal());
    }

    #[test]
    fn chunk_outcome_rollup() {
        assert_eq!(ChunkOutcome::from_counts(3, 0), ChunkOutcome::Success);
        assert_eq!(ChunkOutcome::from_counts(0, 3), ChunkOutcome::Error);
        assert_eq!(ChunkOutcome::from_counts(2, 1), ChunkOutcome::Partial);
        // An empty chunk has no failures.
        assert_eq!(ChunkOutcome::from_counts(0, 0), ChunkOutcome::Success);
    }

    #[test]
    fn callback_assembly_counts_and_status() {
        let pis = vec![
            pi("p1", PiStatus::Done, Some("tip-1"), None),
            pi("p2", PiStatus::Done, Some("tip-2"), None),
            pi("p3", PiStatus::Error, None, Some("LLM error (status 500): boom")),
        ];
        let payload = CallbackPayload::assemble(&chunk(None), &pis, Utc::now());

        assert_eq!(payload.status, ChunkOutcome::Partial);
        assert_eq!(payload.summary.total, 3);
        assert_eq!(payload.summary.succeeded, 2);
        assert_eq!(payload.summary.failed, 1);
        assert_eq!(
            payload.summary.succeeded + payload.summary.failed,
            payload.summary.total
        );
        assert_eq!(payload.results[0].new_tip.as_deref(), Some("tip-1"));
        assert!(payload.results[2].error.is_some());

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["status"], "partial");
        assert_eq!(json["results"][0]["status"], "success");
        assert_eq!(json["results"][2]["status"], "error");
    }

    #[test]
    fn callback_assembly_with_global_error() {
        let pis = vec![pi("p1", PiStatus::Pending, None, None)];
        let payload =
            CallbackPayload::assemble(&chunk(Some("publishing pass panicked")), &pis, Utc::now());

        assert_eq!(payload.status, ChunkOutcome::Error);
        assert_eq!(payload.error.as_deref(), Some("publishing pass panicked"));
        // A PI that never completed is reported as an error, not dropped.
        assert_eq!(payload.summary.failed, 1);
    }

    #[test]
    fn done_without_tip_is_reported_as_error() {
        // Publishing never finished for this PI; the callback must not
        // claim success for a version that was never appended.
        let pis = vec![pi("p1", PiStatus::Done, None, None)];
        let payload = CallbackPayload::assemble(&chunk(None), &pis, Utc::now());
        assert_eq!(payload.results[0].status, PiOutcome::Error);
    }
}
