//! The extraction pipeline: prompt assembly → model call → post-processing
//! → schema validation.

use serde_json::{Map, Value};
use tracing::debug;

use pinax_core::defaults::{ACCESS_URL_BASE, DEFAULT_SOURCE};
use pinax_core::{
    normalize_date, normalize_type, validate_record, ContextBundle, Error, PinaxRecord, Result,
    ValidationReport,
};

use crate::gateway::ModelGateway;
use crate::prompts::{build_system_prompt, build_user_prompt};
use crate::types::Usage;

/// Caller-supplied knobs for one extraction.
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Appended to the system prompt.
    pub custom_prompt: Option<String>,
    /// Field values merged over the model output; overrides win.
    pub overrides: Option<Value>,
    /// Access URL to stamp on the record; a default is derived from the
    /// record id when absent.
    pub access_url: Option<String>,
}

/// One finished extraction.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub record: PinaxRecord,
    pub usage: Usage,
    /// Schema report; warnings are surfaced, never retried.
    pub validation: ValidationReport,
}

/// Extraction pipeline over a model gateway.
#[derive(Clone)]
pub struct Extractor {
    gateway: ModelGateway,
}

impl Extractor {
    pub fn new(gateway: ModelGateway) -> Self {
        Self { gateway }
    }

    /// Produce one PINAX record for an assembled context bundle.
    pub async fn extract(
        &self,
        bundle: &ContextBundle,
        options: &ExtractOptions,
    ) -> Result<Extraction> {
        let system = build_system_prompt(options.custom_prompt.as_deref());
        let user = build_user_prompt(bundle);

        let (content, usage) = self.gateway.complete_json(&system, &user).await?;

        let raw: Value = serde_json::from_str(&content)
            .map_err(|e| Error::Parse(format!("model returned non-JSON content: {e}")))?;

        let processed = post_process(raw, options)?;
        let validation = validate_record(&processed);
        let record: PinaxRecord = serde_json::from_value(processed)
            .map_err(|e| Error::Parse(format!("model JSON has the wrong shape: {e}")))?;

        debug!(
            subsystem = "inference",
            component = "extractor",
            op = "extract",
            file_count = bundle.files.len(),
            valid = validation.valid,
            cost_usd = usage.cost_usd(),
            "Extraction complete"
        );

        Ok(Extraction {
            record,
            usage,
            validation,
        })
    }
}

/// Shape raw model output into a publishable record.
///
/// Overrides win over model fields; `id`, `access_url`, and `source` are
/// filled when absent; junk empties are dropped; `created` and `type` are
/// normalized toward the schema.
pub fn post_process(raw: Value, options: &ExtractOptions) -> Result<Value> {
    let Value::Object(mut record) = raw else {
        return Err(Error::Parse("model returned a non-object JSON value".to_string()));
    };

    if let Some(Value::Object(overrides)) = &options.overrides {
        for (key, value) in overrides {
            record.insert(key.clone(), value.clone());
        }
    }

    if !has_nonempty_str(&record, "id") {
        record.insert("id".to_string(), Value::String(ulid::Ulid::new().to_string()));
    }

    if let Some(url) = &options.access_url {
        record.insert("access_url".to_string(), Value::String(url.clone()));
    } else if !has_nonempty_str(&record, "access_url") {
        let id = record.get("id").and_then(Value::as_str).unwrap_or_default();
        record.insert(
            "access_url".to_string(),
            Value::String(format!("{ACCESS_URL_BASE}/{id}")),
        );
    }

    if !has_nonempty_str(&record, "source") {
        record.insert("source".to_string(), Value::String(DEFAULT_SOURCE.to_string()));
    }

    if matches!(record.get("creator"), Some(Value::String(s)) if s.is_empty()) {
        record.remove("creator");
    }
    if matches!(record.get("subjects"), Some(Value::Array(items)) if items.is_empty()) {
        record.remove("subjects");
    }

    if let Some(Value::String(created)) = record.get("created") {
        let normalized = normalize_date(created);
        record.insert("created".to_string(), Value::String(normalized));
    }
    if let Some(Value::String(record_type)) = record.get("type") {
        let normalized = normalize_type(record_type);
        record.insert("type".to_string(), Value::String(normalized));
    }

    Ok(Value::Object(record))
}

fn has_nonempty_str(record: &Map<String, Value>, field: &str) -> bool {
    matches!(record.get(field), Some(Value::String(s)) if !s.is_empty())
}
