//! Prompt assembly for PINAX extraction.

use std::fmt::Write as _;

use pinax_core::defaults::DCMI_TYPES;
use pinax_core::ContextBundle;

/// The schema block shown to the model in both prompts.
pub const SCHEMA_BLOCK: &str = r#"Return a single JSON object with these fields:
  id           string, optional (assigned automatically when omitted)
  title        string, required
  type         string, required, one of the DCMI types listed above
  creator      string or array of strings, required
  institution  string, required
  created      string, required, "YYYY" or "YYYY-MM-DD"
  access_url   string, optional http(s) URL
  language     string, optional BCP-47 tag such as "en" or "pt-BR"
  subjects     array of strings, optional
  description  string, optional
  source       string, optional
  rights       string, optional
  place        string or array of strings, optional
Return only the JSON object, no commentary."#;

/// Build the system prompt: schema, vocabulary, and collection-first
/// heuristics, with any caller-supplied instructions appended last.
pub fn build_system_prompt(custom_prompt: Option<&str>) -> String {
    let mut prompt = String::with_capacity(2048);
    prompt.push_str(
        "You are an archival metadata specialist. You synthesize one PINAX record \
         (a Dublin-Core-derived schema) describing everything provided: text files, \
         OCR transcriptions, and already-cataloged child records.\n\n",
    );

    prompt.push_str("Allowed values for `type` (DCMI vocabulary, exact spelling):\n");
    for dcmi_type in DCMI_TYPES {
        let _ = writeln!(prompt, "  - {dcmi_type}");
    }

    prompt.push_str(
        "\nCataloging rules:\n\
         - When the input holds multiple files, default `type` to \"Collection\".\n\
         - Synthesize a collection-level title; never reuse a single item's title verbatim.\n\
         - Aggregate subjects, creators, and places across every file.\n\
         - Files named child_pinax_*.json are already-cataloged sub-collections; treat them \
           as signals of the collection's structure, not as items to re-describe.\n\
         - A file tagged [PREVIOUS] is the record being replaced; improve on it rather than \
           repeating it.\n\
         - Prefer facts found in the files over invention; omit optional fields you cannot \
           support.\n\n",
    );

    prompt.push_str(SCHEMA_BLOCK);

    if let Some(custom) = custom_prompt {
        if !custom.is_empty() {
            prompt.push_str("\n\nAdditional instructions:\n");
            prompt.push_str(custom);
        }
    }
    prompt
}

/// Build the user prompt: directory name, one section per file, and the
/// schema block repeated at the end.
pub fn build_user_prompt(bundle: &ContextBundle) -> String {
    let mut prompt = String::with_capacity(
        64 + bundle
            .files
            .iter()
            .map(|f| f.name.len() + f.content.len() + 24)
            .sum::<usize>(),
    );

    let _ = writeln!(prompt, "Directory: {}", bundle.directory_name);
    prompt.push('\n');

    for file in &bundle.files {
        let _ = writeln!(prompt, "--- File: {} ---", file.name);
        prompt.push_str(&file.content);
        prompt.push('\n');
    }

    prompt.push('\n');
    prompt.push_str(SCHEMA_BLOCK);
    prompt
}
