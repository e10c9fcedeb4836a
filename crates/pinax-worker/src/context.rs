//! Context assembly: everything the model sees for one PI.
//!
//! Fetches run concurrently and fail soft: a missing blob or an
//! unreachable child shrinks the bundle instead of failing the item. Only
//! the entity snapshot itself is load-bearing.

use tokio::task::JoinSet;
use tracing::{debug, warn};

use pinax_archive::ArchiveClient;
use pinax_core::defaults::{
    OCR_SIDECAR_SUFFIX, PINAX_COMPONENT, PREVIOUS_PINAX_NAME, RESERVED_COMPONENT_NAMES,
    TEXT_EXTENSIONS,
};
use pinax_core::truncate::{allocate_budget, render_truncated, TruncationItem};
use pinax_core::{ContextBundle, ContextFile, PinaxRecord, Result};

/// Assembles context bundles from the object store.
#[derive(Clone)]
pub struct ContextFetcher {
    archive: ArchiveClient,
    /// Token budget handed to the truncator.
    target_tokens: i64,
}

/// One planned fetch; `order` keeps the assembled file list deterministic
/// regardless of completion order.
struct Fetched {
    order: usize,
    file: ContextFile,
    is_previous_pinax: bool,
}

impl ContextFetcher {
    pub fn new(archive: ArchiveClient, target_tokens: i64) -> Self {
        Self {
            archive,
            target_tokens,
        }
    }

    /// Build the context bundle for one PI, truncated to the token budget.
    pub async fn fetch(&self, pi: &str) -> Result<ContextBundle> {
        let entity = self.archive.get_entity(pi).await?;
        let directory_name = entity.directory_name();

        let mut tasks: JoinSet<Option<Fetched>> = JoinSet::new();
        let mut order = 0usize;

        // (a) The entity's previous PINAX record.
        if let Some(cid) = entity.components.get(PINAX_COMPONENT) {
            let archive = self.archive.clone();
            let cid = cid.clone();
            let slot = order;
            order += 1;
            tasks.spawn(async move {
                match archive.download(&cid).await {
                    Ok(content) => Some(Fetched {
                        order: slot,
                        file: ContextFile {
                            name: PREVIOUS_PINAX_NAME.to_string(),
                            content,
                        },
                        is_previous_pinax: true,
                    }),
                    Err(e) => {
                        warn!(subsystem = "worker", component = "context_fetcher", cid = %cid, error = %e, "Skipping previous pinax");
                        None
                    }
                }
            });
        }

        // (b) Text components and (c) OCR sidecars.
        for (label, cid) in &entity.components {
            let lower = label.to_lowercase();
            let is_sidecar = lower.ends_with(OCR_SIDECAR_SUFFIX);
            let is_reserved = RESERVED_COMPONENT_NAMES.contains(&lower.as_str());
            let is_text = TEXT_EXTENSIONS.iter().any(|ext| lower.ends_with(ext));
            if !is_sidecar && (is_reserved || !is_text) {
                continue;
            }

            let archive = self.archive.clone();
            let label = label.clone();
            let cid = cid.clone();
            let slot = order;
            order += 1;
            tasks.spawn(async move {
                match archive.download(&cid).await {
                    Ok(content) => Some(Fetched {
                        order: slot,
                        file: ContextFile {
                            name: label,
                            content,
                        },
                        is_previous_pinax: false,
                    }),
                    Err(e) => {
                        warn!(subsystem = "worker", component = "context_fetcher", component_label = %label, error = %e, "Skipping component");
                        None
                    }
                }
            });
        }

        // (d) Each child's PINAX record. Children are expected to be
        // cataloged before their parent; a missing record is skipped.
        for child_pi in &entity.children_pi {
            let archive = self.archive.clone();
            let child_pi = child_pi.clone();
            let slot = order;
            order += 1;
            tasks.spawn(async move {
                let child = match archive.get_entity(&child_pi).await {
                    Ok(child) => child,
                    Err(e) => {
                        warn!(subsystem = "worker", component = "context_fetcher", pi = %child_pi, error = %e, "Skipping unreachable child");
                        return None;
                    }
                };
                let Some(cid) = child.components.get(PINAX_COMPONENT).cloned() else {
                    warn!(subsystem = "worker", component = "context_fetcher", pi = %child_pi, "Child has no pinax.json yet");
                    return None;
                };
                match archive.download(&cid).await {
                    Ok(content) => Some(Fetched {
                        order: slot,
                        file: ContextFile {
                            name: format!("child_pinax_{}.json", child.directory_name()),
                            content,
                        },
                        is_previous_pinax: false,
                    }),
                    Err(e) => {
                        warn!(subsystem = "worker", component = "context_fetcher", pi = %child_pi, error = %e, "Skipping child pinax");
                        None
                    }
                }
            });
        }

        let mut fetched: Vec<Fetched> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(item)) => fetched.push(item),
                Ok(None) => {}
                Err(e) => {
                    warn!(subsystem = "worker", component = "context_fetcher", error = %e, "Fetch task failed");
                }
            }
        }
        fetched.sort_by_key(|f| f.order);

        let existing_pinax: Option<PinaxRecord> = fetched
            .iter()
            .find(|f| f.is_previous_pinax)
            .and_then(|f| serde_json::from_str(&f.file.content).ok());

        let files: Vec<ContextFile> = fetched.into_iter().map(|f| f.file).collect();
        let files = truncate_files(files, self.target_tokens);

        debug!(
            subsystem = "worker",
            component = "context_fetcher",
            pi = %pi,
            file_count = files.len(),
            "Context assembled"
        );

        Ok(ContextBundle {
            directory_name,
            files,
            existing_pinax,
        })
    }
}

/// Apply the progressive tax to an assembled file list.
fn truncate_files(files: Vec<ContextFile>, target: i64) -> Vec<ContextFile> {
    let items: Vec<TruncationItem> = files
        .iter()
        .map(|f| TruncationItem::from_content(f.name.as_str(), &f.content))
        .collect();
    let plan = allocate_budget(&items, target);

    debug!(
        subsystem = "worker",
        component = "context_fetcher",
        op = "truncate",
        tokens_before = plan.stats.total_before,
        tokens_after = plan.stats.total_after,
        mode = plan.stats.mode.as_str(),
        "Token budget applied"
    );

    files
        .into_iter()
        .zip(plan.allocations)
        .map(|(file, allocation)| ContextFile {
            content: render_truncated(&file.content, allocation.allocated_chars),
            name: file.name,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pinax_core::defaults::TRUNCATION_MARKER;

    fn file(name: &str, content: &str) -> ContextFile {
        ContextFile {
            name: name.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn truncation_spares_small_files() {
        let files = vec![
            file("small.txt", &"a".repeat(400)),     // 100 tokens
            file("huge.txt", &"b".repeat(400_000)),  // 100k tokens
        ];
        let out = truncate_files(files, 10_000);
        assert_eq!(out[0].content.len(), 400, "small file untouched");
        assert!(out[1].content.ends_with(TRUNCATION_MARKER));
        assert!(out[1].content.chars().count() < 400_000);
    }

    #[test]
    fn truncation_noop_within_budget() {
        let files = vec![file("a.txt", "short"), file("b.txt", "also short")];
        let out = truncate_files(files.clone(), 10_000);
        assert_eq!(out, files);
    }
}
