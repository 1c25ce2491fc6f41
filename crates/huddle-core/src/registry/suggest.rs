//! Collaborator suggestions from task text.

use serde::Serialize;

use super::worker::{WorkerRecord, WorkerSnapshot};

/// Task keywords mapped to role keywords that handle them.
const ROLE_FAMILIES: &[(&str, &[&str])] = &[
    ("code", &["developer", "programmer", "engineer"]),
    ("design", &["designer", "creative", "ui", "ux"]),
    ("research", &["researcher", "analyst", "investigator"]),
    ("write", &["writer", "content", "documentation"]),
    ("marketing", &["marketing", "promotion", "social"]),
    ("data", &["data", "analyst", "scientist"]),
    ("test", &["tester", "qa", "quality"]),
    ("manage", &["manager", "coordinator", "lead"]),
];

const FAMILY_CONFIDENCE: f64 = 0.8;
const OVERLAP_STEP: f64 = 0.2;
const OVERLAP_CAP: f64 = 0.7;
const MAX_SUGGESTIONS: usize = 3;

/// A suggested collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollaboratorSuggestion {
    /// Suggested worker.
    pub worker: WorkerSnapshot,
    /// Why the worker was suggested.
    pub reason: String,
    /// Confidence in `0.0..=1.0`.
    pub confidence: f64,
}

/// Ranks `candidates` (already ordered by registration) for `task_text`.
pub(crate) fn suggest<'a>(
    candidates: impl Iterator<Item = &'a WorkerRecord> + Clone,
    task_text: &str,
) -> Vec<CollaboratorSuggestion> {
    let task = task_text.to_lowercase();
    let mut suggestions: Vec<CollaboratorSuggestion> = Vec::new();

    for (task_keyword, role_keywords) in ROLE_FAMILIES {
        if !task.contains(task_keyword) {
            continue;
        }
        let Some(worker) = candidates.clone().find(|w| w.matches_any_keyword(role_keywords)) else {
            continue;
        };
        if suggestions.iter().any(|s| s.worker.worker_id == worker.worker_id) {
            continue;
        }
        suggestions.push(CollaboratorSuggestion {
            worker: worker.snapshot(),
            reason: format!("Specialized in {}-related tasks", task_keyword),
            confidence: FAMILY_CONFIDENCE,
        });
    }

    if suggestions.is_empty() {
        for worker in candidates {
            let job = worker.info.job_description.to_lowercase();
            let overlap = task.split_whitespace().filter(|word| job.contains(word)).count();
            if overlap > 0 {
                suggestions.push(CollaboratorSuggestion {
                    worker: worker.snapshot(),
                    reason: "Job description matches task requirements".to_string(),
                    confidence: (overlap as f64 * OVERLAP_STEP).min(OVERLAP_CAP),
                });
            }
        }
    }

    // Stable sort keeps registration order among equal confidences.
    suggestions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    suggestions.truncate(MAX_SUGGESTIONS);
    suggestions
}
