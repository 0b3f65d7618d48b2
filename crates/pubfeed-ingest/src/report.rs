//! Import reports

use crate::model::{EntityId, Guid};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordOutcome {
    Processed,
    Unchanged,
    ManuallyEdited,
    Skipped,
    Failed,
}

impl RecordOutcome {
    pub const ALL: [RecordOutcome; 5] = [
        RecordOutcome::Processed,
        RecordOutcome::Unchanged,
        RecordOutcome::ManuallyEdited,
        RecordOutcome::Skipped,
        RecordOutcome::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RecordOutcome::Processed => "processed",
            RecordOutcome::Unchanged => "unchanged",
            RecordOutcome::ManuallyEdited => "manually-edited",
            RecordOutcome::Skipped => "skipped",
            RecordOutcome::Failed => "failed",
        }
    }
}

impl fmt::Display for RecordOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordReport {
    pub external_id: Option<String>,
    pub guid: Option<Guid>,
    pub source: Option<PathBuf>,
    pub outcome: RecordOutcome,
    pub entity_id: Option<EntityId>,
    /// The entity did not exist before this record
    pub created: bool,
    pub message: Option<String>,
}

impl RecordReport {
    pub fn new(source: Option<PathBuf>, outcome: RecordOutcome) -> Self {
        Self {
            external_id: None,
            guid: None,
            source,
            outcome,
            entity_id: None,
            created: false,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// What the post-batch reconciliation did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "state")]
pub enum Reconciliation {
    /// Not run; the reason is logged
    Skipped { reason: String },
    /// External ids of the subscriptions that were cancelled
    Completed { cancelled: Vec<String> },
    /// More candidates than the ceiling allows; nothing was cancelled
    Aborted { ceiling: usize, candidates: Vec<String> },
    Failed { error: String },
}

impl Reconciliation {
    pub fn is_error(&self) -> bool {
        matches!(self, Reconciliation::Aborted { .. } | Reconciliation::Failed { .. })
    }
}

/// Outcomes of one publisher/type pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeReport {
    pub publisher: String,
    pub record_type: String,
    pub records: Vec<RecordReport>,
    pub reconciliation: Option<Reconciliation>,
}

impl TypeReport {
    pub fn new(publisher: &str, record_type: &str) -> Self {
        Self {
            publisher: publisher.to_string(),
            record_type: record_type.to_string(),
            records: Vec::new(),
            reconciliation: None,
        }
    }

    pub fn count(&self, outcome: RecordOutcome) -> usize {
        self.records.iter().filter(|r| r.outcome == outcome).count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportReport {
    pub types: Vec<TypeReport>,
}

impl ImportReport {
    pub fn records(&self) -> impl Iterator<Item = &RecordReport> {
        self.types.iter().flat_map(|t| t.records.iter())
    }

    pub fn count(&self, outcome: RecordOutcome) -> usize {
        self.types.iter().map(|t| t.count(outcome)).sum()
    }

    pub fn total(&self) -> usize {
        self.types.iter().map(|t| t.records.len()).sum()
    }

    /// Any failed record or reconciliation error
    pub fn has_failures(&self) -> bool {
        self.count(RecordOutcome::Failed) > 0
            || self
                .types
                .iter()
                .any(|t| t.reconciliation.as_ref().is_some_and(Reconciliation::is_error))
    }

    /// One line per publisher/type with its non-zero outcome counts
    pub fn summary(&self) -> Vec<String> {
        self.types
            .iter()
            .map(|t| {
                let counts: Vec<String> = RecordOutcome::ALL
                    .iter()
                    .filter_map(|&o| {
                        let n = t.count(o);
                        (n > 0).then(|| format!("{} {}", n, o))
                    })
                    .collect();
                let counts = if counts.is_empty() {
                    "no records".to_string()
                } else {
                    counts.join(", ")
                };
                let reconciliation = match &t.reconciliation {
                    Some(Reconciliation::Completed { cancelled }) => format!("; {} cancelled", cancelled.len()),
                    Some(Reconciliation::Aborted { candidates, .. }) => {
                        format!("; reconciliation aborted ({} candidates)", candidates.len())
                    },
                    Some(Reconciliation::Failed { error }) => format!("; reconciliation failed: {}", error),
                    Some(Reconciliation::Skipped { .. }) | None => String::new(),
                };
                format!("{}/{}: {}{}", t.publisher, t.record_type, counts, reconciliation)
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_and_failures() {
        let mut articles = TypeReport::new("pz", "articles");
        articles.records.push(RecordReport::new(None, RecordOutcome::Processed));
        articles.records.push(RecordReport::new(None, RecordOutcome::Processed));
        articles.records.push(RecordReport::new(None, RecordOutcome::Unchanged));
        let mut abos = TypeReport::new("bnn", "subscriptions");
        abos.reconciliation = Some(Reconciliation::Completed {
            cancelled: vec!["7".into()],
        });
        let mut report = ImportReport {
            types: vec![articles, abos],
        };

        assert_eq!(
            report.summary(),
            vec![
                "pz/articles: 2 processed, 1 unchanged",
                "bnn/subscriptions: no records; 1 cancelled"
            ]
        );
        assert!(!report.has_failures());

        report.types[1].reconciliation = Some(Reconciliation::Aborted {
            ceiling: 400,
            candidates: vec!["1".into()],
        });
        assert!(report.has_failures());
        assert_eq!(report.total(), 3);
    }
}
