use std::fmt::Write as _;

use shared::domain::{Collection, CollectionId, EvaluationRecord};
use tracing::warn;

use crate::{error::ClientError, AppContext};

pub const EMPTY_RESULTS_MESSAGE: &str = "No evaluation data found for this collection.";
pub const FAILED_RESULTS_MESSAGE: &str = "Could not load results.";
pub const PROVISIONAL_BANNER: &str =
    "Evaluation has not finished; these results are provisional.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultsView {
    Empty,
    Records {
        records: Vec<EvaluationRecord>,
        /// Set while the collection is not yet evaluated.
        provisional: bool,
    },
    Failed(ClientError),
}

impl ResultsView {
    pub fn render(&self) -> String {
        match self {
            ResultsView::Empty => EMPTY_RESULTS_MESSAGE.to_string(),
            ResultsView::Failed(_) => FAILED_RESULTS_MESSAGE.to_string(),
            ResultsView::Records {
                records,
                provisional,
            } => {
                let mut out = String::new();
                if *provisional {
                    out.push_str(PROVISIONAL_BANNER);
                    out.push_str("\n\n");
                }
                let blocks: Vec<String> = records.iter().map(render_record).collect();
                out.push_str(&blocks.join("\n"));
                out
            }
        }
    }

    pub fn records(&self) -> &[EvaluationRecord] {
        match self {
            ResultsView::Records { records, .. } => records,
            _ => &[],
        }
    }
}

fn render_record(record: &EvaluationRecord) -> String {
    let mut block = String::new();
    let question = record.question_no.as_deref().unwrap_or("N/A");
    let _ = writeln!(block, "Question: {question}");
    let _ = writeln!(block, "Marks Obtained: {}", record.obtained_marks);
    let _ = writeln!(block, "Max Marks: {}", record.max_marks);
    let _ = writeln!(block, "Feedback: {}", record.feedback);
    block
}

/// Lazily loads a collection's evaluation records while open.
pub struct ResultsViewer {
    ctx: AppContext,
    collection_id: CollectionId,
    open: bool,
    provisional: bool,
}

impl ResultsViewer {
    pub fn new(ctx: AppContext, collection_id: CollectionId) -> Self {
        Self {
            ctx,
            collection_id,
            open: false,
            provisional: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub async fn open(&mut self, collection: &Collection) -> ResultsView {
        self.open = true;
        self.provisional = !collection.is_evaluated;
        self.load().await
    }

    /// Reloads while open; `None` when closed.
    pub async fn refresh(&mut self, collection: Option<&Collection>) -> Option<ResultsView> {
        if !self.open {
            return None;
        }
        if let Some(collection) = collection {
            self.provisional = !collection.is_evaluated;
        }
        Some(self.load().await)
    }

    pub fn close(&mut self) {
        self.open = false;
    }

    async fn load(&self) -> ResultsView {
        match self.ctx.evaluations(self.collection_id).await {
            Ok(records) if records.is_empty() => ResultsView::Empty,
            Ok(records) => ResultsView::Records {
                records,
                provisional: self.provisional,
            },
            Err(err) => {
                warn!(collection_id = %self.collection_id, error = %err, "results: load failed");
                ResultsView::Failed(err)
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/results_tests.rs"]
mod tests;
