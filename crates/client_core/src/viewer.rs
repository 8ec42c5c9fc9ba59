use std::sync::Arc;

use shared::domain::{AnsPdfId, CollectionId, QpPdfId};
use tracing::warn;

use crate::{api::PdfTarget, error::ClientError, AppContext};

pub const EMPTY_PANE_MESSAGE: &str = "Select an Answer Sheet or the Question Paper to view it.";
pub const PDF_LOAD_FAILED_MESSAGE: &str = "Failed to load PDF file.";

/// Document shown in the viewer pane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Viewing {
    AnswerSheet(AnsPdfId),
    QuestionPaper(QpPdfId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PdfPane {
    Empty,
    Document { viewing: Viewing, bytes: Arc<Vec<u8>> },
    Failed { viewing: Viewing, message: String },
}

impl PdfPane {
    pub fn message(&self) -> Option<&str> {
        match self {
            PdfPane::Empty => Some(EMPTY_PANE_MESSAGE),
            PdfPane::Failed { message, .. } => Some(message),
            PdfPane::Document { .. } => None,
        }
    }
}

/// Fetches document bytes for the pane of one collection page.
pub struct PdfViewer {
    ctx: AppContext,
    collection_id: CollectionId,
}

impl PdfViewer {
    pub fn new(ctx: AppContext, collection_id: CollectionId) -> Self {
        Self { ctx, collection_id }
    }

    pub async fn load(&self, viewing: Option<Viewing>) -> Result<PdfPane, ClientError> {
        let Some(viewing) = viewing else {
            return Ok(PdfPane::Empty);
        };
        // Question papers are served per collection.
        let target = match viewing {
            Viewing::AnswerSheet(pdf_id) => PdfTarget::AnswerSheet(pdf_id),
            Viewing::QuestionPaper(_) => PdfTarget::QuestionPaper(self.collection_id),
        };
        match self.ctx.pdf_blob(target).await {
            Ok(bytes) => Ok(PdfPane::Document { viewing, bytes }),
            Err(ClientError::NotFound(detail)) => {
                warn!(?viewing, %detail, "viewer: document missing");
                Ok(PdfPane::Failed {
                    viewing,
                    message: PDF_LOAD_FAILED_MESSAGE.to_string(),
                })
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
#[path = "tests/viewer_tests.rs"]
mod tests;
