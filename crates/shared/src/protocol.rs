use serde::{Deserialize, Serialize};

use crate::domain::{AnsPdf, Collection, EvaluationRecord, QpPdf};

/// Envelope used by every list endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEnvelope<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub count: i64,
}

impl<T> ListEnvelope<T> {
    pub fn new(data: Vec<T>) -> Self {
        let count = data.len() as i64;
        Self { data, count }
    }
}

pub type CollectionsPublic = ListEnvelope<Collection>;
pub type AnsPdfsPublic = ListEnvelope<AnsPdf>;
pub type QpPdfsPublic = ListEnvelope<QpPdf>;
pub type EvaluationsPublic = ListEnvelope<EvaluationRecord>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
