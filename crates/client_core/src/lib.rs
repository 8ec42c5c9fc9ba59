use std::sync::Arc;

use shared::domain::{AnsPdf, Collection, CollectionId, EvaluationRecord, QpPdf};
use tokio::sync::broadcast;
use tracing::warn;

pub mod api;
pub mod cache;
pub mod dialogs;
pub mod error;
pub mod evaluation;
pub mod results;
pub mod task;
pub mod viewer;
pub mod views;

pub use api::{ExamApi, HttpExamApi, PdfTarget, PdfUpload, StaticToken, TokenSource};
pub use cache::{CacheEvent, CacheSubscription, QueryCache, QueryData, QueryKey};
pub use error::ClientError;
pub use evaluation::{
    EvaluationPoller, EvaluationTrigger, IgnoredReason, PollState, TriggerControl,
    TriggerOutcome, EVALUATION_POLL_INTERVAL,
};
pub use results::{ResultsView, ResultsViewer};
pub use viewer::{PdfPane, PdfViewer, Viewing};
pub use views::{CollectionDetailView, CollectionRow, CollectionsView, DetailSnapshot};

const CLIENT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Error,
}

/// Toast-style message for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Notice(Notice),
    EvaluationStateChanged {
        collection_id: CollectionId,
        state: PollState,
    },
}

/// Explicit session handle: the API client, the shared query cache and
/// the event stream. Cheap to clone; every view and dialog holds one.
#[derive(Clone)]
pub struct AppContext {
    api: Arc<dyn ExamApi>,
    cache: Arc<QueryCache>,
    events: broadcast::Sender<ClientEvent>,
}

impl AppContext {
    pub fn new(api: Arc<dyn ExamApi>) -> Self {
        Self::with_cache(api, Arc::new(QueryCache::new()))
    }

    pub fn with_cache(api: Arc<dyn ExamApi>, cache: Arc<QueryCache>) -> Self {
        let (events, _) = broadcast::channel(CLIENT_EVENT_CAPACITY);
        Self { api, cache, events }
    }

    pub fn api(&self) -> &Arc<dyn ExamApi> {
        &self.api
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn notify_success(&self, message: impl Into<String>) {
        self.emit(ClientEvent::Notice(Notice {
            level: NoticeLevel::Success,
            message: message.into(),
        }));
    }

    pub(crate) fn notify_error(&self, err: &ClientError) {
        self.emit(ClientEvent::Notice(Notice {
            level: NoticeLevel::Error,
            message: err.user_message(),
        }));
    }

    pub async fn collections(&self) -> Result<Vec<Collection>, ClientError> {
        let key = QueryKey::collections();
        let api = Arc::clone(&self.api);
        let data = self
            .cache
            .fetch(key.clone(), || async move {
                api.list_collections().await.map(QueryData::Collections)
            })
            .await?;
        match data {
            QueryData::Collections(collections) => Ok(collections),
            other => Err(unexpected_entry(&key, &other)),
        }
    }

    pub async fn collection(&self, id: CollectionId) -> Result<Collection, ClientError> {
        let key = QueryKey::collection(id);
        let api = Arc::clone(&self.api);
        let data = self
            .cache
            .fetch(key.clone(), || async move {
                api.get_collection(id).await.map(QueryData::Collection)
            })
            .await?;
        expect_collection(&key, data)
    }

    /// Fetches the collection even when the cached copy is fresh.
    pub async fn refetch_collection(&self, id: CollectionId) -> Result<Collection, ClientError> {
        let key = QueryKey::collection(id);
        let api = Arc::clone(&self.api);
        let data = self
            .cache
            .refetch(key.clone(), || async move {
                api.get_collection(id).await.map(QueryData::Collection)
            })
            .await?;
        expect_collection(&key, data)
    }

    pub async fn cached_collection(&self, id: CollectionId) -> Option<Collection> {
        match self.cache.get(&QueryKey::collection(id)).await {
            Some(QueryData::Collection(collection)) => Some(collection),
            _ => None,
        }
    }

    pub async fn ans_pdfs(&self, id: CollectionId) -> Result<Vec<AnsPdf>, ClientError> {
        let key = QueryKey::ans_pdfs(id);
        let api = Arc::clone(&self.api);
        let data = self
            .cache
            .fetch(key.clone(), || async move {
                api.list_ans_pdfs(id).await.map(QueryData::AnsPdfs)
            })
            .await?;
        match data {
            QueryData::AnsPdfs(pdfs) => Ok(pdfs),
            other => Err(unexpected_entry(&key, &other)),
        }
    }

    pub async fn qp_pdfs(&self, id: CollectionId) -> Result<Vec<QpPdf>, ClientError> {
        let key = QueryKey::qp_pdfs(id);
        let api = Arc::clone(&self.api);
        let data = self
            .cache
            .fetch(key.clone(), || async move {
                api.list_qp_pdfs(id).await.map(QueryData::QpPdfs)
            })
            .await?;
        match data {
            QueryData::QpPdfs(pdfs) => Ok(pdfs),
            other => Err(unexpected_entry(&key, &other)),
        }
    }

    /// The collection's question paper: the first one the backend lists.
    pub async fn question_paper(&self, id: CollectionId) -> Result<Option<QpPdf>, ClientError> {
        Ok(self.qp_pdfs(id).await?.into_iter().next())
    }

    pub async fn evaluations(
        &self,
        id: CollectionId,
    ) -> Result<Vec<EvaluationRecord>, ClientError> {
        let key = QueryKey::evaluations(id);
        let api = Arc::clone(&self.api);
        let data = self
            .cache
            .fetch(key.clone(), || async move {
                api.list_evaluations(id).await.map(QueryData::Evaluations)
            })
            .await?;
        match data {
            QueryData::Evaluations(records) => Ok(records),
            other => Err(unexpected_entry(&key, &other)),
        }
    }

    /// Evicts everything cached for a deleted collection, document bytes
    /// included.
    pub(crate) async fn forget_collection(&self, id: CollectionId) {
        if let Some(QueryData::AnsPdfs(pdfs)) = self.cache.get(&QueryKey::ans_pdfs(id)).await {
            for pdf in pdfs {
                self.cache.remove(&QueryKey::ans_pdf_blob(pdf.id)).await;
            }
        }
        self.cache.remove(&QueryKey::qp_pdf_blob(id)).await;
        self.cache.remove(&QueryKey::collection(id)).await;
    }

    /// Document bytes; cached until explicitly invalidated.
    pub async fn pdf_blob(&self, target: PdfTarget) -> Result<Arc<Vec<u8>>, ClientError> {
        let key = match target {
            PdfTarget::AnswerSheet(pdf_id) => QueryKey::ans_pdf_blob(pdf_id),
            PdfTarget::QuestionPaper(collection_id) => QueryKey::qp_pdf_blob(collection_id),
        };
        let api = Arc::clone(&self.api);
        let data = self
            .cache
            .fetch(key.clone(), || async move {
                api.download_pdf(target)
                    .await
                    .map(|bytes| QueryData::PdfBlob(Arc::new(bytes)))
            })
            .await?;
        match data {
            QueryData::PdfBlob(bytes) => Ok(bytes),
            other => Err(unexpected_entry(&key, &other)),
        }
    }
}

fn expect_collection(key: &QueryKey, data: QueryData) -> Result<Collection, ClientError> {
    match data {
        QueryData::Collection(collection) => Ok(collection),
        other => Err(unexpected_entry(key, &other)),
    }
}

fn unexpected_entry(key: &QueryKey, data: &QueryData) -> ClientError {
    warn!(key = %key, kind = data.kind(), "cache: entry holds unexpected data");
    ClientError::Decode(format!("cache entry {key} holds {}", data.kind()))
}

#[cfg(test)]
mod test_support;
