use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use reqwest::{multipart, Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{
        AnsPdf, AnsPdfId, Collection, CollectionCreate, CollectionId, CollectionUpdate,
        EvaluationRecord, QpPdf,
    },
    protocol::{ListEnvelope, MessageResponse},
};
use storage::Storage;
use tracing::debug;
use url::Url;

use crate::error::ClientError;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api/v1";

/// Source of the bearer token attached to every request.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> anyhow::Result<Option<String>>;
}

/// Fixed token, mostly for tests and one-shot tooling.
pub struct StaticToken(pub Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn missing() -> Self {
        Self(None)
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> anyhow::Result<Option<String>> {
        Ok(self.0.clone())
    }
}

#[async_trait]
impl TokenSource for Storage {
    async fn access_token(&self) -> anyhow::Result<Option<String>> {
        Storage::access_token(self).await
    }
}

/// Which PDF document to download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PdfTarget {
    AnswerSheet(AnsPdfId),
    /// The question paper is addressed through its collection.
    QuestionPaper(CollectionId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl PdfUpload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }

    pub async fn from_path(path: &Path) -> Result<Self, ClientError> {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| ClientError::validation("file", "Please select a PDF file."))?;
        let bytes = tokio::fs::read(path).await.map_err(|err| {
            ClientError::validation("file", format!("failed to read {}: {err}", path.display()))
        })?;
        Ok(Self { file_name, bytes })
    }

    pub fn is_pdf(&self) -> bool {
        self.file_name.to_ascii_lowercase().ends_with(".pdf")
    }
}

#[async_trait]
pub trait ExamApi: Send + Sync {
    async fn list_collections(&self) -> Result<Vec<Collection>, ClientError>;
    async fn get_collection(&self, id: CollectionId) -> Result<Collection, ClientError>;
    async fn create_collection(&self, input: &CollectionCreate)
        -> Result<Collection, ClientError>;
    async fn update_collection(
        &self,
        id: CollectionId,
        input: &CollectionUpdate,
    ) -> Result<Collection, ClientError>;
    async fn delete_collection(&self, id: CollectionId) -> Result<MessageResponse, ClientError>;
    async fn list_ans_pdfs(&self, id: CollectionId) -> Result<Vec<AnsPdf>, ClientError>;
    async fn upload_ans_pdf(
        &self,
        id: CollectionId,
        upload: PdfUpload,
    ) -> Result<AnsPdf, ClientError>;
    async fn list_qp_pdfs(&self, id: CollectionId) -> Result<Vec<QpPdf>, ClientError>;
    async fn upload_qp_pdf(&self, id: CollectionId, upload: PdfUpload)
        -> Result<QpPdf, ClientError>;
    async fn start_evaluation(&self, id: CollectionId) -> Result<MessageResponse, ClientError>;
    async fn list_evaluations(
        &self,
        id: CollectionId,
    ) -> Result<Vec<EvaluationRecord>, ClientError>;
    async fn download_pdf(&self, target: PdfTarget) -> Result<Vec<u8>, ClientError>;
}

/// `ExamApi` over the backend's REST surface.
pub struct HttpExamApi {
    http: Client,
    base_url: String,
    tokens: Arc<dyn TokenSource>,
}

impl HttpExamApi {
    pub fn new(base_url: &str, tokens: Arc<dyn TokenSource>) -> Result<Self, ClientError> {
        Self::with_client(Client::new(), base_url, tokens)
    }

    pub fn with_client(
        http: Client,
        base_url: &str,
        tokens: Arc<dyn TokenSource>,
    ) -> Result<Self, ClientError> {
        let parsed = Url::parse(base_url.trim()).map_err(|err| {
            ClientError::validation("api_base_url", format!("invalid base url '{base_url}': {err}"))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ClientError::validation(
                "api_base_url",
                "api base url must start with http:// or https://",
            ));
        }
        Ok(Self {
            http,
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            tokens,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn bearer(&self) -> Result<String, ClientError> {
        match self.tokens.access_token().await {
            Ok(Some(token)) if !token.trim().is_empty() => Ok(token),
            Ok(_) => Err(ClientError::Unauthorized(
                "no access token stored; sign in first".to_string(),
            )),
            Err(err) => Err(ClientError::Unauthorized(format!(
                "failed to read access token: {err}"
            ))),
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ClientError> {
        let token = self.bearer().await?;
        let response = request.bearer_auth(token).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        debug!(status = status.as_u16(), %body, "api: request rejected");
        Err(ClientError::from_response(status.as_u16(), &body))
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
        Ok(self.send(request).await?.json::<T>().await?)
    }

    async fn list<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, ClientError> {
        let envelope: ListEnvelope<T> = self.json(self.http.get(self.url(path))).await?;
        Ok(envelope.data)
    }

    async fn upload<T: DeserializeOwned>(
        &self,
        path: &str,
        collection_id: CollectionId,
        upload: PdfUpload,
    ) -> Result<T, ClientError> {
        let part = multipart::Part::bytes(upload.bytes)
            .file_name(upload.file_name)
            .mime_str("application/pdf")?;
        let form = multipart::Form::new()
            .text("collection_id", collection_id.to_string())
            .part("file", part);
        self.json(self.http.post(self.url(path)).multipart(form))
            .await
    }
}

#[async_trait]
impl ExamApi for HttpExamApi {
    async fn list_collections(&self) -> Result<Vec<Collection>, ClientError> {
        self.list("/collections/").await
    }

    async fn get_collection(&self, id: CollectionId) -> Result<Collection, ClientError> {
        self.json(self.http.get(self.url(&format!("/collections/{id}"))))
            .await
    }

    async fn create_collection(
        &self,
        input: &CollectionCreate,
    ) -> Result<Collection, ClientError> {
        self.json(self.http.post(self.url("/collections/")).json(input))
            .await
    }

    async fn update_collection(
        &self,
        id: CollectionId,
        input: &CollectionUpdate,
    ) -> Result<Collection, ClientError> {
        self.json(
            self.http
                .put(self.url(&format!("/collections/{id}")))
                .json(input),
        )
        .await
    }

    async fn delete_collection(&self, id: CollectionId) -> Result<MessageResponse, ClientError> {
        self.json(self.http.delete(self.url(&format!("/collections/{id}"))))
            .await
    }

    async fn list_ans_pdfs(&self, id: CollectionId) -> Result<Vec<AnsPdf>, ClientError> {
        self.list(&format!("/upload/ans-pdfs/by-collection/{id}"))
            .await
    }

    async fn upload_ans_pdf(
        &self,
        id: CollectionId,
        upload: PdfUpload,
    ) -> Result<AnsPdf, ClientError> {
        self.upload("/upload/ans-pdfs/by-collection/", id, upload)
            .await
    }

    async fn list_qp_pdfs(&self, id: CollectionId) -> Result<Vec<QpPdf>, ClientError> {
        self.list(&format!("/upload/qppdfs/by-collection/{id}"))
            .await
    }

    async fn upload_qp_pdf(
        &self,
        id: CollectionId,
        upload: PdfUpload,
    ) -> Result<QpPdf, ClientError> {
        self.upload("/upload/qppdf/", id, upload).await
    }

    async fn start_evaluation(&self, id: CollectionId) -> Result<MessageResponse, ClientError> {
        self.json(self.http.post(self.url(&format!("/evaluate/{id}/"))))
            .await
    }

    async fn list_evaluations(
        &self,
        id: CollectionId,
    ) -> Result<Vec<EvaluationRecord>, ClientError> {
        self.list(&format!("/evaluations/by-collection/{id}"))
            .await
    }

    async fn download_pdf(&self, target: PdfTarget) -> Result<Vec<u8>, ClientError> {
        let path = match target {
            PdfTarget::AnswerSheet(pdf_id) => format!("/download/ans-pdfs/{pdf_id}/"),
            PdfTarget::QuestionPaper(collection_id) => {
                format!("/download/qppdfs/{collection_id}/")
            }
        };
        let response = self.send(self.http.get(self.url(&path))).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
