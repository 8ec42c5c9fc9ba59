use std::path::Path;

use shared::{
    domain::{AnsPdf, Collection, CollectionCreate, CollectionId, CollectionUpdate, PdfKind, QpPdf},
    protocol::MessageResponse,
};
use tracing::{info, warn};

use crate::{
    api::PdfUpload,
    cache::QueryKey,
    error::ClientError,
    AppContext,
};

pub const NAME_REQUIRED: &str = "Name is required.";
pub const FILE_REQUIRED: &str = "Please select a PDF file.";
pub const PDF_ONLY: &str = "Only PDF files are allowed.";

pub const COLLECTION_CREATED: &str = "Collection created successfully.";
pub const COLLECTION_UPDATED: &str = "Collection updated successfully.";
pub const COLLECTION_DELETED: &str = "Collection deleted successfully.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome<T> {
    Success(T),
    /// Blocked client-side; nothing was sent.
    ValidationError(Vec<FieldError>),
    ServerError(ClientError),
}

impl<T> SubmitOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, SubmitOutcome::Success(_))
    }
}

/// Editable collection fields as typed by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionForm {
    pub name: String,
    pub branch: String,
    pub department: String,
    pub school: String,
}

impl CollectionForm {
    pub fn from_collection(collection: &Collection) -> Self {
        Self {
            name: collection.name.clone(),
            branch: collection.branch.clone().unwrap_or_default(),
            department: collection.department.clone().unwrap_or_default(),
            school: collection.school.clone().unwrap_or_default(),
        }
    }

    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        if self.name.trim().is_empty() {
            return Err(vec![FieldError::new("name", NAME_REQUIRED)]);
        }
        Ok(())
    }

    pub fn to_create(&self) -> CollectionCreate {
        CollectionCreate {
            name: self.name.trim().to_string(),
            branch: non_blank(&self.branch),
            department: non_blank(&self.department),
            school: non_blank(&self.school),
        }
    }

    /// Only the fields that differ from `original`. A cleared optional
    /// field is sent as an empty string.
    pub fn diff(&self, original: &Collection) -> CollectionUpdate {
        let name = self.name.trim();
        CollectionUpdate {
            name: (name != original.name).then(|| name.to_string()),
            branch: changed(&self.branch, original.branch.as_deref()),
            department: changed(&self.department, original.department.as_deref()),
            school: changed(&self.school, original.school.as_deref()),
        }
    }
}

fn non_blank(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn changed(value: &str, original: Option<&str>) -> Option<String> {
    let value = non_blank(value);
    let original = original.and_then(non_blank);
    if value == original {
        None
    } else {
        Some(value.unwrap_or_default())
    }
}

pub struct AddCollectionDialog {
    ctx: AppContext,
    open: bool,
    pub form: CollectionForm,
}

impl AddCollectionDialog {
    pub fn new(ctx: AppContext) -> Self {
        Self {
            ctx,
            open: false,
            form: CollectionForm::default(),
        }
    }

    pub fn open(&mut self) {
        self.open = true;
    }

    pub fn close(&mut self) {
        self.open = false;
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub async fn submit(&mut self) -> SubmitOutcome<Collection> {
        if let Err(errors) = self.form.validate() {
            return SubmitOutcome::ValidationError(errors);
        }
        match self.ctx.api().create_collection(&self.form.to_create()).await {
            Ok(collection) => {
                info!(collection_id = %collection.id, name = %collection.name, "dialogs: collection created");
                self.ctx.notify_success(COLLECTION_CREATED);
                self.ctx.cache().invalidate(&QueryKey::collections()).await;
                self.form = CollectionForm::default();
                self.close();
                SubmitOutcome::Success(collection)
            }
            Err(err) => server_error(&self.ctx, "create collection", err),
        }
    }
}

pub struct EditCollectionDialog {
    ctx: AppContext,
    open: bool,
    original: Collection,
    pub form: CollectionForm,
}

impl EditCollectionDialog {
    pub fn new(ctx: AppContext, collection: Collection) -> Self {
        Self {
            ctx,
            open: false,
            form: CollectionForm::from_collection(&collection),
            original: collection,
        }
    }

    pub fn collection(&self) -> &Collection {
        &self.original
    }

    /// Opens with the fields reset to the collection's current values.
    pub fn open(&mut self) {
        self.form = CollectionForm::from_collection(&self.original);
        self.open = true;
    }

    pub fn close(&mut self) {
        self.open = false;
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub async fn submit(&mut self) -> SubmitOutcome<Collection> {
        if let Err(errors) = self.form.validate() {
            return SubmitOutcome::ValidationError(errors);
        }
        let update = self.form.diff(&self.original);
        if update.is_empty() {
            self.close();
            return SubmitOutcome::Success(self.original.clone());
        }
        match self
            .ctx
            .api()
            .update_collection(self.original.id, &update)
            .await
        {
            Ok(collection) => {
                info!(collection_id = %collection.id, "dialogs: collection updated");
                self.ctx.notify_success(COLLECTION_UPDATED);
                self.ctx.cache().invalidate(&QueryKey::collections()).await;
                self.form = CollectionForm::from_collection(&collection);
                self.original = collection.clone();
                self.close();
                SubmitOutcome::Success(collection)
            }
            Err(err) => server_error(&self.ctx, "update collection", err),
        }
    }
}

pub struct DeleteCollectionDialog {
    ctx: AppContext,
    open: bool,
    collection: Collection,
}

impl DeleteCollectionDialog {
    pub fn new(ctx: AppContext, collection: Collection) -> Self {
        Self {
            ctx,
            open: false,
            collection,
        }
    }

    pub fn open(&mut self) {
        self.open = true;
    }

    pub fn close(&mut self) {
        self.open = false;
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn prompt(&self) -> String {
        format!(
            "Are you sure you want to delete \"{}\"? This action cannot be undone.",
            self.collection.name
        )
    }

    pub async fn confirm(&mut self) -> SubmitOutcome<MessageResponse> {
        match self.ctx.api().delete_collection(self.collection.id).await {
            Ok(response) => {
                info!(collection_id = %self.collection.id, "dialogs: collection deleted");
                self.ctx.notify_success(COLLECTION_DELETED);
                self.ctx.cache().invalidate(&QueryKey::collections()).await;
                self.ctx.forget_collection(self.collection.id).await;
                self.close();
                SubmitOutcome::Success(response)
            }
            Err(err) => server_error(&self.ctx, "delete collection", err),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadedPdf {
    AnswerSheet(AnsPdf),
    QuestionPaper(QpPdf),
}

pub struct UploadPdfDialog {
    ctx: AppContext,
    open: bool,
    collection_id: CollectionId,
    kind: PdfKind,
    selected: Option<PdfUpload>,
}

impl UploadPdfDialog {
    pub fn new(ctx: AppContext, collection_id: CollectionId, kind: PdfKind) -> Self {
        Self {
            ctx,
            open: false,
            collection_id,
            kind,
            selected: None,
        }
    }

    pub fn kind(&self) -> PdfKind {
        self.kind
    }

    pub fn title(&self) -> String {
        format!("Upload {}", self.kind.display_name())
    }

    pub fn open(&mut self) {
        self.open = true;
    }

    pub fn close(&mut self) {
        self.open = false;
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn selected(&self) -> Option<&PdfUpload> {
        self.selected.as_ref()
    }

    pub fn select(&mut self, upload: PdfUpload) {
        self.selected = Some(upload);
    }

    pub async fn select_path(&mut self, path: &Path) -> Result<(), ClientError> {
        self.selected = Some(PdfUpload::from_path(path).await?);
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    pub async fn submit(&mut self) -> SubmitOutcome<UploadedPdf> {
        let upload = match &self.selected {
            None => return SubmitOutcome::ValidationError(vec![FieldError::new("file", FILE_REQUIRED)]),
            Some(upload) if !upload.is_pdf() => {
                return SubmitOutcome::ValidationError(vec![FieldError::new("file", PDF_ONLY)])
            }
            Some(upload) => upload.clone(),
        };

        let api = self.ctx.api();
        let (result, key) = match self.kind {
            PdfKind::AnswerSheet => (
                api.upload_ans_pdf(self.collection_id, upload)
                    .await
                    .map(UploadedPdf::AnswerSheet),
                QueryKey::ans_pdfs(self.collection_id),
            ),
            PdfKind::QuestionPaper => (
                api.upload_qp_pdf(self.collection_id, upload)
                    .await
                    .map(UploadedPdf::QuestionPaper),
                QueryKey::qp_pdfs(self.collection_id),
            ),
        };

        match result {
            Ok(uploaded) => {
                info!(collection_id = %self.collection_id, kind = ?self.kind, "dialogs: pdf uploaded");
                self.ctx.notify_success(format!(
                    "{} uploaded successfully.",
                    self.kind.display_name()
                ));
                self.ctx.cache().invalidate(&key).await;
                self.selected = None;
                self.close();
                SubmitOutcome::Success(uploaded)
            }
            Err(err) => server_error(&self.ctx, "upload pdf", err),
        }
    }
}

fn server_error<T>(ctx: &AppContext, action: &str, err: ClientError) -> SubmitOutcome<T> {
    warn!(action, error = %err, "dialogs: submit failed");
    ctx.notify_error(&err);
    SubmitOutcome::ServerError(err)
}

#[cfg(test)]
#[path = "tests/dialogs_tests.rs"]
mod tests;
