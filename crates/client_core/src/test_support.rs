use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use shared::{
    domain::{
        AnsPdf, AnsPdfId, Collection, CollectionCreate, CollectionId, CollectionUpdate,
        EvaluationRecord, QpPdf, QpPdfId,
    },
    protocol::MessageResponse,
};

use crate::{
    api::{ExamApi, PdfTarget, PdfUpload},
    error::ClientError,
    AppContext,
};

#[derive(Default)]
struct MockState {
    collections: Vec<Collection>,
    ans_pdfs: HashMap<CollectionId, Vec<AnsPdf>>,
    qp_pdfs: HashMap<CollectionId, Vec<QpPdf>>,
    evaluations: HashMap<CollectionId, Vec<EvaluationRecord>>,
    blobs: HashMap<PdfTarget, Vec<u8>>,
    // Remaining unevaluated `get_collection` answers before the backend
    // reports the collection evaluated.
    flip_after: HashMap<CollectionId, usize>,
    fail_start: Option<ClientError>,
    fail_create: Option<ClientError>,
}

/// In-memory backend with call counters.
#[derive(Default)]
pub struct MockExamApi {
    state: Mutex<MockState>,
    pub get_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub start_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
    pub update_calls: AtomicUsize,
    pub evaluation_calls: AtomicUsize,
    pub download_calls: AtomicUsize,
}

impl MockExamApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert_collection(&self, collection: Collection) {
        self.state.lock().unwrap().collections.push(collection);
    }

    pub fn insert_ans_pdf(&self, collection_id: CollectionId, pdf: AnsPdf) {
        self.state
            .lock()
            .unwrap()
            .ans_pdfs
            .entry(collection_id)
            .or_default()
            .push(pdf);
    }

    pub fn insert_qp_pdf(&self, pdf: QpPdf) {
        self.state
            .lock()
            .unwrap()
            .qp_pdfs
            .entry(pdf.collection_id)
            .or_default()
            .push(pdf);
    }

    pub fn insert_evaluations(&self, collection_id: CollectionId, records: Vec<EvaluationRecord>) {
        self.state
            .lock()
            .unwrap()
            .evaluations
            .insert(collection_id, records);
    }

    pub fn insert_blob(&self, target: PdfTarget, bytes: Vec<u8>) {
        self.state.lock().unwrap().blobs.insert(target, bytes);
    }

    /// The next `unevaluated` reads report `is_evaluated = false`, the one
    /// after that flips the collection to evaluated.
    pub fn flip_after_gets(&self, collection_id: CollectionId, unevaluated: usize) {
        self.state
            .lock()
            .unwrap()
            .flip_after
            .insert(collection_id, unevaluated);
    }

    pub fn mark_evaluated(&self, collection_id: CollectionId) {
        let mut state = self.state.lock().unwrap();
        if let Some(collection) = state
            .collections
            .iter_mut()
            .find(|collection| collection.id == collection_id)
        {
            collection.is_evaluated = true;
        }
    }

    pub fn fail_start_with(&self, err: ClientError) {
        self.state.lock().unwrap().fail_start = Some(err);
    }

    pub fn fail_create_with(&self, err: ClientError) {
        self.state.lock().unwrap().fail_create = Some(err);
    }

    pub fn collection_count(&self) -> usize {
        self.state.lock().unwrap().collections.len()
    }

    pub fn gets(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn lists(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

pub fn collection(name: &str) -> Collection {
    Collection {
        id: CollectionId::new(),
        user_id: None,
        name: name.to_string(),
        branch: None,
        department: None,
        school: None,
        is_evaluated: false,
    }
}

pub fn record(question_no: Option<&str>, obtained: i64, max: i64, feedback: &str) -> EvaluationRecord {
    EvaluationRecord {
        id: Default::default(),
        page_id: None,
        question_no: question_no.map(str::to_string),
        obtained_marks: obtained,
        max_marks: max,
        feedback: feedback.to_string(),
    }
}

pub fn context(api: &Arc<MockExamApi>) -> AppContext {
    AppContext::new(Arc::clone(api) as Arc<dyn ExamApi>)
}

fn not_found(what: &str) -> ClientError {
    ClientError::NotFound(format!("{what} not found"))
}

#[async_trait]
impl ExamApi for MockExamApi {
    async fn list_collections(&self) -> Result<Vec<Collection>, ClientError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.lock().unwrap().collections.clone())
    }

    async fn get_collection(&self, id: CollectionId) -> Result<Collection, ClientError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        let flip = match state.flip_after.get_mut(&id) {
            Some(0) => true,
            Some(remaining) => {
                *remaining -= 1;
                false
            }
            None => false,
        };
        let collection = state
            .collections
            .iter_mut()
            .find(|collection| collection.id == id)
            .ok_or_else(|| not_found("Collection"))?;
        if flip {
            collection.is_evaluated = true;
        }
        Ok(collection.clone())
    }

    async fn create_collection(
        &self,
        input: &CollectionCreate,
    ) -> Result<Collection, ClientError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.fail_create.clone() {
            return Err(err);
        }
        let collection = Collection {
            id: CollectionId::new(),
            user_id: None,
            name: input.name.clone(),
            branch: input.branch.clone(),
            department: input.department.clone(),
            school: input.school.clone(),
            is_evaluated: false,
        };
        state.collections.push(collection.clone());
        Ok(collection)
    }

    async fn update_collection(
        &self,
        id: CollectionId,
        input: &CollectionUpdate,
    ) -> Result<Collection, ClientError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        let collection = state
            .collections
            .iter_mut()
            .find(|collection| collection.id == id)
            .ok_or_else(|| not_found("Collection"))?;
        if let Some(name) = &input.name {
            collection.name = name.clone();
        }
        if let Some(branch) = &input.branch {
            collection.branch = Some(branch.clone()).filter(|value| !value.is_empty());
        }
        if let Some(department) = &input.department {
            collection.department = Some(department.clone()).filter(|value| !value.is_empty());
        }
        if let Some(school) = &input.school {
            collection.school = Some(school.clone()).filter(|value| !value.is_empty());
        }
        Ok(collection.clone())
    }

    async fn delete_collection(&self, id: CollectionId) -> Result<MessageResponse, ClientError> {
        let mut state = self.state.lock().unwrap();
        let before = state.collections.len();
        state.collections.retain(|collection| collection.id != id);
        if state.collections.len() == before {
            return Err(not_found("Collection"));
        }
        Ok(MessageResponse::new("Collection deleted successfully"))
    }

    async fn list_ans_pdfs(&self, id: CollectionId) -> Result<Vec<AnsPdf>, ClientError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .ans_pdfs
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn upload_ans_pdf(
        &self,
        id: CollectionId,
        upload: PdfUpload,
    ) -> Result<AnsPdf, ClientError> {
        let pdf = AnsPdf {
            id: AnsPdfId::new(),
            name: upload.file_name,
            ans_pdf_folder_id: None,
            filepath: None,
            folder_path: None,
        };
        self.insert_ans_pdf(id, pdf.clone());
        Ok(pdf)
    }

    async fn list_qp_pdfs(&self, id: CollectionId) -> Result<Vec<QpPdf>, ClientError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .qp_pdfs
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn upload_qp_pdf(
        &self,
        id: CollectionId,
        upload: PdfUpload,
    ) -> Result<QpPdf, ClientError> {
        let pdf = QpPdf {
            id: QpPdfId::new(),
            collection_id: id,
            name: upload.file_name,
            filepath: None,
            folder_path: None,
            json_path: None,
            created_at: None,
        };
        self.insert_qp_pdf(pdf.clone());
        Ok(pdf)
    }

    async fn start_evaluation(&self, id: CollectionId) -> Result<MessageResponse, ClientError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        if let Some(err) = state.fail_start.clone() {
            return Err(err);
        }
        if !state.collections.iter().any(|collection| collection.id == id) {
            return Err(not_found("Collection"));
        }
        Ok(MessageResponse::new("Evaluation started"))
    }

    async fn list_evaluations(
        &self,
        id: CollectionId,
    ) -> Result<Vec<EvaluationRecord>, ClientError> {
        self.evaluation_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .state
            .lock()
            .unwrap()
            .evaluations
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn download_pdf(&self, target: PdfTarget) -> Result<Vec<u8>, ClientError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .unwrap()
            .blobs
            .get(&target)
            .cloned()
            .ok_or_else(|| not_found("PDF"))
    }
}
