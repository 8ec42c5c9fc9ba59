use std::time::Duration;

use shared::domain::{AnsPdf, Collection, CollectionId, PdfKind, QpPdf};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    cache::{CacheEvent, CacheSubscription, QueryKey},
    dialogs::{AddCollectionDialog, DeleteCollectionDialog, EditCollectionDialog, UploadPdfDialog},
    error::ClientError,
    evaluation::{
        EvaluationPoller, EvaluationTrigger, PollState, TriggerControl, TriggerOutcome,
        EVALUATION_POLL_INTERVAL,
    },
    results::{ResultsView, ResultsViewer},
    task::TaskHandle,
    viewer::{PdfPane, PdfViewer, Viewing},
    AppContext,
};

/// One line of the collections table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRow {
    pub id: CollectionId,
    pub name: String,
    pub branch: String,
    pub department: String,
    pub school: String,
    pub status: &'static str,
}

impl From<&Collection> for CollectionRow {
    fn from(collection: &Collection) -> Self {
        Self {
            id: collection.id,
            name: collection.name.clone(),
            branch: collection.branch.clone().unwrap_or_default(),
            department: collection.department.clone().unwrap_or_default(),
            school: collection.school.clone().unwrap_or_default(),
            status: collection.status_label(),
        }
    }
}

pub struct CollectionsView {
    ctx: AppContext,
}

impl CollectionsView {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    pub async fn load(&self) -> Result<Vec<CollectionRow>, ClientError> {
        let collections = self.ctx.collections().await?;
        Ok(collections.iter().map(CollectionRow::from).collect())
    }

    pub async fn find(&self, id: CollectionId) -> Result<Option<Collection>, ClientError> {
        Ok(self
            .ctx
            .collections()
            .await?
            .into_iter()
            .find(|collection| collection.id == id))
    }

    pub fn add_dialog(&self) -> AddCollectionDialog {
        AddCollectionDialog::new(self.ctx.clone())
    }

    pub fn edit_dialog(&self, collection: Collection) -> EditCollectionDialog {
        EditCollectionDialog::new(self.ctx.clone(), collection)
    }

    pub fn delete_dialog(&self, collection: Collection) -> DeleteCollectionDialog {
        DeleteCollectionDialog::new(self.ctx.clone(), collection)
    }
}

/// Summary of the detail page at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailSnapshot {
    pub collection: Collection,
    pub status: &'static str,
    pub answer_sheets: Vec<AnsPdf>,
    pub question_paper: Option<QpPdf>,
    pub control: TriggerControl,
    pub poll_state: PollState,
    pub viewing: Option<Viewing>,
}

/// Detail page of one collection. Owns every task it starts; dropping it
/// (or `unmount`) cancels them.
pub struct CollectionDetailView {
    ctx: AppContext,
    collection_id: CollectionId,
    trigger: EvaluationTrigger,
    poller: EvaluationPoller,
    results: ResultsViewer,
    viewer: PdfViewer,
    viewing: Option<Viewing>,
    refresher: Option<TaskHandle>,
}

impl CollectionDetailView {
    pub async fn mount(ctx: AppContext, collection_id: CollectionId) -> Result<Self, ClientError> {
        Self::mount_with_period(ctx, collection_id, EVALUATION_POLL_INTERVAL).await
    }

    pub async fn mount_with_period(
        ctx: AppContext,
        collection_id: CollectionId,
        period: Duration,
    ) -> Result<Self, ClientError> {
        futures::try_join!(
            ctx.collection(collection_id),
            ctx.ans_pdfs(collection_id),
            ctx.qp_pdfs(collection_id),
        )?;
        info!(collection_id = %collection_id, "views: detail mounted");

        let events = ctx.cache().subscribe(QueryKey::collection(collection_id));
        let refresher = TaskHandle::spawn(
            "detail_refresher",
            refresh_on_invalidate(ctx.clone(), collection_id, events),
        );
        Ok(Self {
            trigger: EvaluationTrigger::new(ctx.clone()),
            poller: EvaluationPoller::with_period(ctx.clone(), collection_id, period),
            results: ResultsViewer::new(ctx.clone(), collection_id),
            viewer: PdfViewer::new(ctx.clone(), collection_id),
            viewing: None,
            refresher: Some(refresher),
            ctx,
            collection_id,
        })
    }

    pub fn collection_id(&self) -> CollectionId {
        self.collection_id
    }

    pub async fn snapshot(&mut self) -> Result<DetailSnapshot, ClientError> {
        let (collection, answer_sheets, question_paper) = futures::try_join!(
            self.ctx.collection(self.collection_id),
            self.ctx.ans_pdfs(self.collection_id),
            self.ctx.question_paper(self.collection_id),
        )?;
        self.poller.observe(&collection);
        Ok(DetailSnapshot {
            status: collection.status_label(),
            control: self.trigger.control(&collection, self.poller.is_polling()),
            poll_state: self.poller.state(),
            viewing: self.viewing,
            collection,
            answer_sheets,
            question_paper,
        })
    }

    /// Starts the backend evaluation and, once acknowledged, polling.
    pub async fn start_evaluation(&mut self) -> Result<TriggerOutcome, ClientError> {
        let collection = self.ctx.collection(self.collection_id).await?;
        let outcome = self
            .trigger
            .start(&collection, self.poller.is_polling())
            .await?;
        if matches!(outcome, TriggerOutcome::Started { .. }) {
            self.poller.begin();
        }
        Ok(outcome)
    }

    pub fn poll_state(&self) -> PollState {
        self.poller.state()
    }

    pub fn watch_poll_state(&self) -> watch::Receiver<PollState> {
        self.poller.watch()
    }

    pub fn upload_dialog(&self, kind: PdfKind) -> UploadPdfDialog {
        UploadPdfDialog::new(self.ctx.clone(), self.collection_id, kind)
    }

    pub fn select(&mut self, viewing: Option<Viewing>) {
        self.viewing = viewing;
    }

    pub fn viewing(&self) -> Option<Viewing> {
        self.viewing
    }

    pub async fn view_pdf(&self) -> Result<PdfPane, ClientError> {
        self.viewer.load(self.viewing).await
    }

    pub async fn open_results(&mut self) -> ResultsView {
        match self.ctx.collection(self.collection_id).await {
            Ok(collection) => self.results.open(&collection).await,
            Err(err) => {
                warn!(collection_id = %self.collection_id, error = %err, "views: results unavailable");
                ResultsView::Failed(err)
            }
        }
    }

    pub fn close_results(&mut self) {
        self.results.close();
    }

    pub fn results_open(&self) -> bool {
        self.results.is_open()
    }

    pub fn unmount(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if let Some(refresher) = self.refresher.take() {
            refresher.cancel();
            self.poller.cancel();
            info!(collection_id = %self.collection_id, "views: detail unmounted");
        }
    }
}

impl Drop for CollectionDetailView {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Refetches the page's active queries whenever they are invalidated.
async fn refresh_on_invalidate(
    ctx: AppContext,
    collection_id: CollectionId,
    mut events: CacheSubscription,
) {
    let collection_key = QueryKey::collection(collection_id);
    let ans_key = QueryKey::ans_pdfs(collection_id);
    let qp_key = QueryKey::qp_pdfs(collection_id);

    while let Some(event) = events.recv().await {
        let CacheEvent::Invalidated(key) = event else {
            continue;
        };
        let result = if key == collection_key {
            ctx.collection(collection_id).await.map(drop)
        } else if key == ans_key {
            ctx.ans_pdfs(collection_id).await.map(drop)
        } else if key == qp_key {
            ctx.qp_pdfs(collection_id).await.map(drop)
        } else {
            continue;
        };
        match result {
            Ok(()) => debug!(key = %key, "views: refreshed"),
            Err(err) => warn!(key = %key, error = %err, "views: refresh failed"),
        }
    }
}

#[cfg(test)]
#[path = "tests/views_tests.rs"]
mod tests;
