use std::{collections::HashMap, fmt, future::Future, sync::Arc, time::Instant};

use shared::domain::{AnsPdf, AnsPdfId, Collection, CollectionId, EvaluationRecord, QpPdf};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::ClientError;

const CACHE_EVENT_CAPACITY: usize = 256;

/// Structured cache address, e.g. `collections/<id>/ansPdfs`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn collections() -> Self {
        Self::new(["collections"])
    }

    pub fn collection(id: CollectionId) -> Self {
        Self::new(["collections".to_string(), id.to_string()])
    }

    pub fn ans_pdfs(id: CollectionId) -> Self {
        Self::collection(id).child("ansPdfs")
    }

    pub fn qp_pdfs(id: CollectionId) -> Self {
        Self::collection(id).child("qpPdfs")
    }

    pub fn evaluations(id: CollectionId) -> Self {
        Self::collection(id).child("evaluations")
    }

    pub fn ans_pdf_blob(pdf_id: AnsPdfId) -> Self {
        Self::new(["ansPdfs".to_string(), pdf_id.to_string(), "blob".to_string()])
    }

    pub fn qp_pdf_blob(collection_id: CollectionId) -> Self {
        Self::new([
            "qpPdfs".to_string(),
            collection_id.to_string(),
            "blob".to_string(),
        ])
    }

    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryData {
    Collections(Vec<Collection>),
    Collection(Collection),
    AnsPdfs(Vec<AnsPdf>),
    QpPdfs(Vec<QpPdf>),
    Evaluations(Vec<EvaluationRecord>),
    PdfBlob(Arc<Vec<u8>>),
}

impl QueryData {
    pub fn kind(&self) -> &'static str {
        match self {
            QueryData::Collections(_) => "collections",
            QueryData::Collection(_) => "collection",
            QueryData::AnsPdfs(_) => "ans_pdfs",
            QueryData::QpPdfs(_) => "qp_pdfs",
            QueryData::Evaluations(_) => "evaluations",
            QueryData::PdfBlob(_) => "pdf_blob",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    Updated(QueryKey),
    Invalidated(QueryKey),
}

impl CacheEvent {
    pub fn key(&self) -> &QueryKey {
        match self {
            CacheEvent::Updated(key) | CacheEvent::Invalidated(key) => key,
        }
    }
}

struct CacheEntry {
    data: QueryData,
    stale: bool,
    updated_at: Instant,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<QueryKey, CacheEntry>,
    // Bumped by every invalidation; a fetch that started under an older
    // generation stores its result as stale.
    generations: HashMap<QueryKey, u64>,
}

/// Process-wide store of server data shared by every view of a session.
/// Entries live until the cache is dropped or `remove` evicts them.
pub struct QueryCache {
    state: RwLock<CacheState>,
    inflight: Mutex<HashMap<QueryKey, Arc<Mutex<()>>>>,
    events: broadcast::Sender<CacheEvent>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryCache {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(CACHE_EVENT_CAPACITY);
        Self {
            state: RwLock::new(CacheState::default()),
            inflight: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub async fn get(&self, key: &QueryKey) -> Option<QueryData> {
        self.state
            .read()
            .await
            .entries
            .get(key)
            .map(|entry| entry.data.clone())
    }

    pub async fn is_stale(&self, key: &QueryKey) -> bool {
        self.state
            .read()
            .await
            .entries
            .get(key)
            .map_or(true, |entry| entry.stale)
    }

    /// Age of the cached value, if any.
    pub async fn age(&self, key: &QueryKey) -> Option<std::time::Duration> {
        self.state
            .read()
            .await
            .entries
            .get(key)
            .map(|entry| entry.updated_at.elapsed())
    }

    pub async fn set(&self, key: QueryKey, data: QueryData) {
        {
            let mut state = self.state.write().await;
            state.generations.entry(key.clone()).or_insert(0);
            state.entries.insert(
                key.clone(),
                CacheEntry {
                    data,
                    stale: false,
                    updated_at: Instant::now(),
                },
            );
        }
        let _ = self.events.send(CacheEvent::Updated(key));
    }

    /// Marks every key under `prefix` stale and notifies subscribers.
    /// Returns the number of keys touched.
    pub async fn invalidate(&self, prefix: &QueryKey) -> usize {
        let touched = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            let mut touched = Vec::new();
            for (key, generation) in state.generations.iter_mut() {
                if key.starts_with(prefix) {
                    *generation += 1;
                    touched.push(key.clone());
                }
            }
            for key in &touched {
                if let Some(entry) = state.entries.get_mut(key) {
                    entry.stale = true;
                }
            }
            touched
        };

        debug!(prefix = %prefix, keys = touched.len(), "cache: invalidated");
        let count = touched.len();
        for key in touched {
            let _ = self.events.send(CacheEvent::Invalidated(key));
        }
        count
    }

    /// Drops every entry under `prefix`. Generations are kept, so a fetch
    /// still in flight for a removed key stores its result as stale.
    pub async fn remove(&self, prefix: &QueryKey) -> usize {
        let removed = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            for (key, generation) in state.generations.iter_mut() {
                if key.starts_with(prefix) {
                    *generation += 1;
                }
            }
            let before = state.entries.len();
            state.entries.retain(|key, _| !key.starts_with(prefix));
            before - state.entries.len()
        };
        debug!(prefix = %prefix, keys = removed, "cache: removed");
        removed
    }

    pub fn subscribe(&self, prefix: QueryKey) -> CacheSubscription {
        CacheSubscription {
            prefix,
            rx: self.events.subscribe(),
        }
    }

    /// Returns the cached value when it is fresh, otherwise runs `fetcher`.
    /// Concurrent fetches of one key share a single fetcher run.
    pub async fn fetch<F, Fut>(&self, key: QueryKey, fetcher: F) -> Result<QueryData, ClientError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<QueryData, ClientError>>,
    {
        if let Some(data) = self.fresh(&key).await {
            return Ok(data);
        }

        let lock = self.key_lock(&key).await;
        let _guard = lock.lock().await;
        if let Some(data) = self.fresh(&key).await {
            return Ok(data);
        }
        self.run_fetch(key, fetcher).await
    }

    /// Always runs `fetcher`, serialized with other fetches of the key.
    pub async fn refetch<F, Fut>(
        &self,
        key: QueryKey,
        fetcher: F,
    ) -> Result<QueryData, ClientError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<QueryData, ClientError>>,
    {
        let lock = self.key_lock(&key).await;
        let _guard = lock.lock().await;
        self.run_fetch(key, fetcher).await
    }

    async fn fresh(&self, key: &QueryKey) -> Option<QueryData> {
        let state = self.state.read().await;
        state
            .entries
            .get(key)
            .filter(|entry| !entry.stale)
            .map(|entry| entry.data.clone())
    }

    async fn key_lock(&self, key: &QueryKey) -> Arc<Mutex<()>> {
        let mut inflight = self.inflight.lock().await;
        inflight.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(
            inflight
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    async fn run_fetch<F, Fut>(&self, key: QueryKey, fetcher: F) -> Result<QueryData, ClientError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<QueryData, ClientError>>,
    {
        let generation = {
            let mut state = self.state.write().await;
            *state.generations.entry(key.clone()).or_insert(0)
        };

        let data = fetcher().await?;

        let stale = {
            let mut state = self.state.write().await;
            let current = *state.generations.entry(key.clone()).or_insert(0);
            let stale = current != generation;
            state.entries.insert(
                key.clone(),
                CacheEntry {
                    data: data.clone(),
                    stale,
                    updated_at: Instant::now(),
                },
            );
            stale
        };
        if stale {
            debug!(key = %key, "cache: fetch raced an invalidation, result kept stale");
        }

        let _ = self.events.send(CacheEvent::Updated(key));
        Ok(data)
    }
}

/// Stream of cache events for keys under one prefix.
pub struct CacheSubscription {
    prefix: QueryKey,
    rx: broadcast::Receiver<CacheEvent>,
}

impl CacheSubscription {
    pub fn prefix(&self) -> &QueryKey {
        &self.prefix
    }

    /// Next matching event, or `None` once the cache is gone.
    pub async fn recv(&mut self) -> Option<CacheEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.key().starts_with(&self.prefix) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(prefix = %self.prefix, skipped, "cache: subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/cache_tests.rs"]
mod tests;
