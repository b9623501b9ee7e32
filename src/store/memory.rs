//! In-memory [SourceDb] and [TargetDb], for running the copy pipeline without mongodb servers.
use super::{InsertOutcome, ReadError, SourceDb, StoreError, TargetCollection, TargetDb};
use bson::{Bson, Document};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::result::Result as StdResult;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

/// One entry of a source collection.
#[derive(Debug, Clone)]
pub enum MemoryEntry {
    /// a well formed document.
    Doc(Document),
    /// a document which fails to decode.
    Corrupt(String),
    /// cursor fails at this position.
    StreamFailure(String),
    /// cursor blocks for the given time before moving on, it times out if the
    /// time limit given to `open_cursor` passes meanwhile.
    Stall(Duration),
}

/// In-memory source database.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    name: String,
    colls: BTreeMap<String, Vec<MemoryEntry>>,
    list_error: Option<String>,
}

impl MemorySource {
    /// create an empty source database called `name`.
    pub fn new(name: &str) -> Self {
        MemorySource {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// add collection `coll` holding `docs`.
    pub fn with_collection(self, coll: &str, docs: Vec<Document>) -> Self {
        self.with_entries(coll, docs.into_iter().map(MemoryEntry::Doc).collect())
    }

    /// add collection `coll` holding `entries`.
    pub fn with_entries(mut self, coll: &str, entries: Vec<MemoryEntry>) -> Self {
        self.colls.insert(coll.to_string(), entries);
        self
    }

    /// make listing collections fail with `message`.
    pub fn failing_list(mut self, message: &str) -> Self {
        self.list_error = Some(message.to_string());
        self
    }
}

impl SourceDb for MemorySource {
    type Cursor = MemoryCursor;

    fn name(&self) -> &str {
        &self.name
    }

    fn list_collection_names(&self) -> StdResult<Vec<String>, StoreError> {
        match &self.list_error {
            Some(message) => Err(StoreError::new(message.clone())),
            None => Ok(self.colls.keys().cloned().collect()),
        }
    }

    fn open_cursor(
        &self,
        coll: &str,
        time_limit: Option<Duration>,
    ) -> StdResult<MemoryCursor, StoreError> {
        // same as mongodb, reading a collection which doesn't exist yields nothing.
        let entries = self.colls.get(coll).cloned().unwrap_or_default();
        Ok(MemoryCursor {
            entries: entries.into_iter(),
            expires: time_limit.map(|limit| Instant::now() + limit),
            failed: false,
        })
    }
}

/// Cursor over a [MemorySource] collection.
pub struct MemoryCursor {
    entries: std::vec::IntoIter<MemoryEntry>,
    expires: Option<Instant>,
    failed: bool,
}

impl Iterator for MemoryCursor {
    type Item = StdResult<Document, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.failed {
                return None;
            }
            match self.entries.next()? {
                MemoryEntry::Doc(doc) => return Some(Ok(doc)),
                MemoryEntry::Corrupt(message) => {
                    return Some(Err(ReadError::Decode(StoreError::new(message))))
                }
                MemoryEntry::StreamFailure(message) => {
                    self.failed = true;
                    return Some(Err(ReadError::Stream(StoreError::new(message))));
                }
                MemoryEntry::Stall(pause) => {
                    thread::sleep(pause);
                    if self.expires.map_or(false, |at| Instant::now() >= at) {
                        self.failed = true;
                        return Some(Err(ReadError::Timeout(
                            StoreError::new("cursor exceeded its time limit").timed_out(),
                        )));
                    }
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct TargetState {
    docs: HashMap<String, Vec<Document>>,
    ids: HashMap<String, HashSet<String>>,
    insert_calls: HashMap<String, Vec<usize>>,
    failing: HashSet<String>,
    write_delay: Option<Duration>,
}

/// In-memory target database.
///
/// It enforces `_id` uniqueness per collection like mongodb does, and records
/// the size of every insert call. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryTarget {
    name: String,
    state: Arc<Mutex<TargetState>>,
}

impl MemoryTarget {
    /// create an empty target database called `name`.
    pub fn new(name: &str) -> Self {
        MemoryTarget {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// pre-populate collection `coll` with `docs`.
    pub fn with_existing(self, coll: &str, docs: Vec<Document>) -> Self {
        {
            let mut state = self.lock();
            for doc in docs {
                store_doc(&mut state, coll, doc);
            }
        }
        self
    }

    /// every insert call into `coll` fails as a whole.
    pub fn fail_writes_to(self, coll: &str) -> Self {
        self.lock().failing.insert(coll.to_string());
        self
    }

    /// every insert call takes `delay`, a call whose time limit is shorter
    /// gives up when the limit passes and stores nothing.
    pub fn with_write_delay(self, delay: Duration) -> Self {
        self.lock().write_delay = Some(delay);
        self
    }

    /// documents stored in `coll`, in insertion order.
    pub fn documents(&self, coll: &str) -> Vec<Document> {
        self.lock().docs.get(coll).cloned().unwrap_or_default()
    }

    /// batch size of each insert call made to `coll`.
    pub fn insert_calls(&self, coll: &str) -> Vec<usize> {
        self.lock()
            .insert_calls
            .get(coll)
            .cloned()
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, TargetState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// store `doc` unless its `_id` is already present, returns whether it was stored.
fn store_doc(state: &mut TargetState, coll: &str, doc: Document) -> bool {
    if let Some(id) = doc.get("_id") {
        let ids = state.ids.entry(coll.to_string()).or_default();
        if !ids.insert(id_key(id)) {
            return false;
        }
    }
    state.docs.entry(coll.to_string()).or_default().push(doc);
    true
}

/// key used for `_id` uniqueness, numbers of different types compare by value like
/// they do in mongodb, so `1`, `1i64` and `1.0` are the same `_id`.
fn id_key(id: &Bson) -> String {
    // doubles beyond 2^53 can't be told apart from their integer neighbours anyway.
    const EXACT_DOUBLE: f64 = 9_007_199_254_740_992.0;
    match *id {
        Bson::Int32(v) => format!("n:{}", v),
        Bson::Int64(v) => format!("n:{}", v),
        Bson::Double(v) if v.fract() == 0.0 && v.abs() < EXACT_DOUBLE => {
            format!("n:{}", v as i64)
        }
        Bson::Double(v) => format!("n:{}", v),
        ref other => format!("{:?}", other),
    }
}

impl TargetDb for MemoryTarget {
    type Collection = MemoryCollection;

    fn name(&self) -> &str {
        &self.name
    }

    fn collection(&self, coll: &str) -> MemoryCollection {
        MemoryCollection {
            name: coll.to_string(),
            target: self.clone(),
        }
    }
}

/// Handle to one [MemoryTarget] collection.
pub struct MemoryCollection {
    name: String,
    target: MemoryTarget,
}

impl MemoryCollection {
    fn record_call(&self, size: usize) {
        self.target
            .lock()
            .insert_calls
            .entry(self.name.clone())
            .or_default()
            .push(size);
    }
}

impl TargetCollection for MemoryCollection {
    fn insert_unordered(
        &self,
        docs: &[Document],
        time_limit: Option<Duration>,
    ) -> StdResult<InsertOutcome, StoreError> {
        let delay = self.target.lock().write_delay;
        if let Some(delay) = delay {
            // sleep without holding the lock, other collections keep writing.
            match time_limit {
                Some(limit) if limit < delay => {
                    thread::sleep(limit);
                    self.record_call(docs.len());
                    return Err(StoreError::new(format!(
                        "insert into {} exceeded its time limit",
                        self.name
                    ))
                    .timed_out());
                }
                _ => thread::sleep(delay),
            }
        }

        self.record_call(docs.len());
        let mut state = self.target.lock();
        if state.failing.contains(&self.name) {
            return Err(StoreError::new(format!(
                "target collection {} is unreachable",
                self.name
            )));
        }

        let mut outcome = InsertOutcome::default();
        for doc in docs {
            if store_doc(&mut state, &self.name, doc.clone()) {
                outcome.inserted += 1;
            } else {
                outcome.rejected += 1;
            }
        }
        Ok(outcome)
    }
}
