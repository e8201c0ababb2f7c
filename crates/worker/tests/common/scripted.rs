use async_trait::async_trait;
use bytes::Bytes;
use pkgedit_storage::{CopyStatus, ObjectMeta, ObjectStore, StorageError, StorageResult};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Wraps a real backend to count copies, script copy progress and inject put failures.
///
/// With an empty script, copies go straight to the inner backend. Otherwise
/// `start_copy` reports `Pending` and each `copy_status` call pops the next
/// scripted status; popping `Success` performs the real copy. An exhausted
/// script keeps reporting `Pending`.
///
/// With a copy delay, every copy reports `Pending` for that many polls of its
/// own target key before it is performed, so concurrent copies overlap. The
/// largest number of copies in flight at once is kept in `peak_in_flight`.
#[allow(dead_code)]
pub struct ScriptedStore {
    inner: Arc<dyn ObjectStore>,
    script: Mutex<VecDeque<CopyStatus>>,
    scripted: AtomicBool,
    pending: Mutex<Option<(String, String)>>,
    copy_delay: Option<usize>,
    in_flight: Mutex<HashMap<String, (String, usize)>>,
    pub peak_in_flight: AtomicUsize,
    pub start_copy_calls: AtomicUsize,
    pub copy_status_calls: AtomicUsize,
    pub fail_puts: AtomicBool,
}

#[allow(dead_code)]
impl ScriptedStore {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self {
            inner,
            script: Mutex::new(VecDeque::new()),
            scripted: AtomicBool::new(false),
            pending: Mutex::new(None),
            copy_delay: None,
            in_flight: Mutex::new(HashMap::new()),
            peak_in_flight: AtomicUsize::new(0),
            start_copy_calls: AtomicUsize::new(0),
            copy_status_calls: AtomicUsize::new(0),
            fail_puts: AtomicBool::new(false),
        }
    }

    /// Statuses returned by successive `copy_status` calls after a copy starts.
    pub fn with_script(self, statuses: impl IntoIterator<Item = CopyStatus>) -> Self {
        *self.script.lock().unwrap() = statuses.into_iter().collect();
        self.scripted.store(true, Ordering::SeqCst);
        self
    }

    /// Keep each copy pending for `polls` status checks before it completes.
    pub fn with_copy_delay(mut self, polls: usize) -> Self {
        self.copy_delay = Some(polls);
        self
    }

    pub fn peak_copies(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn start_copies(&self) -> usize {
        self.start_copy_calls.load(Ordering::SeqCst)
    }

    pub fn status_polls(&self) -> usize {
        self.copy_status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for ScriptedStore {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        self.inner.head(key).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::other(
                "injected put failure",
            )));
        }
        self.inner.put(key, data).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list(prefix).await
    }

    async fn start_copy(&self, from: &str, to: &str) -> StorageResult<CopyStatus> {
        self.start_copy_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(polls) = self.copy_delay {
            let mut in_flight = self.in_flight.lock().unwrap();
            in_flight.insert(to.to_string(), (from.to_string(), polls));
            self.peak_in_flight.fetch_max(in_flight.len(), Ordering::SeqCst);
            return Ok(CopyStatus::Pending);
        }
        if !self.scripted.load(Ordering::SeqCst) {
            return self.inner.start_copy(from, to).await;
        }
        *self.pending.lock().unwrap() = Some((from.to_string(), to.to_string()));
        Ok(CopyStatus::Pending)
    }

    async fn copy_status(&self, key: &str) -> StorageResult<CopyStatus> {
        self.copy_status_calls.fetch_add(1, Ordering::SeqCst);
        if self.copy_delay.is_some() {
            let finished = {
                let mut in_flight = self.in_flight.lock().unwrap();
                if let Some((_, remaining)) = in_flight.get_mut(key)
                    && *remaining > 0
                {
                    *remaining -= 1;
                    return Ok(CopyStatus::Pending);
                }
                in_flight.remove(key).map(|(from, _)| from)
            };
            return match finished {
                Some(from) => {
                    self.inner.start_copy(&from, key).await?;
                    Ok(CopyStatus::Success)
                }
                None => self.inner.copy_status(key).await,
            };
        }
        if !self.scripted.load(Ordering::SeqCst) {
            return self.inner.copy_status(key).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(CopyStatus::Success) => {
                let pending = self.pending.lock().unwrap().take();
                if let Some((from, to)) = pending {
                    self.inner.start_copy(&from, &to).await?;
                }
                Ok(CopyStatus::Success)
            }
            Some(status) => Ok(status),
            None => Ok(CopyStatus::Pending),
        }
    }

    fn backend_name(&self) -> &'static str {
        "scripted"
    }
}
