//! Share one in-flight request between concurrent callers asking for the
//! same key

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use crate::error::{Result, RunnerError};

type SharedFetch<T> = Shared<BoxFuture<'static, Result<T, Arc<RunnerError>>>>;

pub struct InflightRequests<K, T> {
    inflight: Arc<Mutex<HashMap<K, SharedFetch<T>>>>,
}

impl<K, T> Clone for InflightRequests<K, T> {
    fn clone(&self) -> Self {
        Self {
            inflight: Arc::clone(&self.inflight),
        }
    }
}

impl<K, T> Default for InflightRequests<K, T> {
    fn default() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, T> InflightRequests<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with a request still running
    pub fn len(&self) -> usize {
        self.inflight.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Join the request already running for `key`, or start one with `fetch`.
    ///
    /// The entry is removed when the request finishes, so a later call after
    /// completion always fetches again.
    pub async fn get_or_fetch<F, Fut>(&self, key: K, fetch: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let shared = {
            let mut inflight = self.inflight.lock();
            match inflight.get(&key) {
                Some(existing) => existing.clone(),
                None => {
                    let registry = Arc::clone(&self.inflight);
                    let entry_key = key.clone();
                    let request = fetch();
                    let shared = async move {
                        let result = request.await.map_err(Arc::new);
                        registry.lock().remove(&entry_key);
                        result
                    }
                    .boxed()
                    .shared();
                    inflight.insert(key, shared.clone());
                    shared
                }
            }
        };

        shared.await.map_err(RunnerError::Shared)
    }
}
