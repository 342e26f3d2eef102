use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::Mutex;

use crate::error::SyncResult;
use crate::source::Source;
use crate::types::{PrimaryKey, SourceRow};

/// Hook awaited by [`TestSourceWrapper`] before a fetch reaches the wrapped source.
pub type FetchHook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

#[derive(Default)]
struct Inner {
    fetch_delay: Option<Duration>,
    before_next_fetch: Option<FetchHook>,
    fetch_calls: usize,
}

/// Source wrapper that slows fetches down or runs a hook in the middle of a round.
#[derive(Clone)]
pub struct TestSourceWrapper<S> {
    wrapped_source: S,
    inner: Arc<Mutex<Inner>>,
}

impl<S> TestSourceWrapper<S> {
    pub fn wrap(source: S) -> Self {
        Self {
            wrapped_source: source,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    pub fn wrapped(&self) -> &S {
        &self.wrapped_source
    }

    /// Makes every fetch sleep for `delay` before reading.
    pub async fn set_fetch_delay(&self, delay: Duration) {
        self.inner.lock().await.fetch_delay = Some(delay);
    }

    /// Runs `hook` once, right before the next fetch.
    pub async fn before_next_fetch<F>(&self, hook: F)
    where
        F: FnOnce() -> BoxFuture<'static, ()> + Send + 'static,
    {
        self.inner.lock().await.before_next_fetch = Some(Box::new(hook));
    }

    pub async fn fetch_calls(&self) -> usize {
        self.inner.lock().await.fetch_calls
    }
}

impl<S> fmt::Debug for TestSourceWrapper<S>
where
    S: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestSourceWrapper")
            .field("wrapped_source", &self.wrapped_source)
            .finish_non_exhaustive()
    }
}

impl<S> Source for TestSourceWrapper<S>
where
    S: Source + Sync,
{
    async fn fetch_rows(
        &self,
        table: &str,
        key_column: &str,
        keys: &[PrimaryKey],
    ) -> SyncResult<Vec<SourceRow>> {
        let (hook, delay) = {
            let mut inner = self.inner.lock().await;
            inner.fetch_calls += 1;
            (inner.before_next_fetch.take(), inner.fetch_delay)
        };

        if let Some(hook) = hook {
            hook().await;
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.wrapped_source
            .fetch_rows(table, key_column, keys)
            .await
    }
}
