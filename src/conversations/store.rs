use moka::future::Cache;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::thread::MessageThread;
use super::types::{CallDetail, EmailDetail, MessageStatus};
use crate::crm::CrmError;

type ThreadKey = (String, String);

/// Loaded threads keyed by business and conversation.
///
/// Threads idle for longer than the configured time, or beyond the capacity,
/// are evicted and simply reload from the CRM on the next open. A failed
/// send's draft lives in its thread and goes with it. Closures passed to the
/// update methods are synchronous, so no lock is held across a network call.
pub struct ConversationStore {
    threads: Cache<ThreadKey, Arc<Mutex<MessageThread>>>,
}

fn key(business_id: &str, conversation_id: &str) -> ThreadKey {
    (business_id.to_string(), conversation_id.to_string())
}

impl ConversationStore {
    pub fn new(max_threads: u64, idle: Duration) -> Self {
        Self {
            threads: Cache::builder()
                .max_capacity(max_threads)
                .time_to_idle(idle)
                .build(),
        }
    }

    /// Runs `f` on the thread, creating an empty one first if needed.
    pub async fn update<R>(
        &self,
        business_id: &str,
        conversation_id: &str,
        f: impl FnOnce(&mut MessageThread) -> R,
    ) -> R {
        let thread = self
            .threads
            .get_with(key(business_id, conversation_id), async {
                Arc::new(Mutex::new(MessageThread::new()))
            })
            .await;
        let mut thread = thread.lock().await;
        f(&mut thread)
    }

    /// Runs `f` only when the thread has already been loaded.
    pub async fn update_loaded<R>(
        &self,
        business_id: &str,
        conversation_id: &str,
        f: impl FnOnce(&mut MessageThread) -> R,
    ) -> Option<R> {
        let thread = self.threads.get(&key(business_id, conversation_id)).await?;
        let mut thread = thread.lock().await;
        if thread.is_loaded() {
            Some(f(&mut thread))
        } else {
            None
        }
    }

    pub async fn snapshot(
        &self,
        business_id: &str,
        conversation_id: &str,
    ) -> Option<MessageThread> {
        let thread = self.threads.get(&key(business_id, conversation_id)).await?;
        let thread = thread.lock().await;
        Some(thread.clone())
    }

    /// Applies a delivery update to whichever loaded thread of the business
    /// holds `server_id`.
    pub async fn apply_status(
        &self,
        business_id: &str,
        server_id: &str,
        status: &MessageStatus,
        error: Option<&str>,
    ) -> bool {
        let candidates: Vec<_> = self
            .threads
            .iter()
            .filter(|(key, _)| key.0 == business_id)
            .map(|(_, thread)| thread)
            .collect();

        for thread in candidates {
            let mut thread = thread.lock().await;
            if thread.apply_status(server_id, status.clone(), error.map(str::to_string)) {
                return true;
            }
        }
        false
    }

    pub async fn len(&self) -> u64 {
        self.threads.run_pending_tasks().await;
        self.threads.entry_count()
    }
}

impl std::fmt::Debug for ConversationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationStore")
            .field("threads", &self.threads.entry_count())
            .finish()
    }
}

/// Email bodies and call details, loaded lazily when a message is opened.
///
/// Each detail is fetched at most once while cached. Concurrent callers for
/// the same id share one fetch, and a failed fetch is not cached so the next
/// caller tries again.
pub struct HydrationCache {
    emails: Cache<ThreadKey, EmailDetail>,
    calls: Cache<ThreadKey, CallDetail>,
}

fn detail_cache<V>(capacity: u64, ttl: Duration) -> Cache<ThreadKey, V>
where
    V: Clone + Send + Sync + 'static,
{
    Cache::builder().max_capacity(capacity).time_to_live(ttl).build()
}

impl HydrationCache {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        Self {
            emails: detail_cache(capacity, ttl),
            calls: detail_cache(capacity, ttl),
        }
    }

    pub async fn email<F, Fut>(
        &self,
        business_id: &str,
        message_id: &str,
        fetch: F,
    ) -> Result<EmailDetail, CrmError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<EmailDetail, CrmError>>,
    {
        self.emails
            .try_get_with(key(business_id, message_id), fetch())
            .await
            .map_err(|e| e.as_ref().clone())
    }

    pub async fn call<F, Fut>(
        &self,
        business_id: &str,
        call_id: &str,
        fetch: F,
    ) -> Result<CallDetail, CrmError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CallDetail, CrmError>>,
    {
        self.calls
            .try_get_with(key(business_id, call_id), fetch())
            .await
            .map_err(|e| e.as_ref().clone())
    }
}

impl std::fmt::Debug for HydrationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HydrationCache")
            .field("emails", &self.emails.entry_count())
            .field("calls", &self.calls.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversations::thread::PageKind;
    use crate::conversations::types::MessagePage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn store() -> ConversationStore {
        ConversationStore::new(100, Duration::from_secs(60))
    }

    fn email(id: &str) -> EmailDetail {
        EmailDetail {
            message_id: id.to_string(),
            subject: Some("Quote".to_string()),
            body: Some("<p>hi</p>".to_string()),
            from: None,
            to: Vec::new(),
            cc: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_update_loaded_skips_unloaded_threads() {
        let store = store();
        assert_eq!(store.update_loaded("biz-1", "conv-1", |_| 1).await, None);

        store
            .update("biz-1", "conv-1", |thread| {
                let ticket = thread.begin_request(PageKind::Latest);
                thread.apply_page(ticket, MessagePage::default());
            })
            .await;

        assert_eq!(store.update_loaded("biz-1", "conv-1", |_| 1).await, Some(1));
        assert!(store.snapshot("biz-2", "conv-1").await.is_none());
    }

    #[tokio::test]
    async fn test_hydration_fetches_once() {
        let cache = HydrationCache::new(100, Duration::from_secs(60));
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let detail = cache
                .email("biz-1", "em-1", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(email("em-1"))
                })
                .await
                .unwrap();
            assert_eq!(detail.subject.as_deref(), Some("Quote"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hydration_retries_after_failure() {
        let cache = HydrationCache::new(100, Duration::from_secs(60));

        let failed = cache
            .email("biz-1", "em-2", || async {
                Err(CrmError::Network("timeout".to_string()))
            })
            .await;
        assert!(failed.is_err());

        let loaded = cache
            .email("biz-1", "em-2", || async { Ok(email("em-2")) })
            .await;
        assert!(loaded.is_ok());
    }

    #[tokio::test]
    async fn test_idle_threads_are_evicted() {
        let store = ConversationStore::new(100, Duration::from_millis(20));
        store
            .update("biz-1", "conv-1", |thread| {
                let ticket = thread.begin_request(PageKind::Latest);
                thread.apply_page(ticket, MessagePage::default());
            })
            .await;
        assert!(store.snapshot("biz-1", "conv-1").await.is_some());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(store.snapshot("biz-1", "conv-1").await.is_none());
    }

    #[tokio::test]
    async fn test_thread_count_is_bounded() {
        let store = ConversationStore::new(8, Duration::from_secs(60));
        for i in 0..40 {
            store.update("biz-1", &format!("conv-{i}"), |_| ()).await;
        }
        assert!(store.len().await <= 8);
    }
}
