//! # Client-Side Tenant Filter
//!
//! The engine instance is shared by two isolated environments and does not
//! filter fetch-and-lock results by tenant itself, so the relay enforces
//! isolation after the fetch: tasks belonging to a foreign tenant are
//! discarded locally, never re-queued. Their locks simply expire engine-side.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::debug;

use super::types::{ExternalTask, FetchAndLockRequest};
use super::{EngineResult, TaskSource};

pub struct TenantFilter<S> {
    inner: S,
    tenant_id: Option<String>,
    discarded: AtomicU64,
}

impl<S> TenantFilter<S> {
    pub fn new(inner: S, tenant_id: Option<String>) -> Self {
        Self {
            inner,
            tenant_id,
            discarded: AtomicU64::new(0),
        }
    }

    /// Total foreign-tenant tasks discarded since startup.
    pub fn discarded_count(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    fn accepts(&self, task: &ExternalTask) -> bool {
        match &self.tenant_id {
            None => true,
            Some(tenant) => task.tenant_id.as_deref() == Some(tenant.as_str()),
        }
    }
}

#[async_trait]
impl<S: TaskSource> TaskSource for TenantFilter<S> {
    async fn fetch_and_lock(
        &self,
        request: &FetchAndLockRequest,
    ) -> EngineResult<Vec<ExternalTask>> {
        let mut tasks = self.inner.fetch_and_lock(request).await?;
        if self.tenant_id.is_none() {
            return Ok(tasks);
        }

        let fetched = tasks.len();
        tasks.retain(|task| {
            let keep = self.accepts(task);
            if !keep {
                debug!(
                    task_id = %task.id,
                    topic = %task.topic_name,
                    task_tenant = task.tenant_id.as_deref().unwrap_or("<none>"),
                    "Discarding foreign-tenant task"
                );
            }
            keep
        });

        let dropped = (fetched - tasks.len()) as u64;
        if dropped > 0 {
            self.discarded.fetch_add(dropped, Ordering::Relaxed);
        }
        Ok(tasks)
    }
}
