use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Semaphore;

use crate::models::{CoreError, CoreErrorKind, CoreResult, Subsystem};

/// Single-permit lock shared by every task that names it, e.g. a lock around
/// version-control checkouts.
#[derive(Debug)]
pub struct ExclusiveResource {
    name: String,
    permit: Semaphore,
    held: AtomicBool,
}

impl ExclusiveResource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            permit: Semaphore::new(1),
            held: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits until the sole permit is free and takes it.
    pub async fn acquire(&self) -> CoreResult<()> {
        let permit = self.permit.acquire().await.map_err(|_| {
            CoreError::new(
                Subsystem::Resources,
                CoreErrorKind::Internal,
                format!("resource '{}' was closed", self.name),
            )
        })?;
        permit.forget();
        self.held.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn release(&self) -> CoreResult<()> {
        if !self.held.swap(false, Ordering::SeqCst) {
            return Err(CoreError::new(
                Subsystem::Resources,
                CoreErrorKind::InvariantViolation,
                format!("resource '{}' released without being held", self.name),
            ));
        }
        self.permit.add_permits(1);
        Ok(())
    }

    /// Acquires the permit and hands back a guard that releases it on drop.
    pub async fn lease(self: &Arc<Self>) -> CoreResult<ResourceLease> {
        self.acquire().await?;
        Ok(ResourceLease {
            resource: Arc::clone(self),
        })
    }

    /// 1 when free, 0 when held. Only a snapshot.
    pub fn len(&self) -> usize {
        self.permit.available_permits()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
pub struct ResourceLease {
    resource: Arc<ExclusiveResource>,
}

impl ResourceLease {
    pub fn name(&self) -> &str {
        self.resource.name()
    }
}

impl Drop for ResourceLease {
    fn drop(&mut self) {
        if let Err(error) = self.resource.release() {
            tracing::error!(
                resource = %self.resource.name(),
                message = %error.message,
                "failed to release resource lease"
            );
        }
    }
}
