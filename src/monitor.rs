//! Tracks a user's domains: registration, removal and scheduled checks.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::MonitorError;
use crate::hostname::validate_resolvable;
use crate::pool::{CheckResult, Task};
use crate::service::{default_handler, CertService, ResultHandler};
use crate::store::{record_result, DomainId, DomainRecord, DomainStore, UserId};

pub struct DomainMonitor<S> {
    service: CertService,
    store: Arc<S>,
}

fn persisting_handler<S: DomainStore + 'static>(store: Arc<S>, log: bool) -> ResultHandler {
    Arc::new(move |result: &CheckResult| {
        if log {
            default_handler(result);
        }
        if let Err(e) = record_result(store.as_ref(), result) {
            warn!(
                domain_id = %result.task.domain_id,
                error = %e,
                "failed to record check result"
            );
        }
    })
}

impl<S: DomainStore + 'static> DomainMonitor<S> {
    pub fn new(service: CertService, store: Arc<S>) -> Self {
        Self { service, store }
    }

    pub fn service(&self) -> &CertService {
        &self.service
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Starts the service with a handler that persists every result.
    pub fn start(&self) {
        self.service
            .set_result_handler(persisting_handler(Arc::clone(&self.store), true));
        self.service.start();
    }

    /// Stops the service and waits until every result has been recorded.
    pub async fn stop(&self) {
        self.service.stop().await;
        self.service.join_drain().await;
    }

    /// Registers `name` for `user_id` and schedules its first check.
    ///
    /// The name must be well-formed and resolvable.
    pub async fn add_domain(&self, user_id: UserId, name: &str) -> Result<DomainRecord, MonitorError> {
        let hostname = validate_resolvable(name).await?;
        let record = self.store.create(user_id, hostname.as_str())?;
        info!(domain_id = %record.id, hostname = %hostname, "domain added");

        if !self
            .service
            .check_domain(record.name.clone(), record.id, user_id)
            .await
        {
            warn!(domain_id = %record.id, "initial check not scheduled");
        }
        Ok(record)
    }

    pub fn list_domains(&self, user_id: UserId) -> Result<Vec<DomainRecord>, MonitorError> {
        Ok(self.store.list_by_owner(user_id)?)
    }

    pub fn remove_domain(&self, id: DomainId) -> Result<(), MonitorError> {
        self.store.delete(id)?;
        info!(domain_id = %id, "domain removed");
        Ok(())
    }

    /// Schedules a check of a stored domain. The stored name is used as is.
    pub async fn check_domain(&self, id: DomainId) -> Result<(), MonitorError> {
        let record = self.store.get(id)?;
        if self
            .service
            .check_domain(record.name, record.id, record.user_id)
            .await
        {
            Ok(())
        } else {
            Err(MonitorError::NotRunning)
        }
    }

    /// Checks every active domain of `user_id` and returns once all results
    /// have been recorded.
    pub async fn check_all(&self, user_id: UserId) -> Result<Vec<CheckResult>, MonitorError> {
        if !self.service.is_started() {
            return Err(MonitorError::NotRunning);
        }
        let tasks: Vec<Task> = self
            .store
            .list_by_owner(user_id)?
            .into_iter()
            .filter(|d| d.is_active)
            .map(|d| Task::new(d.name, d.id, d.user_id))
            .collect();
        let handler = persisting_handler(Arc::clone(&self.store), false);
        let results = self.service.check_batch(tasks, handler).await;
        info!(
            user_id = %user_id,
            checked = results.len(),
            failed = results.iter().filter(|r| !r.is_ok()).count(),
            "bulk check completed"
        );
        Ok(results)
    }
}
