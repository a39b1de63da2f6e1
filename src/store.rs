//! Domain records and the storage seam.
//!
//! The checking core only ever writes through [`DomainStore::record_check`];
//! [`MemoryStore`] is the in-process implementation used by the CLI and the
//! tests.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::pool::CheckResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DomainId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub u64);

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A tracked domain and the outcome of its latest check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainRecord {
    pub id: DomainId,
    pub user_id: UserId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// Expiry from the last successful check
    pub expires_at: Option<DateTime<Utc>>,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub is_active: bool,
}

pub trait DomainStore: Send + Sync {
    fn create(&self, user_id: UserId, name: &str) -> Result<DomainRecord, StoreError>;

    fn list_by_owner(&self, user_id: UserId) -> Result<Vec<DomainRecord>, StoreError>;

    fn get(&self, id: DomainId) -> Result<DomainRecord, StoreError>;

    /// Stores the outcome of one check.
    ///
    /// A success overwrites the expiry and clears the last error. A failure
    /// keeps the previous expiry and only sets the last error. Both update
    /// `last_checked`. Applying the same input twice is harmless.
    fn record_check(
        &self,
        id: DomainId,
        expires_at: Option<DateTime<Utc>>,
        error: Option<String>,
        checked_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    fn delete(&self, id: DomainId) -> Result<(), StoreError>;
}

/// Writes `result` to `store` through [`DomainStore::record_check`].
pub fn record_result<S: DomainStore + ?Sized>(
    store: &S,
    result: &CheckResult,
) -> Result<(), StoreError> {
    match &result.outcome {
        Ok(cert) => store.record_check(
            result.task.domain_id,
            Some(cert.expires_at),
            None,
            result.checked_at,
        ),
        Err(e) => store.record_check(
            result.task.domain_id,
            None,
            Some(e.to_string()),
            result.checked_at,
        ),
    }
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    domains: BTreeMap<DomainId, DomainRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DomainStore for MemoryStore {
    fn create(&self, user_id: UserId, name: &str) -> Result<DomainRecord, StoreError> {
        if user_id.0 == 0 {
            return Err(StoreError::InvalidUser);
        }
        let mut inner = self.inner.write();
        if inner
            .domains
            .values()
            .any(|d| d.user_id == user_id && d.name == name)
        {
            return Err(StoreError::Duplicate {
                user_id,
                name: name.to_string(),
            });
        }
        inner.next_id += 1;
        let record = DomainRecord {
            id: DomainId(inner.next_id),
            user_id,
            name: name.to_string(),
            created_at: Utc::now(),
            expires_at: None,
            last_checked: None,
            last_error: None,
            is_active: true,
        };
        inner.domains.insert(record.id, record.clone());
        Ok(record)
    }

    fn list_by_owner(&self, user_id: UserId) -> Result<Vec<DomainRecord>, StoreError> {
        Ok(self
            .inner
            .read()
            .domains
            .values()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect())
    }

    fn get(&self, id: DomainId) -> Result<DomainRecord, StoreError> {
        self.inner
            .read()
            .domains
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    fn record_check(
        &self,
        id: DomainId,
        expires_at: Option<DateTime<Utc>>,
        error: Option<String>,
        checked_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let record = inner.domains.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        record.last_checked = Some(checked_at);
        match (expires_at, error) {
            (_, Some(error)) => record.last_error = Some(error),
            (expires_at, None) => {
                if expires_at.is_some() {
                    record.expires_at = expires_at;
                }
                record.last_error = None;
            }
        }
        Ok(())
    }

    fn delete(&self, id: DomainId) -> Result<(), StoreError> {
        self.inner
            .write()
            .domains
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }
}
