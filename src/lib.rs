//! Concurrent TLS certificate expiry tracking.
//!
//! The crate is built around a bounded [`WorkerPool`] that probes hostnames
//! over TLS and publishes one [`CheckResult`] per [`Task`], and a
//! [`CertService`] that owns the pool's lifecycle and dispatches every result
//! to a swappable handler.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tlstracker::{CertService, CheckResult, DomainId, UserId};
//!
//! # async fn run() {
//! let service = CertService::new();
//! service.set_result_handler(Arc::new(|result: &CheckResult| {
//!     if let Some(cert) = result.certificate() {
//!         println!("{}: {} days left", cert.hostname, cert.days_remaining);
//!     }
//! }));
//! service.start();
//! service.check_domain("example.com", DomainId(1), UserId(1)).await;
//! service.stop().await;
//! service.join_drain().await;
//! # }
//! ```

pub mod config;
pub mod error;
pub mod hostname;
pub mod monitor;
pub mod pool;
pub mod probe;
pub mod service;
pub mod store;

pub use error::{CheckError, HostnameError, MonitorError, StoreError};
pub use hostname::{validate, validate_resolvable, Hostname};
pub use monitor::DomainMonitor;
pub use pool::{CheckResult, PoolOptions, PoolState, Task, WorkerPool};
pub use probe::{days_remaining, Certificate, ProbeContext, Prober};
pub use service::{default_handler, CertService, ResultHandler};
pub use store::{DomainId, DomainRecord, DomainStore, MemoryStore, UserId};
