use std::collections::HashMap;

use lazy_static::lazy_static;
use prometheus::{labels, register_gauge, Gauge};
use tracing::{debug, warn};

use tlstracker::CheckResult;

lazy_static! {
    static ref TLSTRACKER_DAYS_BEFORE_EXPIRED: Gauge =
        register_gauge!("tlstracker_days_before_expired", "days before expiration")
            .expect("register tlstracker_days_before_expired");
    static ref TLSTRACKER_CHECK_FAILED: Gauge = register_gauge!(
        "tlstracker_check_failed",
        "1 when the last certificate check failed"
    )
    .expect("register tlstracker_check_failed");
}

/// Grouping labels for one pushed result.
fn grouping(result: &CheckResult) -> HashMap<String, String> {
    let mut labels = labels! {
        "instance".to_owned() => "tlstracker".to_owned(),
        "job".to_owned() => "tlstracker".to_owned(),
        "host".to_owned() => result.task.hostname.to_owned(),
        "domain_id".to_owned() => result.task.domain_id.to_string(),
    };
    match &result.outcome {
        Ok(cert) => {
            labels.insert("expired".to_owned(), cert.is_expired().to_string());
            labels.insert(
                "issuer".to_owned(),
                cert.issuer.clone().unwrap_or_else(|| "unknown".to_owned()),
            );
        }
        Err(_) => {
            labels.insert("expired".to_owned(), "unknown".to_owned());
        }
    }
    labels
}

/// Pushes one set of gauges per result to the gateway at `address`.
///
/// Blocking; call it off the async runtime. Returns the number of failed
/// pushes.
pub fn push_results(results: &[CheckResult], address: &str) -> usize {
    let url = format!("{}/metrics/job", address.trim_end_matches('/'));
    let mut failures = 0;
    for result in results {
        match &result.outcome {
            Ok(cert) => {
                TLSTRACKER_DAYS_BEFORE_EXPIRED.set(cert.days_remaining as f64);
                TLSTRACKER_CHECK_FAILED.set(0.0);
            }
            Err(_) => {
                TLSTRACKER_DAYS_BEFORE_EXPIRED.set(0.0);
                TLSTRACKER_CHECK_FAILED.set(1.0);
            }
        }

        let pushed = prometheus::push_metrics(
            "tlstracker",
            grouping(result),
            &url,
            prometheus::gather(),
            None,
        );
        match pushed {
            Ok(()) => debug!(hostname = %result.task.hostname, "metrics pushed"),
            Err(e) => {
                failures += 1;
                warn!(hostname = %result.task.hostname, error = %e, "failed to push metrics to prometheus");
            }
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use tlstracker::{CheckError, DomainId, Task, UserId};

    #[test]
    fn test_grouping_labels_for_failure() {
        let result = CheckResult {
            task: Task::new("example.com", DomainId(4), UserId(1)),
            outcome: Err(CheckError::Cancelled),
            checked_at: chrono::Utc::now(),
        };
        let labels = grouping(&result);
        assert_eq!(labels["host"], "example.com");
        assert_eq!(labels["domain_id"], "4");
        assert_eq!(labels["expired"], "unknown");
        assert!(!labels.contains_key("issuer"));
    }
}
