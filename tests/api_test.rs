//! Integration tests for the public API

use tlstracker::{CheckError, HostnameError, ProbeContext, Prober};

#[test]
fn test_public_api_compiles() {
    // Not run (needs the network); only checks the signatures line up
    async fn check_certificate(hostname: &str) -> Result<i64, CheckError> {
        let ctx = ProbeContext::with_timeout(std::time::Duration::from_secs(10));
        let cert = Prober::new().probe(&ctx, hostname).await?;
        Ok(cert.days_remaining)
    }

    let _ = check_certificate;
}

#[test]
fn test_error_types_are_public() {
    fn describe(err: CheckError) -> String {
        match err {
            CheckError::InvalidHostname { hostname, source } => {
                format!("Invalid {:?}: {}", hostname, source)
            }
            CheckError::Resolution { hostname, .. } => format!("DNS failed for {}", hostname),
            CheckError::Connection { address, .. } => format!("Connection failed to {}", address),
            CheckError::Handshake { details, .. } => format!("Handshake failed: {}", details),
            CheckError::NoCertificate { hostname } => format!("No certificate from {}", hostname),
            CheckError::InvalidCertificate { hostname, details } => {
                format!("Bad certificate from {}: {}", hostname, details)
            }
            CheckError::Cancelled => "Cancelled".to_string(),
            CheckError::Tls(e) => format!("OpenSSL error: {}", e),
        }
    }

    let msg = describe(CheckError::InvalidHostname {
        hostname: "bad..name".to_string(),
        source: HostnameError::InvalidFormat {
            reason: "contains an empty label".to_string(),
        },
    });
    assert!(msg.contains("bad..name"));
    assert!(msg.contains("empty label"));
}

#[test]
fn test_validator_order() {
    assert_eq!(tlstracker::validate(""), Err(HostnameError::Empty));
    assert!(matches!(
        tlstracker::validate(&"a".repeat(300)),
        Err(HostnameError::TooLong { len: 300 })
    ));
    assert!(tlstracker::validate("example.com").is_ok());
}
