//! Leaf certificate probing over TLS.
//!
//! A [`Prober`] dials `hostname:443`, runs a TLS handshake with SNI set to
//! the hostname and reads the expiry of the leaf certificate. Every network
//! step is raced against a [`ProbeContext`], so a hung remote host costs at
//! most the context's deadline.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, Utc};
use openssl::asn1::{Asn1Time, Asn1TimeRef};
use openssl::error::ErrorStack;
use openssl::nid::Nid;
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use openssl::x509::{X509NameRef, X509Ref};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_openssl::SslStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::CheckError;
use crate::hostname::Hostname;

/// Port every check dials unless the prober is told otherwise.
pub const HTTPS_PORT: u16 = 443;

const SECONDS_PER_DAY: i64 = 86_400;

/// Expiry information for one host's leaf certificate.
#[derive(Debug, Clone, Serialize)]
pub struct Certificate {
    pub hostname: Hostname,
    pub expires_at: DateTime<Utc>,
    /// Whole days until `expires_at`, negative once expired
    pub days_remaining: i64,
    pub issuer: Option<String>,
}

impl Certificate {
    pub fn is_expired(&self) -> bool {
        self.days_remaining < 0
    }
}

/// Whole days from `now` until `expires_at`, rounded down.
///
/// An already-expired certificate yields a negative value.
pub fn days_remaining(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (expires_at - now).num_seconds().div_euclid(SECONDS_PER_DAY)
}

/// Converts the `notAfter` of `hostname`'s certificate into a UTC timestamp.
pub fn certificate_expiry(hostname: &str, cert: &X509Ref) -> Result<DateTime<Utc>, CheckError> {
    let not_after = cert.not_after();
    asn1_to_utc(not_after)?.ok_or_else(|| CheckError::InvalidCertificate {
        hostname: hostname.to_string(),
        details: format!("expiry out of range: {}", not_after),
    })
}

fn asn1_to_utc(time: &Asn1TimeRef) -> Result<Option<DateTime<Utc>>, ErrorStack> {
    let epoch = Asn1Time::from_unix(0)?;
    let diff = epoch.diff(time)?;
    let secs = i64::from(diff.days) * SECONDS_PER_DAY + i64::from(diff.secs);
    Ok(DateTime::from_timestamp(secs, 0))
}

fn common_name(name: &X509NameRef) -> Option<String> {
    name.entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| entry.data().to_string().ok())
}

/// Why a step raced against a [`ProbeContext`] did not finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    Cancelled,
    DeadlineExceeded,
}

/// Cancellation signal plus an optional deadline.
///
/// Children inherit their parent's cancellation and never outlive its
/// deadline: the effective deadline is the earlier of the two.
#[derive(Debug, Clone, Default)]
pub struct ProbeContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl ProbeContext {
    /// A context that is never cancelled and has no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// Derives a context cancelled with this one and bounded by `timeout`.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let own = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) => parent.min(own),
            None => own,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancelled, or past the deadline.
    pub fn is_done(&self) -> bool {
        self.is_cancelled() || self.deadline.is_some_and(|d| d <= Instant::now())
    }

    /// Runs `fut` until it completes, the context is cancelled, or the
    /// deadline passes, whichever comes first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Interrupted> {
        let deadline = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Interrupted::Cancelled),
            _ = deadline => Err(Interrupted::DeadlineExceeded),
            out = fut => Ok(out),
        }
    }
}

/// Fetches leaf certificates.
#[derive(Debug, Clone)]
pub struct Prober {
    port: u16,
    verify_peer: bool,
}

impl Default for Prober {
    fn default() -> Self {
        Self {
            port: HTTPS_PORT,
            verify_peer: false,
        }
    }
}

impl Prober {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dial `port` instead of 443.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Verify the peer chain and hostname during the handshake.
    ///
    /// Off by default so expired certificates are still reported with a
    /// negative `days_remaining` instead of failing the handshake.
    pub fn verify_peer(mut self, verify: bool) -> Self {
        self.verify_peer = verify;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn connector(&self) -> Result<SslConnector, CheckError> {
        let mut builder = SslConnector::builder(SslMethod::tls_client())?;
        if !self.verify_peer {
            builder.set_verify(SslVerifyMode::NONE);
        }
        Ok(builder.build())
    }

    /// Checks `hostname` and returns its leaf certificate's expiry.
    ///
    /// Validation runs before anything else, so a malformed name is always
    /// reported as [`CheckError::InvalidHostname`]. A context that is already
    /// done yields [`CheckError::Cancelled`] without dialling.
    pub async fn probe(
        &self,
        ctx: &ProbeContext,
        hostname: &str,
    ) -> Result<Certificate, CheckError> {
        let hostname = Hostname::parse(hostname).map_err(|source| CheckError::InvalidHostname {
            hostname: hostname.to_string(),
            source,
        })?;
        if ctx.is_done() {
            return Err(CheckError::Cancelled);
        }

        let address = format!("{}:{}", hostname, self.port);
        debug!(hostname = %hostname, port = self.port, "starting certificate check");

        let tcp = match ctx
            .run(TcpStream::connect((hostname.as_str(), self.port)))
            .await
        {
            Ok(Ok(tcp)) => tcp,
            Ok(Err(e)) => return Err(CheckError::connection(address, e)),
            Err(Interrupted::Cancelled) => return Err(CheckError::Cancelled),
            Err(Interrupted::DeadlineExceeded) => {
                return Err(CheckError::connection(
                    address,
                    io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
                ))
            }
        };
        debug!(hostname = %hostname, "TCP connection established");

        let ssl = self
            .connector()?
            .configure()?
            .use_server_name_indication(true)
            .verify_hostname(self.verify_peer)
            .into_ssl(hostname.as_str())?;
        let mut stream = SslStream::new(ssl, tcp)?;

        let handshake = |details: String| CheckError::Handshake {
            hostname: hostname.to_string(),
            details,
        };
        match ctx.run(Pin::new(&mut stream).connect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(handshake(e.to_string())),
            Err(Interrupted::Cancelled) => return Err(CheckError::Cancelled),
            Err(Interrupted::DeadlineExceeded) => {
                return Err(handshake("handshake timed out".to_string()))
            }
        }
        debug!(hostname = %hostname, "TLS handshake completed");

        let leaf = stream
            .ssl()
            .peer_certificate()
            .ok_or_else(|| CheckError::NoCertificate {
                hostname: hostname.to_string(),
            })?;
        let expires_at = certificate_expiry(hostname.as_str(), &leaf)?;
        let issuer = common_name(leaf.issuer_name());

        // close_notify is best-effort; the stream is dropped either way
        let _ = ctx.run(AsyncWriteExt::shutdown(&mut stream)).await;

        let days_remaining = days_remaining(expires_at, Utc::now());
        debug!(
            hostname = %hostname,
            expires_at = %expires_at,
            days_remaining,
            issuer = issuer.as_deref().unwrap_or("unknown"),
            "certificate check completed"
        );

        Ok(Certificate {
            hostname,
            expires_at,
            days_remaining,
            issuer,
        })
    }
}
