//! Hostname validation.
//!
//! [`validate`] is a pure syntactic check and never touches the network.
//! [`validate_resolvable`] additionally resolves the name and is meant for
//! the moment a domain is first registered; repeat checks accept a stored
//! name verbatim.

use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Serialize, Serializer};
use tracing::warn;
use url::Url;

use crate::error::{CheckError, HostnameError};
use crate::probe::HTTPS_PORT;

/// Maximum total length of a hostname.
pub const MAX_HOSTNAME_LEN: usize = 253;
/// Maximum length of a single label.
pub const MAX_LABEL_LEN: usize = 63;

/// Checks that `name` is a syntactically valid hostname.
///
/// Rules are applied in order and the first failure wins:
///
/// 1. empty or whitespace-only input is [`HostnameError::Empty`]
/// 2. more than 253 bytes is [`HostnameError::TooLong`]
/// 3. anything breaking the label grammar is [`HostnameError::InvalidFormat`]
pub fn validate(name: &str) -> Result<(), HostnameError> {
    if name.trim().is_empty() {
        return Err(HostnameError::Empty);
    }
    if name.len() > MAX_HOSTNAME_LEN {
        return Err(HostnameError::TooLong { len: name.len() });
    }
    if name.starts_with('.') || name.ends_with('.') {
        return Err(HostnameError::format("must not start or end with '.'"));
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(HostnameError::format("must not start or end with '-'"));
    }
    if name.contains("..") {
        return Err(HostnameError::format("contains an empty label"));
    }
    for label in name.split('.') {
        validate_label(label)?;
    }
    Ok(())
}

fn validate_label(label: &str) -> Result<(), HostnameError> {
    if label.is_empty() || label.len() > MAX_LABEL_LEN {
        return Err(HostnameError::format(format!(
            "label {:?} must be 1-{} characters",
            label, MAX_LABEL_LEN
        )));
    }
    if let Some(c) = label
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-'))
    {
        return Err(HostnameError::format(format!(
            "invalid character {:?} in label {:?}",
            c, label
        )));
    }
    if label.starts_with('-') || label.ends_with('-') {
        return Err(HostnameError::format(format!(
            "label {:?} must not start or end with '-'",
            label
        )));
    }
    Ok(())
}

/// Validates `name` and checks that it resolves to at least one address.
pub async fn validate_resolvable(name: &str) -> Result<Hostname, CheckError> {
    let hostname = Hostname::parse(name).map_err(|source| CheckError::InvalidHostname {
        hostname: name.to_string(),
        source,
    })?;

    let resolution = |source: io::Error| CheckError::Resolution {
        hostname: hostname.to_string(),
        source: Arc::new(source),
    };
    let found = tokio::net::lookup_host((hostname.as_str(), HTTPS_PORT))
        .await
        .map_err(resolution)?
        .next()
        .is_some();
    if !found {
        return Err(resolution(io::Error::new(
            io::ErrorKind::NotFound,
            "no addresses returned",
        )));
    }
    Ok(hostname)
}

/// Accepts either a bare hostname or an `https://host[:port]/...` URL and
/// returns the validated host part. Checks always dial the prober's port, so
/// an explicit non-443 port is dropped with a warning.
pub fn normalize_input(input: &str) -> Result<Hostname, HostnameError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(HostnameError::Empty);
    }
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };
    let url = Url::parse(&with_scheme)
        .map_err(|e| HostnameError::format(format!("invalid URL format: {}", e)))?;
    let host = url
        .host_str()
        .ok_or_else(|| HostnameError::format("no host found in URL"))?;
    let hostname = Hostname::parse(host)?;
    if let Some(port) = url.port() {
        warn!(hostname = %hostname, port, "ignoring explicit port; checks use the prober's port");
    }
    Ok(hostname)
}

/// A hostname that passed [`validate`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hostname(String);

impl Hostname {
    pub fn parse(name: &str) -> Result<Self, HostnameError> {
        validate(name)?;
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Hostname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Hostname {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Hostname {
    type Err = HostnameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Hostname {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}
