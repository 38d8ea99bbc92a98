//! Connection descriptors for CouchDB servers.
//!
//! A server is addressed by a single URL of the form
//! `scheme://[user:password@]host[:port]/`. Credentials embedded in the URL
//! are the only supported authentication mechanism.

use std::fmt;

use reqwest::Url;

use crate::error::{MigrateError, Result};

/// Port used when the URL does not name one.
pub const DEFAULT_PORT: u16 = 5984;

/// A decomposed CouchDB server URL.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl ConnectionDescriptor {
    /// Parses a connection URL.
    pub fn parse(url: &str) -> Result<Self> {
        let parsed = Url::parse(url.trim())
            .map_err(|e| MigrateError::InvalidUrl(format!("{}: {}", redact(url), e)))?;

        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| MigrateError::InvalidUrl(format!("{}: missing host", redact(url))))?
            .to_string();

        // Url hides a port equal to the scheme default, so look at the text.
        let port = match parsed.port() {
            Some(port) => port,
            None if has_explicit_port(url.trim()) => {
                parsed.port_or_known_default().unwrap_or(DEFAULT_PORT)
            }
            None => DEFAULT_PORT,
        };

        Ok(Self {
            scheme: parsed.scheme().to_string(),
            host,
            port,
            username: decode(parsed.username()),
            password: decode(parsed.password().unwrap_or_default()),
        })
    }

    /// Base URL without credentials or trailing slash, e.g. `http://db:5984`.
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    /// Returns the basic-auth credentials, if a username is set.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.username.is_empty() {
            None
        } else {
            Some((self.username.as_str(), self.password.as_str()))
        }
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.username.is_empty() {
            write!(f, "{}", self.base_url())
        } else {
            write!(
                f,
                "{}://{}:****@{}:{}",
                self.scheme, self.username, self.host, self.port
            )
        }
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"****")
            .finish()
    }
}

/// True if the authority of `url` spells out a port, e.g. `host:443`.
fn has_explicit_port(url: &str) -> bool {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = rest.split(|c: char| matches!(c, '/' | '?' | '#')).next().unwrap_or_default();
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, hp)| hp);
    let after_host = match host_port.rfind(']') {
        Some(end) => &host_port[end + 1..],
        None => host_port,
    };
    after_host
        .rsplit_once(':')
        .is_some_and(|(_, port)| !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()))
}

fn decode(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

/// Masks the password portion of a URL for display.
pub fn redact(url: &str) -> String {
    let Some(scheme_end) = url.find("://").map(|i| i + 3) else {
        return url.to_string();
    };
    let (prefix, remainder) = url.split_at(scheme_end);
    let authority_end = remainder.find('/').unwrap_or(remainder.len());
    let Some(at) = remainder[..authority_end].rfind('@') else {
        return url.to_string();
    };
    match remainder[..at].split_once(':') {
        Some((user, _)) => format!("{prefix}{user}:****@{}", &remainder[at + 1..]),
        None => url.to_string(),
    }
}
