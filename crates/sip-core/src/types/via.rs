//! # SIP Via Header
//!
//! A single Via entry as defined in
//! [RFC 3261 Section 20.42](https://datatracker.ietf.org/doc/html/rfc3261#section-20.42).
//! Comma separated Via lines are split into one header per entry by the
//! parser, so each [`Via`] here is exactly one hop.
//!
//! ```text
//! Via: SIP/2.0/UDP pc33.atlanta.com:5060;branch=z9hG4bK776asdhds;rport
//! ```
//!
//! The `received` and `rport` parameters ([RFC 3581](https://datatracker.ietf.org/doc/html/rfc3581))
//! drive where responses are sent, see [`Via::response_addr`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::types::host_port::{split_host_port, HostPort, DEFAULT_SIP_PORT};
use crate::types::param::Params;

/// The magic cookie that marks RFC 3261 branch identifiers
pub const BRANCH_MAGIC_COOKIE: &str = "z9hG4bK";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Via {
    /// e.g. `SIP/2.0/UDP`
    pub protocol: String,
    pub host: String,
    pub port: Option<u16>,
    pub params: Params,
}

impl Via {
    /// `SIP/2.0/UDP host:port;branch=...;rport`
    pub fn udp(local: &HostPort, branch: impl Into<String>) -> Self {
        let mut params = Params::new();
        params.set("branch", Some(branch.into()));
        params.set("rport", None);
        Via {
            protocol: "SIP/2.0/UDP".to_string(),
            host: local.host.clone(),
            port: Some(local.port),
            params,
        }
    }

    pub fn branch(&self) -> Option<&str> {
        self.params.value("branch")
    }

    pub fn set_branch(&mut self, branch: impl Into<String>) {
        self.params.set("branch", Some(branch.into()));
    }

    pub fn received(&self) -> Option<&str> {
        self.params.value("received")
    }

    /// sent-by host and port as written by the sender
    pub fn sent_by(&self) -> HostPort {
        HostPort::new(self.host.clone(), self.port.unwrap_or(DEFAULT_SIP_PORT))
    }

    /// Where responses for this hop are sent.
    ///
    /// Host is `received` when present, else the sent-by host. Port is a
    /// numeric `rport` when present, else the sent-by port, else 5060.
    pub fn response_addr(&self) -> HostPort {
        let host = self
            .received()
            .map(str::to_string)
            .unwrap_or_else(|| self.host.clone());
        let rport = self
            .params
            .value("rport")
            .and_then(|p| p.parse::<u16>().ok())
            .filter(|p| *p > 0);
        HostPort::new(host, rport.or(self.port).unwrap_or(DEFAULT_SIP_PORT))
    }

    /// Record the observed source of a request on its top Via.
    ///
    /// `received` is added when the source host differs from sent-by and a
    /// valueless `rport` is filled with the source port.
    pub fn fix_received(&mut self, source: &HostPort) {
        if self.host != source.host {
            self.params.set("received", Some(source.host.clone()));
        }
        if self.params.contains("rport") && self.params.value("rport").is_none() {
            self.params.set("rport", Some(source.port.to_string()));
        }
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.protocol)?;
        if self.host.contains(':') {
            write!(f, "[{}]", self.host)?;
        } else {
            f.write_str(&self.host)?;
        }
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        write!(f, "{}", self.params)
    }
}

impl FromStr for Via {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || Error::invalid_header("Via", s);

        // sent-protocol allows LWS around the slashes
        let head_end = s.find(';').unwrap_or(s.len());
        let last_slash = s[..head_end].rfind('/').ok_or_else(invalid)?;
        let name_version: String = s[..last_slash].chars().filter(|c| !c.is_whitespace()).collect();
        if name_version.split('/').count() != 2 {
            return Err(invalid());
        }
        let (transport, rest) = s[last_slash + 1..]
            .trim_start()
            .split_once(|c: char| c.is_ascii_whitespace())
            .ok_or_else(invalid)?;

        let rest = rest.trim();
        let (sent_by, params) = match rest.split_once(';') {
            Some((hp, p)) => (hp, Params::parse(p)),
            None => (rest, Params::new()),
        };
        let (host, port) = split_host_port(sent_by).map_err(|_| invalid())?;
        Ok(Via {
            protocol: format!("{}/{}", name_version, transport).to_ascii_uppercase(),
            host,
            port,
            params,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let via: Via = "SIP/2.0/UDP pc33.atlanta.com:5066;branch=z9hG4bK776asdhds;rport"
            .parse()
            .unwrap();
        assert_eq!(via.protocol, "SIP/2.0/UDP");
        assert_eq!(via.sent_by(), HostPort::new("pc33.atlanta.com", 5066));
        assert_eq!(via.branch(), Some("z9hG4bK776asdhds"));
    }

    #[test]
    fn test_parse_with_lws_in_protocol() {
        let via: Via = "SIP  /   2.0 /UDP    192.0.2.2;branch=390skdjuw".parse().unwrap();
        assert_eq!(via.protocol, "SIP/2.0/UDP");
        assert_eq!(via.host, "192.0.2.2");
        assert!("192.0.2.2;branch=x".parse::<Via>().is_err());
    }

    #[test]
    fn test_response_addr_prefers_received_and_rport() {
        let via: Via = "SIP/2.0/UDP 10.0.0.5:5060;received=203.0.113.9;rport=40123"
            .parse()
            .unwrap();
        assert_eq!(via.response_addr(), HostPort::new("203.0.113.9", 40123));
        let via: Via = "SIP/2.0/UDP 10.0.0.5;rport".parse().unwrap();
        assert_eq!(via.response_addr(), HostPort::new("10.0.0.5", 5060));
    }

    #[test]
    fn test_fix_received() {
        let mut via: Via = "SIP/2.0/UDP 10.0.0.5:5060;branch=z9hG4bKx;rport".parse().unwrap();
        via.fix_received(&HostPort::new("203.0.113.9", 40123));
        assert_eq!(
            via.to_string(),
            "SIP/2.0/UDP 10.0.0.5:5060;branch=z9hG4bKx;rport=40123;received=203.0.113.9"
        );

        let mut same: Via = "SIP/2.0/UDP 10.0.0.5:5060;branch=z9hG4bKx".parse().unwrap();
        same.fix_received(&HostPort::new("10.0.0.5", 5060));
        assert!(same.received().is_none());
    }
}
