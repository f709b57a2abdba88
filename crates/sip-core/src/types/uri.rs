//! # SIP URI
//!
//! `scheme:[user[:password]@]host[:port][;params][?headers]` as described in
//! [RFC 3261 Section 19.1](https://datatracker.ietf.org/doc/html/rfc3261#section-19.1).
//!
//! ```rust
//! use b2bua_sip_core::types::Uri;
//!
//! let uri: Uri = "sip:alice@192.0.2.10:5062;lr".parse().unwrap();
//! assert_eq!(uri.user.as_deref(), Some("alice"));
//! assert!(uri.is_loose_routing());
//! assert_eq!(uri.host_port().to_string(), "192.0.2.10:5062");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::types::host_port::{split_host_port, HostPort, DEFAULT_SIP_PORT};
use crate::types::param::Params;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Uri {
    pub scheme: String,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Host without IPv6 brackets
    pub host: String,
    pub port: Option<u16>,
    pub params: Params,
    pub headers: Option<String>,
}

impl Uri {
    /// `sip:user@host[:port]`
    pub fn sip(user: Option<&str>, host: impl Into<String>, port: Option<u16>) -> Self {
        Uri {
            scheme: "sip".to_string(),
            user: user.map(str::to_string),
            password: None,
            host: host.into(),
            port,
            params: Params::new(),
            headers: None,
        }
    }

    /// `lr` parameter present
    pub fn is_loose_routing(&self) -> bool {
        self.params.contains("lr")
    }

    /// Transport destination for requests sent to this URI
    pub fn host_port(&self) -> HostPort {
        let host = self
            .params
            .value("maddr")
            .map(str::to_string)
            .unwrap_or_else(|| self.host.clone());
        HostPort::new(host, self.port.unwrap_or(DEFAULT_SIP_PORT))
    }

    /// Copy without URI parameters and headers, used when a route entry
    /// becomes a Request-URI under strict routing
    pub fn stripped(&self) -> Uri {
        Uri { params: Params::new(), headers: None, ..self.clone() }
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.scheme)?;
        if let Some(user) = &self.user {
            f.write_str(user)?;
            if let Some(password) = &self.password {
                write!(f, ":{}", password)?;
            }
            f.write_str("@")?;
        }
        if self.host.contains(':') {
            write!(f, "[{}]", self.host)?;
        } else {
            f.write_str(&self.host)?;
        }
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        write!(f, "{}", self.params)?;
        if let Some(headers) = &self.headers {
            write!(f, "?{}", headers)?;
        }
        Ok(())
    }
}

impl FromStr for Uri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (scheme, rest) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidUri(s.to_string()))?;
        if scheme.is_empty() || !scheme.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'+') {
            return Err(Error::InvalidUri(s.to_string()));
        }

        let (rest, headers) = match rest.split_once('?') {
            Some((r, h)) => (r, Some(h.to_string())),
            None => (rest, None),
        };

        let (userinfo, hostpart) = match rest.rfind('@') {
            Some(pos) => (Some(&rest[..pos]), &rest[pos + 1..]),
            None => (None, rest),
        };
        let (user, password) = match userinfo {
            Some(info) => match info.split_once(':') {
                Some((u, p)) => (Some(u.to_string()), Some(p.to_string())),
                None => (Some(info.to_string()), None),
            },
            None => (None, None),
        };

        let (hostport, params) = match hostpart.split_once(';') {
            Some((hp, p)) => (hp, Params::parse(p)),
            None => (hostpart, Params::new()),
        };
        let (host, port) = split_host_port(hostport).map_err(|_| Error::InvalidUri(s.to_string()))?;

        Ok(Uri {
            scheme: scheme.to_ascii_lowercase(),
            user,
            password,
            host,
            port,
            params,
            headers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_full_form() {
        let text = "sip:bob:secret@[2001:db8::2]:5070;transport=udp;lr?subject=hi";
        let uri: Uri = text.parse().unwrap();
        assert_eq!(uri.password.as_deref(), Some("secret"));
        assert_eq!(uri.host, "2001:db8::2");
        assert_eq!(uri.port, Some(5070));
        assert_eq!(uri.headers.as_deref(), Some("subject=hi"));
        assert_eq!(uri.to_string(), text);
    }

    #[test]
    fn test_host_port_defaults_and_maddr() {
        let uri: Uri = "sip:proxy.example.com".parse().unwrap();
        assert_eq!(uri.host_port(), HostPort::new("proxy.example.com", 5060));
        let uri: Uri = "sip:x@example.com;maddr=192.0.2.7".parse().unwrap();
        assert_eq!(uri.host_port().host, "192.0.2.7");
    }

    #[test]
    fn test_rejects_garbage() {
        assert!("not a uri".parse::<Uri>().is_err());
        assert!("sip:".parse::<Uri>().is_err());
    }

    #[test]
    fn test_stripped() {
        let uri: Uri = "sip:10.0.0.1;lr;ftag=1?h=v".parse().unwrap();
        assert_eq!(uri.stripped().to_string(), "sip:10.0.0.1");
    }
}
