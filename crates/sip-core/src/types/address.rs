//! Name-addr / addr-spec values used by From, To, Contact, Route and
//! Record-Route headers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::types::param::Params;
use crate::types::uri::Uri;

/// `["Display Name"] <uri>;params` or `uri;params`
///
/// Header parameters such as `tag` are kept separate from URI parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub display_name: Option<String>,
    pub uri: Uri,
    pub params: Params,
}

impl Address {
    pub fn new(uri: Uri) -> Self {
        Address { display_name: None, uri, params: Params::new() }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn tag(&self) -> Option<&str> {
        self.params.value("tag")
    }

    pub fn set_tag(&mut self, tag: impl Into<String>) {
        self.params.set("tag", Some(tag.into()));
    }

    pub fn remove_tag(&mut self) {
        self.params.remove("tag");
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.display_name {
            write!(f, "\"{}\" ", name.replace('\\', "\\\\").replace('"', "\\\""))?;
        }
        write!(f, "<{}>{}", self.uri, self.params)
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let Some(lt) = find_unquoted(s, '<') else {
            // addr-spec: everything after the first ';' belongs to the header
            let (uri, params) = match s.split_once(';') {
                Some((u, p)) => (u, Params::parse(p)),
                None => (s, Params::new()),
            };
            return Ok(Address { display_name: None, uri: uri.parse()?, params });
        };

        let gt = s[lt..]
            .find('>')
            .map(|pos| lt + pos)
            .ok_or_else(|| Error::InvalidUri(s.to_string()))?;
        let display = s[..lt].trim();
        let display_name = if display.is_empty() {
            None
        } else {
            Some(unquote(display))
        };
        Ok(Address {
            display_name,
            uri: s[lt + 1..gt].parse()?,
            params: Params::parse(&s[gt + 1..]),
        })
    }
}

fn find_unquoted(s: &str, needle: char) -> Option<usize> {
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' && in_quotes {
            escaped = true;
        } else if c == '"' {
            in_quotes = !in_quotes;
        } else if c == needle && !in_quotes {
            return Some(i);
        }
    }
    None
}

fn unquote(s: &str) -> String {
    match s.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
        Some(inner) => {
            let mut out = String::with_capacity(inner.len());
            let mut chars = inner.chars();
            while let Some(c) = chars.next() {
                if c == '\\' {
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                } else {
                    out.push(c);
                }
            }
            out
        }
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_addr() {
        let addr: Address = "\"Alice <A>\" <sip:alice@atlanta.example.com;transport=udp>;tag=1928301774"
            .parse()
            .unwrap();
        assert_eq!(addr.display_name.as_deref(), Some("Alice <A>"));
        assert_eq!(addr.uri.user.as_deref(), Some("alice"));
        assert_eq!(addr.uri.params.value("transport"), Some("udp"));
        assert_eq!(addr.tag(), Some("1928301774"));
    }

    #[test]
    fn test_addr_spec_params_belong_to_header() {
        let addr: Address = "sip:bob@biloxi.example.com;tag=a6c85cf".parse().unwrap();
        assert_eq!(addr.tag(), Some("a6c85cf"));
        assert!(addr.uri.params.is_empty());
    }

    #[test]
    fn test_set_tag_and_display() {
        let mut addr: Address = "Bob <sip:bob@192.0.2.4>".parse().unwrap();
        addr.set_tag("xyz");
        assert_eq!(addr.to_string(), "\"Bob\" <sip:bob@192.0.2.4>;tag=xyz");
    }
}
