use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// A SIP response status code
///
/// Kept as a plain number so that codes without a well-known reason phrase
/// pass through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StatusCode(u16);

impl StatusCode {
    pub const TRYING: StatusCode = StatusCode(100);
    pub const OK: StatusCode = StatusCode(200);
    pub const REQUEST_TIMEOUT: StatusCode = StatusCode(408);
    pub const REQUEST_TERMINATED: StatusCode = StatusCode(487);
    pub const SERVER_INTERNAL_ERROR: StatusCode = StatusCode(500);

    /// Create a status code, rejecting values outside `100..=699`
    pub fn new(code: u16) -> Result<Self> {
        if (100..=699).contains(&code) {
            Ok(StatusCode(code))
        } else {
            Err(Error::InvalidStatusCode(code))
        }
    }

    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// 1xx
    pub fn is_provisional(&self) -> bool {
        self.0 < 200
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.0)
    }

    /// 3xx
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.0)
    }

    /// Any code of 200 and above
    pub fn is_final(&self) -> bool {
        self.0 >= 200
    }

    /// Default reason phrase used when a caller does not supply one
    pub fn reason_phrase(&self) -> &'static str {
        match self.0 {
            100 => "Trying",
            180 => "Ringing",
            181 => "Call Is Being Forwarded",
            182 => "Queued",
            183 => "Session Progress",
            200 => "OK",
            202 => "Accepted",
            300 => "Multiple Choices",
            301 => "Moved Permanently",
            302 => "Moved Temporarily",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            407 => "Proxy Authentication Required",
            408 => "Request Timeout",
            480 => "Temporarily Unavailable",
            481 => "Call Leg/Transaction Does Not Exist",
            482 => "Loop Detected",
            483 => "Too Many Hops",
            486 => "Busy Here",
            487 => "Request Terminated",
            488 => "Not Acceptable Here",
            491 => "Request Pending",
            500 => "Server Internal Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Server Time-out",
            600 => "Busy Everywhere",
            603 => "Decline",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u16> for StatusCode {
    type Error = Error;

    fn try_from(code: u16) -> Result<Self> {
        StatusCode::new(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classes() {
        let ringing = StatusCode::new(180).unwrap();
        assert!(ringing.is_provisional());
        assert!(!ringing.is_final());
        assert!(StatusCode::new(200).unwrap().is_success());
        assert!(StatusCode::new(302).unwrap().is_redirect());
        assert_eq!(StatusCode::new(487).unwrap().reason_phrase(), "Request Terminated");
    }

    #[test]
    fn test_out_of_range() {
        assert_eq!(StatusCode::new(99), Err(Error::InvalidStatusCode(99)));
        assert_eq!(StatusCode::new(700), Err(Error::InvalidStatusCode(700)));
    }
}
