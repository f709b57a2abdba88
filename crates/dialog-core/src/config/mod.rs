//! Engine and user agent configuration
//!
//! All durations are written as (fractional) seconds in TOML:
//!
//! ```toml
//! accept_invites = true
//! user_agent = "b2bua"
//!
//! [timers]
//! t1 = 0.5
//! timer_b = 32
//!
//! [default_ua]
//! no_reply_time = 10
//! keepalive_interval = 30
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use b2bua_sip_core::{Header, HostPort};

use crate::errors::{DialogError, DialogResult};

/// Transaction timer values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerSettings {
    /// Initial retransmit interval, doubled on every retransmission
    #[serde(with = "secs")]
    pub t1: Duration,
    /// Client transaction timeout
    #[serde(with = "secs")]
    pub timer_b: Duration,
    /// Linger after Timer B before the transaction is dropped
    #[serde(with = "secs")]
    pub timer_c: Duration,
    /// Server wait for ACK to a final INVITE response
    #[serde(with = "secs")]
    pub timer_d: Duration,
    /// Warning threshold for a manual ACK that is never sent
    #[serde(with = "secs")]
    pub timer_g: Duration,
    /// Rotation period of the two-generation retransmission cache
    #[serde(with = "secs")]
    pub cache_rotation: Duration,
    /// INVITE expiry when the request carries no usable Expires
    #[serde(with = "secs")]
    pub invite_expires: Duration,
    /// Provisional response retransmission interval; zero disables it
    #[serde(with = "secs")]
    pub provisional_retransmit: Duration,
}

impl Default for TimerSettings {
    fn default() -> Self {
        TimerSettings {
            t1: Duration::from_millis(500),
            timer_b: Duration::from_secs(32),
            timer_c: Duration::from_secs(32),
            timer_d: Duration::from_secs(32),
            timer_g: Duration::from_secs(64),
            cache_rotation: Duration::from_secs(32),
            invite_expires: Duration::from_secs(300),
            provisional_retransmit: Duration::ZERO,
        }
    }
}

/// Per-leg configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UaConfig {
    /// Maximum connected time before the leg is torn down
    #[serde(with = "opt_secs")]
    pub credit_time: Option<Duration>,
    /// Maximum setup time measured from the start of the call
    #[serde(with = "opt_secs")]
    pub expire_time: Option<Duration>,
    /// Maximum time to the first provisional response above 100
    #[serde(with = "opt_secs")]
    pub no_progress_time: Option<Duration>,
    /// Maximum time to any response; ignored unless shorter than 32s
    #[serde(with = "opt_secs")]
    pub no_reply_time: Option<Duration>,
    /// Interval of in-dialog re-INVITE keepalives
    #[serde(with = "opt_secs")]
    pub keepalive_interval: Option<Duration>,
    /// Use REFER towards the peer on disconnect with a transfer target
    pub use_refer: bool,
    /// Relay authentication challenges instead of failing the leg
    pub pass_auth: bool,
    /// Value of User-Agent and Server headers
    pub user_agent: Option<String>,
    /// Send every request of this leg to a fixed proxy
    pub outbound_proxy: Option<HostPort>,
    /// Headers added to every request originated by this leg
    #[serde(skip)]
    pub extra_headers: Vec<Header>,
}

impl Default for UaConfig {
    fn default() -> Self {
        UaConfig {
            credit_time: None,
            expire_time: None,
            no_progress_time: None,
            no_reply_time: None,
            keepalive_interval: None,
            use_refer: true,
            pass_auth: false,
            user_agent: None,
            outbound_proxy: None,
            extra_headers: Vec::new(),
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub timers: TimerSettings,
    /// Time spent in Disconnected or Failed before a leg is dropped
    #[serde(with = "secs")]
    pub godead_timeout: Duration,
    /// Give-up time of a leg waiting for the answer to its CANCEL
    #[serde(with = "secs")]
    pub cancelling_timeout: Duration,
    /// Grace period after the first rejected keepalive
    #[serde(with = "secs")]
    pub keepalive_grace: Duration,
    /// Upper bound on how long the event loop sleeps without timers
    #[serde(with = "secs")]
    pub wake_interval: Duration,
    /// Create a dialog for out-of-dialog INVITEs
    pub accept_invites: bool,
    /// Server header on responses generated by the transaction layer
    pub user_agent: Option<String>,
    /// Configuration of dialogs created for incoming INVITEs
    pub default_ua: UaConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            timers: TimerSettings::default(),
            godead_timeout: Duration::from_secs(32),
            cancelling_timeout: Duration::from_secs(300),
            keepalive_grace: Duration::from_secs(600),
            wake_interval: Duration::from_secs(1),
            accept_invites: true,
            user_agent: None,
            default_ua: UaConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> DialogResult<Self> {
        let config: Self =
            b2bua_infra_common::config::from_toml_str(text).map_err(|e| DialogError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> DialogResult<Self> {
        let config: Self =
            b2bua_infra_common::config::load_toml(path).map_err(|e| DialogError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject timer values the scheduler cannot run with.
    ///
    /// Every interval except `provisional_retransmit` must be non-zero: a
    /// zero retransmit or rotation period would be due again as soon as it
    /// fires.
    pub fn validate(&self) -> DialogResult<()> {
        let t = &self.timers;
        let required = [
            ("timers.t1", t.t1),
            ("timers.timer_b", t.timer_b),
            ("timers.timer_c", t.timer_c),
            ("timers.timer_d", t.timer_d),
            ("timers.timer_g", t.timer_g),
            ("timers.cache_rotation", t.cache_rotation),
            ("timers.invite_expires", t.invite_expires),
            ("godead_timeout", self.godead_timeout),
            ("cancelling_timeout", self.cancelling_timeout),
            ("keepalive_grace", self.keepalive_grace),
            ("wake_interval", self.wake_interval),
        ];
        match required.iter().find(|(_, value)| value.is_zero()) {
            Some((name, _)) => Err(DialogError::Config(format!("{} must be greater than zero", name))),
            None => Ok(()),
        }
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

mod opt_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        match Option::<f64>::deserialize(d)? {
            Some(secs) if secs > 0.0 => Duration::try_from_secs_f64(secs)
                .map(Some)
                .map_err(serde::de::Error::custom),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.timers.t1, Duration::from_millis(500));
        assert_eq!(config.timers.timer_g, Duration::from_secs(64));
        assert_eq!(config.godead_timeout, Duration::from_secs(32));
        assert!(config.default_ua.use_refer);
    }

    #[test]
    fn test_from_toml() {
        let config = EngineConfig::from_toml_str(
            "accept_invites = false\n\
             [timers]\nt1 = 0.25\nprovisional_retransmit = 2\n\
             [default_ua]\nno_reply_time = 10\ncredit_time = 0\n\
             outbound_proxy = { host = \"proxy.example.com\", port = 5070 }\n",
        )
        .unwrap();
        assert!(!config.accept_invites);
        assert_eq!(config.timers.t1, Duration::from_millis(250));
        assert_eq!(config.timers.timer_b, Duration::from_secs(32));
        assert_eq!(config.timers.provisional_retransmit, Duration::from_secs(2));
        assert_eq!(config.default_ua.no_reply_time, Some(Duration::from_secs(10)));
        assert_eq!(config.default_ua.credit_time, None);
        assert_eq!(config.default_ua.outbound_proxy.unwrap().port, 5070);
    }

    #[test]
    fn test_zero_intervals_are_rejected() {
        for text in [
            "[timers]\nt1 = 0\n",
            "[timers]\ncache_rotation = 0\n",
            "godead_timeout = 0\n",
            "wake_interval = 0.0\n",
        ] {
            match EngineConfig::from_toml_str(text) {
                Err(DialogError::Config(msg)) => assert!(msg.contains("greater than zero"), "{}", msg),
                other => panic!("{:?} accepted: {:?}", text, other),
            }
        }
        // zero switches provisional retransmission off
        let config = EngineConfig::from_toml_str("[timers]\nprovisional_retransmit = 0\n").unwrap();
        assert!(config.timers.provisional_retransmit.is_zero());
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        assert!(matches!(
            EngineConfig::from_toml_str("[timers]\nt1 = \"fast\"\n"),
            Err(DialogError::Config(_))
        ));
    }
}
