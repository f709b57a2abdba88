use crate::errors::types::{Error, Result};
use serde::Deserialize;
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

/// Target under which full SIP datagrams are logged on send and receive.
///
/// Disabled unless [`LoggingConfig::sip_trace`] is set or `RUST_LOG`
/// names it explicitly.
pub const SIP_WIRE_TARGET: &str = "sip_wire";

/// Logging settings, usually read from a `[logging]` table:
///
/// ```toml
/// [logging]
/// level = "debug"
/// sip_trace = true
/// directives = ["b2bua_sip_transport=warn"]
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level, overridden per target by `RUST_LOG`
    #[serde(deserialize_with = "deserialize_level")]
    pub level: Level,
    /// Dump every SIP message crossing the transport
    pub sip_trace: bool,
    /// Extra `EnvFilter` directives such as `b2bua_dialog_core=trace`
    pub directives: Vec<String>,
    /// One JSON object per line
    pub json: bool,
    pub file_info: bool,
    pub log_spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: Level::INFO,
            sip_trace: false,
            directives: Vec::new(),
            json: false,
            file_info: false,
            log_spans: false,
        }
    }
}

impl LoggingConfig {
    pub fn new(level: Level) -> Self {
        LoggingConfig {
            level,
            ..Default::default()
        }
    }

    /// Turn on the SIP message dump
    pub fn with_sip_trace(mut self) -> Self {
        self.sip_trace = true;
        self
    }

    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    pub fn with_spans(mut self) -> Self {
        self.log_spans = true;
        self
    }

    /// Build the filter: `RUST_LOG` first, then the default level, the wire
    /// target and the configured directives.
    pub fn env_filter(&self) -> Result<EnvFilter> {
        let wire_level = if self.sip_trace { "debug" } else { "off" };
        let mut filter = EnvFilter::from_default_env()
            .add_directive(self.level.into())
            .add_directive(parse_directive(&format!("{}={}", SIP_WIRE_TARGET, wire_level))?);
        for raw in &self.directives {
            filter = filter.add_directive(parse_directive(raw)?);
        }
        Ok(filter)
    }
}

fn parse_directive(raw: &str) -> Result<Directive> {
    raw.parse()
        .map_err(|e| Error::Config(format!("bad log directive {:?}: {}", raw, e)))
}

fn deserialize_level<'de, D>(deserializer: D) -> std::result::Result<Level, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_log_level(&raw).map_err(serde::de::Error::custom)
}

/// Install the global `tracing` subscriber.
///
/// Fails with [`Error::Logging`] when a subscriber is already installed,
/// which happens routinely in test binaries; callers there may ignore it.
pub fn setup_logging(config: LoggingConfig) -> Result<()> {
    let span_events = match config.log_spans {
        true => FmtSpan::ACTIVE,
        false => FmtSpan::NONE,
    };

    let builder = fmt::Subscriber::builder()
        .with_env_filter(config.env_filter()?)
        .with_span_events(span_events)
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    let installed = match config.json {
        true => builder.with_writer(std::io::stdout).json().try_init(),
        false => builder.try_init(),
    };
    installed.map_err(|e| Error::Logging(e.to_string()))
}

/// Parse a log level name, case-insensitively
pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level).map_err(|_| Error::Config(format!("Invalid log level: {}", level)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("WARN").unwrap(), Level::WARN);
        assert!(matches!(parse_log_level("loud"), Err(Error::Config(_))));
    }

    #[test]
    fn test_config_from_toml() {
        let config: LoggingConfig =
            toml::from_str("level = \"trace\"\nsip_trace = true\ndirectives = [\"b2bua_dialog_core=warn\"]\n")
                .unwrap();
        assert_eq!(config.level, Level::TRACE);
        assert!(config.sip_trace);
        assert_eq!(config.directives, vec!["b2bua_dialog_core=warn".to_string()]);
        assert!(!config.json);
    }

    #[test]
    fn test_bad_directive_is_config_error() {
        let config = LoggingConfig::default().with_directive("b2bua=loudest");
        assert!(matches!(config.env_filter(), Err(Error::Config(_))));
    }

    #[test]
    #[serial]
    fn test_second_setup_reports_error() {
        let _ = setup_logging(LoggingConfig::default().with_sip_trace());
        let again = setup_logging(LoggingConfig::new(Level::DEBUG));
        assert!(matches!(again, Err(Error::Logging(_))));
    }
}
