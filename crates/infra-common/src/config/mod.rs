//! TOML configuration loading

use crate::errors::types::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::Path;

/// Deserialize a configuration value from TOML text
pub fn from_toml_str<T: DeserializeOwned>(text: &str) -> Result<T> {
    toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
}

/// Read and deserialize a TOML configuration file
pub fn load_toml<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    tracing::debug!("Loaded configuration from {}", path.display());
    from_toml_str(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        #[serde(default)]
        port: u16,
    }

    #[test]
    fn test_from_toml_str() {
        let sample: Sample = from_toml_str("name = \"edge\"\nport = 5060\n").unwrap();
        assert_eq!(sample, Sample { name: "edge".into(), port: 5060 });
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let res: Result<Sample> = from_toml_str("name = ");
        assert!(matches!(res, Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let res: Result<Sample> = load_toml("/nonexistent/b2bua.toml");
        assert!(matches!(res, Err(Error::Io(_))));
    }
}
