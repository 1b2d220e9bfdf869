//! Connection descriptor loading and channel addressing.

use std::{fmt, path::Path};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Keys every connection descriptor must carry.
const REQUIRED_KEYS: [&str; 8] = [
    "signature_scheme",
    "key",
    "transport",
    "ip",
    "shell_port",
    "iopub_port",
    "stdin_port",
    "control_port",
];

/// Heartbeat port key, with the long-form alias some launchers write.
const HEARTBEAT_KEYS: [&str; 2] = ["hb_port", "heartbeat_port"];

/// Configuration error. Always fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing key in connection descriptor: {0}")]
    MissingField(&'static str),
    #[error("Unsupported signature scheme: {0}")]
    UnsupportedScheme(String),
    #[error("Invalid connection descriptor: {0}")]
    Invalid(String),
    #[error("Failed to read connection descriptor: {0}")]
    Io(#[from] std::io::Error),
}

/// Named logical sub-protocol, each served by its own endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelName {
    Shell,
    Control,
    Stdin,
    Iopub,
    Heartbeat,
}

impl ChannelName {
    /// Every channel, in the order endpoints are opened.
    pub const ALL: [Self; 5] = [
        Self::Shell,
        Self::Control,
        Self::Stdin,
        Self::Iopub,
        Self::Heartbeat,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Shell => "shell",
            Self::Control => "control",
            Self::Stdin => "stdin",
            Self::Iopub => "iopub",
            Self::Heartbeat => "heartbeat",
        }
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HMAC digest used to sign messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    HmacSha256,
    HmacSha512,
}

impl SignatureScheme {
    /// Parse a descriptor scheme id such as `hmac-sha256`.
    ///
    /// # Errors
    /// Returns error if the id lacks the `hmac-` prefix or names an unknown digest.
    pub fn parse(id: &str) -> Result<Self, ConfigError> {
        match id.strip_prefix("hmac-") {
            Some("sha256") => Ok(Self::HmacSha256),
            Some("sha512") => Ok(Self::HmacSha512),
            _ => Err(ConfigError::UnsupportedScheme(id.to_string())),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HmacSha256 => "hmac-sha256",
            Self::HmacSha512 => "hmac-sha512",
        }
    }
}

/// One port per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelPorts {
    pub shell: u16,
    pub control: u16,
    pub stdin: u16,
    pub iopub: u16,
    pub heartbeat: u16,
}

impl ChannelPorts {
    #[must_use]
    pub const fn get(&self, channel: ChannelName) -> u16 {
        match channel {
            ChannelName::Shell => self.shell,
            ChannelName::Control => self.control,
            ChannelName::Stdin => self.stdin,
            ChannelName::Iopub => self.iopub,
            ChannelName::Heartbeat => self.heartbeat,
        }
    }
}

/// Parsed connection descriptor. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub transport: String,
    pub ip: String,
    pub key: String,
    pub signature_scheme: SignatureScheme,
    pub ports: ChannelPorts,
}

impl ConnectionConfig {
    /// Read and parse a descriptor file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or fails validation.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Parse a descriptor from its JSON text.
    ///
    /// # Errors
    /// Returns error if the JSON is invalid or a required key is missing.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Self::from_value(&value)
    }

    /// Build from an already parsed descriptor object.
    ///
    /// # Errors
    /// Returns error if a required key is missing or has the wrong type.
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        let obj = value
            .as_object()
            .ok_or_else(|| ConfigError::Invalid("descriptor is not an object".to_string()))?;

        if let Some(missing) = REQUIRED_KEYS.iter().find(|k| !obj.contains_key(**k)) {
            return Err(ConfigError::MissingField(*missing));
        }
        let hb_key = HEARTBEAT_KEYS
            .iter()
            .find(|k| obj.contains_key(**k))
            .ok_or(ConfigError::MissingField(HEARTBEAT_KEYS[0]))?;

        let scheme = string_field(obj, "signature_scheme")?;

        Ok(Self {
            transport: string_field(obj, "transport")?,
            ip: string_field(obj, "ip")?,
            key: string_field(obj, "key")?,
            signature_scheme: SignatureScheme::parse(&scheme)?,
            ports: ChannelPorts {
                shell: port_field(obj, "shell_port")?,
                control: port_field(obj, "control_port")?,
                stdin: port_field(obj, "stdin_port")?,
                iopub: port_field(obj, "iopub_port")?,
                heartbeat: port_field(obj, hb_key)?,
            },
        })
    }

    /// Endpoint address for a channel: `{transport}://{ip}{delimiter}{port}`.
    ///
    /// Network transports separate host and port with `:`, others with `-`.
    #[must_use]
    pub fn address(&self, channel: ChannelName) -> String {
        let delimiter = if self.transport == "tcp" { ':' } else { '-' };
        format!(
            "{}://{}{}{}",
            self.transport,
            self.ip,
            delimiter,
            self.ports.get(channel)
        )
    }
}

fn string_field(obj: &Map<String, Value>, key: &'static str) -> Result<String, ConfigError> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ConfigError::Invalid(format!("{key} must be a string")))
}

fn port_field(obj: &Map<String, Value>, key: &str) -> Result<u16, ConfigError> {
    obj.get(key)
        .and_then(Value::as_u64)
        .and_then(|p| u16::try_from(p).ok())
        .ok_or_else(|| ConfigError::Invalid(format!("{key} must be a port number")))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serde_json::json;

    use super::*;

    fn descriptor() -> Value {
        json!({
            "signature_scheme": "hmac-sha256",
            "key": "a0436f6c-1916-498b-8eb9-e81ab9368e84",
            "transport": "tcp",
            "ip": "127.0.0.1",
            "shell_port": 57503,
            "iopub_port": 40885,
            "stdin_port": 52597,
            "control_port": 50160,
            "hb_port": 42540,
            "kernel_name": "calc"
        })
    }

    #[test]
    fn test_parse_descriptor() {
        let config = ConnectionConfig::from_value(&descriptor()).unwrap();
        assert_eq!(config.signature_scheme, SignatureScheme::HmacSha256);
        assert_eq!(config.ports.heartbeat, 42540);
        assert_eq!(config.address(ChannelName::Shell), "tcp://127.0.0.1:57503");
    }

    #[test]
    fn test_missing_any_field_is_config_error() {
        for key in REQUIRED_KEYS.iter().chain(&["hb_port"]) {
            let mut value = descriptor();
            value.as_object_mut().unwrap().remove(*key);
            let err = ConnectionConfig::from_value(&value).unwrap_err();
            assert!(
                matches!(err, ConfigError::MissingField(k) if k == *key),
                "removing {key} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_heartbeat_alias() {
        let mut value = descriptor();
        let obj = value.as_object_mut().unwrap();
        let port = obj.remove("hb_port").unwrap();
        obj.insert("heartbeat_port".to_string(), port);
        let config = ConnectionConfig::from_value(&value).unwrap();
        assert_eq!(config.ports.get(ChannelName::Heartbeat), 42540);
    }

    #[test]
    fn test_scheme_requires_hmac_prefix() {
        let mut value = descriptor();
        value["signature_scheme"] = json!("sha256");
        assert!(matches!(
            ConnectionConfig::from_value(&value),
            Err(ConfigError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_ipc_address_uses_dash() {
        let mut value = descriptor();
        value["transport"] = json!("ipc");
        value["ip"] = json!("/tmp/kernel");
        let config = ConnectionConfig::from_value(&value).unwrap();
        assert_eq!(config.address(ChannelName::Iopub), "ipc:///tmp/kernel-40885");
    }

    #[test]
    fn test_wrong_port_type_is_invalid() {
        let mut value = descriptor();
        value["shell_port"] = json!("57503");
        assert!(matches!(
            ConnectionConfig::from_value(&value),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", descriptor()).unwrap();
        let config = ConnectionConfig::from_file(file.path()).unwrap();
        assert_eq!(config.key, "a0436f6c-1916-498b-8eb9-e81ab9368e84");

        let missing = ConnectionConfig::from_file(file.path().with_extension("absent"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }
}
