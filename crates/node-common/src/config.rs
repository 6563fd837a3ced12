//! Configuration structures for the relay node.
//!
//! Supports TOML deserialization with defaults matching the board's
//! factory wiring (static addressing, socket 0 on port 80, PZEM meter on
//! Modbus address 0x01).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Top-level node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Static network addressing.
    pub network: NetworkConfig,

    /// Ethernet controller driver settings.
    pub ethernet: EthernetConfig,

    /// Cooperative scheduler timing.
    pub scheduler: SchedulerConfig,

    /// Climate sensor caching.
    pub sensors: SensorConfig,

    /// Power meter polling.
    pub meter: MeterConfig,

    /// Relay behavior.
    pub relays: RelayConfig,

    /// Event log sizing.
    pub log: LogConfig,
}

/// A 48-bit hardware address, written as `00:08:DC:12:34:56`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Raw octets in wire order.
    #[must_use]
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl FromStr for MacAddress {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split([':', '-']);
        for octet in &mut octets {
            let part = parts
                .next()
                .ok_or_else(|| ConfigError::Invalid(format!("MAC address too short: {s}")))?;
            *octet = u8::from_str_radix(part, 16)
                .map_err(|_| ConfigError::Invalid(format!("invalid MAC octet {part:?} in {s}")))?;
        }
        if parts.next().is_some() {
            return Err(ConfigError::Invalid(format!("MAC address too long: {s}")));
        }
        Ok(Self(octets))
    }
}

impl Serialize for MacAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Static network configuration (no DHCP).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Source hardware address.
    pub mac: MacAddress,
    /// Source IP address.
    pub ip: Ipv4Addr,
    /// Default gateway.
    pub gateway: Ipv4Addr,
    /// Subnet mask.
    pub subnet: Ipv4Addr,
    /// TCP port served by the HTTP socket.
    pub port: u16,
    /// Hardware socket slot used for HTTP.
    pub socket: u8,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mac: MacAddress([0x00, 0x08, 0xDC, 0x12, 0x34, 0x56]),
            ip: Ipv4Addr::new(192, 168, 1, 100),
            gateway: Ipv4Addr::new(192, 168, 1, 1),
            subnet: Ipv4Addr::new(255, 255, 255, 0),
            port: 80,
            socket: 0,
        }
    }
}

/// Ethernet controller driver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EthernetConfig {
    /// Value the version register must report.
    pub expected_version: u8,

    /// Maximum command-register polls before a command is reported as stuck.
    pub command_poll_limit: u32,

    /// Per-socket TX/RX buffer size in bytes (power of two).
    pub buffer_size: u16,

    /// Largest chunk written to the TX buffer per SEND command.
    pub max_chunk: usize,

    /// How long `send` tolerates a full TX buffer.
    #[serde(with = "humantime_serde")]
    pub send_stall_limit: Duration,

    /// How long to wait for SEND_OK after the last chunk.
    #[serde(with = "humantime_serde")]
    pub send_complete_timeout: Duration,

    /// Width of the hardware reset pulse.
    #[serde(with = "humantime_serde")]
    pub reset_pulse: Duration,

    /// Settling time after releasing reset.
    #[serde(with = "humantime_serde")]
    pub reset_settle: Duration,

    /// Link polls performed at startup.
    pub link_wait_attempts: u32,

    /// Interval between startup link polls.
    #[serde(with = "humantime_serde")]
    pub link_wait_interval: Duration,
}

impl Default for EthernetConfig {
    fn default() -> Self {
        Self {
            expected_version: 0x04,
            command_poll_limit: 10_000,
            buffer_size: 2048,
            max_chunk: 1024,
            send_stall_limit: Duration::from_secs(2),
            send_complete_timeout: Duration::from_secs(2),
            reset_pulse: Duration::from_millis(100),
            reset_settle: Duration::from_millis(200),
            link_wait_attempts: 50,
            link_wait_interval: Duration::from_millis(100),
        }
    }
}

/// Cooperative scheduler timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Ticks between link health checks.
    pub link_check_interval: u32,

    /// Poll interval while waiting for a lost link.
    #[serde(with = "humantime_serde")]
    pub link_poll_interval: Duration,

    /// Upper bound on a single link-restore wait.
    #[serde(with = "humantime_serde")]
    pub link_wait_limit: Duration,

    /// LISTEN ticks before the socket is recycled.
    pub listen_idle_limit: u32,

    /// Sleep per LISTEN tick.
    #[serde(with = "humantime_serde")]
    pub listen_sleep: Duration,

    /// Delay after ESTABLISHED before reading the request.
    #[serde(with = "humantime_serde")]
    pub request_settle: Duration,

    /// Sleep after disconnect and after close.
    #[serde(with = "humantime_serde")]
    pub close_sleep: Duration,

    /// Sleep after handling CLOSE_WAIT.
    #[serde(with = "humantime_serde")]
    pub close_wait_sleep: Duration,

    /// Sleep after resetting a socket in an unknown status.
    #[serde(with = "humantime_serde")]
    pub reset_sleep: Duration,

    /// Sleep after a failed tick.
    #[serde(with = "humantime_serde")]
    pub error_backoff: Duration,

    /// Maximum request bytes read per accept.
    pub max_request_bytes: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            link_check_interval: 100,
            link_poll_interval: Duration::from_millis(500),
            link_wait_limit: Duration::from_secs(60),
            listen_idle_limit: 500,
            listen_sleep: Duration::from_millis(20),
            request_settle: Duration::from_millis(50),
            close_sleep: Duration::from_millis(50),
            close_wait_sleep: Duration::from_millis(10),
            reset_sleep: Duration::from_millis(100),
            error_backoff: Duration::from_millis(500),
            max_request_bytes: 512,
        }
    }
}

/// Climate sensor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// How long a temperature/humidity sample is served without re-measuring.
    #[serde(with = "humantime_serde")]
    pub climate_ttl: Duration,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            climate_ttl: Duration::from_secs(30),
        }
    }
}

/// Modbus-RTU power meter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    /// Device addresses tried in order (primary, then broadcast fallback).
    pub addresses: Vec<u8>,

    /// First input register to read.
    pub start_register: u16,

    /// Number of input registers to read.
    pub register_count: u16,

    /// Serial line speed.
    pub baud_rate: u32,

    /// Time allowed for the meter to answer a request.
    #[serde(with = "humantime_serde")]
    pub response_window: Duration,

    /// A successful reading younger than this is reused without bus traffic.
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,

    /// A reading older than this is discarded instead of served stale.
    #[serde(with = "humantime_serde")]
    pub hard_expiry: Duration,

    /// Reject responses whose CRC does not match.
    pub validate_crc: bool,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            addresses: vec![0x01, 0xF8],
            start_register: 0x0000,
            register_count: 0x000A,
            baud_rate: 9600,
            response_window: Duration::from_millis(500),
            refresh_interval: Duration::from_secs(2),
            hard_expiry: Duration::from_secs(5),
            validate_crc: true,
        }
    }
}

/// Relay behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// How long a pulse holds the toggled value before restoring.
    #[serde(with = "humantime_serde")]
    pub pulse_duration: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            pulse_duration: Duration::from_millis(5000),
        }
    }
}

/// Event log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Entries retained in the ring.
    pub capacity: usize,
    /// Entries returned by the `/log` endpoint.
    pub http_lines: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            capacity: 20,
            http_lines: 5,
        }
    }
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Reject values the runtime cannot operate with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.network.socket > 7 {
            return invalid("network.socket must be in 0..=7");
        }
        if self.ethernet.command_poll_limit == 0 {
            return invalid("ethernet.command_poll_limit must be non-zero");
        }
        if !self.ethernet.buffer_size.is_power_of_two() {
            return invalid("ethernet.buffer_size must be a power of two");
        }
        if self.ethernet.max_chunk == 0 {
            return invalid("ethernet.max_chunk must be non-zero");
        }
        if self.scheduler.link_check_interval == 0 {
            return invalid("scheduler.link_check_interval must be non-zero");
        }
        if self.scheduler.max_request_bytes == 0 {
            return invalid("scheduler.max_request_bytes must be non-zero");
        }
        if self.meter.addresses.is_empty() {
            return invalid("meter.addresses must list at least one device address");
        }
        if self.meter.hard_expiry < self.meter.refresh_interval {
            return invalid("meter.hard_expiry must not be shorter than meter.refresh_interval");
        }
        if self.log.capacity == 0 || self.log.http_lines > self.log.capacity {
            return invalid("log.http_lines must not exceed a non-zero log.capacity");
        }
        Ok(())
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Semantically invalid value.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.network.ip, Ipv4Addr::new(192, 168, 1, 100));
        assert_eq!(config.network.port, 80);
        assert_eq!(config.meter.addresses, vec![0x01, 0xF8]);
        assert_eq!(config.relays.pulse_duration, Duration::from_millis(5000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            [network]
            mac = "02:00:00:AA:BB:CC"
            ip = "10.0.0.5"
            port = 8080

            [meter]
            addresses = [2]
            refresh_interval = "1s"
            hard_expiry = "10s"
            validate_crc = false

            [scheduler]
            listen_sleep = "5ms"
        "#;

        let config = NodeConfig::from_toml(toml).unwrap();
        assert_eq!(config.network.mac, MacAddress([0x02, 0, 0, 0xAA, 0xBB, 0xCC]));
        assert_eq!(config.network.ip, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(config.network.port, 8080);
        // Unspecified fields fall back to defaults
        assert_eq!(config.network.gateway, Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(config.meter.addresses, vec![2]);
        assert_eq!(config.meter.refresh_interval, Duration::from_secs(1));
        assert!(!config.meter.validate_crc);
        assert_eq!(config.scheduler.listen_sleep, Duration::from_millis(5));
    }

    #[test]
    fn test_roundtrip_toml() {
        let config = NodeConfig::default();
        let toml = config.to_toml().unwrap();
        let parsed = NodeConfig::from_toml(&toml).unwrap();
        assert_eq!(config.network.mac, parsed.network.mac);
        assert_eq!(config.meter.hard_expiry, parsed.meter.hard_expiry);
    }

    #[test]
    fn test_mac_address_parsing() {
        let mac: MacAddress = "00-08-dc-12-34-56".parse().unwrap();
        assert_eq!(mac.to_string(), "00:08:DC:12:34:56");

        assert!("00:08:DC:12:34".parse::<MacAddress>().is_err());
        assert!("00:08:DC:12:34:56:78".parse::<MacAddress>().is_err());
        assert!("00:08:DC:12:34:ZZ".parse::<MacAddress>().is_err());

        let json: MacAddress = serde_json::from_str("\"00:08:DC:12:34:56\"").unwrap();
        assert_eq!(json.octets(), [0x00, 0x08, 0xDC, 0x12, 0x34, 0x56]);
    }

    #[test]
    fn test_validation_rejects_empty_meter_addresses() {
        let toml = r#"
            [meter]
            addresses = []
        "#;
        let err = NodeConfig::from_toml(toml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("meter.addresses")));
    }

    #[test]
    fn test_validation_rejects_inverted_meter_ttls() {
        let mut config = NodeConfig::default();
        config.meter.refresh_interval = Duration::from_secs(10);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_odd_buffer_size() {
        let mut config = NodeConfig::default();
        config.ethernet.buffer_size = 1500;
        assert!(config.validate().is_err());
    }
}
