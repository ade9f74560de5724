use alloc::vec::Vec;
use core::fmt::Write;

use bitflags::bitflags;
use embassy_time::Duration;
use heapless::String;
use serde::{Deserialize, Serialize};

use crate::cstr::{self, check_field, write_trimmed_field};
use crate::error::ConfigError;

pub struct BuildConfig {
    // Shared password of the provisioning access point
    pub portal_password: &'static str,

    // How long the provisioning portal waits for a submission
    pub portal_timeout_seconds: u32,

    // Two resets within this window request provisioning
    pub double_reset_window_seconds: u32,

    // Telemetry period in seconds
    pub measurement_interval_seconds: u16,

    // MQTT topic to publish measurements to
    pub measurement_topic: &'static str,
}

impl BuildConfig {
    pub const fn measurement_interval(&self) -> Duration {
        Duration::from_secs(self.measurement_interval_seconds as u64)
    }

    pub const fn portal_timeout(&self) -> Duration {
        Duration::from_secs(self.portal_timeout_seconds as u64)
    }

    pub const fn double_reset_window(&self) -> Duration {
        Duration::from_secs(self.double_reset_window_seconds as u64)
    }
}

// build-time values are generated from cfg.toml
include!(concat!(env!("OUT_DIR"), "/config.rs"));

/// Content length of a text field stored in a 40 byte NUL terminated buffer
pub const FIELD_LEN: usize = 39;
/// IEEE 802.11 SSID limit
pub const SSID_LEN: usize = 32;
/// WPA2 passphrase limit
pub const PASSPHRASE_LEN: usize = 63;
/// Digits of a TCP port
pub const PORT_TEXT_LEN: usize = 5;

pub const DEFAULT_BROKER_PORT: u16 = 1883;

pub type Field = String<FIELD_LEN>;

bitflags! {
    /// Enabled sensing capabilities
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Capabilities: u8 {
        /// Combined temperature / pressure / humidity sensor
        const CLIMATE = 0b001;
        const CO2 = 0b010;
        const MICROPHONE = 0b100;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Climate,
    Co2,
    Microphone,
}

impl Capability {
    pub const ALL: [Capability; 3] = [Capability::Climate, Capability::Co2, Capability::Microphone];

    pub const fn flag(self) -> Capabilities {
        match self {
            Capability::Climate => Capabilities::CLIMATE,
            Capability::Co2 => Capabilities::CO2,
            Capability::Microphone => Capabilities::MICROPHONE,
        }
    }

    /// Capabilities sampled continuously cannot run degraded
    pub const fn is_continuous(self) -> bool {
        matches!(self, Capability::Microphone)
    }
}

impl Capabilities {
    pub fn has(self, capability: Capability) -> bool {
        self.contains(capability.flag())
    }

    pub fn with(mut self, capability: Capability, enabled: bool) -> Self {
        self.set(capability.flag(), enabled);
        self
    }

    pub fn kinds(self) -> impl Iterator<Item = Capability> {
        Capability::ALL.into_iter().filter(move |c| self.has(*c))
    }
}

/// Device configuration, persisted by [`crate::storage::ConfigStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub wifi_ssid: String<SSID_LEN>,
    pub wifi_password: String<PASSPHRASE_LEN>,
    pub broker_host: Field,
    pub broker_port: u16,
    pub broker_username: Field,
    pub broker_password: Field,
    pub room: Field,
    pub sensor_name: Field,
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldError {
    Missing(&'static str),
    Invalid(&'static str, cstr::Error),
    InvalidPort,
}

impl DeviceConfig {
    pub fn validate(&self) -> Result<(), FieldError> {
        let fields: [(&'static str, &str); 7] = [
            ("wifi_ssid", &self.wifi_ssid),
            ("wifi_pass", &self.wifi_password),
            ("mqtt_server", &self.broker_host),
            ("mqtt_user", &self.broker_username),
            ("mqtt_pass", &self.broker_password),
            ("room_name", &self.room),
            ("sensor_name", &self.sensor_name),
        ];
        for (name, value) in fields {
            check_field(value).map_err(|e| FieldError::Invalid(name, e))?;
        }

        if self.wifi_ssid.is_empty() {
            return Err(FieldError::Missing("wifi_ssid"));
        }
        if self.broker_host.is_empty() {
            return Err(FieldError::Missing("mqtt_server"));
        }
        if self.broker_port == 0 {
            return Err(FieldError::InvalidPort);
        }
        Ok(())
    }
}

pub fn parse_port(text: &str) -> Result<u16, FieldError> {
    match text.trim().parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(FieldError::InvalidPort),
    }
}

pub fn field<const N: usize>(name: &'static str, value: &str) -> Result<String<N>, FieldError> {
    write_trimmed_field(value).map_err(|e| FieldError::Invalid(name, e))
}

/// On-flash document. Every key is required; unknown keys are ignored.
#[derive(Debug, Serialize, Deserialize)]
struct ConfigRecord {
    mqtt_server: Field,
    mqtt_port: String<PORT_TEXT_LEN>,
    mqtt_user: Field,
    mqtt_pass: Field,
    room_name: Field,
    sensor_name: Field,
    has_co2: bool,
    has_temp: bool,
    has_mic: bool,
    wifi_ssid: String<SSID_LEN>,
    wifi_pass: String<PASSPHRASE_LEN>,
}

impl From<&DeviceConfig> for ConfigRecord {
    fn from(config: &DeviceConfig) -> Self {
        let mut mqtt_port = String::new();
        // u16 renders in at most 5 digits
        let _ = write!(mqtt_port, "{}", config.broker_port);

        Self {
            mqtt_server: config.broker_host.clone(),
            mqtt_port,
            mqtt_user: config.broker_username.clone(),
            mqtt_pass: config.broker_password.clone(),
            room_name: config.room.clone(),
            sensor_name: config.sensor_name.clone(),
            has_co2: config.capabilities.has(Capability::Co2),
            has_temp: config.capabilities.has(Capability::Climate),
            has_mic: config.capabilities.has(Capability::Microphone),
            wifi_ssid: config.wifi_ssid.clone(),
            wifi_pass: config.wifi_password.clone(),
        }
    }
}

impl TryFrom<ConfigRecord> for DeviceConfig {
    type Error = FieldError;

    fn try_from(record: ConfigRecord) -> Result<Self, Self::Error> {
        let config = DeviceConfig {
            wifi_ssid: record.wifi_ssid,
            wifi_password: record.wifi_pass,
            broker_host: record.mqtt_server,
            broker_port: parse_port(&record.mqtt_port)?,
            broker_username: record.mqtt_user,
            broker_password: record.mqtt_pass,
            room: record.room_name,
            sensor_name: record.sensor_name,
            capabilities: Capabilities::empty()
                .with(Capability::Climate, record.has_temp)
                .with(Capability::Co2, record.has_co2)
                .with(Capability::Microphone, record.has_mic),
        };
        config.validate()?;
        Ok(config)
    }
}

pub fn encode(config: &DeviceConfig) -> Result<Vec<u8>, ConfigError> {
    config.validate().map_err(|_| ConfigError::WriteFailed)?;
    serde_json::to_vec(&ConfigRecord::from(config)).map_err(|_| ConfigError::WriteFailed)
}

pub fn decode(body: &[u8]) -> Result<DeviceConfig, ConfigError> {
    let record: ConfigRecord = serde_json::from_slice(body).map_err(|e| {
        log::warn!("Config record does not parse: {}", e);
        ConfigError::Corrupt
    })?;
    DeviceConfig::try_from(record).map_err(|e| {
        log::warn!("Config record rejected: {:?}", e);
        ConfigError::Corrupt
    })
}
