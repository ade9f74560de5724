use alloc::vec::Vec;
use core::fmt::Write;

use heapless::String;
use serde::Serialize;

use crate::config::{Capabilities, Capability, DeviceConfig};
use crate::identity::DeviceIdentity;
use crate::sensors::{ClimateReading, Co2Reading};

/// Rendered scalar, e.g. `"1013.25"`
pub type MeasureValue = String<16>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SensorKind {
    #[serde(rename = "temp")]
    Temperature,
    #[serde(rename = "pressure")]
    Pressure,
    #[serde(rename = "humidity")]
    Humidity,
    #[serde(rename = "co2")]
    Co2,
}

/// One published scalar measurement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryEnvelope<'a> {
    pub sensor_type: SensorKind,
    pub measure_value: MeasureValue,
    pub controller_id: &'a str,
}

impl TelemetryEnvelope<'_> {
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Envelopes for one climate reading: temperature, pressure and humidity
pub fn climate_envelopes<'a>(
    reading: &ClimateReading,
    controller_id: &'a str,
) -> [TelemetryEnvelope<'a>; 3] {
    [
        TelemetryEnvelope {
            sensor_type: SensorKind::Temperature,
            measure_value: decimal(reading.temperature),
            controller_id,
        },
        TelemetryEnvelope {
            sensor_type: SensorKind::Pressure,
            measure_value: decimal(reading.pressure / 100.0),
            controller_id,
        },
        TelemetryEnvelope {
            sensor_type: SensorKind::Humidity,
            measure_value: decimal(reading.humidity),
            controller_id,
        },
    ]
}

pub fn co2_envelope<'a>(reading: &Co2Reading, controller_id: &'a str) -> TelemetryEnvelope<'a> {
    let mut measure_value = MeasureValue::new();
    // u16 always fits
    let _ = write!(measure_value, "{}", reading.co2_ppm);
    TelemetryEnvelope {
        sensor_type: SensorKind::Co2,
        measure_value,
        controller_id,
    }
}

/// Two decimals. Values too wide for the buffer (never produced by the
/// supported sensors) render as `"nan"`.
fn decimal(value: f32) -> MeasureValue {
    let mut text = MeasureValue::new();
    if write!(text, "{:.2}", value).is_err() {
        text.clear();
        let _ = text.push_str("nan");
    }
    text
}

/// Published once per broker session so the backend learns what this node
/// measures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityAnnouncement<'a> {
    pub room_name: &'a str,
    pub controller_id: &'a str,
    pub controller_name: &'a str,
    pub has_co2: bool,
    pub has_temp: bool,
    pub has_humidity: bool,
    pub has_pressure: bool,
    pub has_db: bool,
}

impl<'a> CapabilityAnnouncement<'a> {
    /// `available` holds the capabilities whose sensor came up; only those
    /// also enabled in `config` are announced.
    pub fn new(
        identity: &'a DeviceIdentity,
        config: &'a DeviceConfig,
        available: Capabilities,
    ) -> Self {
        let active = config.capabilities & available;
        Self {
            room_name: &config.room,
            controller_id: identity.as_str(),
            controller_name: &config.sensor_name,
            has_co2: active.has(Capability::Co2),
            has_temp: active.has(Capability::Climate),
            has_humidity: active.has(Capability::Climate),
            has_pressure: active.has(Capability::Climate),
            has_db: active.has(Capability::Microphone),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_config, sample_identity};

    #[test]
    fn pressure_is_reported_in_hpa() {
        let reading = ClimateReading {
            temperature: 21.456,
            pressure: 101_325.0,
            humidity: 40.0,
        };
        let [temp, pressure, humidity] = climate_envelopes(&reading, "id");
        assert_eq!(temp.measure_value.as_str(), "21.46");
        assert_eq!(pressure.measure_value.as_str(), "1013.25");
        assert_eq!(humidity.measure_value.as_str(), "40.00");
    }

    #[test]
    fn envelope_json_layout() {
        let envelope = co2_envelope(&Co2Reading { co2_ppm: 612 }, "24:0A:C4:12:34:FF");
        let json = envelope.to_json().unwrap();
        assert_eq!(
            core::str::from_utf8(&json).unwrap(),
            r#"{"sensor_type":"co2","measure_value":"612","controller_id":"24:0A:C4:12:34:FF"}"#
        );
    }

    #[test]
    fn announcement_only_lists_working_enabled_capabilities() {
        let identity = sample_identity();
        let mut config = sample_config();
        config.capabilities = Capabilities::CLIMATE | Capabilities::CO2;

        let announcement =
            CapabilityAnnouncement::new(&identity, &config, Capabilities::CLIMATE | Capabilities::MICROPHONE);

        assert!(announcement.has_temp);
        assert!(announcement.has_humidity);
        assert!(announcement.has_pressure);
        assert!(!announcement.has_co2);
        assert!(!announcement.has_db);
    }

    #[test]
    fn announcement_json_keys() {
        let identity = sample_identity();
        let config = sample_config();
        let json = CapabilityAnnouncement::new(&identity, &config, Capabilities::all())
            .to_json()
            .unwrap();
        let text = core::str::from_utf8(&json).unwrap();
        assert!(text.starts_with(r#"{"room_name":"Living room","controller_id":"24:0A:C4:12:34:FF""#));
        assert!(text.contains(r#""controller_name":"node-1""#));
        assert!(text.contains(r#""has_db":false"#));
    }
}
