use core::fmt::{self, Write};

use embassy_time::Duration;
use heapless::{String, Vec};

use crate::config::{
    field, parse_port, Capabilities, Capability, DeviceConfig, FieldError, DEFAULT_BROKER_PORT,
};

/// Longest raw value accepted from the form, longer than any stored field so
/// overlong input is reported instead of silently cut
pub const RAW_VALUE_LEN: usize = 96;

pub type RawValue = String<RAW_VALUE_LEN>;

/// Access point the portal advertises
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPoint {
    pub ssid: String<32>,
    pub password: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortalOutcome {
    Submitted(PortalSubmission),
    TimedOut,
}

/// Operator-facing configuration portal. Blocks until the form is submitted
/// or `timeout` elapses.
pub trait CaptivePortal {
    async fn run(
        &mut self,
        access_point: &AccessPoint,
        form: &PortalForm,
        timeout: Duration,
    ) -> PortalOutcome;
}

/// Values the form is pre-filled with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalForm {
    pub values: DeviceConfig,
    /// Set when the previous submission was rejected
    pub error: Option<FieldError>,
}

impl PortalForm {
    pub fn prefill(prior: Option<&DeviceConfig>) -> Self {
        let values = match prior {
            Some(config) => config.clone(),
            None => DeviceConfig {
                wifi_ssid: String::new(),
                wifi_password: String::new(),
                broker_host: String::new(),
                broker_port: DEFAULT_BROKER_PORT,
                broker_username: String::new(),
                broker_password: String::new(),
                room: String::new(),
                sensor_name: String::new(),
                capabilities: Capabilities::empty(),
            },
        };
        Self { values, error: None }
    }

    pub fn render<W: Write>(&self, out: &mut W) -> fmt::Result {
        let v = &self.values;
        out.write_str(
            "<!DOCTYPE html><html><head><meta name=\"viewport\" \
             content=\"width=device-width,initial-scale=1\"><title>Sensor setup</title>\
             </head><body><h1>Sensor setup</h1>",
        )?;
        if let Some(error) = &self.error {
            out.write_str("<p><b>Rejected: ")?;
            escape(out, field_name(error))?;
            out.write_str("</b></p>")?;
        }
        out.write_str("<form method=\"post\" action=\"/save\">")?;
        text_input(out, "wifi_ssid", "WiFi network", &v.wifi_ssid, "text")?;
        text_input(out, "wifi_pass", "WiFi password", &v.wifi_password, "password")?;
        text_input(out, "mqtt_server", "MQTT server", &v.broker_host, "text")?;
        let mut port: String<5> = String::new();
        write!(port, "{}", v.broker_port)?;
        text_input(out, "mqtt_port", "MQTT port", &port, "text")?;
        text_input(out, "mqtt_user", "MQTT user", &v.broker_username, "text")?;
        text_input(out, "mqtt_pass", "MQTT password", &v.broker_password, "password")?;
        text_input(out, "room_name", "Room", &v.room, "text")?;
        text_input(out, "sensor_name", "Sensor name", &v.sensor_name, "text")?;
        checkbox(out, "has_temp", "Temperature / pressure / humidity", v.capabilities.has(Capability::Climate))?;
        checkbox(out, "has_co2", "CO2", v.capabilities.has(Capability::Co2))?;
        checkbox(out, "has_mic", "Microphone", v.capabilities.has(Capability::Microphone))?;
        out.write_str("<p><button type=\"submit\">Save</button></p></form></body></html>")
    }
}

fn text_input<W: Write>(out: &mut W, name: &str, label: &str, value: &str, kind: &str) -> fmt::Result {
    write!(out, "<p><label>{label}<br><input type=\"{kind}\" name=\"{name}\" value=\"")?;
    escape(out, value)?;
    out.write_str("\"></label></p>")
}

fn checkbox<W: Write>(out: &mut W, name: &str, label: &str, checked: bool) -> fmt::Result {
    write!(
        out,
        "<p><label><input type=\"checkbox\" name=\"{name}\" value=\"T\"{}> {label}</label></p>",
        if checked { " checked" } else { "" }
    )
}

fn escape<W: Write>(out: &mut W, value: &str) -> fmt::Result {
    for c in value.chars() {
        match c {
            '&' => out.write_str("&amp;")?,
            '<' => out.write_str("&lt;")?,
            '>' => out.write_str("&gt;")?,
            '"' => out.write_str("&quot;")?,
            '\'' => out.write_str("&#39;")?,
            _ => out.write_char(c)?,
        }
    }
    Ok(())
}

fn field_name(error: &FieldError) -> &'static str {
    match error {
        FieldError::Missing(name) | FieldError::Invalid(name, _) => name,
        FieldError::InvalidPort => "mqtt_port",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormError {
    Encoding,
    ValueTooLong,
}

/// Raw form submission. Text fields the browser did not send stay `None`
/// and keep their previous value; checkboxes are on when present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortalSubmission {
    pub wifi_ssid: Option<RawValue>,
    pub wifi_pass: Option<RawValue>,
    pub mqtt_server: Option<RawValue>,
    pub mqtt_port: Option<RawValue>,
    pub mqtt_user: Option<RawValue>,
    pub mqtt_pass: Option<RawValue>,
    pub room_name: Option<RawValue>,
    pub sensor_name: Option<RawValue>,
    pub has_temp: bool,
    pub has_co2: bool,
    pub has_mic: bool,
}

impl PortalSubmission {
    /// Parses an `application/x-www-form-urlencoded` body
    pub fn parse(body: &[u8]) -> Result<Self, FormError> {
        let body = core::str::from_utf8(body).map_err(|_| FormError::Encoding)?;
        let mut submission = Self::default();

        for pair in body.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let value = url_decode(value)?;
            match key {
                "wifi_ssid" => submission.wifi_ssid = Some(value),
                "wifi_pass" => submission.wifi_pass = Some(value),
                "mqtt_server" => submission.mqtt_server = Some(value),
                "mqtt_port" => submission.mqtt_port = Some(value),
                "mqtt_user" => submission.mqtt_user = Some(value),
                "mqtt_pass" => submission.mqtt_pass = Some(value),
                "room_name" => submission.room_name = Some(value),
                "sensor_name" => submission.sensor_name = Some(value),
                "has_temp" => submission.has_temp = true,
                "has_co2" => submission.has_co2 = true,
                "has_mic" => submission.has_mic = true,
                _ => {}
            }
        }

        Ok(submission)
    }

    /// Merges the submission over `prior` and validates the result
    pub fn merge(&self, prior: Option<&DeviceConfig>) -> Result<DeviceConfig, FieldError> {
        let base = PortalForm::prefill(prior).values;

        let broker_port = match &self.mqtt_port {
            Some(port) => parse_port(port)?,
            None => base.broker_port,
        };

        let config = DeviceConfig {
            wifi_ssid: field("wifi_ssid", pick(&self.wifi_ssid, &base.wifi_ssid))?,
            wifi_password: field("wifi_pass", pick(&self.wifi_pass, &base.wifi_password))?,
            broker_host: field("mqtt_server", pick(&self.mqtt_server, &base.broker_host))?,
            broker_port,
            broker_username: field("mqtt_user", pick(&self.mqtt_user, &base.broker_username))?,
            broker_password: field("mqtt_pass", pick(&self.mqtt_pass, &base.broker_password))?,
            room: field("room_name", pick(&self.room_name, &base.room))?,
            sensor_name: field("sensor_name", pick(&self.sensor_name, &base.sensor_name))?,
            capabilities: Capabilities::empty()
                .with(Capability::Climate, self.has_temp)
                .with(Capability::Co2, self.has_co2)
                .with(Capability::Microphone, self.has_mic),
        };
        config.validate()?;
        Ok(config)
    }
}

fn pick<'a>(submitted: &'a Option<RawValue>, prior: &'a str) -> &'a str {
    submitted.as_deref().unwrap_or(prior)
}

fn url_decode(input: &str) -> Result<RawValue, FormError> {
    let mut bytes: Vec<u8, RAW_VALUE_LEN> = Vec::new();
    let mut iter = input.bytes();

    while let Some(b) = iter.next() {
        let decoded = match b {
            b'+' => b' ',
            b'%' => {
                let hi = iter.next().and_then(hex_digit);
                let lo = iter.next().and_then(hex_digit);
                match (hi, lo) {
                    (Some(hi), Some(lo)) => hi << 4 | lo,
                    _ => return Err(FormError::Encoding),
                }
            }
            other => other,
        };
        bytes.push(decoded).map_err(|_| FormError::ValueTooLong)?;
    }

    String::from_utf8(bytes).map_err(|_| FormError::Encoding)
}

fn hex_digit(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}
