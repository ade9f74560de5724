use core::fmt::{self, Write};

use heapless::String;

use crate::constants::{PORTAL_SSID_PREFIX, REMOTE_CONFIG_TOPIC_PREFIX};

/// Length of a MAC rendered as `AA:BB:CC:DD:EE:FF`
pub const MAC_TEXT_LEN: usize = 17;

/// Hardware identity of this node for the current boot.
///
/// The rendered MAC is the broker client id and the `controller_id` of every
/// message the node publishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    mac: [u8; 6],
    text: String<MAC_TEXT_LEN>,
}

impl DeviceIdentity {
    pub fn from_mac(mac: [u8; 6]) -> Self {
        let mut text = String::new();
        for (i, byte) in mac.iter().enumerate() {
            if i > 0 {
                // 17 bytes always fit
                let _ = text.push(':');
            }
            let _ = write!(text, "{:02X}", byte);
        }
        Self { mac, text }
    }

    pub fn mac(&self) -> [u8; 6] {
        self.mac
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// SSID advertised by the provisioning access point
    pub fn portal_ssid(&self) -> String<32> {
        let mut ssid = String::new();
        let _ = write!(ssid, "{}{}", PORTAL_SSID_PREFIX, self.text);
        ssid
    }

    /// Topic used to push configuration to this node
    pub fn remote_config_topic(&self) -> String<48> {
        let mut topic = String::new();
        let _ = write!(topic, "{}{}", REMOTE_CONFIG_TOPIC_PREFIX, self.text);
        topic
    }

    /// DHCP hostname, `sensor-` followed by the last three MAC bytes
    pub fn hostname(&self) -> String<32> {
        let mut name = String::new();
        let _ = write!(
            name,
            "sensor-{:02x}{:02x}{:02x}",
            self.mac[3], self.mac[4], self.mac[5]
        );
        name
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC: [u8; 6] = [0x24, 0x0a, 0xc4, 0x12, 0x34, 0xff];

    #[test]
    fn renders_mac_upper_case_with_colons() {
        let id = DeviceIdentity::from_mac(MAC);
        assert_eq!(id.as_str(), "24:0A:C4:12:34:FF");
    }

    #[test]
    fn derived_names_embed_the_mac() {
        let id = DeviceIdentity::from_mac(MAC);
        assert_eq!(id.portal_ssid().as_str(), "AutoConnectAP24:0A:C4:12:34:FF");
        assert_eq!(
            id.remote_config_topic().as_str(),
            "sensors/config/24:0A:C4:12:34:FF"
        );
        assert_eq!(id.hostname().as_str(), "sensor-1234ff");
    }
}
