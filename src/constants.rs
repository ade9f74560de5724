use embassy_time::Duration;

/// Current firmware version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Size of the heap in DRAM (internal memory)
pub const HEAP_SIZE: usize = 72 * 1024;

/// Size of the TCP socket receive buffer for the broker connection
pub const RX_BUFFER_SIZE: usize = 4096;
/// Size of the TCP socket transmit buffer for the broker connection
pub const TX_BUFFER_SIZE: usize = 4096;

/// Size of the MQTT client receive buffer for application data
pub const MQTT_RX_BUFFER_SIZE: usize = 1024;
/// Size of the MQTT client transmit buffer for application data
pub const MQTT_TX_BUFFER_SIZE: usize = 1024;
/// Maximum number of MQTT v5 properties per packet
pub const MQTT_MAX_PROPERTIES: usize = 5;

/// Broker keepalive, independent of the telemetry period
pub const MQTT_KEEPALIVE: Duration = Duration::from_secs(65);
/// Delay between broker handshake attempts while the network is up
pub const BROKER_RETRY_DELAY: Duration = Duration::from_millis(100);
/// How long a drain waits for the next inbound packet
pub const MQTT_POLL_TIMEOUT: Duration = Duration::from_millis(10);
/// Inbound messages drained per scheduler iteration at most
pub const MQTT_MAX_DRAIN: usize = 8;

/// Station association attempts before the node restarts
pub const MAX_ASSOCIATION_ATTEMPTS: u8 = 5;
/// Delay between station association attempts
pub const ASSOCIATION_RETRY_DELAY: Duration = Duration::from_secs(2);
/// Upper bound for a single association attempt (link + DHCP lease)
pub const WIFI_CONNECT_TIMEOUT_SECS: u64 = 20;

/// Pause before a requested restart so the log reaches the UART
pub const RESTART_DELAY: Duration = Duration::from_secs(3);

/// Pause between scheduler iterations
pub const SCHEDULER_TICK: Duration = Duration::from_millis(50);

/// Number of microphone amplitude samples kept in memory
pub const SOUND_SAMPLE_CAPACITY: usize = 64;

/// Flash offset of the two configuration sectors (the default `nvs` partition)
pub const CONFIG_FLASH_OFFSET: u32 = 0x9000;

/// Access point name prefix, the station MAC is appended
pub const PORTAL_SSID_PREFIX: &str = "AutoConnectAP";

/// Topic for the capability announcement
pub const ANNOUNCE_TOPIC: &str = "/sensors/config";
/// Prefix of the per-device inbound configuration topic
pub const REMOTE_CONFIG_TOPIC_PREFIX: &str = "sensors/config/";

/// Ambient pressure compensation passed to the SCD30 (hPa)
pub const AMBIENT_PRESSURE_HPA: u16 = 1013;
