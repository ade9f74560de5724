#![no_std]
#![no_main]

use static_cell::{ConstStaticCell, StaticCell};

use embassy_embedded_hal::shared_bus::asynch::i2c::I2cDevice;
use embassy_executor::Spawner;
use embassy_sync::{blocking_mutex::raw::NoopRawMutex, mutex::Mutex};
use embassy_time::{Delay, Duration, Instant, Timer};

use esp_alloc as _;
use esp_backtrace as _;
use esp_hal::{self as hal};
use esp_println::logger::init_logger;
use esp_storage::FlashStorage;

use hal::{
    dma_buffers,
    efuse::Efuse,
    i2c::master::{BusTimeout, I2c},
    i2s::master::{Config as I2sConfig, DataFormat, I2s},
    rng::Rng,
    time::Rate,
    timer::timg::TimerGroup,
    Async,
};
use log::{error, info};

use sensor_node::clock::EmbassyClock;
use sensor_node::config::{Capability, BUILD_CONFIG};
use sensor_node::connectivity::ConnectivityManager;
use sensor_node::constants::*;
use sensor_node::error::{RestartReason, SensorError};
use sensor_node::identity::DeviceIdentity;
use sensor_node::mqtt::{Mqtt, SessionMemory};
use sensor_node::portal_server::Portal;
use sensor_node::provisioning::{BootOutcome, ProvisioningController};
use sensor_node::reset_intent::{BootMarker, ResetIntentDetector, CLEARED_MARKER};
use sensor_node::rtc_marker::RtcMarker;
use sensor_node::scheduler::TelemetryScheduler;
use sensor_node::sensors::{bme280::Bme280, i2s::I2sMicrophone, scd30::Scd30, Sensors};
use sensor_node::storage::ConfigStore;
use sensor_node::telemetry::CapabilityAnnouncement;
use sensor_node::wifi::{Radio, Wifi};

esp_bootloader_esp_idf::esp_app_desc!();

type SharedI2c = I2cDevice<'static, NoopRawMutex, I2c<'static, Async>>;
type NodeSensors = Sensors<Bme280<SharedI2c, Delay>, Scd30<SharedI2c, Delay>, I2sMicrophone>;

static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();
static I2C_BUS: StaticCell<Mutex<NoopRawMutex, I2c<'static, Async>>> = StaticCell::new();
static MQTT_SESSION: ConstStaticCell<SessionMemory> = ConstStaticCell::new(SessionMemory::new());

#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    init_logger(log::LevelFilter::Info);
    info!("sensor node v{}", VERSION);

    let peripherals = esp_hal::init(esp_hal::Config::default());

    esp_alloc::heap_allocator!(size: HEAP_SIZE);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    let identity = DeviceIdentity::from_mac(Efuse::mac_address());
    info!("Device id: {}", identity);

    let store = ConfigStore::new(FlashStorage::new(peripherals.FLASH), CONFIG_FLASH_OFFSET);
    let detector = ResetIntentDetector::new(RtcMarker, BUILD_CONFIG.double_reset_window());

    let radio_init = RADIO.init(esp_radio::init().expect("Failed to initialize radio controller"));
    let radio = Radio::new(radio_init, peripherals.WIFI, Rng::new(), &identity, spawner)
        .expect("Failed to initialize WiFi");
    let mut wifi = Wifi::new(&radio);
    let mut portal = Portal::new(&radio);

    let mut controller = ProvisioningController::new(
        store,
        detector,
        identity.clone(),
        BUILD_CONFIG.portal_password,
        BUILD_CONFIG.portal_timeout(),
    );
    let config = match controller.boot(&mut portal, &mut wifi, &EmbassyClock).await {
        BootOutcome::Operational(config) => config,
        BootOutcome::Restart(reason) => restart(reason),
    };

    if spawner.spawn(reset_window(controller.into_detector())).is_err() {
        error!("Failed to spawn reset window task");
    }

    let mut sensors = NodeSensors::new();

    if config.capabilities.has(Capability::Climate) || config.capabilities.has(Capability::Co2) {
        let i2c_config = hal::i2c::master::Config::default()
            .with_frequency(Rate::from_khz(100))
            .with_timeout(BusTimeout::BusCycles(24));

        let i2c = I2c::new(peripherals.I2C0, i2c_config)
            .expect("Failed to create I2C bus")
            .with_sda(peripherals.GPIO21)
            .with_scl(peripherals.GPIO22)
            .into_async();
        let i2c_bus = I2C_BUS.init(Mutex::new(i2c));

        if config.capabilities.has(Capability::Climate) {
            sensors.attach_climate(Bme280::new(I2cDevice::new(i2c_bus), Delay).await);
        }
        if config.capabilities.has(Capability::Co2) {
            sensors.attach_co2(Scd30::new(I2cDevice::new(i2c_bus), Delay).await);
        }
    }

    if config.capabilities.has(Capability::Microphone) {
        let (rx_buffer, rx_descriptors, _, _) = dma_buffers!(4 * 4092, 0);
        let i2s_config = I2sConfig::new_tdm_philips()
            .with_sample_rate(Rate::from_hz(16000))
            .with_data_format(DataFormat::Data16Channel16);

        let microphone = I2s::new(peripherals.I2S0, peripherals.DMA_I2S0, i2s_config)
            .map_err(|_| SensorError::InitFailed)
            .and_then(|i2s| {
                let rx = i2s
                    .into_async()
                    .i2s_rx
                    .with_bclk(peripherals.GPIO26)
                    .with_ws(peripherals.GPIO25)
                    .with_din(peripherals.GPIO33)
                    .build(rx_descriptors);
                I2sMicrophone::start(spawner, rx, rx_buffer)
            });

        if sensors.attach_microphone(microphone).is_err() {
            halt().await;
        }
    }

    let announcement = CapabilityAnnouncement::new(&identity, &config, sensors.available())
        .to_json()
        .expect("Failed to serialize capability announcement");

    let enabled = config.capabilities;
    let broker = Mqtt::new(radio.sta_stack, MQTT_SESSION.take());

    let mut connectivity =
        match ConnectivityManager::connect(wifi, broker, EmbassyClock, identity, config, announcement)
            .await
        {
            Ok(connectivity) => connectivity,
            Err(reason) => restart(reason),
        };

    let mut scheduler = TelemetryScheduler::new(
        EmbassyClock,
        enabled,
        BUILD_CONFIG.measurement_interval(),
        BUILD_CONFIG.measurement_topic,
    );

    let reason = scheduler.run_forever(&mut connectivity, &mut sensors).await;
    restart(reason)
}

/// Clears the double-reset marker so the reboot is not taken for an operator
/// request, then resets the chip.
fn restart(reason: RestartReason) -> ! {
    error!("Restarting: {:?}", reason);
    let mut marker = RtcMarker;
    marker.write(CLEARED_MARKER);
    esp_hal::system::software_reset()
}

async fn halt() -> ! {
    error!("Halted");
    loop {
        Timer::after(Duration::from_secs(3600)).await;
    }
}

#[embassy_executor::task]
async fn reset_window(mut detector: ResetIntentDetector<RtcMarker>) {
    let since_boot = Instant::now().duration_since(Instant::MIN);
    if detector.expire(since_boot) {
        Timer::after(detector.window() - since_boot).await;
        detector.stop();
    }
    info!("Double reset window closed");
}
