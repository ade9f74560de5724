use core::net::Ipv4Addr;

use embassy_executor::Spawner;
use embassy_net::{Ipv4Cidr, Runner, Stack, StackResources, StaticConfigV4};
use embassy_sync::{blocking_mutex::raw::NoopRawMutex, mutex::Mutex};
use embassy_time::{with_timeout, Duration};

use esp_hal::rng::Rng;
use esp_radio::{
    wifi::{ClientConfig, Config, ModeConfig, WifiController, WifiDevice, WifiStaState},
    Controller,
};

use log::{info, warn};
use static_cell::StaticCell;

use crate::connectivity::NetworkLink;
use crate::constants::WIFI_CONNECT_TIMEOUT_SECS;
use crate::error::NetworkError;
use crate::identity::DeviceIdentity;

/// Address of the node on its own access point
pub const GATEWAY: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 1);

pub type SharedController = Mutex<NoopRawMutex, WifiController<'static>>;

static CONTROLLER: StaticCell<SharedController> = StaticCell::new();
static STA_RESOURCES: StaticCell<StackResources<4>> = StaticCell::new();
static AP_RESOURCES: StaticCell<StackResources<6>> = StaticCell::new();

#[derive(Debug)]
pub enum Error {
    WifiInitFailed,
    SpawnFailed,
}

/// Radio brought up with one network stack per interface. The station and
/// the access point share the controller and never run at the same time.
pub struct Radio {
    pub controller: &'static SharedController,
    pub sta_stack: Stack<'static>,
    pub ap_stack: Stack<'static>,
}

impl Radio {
    pub fn new(
        init: &'static Controller<'static>,
        wifi: esp_hal::peripherals::WIFI<'static>,
        rng: Rng,
        identity: &DeviceIdentity,
        spawner: Spawner,
    ) -> Result<Self, Error> {
        let (controller, interfaces) = esp_radio::wifi::new(init, wifi, Config::default())
            .map_err(|_| Error::WifiInitFailed)?;

        let mut dhcp_config = embassy_net::DhcpConfig::default();
        dhcp_config.hostname = Some(identity.hostname());

        let seed = (rng.random() as u64) << 32 | rng.random() as u64;

        let (sta_stack, sta_runner) = embassy_net::new(
            interfaces.sta,
            embassy_net::Config::dhcpv4(dhcp_config),
            STA_RESOURCES.init(StackResources::new()),
            seed,
        );

        let ap_config = embassy_net::Config::ipv4_static(StaticConfigV4 {
            address: Ipv4Cidr::new(GATEWAY, 24),
            gateway: Some(GATEWAY),
            dns_servers: Default::default(),
        });
        let (ap_stack, ap_runner) = embassy_net::new(
            interfaces.ap,
            ap_config,
            AP_RESOURCES.init(StackResources::new()),
            seed,
        );

        spawner.spawn(net_task(sta_runner)).map_err(|_| Error::SpawnFailed)?;
        spawner.spawn(net_task(ap_runner)).map_err(|_| Error::SpawnFailed)?;

        Ok(Self {
            controller: CONTROLLER.init(Mutex::new(controller)),
            sta_stack,
            ap_stack,
        })
    }
}

/// Station side of the radio
pub struct Wifi {
    controller: &'static SharedController,
    pub stack: Stack<'static>,
}

impl Wifi {
    pub fn new(radio: &Radio) -> Self {
        Self {
            controller: radio.controller,
            stack: radio.sta_stack,
        }
    }
}

impl NetworkLink for Wifi {
    async fn associate(&mut self, ssid: &str, password: &str) -> Result<(), NetworkError> {
        let timeout = Duration::from_secs(WIFI_CONNECT_TIMEOUT_SECS);

        {
            let mut controller = self.controller.lock().await;

            if matches!(controller.is_started(), Ok(true)) {
                if let Err(e) = controller.stop_async().await {
                    warn!("Failed to stop WiFi: {:?}", e);
                }
            }

            info!("Connecting to wifi with SSID: {:?}", ssid);
            let client_config = ClientConfig::default()
                .with_ssid(ssid.into())
                .with_password(password.into());
            controller
                .set_config(&ModeConfig::Client(client_config))
                .map_err(|e| {
                    log::error!("Failed to set WiFi config: {:?}", e);
                    NetworkError::AssociationFailed
                })?;
            controller.start_async().await.map_err(|e| {
                log::error!("Failed to start WiFi: {:?}", e);
                NetworkError::AssociationFailed
            })?;

            match with_timeout(timeout, controller.connect_async()).await {
                Ok(Ok(())) => info!("Wifi connected!"),
                Ok(Err(e)) => {
                    warn!("Failed to connect to wifi: {e:?}");
                    return Err(NetworkError::AssociationFailed);
                }
                Err(_) => {
                    warn!("Wifi connection timed out");
                    return Err(NetworkError::Timeout);
                }
            }
        }

        info!("Waiting to get IP address...");
        with_timeout(timeout, self.stack.wait_config_up())
            .await
            .map_err(|_| NetworkError::Timeout)?;
        if let Some(config) = self.stack.config_v4() {
            info!("Got IP: {}", config.address);
        }

        Ok(())
    }

    fn is_up(&self) -> bool {
        esp_radio::wifi::sta_state() == WifiStaState::Connected && self.stack.is_config_up()
    }
}

#[embassy_executor::task(pool_size = 2)]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await
}
