use embassy_time::{Duration, Instant, Timer};
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;
use libscd::asynchronous::scd30::Scd30 as Scd30Sensor;
use log::{error, info};

use super::{Co2Reading, SensorAdapter};
use crate::constants::AMBIENT_PRESSURE_HPA;
use crate::error::SensorError;

/// Maximum number of retries for SCD30 initialization
const MAX_INIT_RETRIES: u8 = 5;
/// Internal sampling period; keeps a fresh value ready for every cycle
const SAMPLING_INTERVAL_SECS: u16 = 2;
/// Maximum time to wait for sensor data to be ready
const DATA_READY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Scd30<I2C, D> {
    sensor: Scd30Sensor<I2C, D>,
}

impl<I2C: I2c, D: DelayNs> Scd30<I2C, D> {
    pub async fn new(i2c: I2C, delay: D) -> Result<Self, SensorError> {
        info!("Initialising Scd30...");
        let mut sensor = Scd30Sensor::new(i2c, delay);

        Timer::after(Duration::from_millis(1000)).await;

        let mut retries = 0;
        loop {
            match sensor.stop_continuous_measurement().await {
                Ok(_) => break,
                Err(e) => {
                    retries += 1;
                    if retries >= MAX_INIT_RETRIES {
                        error!(
                            "SCD30: Failed to stop continuous measurement after {} retries: {:?}",
                            MAX_INIT_RETRIES, e
                        );
                        return Err(SensorError::InitFailed);
                    }
                    info!("SCD30: {:?}, retry {}/{}", e, retries, MAX_INIT_RETRIES);
                    Timer::after(Duration::from_millis(5000)).await;
                }
            }
        }

        Timer::after(Duration::from_millis(1000)).await;
        sensor
            .set_measurement_interval(SAMPLING_INTERVAL_SECS)
            .await
            .map_err(|e| {
                error!("SCD30: Failed to set measurement interval: {:?}", e);
                SensorError::InitFailed
            })?;

        Timer::after(Duration::from_millis(100)).await;
        sensor
            .start_continuous_measurement(AMBIENT_PRESSURE_HPA)
            .await
            .map_err(|e| {
                error!("SCD30: Failed to start continuous measurement: {:?}", e);
                SensorError::InitFailed
            })?;

        info!("Initialised Scd30");

        Ok(Self { sensor })
    }
}

impl<I2C: I2c, D: DelayNs> SensorAdapter for Scd30<I2C, D> {
    type Reading = Co2Reading;

    async fn read(&mut self) -> Result<Co2Reading, SensorError> {
        let start = Instant::now();

        loop {
            if start.elapsed() > DATA_READY_TIMEOUT {
                error!("SCD30: Timeout waiting for data ready");
                return Err(SensorError::ReadFailed);
            }

            match self.sensor.data_ready().await {
                Ok(true) => break,
                Ok(false) => Timer::after(Duration::from_millis(100)).await,
                Err(e) => {
                    error!("SCD30: Error checking data ready: {:?}", e);
                    return Err(SensorError::ReadFailed);
                }
            }
        }

        match self.sensor.read_measurement().await {
            Ok(sample) => Ok(Co2Reading {
                co2_ppm: sample.co2,
            }),
            Err(e) => {
                error!("SCD30: Error reading measurement: {:?}", e);
                Err(SensorError::ReadFailed)
            }
        }
    }
}
