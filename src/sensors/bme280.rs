use bme280_rs::{AsyncBme280, Oversampling, SensorMode};
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;
use log::{error, info};

use super::{ClimateReading, SensorAdapter};
use crate::error::SensorError;

/// Combined temperature / pressure / humidity sensor
pub struct Bme280<I2C, D> {
    sensor: AsyncBme280<I2C, D>,
}

impl<I2C: I2c, D: DelayNs> Bme280<I2C, D> {
    pub async fn new(i2c: I2C, delay: D) -> Result<Self, SensorError> {
        info!("Initialising BME280...");
        let mut sensor = AsyncBme280::new(i2c, delay);
        sensor.init().await.map_err(|_| SensorError::InitFailed)?;

        sensor
            .set_sampling_configuration(
                bme280_rs::Configuration::default()
                    .with_temperature_oversampling(Oversampling::Oversample1)
                    .with_pressure_oversampling(Oversampling::Oversample1)
                    .with_humidity_oversampling(Oversampling::Oversample1)
                    .with_sensor_mode(SensorMode::Normal),
            )
            .await
            .map_err(|_| SensorError::InitFailed)?;

        info!("Initialised BME280");

        Ok(Self { sensor })
    }
}

impl<I2C: I2c, D: DelayNs> SensorAdapter for Bme280<I2C, D> {
    type Reading = ClimateReading;

    async fn read(&mut self) -> Result<ClimateReading, SensorError> {
        let sample = self.sensor.read_sample().await.map_err(|_| {
            error!("BME280: read failed");
            SensorError::ReadFailed
        })?;

        match (sample.temperature, sample.pressure, sample.humidity) {
            (Some(temperature), Some(pressure), Some(humidity)) => Ok(ClimateReading {
                temperature,
                pressure,
                humidity,
            }),
            _ => {
                error!("BME280: incomplete sample");
                Err(SensorError::ReadFailed)
            }
        }
    }
}
