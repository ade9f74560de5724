use log::{error, info, warn};

use crate::config::{Capabilities, Capability};
use crate::error::SensorError;

pub mod bme280;
#[cfg(feature = "esp32")]
pub mod i2s;
pub mod microphone;
pub mod scd30;

/// A sensor that yields one reading per call
pub trait SensorAdapter {
    type Reading;

    async fn read(&mut self) -> Result<Self::Reading, SensorError>;
}

/// Temperature in °C, pressure in Pa, relative humidity in %
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimateReading {
    pub temperature: f32,
    pub pressure: f32,
    pub humidity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Co2Reading {
    pub co2_ppm: u16,
}

/// Peak amplitude of one block of microphone samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoundLevel(pub u16);

/// The sensors that came up at boot. A missing slot means the capability is
/// disabled or its sensor failed to initialise, for the rest of the process.
pub struct Sensors<C, G, M> {
    climate: Option<C>,
    co2: Option<G>,
    microphone: Option<M>,
}

impl<C, G, M> Default for Sensors<C, G, M> {
    fn default() -> Self {
        Self {
            climate: None,
            co2: None,
            microphone: None,
        }
    }
}

impl<C, G, M> Sensors<C, G, M>
where
    C: SensorAdapter<Reading = ClimateReading>,
    G: SensorAdapter<Reading = Co2Reading>,
    M: SensorAdapter<Reading = SoundLevel>,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach_climate(&mut self, sensor: Result<C, SensorError>) {
        self.climate = attach(Capability::Climate, sensor);
    }

    pub fn attach_co2(&mut self, sensor: Result<G, SensorError>) {
        self.co2 = attach(Capability::Co2, sensor);
    }

    /// The microphone samples continuously, so a failed init is returned to
    /// the caller instead of degrading.
    pub fn attach_microphone(&mut self, sensor: Result<M, SensorError>) -> Result<(), SensorError> {
        match sensor {
            Ok(sensor) => {
                info!("Microphone ready");
                self.microphone = Some(sensor);
                Ok(())
            }
            Err(e) => {
                error!("Microphone init failed: {:?}", e);
                Err(e)
            }
        }
    }

    /// Capabilities with a working sensor
    pub fn available(&self) -> Capabilities {
        Capabilities::empty()
            .with(Capability::Climate, self.climate.is_some())
            .with(Capability::Co2, self.co2.is_some())
            .with(Capability::Microphone, self.microphone.is_some())
    }

    pub fn climate(&mut self) -> Option<&mut C> {
        self.climate.as_mut()
    }

    pub fn co2(&mut self) -> Option<&mut G> {
        self.co2.as_mut()
    }

    pub fn microphone(&mut self) -> Option<&mut M> {
        self.microphone.as_mut()
    }
}

fn attach<S>(capability: Capability, sensor: Result<S, SensorError>) -> Option<S> {
    match sensor {
        Ok(sensor) => {
            info!("{:?} sensor ready", capability);
            Some(sensor)
        }
        Err(e) => {
            warn!("{:?} sensor unavailable: {:?}", capability, e);
            None
        }
    }
}
