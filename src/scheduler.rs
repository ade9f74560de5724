use embassy_time::{Duration, Instant};
use heapless::HistoryBuffer;
use log::{debug, info, warn};

use crate::clock::Clock;
use crate::config::{Capabilities, Capability};
use crate::connectivity::{BrokerSession, ConnectivityManager, NetworkLink};
use crate::constants::{SCHEDULER_TICK, SOUND_SAMPLE_CAPACITY};
use crate::error::RestartReason;
use crate::sensors::{ClimateReading, Co2Reading, SensorAdapter, Sensors, SoundLevel};
use crate::telemetry::{climate_envelopes, co2_envelope, TelemetryEnvelope};

/// Periodic sampling and publishing of the enabled capabilities
pub struct TelemetryScheduler<K> {
    clock: K,
    enabled: Capabilities,
    period: Duration,
    topic: &'static str,
    last_cycle: Option<Instant>,
    sound_samples: HistoryBuffer<u16, SOUND_SAMPLE_CAPACITY>,
}

impl<K: Clock> TelemetryScheduler<K> {
    pub fn new(clock: K, enabled: Capabilities, period: Duration, topic: &'static str) -> Self {
        Self {
            clock,
            enabled,
            period,
            topic,
            last_cycle: None,
            sound_samples: HistoryBuffer::new(),
        }
    }

    /// Runs until the connection can no longer be recovered
    pub async fn run_forever<N, B, K2, C, G, M>(
        &mut self,
        connectivity: &mut ConnectivityManager<N, B, K2>,
        sensors: &mut Sensors<C, G, M>,
    ) -> RestartReason
    where
        N: NetworkLink,
        B: BrokerSession,
        K2: Clock,
        C: SensorAdapter<Reading = ClimateReading>,
        G: SensorAdapter<Reading = Co2Reading>,
        M: SensorAdapter<Reading = SoundLevel>,
    {
        info!(
            "Publishing {:?} every {}s to {}",
            self.enabled,
            self.period.as_secs(),
            self.topic
        );
        loop {
            if let Err(reason) = self.run_cycle(connectivity, sensors).await {
                return reason;
            }
            self.clock.sleep(SCHEDULER_TICK).await;
        }
    }

    pub async fn run_cycle<N, B, K2, C, G, M>(
        &mut self,
        connectivity: &mut ConnectivityManager<N, B, K2>,
        sensors: &mut Sensors<C, G, M>,
    ) -> Result<(), RestartReason>
    where
        N: NetworkLink,
        B: BrokerSession,
        K2: Clock,
        C: SensorAdapter<Reading = ClimateReading>,
        G: SensorAdapter<Reading = Co2Reading>,
        M: SensorAdapter<Reading = SoundLevel>,
    {
        connectivity.ensure_connected().await?;
        connectivity.tick().await;

        if self.enabled.has(Capability::Microphone) {
            if let Some(microphone) = sensors.microphone() {
                match microphone.read().await {
                    Ok(SoundLevel(level)) => self.sound_samples.write(level),
                    Err(e) => debug!("Microphone sample skipped: {:?}", e),
                }
            }
        }

        let now = self.clock.now();
        let due = match self.last_cycle {
            Some(last) => now.duration_since(last) >= self.period,
            None => true,
        };
        if !due {
            return Ok(());
        }
        self.last_cycle = Some(now);

        let identity = connectivity.identity().clone();

        if self.enabled.has(Capability::Climate) {
            if let Some(sensor) = sensors.climate() {
                match sensor.read().await {
                    Ok(reading) => {
                        for envelope in climate_envelopes(&reading, identity.as_str()) {
                            self.publish(connectivity, &envelope).await;
                        }
                    }
                    Err(e) => warn!("Climate reading skipped: {:?}", e),
                }
            }
        }

        if self.enabled.has(Capability::Co2) {
            if let Some(sensor) = sensors.co2() {
                match sensor.read().await {
                    Ok(reading) => {
                        let envelope = co2_envelope(&reading, identity.as_str());
                        self.publish(connectivity, &envelope).await;
                    }
                    Err(e) => warn!("CO2 reading skipped: {:?}", e),
                }
            }
        }

        Ok(())
    }

    /// Samples collected from the microphone, oldest first
    pub fn sound_samples(&self) -> &HistoryBuffer<u16, SOUND_SAMPLE_CAPACITY> {
        &self.sound_samples
    }

    async fn publish<N, B, K2>(
        &self,
        connectivity: &mut ConnectivityManager<N, B, K2>,
        envelope: &TelemetryEnvelope<'_>,
    ) where
        N: NetworkLink,
        B: BrokerSession,
        K2: Clock,
    {
        let payload = match envelope.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Envelope not serialisable: {}", e);
                return;
            }
        };

        match connectivity.publish(self.topic, &payload).await {
            Ok(()) => debug!(
                "Published {:?} = {}",
                envelope.sensor_type, envelope.measure_value
            ),
            Err(e) => warn!("Dropped {:?} reading: {:?}", envelope.sensor_type, e),
        }
    }
}
