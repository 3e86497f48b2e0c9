//! Simulated weather station feeding a hub.
//!
//! Runs an accelerated 24-hour cycle starting at local midnight: every
//! tick a [`WeatherSource`] is sampled and the reading is published through
//! an [`IngestClient`]. Publish failures are logged and the cycle moves on.

pub mod clock;
pub mod publisher;
pub mod rules;
pub mod source;

pub use clock::SimulationClock;
pub use publisher::IngestClient;
pub use source::{RandomWeatherSource, ScriptedSource, SimulatedReading, WeatherSource};

use crate::measurement::{DayPhase, Measurement};
use log::{info, warn};
use tokio_util::sync::CancellationToken;

pub struct Simulator<S: WeatherSource> {
    clock: SimulationClock,
    source: S,
    client: IngestClient,
}

impl<S: WeatherSource> Simulator<S> {
    pub fn new(clock: SimulationClock, source: S, client: IngestClient) -> Self {
        Self {
            clock,
            source,
            client,
        }
    }

    /// Sample the source at the current tick. The extra low-pressure
    /// temperature sample is logged only; it is not published.
    pub fn sample(&mut self) -> Measurement {
        let at = self.clock.now();
        let reading = self.source.measure(at, self.clock.half_step());
        let measurement = reading.to_measurement(at);
        info!("[Sim {}] {}", self.client.simulator_id(), measurement);

        if let Some(extra) = reading.extra_temperature {
            let extra_at = self.clock.half_step();
            info!(
                "[Sim {}] [{}] [{}] extra temp due to low pressure => {:.1}°C",
                self.client.simulator_id(),
                extra_at.format("%H:%M:%S"),
                DayPhase::at(&extra_at),
                extra
            );
        }
        measurement
    }

    /// Run until `shutdown` fires.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            "[Sim {}] Starting simulation, one tick every {:?}",
            self.client.simulator_id(),
            self.clock.real_delay()
        );

        loop {
            let measurement = self.sample();
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.client.publish(std::slice::from_ref(&measurement)) => match result {
                    Ok(ack) if ack.success => {
                        info!("[Sim {}] Hub confirmed: {}", self.client.simulator_id(), ack.message);
                    }
                    Ok(ack) => {
                        warn!("[Sim {}] Hub rejected: {}", self.client.simulator_id(), ack.message);
                    }
                    Err(e) => {
                        warn!("[Sim {}] Publish failed: {}", self.client.simulator_id(), e);
                    }
                },
            }

            self.clock.advance();
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.clock.real_delay()) => {}
            }
        }

        info!("[Sim {}] Simulation stopped", self.client.simulator_id());
    }
}
