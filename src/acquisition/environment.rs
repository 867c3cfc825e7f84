//! Periodic temperature/pressure/humidity polling.

use crate::acquisition::shutdown::ShutdownSignal;
use crate::acquisition::state::{FieldUpdate, StateAggregator};
use crate::error::AppResult;
use crate::hardware::capabilities::EnvironmentalSensor;
use crate::measurement_types::EnvironmentalReading;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Samples the environmental sensor on a fixed period and republishes the triple.
///
/// A failed sample leaves the last good reading in place; the next tick tries again.
pub struct EnvironmentalPoller {
    sensor: Box<dyn EnvironmentalSensor>,
    state: Arc<StateAggregator>,
    period: Duration,
    failures: u64,
}

impl EnvironmentalPoller {
    /// Poller owning `sensor`
    pub fn new(
        sensor: Box<dyn EnvironmentalSensor>,
        state: Arc<StateAggregator>,
        period: Duration,
    ) -> Self {
        Self {
            sensor,
            state,
            period,
            failures: 0,
        }
    }

    /// Take one sample and publish it.
    pub async fn poll_once(&mut self) -> AppResult<EnvironmentalReading> {
        let reading = self.sensor.sample().await?;
        self.state.publish(FieldUpdate::Environment(reading));
        Ok(reading)
    }

    /// Samples that have failed so far
    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Poll until shutdown. The first sample is taken immediately.
    pub async fn run(mut self, mut shutdown: ShutdownSignal) -> AppResult<()> {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match self.poll_once().await {
                        Ok(reading) => debug!(
                            temperature_c = reading.temperature_c,
                            pressure_hpa = reading.pressure_hpa,
                            humidity_pct = reading.humidity_pct,
                            "environmental sample"
                        ),
                        Err(e) => {
                            self.failures += 1;
                            warn!(error = %e, failures = self.failures, "environmental sample failed, keeping previous value");
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::shutdown::shutdown_channel;
    use crate::hardware::mock::MockEnvironmentalSensor;

    #[tokio::test]
    async fn test_poll_publishes_triple() {
        let state = Arc::new(StateAggregator::new());
        let sensor = MockEnvironmentalSensor::new(EnvironmentalReading::new(18.0, 1009.5, 62.0));
        let mut poller =
            EnvironmentalPoller::new(Box::new(sensor), state.clone(), Duration::from_secs(10));

        poller.poll_once().await.unwrap();
        assert_eq!(
            state.snapshot().environment,
            Some(EnvironmentalReading::new(18.0, 1009.5, 62.0))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_keeps_previous_value() {
        let state = Arc::new(StateAggregator::new());
        let sensor = MockEnvironmentalSensor::new(EnvironmentalReading::new(20.0, 1000.0, 50.0));
        let handle = sensor.handle();
        let poller =
            EnvironmentalPoller::new(Box::new(sensor), state.clone(), Duration::from_secs(10));
        let (trigger, signal) = shutdown_channel();
        let task = tokio::spawn(poller.run(signal));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(
            state.snapshot().environment,
            Some(EnvironmentalReading::new(20.0, 1000.0, 50.0))
        );

        handle.set_failing(true);
        handle.set_reading(EnvironmentalReading::new(99.0, 99.0, 99.0));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(
            state.snapshot().environment,
            Some(EnvironmentalReading::new(20.0, 1000.0, 50.0))
        );

        handle.set_failing(false);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(
            state.snapshot().environment,
            Some(EnvironmentalReading::new(99.0, 99.0, 99.0))
        );

        trigger.trigger();
        task.await.unwrap().unwrap();
        assert!(handle.samples_taken() >= 3);
    }
}
