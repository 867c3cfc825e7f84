//! Simulated weather station.
//!
//! Drives the mock hardware with a slowly drifting weather model so the whole
//! acquisition pipeline can run on a machine without sensors:
//!
//! - anemometer pulses every 100 ms at a rate matching the modelled wind speed
//! - occasional rain gauge tips while it is raining
//! - vane switch levels and a BME280 reading updated every 10 s
//! - one SDS018 frame per second on the serial pipe, with a corrupted checksum now
//!   and then

use crate::acquisition::particulate::{encode_frame, FRAME_LEN};
use crate::acquisition::scheduler::StationHardware;
use crate::acquisition::shutdown::ShutdownSignal;
use crate::acquisition::vane::VaneCode;
use crate::config::StationConfig;
use crate::error::AppResult;
use crate::hardware::mock::{DuplexConnector, MockEnvironmentalSensor, MockGpio};
use crate::measurement_types::EnvironmentalReading;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

const EDGE_TICK: Duration = Duration::from_millis(100);
const WEATHER_TICK: Duration = Duration::from_secs(10);
const FRAME_TICK: Duration = Duration::from_secs(1);
const PIPE_BUFFER: usize = 64 * FRAME_LEN;

/// Vane codes in compass order, N first.
const COMPASS_CODES: [u8; 8] = [
    0b0111, 0b0011, 0b1011, 0b1001, 0b1101, 0b1100, 0b1110, 0b0110,
];

#[derive(Debug, Clone)]
struct WeatherModel {
    wind_kmh: f64,
    heading: usize,
    raining: bool,
    environment: EnvironmentalReading,
    pm25: f64,
    pm10: f64,
}

impl Default for WeatherModel {
    fn default() -> Self {
        Self {
            wind_kmh: 8.0,
            heading: 0,
            raining: false,
            environment: EnvironmentalReading::new(15.0, 1013.0, 65.0),
            pm25: 8.0,
            pm10: 14.0,
        }
    }
}

/// Pins and geometry the simulator needs to produce believable signals.
#[derive(Debug, Clone)]
struct Wiring {
    anemometer_pin: u8,
    km_per_edge: f64,
    rain_pin: u8,
    vane_pins: [u8; 4],
}

/// Background driver for the mock hardware.
pub struct SimulatedStation {
    gpio: MockGpio,
    sensor: MockEnvironmentalSensor,
    host: Option<DuplexStream>,
    wiring: Wiring,
    weather: WeatherModel,
    wind_phase: f64,
    frames_sent: u64,
    rng: StdRng,
}

impl SimulatedStation {
    /// Simulator plus the hardware handles to give the scheduler.
    pub fn new(config: &StationConfig) -> AppResult<(Self, StationHardware)> {
        Self::build(config, StdRng::from_entropy())
    }

    /// Reproducible variant of [`new`](Self::new)
    pub fn with_seed(config: &StationConfig, seed: u64) -> AppResult<(Self, StationHardware)> {
        Self::build(config, StdRng::seed_from_u64(seed))
    }

    fn build(config: &StationConfig, rng: StdRng) -> AppResult<(Self, StationHardware)> {
        let wiring = Wiring {
            anemometer_pin: config.anemometer.pin,
            km_per_edge: config.anemometer.circumference_cm()
                / 100_000.0
                / f64::from(config.anemometer.pulses_per_revolution.max(1)),
            rain_pin: config.rain_gauge.pin,
            vane_pins: config.vane_pins()?,
        };

        let weather = WeatherModel::default();
        let gpio = MockGpio::new();
        let sensor = MockEnvironmentalSensor::new(weather.environment);
        let (connector, host) = DuplexConnector::pair(PIPE_BUFFER);

        let hardware = StationHardware {
            gpio: Arc::new(gpio.clone()),
            environment: Box::new(sensor.handle()),
            serial: Some(Box::new(connector)),
        };

        let mut station = Self {
            gpio,
            sensor,
            host: Some(host),
            wiring,
            weather,
            wind_phase: 0.0,
            frames_sent: 0,
            rng,
        };
        station.apply_vane();
        Ok((station, hardware))
    }

    /// Produce signals until shutdown.
    pub async fn run(mut self, mut shutdown: ShutdownSignal) -> AppResult<()> {
        let mut edge_tick = tokio::time::interval(EDGE_TICK);
        let mut weather_tick = tokio::time::interval(WEATHER_TICK);
        let mut frame_tick = tokio::time::interval(FRAME_TICK);
        for ticker in [&mut edge_tick, &mut weather_tick, &mut frame_tick] {
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        }

        info!("simulated station running");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = edge_tick.tick() => self.emit_edges(),
                _ = weather_tick.tick() => self.drift_weather(),
                _ = frame_tick.tick() => self.send_frame().await,
            }
        }

        info!(frames = self.frames_sent, "simulated station stopped");
        Ok(())
    }

    fn emit_edges(&mut self) {
        let hours = EDGE_TICK.as_secs_f64() / 3600.0;
        self.wind_phase += self.weather.wind_kmh * hours / self.wiring.km_per_edge;
        let edges = self.wind_phase.floor();
        self.wind_phase -= edges;
        self.gpio.emit_edges(self.wiring.anemometer_pin, edges as u64);

        if self.weather.raining && self.rng.gen_bool(0.02) {
            self.gpio.emit_edges(self.wiring.rain_pin, 1);
        }
    }

    fn drift_weather(&mut self) {
        let w = &mut self.weather;
        w.wind_kmh = (w.wind_kmh + self.rng.gen_range(-2.0..2.0)).clamp(0.0, 60.0);
        if self.rng.gen_bool(0.1) {
            let step = if self.rng.gen_bool(0.5) { 1 } else { COMPASS_CODES.len() - 1 };
            w.heading = (w.heading + step) % COMPASS_CODES.len();
        }
        if self.rng.gen_bool(0.05) {
            w.raining = !w.raining;
        }

        let env = w.environment;
        w.environment = EnvironmentalReading::new(
            (env.temperature_c + self.rng.gen_range(-0.2..0.2)).clamp(-30.0, 45.0),
            (env.pressure_hpa + self.rng.gen_range(-0.3..0.3)).clamp(950.0, 1050.0),
            (env.humidity_pct + self.rng.gen_range(-1.0..1.0)).clamp(0.0, 100.0),
        );
        w.pm25 = (w.pm25 + self.rng.gen_range(-0.5..0.5)).clamp(0.0, 500.0);
        w.pm10 = (w.pm10 + self.rng.gen_range(-0.8..0.8)).clamp(w.pm25, 999.0);

        self.sensor.set_reading(w.environment);
        self.apply_vane();
        debug!(wind_kmh = self.weather.wind_kmh, raining = self.weather.raining, "weather drift");
    }

    fn apply_vane(&self) {
        let code = VaneCode::from_bits(COMPASS_CODES[self.weather.heading]);
        for (pin, level) in self.wiring.vane_pins.into_iter().zip(code.0) {
            self.gpio.set_level(pin, level);
        }
    }

    async fn send_frame(&mut self) {
        let Some(host) = self.host.as_mut() else {
            return;
        };

        let mut frame = encode_frame(
            (self.weather.pm25 * 10.0).round() as u16,
            (self.weather.pm10 * 10.0).round() as u16,
            [0x5A, 0xA5],
        );
        if self.rng.gen_bool(0.04) {
            frame[8] ^= 0xFF;
        }

        match tokio::time::timeout(FRAME_TICK, host.write_all(&frame)).await {
            Ok(Ok(())) => self.frames_sent += 1,
            Ok(Err(e)) => {
                debug!(error = %e, "particulate reader gone, no more frames");
                self.host = None;
            }
            Err(_) => debug!("particulate pipe full, frame dropped"),
        }
    }
}
