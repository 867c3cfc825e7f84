//! Raspberry Pi backend (feature `rpi`).
//!
//! - [`RpiGpio`]: edge interrupts and level reads through `rppal`'s GPIO driver
//! - [`Bme280Sensor`]: BME280 over `rppal`'s I2C bus, sampled on the blocking pool
//!
//! Pins are claimed on first use and given back to the kernel when their `InputPin`
//! is dropped, so a restarted station can claim them again.

use crate::error::{AppResult, StationError};
use crate::hardware::capabilities::{
    EdgeCallback, EdgeKind, EdgeSubscription, EnvironmentalSensor, GpioCapability,
};
use crate::measurement_types::EnvironmentalReading;
use async_trait::async_trait;
use bme280::i2c::BME280;
use rppal::gpio::{Gpio, InputPin, Trigger};
use rppal::hal::Delay;
use rppal::i2c::I2c;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

fn trigger_for(edge: EdgeKind) -> Trigger {
    match edge {
        EdgeKind::Rising => Trigger::RisingEdge,
        EdgeKind::Falling => Trigger::FallingEdge,
        EdgeKind::Both => Trigger::Both,
    }
}

/// GPIO header of the Pi the station runs on.
pub struct RpiGpio {
    gpio: Gpio,
    level_pins: Mutex<HashMap<u8, InputPin>>,
}

impl RpiGpio {
    /// Open the GPIO peripheral.
    pub fn new() -> AppResult<Self> {
        let gpio = Gpio::new().map_err(|e| StationError::Gpio {
            pin: 0,
            reason: format!("GPIO peripheral unavailable: {e}"),
        })?;
        Ok(Self {
            gpio,
            level_pins: Mutex::new(HashMap::new()),
        })
    }

    fn claim(&self, pin: u8) -> AppResult<rppal::gpio::Pin> {
        self.gpio.get(pin).map_err(|e| StationError::Gpio {
            pin,
            reason: e.to_string(),
        })
    }
}

impl GpioCapability for RpiGpio {
    fn subscribe(
        &self,
        pin: u8,
        edge: EdgeKind,
        debounce: Option<Duration>,
        callback: EdgeCallback,
    ) -> AppResult<EdgeSubscription> {
        let mut input = self.claim(pin)?.into_input_pullup();
        input
            .set_async_interrupt(trigger_for(edge), debounce, move |_event| callback())
            .map_err(|e| StationError::Gpio {
                pin,
                reason: e.to_string(),
            })?;

        tracing::debug!(pin, ?edge, ?debounce, "edge interrupt armed");
        Ok(EdgeSubscription::new(pin, move || drop(input)))
    }

    fn read_level(&self, pin: u8) -> AppResult<bool> {
        let mut pins = self
            .level_pins
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(input) = pins.get(&pin) {
            return Ok(input.is_high());
        }
        let input = self.claim(pin)?.into_input_pulldown();
        let level = input.is_high();
        pins.insert(pin, input);
        Ok(level)
    }
}

/// BME280 temperature/pressure/humidity sensor on an I2C bus.
pub struct Bme280Sensor {
    device: Arc<Mutex<BME280<I2c>>>,
}

impl Bme280Sensor {
    /// Open `bus` and initialize the sensor at `address` (0x76 or 0x77).
    pub fn open(bus: u8, address: u8) -> AppResult<Self> {
        let i2c = I2c::with_bus(bus)
            .map_err(|e| StationError::Sensor(format!("I2C bus {bus} unavailable: {e}")))?;
        let mut device = match address {
            0x76 => BME280::new_primary(i2c),
            0x77 => BME280::new_secondary(i2c),
            other => {
                return Err(StationError::Configuration(format!(
                    "BME280 address must be 0x76 or 0x77, got {other:#04x}"
                )))
            }
        };
        device
            .init(&mut Delay::new())
            .map_err(|e| StationError::Sensor(format!("BME280 init failed: {e:?}")))?;

        tracing::info!(bus, address = %format!("{address:#04x}"), "BME280 ready");
        Ok(Self {
            device: Arc::new(Mutex::new(device)),
        })
    }
}

#[async_trait]
impl EnvironmentalSensor for Bme280Sensor {
    async fn sample(&mut self) -> AppResult<EnvironmentalReading> {
        let device = self.device.clone();
        let measurements = tokio::task::spawn_blocking(move || {
            device
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .measure(&mut Delay::new())
                .map_err(|e| StationError::Sensor(format!("BME280 measurement failed: {e:?}")))
        })
        .await
        .map_err(|e| StationError::Sensor(format!("BME280 sampling task failed: {e}")))??;

        Ok(EnvironmentalReading::new(
            f64::from(measurements.temperature),
            f64::from(measurements.pressure) / 100.0,
            f64::from(measurements.humidity),
        ))
    }
}
