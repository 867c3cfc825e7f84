//! Hardware capabilities and their backends.
//!
//! - `capabilities`: the traits the samplers are written against
//! - `serial`: serial port opening and draining over `tokio-serial`
//! - `mock`: in-memory stand-ins for tests
//! - `simulator`: drives the mocks with a synthetic weather model
//! - `rpi`: Raspberry Pi GPIO and BME280 (feature `rpi`)

pub mod capabilities;
pub mod mock;
#[cfg(feature = "rpi")]
pub mod rpi;
pub mod serial;
pub mod simulator;

use crate::acquisition::scheduler::StationHardware;
use crate::config::StationConfig;
use crate::error::AppResult;

/// Open the real station hardware described by `config`.
///
/// The particulate connector is created but not opened; opening happens inside the
/// particulate task so that a missing device only affects that task.
#[cfg(feature = "rpi")]
pub fn open_station_hardware(config: &StationConfig) -> AppResult<StationHardware> {
    use std::sync::Arc;

    let gpio = rpi::RpiGpio::new()?;
    let environment = rpi::Bme280Sensor::open(config.environment.bus, config.environment.address)?;
    let serial = config.particulate.enabled.then(|| {
        Box::new(serial::TokioSerialConnector::new(
            config.particulate.port.clone(),
            config.particulate.baud_rate,
        )) as Box<dyn capabilities::SerialConnector>
    });

    Ok(StationHardware {
        gpio: Arc::new(gpio),
        environment: Box::new(environment),
        serial,
    })
}

/// Open the real station hardware (Raspberry Pi support disabled at build time).
#[cfg(not(feature = "rpi"))]
pub fn open_station_hardware(_config: &StationConfig) -> AppResult<StationHardware> {
    Err(crate::error::StationError::Configuration(
        "built without Raspberry Pi support; rebuild with --features rpi or run with --simulate"
            .to_string(),
    ))
}
