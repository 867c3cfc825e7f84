//! Sensor acquisition.
//!
//! Samplers turn hardware signals into typed measurements and publish them into the
//! [`StateAggregator`]; the [`AcquisitionScheduler`] runs each one as its own task next
//! to the periodic logger.

pub mod environment;
pub mod particulate;
pub mod pulse;
pub mod scheduler;
pub mod shutdown;
pub mod state;
pub mod vane;

pub use environment::EnvironmentalPoller;
pub use particulate::{ParticulateFrameReader, ParticulateSampler};
pub use pulse::{AnemometerGeometry, PulseCounter, PulseWindowCounter, RainAccumulator};
pub use scheduler::{
    AcquisitionScheduler, RunningStation, ShutdownReport, StationHardware, StationSinks,
    TaskKind, TaskOutcome,
};
pub use shutdown::{shutdown_channel, ShutdownSignal, ShutdownTrigger};
pub use state::{FieldUpdate, StateAggregator, StationSnapshot};
pub use vane::{Direction, VaneCode};
