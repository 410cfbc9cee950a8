//! # Tandem Core
//!
//! Shared foundation of the Tandem federated mobility co-simulation.
//!
//! ## Overview
//!
//! This crate provides the pieces every simulator module builds on:
//!
//! - **Clock**: millisecond-precision discrete-event scheduler with FIFO
//!   ordering at equal timestamps
//! - **Wire events**: the `{eventType, source, time, service?, details}`
//!   envelope and typed payloads exchanged through the broker
//! - **Service calendar**: GTFS-style operating-day resolution
//! - **Specifications**: the `/spec` documents checked by the broker's
//!   compatibility gate
//! - **Port**: the trait simulator modules implement to be driven in
//!   lock-step virtual time
//!
//! ## Key Concepts
//!
//! - **Discrete events**: each module advances only by popping its next
//!   scheduled callback; the broker always steps the module with the
//!   earliest next event
//! - **Deterministic**: FIFO same-instant ordering plus seeded RNG in the
//!   scenario sources make event sequences reproducible bit-for-bit

pub mod calendar;
pub mod clock;
pub mod event;
pub mod port;
pub mod spatial;
pub mod spec;

pub use clock::{
    minutes_from_ms, ms_from_minutes, ScheduledEvent, SimulationClock, ONE_DAY_MS, ONE_HOUR_MS,
    ONE_MIN_MS, ONE_SEC_MS,
};
pub use event::{Event, EventBus, EventType, Location};
pub use port::{ModuleError, SimulatorPort};
pub use spec::{ModuleSpecification, VERSION_1};
