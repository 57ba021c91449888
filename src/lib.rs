//! # UAV flight sequencer
//!
//! This crate flies scripted sequences on MAVLink autopilots (PX4 first and foremost) using the [mavlink] crate to
//! encode messages and open the link. It is made of two layers:
//!  - A small vehicle API, [Vehicle], organized in subsystems (telemetry, action, offboard) that hide the MAVLink
//!    microservices: heartbeats, command acknowledgement and retransmission, parameter echo, setpoint streaming
//!  - A [FlightSequencer] that drives the vehicle through an ordered list of [Phase]s described by a [FlightPlan]
//!
//! ## Usage
//!
//! The basic procedure to use the lib is:
//!  - Parse the connection endpoint, as a config or user input
//!  - Create a Vehicle object from the endpoint, this will open the link and wait for an autopilot heartbeat
//!  - Subsystems are available as public fields of the [Vehicle] struct
//!  - Either use the subsystems directly or hand the vehicle to a [FlightSequencer]
//!  - Drop the Vehicle object or call [Vehicle::disconnect()]
//!
//! All subsystems functions are only taking an un-mutable reference to self (`&self`), the intention is for the
//! Vehicle object to be shared between tasks using `Arc<>`.
//!
//! For example:
//! ``` no_run
//! # async fn test() -> Result<(), Box<dyn std::error::Error>> {
//! use uav_sequencer::{Endpoint, Vehicle, VehicleConfig};
//!
//! let endpoint = Endpoint::parse("udp://:14540")?;
//! let vehicle = Vehicle::connect(&endpoint, VehicleConfig::default()).await?;
//!
//! while !vehicle.telemetry.health_all_ok() {
//!     tokio::time::sleep(std::time::Duration::from_secs(1)).await;
//! }
//!
//! vehicle.action.arm().await?;
//! vehicle.action.takeoff().await?;
//!
//! vehicle.disconnect().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Binaries
//!
//! `rotate_climb` and `takeoff_land` fly [FlightPlan::rotate_climb()] and [FlightPlan::takeoff_and_land()] on the
//! endpoint given as only argument. Set `RUST_LOG=debug` to see the MAVLink exchanges.

#![warn(missing_docs)]

pub mod cli;
mod endpoint;
mod error;
pub mod link;
mod mav_utils;
pub mod sequencer;
pub mod subsystems;
mod vehicle;

pub use crate::endpoint::{Endpoint, Transport};
pub use crate::error::{Error, Result};
pub use crate::link::VehicleLink;
pub use crate::mav_utils::Target;
pub use crate::sequencer::{FlightPlan, FlightSequencer, Phase, RotateClimb, SequenceError, Threshold};
pub use crate::vehicle::{Vehicle, VehicleConfig};
