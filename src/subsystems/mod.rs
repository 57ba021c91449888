//! # Vehicle subsystems
//!
//! MAVLink autopilots expose their functionalities as a set of microservices (commands, parameters, telemetry
//! streams, offboard control...). The lib groups them in subsystems, each with one logical role, so that a flight
//! script reads as a sequence of calls on `vehicle.action`, `vehicle.telemetry` and `vehicle.offboard`.
//!
//! Modules here implement Rust API for the different subsystems, they are the main way to communicate and
//! interact with the vehicle.

pub mod action;
pub mod offboard;
pub mod telemetry;
