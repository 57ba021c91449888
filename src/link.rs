//! # Vehicle link
//!
//! The [VehicleLink] trait is the set of vehicle operations a flight script needs. [Vehicle] implements it on top of
//! its subsystems, test code implements it with scripted fakes.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;

use crate::subsystems::offboard::VelocityBodyYawspeed;
use crate::subsystems::telemetry::Position;
use crate::{Result, Vehicle};

/// Operations a flight script performs on a connected vehicle
///
/// Reads return the latest known value immediately, commands return once the autopilot accepted or refused them.
#[async_trait]
pub trait VehicleLink: Send + Sync {
    /// Set the position telemetry rate
    async fn set_rate_position(&self, rate_hz: f64) -> Result<()>;
    /// Stream of position samples
    fn subscribe_position(&self) -> BoxStream<'static, Position>;
    /// Latest position sample
    fn position(&self) -> Position;
    /// True when the vehicle is ready to arm
    fn health_all_ok(&self) -> bool;
    /// True while taking off, flying or landing
    fn in_air(&self) -> bool;

    /// Arm the motors
    async fn arm(&self) -> Result<()>;
    /// Set the take-off altitude (meters above home)
    async fn set_takeoff_altitude(&self, altitude_m: f32) -> Result<()>;
    /// Take off
    async fn takeoff(&self) -> Result<()>;
    /// Land at the current position
    async fn land(&self) -> Result<()>;

    /// Enter offboard mode
    async fn offboard_start(&self) -> Result<()>;
    /// Leave offboard mode
    async fn offboard_stop(&self) -> Result<()>;
    /// Send a body-frame velocity setpoint
    async fn set_velocity_body(&self, setpoint: VelocityBodyYawspeed) -> Result<()>;
}

#[async_trait]
impl VehicleLink for Vehicle {
    async fn set_rate_position(&self, rate_hz: f64) -> Result<()> {
        self.telemetry.set_rate_position(rate_hz).await
    }

    fn subscribe_position(&self) -> BoxStream<'static, Position> {
        self.telemetry.subscribe_position().boxed()
    }

    fn position(&self) -> Position {
        self.telemetry.position()
    }

    fn health_all_ok(&self) -> bool {
        self.telemetry.health_all_ok()
    }

    fn in_air(&self) -> bool {
        self.telemetry.in_air()
    }

    async fn arm(&self) -> Result<()> {
        self.action.arm().await
    }

    async fn set_takeoff_altitude(&self, altitude_m: f32) -> Result<()> {
        self.action.set_takeoff_altitude(altitude_m).await
    }

    async fn takeoff(&self) -> Result<()> {
        self.action.takeoff().await
    }

    async fn land(&self) -> Result<()> {
        self.action.land().await
    }

    async fn offboard_start(&self) -> Result<()> {
        self.offboard.start().await
    }

    async fn offboard_stop(&self) -> Result<()> {
        self.offboard.stop().await
    }

    async fn set_velocity_body(&self, setpoint: VelocityBodyYawspeed) -> Result<()> {
        self.offboard.set_velocity_body(setpoint).await
    }
}
