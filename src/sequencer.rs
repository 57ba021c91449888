//! # Flight phase sequencer
//!
//! Drives a vehicle through a scripted flight: wait for health, arm, take off, wait for a first altitude threshold,
//! optionally rotate while climbing in offboard mode, hover and land. Every phase is gated by polled telemetry and
//! every command has to succeed for the flight to continue, the first failure ends the sequence.
//!
//! The flight is described by a [FlightPlan]. Two plans are provided, [FlightPlan::rotate_climb()] and
//! [FlightPlan::takeoff_and_land()], the second one skips the offboard part.
//!
//! ``` no_run
//! # async fn fly(vehicle: uav_sequencer::Vehicle) -> Result<(), uav_sequencer::SequenceError> {
//! use uav_sequencer::{FlightPlan, FlightSequencer};
//!
//! let mut sequencer = FlightSequencer::new(vehicle, FlightPlan::rotate_climb());
//! sequencer.run().await
//! # }
//! ```

use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::link::VehicleLink;
use crate::subsystems::offboard::VelocityBodyYawspeed;
use crate::Error;

/// Where the sequence currently is
///
/// Phases are ordered, a sequence only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Opening the link, discovering the autopilot and setting up telemetry
    Connecting,
    /// Waiting for the vehicle to report healthy
    HealthWait,
    /// Arming the motors
    Arming,
    /// Taking off
    Takeoff,
    /// Waiting for the first altitude threshold
    ClimbToThreshold,
    /// Rotating in place while climbing, in offboard mode
    RotateClimb,
    /// Hovering
    Hover,
    /// Leaving offboard mode
    OffboardStop,
    /// Landing and waiting to be on the ground
    Landing,
    /// Sequence completed
    Done,
}

/// Altitude condition ending the climb-to-threshold phase
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Threshold {
    /// Relative altitude strictly greater than the value (meters)
    Exceeds(f32),
    /// Relative altitude greater than or equal to the value (meters)
    Reaches(f32),
}

impl Threshold {
    /// True when `altitude_m` satisfies the threshold
    pub fn passed(&self, altitude_m: f32) -> bool {
        match *self {
            Threshold::Exceeds(threshold) => altitude_m > threshold,
            Threshold::Reaches(threshold) => altitude_m >= threshold,
        }
    }

    fn altitude(&self) -> f32 {
        match *self {
            Threshold::Exceeds(threshold) | Threshold::Reaches(threshold) => threshold,
        }
    }
}

/// Offboard rotate-while-climbing maneuver
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotateClimb {
    /// Climb rate (meters/second, positive up)
    pub climb_rate_m_s: f32,
    /// Yaw rate (degrees/second)
    pub yaw_rate_deg_s: f32,
    /// Relative altitude ending the maneuver (meters)
    pub target_altitude_m: f32,
}

impl RotateClimb {
    fn setpoint(&self) -> VelocityBodyYawspeed {
        VelocityBodyYawspeed {
            down_m_s: -self.climb_rate_m_s,
            yawspeed_deg_s: self.yaw_rate_deg_s,
            ..VelocityBodyYawspeed::NEUTRAL
        }
    }
}

/// Configuration of a flight sequence
#[derive(Debug, Clone, PartialEq)]
pub struct FlightPlan {
    /// How long to wait for an autopilot when connecting
    pub discovery_timeout: Duration,
    /// Position telemetry rate requested from the autopilot
    pub position_rate_hz: f64,
    /// Take-off altitude to set before taking off, `None` keeps the autopilot setting
    pub takeoff_altitude_m: Option<f32>,
    /// Altitude condition after take-off
    pub climb_threshold: Threshold,
    /// Offboard maneuver flown after the threshold, `None` to skip it
    pub rotate_climb: Option<RotateClimb>,
    /// Hover duration before landing
    pub hover_duration: Duration,
    /// Poll interval of the health and landing waits
    pub status_poll: Duration,
    /// Poll interval of the altitude waits
    pub altitude_poll: Duration,
}

impl FlightPlan {
    /// Take off, rotate at 45°/s while climbing at 0.5 m/s from 1 m up to 5 m, hover 5 s and land
    ///
    /// The hover is flown in offboard mode with the neutral setpoint still streamed, offboard is left afterwards.
    pub fn rotate_climb() -> Self {
        Self {
            discovery_timeout: Duration::from_secs(5),
            position_rate_hz: 5.0,
            takeoff_altitude_m: None,
            climb_threshold: Threshold::Exceeds(1.0),
            rotate_climb: Some(RotateClimb {
                climb_rate_m_s: 0.5,
                yaw_rate_deg_s: 45.0,
                target_altitude_m: 5.0,
            }),
            hover_duration: Duration::from_secs(5),
            status_poll: Duration::from_secs(1),
            altitude_poll: Duration::from_millis(200),
        }
    }

    /// Take off to 1.75 m, wait until 1.7 m is reached, hover 5 s and land
    pub fn takeoff_and_land() -> Self {
        Self {
            takeoff_altitude_m: Some(1.75),
            climb_threshold: Threshold::Reaches(1.7),
            rotate_climb: None,
            ..Self::rotate_climb()
        }
    }
}

impl Default for FlightPlan {
    fn default() -> Self {
        Self::rotate_climb()
    }
}

/// A failed flight sequence
///
/// Displays as the failed step followed by the cause, for example `Arming failed: timeout`.
#[derive(Debug)]
pub struct SequenceError {
    /// Phase the sequence was in
    pub phase: Phase,
    /// Step that failed
    pub context: &'static str,
    /// Cause of the failure
    pub source: Error,
}

impl SequenceError {
    /// Failure to reach the vehicle
    pub fn connecting(source: Error) -> Self {
        let context = match source {
            Error::Timeout => "Timed out waiting for system",
            _ => "Connection failed",
        };
        Self {
            phase: Phase::Connecting,
            context,
            source,
        }
    }
}

impl std::fmt::Display for SequenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.context, self.source)
    }
}

impl std::error::Error for SequenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// # The flight sequencer
///
/// Owns the vehicle link for the whole flight. See the [sequencer module documentation](crate::sequencer) for more
/// context and information.
pub struct FlightSequencer<L> {
    link: L,
    plan: FlightPlan,
    phase: Phase,
    observer: Option<JoinHandle<()>>,
}

impl<L: VehicleLink> FlightSequencer<L> {
    /// Create a sequencer for an already connected vehicle
    pub fn new(link: L, plan: FlightPlan) -> Self {
        Self {
            link,
            plan,
            phase: Phase::Connecting,
            observer: None,
        }
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The vehicle link
    pub fn link(&self) -> &L {
        &self.link
    }

    /// Fly the whole sequence
    ///
    /// Returns at the first failing step, the vehicle is left as it is.
    pub async fn run(&mut self) -> Result<(), SequenceError> {
        self.setup_telemetry().await?;
        self.wait_healthy().await;
        self.arm().await?;
        self.takeoff().await?;
        self.wait_climb_threshold().await;

        let rotate_climb = self.plan.rotate_climb;
        if let Some(rotate_climb) = rotate_climb {
            self.rotate_climb(rotate_climb).await?;
        }

        self.hover().await;

        if rotate_climb.is_some() {
            self.stop_offboard().await?;
        }

        self.land().await?;

        self.advance(Phase::Done);
        println!("Landed. Finished.");
        Ok(())
    }

    fn advance(&mut self, next: Phase) {
        debug_assert!(next > self.phase, "phase {:?} after {:?}", next, self.phase);
        log::debug!("Phase {:?} -> {:?}", self.phase, next);
        self.phase = next;
    }

    fn failed(&self, context: &'static str) -> impl FnOnce(Error) -> SequenceError {
        let phase = self.phase;
        move |source| SequenceError {
            phase,
            context,
            source,
        }
    }

    async fn setup_telemetry(&mut self) -> Result<(), SequenceError> {
        self.link
            .set_rate_position(self.plan.position_rate_hz)
            .await
            .map_err(self.failed("Setting rate failed"))?;

        let mut positions = self.link.subscribe_position();
        self.observer = Some(tokio::spawn(async move {
            while let Some(position) = positions.next().await {
                println!("[Telem] Altitude (rel): {} m", position.relative_altitude_m);
            }
        }));
        Ok(())
    }

    async fn wait_healthy(&mut self) {
        self.advance(Phase::HealthWait);
        while !self.link.health_all_ok() {
            println!("Vehicle is getting ready to arm...");
            sleep(self.plan.status_poll).await;
        }
    }

    async fn arm(&mut self) -> Result<(), SequenceError> {
        self.advance(Phase::Arming);
        println!("Arming...");
        self.link.arm().await.map_err(self.failed("Arming failed"))
    }

    async fn takeoff(&mut self) -> Result<(), SequenceError> {
        self.advance(Phase::Takeoff);
        if let Some(altitude) = self.plan.takeoff_altitude_m {
            self.link
                .set_takeoff_altitude(altitude)
                .await
                .map_err(self.failed("Setting takeoff altitude failed"))?;
        }

        println!("Taking off...");
        self.link.takeoff().await.map_err(self.failed("Takeoff failed"))
    }

    async fn wait_climb_threshold(&mut self) {
        self.advance(Phase::ClimbToThreshold);
        let threshold = self.plan.climb_threshold;
        loop {
            let altitude = self.link.position().relative_altitude_m;
            println!("Current altitude: {} m", altitude);
            if threshold.passed(altitude) {
                println!("Altitude above {} m", threshold.altitude());
                return;
            }
            sleep(self.plan.altitude_poll).await;
        }
    }

    async fn rotate_climb(&mut self, rotate_climb: RotateClimb) -> Result<(), SequenceError> {
        self.advance(Phase::RotateClimb);

        // Offboard is only accepted while setpoints are streaming
        self.link
            .set_velocity_body(VelocityBodyYawspeed::NEUTRAL)
            .await
            .map_err(self.failed("Offboard setpoint failed"))?;

        println!("Starting offboard...");
        self.link
            .offboard_start()
            .await
            .map_err(self.failed("Offboard start failed"))?;

        println!(
            "Rotating at {} deg/s while climbing to {} m...",
            rotate_climb.yaw_rate_deg_s, rotate_climb.target_altitude_m
        );
        self.link
            .set_velocity_body(rotate_climb.setpoint())
            .await
            .map_err(self.failed("Offboard setpoint failed"))?;

        loop {
            let altitude = self.link.position().relative_altitude_m;
            println!("Current altitude: {} m", altitude);
            if altitude >= rotate_climb.target_altitude_m {
                break;
            }
            sleep(self.plan.altitude_poll).await;
        }

        println!("Reached {} m, stopping rotation", rotate_climb.target_altitude_m);
        self.link
            .set_velocity_body(VelocityBodyYawspeed::NEUTRAL)
            .await
            .map_err(self.failed("Offboard setpoint failed"))
    }

    async fn hover(&mut self) {
        self.advance(Phase::Hover);
        println!("Hovering for {} seconds...", self.plan.hover_duration.as_secs_f32());
        sleep(self.plan.hover_duration).await;
    }

    async fn stop_offboard(&mut self) -> Result<(), SequenceError> {
        self.advance(Phase::OffboardStop);
        println!("Stopping offboard...");
        self.link
            .offboard_stop()
            .await
            .map_err(self.failed("Offboard stop failed"))
    }

    async fn land(&mut self) -> Result<(), SequenceError> {
        self.advance(Phase::Landing);
        println!("Landing...");
        self.link.land().await.map_err(self.failed("Land failed"))?;

        while self.link.in_air() {
            println!("Vehicle is landing...");
            sleep(self.plan.status_poll).await;
        }
        Ok(())
    }
}

impl<L> Drop for FlightSequencer<L> {
    fn drop(&mut self) {
        if let Some(observer) = self.observer.take() {
            observer.abort();
        }
    }
}
