//! # Telemetry subsystem
//!
//! The autopilot streams its state continuously. This subsystem keeps the latest known value of everything the lib
//! cares about and exposes it through non-blocking getters:
//! - Position (global position and altitude relative to home)
//! - Health (sensor calibration, position estimates, pre-arm checks)
//! - Landed state and armed flag
//!
//! Position samples can also be observed as a stream:
//! ``` no_run
//! # use futures::StreamExt;
//! # async fn observe(vehicle: &uav_sequencer::Vehicle) -> uav_sequencer::Result<()> {
//! vehicle.telemetry.set_rate_position(5.0).await?;
//!
//! let mut positions = vehicle.telemetry.subscribe_position();
//! while let Some(position) = positions.next().await {
//!     println!("Altitude (rel): {} m", position.relative_altitude_m);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! The stream never blocks the telemetry task: a subscriber that does not keep up misses the oldest samples.

use std::sync::{Arc, Mutex};

use async_broadcast::{broadcast, InactiveReceiver};
use flume as channel;
use futures::Stream;
use mavlink::common::{
    MavAutopilot, MavCmd, MavLandedState, MavMessage, MavModeFlag, MavSysStatusSensor, SYS_STATUS_DATA,
};
use tokio::task::JoinHandle;

use crate::mav_utils::CommandSender;
use crate::Result;

const GLOBAL_POSITION_INT_ID: f32 = 33.0;
const HOME_POSITION_ID: f32 = 242.0;

const POSITION_BROADCAST_CAPACITY: usize = 16;

/// A position sample
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Position {
    /// Latitude in degrees
    pub latitude_deg: f64,
    /// Longitude in degrees
    pub longitude_deg: f64,
    /// Altitude above mean sea level in meters
    pub absolute_altitude_m: f32,
    /// Altitude above the home position in meters
    pub relative_altitude_m: f32,
}

/// Vehicle health flags
///
/// Calibration and arming flags come from the `SYS_STATUS` sensor bitfields, the position flags are set once the
/// corresponding estimate has been received from the autopilot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Health {
    /// Gyrometer present and healthy
    pub is_gyrometer_calibration_ok: bool,
    /// Accelerometer present and healthy
    pub is_accelerometer_calibration_ok: bool,
    /// Magnetometer present and healthy
    pub is_magnetometer_calibration_ok: bool,
    /// A local position estimate is available
    pub is_local_position_ok: bool,
    /// A global position estimate is available
    pub is_global_position_ok: bool,
    /// The home position has been set
    pub is_home_position_ok: bool,
    /// Pre-arm checks pass
    pub is_armable: bool,
}

impl Health {
    /// True when every health flag is set, the vehicle is ready to arm
    pub fn all_ok(&self) -> bool {
        self.is_gyrometer_calibration_ok
            && self.is_accelerometer_calibration_ok
            && self.is_magnetometer_calibration_ok
            && self.is_local_position_ok
            && self.is_global_position_ok
            && self.is_home_position_ok
            && self.is_armable
    }
}

#[derive(Debug, Default)]
pub(crate) struct TelemetryState {
    position: Position,
    health: Health,
    landed_state: Option<MavLandedState>,
    armed: bool,
}

impl TelemetryState {
    /// Fold a message into the state, returns the new position if the message was a position sample
    pub(crate) fn update(&mut self, msg: &MavMessage) -> Option<Position> {
        match msg {
            MavMessage::GLOBAL_POSITION_INT(data) => {
                self.position = Position {
                    latitude_deg: data.lat as f64 * 1e-7,
                    longitude_deg: data.lon as f64 * 1e-7,
                    absolute_altitude_m: data.alt as f32 * 1e-3,
                    relative_altitude_m: data.relative_alt as f32 * 1e-3,
                };
                self.health.is_global_position_ok = true;
                return Some(self.position);
            }
            MavMessage::LOCAL_POSITION_NED(_) => self.health.is_local_position_ok = true,
            MavMessage::HOME_POSITION(_) => self.health.is_home_position_ok = true,
            MavMessage::SYS_STATUS(data) => self.update_sensors(data),
            MavMessage::EXTENDED_SYS_STATE(data) => self.landed_state = Some(data.landed_state),
            MavMessage::HEARTBEAT(data) if data.autopilot != MavAutopilot::MAV_AUTOPILOT_INVALID => {
                self.armed = data.base_mode.contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED);
            }
            _ => (),
        }
        None
    }

    fn update_sensors(&mut self, data: &SYS_STATUS_DATA) {
        let present = data.onboard_control_sensors_present;
        let enabled = data.onboard_control_sensors_enabled;
        let healthy = data.onboard_control_sensors_health;

        let sensor_ok = |sensor: MavSysStatusSensor| present.contains(sensor) && healthy.contains(sensor);

        self.health.is_gyrometer_calibration_ok = sensor_ok(MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_3D_GYRO);
        self.health.is_accelerometer_calibration_ok =
            sensor_ok(MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_3D_ACCEL);
        self.health.is_magnetometer_calibration_ok = sensor_ok(MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_3D_MAG);

        // Autopilots that do not report pre-arm checks are considered armable
        let prearm = MavSysStatusSensor::MAV_SYS_STATUS_PREARM_CHECK;
        self.health.is_armable = !(present.contains(prearm) && enabled.contains(prearm)) || healthy.contains(prearm);
    }

    pub(crate) fn in_air(&self) -> bool {
        matches!(
            self.landed_state,
            Some(MavLandedState::MAV_LANDED_STATE_IN_AIR)
                | Some(MavLandedState::MAV_LANDED_STATE_TAKEOFF)
                | Some(MavLandedState::MAV_LANDED_STATE_LANDING)
        )
    }
}

/// # Access to the telemetry subsystem
///
/// See the [telemetry module documentation](crate::subsystems::telemetry) for more context and information.
pub struct Telemetry {
    commands: Arc<CommandSender>,
    state: Arc<Mutex<TelemetryState>>,
    position_receiver: InactiveReceiver<Position>,
    _telemetry_task: JoinHandle<()>,
}

impl Telemetry {
    pub(crate) fn new(downlink: channel::Receiver<MavMessage>, commands: Arc<CommandSender>) -> Self {
        let (mut position_broadcast, position_receiver) = broadcast(POSITION_BROADCAST_CAPACITY);
        position_broadcast.set_overflow(true);
        position_broadcast.set_await_active(false);
        let position_receiver = position_receiver.deactivate();

        let state: Arc<Mutex<TelemetryState>> = Default::default();
        let task_state = state.clone();

        let _telemetry_task = tokio::spawn(async move {
            while let Ok(msg) = downlink.recv_async().await {
                let position = match task_state.lock() {
                    Ok(mut state) => state.update(&msg),
                    Err(_) => return,
                };

                if let Some(position) = position {
                    // Fails when nobody subscribed, samples are simply not kept then
                    let _ = position_broadcast.broadcast(position).await;
                }
            }
        });

        Self {
            commands,
            state,
            position_receiver,
            _telemetry_task,
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&TelemetryState) -> T) -> T {
        match self.state.lock() {
            Ok(state) => f(&state),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    /// Set the rate at which the autopilot streams position samples
    ///
    /// A rate of 0 or less stops the stream.
    pub async fn set_rate_position(&self, rate_hz: f64) -> Result<()> {
        let interval_us = if rate_hz > 0.0 { 1e6 / rate_hz } else { -1.0 };

        self.commands
            .send_command_long(
                MavCmd::MAV_CMD_SET_MESSAGE_INTERVAL,
                [GLOBAL_POSITION_INT_ID, interval_us as f32, 0.0, 0.0, 0.0, 0.0, 0.0],
            )
            .await
    }

    /// Ask the autopilot to send its home position
    pub async fn request_home_position(&self) -> Result<()> {
        self.commands
            .send_command_long(
                MavCmd::MAV_CMD_REQUEST_MESSAGE,
                [HOME_POSITION_ID, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            )
            .await
    }

    /// Stream of position samples, starting with the next one received
    pub fn subscribe_position(&self) -> impl Stream<Item = Position> + Send + Unpin + 'static {
        self.position_receiver.activate_cloned()
    }

    /// Latest position sample
    pub fn position(&self) -> Position {
        self.with_state(|state| state.position)
    }

    /// Latest health report
    pub fn health(&self) -> Health {
        self.with_state(|state| state.health)
    }

    /// True when every health flag is set
    pub fn health_all_ok(&self) -> bool {
        self.health().all_ok()
    }

    /// True while the vehicle is taking off, flying or landing
    pub fn in_air(&self) -> bool {
        self.with_state(|state| state.in_air())
    }

    /// True when the autopilot reports its motors armed
    pub fn armed(&self) -> bool {
        self.with_state(|state| state.armed)
    }
}
