//! # Action subsystem
//!
//! One-shot vehicle actions: arming, take-off and landing. Every action is a MAVLink command and only returns once
//! the autopilot acknowledged it, an autopilot refusing the action gives an [Error::CommandDenied].
//!
//! The take-off altitude is an autopilot parameter (`MIS_TAKEOFF_ALT` on PX4), it has to be set before calling
//! [Action::takeoff()]:
//! ``` no_run
//! # async fn takeoff(vehicle: &uav_sequencer::Vehicle) -> uav_sequencer::Result<()> {
//! vehicle.action.arm().await?;
//! vehicle.action.set_takeoff_altitude(2.5).await?;
//! vehicle.action.takeoff().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use flume::Receiver;
use futures::lock::Mutex;
use mavlink::common::{MavCmd, MavMessage, MavParamType, PARAM_SET_DATA};

use crate::mav_utils::{param_id, CommandSender, WaitForMessage};
use crate::{Error, Result};

const TAKEOFF_ALTITUDE_PARAM: &str = "MIS_TAKEOFF_ALT";

/// # Access to the action subsystem
///
/// See the [action module documentation](crate::subsystems::action) for more context and information.
pub struct Action {
    commands: Arc<CommandSender>,
    param_downlink: Mutex<Receiver<MavMessage>>,
    param_timeout: Duration,
    param_retries: u8,
    takeoff_altitude: std::sync::Mutex<Option<f32>>,
}

impl Action {
    pub(crate) fn new(
        commands: Arc<CommandSender>,
        param_downlink: Receiver<MavMessage>,
        param_timeout: Duration,
        param_retries: u8,
    ) -> Self {
        Self {
            commands,
            param_downlink: Mutex::new(param_downlink),
            param_timeout,
            param_retries,
            takeoff_altitude: std::sync::Mutex::new(None),
        }
    }

    /// Arm the motors
    pub async fn arm(&self) -> Result<()> {
        self.commands
            .send_command_long(MavCmd::MAV_CMD_COMPONENT_ARM_DISARM, [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])
            .await
    }

    /// Disarm the motors, the autopilot refuses this while flying
    pub async fn disarm(&self) -> Result<()> {
        self.commands
            .send_command_long(MavCmd::MAV_CMD_COMPONENT_ARM_DISARM, [0.0; 7])
            .await
    }

    /// Take off to the configured take-off altitude
    pub async fn takeoff(&self) -> Result<()> {
        self.commands
            .send_command_long(MavCmd::MAV_CMD_NAV_TAKEOFF, [f32::NAN; 7])
            .await
    }

    /// Land at the current position
    pub async fn land(&self) -> Result<()> {
        self.commands
            .send_command_long(MavCmd::MAV_CMD_NAV_LAND, [f32::NAN; 7])
            .await
    }

    /// Set the altitude, relative to home and in meters, reached by [Action::takeoff()]
    ///
    /// Returns once the autopilot echoed the new parameter value.
    pub async fn set_takeoff_altitude(&self, altitude_m: f32) -> Result<()> {
        let id = param_id(TAKEOFF_ALTITUDE_PARAM)?;
        let downlink = self.param_downlink.lock().await;
        downlink.drain().for_each(drop);

        let target = self.commands.target();
        let pk = MavMessage::PARAM_SET(PARAM_SET_DATA {
            param_value: altitude_m,
            target_system: target.system_id,
            target_component: target.component_id,
            param_id: id,
            param_type: MavParamType::MAV_PARAM_TYPE_REAL32,
        });

        for _ in 0..self.param_retries.max(1) {
            self.commands.uplink().send_async(pk.clone()).await?;

            let echo = tokio::time::timeout(
                self.param_timeout,
                downlink.wait_message(|msg| match msg {
                    MavMessage::PARAM_VALUE(value) if value.param_id == id => Some(value.param_value),
                    _ => None,
                }),
            )
            .await;

            match echo {
                Ok(Ok(value)) if value == altitude_m => {
                    if let Ok(mut takeoff_altitude) = self.takeoff_altitude.lock() {
                        *takeoff_altitude = Some(value);
                    }
                    return Ok(());
                }
                Ok(Ok(value)) => {
                    return Err(Error::ParamError(format!(
                        "{} set to {} but autopilot kept {}",
                        TAKEOFF_ALTITUDE_PARAM, altitude_m, value
                    )))
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => log::debug!("No echo for {}, retrying", TAKEOFF_ALTITUDE_PARAM),
            }
        }

        Err(Error::Timeout)
    }

    /// Last take-off altitude confirmed by the autopilot, if it was set through this lib
    pub fn takeoff_altitude(&self) -> Option<f32> {
        self.takeoff_altitude.lock().ok().and_then(|altitude| *altitude)
    }
}
