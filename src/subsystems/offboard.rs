//! # Offboard subsystem
//!
//! In offboard mode the autopilot follows setpoints streamed by the ground instead of its own navigation logic.
//! Setpoints are described as body-frame velocities plus a yaw rate.
//!
//! The autopilot has a couple of safety mechanisms that one needs to be aware of:
//!  - Offboard mode is refused unless setpoints are already being received, a setpoint must be set before calling
//!    [Offboard::start()]
//!  - If setpoints stop arriving the autopilot leaves offboard mode. The lib keeps re-sending the last setpoint at
//!    20 Hz until [Offboard::stop()] is called
//!
//! The following example code would rotate in place for 4 seconds:
//! ``` no_run
//! # use tokio::time::{sleep, Duration};
//! # use uav_sequencer::subsystems::offboard::VelocityBodyYawspeed;
//! # async fn spin(vehicle: &uav_sequencer::Vehicle) -> uav_sequencer::Result<()> {
//! vehicle.offboard.set_velocity_body(VelocityBodyYawspeed::default()).await?;
//! vehicle.offboard.start().await?;
//!
//! vehicle.offboard.set_velocity_body(VelocityBodyYawspeed { yawspeed_deg_s: 90.0, ..Default::default() }).await?;
//! sleep(Duration::from_secs(4)).await;
//!
//! vehicle.offboard.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use flume::Sender;
use mavlink::common::{
    MavCmd, MavFrame, MavMessage, PositionTargetTypemask, SET_POSITION_TARGET_LOCAL_NED_DATA,
};
use tokio::task::JoinHandle;

use crate::mav_utils::{CommandSender, Target};
use crate::{Error, Result};

const RESEND_PERIOD: Duration = Duration::from_millis(50);

// DO_SET_MODE parameters, PX4 custom modes
const MODE_FLAG_CUSTOM_MODE_ENABLED: f32 = 1.0;
const PX4_MAIN_MODE_AUTO: f32 = 4.0;
const PX4_MAIN_MODE_OFFBOARD: f32 = 6.0;
const PX4_SUB_MODE_AUTO_LOITER: f32 = 3.0;

/// Velocity setpoint in the body frame
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VelocityBodyYawspeed {
    /// Velocity forward (meters/second)
    pub forward_m_s: f32,
    /// Velocity to the right (meters/second)
    pub right_m_s: f32,
    /// Velocity down (meters/second), negative to climb
    pub down_m_s: f32,
    /// Yaw rate (degrees/second), positive clockwise seen from above
    pub yawspeed_deg_s: f32,
}

impl VelocityBodyYawspeed {
    /// Zero velocity and zero yaw rate
    pub const NEUTRAL: Self = Self {
        forward_m_s: 0.0,
        right_m_s: 0.0,
        down_m_s: 0.0,
        yawspeed_deg_s: 0.0,
    };

    pub(crate) fn to_message(self, target: Target) -> MavMessage {
        // Only velocity and yaw rate are used
        let type_mask = PositionTargetTypemask::POSITION_TARGET_TYPEMASK_X_IGNORE
            | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_Y_IGNORE
            | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_Z_IGNORE
            | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_AX_IGNORE
            | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_AY_IGNORE
            | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_AZ_IGNORE
            | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_YAW_IGNORE;

        MavMessage::SET_POSITION_TARGET_LOCAL_NED(SET_POSITION_TARGET_LOCAL_NED_DATA {
            time_boot_ms: 0,
            x: 0.0,
            y: 0.0,
            z: 0.0,
            vx: self.forward_m_s,
            vy: self.right_m_s,
            vz: self.down_m_s,
            afx: 0.0,
            afy: 0.0,
            afz: 0.0,
            yaw: 0.0,
            yaw_rate: self.yawspeed_deg_s.to_radians(),
            type_mask,
            target_system: target.system_id,
            target_component: target.component_id,
            coordinate_frame: MavFrame::MAV_FRAME_BODY_NED,
        })
    }
}

/// # Access to the offboard subsystem
///
/// See the [offboard module documentation](crate::subsystems::offboard) for more context and information.
pub struct Offboard {
    commands: Arc<CommandSender>,
    setpoint: Arc<Mutex<Option<VelocityBodyYawspeed>>>,
    resend_task: Mutex<Option<JoinHandle<()>>>,
    active: Mutex<bool>,
}

impl Offboard {
    pub(crate) fn new(commands: Arc<CommandSender>) -> Self {
        Self {
            commands,
            setpoint: Arc::new(Mutex::new(None)),
            resend_task: Mutex::new(None),
            active: Mutex::new(false),
        }
    }

    /// Set and send a velocity setpoint, it is then repeated at 20 Hz
    pub async fn set_velocity_body(&self, setpoint: VelocityBodyYawspeed) -> Result<()> {
        if let Ok(mut current) = self.setpoint.lock() {
            *current = Some(setpoint);
        }

        let target = self.commands.target();
        self.commands.uplink().send_async(setpoint.to_message(target)).await?;

        self.ensure_resending(target);
        Ok(())
    }

    fn ensure_resending(&self, target: Target) {
        let mut resend_task = match self.resend_task.lock() {
            Ok(task) => task,
            Err(_) => return,
        };
        if resend_task.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let uplink: Sender<MavMessage> = self.commands.uplink().clone();
        let setpoint = self.setpoint.clone();
        *resend_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(RESEND_PERIOD);
            // The first tick is immediate and the setpoint was just sent
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let current = match setpoint.lock() {
                    Ok(current) => *current,
                    Err(_) => return,
                };
                let Some(current) = current else {
                    return;
                };
                if uplink.send_async(current.to_message(target)).await.is_err() {
                    return;
                }
            }
        }));
    }

    /// Switch the autopilot to offboard mode
    ///
    /// Returns [Error::NoSetpointSet] if [Offboard::set_velocity_body()] was never called.
    pub async fn start(&self) -> Result<()> {
        let has_setpoint = self.setpoint.lock().map(|s| s.is_some()).unwrap_or(false);
        if !has_setpoint {
            return Err(Error::NoSetpointSet);
        }

        self.commands
            .send_command_long(
                MavCmd::MAV_CMD_DO_SET_MODE,
                [MODE_FLAG_CUSTOM_MODE_ENABLED, PX4_MAIN_MODE_OFFBOARD, 0.0, 0.0, 0.0, 0.0, 0.0],
            )
            .await?;

        self.set_active(true);
        Ok(())
    }

    /// Leave offboard mode, the autopilot switches to hold and keeps its position
    ///
    /// Setpoints are no longer sent once this returns.
    pub async fn stop(&self) -> Result<()> {
        self.commands
            .send_command_long(
                MavCmd::MAV_CMD_DO_SET_MODE,
                [
                    MODE_FLAG_CUSTOM_MODE_ENABLED,
                    PX4_MAIN_MODE_AUTO,
                    PX4_SUB_MODE_AUTO_LOITER,
                    0.0,
                    0.0,
                    0.0,
                    0.0,
                ],
            )
            .await?;

        if let Ok(mut current) = self.setpoint.lock() {
            *current = None;
        }
        if let Some(task) = self.resend_task.lock().ok().and_then(|mut task| task.take()) {
            task.abort();
        }
        self.set_active(false);
        Ok(())
    }

    /// True between a successful [Offboard::start()] and [Offboard::stop()]
    pub fn is_active(&self) -> bool {
        self.active.lock().map(|active| *active).unwrap_or(false)
    }

    fn set_active(&self, active: bool) {
        if let Ok(mut current) = self.active.lock() {
            *current = active;
        }
    }
}

impl Drop for Offboard {
    fn drop(&mut self) {
        if let Some(task) = self.resend_task.get_mut().ok().and_then(|task| task.take()) {
            task.abort();
        }
    }
}
