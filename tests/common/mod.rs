// Simulated autopilot answering on a loopback UDP port
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mavlink::common::*;
use mavlink::{MavConnection, MavHeader};

type Connection = Arc<dyn MavConnection<MavMessage> + Send + Sync>;

const SIM_HEADER: MavHeader = MavHeader {
    system_id: 1,
    component_id: 1,
    sequence: 0,
};

#[derive(Debug, Default)]
pub struct SimState {
    pub commands: Vec<COMMAND_LONG_DATA>,
    pub params: Vec<(String, f32)>,
    pub setpoints: usize,
    pub armed: bool,
    pub flying: bool,
    pub offboard: bool,
}

impl SimState {
    pub fn command_ids(&self) -> Vec<MavCmd> {
        self.commands.iter().map(|command| command.command).collect()
    }
}

pub struct SimAutopilot {
    pub port: u16,
    pub state: Arc<Mutex<SimState>>,
    stop: Arc<AtomicBool>,
}

impl SimAutopilot {
    /// Accept every command
    pub fn start() -> Self {
        Self::denying(Vec::new())
    }

    /// Answer `MAV_RESULT_DENIED` to the listed commands
    pub fn denying(denied: Vec<MavCmd>) -> Self {
        let port = free_port();
        let connection: Connection = Arc::from(
            mavlink::connect::<MavMessage>(&format!("udpout:127.0.0.1:{}", port)).expect("sim link"),
        );
        let state = Arc::new(Mutex::new(SimState::default()));
        let stop = Arc::new(AtomicBool::new(false));

        let (stream_connection, stream_state, stream_stop) = (connection.clone(), state.clone(), stop.clone());
        std::thread::spawn(move || {
            while !stream_stop.load(Relaxed) {
                let messages = telemetry(&stream_state.lock().unwrap());
                for msg in messages {
                    let _ = stream_connection.send(&SIM_HEADER, &msg);
                }
                std::thread::sleep(Duration::from_millis(50));
            }
        });

        let (answer_state, answer_stop) = (state.clone(), stop.clone());
        std::thread::spawn(move || {
            while !answer_stop.load(Relaxed) {
                let Ok((_, msg)) = connection.recv() else {
                    continue;
                };
                if let Some(answer) = answer(&mut answer_state.lock().unwrap(), &denied, msg) {
                    let _ = connection.send(&SIM_HEADER, &answer);
                }
            }
        });

        Self { port, state, stop }
    }

    pub fn url(&self) -> String {
        format!("udp://127.0.0.1:{}", self.port)
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap()
    }
}

impl Drop for SimAutopilot {
    fn drop(&mut self) {
        self.stop.store(true, Relaxed);
    }
}

pub fn free_port() -> u16 {
    std::net::UdpSocket::bind("127.0.0.1:0")
        .and_then(|socket| socket.local_addr())
        .map(|address| address.port())
        .expect("free port")
}

pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

fn telemetry(state: &SimState) -> Vec<MavMessage> {
    let mut base_mode = MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED;
    if state.armed {
        base_mode |= MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED;
    }

    let relative_alt = match (state.flying, state.offboard) {
        (false, _) => 0,
        (true, false) => 2_000,
        (true, true) => 6_000,
    };

    let sensors = MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_3D_GYRO
        | MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_3D_ACCEL
        | MavSysStatusSensor::MAV_SYS_STATUS_SENSOR_3D_MAG
        | MavSysStatusSensor::MAV_SYS_STATUS_PREARM_CHECK;

    vec![
        MavMessage::HEARTBEAT(HEARTBEAT_DATA {
            custom_mode: 0,
            mavtype: MavType::MAV_TYPE_QUADROTOR,
            autopilot: MavAutopilot::MAV_AUTOPILOT_PX4,
            base_mode,
            system_status: MavState::MAV_STATE_STANDBY,
            mavlink_version: 3,
        }),
        MavMessage::SYS_STATUS(SYS_STATUS_DATA {
            onboard_control_sensors_present: sensors,
            onboard_control_sensors_enabled: sensors,
            onboard_control_sensors_health: sensors,
            ..Default::default()
        }),
        MavMessage::GLOBAL_POSITION_INT(GLOBAL_POSITION_INT_DATA {
            lat: 473_977_418,
            lon: 85_455_939,
            alt: 488_000 + relative_alt,
            relative_alt,
            ..Default::default()
        }),
        MavMessage::LOCAL_POSITION_NED(LOCAL_POSITION_NED_DATA::default()),
        MavMessage::HOME_POSITION(HOME_POSITION_DATA::default()),
        MavMessage::EXTENDED_SYS_STATE(EXTENDED_SYS_STATE_DATA {
            landed_state: if state.flying {
                MavLandedState::MAV_LANDED_STATE_IN_AIR
            } else {
                MavLandedState::MAV_LANDED_STATE_ON_GROUND
            },
            ..Default::default()
        }),
    ]
}

fn answer(state: &mut SimState, denied: &[MavCmd], msg: MavMessage) -> Option<MavMessage> {
    match msg {
        MavMessage::COMMAND_LONG(command) => {
            let result = if denied.contains(&command.command) {
                MavResult::MAV_RESULT_DENIED
            } else {
                apply(state, &command);
                MavResult::MAV_RESULT_ACCEPTED
            };
            let ack = MavMessage::COMMAND_ACK(COMMAND_ACK_DATA {
                command: command.command,
                result,
                ..Default::default()
            });
            state.commands.push(command);
            Some(ack)
        }
        MavMessage::PARAM_SET(param) => {
            let name = String::from_utf8_lossy(&param.param_id)
                .trim_end_matches('\0')
                .to_owned();
            state.params.push((name, param.param_value));
            Some(MavMessage::PARAM_VALUE(PARAM_VALUE_DATA {
                param_value: param.param_value,
                param_count: 1,
                param_index: 0,
                param_id: param.param_id,
                param_type: param.param_type,
            }))
        }
        MavMessage::SET_POSITION_TARGET_LOCAL_NED(_) => {
            state.setpoints += 1;
            None
        }
        _ => None,
    }
}

fn apply(state: &mut SimState, command: &COMMAND_LONG_DATA) {
    match command.command {
        MavCmd::MAV_CMD_COMPONENT_ARM_DISARM => state.armed = command.param1 == 1.0,
        MavCmd::MAV_CMD_NAV_TAKEOFF => state.flying = true,
        MavCmd::MAV_CMD_NAV_LAND => {
            state.flying = false;
            state.armed = false;
        }
        MavCmd::MAV_CMD_DO_SET_MODE => state.offboard = command.param2 == 6.0,
        _ => (),
    }
}
