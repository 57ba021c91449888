use crate::endpoint::Endpoint;
use crate::mav_utils::{CommandSender, MavDispatch, Route, Target};
use crate::subsystems::action::Action;
use crate::subsystems::offboard::Offboard;
use crate::subsystems::telemetry::Telemetry;
use crate::{Error, Result};
use flume as channel;
use futures::lock::Mutex;
use mavlink::common::{MavAutopilot, MavMessage, MavModeFlag, MavState, MavType, HEARTBEAT_DATA};
use mavlink::error::MessageReadError;
use mavlink::{MavConnection, MavHeader};
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

type Connection = Arc<dyn MavConnection<MavMessage> + Send + Sync>;

/// Ground station side configuration of the MAVLink connection
#[derive(Debug, Clone)]
pub struct VehicleConfig {
    /// System id used by the lib in outgoing messages
    pub system_id: u8,
    /// Component id used by the lib in outgoing messages
    pub component_id: u8,
    /// How long to wait for an autopilot heartbeat when connecting
    pub discovery_timeout: Duration,
    /// How long to wait for a `COMMAND_ACK` (or a `PARAM_VALUE` echo) before retransmitting
    pub command_timeout: Duration,
    /// Number of transmissions of a command before giving up
    pub command_retries: u8,
    /// Period of the ground station heartbeat
    pub heartbeat_period: Duration,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            system_id: 245,
            component_id: 190,
            discovery_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_millis(500),
            command_retries: 3,
            heartbeat_period: Duration::from_secs(1),
        }
    }
}

/// # The Vehicle
///
/// This struct is one-time use: Creating it will connect to an autopilot and once disconnected, either as requested
/// by the lib user or as a result of a connection loss, the object cannot be reconnected. A new one need to be created
/// to connect again.
///
/// See the [crate root documentation](crate) for more context and information.
pub struct Vehicle {
    /// Telemetry subsystem access
    pub telemetry: Telemetry,
    /// Action subsystem access
    pub action: Action,
    /// Offboard subsystem access
    pub offboard: Offboard,
    target: Target,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    disconnect: Arc<AtomicBool>,
}

impl Vehicle {
    /// Open a connection to the given endpoint and wait for an autopilot
    ///
    /// An error is returned either if the transport cannot be opened ([Error::Connection]) or if no autopilot
    /// heartbeat is received within the configured discovery timeout ([Error::Timeout]).
    pub async fn connect(endpoint: &Endpoint, config: VehicleConfig) -> Result<Self> {
        let address = endpoint.mavlink_address();
        log::debug!("Opening {}", address);

        // Opening serial ports and TCP connections blocks
        let link = tokio::task::spawn_blocking(move || mavlink::connect::<MavMessage>(&address))
            .await
            .map_err(|e| Error::ProtocolError(format!("connection task failed: {}", e)))??;

        Self::connect_from_link(Arc::from(link), config).await
    }

    async fn connect_from_link(link: Connection, config: VehicleConfig) -> Result<Self> {
        let disconnect = Arc::new(AtomicBool::new(false));

        // Downlink, MAVLink reads are blocking so they get their own thread
        let (raw_downlink, raw_rx) = channel::unbounded();
        spawn_receive_thread(link.clone(), raw_downlink, disconnect.clone());

        let target = match tokio::time::timeout(config.discovery_timeout, discover_autopilot(&raw_rx)).await {
            Ok(Ok(target)) => target,
            Ok(Err(e)) => {
                disconnect.store(true, Relaxed);
                return Err(e);
            }
            Err(_) => {
                disconnect.store(true, Relaxed);
                return Err(Error::Timeout);
            }
        };
        log::info!(
            "Autopilot discovered: system {} component {}",
            target.system_id,
            target.component_id
        );

        let mut dispatcher = MavDispatch::new(raw_rx, target, disconnect.clone());

        // Uplink queue
        let disconnect_uplink = disconnect.clone();
        let (uplink, rx) = channel::unbounded::<MavMessage>();
        let link_uplink = link.clone();
        let (system_id, component_id) = (config.system_id, config.component_id);
        let uplink_task = tokio::spawn(async move {
            let mut sequence: u8 = 0;
            while !disconnect_uplink.load(Relaxed) {
                match tokio::time::timeout(Duration::from_millis(100), rx.recv_async()).await {
                    Ok(Ok(msg)) => {
                        let header = MavHeader {
                            system_id,
                            component_id,
                            sequence,
                        };
                        sequence = sequence.wrapping_add(1);
                        if let Err(e) = link_uplink.send(&header, &msg) {
                            log::warn!("Failed to send message: {:?}", e);
                        }
                    }
                    Err(_) => (),
                    Ok(Err(flume::RecvError::Disconnected)) => return,
                }
            }
        });

        // Ground station heartbeat
        let disconnect_heartbeat = disconnect.clone();
        let heartbeat_uplink = uplink.clone();
        let heartbeat_period = config.heartbeat_period;
        let heartbeat_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_period);
            while !disconnect_heartbeat.load(Relaxed) {
                ticker.tick().await;
                if heartbeat_uplink.send_async(gcs_heartbeat()).await.is_err() {
                    return;
                }
            }
        });

        // The get_route_receiver calls are guaranteed to work as long as no route is requested twice
        let telemetry_downlink = dispatcher.get_route_receiver(Route::Telemetry).unwrap();
        let command_downlink = dispatcher.get_route_receiver(Route::Command).unwrap();
        let param_downlink = dispatcher.get_route_receiver(Route::Param).unwrap();

        let commands = Arc::new(CommandSender::new(
            uplink,
            command_downlink,
            target,
            config.command_timeout,
            config.command_retries,
        ));

        let telemetry = Telemetry::new(telemetry_downlink, commands.clone());
        let action = Action::new(
            commands.clone(),
            param_downlink,
            config.command_timeout,
            config.command_retries,
        );
        let offboard = Offboard::new(commands);

        // Start the downlink message dispatcher
        let dispatch_task = dispatcher.run();

        if let Err(e) = telemetry.request_home_position().await {
            log::debug!("Home position request failed: {}", e);
        }

        Ok(Vehicle {
            telemetry,
            action,
            offboard,
            target,
            tasks: Mutex::new(vec![uplink_task, heartbeat_task, dispatch_task]),
            disconnect,
        })
    }

    /// System and component ids of the autopilot this vehicle is connected to
    pub fn target(&self) -> Target {
        self.target
    }

    /// Disconnect the vehicle
    ///
    /// The Connection can be ended in two ways: either by dropping the [Vehicle] object or by calling this
    /// disconnect() function. Once this function return, no more messages are sent to the autopilot.
    pub async fn disconnect(&self) {
        self.disconnect.store(true, Relaxed);

        for task in self.tasks.lock().await.drain(..) {
            let _ = task.await;
        }
    }
}

impl Drop for Vehicle {
    fn drop(&mut self) {
        self.disconnect.store(true, Relaxed);
    }
}

async fn discover_autopilot(downlink: &channel::Receiver<(MavHeader, MavMessage)>) -> Result<Target> {
    loop {
        let (header, msg) = downlink.recv_async().await?;
        if let MavMessage::HEARTBEAT(heartbeat) = msg {
            if heartbeat.autopilot != MavAutopilot::MAV_AUTOPILOT_INVALID {
                return Ok(Target {
                    system_id: header.system_id,
                    component_id: header.component_id,
                });
            }
        }
    }
}

fn spawn_receive_thread(
    link: Connection,
    downlink: channel::Sender<(MavHeader, MavMessage)>,
    disconnect: Arc<AtomicBool>,
) {
    std::thread::spawn(move || {
        while !disconnect.load(Relaxed) {
            match link.recv() {
                Ok(frame) => {
                    if downlink.send(frame).is_err() {
                        return;
                    }
                }
                Err(MessageReadError::Parse(e)) => log::debug!("Dropping unparsable message: {:?}", e),
                Err(MessageReadError::Io(e))
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted
                    ) => {}
                Err(MessageReadError::Io(e)) => {
                    log::warn!("Link closed: {}", e);
                    return;
                }
            }
        }
    });
}

fn gcs_heartbeat() -> MavMessage {
    MavMessage::HEARTBEAT(HEARTBEAT_DATA {
        custom_mode: 0,
        mavtype: MavType::MAV_TYPE_GCS,
        autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
        base_mode: MavModeFlag::empty(),
        system_status: MavState::MAV_STATE_ACTIVE,
        mavlink_version: 3,
    })
}
