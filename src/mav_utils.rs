//! Various MAVLink utils used by the lib
//!
//! These functionalities are currently all private, some might be useful for the user code as well, lets make them
//! public when needed.

use crate::{Error, Result};
use async_trait::async_trait;
use flume as channel;
use flume::{Receiver, Sender};
use futures::lock::Mutex;
use mavlink::common::{MavCmd, MavMessage, MavResult, COMMAND_LONG_DATA};
use mavlink::MavHeader;
use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// System and component ids of the discovered autopilot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    /// MAVLink system id
    pub system_id: u8,
    /// MAVLink component id
    pub component_id: u8,
}

/// Subsystem a downlink message is delivered to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Route {
    Telemetry,
    Command,
    Param,
}

/// Messages kept for a route drained on demand, later ones are dropped until the subsystem reads them
pub(crate) const ROUTE_BACKLOG: usize = 16;

impl Route {
    fn backlog(self) -> Option<usize> {
        match self {
            // Consumed continuously by the telemetry task
            Route::Telemetry => None,
            Route::Command | Route::Param => Some(ROUTE_BACKLOG),
        }
    }
}

pub(crate) fn route(msg: &MavMessage) -> Option<Route> {
    match msg {
        MavMessage::HEARTBEAT(_)
        | MavMessage::GLOBAL_POSITION_INT(_)
        | MavMessage::LOCAL_POSITION_NED(_)
        | MavMessage::HOME_POSITION(_)
        | MavMessage::SYS_STATUS(_)
        | MavMessage::EXTENDED_SYS_STATE(_) => Some(Route::Telemetry),
        MavMessage::COMMAND_ACK(_) => Some(Route::Command),
        MavMessage::PARAM_VALUE(_) => Some(Route::Param),
        _ => None,
    }
}

pub(crate) struct MavDispatch {
    downlink: Receiver<(MavHeader, MavMessage)>,
    target: Target,
    route_channels: BTreeMap<Route, Sender<MavMessage>>,
    disconnect: Arc<AtomicBool>,
}

impl MavDispatch {
    pub(crate) fn new(
        downlink: Receiver<(MavHeader, MavMessage)>,
        target: Target,
        disconnect: Arc<AtomicBool>,
    ) -> Self {
        MavDispatch {
            downlink,
            target,
            route_channels: BTreeMap::new(),
            disconnect,
        }
    }

    #[allow(clippy::map_entry)]
    pub(crate) fn get_route_receiver(&mut self, route: Route) -> Option<Receiver<MavMessage>> {
        if self.route_channels.contains_key(&route) {
            None
        } else {
            let (tx, rx) = channel::unbounded();
            self.route_channels.insert(route, tx);
            Some(rx)
        }
    }

    pub(crate) fn run(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            while !self.disconnect.load(Relaxed) {
                match tokio::time::timeout(Duration::from_millis(200), self.downlink.recv_async()).await {
                    Ok(Ok((header, msg))) => {
                        if header.system_id != self.target.system_id {
                            continue;
                        }
                        let Some(destination) = route(&msg) else {
                            continue;
                        };
                        let Some(channel) = self.route_channels.get(&destination) else {
                            continue;
                        };
                        if destination.backlog().is_some_and(|backlog| channel.len() >= backlog) {
                            log::debug!("{:?} backlog full, dropping message", destination);
                            continue;
                        }
                        let _ = channel.send_async(msg).await;
                    }
                    Err(_) => continue,
                    Ok(Err(_)) => return, // Receive thread is gone, link closed
                }
            }
        })
    }
}

#[async_trait]
pub(crate) trait WaitForMessage {
    /// Wait for the first message for which `select` returns a value
    async fn wait_message<T, F>(&self, select: F) -> Result<T>
    where
        T: Send,
        F: FnMut(MavMessage) -> Option<T> + Send;
}

#[async_trait]
impl WaitForMessage for channel::Receiver<MavMessage> {
    async fn wait_message<T, F>(&self, mut select: F) -> Result<T>
    where
        T: Send,
        F: FnMut(MavMessage) -> Option<T> + Send,
    {
        loop {
            let msg = self.recv_async().await.map_err(|_| Error::Disconnected)?;
            if let Some(value) = select(msg) {
                return Ok(value);
            }
        }
    }
}

/// Sends `COMMAND_LONG` and waits for the matching `COMMAND_ACK`
///
/// Only one command is in flight at a time, concurrent callers wait their turn.
pub(crate) struct CommandSender {
    uplink: Sender<MavMessage>,
    ack_downlink: Mutex<Receiver<MavMessage>>,
    target: Target,
    timeout: Duration,
    retries: u8,
}

impl CommandSender {
    pub(crate) fn new(
        uplink: Sender<MavMessage>,
        ack_downlink: Receiver<MavMessage>,
        target: Target,
        timeout: Duration,
        retries: u8,
    ) -> Self {
        Self {
            uplink,
            ack_downlink: Mutex::new(ack_downlink),
            target,
            timeout,
            retries,
        }
    }

    pub(crate) fn target(&self) -> Target {
        self.target
    }

    pub(crate) fn uplink(&self) -> &Sender<MavMessage> {
        &self.uplink
    }

    /// Send a command and wait for it to be acknowledged
    ///
    /// The command is retransmitted with an increasing `confirmation` field every time the ack timeout expires.
    /// `MAV_RESULT_IN_PROGRESS` restarts the wait without consuming an attempt.
    pub(crate) async fn send_command_long(&self, command: MavCmd, params: [f32; 7]) -> Result<()> {
        let downlink = self.ack_downlink.lock().await;

        // Acks left over from an earlier command that timed out
        downlink.drain().for_each(drop);

        for confirmation in 0..self.retries.max(1) {
            log::debug!("Sending {:?} (confirmation {})", command, confirmation);
            self.uplink
                .send_async(command_long(self.target, command, params, confirmation))
                .await?;

            loop {
                let ack = tokio::time::timeout(
                    self.timeout,
                    downlink.wait_message(|msg| match msg {
                        MavMessage::COMMAND_ACK(ack) if ack.command == command => Some(ack.result),
                        _ => None,
                    }),
                )
                .await;

                match ack {
                    Ok(Ok(MavResult::MAV_RESULT_IN_PROGRESS)) => continue,
                    Ok(Ok(MavResult::MAV_RESULT_ACCEPTED)) => return Ok(()),
                    Ok(Ok(result)) => return Err(Error::CommandDenied { command, result }),
                    Ok(Err(e)) => return Err(e),
                    Err(_) => break,
                }
            }
        }

        log::warn!("No ack received for {:?}", command);
        Err(Error::Timeout)
    }
}

fn command_long(target: Target, command: MavCmd, params: [f32; 7], confirmation: u8) -> MavMessage {
    MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
        param1: params[0],
        param2: params[1],
        param3: params[2],
        param4: params[3],
        param5: params[4],
        param6: params[5],
        param7: params[6],
        command,
        target_system: target.system_id,
        target_component: target.component_id,
        confirmation,
    })
}

/// Encode a parameter name as the zero padded 16 bytes id used by the parameter protocol
pub(crate) fn param_id(name: &str) -> Result<[u8; 16]> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > 16 {
        return Err(Error::ParamError(format!("invalid parameter name '{}'", name)));
    }
    let mut id = [0u8; 16];
    id[..bytes.len()].copy_from_slice(bytes);
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mavlink::common::{COMMAND_ACK_DATA, PARAM_VALUE_DATA};

    const TARGET: Target = Target {
        system_id: 1,
        component_id: 1,
    };

    fn ack(command: MavCmd, result: MavResult) -> MavMessage {
        MavMessage::COMMAND_ACK(COMMAND_ACK_DATA {
            command,
            result,
            ..Default::default()
        })
    }

    #[test]
    fn routes_by_message_kind() {
        assert_eq!(
            route(&ack(MavCmd::MAV_CMD_NAV_LAND, MavResult::MAV_RESULT_ACCEPTED)),
            Some(Route::Command)
        );
        assert_eq!(
            route(&MavMessage::PARAM_VALUE(PARAM_VALUE_DATA::default())),
            Some(Route::Param)
        );
        assert_eq!(
            route(&MavMessage::HEARTBEAT(Default::default())),
            Some(Route::Telemetry)
        );
        assert_eq!(route(&MavMessage::COMMAND_LONG(Default::default())), None);
    }

    #[test]
    fn route_receivers_are_handed_out_once() {
        let (_tx, rx) = channel::unbounded();
        let mut dispatch = MavDispatch::new(rx, TARGET, Arc::new(AtomicBool::new(false)));
        assert!(dispatch.get_route_receiver(Route::Command).is_some());
        assert!(dispatch.get_route_receiver(Route::Command).is_none());
        assert!(dispatch.get_route_receiver(Route::Param).is_some());
    }

    #[tokio::test]
    async fn dispatch_drops_other_systems() {
        let (tx, rx) = channel::unbounded();
        let disconnect = Arc::new(AtomicBool::new(false));
        let mut dispatch = MavDispatch::new(rx, TARGET, disconnect.clone());
        let commands = dispatch.get_route_receiver(Route::Command).unwrap();
        let _task = dispatch.run();

        let other = MavHeader {
            system_id: 42,
            component_id: 1,
            sequence: 0,
        };
        let own = MavHeader {
            system_id: 1,
            component_id: 1,
            sequence: 1,
        };
        tx.send((other, ack(MavCmd::MAV_CMD_NAV_LAND, MavResult::MAV_RESULT_DENIED)))
            .unwrap();
        tx.send((own, ack(MavCmd::MAV_CMD_NAV_LAND, MavResult::MAV_RESULT_ACCEPTED)))
            .unwrap();

        let result = commands
            .wait_message(|msg| match msg {
                MavMessage::COMMAND_ACK(ack) => Some(ack.result),
                _ => None,
            })
            .await
            .unwrap();
        assert_eq!(result, MavResult::MAV_RESULT_ACCEPTED);
        disconnect.store(true, Relaxed);
    }

    #[tokio::test]
    async fn unread_param_values_are_capped() {
        let (tx, rx) = channel::unbounded();
        let disconnect = Arc::new(AtomicBool::new(false));
        let mut dispatch = MavDispatch::new(rx, TARGET, disconnect.clone());
        let params = dispatch.get_route_receiver(Route::Param).unwrap();
        let commands = dispatch.get_route_receiver(Route::Command).unwrap();
        let _task = dispatch.run();

        let header = MavHeader {
            system_id: 1,
            component_id: 1,
            sequence: 0,
        };
        for _ in 0..ROUTE_BACKLOG + 10 {
            tx.send((header, MavMessage::PARAM_VALUE(PARAM_VALUE_DATA::default())))
                .unwrap();
        }
        // Dispatched in order, once the ack is out every parameter value went through
        tx.send((header, ack(MavCmd::MAV_CMD_NAV_LAND, MavResult::MAV_RESULT_ACCEPTED)))
            .unwrap();
        commands.recv_async().await.unwrap();

        assert_eq!(params.len(), ROUTE_BACKLOG);

        params.drain().for_each(drop);
        tx.send((header, MavMessage::PARAM_VALUE(PARAM_VALUE_DATA::default())))
            .unwrap();
        assert!(matches!(params.recv_async().await, Ok(MavMessage::PARAM_VALUE(_))));
        disconnect.store(true, Relaxed);
    }

    /// Plays the autopilot side: answers every command with the given results, one per command received
    fn autopilot(uplink_rx: Receiver<MavMessage>, ack_tx: Sender<MavMessage>, results: Vec<Option<MavResult>>) {
        tokio::spawn(async move {
            for result in results {
                let Ok(MavMessage::COMMAND_LONG(cmd)) = uplink_rx.recv_async().await else {
                    return;
                };
                if let Some(result) = result {
                    let _ = ack_tx.send_async(ack(cmd.command, result)).await;
                }
            }
        });
    }

    #[tokio::test(start_paused = true)]
    async fn accepted_command_succeeds() {
        let (uplink, uplink_rx) = channel::unbounded();
        let (ack_tx, ack_rx) = channel::unbounded();
        autopilot(uplink_rx, ack_tx, vec![Some(MavResult::MAV_RESULT_ACCEPTED)]);

        let sender = CommandSender::new(uplink, ack_rx, TARGET, Duration::from_millis(500), 3);
        sender
            .send_command_long(MavCmd::MAV_CMD_COMPONENT_ARM_DISARM, [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn denied_command_reports_result() {
        let (uplink, uplink_rx) = channel::unbounded();
        let (ack_tx, ack_rx) = channel::unbounded();
        autopilot(uplink_rx, ack_tx, vec![Some(MavResult::MAV_RESULT_TEMPORARILY_REJECTED)]);

        let sender = CommandSender::new(uplink, ack_rx, TARGET, Duration::from_millis(500), 3);
        let err = sender
            .send_command_long(MavCmd::MAV_CMD_NAV_TAKEOFF, [f32::NAN; 7])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::CommandDenied {
                command: MavCmd::MAV_CMD_NAV_TAKEOFF,
                result: MavResult::MAV_RESULT_TEMPORARILY_REJECTED
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn lost_ack_is_retransmitted_with_confirmation() {
        let (uplink, uplink_rx) = channel::unbounded();
        let (ack_tx, ack_rx) = channel::unbounded();

        let confirmations = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = confirmations.clone();
        tokio::spawn(async move {
            while let Ok(MavMessage::COMMAND_LONG(cmd)) = uplink_rx.recv_async().await {
                seen.lock().unwrap().push(cmd.confirmation);
                if cmd.confirmation == 1 {
                    let _ = ack_tx.send_async(ack(cmd.command, MavResult::MAV_RESULT_ACCEPTED)).await;
                }
            }
        });

        let sender = CommandSender::new(uplink, ack_rx, TARGET, Duration::from_millis(500), 3);
        sender
            .send_command_long(MavCmd::MAV_CMD_NAV_LAND, [f32::NAN; 7])
            .await
            .unwrap();
        assert_eq!(*confirmations.lock().unwrap(), vec![0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_autopilot_times_out() {
        let (uplink, uplink_rx) = channel::unbounded();
        let (_ack_tx, ack_rx) = channel::unbounded();

        let sender = CommandSender::new(uplink, ack_rx, TARGET, Duration::from_millis(500), 3);
        let err = sender
            .send_command_long(MavCmd::MAV_CMD_NAV_LAND, [f32::NAN; 7])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout));
        assert_eq!(uplink_rx.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn in_progress_keeps_waiting() {
        let (uplink, uplink_rx) = channel::unbounded();
        let (ack_tx, ack_rx) = channel::unbounded();
        tokio::spawn(async move {
            let Ok(MavMessage::COMMAND_LONG(cmd)) = uplink_rx.recv_async().await else {
                return;
            };
            let _ = ack_tx.send_async(ack(cmd.command, MavResult::MAV_RESULT_IN_PROGRESS)).await;
            tokio::time::sleep(Duration::from_millis(300)).await;
            let _ = ack_tx.send_async(ack(cmd.command, MavResult::MAV_RESULT_ACCEPTED)).await;
        });

        let sender = CommandSender::new(uplink, ack_rx, TARGET, Duration::from_millis(500), 1);
        sender
            .send_command_long(MavCmd::MAV_CMD_DO_SET_MODE, [1.0, 6.0, 0.0, 0.0, 0.0, 0.0, 0.0])
            .await
            .unwrap();
    }

    #[test]
    fn param_ids_are_zero_padded() {
        let id = param_id("MIS_TAKEOFF_ALT").unwrap();
        assert_eq!(&id[..15], b"MIS_TAKEOFF_ALT");
        assert_eq!(id[15], 0);
        assert!(param_id("").is_err());
        assert!(param_id("A_VERY_LONG_PARAMETER_NAME").is_err());
    }
}
