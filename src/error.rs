use mavlink::common::{MavCmd, MavMessage, MavResult};

/// [Result] alias for return types of the crate API
pub type Result<T> = std::result::Result<T, Error>;

/// Error enum type
#[derive(Debug)]
pub enum Error {
    /// The connection endpoint could not be understood. The String contains the endpoint.
    InvalidEndpoint(String),
    /// The MAVLink transport could not be opened. Returns the underlying IO error.
    Connection(std::io::Error),
    /// Operation timed out waiting for a response, or for an autopilot to show up.
    Timeout,
    /// The vehicle connection is closed.
    Disconnected,
    /// The autopilot answered a command with something else than `MAV_RESULT_ACCEPTED`.
    CommandDenied {
        /// Command that was sent
        command: MavCmd,
        /// Result reported in the `COMMAND_ACK`
        result: MavResult,
    },
    /// Parameter protocol error. The String contains the reason.
    ParamError(String),
    /// Offboard mode cannot be started before a setpoint has been sent.
    NoSetpointSet,
    /// Unexpected protocol error. The String contains the reason.
    ProtocolError(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidEndpoint(endpoint) => write!(f, "invalid connection endpoint '{}'", endpoint),
            Error::Connection(e) => write!(f, "connection error: {}", e),
            Error::Timeout => write!(f, "timeout"),
            Error::Disconnected => write!(f, "disconnected"),
            Error::CommandDenied { command, result } => write!(f, "{:?} answered {:?}", command, result),
            Error::ParamError(reason) => write!(f, "parameter error: {}", reason),
            Error::NoSetpointSet => write!(f, "no setpoint set"),
            Error::ProtocolError(reason) => write!(f, "protocol error: {}", reason),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Connection(error)
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}

impl From<flume::RecvError> for Error {
    fn from(_: flume::RecvError) -> Self {
        self::Error::Disconnected
    }
}

impl From<flume::SendError<MavMessage>> for Error {
    fn from(_: flume::SendError<MavMessage>) -> Self {
        self::Error::Disconnected
    }
}
