//! # Connection endpoints
//!
//! Vehicles are reached through an endpoint URL given by the user, for example `udp://:14540` to listen for a
//! simulator on the default PX4 offboard port. This module turns such a URL into the address format understood by
//! the [mavlink] crate.
//!
//! Supported forms:
//!
//! | URL | Meaning |
//! |-----|---------|
//! | `udp://[host]:port`, `udpin://[host]:port` | Listen on a local UDP port, reply to the first peer heard |
//! | `udpout://host:port` | Send to a remote UDP port |
//! | `tcp://host:port`, `tcpout://host:port` | Connect to a TCP server |
//! | `serial:///dev/ttyUSB0[:baud]` | Serial port, 57600 baud by default |

use crate::{Error, Result};

const DEFAULT_BIND_HOST: &str = "0.0.0.0";
const DEFAULT_BAUD_RATE: u32 = 57600;

/// Transport used to reach the vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Bind a local UDP port and wait for the vehicle to talk first
    UdpIn,
    /// Send UDP datagrams to a known remote address
    UdpOut,
    /// Connect to a TCP server
    TcpOut,
    /// Serial port
    Serial,
}

/// A parsed connection endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Transport used by this endpoint
    pub transport: Transport,
    /// Host (or device path for serial)
    pub host: String,
    /// UDP/TCP port, or baud rate for serial
    pub port: u32,
}

impl Endpoint {
    /// Parse an endpoint URL
    ///
    /// Returns [Error::InvalidEndpoint] for unknown schemes, missing or malformed ports and empty remote hosts.
    pub fn parse(url: &str) -> Result<Self> {
        let invalid = || Error::InvalidEndpoint(url.to_owned());

        let (scheme, rest) = url.split_once("://").ok_or_else(invalid)?;

        let transport = match scheme {
            "udp" | "udpin" => Transport::UdpIn,
            "udpout" => Transport::UdpOut,
            "tcp" | "tcpout" => Transport::TcpOut,
            "serial" => Transport::Serial,
            _ => return Err(invalid()),
        };

        if transport == Transport::Serial {
            return match rest.rsplit_once(':') {
                Some((device, baud)) if !device.is_empty() => Ok(Endpoint {
                    transport,
                    host: device.to_owned(),
                    port: baud.parse().map_err(|_| invalid())?,
                }),
                Some(_) => Err(invalid()),
                None if !rest.is_empty() => Ok(Endpoint {
                    transport,
                    host: rest.to_owned(),
                    port: DEFAULT_BAUD_RATE,
                }),
                None => Err(invalid()),
            };
        }

        let (host, port) = rest.rsplit_once(':').ok_or_else(invalid)?;
        let port: u16 = port.parse().map_err(|_| invalid())?;

        let host = match (transport, host) {
            (Transport::UdpIn, "") => DEFAULT_BIND_HOST.to_owned(),
            (_, "") => return Err(invalid()),
            (_, host) => host.to_owned(),
        };

        Ok(Endpoint {
            transport,
            host,
            port: port.into(),
        })
    }

    /// Address string in the format expected by [mavlink::connect()]
    pub fn mavlink_address(&self) -> String {
        let prefix = match self.transport {
            Transport::UdpIn => "udpin",
            Transport::UdpOut => "udpout",
            Transport::TcpOut => "tcpout",
            Transport::Serial => "serial",
        };
        format!("{}:{}:{}", prefix, self.host, self.port)
    }
}

impl std::str::FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Endpoint::parse(s)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.mavlink_address())
    }
}
