//! Command line front-end shared by the flight binaries
//!
//! Every binary takes exactly one argument, the connection endpoint, and flies its own [FlightPlan]:
//! ```text
//! rotate_climb udp://:14540
//! ```

use std::process::ExitCode;

use crate::endpoint::Endpoint;
use crate::sequencer::{FlightPlan, FlightSequencer, SequenceError};
use crate::vehicle::{Vehicle, VehicleConfig};

const DEFAULT_BIN_NAME: &str = "uav-sequencer";

/// Usage text for the binary `bin_name`
pub fn usage(bin_name: &str) -> String {
    format!(
        "Usage : {bin} <connection_url>\nExample (SITL): {bin} udp://:14540\n",
        bin = bin_name
    )
}

/// Extract the connection endpoint from the process arguments (binary name included)
///
/// Returns the usage text if there is not exactly one argument.
pub fn parse_args<S: AsRef<str>>(args: &[S]) -> Result<String, String> {
    match args {
        [_, endpoint] => Ok(endpoint.as_ref().to_owned()),
        [bin, ..] => Err(usage(bin.as_ref())),
        [] => Err(usage(DEFAULT_BIN_NAME)),
    }
}

/// Connect to `endpoint_url` and fly `plan`
pub async fn fly(endpoint_url: &str, plan: FlightPlan) -> Result<(), SequenceError> {
    let endpoint = Endpoint::parse(endpoint_url).map_err(SequenceError::connecting)?;
    let config = VehicleConfig {
        discovery_timeout: plan.discovery_timeout,
        ..Default::default()
    };

    println!("Connecting to {}...", endpoint);
    let vehicle = Vehicle::connect(&endpoint, config)
        .await
        .map_err(SequenceError::connecting)?;

    let mut sequencer = FlightSequencer::new(vehicle, plan);
    let result = sequencer.run().await;

    sequencer.link().disconnect().await;
    result
}

/// Binary entry point: parse the process arguments, fly `plan` and turn the outcome into an exit code
pub async fn run(plan: FlightPlan) -> ExitCode {
    let _ = env_logger::try_init();

    let args: Vec<String> = std::env::args().collect();
    let endpoint_url = match parse_args(&args) {
        Ok(endpoint_url) => endpoint_url,
        Err(usage) => {
            eprint!("{}", usage);
            return ExitCode::FAILURE;
        }
    };

    match fly(&endpoint_url, plan).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::debug!("Sequence failed in phase {:?}", e.phase);
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_one_argument_is_the_endpoint() {
        assert_eq!(parse_args(&["rotate_climb", "udp://:14540"]).unwrap(), "udp://:14540");
    }

    #[test]
    fn wrong_arity_gives_usage() {
        let usage = parse_args(&["rotate_climb"]).unwrap_err();
        assert!(usage.starts_with("Usage : rotate_climb <connection_url>"));
        assert!(usage.contains("udp://:14540"));

        assert!(parse_args(&["rotate_climb", "udp://:14540", "extra"]).is_err());
        assert!(parse_args::<&str>(&[]).unwrap_err().contains(DEFAULT_BIN_NAME));
    }

    #[tokio::test]
    async fn bad_endpoint_fails_before_connecting() {
        let err = fly("localhost", FlightPlan::rotate_climb()).await.unwrap_err();
        assert_eq!(err.context, "Connection failed");
    }
}
