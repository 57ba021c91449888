// Takes off to 1.75 m, waits to reach 1.7 m, hovers 5 s and lands.
//
// Example (SITL): takeoff_land udp://:14540

use std::process::ExitCode;

use uav_sequencer::FlightPlan;

#[tokio::main]
async fn main() -> ExitCode {
    uav_sequencer::cli::run(FlightPlan::takeoff_and_land()).await
}
