// Takes off, waits to be above 1 m, then rotates at 45 deg/s while climbing to 5 m in offboard mode. Hovers 5 s,
// leaves offboard and lands.
//
// Example (SITL): rotate_climb udp://:14540

use std::process::ExitCode;

use uav_sequencer::FlightPlan;

#[tokio::main]
async fn main() -> ExitCode {
    uav_sequencer::cli::run(FlightPlan::rotate_climb()).await
}
