//! Binary entrypoint that launches the CitySense server.

use std::process::ExitCode;

use citysense::start_citysense;

/// Load configuration, provision the hosted services and serve the chat UI.
fn main() -> ExitCode {
    start_citysense::run()
}
