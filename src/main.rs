//! Binary entrypoint of the live desk server.

use std::process::ExitCode;

use livedesk::start_livedesk;

/// Start the desk server with configuration from `LIVEDESK_*` variables.
fn main() -> ExitCode {
    start_livedesk::run()
}
