//! Per-command logging and timing

use std::time::Duration;

use tracing::{debug, error, info};

use crate::errors::Result;
use crate::result::ResultSet;

/// Logs one executed command. Successful commands only log when enabled;
/// failures always log — except server responses and timeouts, which are
/// the caller's business.
pub(crate) fn log_command(repr: &str, result: &Result<ResultSet>, enabled: bool) {
    match result {
        Ok(result) => {
            if enabled {
                info!(command = repr, result = %result, "command executed");
            }
        }
        Err(err) if err.is_server_response() || err.is_timeout() => {}
        Err(err) => error!(command = repr, error = %err, "command failed"),
    }
}

pub(crate) fn log_timing(command: &str, elapsed: Duration) {
    debug!(
        command,
        elapsed_us = elapsed.as_micros() as u64,
        "command measured"
    );
}
