//! Heartbeat liveness monitoring.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;

use super::connection::ClientConnection;

/// Wait until the client has been silent for `timeout`.
///
/// At each `interval` tick the alive flag is checked and reset. Once
/// `timeout / interval` consecutive ticks (at least one) pass without any
/// client activity the future resolves. Sending pings is the writer's job;
/// this only watches for answers.
pub async fn wait_for_timeout(connection: Arc<ClientConnection>, interval: Duration, timeout: Duration) {
    let mut check_interval = time::interval(interval);
    // The first tick completes immediately.
    let _ = check_interval.tick().await;

    let interval_ms = interval.as_millis().max(1);
    let max_missed = (timeout.as_millis() / interval_ms).max(1);
    let mut missed: u128 = 0;

    loop {
        let _ = check_interval.tick().await;
        if connection.check_alive() {
            missed = 0;
        } else {
            missed += 1;
            if missed >= max_missed {
                return;
            }
        }
    }
}
