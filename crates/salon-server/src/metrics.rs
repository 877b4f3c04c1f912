//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Call once at startup,
/// before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// WebSocket sessions accepted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Joined WebSocket sessions (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connections refused during authentication (counter, labels: reason).
pub const WS_REJECTIONS_TOTAL: &str = "ws_rejections_total";
/// Session lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Client messages relayed (counter).
pub const CHAT_MESSAGES_TOTAL: &str = "chat_messages_total";
/// Per-recipient deliveries dropped (counter).
pub const CHAT_BROADCAST_DROPS_TOTAL: &str = "chat_broadcast_drops_total";
/// Rooms created on connect (counter).
pub const ROOMS_CREATED_TOTAL: &str = "rooms_created_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_global_install() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            metrics::counter!(CHAT_MESSAGES_TOTAL).increment(3);
        });
        let output = render(&handle);
        assert!(output.contains("chat_messages_total 3"), "{output}");
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_REJECTIONS_TOTAL,
            WS_CONNECTION_DURATION_SECONDS,
            CHAT_MESSAGES_TOTAL,
            CHAT_BROADCAST_DROPS_TOTAL,
            ROOMS_CREATED_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
