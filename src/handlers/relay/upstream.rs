use std::time::Duration;

use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::info;

use super::RelayError;
use crate::config::UpstreamConfig;

pub(super) type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dial the recognition service for one session.
pub(super) async fn connect_upstream(
    config: &UpstreamConfig,
    connect_id: &str,
) -> Result<UpstreamSocket, RelayError> {
    if !config.is_configured() {
        return Err(RelayError::UpstreamNotConfigured);
    }
    let (Some(endpoint), Some(app_key), Some(access_key), Some(resource_id)) = (
        config.endpoint.as_deref(),
        config.app_key.as_deref(),
        config.access_key.as_deref(),
        config.resource_id.as_deref(),
    ) else {
        return Err(RelayError::UpstreamNotConfigured);
    };

    let mut request = endpoint
        .into_client_request()
        .map_err(|e| RelayError::UpstreamConnect(format!("invalid endpoint: {e}")))?;

    let headers = [
        ("x-api-app-key", app_key),
        ("x-api-access-key", access_key),
        ("x-api-resource-id", resource_id),
        ("x-api-connect-id", connect_id),
    ];
    for (name, value) in headers {
        let value = HeaderValue::from_str(value)
            .map_err(|e| RelayError::UpstreamConnect(format!("invalid {name} header: {e}")))?;
        request
            .headers_mut()
            .insert(HeaderName::from_static(name), value);
    }

    let timeout = Duration::from_secs(config.connect_timeout_seconds.max(1));
    let (socket, response) = tokio::time::timeout(timeout, connect_async(request))
        .await
        .map_err(|_| {
            RelayError::UpstreamConnect(format!("timed out after {}s", timeout.as_secs()))
        })?
        .map_err(|e| RelayError::UpstreamConnect(e.to_string()))?;

    let log_id = response
        .headers()
        .get("x-tt-logid")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");
    info!(connect_id = %connect_id, log_id = %log_id, "Connected to upstream {}", endpoint);

    Ok(socket)
}
