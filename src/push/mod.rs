//! Real-time push channel
//!
//! MQTT 3.1.1 over WebSocket against the vendor's message broker. Each chat
//! event for this user is published on the `{appId}/{userId}` topic as a
//! JSON payload; deliveries are decoded into [`RawEvent`]s and handed to
//! the reconciliation engine through an mpsc channel.

pub mod mqtt;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::models::RawEvent;

/// MQTT keepalive advertised on CONNECT.
const KEEP_ALIVE_SECS: u16 = 60;
/// Packet id of our single subscription.
const SUBSCRIBE_PACKET_ID: u16 = 1;
/// How long to wait for CONNACK/SUBACK before giving up on a connection.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Broker credentials derived from the registered identity.
#[derive(Debug, Clone)]
pub struct PushCredentials {
    pub host: String,
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub topic: String,
}

impl PushCredentials {
    /// Derive the broker credentials: client id
    /// `{appId}/{userId}/{deviceId}/at_{token}`, username and topic
    /// `{appId}/{userId}`, password = client secret.
    pub fn derive(
        host: &str,
        app_id: &str,
        user_id: &str,
        device_id: &str,
        access_token: &str,
        client_key: &str,
    ) -> Self {
        Self {
            host: host.to_string(),
            client_id: format!("{app_id}/{user_id}/{device_id}/at_{access_token}"),
            username: format!("{app_id}/{user_id}"),
            password: client_key.to_string(),
            topic: format!("{app_id}/{user_id}"),
        }
    }

    fn ws_url(&self) -> String {
        format!("wss://{}:443/mqtt", self.host)
    }
}

/// Reason the inner connection loop exited.
enum DisconnectReason {
    /// Receiver dropped; the session is over. Do not reconnect.
    Shutdown,
    /// Error or server-initiated close. Should reconnect.
    Error(anyhow::Error),
}

/// Run the push connection with automatic reconnection.
///
/// On transient errors or server-initiated disconnects, reconnects with
/// exponential backoff (1s, 2s, 4s, ... capped at 64s), reset after a
/// stable (>60s) session. Exits cleanly once the event receiver is dropped.
pub async fn connect_and_run(creds: PushCredentials, events: mpsc::Sender<RawEvent>) -> Result<()> {
    let mut backoff = 1u64;

    loop {
        match connect_and_run_inner(&creds, &events).await {
            Ok(DisconnectReason::Shutdown) => {
                return Ok(());
            }
            Ok(DisconnectReason::Error(e)) => {
                backoff = 1;
                tracing::warn!(
                    "Push channel disconnected after stable session: {:#}. Reconnecting in 1s...",
                    e,
                );
                tokio::select! {
                    _ = time::sleep(Duration::from_secs(1)) => {}
                    _ = events.closed() => return Ok(()),
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Push channel disconnected: {:#}. Reconnecting in {}s...",
                    e,
                    backoff
                );
                tokio::select! {
                    _ = time::sleep(Duration::from_secs(backoff)) => {}
                    _ = events.closed() => return Ok(()),
                }
                backoff = (backoff * 2).min(64);
            }
        }
    }
}

/// Run one full broker session: connect, handshake, subscribe, event loop.
async fn connect_and_run_inner(
    creds: &PushCredentials,
    events: &mpsc::Sender<RawEvent>,
) -> Result<DisconnectReason> {
    let mut request = creds
        .ws_url()
        .into_client_request()
        .context("Invalid push URL")?;
    request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("mqtt"));

    tracing::info!("Connecting push channel to {}", creds.ws_url());
    let (mut ws, response) = connect_async(request)
        .await
        .context("Push WebSocket connection failed")?;
    tracing::info!("Push WebSocket connected (status={})", response.status());

    ws.send(Message::Binary(mqtt::encode_connect(
        &creds.client_id,
        &creds.username,
        &creds.password,
        KEEP_ALIVE_SECS,
    )))
    .await
    .context("Failed to send CONNECT")?;

    let connected_at = Instant::now();
    let mut buf: Vec<u8> = Vec::new();
    let mut subscribed = false;

    let mut heartbeat = time::interval(Duration::from_secs(u64::from(KEEP_ALIVE_SECS) / 2));
    heartbeat.tick().await; // skip first immediate tick

    let mut handshake_deadline = Box::pin(time::sleep(HANDSHAKE_TIMEOUT));

    // Stability threshold: the caller resets its backoff when the session
    // lasted at least this long.
    let stability_threshold = Duration::from_secs(60);

    let disconnect_reason = loop {
        tokio::select! {
            frame = ws.next() => {
                match frame {
                    Some(Ok(Message::Binary(data))) => {
                        buf.extend_from_slice(&data);
                        match drain_packets(&mut buf, &mut ws, events, creds, &mut subscribed).await {
                            Ok(None) => {}
                            Ok(Some(reason)) => break reason,
                            Err(e) => break DisconnectReason::Error(e),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws.send(Message::Pong(data)).await {
                            break DisconnectReason::Error(
                                anyhow::Error::from(e).context("Failed to send pong"),
                            );
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!("Push WebSocket closed: {:?}", frame);
                        break DisconnectReason::Error(anyhow::anyhow!("WebSocket closed by server"));
                    }
                    Some(Ok(other)) => {
                        tracing::debug!("Push frame (ignored): {:?}", other);
                    }
                    Some(Err(e)) => {
                        break DisconnectReason::Error(
                            anyhow::Error::from(e).context("WebSocket receive error"),
                        );
                    }
                    None => {
                        break DisconnectReason::Error(anyhow::anyhow!("WebSocket stream ended"));
                    }
                }
            }
            _ = heartbeat.tick() => {
                if let Err(e) = ws.send(Message::Binary(mqtt::encode_pingreq())).await {
                    break DisconnectReason::Error(
                        anyhow::Error::from(e).context("Heartbeat send failed"),
                    );
                }
            }
            _ = &mut handshake_deadline, if !subscribed => {
                break DisconnectReason::Error(anyhow::anyhow!(
                    "Broker handshake timed out after {:?}", HANDSHAKE_TIMEOUT
                ));
            }
            _ = events.closed() => {
                let _ = ws.send(Message::Binary(mqtt::encode_disconnect())).await;
                break DisconnectReason::Shutdown;
            }
        }
    };

    // A session that lasted is a healthy one; report its end as Ok so the
    // caller resets backoff before reconnecting.
    if connected_at.elapsed() >= stability_threshold {
        return Ok(disconnect_reason);
    }
    match disconnect_reason {
        DisconnectReason::Shutdown => Ok(DisconnectReason::Shutdown),
        DisconnectReason::Error(e) => Err(e),
    }
}

/// Decode and handle every complete packet in the buffer. Returns a
/// disconnect reason to bubble up, or None to keep the session running.
async fn drain_packets(
    buf: &mut Vec<u8>,
    ws: &mut (impl futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    events: &mpsc::Sender<RawEvent>,
    creds: &PushCredentials,
    subscribed: &mut bool,
) -> Result<Option<DisconnectReason>> {
    while let Some((packet, used)) = mqtt::decode(buf)? {
        buf.drain(..used);
        match packet {
            mqtt::Packet::Connack {
                return_code,
                session_present,
            } => {
                if return_code != mqtt::CONNACK_ACCEPTED {
                    anyhow::bail!("Broker refused connection (code {})", return_code);
                }
                tracing::info!(
                    "Broker accepted connection (session_present={})",
                    session_present
                );
                ws.send(Message::Binary(mqtt::encode_subscribe(
                    SUBSCRIBE_PACKET_ID,
                    &creds.topic,
                    1,
                )))
                .await
                .context("Failed to send SUBSCRIBE")?;
            }
            mqtt::Packet::Suback { return_codes, .. } => {
                if return_codes.contains(&mqtt::SUBACK_FAILURE) {
                    anyhow::bail!("Broker rejected subscription to {}", creds.topic);
                }
                tracing::info!("Subscribed to {}", creds.topic);
                *subscribed = true;
            }
            mqtt::Packet::Publish {
                qos,
                packet_id,
                topic,
                payload,
                ..
            } => {
                if qos == 1 {
                    if let Some(id) = packet_id {
                        ws.send(Message::Binary(mqtt::encode_puback(id)))
                            .await
                            .context("Failed to send PUBACK")?;
                    }
                }
                match serde_json::from_slice::<RawEvent>(&payload) {
                    Ok(raw) => {
                        if events.send(raw).await.is_err() {
                            return Ok(Some(DisconnectReason::Shutdown));
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Undecodable push payload on {}: {:#}", topic, e);
                    }
                }
            }
            mqtt::Packet::Pingresp => {
                tracing::debug!("Heartbeat pong from broker");
            }
            mqtt::Packet::Puback { packet_id } => {
                tracing::debug!("Unexpected PUBACK for packet {}", packet_id);
            }
            mqtt::Packet::Other(packet_type) => {
                tracing::debug!("Ignoring packet type {}", packet_type);
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_derivation() {
        let creds = PushCredentials::derive(
            "acme.msg-usor.us.webexconnect.io",
            "AI123",
            "user-1",
            "v2_cli_abc",
            "tok-9",
            "secret",
        );
        assert_eq!(creds.client_id, "AI123/user-1/v2_cli_abc/at_tok-9");
        assert_eq!(creds.username, "AI123/user-1");
        assert_eq!(creds.topic, "AI123/user-1");
        assert_eq!(creds.password, "secret");
        assert_eq!(
            creds.ws_url(),
            "wss://acme.msg-usor.us.webexconnect.io:443/mqtt"
        );
    }
}
