//! WebSocket connection handler
//!
//! Handles individual client connections: upgrade validation, session
//! registration, and the read and write loops that move frames between the
//! socket and the relay.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info};

use crate::broadcast::broadcast;
use crate::config::RelayConfig;
use crate::error::{AppError, Rejection};
use crate::hub::{Hub, HubHandle};
use crate::message::{ClientFrame, Message, Payload};
use crate::room::Room;
use crate::session::Session;
use crate::types::SessionId;

/// Path the upgrade must be requested on
pub const WS_PATH: &str = "/ws";

/// Validated connect parameters from the upgrade request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub username: String,
    pub room: String,
}

impl ConnectParams {
    /// Validate path and query of an upgrade request
    pub fn from_request(request: &Request) -> Result<Self, Rejection> {
        let path = request.uri().path();
        if path != WS_PATH {
            return Err(Rejection::NotFound(path.to_string()));
        }
        Self::from_query(request.uri().query().unwrap_or_default())
    }

    /// Parse `username` and `room` from a query string
    ///
    /// The room is trimmed of surrounding whitespace; both must be non-empty.
    pub fn from_query(query: &str) -> Result<Self, Rejection> {
        let mut username = String::new();
        let mut room = String::new();

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "username" => username = value.into_owned(),
                "room" => room = value.trim().to_string(),
                _ => {}
            }
        }

        if username.is_empty() || room.is_empty() {
            return Err(Rejection::MissingParams);
        }
        Ok(Self { username, room })
    }
}

impl Rejection {
    fn status(&self) -> StatusCode {
        match self {
            Rejection::NotFound(_) => StatusCode::NOT_FOUND,
            Rejection::MissingParams => StatusCode::BAD_REQUEST,
        }
    }

    /// HTTP response sent instead of `101 Switching Protocols`
    pub fn to_response(&self) -> ErrorResponse {
        let mut response = ErrorResponse::new(Some(self.to_string()));
        *response.status_mut() = self.status();
        response
    }
}

/// Accept connections forever, one task per connection
pub async fn serve(listener: TcpListener, config: RelayConfig) {
    let (hub, _hub_task) = Hub::start(config.hub_capacity);
    let config = Arc::new(config);

    info!("Hub actor started");

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("New connection from {}", addr);
                let hub = hub.clone();
                let config = config.clone();

                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, hub, config).await {
                        error!("Connection handler error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

/// Handle a new TCP connection
///
/// Validates the upgrade request, performs the WebSocket handshake and runs
/// the session until it ends. Requests without a username and room are
/// refused before the handshake completes.
pub async fn handle_connection(
    stream: TcpStream,
    hub: HubHandle,
    config: Arc<RelayConfig>,
) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    let mut params = None;
    let callback = |request: &Request, response: Response| {
        let parsed = ConnectParams::from_request(request);
        let result = match &parsed {
            Ok(_) => Ok(response),
            Err(rejection) => Err(rejection.to_response()),
        };
        params = Some(parsed);
        result
    };

    let accepted = tokio_tungstenite::accept_hdr_async(stream, callback).await;
    let ws_stream = match accepted {
        Ok(ws_stream) => ws_stream,
        Err(e) => {
            if let Some(Err(rejection)) = params {
                info!("Rejected upgrade from {}: {}", peer_addr, rejection);
                return Ok(());
            }
            return Err(e.into());
        }
    };

    let ConnectParams { username, room } = params.unwrap_or(Err(Rejection::MissingParams))?;

    info!(
        "Connection request from {}: username={}, room={}",
        peer_addr, username, room
    );

    register_client(SessionId::new(), username, room, ws_stream, hub, &config).await
}

/// Run a session over an established WebSocket
///
/// Registers with the Hub, runs the read and write loops, and unregisters
/// exactly once when either loop ends.
pub async fn register_client<S>(
    id: SessionId,
    username: String,
    room: String,
    ws_stream: WebSocketStream<S>,
    hub: HubHandle,
    config: &RelayConfig,
) -> Result<(), AppError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (session, outbound) = Session::new(id, username, room, config.outbound_capacity);
    let room = hub.register(session.clone()).await?;

    let (ws_sender, ws_receiver) = ws_stream.split();

    let mut read_task = tokio::spawn(read_loop(
        session.clone(),
        room,
        ws_receiver,
        hub.clone(),
        config.pong_wait,
    ));
    let mut write_task = tokio::spawn(write_loop(session.id, outbound, ws_sender, config.clone()));

    let read_finished = tokio::select! {
        _ = &mut read_task => true,
        _ = &mut write_task => false,
    };

    hub.unregister(session.clone()).await;

    if read_finished {
        // Closed queue makes the write loop send a close frame and exit
        let _ = write_task.await;
    } else {
        read_task.abort();
    }

    info!("Client {} ({}) disconnected", session.username, session.id);
    Ok(())
}

/// Inbound frames -> commands or room broadcast
async fn read_loop<S>(
    session: Arc<Session>,
    room: Arc<Room>,
    mut ws_receiver: SplitStream<WebSocketStream<S>>,
    hub: HubHandle,
    pong_wait: Duration,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let frame = match timeout(pong_wait, ws_receiver.next()).await {
            Err(_) => {
                debug!("Read deadline expired for {}", session.id);
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!("WebSocket error for {}: {}", session.id, e);
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Frame::Text(text) => {
                if handle_text(&session, &room, &hub, &text).await.is_err() {
                    debug!("Hub closed, ending read loop for {}", session.id);
                    break;
                }
            }
            Frame::Close(_) => {
                debug!("Client {} sent close frame", session.id);
                break;
            }
            Frame::Pong(_) => {
                debug!("Pong from {}", session.id);
            }
            // Pings are answered by tungstenite; binary is not part of the protocol
            _ => {}
        }
    }
    debug!("Read loop ended for {}", session.id);
}

/// Decode one text frame and route it
async fn handle_text(
    session: &Arc<Session>,
    room: &Arc<Room>,
    hub: &HubHandle,
    text: &str,
) -> Result<(), AppError> {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!("Discarding invalid JSON from {}: {}", session.id, e);
            return Ok(());
        }
    };

    if let Some(command) = frame.as_command() {
        return hub.command(session.clone(), command.to_string()).await;
    }

    let message = Message::chat(&session.room, &session.username, frame.text);
    match broadcast(room, &message) {
        Ok(0) => Ok(()),
        // Eviction may have emptied the room; only the Hub may delete it
        Ok(_) => hub.prune(room.clone()).await,
        Err(e) => {
            error!("Failed to serialize chat from {}: {}", session.id, e);
            Ok(())
        }
    }
}

/// Outbound queue and keepalive -> socket
async fn write_loop<S>(
    id: SessionId,
    mut outbound: mpsc::Receiver<Payload>,
    mut ws_sender: SplitSink<WebSocketStream<S>, Frame>,
    config: RelayConfig,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut ticker = interval_at(Instant::now() + config.ping_period, config.ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            next = outbound.recv() => match next {
                Some(payload) => {
                    let frame = Frame::Text(payload.to_string());
                    if let Err(e) = send_within(&mut ws_sender, frame, config.write_wait).await {
                        debug!("Write failed for {}: {}", id, e);
                        break;
                    }
                }
                None => {
                    debug!("Outbound queue closed for {}", id);
                    let _ = send_within(&mut ws_sender, Frame::Close(None), config.write_wait).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                if let Err(e) = send_within(&mut ws_sender, Frame::Ping(Vec::new()), config.ping_wait).await {
                    debug!("Ping failed for {}: {}", id, e);
                    break;
                }
            }
        }
    }
    debug!("Write loop ended for {}", id);
}

async fn send_within<S>(
    ws_sender: &mut SplitSink<WebSocketStream<S>, Frame>,
    frame: Frame,
    deadline: Duration,
) -> Result<(), AppError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    timeout(deadline, ws_sender.send(frame))
        .await
        .map_err(|_| AppError::WriteTimeout)??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_from_query() {
        let params = ConnectParams::from_query("username=alice&room=%20general%20").unwrap();
        assert_eq!(params.username, "alice");
        assert_eq!(params.room, "general");
    }

    #[test]
    fn test_params_decoding() {
        let params = ConnectParams::from_query("room=tea+room&username=bob%21").unwrap();
        assert_eq!(params.username, "bob!");
        assert_eq!(params.room, "tea room");
    }

    #[test]
    fn test_params_missing() {
        assert_eq!(
            ConnectParams::from_query("username=alice"),
            Err(Rejection::MissingParams)
        );
        assert_eq!(
            ConnectParams::from_query("room=general"),
            Err(Rejection::MissingParams)
        );
        assert_eq!(
            ConnectParams::from_query("username=&room=general"),
            Err(Rejection::MissingParams)
        );
        assert_eq!(
            ConnectParams::from_query("username=alice&room=%20%20"),
            Err(Rejection::MissingParams)
        );
    }

    #[test]
    fn test_params_wrong_path() {
        let request = Request::builder()
            .uri("/chat?username=alice&room=general")
            .body(())
            .unwrap();
        assert_eq!(
            ConnectParams::from_request(&request),
            Err(Rejection::NotFound("/chat".to_string()))
        );
    }

    #[test]
    fn test_rejection_status() {
        assert_eq!(
            Rejection::MissingParams.to_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Rejection::NotFound("/".into()).to_response().status(),
            StatusCode::NOT_FOUND
        );
    }
}
