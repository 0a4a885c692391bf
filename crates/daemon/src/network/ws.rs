//! WebSocket transport for viewers.
//!
//! Each browser tab opens one WebSocket to `/ws/terminal/{id}` (or
//! `/ws/terminal` for whatever session is current). The connection becomes a
//! [`ViewerHandle`] attached to the session: outbound frames are drained from
//! the handle's channel into the socket, inbound messages are routed to the
//! shell. When the socket goes away the viewer is detached.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use protocol::Frame;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::session::{SessionId, SessionManager, ShellSpawner, ViewerChannel, ViewerHandle};

/// URL path prefix for terminal connections.
pub const TERMINAL_PATH: &str = "/ws/terminal";

/// Which session a connecting viewer asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachTarget {
    /// Whatever session is current.
    Current,
    /// Only the session with this id.
    Session(SessionId),
}

/// Maps a request path to an attach target. `None` means 404.
pub fn parse_target(path: &str) -> Option<AttachTarget> {
    let rest = path.strip_prefix(TERMINAL_PATH)?;
    let rest = rest.trim_end_matches('/');

    if rest.is_empty() {
        return Some(AttachTarget::Current);
    }

    let id = rest.strip_prefix('/')?;
    if id.is_empty() || id.contains('/') {
        return None;
    }
    Some(AttachTarget::Session(id.to_string()))
}

fn not_found() -> ErrorResponse {
    let mut response = ErrorResponse::new(Some("not found".to_string()));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}

/// Listener accepting viewer WebSockets.
pub struct WsServer {
    listener: TcpListener,
}

impl WsServer {
    /// Binds the listener.
    pub async fn bind(addr: SocketAddr) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    /// The address actually bound, useful with port 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `cancel` fires.
    ///
    /// Each connection runs on its own task and is also torn down on cancel.
    pub async fn run<S: ShellSpawner>(
        self,
        manager: Arc<SessionManager<S>>,
        cancel: CancellationToken,
    ) {
        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let manager = Arc::clone(&manager);
                    let cancel = cancel.child_token();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = cancel.cancelled() => {}
                            _ = serve_viewer(stream, peer, manager) => {}
                        }
                    });
                }
                Err(e) => tracing::warn!(error = %e, "Failed to accept viewer connection"),
            }
        }

        tracing::debug!("WebSocket listener stopped");
    }
}

/// Runs one viewer connection from handshake to detach.
async fn serve_viewer<S: ShellSpawner>(
    stream: TcpStream,
    peer: SocketAddr,
    manager: Arc<SessionManager<S>>,
) {
    let mut target = None;
    let callback = |request: &Request, response: Response| match parse_target(request.uri().path()) {
        Some(t) => {
            target = Some(t);
            Ok(response)
        }
        None => Err(not_found()),
    };

    let ws = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::debug!(%peer, error = %e, "WebSocket handshake rejected");
            return;
        }
    };
    let Some(target) = target else {
        return;
    };

    let (handle, outbound) = ViewerHandle::new();
    let viewer = Arc::new(handle);
    let viewer_id = viewer.id();

    let attached = match &target {
        AttachTarget::Current => manager.attach(viewer.clone()).await,
        AttachTarget::Session(id) => manager.attach_to(id, viewer.clone()).await,
    };

    if !attached {
        tracing::debug!(%peer, ?target, "No matching session, closing viewer");
        let mut ws = ws;
        let _ = ws.close(None).await;
        return;
    }

    tracing::info!(%peer, viewer_id, "Viewer connected");
    pump_viewer(ws, outbound, &manager).await;

    manager.detach(viewer_id).await;
    let stats = viewer.stats();
    tracing::info!(
        %peer,
        viewer_id,
        sent = stats.messages_sent,
        dropped = stats.messages_dropped,
        "Viewer disconnected"
    );
}

/// Moves frames both ways until either side closes.
async fn pump_viewer<S: ShellSpawner>(
    ws: WebSocketStream<TcpStream>,
    mut outbound: mpsc::Receiver<Frame>,
    manager: &SessionManager<S>,
) {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                let message = match frame {
                    Frame::Binary(data) => WsMessage::Binary(data),
                    Frame::Text(text) => WsMessage::Text(text),
                };
                if let Err(e) = sink.send(message).await {
                    tracing::debug!(error = %e, "Viewer send failed");
                    break;
                }
            }
            message = stream.next() => {
                match message {
                    Some(Ok(WsMessage::Binary(data))) => {
                        manager.route_message(&Frame::Binary(data)).await;
                    }
                    Some(Ok(WsMessage::Text(text))) => {
                        manager.route_message(&Frame::Text(text)).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "Viewer receive failed");
                        break;
                    }
                }
            }
        }
    }

    let _ = sink.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::mock::MockSpawner;
    use crate::session::SessionSettings;
    use std::path::PathBuf;
    use std::time::Duration;
    use tokio_tungstenite::connect_async;

    #[test]
    fn test_parse_target() {
        assert_eq!(parse_target("/ws/terminal"), Some(AttachTarget::Current));
        assert_eq!(parse_target("/ws/terminal/"), Some(AttachTarget::Current));
        assert_eq!(
            parse_target("/ws/terminal/abc-123"),
            Some(AttachTarget::Session("abc-123".to_string()))
        );
        assert_eq!(parse_target("/ws/terminal/a/b"), None);
        assert_eq!(parse_target("/ws/terminalx"), None);
        assert_eq!(parse_target("/"), None);
        assert_eq!(parse_target("/api/terminal"), None);
    }

    struct Harness {
        addr: SocketAddr,
        manager: Arc<SessionManager<MockSpawner>>,
        spawner: MockSpawner,
        cancel: CancellationToken,
    }

    async fn start() -> Harness {
        let spawner = MockSpawner::new();
        let settings = SessionSettings {
            shell: Some(PathBuf::from("/bin/sh")),
            ..SessionSettings::default()
        };
        let manager = Arc::new(SessionManager::new(spawner.clone(), settings));
        let server = WsServer::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let cancel = CancellationToken::new();
        tokio::spawn(server.run(Arc::clone(&manager), cancel.clone()));

        Harness {
            addr,
            manager,
            spawner,
            cancel,
        }
    }

    async fn wait_for_viewers(manager: &SessionManager<MockSpawner>, count: usize) {
        for _ in 0..100 {
            if manager.info().await.map(|i| i.viewers) == Some(count) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("viewer count never reached {count}");
    }

    #[tokio::test]
    async fn test_viewer_receives_output_and_sends_input() {
        let h = start().await;
        let id = h.manager.spawn("/tmp", 80, 24).await.unwrap();

        let url = format!("ws://{}/ws/terminal/{}", h.addr, id);
        let (mut ws, _) = connect_async(url).await.unwrap();
        wait_for_viewers(&h.manager, 1).await;

        h.spawner.last().unwrap().emit_output(b"hello\n");
        let message = ws.next().await.unwrap().unwrap();
        assert_eq!(message, WsMessage::Binary(b"hello\n".to_vec()));

        ws.send(WsMessage::Text(
            r#"{"type":"resize","cols":100,"rows":40}"#.to_string(),
        ))
        .await
        .unwrap();
        ws.send(WsMessage::Binary(b"ls\r".to_vec())).await.unwrap();

        for _ in 0..100 {
            if !h.spawner.last().unwrap().writes().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let shell = h.spawner.last().unwrap();
        assert_eq!(shell.resizes(), vec![(100, 40)]);
        assert_eq!(shell.writes(), vec![b"ls\r".to_vec()]);

        h.cancel.cancel();
    }

    #[tokio::test]
    async fn test_close_detaches_viewer_and_arms_timer() {
        let h = start().await;
        h.manager.spawn("/tmp", 80, 24).await.unwrap();

        let url = format!("ws://{}/ws/terminal", h.addr);
        let (mut ws, _) = connect_async(url).await.unwrap();
        wait_for_viewers(&h.manager, 1).await;

        ws.close(None).await.unwrap();
        wait_for_viewers(&h.manager, 0).await;
        assert!(h.manager.orphan_timer_armed().await);

        h.cancel.cancel();
    }

    #[tokio::test]
    async fn test_exit_frame_reaches_viewer() {
        let h = start().await;
        h.manager.spawn("/tmp", 80, 24).await.unwrap();

        let (mut ws, _) = connect_async(format!("ws://{}/ws/terminal", h.addr))
            .await
            .unwrap();
        wait_for_viewers(&h.manager, 1).await;

        h.spawner.last().unwrap().exit(Some(3));
        let message = ws.next().await.unwrap().unwrap();
        assert_eq!(
            message,
            WsMessage::Text(r#"{"type":"exit","exitCode":3}"#.to_string())
        );

        h.cancel.cancel();
    }

    #[tokio::test]
    async fn test_unknown_session_is_closed() {
        let h = start().await;
        h.manager.spawn("/tmp", 80, 24).await.unwrap();

        let url = format!("ws://{}/ws/terminal/not-a-session", h.addr);
        let (mut ws, _) = connect_async(url).await.unwrap();

        match ws.next().await {
            Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => {}
            other => panic!("expected close, got {other:?}"),
        }
        assert_eq!(h.manager.info().await.unwrap().viewers, 0);

        h.cancel.cancel();
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let h = start().await;

        let url = format!("ws://{}/elsewhere", h.addr);
        match connect_async(url).await {
            Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
                assert_eq!(response.status(), StatusCode::NOT_FOUND);
            }
            other => panic!("expected 404, got {:?}", other.map(|_| ())),
        }

        h.cancel.cancel();
    }
}
