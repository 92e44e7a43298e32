//! Loopback callback listener, scoped to one wait phase.
//!
//! [`ListenerSession::start`] binds the port synchronously, so a port that is
//! still held elsewhere is reported to the caller as `PortUnavailable`, then
//! hands the socket to an `axum` server running on its own thread with a
//! current-thread `tokio` runtime.
//!
//! Dropping the session (or calling [`ListenerSession::stop_and_release`])
//! stops the server, drops its runtime and joins the thread. The port is free
//! again once that returns, whatever path the owning phase left through.

#![allow(missing_docs)]

use std::future::IntoFuture as _;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::any;
use crossbeam_channel::{Receiver, Sender};
use tokio::runtime::Runtime;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::core::errors::{Result, WakeError};
use crate::daemon::confirmation::{ConfirmSource, ConfirmationSignals};

/// The one request path that counts as a confirmation.
pub const CONFIRM_PATH: &str = "/click";

const CONFIRM_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Action Confirmed</title>
    <script type="text/javascript">
        setTimeout(function() { window.close(); }, 500);
    </script>
    <style>
        body { font-family: sans-serif; text-align: center; margin-top: 50px; }
        h1 { color: #4CAF50; }
        p { color: #555; }
    </style>
</head>
<body>
    <h1>Action Confirmed!</h1>
    <p>Thank you for responding.</p>
    <p>This tab may close automatically. If not, you can close it manually.</p>
</body>
</html>
"#;

/// Where the listener binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerConfig {
    pub addr: SocketAddr,
}

impl ListenerConfig {
    /// `127.0.0.1:<port>`. Port 0 picks an ephemeral port.
    #[must_use]
    pub fn loopback(port: u16) -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
        }
    }

    /// URL the notification action should open.
    #[must_use]
    pub fn confirm_url(&self) -> String {
        format!("http://localhost:{}{CONFIRM_PATH}", self.addr.port())
    }
}

/// A request the listener handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    /// `GET` on the confirm path; the signal has been set.
    Confirmed,
    /// Anything else (favicon lookups, wrong method). Answered with 204.
    Ignored { method: String, path: String },
}

#[derive(Clone)]
struct CallbackState {
    signals: Arc<ConfirmationSignals>,
    events: Sender<ListenerEvent>,
}

impl CallbackState {
    fn ignore(&self, method: &Method, uri: &Uri) -> StatusCode {
        debug!(%method, path = uri.path(), "ignoring loopback request");
        let _ = self.events.send(ListenerEvent::Ignored {
            method: method.to_string(),
            path: uri.path().to_string(),
        });
        StatusCode::NO_CONTENT
    }
}

async fn confirm_handler(
    State(state): State<CallbackState>,
    method: Method,
    uri: Uri,
) -> Response {
    // Only the bare path confirms; `/click?x=1` is treated like any other path.
    if method != Method::GET || uri.query().is_some() {
        return state.ignore(&method, &uri).into_response();
    }
    state.signals.confirm(ConfirmSource::Callback);
    let _ = state.events.send(ListenerEvent::Confirmed);
    (StatusCode::OK, Html(CONFIRM_PAGE)).into_response()
}

async fn fallback_handler(
    State(state): State<CallbackState>,
    method: Method,
    uri: Uri,
) -> StatusCode {
    state.ignore(&method, &uri)
}

fn router(state: CallbackState) -> Router {
    Router::new()
        .route(CONFIRM_PATH, any(confirm_handler))
        .fallback(fallback_handler)
        .with_state(state)
}

/// Listener bound for exactly one wait phase.
pub struct ListenerSession {
    local_addr: SocketAddr,
    events: Receiver<ListenerEvent>,
    shutdown: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<()>>,
}

impl ListenerSession {
    /// Bind `config.addr` and start serving on a dedicated thread.
    pub fn start(config: &ListenerConfig, signals: Arc<ConfirmationSignals>) -> Result<Self> {
        let listener = std::net::TcpListener::bind(config.addr).map_err(|source| {
            WakeError::PortUnavailable {
                addr: config.addr,
                source,
            }
        })?;
        let local_addr = listener
            .local_addr()
            .and_then(|addr| listener.set_nonblocking(true).map(|()| addr))
            .map_err(|err| WakeError::Runtime {
                details: format!("preparing loopback listener: {err}"),
            })?;
        let runtime = listener_runtime().map_err(|err| WakeError::Runtime {
                details: format!("building listener runtime: {err}"),
            })?;

        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let app = router(CallbackState {
            signals,
            events: event_tx,
        });

        let server = thread::Builder::new()
            .name("wakecheck-listener".to_string())
            .spawn(move || serve(runtime, listener, app, shutdown_rx))
            .map_err(|err| WakeError::Runtime {
                details: format!("spawning listener thread: {err}"),
            })?;

        info!(addr = %local_addr, path = CONFIRM_PATH, "loopback listener armed");
        Ok(Self {
            local_addr,
            events: event_rx,
            shutdown: Some(shutdown_tx),
            server: Some(server),
        })
    }

    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Next handled request, waiting at most `max_wait`.
    ///
    /// `Duration::ZERO` returns immediately.
    pub fn poll_or_timeout(&self, max_wait: Duration) -> Option<ListenerEvent> {
        self.events.recv_timeout(max_wait).ok()
    }

    /// Stop serving and release the port. Also happens on drop.
    pub fn stop_and_release(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(server) = self.server.take() {
            if server.join().is_err() {
                warn!(addr = %self.local_addr, "listener thread panicked");
            } else {
                debug!(addr = %self.local_addr, "loopback listener released");
            }
        }
    }
}

impl Drop for ListenerSession {
    fn drop(&mut self) {
        self.release();
    }
}

/// Accept back-off inside `axum::serve` sleeps, so timers are required.
fn listener_runtime() -> std::io::Result<Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()
}

fn serve(
    runtime: Runtime,
    listener: std::net::TcpListener,
    app: Router,
    shutdown: oneshot::Receiver<()>,
) {
    runtime.block_on(async move {
        let listener = match tokio::net::TcpListener::from_std(listener) {
            Ok(listener) => listener,
            Err(err) => {
                warn!("loopback listener could not be registered: {err}");
                return;
            }
        };
        tokio::select! {
            result = axum::serve(listener, app).into_future() => {
                if let Err(err) = result {
                    warn!("loopback listener stopped: {err}");
                }
            }
            _ = shutdown => {}
        }
    });
    // In-flight connection tasks are cancelled with the runtime.
    drop(runtime);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read as _, Write as _};
    use std::net::TcpStream;
    use std::time::Instant;

    fn http_request(addr: SocketAddr, method: &str, path: &str) -> (u16, String) {
        let mut stream = TcpStream::connect(addr).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("read timeout");
        write!(
            stream,
            "{method} {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"
        )
        .expect("write request");
        let mut response = String::new();
        stream.read_to_string(&mut response).expect("read response");
        let status = response
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse().ok())
            .expect("status line");
        (status, response)
    }

    fn start() -> (ListenerSession, Arc<ConfirmationSignals>) {
        let signals = Arc::new(ConfirmationSignals::new());
        let session = ListenerSession::start(&ListenerConfig::loopback(0), Arc::clone(&signals))
            .expect("bind ephemeral port");
        (session, signals)
    }

    #[test]
    fn confirm_path_sets_signal_and_returns_page() {
        let (session, signals) = start();
        let (status, body) = http_request(session.local_addr(), "GET", CONFIRM_PATH);
        assert_eq!(status, 200);
        assert!(body.contains("Action Confirmed!"));
        assert!(signals.is_confirmed());
        assert_eq!(signals.confirmed_by(), Some(ConfirmSource::Callback));
        assert_eq!(
            session.poll_or_timeout(Duration::from_secs(1)),
            Some(ListenerEvent::Confirmed)
        );
    }

    #[test]
    fn other_paths_are_no_content_noops() {
        let (session, signals) = start();
        let (status, _) = http_request(session.local_addr(), "GET", "/favicon.ico");
        assert_eq!(status, 204);
        let (status, _) = http_request(session.local_addr(), "POST", CONFIRM_PATH);
        assert_eq!(status, 204);
        assert!(!signals.is_confirmed());
        assert_eq!(
            session.poll_or_timeout(Duration::from_secs(1)),
            Some(ListenerEvent::Ignored {
                method: "GET".to_string(),
                path: "/favicon.ico".to_string()
            })
        );
    }

    #[test]
    fn confirm_path_with_query_is_ignored() {
        let (session, signals) = start();
        let (status, _) = http_request(session.local_addr(), "GET", "/click?x=1");
        assert_eq!(status, 204);
        assert!(!signals.is_confirmed());
        assert_eq!(
            session.poll_or_timeout(Duration::from_secs(1)),
            Some(ListenerEvent::Ignored {
                method: "GET".to_string(),
                path: CONFIRM_PATH.to_string()
            })
        );
    }

    #[test]
    fn listener_runtime_supports_timers() {
        let runtime = listener_runtime().expect("runtime");
        runtime.block_on(tokio::time::sleep(Duration::from_millis(1)));
    }

    #[test]
    fn repeated_confirms_are_idempotent() {
        let (session, signals) = start();
        for _ in 0..3 {
            let (status, _) = http_request(session.local_addr(), "GET", CONFIRM_PATH);
            assert_eq!(status, 200);
        }
        assert_eq!(signals.confirmed_by(), Some(ConfirmSource::Callback));
        let mut confirmed = 0;
        while let Some(event) = session.poll_or_timeout(Duration::from_millis(200)) {
            if event == ListenerEvent::Confirmed {
                confirmed += 1;
            }
        }
        assert_eq!(confirmed, 3);
    }

    #[test]
    fn poll_is_bounded_without_traffic() {
        let (session, _) = start();
        let began = Instant::now();
        assert_eq!(session.poll_or_timeout(Duration::from_millis(100)), None);
        let waited = began.elapsed();
        assert!(waited >= Duration::from_millis(100));
        assert!(waited < Duration::from_secs(2));
        assert_eq!(session.poll_or_timeout(Duration::ZERO), None);
    }

    #[test]
    fn occupied_port_is_reported() {
        let holder = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).expect("holder");
        let port = holder.local_addr().expect("addr").port();
        let err = ListenerSession::start(
            &ListenerConfig::loopback(port),
            Arc::new(ConfirmationSignals::new()),
        )
        .err()
        .expect("port is held");
        assert_eq!(err.code(), "WCK-2001");
    }

    #[test]
    fn release_frees_the_port_for_the_next_phase() {
        let (session, _) = start();
        let addr = session.local_addr();
        let _ = http_request(addr, "GET", CONFIRM_PATH);
        session.stop_and_release();

        let again = ListenerSession::start(
            &ListenerConfig { addr },
            Arc::new(ConfirmationSignals::new()),
        )
        .expect("port reusable after release");
        drop(again);
        std::net::TcpListener::bind(addr).expect("port reusable after drop");
    }

    #[test]
    fn confirm_url_points_at_localhost() {
        assert_eq!(
            ListenerConfig::loopback(8888).confirm_url(),
            "http://localhost:8888/click"
        );
    }
}
