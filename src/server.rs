//! Server lifecycle management.
//!
//! A [`Listener`] is a network endpoint that can report whether it is
//! accepting connections, be told to start, and be told to stop. The two
//! implementations are [`AppServer`], which wraps an [`axum::Router`] in a
//! real HTTP server on a random (or caller-chosen) port, and
//! [`ExternalServer`], an address whose server is owned entirely by the
//! caller.
//!
//! [`Lifecycle`] decides, per request session, whether the listener needs
//! starting and therefore whether it needs stopping afterwards: a listener
//! that was already accepting connections when the session began is never
//! stopped by this crate.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::error::FetchError;

/// A startable/stoppable network endpoint.
///
/// Implementations derive their URL scheme from their concrete type, never
/// from configuration.
#[async_trait]
pub trait Listener: Send {
    /// The address this listener is currently accepting connections on, or
    /// `None` if it is not accepting.
    fn local_addr(&self) -> Option<SocketAddr>;

    /// URL scheme for requests against this listener.
    fn scheme(&self) -> &'static str {
        "http"
    }

    /// Binds and begins accepting connections, resolving with the bound
    /// address. A busy address resolves to [`FetchError::AddressInUse`].
    async fn start(&mut self) -> Result<SocketAddr, FetchError>;

    /// Stops accepting new connections. Fire-and-forget: in-flight
    /// connections are not drained.
    fn stop(&mut self);
}

/// A listener shared between a reusable fetch function and the sessions it
/// creates. The listener is the only shared mutable resource in the crate.
pub type SharedListener = Arc<tokio::sync::Mutex<Box<dyn Listener>>>;

/// Wraps a listener in the shared handle used by sessions.
pub(crate) fn shared(listener: impl Listener + 'static) -> SharedListener {
    Arc::new(tokio::sync::Mutex::new(Box::new(listener)))
}

/// Where an [`AppServer`] gets its TCP listener from.
enum Binding {
    /// Bind this address when started. Kept across stop/start cycles so the
    /// server can be recycled.
    Addr(SocketAddr),
    /// Serve on a listener the caller already bound.
    Prebound(std::net::TcpListener),
    /// A prebound listener was consumed by a previous start.
    Consumed,
}

/// The application-to-listener adapter: serves an [`axum::Router`] over a
/// real TCP socket.
///
/// ## Example
///
/// ```rust,no_run
/// use axum::Router;
/// use axum::routing::get;
/// use fetch_expect::AppServer;
///
/// let app = Router::new().route("/hello", get(|| async { "Hello!" }));
/// let server = AppServer::new(app);
/// ```
pub struct AppServer {
    router: Router,
    binding: Binding,
    serving: Option<Serving>,
}

struct Serving {
    addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
}

impl AppServer {
    /// Creates an adapter that will bind `127.0.0.1:0` (random port) when a
    /// session starts it.
    pub fn new(router: Router) -> Self {
        Self::bind_to(router, SocketAddr::from(([127, 0, 0, 1], 0)))
    }

    /// Creates an adapter that will bind the given address when started.
    pub const fn bind_to(router: Router, addr: SocketAddr) -> Self {
        Self {
            router,
            binding: Binding::Addr(addr),
            serving: None,
        }
    }

    /// Creates an adapter serving on a TCP listener the caller already bound.
    ///
    /// The listener's address must be inspectable as a host:port socket
    /// address; anything else is rejected with
    /// [`FetchError::UnsupportedAddress`].
    pub fn from_std(router: Router, listener: std::net::TcpListener) -> Result<Self, FetchError> {
        listener
            .local_addr()
            .map_err(|err| FetchError::UnsupportedAddress(err.to_string()))?;
        Ok(Self {
            router,
            binding: Binding::Prebound(listener),
            serving: None,
        })
    }
}

#[async_trait]
impl Listener for AppServer {
    fn local_addr(&self) -> Option<SocketAddr> {
        self.serving.as_ref().map(|serving| serving.addr)
    }

    async fn start(&mut self) -> Result<SocketAddr, FetchError> {
        if let Some(serving) = &self.serving {
            return Ok(serving.addr);
        }

        let listener = match std::mem::replace(&mut self.binding, Binding::Consumed) {
            Binding::Addr(addr) => {
                // Restored so a later start can rebind the same address.
                self.binding = Binding::Addr(addr);
                TcpListener::bind(addr).await.map_err(map_bind_error)?
            }
            Binding::Prebound(std_listener) => {
                std_listener
                    .set_nonblocking(true)
                    .map_err(FetchError::Bind)?;
                TcpListener::from_std(std_listener).map_err(FetchError::Bind)?
            }
            Binding::Consumed => {
                return Err(FetchError::Bind(std::io::Error::other(
                    "a prebound listener cannot be restarted",
                )))
            }
        };

        let addr = listener
            .local_addr()
            .map_err(|err| FetchError::UnsupportedAddress(err.to_string()))?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = self.router.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .ok();
        });

        tracing::debug!(%addr, "test server started");
        self.serving = Some(Serving { addr, shutdown_tx });
        Ok(addr)
    }

    fn stop(&mut self) {
        if let Some(serving) = self.serving.take() {
            tracing::debug!(addr = %serving.addr, "test server stopped");
            let _ = serving.shutdown_tx.send(());
        }
    }
}

/// An address for a server whose lifetime the caller manages.
///
/// Always reports itself as accepting connections, so a session never starts
/// or stops it.
pub struct ExternalServer {
    addr: SocketAddr,
    scheme: &'static str,
}

impl ExternalServer {
    /// An already-running plain HTTP server.
    pub const fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            scheme: "http",
        }
    }

    /// An already-running HTTPS server.
    pub const fn https(addr: SocketAddr) -> Self {
        Self {
            addr,
            scheme: "https",
        }
    }
}

#[async_trait]
impl Listener for ExternalServer {
    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.addr)
    }

    fn scheme(&self) -> &'static str {
        self.scheme
    }

    async fn start(&mut self) -> Result<SocketAddr, FetchError> {
        Ok(self.addr)
    }

    fn stop(&mut self) {}
}

fn map_bind_error(err: std::io::Error) -> FetchError {
    if err.kind() == std::io::ErrorKind::AddrInUse {
        FetchError::AddressInUse
    } else {
        FetchError::Bind(err)
    }
}

/// Per-session view of a listener: whether this session started it and
/// therefore owns its shutdown, plus the base URL requests are made against.
pub(crate) struct Lifecycle {
    listener: SharedListener,
    base_url: String,
    started_by_self: bool,
    closed: bool,
}

impl Lifecycle {
    /// Ensures the listener is accepting connections.
    ///
    /// A listener that already reports an address is treated as externally
    /// started and will not be stopped by [`close`](Self::close).
    pub async fn create(listener: SharedListener) -> Result<Self, FetchError> {
        let (base_url, started_by_self) = {
            let mut guard = listener.lock().await;
            if let Some(addr) = guard.local_addr() {
                (base_url_for(guard.scheme(), addr), false)
            } else {
                let addr = guard.start().await?;
                (base_url_for(guard.scheme(), addr), true)
            }
        };

        Ok(Self {
            listener,
            base_url,
            started_by_self,
            closed: false,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Stops the listener if this session started it. Idempotent.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if self.started_by_self {
            self.listener.lock().await.stop();
        }
    }
}

fn base_url_for(scheme: &str, addr: SocketAddr) -> String {
    if addr.ip().is_unspecified() {
        format!("{scheme}://127.0.0.1:{}", addr.port())
    } else {
        format!("{scheme}://{addr}")
    }
}
