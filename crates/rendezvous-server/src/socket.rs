//! Unix socket listener for IPC.
//!
//! Each connection carries length-prefixed JSON envelopes. A connection is
//! either request/response or, after `subscribe`, a one-way event stream.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use rendezvous_protocol::{
    Envelope, HEADER_LEN, PROTOCOL_VERSION, ProtocolError, Request, Response, encode_message,
    payload_len,
};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};

/// Unix socket server for client connections.
pub struct SocketServer {
    config: ServerConfig,
    listener: UnixListener,
    connection_semaphore: Arc<Semaphore>,
}

impl SocketServer {
    /// Binds the configured socket path.
    ///
    /// With `cleanup_stale_socket`, a leftover socket file nobody listens on
    /// is removed first; a live one means another daemon is running.
    pub async fn new(config: ServerConfig) -> ServerResult<Self> {
        let socket_path = &config.socket_path;

        if let Some(parent) = socket_path.parent()
            && !parent.exists()
        {
            return Err(ServerError::socket_path_invalid(
                parent.to_string_lossy().to_string(),
            ));
        }

        if config.cleanup_stale_socket && socket_path.exists() {
            if UnixStream::connect(socket_path).await.is_ok() {
                return Err(ServerError::socket_in_use(
                    socket_path.to_string_lossy().to_string(),
                ));
            }
            info!(path = %socket_path.display(), "Removing stale socket");
            std::fs::remove_file(socket_path)?;
        } else if socket_path.exists() {
            return Err(ServerError::socket_in_use(
                socket_path.to_string_lossy().to_string(),
            ));
        }

        let listener = UnixListener::bind(socket_path)?;
        info!(path = %socket_path.display(), "Socket server listening");

        let connection_semaphore = Arc::new(Semaphore::new(config.max_connections));
        Ok(Self {
            config,
            listener,
            connection_semaphore,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    /// Accepts one connection, waiting for a free slot first.
    pub async fn accept(&self) -> ServerResult<Connection> {
        let permit = self
            .connection_semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ServerError::Shutdown)?;

        let (stream, _addr) = self.listener.accept().await?;
        debug!("Accepted new connection");

        Ok(Connection {
            stream,
            timeout: self.config.connection_timeout,
            _permit: permit,
        })
    }

    /// Accepts connections forever, spawning `handler` for each.
    pub async fn run<F, Fut>(&self, handler: F) -> ServerResult<()>
    where
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        loop {
            match self.accept().await {
                Ok(connection) => {
                    tokio::spawn(handler(connection));
                }
                Err(e) => error!(error = %e, "Failed to accept connection"),
            }
        }
    }

    /// Like [`run`](Self::run), returning once `shutdown` completes.
    pub async fn run_until_shutdown<F, Fut, S>(&self, handler: F, shutdown: S) -> ServerResult<()>
    where
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
        S: Future<Output = ()> + Send,
    {
        tokio::select! {
            result = self.run(handler) => result,
            () = shutdown => {
                info!("Shutdown signal received");
                Ok(())
            }
        }
    }
}

impl Drop for SocketServer {
    fn drop(&mut self) {
        if !self.config.socket_path.exists() {
            return;
        }
        match std::fs::remove_file(&self.config.socket_path) {
            Ok(()) => debug!(path = %self.config.socket_path.display(), "Removed socket file"),
            Err(e) => warn!(
                path = %self.config.socket_path.display(),
                error = %e,
                "Failed to remove socket file"
            ),
        }
    }
}

/// One client connection.
pub struct Connection {
    stream: UnixStream,
    timeout: Duration,
    _permit: OwnedSemaphorePermit,
}

impl Connection {
    /// Reads the next request envelope.
    ///
    /// Returns `Ok(None)` when the client closed the connection.
    pub async fn read_request(&mut self) -> ServerResult<Option<Envelope<Request>>> {
        let mut header = [0u8; HEADER_LEN];
        match tokio::time::timeout(self.timeout, self.stream.read_exact(&mut header)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(ProtocolError::timeout("read request length").into()),
        }

        let len = payload_len(header)?;
        let mut payload = vec![0u8; len];
        match tokio::time::timeout(self.timeout, self.stream.read_exact(&mut payload)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(ProtocolError::timeout("read request payload").into()),
        }

        let envelope: Envelope<Request> =
            serde_json::from_slice(&payload).map_err(ProtocolError::from)?;
        if !envelope.is_compatible() {
            warn!(
                version = %envelope.protocol_version,
                expected = PROTOCOL_VERSION,
                "Incompatible protocol version"
            );
        }
        Ok(Some(envelope))
    }

    pub async fn write_response(&mut self, envelope: &Envelope<Response>) -> ServerResult<()> {
        let frame = encode_message(envelope)?;
        match tokio::time::timeout(self.timeout, self.stream.write_all(&frame)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ProtocolError::timeout("write response").into()),
        }
    }

    pub async fn respond(
        &mut self,
        request_id: impl Into<String>,
        response: Response,
    ) -> ServerResult<()> {
        self.write_response(&Envelope::response(request_id, response))
            .await
    }

    /// Resolves once the client hangs up. Anything it sends meanwhile is
    /// discarded.
    pub async fn closed(&mut self) {
        let mut sink = [0u8; 256];
        loop {
            match self.stream.read(&mut sink).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
        }
    }
}
