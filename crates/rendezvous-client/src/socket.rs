//! Unix socket client for the rendezvous daemon.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::{debug, warn};
use uuid::Uuid;

use rendezvous_protocol::{
    Envelope, HEADER_LEN, NotificationEvent, ProtocolError, Request, Response, encode_message,
    payload_len,
};

use crate::error::{ClientError, ClientResult};

/// Client for one-shot requests and notification streams.
pub struct SocketClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl SocketClient {
    pub fn new(socket_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout,
        }
    }

    /// Client for the default socket path with a 5 second timeout.
    pub fn with_defaults() -> Self {
        Self::new(
            rendezvous_server::default_socket_path(),
            Duration::from_secs(5),
        )
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    /// Sends a request and waits for its response.
    pub async fn send(&self, request: Request) -> ClientResult<Response> {
        let request_id = Uuid::new_v4().to_string();
        let envelope = Envelope::request(&request_id, request);

        let mut stream = self.connect().await?;
        let response = self.exchange(&mut stream, &envelope).await?;

        if response.request_id != request_id {
            warn!(
                expected = %request_id,
                received = %response.request_id,
                "response request_id mismatch"
            );
        }
        Ok(response.payload)
    }

    /// Opens a notification stream for `user_id`.
    ///
    /// The daemon acknowledges the subscription before any event is sent.
    pub async fn subscribe(&self, user_id: impl Into<String>) -> ClientResult<EventStream> {
        let envelope = Envelope::request(Uuid::new_v4().to_string(), Request::subscribe(user_id));

        let mut stream = self.connect().await?;
        let ack = self.exchange(&mut stream, &envelope).await?;
        match ack.payload {
            Response::Ok => Ok(EventStream { stream }),
            Response::Error { error } => Err(ClientError::Remote(error)),
            other => Err(ClientError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    /// Returns true if the daemon answers a ping.
    pub async fn ping(&self) -> bool {
        matches!(self.send(Request::Ping).await, Ok(Response::Pong))
    }

    async fn connect(&self) -> ClientResult<UnixStream> {
        debug!(socket = %self.socket_path.display(), "connecting to daemon");

        tokio::time::timeout(self.timeout, UnixStream::connect(&self.socket_path))
            .await
            .map_err(|_| {
                ClientError::Connection(format!(
                    "connection timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| {
                ClientError::Connection(format!(
                    "failed to connect to {}: {e}",
                    self.socket_path.display()
                ))
            })
    }

    async fn exchange(
        &self,
        stream: &mut UnixStream,
        envelope: &Envelope<Request>,
    ) -> ClientResult<Envelope<Response>> {
        let frame = encode_message(envelope)?;

        tokio::time::timeout(self.timeout, async {
            stream.write_all(&frame).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| ClientError::Timeout("sending request".into()))??;

        debug!(request_type = envelope.payload.kind(), "request sent");

        match tokio::time::timeout(self.timeout, read_frame(stream)).await {
            Ok(Ok(Some(envelope))) => Ok(envelope),
            Ok(Ok(None)) => Err(ClientError::Connection(
                "daemon closed the connection".into(),
            )),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ClientError::Timeout("reading response".into())),
        }
    }
}

/// Notifications pushed on a subscribed connection.
pub struct EventStream {
    stream: UnixStream,
}

impl EventStream {
    /// Waits for the next event. `Ok(None)` means the daemon hung up.
    pub async fn next(&mut self) -> ClientResult<Option<NotificationEvent>> {
        loop {
            let Some(envelope) = read_frame(&mut self.stream).await? else {
                return Ok(None);
            };
            match envelope.payload {
                Response::Event { event } => return Ok(Some(event)),
                Response::Error { error } => return Err(ClientError::Remote(error)),
                other => debug!(response = ?other, "ignoring non-event frame"),
            }
        }
    }
}

/// Reads one response frame. `Ok(None)` on a clean close before the header.
async fn read_frame(stream: &mut UnixStream) -> ClientResult<Option<Envelope<Response>>> {
    let mut header = [0u8; HEADER_LEN];
    match stream.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = payload_len(header)?;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;

    let envelope: Envelope<Response> =
        serde_json::from_slice(&payload).map_err(ProtocolError::from)?;
    Ok(Some(envelope))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rendezvous_protocol::{ErrorCode, decode_message};
    use tempfile::tempdir;
    use tokio::net::UnixListener;

    async fn read_request(stream: &mut UnixStream) -> Envelope<Request> {
        let mut frame = vec![0u8; HEADER_LEN];
        stream.read_exact(&mut frame).await.unwrap();
        let len = payload_len([frame[0], frame[1], frame[2], frame[3]]).unwrap();
        frame.resize(HEADER_LEN + len, 0);
        stream.read_exact(&mut frame[HEADER_LEN..]).await.unwrap();
        decode_message(&frame).unwrap()
    }

    async fn reply(stream: &mut UnixStream, request_id: &str, response: Response) {
        let frame = encode_message(&Envelope::response(request_id, response)).unwrap();
        stream.write_all(&frame).await.unwrap();
    }

    #[test]
    fn socket_client_creation() {
        let client = SocketClient::new("/tmp/test.sock", Duration::from_secs(10));
        assert_eq!(client.socket_path(), Path::new("/tmp/test.sock"));
        assert!(!client.socket_exists());
    }

    #[test]
    fn default_client() {
        let client = SocketClient::with_defaults();
        assert!(
            client
                .socket_path()
                .to_string_lossy()
                .contains("rendezvous")
        );
    }

    #[tokio::test]
    async fn missing_socket_is_a_connection_error() {
        let dir = tempdir().unwrap();
        let client = SocketClient::new(dir.path().join("none.sock"), Duration::from_secs(1));

        assert!(matches!(
            client.send(Request::Ping).await,
            Err(ClientError::Connection(_))
        ));
        assert!(!client.ping().await);
    }

    #[tokio::test]
    async fn send_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_request(&mut stream).await;
            assert_eq!(request.payload, Request::Status);
            reply(
                &mut stream,
                &request.request_id,
                Response::error(ErrorCode::ShuttingDown, "bye"),
            )
            .await;
        });

        let client = SocketClient::new(&path, Duration::from_secs(5));
        let response = client.send(Request::Status).await.unwrap();
        assert_eq!(response.as_error().map(|e| e.code), Some(ErrorCode::ShuttingDown));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn silent_daemon_times_out() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _request = read_request(&mut stream).await;
            tokio::time::sleep(Duration::from_secs(2)).await;
        });

        let client = SocketClient::new(&path, Duration::from_millis(100));
        assert!(matches!(
            client.send(Request::Ping).await,
            Err(ClientError::Timeout(_))
        ));
        server.abort();
    }

    #[tokio::test]
    async fn subscription_yields_events_until_close() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_request(&mut stream).await;
            assert_eq!(request.payload, Request::subscribe("u-alice"));
            reply(&mut stream, &request.request_id, Response::Ok).await;

            let event = NotificationEvent::ReportComplete {
                report_id: "r1".into(),
                meeting_id: "m1".into(),
                title: "Weekly sync".into(),
            };
            reply(&mut stream, &request.request_id, Response::Event { event }).await;
        });

        let client = SocketClient::new(&path, Duration::from_secs(5));
        let mut events = client.subscribe("u-alice").await.unwrap();

        let event = events.next().await.unwrap().unwrap();
        assert_eq!(event.kind(), "report_complete");
        assert_eq!(event.meeting_id(), "m1");

        server.await.unwrap();
        assert!(events.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejected_subscription_is_remote_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_request(&mut stream).await;
            reply(
                &mut stream,
                &request.request_id,
                Response::error(ErrorCode::ShuttingDown, "going away"),
            )
            .await;
        });

        let client = SocketClient::new(&path, Duration::from_secs(5));
        assert!(matches!(
            client.subscribe("u-alice").await,
            Err(ClientError::Remote(_))
        ));
        server.await.unwrap();
    }
}
