//! TCP (and unix-socket) transport implementation of the wire seams.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio_util::codec::Framed;

use crate::codec::FrameCodec;
use crate::endpoint::{Address, Endpoint};
use crate::error::WireError;
use crate::link::{Connector, ExecResult, Link, StatementId};
use crate::message::{ClientMessage, ServerMessage, Value, ERR_MAX_PREPARED_STMT_COUNT};

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// [`Connector`] implementation dialing real sockets and speaking the
/// length-prefixed message protocol.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    /// Create a connector with the default connect timeout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Override the per-endpoint connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    async fn handshake<T>(endpoint: Endpoint, stream: T) -> Result<Box<dyn Link>, WireError>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut framed = Framed::new(stream, FrameCodec::new());
        match framed.next().await {
            Some(Ok(ServerMessage::Ready { connection_id })) => {
                tracing::debug!(endpoint = %endpoint, connection_id, "link established");
                Ok(Box::new(FramedLink {
                    endpoint,
                    connection_id,
                    framed,
                }))
            }
            Some(Ok(_)) => Err(WireError::UnexpectedResponse("expected Ready greeting")),
            Some(Err(err)) => Err(err),
            None => Err(WireError::ConnectionClosed),
        }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn dial(&self, endpoint: &Endpoint) -> Result<Box<dyn Link>, WireError> {
        let connect_err = |reason: String| WireError::Connect {
            endpoint: endpoint.to_string(),
            reason,
        };

        match endpoint.address() {
            Address::Tcp { host, port } => {
                let stream = tokio::time::timeout(
                    self.connect_timeout,
                    TcpStream::connect((host.as_str(), *port)),
                )
                .await
                .map_err(|_| connect_err("connect timed out".into()))?
                .map_err(|e| connect_err(e.to_string()))?;
                let _ = stream.set_nodelay(true);
                Self::handshake(endpoint.clone(), stream).await
            }
            Address::Socket { path } => {
                #[cfg(unix)]
                {
                    let stream =
                        tokio::time::timeout(self.connect_timeout, UnixStream::connect(path))
                            .await
                            .map_err(|_| connect_err("connect timed out".into()))?
                            .map_err(|e| connect_err(e.to_string()))?;
                    Self::handshake(endpoint.clone(), stream).await
                }
                #[cfg(not(unix))]
                {
                    let _ = path;
                    Err(WireError::Config(
                        "unix socket endpoints are not supported on this platform".into(),
                    ))
                }
            }
        }
    }
}

struct FramedLink<T> {
    endpoint: Endpoint,
    connection_id: u64,
    framed: Framed<T, FrameCodec<ClientMessage, ServerMessage>>,
}

impl<T> FramedLink<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn roundtrip(&mut self, msg: ClientMessage) -> Result<ServerMessage, WireError> {
        self.framed.send(msg).await?;
        match self.framed.next().await {
            Some(reply) => reply,
            None => Err(WireError::ConnectionClosed),
        }
    }
}

fn server_error(code: u16, message: String) -> WireError {
    if code == ERR_MAX_PREPARED_STMT_COUNT {
        WireError::StatementLimit
    } else {
        WireError::Server { code, message }
    }
}

fn into_exec_result(reply: ServerMessage) -> Result<ExecResult, WireError> {
    match reply {
        ServerMessage::Done { affected_rows } => Ok(ExecResult {
            affected_rows,
            ..ExecResult::default()
        }),
        ServerMessage::Rows { columns, rows } => Ok(ExecResult {
            affected_rows: 0,
            columns,
            rows,
        }),
        ServerMessage::Error { code, message } => Err(server_error(code, message)),
        _ => Err(WireError::UnexpectedResponse("expected Done or Rows")),
    }
}

#[async_trait]
impl<T> Link for FramedLink<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn connection_id(&self) -> u64 {
        self.connection_id
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn execute(&mut self, text: &str, params: &[Value]) -> Result<ExecResult, WireError> {
        let reply = self
            .roundtrip(ClientMessage::Execute {
                text: text.to_owned(),
                params: params.to_vec(),
            })
            .await?;
        into_exec_result(reply)
    }

    async fn prepare(&mut self, text: &str) -> Result<StatementId, WireError> {
        let reply = self
            .roundtrip(ClientMessage::Prepare {
                text: text.to_owned(),
            })
            .await?;
        match reply {
            ServerMessage::Prepared { stmt_id } => Ok(stmt_id),
            ServerMessage::Error { code, message } => Err(server_error(code, message)),
            _ => Err(WireError::UnexpectedResponse("expected Prepared")),
        }
    }

    async fn execute_prepared(
        &mut self,
        stmt_id: StatementId,
        params: &[Value],
    ) -> Result<ExecResult, WireError> {
        let reply = self
            .roundtrip(ClientMessage::ExecutePrepared {
                stmt_id,
                params: params.to_vec(),
            })
            .await?;
        into_exec_result(reply)
    }

    async fn deallocate(&mut self, stmt_id: StatementId) -> Result<(), WireError> {
        let reply = self.roundtrip(ClientMessage::Deallocate { stmt_id }).await?;
        match reply {
            ServerMessage::Done { .. } => Ok(()),
            ServerMessage::Error { code, message } => Err(server_error(code, message)),
            _ => Err(WireError::UnexpectedResponse("expected Done")),
        }
    }

    async fn close(&mut self) -> Result<(), WireError> {
        // Best effort: the peer may already be gone.
        let _ = self.framed.send(ClientMessage::Close).await;
        Ok(())
    }
}
