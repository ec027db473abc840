//! Socket sink
//!
//! Writes each formatted entry to a TCP, UDP or unix socket. The connection
//! is established lazily and kept open. A failed write drops the connection,
//! redials and retries exactly once.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::Mutex;

use super::{formatted_bytes, Sink};
use crate::audit::event::{Format, PipelineEvent};
use crate::audit::options::parse_duration;
use crate::context::AuditContext;
use crate::error::{Error, Result};

/// Default bound on dialing and writing
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Transport used by a socket sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SocketType {
    /// Stream over TCP
    #[default]
    Tcp,
    /// Datagrams over UDP
    Udp,
    /// Stream over a unix domain socket
    Unix,
}

impl SocketType {
    /// Option value of the transport
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Unix => "unix",
        }
    }
}

impl fmt::Display for SocketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SocketType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            "unix" => Ok(Self::Unix),
            other => Err(Error::external_options(
                "audit.SocketType.parse",
                format!("unsupported socket_type {other:?}"),
            )),
        }
    }
}

/// Socket sink configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketSinkConfig {
    /// Endpoint, without scheme
    pub address: String,
    /// Transport
    pub socket_type: SocketType,
    /// Bound on dialing and on each write
    pub write_timeout: Duration,
    /// Format of the bytes to write
    pub format: Format,
}

impl SocketSinkConfig {
    /// Parse the `address`, `socket_type` and `write_timeout` options
    ///
    /// An address like `tcp://127.0.0.1:9090` supplies the transport when
    /// `socket_type` is not set.
    pub fn from_options(options: &HashMap<String, String>, format: Format) -> Result<Self> {
        const OP: &str = "audit.SocketSinkConfig.from_options";

        let raw = options
            .get("address")
            .map(|a| a.trim())
            .filter(|a| !a.is_empty())
            .ok_or_else(|| Error::external_options(OP, "address is required"))?;

        let (scheme, address) = match raw.split_once("://") {
            Some((scheme, rest)) => (Some(scheme), rest.to_string()),
            None => (None, raw.to_string()),
        };
        if address.is_empty() {
            return Err(Error::external_options(OP, "address is required"));
        }

        let socket_type = match options.get("socket_type").map(|s| s.trim()) {
            Some(s) if !s.is_empty() => s.parse::<SocketType>()?,
            _ => match scheme {
                Some(scheme) => scheme.parse::<SocketType>()?,
                None => SocketType::Tcp,
            },
        };

        let write_timeout = match options.get("write_timeout").map(|s| s.trim()) {
            Some(t) if !t.is_empty() => parse_duration(t).map_err(|e| {
                Error::external_options(OP, format!("unable to parse 'write_timeout': {e}"))
            })?,
            _ => DEFAULT_WRITE_TIMEOUT,
        };

        Ok(Self {
            address,
            socket_type,
            write_timeout,
            format,
        })
    }
}

enum Connection {
    Tcp(TcpStream),
    Udp(UdpSocket),
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
}

impl Connection {
    async fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        match self {
            Self::Tcp(stream) => {
                stream.write_all(bytes).await?;
                stream.flush().await
            }
            Self::Udp(socket) => socket.send(bytes).await.map(|_| ()),
            #[cfg(unix)]
            Self::Unix(stream) => {
                stream.write_all(bytes).await?;
                stream.flush().await
            }
        }
    }

    async fn shutdown(self) {
        match self {
            Self::Tcp(mut stream) => {
                let _ = stream.shutdown().await;
            }
            Self::Udp(_) => {}
            #[cfg(unix)]
            Self::Unix(mut stream) => {
                let _ = stream.shutdown().await;
            }
        }
    }
}

/// Writes formatted entries to a socket
pub struct SocketSink {
    config: SocketSinkConfig,
    connection: Mutex<Option<Connection>>,
}

impl fmt::Debug for SocketSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketSink")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SocketSink {
    /// Create a sink; no connection is made until the first write
    pub fn new(config: SocketSinkConfig) -> Self {
        Self {
            config,
            connection: Mutex::new(None),
        }
    }

    /// Configured endpoint
    pub fn address(&self) -> &str {
        &self.config.address
    }

    async fn dial(&self) -> std::io::Result<Connection> {
        let address = self.config.address.as_str();
        let connect = async {
            match self.config.socket_type {
                SocketType::Tcp => TcpStream::connect(address).await.map(Connection::Tcp),
                SocketType::Udp => {
                    let target = tokio::net::lookup_host(address).await?.next().ok_or_else(|| {
                        std::io::Error::new(
                            std::io::ErrorKind::AddrNotAvailable,
                            format!("no addresses found for {address}"),
                        )
                    })?;
                    let bind = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
                    let socket = UdpSocket::bind(bind).await?;
                    socket.connect(target).await?;
                    Ok(Connection::Udp(socket))
                }
                #[cfg(unix)]
                SocketType::Unix => tokio::net::UnixStream::connect(address)
                    .await
                    .map(Connection::Unix),
                #[cfg(not(unix))]
                SocketType::Unix => Err(std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    "unix sockets are not supported on this platform",
                )),
            }
        };

        tokio::time::timeout(self.config.write_timeout, connect)
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "dial timed out"))?
    }

    async fn write(&self, slot: &mut Option<Connection>, bytes: &[u8]) -> std::io::Result<()> {
        if slot.is_none() {
            *slot = Some(self.dial().await?);
        }
        let Some(conn) = slot.as_mut() else {
            return Ok(());
        };
        tokio::time::timeout(self.config.write_timeout, conn.write(bytes))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "write timed out"))?
    }
}

#[async_trait]
impl Sink for SocketSink {
    async fn process(&self, ctx: &AuditContext, event: &PipelineEvent) -> Result<()> {
        const OP: &str = "audit.SocketSink.Process";
        ctx.check()?;
        let bytes = formatted_bytes(OP, event, self.config.format)?;

        ctx.run(async {
            let mut slot = self.connection.lock().await;
            if let Err(first) = self.write(&mut slot, bytes).await {
                tracing::warn!(address = %self.config.address, error = %first, "audit socket write failed, reconnecting");
                if let Some(conn) = slot.take() {
                    conn.shutdown().await;
                }
                if let Err(e) = self.write(&mut slot, bytes).await {
                    *slot = None;
                    return Err(Error::internal_error(
                        OP,
                        format!("error writing to socket {:?}", self.config.address),
                    )
                    .with_upstream(e));
                }
            }
            Ok(())
        })
        .await
    }

    async fn reopen(&self) -> Result<()> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.take() {
            conn.shutdown().await;
        }
        let conn = self.dial().await.map_err(|e| {
            Error::internal_error(
                "audit.SocketSink.Reopen",
                format!("error connecting to {:?}", self.config.address),
            )
            .with_upstream(e)
        })?;
        *slot = Some(conn);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.take() {
            conn.shutdown().await;
        }
        Ok(())
    }

    fn sink_type(&self) -> &'static str {
        "socket"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::sink::testing::formatted_event;
    use crate::error::ErrorKind;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn options(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_config_defaults_and_scheme() {
        let cfg = SocketSinkConfig::from_options(&options(&[("address", "127.0.0.1:9090")]), Format::Json)
            .unwrap();
        assert_eq!(cfg.socket_type, SocketType::Tcp);
        assert_eq!(cfg.write_timeout, DEFAULT_WRITE_TIMEOUT);

        let cfg = SocketSinkConfig::from_options(
            &options(&[("address", "udp://127.0.0.1:514"), ("write_timeout", "500ms")]),
            Format::Json,
        )
        .unwrap();
        assert_eq!(cfg.socket_type, SocketType::Udp);
        assert_eq!(cfg.address, "127.0.0.1:514");
        assert_eq!(cfg.write_timeout, Duration::from_millis(500));

        let err = SocketSinkConfig::from_options(&options(&[]), Format::Json).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExternalOptions);

        let err = SocketSinkConfig::from_options(
            &options(&[("address", "x:1"), ("socket_type", "carrier-pigeon")]),
            Format::Json,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExternalOptions);
    }

    #[tokio::test]
    async fn test_tcp_write() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let sink = SocketSink::new(SocketSinkConfig {
            address: addr.to_string(),
            socket_type: SocketType::Tcp,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            format: Format::Json,
        });

        let reader = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 7];
            stream.read_exact(&mut buf).await.unwrap();
            buf
        });

        sink.process(&AuditContext::root(), &formatted_event(Format::Json, b"{\"a\":1}"))
            .await
            .unwrap();
        assert_eq!(reader.await.unwrap(), b"{\"a\":1}");
    }

    #[tokio::test]
    async fn test_reconnects_after_listener_appears() {
        // Reserve a port, then free it so the first dial is refused
        let placeholder = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = placeholder.local_addr().unwrap();
        drop(placeholder);

        let sink = SocketSink::new(SocketSinkConfig {
            address: addr.to_string(),
            socket_type: SocketType::Tcp,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            format: Format::Json,
        });
        let ctx = AuditContext::root();

        let first = sink.process(&ctx, &formatted_event(Format::Json, b"entry")).await;
        assert!(first.is_err());

        let listener = TcpListener::bind(addr).await.unwrap();
        let reader = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 5];
            stream.read_exact(&mut buf).await.unwrap();
            buf
        });

        sink.process(&ctx, &formatted_event(Format::Json, b"entry")).await.unwrap();
        assert_eq!(reader.await.unwrap(), b"entry");
    }

    #[tokio::test]
    async fn test_udp_write() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let sink = SocketSink::new(SocketSinkConfig {
            address: addr.to_string(),
            socket_type: SocketType::Udp,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            format: Format::Json,
        });

        sink.process(&AuditContext::root(), &formatted_event(Format::Json, b"dgram"))
            .await
            .unwrap();
        let mut buf = [0u8; 16];
        let n = server.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"dgram");
    }
}
