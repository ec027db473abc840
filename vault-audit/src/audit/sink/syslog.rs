//! Syslog sink
//!
//! Wraps each formatted entry in an RFC 5424 message at severity INFO and
//! sends it to the local syslog daemon's datagram socket, or to a remote
//! collector over UDP or TCP when `address` carries a scheme.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};

use super::{formatted_bytes, Sink};
use crate::audit::event::{Format, PipelineEvent};
use crate::context::AuditContext;
use crate::error::{Error, Result};

/// Default syslog facility
pub const DEFAULT_FACILITY: &str = "AUTH";

/// Default syslog tag
pub const DEFAULT_TAG: &str = "vault";

/// Local daemon socket used when no address is configured
pub const DEFAULT_SYSLOG_SOCKET: &str = "/dev/log";

const SEVERITY_INFO: u8 = 6;

/// Where syslog messages are delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyslogTransport {
    /// Unix datagram socket of the local daemon
    Unix(PathBuf),
    /// Remote collector over UDP
    Udp(SocketAddr),
    /// Remote collector over TCP, newline framed
    Tcp(SocketAddr),
}

impl SyslogTransport {
    /// Parse `udp://host:port`, `tcp://host:port` or a socket path
    pub fn parse(raw: &str) -> Result<Self> {
        const OP: &str = "audit.SyslogTransport.parse";
        let raw = raw.trim();
        let addr = |rest: &str| {
            rest.parse::<SocketAddr>().map_err(|e| {
                Error::external_options(OP, format!("invalid syslog address {rest:?}"))
                    .with_upstream(e)
            })
        };

        match raw.split_once("://") {
            Some(("udp", rest)) => Ok(Self::Udp(addr(rest)?)),
            Some(("tcp", rest)) => Ok(Self::Tcp(addr(rest)?)),
            Some(("unix", rest)) => Ok(Self::Unix(PathBuf::from(rest))),
            Some((scheme, _)) => Err(Error::external_options(
                OP,
                format!("unsupported syslog transport {scheme:?}"),
            )),
            None if raw.is_empty() => Ok(Self::Unix(PathBuf::from(DEFAULT_SYSLOG_SOCKET))),
            None => Ok(Self::Unix(PathBuf::from(raw))),
        }
    }
}

/// Syslog sink configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyslogSinkConfig {
    /// Facility name, e.g. `AUTH` or `local0`
    pub facility: String,
    /// Tag (app name) attached to each message
    pub tag: String,
    /// Delivery target
    pub transport: SyslogTransport,
    /// Format of the bytes to write
    pub format: Format,
}

impl SyslogSinkConfig {
    /// Parse the `facility`, `tag` and `address` options
    pub fn from_options(options: &HashMap<String, String>, format: Format) -> Result<Self> {
        let non_empty = |key: &str| {
            options
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
        };

        let facility = non_empty("facility").unwrap_or(DEFAULT_FACILITY).to_string();
        parse_facility(&facility)?;

        let tag = non_empty("tag").unwrap_or(DEFAULT_TAG).to_string();
        let transport = SyslogTransport::parse(non_empty("address").unwrap_or(""))?;

        Ok(Self {
            facility,
            tag,
            transport,
            format,
        })
    }
}

/// Map a facility name onto its numeric code, ignoring case
pub fn parse_facility(name: &str) -> Result<u8> {
    let code = match name.trim().to_lowercase().as_str() {
        "kern" => 0,
        "user" => 1,
        "mail" => 2,
        "daemon" => 3,
        "auth" => 4,
        "syslog" => 5,
        "lpr" => 6,
        "news" => 7,
        "uucp" => 8,
        "cron" => 9,
        "authpriv" => 10,
        "ftp" => 11,
        "local0" => 16,
        "local1" => 17,
        "local2" => 18,
        "local3" => 19,
        "local4" => 20,
        "local5" => 21,
        "local6" => 22,
        "local7" => 23,
        other => {
            return Err(Error::external_options(
                "audit.SyslogSinkConfig.parse_facility",
                format!("unknown syslog facility {other:?}"),
            ))
        }
    };
    Ok(code)
}

/// Writes formatted entries to syslog
#[derive(Debug)]
pub struct SyslogSink {
    facility: u8,
    tag: String,
    transport: SyslogTransport,
    format: Format,
}

impl SyslogSink {
    /// Create a sink; delivery happens per message
    pub fn new(config: SyslogSinkConfig) -> Result<Self> {
        let facility = parse_facility(&config.facility)?;
        tracing::debug!(facility = %config.facility, tag = %config.tag, transport = ?config.transport, "syslog sink configured");
        Ok(Self {
            facility,
            tag: config.tag,
            transport: config.transport,
            format: config.format,
        })
    }

    /// Render an RFC 5424 message
    ///
    /// `<PRI>1 TIMESTAMP HOSTNAME APP-NAME PROCID MSGID SD MSG`
    fn format_rfc5424(&self, body: &str) -> String {
        let pri = u16::from(self.facility) * 8 + u16::from(SEVERITY_INFO);
        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ");
        format!(
            "<{}>1 {} - {} {} - - {}",
            pri,
            timestamp,
            self.tag,
            std::process::id(),
            body
        )
    }

    async fn send(&self, message: &str) -> std::io::Result<()> {
        match &self.transport {
            SyslogTransport::Udp(addr) => {
                let bind = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
                let socket = UdpSocket::bind(bind).await?;
                socket.send_to(message.as_bytes(), addr).await?;
            }
            SyslogTransport::Tcp(addr) => {
                let mut stream = TcpStream::connect(addr).await?;
                // RFC 5425: TCP syslog uses newline framing
                stream.write_all(format!("{message}\n").as_bytes()).await?;
                stream.flush().await?;
            }
            #[cfg(unix)]
            SyslogTransport::Unix(path) => {
                let socket = tokio::net::UnixDatagram::unbound()?;
                socket.send_to(message.as_bytes(), path).await?;
            }
            #[cfg(not(unix))]
            SyslogTransport::Unix(_) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    "unix syslog sockets are not available on this platform",
                ))
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Sink for SyslogSink {
    async fn process(&self, ctx: &AuditContext, event: &PipelineEvent) -> Result<()> {
        const OP: &str = "audit.SyslogSink.Process";
        ctx.check()?;
        let bytes = formatted_bytes(OP, event, self.format)?;
        let message = self.format_rfc5424(String::from_utf8_lossy(bytes).trim_end());

        ctx.run(async {
            self.send(&message).await.map_err(|e| {
                Error::internal_error(OP, "error writing to syslog").with_upstream(e)
            })
        })
        .await
    }

    fn sink_type(&self) -> &'static str {
        "syslog"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::sink::testing::formatted_event;
    use crate::error::ErrorKind;

    #[test]
    fn test_defaults() {
        let cfg = SyslogSinkConfig::from_options(&HashMap::new(), Format::Json).unwrap();
        assert_eq!(cfg.facility, "AUTH");
        assert_eq!(cfg.tag, "vault");
        assert_eq!(
            cfg.transport,
            SyslogTransport::Unix(PathBuf::from(DEFAULT_SYSLOG_SOCKET))
        );
    }

    #[test]
    fn test_facility_parsing() {
        assert_eq!(parse_facility("Local3").unwrap(), 19);
        assert_eq!(parse_facility("authpriv").unwrap(), 10);
        let err = parse_facility("galaxy").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExternalOptions);

        let mut options = HashMap::new();
        options.insert("facility".to_string(), "bogus".to_string());
        assert!(SyslogSinkConfig::from_options(&options, Format::Json).is_err());
    }

    #[test]
    fn test_transport_parsing() {
        assert_eq!(
            SyslogTransport::parse("udp://127.0.0.1:514").unwrap(),
            SyslogTransport::Udp("127.0.0.1:514".parse().unwrap())
        );
        assert_eq!(
            SyslogTransport::parse("/var/run/syslog").unwrap(),
            SyslogTransport::Unix(PathBuf::from("/var/run/syslog"))
        );
        assert!(SyslogTransport::parse("tcp://not-an-address").is_err());
        assert!(SyslogTransport::parse("http://127.0.0.1:514").is_err());
    }

    #[test]
    fn test_rfc5424_priority() {
        let mut options = HashMap::new();
        options.insert("tag".to_string(), "audit-test".to_string());
        let sink =
            SyslogSink::new(SyslogSinkConfig::from_options(&options, Format::Json).unwrap())
                .unwrap();
        let message = sink.format_rfc5424("{\"type\":\"request\"}");

        // PRI = auth(4) * 8 + info(6)
        assert!(message.starts_with("<38>1 "));
        assert!(message.contains(" audit-test "));
        assert!(message.ends_with("{\"type\":\"request\"}"));
    }

    #[tokio::test]
    async fn test_udp_delivery() {
        let collector = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut options = HashMap::new();
        options.insert(
            "address".to_string(),
            format!("udp://{}", collector.local_addr().unwrap()),
        );
        options.insert("facility".to_string(), "local0".to_string());
        let sink =
            SyslogSink::new(SyslogSinkConfig::from_options(&options, Format::Json).unwrap())
                .unwrap();

        let event = formatted_event(Format::Json, b"{\"type\":\"request\"}\n");
        sink.process(&AuditContext::root(), &event).await.unwrap();

        let mut buf = vec![0u8; 1024];
        let (n, _) = collector.recv_from(&mut buf).await.unwrap();
        let received = String::from_utf8_lossy(&buf[..n]);
        assert!(received.starts_with("<134>1 "));
        assert!(received.ends_with("{\"type\":\"request\"}"));
    }
}
