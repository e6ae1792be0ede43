use crate::core::config::SessionConfig;
use crate::core::errors::{ConnectFailure, ConnectPhase};
use std::fmt;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_native_tls::{TlsConnector, TlsStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::{client_async, WebSocketStream};
use tracing::{debug, instrument};

pub type SecureStream = TlsStream<TcpStream>;
pub type SecureWebSocket = WebSocketStream<SecureStream>;

/// Remote `host:port` plus WebSocket request path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: String,
    pub path: String,
}

impl Endpoint {
    pub fn new(host: &str, port: &str, path: &str) -> Self {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        Self {
            host: host.to_string(),
            port: port.to_string(),
            path,
        }
    }

    pub fn url(&self) -> String {
        format!("wss://{}:{}{}", self.host, self.port, self.path)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// Look up every address for the endpoint
#[instrument(skip_all, fields(host = %endpoint.host, port = %endpoint.port))]
pub async fn resolve(endpoint: &Endpoint) -> Result<Vec<SocketAddr>, ConnectFailure> {
    let port: u16 = endpoint
        .port
        .parse()
        .map_err(|_| {
            ConnectFailure::new(
                ConnectPhase::Resolve,
                format!("invalid port '{}'", endpoint.port),
            )
        })?;

    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((endpoint.host.as_str(), port))
        .await
        .map_err(|e| ConnectFailure::new(ConnectPhase::Resolve, e))?
        .collect();

    if addrs.is_empty() {
        return Err(ConnectFailure::new(
            ConnectPhase::Resolve,
            format!("no addresses found for {}", endpoint.host),
        ));
    }

    debug!(count = addrs.len(), "Resolved addresses");
    Ok(addrs)
}

/// Try each resolved address in order, keeping the first that accepts
#[instrument(skip_all, fields(candidates = addrs.len()))]
pub async fn connect(addrs: &[SocketAddr]) -> Result<TcpStream, ConnectFailure> {
    let mut last_error = None;

    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                // Latency matters more than packet count for order traffic
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(error = %e, "Failed to set TCP_NODELAY");
                }
                return Ok(stream);
            }
            Err(e) => {
                debug!(%addr, error = %e, "Connect attempt failed");
                last_error = Some(e);
            }
        }
    }

    Err(ConnectFailure::new(
        ConnectPhase::Connect,
        last_error.map_or_else(|| "no addresses to connect to".to_string(), |e| e.to_string()),
    ))
}

/// Build the TLS client context: TLS 1.2 minimum, system roots
pub fn tls_connector(config: &SessionConfig) -> Result<TlsConnector, ConnectFailure> {
    native_tls::TlsConnector::builder()
        .min_protocol_version(Some(native_tls::Protocol::Tlsv12))
        .danger_accept_invalid_certs(config.accept_invalid_certs)
        .build()
        .map(TlsConnector::from)
        .map_err(|e| ConnectFailure::new(ConnectPhase::TlsHandshake, e))
}

/// Client TLS handshake; `host` doubles as the SNI name
#[instrument(skip_all, fields(host = %host))]
pub async fn tls_handshake(
    connector: &TlsConnector,
    host: &str,
    tcp: TcpStream,
) -> Result<SecureStream, ConnectFailure> {
    connector
        .connect(host, tcp)
        .await
        .map_err(|e| ConnectFailure::new(ConnectPhase::TlsHandshake, e))
}

/// WebSocket upgrade over an established stream
#[instrument(skip_all, fields(url = %endpoint))]
pub async fn protocol_handshake<S>(
    endpoint: &Endpoint,
    user_agent: &str,
    stream: S,
) -> Result<WebSocketStream<S>, ConnectFailure>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut request = endpoint
        .url()
        .into_client_request()
        .map_err(|e| ConnectFailure::new(ConnectPhase::Handshake, e))?;

    let agent = HeaderValue::from_str(user_agent)
        .map_err(|e| ConnectFailure::new(ConnectPhase::Handshake, e))?;
    request.headers_mut().insert(header::USER_AGENT, agent);

    let (ws, response) = client_async(request, stream)
        .await
        .map_err(|e| ConnectFailure::new(ConnectPhase::Handshake, e))?;

    debug!(status = %response.status(), "WebSocket upgrade accepted");
    Ok(ws)
}
