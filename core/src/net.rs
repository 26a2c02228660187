/*
 * net.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of tcphttp, an HTTP/1.1 client over raw TCP and TLS sockets.
 *
 * tcphttp is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * tcphttp is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with tcphttp.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Socket helpers: plain TCP connect with a deadline, TLS handshake over an already
//! connected TcpStream (direct or through a CONNECT tunnel), and the unified stream type
//! the pool hands out.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream as TokioTlsStream;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::client::WebPkiServerVerifier;
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{
    CertificateError, ClientConfig, DigitallySignedStruct, Error as TlsError, RootCertStore,
    SignatureScheme,
};
use tokio_rustls::TlsConnector;

/// Build a root certificate store: platform native certs first, then webpki-roots as fallback.
fn build_root_store() -> RootCertStore {
    let mut root_store = RootCertStore::empty();
    if let Ok(certs) = rustls_native_certs::load_native_certs() {
        for cert in certs {
            let _ = root_store.add(cert);
        }
    }
    if root_store.is_empty() {
        root_store.roots = webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect();
    }
    root_store
}

fn root_store() -> Arc<RootCertStore> {
    static ROOTS: OnceLock<Arc<RootCertStore>> = OnceLock::new();
    ROOTS.get_or_init(|| Arc::new(build_root_store())).clone()
}

fn direct_config(roots: Arc<RootCertStore>) -> ClientConfig {
    let mut config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    config
}

/// TLS client config for direct HTTPS connections (ALPN http/1.1 only).
pub fn http_client_config() -> Arc<ClientConfig> {
    static CONFIG: OnceLock<Arc<ClientConfig>> = OnceLock::new();
    CONFIG
        .get_or_init(|| Arc::new(direct_config(root_store())))
        .clone()
}

/// Certificate verifier for TLS carried through a proxy tunnel: the chain must still
/// validate against the root store, but a name mismatch is accepted.
#[derive(Debug)]
struct TunnelVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for TunnelVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Err(TlsError::InvalidCertificate(CertificateError::NotValidForName))
            | Err(TlsError::InvalidCertificate(CertificateError::NotValidForNameContext {
                ..
            })) => Ok(ServerCertVerified::assertion()),
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

fn tunnel_config(roots: Arc<RootCertStore>) -> io::Result<ClientConfig> {
    let inner = WebPkiServerVerifier::builder(roots)
        .build()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    let mut config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(TunnelVerifier { inner }))
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}

/// TLS client config for handshakes layered on a CONNECT tunnel.
pub fn tunnel_client_config() -> io::Result<Arc<ClientConfig>> {
    static CONFIG: OnceLock<Arc<ClientConfig>> = OnceLock::new();
    if let Some(config) = CONFIG.get() {
        return Ok(config.clone());
    }
    let config = tunnel_config(root_store())?;
    Ok(CONFIG.get_or_init(|| Arc::new(config)).clone())
}

/// The pair of client configs used for HTTPS: one for direct connections, one for
/// handshakes inside a CONNECT tunnel. Both trust the same roots.
#[derive(Debug, Clone)]
pub struct TlsConnectors {
    direct: Arc<ClientConfig>,
    tunnel: Arc<ClientConfig>,
}

impl TlsConnectors {
    /// Platform roots (native certs, else webpki-roots).
    pub fn platform() -> io::Result<Self> {
        Ok(Self {
            direct: http_client_config(),
            tunnel: tunnel_client_config()?,
        })
    }

    /// Trust only `roots`, e.g. a private CA.
    pub fn with_roots(roots: RootCertStore) -> io::Result<Self> {
        let roots = Arc::new(roots);
        Ok(Self {
            direct: Arc::new(direct_config(roots.clone())),
            tunnel: Arc::new(tunnel_config(roots)?),
        })
    }

    pub fn select(&self, through_tunnel: bool) -> Arc<ClientConfig> {
        if through_tunnel {
            self.tunnel.clone()
        } else {
            self.direct.clone()
        }
    }
}

/// Open a TCP connection, failing with `TimedOut` after `deadline`.
pub async fn connect_tcp(host: &str, port: u16, deadline: Duration) -> io::Result<TcpStream> {
    let addr = format!("{}:{}", host, port);
    let tcp = timeout(deadline, TcpStream::connect(&addr))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "TCP connect timed out"))??;
    tcp.set_nodelay(true)?;
    Ok(tcp)
}

/// Run the client TLS handshake over `tcp` with SNI `host`. `config` comes from
/// `TlsConnectors::select`.
pub async fn handshake_tls(
    tcp: TcpStream,
    host: &str,
    config: Arc<ClientConfig>,
    deadline: Duration,
) -> io::Result<TokioTlsStream<TcpStream>> {
    let sni = host.trim_start_matches('[').trim_end_matches(']');
    let server_name = ServerName::try_from(sni.to_string())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid host name"))?;
    let connector = TlsConnector::from(config);
    timeout(deadline, connector.connect(server_name, tcp))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "TLS handshake timed out"))?
        .map_err(|e| io::Error::new(io::ErrorKind::ConnectionRefused, e))
}

/// Unified stream: plain TCP or TLS. Implements AsyncRead + AsyncWrite.
pub enum HttpStream {
    Plain(TcpStream),
    Tls(Box<TokioTlsStream<TcpStream>>),
}

impl HttpStream {
    pub fn is_tls(&self) -> bool {
        matches!(self, HttpStream::Tls(_))
    }
}

impl std::fmt::Debug for HttpStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (kind, tcp) = match self {
            HttpStream::Plain(s) => ("plain", s),
            HttpStream::Tls(s) => ("tls", s.get_ref().0),
        };
        f.debug_struct("HttpStream")
            .field("kind", &kind)
            .field("peer", &tcp.peer_addr().ok())
            .finish()
    }
}

impl AsyncRead for HttpStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            HttpStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            HttpStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for HttpStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            HttpStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            HttpStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            HttpStream::Plain(s) => Pin::new(s).poll_flush(cx),
            HttpStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            HttpStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            HttpStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}
