//! HTTP/3 GET client over a QUIC connection.

use std::future::poll_fn;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Buf, Bytes};
use http::Uri;
use quinn::crypto::rustls::QuicClientConfig;
use tracing::debug;

use crate::config::BenchConfig;

use super::{client_tls_config, SecretLogFile, TransportError};

/// HTTP/3 transport over a lazily established QUIC connection.
///
/// The endpoint and connection are created on the first request and kept
/// for the lifetime of the handle, so a reused transport issues all its
/// requests over one connection.
pub struct H3Transport {
    quic: quinn::ClientConfig,
    zero_rtt: bool,
    endpoint: Option<quinn::Endpoint>,
    request: Option<h3::client::SendRequest<h3_quinn::OpenStreams, Bytes>>,
}

impl H3Transport {
    /// Assemble the QUIC/TLS configuration. No sockets are opened here.
    pub(crate) fn build(
        config: &BenchConfig,
        key_log: Option<Arc<SecretLogFile>>,
    ) -> Result<Self, TransportError> {
        let tls = client_tls_config(config.tls_version, key_log, b"h3", true)?;
        // Fails when the pinned TLS version leaves no TLS 1.3 cipher
        // suites, which QUIC cannot run without.
        let quic = QuicClientConfig::try_from(tls).map_err(|e| TransportError::Tls(e.to_string()))?;

        Ok(Self {
            quic: quinn::ClientConfig::new(Arc::new(quic)),
            zero_rtt: config.zero_rtt,
            endpoint: None,
            request: None,
        })
    }

    pub(crate) async fn fetch(&mut self, url: &str) -> Result<u64, TransportError> {
        let uri: Uri = url
            .parse()
            .map_err(|e: http::uri::InvalidUri| TransportError::InvalidUrl(e.to_string()))?;
        if uri.scheme_str() != Some("https") {
            return Err(TransportError::InvalidUrl(format!(
                "HTTP/3 requires an https URL, got {}",
                url
            )));
        }

        if self.request.is_none() {
            self.connect(&uri).await?;
        }

        let result = self.request_once(uri).await;
        if result.is_err() {
            // Drop the broken connection so the next request redials.
            self.reset();
        }
        result
    }

    async fn request_once(&mut self, uri: Uri) -> Result<u64, TransportError> {
        let Some(request) = self.request.as_mut() else {
            return Err(TransportError::Connection(
                "no HTTP/3 connection".to_string(),
            ));
        };

        let req = http::Request::builder()
            .method(http::Method::GET)
            .uri(uri)
            .body(())
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let mut stream = request
            .send_request(req)
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;
        stream
            .finish()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let _response = stream
            .recv_response()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let mut received = 0u64;
        while let Some(chunk) = stream
            .recv_data()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?
        {
            received += chunk.remaining() as u64;
        }

        Ok(received)
    }

    fn reset(&mut self) {
        self.request = None;
        if let Some(endpoint) = self.endpoint.take() {
            endpoint.close(0u32.into(), b"error");
        }
    }

    async fn connect(&mut self, uri: &Uri) -> Result<(), TransportError> {
        let host = uri
            .host()
            .ok_or_else(|| TransportError::InvalidUrl("URL has no host".to_string()))?;
        let port = uri.port_u16().unwrap_or(443);

        let addr = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?
            .next()
            .ok_or_else(|| TransportError::Connection(format!("no addresses found for {}", host)))?;

        let bind: SocketAddr = if addr.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16, 0, 0, 0, 0, 0, 0, 0], 0))
        };
        let mut endpoint =
            quinn::Endpoint::client(bind).map_err(|e| TransportError::Connection(e.to_string()))?;
        endpoint.set_default_client_config(self.quic.clone());

        debug!("establishing HTTP/3 connection to {} ({})", host, addr);

        let connecting = endpoint
            .connect(addr, host)
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        let connection = if self.zero_rtt {
            // Use the connection before the handshake completes when a
            // cached session permits it; the server rejecting the
            // resumption falls back to a full handshake underneath.
            match connecting.into_0rtt() {
                Ok((connection, _accepted)) => {
                    debug!("attempting 0-RTT");
                    connection
                }
                Err(connecting) => connecting
                    .await
                    .map_err(|e| TransportError::Connection(e.to_string()))?,
            }
        } else {
            connecting
                .await
                .map_err(|e| TransportError::Connection(e.to_string()))?
        };

        let (mut driver, send_request) = h3::client::new(h3_quinn::Connection::new(connection))
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        // The driver owns connection-level state and must be polled for
        // as long as the connection is in use.
        tokio::spawn(async move {
            let _ = poll_fn(|cx| driver.poll_close(cx)).await;
        });

        self.endpoint = Some(endpoint);
        self.request = Some(send_request);
        Ok(())
    }

    pub(crate) async fn close(self) {
        if let Some(endpoint) = self.endpoint {
            endpoint.close(0u32.into(), b"done");
            endpoint.wait_idle().await;
        }
    }
}
