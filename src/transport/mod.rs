//! Transport construction and request dispatch for the three protocol
//! versions behind one handle type.

pub mod h3;

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::config::{BenchConfig, HttpVersion, TlsVersion};

use self::h3::H3Transport;

/// Client-side TLS session cache entries kept for resumption.
const SESSION_CACHE_SIZE: usize = 100;

/// Append-only sink for per-session TLS secrets in NSS key-log format,
/// consumed by external decryption tooling such as Wireshark.
#[derive(Debug)]
pub struct SecretLogFile {
    file: Mutex<File>,
}

impl SecretLogFile {
    /// Open `path` for appending, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let mut opts = OpenOptions::new();
        opts.append(true).create(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o600);
        }
        Ok(Self {
            file: Mutex::new(opts.open(path)?),
        })
    }
}

impl rustls::KeyLog for SecretLogFile {
    fn log(&self, label: &str, client_random: &[u8], secret: &[u8]) {
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(
                file,
                "{} {} {}",
                label,
                hex::encode(client_random),
                hex::encode(secret)
            );
        }
    }
}

/// One benchmark transport: a client pinned to a protocol and TLS
/// version. Owned exclusively by the runner; [`Transport::close`]
/// consumes the handle, so closing twice is unrepresentable.
pub enum Transport {
    Http1(reqwest::Client),
    Http2(reqwest::Client),
    Http3(H3Transport),
}

impl Transport {
    /// Build a configured, not-yet-connected transport. No network I/O
    /// happens here; connections are established on the first request.
    pub fn build(
        config: &BenchConfig,
        key_log: Option<Arc<SecretLogFile>>,
    ) -> Result<Self, TransportError> {
        match config.http_version {
            HttpVersion::V1 => {
                let tls = client_tls_config(config.tls_version, key_log, b"http/1.1", false)?;
                let client = reqwest::Client::builder()
                    .timeout(config.timeout)
                    .use_preconfigured_tls(tls)
                    .http1_only()
                    .no_proxy()
                    .build()
                    .map_err(|e| TransportError::ClientBuild(e.to_string()))?;
                Ok(Transport::Http1(client))
            }
            HttpVersion::V2 => {
                let tls = client_tls_config(config.tls_version, key_log, b"h2", false)?;
                let client = reqwest::Client::builder()
                    .timeout(config.timeout)
                    .use_preconfigured_tls(tls)
                    .http2_prior_knowledge()
                    .no_proxy()
                    .build()
                    .map_err(|e| TransportError::ClientBuild(e.to_string()))?;
                Ok(Transport::Http2(client))
            }
            HttpVersion::V3 => Ok(Transport::Http3(H3Transport::build(config, key_log)?)),
        }
    }

    /// Issue one GET against `url` and drain the response body,
    /// returning the number of body bytes received. Non-2xx statuses
    /// are not errors; their bodies are drained and counted like any
    /// other.
    pub async fn fetch(&mut self, url: &str) -> Result<u64, TransportError> {
        match self {
            Transport::Http1(client) | Transport::Http2(client) => fetch_reqwest(client, url).await,
            Transport::Http3(transport) => transport.fetch(url).await,
        }
    }

    /// Release the transport and its connections.
    pub async fn close(self) {
        match self {
            // reqwest tears its connection pool down when the last
            // clone of the client is dropped
            Transport::Http1(_) | Transport::Http2(_) => {}
            Transport::Http3(transport) => transport.close().await,
        }
    }
}

async fn fetch_reqwest(client: &reqwest::Client, url: &str) -> Result<u64, TransportError> {
    let mut response = client.get(url).send().await.map_err(map_reqwest_error)?;

    let mut received = 0u64;
    while let Some(chunk) = response.chunk().await.map_err(map_reqwest_error)? {
        received += chunk.len() as u64;
    }

    Ok(received)
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connection(e.to_string())
    } else {
        TransportError::Request(e.to_string())
    }
}

/// Assemble a rustls client configuration pinned to exactly one TLS
/// version, with the given ALPN protocol and optional key logging.
pub(crate) fn client_tls_config(
    version: TlsVersion,
    key_log: Option<Arc<SecretLogFile>>,
    alpn: &[u8],
    early_data: bool,
) -> Result<rustls::ClientConfig, TransportError> {
    let protocol = resolve_protocol_version(version)?;

    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let mut tls = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_protocol_versions(&[protocol])
    .map_err(|e| TransportError::Tls(e.to_string()))?
    .with_root_certificates(roots)
    .with_no_client_auth();

    tls.alpn_protocols = vec![alpn.to_vec()];
    if early_data {
        tls.enable_early_data = true;
        tls.resumption = rustls::client::Resumption::in_memory_sessions(SESSION_CACHE_SIZE);
    }
    if let Some(sink) = key_log {
        tls.key_log = sink;
    }

    Ok(tls)
}

fn resolve_protocol_version(
    version: TlsVersion,
) -> Result<&'static rustls::SupportedProtocolVersion, TransportError> {
    match version {
        TlsVersion::V1_2 => Ok(&rustls::version::TLS12),
        TlsVersion::V1_3 => Ok(&rustls::version::TLS13),
        TlsVersion::V1_0 | TlsVersion::V1_1 => Err(TransportError::UnsupportedTlsVersion(version)),
    }
}

#[derive(Debug)]
pub enum TransportError {
    UnsupportedTlsVersion(TlsVersion),
    Tls(String),
    ClientBuild(String),
    InvalidUrl(String),
    Connection(String),
    Request(String),
    Timeout,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::UnsupportedTlsVersion(v) => {
                write!(f, "TLS {} is not available in this build (only 1.2 and 1.3 are)", v)
            }
            TransportError::Tls(e) => write!(f, "TLS configuration error: {}", e),
            TransportError::ClientBuild(e) => write!(f, "Failed to build HTTP client: {}", e),
            TransportError::InvalidUrl(e) => write!(f, "Invalid target URL: {}", e),
            TransportError::Connection(e) => write!(f, "Connection error: {}", e),
            TransportError::Request(e) => write!(f, "Request error: {}", e),
            TransportError::Timeout => write!(f, "Request timeout"),
        }
    }
}

impl std::error::Error for TransportError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BenchConfig, HttpVersion, TlsVersion};
    use rustls::KeyLog;

    fn config(version: HttpVersion, tls: TlsVersion) -> BenchConfig {
        BenchConfig::new("https://example.com/", version, tls)
    }

    #[test]
    fn build_succeeds_for_every_version_without_io() {
        for version in [HttpVersion::V1, HttpVersion::V2, HttpVersion::V3] {
            let result = Transport::build(&config(version, TlsVersion::V1_3), None);
            assert!(result.is_ok(), "build failed for HTTP/{}", version);
        }
    }

    #[test]
    fn tls_1_0_and_1_1_are_rejected_at_build() {
        for tls in [TlsVersion::V1_0, TlsVersion::V1_1] {
            match Transport::build(&config(HttpVersion::V1, tls), None) {
                Err(TransportError::UnsupportedTlsVersion(v)) => assert_eq!(v, tls),
                other => panic!("expected UnsupportedTlsVersion, got {:?}", other.map(|_| ())),
            }
        }
    }

    #[test]
    fn http3_requires_tls_1_3() {
        assert!(Transport::build(&config(HttpVersion::V3, TlsVersion::V1_2), None).is_err());
    }

    #[test]
    fn http1_over_tls_1_2_is_accepted() {
        assert!(Transport::build(&config(HttpVersion::V1, TlsVersion::V1_2), None).is_ok());
    }

    #[test]
    fn secret_log_file_appends_nss_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.log");

        let sink = SecretLogFile::open(&path).unwrap();
        sink.log("CLIENT_RANDOM", &[0xab, 0xcd], &[0x01, 0x02]);
        sink.log("SERVER_TRAFFIC_SECRET_0", &[0xff], &[0x00]);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "CLIENT_RANDOM abcd 0102\nSERVER_TRAFFIC_SECRET_0 ff 00\n"
        );
    }
}
