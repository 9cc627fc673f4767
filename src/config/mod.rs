use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Ceiling for a single request/response/drain cycle.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP protocol version to benchmark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    /// HTTP/1.1 over TCP/TLS
    V1,
    /// HTTP/2 over TCP/TLS
    V2,
    /// HTTP/3 over QUIC
    V3,
}

impl HttpVersion {
    pub fn as_u8(self) -> u8 {
        match self {
            HttpVersion::V1 => 1,
            HttpVersion::V2 => 2,
            HttpVersion::V3 => 3,
        }
    }
}

impl TryFrom<u8> for HttpVersion {
    type Error = ConfigError;

    fn try_from(version: u8) -> Result<Self, ConfigError> {
        match version {
            1 => Ok(HttpVersion::V1),
            2 => Ok(HttpVersion::V2),
            3 => Ok(HttpVersion::V3),
            other => Err(ConfigError::InvalidHttpVersion(other)),
        }
    }
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// TLS version the client is pinned to (both minimum and maximum).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsVersion {
    V1_0,
    V1_1,
    V1_2,
    V1_3,
}

impl FromStr for TlsVersion {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, ConfigError> {
        match s {
            "1.0" => Ok(TlsVersion::V1_0),
            "1.1" => Ok(TlsVersion::V1_1),
            "1.2" => Ok(TlsVersion::V1_2),
            "1.3" => Ok(TlsVersion::V1_3),
            other => Err(ConfigError::InvalidTlsVersion(other.to_string())),
        }
    }
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TlsVersion::V1_0 => "1.0",
            TlsVersion::V1_1 => "1.1",
            TlsVersion::V1_2 => "1.2",
            TlsVersion::V1_3 => "1.3",
        };
        f.write_str(name)
    }
}

/// Configuration for one benchmark run.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    /// Target URL for the GET requests
    pub url: String,

    /// HTTP protocol version to use
    pub http_version: HttpVersion,

    /// TLS version the client refuses to negotiate around
    pub tls_version: TlsVersion,

    /// Attempt QUIC 0-RTT session resumption (HTTP/3 only)
    pub zero_rtt: bool,

    /// Number of request iterations to run
    pub iterations: u64,

    /// Keep one transport open across all iterations instead of
    /// recreating it per request
    pub keep_transport: bool,

    /// Per-request timeout
    pub timeout: Duration,
}

impl BenchConfig {
    pub fn new(url: impl Into<String>, http_version: HttpVersion, tls_version: TlsVersion) -> Self {
        Self {
            url: url.into(),
            http_version,
            tls_version,
            zero_rtt: false,
            iterations: 10,
            keep_transport: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::ValidationError(
                "Target URL is required".to_string(),
            ));
        }

        if self.iterations == 0 {
            return Err(ConfigError::ValidationError(
                "Iteration count must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidHttpVersion(u8),
    InvalidTlsVersion(String),
    ValidationError(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidHttpVersion(v) => write!(f, "invalid HTTP version: {}", v),
            ConfigError::InvalidTlsVersion(s) => write!(f, "invalid TLS version: {}", s),
            ConfigError::ValidationError(e) => write!(f, "validation error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_version_accepts_the_three_known_values() {
        assert_eq!(HttpVersion::try_from(1).unwrap(), HttpVersion::V1);
        assert_eq!(HttpVersion::try_from(2).unwrap(), HttpVersion::V2);
        assert_eq!(HttpVersion::try_from(3).unwrap(), HttpVersion::V3);
    }

    #[test]
    fn http_version_rejects_anything_else() {
        for version in [0u8, 4, 99] {
            match HttpVersion::try_from(version) {
                Err(ConfigError::InvalidHttpVersion(v)) => assert_eq!(v, version),
                other => panic!("expected InvalidHttpVersion, got {:?}", other),
            }
        }
    }

    #[test]
    fn tls_version_parses_all_four_names() {
        for name in ["1.0", "1.1", "1.2", "1.3"] {
            let version: TlsVersion = name.parse().unwrap();
            assert_eq!(version.to_string(), name);
        }
    }

    #[test]
    fn unknown_tls_version_is_rejected() {
        for name in ["1.4", "ssl3", ""] {
            assert!(name.parse::<TlsVersion>().is_err());
        }
    }

    #[test]
    fn zero_iterations_fail_validation() {
        let mut config = BenchConfig::new("https://example.com/", HttpVersion::V1, TlsVersion::V1_3);
        config.iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_url_fails_validation() {
        let config = BenchConfig::new("", HttpVersion::V1, TlsVersion::V1_3);
        assert!(config.validate().is_err());
    }
}
