//! Benchmark orchestration: the iteration loop and its transport
//! lifecycle policy.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::BenchConfig;
use crate::report::Reporter;
use crate::transport::{SecretLogFile, Transport, TransportError};

/// One successful iteration's measurement.
#[derive(Debug, Clone, Copy)]
pub struct Sample {
    /// 1-based iteration index
    pub iteration: u64,
    /// Wall time for the full request/response/drain cycle
    pub elapsed: Duration,
    /// Body bytes drained from the response
    pub bytes: u64,
    /// Derived bits per second
    pub bit_rate: f64,
}

impl Sample {
    pub fn new(iteration: u64, elapsed: Duration, bytes: u64) -> Self {
        let secs = elapsed.as_secs_f64();
        let bit_rate = if secs > 0.0 {
            (bytes * 8) as f64 / secs
        } else {
            0.0
        };
        Self {
            iteration,
            elapsed,
            bytes,
            bit_rate,
        }
    }

    /// Elapsed time at the resolution the CSV stream reports.
    pub fn elapsed_micros(&self) -> u64 {
        self.elapsed.as_micros() as u64
    }
}

/// Outcome of a full run. Samples appear in iteration order; iterations
/// that failed leave no sample behind.
#[derive(Debug)]
pub struct RunResult {
    pub samples: Vec<Sample>,
    pub attempted: u64,
}

impl RunResult {
    pub fn succeeded(&self) -> u64 {
        self.samples.len() as u64
    }
}

/// Ownership token for the transport used by one iteration: either a
/// borrow of the run-long shared handle or a handle this iteration owns
/// alone.
enum Lease<'a> {
    Shared(&'a mut Transport),
    Owned(Transport),
}

impl Lease<'_> {
    fn transport(&mut self) -> &mut Transport {
        match self {
            Lease::Shared(transport) => transport,
            Lease::Owned(transport) => transport,
        }
    }

    /// Close the handle if this iteration owns it.
    async fn release(self) {
        if let Lease::Owned(transport) = self {
            transport.close().await;
        }
    }
}

/// Drives N strictly sequential GET iterations against the target and
/// collects timing samples.
pub struct BenchmarkRunner {
    config: BenchConfig,
    key_log: Option<Arc<SecretLogFile>>,
}

impl BenchmarkRunner {
    pub fn new(config: BenchConfig, key_log: Option<Arc<SecretLogFile>>) -> Self {
        Self { config, key_log }
    }

    /// Run the benchmark. Transport build failures are fatal; individual
    /// request failures are logged and skipped.
    pub async fn run<W, S>(&self, reporter: &mut Reporter<W, S>) -> Result<RunResult, RunError>
    where
        W: io::Write,
        S: io::Write,
    {
        let total = self.config.iterations;
        let mut samples = Vec::new();

        let mut shared = if self.config.keep_transport {
            info!("Keeping transport channel open");
            Some(Transport::build(&self.config, self.key_log.clone())?)
        } else {
            info!("Destroying transport channel on each iteration");
            None
        };

        // Fatal conditions must still close the shared transport, so
        // they break out of the loop instead of returning from it.
        let mut fatal = None;

        for iteration in 1..=total {
            let mut lease = match shared.as_mut() {
                Some(transport) => Lease::Shared(transport),
                None => match Transport::build(&self.config, self.key_log.clone()) {
                    Ok(transport) => Lease::Owned(transport),
                    Err(e) => {
                        fatal = Some(RunError::from(e));
                        break;
                    }
                },
            };

            let started = Instant::now();
            let outcome = match timeout(
                self.config.timeout,
                lease.transport().fetch(&self.config.url),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout),
            };

            let reported = match outcome {
                Ok(bytes) => {
                    let sample = Sample::new(iteration, started.elapsed(), bytes);
                    samples.push(sample);
                    reporter
                        .record(&sample)
                        .and_then(|()| reporter.progress(iteration, total, &sample))
                }
                Err(e) => {
                    warn!("request {}/{} failed: {}", iteration, total, e);
                    Ok(())
                }
            };

            lease.release().await;

            if let Err(e) = reported {
                fatal = Some(RunError::from(e));
                break;
            }
        }

        if let Some(transport) = shared.take() {
            transport.close().await;
        }
        if let Some(error) = fatal {
            return Err(error);
        }

        Ok(RunResult {
            samples,
            attempted: total,
        })
    }
}

#[derive(Debug)]
pub enum RunError {
    Transport(TransportError),
    Output(io::Error),
}

impl From<TransportError> for RunError {
    fn from(e: TransportError) -> Self {
        RunError::Transport(e)
    }
}

impl From<io::Error> for RunError {
    fn from(e: io::Error) -> Self {
        RunError::Output(e)
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::Transport(e) => write!(f, "transport error: {}", e),
            RunError::Output(e) => write!(f, "output error: {}", e),
        }
    }
}

impl std::error::Error for RunError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BenchConfig, HttpVersion, TlsVersion};
    use crate::report::Reporter;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const BODY: &[u8] = b"0123456789abcdef";

    /// Minimal keep-alive HTTP/1.1 fixture answering every request with
    /// one canned 200 response and counting accepted connections.
    async fn spawn_fixture() -> (SocketAddr, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&connections);
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    while read_request(&mut socket).await {
                        let header = format!(
                            "HTTP/1.1 200 OK\r\ncontent-length: {}\r\n\r\n",
                            BODY.len()
                        );
                        if socket.write_all(header.as_bytes()).await.is_err() {
                            break;
                        }
                        if socket.write_all(BODY).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        (addr, connections)
    }

    /// Read one request head; false once the peer hangs up.
    async fn read_request(socket: &mut tokio::net::TcpStream) -> bool {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => return false,
                Ok(n) => {
                    buf.extend_from_slice(&chunk[..n]);
                    if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        return true;
                    }
                }
            }
        }
    }

    fn loopback_config(addr: SocketAddr) -> BenchConfig {
        let mut config = BenchConfig::new(
            format!("http://{}/", addr),
            HttpVersion::V1,
            TlsVersion::V1_3,
        );
        config.iterations = 3;
        config
    }

    #[tokio::test]
    async fn collects_one_sample_per_successful_iteration() {
        let (addr, connections) = spawn_fixture().await;
        let mut reporter = Reporter::with_status(Vec::new(), Vec::new(), HttpVersion::V1);
        let runner = BenchmarkRunner::new(loopback_config(addr), None);

        let result = runner.run(&mut reporter).await.unwrap();

        assert_eq!(result.attempted, 3);
        assert_eq!(result.succeeded(), 3);
        assert!(result.samples.iter().all(|s| s.bytes == BODY.len() as u64));
        assert_eq!(
            result.samples.iter().map(|s| s.iteration).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        // A fresh transport per iteration means a fresh connection each
        // time.
        assert_eq!(connections.load(Ordering::SeqCst), 3);

        let (csv, _) = reporter.into_parts().unwrap();
        let csv = String::from_utf8(csv).unwrap();
        assert_eq!(csv.lines().count(), 3);
        assert!(csv.lines().all(|line| line.starts_with("1,")));
    }

    #[tokio::test]
    async fn reusing_the_transport_uses_one_connection() {
        let (addr, connections) = spawn_fixture().await;
        let mut config = loopback_config(addr);
        config.keep_transport = true;
        let mut reporter = Reporter::with_status(Vec::new(), Vec::new(), HttpVersion::V1);
        let runner = BenchmarkRunner::new(config, None);

        let result = runner.run(&mut reporter).await.unwrap();

        assert_eq!(result.attempted, 3);
        assert_eq!(result.succeeded(), 3);
        assert_eq!(connections.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_iterations_are_skipped_not_fatal() {
        // Bind then drop to get a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut reporter = Reporter::with_status(Vec::new(), Vec::new(), HttpVersion::V1);
        let runner = BenchmarkRunner::new(loopback_config(addr), None);

        let result = runner.run(&mut reporter).await.unwrap();

        assert_eq!(result.attempted, 3);
        assert_eq!(result.succeeded(), 0);

        let (csv, _) = reporter.into_parts().unwrap();
        assert!(csv.is_empty());
    }

    #[test]
    fn sample_bit_rate_follows_the_definition() {
        let sample = Sample::new(1, Duration::from_millis(100), 1_048_576);
        assert_eq!(sample.bit_rate, 83_886_080.0);
        assert_eq!(sample.elapsed_micros(), 100_000);
    }

    #[test]
    fn zero_elapsed_does_not_divide_by_zero() {
        let sample = Sample::new(1, Duration::ZERO, 1024);
        assert_eq!(sample.bit_rate, 0.0);
    }
}
