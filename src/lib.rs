pub mod config;
pub mod report;
pub mod runner;
pub mod stats;
pub mod transport;
pub mod units;

pub use config::{BenchConfig, HttpVersion, TlsVersion};
pub use report::Reporter;
pub use runner::{BenchmarkRunner, RunResult, Sample};
pub use transport::{SecretLogFile, Transport};
