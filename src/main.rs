use std::env;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use protobench::config::{BenchConfig, HttpVersion, TlsVersion};
use protobench::report::Reporter;
use protobench::runner::BenchmarkRunner;
use protobench::transport::SecretLogFile;

#[derive(Parser)]
#[command(
    name = "protobench",
    about = "Comparative latency/throughput benchmarking of HTTP/1.1, HTTP/2 and HTTP/3",
    version,
    author
)]
struct Cli {
    /// The URL to do a GET request against
    #[arg(
        long,
        default_value = "https://http3.streaming.ing.hs-rm.de/content/10mb_of_random.img"
    )]
    url: String,

    /// The HTTP version to use (1, 2 or 3)
    #[arg(long = "http", default_value = "3")]
    http_version: u8,

    /// The TLS version to pin the client to
    #[arg(long = "tls", default_value = "1.3")]
    tls_version: String,

    /// The amount of iterations to run
    #[arg(long, default_value = "10")]
    iterations: u64,

    /// The output file to write CSV rows to (empty is stdout)
    #[arg(long)]
    output: Option<String>,

    /// Keep the underlying transport channel open across iterations
    #[arg(long)]
    keep: bool,

    /// Use 0-RTT for HTTP/3 requests
    #[arg(long = "zero-rtt")]
    zero_rtt: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr; stdout carries the CSV stream.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::from_default_env().add_directive("protobench=info".parse()?))
        .init();

    let cli = Cli::parse();

    let mut config = BenchConfig::new(
        cli.url,
        HttpVersion::try_from(cli.http_version)?,
        cli.tls_version.parse::<TlsVersion>()?,
    );
    config.zero_rtt = cli.zero_rtt;
    config.iterations = cli.iterations;
    config.keep_transport = cli.keep;
    config.validate()?;

    if config.zero_rtt && config.http_version == HttpVersion::V3 {
        info!("0-RTT enabled");
    }

    let key_log = match env::var("SSLKEYLOGFILE") {
        Ok(path) if !path.is_empty() => Some(Arc::new(SecretLogFile::open(&path)?)),
        _ => None,
    };

    let sink: Box<dyn Write + Send> = match cli.output.as_deref() {
        Some(path) if !path.is_empty() => Box::new(open_sink(path)?),
        _ => Box::new(io::stdout()),
    };

    let mut reporter = Reporter::new(sink, config.http_version);
    let runner = BenchmarkRunner::new(config, key_log);
    let result = runner.run(&mut reporter).await?;
    reporter.summarize(&result)?;

    Ok(())
}

fn open_sink(path: &str) -> io::Result<File> {
    let mut opts = OpenOptions::new();
    opts.append(true).create(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    opts.open(path)
}
