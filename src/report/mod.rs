//! Per-iteration CSV output, progress indication and the end-of-run
//! summary.

use std::io::{self, Write};

use crate::config::HttpVersion;
use crate::runner::{RunResult, Sample};
use crate::stats;
use crate::units::{Binary, Decimal};

/// Writes the machine-readable CSV stream and the human-readable status
/// channel. CSV goes to the output sink (stdout by default), everything
/// else to the status channel (stderr by default) so the two streams
/// never mix.
pub struct Reporter<W: Write, S: Write = io::Stderr> {
    csv: csv::Writer<W>,
    status: S,
    version: HttpVersion,
}

impl<W: Write> Reporter<W> {
    pub fn new(sink: W, version: HttpVersion) -> Self {
        Self::with_status(sink, io::stderr(), version)
    }
}

impl<W: Write, S: Write> Reporter<W, S> {
    pub fn with_status(sink: W, status: S, version: HttpVersion) -> Self {
        Self {
            csv: csv::Writer::from_writer(sink),
            status,
            version,
        }
    }

    /// Append one row: `version,iteration,micros,bytes,bitrate`. No
    /// header; flushed immediately so the stream is tail-able.
    pub fn record(&mut self, sample: &Sample) -> io::Result<()> {
        self.csv
            .write_record([
                self.version.to_string(),
                sample.iteration.to_string(),
                sample.elapsed_micros().to_string(),
                sample.bytes.to_string(),
                format!("{:.6}", sample.bit_rate),
            ])
            .map_err(io::Error::other)?;
        self.csv.flush()
    }

    /// Overwrite the status line with the current iteration's result.
    pub fn progress(&mut self, current: u64, total: u64, sample: &Sample) -> io::Result<()> {
        write!(
            self.status,
            " \x1b[0K\r [{}/{}] Data: {} ({})\r",
            current,
            total,
            Binary(sample.bytes as f64).format("B"),
            Decimal(sample.bit_rate).format("b/s"),
        )?;
        self.status.flush()
    }

    /// Print the end-of-run summary to the status channel. Extrema and
    /// the run-level bit rate are suppressed when nothing succeeded;
    /// the success count always prints.
    pub fn summarize(&mut self, result: &RunResult) -> io::Result<()> {
        let elapsed: Vec<u64> = result.samples.iter().map(Sample::elapsed_micros).collect();
        let mean = stats::mean(&elapsed);

        writeln!(self.status, "\x1b[0K\r### STATS ###")?;
        writeln!(self.status, "HTTP version: {}", self.version)?;
        writeln!(
            self.status,
            "Successful requests: {}/{}",
            result.succeeded(),
            result.attempted
        )?;
        if let Some(last) = result.samples.last() {
            // Run-level rate: the last sample's size over the mean
            // elapsed time.
            let bit_rate = (last.bytes as f64 * 8.0) / (mean * 1e-6);
            writeln!(
                self.status,
                "Avg bit rate: {}",
                Decimal(bit_rate).format("b/s")
            )?;
        }
        writeln!(self.status, "Mean: {:.2} us", mean)?;
        writeln!(self.status, "Median: {:.2} us", stats::median(&elapsed))?;
        if let (Some(min), Some(max)) = (stats::min(&elapsed), stats::max(&elapsed)) {
            writeln!(self.status, "Min: {} us", min)?;
            writeln!(self.status, "Max: {} us", max)?;
        }
        self.status.flush()
    }

    /// Tear down and hand back both writers.
    pub fn into_parts(self) -> io::Result<(W, S)> {
        let sink = self
            .csv
            .into_inner()
            .map_err(|e| io::Error::other(e.to_string()))?;
        Ok((sink, self.status))
    }
}
