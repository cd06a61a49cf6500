//! Clock-paced delivery: replays 1316-byte chunks at the rate given by a
//! companion track of 27 MHz timestamps, one per chunk.

use std::future::Future;
use std::io;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::constants::*;
use crate::error::{PacerError, Result};
use crate::types::DeliveryConfig;

/// Destination of delivered chunks
pub trait ChunkSink {
    fn send_chunk(&mut self, chunk: &[u8]) -> impl Future<Output = io::Result<usize>> + Send;
}

impl ChunkSink for UdpSocket {
    async fn send_chunk(&mut self, chunk: &[u8]) -> io::Result<usize> {
        self.send(chunk).await
    }
}

/// Read-ahead over the content source, handing out whole chunks.
///
/// A remainder shorter than one chunk stays buffered and is completed by the
/// next bulk read.
pub struct ChunkReader<R> {
    inner: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> ChunkReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_AHEAD_SIZE),
        }
    }

    /// Next chunk, or `None` once the source is exhausted.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        while self.buf.len() < CHUNK_SIZE {
            if self.buf.capacity() - self.buf.len() < CHUNK_SIZE {
                self.buf.reserve(READ_AHEAD_SIZE);
            }
            if self.inner.read_buf(&mut self.buf).await? == 0 {
                if !self.buf.is_empty() {
                    warn!("discarding {} trailing bytes (partial chunk)", self.buf.len());
                    self.buf.clear();
                }
                return Ok(None);
            }
        }
        Ok(Some(self.buf.split_to(CHUNK_SIZE).freeze()))
    }
}

/// Per-chunk timestamps, big-endian u64 in 27 MHz ticks.
pub struct TimestampTrack<A> {
    inner: BufReader<A>,
}

impl<A: AsyncRead + Unpin> TimestampTrack<A> {
    pub fn new(inner: A) -> Self {
        Self {
            inner: BufReader::with_capacity(READ_AHEAD_CHUNKS * TIMESTAMP_SIZE, inner),
        }
    }

    /// Timestamp of chunk `chunk` (0-based).
    pub async fn next(&mut self, chunk: u64) -> Result<u64> {
        match self.inner.read_u64().await {
            Ok(ticks) => Ok(ticks),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Err(PacerError::TimestampTrackExhausted { chunk })
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// What the pacing check asks the session to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaceAction {
    Continue,
    Sleep(Duration),
    Resync,
    Stop,
}

/// Wall/stream epoch pair, the first-seen timestamp and the last good
/// chunk-to-chunk step.
///
/// A chunk stamped `t` occupies stream time up to `t + step`, so a check
/// after chunk N waits for the end of chunk N rather than its start.
#[derive(Debug, Clone, Copy)]
pub struct PacingClock {
    epoch_wall: Instant,
    epoch_stream: u64,
    first_stream: u64,
    last_stream: u64,
    last_step: u64,
}

fn elapsed_ns(from: u64, to: u64) -> i64 {
    let ticks = to as i128 - from as i128;
    (ticks * 1_000_000_000 / PCR_CLOCK_HZ as i128) as i64
}

impl PacingClock {
    pub fn new(now: Instant, ticks: u64) -> Self {
        Self {
            epoch_wall: now,
            epoch_stream: ticks,
            first_stream: ticks,
            last_stream: ticks,
            last_step: 0,
        }
    }

    /// Records the timestamp of every chunk read. Steps that run backwards
    /// or exceed [`MAX_PCR_INTERVAL_NS`] keep the previous step.
    pub fn observe(&mut self, ticks: u64) {
        if let Some(step) = ticks.checked_sub(self.last_stream) {
            if elapsed_ns(0, step) <= MAX_PCR_INTERVAL_NS {
                self.last_step = step;
            }
        }
        self.last_stream = ticks;
    }

    /// Stream time delivered since the first chunk, in ns
    pub fn stream_elapsed(&self, ticks: u64) -> i64 {
        elapsed_ns(self.first_stream, ticks)
    }

    /// Stream time at which the chunk stamped `ticks` has been fully delivered
    fn chunk_end(&self, ticks: u64) -> u64 {
        ticks.saturating_add(self.last_step)
    }

    pub fn check(&mut self, now: Instant, ticks: u64, config: &DeliveryConfig) -> PaceAction {
        if let Some(max) = config.max_duration {
            if self.stream_elapsed(ticks) > max.as_nanos() as i64 {
                return PaceAction::Stop;
            }
        }

        let end = self.chunk_end(ticks);
        let stream = elapsed_ns(self.epoch_stream, end);
        let wall = now.duration_since(self.epoch_wall).as_nanos() as i64;
        let delay = stream - wall;
        if delay > 0 {
            PaceAction::Sleep(Duration::from_nanos(delay as u64))
        } else if delay < -(config.max_lateness.as_nanos() as i64) {
            self.epoch_wall = now;
            self.epoch_stream = end;
            PaceAction::Resync
        } else {
            PaceAction::Continue
        }
    }
}

/// How a session ended
#[derive(Debug)]
pub enum DeliveryOutcome {
    EndOfStream,
    DurationLimit,
    Cancelled,
    Failed(PacerError),
}

#[derive(Debug)]
pub struct DeliveryReport {
    pub bytes_written: u64,
    pub chunks: u64,
    pub write_errors: u64,
    pub resyncs: u64,
    pub outcome: DeliveryOutcome,
}

impl DeliveryReport {
    pub fn error(&self) -> Option<&PacerError> {
        match &self.outcome {
            DeliveryOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Resolves once `stop` turns true; never resolves if the sender is gone.
pub(crate) async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    if stop.wait_for(|s| *s).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// One paced replay of a content source against its timestamp track.
pub struct PacedSession<R, A> {
    chunks: ChunkReader<R>,
    timestamps: TimestampTrack<A>,
    config: DeliveryConfig,
    stop: watch::Receiver<bool>,
}

impl<R, A> PacedSession<R, A>
where
    R: AsyncRead + Unpin,
    A: AsyncRead + Unpin,
{
    pub fn new(content: R, timestamps: A, config: DeliveryConfig, stop: watch::Receiver<bool>) -> Self {
        Self {
            chunks: ChunkReader::new(content),
            timestamps: TimestampTrack::new(timestamps),
            config,
            stop,
        }
    }

    /// Runs until the source ends, the duration cap is hit, a read fails or
    /// stop is requested. Write failures are counted, never fatal.
    pub async fn run<S: ChunkSink>(mut self, sink: &mut S) -> DeliveryReport {
        let mut report = DeliveryReport {
            bytes_written: 0,
            chunks: 0,
            write_errors: 0,
            resyncs: 0,
            outcome: DeliveryOutcome::EndOfStream,
        };
        let outcome = match self.pace(sink, &mut report).await {
            Ok(outcome) => outcome,
            Err(e) => DeliveryOutcome::Failed(e),
        };
        report.outcome = outcome;
        info!(
            "session finished: {} bytes in {} chunks, {} write errors, {} resyncs, {:?}",
            report.bytes_written, report.chunks, report.write_errors, report.resyncs, report.outcome
        );
        report
    }

    async fn pace<S: ChunkSink>(&mut self, sink: &mut S, report: &mut DeliveryReport) -> Result<DeliveryOutcome> {
        let check_interval = self.config.check_interval.max(1);
        let mut clock: Option<PacingClock> = None;

        loop {
            if *self.stop.borrow() {
                return Ok(DeliveryOutcome::Cancelled);
            }
            let Some(chunk) = self.chunks.next_chunk().await? else {
                return Ok(DeliveryOutcome::EndOfStream);
            };
            let ticks = self.timestamps.next(report.chunks).await?;
            let clock = clock.get_or_insert_with(|| {
                info!("stream time starts at {ticks} ticks");
                PacingClock::new(Instant::now(), ticks)
            });
            clock.observe(ticks);

            if *self.stop.borrow() {
                return Ok(DeliveryOutcome::Cancelled);
            }
            match sink.send_chunk(&chunk).await {
                Ok(n) => report.bytes_written += n as u64,
                Err(e) => {
                    report.write_errors += 1;
                    warn!("write failed on chunk {}: {e}", report.chunks);
                }
            }
            report.chunks += 1;

            if report.chunks % check_interval != 0 {
                continue;
            }
            match clock.check(Instant::now(), ticks, &self.config) {
                PaceAction::Continue => {}
                PaceAction::Stop => {
                    info!("duration limit reached after {} ns of stream time", clock.stream_elapsed(ticks));
                    return Ok(DeliveryOutcome::DurationLimit);
                }
                PaceAction::Resync => {
                    report.resyncs += 1;
                    warn!("too much lateness at chunk {}, reset clock", report.chunks);
                }
                PaceAction::Sleep(delay) => {
                    debug!("chunk {}: ahead by {delay:?}", report.chunks);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = stop_requested(&mut self.stop) => return Ok(DeliveryOutcome::Cancelled),
                    }
                }
            }
        }
    }
}
