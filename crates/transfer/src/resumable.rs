use std::io::{self, Write};
use std::time::Duration;

use buildpush_protocol::constants::{DEFAULT_MAX_CHUNK_GROUP, UPLOAD_CHUNK_SIZE};
use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_RANGE, RANGE};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::chunked::{content_range, group_size, parse_range_header};
use crate::{TransferError, UploadSession};

/// Batches in flight between a writer and its sink.
const CHANNEL_CAPACITY: usize = 8;

/// Tuning of an upload sink.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Chunks of 256 KiB buffered before a request is forced.
    pub max_chunk_group: usize,
    /// Attempts per request before giving up.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on every further attempt.
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            max_chunk_group: DEFAULT_MAX_CHUNK_GROUP,
            max_attempts: 10,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl SinkConfig {
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

enum SinkMessage {
    Data(Bytes),
    Close,
}

/// Synchronous writing end of an upload sink.
///
/// Meant for blocking threads (the diff engine runs on one): writes are
/// batched and handed to the sink task, blocking while the sink is busy.
/// Call [`close`](Self::close) once everything is written; dropping the
/// writer without closing aborts the upload.
pub struct UploadWriter {
    tx: mpsc::Sender<SinkMessage>,
    batch: Vec<u8>,
    offered: u64,
    offered_tx: watch::Sender<u64>,
}

impl UploadWriter {
    /// Bytes handed to the sink so far.
    pub fn offered(&self) -> u64 {
        self.offered
    }

    /// Sends any buffered bytes and tells the sink the stream is complete.
    pub fn close(mut self) -> io::Result<()> {
        self.send_batch()?;
        self.tx
            .blocking_send(SinkMessage::Close)
            .map_err(|_| sink_gone())
    }

    fn send_batch(&mut self) -> io::Result<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let data = std::mem::replace(&mut self.batch, Vec::with_capacity(UPLOAD_CHUNK_SIZE));
        let len = data.len() as u64;
        self.tx
            .blocking_send(SinkMessage::Data(Bytes::from(data)))
            .map_err(|_| sink_gone())?;
        self.offered += len;
        self.offered_tx.send_replace(self.offered);
        Ok(())
    }
}

fn sink_gone() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "upload sink stopped")
}

impl Write for UploadWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.batch.extend_from_slice(buf);
        if self.batch.len() >= UPLOAD_CHUNK_SIZE {
            self.send_batch()?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_batch()
    }
}

/// Handle on a running upload sink.
pub struct UploadSink {
    handle: JoinHandle<Result<u64, TransferError>>,
    confirmed: watch::Receiver<u64>,
    offered: watch::Receiver<u64>,
}

impl UploadSink {
    /// Bytes confirmed by the remote endpoint. Only ever grows.
    pub fn confirmed(&self) -> watch::Receiver<u64> {
        self.confirmed.clone()
    }

    /// Bytes handed to the sink by its writer.
    pub fn offered(&self) -> watch::Receiver<u64> {
        self.offered.clone()
    }

    /// Waits for the upload to finish; resolves to its final size.
    pub async fn wait(self) -> Result<u64, TransferError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(TransferError::Task(e.to_string())),
        }
    }
}

/// Starts draining a writer into a resumable session.
pub fn spawn_sink(
    http: reqwest::Client,
    session: UploadSession,
    config: SinkConfig,
    cancel: CancellationToken,
) -> (UploadWriter, UploadSink) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (offered_tx, offered_rx) = watch::channel(0);
    let (confirmed_tx, confirmed_rx) = watch::channel(0);

    let uploader = Uploader {
        http,
        location: session.location,
        config,
        cancel,
        buffer: Vec::new(),
        offset: 0,
        confirmed_tx,
    };
    let handle = tokio::spawn(uploader.run(rx));

    let writer = UploadWriter {
        tx,
        batch: Vec::with_capacity(UPLOAD_CHUNK_SIZE),
        offered: 0,
        offered_tx,
    };
    let sink = UploadSink {
        handle,
        confirmed: confirmed_rx,
        offered: offered_rx,
    };
    (writer, sink)
}

/// Server's answer to a chunk or status query.
enum Outcome {
    /// The upload is complete.
    Complete,
    /// The server holds this many bytes.
    Partial(u64),
}

struct Uploader {
    http: reqwest::Client,
    location: String,
    config: SinkConfig,
    cancel: CancellationToken,
    /// Bytes not yet confirmed, starting at `offset`.
    buffer: Vec<u8>,
    offset: u64,
    confirmed_tx: watch::Sender<u64>,
}

impl Uploader {
    async fn run(mut self, mut rx: mpsc::Receiver<SinkMessage>) -> Result<u64, TransferError> {
        let group = group_size(self.config.max_chunk_group);

        loop {
            let message = tokio::select! {
                _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
                message = rx.recv() => message,
            };

            match message {
                Some(SinkMessage::Data(data)) => {
                    self.buffer.extend_from_slice(&data);
                    while self.buffer.len() >= group {
                        self.round_trip(group, false).await?;
                    }
                }
                Some(SinkMessage::Close) => {
                    while !self.round_trip(self.buffer.len(), true).await? {}
                    debug!(location = %self.location, size = self.offset, "upload complete");
                    return Ok(self.offset);
                }
                None => return Err(TransferError::Aborted),
            }
        }
    }

    /// Sends the first `len` buffered bytes until the server confirms some
    /// progress. Returns whether the upload is complete.
    async fn round_trip(&mut self, len: usize, last: bool) -> Result<bool, TransferError> {
        let mut attempt = 0;

        loop {
            let total = last.then(|| self.offset + self.buffer.len() as u64);
            let error = match self.send(len, total).await {
                Ok(Outcome::Complete) if last => {
                    self.advance_to(self.offset + self.buffer.len() as u64)?;
                    return Ok(true);
                }
                Ok(Outcome::Complete) => {
                    return Err(TransferError::UnexpectedStatus {
                        status: 200,
                        body: "upload completed before the stream ended".into(),
                    });
                }
                Ok(Outcome::Partial(confirmed)) if confirmed > self.offset => {
                    self.advance_to(confirmed)?;
                    return Ok(false);
                }
                Ok(Outcome::Partial(_)) => TransferError::NoProgress,
                Err(e) if e.is_transient() => e,
                Err(e) => return Err(e),
            };

            attempt += 1;
            if attempt >= self.config.max_attempts {
                return Err(TransferError::RetriesExhausted {
                    attempts: attempt,
                    last: error.to_string(),
                });
            }

            let delay = self.config.backoff(attempt);
            warn!(
                location = %self.location,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "upload request failed, retrying"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }

            // Resume from whatever the server actually kept.
            match self.query_status().await {
                Ok(Outcome::Complete) if last => {
                    self.advance_to(self.offset + self.buffer.len() as u64)?;
                    return Ok(true);
                }
                Ok(Outcome::Partial(confirmed)) if confirmed > self.offset => {
                    self.advance_to(confirmed)?;
                    return Ok(false);
                }
                Ok(_) => {}
                Err(e) if e.is_transient() => {
                    debug!(error = %e, "status query failed");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send(&self, len: usize, total: Option<u64>) -> Result<Outcome, TransferError> {
        let range = content_range(self.offset, len, total);
        let body = Bytes::copy_from_slice(&self.buffer[..len]);
        debug!(location = %self.location, range = %range, "uploading chunk");

        let request = self
            .http
            .put(&self.location)
            .header(CONTENT_RANGE, range)
            .body(body);
        self.execute(request).await
    }

    async fn query_status(&self) -> Result<Outcome, TransferError> {
        let request = self
            .http
            .put(&self.location)
            .header(CONTENT_RANGE, content_range(0, 0, None))
            .body(Vec::<u8>::new());
        self.execute(request).await
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<Outcome, TransferError> {
        let resp = tokio::select! {
            _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
            resp = request.send() => resp?,
        };

        match resp.status() {
            StatusCode::OK | StatusCode::CREATED => Ok(Outcome::Complete),
            StatusCode::PERMANENT_REDIRECT => {
                let confirmed = match resp.headers().get(RANGE) {
                    Some(value) => {
                        let value = value
                            .to_str()
                            .map_err(|e| TransferError::InvalidRange(e.to_string()))?;
                        parse_range_header(value)?
                    }
                    None => 0,
                };
                Ok(Outcome::Partial(confirmed))
            }
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(TransferError::UnexpectedStatus {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }

    /// Drops confirmed bytes from the buffer and publishes the new count.
    fn advance_to(&mut self, confirmed: u64) -> Result<(), TransferError> {
        let end = self.offset + self.buffer.len() as u64;
        if confirmed < self.offset || confirmed > end {
            return Err(TransferError::InvalidRange(format!(
                "server holds {confirmed} bytes, expected {}..={end}",
                self.offset
            )));
        }
        self.buffer.drain(..(confirmed - self.offset) as usize);
        self.offset = confirmed;
        self.confirmed_tx.send_replace(confirmed);
        Ok(())
    }
}
