//! Push progress estimation.
//!
//! Patch bytes confirmed by the server are the only real progress, but the
//! final patch size is unknown while diffing. The estimate assumes every
//! source byte not yet read will reach the patch as-is; bytes already read
//! but absent from the patch (reused or compressed away) are "gone" and
//! shrink the expected total:
//!
//! ```text
//! gone               = bytes_read - patch_offered
//! conservative_total = source_size - gone
//! fraction           = confirmed / conservative_total
//! ```

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How often throughput is sampled.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(2);

/// Below this many bytes left, the label stops showing throughput.
pub const ALMOST_THERE_BYTES: i64 = 10 * 1024;

/// At or below this rate (bytes/s) the network counts as idle.
const IDLE_THROUGHPUT: f64 = 1.0;

/// A derived view of push progress.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    /// Conservative completion in `[0, 1]`; never decreases.
    pub fraction: f64,
    /// Diff progress: `bytes_read / source_size`.
    pub scale: f64,
    pub bytes_read: u64,
    pub confirmed: u64,
    pub gone_bytes: i64,
    pub conservative_total: i64,
    /// Confirmed bytes per second over the last sample interval.
    pub throughput: f64,
    pub label: String,
}

/// Sole owner of progress state for one push.
#[derive(Debug)]
pub struct ProgressEstimator {
    source_size: u64,
    fraction: f64,
    last_confirmed: u64,
    last_sample: Option<Instant>,
    throughput: f64,
}

impl ProgressEstimator {
    pub fn new(source_size: u64) -> Self {
        Self {
            source_size,
            fraction: 0.0,
            last_confirmed: 0,
            last_sample: None,
            throughput: 0.0,
        }
    }

    /// Updates throughput from the confirmed count at `now`.
    pub fn sample(&mut self, confirmed: u64, now: Instant) {
        if let Some(last) = self.last_sample {
            let elapsed = now.duration_since(last).as_secs_f64();
            if elapsed > 0.0 {
                self.throughput = confirmed.saturating_sub(self.last_confirmed) as f64 / elapsed;
            }
        }
        self.last_confirmed = confirmed;
        self.last_sample = Some(now);
    }

    /// Recomputes the completion estimate.
    pub fn estimate(&mut self, bytes_read: u64, patch_offered: u64, confirmed: u64) -> ProgressSnapshot {
        let gone_bytes = bytes_read as i64 - patch_offered as i64;
        let conservative_total = self.source_size as i64 - gone_bytes;

        let raw = if conservative_total > 0 {
            (confirmed as f64 / conservative_total as f64).clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.fraction = self.fraction.max(raw);

        let scale = if self.source_size > 0 {
            (bytes_read as f64 / self.source_size as f64).min(1.0)
        } else {
            1.0
        };

        let left = conservative_total - confirmed as i64;
        ProgressSnapshot {
            fraction: self.fraction,
            scale,
            bytes_read,
            confirmed,
            gone_bytes,
            conservative_total,
            throughput: self.throughput,
            label: progress_label(left, self.throughput),
        }
    }
}

/// Human label for the bytes left and current throughput.
pub fn progress_label(left: i64, throughput: f64) -> String {
    if left <= ALMOST_THERE_BYTES {
        return "- almost there".to_string();
    }
    let left = format_bytes(left as u64);
    if throughput > IDLE_THROUGHPUT {
        format!("@ {}/s, {left} left", format_bytes(throughput as u64))
    } else {
        format!("- network idle, {left} left")
    }
}

/// Formats a byte count with binary units.
pub fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;
    const TIB: u64 = 1024 * GIB;

    if bytes >= TIB {
        format!("{:.1} TiB", bytes as f64 / TIB as f64)
    } else if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Cumulative counters the tracker watches.
pub struct ProgressFeeds {
    pub bytes_read: watch::Receiver<u64>,
    pub patch_offered: watch::Receiver<u64>,
    pub patch_confirmed: watch::Receiver<u64>,
}

impl ProgressFeeds {
    fn current(&self) -> (u64, u64, u64) {
        (
            *self.bytes_read.borrow(),
            *self.patch_offered.borrow(),
            *self.patch_confirmed.borrow(),
        )
    }
}

/// Runs the progress sampler until `stop` is cancelled.
///
/// Emits a snapshot on every sample tick and whenever a counter changes.
/// Resolves to the last snapshot.
pub fn spawn_tracker<F>(
    source_size: u64,
    mut feeds: ProgressFeeds,
    interval: Duration,
    stop: CancellationToken,
    mut on_progress: F,
) -> JoinHandle<ProgressSnapshot>
where
    F: FnMut(&ProgressSnapshot) + Send + 'static,
{
    tokio::spawn(async move {
        let mut estimator = ProgressEstimator::new(source_size);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    let confirmed = *feeds.patch_confirmed.borrow();
                    estimator.sample(confirmed, Instant::now());
                }
                Ok(()) = feeds.bytes_read.changed() => {}
                Ok(()) = feeds.patch_offered.changed() => {}
                Ok(()) = feeds.patch_confirmed.changed() => {}
            }

            let (read, offered, confirmed) = feeds.current();
            on_progress(&estimator.estimate(read, offered, confirmed));
        }

        // Counters may have moved since the last event.
        let (read, offered, confirmed) = feeds.current();
        estimator.estimate(read, offered, confirmed)
    })
}
