//! The differencing engine.
//!
//! Walks each file of the new build with a rolling window, looking every
//! window up in the baseline's block hashes. Matches become [`SyncOp::BlockRange`]
//! ops pointing into the old build; everything else is carried as
//! [`SyncOp::Data`]. While doing so it hashes the new build into a fresh
//! signature, so both streams come out of one read of the source.

use std::collections::HashMap;
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::container::Container;
use crate::pool::FilePool;
use crate::rolling::{RollingHash, strong_hash, weak_hash};
use crate::signature::{BlockHash, BlockHasher, SignatureWriter};
use crate::wire::{self, Compressor, PATCH_MAGIC};
use crate::{BLOCK_SIZE, CompressionSettings, DeltaError};

/// Largest payload of a single [`SyncOp::Data`] op.
pub const MAX_DATA_OP: usize = 4 * 1024 * 1024;

/// How often (in consumed bytes) progress is reported within a file.
const PROGRESS_EVERY: u64 = 1024 * 1024;

/// Opens the ops of one file of the new build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncHeader {
    pub file_index: u32,
}

/// One instruction for rebuilding a file of the new build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncOp {
    /// Copy `block_span` consecutive blocks of an old file.
    BlockRange {
        file_index: u32,
        block_index: u32,
        block_span: u32,
    },
    /// Bytes not found in the old build.
    Data(Vec<u8>),
    /// End of the current file.
    Eof,
}

/// Totals of a finished diff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    /// Bytes carried as literal data in the patch.
    pub fresh_bytes: u64,
    /// Bytes satisfied by blocks of the old build.
    pub reused_bytes: u64,
}

/// Diff progress: source bytes consumed so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffProgress {
    pub bytes_read: u64,
    pub total: u64,
}

impl DiffProgress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        (self.bytes_read as f64 / self.total as f64).clamp(0.0, 1.0)
    }
}

/// Everything needed to diff a new build against an old one.
#[derive(Debug, Clone)]
pub struct DiffContext {
    source: Container,
    target: Container,
    target_signature: Vec<BlockHash>,
    compression: CompressionSettings,
}

impl DiffContext {
    /// `source` is the new build; `target` and `target_signature` describe
    /// the old one (both empty on a channel's first push).
    pub fn new(source: Container, target: Container, target_signature: Vec<BlockHash>) -> Self {
        Self {
            source,
            target,
            target_signature,
            compression: CompressionSettings::default(),
        }
    }

    pub fn with_compression(mut self, compression: CompressionSettings) -> Self {
        self.compression = compression;
        self
    }

    pub fn source(&self) -> &Container {
        &self.source
    }

    /// Diffs the source against the target, writing the patch and the new
    /// build's signature as it goes.
    ///
    /// Both writers are finished (compressed bodies terminated, then
    /// flushed) before returning. `on_progress` sees non-decreasing byte
    /// counts. Cancellation is checked between reads.
    pub fn write_patch<P: Write, S: Write>(
        &self,
        pool: &mut dyn FilePool,
        patch: P,
        signature: S,
        cancel: &CancellationToken,
        on_progress: &mut dyn FnMut(DiffProgress),
    ) -> Result<DiffStats, DeltaError> {
        let mut patch = wire::begin_stream(patch, PATCH_MAGIC, self.compression)?;
        wire::write_frame(&mut patch, &self.target)?;
        wire::write_frame(&mut patch, &self.source)?;

        let mut signature = SignatureWriter::new(signature, &self.source, self.compression)?;

        let library = BlockLibrary::new(&self.target_signature);
        let total = self.source.size();
        let mut stats = DiffStats::default();
        let mut consumed = 0u64;

        for (file_index, entry) in self.source.files().enumerate() {
            if cancel.is_cancelled() {
                return Err(DeltaError::Cancelled);
            }

            wire::write_frame(
                &mut patch,
                &SyncHeader {
                    file_index: file_index as u32,
                },
            )?;

            let reader = pool.open(file_index)?;
            let mut file = FileDiff {
                library: &library,
                patch: &mut patch,
                signature: &mut signature,
                hasher: Some(BlockHasher::new(file_index as u32)),
                stats: &mut stats,
                literal: Vec::new(),
                pending: None,
            };
            let read = file.run(reader, cancel, &mut |file_bytes| {
                on_progress(DiffProgress {
                    bytes_read: consumed + file_bytes,
                    total,
                })
            })?;

            wire::write_frame(&mut patch, &SyncOp::Eof)?;
            if read != entry.size {
                debug!(path = %entry.path, expected = entry.size, read, "file size changed while diffing");
            }
            consumed += read;
            on_progress(DiffProgress {
                bytes_read: consumed,
                total,
            });
        }

        patch.finish()?;
        signature.finish()?;

        debug!(
            fresh = stats.fresh_bytes,
            reused = stats.reused_bytes,
            "diff finished"
        );
        Ok(stats)
    }
}

/// Baseline blocks indexed by weak hash.
struct BlockLibrary<'a> {
    by_weak: HashMap<u32, Vec<&'a BlockHash>>,
}

impl<'a> BlockLibrary<'a> {
    fn new(blocks: &'a [BlockHash]) -> Self {
        let mut by_weak: HashMap<u32, Vec<&'a BlockHash>> = HashMap::new();
        for block in blocks {
            by_weak.entry(block.weak).or_default().push(block);
        }
        Self { by_weak }
    }

    /// Finds a block equal to `window`, preferring the one that continues
    /// the pending range so it can be extended.
    fn find(&self, weak: u32, window: &[u8], pending: Option<&Range>) -> Option<&'a BlockHash> {
        let candidates = self.by_weak.get(&weak)?;
        let size = window.len() as u32;
        if !candidates.iter().any(|b| b.size == size) {
            return None;
        }

        let strong = strong_hash(window);
        let mut matching = candidates
            .iter()
            .copied()
            .filter(|b| b.size == size && b.strong == strong);

        let first = matching.next()?;
        if let Some(range) = pending {
            if range.continues_with(first) {
                return Some(first);
            }
            if let Some(next) = matching.find(|b| range.continues_with(b)) {
                return Some(next);
            }
        }
        Some(first)
    }
}

#[derive(Debug, Clone, Copy)]
struct Range {
    file_index: u32,
    block_index: u32,
    block_span: u32,
}

impl Range {
    fn continues_with(&self, block: &BlockHash) -> bool {
        block.file_index == self.file_index
            && block.block_index == self.block_index + self.block_span
    }
}

/// Per-file diff state.
struct FileDiff<'a, 'l, P: Write, S: Write> {
    library: &'a BlockLibrary<'l>,
    patch: &'a mut Compressor<P>,
    signature: &'a mut SignatureWriter<S>,
    hasher: Option<BlockHasher>,
    stats: &'a mut DiffStats,
    literal: Vec<u8>,
    pending: Option<Range>,
}

impl<P: Write, S: Write> FileDiff<'_, '_, P, S> {
    /// Diffs one file; returns the number of bytes read from it.
    fn run(
        &mut self,
        mut reader: Box<dyn Read + '_>,
        cancel: &CancellationToken,
        on_progress: &mut dyn FnMut(u64),
    ) -> Result<u64, DeltaError> {
        let mut buf: Vec<u8> = Vec::with_capacity(BLOCK_SIZE * 3);
        let mut chunk = vec![0u8; BLOCK_SIZE];
        let mut blocks = Vec::new();
        let mut start = 0usize;
        let mut eof = false;
        let mut read = 0u64;
        let mut consumed = 0u64;
        let mut last_report = 0u64;
        let mut rolling: Option<RollingHash> = None;

        loop {
            if !eof && buf.len() - start <= BLOCK_SIZE {
                if cancel.is_cancelled() {
                    return Err(DeltaError::Cancelled);
                }
                if start >= BLOCK_SIZE * 2 {
                    buf.drain(..start);
                    start = 0;
                }
                while !eof && buf.len() - start < BLOCK_SIZE * 2 {
                    let n = reader.read(&mut chunk)?;
                    if n == 0 {
                        eof = true;
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    read += n as u64;
                    if let Some(hasher) = self.hasher.as_mut() {
                        hasher.update(&chunk[..n], &mut blocks);
                    }
                }
                for block in blocks.drain(..) {
                    self.signature.write_block(&block)?;
                }
            }

            if consumed - last_report >= PROGRESS_EVERY {
                on_progress(consumed);
                last_report = consumed;
            }

            let available = buf.len() - start;
            if available == 0 {
                break;
            }

            if available < BLOCK_SIZE {
                // Tail shorter than a block: only a same-size old tail can match.
                let tail = &buf[start..];
                match self
                    .library
                    .find(weak_hash(tail), tail, self.pending.as_ref())
                {
                    Some(block) => self.reuse(block)?,
                    None => {
                        self.flush_pending()?;
                        self.literal.extend_from_slice(tail);
                        self.stats.fresh_bytes += tail.len() as u64;
                    }
                }
                consumed += available as u64;
                start = buf.len();
                continue;
            }

            let window = &buf[start..start + BLOCK_SIZE];
            let hash = *rolling.get_or_insert_with(|| RollingHash::new(window));
            if let Some(block) = self
                .library
                .find(hash.digest(), window, self.pending.as_ref())
            {
                self.reuse(block)?;
                start += BLOCK_SIZE;
                consumed += BLOCK_SIZE as u64;
                rolling = None;
                continue;
            }

            self.flush_pending()?;
            let byte = buf[start];
            self.literal.push(byte);
            self.stats.fresh_bytes += 1;
            if self.literal.len() >= MAX_DATA_OP {
                self.flush_literal()?;
            }

            match (rolling.as_mut(), buf.get(start + BLOCK_SIZE)) {
                (Some(hash), Some(&incoming)) => hash.roll(byte, incoming),
                _ => rolling = None,
            }
            start += 1;
            consumed += 1;
        }

        self.flush_literal()?;
        self.flush_pending()?;
        if let Some(hasher) = self.hasher.take() {
            hasher.finish(&mut blocks);
        }
        for block in blocks.drain(..) {
            self.signature.write_block(&block)?;
        }
        Ok(read)
    }

    fn reuse(&mut self, block: &BlockHash) -> Result<(), DeltaError> {
        self.flush_literal()?;
        self.stats.reused_bytes += block.size as u64;

        if let Some(range) = self.pending.as_mut() {
            if range.continues_with(block) {
                range.block_span += 1;
                return Ok(());
            }
        }
        self.flush_pending()?;
        self.pending = Some(Range {
            file_index: block.file_index,
            block_index: block.block_index,
            block_span: 1,
        });
        Ok(())
    }

    fn flush_pending(&mut self) -> Result<(), DeltaError> {
        if let Some(range) = self.pending.take() {
            wire::write_frame(
                &mut *self.patch,
                &SyncOp::BlockRange {
                    file_index: range.file_index,
                    block_index: range.block_index,
                    block_span: range.block_span,
                },
            )?;
        }
        Ok(())
    }

    fn flush_literal(&mut self) -> Result<(), DeltaError> {
        if !self.literal.is_empty() {
            let data = std::mem::take(&mut self.literal);
            wire::write_frame(&mut *self.patch, &SyncOp::Data(data))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{DEFAULT_FILE_MODE, Entry};
    use crate::pool::MemoryPool;
    use crate::signature::{compute_signature, read_signature};
    use crate::wire::{open_stream, read_frame};

    /// Ten files, 1,000,000 bytes in total.
    fn build(seed: u32) -> (Container, Vec<Vec<u8>>) {
        let mut entries = Vec::new();
        let mut files = Vec::new();
        for i in 0..10u32 {
            let data: Vec<u8> = (0..100_000u32)
                .map(|j| ((j.wrapping_mul(2654435761) >> 13) ^ (i * 131 + seed)) as u8)
                .collect();
            entries.push(Entry::file(format!("data/file{i}.bin"), 100_000, DEFAULT_FILE_MODE));
            files.push(data);
        }
        (Container::new(entries), files)
    }

    struct Output {
        stats: DiffStats,
        patch: Vec<u8>,
        signature: Vec<u8>,
        progress: Vec<DiffProgress>,
    }

    fn diff(ctx: &DiffContext, files: &[Vec<u8>]) -> Output {
        let mut pool = MemoryPool::new(files.to_vec());
        let mut patch = Vec::new();
        let mut signature = Vec::new();
        let mut progress = Vec::new();
        let stats = ctx
            .write_patch(
                &mut pool,
                &mut patch,
                &mut signature,
                &CancellationToken::new(),
                &mut |p| progress.push(p),
            )
            .unwrap();
        Output {
            stats,
            patch,
            signature,
            progress,
        }
    }

    /// Rebuilds the new files from a patch and the old files.
    fn apply(patch: &[u8], old: &[Vec<u8>]) -> Vec<Vec<u8>> {
        let mut body = open_stream(patch, PATCH_MAGIC).unwrap();
        let _target: Container = read_frame(&mut body).unwrap().unwrap();
        let source: Container = read_frame(&mut body).unwrap().unwrap();

        let mut out = Vec::new();
        for expected_index in 0..source.file_count() {
            let header: SyncHeader = read_frame(&mut body).unwrap().unwrap();
            assert_eq!(header.file_index as usize, expected_index);
            let mut file = Vec::new();
            loop {
                match read_frame::<_, SyncOp>(&mut body).unwrap().unwrap() {
                    SyncOp::BlockRange {
                        file_index,
                        block_index,
                        block_span,
                    } => {
                        let old_file = &old[file_index as usize];
                        let from = block_index as usize * BLOCK_SIZE;
                        let to = ((block_index + block_span) as usize * BLOCK_SIZE)
                            .min(old_file.len());
                        file.extend_from_slice(&old_file[from..to]);
                    }
                    SyncOp::Data(data) => file.extend_from_slice(&data),
                    SyncOp::Eof => break,
                }
            }
            out.push(file);
        }
        assert!(read_frame::<_, SyncOp>(&mut body).unwrap().is_none());
        out
    }

    #[test]
    fn first_push_is_all_fresh() {
        let (container, files) = build(0);
        let ctx = DiffContext::new(container.clone(), Container::empty(), Vec::new());
        let out = diff(&ctx, &files);

        assert_eq!(out.stats.reused_bytes, 0);
        assert_eq!(out.stats.fresh_bytes, 1_000_000);
        assert!(!out.patch.is_empty());
        assert_eq!(apply(&out.patch, &[]), files);

        let (sig_container, blocks) = read_signature(out.signature.as_slice()).unwrap();
        assert_eq!(sig_container, container);
        // 100,000 bytes per file: one full block and one tail.
        assert_eq!(blocks.len(), 20);
    }

    #[test]
    fn identical_push_reuses_everything() {
        let (container, files) = build(0);
        let first = diff(
            &DiffContext::new(container.clone(), Container::empty(), Vec::new()),
            &files,
        );
        let (old_container, old_blocks) = read_signature(first.signature.as_slice()).unwrap();

        let second = diff(
            &DiffContext::new(container, old_container, old_blocks.clone()),
            &files,
        );
        assert_eq!(second.stats.reused_bytes, 1_000_000);
        assert_eq!(second.stats.fresh_bytes, 0);
        assert!(second.patch.len() < 10_000);
        assert_eq!(apply(&second.patch, &files), files);

        // The new signature describes the same content.
        let (_, new_blocks) = read_signature(second.signature.as_slice()).unwrap();
        assert_eq!(new_blocks, old_blocks);
    }

    #[test]
    fn shifted_content_is_found() {
        let (container, old_files) = build(7);
        let mut pool = MemoryPool::new(old_files.clone());
        let old_blocks = compute_signature(&container, &mut pool).unwrap();

        // Prepend a few bytes to one file; its blocks move off alignment.
        let mut new_files = old_files.clone();
        let mut shifted = b"header!".to_vec();
        shifted.extend_from_slice(&old_files[3]);
        new_files[3] = shifted;
        let mut entries: Vec<Entry> = container.entries().to_vec();
        entries[3].size = new_files[3].len() as u64;
        let new_container = Container::new(entries);

        let out = diff(
            &DiffContext::new(new_container, container, old_blocks),
            &new_files,
        );
        assert_eq!(out.stats.fresh_bytes, 7);
        assert_eq!(out.stats.reused_bytes, 1_000_000);
        assert_eq!(apply(&out.patch, &old_files), new_files);
    }

    #[test]
    fn adjacent_blocks_merge_into_one_range() {
        let data: Vec<u8> = (0..BLOCK_SIZE * 4).map(|i| (i * 13 % 241) as u8).collect();
        let container = Container::new(vec![Entry::file("a", data.len() as u64, DEFAULT_FILE_MODE)]);
        let mut pool = MemoryPool::new(vec![data.clone()]);
        let blocks = compute_signature(&container, &mut pool).unwrap();

        let out = diff(
            &DiffContext::new(container.clone(), container, blocks)
                .with_compression(CompressionSettings::none()),
            &[data],
        );

        let mut body = open_stream(out.patch.as_slice(), PATCH_MAGIC).unwrap();
        let _: Container = read_frame(&mut body).unwrap().unwrap();
        let _: Container = read_frame(&mut body).unwrap().unwrap();
        let _: SyncHeader = read_frame(&mut body).unwrap().unwrap();
        let op: SyncOp = read_frame(&mut body).unwrap().unwrap();
        assert_eq!(
            op,
            SyncOp::BlockRange {
                file_index: 0,
                block_index: 0,
                block_span: 4
            }
        );
        assert_eq!(read_frame::<_, SyncOp>(&mut body).unwrap().unwrap(), SyncOp::Eof);
    }

    #[test]
    fn progress_is_monotonic_and_complete() {
        let (container, files) = build(1);
        let out = diff(
            &DiffContext::new(container, Container::empty(), Vec::new()),
            &files,
        );

        assert!(!out.progress.is_empty());
        for pair in out.progress.windows(2) {
            assert!(pair[0].bytes_read <= pair[1].bytes_read);
        }
        let last = out.progress.last().unwrap();
        assert_eq!(last.bytes_read, 1_000_000);
        assert_eq!(last.fraction(), 1.0);
    }

    #[test]
    fn cancelled_diff_stops() {
        let (container, files) = build(2);
        let ctx = DiffContext::new(container, Container::empty(), Vec::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut pool = MemoryPool::new(files);
        let result = ctx.write_patch(
            &mut pool,
            Vec::new(),
            Vec::new(),
            &cancel,
            &mut |_| {},
        );
        assert!(matches!(result, Err(DeltaError::Cancelled)));
    }

    #[test]
    fn empty_files_produce_no_ops() {
        let container = Container::new(vec![Entry::file("empty", 0, DEFAULT_FILE_MODE)]);
        let out = diff(
            &DiffContext::new(container, Container::empty(), Vec::new()),
            &[Vec::new()],
        );
        assert_eq!(out.stats, DiffStats::default());
        assert_eq!(apply(&out.patch, &[]), vec![Vec::<u8>::new()]);
    }
}
