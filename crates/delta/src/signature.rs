//! Block signatures: the per-block hashes a build leaves behind for the
//! next push to diff against.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::container::Container;
use crate::pool::FilePool;
use crate::rolling::{STRONG_HASH_LEN, strong_hash, weak_hash};
use crate::wire::{self, Compressor, SIGNATURE_MAGIC};
use crate::{BLOCK_SIZE, CompressionSettings, DeltaError};

/// Hashes of one block of one file.
///
/// Every block is [`BLOCK_SIZE`] bytes except the last block of a file,
/// which holds the remainder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHash {
    pub file_index: u32,
    pub block_index: u32,
    pub weak: u32,
    pub strong: [u8; STRONG_HASH_LEN],
    pub size: u32,
}

impl BlockHash {
    fn compute(file_index: u32, block_index: u32, block: &[u8]) -> Self {
        Self {
            file_index,
            block_index,
            weak: weak_hash(block),
            strong: strong_hash(block),
            size: block.len() as u32,
        }
    }
}

/// Splits a file's byte stream into blocks and hashes each one.
pub(crate) struct BlockHasher {
    file_index: u32,
    block_index: u32,
    buf: Vec<u8>,
}

impl BlockHasher {
    pub(crate) fn new(file_index: u32) -> Self {
        Self {
            file_index,
            block_index: 0,
            buf: Vec::with_capacity(BLOCK_SIZE),
        }
    }

    pub(crate) fn update(&mut self, mut data: &[u8], out: &mut Vec<BlockHash>) {
        while !data.is_empty() {
            let take = (BLOCK_SIZE - self.buf.len()).min(data.len());
            self.buf.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.buf.len() == BLOCK_SIZE {
                self.emit(out);
            }
        }
    }

    pub(crate) fn finish(mut self, out: &mut Vec<BlockHash>) {
        if !self.buf.is_empty() {
            self.emit(out);
        }
    }

    fn emit(&mut self, out: &mut Vec<BlockHash>) {
        out.push(BlockHash::compute(
            self.file_index,
            self.block_index,
            &self.buf,
        ));
        self.block_index += 1;
        self.buf.clear();
    }
}

/// Incremental writer for a signature stream.
pub struct SignatureWriter<W: Write> {
    body: Compressor<W>,
    blocks: u64,
}

impl<W: Write> SignatureWriter<W> {
    /// Writes the stream header and the container the blocks describe.
    pub fn new(
        writer: W,
        container: &Container,
        compression: CompressionSettings,
    ) -> Result<Self, DeltaError> {
        let mut body = wire::begin_stream(writer, SIGNATURE_MAGIC, compression)?;
        wire::write_frame(&mut body, container)?;
        Ok(Self { body, blocks: 0 })
    }

    pub fn write_block(&mut self, block: &BlockHash) -> Result<(), DeltaError> {
        wire::write_frame(&mut self.body, block)?;
        self.blocks += 1;
        Ok(())
    }

    pub fn blocks_written(&self) -> u64 {
        self.blocks
    }

    /// Terminates the compressed body and returns the underlying writer.
    pub fn finish(self) -> Result<W, DeltaError> {
        self.body.finish()
    }
}

/// Hashes every file of `container`, in file-index order.
pub fn compute_signature(
    container: &Container,
    pool: &mut dyn FilePool,
) -> Result<Vec<BlockHash>, DeltaError> {
    let mut blocks = Vec::new();
    let mut chunk = vec![0u8; BLOCK_SIZE];

    for file_index in 0..container.file_count() {
        let mut hasher = BlockHasher::new(file_index as u32);
        let mut reader = pool.open(file_index)?;
        loop {
            let n = reader.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            hasher.update(&chunk[..n], &mut blocks);
        }
        hasher.finish(&mut blocks);
    }

    Ok(blocks)
}

/// Decodes a signature stream into its container and block hashes.
pub fn read_signature<R: Read>(reader: R) -> Result<(Container, Vec<BlockHash>), DeltaError> {
    let mut body = wire::open_stream(reader, SIGNATURE_MAGIC)?;
    let container: Container = wire::read_frame(&mut body)?
        .ok_or_else(|| DeltaError::Format("signature has no container".into()))?;

    let mut blocks = Vec::new();
    while let Some(block) = wire::read_frame::<_, BlockHash>(&mut body)? {
        blocks.push(block);
    }
    Ok((container, blocks))
}
