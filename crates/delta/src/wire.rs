//! Stream framing shared by patches and signatures.
//!
//! ```text
//! magic: u32 LE
//! header frame (uncompressed): StreamHeader
//! body (compressed per header): frame*
//! frame: u32 LE length | bincode payload
//! ```

use std::io::{self, BufReader, Read, Write};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::DeltaError;

/// Magic number opening a patch stream (`BPPT`).
pub const PATCH_MAGIC: u32 = u32::from_le_bytes(*b"BPPT");

/// Magic number opening a signature stream (`BPSG`).
pub const SIGNATURE_MAGIC: u32 = u32::from_le_bytes(*b"BPSG");

/// Upper bound for a single frame, to fail fast on corrupt input.
const MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// Compression algorithm for stream bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionAlgorithm {
    None,
    Zstd,
}

/// Compression policy for patch and signature bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionSettings {
    pub algorithm: CompressionAlgorithm,
    pub quality: i32,
}

impl Default for CompressionSettings {
    /// Fast and light: pushes are usually bound by upload bandwidth, and
    /// the service recompresses builds after processing.
    fn default() -> Self {
        Self {
            algorithm: CompressionAlgorithm::Zstd,
            quality: 1,
        }
    }
}

impl CompressionSettings {
    pub fn none() -> Self {
        Self {
            algorithm: CompressionAlgorithm::None,
            quality: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StreamHeader {
    compression: CompressionSettings,
}

/// Writes one length-prefixed bincode frame.
pub(crate) fn write_frame<W: Write, T: Serialize>(w: &mut W, value: &T) -> Result<(), DeltaError> {
    let payload = bincode::serialize(value)?;
    w.write_all(&(payload.len() as u32).to_le_bytes())?;
    w.write_all(&payload)?;
    Ok(())
}

/// Reads one frame; `None` on a clean end of stream.
pub(crate) fn read_frame<R: Read, T: DeserializeOwned>(r: &mut R) -> Result<Option<T>, DeltaError> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        let n = r.read(&mut len_buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(DeltaError::Format("truncated frame length".into()));
        }
        filled += n;
    }

    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_SIZE {
        return Err(DeltaError::Format(format!("frame too large: {len} bytes")));
    }

    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => DeltaError::Format("truncated frame".into()),
        _ => DeltaError::Io(e),
    })?;
    Ok(Some(bincode::deserialize(&payload)?))
}

/// Writes magic + header and returns the body writer.
pub(crate) fn begin_stream<W: Write>(
    mut w: W,
    magic: u32,
    compression: CompressionSettings,
) -> Result<Compressor<W>, DeltaError> {
    w.write_all(&magic.to_le_bytes())?;
    write_frame(&mut w, &StreamHeader { compression })?;
    Compressor::new(w, compression)
}

/// Checks magic + header and returns the body reader.
pub(crate) fn open_stream<R: Read>(mut r: R, magic: u32) -> Result<Decompressor<R>, DeltaError> {
    let mut magic_buf = [0u8; 4];
    r.read_exact(&mut magic_buf)
        .map_err(|_| DeltaError::Format("missing magic".into()))?;
    if u32::from_le_bytes(magic_buf) != magic {
        return Err(DeltaError::Format("wrong magic".into()));
    }

    let header: StreamHeader =
        read_frame(&mut r)?.ok_or_else(|| DeltaError::Format("missing header".into()))?;
    Decompressor::new(r, header.compression)
}

pub(crate) enum Compressor<W: Write> {
    Plain(W),
    Zstd(zstd::Encoder<'static, W>),
}

impl<W: Write> Compressor<W> {
    fn new(w: W, compression: CompressionSettings) -> Result<Self, DeltaError> {
        Ok(match compression.algorithm {
            CompressionAlgorithm::None => Self::Plain(w),
            CompressionAlgorithm::Zstd => Self::Zstd(zstd::Encoder::new(w, compression.quality)?),
        })
    }

    /// Flushes the compressed body and returns the underlying writer.
    pub(crate) fn finish(self) -> Result<W, DeltaError> {
        let mut w = match self {
            Self::Plain(w) => w,
            Self::Zstd(encoder) => encoder.finish()?,
        };
        w.flush()?;
        Ok(w)
    }
}

impl<W: Write> Write for Compressor<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(w) => w.write(buf),
            Self::Zstd(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(w) => w.flush(),
            Self::Zstd(e) => e.flush(),
        }
    }
}

pub(crate) enum Decompressor<R: Read> {
    Plain(R),
    Zstd(zstd::Decoder<'static, BufReader<R>>),
}

impl<R: Read> Decompressor<R> {
    fn new(r: R, compression: CompressionSettings) -> Result<Self, DeltaError> {
        Ok(match compression.algorithm {
            CompressionAlgorithm::None => Self::Plain(r),
            CompressionAlgorithm::Zstd => Self::Zstd(zstd::Decoder::new(r)?),
        })
    }
}

impl<R: Read> Read for Decompressor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(r) => r.read(buf),
            Self::Zstd(d) => d.read(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_values_differ() {
        assert_ne!(PATCH_MAGIC, SIGNATURE_MAGIC);
        assert_eq!(&PATCH_MAGIC.to_le_bytes(), b"BPPT");
    }

    #[test]
    fn stream_header_is_checked() {
        for compression in [CompressionSettings::default(), CompressionSettings::none()] {
            let mut body = begin_stream(Vec::new(), PATCH_MAGIC, compression).unwrap();
            write_frame(&mut body, &"payload".to_string()).unwrap();
            let bytes = body.finish().unwrap();

            let mut reader = open_stream(bytes.as_slice(), PATCH_MAGIC).unwrap();
            let value: Option<String> = read_frame(&mut reader).unwrap();
            assert_eq!(value.as_deref(), Some("payload"));
            assert!(read_frame::<_, String>(&mut reader).unwrap().is_none());

            assert!(open_stream(bytes.as_slice(), SIGNATURE_MAGIC).is_err());
        }
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &vec![1u8; 32]).unwrap();
        buf.truncate(buf.len() - 4);
        let result = read_frame::<_, Vec<u8>>(&mut buf.as_slice());
        assert!(matches!(result, Err(DeltaError::Format(_))));
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let buf = u32::MAX.to_le_bytes();
        let result = read_frame::<_, Vec<u8>>(&mut buf.as_slice());
        assert!(matches!(result, Err(DeltaError::Format(_))));
    }
}
