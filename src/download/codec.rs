//! Chunk payload codecs
//!
//! Chunks are stored on the CDN either raw or LZ4-compressed with the
//! uncompressed length prepended.

use crate::depot::ChunkCodec;
use bytes::Bytes;

/// Compress data using the specified codec
pub fn compress(data: &[u8], codec: ChunkCodec) -> Bytes {
    match codec {
        ChunkCodec::None => Bytes::copy_from_slice(data),
        ChunkCodec::Lz4 => Bytes::from(lz4_flex::compress_prepend_size(data)),
    }
}

/// Decode a chunk payload. Raw payloads are returned without copying.
pub fn decompress(data: Bytes, codec: ChunkCodec) -> Result<Bytes, CodecError> {
    match codec {
        ChunkCodec::None => Ok(data),
        ChunkCodec::Lz4 => {
            let decompressed = lz4_flex::decompress_size_prepended(&data)
                .map_err(|e| CodecError::DecompressionFailed(e.to_string()))?;
            Ok(Bytes::from(decompressed))
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Decompression failed: {0}")]
    DecompressionFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_passthrough() {
        let data = Bytes::from_static(b"Hello, World!");
        let decoded = decompress(data.clone(), ChunkCodec::None).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_lz4_chunk() {
        let data: Vec<u8> = (0..10000).map(|i| (i % 256) as u8).collect();

        let compressed = compress(&data, ChunkCodec::Lz4);
        assert!(compressed.len() < data.len());

        let decompressed = decompress(compressed, ChunkCodec::Lz4).unwrap();
        assert_eq!(&decompressed[..], &data[..]);
    }

    #[test]
    fn test_lz4_garbage_rejected() {
        let garbage = Bytes::from_static(&[0xff, 0xff, 0xff, 0x7f, 1, 2, 3]);
        assert!(decompress(garbage, ChunkCodec::Lz4).is_err());
    }
}
