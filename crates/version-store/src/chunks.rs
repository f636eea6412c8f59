//! Fixed-size zlib chunks for stored payloads.

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};

/// Split `content` into `chunk_size` slices and compress each one.
///
/// Empty content still yields one (empty) chunk so every version has at
/// least one chunk file.
pub(crate) fn encode_chunks(content: &[u8], chunk_size: usize) -> io::Result<Vec<Vec<u8>>> {
    if content.is_empty() {
        return Ok(vec![compress(&[])?]);
    }
    content.chunks(chunk_size.max(1)).map(compress).collect()
}

/// Decompress and concatenate chunks, refusing to grow past `expected_len`.
pub(crate) fn decode_chunks<I>(chunks: I, expected_len: u64) -> io::Result<Vec<u8>>
where
    I: IntoIterator<Item = Vec<u8>>,
{
    let mut out = Vec::with_capacity(usize::try_from(expected_len).unwrap_or(0));
    for chunk in chunks {
        let remaining = expected_len.saturating_sub(out.len() as u64);
        ZlibDecoder::new(chunk.as_slice())
            .take(remaining.saturating_add(1))
            .read_to_end(&mut out)?;
        if out.len() as u64 > expected_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("chunks decode past the recorded size of {expected_len} bytes"),
            ));
        }
    }
    if out.len() as u64 != expected_len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "chunks decode to {} bytes, expected {expected_len}",
                out.len()
            ),
        ));
    }
    Ok(out)
}

fn compress(bytes: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}
