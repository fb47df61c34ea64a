//! Stream draining: collect a chunked response body into one buffer.
//!
//! Chunks are pulled one per iteration and kept in arrival order. Once the
//! stream is exhausted a single buffer of the cumulative length is allocated
//! and every chunk is copied in at its offset, so the result is byte-identical
//! to the in-order concatenation. The first stream error aborts the drain and
//! nothing partial is returned.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tracing::debug;

/// Drain `stream` to completion.
pub async fn drain_stream<S, E>(mut stream: S) -> Result<Bytes, E>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut total = 0usize;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        total += chunk.len();
        chunks.push(chunk);
    }

    debug!("drain: {} chunks, {} bytes", chunks.len(), total);
    Ok(concat_chunks(&chunks, total))
}

/// Copy `chunks` into one buffer of `total` bytes.
///
/// `total` must equal the summed chunk lengths.
fn concat_chunks(chunks: &[Bytes], total: usize) -> Bytes {
    let mut buf = vec![0u8; total];
    let mut offset = 0;
    for chunk in chunks {
        buf[offset..offset + chunk.len()].copy_from_slice(chunk);
        offset += chunk.len();
    }
    debug_assert_eq!(offset, total);
    Bytes::from(buf)
}
