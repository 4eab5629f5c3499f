//! Splitting a byte stream into bounded chunks, and putting it back together.
//!
//! The write side pulls from any `AsyncRead` and yields buffers of exactly
//! `chunk_size` bytes, except for a shorter final one. The read side walks
//! chunk indices `0..chunk_count` against an `ObjectStore`, one fetch at a
//! time, and yields each chunk as soon as it arrives.

use crate::{
    models::{
        chunk::{chunk_count, expected_chunk_len},
        object::ObjectId,
    },
    services::{object_store::ObjectStore, transfer_service::TransferError},
};
use bytes::{Bytes, BytesMut};
use futures::{
    StreamExt,
    stream::{self, BoxStream},
};
use std::{io, sync::Arc};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Write-side splitter over an async byte source.
pub struct ChunkSplitter<R> {
    reader: R,
    chunk_size: usize,
    eof: bool,
}

impl<R: AsyncRead + Unpin> ChunkSplitter<R> {
    pub fn new(reader: R, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be positive");
        Self {
            reader,
            chunk_size,
            eof: false,
        }
    }

    /// The underlying source, for reads past what the splitter consumed.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Accumulate the next chunk.
    ///
    /// Reads until `chunk_size` bytes are buffered or the source is exhausted.
    /// Returns `None` once the source is exhausted and nothing is buffered, so
    /// an input whose length is a multiple of `chunk_size` never yields an
    /// empty trailing chunk.
    pub async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        if self.eof {
            return Ok(None);
        }

        let mut buf = BytesMut::with_capacity(self.chunk_size);
        while buf.len() < self.chunk_size {
            let remaining = (self.chunk_size - buf.len()) as u64;
            let n = (&mut self.reader).take(remaining).read_buf(&mut buf).await?;
            if n == 0 {
                self.eof = true;
                break;
            }
        }

        if buf.is_empty() {
            Ok(None)
        } else {
            Ok(Some(buf.freeze()))
        }
    }
}

/// Object bytes in chunk order, as handed to the response body.
pub type ChunkStream = BoxStream<'static, Result<Bytes, TransferError>>;

/// Read-side assembler: stream the chunks of an object of `content_length`
/// bytes in index order.
///
/// A missing chunk or a chunk whose size disagrees with `content_length` ends
/// the stream with an error after every earlier chunk has been yielded.
pub fn assemble_chunks(
    store: Arc<dyn ObjectStore>,
    id: ObjectId,
    content_length: u64,
    chunk_size: usize,
) -> ChunkStream {
    let count = chunk_count(content_length, chunk_size);

    stream::try_unfold(0u64, move |num| {
        let store = store.clone();
        let id = id.clone();
        async move {
            if num >= count {
                return Ok(None);
            }

            let data = store
                .get_chunk(&id, num)
                .await
                .map_err(TransferError::from_chunk_read)?;

            let expected = expected_chunk_len(content_length, num, chunk_size).unwrap_or(0);
            if data.len() != expected {
                return Err(TransferError::ChunkSizeMismatch {
                    id: id.clone(),
                    num,
                    expected,
                    actual: data.len(),
                });
            }

            debug!("transfer chunk {}::{} len {}", id, num, data.len());
            Ok(Some((data, num + 1)))
        }
    })
    .boxed()
}
