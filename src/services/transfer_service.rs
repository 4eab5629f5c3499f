//! src/services/transfer_service.rs
//!
//! TransferService drives one PUT or one GET against an `ObjectStore`.
//!
//! A PUT writes the metadata row first, then appends chunk rows in index
//! order as the body is consumed. A GET reads the metadata row and hands back
//! a lazily evaluated chunk stream. Neither path rolls back rows that were
//! already committed when a later step fails.

use crate::{
    models::{
        chunk::{CHUNK_MAX_SIZE, chunk_count},
        object::{InvalidObjectId, ObjectId, ObjectMeta},
    },
    services::{
        chunker::{ChunkSplitter, ChunkStream, assemble_chunks},
        object_store::{ObjectStore, StoreError},
    },
};
use std::{collections::BTreeMap, io, sync::Arc, time::Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    MalformedPath(#[from] InvalidObjectId),
    #[error("missing header Content-Length")]
    MissingContentLength,
    #[error("invalid Content-Length `{0}`")]
    InvalidContentLength(String),
    #[error("object `{0}` already exists")]
    Conflict(ObjectId),
    #[error("object `{0}` not found")]
    NotFound(ObjectId),
    #[error("body length {received} does not match Content-Length {declared}")]
    LengthMismatch { declared: u64, received: u64 },
    #[error("object `{id}` is missing chunk {num}")]
    MissingChunk { id: ObjectId, num: u64 },
    #[error("chunk {num} of object `{id}` holds {actual} bytes, expected {expected}")]
    ChunkSizeMismatch {
        id: ObjectId,
        num: u64,
        expected: usize,
        actual: usize,
    },
    #[error(transparent)]
    Store(StoreError),
    #[error("reading request body: {0}")]
    Body(#[from] io::Error),
}

impl From<StoreError> for TransferError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ObjectNotFound(id) => TransferError::NotFound(id),
            StoreError::ObjectExists(id) => TransferError::Conflict(id),
            other => TransferError::Store(other),
        }
    }
}

impl TransferError {
    /// Classify a failed chunk fetch. An absent chunk row under an existing
    /// object is a protocol violation, never a plain not-found.
    pub fn from_chunk_read(err: StoreError) -> Self {
        match err {
            StoreError::ChunkNotFound { id, num } => TransferError::MissingChunk { id, num },
            other => TransferError::Store(other),
        }
    }
}

pub type TransferResult<T> = Result<T, TransferError>;

/// Shared entry point for object transfers.
///
/// Holds the process-wide store handle; cloning shares it.
#[derive(Clone)]
pub struct TransferService {
    store: Arc<dyn ObjectStore>,
    chunk_size: usize,
}

impl TransferService {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self::with_chunk_size(store, CHUNK_MAX_SIZE)
    }

    pub fn with_chunk_size(store: Arc<dyn ObjectStore>, chunk_size: usize) -> Self {
        Self { store, chunk_size }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Store a new object read from `body` and return the number of chunks
    /// written.
    ///
    /// At most `content_length` bytes are split into chunks. A body that
    /// carries more is a `LengthMismatch` detected before its last declared
    /// chunk is written.
    ///
    /// The existence check and the metadata insert are separate operations;
    /// a concurrent PUT of the same identity that passes the check loses at
    /// the insert and is reported as `Conflict` as well.
    pub async fn put_object<R>(
        &self,
        id: &ObjectId,
        content_length: u64,
        metadata: BTreeMap<String, String>,
        body: R,
    ) -> TransferResult<u64>
    where
        R: AsyncRead + Unpin + Send,
    {
        if self.store.object_exists(id).await? {
            return Err(TransferError::Conflict(id.clone()));
        }

        let started = Instant::now();
        let expected_chunks = chunk_count(content_length, self.chunk_size);
        info!(
            "put begin {} with length {} (chunks {})",
            id, content_length, expected_chunks
        );

        let mut splitter = ChunkSplitter::new(body.take(content_length), self.chunk_size);
        if content_length == 0 {
            // No chunk to hold back, so check before the metadata row exists.
            reject_trailing_bytes(splitter.get_mut().get_mut(), content_length).await?;
        }

        self.store
            .put_object_meta(id, content_length, &metadata)
            .await?;

        let mut num = 0u64;
        let mut received = 0u64;
        while let Some(chunk) = splitter.next_chunk().await? {
            received += chunk.len() as u64;
            if received == content_length {
                reject_trailing_bytes(splitter.get_mut().get_mut(), content_length).await?;
            }
            debug!("store chunk {}::{} ({} bytes)", id, num, chunk.len());
            self.store.put_chunk(id, num, &chunk).await?;
            num += 1;
        }

        if received != content_length {
            return Err(TransferError::LengthMismatch {
                declared: content_length,
                received,
            });
        }

        info!(
            "put end {} with length {} (chunks {}), took {} msec",
            id,
            content_length,
            num,
            started.elapsed().as_millis()
        );
        Ok(num)
    }

    /// Look up an object and prepare its body stream.
    ///
    /// Nothing beyond the metadata row is read until the stream is polled.
    pub async fn get_object(
        &self,
        id: &ObjectId,
    ) -> TransferResult<(ObjectMeta, ChunkStream)> {
        let meta = self.store.get_object_meta(id).await?;
        let content_length = u64::try_from(meta.content_length).map_err(|_| {
            TransferError::Store(StoreError::LengthOutOfRange(meta.content_length as u64))
        })?;
        debug!(
            "get object {} with length {} (chunks {})",
            id,
            content_length,
            chunk_count(content_length, self.chunk_size)
        );

        let chunks = assemble_chunks(
            self.store.clone(),
            id.clone(),
            content_length,
            self.chunk_size,
        );
        Ok((meta, chunks))
    }
}

/// Fail if `body` still yields data once `declared` bytes were consumed.
async fn reject_trailing_bytes<R>(body: &mut R, declared: u64) -> TransferResult<()>
where
    R: AsyncRead + Unpin,
{
    let mut extra = [0u8; 1];
    let n = body.read(&mut extra).await?;
    if n > 0 {
        return Err(TransferError::LengthMismatch {
            declared,
            received: declared + n as u64,
        });
    }
    Ok(())
}
