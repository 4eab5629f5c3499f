//! Represents one bounded-size slice of an object's bytes.

use sqlx::FromRow;

/// Upper bound on the size of a single chunk row (8 MiB).
pub const CHUNK_MAX_SIZE: usize = 8 * 1024 * 1024;

/// One row of the `chunks` table, addressed by `(bucket, name, num)`.
#[derive(Clone, FromRow, Debug)]
pub struct Chunk {
    /// Zero-based position of the chunk within its object.
    pub num: i64,

    pub data: Vec<u8>,
}

/// Number of chunks needed to hold `content_length` bytes.
pub fn chunk_count(content_length: u64, chunk_size: usize) -> u64 {
    content_length.div_ceil(chunk_size as u64)
}

/// Length the chunk at `num` must have for an object of `content_length` bytes.
///
/// Returns `None` when `num` is past the end of the object.
pub fn expected_chunk_len(content_length: u64, num: u64, chunk_size: usize) -> Option<usize> {
    let start = num.checked_mul(chunk_size as u64)?;
    if start >= content_length {
        return None;
    }
    Some((content_length - start).min(chunk_size as u64) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_count_rounds_up() {
        assert_eq!(chunk_count(0, CHUNK_MAX_SIZE), 0);
        assert_eq!(chunk_count(1, CHUNK_MAX_SIZE), 1);
        assert_eq!(chunk_count(CHUNK_MAX_SIZE as u64, CHUNK_MAX_SIZE), 1);
        assert_eq!(chunk_count(CHUNK_MAX_SIZE as u64 + 1, CHUNK_MAX_SIZE), 2);
        assert_eq!(chunk_count(10, 4), 3);
    }

    #[test]
    fn last_chunk_is_full_on_exact_multiple() {
        assert_eq!(expected_chunk_len(8, 0, 4), Some(4));
        assert_eq!(expected_chunk_len(8, 1, 4), Some(4));
        assert_eq!(expected_chunk_len(8, 2, 4), None);
        assert_eq!(expected_chunk_len(9, 2, 4), Some(1));
        assert_eq!(expected_chunk_len(0, 0, 4), None);
    }
}
