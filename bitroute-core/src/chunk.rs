//! Chunking policy: chunk size tiered by file size.

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

/// Largest chunk the policy ever selects.
pub const MAX_CHUNK_SIZE: u64 = 2 * MIB;

/// Chunk size for a file of `file_size` bytes. Larger files use larger chunks.
pub fn chunk_size_for(file_size: u64) -> u64 {
    if file_size < MIB {
        64 * KIB
    } else if file_size < 10 * MIB {
        256 * KIB
    } else if file_size < 100 * MIB {
        MIB
    } else {
        MAX_CHUNK_SIZE
    }
}
