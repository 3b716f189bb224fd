mod chunk;
mod condense;
mod todo;

pub use chunk::{max_chunk_bytes, ChunkError, TranscriptFormat, DEFAULT_MAX_CHUNK_BYTES};
pub use condense::{decode_condensed, encode_condensed, CondensedEntry, EntryKind};
pub use todo::current_todo;
