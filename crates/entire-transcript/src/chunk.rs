//! Size-bounded, lossless splitting of agent transcripts.
//!
//! Checkpoint transcripts are stored as git blobs, and a single blob past a
//! few tens of megabytes is rejected by most hosts. Each transcript format
//! splits only on its own record boundaries, so every chunk stays parseable
//! and reassembly restores the original bytes.

use std::collections::HashMap;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;

/// Default upper bound for a single chunk (50 MiB).
pub const DEFAULT_MAX_CHUNK_BYTES: usize = 50 * 1024 * 1024;

/// Chunk size bound, allowing `ENTIRE_MAX_CHUNK_BYTES` env override.
pub fn max_chunk_bytes() -> usize {
    std::env::var("ENTIRE_MAX_CHUNK_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_MAX_CHUNK_BYTES)
}

#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("record {index} is {size} bytes, larger than the {max}-byte chunk limit")]
    RecordTooLarge { index: usize, size: usize, max: usize },
    #[error("transcript envelope alone exceeds the {max}-byte chunk limit")]
    EnvelopeTooLarge { max: usize },
    #[error("max chunk size must be positive")]
    ZeroMaxSize,
    #[error("transcript is not a JSON object")]
    NotAnObject,
    #[error("transcript is not valid UTF-8")]
    NotUtf8,
    #[error("chunk {index} does not share the transcript envelope of its siblings")]
    EnvelopeMismatch { index: usize },
    #[error("transcript has no {0:?} message array")]
    MissingMessages(String),
    #[error("invalid transcript JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// The closed set of transcript shapes agents produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TranscriptFormat {
    /// One JSON record per line.
    Jsonl,
    /// A JSON object whose `messages_field` holds an array of messages.
    MessageArray { messages_field: String },
}

impl TranscriptFormat {
    pub fn message_array(field: impl Into<String>) -> Self {
        TranscriptFormat::MessageArray {
            messages_field: field.into(),
        }
    }

    /// Stable label stored in checkpoint metadata.
    pub fn label(&self) -> String {
        match self {
            TranscriptFormat::Jsonl => "jsonl".to_string(),
            TranscriptFormat::MessageArray { messages_field } => {
                format!("message-array:{messages_field}")
            }
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "jsonl" => Some(TranscriptFormat::Jsonl),
            _ => label
                .strip_prefix("message-array:")
                .filter(|f| !f.is_empty())
                .map(TranscriptFormat::message_array),
        }
    }

    /// Base file name of the first chunk on the metadata ref.
    pub fn file_name(&self) -> &'static str {
        match self {
            TranscriptFormat::Jsonl => "full.jsonl",
            TranscriptFormat::MessageArray { .. } => "full.json",
        }
    }

    /// Split `content` into chunks of at most `max_size` bytes each.
    pub fn chunk(&self, content: &[u8], max_size: usize) -> Result<Vec<Vec<u8>>, ChunkError> {
        if max_size == 0 {
            return Err(ChunkError::ZeroMaxSize);
        }
        if content.is_empty() {
            return Ok(Vec::new());
        }
        if content.len() <= max_size {
            return Ok(vec![content.to_vec()]);
        }
        match self {
            TranscriptFormat::Jsonl => chunk_lines(content, max_size),
            TranscriptFormat::MessageArray { messages_field } => {
                chunk_messages(content, max_size, messages_field)
            }
        }
    }

    /// Inverse of [`chunk`](Self::chunk). Chunks must be in order.
    pub fn reassemble(&self, chunks: &[Vec<u8>]) -> Result<Vec<u8>, ChunkError> {
        match chunks {
            [] => Ok(Vec::new()),
            [only] => Ok(only.clone()),
            _ => match self {
                TranscriptFormat::Jsonl => Ok(chunks.join(&b'\n')),
                TranscriptFormat::MessageArray { messages_field } => {
                    merge_messages(chunks, messages_field)
                }
            },
        }
    }

    /// Number of records (lines or messages) in the transcript. This is the
    /// unit of the checkpoint watermark.
    pub fn position(&self, content: &[u8]) -> Result<usize, ChunkError> {
        match self {
            TranscriptFormat::Jsonl => Ok(count_lines(content)),
            TranscriptFormat::MessageArray { messages_field } => {
                if content.iter().all(|b| b.is_ascii_whitespace()) {
                    return Ok(0);
                }
                let value: Value = serde_json::from_slice(content)?;
                Ok(messages_of(&value, messages_field)?.len())
            }
        }
    }

    /// Parsed records from `start` onward, each paired with its position.
    /// Unparseable lines in line-delimited transcripts are skipped but still
    /// occupy a position, so offsets stay aligned with the raw file.
    pub fn records_from(
        &self,
        content: &[u8],
        start: usize,
    ) -> Result<Vec<(usize, Value)>, ChunkError> {
        match self {
            TranscriptFormat::Jsonl => Ok(lines(content)
                .enumerate()
                .skip(start)
                .filter_map(|(i, line)| {
                    serde_json::from_slice::<Value>(line).ok().map(|v| (i, v))
                })
                .collect()),
            TranscriptFormat::MessageArray { messages_field } => {
                if content.iter().all(|b| b.is_ascii_whitespace()) {
                    return Ok(Vec::new());
                }
                let value: Value = serde_json::from_slice(content)?;
                Ok(messages_of(&value, messages_field)?
                    .iter()
                    .enumerate()
                    .skip(start)
                    .map(|(i, m)| (i, m.clone()))
                    .collect())
            }
        }
    }
}

/// Logical lines: a trailing newline does not start an extra record.
fn lines(content: &[u8]) -> impl Iterator<Item = &[u8]> {
    let trimmed = content.strip_suffix(b"\n").unwrap_or(content);
    let empty = content.is_empty();
    trimmed
        .split(|&b| b == b'\n')
        .filter(move |_| !empty)
}

fn count_lines(content: &[u8]) -> usize {
    lines(content).count()
}

fn chunk_lines(content: &[u8], max_size: usize) -> Result<Vec<Vec<u8>>, ChunkError> {
    let mut chunks = Vec::new();
    let mut current: Vec<u8> = Vec::new();
    let mut open = false;

    // Splitting on every newline (keeping the empty piece after a trailing
    // newline) makes `join("\n")` the exact inverse.
    for (index, line) in content.split(|&b| b == b'\n').enumerate() {
        if line.len() > max_size {
            return Err(ChunkError::RecordTooLarge {
                index,
                size: line.len(),
                max: max_size,
            });
        }
        if open && current.len() + 1 + line.len() > max_size {
            chunks.push(std::mem::take(&mut current));
            open = false;
        }
        if open {
            current.push(b'\n');
        }
        current.extend_from_slice(line);
        open = true;
    }
    if open {
        chunks.push(current);
    }
    Ok(chunks)
}

fn messages_of<'a>(value: &'a Value, field: &str) -> Result<&'a Vec<Value>, ChunkError> {
    value
        .as_object()
        .ok_or(ChunkError::NotAnObject)?
        .get(field)
        .and_then(Value::as_array)
        .ok_or_else(|| ChunkError::MissingMessages(field.to_string()))
}

/// Byte range of every element of the `field` array, located in the
/// original text so chunks can be cut without re-serializing anything.
fn message_spans(content: &[u8], field: &str) -> Result<Vec<Range<usize>>, ChunkError> {
    let text = std::str::from_utf8(content).map_err(|_| ChunkError::NotUtf8)?;
    let object: HashMap<String, &RawValue> = serde_json::from_str(text)?;
    let raw = object
        .get(field)
        .ok_or_else(|| ChunkError::MissingMessages(field.to_string()))?;
    let messages: Vec<&RawValue> = serde_json::from_str(raw.get())
        .map_err(|_| ChunkError::MissingMessages(field.to_string()))?;
    Ok(messages
        .iter()
        .map(|m| {
            let start = offset_in(text, m.get());
            start..start + m.get().len()
        })
        .collect())
}

/// Offset of `inner` within `outer`; `inner` must borrow from `outer`.
fn offset_in(outer: &str, inner: &str) -> usize {
    inner.as_ptr() as usize - outer.as_ptr() as usize
}

/// Every chunk is `prefix + body + suffix`, where prefix and suffix are the
/// original bytes around the message array. A split happens at the comma
/// between two messages: whitespace before it stays with the left chunk,
/// whitespace after it with the right one, and the comma is dropped.
fn chunk_messages(
    content: &[u8],
    max_size: usize,
    field: &str,
) -> Result<Vec<Vec<u8>>, ChunkError> {
    let spans = message_spans(content, field)?;
    let (Some(first), Some(last)) = (spans.first(), spans.last()) else {
        return Err(ChunkError::EnvelopeTooLarge { max: max_size });
    };
    let prefix = &content[..first.start];
    let suffix = &content[last.end..];
    let overhead = prefix.len() + suffix.len();
    if overhead > max_size {
        return Err(ChunkError::EnvelopeTooLarge { max: max_size });
    }

    let mut commas = Vec::with_capacity(spans.len() - 1);
    for pair in spans.windows(2) {
        let gap = &content[pair[0].end..pair[1].start];
        let comma = gap
            .iter()
            .position(|&b| b == b',')
            .ok_or_else(|| ChunkError::MissingMessages(field.to_string()))?;
        commas.push(pair[0].end + comma);
    }
    let n = spans.len();
    let lo = |i: usize| if i == 0 { spans[0].start } else { commas[i - 1] + 1 };
    let hi = |i: usize| if i + 1 == n { spans[n - 1].end } else { commas[i] };
    let frame = |body: &[u8]| [prefix, body, suffix].concat();

    let mut chunks = Vec::new();
    let mut start = 0;
    for index in 0..n {
        let size = hi(index) - lo(index);
        if overhead + size > max_size {
            return Err(ChunkError::RecordTooLarge {
                index,
                size,
                max: max_size,
            });
        }
        if index > start && overhead + hi(index) - lo(start) > max_size {
            chunks.push(frame(&content[lo(start)..hi(index - 1)]));
            start = index;
        }
    }
    chunks.push(frame(&content[lo(start)..hi(n - 1)]));
    Ok(chunks)
}

/// Inverse of [`chunk_messages`]: strip the shared prefix and suffix from
/// every chunk and join the bodies with the commas the split removed.
fn merge_messages(chunks: &[Vec<u8>], field: &str) -> Result<Vec<u8>, ChunkError> {
    let (Some(head), Some(tail)) = (chunks.first(), chunks.last()) else {
        return Ok(Vec::new());
    };
    let prefix_len = message_spans(head, field)?
        .first()
        .map(|s| s.start)
        .ok_or(ChunkError::EnvelopeMismatch { index: 0 })?;
    let suffix_start = message_spans(tail, field)?
        .last()
        .map(|s| s.end)
        .ok_or(ChunkError::EnvelopeMismatch {
            index: chunks.len() - 1,
        })?;
    let prefix = &head[..prefix_len];
    let suffix = &tail[suffix_start..];

    let mut out = prefix.to_vec();
    for (index, chunk) in chunks.iter().enumerate() {
        if chunk.len() < prefix.len() + suffix.len()
            || !chunk.starts_with(prefix)
            || !chunk.ends_with(suffix)
        {
            return Err(ChunkError::EnvelopeMismatch { index });
        }
        if index > 0 {
            out.push(b',');
        }
        out.extend_from_slice(&chunk[prefix.len()..chunk.len() - suffix.len()]);
    }
    out.extend_from_slice(suffix);
    Ok(out)
}
