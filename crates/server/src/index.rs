// crates/server/src/index.rs
//! The chunk index and its text utilities.
//!
//! Chunks live as JSONL records under `<data_dir>/index/chunks.jsonl`; the
//! preprocess_embed and reindex tasks append to or rebuild that file. The
//! embedder is the feature-hashing kind: deterministic, dependency-free, and
//! call-compatible with a model-backed replacement.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;

/// Dimensionality of hashed chunk vectors.
pub const EMBEDDING_DIM: usize = 64;

/// Collection name reported in job results.
pub const COLLECTION_NAME: &str = "ragpipe_chunks";

/// One embedded chunk, one JSONL line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub doc_id: String,
    pub seq: usize,
    pub text: String,
    pub vector: Vec<f32>,
    pub meta: Map<String, Value>,
}

/// Append-only JSONL chunk store.
pub struct ChunkIndex {
    path: PathBuf,
}

impl ChunkIndex {
    pub fn new(data_dir: &std::path::Path) -> Self {
        Self {
            path: data_dir.join("index").join("chunks.jsonl"),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Append records, creating the index file on first use.
    pub fn append(&self, records: &[ChunkRecord]) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        for record in records {
            let line = serde_json::to_string(record)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            writeln!(file, "{line}")?;
        }
        Ok(())
    }

    /// Drop every record. The next append starts a fresh file.
    pub fn clear(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn count(&self) -> io::Result<usize> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };
        Ok(BufReader::new(file).lines().count())
    }
}

/// Hash a chunk of text into a fixed-dimension, L2-normalized vector.
pub fn embed(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; EMBEDDING_DIM];
    for token in text.split(|c: char| !c.is_alphanumeric()) {
        if token.is_empty() {
            continue;
        }
        let bucket = (fnv1a64(token.to_lowercase().as_bytes()) % EMBEDDING_DIM as u64) as usize;
        vector[bucket] += 1.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Strip HTML tags and collapse whitespace runs.
pub fn strip_tags(html: &str) -> String {
    // regex-lite has no compile-time regexes; this pattern cannot fail.
    let tags = Regex::new(r"<[^>]+>").expect("valid tag pattern");
    let stripped = tags.replace_all(html, " ");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split text into overlapping chunks of at most `size` characters.
///
/// `overlap` is clamped below `size` so the window always advances. Slicing
/// is done on char boundaries, not bytes.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let size = size.max(1);
    let overlap = overlap.min(size - 1);
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }

    let step = size - overlap;
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_embed_is_deterministic_and_normalized() {
        let a = embed("debt collection procedures in small claims court");
        let b = embed("debt collection procedures in small claims court");
        assert_eq!(a, b);
        assert_eq!(a.len(), EMBEDDING_DIM);

        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_embed_empty_text_is_zero_vector() {
        let vector = embed("   ");
        assert!(vector.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_strip_tags() {
        let html = "<div class=\"post\"><h1>Title</h1>\n<p>Body   text</p></div>";
        assert_eq!(strip_tags(html), "Title Body text");
    }

    #[test]
    fn test_chunk_text_respects_size_and_overlap() {
        let text = "abcdefghij"; // 10 chars
        let chunks = chunk_text(text, 4, 2);
        assert_eq!(chunks, vec!["abcd", "cdef", "efgh", "ghij"]);
    }

    #[test]
    fn test_chunk_text_handles_multibyte() {
        let text = "가나다라마바사";
        let chunks = chunk_text(text, 3, 1);
        assert_eq!(chunks[0], "가나다");
        assert!(chunks.iter().all(|c| c.chars().count() <= 3));
    }

    #[test]
    fn test_chunk_text_empty() {
        assert!(chunk_text("", 100, 10).is_empty());
    }

    #[test]
    fn test_index_append_count_clear() {
        let dir = tempfile::tempdir().unwrap();
        let index = ChunkIndex::new(dir.path());
        assert_eq!(index.count().unwrap(), 0);

        let record = ChunkRecord {
            id: "doc1:0".to_string(),
            doc_id: "doc1".to_string(),
            seq: 0,
            text: "hello".to_string(),
            vector: embed("hello"),
            meta: Map::new(),
        };
        index.append(&[record.clone(), record]).unwrap();
        assert_eq!(index.count().unwrap(), 2);

        index.clear().unwrap();
        assert_eq!(index.count().unwrap(), 0);
        // Clearing an absent file is fine too.
        index.clear().unwrap();
    }
}
