// crates/server/src/tasks/pipeline.rs
//! The preprocess_embed task: raw documents → cleaned chunks → chunk index.
//!
//! Raw documents are JSON files under `<data_dir>/raw/`, each
//! `{"id"?, "title", "url", "html" | "text"}`. Cleaned chunk files land in
//! `<data_dir>/processed/` and embedded records are appended to the chunk
//! index. Progress moves through fixed stages: 0.2 after discovery, 0.5
//! after chunking, 0.8 after embedding, 1.0 at the end.

use ragpipe_jobs::{EventKind, Job};
use serde::Deserialize;
use serde_json::{json, Map};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use super::{TaskError, TaskResult};
use crate::index::{chunk_text, embed, strip_tags, ChunkIndex, ChunkRecord, COLLECTION_NAME};

const EMBED_BATCH: usize = 64;

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineParams {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize)]
struct RawDoc {
    id: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    html: Option<String>,
    text: Option<String>,
}

pub async fn run(job: Arc<Job>, data_dir: PathBuf, params: PipelineParams) -> TaskResult {
    job.push(
        EventKind::Info,
        "preprocess_embed started",
        json!({"chunk_size": params.chunk_size, "chunk_overlap": params.chunk_overlap}),
    );

    let raw_dir = data_dir.join("raw");
    let mut files = list_json_files(&raw_dir).map_err(|e| {
        TaskError::new(
            "NO_RAW_DATA",
            format!("{}: {e}", raw_dir.display()),
            "run a crawl (or drop raw documents into data/raw) first",
        )
    })?;
    files.sort();

    job.set_counter("found", files.len() as i64);
    job.set_progress(0.2);
    job.push(
        EventKind::Progress,
        format!("{} raw documents discovered", files.len()),
        json!({"documents": files.len()}),
    );

    // Stage 1: clean and chunk each document into processed/.
    let processed_dir = data_dir.join("processed");
    fs::create_dir_all(&processed_dir).map_err(|e| processed_write_error(&e))?;

    let mut chunked: Vec<(String, String, String, Vec<String>)> = Vec::new();
    for path in &files {
        let doc = match read_raw_doc(path) {
            Ok(doc) => doc,
            Err(message) => {
                job.incr_counter("failed", 1);
                job.add_error(
                    "DOC_PARSE_FAILED",
                    format!("{}: {message}", path.display()),
                    "fix or remove the malformed raw document",
                );
                continue;
            }
        };

        let doc_id = doc
            .id
            .clone()
            .unwrap_or_else(|| stem_of(path));
        let body = match (&doc.html, &doc.text) {
            (Some(html), _) => strip_tags(html),
            (None, Some(text)) => text.clone(),
            (None, None) => String::new(),
        };
        if body.trim().is_empty() {
            job.incr_counter("skipped", 1);
            continue;
        }

        let chunks = chunk_text(&body, params.chunk_size, params.chunk_overlap);
        let record = json!({
            "doc_id": doc_id,
            "title": doc.title,
            "url": doc.url,
            "chunks": chunks,
        });
        let out_path = processed_dir.join(format!("{doc_id}.json"));
        fs::write(&out_path, record.to_string()).map_err(|e| processed_write_error(&e))?;
        chunked.push((doc_id, doc.title, doc.url, chunks));
    }

    let chunks_created: usize = chunked.iter().map(|(_, _, _, chunks)| chunks.len()).sum();
    job.set_progress(0.5);
    job.push(
        EventKind::Progress,
        format!("{chunks_created} chunks created"),
        json!({"chunks": chunks_created}),
    );

    // Stage 2: embed and append to the chunk index in batches.
    let index = ChunkIndex::new(&data_dir);
    let mut batch: Vec<ChunkRecord> = Vec::with_capacity(EMBED_BATCH);
    let mut embeddings_added = 0usize;
    for (doc_id, title, url, chunks) in &chunked {
        for (seq, text) in chunks.iter().enumerate() {
            let mut meta = Map::new();
            meta.insert("title".to_string(), json!(title));
            meta.insert("url".to_string(), json!(url));
            batch.push(ChunkRecord {
                id: format!("{doc_id}:{seq}"),
                doc_id: doc_id.clone(),
                seq,
                text: text.clone(),
                vector: embed(text),
                meta,
            });
            if batch.len() == EMBED_BATCH {
                index.append(&batch).map_err(|e| index_write_error(&e))?;
                embeddings_added += batch.len();
                batch.clear();
                job.incr_counter("new", EMBED_BATCH as i64);
                job.push(
                    EventKind::Progress,
                    format!("{embeddings_added} embeddings written"),
                    json!({"embeddings": embeddings_added}),
                );
            }
        }
    }
    if !batch.is_empty() {
        index.append(&batch).map_err(|e| index_write_error(&e))?;
        embeddings_added += batch.len();
        job.incr_counter("new", batch.len() as i64);
    }

    job.set_progress(0.8);
    job.insert_result("chunks_created", json!(chunks_created));
    job.insert_result("embeddings_added", json!(embeddings_added));
    job.insert_result("collection_name", json!(COLLECTION_NAME));
    job.push(
        EventKind::Done,
        format!("pipeline finished: {embeddings_added} embeddings"),
        json!({"chunks": chunks_created, "embeddings": embeddings_added}),
    );
    Ok(())
}

fn list_json_files(dir: &std::path::Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    Ok(files)
}

fn read_raw_doc(path: &std::path::Path) -> Result<RawDoc, String> {
    let contents = fs::read_to_string(path).map_err(|e| e.to_string())?;
    serde_json::from_str(&contents).map_err(|e| e.to_string())
}

fn stem_of(path: &std::path::Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "doc".to_string())
}

fn processed_write_error(error: &std::io::Error) -> TaskError {
    TaskError::new(
        "PREPROCESS_FAILED",
        error.to_string(),
        "check permissions on the data directory",
    )
}

fn index_write_error(error: &std::io::Error) -> TaskError {
    TaskError::new(
        "INDEX_WRITE_FAILED",
        error.to_string(),
        "check permissions on the index directory",
    )
}
