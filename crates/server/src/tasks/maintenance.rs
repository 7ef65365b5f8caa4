// crates/server/src/tasks/maintenance.rs
//! Reindex, backup, and restore task bodies.

use chrono::Utc;
use ragpipe_jobs::{EventKind, Job};
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use super::{TaskError, TaskResult};
use crate::index::{embed, ChunkIndex, ChunkRecord, COLLECTION_NAME};

const PROGRESS_EVERY_FILES: usize = 50;

#[derive(Debug, serde::Deserialize)]
struct ProcessedDoc {
    doc_id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    chunks: Vec<String>,
}

/// Rebuild the chunk index from scratch out of `<data_dir>/processed/`.
pub async fn reindex(job: Arc<Job>, data_dir: PathBuf) -> TaskResult {
    let processed_dir = data_dir.join("processed");
    let mut files: Vec<PathBuf> = match fs::read_dir(&processed_dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect(),
        Err(e) => {
            return Err(TaskError::new(
                "REINDEX_FAILED",
                format!("{}: {e}", processed_dir.display()),
                "run preprocess_embed before reindexing",
            ))
        }
    };
    files.sort();

    job.push(
        EventKind::Info,
        format!("reindex started over {} processed documents", files.len()),
        json!({"documents": files.len()}),
    );
    job.set_counter("found", files.len() as i64);

    let index = ChunkIndex::new(&data_dir);
    index.clear().map_err(|e| {
        TaskError::new(
            "REINDEX_FAILED",
            e.to_string(),
            "check permissions on the index directory",
        )
    })?;

    let total = files.len().max(1);
    let mut chunks_indexed = 0usize;
    for (position, path) in files.iter().enumerate() {
        let doc: ProcessedDoc = match fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|contents| serde_json::from_str(&contents).map_err(|e| e.to_string()))
        {
            Ok(doc) => doc,
            Err(message) => {
                job.incr_counter("failed", 1);
                job.add_error(
                    "DOC_PARSE_FAILED",
                    format!("{}: {message}", path.display()),
                    "re-run preprocess_embed to regenerate the processed file",
                );
                continue;
            }
        };

        let records: Vec<ChunkRecord> = doc
            .chunks
            .iter()
            .enumerate()
            .map(|(seq, text)| {
                let mut meta = Map::new();
                meta.insert("title".to_string(), json!(doc.title));
                meta.insert("url".to_string(), json!(doc.url));
                ChunkRecord {
                    id: format!("{}:{seq}", doc.doc_id),
                    doc_id: doc.doc_id.clone(),
                    seq,
                    text: text.clone(),
                    vector: embed(text),
                    meta,
                }
            })
            .collect();
        index.append(&records).map_err(|e| {
            TaskError::new(
                "INDEX_WRITE_FAILED",
                e.to_string(),
                "check permissions on the index directory",
            )
        })?;
        chunks_indexed += records.len();
        job.incr_counter("new", records.len() as i64);
        job.set_progress((position + 1) as f64 / total as f64);
        job.push(
            EventKind::Progress,
            format!("indexed {}", doc.doc_id),
            json!({"chunks": records.len()}),
        );
    }

    job.insert_result("chunks_indexed", json!(chunks_indexed));
    job.insert_result("collection_name", json!(COLLECTION_NAME));
    job.push(
        EventKind::Done,
        format!("reindex finished: {chunks_indexed} chunks"),
        json!({"chunks": chunks_indexed}),
    );
    Ok(())
}

/// Copy the whole data directory into `<backup_dir>/backup_<ts>/`.
pub async fn backup(job: Arc<Job>, data_dir: PathBuf, backup_dir: PathBuf) -> TaskResult {
    if !data_dir.is_dir() {
        return Err(TaskError::new(
            "BACKUP_FAILED",
            format!("data directory {} does not exist", data_dir.display()),
            "nothing to back up yet; run a crawl or pipeline first",
        ));
    }

    let backup_id = format!("backup_{}", Utc::now().format("%Y%m%d_%H%M%S"));
    let dest = backup_dir.join(&backup_id);
    job.push(
        EventKind::Info,
        format!("backup started into {backup_id}"),
        json!({"backup_id": backup_id}),
    );

    let files_copied = copy_tree(&job, &data_dir, &dest)?;

    job.insert_result("backup_id", json!(backup_id));
    job.insert_result("files_copied", json!(files_copied));
    job.push(
        EventKind::Done,
        format!("backup finished: {files_copied} files"),
        json!({"files": files_copied}),
    );
    Ok(())
}

/// Copy a named backup back over the data directory.
pub async fn restore(
    job: Arc<Job>,
    data_dir: PathBuf,
    backup_dir: PathBuf,
    backup_id: String,
) -> TaskResult {
    // Backup ids are path components, never paths.
    if backup_id.is_empty() || backup_id.contains(|c| matches!(c, '/' | '\\' | '.')) {
        return Err(TaskError::new(
            "RESTORE_FAILED",
            format!("invalid backup id {backup_id:?}"),
            "pass a backup_id as reported by a backup job",
        ));
    }
    let source = backup_dir.join(&backup_id);
    if !source.is_dir() {
        return Err(TaskError::new(
            "RESTORE_FAILED",
            format!("unknown backup id {backup_id:?}"),
            "list the backups directory for available ids",
        ));
    }

    job.push(
        EventKind::Info,
        format!("restore started from {backup_id}"),
        json!({"backup_id": backup_id}),
    );

    let files_restored = copy_tree(&job, &source, &data_dir)?;

    job.insert_result("backup_id", json!(backup_id));
    job.insert_result("files_restored", json!(files_restored));
    job.push(
        EventKind::Done,
        format!("restore finished: {files_restored} files"),
        json!({"files": files_restored}),
    );
    Ok(())
}

/// Recursively copy `src` into `dest`, narrating progress on the job.
/// Returns the number of files copied.
fn copy_tree(job: &Job, src: &Path, dest: &Path) -> Result<usize, TaskError> {
    let mut files_copied = 0usize;
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(|e| copy_error(&e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| copy_error(&e.to_string()))?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| copy_error(&e.to_string()))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| copy_error(&e.to_string()))?;
        }
        fs::copy(entry.path(), &target).map_err(|e| copy_error(&e.to_string()))?;
        files_copied += 1;
        job.incr_counter("files", 1);
        if files_copied % PROGRESS_EVERY_FILES == 0 {
            job.push(
                EventKind::Progress,
                format!("{files_copied} files copied"),
                Value::Null,
            );
        }
    }
    Ok(files_copied)
}

fn copy_error(message: &str) -> TaskError {
    TaskError::new(
        "COPY_FAILED",
        message.to_string(),
        "check disk space and permissions, then retry",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragpipe_jobs::{JobStore, JobType, StoreConfig};
    use std::time::Duration;

    fn store() -> JobStore {
        JobStore::new(StoreConfig {
            sweep_interval: Duration::from_secs(3600),
            ..StoreConfig::default()
        })
    }

    fn seed_processed(data_dir: &Path) {
        let processed = data_dir.join("processed");
        fs::create_dir_all(&processed).unwrap();
        fs::write(
            processed.join("doc-a.json"),
            json!({
                "doc_id": "doc-a",
                "title": "A",
                "url": "https://x.test/a",
                "chunks": ["first chunk", "second chunk"]
            })
            .to_string(),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_reindex_rebuilds_from_processed() {
        let dir = tempfile::tempdir().unwrap();
        seed_processed(dir.path());
        // Pre-existing garbage in the index must not survive the rebuild.
        let index = ChunkIndex::new(dir.path());
        fs::create_dir_all(index.path().parent().unwrap()).unwrap();
        fs::write(index.path(), "stale\n").unwrap();

        let job = store().create(JobType::Reindex);
        reindex(Arc::clone(&job), dir.path().to_path_buf())
            .await
            .unwrap();

        assert_eq!(index.count().unwrap(), 2);
        let snap = job.snapshot();
        assert_eq!(snap.results["chunks_indexed"], 2);
        assert_eq!(snap.counters["new"], 2);
    }

    #[tokio::test]
    async fn test_reindex_without_processed_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let job = store().create(JobType::Reindex);
        let error = reindex(Arc::clone(&job), dir.path().join("data"))
            .await
            .unwrap_err();
        assert_eq!(error.code, "REINDEX_FAILED");
    }

    #[tokio::test]
    async fn test_backup_then_restore_round_trips() {
        let root = tempfile::tempdir().unwrap();
        let data_dir = root.path().join("data");
        let backup_dir = root.path().join("backups");
        seed_processed(&data_dir);
        fs::write(data_dir.join("seen.json"), "[]").unwrap();

        let backup_job = store().create(JobType::Backup);
        backup(
            Arc::clone(&backup_job),
            data_dir.clone(),
            backup_dir.clone(),
        )
        .await
        .unwrap();
        let snap = backup_job.snapshot();
        assert_eq!(snap.results["files_copied"], 2);
        let backup_id = snap.results["backup_id"].as_str().unwrap().to_string();

        // Damage the live data, then restore.
        fs::remove_file(data_dir.join("seen.json")).unwrap();
        let restore_job = store().create(JobType::Restore);
        restore(
            Arc::clone(&restore_job),
            data_dir.clone(),
            backup_dir,
            backup_id,
        )
        .await
        .unwrap();

        assert!(data_dir.join("seen.json").exists());
        assert!(data_dir.join("processed").join("doc-a.json").exists());
        assert_eq!(restore_job.snapshot().results["files_restored"], 2);
    }

    #[tokio::test]
    async fn test_restore_rejects_bad_ids() {
        let root = tempfile::tempdir().unwrap();
        let job = store().create(JobType::Restore);
        let error = restore(
            Arc::clone(&job),
            root.path().join("data"),
            root.path().join("backups"),
            "../etc".to_string(),
        )
        .await
        .unwrap_err();
        assert_eq!(error.code, "RESTORE_FAILED");

        let job = store().create(JobType::Restore);
        let error = restore(
            Arc::clone(&job),
            root.path().join("data"),
            root.path().join("backups"),
            "backup_19990101_000000".to_string(),
        )
        .await
        .unwrap_err();
        assert_eq!(error.code, "RESTORE_FAILED");
    }
}
