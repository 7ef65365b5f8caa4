// crates/server/src/tasks/crawl.rs
//! Crawl task: walk an HTML listing page by page, collect new post links.
//!
//! The seen-set (`<data_dir>/seen.json`) makes crawls incremental: links
//! already collected on a previous run count as `skipped`.

use ragpipe_jobs::{EventKind, Job};
use regex_lite::Regex;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{TaskError, TaskResult};

#[derive(Debug, Clone)]
pub struct CrawlParams {
    pub base_url: String,
    pub max_pages: usize,
}

pub async fn run(
    job: Arc<Job>,
    http: reqwest::Client,
    data_dir: PathBuf,
    params: CrawlParams,
) -> TaskResult {
    job.push(
        EventKind::Info,
        "crawl started",
        json!({"base_url": params.base_url, "max_pages": params.max_pages}),
    );

    // Pattern cannot fail; regex-lite has no compile-time checking.
    let href = Regex::new(r#"href="([^"]+)""#).expect("valid href pattern");
    let mut seen = load_seen(&data_dir);
    let mut posts: Vec<Value> = Vec::new();
    let mut pages_fetched = 0usize;

    for page in 1..=params.max_pages.max(1) {
        let url = page_url(&params.base_url, page);
        job.push(
            EventKind::Progress,
            format!("fetching page {page}"),
            json!({"page": page, "url": url}),
        );

        let body = match fetch(&http, &url).await {
            Ok(body) => body,
            Err(message) => {
                job.incr_counter("failed", 1);
                job.add_error(
                    "FETCH_FAILED",
                    format!("{url}: {message}"),
                    "check that the listing URL is reachable",
                );
                job.push(
                    EventKind::Warning,
                    format!("page {page} failed"),
                    json!({"url": url}),
                );
                continue;
            }
        };

        pages_fetched += 1;
        job.incr_counter("pages", 1);

        for link in extract_links(&href, &params.base_url, &body) {
            job.incr_counter("found", 1);
            if !seen.insert(link.clone()) {
                job.incr_counter("skipped", 1);
                continue;
            }
            job.incr_counter("new", 1);
            posts.push(json!({"url": link}));
        }

        job.set_progress(page as f64 / params.max_pages.max(1) as f64);
    }

    if pages_fetched == 0 {
        return Err(TaskError::new(
            "CRAWL_FAILED",
            format!("no listing pages could be fetched from {}", params.base_url),
            "verify the base URL and network access, then retry",
        ));
    }

    save_seen(&data_dir, &seen)?;

    let new_posts = posts.len();
    job.insert_result("posts", Value::Array(posts));
    job.insert_result("pages_fetched", json!(pages_fetched));
    job.push(
        EventKind::Done,
        format!("crawl finished: {new_posts} new posts"),
        json!({"new": new_posts, "pages": pages_fetched}),
    );
    Ok(())
}

async fn fetch(http: &reqwest::Client, url: &str) -> Result<String, String> {
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| e.to_string())?
        .error_for_status()
        .map_err(|e| e.to_string())?;
    response.text().await.map_err(|e| e.to_string())
}

fn page_url(base_url: &str, page: usize) -> String {
    if base_url.contains('?') {
        format!("{base_url}&page={page}")
    } else {
        format!("{base_url}?page={page}")
    }
}

/// Pull candidate post links out of a listing page: absolute links under the
/// base URL, plus site-relative ones re-anchored to the base's origin.
fn extract_links(href: &Regex, base_url: &str, body: &str) -> Vec<String> {
    let base = base_url.trim_end_matches('/');
    let origin = origin_of(base);
    let mut links = Vec::new();
    for capture in href.captures_iter(body) {
        let target = &capture[1];
        if target == base || target.starts_with('#') {
            continue;
        }
        if target.starts_with(base) {
            links.push(target.to_string());
        } else if target.starts_with('/') {
            links.push(format!("{origin}{target}"));
        }
    }
    links
}

/// `https://host/a/b` → `https://host`. Falls back to the input when it has
/// no scheme-relative shape worth splitting.
fn origin_of(url: &str) -> String {
    if let Some(scheme_end) = url.find("://") {
        let rest = &url[scheme_end + 3..];
        if let Some(path_start) = rest.find('/') {
            return url[..scheme_end + 3 + path_start].to_string();
        }
    }
    url.to_string()
}

fn seen_path(data_dir: &Path) -> PathBuf {
    data_dir.join("seen.json")
}

fn load_seen(data_dir: &Path) -> BTreeSet<String> {
    match fs::read_to_string(seen_path(data_dir)) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_default(),
        Err(_) => BTreeSet::new(),
    }
}

fn save_seen(data_dir: &Path, seen: &BTreeSet<String>) -> Result<(), TaskError> {
    fs::create_dir_all(data_dir).map_err(|e| seen_write_error(&e))?;
    let contents =
        serde_json::to_string_pretty(seen).map_err(|e| TaskError::new(
            "SEEN_WRITE_FAILED",
            e.to_string(),
            "check permissions on the data directory",
        ))?;
    fs::write(seen_path(data_dir), contents).map_err(|e| seen_write_error(&e))
}

fn seen_write_error(error: &std::io::Error) -> TaskError {
    TaskError::new(
        "SEEN_WRITE_FAILED",
        error.to_string(),
        "check permissions on the data directory",
    )
}
