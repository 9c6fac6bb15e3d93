//! `rag` subcommand implementations.
//!
//! Each `run_*` function prints a human summary to stdout, or pretty JSON
//! when `json` is set. Diagnostics go through `tracing` to stderr.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use walkdir::WalkDir;

use rag_harness_core::address;
use rag_harness_core::models::{DocumentMetadata, ProjectSummary};

use crate::app::App;
use crate::config::Config;
use crate::ingest::{BatchResult, IngestRequest};
use crate::migrate;
use crate::rag::QueryRequest;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn run_init(config: &Config) -> Result<()> {
    migrate::run_migrations(config).await?;
    println!("Database initialized: {}", config.db.path.display());
    Ok(())
}

// ============ Staging ============

/// `(doc_loc, local path)` pairs for files and directories given on the
/// command line. Directory entries keep their path relative to the directory.
pub fn collect_stage_files(paths: &[PathBuf]) -> Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path).follow_links(false).sort_by_file_name() {
                let entry = entry.with_context(|| format!("Failed to walk {}", path.display()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel = entry
                    .path()
                    .strip_prefix(path)
                    .with_context(|| format!("{} is outside {}", entry.path().display(), path.display()))?;
                let doc_loc = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                files.push((doc_loc, entry.path().to_path_buf()));
            }
        } else if path.is_file() {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .with_context(|| format!("No file name in {}", path.display()))?;
            files.push((name, path.clone()));
        } else {
            bail!("No such file or directory: {}", path.display());
        }
    }
    Ok(files)
}

pub async fn run_stage(app: &App, project: &str, paths: &[PathBuf]) -> Result<()> {
    let files = collect_stage_files(paths)?;
    if files.is_empty() {
        println!("Nothing to stage.");
        return Ok(());
    }
    for (doc_loc, local) in &files {
        let bytes = tokio::fs::read(local)
            .await
            .with_context(|| format!("Failed to read {}", local.display()))?;
        let key = address::storage_key(&app.config.storage.temp_prefix, project, doc_loc);
        app.objects
            .put(&key, &bytes)
            .await
            .with_context(|| format!("Failed to stage {}", local.display()))?;
        println!("  staged {} -> {}", local.display(), key);
    }
    println!("Staged {} file(s) for project '{}'.", files.len(), project);
    Ok(())
}

// ============ Ingestion ============

/// Every staged file of a project, as doc_locs relative to its temp prefix.
pub async fn staged_doc_locs(app: &App, project: &str) -> Result<Vec<String>> {
    let prefix = format!(
        "{}/",
        address::storage_key(&app.config.storage.temp_prefix, project, "")
            .trim_end_matches('/')
    );
    let keys = app.objects.list(&prefix).await?;
    Ok(keys
        .into_iter()
        .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
        .filter(|k| !k.is_empty())
        .collect())
}

#[derive(Debug, Clone)]
pub struct IngestArgs {
    pub project: String,
    pub user: String,
    pub session: String,
    pub files: Vec<String>,
    pub ingest_source: Option<String>,
    pub source_path: Option<String>,
}

pub async fn run_ingest(app: &App, args: IngestArgs, json: bool) -> Result<()> {
    let doc_locs = if args.files.is_empty() {
        staged_doc_locs(app, &args.project).await?
    } else {
        args.files
    };
    if doc_locs.is_empty() {
        println!("No staged files for project '{}'.", args.project);
        return Ok(());
    }

    let request = IngestRequest {
        project_name: args.project,
        user_id: args.user,
        session_id: args.session,
        doc_locs,
        ingest_source: args.ingest_source,
        source_path: args.source_path,
    };
    let batch = app.ingestion().ingest(&request).await?;

    if json {
        return print_json(&batch);
    }
    print_batch(&batch);
    Ok(())
}

fn print_batch(batch: &BatchResult) {
    for r in &batch.results {
        println!("  [{}] {}", r.status_code, r.message);
        if let Some(stats) = &r.embedding {
            println!(
                "        chunks: {}  tokens: {}  cost: ${:.6}",
                stats.total_chunks, stats.total_tokens_in, stats.total_cost
            );
        }
    }
    let s = &batch.summary;
    println!();
    println!(
        "ingest: total {}, succeeded {}, duplicates {}, unsupported {}, errors {}",
        s.total, s.succeeded, s.duplicates, s.unsupported, s.errors
    );
}

// ============ Query ============

pub async fn run_query(app: &App, request: QueryRequest, json: bool) -> Result<()> {
    let response = app.rag().query(&request).await;
    if json {
        return print_json(&response);
    }

    println!("{}", response.answer.summary);
    if let Some(ref context) = response.answer.context {
        println!();
        println!("--- Retrieved context ---");
        println!("{}", context);
    }
    if !response.sources.is_empty() {
        println!();
        println!("--- Sources ({}) ---", response.num_sources);
        for (i, s) in response.sources.iter().enumerate() {
            let score = s.adjusted_score.unwrap_or(s.score);
            println!("{}. [{:.2}] {} ({})", i + 1, score, s.document_name, s.doc_id);
        }
    }
    println!();
    println!(
        "intent: {}  filters: {}",
        response.intent, response.metadata_filters_applied
    );
    if let Some(ref error) = response.error {
        eprintln!("error: {}", error);
    }
    Ok(())
}

// ============ History ============

pub async fn run_history(
    app: &App,
    session: &str,
    limit: usize,
    clear: bool,
    json: bool,
) -> Result<()> {
    if clear {
        let removed = app.history.clear_session(session).await?;
        println!("Cleared {} message(s) from session '{}'.", removed, session);
        return Ok(());
    }
    let messages = app.history.get_recent_history(session, limit).await?;
    if json {
        return print_json(&messages);
    }
    if messages.is_empty() {
        println!("No messages.");
        return Ok(());
    }
    for m in &messages {
        println!(
            "[{}] {}: {}",
            m.timestamp.format("%Y-%m-%d %H:%M:%S"),
            m.role.label(),
            m.content
        );
    }
    Ok(())
}

// ============ Metadata ============

fn print_metadata(m: &DocumentMetadata) {
    println!("--- Document ---");
    println!("document_id:   {}", m.document_id);
    println!("filename:      {}", m.filename);
    println!("project:       {}", m.project_name);
    println!("user:          {}", m.user_id);
    println!("status:        {}", m.status);
    println!("file_type:     {}", m.file_type);
    println!("file_size:     {}", format_bytes(m.file_size));
    println!("model:         {} ({})", m.embedding_model, m.embedding_provider);
    println!("content_hash:  {}", m.content_hash);
    println!("source:        {} / {}", m.ingest_source, m.source_path);
    println!("created:       {}", m.created_timestamp.to_rfc3339());
    println!("updated:       {}", m.updated_timestamp.to_rfc3339());
}

pub async fn run_status(
    app: &App,
    document_id: &str,
    model: Option<&str>,
    json: bool,
) -> Result<()> {
    let found = match model {
        Some(m) => app.metadata.get_variant(document_id, m).await?,
        None => app.metadata.get(document_id).await?,
    };
    let Some(metadata) = found else {
        bail!("document not found: {}", document_id);
    };
    if json {
        return print_json(&metadata);
    }
    print_metadata(&metadata);
    let vectors = app
        .index
        .count_for_document(document_id, Some(&metadata.embedding_model))
        .await?;
    println!("vectors:       {}", vectors);
    Ok(())
}

pub async fn run_summary(app: &App, project: &str, json: bool) -> Result<()> {
    let summary: ProjectSummary = app.metadata.project_summary(project).await?;
    if json {
        return print_json(&summary);
    }
    println!("Project '{}'", summary.project_name);
    println!("================================");
    println!("  Documents:   {}", summary.total_documents);
    println!("  Total size:  {}", format_bytes(summary.total_size));
    if !summary.status_breakdown.is_empty() {
        println!();
        println!("  By status:");
        for (status, n) in &summary.status_breakdown {
            println!("    {:<20} {:>6}", status, n);
        }
    }
    if !summary.file_types.is_empty() {
        println!();
        println!("  By file type:");
        for (ft, n) in &summary.file_types {
            println!("    {:<20} {:>6}", ft, n);
        }
    }
    Ok(())
}

pub async fn run_delete(app: &App, document_id: &str) -> Result<()> {
    let vectors = app.index.delete_by_document(document_id).await?;
    let rows = app.metadata.delete(document_id).await?;
    if rows == 0 && vectors == 0 {
        bail!("document not found: {}", document_id);
    }
    println!(
        "Deleted document {}: {} metadata row(s), {} vector(s).",
        document_id, rows, vectors
    );
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Default session id when none is given on the command line.
pub fn cli_session(project: &str, user: &str) -> String {
    format!("cli-{}-{}", project, user)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_collect_stage_files_from_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        std::fs::write(dir.path().join("sub/b.pdf"), "b").unwrap();

        let files = collect_stage_files(&[dir.path().to_path_buf()]).unwrap();
        let locs: Vec<_> = files.iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(locs, vec!["a.txt", "sub/b.pdf"]);
    }

    #[test]
    fn test_collect_stage_files_single_and_missing() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("notes.txt");
        std::fs::write(&file, "x").unwrap();
        let files = collect_stage_files(&[file]).unwrap();
        assert_eq!(files[0].0, "notes.txt");

        assert!(collect_stage_files(&[dir.path().join("missing.txt")]).is_err());
    }
}
