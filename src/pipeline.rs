use crate::archive::{self, Extraction};
use crate::constants::MAX_FILE_SIZE_BYTES;
use crate::error::{PipelineError, Result};
use crate::sources::{adapter_for, AdapterOutput, AdapterSettings, SourceAdapter};
use crate::storage::{EventStore, StoredEvent};
use crate::types::{
    CanonicalEvent, ContentType, ImportError, ImportResult, ImportStats, SourceFile, SourceKind,
};
use chrono::Utc;
use metrics::{counter, histogram};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Human-readable byte count, e.g. `1.5 MB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn oversize_error(name: &str, size: u64) -> ImportError {
    ImportError::new(
        name,
        format!(
            "file is too large ({}); the limit is {}",
            format_size(size),
            format_size(MAX_FILE_SIZE_BYTES)
        ),
    )
}

/// `.zip` files, and extension-less files carrying a ZIP signature. Office
/// documents and jars share the signature and stay loose.
fn looks_like_archive(file: &SourceFile) -> bool {
    match file.content_type {
        ContentType::Archive => true,
        ContentType::Other => !file.file_name().contains('.') && archive::is_archive(&file.bytes),
        _ => false,
    }
}

fn panic_message(error: JoinError) -> String {
    if !error.is_panic() {
        return error.to_string();
    }
    let payload = error.into_panic();
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Files ready for the adapter, plus file-level failures found while loading them.
#[derive(Debug, Default)]
struct Staging {
    files: Vec<SourceFile>,
    errors: Vec<ImportError>,
    /// Inputs and archive members considered, including rejected ones.
    seen: usize,
}

impl Staging {
    fn reject(&mut self, error: ImportError) {
        warn!("Rejected {}", error);
        self.seen += 1;
        self.errors.push(error);
    }

    fn absorb(&mut self, archive_name: &str, extraction: Extraction) {
        self.seen += extraction.files.len() + extraction.errors.len();
        for member in extraction.errors {
            self.errors.push(ImportError::new(
                format!("{}/{}", archive_name, member.path),
                member.message,
            ));
        }
        self.files.extend(extraction.files);
    }
}

/// Runs one import: size gate, archive expansion, adapter dispatch and
/// result aggregation.
pub struct ImportOrchestrator {
    settings: AdapterSettings,
    cancel: CancellationToken,
}

impl Default for ImportOrchestrator {
    fn default() -> Self {
        Self::new(AdapterSettings::default())
    }
}

impl ImportOrchestrator {
    pub fn new(settings: AdapterSettings) -> Self {
        Self {
            settings,
            cancel: CancellationToken::new(),
        }
    }

    /// Share a cancellation token with the caller (Ctrl-C handler, UI).
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn ensure_not_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            info!("Import cancelled");
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    /// Import files from disk. Sizes are checked from metadata before anything is read.
    #[instrument(skip(self, paths), fields(source = %kind, run_id = %Uuid::new_v4()))]
    pub async fn import_paths(
        &self,
        kind: SourceKind,
        paths: &[PathBuf],
    ) -> Result<ImportResult> {
        if paths.is_empty() {
            return Err(PipelineError::NoInput);
        }
        let started = Instant::now();
        let adapter: Arc<dyn SourceAdapter> = Arc::from(adapter_for(kind, self.settings));
        let mut staging = Staging::default();

        for path in paths {
            self.ensure_not_cancelled()?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());

            let size = match tokio::fs::metadata(path).await {
                Ok(meta) if meta.is_file() => meta.len(),
                Ok(_) => {
                    staging.reject(ImportError::new(name, "not a regular file"));
                    continue;
                }
                Err(e) => {
                    staging.reject(ImportError::new(name, format!("cannot read file: {e}")));
                    continue;
                }
            };
            if size > MAX_FILE_SIZE_BYTES {
                staging.reject(oversize_error(&name, size));
                continue;
            }
            match tokio::fs::read(path).await {
                Ok(bytes) => {
                    self.stage(&adapter, SourceFile::new(name, bytes), &mut staging)
                        .await
                }
                Err(e) => staging.reject(ImportError::new(name, format!("cannot read file: {e}"))),
            }
        }

        self.finish(adapter, staging, started).await
    }

    /// Import files already held in memory.
    #[instrument(skip(self, files), fields(source = %kind, run_id = %Uuid::new_v4()))]
    pub async fn import_files(
        &self,
        kind: SourceKind,
        files: Vec<SourceFile>,
    ) -> Result<ImportResult> {
        let adapter: Arc<dyn SourceAdapter> = Arc::from(adapter_for(kind, self.settings));
        self.import_with(adapter, files).await
    }

    /// Import in-memory files through a caller-supplied adapter.
    pub async fn import_with(
        &self,
        adapter: Arc<dyn SourceAdapter>,
        files: Vec<SourceFile>,
    ) -> Result<ImportResult> {
        if files.is_empty() {
            return Err(PipelineError::NoInput);
        }
        let started = Instant::now();
        let mut staging = Staging::default();

        for file in files {
            self.ensure_not_cancelled()?;
            let size = file.bytes.len() as u64;
            if size > MAX_FILE_SIZE_BYTES {
                staging.reject(oversize_error(&file.path, size));
                continue;
            }
            self.stage(&adapter, file, &mut staging).await;
        }

        self.finish(adapter, staging, started).await
    }

    /// Expand archives into the members the adapter accepts; pass other files through.
    async fn stage(
        &self,
        adapter: &Arc<dyn SourceAdapter>,
        file: SourceFile,
        staging: &mut Staging,
    ) {
        if !looks_like_archive(&file) {
            staging.seen += 1;
            staging.files.push(file);
            return;
        }

        let archive_name = file.path;
        let bytes = file.bytes;
        let filter = Arc::clone(adapter);
        let extracted = tokio::task::spawn_blocking(move || {
            archive::extract_nested(&bytes, |path| filter.accepts(path))
        })
        .await;

        match extracted {
            Ok(Ok(extraction)) => {
                info!(
                    "📦 {}: {} members extracted, {} failed",
                    archive_name,
                    extraction.files.len(),
                    extraction.errors.len()
                );
                staging.absorb(&archive_name, extraction);
            }
            Ok(Err(e)) => staging.reject(ImportError::new(archive_name, e.to_string())),
            Err(e) => staging.reject(ImportError::new(
                archive_name,
                format!("archive extraction failed: {}", panic_message(e)),
            )),
        }
    }

    async fn finish(
        &self,
        adapter: Arc<dyn SourceAdapter>,
        staging: Staging,
        started: Instant,
    ) -> Result<ImportResult> {
        self.ensure_not_cancelled()?;
        let source = adapter.source().as_str();
        let name = adapter.name();
        counter!("lifeline_files_seen_total", "source" => source).increment(staging.seen as u64);
        counter!("lifeline_files_rejected_total", "source" => source)
            .increment(staging.errors.len() as u64);

        info!("🔧 Handing {} files to the {} adapter", staging.files.len(), name);
        let files = staging.files;
        let batch_size = files.len();
        let output = match tokio::task::spawn_blocking(move || adapter.import(&files)).await {
            Ok(output) => output,
            Err(e) => {
                let message = panic_message(e);
                warn!("{} adapter failed: {}", name, message);
                // One error stands for the whole batch; the other files count as skipped.
                AdapterOutput {
                    errors: vec![ImportError::general(format!("{name} adapter failed: {message}"))],
                    ignored: batch_size.saturating_sub(1),
                    ..AdapterOutput::default()
                }
            }
        };

        let mut errors = staging.errors;
        errors.extend(output.errors);
        let mut stats = ImportStats {
            total_files: staging.seen,
            processed_files: output.processed_files,
            total_events: output.events.len(),
            skipped: errors.len() + output.ignored,
            ..ImportStats::default()
        };
        for event in &output.events {
            *stats.events_by_layer.entry(event.layer).or_insert(0) += 1;
        }

        for (layer, count) in &stats.events_by_layer {
            counter!("lifeline_events_emitted_total", "source" => source, "layer" => layer.as_str())
                .increment(*count as u64);
        }
        counter!("lifeline_import_errors_total", "source" => source).increment(errors.len() as u64);
        histogram!("lifeline_import_duration_seconds", "source" => source)
            .record(started.elapsed().as_secs_f64());

        info!(
            "✅ Imported {} events from {}/{} files ({} errors, {} skipped)",
            stats.total_events,
            stats.processed_files,
            stats.total_files,
            errors.len(),
            stats.skipped
        );
        for error in &errors {
            debug!("Import error: {}", error);
        }

        Ok(ImportResult {
            events: output.events,
            errors,
            stats,
        })
    }

    /// Hand the selected events to the store as a single batch.
    #[instrument(skip(self, store, events), fields(events = events.len()))]
    pub async fn commit(
        &self,
        store: &dyn EventStore,
        owner: &str,
        events: &[CanonicalEvent],
    ) -> Result<usize> {
        self.ensure_not_cancelled()?;
        let now = Utc::now();
        let batch: Vec<StoredEvent> = events
            .iter()
            .cloned()
            .map(|event| {
                let mut stored = StoredEvent::new(owner, event);
                stored.created_at = now;
                stored.updated_at = now;
                stored
            })
            .collect();
        let written = store.batch_insert(batch).await?;
        counter!("lifeline_events_committed_total").increment(written as u64);
        info!("💾 Committed {} events for owner {}", written, owner);
        Ok(written)
    }

    /// Write the result as pretty JSON into `output_dir`; returns the file path.
    pub fn persist_to_json(
        result: &ImportResult,
        kind: SourceKind,
        output_dir: &Path,
    ) -> Result<PathBuf> {
        fs::create_dir_all(output_dir)?;

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let filepath = output_dir.join(format!("{}_{}.json", kind.as_str(), timestamp));

        let json_content = serde_json::to_string_pretty(result)?;
        fs::write(&filepath, json_content)?;

        Ok(filepath)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(MAX_FILE_SIZE_BYTES), "500.0 MB");
    }

    #[tokio::test]
    async fn test_empty_input_is_fatal() {
        let orchestrator = ImportOrchestrator::default();
        assert!(matches!(
            orchestrator.import_files(SourceKind::Csv, Vec::new()).await,
            Err(PipelineError::NoInput)
        ));
        assert!(matches!(
            orchestrator.import_paths(SourceKind::Csv, &[]).await,
            Err(PipelineError::NoInput)
        ));
    }

    #[tokio::test]
    async fn test_unsupported_files_count_as_skipped() {
        let result = ImportOrchestrator::default()
            .import_files(
                SourceKind::Csv,
                vec![
                    SourceFile::new("events.csv", b"Title,Date\nGraduation,2019-05-20\n".to_vec()),
                    SourceFile::new("cover.png", vec![0x89, 0x50]),
                ],
            )
            .await
            .unwrap();
        assert_eq!(result.stats.total_files, 2);
        assert_eq!(result.stats.processed_files, 1);
        assert_eq!(result.stats.total_events, 1);
        assert_eq!(result.stats.skipped, 1);
        assert_eq!(result.stats.events_by_layer.get(&crate::types::Layer::Education), Some(&1));
    }
}
