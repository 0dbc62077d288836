mod common;

use anyhow::Result;
use common::{jpeg_with_exif, ZipBuilder};
use lifeline_import::constants::MAX_FILE_SIZE_BYTES;
use lifeline_import::sources::{AdapterOutput, CsvAdapter, SourceAdapter};
use lifeline_import::storage::{EventStore, InMemoryEventStore};
use lifeline_import::types::{DateSource, EventMetadata};
use lifeline_import::{ImportOrchestrator, Layer, PipelineError, SourceFile, SourceKind};
use std::fs;
use std::sync::Arc;
use tempfile::tempdir;

#[tokio::test]
async fn test_tabular_scenario_from_disk() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("life.csv");
    fs::write(&path, "Title,Date\nTrip to Paris,2023-06-01\n,\n")?;

    let result = ImportOrchestrator::default()
        .import_paths(SourceKind::Csv, &[path])
        .await?;

    assert_eq!(result.events.len(), 1);
    assert!(result.errors.is_empty());
    let event = &result.events[0];
    assert_eq!(event.title, "Trip to Paris");
    assert_eq!(event.layer, Layer::Travel);
    assert_eq!(event.start_date.to_string(), "2023-06-01T00:00:00");
    assert_eq!(result.stats.events_by_layer.get(&Layer::Travel), Some(&1));
    assert_eq!(result.stats.skipped, 0);
    Ok(())
}

#[tokio::test]
async fn test_cancelled_calendar_entry_is_excluded() -> Result<()> {
    let ics = "BEGIN:VCALENDAR\r\n\
BEGIN:VEVENT\r\nUID:a\r\nSUMMARY:Dentist\r\nDTSTART;VALUE=DATE:20240105\r\nEND:VEVENT\r\n\
BEGIN:VEVENT\r\nUID:b\r\nSUMMARY:Team offsite\r\nSTATUS:CANCELLED\r\nDTSTART:20240110T090000Z\r\nEND:VEVENT\r\n\
END:VCALENDAR\r\n";
    let result = ImportOrchestrator::default()
        .import_files(SourceKind::Ical, vec![SourceFile::new("work.ics", ics.as_bytes().to_vec())])
        .await?;

    assert_eq!(result.events.len(), 1);
    assert_eq!(result.events[0].title, "Dentist");
    assert_eq!(result.events[0].layer, Layer::Health);
    assert!(result.errors.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_oversize_file_is_rejected_before_reading() -> Result<()> {
    let dir = tempdir()?;
    let big = dir.path().join("huge.csv");
    // Sparse: the size check only looks at metadata.
    fs::File::create(&big)?.set_len(MAX_FILE_SIZE_BYTES + 1)?;
    let small = dir.path().join("small.csv");
    fs::write(&small, "Title,Date\nNew job at Acme,2022-02-01\n")?;

    let result = ImportOrchestrator::default()
        .import_paths(SourceKind::Csv, &[big, small])
        .await?;

    assert_eq!(result.events.len(), 1);
    assert_eq!(result.events[0].layer, Layer::Work);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].file_name.as_deref(), Some("huge.csv"));
    assert!(result.errors[0].message.contains("500.0 MB"));
    assert_eq!(result.stats.total_files, 2);
    Ok(())
}

#[tokio::test]
async fn test_missing_file_is_a_file_error() -> Result<()> {
    let dir = tempdir()?;
    let result = ImportOrchestrator::default()
        .import_paths(SourceKind::Csv, &[dir.path().join("absent.csv")])
        .await?;
    assert!(result.events.is_empty());
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].message.starts_with("cannot read file"));
    Ok(())
}

#[tokio::test]
async fn test_empty_input_is_fatal() {
    let outcome = ImportOrchestrator::default()
        .import_files(SourceKind::Facebook, Vec::new())
        .await;
    assert!(matches!(outcome, Err(PipelineError::NoInput)));
}

#[tokio::test]
async fn test_commit_upserts_on_natural_key() -> Result<()> {
    let orchestrator = ImportOrchestrator::default();
    let store = InMemoryEventStore::new();
    let csv = || {
        SourceFile::new("e.csv", b"Title,Date\nGraduation,2015-06-20\nWedding,2018-09-01\n".to_vec())
    };

    let first = orchestrator.import_files(SourceKind::Csv, vec![csv()]).await?;
    assert_eq!(orchestrator.commit(&store, "me", &first.events).await?, 2);
    let second = orchestrator.import_files(SourceKind::Csv, vec![csv()]).await?;
    orchestrator.commit(&store, "me", &second.events).await?;

    assert_eq!(store.len(), 2);
    let snapshot = store.snapshot()?;
    assert_eq!(snapshot[0].event.title, "Graduation");
    assert_eq!(snapshot[0].owner, "me");
    assert_eq!(snapshot[1].event.layer, Layer::Relationships);
    assert!(store.get(&snapshot[0].key).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn test_cancellation_stops_import_and_commit() -> Result<()> {
    let orchestrator = ImportOrchestrator::default();
    let store = InMemoryEventStore::new();
    let hike = || SourceFile::new("e.csv", b"Title,Date\nHike,2020-08-08\n".to_vec());
    let result = orchestrator
        .import_files(SourceKind::Csv, vec![hike()])
        .await?;

    orchestrator.cancellation_token().cancel();
    assert!(matches!(
        orchestrator.commit(&store, "me", &result.events).await,
        Err(PipelineError::Cancelled)
    ));
    assert!(store.is_empty());

    let again = orchestrator
        .import_files(SourceKind::Csv, vec![hike()])
        .await;
    assert!(matches!(again, Err(PipelineError::Cancelled)));
    Ok(())
}

#[tokio::test]
async fn test_social_media_dates_from_exif_inside_archive() -> Result<()> {
    let photo = jpeg_with_exif("2019:07:14 18:30:00", Some(([48, 51, 24], [2, 21, 0])));
    let dated_by_name = jpeg_with_exif("2001:01:01 00:00:00", None);
    let zip = ZipBuilder::new()
        .stored("photos_and_videos/Summer/IMG_0001.jpg", photo)
        .stored("photos_and_videos/Summer/IMG_20200102_101112.jpg", dated_by_name)
        .stored("photos_and_videos/Summer/clip.mp4", b"\x00\x00\x00\x18ftypmp42".to_vec())
        .stored("photos_and_videos/Summer/notes.txt", b"ignored".to_vec())
        .build();

    let result = ImportOrchestrator::default()
        .import_files(SourceKind::Facebook, vec![SourceFile::new("facebook-me.zip", zip)])
        .await?;

    assert!(result.errors.is_empty(), "{:?}", result.errors);
    assert_eq!(result.events.len(), 2);
    assert!(result.events.iter().all(|e| e.layer == Layer::Media));

    let from_exif = result
        .events
        .iter()
        .find(|e| e.start_date.to_string() == "2019-07-14T18:30:00")
        .expect("photo dated from EXIF");
    let location = from_exif.location.as_ref().expect("GPS position");
    assert!((location.latitude - (48.0 + 51.0 / 60.0 + 24.0 / 3600.0)).abs() < 1e-9);
    assert!(matches!(
        &from_exif.metadata,
        Some(EventMetadata::SocialMedia {
            date_source: DateSource::EmbeddedMetadata,
            camera: Some(_),
            ..
        })
    ));

    let from_name = result
        .events
        .iter()
        .find(|e| e.start_date.to_string() == "2020-01-02T10:11:12")
        .expect("photo dated from its file name");
    assert!(matches!(
        &from_name.metadata,
        Some(EventMetadata::SocialMedia { date_source: DateSource::FileName, .. })
    ));
    // The undated video is ignored silently.
    assert_eq!(result.stats.skipped, 1);
    Ok(())
}

#[tokio::test]
async fn test_persist_result_as_json() -> Result<()> {
    let dir = tempdir()?;
    let result = ImportOrchestrator::default()
        .import_files(
            SourceKind::Csv,
            vec![SourceFile::new("e.csv", b"Title,Date\nPromotion,2021-03-03\n".to_vec())],
        )
        .await?;

    let path = ImportOrchestrator::persist_to_json(&result, SourceKind::Csv, dir.path())?;
    let written: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
    assert_eq!(written["events"][0]["title"], "Promotion");
    assert_eq!(written["events"][0]["layer"], "work");
    assert_eq!(written["stats"]["totalEvents"], 1);
    assert!(path.file_name().unwrap().to_string_lossy().starts_with("csv_"));
    Ok(())
}

/// Accepts everything and blows up on import.
struct ExplodingAdapter;

impl SourceAdapter for ExplodingAdapter {
    fn source(&self) -> SourceKind {
        SourceKind::Csv
    }

    fn name(&self) -> &'static str {
        "Exploding"
    }

    fn accepts(&self, _path: &str) -> bool {
        true
    }

    fn import(&self, _files: &[SourceFile]) -> AdapterOutput {
        panic!("malformed input tripped an adapter bug");
    }
}

#[tokio::test]
async fn test_adapter_panic_becomes_an_import_error() -> Result<()> {
    let files = vec![
        SourceFile::new("a.csv", b"Title,Date\nHike,2020-08-08\n".to_vec()),
        SourceFile::new("b.csv", b"Title,Date\nSwim,2020-08-09\n".to_vec()),
        SourceFile::new("c.zip", b"PK\x03\x04 broken".to_vec()),
    ];
    let orchestrator = ImportOrchestrator::default();
    let result = orchestrator
        .import_with(Arc::new(ExplodingAdapter), files)
        .await?;

    assert!(result.events.is_empty());
    assert_eq!(result.errors.len(), 2);
    assert_eq!(result.errors[0].file_name.as_deref(), Some("c.zip"));
    assert!(result.errors[1].message.contains("Exploding adapter failed"));
    assert!(result.errors[1].message.contains("adapter bug"));
    assert_eq!(result.stats.total_files, 3);
    assert_eq!(result.stats.skipped, 3);

    // The orchestrator stays usable for the next run.
    let next = orchestrator
        .import_with(
            Arc::new(CsvAdapter::default()),
            vec![SourceFile::new("a.csv", b"Title,Date\nHike,2020-08-08\n".to_vec())],
        )
        .await?;
    assert_eq!(next.events.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_office_documents_are_not_expanded_as_archives() -> Result<()> {
    let inner = ZipBuilder::new()
        .stored("xl/events.csv", b"Title,Date\nHidden,2020-01-01\n".to_vec())
        .build();
    let result = ImportOrchestrator::default()
        .import_files(
            SourceKind::Csv,
            vec![
                SourceFile::new("budget.xlsx", inner.clone()),
                SourceFile::new("export", inner),
            ],
        )
        .await?;

    // The spreadsheet is passed through untouched and ignored; the
    // extension-less download is still recognised by its signature.
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    assert_eq!(result.events.len(), 1);
    assert_eq!(result.events[0].title, "Hidden");
    assert_eq!(result.stats.total_files, 2);
    assert_eq!(result.stats.skipped, 1);
    Ok(())
}
