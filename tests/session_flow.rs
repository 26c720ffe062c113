use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use video_wi::config::Config;
use video_wi::document::{AssembleOptions, Block};
use video_wi::pipeline;
use video_wi::{FrameExtractor, Session, StaticFrameExtractor, Timestamp, WiError};

const DRAFT: &str = "\
## Overview
Operator assembles a pump housing.

## Procedure
[00:04] Place housing on fixture
[01:15] Insert impeller
[00:40] Torque bolts to 12 Nm
[00:04] Duplicate marker is ignored

## Notes
Wipe the fixture between units.";

fn fake_video(dir: &Path) -> PathBuf {
    let path = dir.join("pump.mp4");
    std::fs::write(&path, b"stand-in video").unwrap();
    path
}

fn docx_part(path: &Path, name: &str) -> String {
    let bytes = std::fs::read(path).unwrap();
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut part = archive.by_name(name).unwrap();
    let mut out = String::new();
    part.read_to_string(&mut out).unwrap();
    out
}

#[tokio::test]
async fn review_then_export() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::create(fake_video(dir.path())).unwrap();

    assert_eq!(session.load_draft(DRAFT).unwrap(), 3);
    let times: Vec<String> = session
        .registry()
        .iter()
        .map(|s| s.timestamp.to_string())
        .collect();
    assert_eq!(times, vec!["00:04", "01:15", "00:40"]);

    let extractor = Arc::new(StaticFrameExtractor::new());
    let report = session.extract_frames(extractor.clone(), 2).await;
    assert_eq!(report.extracted, 3);
    assert!(report.failures.is_empty());

    // drop the impeller step, then refresh the torque frame
    let impeller = session.registry().steps()[1].image().unwrap().to_path_buf();
    session.delete_step(1).unwrap();
    assert!(!impeller.exists());
    assert_eq!(session.registry().len(), 2);

    let refreshed = session.re_extract(1, extractor.as_ref()).await.unwrap();
    assert!(refreshed.is_file());
    assert_eq!(extractor.calls(), 4);

    let out = dir.path().join("out").join("pump.docx");
    std::fs::create_dir_all(out.parent().unwrap()).unwrap();
    let assembly = pipeline::write_document(&Config::default(), &session, &out)
        .await
        .unwrap();
    assert!(!assembly.is_partial());
    assert_eq!(assembly.document.images().count(), 2);

    let body = docx_part(&out, "word/document.xml");
    assert!(body.contains("Place housing on fixture"));
    assert!(body.contains("Torque bolts to 12 Nm"));
    assert!(!body.contains("Insert impeller"));
    assert!(body.contains("Wipe the fixture between units."));
}

#[tokio::test]
async fn failed_frames_export_as_text() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::create(fake_video(dir.path())).unwrap();
    session.load_draft(DRAFT).unwrap();

    let missing = Timestamp::parse("01:15").unwrap();
    let extractor: Arc<dyn FrameExtractor> =
        Arc::new(StaticFrameExtractor::new().failing_at(missing));
    let report = session.extract_frames(extractor, 4).await;
    assert_eq!(report.extracted, 2);
    assert_eq!(report.failures.len(), 1);
    assert!(matches!(report.failures[0], WiError::ExtractionFailed { .. }));
    assert!(report.failures[0].is_recoverable());

    let assembly = session.assemble(&AssembleOptions::default());
    assert_eq!(assembly.missing_images, vec![missing]);
    assert!(matches!(
        assembly.warning(),
        Some(WiError::AssemblyPartial { .. })
    ));

    let steps: Vec<&str> = assembly
        .document
        .blocks
        .iter()
        .filter_map(|b| match b {
            Block::Heading { level: 3, text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(steps, vec!["Step 1 [00:04]", "Step 2 [01:15]", "Step 3 [00:40]"]);
}

#[tokio::test]
async fn offline_build_writes_docx() {
    let dir = tempfile::tempdir().unwrap();
    let video = fake_video(dir.path());
    let out = dir.path().join("pump.docx");

    let assembly = pipeline::build_from_draft(
        &Config::default(),
        &video,
        DRAFT.to_string(),
        Arc::new(StaticFrameExtractor::new()),
        &out,
    )
    .await
    .unwrap();

    assert_eq!(assembly.document.images().count(), 3);
    assert!(docx_part(&out, "word/_rels/document.xml.rels").contains("media/image3.png"));
    assert!(docx_part(&out, "docProps/core.xml").contains("Work Instructions"));
}

#[test]
fn out_of_range_edits_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::create(fake_video(dir.path())).unwrap();
    session.load_draft("[00:01] Only step").unwrap();

    let err = session.delete_step(5).unwrap_err();
    assert!(matches!(err, WiError::IndexOutOfRange { index: 5, len: 1 }));
    assert!(!err.is_recoverable());
    assert_eq!(session.registry().len(), 1);
}
