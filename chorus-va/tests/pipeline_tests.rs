//! End-to-end pipeline tests: reference preparation through scoring

mod helpers;

use chorus_common::events::ChorusEvent;
use chorus_va::models::{JobStatus, Section};
use helpers::{melody, silence, Note, TestHarness};

#[tokio::test]
async fn test_identical_performance_scores_full_marks() {
    let harness = TestHarness::with_defaults().await;
    let reference_track = harness.write_audio("reference.wav", &melody());
    let recording = harness.write_audio("take-1.wav", &melody());

    let reference = harness
        .service
        .prepare_reference("ave-verum", "soprano", &reference_track, false, None)
        .await
        .unwrap();
    let attempt_id = harness
        .service
        .analyze("soprano-7", "ave-verum", "soprano", &recording, None)
        .await
        .unwrap();

    let status = harness.wait_for_attempt(attempt_id).await;
    assert_eq!(status.status, JobStatus::Ready, "error: {:?}", status.error);

    let scores = status.scores.expect("READY attempt has scores");
    assert!(scores.pitch > 99.0, "pitch {}", scores.pitch);
    assert!(scores.timing > 99.0, "timing {}", scores.timing);
    assert!(scores.dynamics > 99.0, "dynamics {}", scores.dynamics);
    assert!(scores.overall > 99.0, "overall {}", scores.overall);

    let sections = status.sections.expect("READY attempt has sections");
    assert_eq!(sections.len(), 4);
    assert_eq!(sections[0].label, "Section 1");
    assert!(status.tips.map(|t| !t.is_empty()).unwrap_or(false));
    assert!(status.completed_at.is_some());

    let prepared = harness.service.get_reference(reference.reference_id).await.unwrap().unwrap();
    assert_eq!(prepared.status, JobStatus::Ready);
    assert_eq!(prepared.isolation_model_id.as_deref(), Some("none"));
    assert!(!prepared.isolation_degraded);
    assert_eq!(prepared.source_duration_ms, Some(4000));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_out_of_tune_performance_loses_pitch_points() {
    let harness = TestHarness::with_defaults().await;

    // One sustained pitch with a loudness contour; the take is 2.5 semitones
    // sharp throughout, beyond the 2 semitone tolerance wherever it aligns
    let contour = |freq: f32| -> Vec<Note> {
        melody()
            .into_iter()
            .map(|n| Note::tone(freq, n.duration_ms, n.amplitude))
            .collect()
    };
    let reference_track = harness.write_audio("reference.wav", &contour(220.0));
    let recording = harness.write_audio("sharp.wav", &contour(220.0 * 1.155_3));

    harness
        .service
        .prepare_reference("ave-verum", "alto", &reference_track, false, None)
        .await
        .unwrap();
    let attempt_id = harness
        .service
        .analyze("alto-2", "ave-verum", "alto", &recording, None)
        .await
        .unwrap();

    let status = harness.wait_for_attempt(attempt_id).await;
    assert_eq!(status.status, JobStatus::Ready, "error: {:?}", status.error);
    let scores = status.scores.unwrap();
    assert!(scores.pitch < 5.0, "pitch {}", scores.pitch);
    assert!(scores.overall < 60.0, "overall {}", scores.overall);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_custom_sections_are_reported() {
    let harness = TestHarness::with_defaults().await;
    let reference_track = harness.write_audio("reference.wav", &melody());
    let recording = harness.write_audio("take.wav", &melody());

    harness
        .service
        .prepare_reference("gloria", "tenor", &reference_track, false, None)
        .await
        .unwrap();

    let sections = vec![
        Section {
            label: "Verse".to_string(),
            start_ms: 0,
            end_ms: 2000,
        },
        Section {
            label: "Chorus".to_string(),
            start_ms: 2000,
            end_ms: 4000,
        },
    ];
    let attempt_id = harness
        .service
        .analyze("tenor-1", "gloria", "tenor", &recording, Some(sections))
        .await
        .unwrap();

    let status = harness.wait_for_attempt(attempt_id).await;
    assert_eq!(status.status, JobStatus::Ready, "error: {:?}", status.error);
    let labels: Vec<String> = status.sections.unwrap().into_iter().map(|s| s.label).collect();
    assert_eq!(labels, vec!["Verse".to_string(), "Chorus".to_string()]);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_short_recording_fails_with_decode_error() {
    let harness = TestHarness::with_defaults().await;
    let reference_track = harness.write_audio("reference.wav", &melody());
    let recording = harness.write_audio("short.wav", &[Note::tone(220.0, 500, 0.5)]);

    harness
        .service
        .prepare_reference("kyrie", "bass", &reference_track, false, None)
        .await
        .unwrap();
    let attempt_id = harness
        .service
        .analyze("bass-3", "kyrie", "bass", &recording, None)
        .await
        .unwrap();

    let status = harness.wait_for_attempt(attempt_id).await;
    assert_eq!(status.status, JobStatus::Failed);
    assert_eq!(status.error_kind.as_deref(), Some("DECODE_ERROR"));
    assert!(status.error.unwrap().contains("too short"));
    assert!(status.scores.is_none());

    harness.shutdown().await;
}

#[tokio::test]
async fn test_silent_recording_fails_with_silence_error() {
    let harness = TestHarness::with_defaults().await;
    let reference_track = harness.write_audio("reference.wav", &melody());
    let recording = harness.write_audio("silent.wav", &silence(3000));

    harness
        .service
        .prepare_reference("kyrie", "alto", &reference_track, false, None)
        .await
        .unwrap();
    let attempt_id = harness
        .service
        .analyze("alto-9", "kyrie", "alto", &recording, None)
        .await
        .unwrap();

    let status = harness.wait_for_attempt(attempt_id).await;
    assert_eq!(status.status, JobStatus::Failed);
    assert_eq!(status.error_kind.as_deref(), Some("SILENCE_ERROR"));
    assert!(status.error.unwrap().starts_with("extract: "));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_missing_recording_fails_at_decode() {
    let harness = TestHarness::with_defaults().await;
    let reference_track = harness.write_audio("reference.wav", &melody());

    harness
        .service
        .prepare_reference("kyrie", "soprano", &reference_track, false, None)
        .await
        .unwrap();
    let attempt_id = harness
        .service
        .analyze("soprano-1", "kyrie", "soprano", "recordings/never-uploaded.wav", None)
        .await
        .unwrap();

    let status = harness.wait_for_attempt(attempt_id).await;
    assert_eq!(status.status, JobStatus::Failed);
    assert_eq!(status.error_kind.as_deref(), Some("DECODE_ERROR"));
    assert!(status.error.unwrap().starts_with("decode: "));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_recording_far_longer_than_reference_fails_alignment() {
    let harness = TestHarness::with_defaults().await;
    let reference_track = harness.write_audio("reference.wav", &[Note::tone(220.0, 1500, 0.5)]);
    let long: Vec<Note> = (0..3).flat_map(|_| melody()).collect();
    let recording = harness.write_audio("long.wav", &long);

    harness
        .service
        .prepare_reference("sanctus", "tenor", &reference_track, false, None)
        .await
        .unwrap();
    let attempt_id = harness
        .service
        .analyze("tenor-4", "sanctus", "tenor", &recording, None)
        .await
        .unwrap();

    let status = harness.wait_for_attempt(attempt_id).await;
    assert_eq!(status.status, JobStatus::Failed);
    assert_eq!(status.error_kind.as_deref(), Some("ALIGNMENT_ERROR"));
    assert!(status.error.unwrap().starts_with("align: "));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_analysis_without_reference_fails_at_reference_stage() {
    let harness = TestHarness::with_defaults().await;
    let recording = harness.write_audio("take.wav", &melody());

    let attempt_id = harness
        .service
        .analyze("bass-1", "unknown-song", "bass", &recording, None)
        .await
        .unwrap();

    let status = harness.wait_for_attempt(attempt_id).await;
    assert_eq!(status.status, JobStatus::Failed);
    assert_eq!(status.error_kind.as_deref(), Some("PIPELINE_ERROR"));
    assert!(status.error.unwrap().starts_with("reference: "));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_completion_and_failure_events_are_emitted() {
    let harness = TestHarness::with_defaults().await;
    let mut rx = harness.event_bus.subscribe();

    let reference_track = harness.write_audio("reference.wav", &melody());
    let good = harness.write_audio("good.wav", &melody());
    let short = harness.write_audio("short.wav", &[Note::tone(220.0, 300, 0.5)]);

    harness
        .service
        .prepare_reference("agnus-dei", "alto", &reference_track, false, None)
        .await
        .unwrap();
    let good_id = harness
        .service
        .analyze("alto-1", "agnus-dei", "alto", &good, None)
        .await
        .unwrap();
    let short_id = harness
        .service
        .analyze("alto-1", "agnus-dei", "alto", &short, None)
        .await
        .unwrap();

    harness.wait_for_attempt(good_id).await;
    harness.wait_for_attempt(short_id).await;

    let mut completed = false;
    let mut failed_stage = None;
    while let Ok(event) = rx.try_recv() {
        match event {
            ChorusEvent::AnalysisCompleted { attempt_id, .. } if attempt_id == good_id => completed = true,
            ChorusEvent::AnalysisFailed { attempt_id, stage, .. } if attempt_id == short_id => {
                failed_stage = Some(stage)
            }
            _ => {}
        }
    }
    assert!(completed);
    assert_eq!(failed_stage.as_deref(), Some("extract"));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_user_history_lists_attempts_newest_first() {
    let harness = TestHarness::with_defaults().await;
    let reference_track = harness.write_audio("reference.wav", &melody());
    let recording = harness.write_audio("take.wav", &melody());

    harness
        .service
        .prepare_reference("benedictus", "soprano", &reference_track, false, None)
        .await
        .unwrap();

    let first = harness
        .service
        .analyze("soprano-2", "benedictus", "soprano", &recording, None)
        .await
        .unwrap();
    harness.wait_for_attempt(first).await;
    let second = harness
        .service
        .analyze("soprano-2", "benedictus", "soprano", &recording, None)
        .await
        .unwrap();
    harness.wait_for_attempt(second).await;

    let history = harness.service.list_attempts("soprano-2", 10).await.unwrap();
    let ids: Vec<_> = history.iter().map(|a| a.attempt_id).collect();
    assert_eq!(ids, vec![second, first]);
    assert!(history.iter().all(|a| a.status == JobStatus::Ready));

    harness.shutdown().await;
}
