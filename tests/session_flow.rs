mod common;

use common::{test_config, upload_out, ScriptedBackend};
use segscope::{
    backend::{JobStatus, ResegmentOut, ResultsOut},
    export::ExportKind,
    poller::JobOutcome,
    predictions::TumorIndexSet,
    session::{ResegmentOutcome, Session, METADATA_FETCH_FAILED},
    state::{JobPhase, SharedStudyState, StudyEvent, StudyRecord},
    urls::bust_token,
};
use serde_json::json;

fn dicom_dir(n: usize) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for i in 1..=n {
        std::fs::write(dir.path().join(format!("IM{i:03}.DCM")), b"DICM").unwrap();
    }
    std::fs::write(dir.path().join("notes.txt"), b"skip me").unwrap();
    dir
}

fn session_with_study(backend: ScriptedBackend, n: usize) -> Session<ScriptedBackend> {
    let store = SharedStudyState::new();
    let record = StudyRecord::seeded("http://api.test", "s1", vec!["f.dcm".into(); n]);
    store.dispatch(StudyEvent::Uploaded { record });
    Session::with_store(&test_config(), backend, store)
}

fn finished_session(backend: ScriptedBackend, n: usize) -> Session<ScriptedBackend> {
    let session = session_with_study(backend, n);
    let store = session.store();
    store.dispatch(StudyEvent::JobRequested);
    store.dispatch(StudyEvent::JobStarted { job_id: "j1".into() });
    store.dispatch(StudyEvent::JobCompleted {
        job_id: "j1".into(),
        token: 10,
    });
    session
}

#[test]
fn upload_filters_extensions_and_seeds_record() {
    let dir = dicom_dir(3);
    let backend = ScriptedBackend {
        upload: Some(upload_out("s9", 3)),
        ..Default::default()
    };
    let session = Session::new(&test_config(), backend);

    let record = session.upload(&[dir.path().to_path_buf()]).unwrap().unwrap();
    assert_eq!(session.backend().calls(), vec!["upload 3".to_string()]);
    assert_eq!(record.study_id, "s9");
    assert_eq!(record.images[2], "http://api.test/images/s9/3.png");
    assert_eq!(record.images_with_masks[0], "http://api.test/images/s9/1/overlay.png");
    assert_eq!(record.file_names[1], "IM002.dcm");
    assert_eq!(session.store().record(), Some(record));
}

#[test]
fn upload_with_no_matching_files_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.png"), b"x").unwrap();
    let session = Session::new(&test_config(), ScriptedBackend::default());
    assert!(session.upload(&[dir.path().to_path_buf()]).unwrap().is_none());
    assert!(session.backend().calls().is_empty());
    assert!(session.store().record().is_none());
}

#[test]
fn upload_failure_leaves_state_untouched() {
    let dir = dicom_dir(1);
    let session = session_with_study(ScriptedBackend::default(), 2);
    let before = session.store().snapshot();
    assert!(session.upload(&[dir.path().to_path_buf()]).is_err());
    assert_eq!(session.store().snapshot(), before);
}

#[test]
fn full_flow_from_upload_to_selection() {
    let dir = dicom_dir(5);
    let mut backend = ScriptedBackend::with_job("j1", &[JobStatus::Pending, JobStatus::Done]);
    backend.upload = Some(upload_out("s1", 5));
    backend.results = Some(ResultsOut {
        total_volume_cc: Some(2.0),
        classifier_results: Some(json!([0, 1, 0, 1, 0])),
        ..Default::default()
    });
    let session = Session::new(&test_config(), backend);

    session.upload(&[dir.path().to_path_buf()]).unwrap();
    let outcome = session.run_segmentation();
    assert!(matches!(outcome, JobOutcome::Done { results_merged: true, .. }));

    let browser = session.browser().unwrap();
    let expected: TumorIndexSet = [1, 2, 3].into_iter().collect();
    assert_eq!(browser.selected(), &expected);
    assert_eq!(browser.resegment_slices(), vec![2, 3, 4]);
}

#[test]
fn resegment_busts_overlays_and_refreshes_results() {
    let mut backend = ScriptedBackend::default();
    backend.resegment = Some(ResegmentOut {
        study_id: Some("s1".into()),
        updated_slices: vec![2, 3],
    });
    backend.results = Some(ResultsOut {
        total_volume_cc: Some(9.0),
        slice_areas_cc: Some(vec![json!(0), json!(1), json!(1), json!(0)]),
        ..Default::default()
    });
    let session = finished_session(backend, 4);
    let selection: TumorIndexSet = [1, 2].into_iter().collect();

    let outcome = session.resegment(&selection);
    assert_eq!(
        outcome,
        ResegmentOutcome::Applied {
            slices: vec![2, 3],
            updated_slices: vec![2, 3],
            results_merged: true,
        }
    );
    assert_eq!(
        session.backend().calls(),
        vec!["resegment s1 [2, 3]".to_string(), "results j1".to_string()]
    );
    let state = session.store().snapshot();
    assert_eq!(state.phase, JobPhase::Done);
    let r = state.record.unwrap();
    assert!(r.masks_ready);
    assert!(r.images_with_masks.iter().all(|u| bust_token(u).unwrap() > 10));
    assert_eq!(r.info.get("total_volume"), Some(&json!(9.0)));
    assert_eq!(r.info.get("slice_areas_cc"), Some(&json!([0, 1, 1, 0])));
    assert_eq!(r.classifier_results, Some(json!([false, true, true, false])));
}

#[test]
fn resegment_failure_is_swallowed() {
    let session = finished_session(ScriptedBackend::default(), 3);
    let before = session.store().record();
    let selection: TumorIndexSet = [0].into_iter().collect();

    let outcome = session.resegment(&selection);
    assert!(matches!(outcome, ResegmentOutcome::Aborted { .. }));
    assert_eq!(session.store().record(), before);
    assert_eq!(session.store().phase(), JobPhase::Idle);
}

#[test]
fn resegment_with_empty_selection_is_skipped() {
    let session = finished_session(ScriptedBackend::default(), 3);
    assert_eq!(
        session.resegment(&TumorIndexSet::new()),
        ResegmentOutcome::Skipped
    );
    assert!(session.backend().calls().is_empty());
}

#[test]
fn refresh_info_merges_metadata_and_volumes() {
    let mut backend = ScriptedBackend::default();
    backend.info = Some(
        [
            ("patient_id".to_string(), json!("P7")),
            ("pixel_spacing_mm".to_string(), json!([0.4, 0.4])),
        ]
        .into_iter()
        .collect(),
    );
    backend.results = Some(ResultsOut {
        total_volume_cc: Some(5.5),
        ..Default::default()
    });
    let session = finished_session(backend, 2);

    session.refresh_info().unwrap();
    let info = session.store().record().unwrap().info;
    assert_eq!(info.get("patient_id"), Some(&json!("P7")));
    assert_eq!(info.get("total_volume"), Some(&json!(5.5)));
    // The results document carried no spacing, so the metadata value stays.
    assert_eq!(info.get("pixel_spacing_mm"), Some(&json!([0.4, 0.4])));
}

#[test]
fn refresh_info_failure_has_generic_message() {
    let session = session_with_study(ScriptedBackend::default(), 2);
    let err = session.refresh_info().unwrap_err();
    assert_eq!(err.to_string(), METADATA_FETCH_FAILED);
}

#[test]
fn mask_exports_wait_for_masks() {
    let out = tempfile::tempdir().unwrap();
    let session = session_with_study(ScriptedBackend::default(), 2);
    assert!(session.export(ExportKind::Overlays, Some("p"), out.path()).is_err());
    let ok = session.export(ExportKind::Pngs, Some("p"), out.path()).unwrap();
    assert_eq!(ok.path, out.path().join("p_images.zip"));
    assert_eq!(ok.url, "http://api.test/export/s1/images.zip?kind=pngs&prefix=p");
}

#[test]
fn export_derives_prefix_from_metadata() {
    let out = tempfile::tempdir().unwrap();
    let mut backend = ScriptedBackend::default();
    backend.info = Some(
        [
            ("study_date".to_string(), json!("20240105")),
            ("patient_id".to_string(), json!("PAT 1")),
        ]
        .into_iter()
        .collect(),
    );
    let session = finished_session(backend, 2);

    let done = session.export(ExportKind::MasksMat, None, out.path()).unwrap();
    assert_eq!(done.path, out.path().join("20240105_PAT 1_masks.mat"));
    assert_eq!(
        done.url,
        "http://api.test/export/s1/masks?format=mat&prefix=20240105_PAT+1"
    );
    assert!(done.path.exists());
}
