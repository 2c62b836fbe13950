use super::*;

use std::io::Cursor;

use image::{DynamicImage, ImageFormat};

use crate::{
    fake_api::{analysis, FakeApi, PredictReply},
    selection::BlobPreviewRegistry,
};

fn encoded(format: ImageFormat, width: u32, height: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::new_rgb8(width, height)
        .write_to(&mut Cursor::new(&mut bytes), format)
        .expect("encode test image");
    bytes
}

fn jpeg(name: &str) -> ImageFile {
    ImageFile::new(name, encoded(ImageFormat::Jpeg, 100, 100))
}

fn road_and_sky() -> AnalysisResult {
    analysis("road", &[(0, "road", 42.5), (1, "sky", 30.0)])
}

struct Harness {
    api: Arc<FakeApi>,
    previews: Arc<BlobPreviewRegistry>,
    controller: Arc<WorkflowController>,
}

fn harness_with_timeout(request_timeout: Duration) -> Harness {
    let api = Arc::new(FakeApi::new());
    let previews = BlobPreviewRegistry::new();
    let controller = Arc::new(WorkflowController::new(
        api.clone(),
        previews.clone(),
        request_timeout,
    ));
    Harness {
        api,
        previews,
        controller,
    }
}

fn harness() -> Harness {
    harness_with_timeout(Duration::from_secs(5))
}

fn spawn_submit(
    controller: &Arc<WorkflowController>,
) -> tokio::task::JoinHandle<Result<SubmitOutcome, ClientError>> {
    let controller = Arc::clone(controller);
    tokio::spawn(async move { controller.submit().await })
}

#[tokio::test]
async fn successful_submission_exposes_dominant_badge() {
    let h = harness();
    h.api.push_predict(PredictReply::Ready(Ok(road_and_sky())));

    h.controller.select(jpeg("street.jpg")).expect("select");
    let selected = h.controller.phase();
    assert_eq!(selected.name(), "selecting");
    assert_eq!(
        selected.selection().and_then(|s| s.dimensions),
        Some(shared::domain::ImageSize {
            width: 100,
            height: 100
        })
    );
    assert_eq!(selected.message(), None);

    let outcome = h.controller.submit().await.expect("admitted");
    assert!(matches!(outcome, SubmitOutcome::Succeeded(_)));

    let phase = h.controller.phase();
    let result = phase.result().expect("result present");
    assert_eq!(result.dominant_badge(), "road (42.5%)");
    assert_eq!(result.class_statistics.len(), 2);
    assert_eq!(h.api.uploaded_files(), vec!["street.jpg".to_string()]);
}

#[tokio::test]
async fn submit_without_file_is_rejected_locally() {
    let h = harness();

    let err = h.controller.submit().await.expect_err("must reject");
    assert_eq!(err.kind(), shared::error::ErrorKind::Validation);

    let phase = h.controller.phase();
    assert_eq!(phase.name(), "selecting");
    assert!(phase.selection().is_none());
    assert_eq!(phase.message(), Some("Please select an image"));
    assert_eq!(h.api.predict_calls(), 0);
}

#[tokio::test]
async fn http_error_moves_to_failed_with_status_in_message() {
    let h = harness();
    h.api.push_predict(PredictReply::Ready(Err(ClientError::Protocol {
        status: 500,
        detail: "model crashed".into(),
    })));

    h.controller.select(jpeg("street.jpg")).expect("select");
    let outcome = h.controller.submit().await.expect("admitted");
    assert!(matches!(
        outcome,
        SubmitOutcome::Failed(ClientError::Protocol { status: 500, .. })
    ));

    let phase = h.controller.phase();
    assert_eq!(phase.name(), "failed");
    assert!(phase.message().expect("message").contains("500"));
    assert!(phase.result().is_none());
    match phase {
        WorkflowPhase::Failed { cause, .. } => {
            assert!(cause.to_string().contains("model crashed"));
        }
        other => panic!("unexpected phase {other:?}"),
    }
}

#[tokio::test]
async fn second_submit_while_in_flight_is_rejected() {
    let h = harness();
    let gate = h.api.push_gated();
    h.api.push_predict(PredictReply::Ready(Ok(analysis(
        "sky",
        &[(1, "sky", 90.0)],
    ))));

    h.controller.select(jpeg("street.jpg")).expect("select");
    let first = spawn_submit(&h.controller);
    h.api.wait_for_predict_calls(1).await;

    let second = h.controller.submit().await;
    assert_eq!(second, Err(ClientError::Busy));
    assert_eq!(
        h.controller.select(jpeg("other.jpg")),
        Err(ClientError::Busy)
    );
    assert_eq!(h.api.predict_calls(), 1);

    gate.send(Ok(road_and_sky())).expect("release");
    let outcome = first.await.expect("join").expect("admitted");
    assert!(matches!(outcome, SubmitOutcome::Succeeded(_)));
    assert_eq!(
        h.controller.phase().result().expect("result").dominant_class,
        "road"
    );
    assert_eq!(h.api.predict_calls(), 1);
}

#[tokio::test]
async fn progress_stage_tracks_in_flight_request() {
    let h = harness();
    let gate = h.api.push_gated();
    let mut phases = h.controller.subscribe();

    h.controller.select(jpeg("street.jpg")).expect("select");
    let pending = spawn_submit(&h.controller);
    h.api.wait_for_predict_calls(1).await;

    let phase = phases.borrow_and_update().clone();
    assert!(phase.is_submitting());
    assert_eq!(phase.progress_label(), Some("Uploading to the server..."));

    gate.send(Ok(road_and_sky())).expect("release");
    pending.await.expect("join").expect("admitted");
    assert_eq!(h.controller.phase().progress_label(), None);
}

#[tokio::test]
async fn reset_releases_preview_exactly_once() {
    let h = harness();
    h.api.push_predict(PredictReply::Ready(Ok(road_and_sky())));

    h.controller.select(jpeg("street.jpg")).expect("select");
    let preview = h
        .controller
        .phase()
        .selection()
        .expect("selection")
        .preview
        .clone();
    assert!(h.previews.resolve(&preview).is_some());

    h.controller.submit().await.expect("admitted");
    h.controller.reset();

    assert_eq!(h.controller.phase(), WorkflowPhase::Idle);
    assert_eq!(h.previews.created_count(), 1);
    assert_eq!(h.previews.revoked_count(), 1);
    assert_eq!(h.previews.unknown_revocations(), 0);
    assert_eq!(h.previews.live_count(), 0);
    assert!(h.previews.resolve(&preview).is_none());

    h.controller.reset();
    assert_eq!(h.previews.revoked_count(), 1);
    assert_eq!(h.previews.unknown_revocations(), 0);
}

#[tokio::test]
async fn reselecting_releases_previous_preview() {
    let h = harness();

    h.controller.select(jpeg("first.jpg")).expect("select");
    h.controller.select(jpeg("second.jpg")).expect("select");

    assert_eq!(h.previews.created_count(), 2);
    assert_eq!(h.previews.revoked_count(), 1);
    assert_eq!(h.previews.live_count(), 1);
    assert_eq!(
        h.controller
            .phase()
            .selection()
            .expect("selection")
            .image
            .file_name,
        "second.jpg"
    );
}

#[tokio::test]
async fn stale_response_after_reset_is_discarded() {
    let h = harness();
    let gate = h.api.push_gated();

    h.controller.select(jpeg("street.jpg")).expect("select");
    let pending = spawn_submit(&h.controller);
    h.api.wait_for_predict_calls(1).await;

    h.controller.reset();
    assert_eq!(h.previews.revoked_count(), 1);

    gate.send(Ok(road_and_sky())).expect("release");
    let outcome = pending.await.expect("join").expect("admitted");
    assert_eq!(outcome, SubmitOutcome::Discarded);
    assert_eq!(h.controller.phase(), WorkflowPhase::Idle);
    assert_eq!(h.previews.revoked_count(), 1);
    assert_eq!(h.previews.unknown_revocations(), 0);
}

#[tokio::test]
async fn stale_failure_does_not_overwrite_newer_submission() {
    let h = harness();
    let old_gate = h.api.push_gated();
    let new_gate = h.api.push_gated();

    h.controller.select(jpeg("old.jpg")).expect("select");
    let old = spawn_submit(&h.controller);
    h.api.wait_for_predict_calls(1).await;

    h.controller.reset();
    h.controller.select(jpeg("new.jpg")).expect("select");
    let new = spawn_submit(&h.controller);
    h.api.wait_for_predict_calls(2).await;

    old_gate
        .send(Err(ClientError::Transport("connection reset".into())))
        .expect("release old");
    assert_eq!(
        old.await.expect("join").expect("admitted"),
        SubmitOutcome::Discarded
    );
    assert!(h.controller.phase().is_submitting());

    new_gate.send(Ok(road_and_sky())).expect("release new");
    assert!(matches!(
        new.await.expect("join").expect("admitted"),
        SubmitOutcome::Succeeded(_)
    ));
    let phase = h.controller.phase();
    assert_eq!(
        phase.selection().expect("selection").image.file_name,
        "new.jpg"
    );
    assert!(phase.result().is_some());
}

#[tokio::test]
async fn hung_request_times_out_as_failure() {
    let h = harness_with_timeout(Duration::from_millis(50));
    h.api.push_predict(PredictReply::Hang);

    h.controller.select(jpeg("street.jpg")).expect("select");
    let outcome = h.controller.submit().await.expect("admitted");
    assert_eq!(
        outcome,
        SubmitOutcome::Failed(ClientError::Timeout(Duration::from_millis(50)))
    );
    assert_eq!(h.controller.phase().name(), "failed");
}

#[tokio::test]
async fn failed_submission_can_be_resubmitted() {
    let h = harness();
    h.api.push_predict(PredictReply::Ready(Err(ClientError::Transport(
        "connection refused".into(),
    ))));
    h.api.push_predict(PredictReply::Ready(Ok(road_and_sky())));

    h.controller.select(jpeg("street.jpg")).expect("select");
    h.controller.submit().await.expect("admitted");
    assert_eq!(h.controller.phase().name(), "failed");

    h.controller.submit().await.expect("admitted");
    assert_eq!(h.controller.phase().name(), "succeeded");
    assert_eq!(h.previews.created_count(), 1);
    assert_eq!(h.previews.live_count(), 1);
}

#[tokio::test]
async fn non_image_selection_is_rejected_without_touching_state() {
    let h = harness();
    h.controller.select(jpeg("street.jpg")).expect("select");

    let err = h
        .controller
        .select(ImageFile::new("notes.txt", b"hello".to_vec()))
        .expect_err("must reject");
    assert_eq!(err.kind(), shared::error::ErrorKind::Validation);
    assert_eq!(
        h.controller
            .phase()
            .selection()
            .expect("selection")
            .image
            .file_name,
        "street.jpg"
    );
    assert_eq!(h.previews.created_count(), 1);
}

#[tokio::test]
async fn oversized_image_gets_soft_notice() {
    let h = harness();
    let wide = ImageFile::new("wide.png", encoded(ImageFormat::Png, 4100, 2));

    h.controller.select(wide).expect("select");
    let phase = h.controller.phase();
    assert!(phase.message().expect("notice").contains("4096"));
    assert!(phase.selection().is_some());
}

#[tokio::test]
async fn dropping_controller_releases_live_preview() {
    let h = harness();
    h.controller.select(jpeg("street.jpg")).expect("select");

    let Harness {
        previews,
        controller,
        ..
    } = h;
    drop(controller);
    assert_eq!(previews.live_count(), 0);
    assert_eq!(previews.revoked_count(), 1);
}

#[tokio::test]
async fn aborted_submission_frees_the_in_flight_slot() {
    let h = harness();
    let _gate = h.api.push_gated();
    h.api.push_predict(PredictReply::Ready(Ok(road_and_sky())));

    h.controller.select(jpeg("street.jpg")).expect("select");
    let pending = spawn_submit(&h.controller);
    h.api.wait_for_predict_calls(1).await;

    pending.abort();
    let joined = pending.await;
    assert!(joined.expect_err("task aborted").is_cancelled());

    let phase = h.controller.phase();
    assert_eq!(phase.name(), "selecting");
    assert_eq!(phase.progress_label(), None);
    assert_eq!(phase.message(), Some(CANCELLED_MESSAGE));
    assert_eq!(
        phase.selection().expect("selection kept").image.file_name,
        "street.jpg"
    );
    assert_eq!(h.previews.live_count(), 1);

    let outcome = h.controller.submit().await.expect("slot released");
    assert!(matches!(outcome, SubmitOutcome::Succeeded(_)));
    assert_eq!(h.api.predict_calls(), 2);
    h.controller.select(jpeg("other.jpg")).expect("select after abort");
}

#[tokio::test]
async fn aborted_stale_submission_leaves_newer_one_alone() {
    let h = harness();
    let _old_gate = h.api.push_gated();
    let new_gate = h.api.push_gated();

    h.controller.select(jpeg("old.jpg")).expect("select");
    let old = spawn_submit(&h.controller);
    h.api.wait_for_predict_calls(1).await;

    h.controller.reset();
    h.controller.select(jpeg("new.jpg")).expect("select");
    let new = spawn_submit(&h.controller);
    h.api.wait_for_predict_calls(2).await;

    old.abort();
    let _ = old.await;
    assert!(h.controller.phase().is_submitting());

    new_gate.send(Ok(road_and_sky())).expect("release new");
    assert!(matches!(
        new.await.expect("join").expect("admitted"),
        SubmitOutcome::Succeeded(_)
    ));
}
