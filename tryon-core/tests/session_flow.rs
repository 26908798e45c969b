//! End-to-end session flows against in-process fakes.

mod helpers;

use std::time::Duration;

use helpers::*;
use tryon_core::{
    AttemptPolicy, CatalogItem, Category, EngineError, EngineKind, ErrorKind, ErrorStage,
    GarmentSelection, ResultState, SessionEvent, Step, TryOnError, UploadError,
};

#[tokio::test]
async fn primary_success_ends_done() {
    let primary = ScriptedEngine::ok(EngineKind::Primary);
    let fallback = ScriptedEngine::ok(EngineKind::Fallback);
    let h = harness(primary.clone(), Some(fallback.clone()), AttemptPolicy::default());

    stage_both(&h.machine, "a black leather jacket with silver zippers").await;
    let before = h.machine.snapshot().await;
    assert_eq!(before.step, Step::ReviewAndConfirm);
    assert_eq!(h.uploads.calls(), 2);

    let done = h.machine.generate().await.unwrap();
    assert_eq!(done.step, Step::Done);
    assert_eq!(done.category, Some(Category::UpperBody));
    assert_eq!(done.request_epoch, 1);
    let result = done.result.unwrap();
    assert_eq!(result.engine_used, EngineKind::Primary);
    assert_eq!(result.result_ref, "http://localhost:8000/api/result/primary.jpg");
    assert_eq!((primary.calls(), fallback.calls()), (1, 0));

    let sent = &primary.requests()[0];
    assert_eq!(sent.subject.remote_path, "uploads/models/me.jpg");
    assert_eq!(sent.garment.remote_path, "uploads/clothes/garment.jpg");
    assert_eq!(sent.epoch, 1);
}

#[tokio::test]
async fn service_error_recovers_via_fallback() {
    let primary = ScriptedEngine::failing(EngineKind::Primary, service_error());
    let fallback = ScriptedEngine::ok(EngineKind::Fallback);
    let h = harness(primary.clone(), Some(fallback.clone()), AttemptPolicy::default());

    stage_both(&h.machine, "dark blue slim fit jeans").await;
    let done = h.machine.generate().await.unwrap();

    assert_eq!(done.step, Step::Done);
    assert_eq!(done.category, Some(Category::LowerBody));
    let result = done.result.unwrap();
    assert_eq!(result.engine_used, EngineKind::Fallback);
    assert!(result.via_fallback());
    assert_eq!(h.machine.fallback_attempts(1).await, 1);

    // the fallback received the subject bytes
    let sent = &fallback.requests()[0];
    assert!(sent.subject.data.as_ref().is_some_and(|d| !d.is_empty()));
    assert!(matches!(h.machine.result_state(), ResultState::Succeeded { epoch: 1, .. }));
}

#[tokio::test]
async fn malformed_reference_fails_without_fallback() {
    let primary = ScriptedEngine::failing(
        EngineKind::Primary,
        EngineError::MalformedReference("cloth_path does not exist".into()),
    );
    let fallback = ScriptedEngine::ok(EngineKind::Fallback);
    let h = harness(primary.clone(), Some(fallback.clone()), AttemptPolicy::default());

    stage_both(&h.machine, "a silk blouse").await;
    let failed = h.machine.generate().await.unwrap();

    assert_eq!(failed.step, Step::Failed);
    let error = failed.last_error.unwrap();
    assert_eq!(error.kind, ErrorKind::Validation);
    assert!(!error.retryable);
    assert!(error.user_message().starts_with("Invalid input"));
    assert_eq!(fallback.calls(), 0);
    assert_eq!(h.machine.fallback_attempts(1).await, 0);

    let err = h.machine.retry().await.err().unwrap();
    assert!(matches!(err, TryOnError::NotRetryable(_)));
}

#[tokio::test]
async fn both_engines_failing_then_retry() {
    let primary = ScriptedEngine::failing(EngineKind::Primary, service_error());
    let fallback = ScriptedEngine::failing(
        EngineKind::Fallback,
        EngineError::Rejected("AI Stylist not properly initialized".into()),
    );
    let h = harness(primary.clone(), Some(fallback.clone()), AttemptPolicy::default());

    stage_both(&h.machine, "an evening gown").await;
    let failed = h.machine.generate().await.unwrap();
    assert_eq!(failed.step, Step::Failed);
    let error = failed.last_error.clone().unwrap();
    assert!(error.both_engines_failed());
    assert_eq!(
        error.user_message(),
        "Both try-on methods failed. Please try again later."
    );
    assert_eq!((primary.calls(), fallback.calls()), (1, 1));

    let review = h.machine.retry().await.unwrap();
    assert_eq!(review.step, Step::ReviewAndConfirm);
    assert!(review.last_error.is_none());
    assert!(review.subject_ready() && review.garment_ready());

    let again = h.machine.generate().await.unwrap();
    assert_eq!(again.request_epoch, 2);
    assert_eq!((primary.calls(), fallback.calls()), (2, 2));
    assert_eq!(h.machine.fallback_attempts(1).await, 1);
    assert_eq!(h.machine.fallback_attempts(2).await, 1);
}

#[tokio::test]
async fn fallback_not_finding_uploaded_garment_reads_as_exhaustion() {
    let primary = ScriptedEngine::failing(EngineKind::Primary, service_error());
    let fallback = ScriptedEngine::failing(
        EngineKind::Fallback,
        EngineError::Status {
            status: 404,
            detail: "Clothing item uploads/clothes/garment.jpg not found".into(),
        },
    );
    let h = harness(primary.clone(), Some(fallback.clone()), AttemptPolicy::default());

    stage_both(&h.machine, "a linen shirt").await;
    let failed = h.machine.generate().await.unwrap();
    assert_eq!(failed.step, Step::Failed);
    assert_eq!((primary.calls(), fallback.calls()), (1, 1));

    let error = failed.last_error.unwrap();
    assert!(error.both_engines_failed());
    assert!(error.retryable);
    assert_eq!(
        error.user_message(),
        "Both try-on methods failed. Please try again later."
    );

    let review = h.machine.retry().await.unwrap();
    assert_eq!(review.step, Step::ReviewAndConfirm);
}

#[tokio::test]
async fn oversized_subject_rejected_before_network() {
    let h = harness(
        ScriptedEngine::ok(EngineKind::Primary),
        None,
        AttemptPolicy::default(),
    );

    let err = h
        .machine
        .upload_subject(oversized_png(11 * 1024 * 1024))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, TryOnError::Upload(UploadError::Validation(_))));
    assert_eq!(h.uploads.calls(), 0);

    let session = h.machine.snapshot().await;
    assert_eq!(session.step, Step::DescribeOrSelectGarment);
    assert!(session.subject_asset.is_none());
    let error = session.last_error.unwrap();
    assert_eq!((error.stage, error.kind), (ErrorStage::Upload, ErrorKind::Validation));
}

#[tokio::test]
async fn describe_generates_garment_and_classifies_text() {
    let primary = ScriptedEngine::ok(EngineKind::Primary);
    let h = harness_with_generator(
        primary.clone(),
        None,
        AttemptPolicy::default(),
        FixedGenerator::degraded(),
    );

    let session = h
        .machine
        .describe_garment("  A red floral summer dress with short sleeves ")
        .await
        .unwrap();
    assert_eq!(session.step, Step::UploadSubject);
    let garment = session.garment_asset.unwrap();
    assert!(garment.degraded);
    assert_eq!(
        garment.remote_path.as_deref(),
        Some("api/generated/generated_clothing_1.png")
    );
    assert_eq!(
        h.generator.prompts(),
        vec!["A red floral summer dress with short sleeves".to_string()]
    );

    h.machine.upload_subject(jpeg("me.jpg")).await.unwrap();
    let done = h.machine.generate().await.unwrap();
    assert_eq!(done.category, Some(Category::FullBody));
    assert_eq!(primary.requests()[0].category, Category::FullBody);
    assert!(h
        .machine
        .events()
        .await
        .iter()
        .any(|e| matches!(e.event, SessionEvent::GarmentGenerated { degraded: true, .. })));
}

#[tokio::test]
async fn empty_description_is_validation_error() {
    let h = harness(
        ScriptedEngine::ok(EngineKind::Primary),
        None,
        AttemptPolicy::default(),
    );

    let err = h.machine.describe_garment("   ").await.err().unwrap();
    assert!(matches!(err, TryOnError::Validation(_)));
    assert_eq!(h.generator.calls(), 0);

    let session = h.machine.snapshot().await;
    assert_eq!(session.step, Step::DescribeOrSelectGarment);
    let error = session.last_error.unwrap();
    assert_eq!(error.stage, ErrorStage::Classification);
    assert!(!error.retryable);
}

#[tokio::test]
async fn catalog_selection_uses_hint_and_item_id() {
    let primary = ScriptedEngine::failing(EngineKind::Primary, service_error());
    let fallback = ScriptedEngine::ok(EngineKind::Fallback);
    let h = harness(primary.clone(), Some(fallback.clone()), AttemptPolicy::default());

    // name alone would classify as UpperBody ("top")
    let item = CatalogItem {
        item_id: "item-0042".into(),
        name: "Pleated top-stitch skirt".into(),
        image_path: "static/catalog/skirt.jpg".into(),
        category: Some(Category::FullBody),
    };
    let session = h
        .machine
        .select_garment(GarmentSelection::Catalog(item))
        .await
        .unwrap();
    assert_eq!(session.step, Step::UploadSubject);
    assert_eq!(h.uploads.calls(), 0);

    h.machine.upload_subject(jpeg("me.jpg")).await.unwrap();
    let done = h.machine.generate().await.unwrap();
    assert_eq!(done.category, Some(Category::FullBody));
    assert!(done.result.unwrap().via_fallback());

    let sent = &fallback.requests()[0];
    assert_eq!(sent.garment.catalog_item_id.as_deref(), Some("item-0042"));
    assert_eq!(sent.garment.remote_path, "static/catalog/skirt.jpg");
}

#[tokio::test]
async fn try_another_style_reuses_subject() {
    let primary = ScriptedEngine::ok(EngineKind::Primary);
    let h = harness(primary.clone(), None, AttemptPolicy::default());

    stage_both(&h.machine, "a wool sweater").await;
    let first = h.machine.generate().await.unwrap();

    let cleared = h.machine.try_another_style().await.unwrap();
    assert_eq!(cleared.id, first.id);
    assert_eq!(cleared.step, Step::DescribeOrSelectGarment);
    assert!(cleared.subject_ready());
    assert!(cleared.garment_asset.is_none());
    assert!(cleared.result.is_none());
    assert_eq!(h.machine.result_state(), ResultState::Empty);

    let review = h
        .machine
        .describe_garment("cargo shorts")
        .await
        .unwrap();
    assert_eq!(review.step, Step::ReviewAndConfirm);

    let second = h.machine.generate().await.unwrap();
    assert_eq!(second.request_epoch, 2);
    assert_eq!(second.category, Some(Category::LowerBody));
    assert_eq!(h.uploads.calls(), 2);
}

#[tokio::test]
async fn subscriber_observes_terminal_state() {
    let h = harness(
        ScriptedEngine::ok(EngineKind::Primary),
        None,
        AttemptPolicy::default(),
    );
    let mut rx = h.machine.subscribe();

    stage_both(&h.machine, "a hoodie").await;
    let ticket = h.machine.confirm_and_generate().await.unwrap();
    assert_eq!(ticket.epoch, 1);

    rx.wait_for(|state| state.is_terminal()).await.unwrap();
    assert!(matches!(*rx.borrow(), ResultState::Succeeded { epoch: 1, .. }));
    ticket.wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn primary_timeout_engages_fallback() {
    let primary = ScriptedEngine::slow(EngineKind::Primary, Duration::from_secs(3600));
    let fallback = ScriptedEngine::ok(EngineKind::Fallback);
    let policy = AttemptPolicy {
        primary_timeout: Duration::from_secs(600),
        fallback_timeout: Duration::from_secs(15),
        fallback_enabled: true,
    };
    let h = harness(primary.clone(), Some(fallback.clone()), policy);

    stage_both(&h.machine, "a linen shirt").await;
    let done = h.machine.generate().await.unwrap();
    assert_eq!(done.step, Step::Done);
    assert!(done.result.unwrap().via_fallback());

    let failed_attempt = h
        .machine
        .events()
        .await
        .into_iter()
        .find_map(|e| match e.event {
            SessionEvent::AttemptFailed { engine: EngineKind::Primary, error, .. } => Some(error),
            _ => None,
        })
        .unwrap();
    assert_eq!(failed_attempt.kind, ErrorKind::NetworkTimeout);
}

#[tokio::test(start_paused = true)]
async fn both_deadlines_expiring_fails_the_session() {
    let primary = ScriptedEngine::slow(EngineKind::Primary, Duration::from_secs(3600));
    let fallback = ScriptedEngine::slow(EngineKind::Fallback, Duration::from_secs(3600));
    let policy = AttemptPolicy {
        primary_timeout: Duration::from_secs(30),
        fallback_timeout: Duration::from_secs(15),
        fallback_enabled: true,
    };
    let h = harness(primary, Some(fallback), policy);

    stage_both(&h.machine, "a jumpsuit").await;
    let failed = h.machine.generate().await.unwrap();
    assert_eq!(failed.step, Step::Failed);
    let error = failed.last_error.unwrap();
    assert_eq!(error.kind, ErrorKind::NetworkTimeout);
    assert!(error.retryable);
    assert!(error.both_engines_failed());
}

#[tokio::test]
async fn disabled_fallback_makes_primary_failure_terminal() {
    let primary = ScriptedEngine::failing(
        EngineKind::Primary,
        EngineError::Status {
            status: 429,
            detail: "Too Many Requests".into(),
        },
    );
    let fallback = ScriptedEngine::ok(EngineKind::Fallback);
    let policy = AttemptPolicy {
        fallback_enabled: false,
        ..AttemptPolicy::default()
    };
    let h = harness(primary, Some(fallback.clone()), policy);

    stage_both(&h.machine, "a tee").await;
    let failed = h.machine.generate().await.unwrap();
    let error = failed.last_error.unwrap();
    assert_eq!(error.kind, ErrorKind::RateLimited);
    assert!(error.user_message().contains("rate limited"));
    assert_eq!(fallback.calls(), 0);
}
