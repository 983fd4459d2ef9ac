//! Document pipeline lifecycle tests
//!
//! Drive `DocumentProcessor` directly with a scripted analyst and scripted connection
//! probes, then inspect the persisted lifecycle records.

mod helpers;

use helpers::*;
use sacha_advisor::db::{behavior, request_logs};
use sacha_advisor::models::{Language, RequestContext, RequestStatus, Transition, UploadRequest};
use sacha_advisor::pipeline::{ProcessingError, StreamEvent, StreamStage};
use std::sync::Arc;
use std::time::Duration;

fn text_upload(session_id: &str, text: &str) -> UploadRequest {
    UploadRequest {
        session_id: Some(session_id.to_string()),
        filename: "policy.txt".to_string(),
        bytes: text.as_bytes().to_vec(),
        language: Language::English,
    }
}

#[tokio::test]
async fn test_completed_request_awaits_acknowledgment() {
    let analyst = Arc::new(ScriptedAnalyst::default());
    let (_temp_dir, state) = create_test_state(analyst.clone()).await;

    let document = state
        .processor
        .process(text_upload("s-complete", POLICY_TEXT), ScriptedProbe::connected())
        .await
        .unwrap();

    assert_eq!(document.status, "success");
    assert!(document.is_in_scope);
    assert_eq!(document.summary, EXPLANATION);
    assert_eq!(document.session_id, "s-complete");
    assert!(!document.cache_hit);

    let log = request_logs::load_request_log(&state.db, "s-complete")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(log.status, RequestStatus::CompletedNotViewed);
    assert_eq!(log.file_type, ".txt");
    assert_eq!(log.document_type.as_deref(), Some("health insurance policy"));
    assert_eq!(log.explanation.as_deref(), Some(EXPLANATION));
    assert_eq!(log.text_length, Some(POLICY_TEXT.chars().count() as i64));
    assert!(log.processing_time_ms.is_some());

    assert!(state.recorder.acknowledge("s-complete").await.unwrap());
    assert_eq!(
        request_logs::load_status(&state.db, "s-complete").await.unwrap(),
        Some(RequestStatus::Completed)
    );

    // A second acknowledgment finds nothing pending
    assert!(!state.recorder.acknowledge("s-complete").await.unwrap());
}

#[tokio::test]
async fn test_low_confidence_document_rejected() {
    let analyst = Arc::new(ScriptedAnalyst::classifying(in_scope(0.3)));
    let (_temp_dir, state) = create_test_state(analyst.clone()).await;

    let err = state
        .processor
        .process(text_upload("s-low", POLICY_TEXT), ScriptedProbe::connected())
        .await
        .unwrap_err();

    match &err {
        ProcessingError::Rejected { confidence, .. } => assert_eq!(*confidence, 0.3),
        other => panic!("Expected rejection, got {:?}", other),
    }
    assert_eq!(err.status_code(), 400);
    assert_eq!(ScriptedAnalyst::calls(&analyst.rejection_calls), 1);

    let log = request_logs::load_request_log(&state.db, "s-low")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(log.status, RequestStatus::RejectedBySachadvisor);
    assert_eq!(log.confidence, Some(0.3));
    assert!(log.rejection_reason.is_some());

    state.recorder.drain().await;
    let behavior = behavior::load_behavior(&state.db, "s-low")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(behavior.abandoned_at_step.as_deref(), Some("classification"));
}

#[tokio::test]
async fn test_out_of_scope_document_rejected_despite_confidence() {
    let analyst = Arc::new(ScriptedAnalyst::classifying(out_of_scope(0.95)));
    let (_temp_dir, state) = create_test_state(analyst).await;

    let err = state
        .processor
        .process(text_upload("s-resume", RESUME_TEXT), ScriptedProbe::connected())
        .await
        .unwrap_err();

    assert_eq!(err.code(), "REJECTED_DOCUMENT");
    assert!(err.user_message().contains("resume"));
    assert_eq!(
        request_logs::load_status(&state.db, "s-resume").await.unwrap(),
        Some(RequestStatus::RejectedBySachadvisor)
    );
}

#[tokio::test]
async fn test_disconnect_during_explanation_abandons_request() {
    let analyst = Arc::new(ScriptedAnalyst {
        explain_delay: Duration::from_millis(600),
        ..Default::default()
    });
    let (_temp_dir, state) = create_test_state(analyst.clone()).await;

    let probe = ScriptedProbe::disconnecting_after(Duration::from_millis(150));
    let result = state
        .processor
        .process(text_upload("s-gone", POLICY_TEXT), probe)
        .await;

    // Main path still finishes so its results reach the cache
    assert!(result.is_ok());

    let log = request_logs::load_request_log(&state.db, "s-gone")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(log.status, RequestStatus::AbandonedByUser);
    let elapsed = log.processing_time_ms.unwrap();
    assert!(
        (100..=250).contains(&elapsed),
        "processing time should reflect the disconnect, got {}ms",
        elapsed
    );
    assert!(log.explanation.is_none());

    state.recorder.drain().await;
    let behavior = behavior::load_behavior(&state.db, "s-gone")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(behavior.abandoned_at_step.as_deref(), Some("client_disconnect"));
    assert_eq!(behavior.file_size_bytes, Some(POLICY_TEXT.len() as i64));

    // Same document again is served from the cache
    let document = state
        .processor
        .process(text_upload("s-retry", POLICY_TEXT), ScriptedProbe::connected())
        .await
        .unwrap();
    assert!(document.cache_hit);
    assert_eq!(ScriptedAnalyst::calls(&analyst.explain_calls), 1);
    assert_eq!(ScriptedAnalyst::calls(&analyst.classify_calls), 1);
}

#[tokio::test]
async fn test_disconnect_after_monitor_stops_marks_undelivered() {
    let analyst = Arc::new(ScriptedAnalyst {
        explain_delay: Duration::from_millis(200),
        ..Default::default()
    });
    let (_temp_dir, pool) = create_test_db().await;
    let mut config = test_config();
    // Monitor polls once at start, then not again before the pipeline ends
    config.pipeline.monitor_interval_ms = 10_000;
    let state = sacha_advisor::AppState::new(
        pool,
        analyst,
        Arc::new(sacha_advisor::services::DocumentTextExtractor),
        config,
    );

    let probe = ScriptedProbe::disconnecting_after(Duration::from_millis(50));
    state
        .processor
        .process(text_upload("s-late", POLICY_TEXT), probe)
        .await
        .unwrap();

    assert_eq!(
        request_logs::load_status(&state.db, "s-late").await.unwrap(),
        Some(RequestStatus::Abandoned)
    );
    state.recorder.drain().await;
    let behavior = behavior::load_behavior(&state.db, "s-late")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(behavior.abandoned_at_step.as_deref(), Some("client_disconnect"));
}

#[tokio::test]
async fn test_repeat_document_served_from_cache() {
    let analyst = Arc::new(ScriptedAnalyst::default());
    let (_temp_dir, state) = create_test_state(analyst.clone()).await;

    let first = state
        .processor
        .process(text_upload("s-first", POLICY_TEXT), ScriptedProbe::connected())
        .await
        .unwrap();
    let second = state
        .processor
        .process(text_upload("s-second", POLICY_TEXT), ScriptedProbe::connected())
        .await
        .unwrap();

    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(first.summary, second.summary);
    assert_eq!(ScriptedAnalyst::calls(&analyst.classify_calls), 1);
    assert_eq!(ScriptedAnalyst::calls(&analyst.explain_calls), 1);

    let log = request_logs::load_request_log(&state.db, "s-second")
        .await
        .unwrap()
        .unwrap();
    assert!(log.cache_hit);
    assert_eq!(state.cache.stats().size, 2);
}

#[tokio::test]
async fn test_classification_and_explanation_run_concurrently() {
    let analyst = Arc::new(ScriptedAnalyst {
        classify_delay: Duration::from_millis(250),
        explain_delay: Duration::from_millis(250),
        ..Default::default()
    });
    let (_temp_dir, state) = create_test_state(analyst).await;

    let started = std::time::Instant::now();
    state
        .processor
        .process(text_upload("s-parallel", POLICY_TEXT), ScriptedProbe::connected())
        .await
        .unwrap();

    assert!(
        started.elapsed() < Duration::from_millis(450),
        "AI calls should overlap, took {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn test_unsupported_file_type_fails_validation() {
    let analyst = Arc::new(ScriptedAnalyst::default());
    let (_temp_dir, state) = create_test_state(analyst.clone()).await;

    let request = UploadRequest {
        session_id: Some("s-exe".to_string()),
        filename: "setup.exe".to_string(),
        bytes: vec![0x4d, 0x5a, 0x90, 0x00],
        language: Language::English,
    };
    let err = state
        .processor
        .process(request, ScriptedProbe::connected())
        .await
        .unwrap_err();

    assert!(matches!(err, ProcessingError::Validation(_)));
    assert_eq!(err.status_code(), 400);
    assert_eq!(ScriptedAnalyst::calls(&analyst.classify_calls), 0);

    let log = request_logs::load_request_log(&state.db, "s-exe")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(log.status, RequestStatus::InvalidFile);
    assert!(log.validation_failure_reason.unwrap().contains(".exe"));

    state.recorder.drain().await;
    let behavior = behavior::load_behavior(&state.db, "s-exe")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(behavior.abandoned_at_step.as_deref(), Some("validation"));
}

#[tokio::test]
async fn test_too_little_text_is_unreadable() {
    let analyst = Arc::new(ScriptedAnalyst::default());
    let (_temp_dir, state) = create_test_state(analyst.clone()).await;

    let err = state
        .processor
        .process(text_upload("s-short", "Premium: 100"), ScriptedProbe::connected())
        .await
        .unwrap_err();

    assert_eq!(err.code(), "UNREADABLE_DOCUMENT");
    assert_eq!(err.status_code(), 400);
    assert_eq!(ScriptedAnalyst::calls(&analyst.classify_calls), 0);
    assert_eq!(
        request_logs::load_status(&state.db, "s-short").await.unwrap(),
        Some(RequestStatus::UnreadableDocument)
    );
}

#[tokio::test]
async fn test_explanation_failure_is_system_error() {
    let analyst = Arc::new(ScriptedAnalyst {
        fail_explain: true,
        ..Default::default()
    });
    let (_temp_dir, state) = create_test_state(analyst).await;

    let err = state
        .processor
        .process(text_upload("s-ai-down", POLICY_TEXT), ScriptedProbe::connected())
        .await
        .unwrap_err();

    assert_eq!(err.code(), "EXPLANATION_FAILED");
    assert_eq!(err.status_code(), 500);
    assert!(!err.user_message().contains("connection reset"));

    assert_eq!(
        request_logs::load_status(&state.db, "s-ai-down").await.unwrap(),
        Some(RequestStatus::SystemError)
    );
    state.recorder.drain().await;
    let behavior = behavior::load_behavior(&state.db, "s-ai-down")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(behavior.abandoned_at_step.as_deref(), Some("processing"));
}

#[tokio::test]
async fn test_missing_session_token_is_generated() {
    let analyst = Arc::new(ScriptedAnalyst::default());
    let (_temp_dir, state) = create_test_state(analyst).await;

    let mut request = text_upload("", POLICY_TEXT);
    request.session_id = None;
    let document = state
        .processor
        .process(request, ScriptedProbe::connected())
        .await
        .unwrap();

    assert!(!document.session_id.is_empty());
    assert_eq!(
        request_logs::load_status(&state.db, &document.session_id)
            .await
            .unwrap(),
        Some(RequestStatus::CompletedNotViewed)
    );
}

#[tokio::test]
async fn test_concurrent_terminal_writes_have_one_winner() {
    let (_temp_dir, pool) = create_test_db().await;
    let recorder = sacha_advisor::pipeline::LifecycleRecorder::new(pool.clone());

    for round in 0..10 {
        let session_id = format!("s-race-{}", round);
        let ctx = RequestContext::new(session_id.clone(), ".pdf".to_string(), 1024, Language::English);
        assert!(recorder.begin(&ctx).await);

        let abandon = Transition::AbandonedByUser {
            processing_time_ms: 40,
        };
        let fail = Transition::SystemError {
            step: sacha_advisor::models::StopStep::Processing,
            reason: "upstream timeout".to_string(),
            processing_time_ms: 45,
        };
        let (abandoned, failed) = tokio::join!(
            recorder.transition(&session_id, &abandon, Some(1024)),
            recorder.transition(&session_id, &fail, Some(1024)),
        );

        assert!(abandoned ^ failed, "exactly one writer must win");
        let expected = if abandoned {
            RequestStatus::AbandonedByUser
        } else {
            RequestStatus::SystemError
        };
        assert_eq!(
            request_logs::load_status(&pool, &session_id).await.unwrap(),
            Some(expected)
        );
    }

    recorder.drain().await;
}

#[tokio::test]
async fn test_reused_session_token_starts_fresh_record() {
    let analyst = Arc::new(ScriptedAnalyst::default());
    let (_temp_dir, state) = create_test_state(analyst).await;

    state
        .processor
        .process(text_upload("s-reuse", "tiny"), ScriptedProbe::connected())
        .await
        .unwrap_err();
    assert_eq!(
        request_logs::load_status(&state.db, "s-reuse").await.unwrap(),
        Some(RequestStatus::UnreadableDocument)
    );

    state
        .processor
        .process(text_upload("s-reuse", POLICY_TEXT), ScriptedProbe::connected())
        .await
        .unwrap();
    assert_eq!(
        request_logs::load_status(&state.db, "s-reuse").await.unwrap(),
        Some(RequestStatus::CompletedNotViewed)
    );
}

#[tokio::test]
async fn test_word_document_reaches_completion() {
    let analyst = Arc::new(ScriptedAnalyst::default());
    let (_temp_dir, state) = create_test_state(analyst.clone()).await;

    let request = UploadRequest {
        session_id: Some("s-docx".to_string()),
        filename: "Loan Agreement.DOCX".to_string(),
        bytes: docx_bytes(&[
            "PERSONAL LOAN AGREEMENT",
            "Principal: Rs 3,00,000. Tenure: 36 months. EMI: Rs 9,650 due on the 5th.",
            "Prepayment charge: 4% of the outstanding principal.",
        ]),
        language: Language::English,
    };
    let document = state
        .processor
        .process(request, ScriptedProbe::connected())
        .await
        .unwrap();
    assert_eq!(document.status, "success");

    let log = request_logs::load_request_log(&state.db, "s-docx")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(log.status, RequestStatus::CompletedNotViewed);
    assert_eq!(log.file_type, ".docx");
    assert_eq!(log.page_count, Some(1));
    assert!(log.text_length.unwrap() > 100);
    assert_eq!(ScriptedAnalyst::calls(&analyst.classify_calls), 1);
}

#[tokio::test]
async fn test_image_upload_refused_before_extraction() {
    let analyst = Arc::new(ScriptedAnalyst::default());
    let (_temp_dir, state) = create_test_state(analyst.clone()).await;

    let request = UploadRequest {
        session_id: Some("s-scan".to_string()),
        filename: "scan.png".to_string(),
        bytes: b"\x89PNG\r\n\x1a\n".to_vec(),
        language: Language::English,
    };
    let err = state
        .processor
        .process(request, ScriptedProbe::connected())
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), 400);
    assert_eq!(err.code(), "INVALID_FILE");
    assert_eq!(
        request_logs::load_status(&state.db, "s-scan").await.unwrap(),
        Some(RequestStatus::InvalidFile)
    );
}

#[tokio::test]
async fn test_stream_receiver_dropped_mid_explanation_abandons_request() {
    let analyst = Arc::new(ScriptedAnalyst {
        explain_delay: Duration::from_millis(800),
        ..Default::default()
    });
    let (_temp_dir, state) = create_test_state(analyst.clone()).await;

    let mut rx = state.processor.process_stream(text_upload("s-tab-closed", POLICY_TEXT));
    loop {
        match rx.recv().await {
            Some(StreamEvent::Chunk { .. }) => break,
            Some(event) => assert!(!event.is_terminal(), "unexpected {:?}", event),
            None => panic!("stream ended before the first chunk"),
        }
    }
    drop(rx);

    assert_eq!(
        wait_for_terminal(&state.db, "s-tab-closed", Duration::from_secs(2)).await,
        Some(RequestStatus::AbandonedByUser)
    );
    let log = request_logs::load_request_log(&state.db, "s-tab-closed")
        .await
        .unwrap()
        .unwrap();
    assert!(log.explanation.is_none());
    assert!(log.processing_time_ms.unwrap() < 800);

    // Behavior flag is written by a side task spawned after the status write
    tokio::time::sleep(Duration::from_millis(50)).await;
    state.recorder.drain().await;
    let behavior = behavior::load_behavior(&state.db, "s-tab-closed")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(behavior.abandoned_at_step.as_deref(), Some("client_disconnect"));
    assert_eq!(ScriptedAnalyst::calls(&analyst.stream_calls), 1);
}

#[tokio::test]
async fn test_stream_explanation_unavailable_ends_with_error_event() {
    let analyst = Arc::new(ScriptedAnalyst {
        fail_explain: true,
        ..Default::default()
    });
    let (_temp_dir, state) = create_test_state(analyst).await;

    let events = collect_events(state.processor.process_stream(text_upload("s-stream-down", POLICY_TEXT))).await;

    assert!(!events.iter().any(|e| matches!(e, StreamEvent::Chunk { .. })));
    match events.last() {
        Some(StreamEvent::Error {
            status,
            code,
            message,
            session_id,
        }) => {
            assert_eq!(*status, StreamStage::Error);
            assert_eq!(*code, "EXPLANATION_FAILED");
            assert!(!message.contains("connection reset"));
            assert_eq!(session_id, "s-stream-down");
        }
        other => panic!("Expected error event, got {:?}", other),
    }

    assert_eq!(
        request_logs::load_status(&state.db, "s-stream-down").await.unwrap(),
        Some(RequestStatus::SystemError)
    );
    state.recorder.drain().await;
    let behavior = behavior::load_behavior(&state.db, "s-stream-down")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(behavior.abandoned_at_step.as_deref(), Some("processing"));
}

#[tokio::test]
async fn test_stream_interrupted_mid_explanation_is_not_cached() {
    let analyst = Arc::new(ScriptedAnalyst {
        stream_fail_after: Some(2),
        ..Default::default()
    });
    let (_temp_dir, state) = create_test_state(analyst).await;

    let events = collect_events(state.processor.process_stream(text_upload("s-cut", POLICY_TEXT))).await;

    let chunks = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::Chunk { .. }))
        .count();
    assert_eq!(chunks, 2);
    assert!(matches!(
        events.last(),
        Some(StreamEvent::Error { code: "EXPLANATION_FAILED", .. })
    ));

    let log = request_logs::load_request_log(&state.db, "s-cut")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(log.status, RequestStatus::SystemError);
    assert!(log.rejection_reason.unwrap().contains("stream interrupted"));
    assert!(log.explanation.is_none());

    // Only the classification made it into the cache
    assert_eq!(state.cache.stats().size, 1);
}

#[tokio::test]
async fn test_empty_explanation_stream_is_malformed() {
    let analyst = Arc::new(ScriptedAnalyst {
        explanation: String::new(),
        ..Default::default()
    });
    let (_temp_dir, state) = create_test_state(analyst).await;

    let events = collect_events(state.processor.process_stream(text_upload("s-silent", POLICY_TEXT))).await;

    assert!(matches!(
        events.last(),
        Some(StreamEvent::Error { code: "EXPLANATION_FAILED", .. })
    ));
    let log = request_logs::load_request_log(&state.db, "s-silent")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(log.status, RequestStatus::SystemError);
    let reason = log.rejection_reason.unwrap();
    assert!(reason.contains("Malformed"), "unexpected reason {}", reason);
    assert!(reason.contains("empty explanation stream"));
    assert_eq!(state.cache.stats().size, 1);
}
