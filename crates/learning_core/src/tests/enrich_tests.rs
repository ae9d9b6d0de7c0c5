use std::sync::atomic::Ordering;

use futures::future::join_all;
use shared::domain::{ContentBlock, Course, ImageRef};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::*;
use crate::test_support::{harness, install_course, outline, wait_for};

fn image_url(course: &Course, module_index: usize, slide_index: usize) -> Option<String> {
    course.modules[module_index].slides[slide_index].blocks[1]
        .image_ref()
        .and_then(ImageRef::url)
        .map(str::to_string)
}

#[tokio::test]
async fn concurrent_triggers_select_images_once() {
    let h = harness(outline(2, 2));
    install_course(&h.engine, &outline(2, 2), 1).await;

    let results = join_all((0..8).map(|_| h.engine.trigger_image_selection(0))).await;
    let performed = results
        .into_iter()
        .map(|result| result.expect("trigger"))
        .filter(|performed| *performed)
        .count();

    assert_eq!(performed, 1);
    assert_eq!(h.collaborator.image_calls.load(Ordering::SeqCst), 1);
    assert!(h.engine.image_selection_triggered(0).await);

    let course = h.engine.course().await.expect("course");
    assert_eq!(
        image_url(&course, 0, 0).as_deref(),
        Some("https://img.test/0-1.png")
    );
    assert_eq!(
        image_url(&course, 0, 1).as_deref(),
        Some("https://img.test/1-1.png")
    );
}

#[tokio::test]
async fn unloaded_module_is_not_enriched() {
    let h = harness(outline(2, 2));
    install_course(&h.engine, &outline(2, 2), 1).await;

    assert!(!h.engine.trigger_image_selection(1).await.expect("trigger"));
    assert!(!h.engine.image_selection_triggered(1).await);
    assert_eq!(h.collaborator.image_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn resolutions_apply_in_arrival_order() {
    let h = harness(outline(1, 3));
    install_course(&h.engine, &outline(1, 3), 1).await;
    let (tx, rx) = mpsc::unbounded_channel();
    h.collaborator
        .push_image_stream(UnboundedReceiverStream::new(rx).boxed());

    let engine = Arc::clone(&h.engine);
    let selection = tokio::spawn(async move { engine.trigger_image_selection(0).await });

    tx.send(ImageResolution {
        slide_index: 2,
        block_index: 1,
        url: "https://img.test/late-slide.png".into(),
    })
    .expect("send");
    let engine = Arc::clone(&h.engine);
    wait_for(|| {
        let engine = Arc::clone(&engine);
        async move {
            engine
                .course()
                .await
                .is_some_and(|course| image_url(&course, 0, 2).is_some())
        }
    })
    .await;

    tx.send(ImageResolution {
        slide_index: 0,
        block_index: 0,
        url: "https://img.test/not-an-image-block.png".into(),
    })
    .expect("send");
    tx.send(ImageResolution {
        slide_index: 0,
        block_index: 1,
        url: "https://img.test/early-slide.png".into(),
    })
    .expect("send");
    drop(tx);

    assert!(selection.await.expect("join").expect("trigger"));
    let course = h.engine.course().await.expect("course");
    assert_eq!(
        image_url(&course, 0, 0).as_deref(),
        Some("https://img.test/early-slide.png")
    );
    assert_eq!(image_url(&course, 0, 1), None);
    assert_eq!(
        image_url(&course, 0, 2).as_deref(),
        Some("https://img.test/late-slide.png")
    );
    assert!(matches!(
        course.modules[0].slides[0].blocks[0],
        ContentBlock::Text { .. }
    ));
}

#[tokio::test]
async fn failed_selection_is_not_retried() {
    let h = harness(outline(1, 1));
    install_course(&h.engine, &outline(1, 1), 1).await;
    h.collaborator.fail_images.store(true, Ordering::SeqCst);

    assert!(h.engine.trigger_image_selection(0).await.expect("trigger"));
    assert!(!h.engine.trigger_image_selection(0).await.expect("trigger"));
    assert_eq!(h.collaborator.image_calls.load(Ordering::SeqCst), 1);

    let course = h.engine.course().await.expect("course");
    assert_eq!(
        course.modules[0].slides[0].blocks[1].image_ref(),
        Some(&ImageRef::Pending)
    );
}

#[tokio::test]
async fn replaced_course_drops_remaining_resolutions() {
    let h = harness(outline(1, 2));
    install_course(&h.engine, &outline(1, 2), 1).await;
    let (tx, rx) = mpsc::unbounded_channel();
    h.collaborator
        .push_image_stream(UnboundedReceiverStream::new(rx).boxed());

    let engine = Arc::clone(&h.engine);
    let selection = tokio::spawn(async move { engine.trigger_image_selection(0).await });
    tx.send(ImageResolution {
        slide_index: 0,
        block_index: 1,
        url: "https://img.test/first.png".into(),
    })
    .expect("send");
    let engine = Arc::clone(&h.engine);
    wait_for(|| {
        let engine = Arc::clone(&engine);
        async move {
            engine
                .course()
                .await
                .is_some_and(|course| image_url(&course, 0, 0).is_some())
        }
    })
    .await;

    let replacement = install_course(&h.engine, &outline(1, 2), 1).await;
    let _ = tx.send(ImageResolution {
        slide_index: 1,
        block_index: 1,
        url: "https://img.test/second.png".into(),
    });
    drop(tx);
    assert!(selection.await.expect("join").expect("trigger"));

    let course = h.engine.course().await.expect("course");
    assert_eq!(course.id, replacement.id);
    assert_eq!(image_url(&course, 0, 0), None);
    assert_eq!(image_url(&course, 0, 1), None);
}

#[tokio::test]
async fn narration_runs_once_per_module() {
    let h = harness(outline(1, 2));
    let course = install_course(&h.engine, &outline(1, 2), 1).await;

    assert!(h.engine.narrate_module(course.id, 0).await.expect("narrate"));
    assert!(!h.engine.narrate_module(course.id, 0).await.expect("narrate"));
    assert_eq!(h.collaborator.narration_calls.load(Ordering::SeqCst), 1);

    let course = h.engine.course().await.expect("course");
    let module = &course.modules[0];
    assert!(module.narration_ready);
    assert_eq!(module.slides[1].narration.as_deref(), Some("audio://1"));
}

#[tokio::test]
async fn failed_narration_waits_for_manual_retry() {
    let h = harness(outline(1, 1));
    let course = install_course(&h.engine, &outline(1, 1), 1).await;
    h.collaborator.fail_narration.store(true, Ordering::SeqCst);

    let err = h
        .engine
        .narrate_module(course.id, 0)
        .await
        .expect_err("should fail");
    assert!(matches!(
        err,
        EngineError::Generation {
            step: GenerationStep::Narration,
            ..
        }
    ));
    assert!(!h.engine.narrate_module(course.id, 0).await.expect("narrate"));
    assert_eq!(h.collaborator.narration_calls.load(Ordering::SeqCst), 1);

    h.collaborator.fail_narration.store(false, Ordering::SeqCst);
    assert!(h.engine.retry_narration(0).await.expect("retry"));
    assert_eq!(h.collaborator.narration_calls.load(Ordering::SeqCst), 2);
    assert!(h.engine.course().await.expect("course").modules[0].narration_ready);

    assert!(matches!(
        h.engine.retry_narration(4).await,
        Err(EngineError::ModuleOutOfRange { index: 4, count: 1 })
    ));
}

#[tokio::test]
async fn spawned_enrichment_fills_images_and_narration() {
    let h = harness(outline(1, 2));
    let course = install_course(&h.engine, &outline(1, 2), 1).await;

    h.engine.spawn_enrichment(course.id, 0);
    let engine = Arc::clone(&h.engine);
    wait_for(|| {
        let engine = Arc::clone(&engine);
        async move {
            engine.course().await.is_some_and(|course| {
                course.modules[0].narration_ready && image_url(&course, 0, 1).is_some()
            })
        }
    })
    .await;
}
