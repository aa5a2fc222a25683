use dataforge_cli::progress::{FeedRenderer, format_bytes, format_elapsed, render_feed};
use dataforge_core::progress::ProgressHub;
use dataforge_core::{FeedKey, FeedStatus, JobId, ProgressEvent, Subscription};

#[tokio::test]
async fn test_render_finished_feed_returns_terminal_event() {
    let key = FeedKey::Job(JobId::new());
    let events = Subscription::finished(ProgressEvent::new(key, FeedStatus::Completed, 100, "done"));

    let last = render_feed(events, FeedRenderer::new("job", false))
        .await
        .unwrap();
    assert_eq!(last.status, FeedStatus::Completed);
    assert_eq!(last.progress, 100);
}

#[tokio::test]
async fn test_render_live_feed_until_terminal() {
    let hub = ProgressHub::new(16);
    let key = FeedKey::Job(JobId::new());
    hub.publish(ProgressEvent::new(key, FeedStatus::Pending, 0, "queued"));
    let events = hub.subscribe(key).unwrap();

    let feed = tokio::spawn(render_feed(events, FeedRenderer::new("job", false)));
    hub.publish(ProgressEvent::new(key, FeedStatus::Processing, 40, "stage 1/2").with_step("deduplication"));
    hub.publish(ProgressEvent::new(key, FeedStatus::Failed, 40, "stage failed"));

    let last = feed.await.unwrap().unwrap();
    assert_eq!(last.status, FeedStatus::Failed);
    assert_eq!(last.message, "stage failed");
    assert!(!hub.is_open(key));
}

#[test]
fn test_hidden_renderer_tracks_position() {
    let mut renderer = FeedRenderer::new("dataset", false);
    let key = FeedKey::Job(JobId::new());
    renderer.handle_event(&ProgressEvent::new(key, FeedStatus::Processing, 55, "parsing"));
    assert_eq!(renderer.position(), 55);
    renderer.finish(None);
}

#[test]
fn test_formatting_helpers() {
    assert_eq!(format_bytes(1536), "1.50 KB");
    assert_eq!(format_elapsed(0.5), "0.50s");
}
