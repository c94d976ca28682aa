//! Integration tests for webuicapture
//!
//! These tests require Chrome to be installed and available.
//! Run with: cargo test --test integration -- --ignored

use std::time::Duration;

use webuicapture::{Browser, CaptureConfig, Modifier, Overlay};

/// Check if Chrome is available
fn chrome_available() -> bool {
    webuicapture::browser::find_chrome().is_ok()
}

const FIXTURE: &str = "data:text/html,\
<html><head><style>body{margin:0} #box{position:absolute;left:500px;top:700px;width:1000px;height:200px;background:red}</style></head>\
<body><div id='main' style='width:200px;height:100px'>main</div>\
<div style='display:none'><p>hidden</p></div>\
<div id='box'></div>\
<span style='position:absolute;left:0;top:-200px;width:100px;height:150px'>above</span>\
</body></html>";

fn config() -> CaptureConfig {
    CaptureConfig {
        viewport_width: 1000,
        viewport_height: 800,
        device_scale_factor: Some(1.0),
        ..Default::default()
    }
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn test_browser_launch() {
    if !chrome_available() {
        eprintln!("Chrome not found, skipping test");
        return;
    }

    let browser = Browser::launch().await.expect("Failed to launch browser");
    let version = browser.version().await.expect("Failed to get version");
    assert!(!version.is_empty());
    browser.close().await.expect("Failed to close browser");
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn test_capture_clips_and_prunes() {
    if !chrome_available() {
        eprintln!("Chrome not found, skipping test");
        return;
    }

    let config = config();
    let browser = Browser::launch_with_config(config.clone())
        .await
        .expect("Failed to launch browser");
    let page = browser.new_page(FIXTURE).await.expect("Failed to create page");
    page.wait_for_navigation().await.expect("Page did not load");

    let payload = page.capture(&config.trigger()).await.expect("Capture failed");
    let tree = payload.bbox_tree.as_ref().expect("root should be visible");
    assert_eq!(tree.tag, "HTML");

    let (width, height) = payload.image_size().expect("screenshot should decode");
    for node in tree.iter() {
        assert!(node.bbox.is_ordered());
        assert!(node.bbox.x2() <= width as i64 && node.bbox.y2() <= height as i64);
    }

    let tags: Vec<&str> = tree.iter().map(|n| n.tag.as_str()).collect();
    assert!(!tags.contains(&"P"), "display:none subtree must be pruned");
    assert!(!tags.contains(&"SPAN"), "element above the viewport must be pruned");

    let clipped = tree
        .iter()
        .find(|n| n.bbox.x1() == 500 && n.bbox.y1() == 700)
        .expect("partially visible box should be kept");
    assert_eq!((clipped.bbox.x2(), clipped.bbox.y2()), (1000, 800));

    payload.validate().expect("payload should pass collector validation");

    let url = page.url().await.expect("Failed to read URL");
    assert!(url.starts_with("data:text/html"));
    browser.close_page(&page).await.expect("Failed to close page");
    browser.close().await.expect("Failed to close browser");
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn test_modifier_click_reports_snapshot() {
    if !chrome_available() {
        eprintln!("Chrome not found, skipping test");
        return;
    }

    let config = config();
    let trigger = config.trigger();
    let browser = Browser::launch_with_config(config)
        .await
        .expect("Failed to launch browser");
    let page = browser.new_page(FIXTURE).await.expect("Failed to create page");
    page.wait_for_navigation().await.expect("Page did not load");
    page.install_trigger(&trigger).await.expect("Failed to install trigger");

    // A plain click is not a capture request
    page.click_at(50.0, 50.0).await.expect("click failed");
    page.click_at_with_modifier(50.0, 50.0, Some(Modifier::Ctrl))
        .await
        .expect("ctrl-click failed");

    let event = tokio::time::timeout(Duration::from_secs(5), page.next_trigger_event())
        .await
        .expect("no trigger event")
        .expect("connection closed");
    assert!(event.event.ctrl_key);

    let capture = trigger
        .on_click(&event.event, &event.snapshot)
        .expect("ctrl-click should qualify");
    assert_eq!(capture.view_rect.width(), 1000);
    assert!(capture.record.bbox_tree.is_some());

    browser.close().await.expect("Failed to close browser");
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn test_overlay_is_not_captured() {
    if !chrome_available() {
        eprintln!("Chrome not found, skipping test");
        return;
    }

    let config = config();
    let browser = Browser::launch_with_config(config.clone())
        .await
        .expect("Failed to launch browser");
    let page = std::sync::Arc::new(browser.new_page(FIXTURE).await.expect("Failed to create page"));
    page.wait_for_navigation().await.expect("Page did not load");

    let before = page.capture(&config.trigger()).await.expect("Capture failed");

    let overlay = Overlay::new(page.clone());
    overlay.highlight("#main").await.expect("highlight failed");
    assert!(overlay.highlight("#does-not-exist").await.is_err());
    overlay.highlight("#main").await.expect("highlight failed");

    let during = page.capture(&config.trigger()).await.expect("Capture failed");
    assert_eq!(
        before.bbox_tree.as_ref().map(|t| t.len()),
        during.bbox_tree.as_ref().map(|t| t.len())
    );

    overlay.teardown().await.expect("teardown failed");
    let remaining: u32 = page
        .evaluate("document.querySelectorAll('[data-webuicapture-overlay]').length")
        .await
        .expect("evaluate failed");
    assert_eq!(remaining, 0);

    drop(overlay);
    drop(page);
    browser.close().await.expect("Failed to close browser");
}
