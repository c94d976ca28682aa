//! Basic usage example for webuicapture
//!
//! Run with: cargo run --example basic

use webuicapture::{Browser, CaptureConfig, DirectorySink, Result, Sink};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = CaptureConfig {
        device_scale_factor: Some(2.0),
        ..Default::default()
    };
    let trigger = config.trigger();

    println!("Launching browser...");
    let browser = Browser::launch_with_config(config).await?;
    println!("Browser version: {}", browser.version().await?);

    let page = browser.new_page("https://example.com").await?;
    page.wait_for_navigation().await?;
    println!("Title: {}", page.title().await?);

    let payload = page.capture(&trigger).await?;
    let (width, height) = payload.image_size()?;
    println!("Screenshot: {}x{} device pixels", width, height);

    if let Some(tree) = &payload.bbox_tree {
        println!("{} visible elements, depth {}", tree.len(), tree.depth());
        for node in tree.iter().take(10) {
            println!("  {:<8} {:?}", node.tag, node.bbox);
        }
    }

    let sink = DirectorySink::new("example_dataset");
    sink.deliver(&payload).await?;
    println!("Saved to {}", sink.dir().display());

    browser.close().await?;
    Ok(())
}
