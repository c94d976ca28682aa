//! `webuicapture` command line

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use webuicapture::collector::DEFAULT_COLLECTOR_URL;
use webuicapture::server::{self, ServerConfig, DEFAULT_DATASET_DIR, DEFAULT_PORT};
use webuicapture::{
    annotate_capture, AnnotationConfig, Anchor, Browser, CaptureConfig, CaptureDocument,
    CaptureRoot, DirectorySink, HttpCollector, Message, Modifier, Overlay, Relay, Result, Router,
    ScreenshotFormat, Sink,
};

#[derive(Parser)]
#[command(name = "webuicapture")]
#[command(about = "Capture web page screenshots with a tree of visible element bounding boxes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a page, capture it once and deliver the result
    Capture {
        url: String,
        #[command(flatten)]
        browser: BrowserArgs,
        #[command(flatten)]
        sink: SinkArgs,
        /// Extra wait after the load event, in milliseconds
        #[arg(long, default_value_t = 0)]
        settle_ms: u64,
    },
    /// Open a visible browser and capture on every modifier+click
    Watch {
        url: String,
        #[command(flatten)]
        browser: BrowserArgs,
        #[command(flatten)]
        sink: SinkArgs,
    },
    /// Run the collector server
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(short, long, env = "WEBUICAPTURE_PORT", default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Directory captures are saved into
        #[arg(short, long, default_value = DEFAULT_DATASET_DIR)]
        dataset: PathBuf,
    },
    /// Draw a saved capture's boxes onto its screenshot
    Annotate {
        /// The capture's `.json` file
        json: PathBuf,
        /// Screenshot (defaults to the `.png` next to the JSON)
        image: Option<PathBuf>,
        #[arg(short, long)]
        output: PathBuf,
        /// Print each box's pre-order index
        #[arg(long)]
        numbered: bool,
    },
}

#[derive(Args)]
struct BrowserArgs {
    /// Chrome/Chromium binary
    #[arg(long, env = "CHROME_PATH")]
    chrome: Option<String>,
    #[arg(long, default_value_t = 1280)]
    width: u32,
    #[arg(long, default_value_t = 800)]
    height: u32,
    /// Force the device pixel ratio
    #[arg(long)]
    scale: Option<f64>,
    /// Key that must be held while clicking: ctrl, alt, shift or meta
    #[arg(long, default_value = "ctrl")]
    modifier: Modifier,
    /// Report boxes relative to the document origin instead of the viewport
    #[arg(long)]
    document_anchored: bool,
    /// Start the tree at <body> instead of <html>
    #[arg(long)]
    body_root: bool,
    #[arg(long, default_value_t = 60)]
    max_depth: usize,
    #[arg(long, default_value_t = 50_000)]
    max_nodes: usize,
    /// Screenshot format: png or jpeg
    #[arg(long, default_value = "png")]
    format: ScreenshotFormat,
    /// Show the browser window
    #[arg(long)]
    headful: bool,
}

impl BrowserArgs {
    fn config(&self, headless: bool) -> CaptureConfig {
        CaptureConfig {
            headless,
            chrome_path: self.chrome.clone(),
            user_agent: None,
            viewport_width: self.width,
            viewport_height: self.height,
            device_scale_factor: self.scale,
            modifier: self.modifier,
            anchor: if self.document_anchored {
                Anchor::Document
            } else {
                Anchor::Viewport
            },
            root: if self.body_root {
                CaptureRoot::Body
            } else {
                CaptureRoot::DocumentElement
            },
            max_depth: self.max_depth,
            max_nodes: self.max_nodes,
            screenshot_format: self.format,
        }
    }
}

#[derive(Args)]
struct SinkArgs {
    /// Save captures into this directory instead of posting them
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Collector base URL
    #[arg(long, env = "WEBUICAPTURE_COLLECTOR", default_value = DEFAULT_COLLECTOR_URL)]
    collector: String,
}

impl SinkArgs {
    fn sink(&self) -> Result<Arc<dyn Sink>> {
        Ok(match &self.output {
            Some(dir) => Arc::new(DirectorySink::new(dir)),
            None => Arc::new(HttpCollector::new(&self.collector)?),
        })
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("webuicapture=info")),
        )
        .init();

    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        match cli.command {
            Commands::Capture {
                url,
                browser,
                sink,
                settle_ms,
            } => capture(&url, browser.config(!browser.headful), &sink, settle_ms).await,
            Commands::Watch { url, browser, sink } => {
                watch(&url, browser.config(false), &sink).await
            }
            Commands::Serve {
                host,
                port,
                dataset,
            } => server::serve(ServerConfig::new(host, port).with_dataset(dataset)).await,
            Commands::Annotate {
                json,
                image,
                output,
                numbered,
            } => annotate(json, image, output, numbered),
        }
    })
}

async fn capture(url: &str, config: CaptureConfig, sink: &SinkArgs, settle_ms: u64) -> Result<()> {
    let sink = sink.sink()?;
    let trigger = config.trigger();
    let browser = Browser::launch_with_config(config).await?;

    let result = async {
        let page = browser.new_page(url).await?;
        page.wait_for_navigation().await?;
        if settle_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(settle_ms)).await;
        }
        let payload = page.capture(&trigger).await?;
        browser.close_page(&page).await?;
        sink.deliver(&payload).await
    }
    .await;

    browser.close().await?;
    result
}

async fn watch(url: &str, config: CaptureConfig, sink: &SinkArgs) -> Result<()> {
    let sink = sink.sink()?;
    let trigger = config.trigger();
    let browser = Browser::launch_with_config(config).await?;
    let page = Arc::new(browser.new_page(url).await?);
    page.wait_for_navigation().await?;
    page.install_trigger(&trigger).await?;

    let (relay, rx) = Relay::channel();
    let router = Router::new(page.clone(), sink)
        .with_highlighter(Box::new(Overlay::new(page.clone())));
    let router = tokio::spawn(router.run(rx));

    println!(
        "Watching {}. {:?}+click captures; commands: highlight <selector>, clear, ping <text>, quit",
        page.url().await?,
        trigger.gate()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = page.next_trigger_event() => {
                let Some(event) = event else {
                    tracing::info!("Browser connection closed");
                    break;
                };
                if let Some(capture) = trigger.on_click(&event.event, &event.snapshot) {
                    relay.capture(capture)?;
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_command(&line) {
                    Some(Command::Send(message)) => relay.send(message)?,
                    Some(Command::Quit) => break,
                    None => eprintln!("unknown command: {}", line.trim()),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    drop(relay);
    if let Err(e) = router.await {
        tracing::warn!("Relay router panicked: {}", e);
    }
    browser.close().await
}

enum Command {
    Send(Message),
    Quit,
}

fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    match cmd {
        "highlight" if !rest.is_empty() => Some(Command::Send(Message::HighlightElement {
            selector: rest.to_string(),
        })),
        "clear" => Some(Command::Send(Message::ClearHighlight)),
        "ping" => Some(Command::Send(Message::Ping {
            message: if rest.is_empty() { "alive" } else { rest }.to_string(),
        })),
        "quit" | "exit" => Some(Command::Quit),
        _ => None,
    }
}

fn annotate(json: PathBuf, image: Option<PathBuf>, output: PathBuf, numbered: bool) -> Result<()> {
    let document = CaptureDocument::load(&json)?;
    let image_path = image.unwrap_or_else(|| json.with_extension("png"));
    let image = std::fs::read(&image_path)?;

    let config = AnnotationConfig {
        numbered,
        ..Default::default()
    };
    let png = annotate_capture(&image, document.bbox_tree.as_ref(), &config)
        .map_err(|e| webuicapture::Error::Io(std::io::Error::other(e)))?;
    std::fs::write(&output, png)?;
    println!("Wrote {}", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        assert!(matches!(
            parse_command("highlight  #main > a"),
            Some(Command::Send(Message::HighlightElement { selector })) if selector == "#main > a"
        ));
        assert!(parse_command("highlight").is_none());
        assert!(matches!(
            parse_command("clear"),
            Some(Command::Send(Message::ClearHighlight))
        ));
        assert!(matches!(
            parse_command("ping"),
            Some(Command::Send(Message::Ping { message })) if message == "alive"
        ));
        assert!(matches!(parse_command(" quit "), Some(Command::Quit)));
        assert!(parse_command("shutdown").is_none());
    }

    #[test]
    fn test_cli_parses_capture_flags() {
        let cli = Cli::try_parse_from([
            "webuicapture",
            "capture",
            "https://example.com",
            "--modifier",
            "alt",
            "--scale",
            "2",
            "--body-root",
            "--output",
            "out",
        ])
        .unwrap();
        match cli.command {
            Commands::Capture { browser, sink, .. } => {
                let config = browser.config(true);
                assert_eq!(config.modifier, Modifier::Alt);
                assert_eq!(config.device_scale_factor, Some(2.0));
                assert_eq!(config.root, CaptureRoot::Body);
                assert_eq!(sink.output, Some(PathBuf::from("out")));
            }
            _ => panic!("expected capture"),
        }
    }
}
