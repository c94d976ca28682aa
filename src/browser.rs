//! Browser Launcher
//!
//! Finds Chrome, launches it with a fixed window size and optional device
//! scale factor, and opens capture pages.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Global counter for unique user data directories
static BROWSER_COUNTER: AtomicU64 = AtomicU64::new(0);

use crate::cdp::{launch_chrome, Connection, Transport};
use crate::error::{Error, Result};
use crate::page::Page;
use crate::CaptureConfig;

/// Locate a Chrome or Chromium binary in the usual install locations
pub fn find_chrome() -> Result<PathBuf> {
    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Google Chrome Canary.app/Contents/MacOS/Google Chrome Canary",
        ]
    } else if cfg!(target_os = "linux") {
        &[
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
        ]
    } else if cfg!(target_os = "windows") {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    } else {
        &[]
    };

    candidates
        .iter()
        .map(Path::new)
        .find(|p| p.exists())
        .map(Path::to_path_buf)
        .ok_or(Error::ChromeNotFound)
}

/// Command-line flags for a capture browser
fn capture_args(config: &CaptureConfig) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "--no-first-run".into(),
        "--no-default-browser-check".into(),
        "--disable-default-apps".into(),
        "--disable-popup-blocking".into(),
        "--disable-sync".into(),
        "--disable-translate".into(),
        "--disable-dev-shm-usage".into(),
        "--hide-scrollbars".into(),
        "--password-store=basic".into(),
        "--use-mock-keychain".into(),
        format!(
            "--window-size={},{}",
            config.viewport_width, config.viewport_height
        ),
    ];

    if let Some(scale) = config.device_scale_factor {
        args.push(format!("--force-device-scale-factor={}", scale));
    }

    if let Some(ref ua) = config.user_agent {
        args.push(format!("--user-agent={}", ua));
    }

    if config.headless {
        args.push("--headless=new".into());
        args.push("--no-sandbox".into());
    }

    args
}

/// A Chrome instance used for captures
pub struct Browser {
    connection: Connection,
    config: Arc<CaptureConfig>,
    /// User data directory (cleaned up on close)
    user_data_dir: PathBuf,
}

impl Browser {
    /// Launch with default config
    pub async fn launch() -> Result<Self> {
        Self::launch_with_config(CaptureConfig::default()).await
    }

    /// Launch with custom config
    pub async fn launch_with_config(config: CaptureConfig) -> Result<Self> {
        let config = Arc::new(config);

        let instance_id = BROWSER_COUNTER.fetch_add(1, Ordering::Relaxed);
        let user_data_dir = std::env::temp_dir().join(format!(
            "webuicapture-browser-{}-{}",
            std::process::id(),
            instance_id
        ));

        let _ = std::fs::remove_dir_all(&user_data_dir);
        std::fs::create_dir_all(&user_data_dir)?;

        let chrome_path = match &config.chrome_path {
            Some(p) => PathBuf::from(p),
            None => find_chrome()?,
        };

        let mut args = capture_args(&config);
        args.push(format!("--user-data-dir={}", user_data_dir.display()));

        tracing::info!("Launching Chrome from {:?}", chrome_path);
        let (child, ws_url) = launch_chrome(&chrome_path, &args)?;

        let transport = Transport::new(child, &ws_url)?;
        let connection = Connection::new(transport);

        let version = connection.version().await?;
        tracing::info!("Connected to Chrome: {}", version.product);

        Ok(Self {
            connection,
            config,
            user_data_dir,
        })
    }

    /// The config this browser was launched with
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Create a new page and navigate to URL
    pub async fn new_page(&self, url: &str) -> Result<Page> {
        let page = self.new_blank_page().await?;
        page.goto(url).await?;
        Ok(page)
    }

    /// Create a new page without navigation (at about:blank)
    pub async fn new_blank_page(&self) -> Result<Page> {
        let target_id = self
            .connection
            .create_target(
                "about:blank",
                Some(self.config.viewport_width),
                Some(self.config.viewport_height),
            )
            .await?;

        let session = self.connection.attach_to_target(&target_id).await?;
        session.page_enable().await?;

        Ok(Page::new(session, Arc::clone(&self.config)))
    }

    /// Get the browser version
    pub async fn version(&self) -> Result<String> {
        let v = self.connection.version().await?;
        Ok(v.product)
    }

    /// Close a page's tab
    pub async fn close_page(&self, page: &Page) -> Result<()> {
        self.connection.close_target(page.target_id()).await?;
        Ok(())
    }

    /// Close the browser
    pub async fn close(self) -> Result<()> {
        self.connection.close().await?;
        let _ = std::fs::remove_dir_all(&self.user_data_dir);
        Ok(())
    }
}

impl Drop for Browser {
    fn drop(&mut self) {
        // The Transport's Drop impl kills the Chrome process
        let _ = std::fs::remove_dir_all(&self.user_data_dir);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_args() {
        let config = CaptureConfig {
            device_scale_factor: Some(2.0),
            user_agent: Some("test-agent".into()),
            ..Default::default()
        };
        let args = capture_args(&config);
        assert!(args.contains(&"--window-size=1280,800".to_string()));
        assert!(args.contains(&"--force-device-scale-factor=2".to_string()));
        assert!(args.contains(&"--user-agent=test-agent".to_string()));
        assert!(args.contains(&"--headless=new".to_string()));

        let args = capture_args(&CaptureConfig::headful());
        assert!(!args.iter().any(|a| a.starts_with("--headless")));
        assert!(!args.iter().any(|a| a.starts_with("--force-device-scale-factor")));
    }
}
