//! Headless browser rendering via chromiumoxide.
//!
//! This module is the single source of truth for finding a Chromium-family
//! executable and for the "render one page to a stable DOM" primitive the
//! fetcher falls back to on script-heavy sites. Heavy subresources (images,
//! fonts, media) are blocked to keep renders cheap.

use anyhow::{anyhow, Context, Result};
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::network::{BlockPattern, SetBlockedUrLsParams};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::Browser;
use futures::StreamExt;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Subresource patterns blocked during rendering.
const BLOCKED_RESOURCE_PATTERNS: &[&str] = &[
    "*.png", "*.jpg", "*.jpeg", "*.gif", "*.webp", "*.svg", "*.ico", "*.woff", "*.woff2", "*.ttf",
    "*.otf", "*.mp4", "*.mp3",
];

pub struct RenderedPage {
    pub html: String,
    pub final_url: String,
    pub load_time_ms: f64,
}

/// Find a usable Chromium-family browser executable.
///
/// Resolution order: `CHROME_EXECUTABLE` env var, PATH scan, well-known
/// install locations.
pub fn find_chrome_executable() -> Option<String> {
    if let Ok(p) = std::env::var("CHROME_EXECUTABLE") {
        if Path::new(&p).exists() {
            return Some(p);
        }
    }

    if let Ok(path_var) = std::env::var("PATH") {
        let candidates = [
            "google-chrome",
            "chromium",
            "chromium-browser",
            "chrome",
            "brave-browser",
        ];
        for dir in std::env::split_paths(&path_var) {
            for exe in candidates {
                let full = dir.join(exe);
                if full.exists() {
                    return Some(full.to_string_lossy().to_string());
                }
            }
        }
    }

    #[cfg(target_os = "macos")]
    {
        let candidates = [
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "linux")]
    {
        let candidates = [
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/usr/local/bin/chromium",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    None
}

pub fn browser_available() -> bool {
    find_chrome_executable().is_some()
}

fn build_headless_config(exe: &str, user_agent: &str) -> Result<BrowserConfig> {
    BrowserConfig::builder()
        .chrome_executable(exe)
        .viewport(Viewport {
            width: 1280,
            height: 900,
            device_scale_factor: Some(1.0),
            emulating_mobile: false,
            is_landscape: true,
            has_touch: false,
        })
        .window_size(1280, 900)
        .arg("--disable-gpu")
        .arg("--no-sandbox")
        .arg("--disable-setuid-sandbox")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-extensions")
        .arg("--disable-background-networking")
        .arg("--disable-sync")
        .arg("--disable-crash-reporter")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--hide-scrollbars")
        .arg("--mute-audio")
        .arg(format!("--user-agent={user_agent}"))
        .build()
        .map_err(|e| anyhow!("failed to build browser config: {e}"))
}

/// Load `url` in a fresh headless browser and capture the post-render DOM.
///
/// The whole navigate-and-settle sequence runs under `timeout_ms`; on expiry
/// the caller decides how to degrade (the fetcher keeps the plain HTTP
/// result).
pub async fn render_page(url: &str, user_agent: &str, timeout_ms: u64) -> Result<RenderedPage> {
    let exe = find_chrome_executable().ok_or_else(|| {
        anyhow!("no browser found for rendered mode; install Chrome or Chromium, or set CHROME_EXECUTABLE")
    })?;

    debug!(url = %url, browser = %exe, "headless render");
    let start = Instant::now();

    let config = build_headless_config(&exe, user_agent)?;
    let (mut browser, mut handler) = Browser::launch(config)
        .await
        .with_context(|| format!("failed to launch browser ({exe})"))?;

    let handler_task = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                error!("CDP handler error: {e}");
            }
        }
    });

    let result: Result<RenderedPage> = tokio::time::timeout(
        Duration::from_millis(timeout_ms),
        render_on(&browser, url, start),
    )
    .await
    .map_err(|_| anyhow!("render timed out after {timeout_ms}ms"))
    .and_then(|inner| inner);

    if let Err(e) = browser.close().await {
        warn!("browser close error (non-fatal): {e}");
    }
    handler_task.abort();

    result
}

async fn render_on(browser: &Browser, url: &str, start: Instant) -> Result<RenderedPage> {
    let page = browser
        .new_page("about:blank")
        .await
        .context("failed to create page")?;

    let blocked: Vec<BlockPattern> = BLOCKED_RESOURCE_PATTERNS
        .iter()
        .map(|p| BlockPattern::new(*p, true))
        .collect();
    page.execute(SetBlockedUrLsParams::builder().url_patterns(blocked).build())
        .await
        .context("failed to install subresource block list")?;

    page.goto(url).await.context("navigation failed")?;
    // Wait for the DOM to settle (load + network idle as chromiumoxide
    // tracks it); script-heavy pages hydrate during this window.
    page.wait_for_navigation()
        .await
        .context("page never reached a stable state")?;

    let html = page.content().await.context("failed to read DOM")?;
    let final_url = page
        .url()
        .await
        .ok()
        .flatten()
        .unwrap_or_else(|| url.to_string());

    Ok(RenderedPage {
        html,
        final_url,
        load_time_ms: start.elapsed().as_secs_f64() * 1000.0,
    })
}
