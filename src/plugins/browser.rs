//! 浏览器截图插件：使用 Headless Chrome 渲染目标页面并截图
//!
//! 需启用 feature "browser" 且系统已安装 Chrome/Chromium。
//! 浏览器在 prepare 时启动，跨轮次复用，在 release 时关闭；每次截图新开一个 Tab。
//! headless_chrome 是同步 API，所有调用都放在 spawn_blocking 中执行。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use headless_chrome::protocol::cdp::Page::{CaptureScreenshotFormatOption, Viewport};
use headless_chrome::types::Bounds;
use headless_chrome::{Browser, LaunchOptions, Tab};

use crate::core::CaptureError;
use crate::plugins::capture::probe_target;
use crate::plugins::{CaptureConfig, CapturePlugin};
use crate::refine::Screenshot;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const WAIT_FOR_TIMEOUT: Duration = Duration::from_secs(10);
const REGION_TIMEOUT: Duration = Duration::from_secs(3);
/// 无 delay_ms 时的默认渲染等待
const SETTLE_DELAY: Duration = Duration::from_millis(500);

pub struct ChromeCapture {
    browser: Arc<Mutex<Option<Browser>>>,
    probe: bool,
}

impl ChromeCapture {
    pub fn new() -> Self {
        Self {
            browser: Arc::new(Mutex::new(None)),
            probe: true,
        }
    }

    /// 关闭截图前的 HTTP 可达性探测（例如目标是 file:// 页面）
    pub fn without_probe(mut self) -> Self {
        self.probe = false;
        self
    }

    fn launch() -> Result<Browser, CaptureError> {
        let options = LaunchOptions::default_builder()
            .headless(true)
            .build()
            .map_err(|e| CaptureError::unreachable(format!("Chrome launch options: {}", e)))?;
        Browser::new(options)
            .map_err(|e| CaptureError::unreachable(format!("Chrome launch failed: {}. Install Chrome/Chromium.", e)))
    }

    /// 返回 PNG 数据以及实际截取区域的宽高
    fn shoot(tab: &Arc<Tab>, target: &str, config: &CaptureConfig) -> Result<(Vec<u8>, u32, u32), CaptureError> {
        tab.set_bounds(Bounds::Normal {
            left: Some(0),
            top: Some(0),
            width: Some(config.width as f64),
            height: Some(config.height as f64),
        })
        .map_err(|e| CaptureError::unreachable(format!("Set viewport failed: {}", e)))?;

        tab.navigate_to(target)
            .and_then(|t| t.wait_until_navigated())
            .map_err(|e| CaptureError::unreachable(format!("Navigate failed: {}", e)))?;

        if let Some(wait_for) = &config.wait_for {
            tab.wait_for_element_with_custom_timeout(wait_for, WAIT_FOR_TIMEOUT)
                .map_err(|e| CaptureError::wait_timeout(format!("'{}': {}", wait_for, e)))?;
        }

        let delay = config.delay_ms.map(Duration::from_millis).unwrap_or(SETTLE_DELAY);
        std::thread::sleep(delay);

        if let Some(selector) = &config.selector {
            let element = tab
                .wait_for_element_with_custom_timeout(selector, REGION_TIMEOUT)
                .map_err(|e| CaptureError::region_not_found(format!("'{}': {}", selector, e)))?;
            let (width, height) = element
                .get_box_model()
                .map(|b| (b.width.round() as u32, b.height.round() as u32))
                .unwrap_or((config.width, config.height));
            let png = element
                .capture_screenshot(CaptureScreenshotFormatOption::Png)
                .map_err(|e| CaptureError::region_not_found(format!("'{}': {}", selector, e)))?;
            return Ok((png, width, height));
        }

        let mut height = config.height;
        let clip = if config.full_page {
            let page_height = tab
                .evaluate("document.documentElement.scrollHeight", false)
                .ok()
                .and_then(|r| r.value)
                .and_then(|v| v.as_f64())
                .unwrap_or(config.height as f64);
            height = page_height.round() as u32;
            Some(Viewport {
                x: 0.0,
                y: 0.0,
                width: config.width as f64,
                height: page_height,
                scale: 1.0,
            })
        } else {
            None
        };

        let png = tab
            .capture_screenshot(CaptureScreenshotFormatOption::Png, None, clip, true)
            .map_err(|e| CaptureError::unreachable(format!("Screenshot failed: {}", e)))?;
        Ok((png, config.width, height))
    }
}

impl Default for ChromeCapture {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CapturePlugin for ChromeCapture {
    fn name(&self) -> &str {
        "chrome_capture"
    }

    async fn prepare(&self) -> Result<(), CaptureError> {
        let browser_arc = Arc::clone(&self.browser);
        tokio::task::spawn_blocking(move || {
            let mut guard = browser_arc
                .lock()
                .map_err(|e| CaptureError::unreachable(e.to_string()))?;
            if guard.is_none() {
                *guard = Some(Self::launch()?);
                tracing::info!("headless chrome launched");
            }
            Ok(())
        })
        .await
        .map_err(|e| CaptureError::unreachable(format!("Task join: {}", e)))?
    }

    async fn capture(&self, target: &str, config: &CaptureConfig) -> Result<Screenshot, CaptureError> {
        if self.probe && (target.starts_with("http://") || target.starts_with("https://")) {
            probe_target(target, PROBE_TIMEOUT).await?;
        }

        let browser_arc = Arc::clone(&self.browser);
        let url = target.to_string();
        let cfg = config.clone();
        tracing::info!(url = %url, selector = ?cfg.selector, full_page = cfg.full_page, "browser capture");

        let (payload, width, height) = tokio::task::spawn_blocking(move || {
            let mut guard = browser_arc
                .lock()
                .map_err(|e| CaptureError::unreachable(e.to_string()))?;
            if guard.is_none() {
                *guard = Some(Self::launch()?);
            }
            let browser = guard
                .as_ref()
                .ok_or_else(|| CaptureError::unreachable("browser not running"))?;
            let tab = browser
                .new_tab()
                .map_err(|e| CaptureError::unreachable(format!("Browser tab failed: {}", e)))?;
            let result = Self::shoot(&tab, &url, &cfg);
            if let Err(e) = tab.close(true) {
                tracing::debug!(error = %e, "tab close failed");
            }
            result
        })
        .await
        .map_err(|e| CaptureError::unreachable(format!("Task join: {}", e)))??;

        Ok(Screenshot::new(payload, width, height, target)
            .with_selector(config.selector.clone())
            .with_full_page(config.full_page))
    }

    async fn release(&self) {
        let browser_arc = Arc::clone(&self.browser);
        let closed = tokio::task::spawn_blocking(move || {
            browser_arc
                .lock()
                .map(|mut guard| guard.take().is_some())
                .unwrap_or(false)
        })
        .await
        .unwrap_or(false);
        if closed {
            tracing::info!("headless chrome closed");
        }
    }
}
