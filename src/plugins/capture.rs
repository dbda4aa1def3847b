//! 离线截图插件与目标探测
//!
//! FileCapture 每轮从磁盘读取一张预先渲染好的图片（离线模式 / 测试）。
//! probe_target 用一次 HTTP GET 判断目标服务是否在线。

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::CaptureError;
use crate::plugins::{CaptureConfig, CapturePlugin};
use crate::refine::Screenshot;

/// 探测目标是否可达；任何 HTTP 响应都算在线，连接失败或超时为 target-unreachable
pub async fn probe_target(url: &str, timeout: Duration) -> Result<(), CaptureError> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| CaptureError::unreachable(format!("http client: {}", e)))?;
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| CaptureError::unreachable(format!("{}: {}", url, e)))?;
    let status = response.status();
    if status.is_server_error() {
        tracing::warn!(url, status = %status, "target responded with server error");
    } else {
        tracing::debug!(url, status = %status, "target reachable");
    }
    Ok(())
}

pub struct FileCapture {
    path: PathBuf,
}

impl FileCapture {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CapturePlugin for FileCapture {
    fn name(&self) -> &str {
        "file_capture"
    }

    async fn capture(&self, target: &str, config: &CaptureConfig) -> Result<Screenshot, CaptureError> {
        let payload = tokio::fs::read(&self.path)
            .await
            .map_err(|e| CaptureError::unreachable(format!("{}: {}", self.path.display(), e)))?;
        if payload.is_empty() {
            return Err(CaptureError::unreachable(format!(
                "{}: empty image file",
                self.path.display()
            )));
        }
        if config.selector.is_some() {
            tracing::warn!(capture_target = %target, "file capture ignores selector; using whole image");
        }
        tracing::info!(path = %self.path.display(), bytes = payload.len(), "screenshot loaded from file");
        Ok(Screenshot::new(
            payload,
            config.width,
            config.height,
            self.path.display().to_string(),
        )
        .with_full_page(config.full_page))
    }
}
