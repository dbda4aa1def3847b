//! 插件接口：截图 / 评估 / 应用
//!
//! 编排器对三种能力泛型化（`RefineLoop<C, E, A>`），只依赖这里的 trait。
//! 具体实现：
//! - 截图：`ChromeCapture`（feature `browser`）、`FileCapture`
//! - 评估：`VisionEvaluator`（视觉 LLM + 自由文本 JSON 解析）
//! - 应用：`LlmApplier`（沙箱内精确替换 + 构建校验）、`DryRunApplier`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{CaptureError, EvaluateError};
use crate::refine::{ApplyOutcome, DesignSpec, Recommendation, Screenshot};

pub mod apply;
#[cfg(feature = "browser")]
pub mod browser;
pub mod capture;
pub mod evaluate;
pub mod parse;
pub mod workspace;

pub use apply::{DryRunApplier, LlmApplier};
#[cfg(feature = "browser")]
pub use browser::ChromeCapture;
pub use capture::{probe_target, FileCapture};
pub use evaluate::VisionEvaluator;
pub use parse::{extract_payload, parse_evaluation, ParseError, RawEvaluation};
pub use workspace::{EditError, EditReceipt, PendingEdit, Workspace};

/// 截图参数（对应配置 [capture] 段）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// 截取整页而非视口
    #[serde(default)]
    pub full_page: bool,
    /// 只截取该 CSS 选择器对应的元素
    #[serde(default)]
    pub selector: Option<String>,
    /// 截图前等待该选择器出现
    #[serde(default)]
    pub wait_for: Option<String>,
    /// 页面加载后的额外等待（毫秒）
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            full_page: false,
            selector: None,
            wait_for: None,
            delay_ms: None,
        }
    }
}

fn default_width() -> u32 {
    1440
}

fn default_height() -> u32 {
    900
}

/// 截图能力
///
/// 可持有长生命周期资源（浏览器会话）：`prepare` 在运行开始时调用一次，
/// `release` 在所有退出路径上调用一次。
#[async_trait]
pub trait CapturePlugin: Send + Sync {
    fn name(&self) -> &str {
        "capture"
    }

    async fn prepare(&self) -> Result<(), CaptureError> {
        Ok(())
    }

    async fn capture(&self, target: &str, config: &CaptureConfig) -> Result<Screenshot, CaptureError>;

    async fn release(&self) {}
}

/// 评估能力：截图 -> DesignSpec
#[async_trait]
pub trait EvaluatePlugin: Send + Sync {
    fn name(&self) -> &str {
        "evaluate"
    }

    async fn evaluate(&self, screenshot: &Screenshot, iteration: usize) -> Result<DesignSpec, EvaluateError>;
}

/// 应用能力：逐条返回结果，从不整体失败
#[async_trait]
pub trait ApplyPlugin: Send + Sync {
    fn name(&self) -> &str {
        "apply"
    }

    async fn apply(&self, recommendations: &[Recommendation]) -> Vec<ApplyOutcome>;
}

// Box<dyn ...> 转发，便于运行时按配置选择实现

#[async_trait]
impl<T: CapturePlugin + ?Sized> CapturePlugin for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn prepare(&self) -> Result<(), CaptureError> {
        (**self).prepare().await
    }

    async fn capture(&self, target: &str, config: &CaptureConfig) -> Result<Screenshot, CaptureError> {
        (**self).capture(target, config).await
    }

    async fn release(&self) {
        (**self).release().await
    }
}

#[async_trait]
impl<T: EvaluatePlugin + ?Sized> EvaluatePlugin for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn evaluate(&self, screenshot: &Screenshot, iteration: usize) -> Result<DesignSpec, EvaluateError> {
        (**self).evaluate(screenshot, iteration).await
    }
}

#[async_trait]
impl<T: ApplyPlugin + ?Sized> ApplyPlugin for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn apply(&self, recommendations: &[Recommendation]) -> Vec<ApplyOutcome> {
        (**self).apply(recommendations).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_config_defaults_from_partial_toml() {
        let cfg: CaptureConfig = serde_json::from_value(serde_json::json!({
            "selector": "#hero"
        }))
        .unwrap();
        assert_eq!(cfg.width, 1440);
        assert_eq!(cfg.height, 900);
        assert!(!cfg.full_page);
        assert_eq!(cfg.selector.as_deref(), Some("#hero"));
        assert_eq!(cfg.delay_ms, None);
    }
}
