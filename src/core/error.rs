//! 错误类型
//!
//! 三个插件阶段各自的失败原因（CaptureFailure / EvaluateFailure），
//! 编排器记录在 IterationRecord 中的 StageError，以及启动前校验用的 ConfigError。

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 截图阶段失败原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureFailure {
    /// 目标不可达（服务未启动、连接被拒、文件不存在）
    TargetUnreachable,
    /// 等待条件（wait_for 选择器）超时
    WaitConditionTimeout,
    /// 选择器 / 区域不存在
    RegionNotFound,
    /// 编排器的单阶段超时触发
    StageTimeout,
}

impl CaptureFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureFailure::TargetUnreachable => "target-unreachable",
            CaptureFailure::WaitConditionTimeout => "wait-condition-timeout",
            CaptureFailure::RegionNotFound => "region-not-found",
            CaptureFailure::StageTimeout => "stage-timeout",
        }
    }
}

impl fmt::Display for CaptureFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 截图阶段错误：原因 + 细节
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("capture failed ({reason}): {detail}")]
pub struct CaptureError {
    pub reason: CaptureFailure,
    pub detail: String,
}

impl CaptureError {
    pub fn new(reason: CaptureFailure, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }

    pub fn unreachable(detail: impl Into<String>) -> Self {
        Self::new(CaptureFailure::TargetUnreachable, detail)
    }

    pub fn wait_timeout(detail: impl Into<String>) -> Self {
        Self::new(CaptureFailure::WaitConditionTimeout, detail)
    }

    pub fn region_not_found(detail: impl Into<String>) -> Self {
        Self::new(CaptureFailure::RegionNotFound, detail)
    }
}

/// 评估阶段失败原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EvaluateFailure {
    /// 评估服务不可达（网络、鉴权、限流）
    ServiceUnreachable,
    /// 回复中找不到结构化负载
    ResponseUnparseable,
    /// 负载结构不符（缺字段、未知维度、分数越界）
    ResponseInvalidSchema,
    /// 编排器的单阶段超时触发
    StageTimeout,
}

impl EvaluateFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluateFailure::ServiceUnreachable => "service-unreachable",
            EvaluateFailure::ResponseUnparseable => "response-unparseable",
            EvaluateFailure::ResponseInvalidSchema => "response-invalid-schema",
            EvaluateFailure::StageTimeout => "stage-timeout",
        }
    }
}

impl fmt::Display for EvaluateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 评估阶段错误：原因 + 细节
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("evaluation failed ({reason}): {detail}")]
pub struct EvaluateError {
    pub reason: EvaluateFailure,
    pub detail: String,
}

impl EvaluateError {
    pub fn new(reason: EvaluateFailure, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }

    pub fn unreachable(detail: impl Into<String>) -> Self {
        Self::new(EvaluateFailure::ServiceUnreachable, detail)
    }

    pub fn unparseable(detail: impl Into<String>) -> Self {
        Self::new(EvaluateFailure::ResponseUnparseable, detail)
    }

    pub fn invalid_schema(detail: impl Into<String>) -> Self {
        Self::new(EvaluateFailure::ResponseInvalidSchema, detail)
    }
}

/// 终止一次迭代的阶段错误（写入 IterationRecord 与 Report）
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageError {
    #[error("capture stage: {error}")]
    Capture { error: CaptureError },

    #[error("evaluate stage after {attempts} attempt(s): {error}")]
    Evaluate { error: EvaluateError, attempts: u32 },
}

impl StageError {
    pub fn stage(&self) -> &'static str {
        match self {
            StageError::Capture { .. } => "capture",
            StageError::Evaluate { .. } => "evaluate",
        }
    }
}

impl From<CaptureError> for StageError {
    fn from(error: CaptureError) -> Self {
        StageError::Capture { error }
    }
}

/// 配置错误：在循环开始之前快速失败
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("max_iterations must be >= 1 (got {0})")]
    MaxIterations(usize),

    #[error("target_score must be within [0, 10] (got {0})")]
    TargetScore(f64),

    #[error("per_stage_timeout_ms must be > 0")]
    StageTimeout,

    #[error("change_budget_per_iteration must be >= 1")]
    ChangeBudget,

    #[error("capture width/height must be positive (got {width}x{height})")]
    CaptureSize { width: u32, height: u32 },

    #[error("capture target must not be empty")]
    EmptyTarget,

    #[error("unknown design dimension: {0}")]
    UnknownDimension(String),

    #[error("rubric weight for {dimension} must be positive (got {weight})")]
    Weight { dimension: String, weight: f64 },

    #[error("unknown apply mode: {0}")]
    ApplyMode(String),

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_reason_wire_names() {
        let err = CaptureError::unreachable("connection refused");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["reason"], "target-unreachable");

        let err = EvaluateError::invalid_schema("unknown dimension 'vibes'");
        assert!(err.to_string().contains("response-invalid-schema"));
    }

    #[test]
    fn test_stage_error_tagged() {
        let err = StageError::Evaluate {
            error: EvaluateError::unparseable("no JSON object found"),
            attempts: 2,
        };
        assert_eq!(err.stage(), "evaluate");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["stage"], "evaluate");
        assert_eq!(json["attempts"], 2);
        assert!(err.to_string().contains("2 attempt(s)"));
    }
}
