//! 数据模型：Screenshot / Issue / Recommendation / DesignSpec / ApplyOutcome / IterationRecord
//!
//! 各阶段之间传递的不可变值对象。Report 见 report.rs。

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{EvaluateError, StageError};

/// 设计维度（固定枚举；声明顺序即优先级排序的最终平局顺序）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    VisualHierarchy,
    Typography,
    ColorContrast,
    SpacingLayout,
    ComponentDesign,
    AnimationInteraction,
    Accessibility,
    OverallAesthetic,
}

impl Dimension {
    pub const ALL: [Dimension; 8] = [
        Dimension::VisualHierarchy,
        Dimension::Typography,
        Dimension::ColorContrast,
        Dimension::SpacingLayout,
        Dimension::ComponentDesign,
        Dimension::AnimationInteraction,
        Dimension::Accessibility,
        Dimension::OverallAesthetic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::VisualHierarchy => "visual_hierarchy",
            Dimension::Typography => "typography",
            Dimension::ColorContrast => "color_contrast",
            Dimension::SpacingLayout => "spacing_layout",
            Dimension::ComponentDesign => "component_design",
            Dimension::AnimationInteraction => "animation_interaction",
            Dimension::Accessibility => "accessibility",
            Dimension::OverallAesthetic => "overall_aesthetic",
        }
    }

    /// 报告中使用的可读标题
    pub fn title(&self) -> &'static str {
        match self {
            Dimension::VisualHierarchy => "Visual Hierarchy",
            Dimension::Typography => "Typography",
            Dimension::ColorContrast => "Color",
            Dimension::SpacingLayout => "Spacing",
            Dimension::ComponentDesign => "Components",
            Dimension::AnimationInteraction => "Animation",
            Dimension::Accessibility => "Accessibility",
            Dimension::OverallAesthetic => "Aesthetic",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase().replace([' ', '-'], "_");
        Dimension::ALL
            .into_iter()
            .find(|d| d.as_str() == key)
            .ok_or_else(|| format!("unknown design dimension '{}'", s))
    }
}

/// 问题严重度：critical > high > medium > low
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "critical" => Ok(Severity::Critical),
            "high" => Ok(Severity::High),
            "medium" => Ok(Severity::Medium),
            "low" => Ok(Severity::Low),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
}

impl ImageFormat {
    /// 按文件头魔数识别；无法识别时按 PNG 处理
    pub fn sniff(bytes: &[u8]) -> Self {
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            ImageFormat::Jpeg
        } else {
            ImageFormat::Png
        }
    }

    pub fn media_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
        }
    }
}

/// 一次截图；payload 不进入 report.json（由 ReportWriter 单独落盘）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Screenshot {
    #[serde(skip)]
    pub payload: Vec<u8>,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
    /// 截图来源（URL 或文件路径）
    pub source: String,
    pub selector: Option<String>,
    #[serde(default)]
    pub full_page: bool,
}

impl Screenshot {
    pub fn new(payload: Vec<u8>, width: u32, height: u32, source: impl Into<String>) -> Self {
        let format = ImageFormat::sniff(&payload);
        Self {
            payload,
            format,
            width,
            height,
            captured_at: Utc::now(),
            source: source.into(),
            selector: None,
            full_page: false,
        }
    }

    pub fn with_selector(mut self, selector: Option<String>) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_full_page(mut self, full_page: bool) -> Self {
        self.full_page = full_page;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub dimension: Dimension,
    pub severity: Severity,
    pub description: String,
    pub location: Option<String>,
}

/// 改进建议；impact / effort 均在 [1, 10]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub dimension: Dimension,
    pub title: String,
    pub description: String,
    pub impact: f64,
    pub effort: f64,
    /// 示意性改动（CSS 片段、组件 diff 等）
    pub change: Option<String>,
}

pub const MIN_ESTIMATE: f64 = 1.0;
pub const MAX_ESTIMATE: f64 = 10.0;

impl Recommendation {
    pub fn new(
        dimension: Dimension,
        title: impl Into<String>,
        impact: f64,
        effort: f64,
    ) -> Self {
        Self {
            dimension,
            title: title.into(),
            description: String::new(),
            impact,
            effort,
            change: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_change(mut self, change: impl Into<String>) -> Self {
        self.change = Some(change.into());
        self
    }

    /// impact / max(effort, 1)
    pub fn priority_ratio(&self) -> f64 {
        self.impact / self.effort.max(1.0)
    }

    pub fn has_valid_estimates(&self) -> bool {
        (MIN_ESTIMATE..=MAX_ESTIMATE).contains(&self.impact)
            && (MIN_ESTIMATE..=MAX_ESTIMATE).contains(&self.effort)
    }
}

/// 一张截图的评估结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignSpec {
    pub iteration: usize,
    pub timestamp: DateTime<Utc>,
    pub dimension_scores: BTreeMap<Dimension, f64>,
    /// 加权综合分（0–10）
    pub current_score: f64,
    pub issues: Vec<Issue>,
    /// 按优先级排序后的建议（编排器排序）
    pub recommendations: Vec<Recommendation>,
    /// 评估插件给出的原始顺序，仅用于审计
    #[serde(default)]
    pub raw_recommendations: Vec<Recommendation>,
    pub estimated_score_after: f64,
    pub summary: Option<String>,
}

impl DesignSpec {
    /// 结构校验：分数在 [0,10]、建议的 impact/effort 在 [1,10]
    pub fn validate(&self) -> Result<(), EvaluateError> {
        if !(0.0..=10.0).contains(&self.current_score) {
            return Err(EvaluateError::invalid_schema(format!(
                "aggregate score {} outside [0, 10]",
                self.current_score
            )));
        }
        for (dimension, score) in &self.dimension_scores {
            if !(0.0..=10.0).contains(score) {
                return Err(EvaluateError::invalid_schema(format!(
                    "score {} for {} outside [0, 10]",
                    score, dimension
                )));
            }
        }
        if let Some(rec) = self.recommendations.iter().find(|r| !r.has_valid_estimates()) {
            return Err(EvaluateError::invalid_schema(format!(
                "recommendation '{}' has impact {} / effort {} outside [1, 10]",
                rec.title, rec.impact, rec.effort
            )));
        }
        Ok(())
    }

    pub fn score_for(&self, dimension: Dimension) -> Option<f64> {
        self.dimension_scores.get(&dimension).copied()
    }
}

/// 单条建议的应用结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub recommendation: Recommendation,
    pub applied: bool,
    pub reason: Option<String>,
}

impl ApplyOutcome {
    pub fn applied(recommendation: Recommendation) -> Self {
        Self {
            recommendation,
            applied: true,
            reason: None,
        }
    }

    pub fn failed(recommendation: Recommendation, reason: impl Into<String>) -> Self {
        Self {
            recommendation,
            applied: false,
            reason: Some(reason.into()),
        }
    }
}

/// 一轮迭代的结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: usize,
    pub spec: Option<DesignSpec>,
    pub screenshot: Option<Screenshot>,
    pub outcomes: Vec<ApplyOutcome>,
    pub duration_ms: u64,
    /// 与上一轮有分数的记录之差（首轮为 0）
    pub score_delta: f64,
    pub error: Option<StageError>,
}

impl IterationRecord {
    pub fn evaluated(iteration: usize, screenshot: Screenshot, spec: DesignSpec) -> Self {
        Self {
            iteration,
            spec: Some(spec),
            screenshot: Some(screenshot),
            outcomes: Vec::new(),
            duration_ms: 0,
            score_delta: 0.0,
            error: None,
        }
    }

    pub fn errored(iteration: usize, screenshot: Option<Screenshot>, error: StageError) -> Self {
        Self {
            iteration,
            spec: None,
            screenshot,
            outcomes: Vec::new(),
            duration_ms: 0,
            score_delta: 0.0,
            error: Some(error),
        }
    }

    pub fn is_errored(&self) -> bool {
        self.error.is_some()
    }

    pub fn score(&self) -> Option<f64> {
        self.spec.as_ref().map(|s| s.current_score)
    }

    /// 实际应用成功的建议
    pub fn applied_recommendations(&self) -> impl Iterator<Item = &Recommendation> {
        self.outcomes
            .iter()
            .filter(|o| o.applied)
            .map(|o| &o.recommendation)
    }

    pub fn applied_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.applied).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_parse() {
        assert_eq!("typography".parse::<Dimension>().unwrap(), Dimension::Typography);
        assert_eq!("Color Contrast".parse::<Dimension>().unwrap(), Dimension::ColorContrast);
        assert_eq!("spacing-layout".parse::<Dimension>().unwrap(), Dimension::SpacingLayout);
        assert!("vibes".parse::<Dimension>().is_err());
    }

    #[test]
    fn test_severity_order() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!("HIGH".parse::<Severity>().unwrap(), Severity::High);
    }

    #[test]
    fn test_priority_ratio_floors_effort() {
        let rec = Recommendation::new(Dimension::Typography, "Bump body size", 6.0, 0.5);
        assert_eq!(rec.priority_ratio(), 6.0);
        let rec = Recommendation::new(Dimension::Typography, "Type scale", 6.0, 3.0);
        assert_eq!(rec.priority_ratio(), 2.0);
    }

    #[test]
    fn test_image_format_sniff() {
        assert_eq!(ImageFormat::sniff(&[0xFF, 0xD8, 0xFF, 0xE0]), ImageFormat::Jpeg);
        assert_eq!(ImageFormat::sniff(&[0x89, b'P', b'N', b'G']), ImageFormat::Png);
    }

    #[test]
    fn test_design_spec_validate_rejects_out_of_range_effort() {
        let spec = DesignSpec {
            iteration: 0,
            timestamp: Utc::now(),
            dimension_scores: BTreeMap::new(),
            current_score: 6.0,
            issues: vec![],
            recommendations: vec![Recommendation::new(Dimension::Accessibility, "Focus rings", 8.0, 12.0)],
            raw_recommendations: Vec::new(),
            estimated_score_after: 7.0,
            summary: None,
        };
        let err = spec.validate().unwrap_err();
        assert_eq!(err.reason, crate::core::EvaluateFailure::ResponseInvalidSchema);
    }

    #[test]
    fn test_screenshot_payload_not_serialized() {
        let shot = Screenshot::new(vec![0x89, b'P', b'N', b'G'], 1440, 900, "http://localhost:5173");
        let json = serde_json::to_value(&shot).unwrap();
        assert!(json.get("payload").is_none());
        assert_eq!(json["format"], "png");
        assert_eq!(json["width"], 1440);
    }
}
