//! 评估回复解析
//!
//! 模型回复是自由文本，JSON 可能包在 ```json 代码块里，也可能前后夹杂说明文字。
//! `extract_payload` 从左到右尝试每个 `{`，返回第一个完整的 JSON 对象；
//! `parse_evaluation` 再按固定结构校验，并用评分细则重新计算综合分（忽略模型给出的综合分）。

use std::collections::BTreeMap;

use chrono::Utc;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::EvaluateError;
use crate::refine::{prioritize, DesignSpec, Dimension, Issue, Recommendation, Rubric, Severity};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("response is empty")]
    Empty,

    #[error("no JSON object found in response")]
    NoPayload,
}

/// 期望的模型回复结构（schema 会写进提示词）
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RawEvaluation {
    /// 每个设计维度 0-10 的分数，必须覆盖全部维度
    pub dimension_scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub issues: Vec<RawIssue>,
    #[serde(default)]
    pub recommendations: Vec<RawRecommendation>,
    /// 应用建议后的预估综合分
    #[serde(default)]
    pub estimated_score_after: Option<f64>,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RawIssue {
    pub dimension: String,
    /// critical | high | medium | low
    pub severity: String,
    pub description: String,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RawRecommendation {
    pub dimension: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// 1-10
    pub impact: f64,
    /// 1-10
    pub effort: f64,
    /// 示意性改动（CSS 片段等）
    #[serde(default)]
    pub change: Option<String>,
}

/// 参与预估的靠前建议条数
const ESTIMATE_TOP_N: usize = 3;

/// 提取第一个完整的 JSON 对象
pub fn extract_payload(raw: &str) -> Result<Value, ParseError> {
    if raw.trim().is_empty() {
        return Err(ParseError::Empty);
    }
    for (idx, _) in raw.match_indices('{') {
        let mut stream = serde_json::Deserializer::from_str(&raw[idx..]).into_iter::<Value>();
        if let Some(Ok(value)) = stream.next() {
            if value.is_object() {
                return Ok(value);
            }
        }
    }
    Err(ParseError::NoPayload)
}

/// 解析并校验一次评估回复
pub fn parse_evaluation(raw: &str, iteration: usize, rubric: &Rubric) -> Result<DesignSpec, EvaluateError> {
    let payload = extract_payload(raw).map_err(|e| EvaluateError::unparseable(e.to_string()))?;
    let evaluation: RawEvaluation =
        serde_json::from_value(payload).map_err(|e| EvaluateError::invalid_schema(e.to_string()))?;

    let mut dimension_scores = BTreeMap::new();
    for (key, score) in &evaluation.dimension_scores {
        let dimension = parse_dimension(key)?;
        if !(0.0..=10.0).contains(score) {
            return Err(EvaluateError::invalid_schema(format!(
                "score {} for {} outside [0, 10]",
                score, key
            )));
        }
        dimension_scores.insert(dimension, *score);
    }
    let missing: Vec<&str> = Dimension::ALL
        .iter()
        .filter(|d| !dimension_scores.contains_key(*d))
        .map(|d| d.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(EvaluateError::invalid_schema(format!(
            "missing dimension scores: {}",
            missing.join(", ")
        )));
    }

    let issues = evaluation
        .issues
        .iter()
        .map(|raw| {
            let severity: Severity = raw.severity.parse().map_err(EvaluateError::invalid_schema)?;
            Ok(Issue {
                dimension: parse_dimension(&raw.dimension)?,
                severity,
                description: raw.description.clone(),
                location: raw.location.clone(),
            })
        })
        .collect::<Result<Vec<_>, EvaluateError>>()?;

    let recommendations = evaluation
        .recommendations
        .iter()
        .map(|raw| {
            let mut rec = Recommendation::new(parse_dimension(&raw.dimension)?, raw.title.clone(), raw.impact, raw.effort)
                .with_description(raw.description.clone());
            rec.change = raw.change.clone();
            if !rec.has_valid_estimates() {
                return Err(EvaluateError::invalid_schema(format!(
                    "recommendation '{}' has impact {} / effort {} outside [1, 10]",
                    rec.title, rec.impact, rec.effort
                )));
            }
            Ok(rec)
        })
        .collect::<Result<Vec<_>, EvaluateError>>()?;

    let current_score = rubric.aggregate(&dimension_scores);
    let estimated_score_after = match evaluation.estimated_score_after {
        Some(v) if v.is_finite() => v.clamp(0.0, 10.0),
        _ => estimate_after(current_score, &dimension_scores, &recommendations, rubric),
    };

    Ok(DesignSpec {
        iteration,
        timestamp: Utc::now(),
        dimension_scores,
        current_score,
        issues,
        recommendations,
        raw_recommendations: Vec::new(),
        estimated_score_after,
        summary: evaluation.summary,
    })
}

fn parse_dimension(key: &str) -> Result<Dimension, EvaluateError> {
    key.parse::<Dimension>().map_err(EvaluateError::invalid_schema)
}

/// 模型未给出预估时：靠前的几条建议各自按 impact/10 比例补足该维度到满分的差距，
/// 再乘以该维度在综合分中的占比
pub fn estimate_after(
    current: f64,
    scores: &BTreeMap<Dimension, f64>,
    recommendations: &[Recommendation],
    rubric: &Rubric,
) -> f64 {
    let gain: f64 = prioritize(recommendations)
        .iter()
        .take(ESTIMATE_TOP_N)
        .map(|rec| {
            let headroom = 10.0 - scores.get(&rec.dimension).copied().unwrap_or(10.0);
            headroom * (rec.impact / 10.0) * rubric.share(rec.dimension)
        })
        .sum();
    (current + gain).min(10.0)
}

/// 回复结构的 JSON Schema（美化输出，用于提示词）
pub fn evaluation_schema() -> String {
    let schema = schemars::schema_for!(RawEvaluation);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EvaluateFailure;
    use crate::llm::mock::PLACEHOLDER_EVALUATION;

    fn full_scores(value: f64) -> Value {
        let map: serde_json::Map<String, Value> = Dimension::ALL
            .iter()
            .map(|d| (d.as_str().to_string(), Value::from(value)))
            .collect();
        Value::Object(map)
    }

    #[test]
    fn test_extract_fenced() {
        let raw = "Here is my evaluation:\n```json\n{\"a\": {\"b\": 1}}\n```\nThanks.";
        let v = extract_payload(raw).unwrap();
        assert_eq!(v["a"]["b"], 1);
    }

    #[test]
    fn test_extract_skips_malformed_prefix() {
        let raw = "scores {not json} then {\"ok\": true}";
        assert_eq!(extract_payload(raw).unwrap()["ok"], true);
    }

    #[test]
    fn test_extract_failures() {
        assert_eq!(extract_payload("   "), Err(ParseError::Empty));
        assert_eq!(extract_payload("I cannot rate this image."), Err(ParseError::NoPayload));
        assert_eq!(extract_payload("[1, 2, 3]"), Err(ParseError::NoPayload));
    }

    #[test]
    fn test_parse_placeholder_recomputes_aggregate() {
        let spec = parse_evaluation(PLACEHOLDER_EVALUATION, 2, &Rubric::default()).unwrap();
        assert_eq!(spec.iteration, 2);
        assert_eq!(spec.dimension_scores.len(), 8);
        assert!((spec.current_score - 52.15 / 8.5).abs() < 1e-9);
        assert_eq!(spec.issues[0].severity, Severity::High);
        assert_eq!(spec.recommendations.len(), 3);
        assert!(spec.estimated_score_after > spec.current_score);
        assert!(spec.estimated_score_after <= 10.0);
    }

    #[test]
    fn test_model_aggregate_ignored() {
        let raw = serde_json::json!({
            "current_score": 9.9,
            "dimension_scores": full_scores(5.0),
            "estimated_score_after": 14.0
        })
        .to_string();
        let spec = parse_evaluation(&raw, 0, &Rubric::default()).unwrap();
        assert!((spec.current_score - 5.0).abs() < 1e-9);
        assert_eq!(spec.estimated_score_after, 10.0);
    }

    #[test]
    fn test_unparseable() {
        let err = parse_evaluation("The page looks nice.", 0, &Rubric::default()).unwrap_err();
        assert_eq!(err.reason, EvaluateFailure::ResponseUnparseable);
    }

    #[test]
    fn test_unknown_dimension_is_invalid_schema() {
        let mut scores = full_scores(6.0);
        scores["vibes"] = Value::from(9.0);
        let raw = serde_json::json!({ "dimension_scores": scores }).to_string();
        let err = parse_evaluation(&raw, 0, &Rubric::default()).unwrap_err();
        assert_eq!(err.reason, EvaluateFailure::ResponseInvalidSchema);
        assert!(err.detail.contains("vibes"));
    }

    #[test]
    fn test_missing_dimension_is_invalid_schema() {
        let mut scores = full_scores(6.0);
        scores.as_object_mut().unwrap().remove("accessibility");
        let raw = serde_json::json!({ "dimension_scores": scores }).to_string();
        let err = parse_evaluation(&raw, 0, &Rubric::default()).unwrap_err();
        assert_eq!(err.reason, EvaluateFailure::ResponseInvalidSchema);
        assert!(err.detail.contains("accessibility"));
    }

    #[test]
    fn test_missing_field_and_bad_values() {
        let raw = r#"{"issues": []}"#;
        let err = parse_evaluation(raw, 0, &Rubric::default()).unwrap_err();
        assert_eq!(err.reason, EvaluateFailure::ResponseInvalidSchema);

        let raw = serde_json::json!({
            "dimension_scores": full_scores(6.0),
            "issues": [{"dimension": "typography", "severity": "catastrophic", "description": "x"}]
        })
        .to_string();
        let err = parse_evaluation(&raw, 0, &Rubric::default()).unwrap_err();
        assert_eq!(err.reason, EvaluateFailure::ResponseInvalidSchema);

        let raw = serde_json::json!({
            "dimension_scores": full_scores(6.0),
            "recommendations": [{"dimension": "typography", "title": "t", "impact": 11, "effort": 2}]
        })
        .to_string();
        let err = parse_evaluation(&raw, 0, &Rubric::default()).unwrap_err();
        assert_eq!(err.reason, EvaluateFailure::ResponseInvalidSchema);
    }

    #[test]
    fn test_schema_mentions_fields() {
        let schema = evaluation_schema();
        assert!(schema.contains("dimension_scores"));
        assert!(schema.contains("recommendations"));
    }
}
