//! 迭代编排器
//!
//! 每轮：capture -> evaluate（可重试）-> prioritize -> 终止判断 -> apply -> 下一轮。
//! 终止判断顺序：分数达标 (TARGET_REACHED) > 迭代预算用尽 (BUDGET_EXHAUSTED)；
//! 截图/评估的终态失败为 ERROR；取消信号为 CANCELLED。任何退出路径都返回已封存的 Report，
//! 并且都会调用截图插件的 release。
//!
//! 每次插件调用都受单阶段超时约束，并与取消令牌竞争（biased select，取消优先）；
//! 被取消的调用其 future 直接丢弃。

use std::future::Future;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::core::{CaptureError, CaptureFailure, ConfigError, EvaluateError, EvaluateFailure, StageError};
use crate::plugins::{ApplyPlugin, CaptureConfig, CapturePlugin, EvaluatePlugin};
use crate::refine::prioritizer::{prioritize, select_batch};
use crate::refine::report::{Report, ReportBuilder, TerminationReason};
use crate::refine::types::{ApplyOutcome, DesignSpec, IterationRecord, Recommendation, Screenshot};

/// 经过校验的运行配置
#[derive(Debug, Clone)]
pub struct RefineConfig {
    /// 截图目标（URL 或图片路径，由截图插件解释）
    pub target: String,
    pub target_score: f64,
    pub max_iterations: usize,
    pub per_stage_timeout_ms: u64,
    pub change_budget_per_iteration: usize,
    pub capture: CaptureConfig,
    pub retry_budget_on_evaluate_parse_error: u32,
    pub min_improvement: f64,
}

impl RefineConfig {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            target_score: 8.5,
            max_iterations: 5,
            per_stage_timeout_ms: 120_000,
            change_budget_per_iteration: 3,
            capture: CaptureConfig::default(),
            retry_budget_on_evaluate_parse_error: 1,
            min_improvement: 0.2,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations < 1 {
            return Err(ConfigError::MaxIterations(self.max_iterations));
        }
        if !(0.0..=10.0).contains(&self.target_score) {
            return Err(ConfigError::TargetScore(self.target_score));
        }
        if self.per_stage_timeout_ms == 0 {
            return Err(ConfigError::StageTimeout);
        }
        if self.change_budget_per_iteration < 1 {
            return Err(ConfigError::ChangeBudget);
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(ConfigError::CaptureSize {
                width: self.capture.width,
                height: self.capture.height,
            });
        }
        if self.target.trim().is_empty() {
            return Err(ConfigError::EmptyTarget);
        }
        Ok(())
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.per_stage_timeout_ms)
    }
}

impl TryFrom<&AppConfig> for RefineConfig {
    type Error = ConfigError;

    fn try_from(app: &AppConfig) -> Result<Self, Self::Error> {
        let section = &app.refine;
        let config = Self {
            target: section.target.clone(),
            target_score: section.target_score,
            max_iterations: section.max_iterations,
            per_stage_timeout_ms: section.per_stage_timeout_ms,
            change_budget_per_iteration: section.change_budget_per_iteration,
            capture: app.capture.clone(),
            retry_budget_on_evaluate_parse_error: section.retry_budget_on_evaluate_parse_error,
            min_improvement: section.min_improvement,
        };
        config.validate()?;
        app.rubric.to_rubric()?;
        Ok(config)
    }
}

/// 受保护阶段调用的结果
enum Guarded<T> {
    Done(T),
    TimedOut,
    Cancelled,
}

/// 使本轮（及整次运行）停止的原因
enum Halt {
    Cancelled,
    Failed(StageError),
}

const APPLY_TIMED_OUT: &str = "apply stage timed out; outcome unknown";
const APPLY_CANCELLED: &str = "apply cancelled; outcome unknown";
const NO_OUTCOME: &str = "no outcome reported";

/// 迭代编排器：独占 Report，按顺序驱动三个插件
pub struct RefineLoop<C, E, A> {
    config: RefineConfig,
    capture: C,
    evaluator: E,
    applier: A,
    cancel: CancellationToken,
}

impl<C, E, A> RefineLoop<C, E, A>
where
    C: CapturePlugin,
    E: EvaluatePlugin,
    A: ApplyPlugin,
{
    pub fn new(config: RefineConfig, capture: C, evaluator: E, applier: A) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            capture,
            evaluator,
            applier,
            cancel: CancellationToken::new(),
        })
    }

    /// 使用外部取消令牌（如 ShutdownManager::token()）
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &RefineConfig {
        &self.config
    }

    /// 运行循环直到终止；从不返回错误，失败体现在 Report 的终止原因中
    pub async fn run(&self) -> Report {
        let mut report = ReportBuilder::new(self.config.target_score);
        info!(
            run_id = %report.run_id(),
            capture_target = %self.config.target,
            target_score = self.config.target_score,
            max_iterations = self.config.max_iterations,
            "refine run started"
        );

        let (termination, error) = match self.prepare().await {
            Ok(()) => self.drive(&mut report).await,
            Err(Halt::Cancelled) => (TerminationReason::Cancelled, None),
            Err(Halt::Failed(err)) => {
                report.append(IterationRecord::errored(0, None, err.clone()));
                (TerminationReason::Error, Some(err))
            }
        };

        self.release().await;

        let report = report.finish(termination, error);
        info!(
            run_id = %report.run_id(),
            termination = %report.termination(),
            iterations = report.records().len(),
            final_score = ?report.final_score(),
            elapsed_ms = report.elapsed_ms(),
            "refine run finished"
        );
        report
    }

    async fn prepare(&self) -> Result<(), Halt> {
        let start = Instant::now();
        match self.guarded(self.capture.prepare()).await {
            Guarded::Done(Ok(())) => {
                audit("prepare", true, "ok", start);
                Ok(())
            }
            Guarded::Done(Err(e)) => {
                audit("prepare", false, e.reason.as_str(), start);
                Err(Halt::Failed(e.into()))
            }
            Guarded::TimedOut => {
                audit("prepare", false, "timeout", start);
                Err(Halt::Failed(
                    CaptureError::new(CaptureFailure::StageTimeout, self.timeout_detail("prepare")).into(),
                ))
            }
            Guarded::Cancelled => {
                audit("prepare", false, "cancelled", start);
                Err(Halt::Cancelled)
            }
        }
    }

    /// release 不受取消影响，但仍有超时上限
    async fn release(&self) {
        let start = Instant::now();
        match tokio::time::timeout(self.config.stage_timeout(), self.capture.release()).await {
            Ok(()) => audit("release", true, "ok", start),
            Err(_) => {
                audit("release", false, "timeout", start);
                warn!(plugin = self.capture.name(), "capture release timed out");
            }
        }
    }

    async fn drive(&self, report: &mut ReportBuilder) -> (TerminationReason, Option<StageError>) {
        let mut iteration = 0usize;
        loop {
            if self.cancel.is_cancelled() {
                info!(iteration, "cancellation observed between iterations");
                return (TerminationReason::Cancelled, None);
            }
            let started = Instant::now();
            info!(iteration, "iteration started");

            let screenshot = match self.capture_once().await {
                Ok(s) => s,
                Err(Halt::Cancelled) => return (TerminationReason::Cancelled, None),
                Err(Halt::Failed(err)) => {
                    warn!(iteration, error = %err, "capture failed, stopping");
                    let mut record = IterationRecord::errored(iteration, None, err.clone());
                    record.duration_ms = elapsed_ms(started);
                    report.append(record);
                    return (TerminationReason::Error, Some(err));
                }
            };

            let mut spec = match self.evaluate_with_retry(&screenshot, iteration).await {
                Ok(spec) => spec,
                Err(Halt::Cancelled) => return (TerminationReason::Cancelled, None),
                Err(Halt::Failed(err)) => {
                    warn!(iteration, error = %err, "evaluation failed, stopping");
                    let mut record = IterationRecord::errored(iteration, Some(screenshot), err.clone());
                    record.duration_ms = elapsed_ms(started);
                    report.append(record);
                    return (TerminationReason::Error, Some(err));
                }
            };
            spec.raw_recommendations = std::mem::take(&mut spec.recommendations);
            spec.recommendations = prioritize(&spec.raw_recommendations);
            let score = spec.current_score;
            self.log_progress(report.last_score(), &spec);

            let batch = select_batch(&spec.recommendations, self.config.change_budget_per_iteration);
            let mut record = IterationRecord::evaluated(iteration, screenshot, spec);

            if score >= self.config.target_score {
                info!(iteration, score, target_score = self.config.target_score, "target score reached");
                record.duration_ms = elapsed_ms(started);
                report.append(record);
                return (TerminationReason::TargetReached, None);
            }
            if iteration + 1 >= self.config.max_iterations {
                info!(iteration, score, "iteration budget exhausted");
                record.duration_ms = elapsed_ms(started);
                report.append(record);
                return (TerminationReason::BudgetExhausted, None);
            }
            if self.cancel.is_cancelled() {
                record.duration_ms = elapsed_ms(started);
                report.append(record);
                return (TerminationReason::Cancelled, None);
            }

            let (outcomes, cancelled) = self.apply_batch(&batch).await;
            info!(
                iteration,
                attempted = outcomes.len(),
                applied = outcomes.iter().filter(|o| o.applied).count(),
                "apply stage finished"
            );
            record.outcomes = outcomes;
            record.duration_ms = elapsed_ms(started);
            report.append(record);
            if cancelled {
                return (TerminationReason::Cancelled, None);
            }

            iteration += 1;
        }
    }

    async fn capture_once(&self) -> Result<Screenshot, Halt> {
        let start = Instant::now();
        let call = self.capture.capture(&self.config.target, &self.config.capture);
        match self.guarded(call).await {
            Guarded::Done(Ok(shot)) => {
                if let Err(e) = self.check_dimensions(&shot) {
                    audit("capture", false, e.reason.as_str(), start);
                    return Err(Halt::Failed(e.into()));
                }
                audit("capture", true, "ok", start);
                debug!(
                    bytes = shot.payload.len(),
                    width = shot.width,
                    height = shot.height,
                    "screenshot captured"
                );
                Ok(shot)
            }
            Guarded::Done(Err(e)) => {
                audit("capture", false, e.reason.as_str(), start);
                Err(Halt::Failed(e.into()))
            }
            Guarded::TimedOut => {
                audit("capture", false, "timeout", start);
                Err(Halt::Failed(
                    CaptureError::new(CaptureFailure::StageTimeout, self.timeout_detail("capture")).into(),
                ))
            }
            Guarded::Cancelled => {
                audit("capture", false, "cancelled", start);
                Err(Halt::Cancelled)
            }
        }
    }

    /// 宽高必须为正；纯视口截图还必须与请求的视口一致
    fn check_dimensions(&self, shot: &Screenshot) -> Result<(), CaptureError> {
        if shot.width == 0 || shot.height == 0 {
            return Err(CaptureError::region_not_found(format!(
                "captured region is empty ({}x{})",
                shot.width, shot.height
            )));
        }
        let requested = &self.config.capture;
        let viewport_only = requested.selector.is_none() && !requested.full_page;
        if viewport_only && (shot.width, shot.height) != (requested.width, requested.height) {
            return Err(CaptureError::region_not_found(format!(
                "captured {}x{} but viewport is {}x{}",
                shot.width, shot.height, requested.width, requested.height
            )));
        }
        Ok(())
    }

    /// 同一张截图最多评估 retry_budget + 1 次
    async fn evaluate_with_retry(&self, screenshot: &Screenshot, iteration: usize) -> Result<DesignSpec, Halt> {
        let max_attempts = self.config.retry_budget_on_evaluate_parse_error.saturating_add(1);
        let mut last_error = EvaluateError::unparseable("evaluation never attempted");

        for attempt in 1..=max_attempts {
            let start = Instant::now();
            let error = match self.guarded(self.evaluator.evaluate(screenshot, iteration)).await {
                Guarded::Done(Ok(mut spec)) => {
                    spec.iteration = iteration;
                    match spec.validate() {
                        Ok(()) => {
                            audit("evaluate", true, "ok", start);
                            return Ok(spec);
                        }
                        Err(e) => e,
                    }
                }
                Guarded::Done(Err(e)) => e,
                Guarded::TimedOut => {
                    EvaluateError::new(EvaluateFailure::StageTimeout, self.timeout_detail("evaluate"))
                }
                Guarded::Cancelled => {
                    audit("evaluate", false, "cancelled", start);
                    return Err(Halt::Cancelled);
                }
            };
            audit("evaluate", false, error.reason.as_str(), start);
            if attempt < max_attempts {
                warn!(iteration, attempt, max_attempts, error = %error, "evaluation failed, retrying with same screenshot");
            }
            last_error = error;
        }

        Err(Halt::Failed(StageError::Evaluate {
            error: last_error,
            attempts: max_attempts,
        }))
    }

    /// 返回 (按批次顺序对齐的结果, 是否被取消)
    async fn apply_batch(&self, batch: &[Recommendation]) -> (Vec<ApplyOutcome>, bool) {
        if batch.is_empty() {
            return (Vec::new(), false);
        }
        let start = Instant::now();
        match self.guarded(self.applier.apply(batch)).await {
            Guarded::Done(outcomes) => {
                audit("apply", true, "ok", start);
                (reconcile_outcomes(batch, outcomes), false)
            }
            Guarded::TimedOut => {
                audit("apply", false, "timeout", start);
                (fail_all(batch, APPLY_TIMED_OUT), false)
            }
            Guarded::Cancelled => {
                audit("apply", false, "cancelled", start);
                (fail_all(batch, APPLY_CANCELLED), true)
            }
        }
    }

    async fn guarded<F: Future>(&self, call: F) -> Guarded<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Guarded::Cancelled,
            res = tokio::time::timeout(self.config.stage_timeout(), call) => match res {
                Ok(value) => Guarded::Done(value),
                Err(_) => Guarded::TimedOut,
            },
        }
    }

    fn timeout_detail(&self, stage: &str) -> String {
        format!("{} exceeded {} ms", stage, self.config.per_stage_timeout_ms)
    }

    fn log_progress(&self, previous: Option<f64>, spec: &DesignSpec) {
        match previous {
            Some(prev) => {
                let delta = spec.current_score - prev;
                info!(
                    iteration = spec.iteration,
                    score = spec.current_score,
                    delta,
                    recommendations = spec.recommendations.len(),
                    "evaluation scored"
                );
                if delta < self.config.min_improvement {
                    warn!(
                        iteration = spec.iteration,
                        delta,
                        min_improvement = self.config.min_improvement,
                        "diminishing returns: improvement below threshold"
                    );
                }
            }
            None => info!(
                iteration = spec.iteration,
                score = spec.current_score,
                recommendations = spec.recommendations.len(),
                "baseline evaluation scored"
            ),
        }
    }
}

/// 将插件返回的结果按标题对齐到提交的批次；缺失的补为未应用，多余的丢弃
pub fn reconcile_outcomes(batch: &[Recommendation], outcomes: Vec<ApplyOutcome>) -> Vec<ApplyOutcome> {
    let mut pending: Vec<Option<ApplyOutcome>> = outcomes.into_iter().map(Some).collect();
    let aligned: Vec<ApplyOutcome> = batch
        .iter()
        .map(|rec| {
            let matched = pending
                .iter_mut()
                .find(|slot| matches!(slot, Some(o) if o.recommendation.title == rec.title))
                .and_then(Option::take);
            match matched {
                Some(outcome) => ApplyOutcome {
                    recommendation: rec.clone(),
                    applied: outcome.applied,
                    reason: outcome.reason,
                },
                None => ApplyOutcome::failed(rec.clone(), NO_OUTCOME),
            }
        })
        .collect();

    let extra = pending.iter().filter(|slot| slot.is_some()).count();
    if extra > 0 {
        warn!(extra, "apply plugin reported outcomes for recommendations outside the batch; dropped");
    }
    aligned
}

fn fail_all(batch: &[Recommendation], reason: &str) -> Vec<ApplyOutcome> {
    batch
        .iter()
        .map(|rec| ApplyOutcome::failed(rec.clone(), reason))
        .collect()
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// 每次插件调用一条结构化审计日志（JSON）
fn audit(stage: &str, ok: bool, outcome: &str, start: Instant) {
    let audit = serde_json::json!({
        "event": "stage_audit",
        "stage": stage,
        "ok": ok,
        "outcome": outcome,
        "duration_ms": elapsed_ms(start),
    });
    info!(audit = %audit, "stage");
}
