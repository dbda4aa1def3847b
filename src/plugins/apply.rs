//! 应用插件
//!
//! LlmApplier：逐条建议让 LLM 给出一处精确替换 `{file, old_string, new_string}`，
//! 在沙箱工作区内执行，然后可选地运行构建命令校验；构建失败则还原该文件并标记为未应用。
//! DryRunApplier：只记录，不改动任何文件。

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use tokio::process::Command;

use crate::config::ApplySection;
use crate::llm::{LlmClient, Message};
use crate::plugins::parse::extract_payload;
use crate::plugins::workspace::Workspace;
use crate::plugins::ApplyPlugin;
use crate::refine::{ApplyOutcome, Recommendation};

const SYSTEM_PROMPT: &str = "You are a frontend engineer implementing design feedback. \
Make one minimal, self-contained edit per request. Answer with a single JSON object only.";

/// LLM 给出的一处编辑
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct EditProposal {
    /// 相对源码根目录的文件路径
    pub file: String,
    /// 文件中现有的、需要被替换的原文
    pub old_string: String,
    pub new_string: String,
}

pub struct LlmApplier {
    llm: Arc<dyn LlmClient>,
    workspace: Workspace,
    target_files: Vec<String>,
    build_command: Option<String>,
    build_timeout: Duration,
}

impl LlmApplier {
    pub fn new(llm: Arc<dyn LlmClient>, workspace: Workspace, target_files: Vec<String>) -> Self {
        Self {
            llm,
            workspace,
            target_files,
            build_command: None,
            build_timeout: Duration::from_secs(120),
        }
    }

    pub fn from_config(llm: Arc<dyn LlmClient>, cfg: &ApplySection) -> Self {
        let workspace = Workspace::new(&cfg.source_root)
            .with_backup(cfg.backup_before_edit)
            .with_max_file_size(cfg.max_file_size_kb * 1024);
        Self::new(llm, workspace, cfg.target_files.clone())
            .with_build_command(cfg.build_command.clone(), Duration::from_secs(cfg.build_timeout_secs))
    }

    pub fn with_build_command(mut self, command: Option<String>, timeout: Duration) -> Self {
        self.build_command = command.filter(|c| !c.trim().is_empty());
        self.build_timeout = timeout;
        self
    }

    fn build_prompt(&self, rec: &Recommendation) -> Result<String, String> {
        let mut prompt = String::new();
        let _ = writeln!(prompt, "Implement this design recommendation:");
        let _ = writeln!(prompt, "- dimension: {}", rec.dimension);
        let _ = writeln!(prompt, "- title: {}", rec.title);
        if !rec.description.is_empty() {
            let _ = writeln!(prompt, "- description: {}", rec.description);
        }
        if let Some(change) = &rec.change {
            let _ = writeln!(prompt, "- suggested change:\n{}", change);
        }

        let mut included = 0;
        for file in &self.target_files {
            match self.workspace.read(file) {
                Ok(content) => {
                    let _ = writeln!(prompt, "\nFile `{}`:\n```\n{}\n```", file, content);
                    included += 1;
                }
                Err(e) => tracing::warn!(file = %file, error = %e, "skipping target file"),
            }
        }
        if included == 0 {
            return Err("no readable target files".to_string());
        }

        let schema = schemars::schema_for!(EditProposal);
        let _ = writeln!(
            prompt,
            "\n`old_string` must be copied verbatim from one of the files above.\nRespond with JSON matching this schema:\n```json\n{}\n```",
            serde_json::to_string_pretty(&schema).unwrap_or_default()
        );
        Ok(prompt)
    }

    async fn propose(&self, rec: &Recommendation) -> Result<EditProposal, String> {
        let prompt = self.build_prompt(rec)?;
        let raw = self
            .llm
            .complete(&[Message::system(SYSTEM_PROMPT), Message::user(prompt)])
            .await
            .map_err(|e| format!("llm error: {}", e))?;
        let payload = extract_payload(&raw).map_err(|e| format!("unparseable edit proposal: {}", e))?;
        serde_json::from_value(payload).map_err(|e| format!("invalid edit proposal: {}", e))
    }

    /// 运行构建命令；非零退出或超时视为失败
    async fn verify_build(&self) -> Result<(), String> {
        let Some(command) = &self.build_command else {
            return Ok(());
        };
        tracing::info!(command = %command, "running build check");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.current_dir(self.workspace.root()).kill_on_drop(true);

        let output = tokio::time::timeout(self.build_timeout, cmd.output())
            .await
            .map_err(|_| format!("build timed out after {}s", self.build_timeout.as_secs()))?
            .map_err(|e| format!("build execution failed: {}", e))?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr.trim().chars().rev().take(300).collect::<Vec<_>>().into_iter().rev().collect();
            Err(format!("build failed ({}): {}", output.status, tail))
        }
    }

    async fn apply_one(&self, rec: &Recommendation) -> ApplyOutcome {
        let proposal = match self.propose(rec).await {
            Ok(p) => p,
            Err(reason) => return ApplyOutcome::failed(rec.clone(), reason),
        };
        // 在构建校验通过之前保持未确认；本 future 被丢弃时自动还原
        let pending = match self
            .workspace
            .edit_pending(&proposal.file, &proposal.old_string, &proposal.new_string)
        {
            Ok(p) => p,
            Err(e) => return ApplyOutcome::failed(rec.clone(), e.to_string()),
        };
        if let Err(reason) = self.verify_build().await {
            if let Err(e) = pending.rollback() {
                tracing::error!(file = %proposal.file, error = %e, "failed to restore after build failure");
            }
            return ApplyOutcome::failed(rec.clone(), reason);
        }
        pending.commit();
        ApplyOutcome::applied(rec.clone())
    }
}

#[async_trait]
impl ApplyPlugin for LlmApplier {
    fn name(&self) -> &str {
        "llm_applier"
    }

    async fn apply(&self, recommendations: &[Recommendation]) -> Vec<ApplyOutcome> {
        let mut outcomes = Vec::with_capacity(recommendations.len());
        for rec in recommendations {
            let outcome = self.apply_one(rec).await;
            tracing::info!(
                title = %rec.title,
                applied = outcome.applied,
                reason = ?outcome.reason,
                "recommendation processed"
            );
            outcomes.push(outcome);
        }
        outcomes
    }
}

/// 只记录不修改
#[derive(Debug, Default)]
pub struct DryRunApplier;

#[async_trait]
impl ApplyPlugin for DryRunApplier {
    fn name(&self) -> &str {
        "dry_run"
    }

    async fn apply(&self, recommendations: &[Recommendation]) -> Vec<ApplyOutcome> {
        recommendations
            .iter()
            .map(|rec| {
                tracing::info!(title = %rec.title, dimension = %rec.dimension, "dry run: would apply");
                ApplyOutcome::failed(rec.clone(), "dry run")
            })
            .collect()
    }
}
