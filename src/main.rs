//! Loupe - UI 迭代优化
//!
//! 入口：解析命令行、加载配置、初始化日志与信号处理，组装插件并运行编排器，最后写出报告。

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use loupe::config::{load_config, ApplyMode};
use loupe::core::ShutdownManager;
use loupe::llm::create_llm_from_config;
use loupe::plugins::{ApplyPlugin, CapturePlugin, DryRunApplier, FileCapture, LlmApplier, VisionEvaluator};
use loupe::refine::{RefineConfig, RefineLoop, ReportWriter, TerminationReason};

#[derive(Parser)]
#[command(name = "loupe")]
#[command(about = "Iteratively capture, score and refine a running UI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 运行一次迭代优化
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(long)]
    config: Option<PathBuf>,
    /// 目标页面 URL
    #[arg(long)]
    target_url: Option<String>,
    #[arg(long)]
    target_score: Option<f64>,
    #[arg(long)]
    max_iterations: Option<usize>,
    /// 报告输出目录
    #[arg(long)]
    output: Option<PathBuf>,
    /// 只评估，不修改源码
    #[arg(long, default_value_t = false)]
    dry_run: bool,
    /// 使用磁盘上的截图代替浏览器
    #[arg(long)]
    screenshot: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    loupe::observability::init();

    match cli.command {
        Command::Run(args) => run(args).await,
    }
}

async fn run(args: RunArgs) -> anyhow::Result<ExitCode> {
    let mut cfg = load_config(args.config.clone()).context("Failed to load configuration")?;

    if let Some(url) = args.target_url {
        cfg.refine.target = url;
    } else if let Some(path) = &args.screenshot {
        cfg.refine.target = path.display().to_string();
    }
    if let Some(score) = args.target_score {
        cfg.refine.target_score = score;
    }
    if let Some(n) = args.max_iterations {
        cfg.refine.max_iterations = n;
    }
    if let Some(dir) = args.output {
        cfg.app.output_dir = dir;
    }
    if args.dry_run {
        cfg.apply.mode = "dry_run".to_string();
    }

    let refine_cfg = RefineConfig::try_from(&cfg).context("Invalid configuration")?;
    let rubric = cfg.rubric.to_rubric().context("Invalid rubric")?;
    let apply_mode = cfg.apply.apply_mode().context("Invalid apply mode")?;

    let llm = create_llm_from_config(&cfg.llm);

    let capture: Box<dyn CapturePlugin> = match args.screenshot {
        Some(path) => Box::new(FileCapture::new(path)),
        None => browser_capture()?,
    };
    let evaluator = VisionEvaluator::new(llm.clone(), rubric.clone(), refine_cfg.target_score);
    let applier: Box<dyn ApplyPlugin> = match apply_mode {
        ApplyMode::Llm => Box::new(LlmApplier::from_config(llm.clone(), &cfg.apply)),
        ApplyMode::DryRun => Box::new(DryRunApplier),
    };

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let refine = RefineLoop::new(refine_cfg, capture, evaluator, applier)
        .context("Invalid configuration")?
        .with_cancellation(shutdown.token());
    let report = refine.run().await;

    let run_dir = cfg
        .app
        .output_dir
        .join(format!("run_{}", report.started_at().format("%Y%m%d_%H%M%S")));
    let report_path = ReportWriter::new(&run_dir)
        .write(&report, &rubric)
        .await
        .with_context(|| format!("Failed to write report to {}", run_dir.display()))?;

    let (prompt_tokens, completion_tokens, total_tokens) = llm.token_usage();
    tracing::info!(prompt_tokens, completion_tokens, total_tokens, "token usage");

    let summary = report.summary();
    match (report.termination(), shutdown.reason()) {
        (TerminationReason::Cancelled, Some(reason)) => {
            tracing::warn!(%reason, iterations = summary.iterations, "refine run cancelled");
            println!("Termination:  {} ({})", report.termination(), reason);
        }
        _ => println!("Termination:  {}", report.termination()),
    }
    match (summary.start_score, report.final_score()) {
        (Some(start), Some(end)) => println!("Score:        {:.1} -> {:.1} (target {:.1})", start, end, report.target_score()),
        _ => println!("Score:        n/a (target {:.1})", report.target_score()),
    }
    println!("Iterations:   {}", summary.iterations);
    println!("Applied:      {}/{}", summary.total_applied, summary.total_attempted);
    if let Some(err) = report.error() {
        println!("Error:        {}", err);
    }
    println!("Report:       {}", report_path.display());

    Ok(if report.termination() == TerminationReason::Error {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

#[cfg(feature = "browser")]
fn browser_capture() -> anyhow::Result<Box<dyn CapturePlugin>> {
    Ok(Box::new(loupe::plugins::ChromeCapture::new()))
}

#[cfg(not(feature = "browser"))]
fn browser_capture() -> anyhow::Result<Box<dyn CapturePlugin>> {
    anyhow::bail!("no screenshot source: pass --screenshot <PATH> or build with --features browser")
}
