//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `LOUPE__*` 覆盖（双下划线表示嵌套，如 `LOUPE__REFINE__TARGET_SCORE=9`）。
//! 原始段落（*Section）只负责反序列化；`RefineConfig::try_from(&AppConfig)` 负责校验。

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::core::ConfigError;
use crate::plugins::CaptureConfig;
use crate::refine::Rubric;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub refine: RefineSection,
    pub capture: CaptureConfig,
    pub rubric: RubricSection,
    pub apply: ApplySection,
}

/// [app] 段：报告输出目录
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            output_dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("design_iterations")
}

/// [llm] 段：视觉模型后端
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai / mock；openai 兼容任意 base_url
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 读取 API Key 的环境变量名
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key_env: default_api_key_env(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

/// [refine] 段：循环控制参数
#[derive(Debug, Clone, Deserialize)]
pub struct RefineSection {
    /// 截图目标（URL 或图片路径）
    #[serde(default = "default_target")]
    pub target: String,
    #[serde(default = "default_target_score")]
    pub target_score: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_per_stage_timeout_ms")]
    pub per_stage_timeout_ms: u64,
    #[serde(default = "default_change_budget")]
    pub change_budget_per_iteration: usize,
    #[serde(default = "default_retry_budget")]
    pub retry_budget_on_evaluate_parse_error: u32,
    /// 低于该提升幅度时记录「收益递减」警告
    #[serde(default = "default_min_improvement")]
    pub min_improvement: f64,
}

impl Default for RefineSection {
    fn default() -> Self {
        Self {
            target: default_target(),
            target_score: default_target_score(),
            max_iterations: default_max_iterations(),
            per_stage_timeout_ms: default_per_stage_timeout_ms(),
            change_budget_per_iteration: default_change_budget(),
            retry_budget_on_evaluate_parse_error: default_retry_budget(),
            min_improvement: default_min_improvement(),
        }
    }
}

fn default_target() -> String {
    "http://localhost:5173".to_string()
}

fn default_target_score() -> f64 {
    8.5
}

fn default_max_iterations() -> usize {
    5
}

fn default_per_stage_timeout_ms() -> u64 {
    120_000
}

fn default_change_budget() -> usize {
    3
}

fn default_retry_budget() -> u32 {
    1
}

fn default_min_improvement() -> f64 {
    0.2
}

/// [rubric] 段：权重覆盖与归一化方式
#[derive(Debug, Clone, Deserialize)]
pub struct RubricSection {
    #[serde(default = "default_normalize_weights")]
    pub normalize_weights: bool,
    /// 维度名 -> 权重，未列出的维度使用默认权重
    #[serde(default)]
    pub weights: HashMap<String, f64>,
}

impl Default for RubricSection {
    fn default() -> Self {
        Self {
            normalize_weights: default_normalize_weights(),
            weights: HashMap::new(),
        }
    }
}

fn default_normalize_weights() -> bool {
    true
}

impl RubricSection {
    pub fn to_rubric(&self) -> Result<Rubric, ConfigError> {
        Rubric::from_overrides(&self.weights, self.normalize_weights)
    }
}

/// 建议应用方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// 由 LLM 生成精确替换并写入源码
    Llm,
    /// 只记录，不改动
    DryRun,
}

/// [apply] 段：源码根目录、可编辑文件、构建校验命令
#[derive(Debug, Clone, Deserialize)]
pub struct ApplySection {
    #[serde(default = "default_apply_mode")]
    pub mode: String,
    #[serde(default = "default_source_root")]
    pub source_root: PathBuf,
    /// 相对 source_root 的文件，作为 LLM 修改的上下文
    #[serde(default)]
    pub target_files: Vec<String>,
    /// 每次修改后执行的校验命令（如 `npm run build`）
    pub build_command: Option<String>,
    #[serde(default = "default_build_timeout_secs")]
    pub build_timeout_secs: u64,
    #[serde(default = "default_backup")]
    pub backup_before_edit: bool,
    #[serde(default = "default_max_file_size_kb")]
    pub max_file_size_kb: usize,
}

impl Default for ApplySection {
    fn default() -> Self {
        Self {
            mode: default_apply_mode(),
            source_root: default_source_root(),
            target_files: Vec::new(),
            build_command: None,
            build_timeout_secs: default_build_timeout_secs(),
            backup_before_edit: default_backup(),
            max_file_size_kb: default_max_file_size_kb(),
        }
    }
}

fn default_apply_mode() -> String {
    "dry_run".to_string()
}

fn default_source_root() -> PathBuf {
    PathBuf::from("frontend")
}

fn default_build_timeout_secs() -> u64 {
    120
}

fn default_backup() -> bool {
    true
}

fn default_max_file_size_kb() -> usize {
    1024
}

impl ApplySection {
    pub fn apply_mode(&self) -> Result<ApplyMode, ConfigError> {
        match self.mode.to_lowercase().replace('-', "_").as_str() {
            "llm" => Ok(ApplyMode::Llm),
            "dry_run" | "dryrun" | "none" => Ok(ApplyMode::DryRun),
            other => Err(ConfigError::ApplyMode(other.to_string())),
        }
    }
}

/// 从 config 目录加载配置，环境变量 LOUPE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 LOUPE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!(path = %path.display(), "config file not found, ignoring");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("LOUPE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    Ok(c.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refine::RefineConfig;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AppConfig::default();
        let refine = RefineConfig::try_from(&cfg).unwrap();
        assert_eq!(refine.target_score, 8.5);
        assert_eq!(refine.max_iterations, 5);
        assert_eq!(refine.capture.width, 1440);
        assert_eq!(refine.capture.height, 900);
        assert_eq!(cfg.apply.apply_mode().unwrap(), ApplyMode::DryRun);
        assert!(cfg.rubric.to_rubric().unwrap().normalizes());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loupe.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[refine]
target = "http://localhost:3000"
target_score = 9.0
max_iterations = 3

[capture]
width = 1280
height = 720
selector = "main"

[rubric]
normalize_weights = false

[rubric.weights]
accessibility = 2.0

[apply]
mode = "llm"
target_files = ["src/App.tsx"]
build_command = "npm run build"
"#
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        let refine = RefineConfig::try_from(&cfg).unwrap();
        assert_eq!(refine.target, "http://localhost:3000");
        assert_eq!(refine.target_score, 9.0);
        assert_eq!(refine.max_iterations, 3);
        assert_eq!(refine.capture.width, 1280);
        assert_eq!(refine.capture.selector.as_deref(), Some("main"));
        // 未写出的字段保留默认
        assert_eq!(refine.change_budget_per_iteration, 3);

        let rubric = cfg.rubric.to_rubric().unwrap();
        assert!(!rubric.normalizes());
        assert_eq!(rubric.weight(crate::refine::Dimension::Accessibility), 2.0);
        assert_eq!(cfg.apply.apply_mode().unwrap(), ApplyMode::Llm);
        assert_eq!(cfg.apply.build_command.as_deref(), Some("npm run build"));
    }

    #[test]
    fn test_unknown_apply_mode_rejected() {
        let section = ApplySection {
            mode: "yolo".to_string(),
            ..ApplySection::default()
        };
        assert!(matches!(section.apply_mode(), Err(ConfigError::ApplyMode(_))));
    }
}
