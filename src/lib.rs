//! Loupe - Rust UI 迭代优化系统
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、取消 / 关闭
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock），支持图片消息
//! - **observability**: tracing 初始化
//! - **plugins**: 截图 / 评估 / 应用三类插件接口及实现
//! - **refine**: 数据模型、评分细则、优先级排序、迭代编排器与报告

pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod plugins;
pub mod refine;

pub use refine::{RefineConfig, RefineLoop, Report, TerminationReason};
