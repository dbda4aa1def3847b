//! 核心层：错误类型与取消 / 关闭

pub mod error;
pub mod shutdown;

pub use error::{
    CaptureError, CaptureFailure, ConfigError, EvaluateError, EvaluateFailure, StageError,
};
pub use shutdown::{ShutdownManager, ShutdownReason};
