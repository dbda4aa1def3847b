//! 对话消息（支持图片附件，供视觉模型使用）

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::refine::{ImageFormat, Screenshot};

/// 消息角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 内联图片（base64）
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImageAttachment {
    pub format: ImageFormat,
    pub base64: String,
}

impl ImageAttachment {
    pub fn from_bytes(bytes: &[u8], format: ImageFormat) -> Self {
        Self {
            format,
            base64: STANDARD.encode(bytes),
        }
    }

    pub fn from_screenshot(shot: &Screenshot) -> Self {
        Self::from_bytes(&shot.payload, shot.format)
    }

    /// `data:image/png;base64,...`
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.format.media_type(), self.base64)
    }
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageAttachment>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn with_image(mut self, image: ImageAttachment) -> Self {
        self.images.push(image);
        self
    }
}
