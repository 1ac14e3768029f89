//! 错误信息结构
//!
//! 提供结构化的错误信息传递给切面

/// 结构化的错误信息
///
/// 用于在 after_throwing 通知中传递更丰富的错误信息。
/// 主错误本身归执行管线所有并原样重新抛出，通知只能观察这份快照。
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    /// 错误消息
    pub message: String,

    /// 错误源链（cause chain）
    pub source_chain: Vec<String>,
}

impl ErrorInfo {
    /// 从 anyhow 错误创建 ErrorInfo
    pub fn from_error(error: &anyhow::Error) -> Self {
        let message = error.to_string();

        // 构建错误源链
        let source_chain = error.chain().skip(1).map(|cause| cause.to_string()).collect();

        Self {
            message,
            source_chain,
        }
    }

    /// 创建简单的 ErrorInfo（只包含消息）
    pub fn simple(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source_chain: Vec::new(),
        }
    }

    /// 获取完整的错误描述（包含源链）
    pub fn full_description(&self) -> String {
        if self.source_chain.is_empty() {
            self.message.clone()
        } else {
            format!(
                "{}\nCaused by:\n  {}",
                self.message,
                self.source_chain.join("\n  ")
            )
        }
    }
}
