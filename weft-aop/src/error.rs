//! 统一的错误处理类型
//!
//! 使用 anyhow::Result 作为框架的统一错误类型。
//! 通知和原始方法抛出的错误原样传播给调用方，不改变类型和内容。

use thiserror::Error;

pub use anyhow::Result;

/// AOP 运行时自身的错误
#[derive(Debug, Error)]
pub enum AopError {
    /// 类代理上不存在的方法
    #[error("unknown method '{method}' on class '{class}'")]
    UnknownMethod { class: String, method: String },
}
