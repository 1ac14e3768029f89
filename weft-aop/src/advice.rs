//! 通知（Advice）定义
//!
//! 定义了在连接点执行的各种动作

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::error_info::ErrorInfo;
use crate::joinpoint::{JoinPoint, ProceedingJoinPoint};
use crate::types::MethodResult;

/// 通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdviceKind {
    /// 前置通知
    Before,
    /// 后置通知（无论成功还是失败都执行）
    After,
    /// 返回后通知（成功返回时执行）
    AfterReturning,
    /// 异常通知（抛出异常时执行）
    AfterThrowing,
    /// 环绕通知（可以控制方法执行）
    Around,
}

impl AdviceKind {
    /// 全部通知类型
    pub const ALL: [AdviceKind; 5] = [
        AdviceKind::Before,
        AdviceKind::After,
        AdviceKind::AfterReturning,
        AdviceKind::AfterThrowing,
        AdviceKind::Around,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AdviceKind::Before => "before",
            AdviceKind::After => "after",
            AdviceKind::AfterReturning => "after_returning",
            AdviceKind::AfterThrowing => "after_throwing",
            AdviceKind::Around => "around",
        }
    }
}

impl fmt::Display for AdviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 前置/后置通知的闭包形式
pub type BeforeFn =
    Arc<dyn Fn(Arc<JoinPoint>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// 后置通知的闭包形式
pub type AfterFn =
    Arc<dyn Fn(Arc<JoinPoint>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// 返回后通知的闭包形式，接收方法返回值（只读，返回值不可替换）
pub type AfterReturningFn =
    Arc<dyn Fn(Arc<JoinPoint>, Value) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// 异常通知的闭包形式，接收错误快照
pub type AfterThrowingFn =
    Arc<dyn Fn(Arc<JoinPoint>, ErrorInfo) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// 环绕通知的闭包形式，负责调用 proceed
pub type AroundFn =
    Arc<dyn Fn(ProceedingJoinPoint) -> BoxFuture<'static, MethodResult> + Send + Sync>;

/// 按通知类型区分签名的已绑定通知
///
/// 注册表按 (类型, 切点引用) 存放这些闭包，注册顺序即执行顺序。
#[derive(Clone)]
pub enum AdviceFn {
    Before(BeforeFn),
    After(AfterFn),
    AfterReturning(AfterReturningFn),
    AfterThrowing(AfterThrowingFn),
    Around(AroundFn),
}

impl AdviceFn {
    /// 获取通知类型
    pub fn kind(&self) -> AdviceKind {
        match self {
            AdviceFn::Before(_) => AdviceKind::Before,
            AdviceFn::After(_) => AdviceKind::After,
            AdviceFn::AfterReturning(_) => AdviceKind::AfterReturning,
            AdviceFn::AfterThrowing(_) => AdviceKind::AfterThrowing,
            AdviceFn::Around(_) => AdviceKind::Around,
        }
    }
}

impl fmt::Debug for AdviceFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AdviceFn::{}", self.kind())
    }
}
