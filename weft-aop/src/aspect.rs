//! 切面（Aspect）定义
//!
//! 切面是横切关注点的模块化：若干切点定义方法加若干通知方法。
//! 装饰器语法不在本 crate 范围内，这里只定义装饰器会产出的元数据
//! （方法名 → 通知类型与切点引用的映射）以及切面的反射/调用契约。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::advice::AdviceKind;
use crate::error_info::ErrorInfo;
use crate::joinpoint::{JoinPoint, ProceedingJoinPoint};
use crate::types::MethodResult;

/// 一条通知绑定：方法以某种通知类型挂到某个切点上
#[derive(Debug, Clone)]
pub struct AdviceBinding {
    /// 通知类型
    pub kind: AdviceKind,

    /// 引用的切点名称（"<切面名>.<方法名>"）
    ///
    /// 允许悬空：引用的切点不存在时该通知永远不会被执行，不报错。
    pub pointcut_ref: String,
}

/// 切面方法携带的元数据
///
/// 一个方法可以定义一个切点，也可以以多种通知类型分别注册（全部生效）。
#[derive(Debug, Clone, Default)]
pub struct AspectMethod {
    /// 方法名称
    pub name: String,

    /// 此方法定义的切点表达式
    pub pointcut: Option<String>,

    /// 此方法的通知绑定
    pub bindings: Vec<AdviceBinding>,
}

impl AspectMethod {
    /// 创建新的方法元数据
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// 声明此方法定义一个切点
    pub fn pointcut(mut self, expression: impl Into<String>) -> Self {
        self.pointcut = Some(expression.into());
        self
    }

    /// 以前置通知挂到切点
    pub fn before(self, pointcut_ref: impl Into<String>) -> Self {
        self.bind(AdviceKind::Before, pointcut_ref)
    }

    /// 以后置通知挂到切点
    pub fn after(self, pointcut_ref: impl Into<String>) -> Self {
        self.bind(AdviceKind::After, pointcut_ref)
    }

    /// 以返回后通知挂到切点
    pub fn after_returning(self, pointcut_ref: impl Into<String>) -> Self {
        self.bind(AdviceKind::AfterReturning, pointcut_ref)
    }

    /// 以异常通知挂到切点
    pub fn after_throwing(self, pointcut_ref: impl Into<String>) -> Self {
        self.bind(AdviceKind::AfterThrowing, pointcut_ref)
    }

    /// 以环绕通知挂到切点
    pub fn around(self, pointcut_ref: impl Into<String>) -> Self {
        self.bind(AdviceKind::Around, pointcut_ref)
    }

    fn bind(mut self, kind: AdviceKind, pointcut_ref: impl Into<String>) -> Self {
        self.bindings.push(AdviceBinding {
            kind,
            pointcut_ref: pointcut_ref.into(),
        });
        self
    }
}

/// 切面 Trait
///
/// 实现此 trait 以定义切面逻辑。methods() 是反射面，报告每个方法
/// 的元数据；各 invoke 方法按方法名分发到具体的通知实现，未被
/// 引用的通知类型保持默认实现即可。
#[async_trait]
pub trait Aspect: Send + Sync {
    /// 切面名称
    fn name(&self) -> &str;

    /// 切面方法及其元数据
    fn methods(&self) -> Vec<AspectMethod>;

    /// 前置通知（按方法名分发，可选实现）
    async fn before(&self, _method: &str, _join_point: &JoinPoint) -> anyhow::Result<()> {
        Ok(())
    }

    /// 后置通知（可选实现）
    async fn after(&self, _method: &str, _join_point: &JoinPoint) -> anyhow::Result<()> {
        Ok(())
    }

    /// 返回后通知（可选实现），result 只读
    async fn after_returning(
        &self,
        _method: &str,
        _join_point: &JoinPoint,
        _result: &Value,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// 异常通知（可选实现），接收错误快照
    async fn after_throwing(
        &self,
        _method: &str,
        _join_point: &JoinPoint,
        _error: &ErrorInfo,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// 环绕通知（可选实现），默认直接 proceed
    async fn around(&self, _method: &str, pjp: ProceedingJoinPoint) -> MethodResult {
        pjp.proceed(None).await
    }
}

/// 切面注册器
///
/// 用于 inventory 自动收集和注册切面
pub struct AspectRegistration {
    /// 切面名称
    pub name: &'static str,

    /// 创建切面实例的函数
    pub creator: fn() -> Arc<dyn Aspect>,
}

impl AspectRegistration {
    /// 创建新的切面注册器
    pub const fn new(name: &'static str, creator: fn() -> Arc<dyn Aspect>) -> Self {
        Self { name, creator }
    }

    /// 创建切面实例
    pub fn create_instance(&self) -> Arc<dyn Aspect> {
        (self.creator)()
    }
}

// 使用 inventory 收集所有切面注册器
inventory::collect!(AspectRegistration);

/// 获取所有注册的切面注册器
pub fn get_all_aspect_registrations() -> Vec<&'static AspectRegistration> {
    inventory::iter::<AspectRegistration>.into_iter().collect()
}

// ============================================================================
// 预定义的常用切面
// ============================================================================

/// 日志切面 - 记录方法调用
pub struct LoggingAspect {
    pointcut_expr: String,
    log_args: bool,
    log_result: bool,
}

impl LoggingAspect {
    pub fn new(pointcut_expr: impl Into<String>) -> Self {
        Self {
            pointcut_expr: pointcut_expr.into(),
            log_args: false,
            log_result: false,
        }
    }

    pub fn with_args(mut self) -> Self {
        self.log_args = true;
        self
    }

    pub fn with_result(mut self) -> Self {
        self.log_result = true;
        self
    }
}

#[async_trait]
impl Aspect for LoggingAspect {
    fn name(&self) -> &str {
        "LoggingAspect"
    }

    fn methods(&self) -> Vec<AspectMethod> {
        vec![
            AspectMethod::new("loggable_methods").pointcut(self.pointcut_expr.as_str()),
            AspectMethod::new("log_before").before("LoggingAspect.loggable_methods"),
            AspectMethod::new("log_after").after("LoggingAspect.loggable_methods"),
            AspectMethod::new("log_after_returning")
                .after_returning("LoggingAspect.loggable_methods"),
            AspectMethod::new("log_after_throwing")
                .after_throwing("LoggingAspect.loggable_methods"),
        ]
    }

    async fn before(&self, _method: &str, join_point: &JoinPoint) -> anyhow::Result<()> {
        if self.log_args {
            tracing::info!(
                "→ Entering: {} args: {:?}",
                join_point.signature(),
                join_point.get_args()
            );
        } else {
            tracing::info!("→ Entering: {}", join_point.signature());
        }
        Ok(())
    }

    async fn after(&self, _method: &str, join_point: &JoinPoint) -> anyhow::Result<()> {
        let elapsed = join_point.get_timestamp().elapsed();
        tracing::info!("← Exiting: {} (took {:?})", join_point.signature(), elapsed);
        Ok(())
    }

    async fn after_returning(
        &self,
        _method: &str,
        join_point: &JoinPoint,
        result: &Value,
    ) -> anyhow::Result<()> {
        if self.log_result {
            tracing::info!("Result of {}: {}", join_point.signature(), result);
        }
        Ok(())
    }

    async fn after_throwing(
        &self,
        _method: &str,
        join_point: &JoinPoint,
        error: &ErrorInfo,
    ) -> anyhow::Result<()> {
        tracing::error!("Exception in {}: {}", join_point.signature(), error.message);
        Ok(())
    }
}

/// 性能监控切面
pub struct PerformanceAspect {
    threshold_ms: u128,
    pointcut_expr: String,
}

impl PerformanceAspect {
    pub fn new(threshold_ms: u128, pointcut_expr: impl Into<String>) -> Self {
        Self {
            threshold_ms,
            pointcut_expr: pointcut_expr.into(),
        }
    }
}

#[async_trait]
impl Aspect for PerformanceAspect {
    fn name(&self) -> &str {
        "PerformanceAspect"
    }

    fn methods(&self) -> Vec<AspectMethod> {
        vec![
            AspectMethod::new("monitored_methods").pointcut(self.pointcut_expr.as_str()),
            AspectMethod::new("check_elapsed").after("PerformanceAspect.monitored_methods"),
        ]
    }

    async fn after(&self, _method: &str, join_point: &JoinPoint) -> anyhow::Result<()> {
        let elapsed = join_point.get_timestamp().elapsed().as_millis();
        if elapsed > self.threshold_ms {
            tracing::warn!(
                "⚠️ Slow method detected: {} took {}ms (threshold: {}ms)",
                join_point.signature(),
                elapsed,
                self.threshold_ms
            );
        }
        Ok(())
    }
}

/// 异常处理切面
pub struct ExceptionHandlingAspect {
    pointcut_expr: String,
}

impl ExceptionHandlingAspect {
    pub fn new(pointcut_expr: impl Into<String>) -> Self {
        Self {
            pointcut_expr: pointcut_expr.into(),
        }
    }
}

#[async_trait]
impl Aspect for ExceptionHandlingAspect {
    fn name(&self) -> &str {
        "ExceptionHandlingAspect"
    }

    fn methods(&self) -> Vec<AspectMethod> {
        vec![
            AspectMethod::new("guarded_methods").pointcut(self.pointcut_expr.as_str()),
            AspectMethod::new("report_exception")
                .after_throwing("ExceptionHandlingAspect.guarded_methods"),
        ]
    }

    async fn after_throwing(
        &self,
        _method: &str,
        join_point: &JoinPoint,
        error: &ErrorInfo,
    ) -> anyhow::Result<()> {
        tracing::error!(
            "❌ Exception in {}: {}",
            join_point.signature(),
            error.full_description()
        );
        Ok(())
    }
}
