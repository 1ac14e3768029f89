//! Weft AOP - 面向切面编程运行时
//!
//! 提供类似 Spring 的 AOP 功能，支持：
//! - 声明式切面定义（方法元数据 + 切点表达式）
//! - 多种通知类型（Before、After、Around、AfterReturning、AfterThrowing）
//! - 通配符切点表达式，注册时编译一次
//! - 方法代理与类代理：无命中时零开销直通原始方法
//! - 跨异步续体传播的每调用环境上下文（连接点、调用栈、元数据）

pub mod advice;
pub mod aspect;
pub mod context;
pub mod error;
pub mod error_info;
pub mod joinpoint;
pub mod pointcut;
pub mod proxy;
pub mod proxy_factory;
pub mod registry;
pub mod types;

// 重新导出核心类型
pub use advice::{AdviceFn, AdviceKind};
pub use aspect::{
    Aspect, AspectMethod, AspectRegistration, AdviceBinding, ExceptionHandlingAspect,
    LoggingAspect, PerformanceAspect,
};
pub use context::{AspectContext, ContextUpdate};
pub use error::{AopError, Result};
pub use error_info::ErrorInfo;
pub use joinpoint::{JoinPoint, JoinPointMetadata, ProceedingJoinPoint};
pub use pointcut::{NamePattern, Pointcut, PointcutExpression};
pub use proxy::MethodProxy;
pub use proxy_factory::{ClassProxy, ClassProxyFactory, InstanceDiscovery};
pub use registry::{get_global_registry, AopOptions, AspectRegistry};
pub use types::{Interceptable, MethodFn, MethodResult};

// 导出 inventory 供切面自动注册使用
pub use inventory;

use std::sync::Arc;

/// 一次性初始化入口
///
/// 手动注册选项里的切面（按名称幂等），并在启用时对发现到的
/// 容器实例执行自动代理。返回生成的类代理列表。
pub fn initialize(
    options: AopOptions,
    discovery: Option<&dyn InstanceDiscovery>,
) -> Vec<Arc<ClassProxy>> {
    let registry = get_global_registry();
    registry.register_aspects_manually(options.aspects);

    if options.enable_auto_discovery {
        if let Some(discovery) = discovery {
            return ClassProxyFactory::with_global_registry().auto_discover(discovery);
        }
        tracing::warn!("Auto discovery enabled but no discovery provider supplied");
    }

    Vec::new()
}

/// 预导入模块
pub mod prelude {
    pub use crate::advice::{AdviceFn, AdviceKind};
    pub use crate::aspect::{Aspect, AspectMethod, AspectRegistration};
    pub use crate::context::{self, AspectContext};
    pub use crate::error_info::ErrorInfo;
    pub use crate::joinpoint::{JoinPoint, JoinPointMetadata, ProceedingJoinPoint};
    pub use crate::pointcut::{Pointcut, PointcutExpression};
    pub use crate::proxy::MethodProxy;
    pub use crate::proxy_factory::{ClassProxy, ClassProxyFactory, InstanceDiscovery};
    pub use crate::registry::{get_global_registry, AopOptions, AspectRegistry};
    pub use crate::types::{Interceptable, MethodFn, MethodResult};
}
