//! 动态调用表面的基础类型
//!
//! 代理与通知之间传递的参数和返回值统一使用 `serde_json::Value`

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

/// 方法调用的动态结果
pub type MethodResult = anyhow::Result<Value>;

/// 可调用的方法包装
///
/// 拦截的最小单元：一个接受动态参数、异步返回动态结果的闭包。
/// 原始方法和代理方法都以这个形式存在。
pub type MethodFn = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, MethodResult> + Send + Sync>;

/// 可拦截契约
///
/// 目标类型通过实现此 trait 声明自己可以被代理：
/// 报告类名、枚举方法名、按名称调用方法。
/// 这是对运行时反射的静态替代，代理工厂只依赖这个契约。
#[async_trait]
pub trait Interceptable: Send + Sync {
    /// 声明的类型名称（用于切点匹配）
    fn class_name(&self) -> &str;

    /// 可被代理的方法名列表
    fn method_names(&self) -> Vec<&'static str>;

    /// 按名称调用方法
    async fn invoke(&self, method_name: &str, args: Vec<Value>) -> MethodResult;

    /// 用于类型自省的向下转型入口
    fn as_any(&self) -> &dyn Any;
}
