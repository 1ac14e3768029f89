//! 连接点（JoinPoint）定义
//!
//! 连接点表示程序执行的特定点，比如方法调用

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use crate::types::{Interceptable, MethodFn, MethodResult};

/// 连接点的描述性元数据
#[derive(Debug, Clone)]
pub struct JoinPointMetadata {
    /// 目标类型名称
    pub class_name: String,

    /// 返回类型名称（如果已知）
    pub return_type: Option<String>,

    /// 参数类型名称（如果已知）
    pub param_types: Option<Vec<String>>,

    /// 其他任意元数据
    pub extra: HashMap<String, Value>,
}

impl JoinPointMetadata {
    /// 创建只包含类名的元数据
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            return_type: None,
            param_types: None,
            extra: HashMap::new(),
        }
    }
}

/// 连接点信息
///
/// 包含方法调用时的上下文信息。每次调用构造一次，之后不再变化。
pub struct JoinPoint {
    /// 目标实例
    target: Arc<dyn Interceptable>,

    /// 方法名称
    method_name: String,

    /// 方法参数
    args: Vec<Value>,

    /// 元数据
    metadata: JoinPointMetadata,

    /// 调用时间戳
    timestamp: Instant,
}

impl JoinPoint {
    /// 创建新的连接点
    pub fn new(
        target: Arc<dyn Interceptable>,
        method_name: impl Into<String>,
        args: Vec<Value>,
        metadata: JoinPointMetadata,
    ) -> Self {
        Self {
            target,
            method_name: method_name.into(),
            args,
            metadata,
            timestamp: Instant::now(),
        }
    }

    /// 获取目标实例
    pub fn get_target(&self) -> &Arc<dyn Interceptable> {
        &self.target
    }

    /// 获取目标实例（get_target 的别名）
    pub fn get_this(&self) -> &Arc<dyn Interceptable> {
        &self.target
    }

    /// 获取方法参数
    pub fn get_args(&self) -> &[Value] {
        &self.args
    }

    /// 获取方法名称
    pub fn get_method_name(&self) -> &str {
        &self.method_name
    }

    /// 获取目标类型名称
    pub fn class_name(&self) -> &str {
        &self.metadata.class_name
    }

    /// 获取元数据
    pub fn metadata(&self) -> &JoinPointMetadata {
        &self.metadata
    }

    /// 获取调用时间戳
    pub fn get_timestamp(&self) -> &Instant {
        &self.timestamp
    }

    /// 获取完整的方法签名
    pub fn signature(&self) -> String {
        format!("{}.{}", self.metadata.class_name, self.method_name)
    }
}

impl fmt::Debug for JoinPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinPoint")
            .field("signature", &self.signature())
            .field("args", &self.args)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

impl fmt::Display for JoinPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.signature())
    }
}

/// 环绕通知的执行链
///
/// 允许切面控制是否继续向内执行。proceed 可以不调用（跳过内层和原始方法）、
/// 调用一次，或调用多次（每次独立执行内层）。
#[derive(Clone)]
pub struct ProceedingJoinPoint {
    /// 连接点信息
    join_point: Arc<JoinPoint>,

    /// 内层执行函数（最内层为原始方法）
    proceed_fn: MethodFn,
}

impl ProceedingJoinPoint {
    /// 创建新的环绕连接点
    pub fn new(join_point: Arc<JoinPoint>, proceed_fn: MethodFn) -> Self {
        Self {
            join_point,
            proceed_fn,
        }
    }

    /// 继续向内执行
    ///
    /// 给定 args_override 时用它调用内层，否则使用连接点的原始参数。
    pub async fn proceed(&self, args_override: Option<Vec<Value>>) -> MethodResult {
        let args = args_override.unwrap_or_else(|| self.join_point.get_args().to_vec());
        (self.proceed_fn)(args).await
    }

    /// 获取连接点信息
    pub fn join_point(&self) -> &Arc<JoinPoint> {
        &self.join_point
    }

    /// 获取完整的方法签名
    pub fn signature(&self) -> String {
        self.join_point.signature()
    }
}

impl fmt::Debug for ProceedingJoinPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProceedingJoinPoint")
            .field("join_point", &self.join_point)
            .finish()
    }
}
