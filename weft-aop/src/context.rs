//! 环境调用上下文
//!
//! 每棵逻辑调用树持有一个 AspectContext，通过 task-local 存储
//! 跨异步续体隐式传播：最外层代理调用创建并作用域化上下文，
//! 嵌套的代理调用复用同一个实例，最外层调用结束后上下文被丢弃。

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::joinpoint::JoinPoint;

tokio::task_local! {
    /// 当前逻辑调用树的上下文
    static CURRENT_CONTEXT: Arc<AspectContext>;
}

/// 一棵逻辑调用树的环境状态
///
/// 内部可变：同一棵调用树内的嵌套代理调用共享并更新同一个实例。
/// 锁只做短暂的读写，从不跨越 await 点。
#[derive(Default)]
pub struct AspectContext {
    /// 当前连接点
    join_point: RwLock<Option<Arc<JoinPoint>>>,

    /// 任意元数据
    metadata: RwLock<HashMap<String, Value>>,

    /// 调用栈，帧格式 "<类名>.<方法名>"
    call_stack: RwLock<Vec<String>>,
}

impl AspectContext {
    /// 创建新的上下文
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 获取当前连接点
    pub fn join_point(&self) -> Option<Arc<JoinPoint>> {
        self.join_point.read().clone()
    }

    /// 设置当前连接点
    pub fn set_join_point(&self, join_point: Arc<JoinPoint>) {
        *self.join_point.write() = Some(join_point);
    }

    /// 读取一项元数据
    pub fn get_metadata(&self, key: &str) -> Option<Value> {
        self.metadata.read().get(key).cloned()
    }

    /// 写入一项元数据
    pub fn set_metadata(&self, key: impl Into<String>, value: Value) {
        self.metadata.write().insert(key.into(), value);
    }

    /// 获取调用栈快照
    pub fn call_stack(&self) -> Vec<String> {
        self.call_stack.read().clone()
    }

    /// 获取调用栈深度
    pub fn call_depth(&self) -> usize {
        self.call_stack.read().len()
    }

    /// 压入一个调用栈帧
    pub fn push_frame(&self, frame: impl Into<String>) {
        self.call_stack.write().push(frame.into());
    }

    /// 弹出最近的调用栈帧
    pub fn pop_frame(&self) -> Option<String> {
        self.call_stack.write().pop()
    }
}

impl fmt::Debug for AspectContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AspectContext")
            .field("join_point", &self.join_point.read())
            .field("call_stack", &self.call_stack.read())
            .finish()
    }
}

/// 获取当前环境上下文
///
/// 在任何代理调用作用域之外返回 None。
pub fn get_context() -> Option<Arc<AspectContext>> {
    CURRENT_CONTEXT.try_with(Arc::clone).ok()
}

/// 在指定上下文的作用域内运行 future
///
/// 作用域内（包括所有异步续体中）的 get_context 都能看到该上下文；
/// future 完成后作用域随之结束。
pub async fn run<F: Future>(context: Arc<AspectContext>, future: F) -> F::Output {
    CURRENT_CONTEXT.scope(context, future).await
}

/// 上下文的部分更新
#[derive(Default)]
pub struct ContextUpdate {
    /// 新的当前连接点
    pub join_point: Option<Arc<JoinPoint>>,

    /// 合并进上下文的元数据
    pub metadata: Option<HashMap<String, Value>>,
}

/// 更新当前上下文
///
/// 没有活动上下文时为空操作。
pub fn update_context(update: ContextUpdate) {
    let Some(context) = get_context() else {
        return;
    };
    if let Some(join_point) = update.join_point {
        context.set_join_point(join_point);
    }
    if let Some(metadata) = update.metadata {
        let mut current = context.metadata.write();
        current.extend(metadata);
    }
}

/// 向当前上下文的调用栈压入一帧
pub fn add_to_call_stack(frame: impl Into<String>) {
    if let Some(context) = get_context() {
        context.push_frame(frame);
    }
}

/// 从当前上下文的调用栈弹出最近一帧
pub fn remove_from_call_stack() -> Option<String> {
    get_context().and_then(|context| context.pop_frame())
}

/// 获取当前上下文的连接点
pub fn current_join_point() -> Option<Arc<JoinPoint>> {
    get_context().and_then(|context| context.join_point())
}
