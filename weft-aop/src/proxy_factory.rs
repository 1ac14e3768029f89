//! 类代理工厂
//!
//! 把一个 Interceptable 实例的全部方法替换为方法代理包装。
//! 没有运行时反射，代理工厂只依赖 Interceptable 契约：
//! 目标类型自行枚举方法名并提供按名调用能力。

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::AopError;
use crate::proxy::MethodProxy;
use crate::registry::{get_global_registry, AspectRegistry};
use crate::types::{Interceptable, MethodFn, MethodResult};

/// 外部容器提供的实例发现能力
///
/// 启动时调用一次，枚举已注册的实例及其声明类型名。
pub trait InstanceDiscovery: Send + Sync {
    fn list_instances(&self) -> Vec<(String, Arc<dyn Interceptable>)>;
}

/// 类代理
///
/// 持有原始实例和逐方法的代理包装。对外仍然是同一个实例：
/// 类名、方法列表来自原始实例，as_any 直接暴露原始实例，
/// 因此向下转型到原始类型依旧成立。
pub struct ClassProxy {
    /// 原始实例
    inner: Arc<dyn Interceptable>,

    /// 方法名 → 代理包装
    methods: HashMap<String, MethodFn>,
}

impl ClassProxy {
    /// 通过代理调用方法
    pub async fn call(&self, method_name: &str, args: Vec<Value>) -> MethodResult {
        match self.methods.get(method_name) {
            Some(proxied) => proxied(args).await,
            None => Err(AopError::UnknownMethod {
                class: self.inner.class_name().to_string(),
                method: method_name.to_string(),
            }
            .into()),
        }
    }

    /// 获取原始实例
    pub fn target(&self) -> &Arc<dyn Interceptable> {
        &self.inner
    }
}

#[async_trait]
impl Interceptable for ClassProxy {
    fn class_name(&self) -> &str {
        self.inner.class_name()
    }

    fn method_names(&self) -> Vec<&'static str> {
        self.inner.method_names()
    }

    async fn invoke(&self, method_name: &str, args: Vec<Value>) -> MethodResult {
        self.call(method_name, args).await
    }

    fn as_any(&self) -> &dyn Any {
        // 保持类型身份：自省穿透到原始实例
        self.inner.as_any()
    }
}

/// 类代理工厂
pub struct ClassProxyFactory {
    registry: Arc<AspectRegistry>,
    method_proxy: MethodProxy,
}

impl ClassProxyFactory {
    /// 基于指定注册表创建工厂
    pub fn new(registry: Arc<AspectRegistry>) -> Self {
        Self {
            method_proxy: MethodProxy::new(Arc::clone(&registry)),
            registry,
        }
    }

    /// 基于全局注册表创建工厂
    pub fn with_global_registry() -> Self {
        Self::new(Arc::clone(get_global_registry()))
    }

    /// 构造实例并包装其全部方法
    pub fn create_proxy<T, F>(&self, constructor: F) -> Arc<ClassProxy>
    where
        T: Interceptable + 'static,
        F: FnOnce() -> T,
    {
        let instance: Arc<dyn Interceptable> = Arc::new(constructor());
        self.proxy_instance(instance)
    }

    /// 包装一个已构造实例的全部方法
    pub fn proxy_instance(&self, instance: Arc<dyn Interceptable>) -> Arc<ClassProxy> {
        let class_name = instance.class_name().to_string();
        tracing::debug!("Creating class proxy for {}", class_name);

        let mut methods = HashMap::new();
        for method_name in instance.method_names() {
            let original: MethodFn = {
                let target = Arc::clone(&instance);
                let method = method_name.to_string();
                Arc::new(move |args| {
                    let target = Arc::clone(&target);
                    let method = method.clone();
                    Box::pin(async move { target.invoke(&method, args).await })
                })
            };

            let proxied =
                self.method_proxy
                    .create_proxy(Arc::clone(&instance), method_name, original);
            methods.insert(method_name.to_string(), proxied);
        }

        tracing::debug!("Proxied {} method(s) of {}", methods.len(), class_name);

        Arc::new(ClassProxy {
            inner: instance,
            methods,
        })
    }

    /// 自动发现：对容器实例批量代理
    ///
    /// 只有至少命中一个已注册切点的实例才会被代理。
    pub fn auto_discover(&self, discovery: &dyn InstanceDiscovery) -> Vec<Arc<ClassProxy>> {
        let instances = discovery.list_instances();
        tracing::info!("Found {} instance(s) to check for proxying", instances.len());

        let mut proxies = Vec::new();
        for (type_name, instance) in instances {
            if self.should_proxy(&type_name, &instance.method_names()) {
                tracing::debug!(
                    "Instance {} matches registered pointcuts, applying proxy",
                    type_name
                );
                proxies.push(self.proxy_instance(instance));
            } else {
                tracing::debug!("Instance {} does not match any pointcut, skipping", type_name);
            }
        }

        tracing::info!("Auto-proxied {} instance(s)", proxies.len());
        proxies
    }

    /// 实例是否需要代理：特例表达式命中，或任一方法命中任一切点
    fn should_proxy(&self, class_name: &str, method_names: &[&'static str]) -> bool {
        for pointcut in self.registry.get_pointcuts() {
            if pointcut.expression == format!("execution(* {}.*(..))", class_name) {
                return true;
            }
            if method_names
                .iter()
                .any(|method| pointcut.matches(class_name, method, &[]))
            {
                return true;
            }
        }
        false
    }
}
