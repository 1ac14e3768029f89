//! 切面注册表
//!
//! 三张表：按名称的切面实例、按注册顺序的切点、按 (通知类型, 切点引用)
//! 的已绑定通知列表。发现阶段填充，分发路径只读。

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::advice::{AdviceFn, AdviceKind};
use crate::aspect::Aspect;
use crate::pointcut::Pointcut;

/// 全局 AOP 注册表
///
/// 首次访问时自动初始化，加载所有通过 inventory 注册的切面
static GLOBAL_ASPECT_REGISTRY: Lazy<Arc<AspectRegistry>> = Lazy::new(|| {
    let registry = AspectRegistry::new();
    registry.auto_load_aspects();
    Arc::new(registry)
});

/// 获取全局 AOP 注册表
pub fn get_global_registry() -> &'static Arc<AspectRegistry> {
    &GLOBAL_ASPECT_REGISTRY
}

/// 切面注册表
///
/// 管理所有注册的切面、切点和已绑定的通知
pub struct AspectRegistry {
    /// 切面实例，按名称
    aspects: RwLock<HashMap<String, Arc<dyn Aspect>>>,

    /// 切点，保持注册顺序（匹配遍历按此顺序进行）
    pointcuts: RwLock<Vec<Pointcut>>,

    /// 通知类型 → 切点引用 → 按注册顺序的通知列表
    advices: RwLock<HashMap<AdviceKind, HashMap<String, Vec<AdviceFn>>>>,
}

impl AspectRegistry {
    /// 创建新的切面注册表
    pub fn new() -> Self {
        Self {
            aspects: RwLock::new(HashMap::new()),
            pointcuts: RwLock::new(Vec::new()),
            advices: RwLock::new(HashMap::new()),
        }
    }

    /// 注册切面
    ///
    /// 同名切面重复注册是空操作。元数据不完整的通知绑定被静默跳过。
    /// 注册过程从不报错。
    pub fn register_aspect(&self, aspect: Arc<dyn Aspect>) {
        let aspect_name = aspect.name().to_string();

        {
            let mut aspects = self.aspects.write();
            if aspects.contains_key(&aspect_name) {
                tracing::debug!("Aspect '{}' already registered, skipping", aspect_name);
                return;
            }
            aspects.insert(aspect_name.clone(), Arc::clone(&aspect));
        }

        tracing::debug!("Registering aspect: {}", aspect_name);

        for method in aspect.methods() {
            // 切点定义
            if let Some(expression) = &method.pointcut {
                let pointcut_name = format!("{}.{}", aspect_name, method.name);
                tracing::debug!(
                    "Registering pointcut: {}, expression: {}",
                    pointcut_name,
                    expression
                );

                let mut pointcuts = self.pointcuts.write();
                if !pointcuts.iter().any(|p| p.name == pointcut_name) {
                    pointcuts.push(Pointcut::new(pointcut_name, expression.as_str()));
                }
            }

            // 通知绑定
            for binding in &method.bindings {
                if binding.pointcut_ref.is_empty() {
                    tracing::debug!(
                        "Skipping advice '{}.{}' with empty pointcut reference",
                        aspect_name,
                        method.name
                    );
                    continue;
                }

                tracing::debug!(
                    "Registering {} advice: {}.{} -> {}",
                    binding.kind,
                    aspect_name,
                    method.name,
                    binding.pointcut_ref
                );

                let advice = Self::bind_advice(&aspect, &method.name, binding.kind);
                self.advices
                    .write()
                    .entry(binding.kind)
                    .or_default()
                    .entry(binding.pointcut_ref.clone())
                    .or_default()
                    .push(advice);
            }
        }
    }

    /// 批量手动注册切面（逐个按名称幂等）
    pub fn register_aspects_manually(&self, aspects: impl IntoIterator<Item = Arc<dyn Aspect>>) {
        tracing::debug!("Manual registration of aspects...");
        for aspect in aspects {
            self.register_aspect(aspect);
        }
        tracing::debug!(
            "Total registered pointcuts after manual registration: {}",
            self.pointcut_count()
        );
    }

    /// 将切面方法绑定为指定类型的通知闭包
    ///
    /// 等价于把实例方法 bind 到实例上：闭包持有切面实例和方法名，
    /// 调用时按名称分发。
    fn bind_advice(aspect: &Arc<dyn Aspect>, method: &str, kind: AdviceKind) -> AdviceFn {
        let aspect = Arc::clone(aspect);
        let method = method.to_string();

        match kind {
            AdviceKind::Before => AdviceFn::Before(Arc::new(move |join_point| {
                let aspect = Arc::clone(&aspect);
                let method = method.clone();
                Box::pin(async move { aspect.before(&method, &join_point).await })
            })),
            AdviceKind::After => AdviceFn::After(Arc::new(move |join_point| {
                let aspect = Arc::clone(&aspect);
                let method = method.clone();
                Box::pin(async move { aspect.after(&method, &join_point).await })
            })),
            AdviceKind::AfterReturning => AdviceFn::AfterReturning(Arc::new(
                move |join_point, result| {
                    let aspect = Arc::clone(&aspect);
                    let method = method.clone();
                    Box::pin(async move {
                        aspect.after_returning(&method, &join_point, &result).await
                    })
                },
            )),
            AdviceKind::AfterThrowing => AdviceFn::AfterThrowing(Arc::new(
                move |join_point, error| {
                    let aspect = Arc::clone(&aspect);
                    let method = method.clone();
                    Box::pin(async move {
                        aspect.after_throwing(&method, &join_point, &error).await
                    })
                },
            )),
            AdviceKind::Around => AdviceFn::Around(Arc::new(move |pjp| {
                let aspect = Arc::clone(&aspect);
                let method = method.clone();
                Box::pin(async move { aspect.around(&method, pjp).await })
            })),
        }
    }

    /// 获取指定类型和切点引用下的通知列表
    ///
    /// 不存在时返回空列表，从不报错。
    pub fn get_advices(&self, kind: AdviceKind, pointcut_ref: &str) -> Vec<AdviceFn> {
        self.advices
            .read()
            .get(&kind)
            .and_then(|by_ref| by_ref.get(pointcut_ref))
            .cloned()
            .unwrap_or_default()
    }

    /// 按名称查找切点
    pub fn get_pointcut(&self, name: &str) -> Option<Pointcut> {
        self.pointcuts.read().iter().find(|p| p.name == name).cloned()
    }

    /// 获取全部切点（注册顺序的只读快照）
    pub fn get_pointcuts(&self) -> Vec<Pointcut> {
        self.pointcuts.read().clone()
    }

    /// 获取注册的切面数量
    pub fn len(&self) -> usize {
        self.aspects.read().len()
    }

    /// 检查是否没有注册任何切面
    pub fn is_empty(&self) -> bool {
        self.aspects.read().is_empty()
    }

    /// 获取注册的切点数量
    pub fn pointcut_count(&self) -> usize {
        self.pointcuts.read().len()
    }

    /// 清除所有切面、切点和通知
    pub fn clear(&self) {
        self.aspects.write().clear();
        self.pointcuts.write().clear();
        self.advices.write().clear();
    }

    /// 从 inventory 自动加载所有注册的切面
    pub fn auto_load_aspects(&self) {
        let registrations = crate::aspect::get_all_aspect_registrations();
        tracing::info!("Auto-loading {} aspect(s) from registry", registrations.len());

        for registration in registrations {
            tracing::debug!("  ├─ Loading aspect: {}", registration.name);
            self.register_aspect(registration.create_instance());
        }

        tracing::info!("Auto-loaded {} aspect(s)", self.len());
    }
}

impl Default for AspectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// AOP 启动选项
#[derive(Default)]
pub struct AopOptions {
    /// 手动注册的切面
    pub aspects: Vec<Arc<dyn Aspect>>,

    /// 是否启用自动发现（对容器实例批量代理）
    pub enable_auto_discovery: bool,
}

impl AopOptions {
    /// 创建默认选项
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加一个切面
    pub fn aspect(mut self, aspect: Arc<dyn Aspect>) -> Self {
        self.aspects.push(aspect);
        self
    }

    /// 启用自动发现
    pub fn enable_auto_discovery(mut self) -> Self {
        self.enable_auto_discovery = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aspect::AspectMethod;
    use async_trait::async_trait;

    struct CountingAspect;

    #[async_trait]
    impl Aspect for CountingAspect {
        fn name(&self) -> &str {
            "CountingAspect"
        }

        fn methods(&self) -> Vec<AspectMethod> {
            vec![
                AspectMethod::new("user_methods").pointcut("execution(* UserService.*(..))"),
                AspectMethod::new("count_before").before("CountingAspect.user_methods"),
                AspectMethod::new("count_both")
                    .before("CountingAspect.user_methods")
                    .after("CountingAspect.user_methods"),
            ]
        }
    }

    struct MalformedAspect;

    #[async_trait]
    impl Aspect for MalformedAspect {
        fn name(&self) -> &str {
            "MalformedAspect"
        }

        fn methods(&self) -> Vec<AspectMethod> {
            vec![
                // 空的切点引用：应当被静默跳过
                AspectMethod::new("broken").before(""),
                AspectMethod::new("dangling").after("Nowhere.missing"),
            ]
        }
    }

    #[test]
    fn test_register_aspect() {
        let registry = AspectRegistry::new();
        registry.register_aspect(Arc::new(CountingAspect));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.pointcut_count(), 1);
        assert!(registry.get_pointcut("CountingAspect.user_methods").is_some());
        assert!(registry.get_pointcut("CountingAspect.other").is_none());

        // count_before + count_both 的前置绑定
        assert_eq!(
            registry
                .get_advices(AdviceKind::Before, "CountingAspect.user_methods")
                .len(),
            2
        );
        assert_eq!(
            registry
                .get_advices(AdviceKind::After, "CountingAspect.user_methods")
                .len(),
            1
        );
    }

    #[test]
    fn test_register_is_idempotent_per_name() {
        let registry = AspectRegistry::new();
        registry.register_aspect(Arc::new(CountingAspect));
        registry.register_aspect(Arc::new(CountingAspect));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.pointcut_count(), 1);
        assert_eq!(
            registry
                .get_advices(AdviceKind::Before, "CountingAspect.user_methods")
                .len(),
            2
        );
    }

    #[test]
    fn test_get_advices_absent_is_empty() {
        let registry = AspectRegistry::new();
        assert!(registry
            .get_advices(AdviceKind::Before, "Nobody.nothing")
            .is_empty());
    }

    #[test]
    fn test_malformed_metadata_skipped_silently() {
        let registry = AspectRegistry::new();
        registry.register_aspect(Arc::new(MalformedAspect));

        // 空引用被跳过，悬空引用照常登记（分发时不会被查到）
        assert_eq!(registry.get_advices(AdviceKind::Before, "").len(), 0);
        assert_eq!(
            registry.get_advices(AdviceKind::After, "Nowhere.missing").len(),
            1
        );
    }

    #[test]
    fn test_manual_registration() {
        let registry = AspectRegistry::new();
        registry.register_aspects_manually(vec![
            Arc::new(CountingAspect) as Arc<dyn Aspect>,
            Arc::new(MalformedAspect) as Arc<dyn Aspect>,
            Arc::new(CountingAspect) as Arc<dyn Aspect>,
        ]);

        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_clear() {
        let registry = AspectRegistry::new();
        registry.register_aspect(Arc::new(CountingAspect));
        registry.clear();

        assert!(registry.is_empty());
        assert_eq!(registry.pointcut_count(), 0);
        assert!(registry
            .get_advices(AdviceKind::Before, "CountingAspect.user_methods")
            .is_empty());
    }

    #[test]
    fn test_global_registry_is_shared() {
        let first = get_global_registry();
        let second = get_global_registry();
        assert!(Arc::ptr_eq(first, second));
    }

    #[test]
    fn test_aop_options_builder() {
        let options = AopOptions::new()
            .aspect(Arc::new(CountingAspect))
            .enable_auto_discovery();

        assert_eq!(options.aspects.len(), 1);
        assert!(options.enable_auto_discovery);
    }
}
