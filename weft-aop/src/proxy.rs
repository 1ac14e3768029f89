//! 方法代理与通知执行管线
//!
//! 将单个方法包装为代理：每次调用时对注册表中的全部切点做惰性匹配，
//! 无命中时零开销直通原始方法，有命中时构建连接点并按固定顺序执行
//! 前置 → 环绕（或原始方法）→ 返回后 → 后置 / 异常 → 后置。

use std::sync::Arc;

use serde_json::Value;

use crate::advice::{AdviceFn, AdviceKind, AroundFn};
use crate::context::{self, AspectContext, ContextUpdate};
use crate::error_info::ErrorInfo;
use crate::joinpoint::{JoinPoint, JoinPointMetadata, ProceedingJoinPoint};
use crate::registry::{get_global_registry, AspectRegistry};
use crate::types::{Interceptable, MethodFn, MethodResult};

/// 方法代理服务
///
/// 持有注册表引用，为任意 (目标, 方法) 生成代理包装。
pub struct MethodProxy {
    registry: Arc<AspectRegistry>,
}

impl MethodProxy {
    /// 基于指定注册表创建代理服务
    pub fn new(registry: Arc<AspectRegistry>) -> Self {
        Self { registry }
    }

    /// 基于全局注册表创建代理服务
    pub fn with_global_registry() -> Self {
        Self::new(Arc::clone(get_global_registry()))
    }

    /// 为单个方法创建代理包装
    ///
    /// 返回的包装方法在每次调用时解析适用切点（惰性求值），
    /// 无命中时直接调用 original 并原样返回结果。
    pub fn create_proxy(
        &self,
        target: Arc<dyn Interceptable>,
        method_name: &str,
        original: MethodFn,
    ) -> MethodFn {
        tracing::debug!(
            "Creating proxy for {}.{}",
            target.class_name(),
            method_name
        );

        let registry = Arc::clone(&self.registry);
        let method_name = method_name.to_string();

        Arc::new(move |args| {
            let registry = Arc::clone(&registry);
            let target = Arc::clone(&target);
            let method_name = method_name.clone();
            let original = Arc::clone(&original);
            Box::pin(dispatch(registry, target, method_name, original, args))
        })
    }
}

/// 确定适用于一次调用的切点名称列表（注册顺序）
fn find_applicable_pointcuts(
    registry: &AspectRegistry,
    class_name: &str,
    method_name: &str,
    annotations: &[String],
) -> Vec<String> {
    let mut applicable = Vec::new();

    for pointcut in registry.get_pointcuts() {
        // 特例："execution(* <类名>.*(..))" 对真实类名直接放行，
        // 保证"类的全部方法"这一常用规则不受通用解析精度影响
        if pointcut.expression == format!("execution(* {}.*(..))", class_name) {
            applicable.push(pointcut.name);
            continue;
        }

        if pointcut.matches(class_name, method_name, annotations) {
            applicable.push(pointcut.name);
        }
    }

    applicable
}

/// 代理方法的每次调用入口
async fn dispatch(
    registry: Arc<AspectRegistry>,
    target: Arc<dyn Interceptable>,
    method_name: String,
    original: MethodFn,
    args: Vec<Value>,
) -> MethodResult {
    let class_name = target.class_name().to_string();
    let applicable = find_applicable_pointcuts(&registry, &class_name, &method_name, &[]);

    // 无适用切点：零开销直通
    if applicable.is_empty() {
        tracing::debug!(
            "No applicable pointcuts for {}.{}, executing original method",
            class_name,
            method_name
        );
        return (original)(args).await;
    }

    tracing::debug!(
        "Found {} applicable pointcut(s) for {}.{}",
        applicable.len(),
        class_name,
        method_name
    );

    let join_point = Arc::new(JoinPoint::new(
        target,
        &method_name,
        args,
        JoinPointMetadata::new(&class_name),
    ));

    // 已有环境上下文则复用（嵌套代理调用），否则创建并作用域化一个新的；
    // 最外层调用结束后新上下文随作用域一起被丢弃
    match context::get_context() {
        Some(_) => run_in_context(registry, join_point, original, applicable).await,
        None => {
            let fresh = AspectContext::new();
            context::run(
                fresh,
                run_in_context(registry, join_point, original, applicable),
            )
            .await
        }
    }
}

/// 在环境上下文内执行：登记连接点、压栈、跑管线、保证弹栈
async fn run_in_context(
    registry: Arc<AspectRegistry>,
    join_point: Arc<JoinPoint>,
    original: MethodFn,
    applicable: Vec<String>,
) -> MethodResult {
    context::update_context(ContextUpdate {
        join_point: Some(Arc::clone(&join_point)),
        ..Default::default()
    });
    context::add_to_call_stack(join_point.signature());

    let result = execute_advised(&registry, &join_point, original, &applicable).await;

    // 无论成败都弹栈，与压栈严格配对
    context::remove_from_call_stack();

    result
}

/// 通知执行管线
async fn execute_advised(
    registry: &AspectRegistry,
    join_point: &Arc<JoinPoint>,
    original: MethodFn,
    applicable: &[String],
) -> MethodResult {
    // 前置通知：出错立即转入异常路径，跳过环绕和原始方法
    for pointcut_ref in applicable {
        let advices = registry.get_advices(AdviceKind::Before, pointcut_ref);
        tracing::debug!(
            "Executing {} before advice(s) for {}",
            advices.len(),
            pointcut_ref
        );
        for advice in advices {
            if let AdviceFn::Before(advice) = advice {
                if let Err(error) = advice(Arc::clone(join_point)).await {
                    return fail(registry, join_point, applicable, error).await;
                }
            }
        }
    }

    // 收集环绕通知：切点顺序在前，注册顺序在后
    let mut around_advices: Vec<AroundFn> = Vec::new();
    for pointcut_ref in applicable {
        for advice in registry.get_advices(AdviceKind::Around, pointcut_ref) {
            if let AdviceFn::Around(advice) = advice {
                around_advices.push(advice);
            }
        }
    }

    let outcome = if around_advices.is_empty() {
        tracing::debug!("Executing original method {}", join_point.signature());
        (original)(join_point.get_args().to_vec()).await
    } else {
        tracing::debug!(
            "Executing {} around advice(s) for {}",
            around_advices.len(),
            join_point.signature()
        );
        let chain = build_around_chain(around_advices, Arc::clone(join_point), original);
        (chain)(join_point.get_args().to_vec()).await
    };

    match outcome {
        Ok(value) => {
            // 返回后通知：只读观察，通知自身的错误记录后继续
            for pointcut_ref in applicable {
                let advices = registry.get_advices(AdviceKind::AfterReturning, pointcut_ref);
                for advice in advices {
                    if let AdviceFn::AfterReturning(advice) = advice {
                        if let Err(error) =
                            advice(Arc::clone(join_point), value.clone()).await
                        {
                            tracing::warn!(
                                "AfterReturning advice failed for {}: {:#}",
                                join_point.signature(),
                                error
                            );
                        }
                    }
                }
            }

            execute_after(registry, join_point, applicable).await;
            Ok(value)
        }
        Err(error) => fail(registry, join_point, applicable, error).await,
    }
}

/// 右向左组合环绕链
///
/// 最内层调用原始方法，每一层的 proceed 进入内一层；最外层通知的
/// 返回值就是管线结果。某层不调用 proceed 时，内层和原始方法都不执行。
fn build_around_chain(
    advices: Vec<AroundFn>,
    join_point: Arc<JoinPoint>,
    original: MethodFn,
) -> MethodFn {
    let mut next = original;

    for advice in advices.into_iter().rev() {
        let inner = next;
        let join_point = Arc::clone(&join_point);
        // 参数覆盖只作用于紧邻的内层；proceed 的默认参数始终是连接点的原始参数
        next = Arc::new(move |_args| {
            let pjp = ProceedingJoinPoint::new(Arc::clone(&join_point), Arc::clone(&inner));
            advice(pjp)
        });
    }

    next
}

/// 异常路径：异常通知 → 后置通知 → 原样重新抛出
async fn fail(
    registry: &AspectRegistry,
    join_point: &Arc<JoinPoint>,
    applicable: &[String],
    error: anyhow::Error,
) -> MethodResult {
    tracing::error!(
        "Error in proxy method {}: {:#}",
        join_point.signature(),
        error
    );

    let info = ErrorInfo::from_error(&error);
    for pointcut_ref in applicable {
        let advices = registry.get_advices(AdviceKind::AfterThrowing, pointcut_ref);
        for advice in advices {
            if let AdviceFn::AfterThrowing(advice) = advice {
                if let Err(observer_error) =
                    advice(Arc::clone(join_point), info.clone()).await
                {
                    // 观察者错误不得掩盖主错误
                    tracing::warn!(
                        "AfterThrowing advice failed for {}: {:#}",
                        join_point.signature(),
                        observer_error
                    );
                }
            }
        }
    }

    execute_after(registry, join_point, applicable).await;

    Err(error)
}

/// 后置通知：成败路径都会到达，通知自身的错误记录后继续
async fn execute_after(
    registry: &AspectRegistry,
    join_point: &Arc<JoinPoint>,
    applicable: &[String],
) {
    for pointcut_ref in applicable {
        let advices = registry.get_advices(AdviceKind::After, pointcut_ref);
        for advice in advices {
            if let AdviceFn::After(advice) = advice {
                if let Err(error) = advice(Arc::clone(join_point)).await {
                    tracing::warn!(
                        "After advice failed for {}: {:#}",
                        join_point.signature(),
                        error
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aspect::{Aspect, AspectMethod};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type EventLog = Arc<Mutex<Vec<String>>>;

    fn new_log() -> EventLog {
        Arc::new(Mutex::new(Vec::new()))
    }

    struct EchoService {
        calls: AtomicUsize,
        events: EventLog,
    }

    impl EchoService {
        fn new(events: EventLog) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                events,
            })
        }
    }

    #[async_trait]
    impl Interceptable for EchoService {
        fn class_name(&self) -> &str {
            "EchoService"
        }

        fn method_names(&self) -> Vec<&'static str> {
            vec!["echo", "boom"]
        }

        async fn invoke(&self, method_name: &str, args: Vec<Value>) -> MethodResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.events.lock().push("original".to_string());
            match method_name {
                "echo" => Ok(args.into_iter().next().unwrap_or(Value::Null)),
                "boom" => Err(anyhow::anyhow!("boom")),
                other => Err(crate::error::AopError::UnknownMethod {
                    class: "EchoService".to_string(),
                    method: other.to_string(),
                }
                .into()),
            }
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    /// 记录全部五种通知执行顺序的切面
    struct RecordingAspect {
        events: EventLog,
    }

    #[async_trait]
    impl Aspect for RecordingAspect {
        fn name(&self) -> &str {
            "RecordingAspect"
        }

        fn methods(&self) -> Vec<AspectMethod> {
            vec![
                AspectMethod::new("echo_methods").pointcut("execution(* EchoService.*(..))"),
                AspectMethod::new("record_before").before("RecordingAspect.echo_methods"),
                AspectMethod::new("record_around").around("RecordingAspect.echo_methods"),
                AspectMethod::new("record_after_returning")
                    .after_returning("RecordingAspect.echo_methods"),
                AspectMethod::new("record_after_throwing")
                    .after_throwing("RecordingAspect.echo_methods"),
                AspectMethod::new("record_after").after("RecordingAspect.echo_methods"),
            ]
        }

        async fn before(&self, _method: &str, _jp: &JoinPoint) -> anyhow::Result<()> {
            self.events.lock().push("before".to_string());
            Ok(())
        }

        async fn around(&self, _method: &str, pjp: ProceedingJoinPoint) -> MethodResult {
            self.events.lock().push("around:pre".to_string());
            let result = pjp.proceed(None).await?;
            self.events.lock().push("around:post".to_string());
            Ok(result)
        }

        async fn after_returning(
            &self,
            _method: &str,
            _jp: &JoinPoint,
            _result: &Value,
        ) -> anyhow::Result<()> {
            self.events.lock().push("after_returning".to_string());
            Ok(())
        }

        async fn after_throwing(
            &self,
            _method: &str,
            _jp: &JoinPoint,
            error: &ErrorInfo,
        ) -> anyhow::Result<()> {
            self.events.lock().push(format!("after_throwing:{}", error.message));
            Ok(())
        }

        async fn after(&self, _method: &str, _jp: &JoinPoint) -> anyhow::Result<()> {
            self.events.lock().push("after".to_string());
            Ok(())
        }
    }

    fn make_proxy(
        registry: &Arc<AspectRegistry>,
        service: &Arc<EchoService>,
        method: &str,
    ) -> MethodFn {
        let original: MethodFn = {
            let service = Arc::clone(service);
            let method = method.to_string();
            Arc::new(move |args| {
                let service = Arc::clone(&service);
                let method = method.clone();
                Box::pin(async move { service.invoke(&method, args).await })
            })
        };
        MethodProxy::new(Arc::clone(registry)).create_proxy(
            Arc::clone(service) as Arc<dyn Interceptable>,
            method,
            original,
        )
    }

    #[tokio::test]
    async fn test_success_advice_order() {
        let events = new_log();
        let registry = Arc::new(AspectRegistry::new());
        registry.register_aspect(Arc::new(RecordingAspect {
            events: Arc::clone(&events),
        }));

        let service = EchoService::new(Arc::clone(&events));
        let proxy = make_proxy(&registry, &service, "echo");

        let result = proxy(vec![json!("hello")]).await.unwrap();
        assert_eq!(result, json!("hello"));
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            *events.lock(),
            vec![
                "before",
                "around:pre",
                "original",
                "around:post",
                "after_returning",
                "after"
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_advice_order_and_error_content() {
        let events = new_log();
        let registry = Arc::new(AspectRegistry::new());
        registry.register_aspect(Arc::new(RecordingAspect {
            events: Arc::clone(&events),
        }));

        let service = EchoService::new(Arc::clone(&events));
        let proxy = make_proxy(&registry, &service, "boom");

        let error = proxy(vec![]).await.unwrap_err();
        assert_eq!(error.to_string(), "boom");
        assert_eq!(
            *events.lock(),
            vec![
                "before",
                "around:pre",
                "original",
                "after_throwing:boom",
                "after"
            ]
        );
    }

    #[tokio::test]
    async fn test_passthrough_when_no_pointcut_matches() {
        struct ElsewhereAspect;

        #[async_trait]
        impl Aspect for ElsewhereAspect {
            fn name(&self) -> &str {
                "ElsewhereAspect"
            }

            fn methods(&self) -> Vec<AspectMethod> {
                vec![
                    AspectMethod::new("other_methods")
                        .pointcut("execution(* OtherService.*(..))"),
                    AspectMethod::new("noop").before("ElsewhereAspect.other_methods"),
                ]
            }

            async fn before(&self, _method: &str, _jp: &JoinPoint) -> anyhow::Result<()> {
                panic!("must not run");
            }
        }

        let events = new_log();
        let registry = Arc::new(AspectRegistry::new());
        registry.register_aspect(Arc::new(ElsewhereAspect));

        let service = EchoService::new(Arc::clone(&events));
        let proxy = make_proxy(&registry, &service, "echo");

        let result = proxy(vec![json!(7)]).await.unwrap();
        assert_eq!(result, json!(7));
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*events.lock(), vec!["original"]);
    }

    #[tokio::test]
    async fn test_around_can_skip_original() {
        struct SkippingAspect;

        #[async_trait]
        impl Aspect for SkippingAspect {
            fn name(&self) -> &str {
                "SkippingAspect"
            }

            fn methods(&self) -> Vec<AspectMethod> {
                vec![
                    AspectMethod::new("echo_methods")
                        .pointcut("execution(* EchoService.*(..))"),
                    AspectMethod::new("short_circuit").around("SkippingAspect.echo_methods"),
                ]
            }

            async fn around(&self, _method: &str, _pjp: ProceedingJoinPoint) -> MethodResult {
                // 不调用 proceed：原始方法被完全跳过
                Ok(json!("skipped"))
            }
        }

        let events = new_log();
        let registry = Arc::new(AspectRegistry::new());
        registry.register_aspect(Arc::new(SkippingAspect));

        let service = EchoService::new(Arc::clone(&events));
        let proxy = make_proxy(&registry, &service, "echo");

        let result = proxy(vec![json!("ignored")]).await.unwrap();
        assert_eq!(result, json!("skipped"));
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_before_failure_skips_around_and_original() {
        struct DenyingAspect {
            events: EventLog,
        }

        #[async_trait]
        impl Aspect for DenyingAspect {
            fn name(&self) -> &str {
                "DenyingAspect"
            }

            fn methods(&self) -> Vec<AspectMethod> {
                vec![
                    AspectMethod::new("echo_methods")
                        .pointcut("execution(* EchoService.*(..))"),
                    AspectMethod::new("deny").before("DenyingAspect.echo_methods"),
                    AspectMethod::new("wrap").around("DenyingAspect.echo_methods"),
                    AspectMethod::new("observe_error")
                        .after_throwing("DenyingAspect.echo_methods"),
                    AspectMethod::new("cleanup").after("DenyingAspect.echo_methods"),
                ]
            }

            async fn before(&self, _method: &str, _jp: &JoinPoint) -> anyhow::Result<()> {
                self.events.lock().push("before".to_string());
                Err(anyhow::anyhow!("denied"))
            }

            async fn around(&self, _method: &str, pjp: ProceedingJoinPoint) -> MethodResult {
                self.events.lock().push("around".to_string());
                pjp.proceed(None).await
            }

            async fn after_throwing(
                &self,
                _method: &str,
                _jp: &JoinPoint,
                error: &ErrorInfo,
            ) -> anyhow::Result<()> {
                self.events.lock().push(format!("after_throwing:{}", error.message));
                Ok(())
            }

            async fn after(&self, _method: &str, _jp: &JoinPoint) -> anyhow::Result<()> {
                self.events.lock().push("after".to_string());
                Ok(())
            }
        }

        let events = new_log();
        let registry = Arc::new(AspectRegistry::new());
        registry.register_aspect(Arc::new(DenyingAspect {
            events: Arc::clone(&events),
        }));

        let service = EchoService::new(new_log());
        let proxy = make_proxy(&registry, &service, "echo");

        let error = proxy(vec![json!(1)]).await.unwrap_err();
        assert_eq!(error.to_string(), "denied");
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            *events.lock(),
            vec!["before", "after_throwing:denied", "after"]
        );
    }

    #[tokio::test]
    async fn test_observer_errors_are_swallowed() {
        struct NoisyObserverAspect {
            events: EventLog,
        }

        #[async_trait]
        impl Aspect for NoisyObserverAspect {
            fn name(&self) -> &str {
                "NoisyObserverAspect"
            }

            fn methods(&self) -> Vec<AspectMethod> {
                vec![
                    AspectMethod::new("echo_methods")
                        .pointcut("execution(* EchoService.*(..))"),
                    AspectMethod::new("broken_observer")
                        .after_returning("NoisyObserverAspect.echo_methods")
                        .after_throwing("NoisyObserverAspect.echo_methods"),
                    AspectMethod::new("cleanup").after("NoisyObserverAspect.echo_methods"),
                ]
            }

            async fn after_returning(
                &self,
                _method: &str,
                _jp: &JoinPoint,
                _result: &Value,
            ) -> anyhow::Result<()> {
                Err(anyhow::anyhow!("observer exploded"))
            }

            async fn after_throwing(
                &self,
                _method: &str,
                _jp: &JoinPoint,
                _error: &ErrorInfo,
            ) -> anyhow::Result<()> {
                Err(anyhow::anyhow!("observer exploded"))
            }

            async fn after(&self, _method: &str, _jp: &JoinPoint) -> anyhow::Result<()> {
                self.events.lock().push("after".to_string());
                Err(anyhow::anyhow!("after exploded"))
            }
        }

        let events = new_log();
        let registry = Arc::new(AspectRegistry::new());
        registry.register_aspect(Arc::new(NoisyObserverAspect {
            events: Arc::clone(&events),
        }));

        let service = EchoService::new(new_log());

        // 成功路径：结果不受观察者错误影响，后置通知照常执行
        let proxy = make_proxy(&registry, &service, "echo");
        let result = proxy(vec![json!("ok")]).await.unwrap();
        assert_eq!(result, json!("ok"));
        assert_eq!(*events.lock(), vec!["after"]);

        // 异常路径：主错误原样保留
        let proxy = make_proxy(&registry, &service, "boom");
        let error = proxy(vec![]).await.unwrap_err();
        assert_eq!(error.to_string(), "boom");
    }

    #[tokio::test]
    async fn test_dangling_advice_is_inert() {
        struct DanglingAspect;

        #[async_trait]
        impl Aspect for DanglingAspect {
            fn name(&self) -> &str {
                "DanglingAspect"
            }

            fn methods(&self) -> Vec<AspectMethod> {
                // 没有任何切点定义，绑定引用不存在的切点
                vec![AspectMethod::new("lost").before("Ghost.nothing")]
            }

            async fn before(&self, _method: &str, _jp: &JoinPoint) -> anyhow::Result<()> {
                panic!("must not run");
            }
        }

        let events = new_log();
        let registry = Arc::new(AspectRegistry::new());
        registry.register_aspect(Arc::new(DanglingAspect));

        let service = EchoService::new(Arc::clone(&events));
        let proxy = make_proxy(&registry, &service, "echo");

        let result = proxy(vec![json!(3)]).await.unwrap();
        assert_eq!(result, json!(3));
        assert_eq!(*events.lock(), vec!["original"]);
    }

    #[tokio::test]
    async fn test_before_advices_run_in_pointcut_order() {
        struct LabelAspect {
            label: String,
            events: EventLog,
        }

        #[async_trait]
        impl Aspect for LabelAspect {
            fn name(&self) -> &str {
                &self.label
            }

            fn methods(&self) -> Vec<AspectMethod> {
                vec![
                    AspectMethod::new("pc").pointcut("execution(* EchoService.*(..))"),
                    AspectMethod::new("mark").before(format!("{}.pc", self.label)),
                ]
            }

            async fn before(&self, _method: &str, _jp: &JoinPoint) -> anyhow::Result<()> {
                self.events.lock().push(format!("before:{}", self.label));
                Ok(())
            }
        }

        let events = new_log();
        let registry = Arc::new(AspectRegistry::new());
        registry.register_aspect(Arc::new(LabelAspect {
            label: "AspectA".to_string(),
            events: Arc::clone(&events),
        }));
        registry.register_aspect(Arc::new(LabelAspect {
            label: "AspectB".to_string(),
            events: Arc::clone(&events),
        }));

        let service = EchoService::new(Arc::clone(&events));
        let proxy = make_proxy(&registry, &service, "echo");
        proxy(vec![json!(0)]).await.unwrap();

        assert_eq!(*events.lock(), vec!["before:AspectA", "before:AspectB", "original"]);
    }

    struct NestedService;

    #[async_trait]
    impl Interceptable for NestedService {
        fn class_name(&self) -> &str {
            "NestedService"
        }

        fn method_names(&self) -> Vec<&'static str> {
            vec!["outer", "inner"]
        }

        async fn invoke(&self, _method_name: &str, _args: Vec<Value>) -> MethodResult {
            Ok(Value::Null)
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    /// 从环绕通知里触发嵌套代理调用，观察上下文复用和调用栈
    struct NestedAspect {
        inner_proxy: Mutex<Option<MethodFn>>,
        observed_stacks: Mutex<Vec<Vec<String>>>,
        observed_contexts: Mutex<Vec<Arc<AspectContext>>>,
    }

    #[async_trait]
    impl Aspect for NestedAspect {
        fn name(&self) -> &str {
            "NestedAspect"
        }

        fn methods(&self) -> Vec<AspectMethod> {
            vec![
                AspectMethod::new("nested_methods")
                    .pointcut("execution(* NestedService.*(..))"),
                AspectMethod::new("observe").around("NestedAspect.nested_methods"),
            ]
        }

        async fn around(&self, _method: &str, pjp: ProceedingJoinPoint) -> MethodResult {
            let ctx = context::get_context().expect("context must be active");
            self.observed_contexts.lock().push(Arc::clone(&ctx));
            self.observed_stacks.lock().push(ctx.call_stack());

            if pjp.join_point().get_method_name() == "outer" {
                let inner = self.inner_proxy.lock().clone().expect("inner proxy set");
                inner(vec![]).await?;
            }

            pjp.proceed(None).await
        }
    }

    #[tokio::test]
    async fn test_nested_calls_share_context_and_balance_call_stack() {
        let registry = Arc::new(AspectRegistry::new());
        let aspect = Arc::new(NestedAspect {
            inner_proxy: Mutex::new(None),
            observed_stacks: Mutex::new(Vec::new()),
            observed_contexts: Mutex::new(Vec::new()),
        });
        registry.register_aspect(Arc::clone(&aspect) as Arc<dyn Aspect>);

        let service: Arc<dyn Interceptable> = Arc::new(NestedService);
        let method_proxy = MethodProxy::new(Arc::clone(&registry));

        let inner_original: MethodFn = {
            let service = Arc::clone(&service);
            Arc::new(move |args| {
                let service = Arc::clone(&service);
                Box::pin(async move { service.invoke("inner", args).await })
            })
        };
        let inner_proxy =
            method_proxy.create_proxy(Arc::clone(&service), "inner", inner_original);
        *aspect.inner_proxy.lock() = Some(inner_proxy);

        let outer_original: MethodFn = {
            let service = Arc::clone(&service);
            Arc::new(move |args| {
                let service = Arc::clone(&service);
                Box::pin(async move { service.invoke("outer", args).await })
            })
        };
        let outer_proxy =
            method_proxy.create_proxy(Arc::clone(&service), "outer", outer_original);

        outer_proxy(vec![]).await.unwrap();

        let stacks = aspect.observed_stacks.lock().clone();
        assert_eq!(
            stacks,
            vec![
                vec!["NestedService.outer".to_string()],
                vec![
                    "NestedService.outer".to_string(),
                    "NestedService.inner".to_string()
                ],
            ]
        );

        // 嵌套调用复用同一个上下文实例
        let contexts = aspect.observed_contexts.lock();
        assert_eq!(contexts.len(), 2);
        assert!(Arc::ptr_eq(&contexts[0], &contexts[1]));

        // 最外层调用结束后调用栈回到调用前的深度
        assert_eq!(contexts[0].call_depth(), 0);

        // 调用树结束后外部不再有环境上下文
        assert!(context::get_context().is_none());
    }

    #[tokio::test]
    async fn test_call_stack_balanced_on_failure() {
        let events = new_log();
        let registry = Arc::new(AspectRegistry::new());
        let aspect = Arc::new(RecordingAspect {
            events: Arc::clone(&events),
        });
        registry.register_aspect(aspect as Arc<dyn Aspect>);

        let service = EchoService::new(Arc::clone(&events));
        let proxy = make_proxy(&registry, &service, "boom");

        // 在通知中捕获上下文以便调用结束后检查
        let captured: Arc<Mutex<Option<Arc<AspectContext>>>> = Arc::new(Mutex::new(None));
        {
            struct CaptureAspect {
                captured: Arc<Mutex<Option<Arc<AspectContext>>>>,
            }

            #[async_trait]
            impl Aspect for CaptureAspect {
                fn name(&self) -> &str {
                    "CaptureAspect"
                }

                fn methods(&self) -> Vec<AspectMethod> {
                    vec![
                        AspectMethod::new("pc").pointcut("execution(* EchoService.*(..))"),
                        AspectMethod::new("capture").before("CaptureAspect.pc"),
                    ]
                }

                async fn before(&self, _method: &str, _jp: &JoinPoint) -> anyhow::Result<()> {
                    *self.captured.lock() = context::get_context();
                    Ok(())
                }
            }

            registry.register_aspect(Arc::new(CaptureAspect {
                captured: Arc::clone(&captured),
            }));
        }

        proxy(vec![]).await.unwrap_err();

        let context = captured.lock().clone().expect("context captured");
        assert_eq!(context.call_depth(), 0);
    }
}
