use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use weft_aop::prelude::*;

// ==================== 业务领域 ====================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct User {
    id: u64,
    name: String,
    email: String,
}

#[derive(Debug, Error)]
enum UserError {
    #[error("user {0} not found")]
    NotFound(u64),
}

/// 用户服务 - 被代理的示例目标
struct UserService {
    users: RwLock<Vec<User>>,
}

impl UserService {
    fn new() -> Self {
        Self {
            users: RwLock::new(vec![
                User {
                    id: 1,
                    name: "Hong Gildong".to_string(),
                    email: "hong@example.com".to_string(),
                },
                User {
                    id: 2,
                    name: "Kim Cheolsu".to_string(),
                    email: "kim@example.com".to_string(),
                },
                User {
                    id: 3,
                    name: "Lee Younghee".to_string(),
                    email: "lee@example.com".to_string(),
                },
            ]),
        }
    }

    fn find_all(&self) -> Vec<User> {
        self.users.read().clone()
    }

    fn find_by_id(&self, id: u64) -> Option<User> {
        self.users.read().iter().find(|user| user.id == id).cloned()
    }

    fn create(&self, name: String, email: String) -> User {
        let mut users = self.users.write();
        let user = User {
            id: users.len() as u64 + 1,
            name,
            email,
        };
        users.push(user.clone());
        user
    }

    fn update(&self, id: u64, email: Option<String>) -> Result<User, UserError> {
        let mut users = self.users.write();
        let user = users
            .iter_mut()
            .find(|user| user.id == id)
            .ok_or(UserError::NotFound(id))?;
        if let Some(email) = email {
            user.email = email;
        }
        Ok(user.clone())
    }

    fn delete(&self, id: u64) -> bool {
        let mut users = self.users.write();
        let before = users.len();
        users.retain(|user| user.id != id);
        users.len() < before
    }
}

#[async_trait]
impl Interceptable for UserService {
    fn class_name(&self) -> &str {
        "UserService"
    }

    fn method_names(&self) -> Vec<&'static str> {
        vec!["find_all", "find_by_id", "create", "update", "delete"]
    }

    async fn invoke(&self, method_name: &str, args: Vec<Value>) -> MethodResult {
        match method_name {
            "find_all" => Ok(serde_json::to_value(self.find_all())?),
            "find_by_id" => {
                let id = args.first().and_then(Value::as_u64).unwrap_or(0);
                Ok(serde_json::to_value(self.find_by_id(id))?)
            }
            "create" => {
                let name = args
                    .first()
                    .and_then(|arg| arg["name"].as_str())
                    .unwrap_or_default()
                    .to_string();
                let email = args
                    .first()
                    .and_then(|arg| arg["email"].as_str())
                    .unwrap_or_default()
                    .to_string();
                Ok(serde_json::to_value(self.create(name, email))?)
            }
            "update" => {
                let id = args.first().and_then(Value::as_u64).unwrap_or(0);
                let email = args
                    .get(1)
                    .and_then(|arg| arg["email"].as_str())
                    .map(str::to_string);
                Ok(serde_json::to_value(self.update(id, email)?)?)
            }
            "delete" => {
                let id = args.first().and_then(Value::as_u64).unwrap_or(0);
                Ok(json!(self.delete(id)))
            }
            other => anyhow::bail!("UserService has no method '{}'", other),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ==================== 日志切面 ====================

/// 日志切面 - 对 UserService 的全部方法挂五种通知
struct LoggingAspect;

#[async_trait]
impl Aspect for LoggingAspect {
    fn name(&self) -> &str {
        "LoggingAspect"
    }

    fn methods(&self) -> Vec<AspectMethod> {
        vec![
            AspectMethod::new("user_service_methods")
                .pointcut("execution(* UserService.*(..))"),
            AspectMethod::new("log_before").before("LoggingAspect.user_service_methods"),
            AspectMethod::new("log_after").after("LoggingAspect.user_service_methods"),
            AspectMethod::new("log_around").around("LoggingAspect.user_service_methods"),
            AspectMethod::new("log_after_returning")
                .after_returning("LoggingAspect.user_service_methods"),
            AspectMethod::new("log_after_throwing")
                .after_throwing("LoggingAspect.user_service_methods"),
        ]
    }

    async fn before(&self, _method: &str, jp: &JoinPoint) -> anyhow::Result<()> {
        tracing::info!("🔵 [Before] → {} args: {:?}", jp.signature(), jp.get_args());
        Ok(())
    }

    async fn after(&self, _method: &str, jp: &JoinPoint) -> anyhow::Result<()> {
        tracing::info!("🔵 [After] ← {}", jp.signature());
        Ok(())
    }

    async fn around(&self, _method: &str, pjp: ProceedingJoinPoint) -> MethodResult {
        let depth = context::get_context()
            .map(|ctx| ctx.call_depth())
            .unwrap_or(0);
        tracing::info!("🔷 [Around] {} (call depth: {})", pjp.signature(), depth);

        let start = Instant::now();
        let result = pjp.proceed(None).await;
        match &result {
            Ok(_) => {
                tracing::info!("🔷 [Around] {} done in {:?}", pjp.signature(), start.elapsed())
            }
            Err(error) => {
                tracing::error!("🔷 [Around] {} failed: {}", pjp.signature(), error)
            }
        }
        result
    }

    async fn after_returning(
        &self,
        _method: &str,
        jp: &JoinPoint,
        result: &Value,
    ) -> anyhow::Result<()> {
        tracing::info!("🟢 [AfterReturning] {} -> {}", jp.signature(), result);
        Ok(())
    }

    async fn after_throwing(
        &self,
        _method: &str,
        jp: &JoinPoint,
        error: &ErrorInfo,
    ) -> anyhow::Result<()> {
        tracing::error!("🔴 [AfterThrowing] {}: {}", jp.signature(), error.message);
        Ok(())
    }
}

// 自动注册到 AOP 系统
weft_aop::inventory::submit! {
    AspectRegistration::new("LoggingAspect", || Arc::new(LoggingAspect) as Arc<dyn Aspect>)
}

// ==================== 主程序 ====================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .compact()
        .init();

    println!("\n╔════════════════════════════════════════════════════╗");
    println!("║            Weft AOP - User Service Demo           ║");
    println!("╚════════════════════════════════════════════════════╝\n");

    // 全局注册表在首次访问时自动加载 inventory 里的切面
    let registry = get_global_registry();
    println!("📦 Registered aspects: {}", registry.len());
    for pointcut in registry.get_pointcuts() {
        println!("   Pointcut {} = {}", pointcut.name, pointcut.expression);
    }

    // 类代理：包装 UserService 的全部方法
    let factory = ClassProxyFactory::with_global_registry();
    let user_service = factory.create_proxy(UserService::new);

    println!("\n🔧 find_all()");
    let users = user_service.call("find_all", vec![]).await?;
    println!("   -> {} user(s)", users.as_array().map(Vec::len).unwrap_or(0));

    println!("\n🔧 find_by_id(1)");
    let user = user_service.call("find_by_id", vec![json!(1)]).await?;
    println!("   -> {}", user);

    println!("\n🔧 create(...)");
    let created = user_service
        .call(
            "create",
            vec![json!({"name": "Park Minsu", "email": "park@example.com"})],
        )
        .await?;
    println!("   -> {}", created);

    println!("\n🔧 update(2, ...)");
    let updated = user_service
        .call("update", vec![json!(2), json!({"email": "kim.new@example.com"})])
        .await?;
    println!("   -> {}", updated);

    // 异常路径：AfterThrowing + After 依次执行后错误原样抛给调用方
    println!("\n🔧 update(99, ...) - expected to fail");
    match user_service.call("update", vec![json!(99), json!({})]).await {
        Ok(_) => println!("   -> unexpected success"),
        Err(error) => println!("   -> failed as expected: {}", error),
    }

    println!("\n🔧 delete(3)");
    let deleted = user_service.call("delete", vec![json!(3)]).await?;
    println!("   -> {}", deleted);

    println!("\n✅ Demo complete!");
    Ok(())
}
