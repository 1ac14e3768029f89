//! 切点（Pointcut）表达式系统
//!
//! 定义了如何匹配连接点的规则。表达式在注册时解析并编译一次，
//! 匹配阶段只做纯函数式的字符串/正则比较。

use regex::Regex;

/// 简单的名称模式（支持 * 通配符）
///
/// 支持的模式：
/// - `*` - 匹配任意字符串
/// - `User*` - 以 User 开头
/// - `*Service` - 以 Service 结尾
/// - `*Service*` - 包含 Service
#[derive(Debug, Clone)]
pub enum NamePattern {
    /// 匹配任意名称
    Any,
    /// 精确匹配
    Exact(String),
    /// 编译后的通配符匹配（整串锚定）
    Wildcard(Regex),
    /// 无法编译的模式：永不匹配
    Invalid,
}

impl NamePattern {
    /// 编译一个名称模式
    pub fn compile(pattern: &str) -> Self {
        if pattern == "*" {
            return NamePattern::Any;
        }

        if !pattern.contains('*') {
            return NamePattern::Exact(pattern.to_string());
        }

        // 将 * 转换为正则表达式，整串锚定
        let regex_pattern = format!("^{}$", pattern.replace('*', ".*"));
        match Regex::new(&regex_pattern) {
            Ok(regex) => NamePattern::Wildcard(regex),
            Err(_) => NamePattern::Invalid,
        }
    }

    /// 检查名称是否匹配
    pub fn matches(&self, target: &str) -> bool {
        match self {
            NamePattern::Any => true,
            NamePattern::Exact(pattern) => pattern == target,
            NamePattern::Wildcard(regex) => regex.is_match(target),
            NamePattern::Invalid => false,
        }
    }
}

/// 编译后的切点表达式
#[derive(Debug, Clone)]
pub enum PointcutExpression {
    /// 方法执行表达式
    /// 例如：execution(* UserService.get_user(..))
    ///
    /// 返回类型和参数模式在语法上被接受并保留，但匹配时不参与判断。
    Execution {
        class_pattern: NamePattern,
        method_pattern: NamePattern,
        return_type_pattern: String,
        args_pattern: String,
    },

    /// 注解存在性表达式
    /// 例如：@annotation(Transactional)
    Annotation(String),

    /// 无法识别的表达式形式：永不匹配
    Unsupported,
}

impl PointcutExpression {
    /// 解析切点表达式
    ///
    /// 任何无法识别或解析失败的表达式都得到 Unsupported，
    /// 匹配时静默返回 false，从不向调用方抛错。
    pub fn parse(expression: &str) -> Self {
        let expression = expression.trim();

        if expression.starts_with("execution(") {
            return Self::parse_execution(expression);
        }

        if expression.starts_with("@annotation(") {
            return Self::parse_annotation(expression);
        }

        PointcutExpression::Unsupported
    }

    /// 解析 execution 表达式
    ///
    /// 格式：execution(返回类型 类型名.方法名(参数))
    ///
    /// 简化版本：签名部分在第一个 `.` 处切分为类型和方法，
    /// 多段包名限定的模式因此不会匹配普通类名（与原始行为保持一致）。
    fn parse_execution(expression: &str) -> Self {
        let inner = match expression
            .strip_prefix("execution(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            Some(inner) => inner.trim(),
            None => return PointcutExpression::Unsupported,
        };

        // 切出返回类型和签名: "* UserService.get_user(..)"
        let mut parts = inner.splitn(2, char::is_whitespace);
        let return_type_pattern = match parts.next() {
            Some(ret) if !ret.is_empty() => ret.to_string(),
            _ => return PointcutExpression::Unsupported,
        };
        let signature = match parts.next() {
            Some(sig) => sig.trim(),
            None => return PointcutExpression::Unsupported,
        };

        // 去掉参数部分 "(..)"，保留原文
        let (signature, args_pattern) = match signature.find('(') {
            Some(index) => {
                let args = signature[index..]
                    .trim_start_matches('(')
                    .trim_end_matches(')');
                (&signature[..index], args.to_string())
            }
            None => (signature, "..".to_string()),
        };

        // 在第一个 . 处切分类型和方法
        match signature.split_once('.') {
            Some((class_pattern, method_pattern)) => PointcutExpression::Execution {
                class_pattern: NamePattern::compile(class_pattern),
                method_pattern: NamePattern::compile(method_pattern),
                return_type_pattern,
                args_pattern,
            },
            // 没有类型限定时只按方法名匹配
            None => PointcutExpression::Execution {
                class_pattern: NamePattern::Any,
                method_pattern: NamePattern::compile(signature),
                return_type_pattern,
                args_pattern,
            },
        }
    }

    /// 解析 @annotation 表达式
    fn parse_annotation(expression: &str) -> Self {
        match expression
            .strip_prefix("@annotation(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            Some(name) if !name.is_empty() => {
                PointcutExpression::Annotation(name.trim().to_string())
            }
            _ => PointcutExpression::Unsupported,
        }
    }

    /// 检查连接点是否匹配
    ///
    /// 纯函数，每次被拦截调用会对每个切点调用一次。
    pub fn matches(&self, class_name: &str, method_name: &str, annotations: &[String]) -> bool {
        match self {
            PointcutExpression::Execution {
                class_pattern,
                method_pattern,
                ..
            } => class_pattern.matches(class_name) && method_pattern.matches(method_name),

            PointcutExpression::Annotation(name) => {
                annotations.iter().any(|annotation| annotation == name)
            }

            PointcutExpression::Unsupported => false,
        }
    }
}

/// 已注册的切点
///
/// 按名称（"<切面名>.<方法名>"）唯一标识，持有原始表达式和编译后的匹配器。
#[derive(Debug, Clone)]
pub struct Pointcut {
    /// 切点名称
    pub name: String,

    /// 原始表达式
    pub expression: String,

    /// 编译后的匹配器
    matcher: PointcutExpression,
}

impl Pointcut {
    /// 创建并编译一个切点
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        let expression = expression.into();
        let matcher = PointcutExpression::parse(&expression);
        Self {
            name: name.into(),
            expression,
            matcher,
        }
    }

    /// 检查连接点是否匹配
    pub fn matches(&self, class_name: &str, method_name: &str, annotations: &[String]) -> bool {
        self.matcher
            .matches(class_name, method_name, annotations)
    }

    /// 获取编译后的匹配器
    pub fn matcher(&self) -> &PointcutExpression {
        &self.matcher
    }
}
