//! 守卫条件
//!
//! `if` 列表全部成立、`unless` 列表全部不成立时规则或回调才会执行。
//! 命名守卫在注册期解析：先查能力表，再查内置的记录访问器，查不到即为配置错误。
//! 解析结果在规则运行的那一刻针对记录的当前状态求值。

use crate::capabilities::Capabilities;
use crate::error::{EngineError, Result};
use crate::record::{Record, is_truthy};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

/// 守卫函数
pub type GuardFn = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// 守卫：命名访问器或直接提供的谓词函数
#[derive(Clone)]
pub enum Guard {
    Named(String),
    Predicate(GuardFn),
}

impl Guard {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }
}

impl From<&str> for Guard {
    fn from(name: &str) -> Self {
        Self::named(name)
    }
}

impl fmt::Debug for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => write!(f, "Guard::Named({})", name),
            Self::Predicate(_) => write!(f, "Guard::Predicate(..)"),
        }
    }
}

impl Serialize for Guard {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Named(name) => serializer.serialize_str(name),
            Self::Predicate(_) => serializer.serialize_str("<predicate>"),
        }
    }
}

impl<'de> Deserialize<'de> for Guard {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::Named)
    }
}

/// 内置的记录访问器
#[derive(Debug, Clone, PartialEq, Eq)]
enum Accessor {
    NewRecord,
    Persisted,
    Destroyed,
    /// `<attr>?`
    Truthy(String),
    /// `<attr>_changed?`
    Changed(String),
}

impl Accessor {
    fn holds(&self, record: &Record) -> bool {
        match self {
            Self::NewRecord => record.is_new_record(),
            Self::Persisted => record.is_persisted(),
            Self::Destroyed => record.is_destroyed(),
            Self::Truthy(attr) => is_truthy(record.get(attr)),
            Self::Changed(attr) => record.is_changed(attr),
        }
    }
}

#[derive(Clone)]
enum ResolvedGuard {
    Function { name: String, f: GuardFn },
    Accessor(Accessor),
}

impl ResolvedGuard {
    fn holds(&self, record: &Record) -> bool {
        match self {
            Self::Function { f, .. } => f(record),
            Self::Accessor(accessor) => accessor.holds(record),
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Function { name, .. } => name.clone(),
            Self::Accessor(accessor) => format!("{:?}", accessor),
        }
    }
}

/// 编译后的守卫组合
#[derive(Clone, Default)]
pub struct CompiledGuards {
    if_all: Vec<ResolvedGuard>,
    unless_any: Vec<ResolvedGuard>,
}

impl CompiledGuards {
    pub(crate) fn compile(
        if_guards: &[Guard],
        unless: &[Guard],
        capabilities: &Capabilities,
        attributes: &[String],
    ) -> Result<Self> {
        let resolve_all = |guards: &[Guard]| -> Result<Vec<ResolvedGuard>> {
            guards
                .iter()
                .map(|guard| resolve(guard, capabilities, attributes))
                .collect()
        };

        Ok(Self {
            if_all: resolve_all(if_guards)?,
            unless_any: resolve_all(unless)?,
        })
    }

    /// 当前记录状态下是否允许执行
    pub fn allows(&self, record: &Record) -> bool {
        self.if_all.iter().all(|g| g.holds(record))
            && !self.unless_any.iter().any(|g| g.holds(record))
    }

    pub fn is_empty(&self) -> bool {
        self.if_all.is_empty() && self.unless_any.is_empty()
    }

    /// 追踪输出用
    pub fn describe(&self) -> String {
        let ifs: Vec<String> = self.if_all.iter().map(ResolvedGuard::describe).collect();
        let unlesses: Vec<String> = self.unless_any.iter().map(ResolvedGuard::describe).collect();
        format!("if [{}] unless [{}]", ifs.join(", "), unlesses.join(", "))
    }
}

impl fmt::Debug for CompiledGuards {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

fn resolve(guard: &Guard, capabilities: &Capabilities, attributes: &[String]) -> Result<ResolvedGuard> {
    let name = match guard {
        Guard::Predicate(f) => {
            return Ok(ResolvedGuard::Function {
                name: "<predicate>".to_string(),
                f: Arc::clone(f),
            });
        }
        Guard::Named(name) => name,
    };

    if let Some(f) = capabilities.guard(name) {
        return Ok(ResolvedGuard::Function {
            name: name.clone(),
            f,
        });
    }

    let accessor = match name.as_str() {
        "new_record?" => Some(Accessor::NewRecord),
        "persisted?" => Some(Accessor::Persisted),
        "destroyed?" => Some(Accessor::Destroyed),
        _ => attribute_accessor(name, attributes),
    };

    accessor
        .map(ResolvedGuard::Accessor)
        .ok_or_else(|| EngineError::config(format!("未知的守卫 '{}'", name)))
}

fn attribute_accessor(name: &str, attributes: &[String]) -> Option<Accessor> {
    let declared = |attr: &str| attributes.iter().any(|a| a == attr);

    if let Some(attr) = name.strip_suffix("_changed?") {
        if declared(attr) {
            return Some(Accessor::Changed(attr.to_string()));
        }
    }

    match name.strip_suffix('?') {
        Some(attr) if declared(attr) => Some(Accessor::Truthy(attr.to_string())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs() -> Vec<String> {
        vec!["email".to_string(), "desktop".to_string()]
    }

    fn caps() -> Capabilities {
        Capabilities::builder()
            .guard("retail?", |r: &Record| r.get("market.retail") == Some(&json!(true)))
            .build()
    }

    fn compile(if_guards: &[Guard], unless: &[Guard]) -> Result<CompiledGuards> {
        CompiledGuards::compile(if_guards, unless, &caps(), &attrs())
    }

    #[test]
    fn test_if_list_requires_all() {
        let guards = compile(&[Guard::named("retail?"), Guard::named("desktop?")], &[]).unwrap();

        let both = Record::from_json("Computer", json!({"market": {"retail": true}, "desktop": true})).unwrap();
        let one = Record::from_json("Computer", json!({"market": {"retail": true}, "desktop": false})).unwrap();

        assert!(guards.allows(&both));
        assert!(!guards.allows(&one));
    }

    #[test]
    fn test_unless_skips_when_any_holds() {
        let guards = compile(&[], &[Guard::predicate(|r| r.get("trackpad").is_some())]).unwrap();

        let with_trackpad = Record::from_json("Computer", json!({"trackpad": "yes"})).unwrap();
        let without = Record::from_json("Computer", json!({})).unwrap();

        assert!(!guards.allows(&with_trackpad));
        assert!(guards.allows(&without));
    }

    #[test]
    fn test_builtin_accessors() {
        let guards = compile(&[Guard::named("email_changed?"), Guard::named("new_record?")], &[]).unwrap();

        let fresh = Record::from_json("Person", json!({"email": "a@b.c"})).unwrap();
        let loaded = Record::persisted("Person", "1", json!({"email": "a@b.c"})).unwrap();

        assert!(guards.allows(&fresh));
        assert!(!guards.allows(&loaded));
    }

    #[test]
    fn test_unknown_guard_is_config_error() {
        let err = compile(&[Guard::named("missing?")], &[]).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
        assert!(err.to_string().contains("missing?"));

        // 未声明的属性不能使用内置访问器
        assert!(compile(&[Guard::named("surname_changed?")], &[]).is_err());
    }

    #[test]
    fn test_guard_serde() {
        let guard: Guard = serde_json::from_value(json!("paid_with_card?")).unwrap();
        assert!(matches!(&guard, Guard::Named(n) if n == "paid_with_card?"));
        assert_eq!(serde_json::to_value(&guard).unwrap(), json!("paid_with_card?"));
    }
}
