//! 规则注册表
//!
//! 启动期通过 `RegistryBuilder` 逐条注册规则与回调（注册顺序即执行顺序），
//! `build()` 之后得到只读的 `Registry`，用 `Arc` 在线程间共享。

use crate::callbacks::CompiledCallback;
use crate::capabilities::Capabilities;
use crate::compiler::{CompiledRule, RuleCompiler};
use crate::error::{EngineError, Result};
use crate::models::{CallbackDef, DefinitionDocument, RecordTypeDefinition, RuleKind, Trigger, ValidationRule};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// 单个记录类型的编译结果
#[derive(Debug, Clone, Default)]
pub struct RecordTypeRules {
    pub name: String,
    pub attributes: Vec<String>,
    pub rules: Vec<CompiledRule>,
    pub callbacks: Vec<CompiledCallback>,
}

impl RecordTypeRules {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// 指定触发点的回调，按注册顺序
    pub fn callbacks_for<'a>(&'a self, trigger: &'a Trigger) -> impl Iterator<Item = &'a CompiledCallback> + 'a {
        self.callbacks.iter().filter(move |cb| &cb.def.trigger == trigger)
    }

    pub fn uses_uniqueness(&self) -> bool {
        self.rules
            .iter()
            .any(|r| matches!(r.rule.kind, RuleKind::Uniqueness { .. }))
    }
}

/// 注册表统计
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStats {
    pub record_types: usize,
    pub rules: usize,
    pub strict_rules: usize,
    pub callbacks: usize,
    pub types: Vec<TypeStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TypeStats {
    pub name: String,
    pub attributes: usize,
    pub rules: usize,
    pub callbacks: usize,
}

/// 注册表构建器
pub struct RegistryBuilder {
    compiler: RuleCompiler,
    types: HashMap<String, RecordTypeRules>,
    /// 首次出现的顺序
    order: Vec<String>,
}

impl RegistryBuilder {
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            compiler: RuleCompiler::new(Arc::new(capabilities)),
            types: HashMap::new(),
            order: Vec::new(),
        }
    }

    fn entry(&mut self, record_type: &str) -> &mut RecordTypeRules {
        if !self.types.contains_key(record_type) {
            self.order.push(record_type.to_string());
        }
        self.types
            .entry(record_type.to_string())
            .or_insert_with(|| RecordTypeRules::new(record_type))
    }

    /// 声明记录类型的属性
    ///
    /// 内置守卫 `<attr>?` 与 `<attr>_changed?` 只对已声明的属性可用，
    /// 因此应在注册规则之前调用。重复调用会追加新属性。
    pub fn define<I, S>(&mut self, record_type: &str, attributes: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = self.entry(record_type);
        for attr in attributes {
            let attr = attr.into();
            if !entry.attributes.contains(&attr) {
                entry.attributes.push(attr);
            }
        }
        self
    }

    /// 注册一条校验规则
    #[instrument(skip(self, rule), fields(kind = rule.kind.name()))]
    pub fn register_rule(&mut self, record_type: &str, rule: ValidationRule) -> Result<()> {
        let attributes = self.entry(record_type).attributes.clone();
        let index = self.entry(record_type).rules.len();
        let path = format!("{}.validations[{}]", record_type, index);

        let compiled = self.compiler.compile_rule(rule, &attributes, &path)?;
        self.entry(record_type).rules.push(compiled);

        debug!(path = %path, "校验规则已注册");
        Ok(())
    }

    /// 注册一个回调
    #[instrument(skip(self, callback), fields(trigger = %callback.trigger, action = %callback.action))]
    pub fn register_callback(&mut self, record_type: &str, callback: CallbackDef) -> Result<()> {
        let attributes = self.entry(record_type).attributes.clone();
        let index = self.entry(record_type).callbacks.len();
        let path = format!("{}.callbacks[{}]", record_type, index);

        let compiled = self.compiler.compile_callback(callback, &attributes, &path)?;
        self.entry(record_type).callbacks.push(compiled);

        debug!(path = %path, "回调已注册");
        Ok(())
    }

    /// 批量注册一个记录类型的完整定义
    pub fn register_type(&mut self, definition: RecordTypeDefinition) -> Result<()> {
        let RecordTypeDefinition {
            name,
            attributes,
            validations,
            callbacks,
        } = definition;

        if name.is_empty() {
            return Err(EngineError::config("记录类型名不能为空"));
        }

        self.define(&name, attributes);
        for rule in validations {
            self.register_rule(&name, rule)?;
        }
        for callback in callbacks {
            self.register_callback(&name, callback)?;
        }
        Ok(())
    }

    /// 加载声明式定义文档，返回涉及的记录类型名
    #[instrument(skip(self, document), fields(types = document.record_types.len()))]
    pub fn load_definitions(&mut self, document: DefinitionDocument) -> Result<Vec<String>> {
        let mut loaded = Vec::with_capacity(document.record_types.len());
        for definition in document.record_types {
            let name = definition.name.clone();
            self.register_type(definition)?;
            loaded.push(name);
        }

        info!(count = loaded.len(), "规则定义已加载");
        Ok(loaded)
    }

    /// 从 JSON 字符串加载定义文档
    pub fn load_from_json(&mut self, json: &str) -> Result<Vec<String>> {
        let document: DefinitionDocument = serde_json::from_str(json)?;
        self.load_definitions(document)
    }

    pub fn build(self) -> Registry {
        let Self { mut types, order, .. } = self;
        let types: Vec<Arc<RecordTypeRules>> = order
            .iter()
            .filter_map(|name| types.remove(name))
            .map(Arc::new)
            .collect();

        let registry = Registry {
            index: types
                .iter()
                .enumerate()
                .map(|(i, t)| (t.name.clone(), i))
                .collect(),
            types,
        };

        let stats = registry.stats();
        info!(
            record_types = stats.record_types,
            rules = stats.rules,
            callbacks = stats.callbacks,
            "规则注册表已构建"
        );
        registry
    }
}

/// 只读注册表
#[derive(Debug, Clone, Default)]
pub struct Registry {
    types: Vec<Arc<RecordTypeRules>>,
    index: HashMap<String, usize>,
}

impl Registry {
    pub fn builder(capabilities: Capabilities) -> RegistryBuilder {
        RegistryBuilder::new(capabilities)
    }

    /// 获取记录类型的规则
    pub fn get(&self, record_type: &str) -> Result<&RecordTypeRules> {
        self.index
            .get(record_type)
            .map(|&i| self.types[i].as_ref())
            .ok_or_else(|| EngineError::RecordTypeNotFound(record_type.to_string()))
    }

    pub fn contains(&self, record_type: &str) -> bool {
        self.index.contains_key(record_type)
    }

    /// 记录类型名，按首次注册顺序
    pub fn type_names(&self) -> Vec<&str> {
        self.types.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// 是否有任何类型使用 uniqueness 规则
    pub fn uses_uniqueness(&self) -> bool {
        self.types.iter().any(|t| t.uses_uniqueness())
    }

    pub fn stats(&self) -> RegistryStats {
        let types: Vec<TypeStats> = self
            .types
            .iter()
            .map(|t| TypeStats {
                name: t.name.clone(),
                attributes: t.attributes.len(),
                rules: t.rules.len(),
                callbacks: t.callbacks.len(),
            })
            .collect();

        RegistryStats {
            record_types: types.len(),
            rules: types.iter().map(|t| t.rules).sum(),
            strict_rules: self
                .types
                .iter()
                .flat_map(|t| t.rules.iter())
                .filter(|r| r.is_strict())
                .count(),
            callbacks: types.iter().map(|t| t.callbacks).sum(),
            types,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::Flow;
    use crate::models::LengthOptions;
    use crate::record::Record;

    fn capabilities() -> Capabilities {
        Capabilities::builder()
            .guard("paid_with_card?", |r: &Record| r.get_str("payment_type") == Some("card"))
            .action("calculate_shipping_charges", |_ctx| Ok(Flow::Continue))
            .build()
    }

    fn sample_definitions() -> &'static str {
        r#"
        {
            "record_types": [
                {
                    "name": "Order",
                    "attributes": ["card_number", "payment_type", "shipping"],
                    "validations": [
                        {"fields": "card_number", "kind": {"type": "presence"}, "if": "paid_with_card?"},
                        {"fields": "card_number", "kind": {"type": "length", "is": 16}, "allow_blank": true}
                    ],
                    "callbacks": [
                        {"trigger": "before_save", "action": "calculate_shipping_charges"}
                    ]
                },
                {
                    "name": "Coffee",
                    "attributes": ["size"],
                    "validations": [
                        {
                            "fields": "size",
                            "kind": {"type": "inclusion", "in": ["small", "medium", "large"]},
                            "message": "%{value} is not a valid size"
                        }
                    ]
                }
            ]
        }
        "#
    }

    #[test]
    fn test_load_from_json() {
        let mut builder = RegistryBuilder::new(capabilities());
        let loaded = builder.load_from_json(sample_definitions()).unwrap();
        assert_eq!(loaded, vec!["Order", "Coffee"]);

        let registry = builder.build();
        assert_eq!(registry.type_names(), vec!["Order", "Coffee"]);

        let order = registry.get("Order").unwrap();
        assert_eq!(order.rules.len(), 2);
        assert_eq!(order.rules[0].kind(), "presence");
        assert_eq!(order.rules[1].kind(), "length");
        assert_eq!(order.callbacks_for(&Trigger::BeforeSave).count(), 1);
        assert_eq!(order.callbacks_for(&Trigger::AfterSave).count(), 0);
    }

    #[test]
    fn test_registration_order_is_kept() {
        let mut builder = RegistryBuilder::new(Capabilities::default());
        builder.define("Player", ["name", "points"]);
        builder
            .register_rule("Player", ValidationRule::field("points", RuleKind::numericality()))
            .unwrap();
        builder
            .register_rule("Player", ValidationRule::field("name", RuleKind::Presence))
            .unwrap();
        builder
            .register_rule(
                "Player",
                ValidationRule::field("name", RuleKind::Length(LengthOptions::maximum(20))),
            )
            .unwrap();

        let registry = builder.build();
        let kinds: Vec<&str> = registry.get("Player").unwrap().rules.iter().map(|r| r.kind()).collect();
        assert_eq!(kinds, vec!["numericality", "presence", "length"]);
    }

    #[test]
    fn test_unknown_record_type() {
        let registry = RegistryBuilder::new(Capabilities::default()).build();
        let err = registry.get("Ghost").unwrap_err();
        assert_eq!(err.code(), "RECORD_TYPE_NOT_FOUND");
    }

    #[test]
    fn test_config_error_names_location() {
        let mut builder = RegistryBuilder::new(Capabilities::default());
        builder.define("Order", ["card_number"]);
        builder
            .register_rule("Order", ValidationRule::field("card_number", RuleKind::Presence))
            .unwrap();

        let err = builder
            .register_rule(
                "Order",
                ValidationRule::field("card_number", RuleKind::Presence).if_guard("paid_with_card?"),
            )
            .unwrap_err();

        assert_eq!(err.code(), "CONFIG_ERROR");
        assert!(err.to_string().contains("Order.validations[1]"));
        assert!(err.to_string().contains("paid_with_card?"));
    }

    #[test]
    fn test_malformed_document() {
        let mut builder = RegistryBuilder::new(Capabilities::default());
        let err = builder.load_from_json(r#"{"record_types": [{"name": "X", "validations": [{"kind": 1}]}]}"#);
        assert!(matches!(err, Err(EngineError::JsonError(_))));
    }

    #[test]
    fn test_stats() {
        let mut builder = RegistryBuilder::new(capabilities());
        builder.load_from_json(sample_definitions()).unwrap();
        builder.define("Account", ["token"]);
        builder
            .register_rule("Account", ValidationRule::field("token", RuleKind::uniqueness()).strict())
            .unwrap();

        let registry = builder.build();
        let stats = registry.stats();

        assert_eq!(stats.record_types, 3);
        assert_eq!(stats.rules, 4);
        assert_eq!(stats.strict_rules, 1);
        assert_eq!(stats.callbacks, 1);
        assert!(registry.uses_uniqueness());
        assert!(!registry.get("Coffee").unwrap().uses_uniqueness());
    }
}
