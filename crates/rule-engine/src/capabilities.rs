//! 能力表
//!
//! 守卫、自定义校验器、字段块和回调动作都通过名字在注册期解析，
//! 不依赖运行时的方法查找。构建完成后只读，可在线程间共享。

use crate::callbacks::{CallbackContext, Flow};
use crate::error_set::ErrorSet;
use crate::guards::GuardFn;
use crate::record::Record;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// 自定义校验器可见的上下文
pub struct ValidatorContext<'a> {
    pub record: &'a Record,
    /// 规则的目标字段（可能为空）
    pub fields: &'a [String],
    /// 规则携带的参数
    pub options: &'a Value,
}

/// 记录级自定义校验器
///
/// 直接向 `errors` 添加零条或多条错误；返回 Err 表示校验器自身异常，会终止本次评估。
pub trait RecordValidator: Send + Sync {
    fn validate(&self, ctx: &ValidatorContext<'_>, errors: &mut ErrorSet) -> anyhow::Result<()>;
}

struct FnValidator<F>(F);

impl<F> RecordValidator for FnValidator<F>
where
    F: Fn(&ValidatorContext<'_>, &mut ErrorSet) -> anyhow::Result<()> + Send + Sync,
{
    fn validate(&self, ctx: &ValidatorContext<'_>, errors: &mut ErrorSet) -> anyhow::Result<()> {
        (self.0)(ctx, errors)
    }
}

/// 字段块：(record, field, value, errors)
pub type FieldBlock = Arc<dyn Fn(&Record, &str, Option<&Value>, &mut ErrorSet) + Send + Sync>;

/// 回调动作
pub type CallbackFn = Arc<dyn Fn(&mut CallbackContext<'_>) -> anyhow::Result<Flow> + Send + Sync>;

/// 能力表
#[derive(Clone, Default)]
pub struct Capabilities {
    guards: HashMap<String, GuardFn>,
    validators: HashMap<String, Arc<dyn RecordValidator>>,
    blocks: HashMap<String, FieldBlock>,
    actions: HashMap<String, CallbackFn>,
}

impl Capabilities {
    pub fn builder() -> CapabilitiesBuilder {
        CapabilitiesBuilder::default()
    }

    pub fn guard(&self, name: &str) -> Option<GuardFn> {
        self.guards.get(name).cloned()
    }

    pub fn validator(&self, name: &str) -> Option<Arc<dyn RecordValidator>> {
        self.validators.get(name).cloned()
    }

    pub fn block(&self, name: &str) -> Option<FieldBlock> {
        self.blocks.get(name).cloned()
    }

    pub fn action(&self, name: &str) -> Option<CallbackFn> {
        self.actions.get(name).cloned()
    }

    /// 各类能力的数量：(guards, validators, blocks, actions)
    pub fn counts(&self) -> (usize, usize, usize, usize) {
        (
            self.guards.len(),
            self.validators.len(),
            self.blocks.len(),
            self.actions.len(),
        )
    }
}

/// 能力表构建器
#[derive(Default)]
pub struct CapabilitiesBuilder {
    inner: Capabilities,
}

impl CapabilitiesBuilder {
    pub fn guard<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        self.inner.guards.insert(name.into(), Arc::new(f));
        self
    }

    pub fn validator(mut self, name: impl Into<String>, validator: impl RecordValidator + 'static) -> Self {
        self.inner.validators.insert(name.into(), Arc::new(validator));
        self
    }

    pub fn validator_fn<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ValidatorContext<'_>, &mut ErrorSet) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.validator(name, FnValidator(f))
    }

    pub fn block<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Record, &str, Option<&Value>, &mut ErrorSet) + Send + Sync + 'static,
    {
        self.inner.blocks.insert(name.into(), Arc::new(f));
        self
    }

    pub fn action<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut CallbackContext<'_>) -> anyhow::Result<Flow> + Send + Sync + 'static,
    {
        self.inner.actions.insert(name.into(), Arc::new(f));
        self
    }

    /// 合并另一张能力表，同名条目以后者为准
    pub fn merge(mut self, other: Capabilities) -> Self {
        self.inner.guards.extend(other.guards);
        self.inner.validators.extend(other.validators);
        self.inner.blocks.extend(other.blocks);
        self.inner.actions.extend(other.actions);
        self
    }

    pub fn build(self) -> Capabilities {
        self.inner
    }
}
