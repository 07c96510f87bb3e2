//! 规则定义领域模型
//!
//! 校验规则与回调的可序列化定义。定义是静态的：在注册期编译，之后只读。

use crate::guards::Guard;
use crate::record::Record;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

/// 校验规则
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRule {
    /// 目标字段，为空时为记录级规则（错误记在 base 上）
    #[serde(default, deserialize_with = "one_or_many")]
    pub fields: Vec<String>,
    pub kind: RuleKind,
    #[serde(default, rename = "if", deserialize_with = "one_or_many")]
    pub if_guards: Vec<Guard>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub unless: Vec<Guard>,
    /// 激活上下文，为空时在所有上下文中运行
    #[serde(default, deserialize_with = "one_or_many")]
    pub on: Vec<String>,
    #[serde(default)]
    pub strict: bool,
    /// 覆盖默认消息模板
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub allow_nil: bool,
    #[serde(default)]
    pub allow_blank: bool,
}

impl ValidationRule {
    pub fn new<I, S>(fields: I, kind: RuleKind) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            kind,
            if_guards: Vec::new(),
            unless: Vec::new(),
            on: Vec::new(),
            strict: false,
            message: None,
            allow_nil: false,
            allow_blank: false,
        }
    }

    /// 单字段规则
    pub fn field(field: impl Into<String>, kind: RuleKind) -> Self {
        Self::new([field.into()], kind)
    }

    /// 记录级规则
    pub fn base(kind: RuleKind) -> Self {
        Self::new(Vec::<String>::new(), kind)
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    pub fn on(mut self, context: impl Into<String>) -> Self {
        self.on.push(context.into());
        self
    }

    pub fn if_guard(mut self, guard: impl Into<Guard>) -> Self {
        self.if_guards.push(guard.into());
        self
    }

    pub fn unless_guard(mut self, guard: impl Into<Guard>) -> Self {
        self.unless.push(guard.into());
        self
    }

    pub fn allow_nil(mut self) -> Self {
        self.allow_nil = true;
        self
    }

    pub fn allow_blank(mut self) -> Self {
        self.allow_blank = true;
        self
    }

    pub fn is_base(&self) -> bool {
        self.fields.is_empty()
    }

    /// 规则是否在给定上下文中激活
    pub fn applies_in(&self, context: &str) -> bool {
        self.on.is_empty() || self.on.iter().any(|c| c == context)
    }
}

/// 谓词类型及参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleKind {
    Presence,
    Absence,
    Uniqueness {
        #[serde(default, deserialize_with = "one_or_many")]
        scope: Vec<String>,
        #[serde(default = "default_true")]
        case_sensitive: bool,
    },
    Numericality(NumericalityOptions),
    Length(LengthOptions),
    Format {
        #[serde(default)]
        with: Option<String>,
        #[serde(default)]
        without: Option<String>,
    },
    Inclusion {
        #[serde(rename = "in")]
        values: Vec<Value>,
    },
    Exclusion {
        #[serde(rename = "in")]
        values: Vec<Value>,
    },
    Comparison(ComparisonOptions),
    Acceptance {
        #[serde(default = "default_accept", deserialize_with = "one_or_many")]
        accept: Vec<Value>,
    },
    Confirmation {
        #[serde(default = "default_true")]
        case_sensitive: bool,
    },
    /// 能力表中的命名校验器，接收整条记录
    Custom {
        validator: String,
        #[serde(default)]
        options: Value,
    },
    /// 能力表中的命名字段块，每个目标字段调用一次
    Each { block: String },
}

impl RuleKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Presence => "presence",
            Self::Absence => "absence",
            Self::Uniqueness { .. } => "uniqueness",
            Self::Numericality(_) => "numericality",
            Self::Length(_) => "length",
            Self::Format { .. } => "format",
            Self::Inclusion { .. } => "inclusion",
            Self::Exclusion { .. } => "exclusion",
            Self::Comparison(_) => "comparison",
            Self::Acceptance { .. } => "acceptance",
            Self::Confirmation { .. } => "confirmation",
            Self::Custom { .. } => "custom",
            Self::Each { .. } => "each",
        }
    }

    pub fn uniqueness() -> Self {
        Self::Uniqueness {
            scope: Vec::new(),
            case_sensitive: true,
        }
    }

    pub fn numericality() -> Self {
        Self::Numericality(NumericalityOptions::default())
    }

    pub fn format(pattern: impl Into<String>) -> Self {
        Self::Format {
            with: Some(pattern.into()),
            without: None,
        }
    }

    pub fn inclusion<I: IntoIterator<Item = V>, V: Into<Value>>(values: I) -> Self {
        Self::Inclusion {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn exclusion<I: IntoIterator<Item = V>, V: Into<Value>>(values: I) -> Self {
        Self::Exclusion {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// 默认接受 "1" 与 true
    pub fn acceptance() -> Self {
        Self::Acceptance {
            accept: default_accept(),
        }
    }

    pub fn accept<I: IntoIterator<Item = V>, V: Into<Value>>(values: I) -> Self {
        Self::Acceptance {
            accept: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn confirmation() -> Self {
        Self::Confirmation {
            case_sensitive: true,
        }
    }

    pub fn custom(validator: impl Into<String>) -> Self {
        Self::Custom {
            validator: validator.into(),
            options: Value::Null,
        }
    }

    pub fn each(block: impl Into<String>) -> Self {
        Self::Each {
            block: block.into(),
        }
    }
}

/// 数值校验参数
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NumericalityOptions {
    pub only_integer: bool,
    pub greater_than: Option<f64>,
    pub greater_than_or_equal_to: Option<f64>,
    pub equal_to: Option<f64>,
    pub less_than: Option<f64>,
    pub less_than_or_equal_to: Option<f64>,
    pub other_than: Option<f64>,
    pub odd: bool,
    pub even: bool,
}

/// 长度校验参数，`in` 为闭区间 [min, max]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LengthOptions {
    pub minimum: Option<usize>,
    pub maximum: Option<usize>,
    pub is: Option<usize>,
    #[serde(rename = "in")]
    pub within: Option<(usize, usize)>,
}

impl LengthOptions {
    pub fn within(min: usize, max: usize) -> Self {
        Self {
            within: Some((min, max)),
            ..Default::default()
        }
    }

    pub fn maximum(max: usize) -> Self {
        Self {
            maximum: Some(max),
            ..Default::default()
        }
    }

    pub fn is(len: usize) -> Self {
        Self {
            is: Some(len),
            ..Default::default()
        }
    }

    /// 合并 `in` 后的有效下界
    pub fn effective_minimum(&self) -> Option<usize> {
        self.within.map(|(min, _)| min).or(self.minimum)
    }

    /// 合并 `in` 后的有效上界
    pub fn effective_maximum(&self) -> Option<usize> {
        self.within.map(|(_, max)| max).or(self.maximum)
    }
}

/// 比较操作数：字面量或另一字段的当前值
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Operand {
    Field { field: String },
    Literal(Value),
}

impl Operand {
    pub fn field(name: impl Into<String>) -> Self {
        Self::Field { field: name.into() }
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }
}

/// 比较校验参数
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparisonOptions {
    pub greater_than: Option<Operand>,
    pub greater_than_or_equal_to: Option<Operand>,
    pub equal_to: Option<Operand>,
    pub less_than: Option<Operand>,
    pub less_than_or_equal_to: Option<Operand>,
    pub other_than: Option<Operand>,
}

impl ComparisonOptions {
    /// 按固定顺序列出已配置的关系
    pub fn relations(&self) -> Vec<(Relation, &Operand)> {
        [
            (Relation::GreaterThan, &self.greater_than),
            (Relation::GreaterThanOrEqualTo, &self.greater_than_or_equal_to),
            (Relation::EqualTo, &self.equal_to),
            (Relation::LessThan, &self.less_than),
            (Relation::LessThanOrEqualTo, &self.less_than_or_equal_to),
            (Relation::OtherThan, &self.other_than),
        ]
        .into_iter()
        .filter_map(|(relation, operand)| operand.as_ref().map(|o| (relation, o)))
        .collect()
    }
}

/// 比较关系
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    GreaterThan,
    GreaterThanOrEqualTo,
    EqualTo,
    LessThan,
    LessThanOrEqualTo,
    OtherThan,
}

impl Relation {
    pub fn holds(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Self::GreaterThan => ordering == Greater,
            Self::GreaterThanOrEqualTo => ordering != Less,
            Self::EqualTo => ordering == Equal,
            Self::LessThan => ordering == Less,
            Self::LessThanOrEqualTo => ordering != Greater,
            Self::OtherThan => ordering != Equal,
        }
    }
}

/// 回调定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackDef {
    pub trigger: Trigger,
    /// 能力表中的回调动作名
    pub action: String,
    #[serde(default, rename = "if", deserialize_with = "one_or_many")]
    pub if_guards: Vec<Guard>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub unless: Vec<Guard>,
}

impl CallbackDef {
    pub fn new(trigger: Trigger, action: impl Into<String>) -> Self {
        Self {
            trigger,
            action: action.into(),
            if_guards: Vec::new(),
            unless: Vec::new(),
        }
    }

    pub fn if_guard(mut self, guard: impl Into<Guard>) -> Self {
        self.if_guards.push(guard.into());
        self
    }

    pub fn unless_guard(mut self, guard: impl Into<Guard>) -> Self {
        self.unless.push(guard.into());
        self
    }
}

/// 回调触发点
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Trigger {
    BeforeValidation,
    AfterValidation,
    BeforeSave,
    AfterSave,
    BeforeCreate,
    AfterCreate,
    BeforeUpdate,
    AfterUpdate,
    BeforeDestroy,
    AfterDestroy,
    AfterCommit,
    /// 关联集合新增前，如 `before_add:books`
    BeforeAdd(String),
    AfterAdd(String),
}

impl Trigger {
    /// before 类触发点的动作可以中止生命周期
    pub fn is_before(&self) -> bool {
        matches!(
            self,
            Self::BeforeValidation
                | Self::BeforeSave
                | Self::BeforeCreate
                | Self::BeforeUpdate
                | Self::BeforeDestroy
                | Self::BeforeAdd(_)
        )
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BeforeValidation => "before_validation",
            Self::AfterValidation => "after_validation",
            Self::BeforeSave => "before_save",
            Self::AfterSave => "after_save",
            Self::BeforeCreate => "before_create",
            Self::AfterCreate => "after_create",
            Self::BeforeUpdate => "before_update",
            Self::AfterUpdate => "after_update",
            Self::BeforeDestroy => "before_destroy",
            Self::AfterDestroy => "after_destroy",
            Self::AfterCommit => "after_commit",
            Self::BeforeAdd(assoc) => return write!(f, "before_add:{}", assoc),
            Self::AfterAdd(assoc) => return write!(f, "after_add:{}", assoc),
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Trigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trigger = match s {
            "before_validation" => Self::BeforeValidation,
            "after_validation" => Self::AfterValidation,
            "before_save" => Self::BeforeSave,
            "after_save" => Self::AfterSave,
            "before_create" => Self::BeforeCreate,
            "after_create" => Self::AfterCreate,
            "before_update" => Self::BeforeUpdate,
            "after_update" => Self::AfterUpdate,
            "before_destroy" => Self::BeforeDestroy,
            "after_destroy" => Self::AfterDestroy,
            "after_commit" => Self::AfterCommit,
            other => match other.split_once(':') {
                Some(("before_add", assoc)) if !assoc.is_empty() => Self::BeforeAdd(assoc.to_string()),
                Some(("after_add", assoc)) if !assoc.is_empty() => Self::AfterAdd(assoc.to_string()),
                _ => return Err(format!("未知的回调触发点: {}", other)),
            },
        };
        Ok(trigger)
    }
}

impl TryFrom<String> for Trigger {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Trigger> for String {
    fn from(trigger: Trigger) -> Self {
        trigger.to_string()
    }
}

/// 记录类型定义
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordTypeDefinition {
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<String>,
    #[serde(default)]
    pub validations: Vec<ValidationRule>,
    #[serde(default)]
    pub callbacks: Vec<CallbackDef>,
}

/// 声明式定义文档
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefinitionDocument {
    pub record_types: Vec<RecordTypeDefinition>,
}

/// 校验上下文
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ValidationContext {
    /// 新记录为 create，已持久化记录为 update
    #[default]
    Default,
    Create,
    Update,
    Named(String),
}

impl ValidationContext {
    pub fn named(name: impl Into<String>) -> Self {
        match name.into().as_str() {
            "create" => Self::Create,
            "update" => Self::Update,
            other => Self::Named(other.to_string()),
        }
    }

    /// 针对记录解析出具体的上下文名
    pub fn resolve(&self, record: &Record) -> Cow<'_, str> {
        match self {
            Self::Default if record.is_new_record() => Cow::Borrowed("create"),
            Self::Default => Cow::Borrowed("update"),
            Self::Create => Cow::Borrowed("create"),
            Self::Update => Cow::Borrowed("update"),
            Self::Named(name) => Cow::Borrowed(name.as_str()),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_accept() -> Vec<Value> {
    vec![Value::String("1".to_string()), Value::Bool(true)]
}

/// 同时接受单个值和数组
fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        Many(Vec<T>),
        One(T),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::Many(items) => items,
        OneOrMany::One(item) => vec![item],
    })
}
