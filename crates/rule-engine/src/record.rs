//! 记录快照
//!
//! 被校验的实体：字段名到 JSON 值的映射，附带持久化状态、变更集、关联集合和错误集合。
//! 在一次评估过程中可变，回调可以改写字段。

use crate::error::{EngineError, Result};
use crate::error_set::ErrorSet;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    record_type: String,
    id: Option<String>,
    data: Map<String, Value>,
    persisted: bool,
    destroyed: bool,
    changed: BTreeSet<String>,
    associations: BTreeMap<String, Vec<Record>>,
    errors: ErrorSet,
}

impl Record {
    /// 创建新记录，初始字段全部视为已变更
    pub fn new(record_type: impl Into<String>, data: Map<String, Value>) -> Self {
        let changed = data.keys().cloned().collect();
        Self {
            record_type: record_type.into(),
            id: None,
            data,
            persisted: false,
            destroyed: false,
            changed,
            associations: BTreeMap::new(),
            errors: ErrorSet::new(),
        }
    }

    /// 从 JSON 对象创建新记录
    pub fn from_json(record_type: impl Into<String>, data: Value) -> Result<Self> {
        match data {
            Value::Object(map) => Ok(Self::new(record_type, map)),
            other => Err(EngineError::InvalidRecord(format!(
                "记录数据必须是 JSON 对象, 实际为 {}",
                type_name(&other)
            ))),
        }
    }

    /// 创建已持久化的记录（无变更）
    pub fn persisted(record_type: impl Into<String>, id: impl Into<String>, data: Value) -> Result<Self> {
        let mut record = Self::from_json(record_type, data)?;
        record.id = Some(id.into());
        record.persisted = true;
        record.changed.clear();
        Ok(record)
    }

    pub fn record_type(&self) -> &str {
        &self.record_type
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted && !self.destroyed
    }

    pub fn is_new_record(&self) -> bool {
        !self.persisted
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// 获取字段值（支持点号分隔的路径，如 "market.retail" 或 "items.0.name"）
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.data.get(parts.next()?)?;

        for part in parts {
            match current {
                Value::Object(map) => {
                    current = map.get(part)?;
                }
                Value::Array(arr) => {
                    let index: usize = part.parse().ok()?;
                    current = arr.get(index)?;
                }
                _ => return None,
            }
        }

        Some(current)
    }

    /// 获取字符串字段
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    /// 设置顶层字段，值发生变化时记入变更集
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        let field = field.into();
        let value = value.into();
        if self.data.get(&field) != Some(&value) {
            self.changed.insert(field.clone());
        }
        self.data.insert(field, value);
    }

    pub fn is_changed(&self, field: &str) -> bool {
        self.changed.contains(field)
    }

    pub fn changed_fields(&self) -> impl Iterator<Item = &str> {
        self.changed.iter().map(String::as_str)
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    /// 输出为 JSON（包含 id）
    pub fn to_json(&self) -> Value {
        let mut map = self.data.clone();
        if let Some(id) = &self.id {
            map.insert("id".to_string(), Value::String(id.clone()));
        }
        Value::Object(map)
    }

    pub fn association(&self, name: &str) -> &[Record] {
        self.associations.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn association_count(&self, name: &str) -> usize {
        self.association(name).len()
    }

    pub fn push_association(&mut self, name: impl Into<String>, item: Record) {
        self.associations.entry(name.into()).or_default().push(item);
    }

    /// 用新值替换关联集合中最后一个条目
    pub(crate) fn replace_last_association(&mut self, name: &str, item: Record) {
        if let Some(last) = self.associations.get_mut(name).and_then(|items| items.last_mut()) {
            *last = item;
        }
    }

    pub fn errors(&self) -> &ErrorSet {
        &self.errors
    }

    pub fn errors_mut(&mut self) -> &mut ErrorSet {
        &mut self.errors
    }

    pub(crate) fn replace_errors(&mut self, errors: ErrorSet) -> ErrorSet {
        std::mem::replace(&mut self.errors, errors)
    }

    /// 持久化成功后调用；变更集保留到 after_save 之后由生命周期清空
    pub(crate) fn mark_persisted(&mut self, id: String) {
        self.id = Some(id);
        self.persisted = true;
    }

    pub(crate) fn clear_changes(&mut self) {
        self.changed.clear();
    }

    pub(crate) fn mark_destroyed(&mut self) {
        self.destroyed = true;
    }
}

/// 判断值是否为空：不存在、null、false、空白字符串、空数组、空对象
pub fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(arr)) => arr.is_empty(),
        Some(Value::Object(obj)) => obj.is_empty(),
        _ => false,
    }
}

/// 属性查询语义：空值、false、数值 0 均为假
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        other => !is_blank(other),
    }
}

/// 获取值的类型名称
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
