//! 校验错误集合
//!
//! 按字段分组的有序多值映射。保留插入顺序，不去重。

use crate::messages;
use serde::ser::{Serialize, SerializeMap, Serializer};

/// 记录级错误使用的伪字段名
pub const BASE: &str = "base";

/// 单条错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// 错误集合
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorSet {
    entries: Vec<FieldError>,
}

impl ErrorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条字段错误
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.entries.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// 追加一条记录级错误
    pub fn add_base(&mut self, message: impl Into<String>) {
        self.add(BASE, message);
    }

    /// 获取字段的所有错误消息（按插入顺序）
    pub fn get(&self, field: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.field == field)
            .map(|e| e.message.as_str())
            .collect()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.entries.iter().any(|e| e.field == field)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 错误总条数
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// 出错字段，按首次出现顺序
    pub fn fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = Vec::new();
        for entry in &self.entries {
            if !fields.contains(&entry.field.as_str()) {
                fields.push(&entry.field);
            }
        }
        fields
    }

    /// 按插入顺序遍历所有错误
    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.entries.iter()
    }

    /// 分组视图：[(field, [messages])]，字段按首次出现顺序
    pub fn grouped(&self) -> Vec<(&str, Vec<&str>)> {
        self.fields()
            .into_iter()
            .map(|field| (field, self.get(field)))
            .collect()
    }

    /// 完整消息，如 "Name must start with upper case"；base 错误原样输出
    pub fn full_messages(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| {
                if e.field == BASE {
                    e.message.clone()
                } else {
                    format!("{} {}", messages::humanize(&e.field), e.message)
                }
            })
            .collect()
    }

    pub fn extend(&mut self, other: ErrorSet) {
        self.entries.extend(other.entries);
    }

    /// 移除 `len` 之后追加的错误并返回（strict 规则用）
    pub(crate) fn split_off(&mut self, len: usize) -> Vec<FieldError> {
        self.entries.split_off(len.min(self.entries.len()))
    }
}

impl Serialize for ErrorSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let grouped = self.grouped();
        let mut map = serializer.serialize_map(Some(grouped.len()))?;
        for (field, messages) in grouped {
            map.serialize_entry(field, &messages)?;
        }
        map.end()
    }
}

impl<'a> IntoIterator for &'a ErrorSet {
    type Item = &'a FieldError;
    type IntoIter = std::slice::Iter<'a, FieldError>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_insertion_order_and_duplicates() {
        let mut errors = ErrorSet::new();
        errors.add("name", "can't be blank");
        errors.add_base("This person is evil");
        errors.add("name", "can't be blank");

        assert_eq!(errors.len(), 3);
        assert_eq!(errors.get("name"), vec!["can't be blank", "can't be blank"]);
        assert_eq!(errors.fields(), vec!["name", "base"]);
    }

    #[test]
    fn test_full_messages() {
        let mut errors = ErrorSet::new();
        errors.add("email_confirmation", "doesn't match Email");
        errors.add_base("Cannot add more than 5 books for this author");

        assert_eq!(
            errors.full_messages(),
            vec![
                "Email confirmation doesn't match Email".to_string(),
                "Cannot add more than 5 books for this author".to_string(),
            ]
        );
    }

    #[test]
    fn test_serialize_grouped() {
        let mut errors = ErrorSet::new();
        errors.add("points", "is not a number");
        errors.add("games_played", "must be an integer");
        errors.add("points", "must be greater than 0");

        let json = serde_json::to_string(&errors).unwrap();
        assert_eq!(
            json,
            r#"{"points":["is not a number","must be greater than 0"],"games_played":["must be an integer"]}"#
        );
    }

    #[test]
    fn test_split_off() {
        let mut errors = ErrorSet::new();
        errors.add("a", "1");
        errors.add("b", "2");
        errors.add("c", "3");

        let tail = errors.split_off(1);
        assert_eq!(tail.len(), 2);
        assert_eq!(errors.len(), 1);
        assert!(errors.split_off(10).is_empty());
    }
}
