//! 内存存储
//!
//! 使用 DashMap 提供线程安全的持久化与唯一性查询参考实现，供测试和命令行使用。
//! 可选的唯一索引在插入时拒绝重复值，模拟数据库约束。

use crate::collaborators::{CollaboratorError, CollaboratorResult, Persistence, UniquenessLookup, UniquenessQuery};
use crate::record::Record;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// 已存储的行
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub id: String,
    pub data: Map<String, Value>,
}

impl StoredRow {
    pub fn to_record(&self, record_type: &str) -> Record {
        // data 总是对象，from_json 不会失败
        Record::persisted(record_type, self.id.clone(), Value::Object(self.data.clone()))
            .unwrap_or_else(|_| Record::new(record_type, Map::new()))
    }
}

/// 内存存储
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<DashMap<String, Vec<StoredRow>>>,
    unique_indexes: Arc<DashMap<String, Vec<Vec<String>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 声明唯一索引（字段组合）
    pub fn with_unique_index<I, S>(self, record_type: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unique_indexes
            .entry(record_type.to_string())
            .or_default()
            .push(fields.into_iter().map(Into::into).collect());
        self
    }

    /// 直接写入一行（跳过校验与约束），返回 id
    pub fn seed(&self, record_type: &str, data: Value) -> String {
        let id = Uuid::new_v4().to_string();
        let data = match data {
            Value::Object(map) => map,
            other => {
                warn!(record_type, value = %other, "种子数据不是对象，按空对象写入");
                Map::new()
            }
        };
        self.tables
            .entry(record_type.to_string())
            .or_default()
            .push(StoredRow { id: id.clone(), data });
        id
    }

    pub fn count(&self, record_type: &str) -> usize {
        self.tables.get(record_type).map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn rows(&self, record_type: &str) -> Vec<StoredRow> {
        self.tables
            .get(record_type)
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }

    pub fn find(&self, record_type: &str, id: &str) -> Option<Record> {
        self.tables.get(record_type).and_then(|rows| {
            rows.iter()
                .find(|row| row.id == id)
                .map(|row| row.to_record(record_type))
        })
    }

    fn check_unique(&self, record: &Record, rows: &[StoredRow]) -> CollaboratorResult<()> {
        let Some(indexes) = self.unique_indexes.get(record.record_type()) else {
            return Ok(());
        };

        for fields in indexes.iter() {
            let conflict = rows.iter().any(|row| {
                Some(row.id.as_str()) != record.id()
                    && fields
                        .iter()
                        .all(|f| row.data.get(f) == record.get(f) && record.get(f).is_some())
            });
            if conflict {
                return Err(CollaboratorError::Conflict(format!(
                    "{}({})",
                    record.record_type(),
                    fields.join(", ")
                )));
            }
        }
        Ok(())
    }
}

impl Persistence for MemoryStore {
    #[instrument(skip(self, record), fields(record_type = %record.record_type()))]
    fn insert(&self, record: &Record) -> CollaboratorResult<String> {
        let mut rows = self.tables.entry(record.record_type().to_string()).or_default();
        self.check_unique(record, &rows)?;

        let id = record
            .id()
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        rows.push(StoredRow {
            id: id.clone(),
            data: record.data().clone(),
        });

        debug!(id = %id, "记录已插入");
        Ok(id)
    }

    #[instrument(skip(self, record), fields(record_type = %record.record_type()))]
    fn update(&self, record: &Record) -> CollaboratorResult<()> {
        let id = record
            .id()
            .ok_or_else(|| CollaboratorError::NotFound("记录没有 id".to_string()))?;
        let mut rows = self
            .tables
            .get_mut(record.record_type())
            .ok_or_else(|| CollaboratorError::NotFound(id.to_string()))?;
        self.check_unique(record, &rows)?;

        let row = rows
            .iter_mut()
            .find(|row| row.id == id)
            .ok_or_else(|| CollaboratorError::NotFound(id.to_string()))?;
        row.data = record.data().clone();

        debug!(id = %id, "记录已更新");
        Ok(())
    }

    #[instrument(skip(self, record), fields(record_type = %record.record_type()))]
    fn delete(&self, record: &Record) -> CollaboratorResult<()> {
        let id = record
            .id()
            .ok_or_else(|| CollaboratorError::NotFound("记录没有 id".to_string()))?;
        let mut rows = self
            .tables
            .get_mut(record.record_type())
            .ok_or_else(|| CollaboratorError::NotFound(id.to_string()))?;

        let before = rows.len();
        rows.retain(|row| row.id != id);
        if rows.len() == before {
            return Err(CollaboratorError::NotFound(id.to_string()));
        }

        debug!(id = %id, "记录已删除");
        Ok(())
    }
}

impl UniquenessLookup for MemoryStore {
    fn exists(&self, query: &UniquenessQuery) -> CollaboratorResult<bool> {
        let Some(rows) = self.tables.get(&query.record_type) else {
            return Ok(false);
        };

        let found = rows.iter().any(|row| {
            query.exclude_id.as_deref() != Some(row.id.as_str())
                && values_match(
                    row.data.get(&query.field).unwrap_or(&Value::Null),
                    &query.value,
                    query.case_sensitive,
                )
                && query
                    .scope
                    .iter()
                    .all(|(field, value)| row.data.get(field).unwrap_or(&Value::Null) == value)
        });

        Ok(found)
    }
}

fn values_match(stored: &Value, candidate: &Value, case_sensitive: bool) -> bool {
    match (stored, candidate) {
        (Value::String(a), Value::String(b)) if !case_sensitive => a.to_lowercase() == b.to_lowercase(),
        _ => stored == candidate,
    }
}
