//! 命令执行器
//!
//! 负责执行各 CLI 子命令的具体逻辑，输出写入调用方提供的 writer。

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use record_shared::config::EngineSettings;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::catalog;
use crate::engine::RuleEngine;
use crate::error::EngineError;
use crate::lifecycle::Lifecycle;
use crate::memory_store::MemoryStore;
use crate::models::ValidationContext;
use crate::record::Record;
use crate::registry::Registry;

/// 记录无效或生命周期被中止
pub const EXIT_INVALID: u8 = 1;
/// strict 规则失败
pub const EXIT_STRICT: u8 = 2;

/// 命令执行器
pub struct CommandRunner {
    settings: EngineSettings,
}

impl CommandRunner {
    /// 创建命令执行器，命令行指定的定义文件优先于配置
    pub fn new(mut settings: EngineSettings, definitions: Option<PathBuf>) -> Self {
        if let Some(path) = definitions {
            settings.definitions_path = Some(path.to_string_lossy().into_owned());
        }
        Self { settings }
    }

    /// 加载注册表：有定义文件时使用定义文件，否则使用内置模型目录
    pub fn registry(&self) -> Result<Registry> {
        match &self.settings.definitions_path {
            Some(path) => {
                let json = fs::read_to_string(path).with_context(|| format!("无法读取规则定义文件 {}", path))?;
                let mut builder = Registry::builder(catalog::capabilities());
                let loaded = builder.load_from_json(&json)?;
                info!(path = %path, types = loaded.len(), "已加载规则定义文件");
                Ok(builder.build())
            }
            None => Ok(catalog::registry()?),
        }
    }

    /// 执行 validate 命令，返回退出码
    pub fn run_validate(
        &self,
        record_type: &str,
        record_path: &Path,
        context: Option<&str>,
        trace: bool,
        seed: Option<&Path>,
        out: &mut impl Write,
    ) -> Result<u8> {
        let store = load_store(seed)?;
        let engine = RuleEngine::builder(Arc::new(self.registry()?))
            .lookup(Arc::new(store))
            .trace(trace || self.settings.trace_enabled)
            .build()?;

        let mut record = load_record(record_type, record_path)?;
        let context = self.context(context);

        match engine.evaluate_detailed(&mut record, &context) {
            Ok(evaluation) => {
                let valid = evaluation.is_valid();
                write_json(
                    out,
                    &json!({
                        "record_type": record_type,
                        "valid": valid,
                        "evaluation": evaluation,
                    }),
                )?;
                Ok(if valid { 0 } else { EXIT_INVALID })
            }
            Err(err @ EngineError::StrictValidation { .. }) => {
                write_json(out, &strict_report(&err))?;
                Ok(EXIT_STRICT)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// 执行 save 命令，返回退出码
    pub fn run_save(
        &self,
        record_type: &str,
        record_path: &Path,
        context: Option<&str>,
        seed: Option<&Path>,
        out: &mut impl Write,
    ) -> Result<u8> {
        let store = Arc::new(load_store(seed)?);
        let engine = RuleEngine::builder(Arc::new(self.registry()?))
            .lookup(store.clone())
            .trace(self.settings.trace_enabled)
            .build()?;
        let lifecycle = Lifecycle::builder(Arc::new(engine), store.clone()).build();

        let mut record = load_record(record_type, record_path)?;
        let context = self.context(context);

        match lifecycle.save_with_context(&mut record, &context) {
            Ok(report) => {
                let committed = report.is_committed();
                write_json(
                    out,
                    &json!({
                        "record": record.to_json(),
                        "report": report,
                        "stored": store.count(record_type),
                    }),
                )?;
                Ok(if committed { 0 } else { EXIT_INVALID })
            }
            Err(err @ EngineError::StrictValidation { .. }) => {
                write_json(out, &strict_report(&err))?;
                Ok(EXIT_STRICT)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// 执行 list-types 命令
    pub fn run_list_types(&self, out: &mut impl Write) -> Result<u8> {
        let registry = self.registry()?;
        write_json(out, &registry.stats())?;
        Ok(0)
    }

    fn context(&self, explicit: Option<&str>) -> ValidationContext {
        explicit
            .or(self.settings.default_context.as_deref())
            .map(ValidationContext::named)
            .unwrap_or_default()
    }
}

/// 读取记录文件，带 `id` 的记录按已持久化处理
fn load_record(record_type: &str, path: &Path) -> Result<Record> {
    let raw = fs::read_to_string(path).with_context(|| format!("无法读取记录文件 {}", path.display()))?;
    let mut data: Value = serde_json::from_str(&raw).with_context(|| format!("记录文件不是有效 JSON: {}", path.display()))?;

    let id = match data.as_object_mut().and_then(|map| map.remove("id")) {
        Some(Value::String(id)) => Some(id),
        Some(Value::Number(id)) => Some(id.to_string()),
        Some(Value::Null) | None => None,
        Some(other) => bail!("记录 id 必须是字符串或数字，实际为 {}", other),
    };

    let record = match id {
        Some(id) => Record::persisted(record_type, id, data)?,
        None => Record::from_json(record_type, data)?,
    };
    Ok(record)
}

/// 按预置数据文件填充内存存储
fn load_store(seed: Option<&Path>) -> Result<MemoryStore> {
    let store = MemoryStore::new();
    let Some(path) = seed else {
        return Ok(store);
    };

    let raw = fs::read_to_string(path).with_context(|| format!("无法读取预置数据 {}", path.display()))?;
    let tables: serde_json::Map<String, Value> =
        serde_json::from_str(&raw).with_context(|| format!("预置数据格式无效: {}", path.display()))?;

    for (record_type, rows) in tables {
        let Value::Array(rows) = rows else {
            warn!(record_type = %record_type, "预置数据不是数组，已跳过");
            continue;
        };
        for row in rows {
            store.seed(&record_type, row);
        }
        info!(record_type = %record_type, rows = store.count(&record_type), "预置数据已加载");
    }
    Ok(store)
}

fn strict_report(err: &EngineError) -> Value {
    json!({
        "valid": false,
        "code": err.code(),
        "error": err.to_string(),
    })
}

fn write_json(out: &mut impl Write, value: &impl serde::Serialize) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}
