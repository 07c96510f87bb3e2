//! 规则编译器
//!
//! 在注册期把规则与回调定义编译成可直接执行的形式：解析守卫名、预编译正则、
//! 检查参数，并从能力表取出自定义校验器、字段块与回调动作。任何问题都立即报配置错误。

use crate::callbacks::CompiledCallback;
use crate::capabilities::{Capabilities, FieldBlock, RecordValidator};
use crate::error::{EngineError, Result};
use crate::guards::CompiledGuards;
use crate::models::{CallbackDef, Operand, RuleKind, ValidationRule};
use regex::Regex;
use std::fmt;
use std::sync::Arc;

/// 谓词的可执行形式
#[derive(Clone)]
pub(crate) enum Check {
    /// 直接按 `RuleKind` 求值的内置谓词
    Builtin,
    Format {
        with: Option<Regex>,
        without: Option<Regex>,
    },
    Custom(Arc<dyn RecordValidator>),
    Each(FieldBlock),
}

impl fmt::Debug for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Builtin => f.write_str("Builtin"),
            Self::Format { with, without } => f
                .debug_struct("Format")
                .field("with", &with.as_ref().map(Regex::as_str))
                .field("without", &without.as_ref().map(Regex::as_str))
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
            Self::Each(_) => f.write_str("Each(..)"),
        }
    }
}

/// 编译后的校验规则
#[derive(Debug, Clone)]
pub struct CompiledRule {
    /// 原始规则
    pub rule: ValidationRule,
    pub(crate) guards: CompiledGuards,
    pub(crate) check: Check,
}

impl CompiledRule {
    pub fn kind(&self) -> &'static str {
        self.rule.kind.name()
    }

    pub fn fields(&self) -> &[String] {
        &self.rule.fields
    }

    pub fn is_strict(&self) -> bool {
        self.rule.strict
    }

    pub fn guards(&self) -> &CompiledGuards {
        &self.guards
    }
}

/// 规则编译器
pub struct RuleCompiler {
    capabilities: Arc<Capabilities>,
}

impl RuleCompiler {
    pub fn new(capabilities: Arc<Capabilities>) -> Self {
        Self { capabilities }
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// 编译校验规则
    ///
    /// `path` 仅用于错误信息定位，如 `Person.validations[2]`；
    /// `attributes` 为记录类型声明的属性，为空时不检查字段引用。
    pub fn compile_rule(&self, rule: ValidationRule, attributes: &[String], path: &str) -> Result<CompiledRule> {
        self.validate_rule(&rule, attributes, path)?;

        let guards = CompiledGuards::compile(&rule.if_guards, &rule.unless, &self.capabilities, attributes)
            .map_err(|e| locate(e, path))?;

        let check = match &rule.kind {
            RuleKind::Format { with, without } => Check::Format {
                with: with.as_deref().map(|p| compile_pattern(p, path)).transpose()?,
                without: without.as_deref().map(|p| compile_pattern(p, path)).transpose()?,
            },
            RuleKind::Custom { validator, .. } => Check::Custom(
                self.capabilities
                    .validator(validator)
                    .ok_or_else(|| EngineError::config(format!("{}: 未知的自定义校验器 '{}'", path, validator)))?,
            ),
            RuleKind::Each { block } => Check::Each(
                self.capabilities
                    .block(block)
                    .ok_or_else(|| EngineError::config(format!("{}: 未知的字段块 '{}'", path, block)))?,
            ),
            _ => Check::Builtin,
        };

        Ok(CompiledRule { rule, guards, check })
    }

    /// 编译回调
    pub fn compile_callback(&self, def: CallbackDef, attributes: &[String], path: &str) -> Result<CompiledCallback> {
        let action = self
            .capabilities
            .action(&def.action)
            .ok_or_else(|| EngineError::config(format!("{}: 未知的回调动作 '{}'", path, def.action)))?;

        let guards = CompiledGuards::compile(&def.if_guards, &def.unless, &self.capabilities, attributes)
            .map_err(|e| locate(e, path))?;

        Ok(CompiledCallback { def, guards, action })
    }

    /// 验证规则结构
    fn validate_rule(&self, rule: &ValidationRule, attributes: &[String], path: &str) -> Result<()> {
        let needs_fields = !matches!(rule.kind, RuleKind::Custom { .. });
        if needs_fields && rule.fields.is_empty() {
            return Err(EngineError::config(format!(
                "{}: {} 规则必须指定目标字段",
                path,
                rule.kind.name()
            )));
        }

        if rule.fields.iter().any(|f| f.is_empty()) || rule.on.iter().any(|c| c.is_empty()) {
            return Err(EngineError::config(format!("{}: 字段名和上下文名不能为空", path)));
        }

        let declared = |field: &str| attributes.is_empty() || attributes.iter().any(|a| a == field);

        match &rule.kind {
            RuleKind::Length(opts) => {
                if opts.is.is_none() && opts.effective_minimum().is_none() && opts.effective_maximum().is_none() {
                    return Err(EngineError::config(format!(
                        "{}: length 规则至少需要 minimum、maximum、is 或 in 之一",
                        path
                    )));
                }
                if let (Some(min), Some(max)) = (opts.effective_minimum(), opts.effective_maximum()) {
                    if min > max {
                        return Err(EngineError::config(format!(
                            "{}: length 区间无效 [{}, {}]",
                            path, min, max
                        )));
                    }
                }
            }
            RuleKind::Format { with, without } => {
                if with.is_none() && without.is_none() {
                    return Err(EngineError::config(format!(
                        "{}: format 规则需要 with 或 without",
                        path
                    )));
                }
            }
            RuleKind::Inclusion { values } | RuleKind::Exclusion { values } => {
                if values.is_empty() {
                    return Err(EngineError::config(format!(
                        "{}: {} 规则的 in 列表不能为空",
                        path,
                        rule.kind.name()
                    )));
                }
            }
            RuleKind::Numericality(opts) => {
                let bounds = [
                    opts.greater_than,
                    opts.greater_than_or_equal_to,
                    opts.equal_to,
                    opts.less_than,
                    opts.less_than_or_equal_to,
                    opts.other_than,
                ];
                if bounds.iter().flatten().any(|b| !b.is_finite()) {
                    return Err(EngineError::config(format!("{}: numericality 边界必须是有限数", path)));
                }
            }
            RuleKind::Comparison(opts) => {
                let relations = opts.relations();
                if relations.is_empty() {
                    return Err(EngineError::config(format!(
                        "{}: comparison 规则至少需要一个比较关系",
                        path
                    )));
                }
                for (_, operand) in relations {
                    if let Operand::Field { field } = operand {
                        if !declared(field.as_str()) {
                            return Err(EngineError::config(format!(
                                "{}: comparison 引用了未声明的属性 '{}'",
                                path, field
                            )));
                        }
                    }
                }
            }
            RuleKind::Uniqueness { scope, .. } => {
                if let Some(field) = scope.iter().find(|f| !declared(f.as_str())) {
                    return Err(EngineError::config(format!(
                        "{}: uniqueness 作用域引用了未声明的属性 '{}'",
                        path, field
                    )));
                }
            }
            _ => {}
        }

        Ok(())
    }
}

/// 给配置错误加上定义位置
fn locate(err: EngineError, path: &str) -> EngineError {
    match err {
        EngineError::Config(message) => EngineError::Config(format!("{}: {}", path, message)),
        other => other,
    }
}

fn compile_pattern(pattern: &str, path: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| EngineError::config(format!("{}: 正则表达式无效 '{}': {}", path, pattern, e)))
}
