//! 规则引擎
//!
//! 按注册顺序对记录执行校验规则，累积错误；strict 规则失败、自定义校验器异常、
//! 唯一性查询失败会立即终止本次评估。同时负责按触发点执行回调链。

use crate::callbacks::{CallbackContext, CallbackOutcome, Flow};
use crate::capabilities::ValidatorContext;
use crate::collaborators::{UniquenessLookup, UniquenessQuery};
use crate::compiler::{Check, CompiledRule};
use crate::error::{EngineError, Result};
use crate::error_set::ErrorSet;
use crate::models::{RuleKind, Trigger, ValidationContext, ValidationRule};
use crate::predicates::{PredicateEvaluator, Violation};
use crate::record::{Record, is_blank};
use crate::registry::{RecordTypeRules, Registry};
use crate::messages;
use record_shared::observability::metrics as names;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// 单条规则的处理结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RuleDecision {
    /// `on` 与当前上下文不匹配
    SkippedContext,
    /// 守卫不成立
    SkippedGuard,
    Passed,
    Failed { errors: usize },
}

/// 评估追踪条目
#[derive(Debug, Clone, Serialize)]
pub struct TraceEntry {
    pub index: usize,
    pub kind: &'static str,
    pub fields: Vec<String>,
    #[serde(flatten)]
    pub decision: RuleDecision,
}

/// 一次评估的详细结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct Evaluation {
    pub context: String,
    pub errors: ErrorSet,
    pub rules_run: usize,
    pub rules_skipped: usize,
    /// 仅在启用追踪时填充
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<TraceEntry>,
}

impl Evaluation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// 规则引擎
pub struct RuleEngine {
    registry: Arc<Registry>,
    lookup: Option<Arc<dyn UniquenessLookup>>,
    trace_enabled: bool,
}

/// 规则引擎构建器
pub struct RuleEngineBuilder {
    registry: Arc<Registry>,
    lookup: Option<Arc<dyn UniquenessLookup>>,
    trace_enabled: bool,
}

impl RuleEngineBuilder {
    /// 唯一性查询协作方
    pub fn lookup(mut self, lookup: Arc<dyn UniquenessLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    /// 启用评估追踪
    pub fn with_trace(mut self) -> Self {
        self.trace_enabled = true;
        self
    }

    pub fn trace(mut self, enabled: bool) -> Self {
        self.trace_enabled = enabled;
        self
    }

    pub fn build(self) -> Result<RuleEngine> {
        if self.lookup.is_none() && self.registry.uses_uniqueness() {
            return Err(EngineError::config(
                "注册表包含 uniqueness 规则，但未配置唯一性查询协作方",
            ));
        }

        Ok(RuleEngine {
            registry: self.registry,
            lookup: self.lookup,
            trace_enabled: self.trace_enabled,
        })
    }
}

impl RuleEngine {
    pub fn builder(registry: Arc<Registry>) -> RuleEngineBuilder {
        RuleEngineBuilder {
            registry,
            lookup: None,
            trace_enabled: false,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// 评估记录，返回累积的错误集合（同时写回记录）
    pub fn evaluate(&self, record: &mut Record, context: &ValidationContext) -> Result<ErrorSet> {
        self.evaluate_detailed(record, context).map(|evaluation| evaluation.errors)
    }

    pub fn is_valid(&self, record: &mut Record, context: &ValidationContext) -> Result<bool> {
        self.evaluate(record, context).map(|errors| errors.is_empty())
    }

    /// 评估记录并返回统计与追踪信息
    #[instrument(level = "debug", skip(self, record), fields(record_type = %record.record_type()))]
    pub fn evaluate_detailed(&self, record: &mut Record, context: &ValidationContext) -> Result<Evaluation> {
        let start = Instant::now();
        let rules = self.registry.get(record.record_type())?;

        let mut evaluation = Evaluation {
            context: context.resolve(record).into_owned(),
            ..Default::default()
        };

        // 每次评估从空错误集合开始，保证幂等
        record.replace_errors(ErrorSet::new());
        let mut errors = ErrorSet::new();
        let outcome = self.run_rules(rules, record, &mut errors, &mut evaluation);
        record.replace_errors(errors.clone());

        let record_type = rules.name.clone();
        metrics::counter!(names::RULE_EVALUATIONS_TOTAL, "record_type" => record_type.clone()).increment(1);
        metrics::histogram!(names::RULE_EVALUATION_DURATION_SECONDS, "record_type" => record_type.clone())
            .record(start.elapsed().as_secs_f64());

        if let Err(err) = outcome {
            if matches!(err, EngineError::StrictValidation { .. }) {
                metrics::counter!(names::STRICT_FAILURES_TOTAL, "record_type" => record_type).increment(1);
            }
            warn!(error = %err, code = err.code(), "评估被终止");
            return Err(err);
        }

        if !errors.is_empty() {
            metrics::counter!(names::VALIDATION_ERRORS_TOTAL, "record_type" => record_type)
                .increment(errors.len() as u64);
        }

        debug!(
            context = %evaluation.context,
            rules_run = evaluation.rules_run,
            rules_skipped = evaluation.rules_skipped,
            errors = errors.len(),
            "评估完成"
        );

        evaluation.errors = errors;
        Ok(evaluation)
    }

    fn run_rules(
        &self,
        rules: &RecordTypeRules,
        record: &Record,
        errors: &mut ErrorSet,
        evaluation: &mut Evaluation,
    ) -> Result<()> {
        for (index, compiled) in rules.rules.iter().enumerate() {
            let decision = if !compiled.rule.applies_in(&evaluation.context) {
                RuleDecision::SkippedContext
            } else if !compiled.guards.allows(record) {
                RuleDecision::SkippedGuard
            } else {
                let before = errors.len();
                self.apply(&rules.name, compiled, record, errors)?;

                if compiled.is_strict() && errors.len() > before {
                    let first = errors.split_off(before).into_iter().next();
                    if let Some(failure) = first {
                        return Err(EngineError::StrictValidation {
                            record_type: rules.name.clone(),
                            field: failure.field,
                            message: failure.message,
                        });
                    }
                }

                match errors.len() - before {
                    0 => RuleDecision::Passed,
                    added => RuleDecision::Failed { errors: added },
                }
            };

            match decision {
                RuleDecision::SkippedContext | RuleDecision::SkippedGuard => evaluation.rules_skipped += 1,
                _ => evaluation.rules_run += 1,
            }

            if self.trace_enabled {
                evaluation.trace.push(TraceEntry {
                    index,
                    kind: compiled.kind(),
                    fields: compiled.fields().to_vec(),
                    decision,
                });
            }
        }
        Ok(())
    }

    /// 执行单条规则
    fn apply(&self, record_type: &str, compiled: &CompiledRule, record: &Record, errors: &mut ErrorSet) -> Result<()> {
        let rule = &compiled.rule;

        match &compiled.check {
            Check::Custom(validator) => {
                let (name, options) = match &rule.kind {
                    RuleKind::Custom { validator, options } => (validator.as_str(), options),
                    _ => ("<custom>", &Value::Null),
                };
                let ctx = ValidatorContext {
                    record,
                    fields: &rule.fields,
                    options,
                };
                validator
                    .validate(&ctx, errors)
                    .map_err(|e| EngineError::Validator {
                        validator: name.to_string(),
                        message: e.to_string(),
                    })
            }
            Check::Each(block) => {
                for field in &rule.fields {
                    let value = record.get(field);
                    if !skips(rule, value) {
                        block(record, field, value, errors);
                    }
                }
                Ok(())
            }
            Check::Format { with, without } => {
                for field in &rule.fields {
                    let value = record.get(field);
                    if !skips(rule, value) {
                        let violations = PredicateEvaluator::format(value, with.as_ref(), without.as_ref());
                        report(rule, field, value, violations, errors);
                    }
                }
                Ok(())
            }
            Check::Builtin => {
                for field in &rule.fields {
                    let value = record.get(field);
                    if skips(rule, value) {
                        continue;
                    }
                    let violations = self.builtin(record_type, rule, record, field, value)?;
                    report(rule, field, value, violations, errors);
                }
                Ok(())
            }
        }
    }

    fn builtin(
        &self,
        record_type: &str,
        rule: &ValidationRule,
        record: &Record,
        field: &str,
        value: Option<&Value>,
    ) -> Result<Vec<Violation>> {
        let violations = match &rule.kind {
            RuleKind::Presence => PredicateEvaluator::presence(value),
            RuleKind::Absence => PredicateEvaluator::absence(value),
            RuleKind::Numericality(opts) => PredicateEvaluator::numericality(value, opts),
            RuleKind::Length(opts) => PredicateEvaluator::length(value, opts),
            RuleKind::Inclusion { values } => PredicateEvaluator::inclusion(value, values),
            RuleKind::Exclusion { values } => PredicateEvaluator::exclusion(value, values),
            RuleKind::Comparison(opts) => PredicateEvaluator::comparison(record, value, opts),
            RuleKind::Acceptance { accept } => PredicateEvaluator::acceptance(value, accept),
            RuleKind::Confirmation { case_sensitive } => {
                PredicateEvaluator::confirmation(record, field, *case_sensitive)
            }
            RuleKind::Uniqueness { scope, case_sensitive } => {
                let query = UniquenessQuery {
                    record_type: record_type.to_string(),
                    field: field.to_string(),
                    value: value.cloned().unwrap_or(Value::Null),
                    scope: scope
                        .iter()
                        .map(|s| (s.clone(), record.get(s).cloned().unwrap_or(Value::Null)))
                        .collect(),
                    case_sensitive: *case_sensitive,
                    exclude_id: if record.is_persisted() {
                        record.id().map(str::to_string)
                    } else {
                        None
                    },
                };
                if self.uniqueness_conflict(&query)? {
                    vec![Violation::new(messages::TAKEN)]
                } else {
                    Vec::new()
                }
            }
            // 其余类型在编译期已转换为专门的 Check
            RuleKind::Format { .. } | RuleKind::Custom { .. } | RuleKind::Each { .. } => Vec::new(),
        };
        Ok(violations)
    }

    fn uniqueness_conflict(&self, query: &UniquenessQuery) -> Result<bool> {
        let lookup = self
            .lookup
            .as_ref()
            .ok_or_else(|| EngineError::config("uniqueness 规则需要唯一性查询协作方"))?;

        lookup.exists(query).map_err(|e| {
            warn!(field = %query.field, error = %e, "唯一性查询失败");
            EngineError::Lookup(e)
        })
    }

    /// 执行触发点上的回调链
    pub fn run_callbacks(&self, record: &mut Record, trigger: &Trigger) -> Result<CallbackOutcome> {
        self.run_callbacks_with(record, None, trigger)
    }

    /// 执行回调链，关联新增回调可以拿到被添加的条目
    pub(crate) fn run_callbacks_with(
        &self,
        record: &mut Record,
        mut item: Option<&mut Record>,
        trigger: &Trigger,
    ) -> Result<CallbackOutcome> {
        let rules = self.registry.get(record.record_type())?;
        let mut outcome = CallbackOutcome::default();

        for callback in rules.callbacks_for(trigger) {
            if !callback.guards.allows(record) {
                continue;
            }

            let name = callback.action_name().to_string();
            let flow = {
                let mut ctx = CallbackContext::new(record, item.as_deref_mut(), &mut outcome.effects);
                (callback.action)(&mut ctx)
            }
            .map_err(|e| EngineError::Callback {
                action: name.clone(),
                message: e.to_string(),
            })?;

            outcome.invoked.push(name.clone());

            if flow == Flow::Abort {
                info!(trigger = %trigger, action = %name, "回调中止了生命周期");
                outcome.aborted_by = Some(name);
                break;
            }
        }

        Ok(outcome)
    }
}

/// allow_nil / allow_blank 跳过判断
fn skips(rule: &ValidationRule, value: Option<&Value>) -> bool {
    (rule.allow_nil && matches!(value, None | Some(Value::Null))) || (rule.allow_blank && is_blank(value))
}

fn report(rule: &ValidationRule, field: &str, value: Option<&Value>, violations: Vec<Violation>, errors: &mut ErrorSet) {
    let value = value.unwrap_or(&Value::Null);
    for violation in violations {
        let (key, message) = violation.render(field, value, rule.message.as_deref());
        errors.add(key, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::Capabilities;
    use crate::collaborators::{CollaboratorError, MockUniquenessLookup};
    use crate::models::{CallbackDef, LengthOptions};
    use crate::registry::RegistryBuilder;
    use serde_json::json;

    fn person_registry() -> Arc<Registry> {
        let caps = Capabilities::builder()
            .validator_fn("goodness", |ctx, errors| {
                if ctx.record.get_str("name") == Some("Evil") {
                    errors.add_base("This person is evil");
                }
                Ok(())
            })
            .validator_fn("explodes", |_ctx, _errors| Err(anyhow::anyhow!("boom")))
            .action("upcase_name", |ctx| {
                let upper = ctx.record.get_str("name").map(str::to_uppercase);
                if let Some(upper) = upper {
                    ctx.record.set("name", upper);
                }
                Ok(Flow::Continue)
            })
            .action("halt", |ctx| {
                ctx.record.errors_mut().add_base("halted");
                Ok(Flow::Abort)
            })
            .action("never", |_ctx| Ok(Flow::Continue))
            .build();

        let mut builder = RegistryBuilder::new(caps);
        builder.define("Person", ["name", "email", "age"]);
        builder
            .register_rule("Person", ValidationRule::field("name", RuleKind::Presence))
            .unwrap();
        builder
            .register_rule("Person", ValidationRule::base(RuleKind::custom("goodness")))
            .unwrap();
        builder
            .register_rule(
                "Person",
                ValidationRule::field("age", RuleKind::numericality()).on("account_setup"),
            )
            .unwrap();
        builder
            .register_rule(
                "Person",
                ValidationRule::field("email", RuleKind::Length(LengthOptions::maximum(5)))
                    .if_guard("email_changed?"),
            )
            .unwrap();
        builder
            .register_callback("Person", CallbackDef::new(Trigger::BeforeValidation, "upcase_name"))
            .unwrap();
        builder
            .register_callback("Person", CallbackDef::new(Trigger::BeforeSave, "halt"))
            .unwrap();
        builder
            .register_callback("Person", CallbackDef::new(Trigger::BeforeSave, "never"))
            .unwrap();

        builder.define("Explosive", ["name"]);
        builder
            .register_rule("Explosive", ValidationRule::base(RuleKind::custom("explodes")))
            .unwrap();
        builder
            .register_rule("Explosive", ValidationRule::field("name", RuleKind::Presence))
            .unwrap();

        Arc::new(builder.build())
    }

    fn engine() -> RuleEngine {
        RuleEngine::builder(person_registry()).build().unwrap()
    }

    #[test]
    fn test_accumulates_errors_in_order() {
        let mut person = Record::from_json("Person", json!({"email": "toolong@example.com"})).unwrap();

        let errors = engine().evaluate(&mut person, &ValidationContext::Default).unwrap();

        assert_eq!(errors.fields(), vec!["name", "email"]);
        assert_eq!(errors.get("name"), vec!["can't be blank"]);
        assert_eq!(errors.get("email"), vec!["is too long (maximum is 5 characters)"]);
        assert_eq!(person.errors(), &errors);
    }

    #[test]
    fn test_evaluate_is_idempotent() {
        let engine = engine();
        let mut person = Record::from_json("Person", json!({"name": "Evil"})).unwrap();

        let first = engine.evaluate(&mut person, &ValidationContext::Default).unwrap();
        let second = engine.evaluate(&mut person, &ValidationContext::Default).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.get("base"), vec!["This person is evil"]);
    }

    #[test]
    fn test_named_context_activates_rules() {
        let engine = engine();
        let mut person = Record::from_json("Person", json!({"name": "Ana", "age": "abc"})).unwrap();

        assert!(engine.is_valid(&mut person, &ValidationContext::Default).unwrap());

        let errors = engine
            .evaluate(&mut person, &ValidationContext::named("account_setup"))
            .unwrap();
        assert_eq!(errors.get("age"), vec!["is not a number"]);
    }

    #[test]
    fn test_guard_sees_current_state() {
        let engine = engine();
        let mut loaded =
            Record::persisted("Person", "p-1", json!({"name": "Ana", "email": "toolong@example.com"})).unwrap();

        // 未变更的 email 不触发长度校验
        assert!(engine.is_valid(&mut loaded, &ValidationContext::Default).unwrap());

        loaded.set("email", "stilltoolong@example.com");
        assert!(!engine.is_valid(&mut loaded, &ValidationContext::Default).unwrap());
    }

    #[test]
    fn test_trace() {
        let engine = RuleEngine::builder(person_registry()).with_trace().build().unwrap();
        let mut person = Record::from_json("Person", json!({"name": "Ana"})).unwrap();

        let evaluation = engine
            .evaluate_detailed(&mut person, &ValidationContext::Default)
            .unwrap();

        assert!(evaluation.is_valid());
        assert_eq!(evaluation.context, "create");
        assert_eq!(evaluation.rules_run, 2);
        assert_eq!(evaluation.rules_skipped, 2);
        assert_eq!(evaluation.trace.len(), 4);
        assert_eq!(evaluation.trace[2].decision, RuleDecision::SkippedContext);
        assert_eq!(evaluation.trace[3].decision, RuleDecision::SkippedGuard);
    }

    #[test]
    fn test_validator_exception_aborts_batch() {
        let mut record = Record::from_json("Explosive", json!({})).unwrap();
        let err = engine().evaluate(&mut record, &ValidationContext::Default).unwrap_err();

        assert!(matches!(err, EngineError::Validator { ref validator, .. } if validator == "explodes"));
        assert!(record.errors().is_empty());
    }

    #[test]
    fn test_unknown_record_type() {
        let mut record = Record::from_json("Ghost", json!({})).unwrap();
        let err = engine().evaluate(&mut record, &ValidationContext::Default).unwrap_err();
        assert_eq!(err.code(), "RECORD_TYPE_NOT_FOUND");
    }

    fn account_engine(lookup: MockUniquenessLookup) -> RuleEngine {
        let mut builder = RegistryBuilder::new(Capabilities::default());
        builder.define("Account", ["token", "email"]);
        builder
            .register_rule("Account", ValidationRule::field("email", RuleKind::Presence))
            .unwrap();
        builder
            .register_rule("Account", ValidationRule::field("token", RuleKind::uniqueness()).strict())
            .unwrap();
        builder
            .register_rule("Account", ValidationRule::field("email", RuleKind::uniqueness()))
            .unwrap();

        RuleEngine::builder(Arc::new(builder.build()))
            .lookup(Arc::new(lookup))
            .build()
            .unwrap()
    }

    #[test]
    fn test_strict_uniqueness_raises() {
        let mut lookup = MockUniquenessLookup::new();
        lookup
            .expect_exists()
            .withf(|q| q.field == "token" && q.value == json!("abc") && q.exclude_id.is_none())
            .times(1)
            .returning(|_| Ok(true));

        let engine = account_engine(lookup);
        let mut account = Record::from_json("Account", json!({"token": "abc"})).unwrap();

        let err = engine.evaluate(&mut account, &ValidationContext::Default).unwrap_err();
        match err {
            EngineError::StrictValidation {
                record_type,
                field,
                message,
            } => {
                assert_eq!(record_type, "Account");
                assert_eq!(field, "token");
                assert_eq!(message, "has already been taken");
            }
            other => panic!("unexpected error: {:?}", other),
        }

        // strict 之前累积的错误保留在记录上，strict 错误本身不进入错误集合
        assert_eq!(account.errors().get("email"), vec!["can't be blank"]);
        assert!(!account.errors().contains("token"));
    }

    #[test]
    fn test_persisted_record_excludes_itself() {
        let mut lookup = MockUniquenessLookup::new();
        lookup
            .expect_exists()
            .withf(|q| q.exclude_id.as_deref() == Some("a-1"))
            .times(2)
            .returning(|_| Ok(false));

        let engine = account_engine(lookup);
        let mut account =
            Record::persisted("Account", "a-1", json!({"token": "abc", "email": "a@example.com"})).unwrap();

        assert!(engine.is_valid(&mut account, &ValidationContext::Default).unwrap());
    }

    #[test]
    fn test_lookup_failure_propagates() {
        let mut lookup = MockUniquenessLookup::new();
        lookup
            .expect_exists()
            .returning(|_| Err(CollaboratorError::Unavailable("db down".to_string())));

        let engine = account_engine(lookup);
        let mut account = Record::from_json("Account", json!({"token": "abc", "email": "x"})).unwrap();

        let err = engine.evaluate(&mut account, &ValidationContext::Default).unwrap_err();
        assert!(matches!(err, EngineError::Lookup(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_uniqueness_requires_lookup() {
        let mut builder = RegistryBuilder::new(Capabilities::default());
        builder
            .register_rule("Account", ValidationRule::field("token", RuleKind::uniqueness()))
            .unwrap();

        let result = RuleEngine::builder(Arc::new(builder.build())).build();
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_callbacks_mutate_and_abort() {
        let engine = engine();
        let mut person = Record::from_json("Person", json!({"name": "ana"})).unwrap();

        let outcome = engine.run_callbacks(&mut person, &Trigger::BeforeValidation).unwrap();
        assert!(!outcome.is_aborted());
        assert_eq!(person.get_str("name"), Some("ANA"));

        let outcome = engine.run_callbacks(&mut person, &Trigger::BeforeSave).unwrap();
        assert_eq!(outcome.aborted_by.as_deref(), Some("halt"));
        assert_eq!(outcome.invoked, vec!["halt"]);
        assert_eq!(person.errors().get("base"), vec!["halted"]);
    }

    #[test]
    fn test_allow_nil_and_allow_blank() {
        let mut builder = RegistryBuilder::new(Capabilities::default());
        builder
            .register_rule(
                "Player",
                ValidationRule::field("points", RuleKind::numericality()).allow_nil(),
            )
            .unwrap();
        builder
            .register_rule(
                "Player",
                ValidationRule::field("nickname", RuleKind::Length(LengthOptions::within(3, 10))).allow_blank(),
            )
            .unwrap();
        let engine = RuleEngine::builder(Arc::new(builder.build())).build().unwrap();

        let mut player = Record::from_json("Player", json!({"points": null, "nickname": ""})).unwrap();
        assert!(engine.is_valid(&mut player, &ValidationContext::Default).unwrap());

        player.set("nickname", "ab");
        let errors = engine.evaluate(&mut player, &ValidationContext::Default).unwrap();
        assert_eq!(errors.get("nickname"), vec!["is too short (minimum is 3 characters)"]);
    }
}
