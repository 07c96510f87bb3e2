//! 生命周期状态机
//!
//! `Pending -> BeforeCallbacks -> Validating -> (Valid | Invalid) -> AfterCallbacks -> Committed | Aborted`
//!
//! before 回调返回 `Flow::Abort` 时直接进入 `Aborted`，校验与持久化都不执行；
//! 校验失败同样进入 `Aborted`。副作用只在 `Committed` 之后投递，投递失败只记录日志。

use crate::callbacks::CallbackOutcome;
use crate::collaborators::{
    FileCleanup, FsFileCleanup, LoggingMailer, LoggingNotifier, Mailer, Notifier, Persistence, SideEffect,
};
use crate::engine::RuleEngine;
use crate::error::{EngineError, Result};
use crate::error_set::ErrorSet;
use crate::models::{Trigger, ValidationContext};
use crate::record::Record;
use record_shared::observability::metrics as names;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// 生命周期操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Destroy,
    AddToAssociation,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Destroy => "destroy",
            Self::AddToAssociation => "add_to_association",
        };
        write!(f, "{}", s)
    }
}

/// 生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Pending,
    BeforeCallbacks,
    Validating,
    Valid,
    Invalid,
    AfterCallbacks,
    Committed,
    Aborted,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::BeforeCallbacks => "before_callbacks",
            Self::Validating => "validating",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::AfterCallbacks => "after_callbacks",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
        };
        write!(f, "{}", s)
    }
}

/// 一次生命周期操作的结果
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleReport {
    pub operation: Operation,
    pub state: LifecycleState,
    pub errors: ErrorSet,
    /// 经过的状态，按顺序
    pub transitions: Vec<LifecycleState>,
    /// 执行过的回调动作
    pub invoked: Vec<String>,
    pub aborted_by: Option<String>,
    /// 已投递的副作用
    pub effects: Vec<SideEffect>,
    /// 投递失败的副作用数量
    pub failed_effects: usize,
}

impl LifecycleReport {
    pub fn is_committed(&self) -> bool {
        self.state == LifecycleState::Committed
    }

    pub fn is_aborted(&self) -> bool {
        self.state == LifecycleState::Aborted
    }
}

/// 单次操作的运行状态
struct Run {
    operation: Operation,
    state: LifecycleState,
    transitions: Vec<LifecycleState>,
    invoked: Vec<String>,
    effects: Vec<SideEffect>,
}

impl Run {
    fn new(operation: Operation) -> Self {
        Self {
            operation,
            state: LifecycleState::Pending,
            transitions: vec![LifecycleState::Pending],
            invoked: Vec::new(),
            effects: Vec::new(),
        }
    }

    fn enter(&mut self, state: LifecycleState) {
        debug!(operation = %self.operation, from = %self.state, to = %state, "状态迁移");
        self.state = state;
        self.transitions.push(state);
    }

    /// 合并回调结果，返回中止者
    fn absorb(&mut self, outcome: CallbackOutcome) -> Option<String> {
        self.invoked.extend(outcome.invoked);
        self.effects.extend(outcome.effects);
        outcome.aborted_by
    }

    fn abort(mut self, record: &Record, aborted_by: Option<String>) -> LifecycleReport {
        self.enter(LifecycleState::Aborted);
        info!(
            operation = %self.operation,
            record_type = %record.record_type(),
            aborted_by = ?aborted_by,
            errors = record.errors().len(),
            "生命周期已中止"
        );
        // 中止时丢弃已入队的副作用
        self.effects.clear();
        self.finish(record, aborted_by, 0)
    }

    fn finish(self, record: &Record, aborted_by: Option<String>, failed_effects: usize) -> LifecycleReport {
        metrics::counter!(
            names::LIFECYCLE_OPERATIONS_TOTAL,
            "operation" => self.operation.to_string(),
            "state" => self.state.to_string()
        )
        .increment(1);

        LifecycleReport {
            operation: self.operation,
            state: self.state,
            errors: record.errors().clone(),
            transitions: self.transitions,
            invoked: self.invoked,
            aborted_by,
            effects: self.effects,
            failed_effects,
        }
    }
}

/// 生命周期驱动器
pub struct Lifecycle {
    engine: Arc<RuleEngine>,
    persistence: Arc<dyn Persistence>,
    mailer: Arc<dyn Mailer>,
    file_cleanup: Arc<dyn FileCleanup>,
    notifier: Arc<dyn Notifier>,
}

/// 生命周期驱动器构建器
pub struct LifecycleBuilder {
    engine: Arc<RuleEngine>,
    persistence: Arc<dyn Persistence>,
    mailer: Arc<dyn Mailer>,
    file_cleanup: Arc<dyn FileCleanup>,
    notifier: Arc<dyn Notifier>,
}

impl LifecycleBuilder {
    pub fn mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = mailer;
        self
    }

    pub fn file_cleanup(mut self, file_cleanup: Arc<dyn FileCleanup>) -> Self {
        self.file_cleanup = file_cleanup;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn build(self) -> Lifecycle {
        Lifecycle {
            engine: self.engine,
            persistence: self.persistence,
            mailer: self.mailer,
            file_cleanup: self.file_cleanup,
            notifier: self.notifier,
        }
    }
}

impl Lifecycle {
    /// 邮件与通知默认只写日志，文件清理默认操作本地文件系统
    pub fn builder(engine: Arc<RuleEngine>, persistence: Arc<dyn Persistence>) -> LifecycleBuilder {
        LifecycleBuilder {
            engine,
            persistence,
            mailer: Arc::new(LoggingMailer),
            file_cleanup: Arc::new(FsFileCleanup),
            notifier: Arc::new(LoggingNotifier),
        }
    }

    pub fn engine(&self) -> &RuleEngine {
        &self.engine
    }

    /// 保存记录：新记录走 create，已持久化记录走 update
    pub fn save(&self, record: &mut Record) -> Result<LifecycleReport> {
        self.save_with_context(record, &ValidationContext::Default)
    }

    #[instrument(skip(self, record), fields(record_type = %record.record_type()))]
    pub fn save_with_context(&self, record: &mut Record, context: &ValidationContext) -> Result<LifecycleReport> {
        let creating = record.is_new_record();
        let mut run = Run::new(if creating {
            Operation::Create
        } else {
            Operation::Update
        });

        run.enter(LifecycleState::BeforeCallbacks);
        let before = if creating {
            Trigger::BeforeCreate
        } else {
            Trigger::BeforeUpdate
        };
        for trigger in [Trigger::BeforeValidation, Trigger::BeforeSave, before] {
            let outcome = self.engine.run_callbacks(record, &trigger)?;
            if let Some(aborted_by) = run.absorb(outcome) {
                return Ok(run.abort(record, Some(aborted_by)));
            }
        }

        run.enter(LifecycleState::Validating);
        let errors = self.engine.evaluate(record, context)?;
        if !errors.is_empty() {
            run.enter(LifecycleState::Invalid);
            return Ok(run.abort(record, None));
        }
        run.enter(LifecycleState::Valid);
        self.run_after(&mut run, record, &Trigger::AfterValidation)?;

        if creating {
            let id = self.persistence.insert(record).map_err(EngineError::Persistence)?;
            record.mark_persisted(id);
        } else {
            self.persistence.update(record).map_err(EngineError::Persistence)?;
            let id = record.id().unwrap_or_default().to_string();
            record.mark_persisted(id);
        }

        run.enter(LifecycleState::AfterCallbacks);
        let after = if creating {
            Trigger::AfterCreate
        } else {
            Trigger::AfterUpdate
        };
        self.run_after(&mut run, record, &after)?;
        self.run_after(&mut run, record, &Trigger::AfterSave)?;
        record.clear_changes();

        Ok(self.commit(run, record))
    }

    /// 删除记录；新记录不调用持久化协作方
    #[instrument(skip(self, record), fields(record_type = %record.record_type()))]
    pub fn destroy(&self, record: &mut Record) -> Result<LifecycleReport> {
        let mut run = Run::new(Operation::Destroy);

        run.enter(LifecycleState::BeforeCallbacks);
        let outcome = self.engine.run_callbacks(record, &Trigger::BeforeDestroy)?;
        if let Some(aborted_by) = run.absorb(outcome) {
            return Ok(run.abort(record, Some(aborted_by)));
        }

        if record.is_persisted() {
            self.persistence.delete(record).map_err(EngineError::Persistence)?;
        }
        record.mark_destroyed();

        run.enter(LifecycleState::AfterCallbacks);
        self.run_after(&mut run, record, &Trigger::AfterDestroy)?;

        Ok(self.commit(run, record))
    }

    /// 向关联集合添加条目
    ///
    /// `before_add:<association>` 回调可以中止添加，此时已有条目不变、错误保留在 owner 上。
    #[instrument(skip(self, owner, item), fields(record_type = %owner.record_type()))]
    pub fn add_to_association(&self, owner: &mut Record, association: &str, mut item: Record) -> Result<LifecycleReport> {
        let mut run = Run::new(Operation::AddToAssociation);

        run.enter(LifecycleState::BeforeCallbacks);
        let before = Trigger::BeforeAdd(association.to_string());
        let outcome = self.engine.run_callbacks_with(owner, Some(&mut item), &before)?;
        if let Some(aborted_by) = run.absorb(outcome) {
            return Ok(run.abort(owner, Some(aborted_by)));
        }

        owner.push_association(association, item);

        run.enter(LifecycleState::AfterCallbacks);
        // after_add 回调看到的 owner 已包含新条目，item 参数是其副本，结束后写回
        let after = Trigger::AfterAdd(association.to_string());
        if let Some(mut added) = owner.association(association).last().cloned() {
            let outcome = self.engine.run_callbacks_with(owner, Some(&mut added), &after)?;
            self.ignore_abort(&mut run, outcome, &after);
            owner.replace_last_association(association, added);
        }

        run.enter(LifecycleState::Committed);
        let failed = self.dispatch(&run.effects);
        Ok(run.finish(owner, None, failed))
    }

    /// 执行 after 类回调；这些回调的中止信号被忽略
    fn run_after(&self, run: &mut Run, record: &mut Record, trigger: &Trigger) -> Result<()> {
        let outcome = self.engine.run_callbacks(record, trigger)?;
        self.ignore_abort(run, outcome, trigger);
        Ok(())
    }

    fn ignore_abort(&self, run: &mut Run, outcome: CallbackOutcome, trigger: &Trigger) {
        if let Some(action) = run.absorb(outcome) {
            warn!(trigger = %trigger, action = %action, "after 回调的中止信号被忽略");
        }
    }

    /// 提交：执行 after_commit 回调后投递副作用
    fn commit(&self, mut run: Run, record: &mut Record) -> LifecycleReport {
        run.enter(LifecycleState::Committed);

        match self.engine.run_callbacks(record, &Trigger::AfterCommit) {
            Ok(outcome) => self.ignore_abort(&mut run, outcome, &Trigger::AfterCommit),
            // 已提交，after_commit 失败不影响结果
            Err(err) => warn!(error = %err, "after_commit 回调执行失败"),
        }

        let failed = self.dispatch(&run.effects);
        info!(
            operation = %run.operation,
            record_type = %record.record_type(),
            id = ?record.id(),
            effects = run.effects.len(),
            failed_effects = failed,
            "生命周期已提交"
        );
        run.finish(record, None, failed)
    }

    /// 投递副作用，返回失败数量
    fn dispatch(&self, effects: &[SideEffect]) -> usize {
        let mut failed = 0;
        for effect in effects {
            let result = match effect {
                SideEffect::Mail(message) => self.mailer.deliver(message),
                SideEffect::RemoveFile { path } => self.file_cleanup.remove(path),
                SideEffect::Notify(notification) => self.notifier.notify(notification),
            };

            if let Err(err) = result {
                failed += 1;
                metrics::counter!(names::SIDE_EFFECT_FAILURES_TOTAL, "effect" => effect.kind()).increment(1);
                warn!(effect = effect.kind(), error = %err, "副作用投递失败，提交不回滚");
            }
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::Flow;
    use crate::capabilities::Capabilities;
    use crate::collaborators::{
        CollaboratorError, MailMessage, MockFileCleanup, MockMailer, MockPersistence, RecordingMailer,
    };
    use crate::models::{CallbackDef, RuleKind, ValidationRule};
    use crate::registry::RegistryBuilder;
    use serde_json::json;
    use std::path::PathBuf;

    fn engine() -> Arc<RuleEngine> {
        let caps = Capabilities::builder()
            .action("abort_if_still_active", |ctx| {
                if ctx.record.get("active") == Some(&json!(true)) {
                    ctx.record.errors_mut().add_base("Cannot delete an active user");
                    return Ok(Flow::Abort);
                }
                Ok(Flow::Continue)
            })
            .action("send_welcome_email", |ctx| {
                let to = ctx.record.get_str("email").unwrap_or_default().to_string();
                ctx.enqueue(SideEffect::Mail(MailMessage {
                    mailer: "user_mailer".to_string(),
                    template: "welcome_email".to_string(),
                    to,
                    subject: "Welcome to Our Platform!".to_string(),
                }));
                Ok(Flow::Continue)
            })
            .action("destroy_file", |ctx| {
                let path = ctx.record.get_str("file_path").map(PathBuf::from);
                if let Some(path) = path {
                    ctx.enqueue(SideEffect::RemoveFile { path });
                }
                Ok(Flow::Continue)
            })
            .action("check_limit", |ctx| {
                if ctx.record.association_count("books") >= 1 {
                    ctx.record.errors_mut().add_base("full");
                    return Ok(Flow::Abort);
                }
                Ok(Flow::Continue)
            })
            .action("stamp_item", |ctx| {
                if let Some(item) = ctx.item.as_deref_mut() {
                    item.set("stamped", true);
                }
                Ok(Flow::Continue)
            })
            .build();

        let mut builder = RegistryBuilder::new(caps);
        builder.define("User", ["email", "active"]);
        builder
            .register_rule("User", ValidationRule::field("email", RuleKind::Presence))
            .unwrap();
        builder
            .register_callback("User", CallbackDef::new(Trigger::AfterCreate, "send_welcome_email"))
            .unwrap();
        builder
            .register_callback("User", CallbackDef::new(Trigger::BeforeDestroy, "abort_if_still_active"))
            .unwrap();

        builder.define("PictureFile", ["file_path"]);
        builder
            .register_callback("PictureFile", CallbackDef::new(Trigger::AfterCommit, "destroy_file"))
            .unwrap();

        builder.define("Author", ["name"]);
        builder
            .register_callback(
                "Author",
                CallbackDef::new(Trigger::BeforeAdd("books".into()), "check_limit"),
            )
            .unwrap();
        builder
            .register_callback("Author", CallbackDef::new(Trigger::AfterAdd("books".into()), "stamp_item"))
            .unwrap();

        Arc::new(RuleEngine::builder(Arc::new(builder.build())).build().unwrap())
    }

    #[test]
    fn test_create_commits_and_sends_mail() {
        let mut persistence = MockPersistence::new();
        persistence.expect_insert().times(1).returning(|_| Ok("u-1".to_string()));
        let mailer = Arc::new(RecordingMailer::new());

        let lifecycle = Lifecycle::builder(engine(), Arc::new(persistence))
            .mailer(mailer.clone())
            .build();
        let mut user = Record::from_json("User", json!({"email": "ana@example.com"})).unwrap();

        let report = lifecycle.save(&mut user).unwrap();

        assert!(report.is_committed());
        assert_eq!(report.operation, Operation::Create);
        assert_eq!(
            report.transitions,
            vec![
                LifecycleState::Pending,
                LifecycleState::BeforeCallbacks,
                LifecycleState::Validating,
                LifecycleState::Valid,
                LifecycleState::AfterCallbacks,
                LifecycleState::Committed,
            ]
        );
        assert_eq!(user.id(), Some("u-1"));
        assert!(user.is_persisted());
        assert_eq!(mailer.delivered().len(), 1);
        assert_eq!(mailer.delivered()[0].to, "ana@example.com");
    }

    #[test]
    fn test_invalid_record_skips_persistence() {
        let mut persistence = MockPersistence::new();
        persistence.expect_insert().times(0);

        let lifecycle = Lifecycle::builder(engine(), Arc::new(persistence)).build();
        let mut user = Record::from_json("User", json!({})).unwrap();

        let report = lifecycle.save(&mut user).unwrap();

        assert!(report.is_aborted());
        assert!(report.transitions.contains(&LifecycleState::Invalid));
        assert_eq!(report.errors.get("email"), vec!["can't be blank"]);
        assert!(report.effects.is_empty());
        assert!(user.is_new_record());
    }

    #[test]
    fn test_persistence_failure_is_post_hoc() {
        let mut persistence = MockPersistence::new();
        persistence
            .expect_insert()
            .returning(|_| Err(CollaboratorError::Conflict("users.email".to_string())));
        let mailer = Arc::new(RecordingMailer::new());

        let lifecycle = Lifecycle::builder(engine(), Arc::new(persistence))
            .mailer(mailer.clone())
            .build();
        let mut user = Record::from_json("User", json!({"email": "ana@example.com"})).unwrap();

        let err = lifecycle.save(&mut user).unwrap_err();

        assert!(matches!(err, EngineError::Persistence(CollaboratorError::Conflict(_))));
        assert!(user.errors().is_empty());
        assert!(mailer.delivered().is_empty());
    }

    #[test]
    fn test_before_destroy_abort_keeps_record() {
        let mut persistence = MockPersistence::new();
        persistence.expect_delete().times(0);

        let lifecycle = Lifecycle::builder(engine(), Arc::new(persistence)).build();
        let mut user = Record::persisted("User", "u-1", json!({"email": "a@b.c", "active": true})).unwrap();

        let report = lifecycle.destroy(&mut user).unwrap();

        assert!(report.is_aborted());
        assert_eq!(report.aborted_by.as_deref(), Some("abort_if_still_active"));
        assert_eq!(report.errors.get("base"), vec!["Cannot delete an active user"]);
        assert!(!user.is_destroyed());
    }

    #[test]
    fn test_destroy_removes_file_after_commit() {
        let mut persistence = MockPersistence::new();
        persistence.expect_delete().times(1).returning(|_| Ok(()));
        let mut cleanup = MockFileCleanup::new();
        cleanup
            .expect_remove()
            .withf(|path| path.ends_with("cat.png"))
            .times(1)
            .returning(|_| Ok(()));

        let lifecycle = Lifecycle::builder(engine(), Arc::new(persistence))
            .file_cleanup(Arc::new(cleanup))
            .build();
        let mut picture =
            Record::persisted("PictureFile", "f-1", json!({"file_path": "/uploads/cat.png"})).unwrap();

        let report = lifecycle.destroy(&mut picture).unwrap();

        assert!(report.is_committed());
        assert!(picture.is_destroyed());
        assert_eq!(report.effects.len(), 1);
        assert_eq!(report.failed_effects, 0);
    }

    #[test]
    fn test_side_effect_failure_does_not_roll_back() {
        let mut persistence = MockPersistence::new();
        persistence.expect_insert().returning(|_| Ok("u-2".to_string()));
        let mut mailer = MockMailer::new();
        mailer
            .expect_deliver()
            .times(1)
            .returning(|_| Err(CollaboratorError::Unavailable("smtp".to_string())));

        let lifecycle = Lifecycle::builder(engine(), Arc::new(persistence))
            .mailer(Arc::new(mailer))
            .build();
        let mut user = Record::from_json("User", json!({"email": "ana@example.com"})).unwrap();

        let report = lifecycle.save(&mut user).unwrap();

        assert!(report.is_committed());
        assert_eq!(report.failed_effects, 1);
        assert!(user.is_persisted());
    }

    #[test]
    fn test_add_to_association() {
        let persistence = MockPersistence::new();
        let lifecycle = Lifecycle::builder(engine(), Arc::new(persistence)).build();
        let mut author = Record::persisted("Author", "a-1", json!({"name": "Ana"})).unwrap();

        let first = Record::from_json("Book", json!({"title": "One"})).unwrap();
        let report = lifecycle.add_to_association(&mut author, "books", first).unwrap();
        assert!(report.is_committed());
        assert_eq!(author.association("books")[0].get("stamped"), Some(&json!(true)));

        let second = Record::from_json("Book", json!({"title": "Two"})).unwrap();
        let report = lifecycle.add_to_association(&mut author, "books", second).unwrap();
        assert!(report.is_aborted());
        assert_eq!(report.errors.get("base"), vec!["full"]);
        assert_eq!(author.association_count("books"), 1);
    }
}
