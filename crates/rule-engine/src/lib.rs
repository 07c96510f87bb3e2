//! 声明式记录校验与回调规则引擎
//!
//! 提供可复用的记录校验能力，支持：
//! - 代码或 JSON 定义的校验规则与回调，注册期编译
//! - 守卫条件与校验上下文
//! - 累积型错误集合与 strict 规则
//! - save / destroy / 关联新增的回调生命周期
//! - 唯一性查询、持久化、邮件等协作方接口

pub mod callbacks;
pub mod capabilities;
pub mod catalog;
pub mod cli;
pub mod collaborators;
pub mod compiler;
pub mod engine;
pub mod error;
pub mod error_set;
pub mod guards;
pub mod lifecycle;
pub mod memory_store;
pub mod messages;
pub mod models;
pub mod predicates;
pub mod record;
pub mod registry;

pub use callbacks::{CallbackContext, CallbackOutcome, Flow};
pub use capabilities::{Capabilities, CapabilitiesBuilder, RecordValidator, ValidatorContext};
pub use collaborators::{
    CollaboratorError, FileCleanup, FsFileCleanup, LoggingMailer, LoggingNotifier, MailMessage, Mailer, Notification,
    Notifier, Persistence, RecordingMailer, SideEffect, UniquenessLookup, UniquenessQuery,
};
pub use engine::{Evaluation, RuleDecision, RuleEngine, RuleEngineBuilder, TraceEntry};
pub use error::{EngineError, Result};
pub use error_set::{ErrorSet, FieldError};
pub use guards::Guard;
pub use lifecycle::{Lifecycle, LifecycleReport, LifecycleState, Operation};
pub use memory_store::MemoryStore;
pub use models::{
    CallbackDef, ComparisonOptions, DefinitionDocument, LengthOptions, NumericalityOptions, Operand,
    RecordTypeDefinition, RuleKind, Trigger, ValidationContext, ValidationRule,
};
pub use record::Record;
pub use registry::{Registry, RegistryBuilder, RegistryStats};
