//! 外部协作方
//!
//! 持久化、唯一性查询、邮件、文件清理、通知都在引擎之外，这里只定义接口和参考实现。
//! 所有调用都是同步阻塞的，不做重试，超时与重试策略由调用方负责。

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::record::Record;

/// 协作方错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("唯一约束冲突: {0}")]
    Conflict(String),

    #[error("记录不存在: {0}")]
    NotFound(String),

    #[error("服务不可用: {0}")]
    Unavailable(String),

    #[error("IO 错误: {0}")]
    Io(String),
}

impl CollaboratorError {
    /// 暂时性故障，调用方可以选择重试
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Io(_))
    }
}

impl From<std::io::Error> for CollaboratorError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

pub type CollaboratorResult<T> = std::result::Result<T, CollaboratorError>;

/// 唯一性查询条件
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UniquenessQuery {
    pub record_type: String,
    pub field: String,
    pub value: Value,
    /// 作用域字段及其当前值
    pub scope: Vec<(String, Value)>,
    pub case_sensitive: bool,
    /// 已持久化记录查询时排除自身
    pub exclude_id: Option<String>,
}

/// 唯一性查询协作方
#[cfg_attr(test, automock)]
pub trait UniquenessLookup: Send + Sync {
    /// 是否存在冲突的已持久化记录
    fn exists(&self, query: &UniquenessQuery) -> CollaboratorResult<bool>;
}

/// 持久化协作方
#[cfg_attr(test, automock)]
pub trait Persistence: Send + Sync {
    /// 插入新记录，返回分配的 id
    fn insert(&self, record: &Record) -> CollaboratorResult<String>;

    fn update(&self, record: &Record) -> CollaboratorResult<()>;

    fn delete(&self, record: &Record) -> CollaboratorResult<()>;
}

/// 邮件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MailMessage {
    pub mailer: String,
    pub template: String,
    pub to: String,
    pub subject: String,
}

/// 提交后执行的副作用
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SideEffect {
    Mail(MailMessage),
    RemoveFile { path: PathBuf },
    Notify(Notification),
}

/// 站内通知
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub record_type: String,
    pub record_id: Option<String>,
    pub event: String,
}

impl SideEffect {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Mail(_) => "mail",
            Self::RemoveFile { .. } => "remove_file",
            Self::Notify(_) => "notify",
        }
    }
}

/// 邮件协作方，失败不会回滚提交
#[cfg_attr(test, automock)]
pub trait Mailer: Send + Sync {
    fn deliver(&self, message: &MailMessage) -> CollaboratorResult<()>;
}

/// 文件清理协作方
#[cfg_attr(test, automock)]
pub trait FileCleanup: Send + Sync {
    fn remove(&self, path: &Path) -> CollaboratorResult<()>;
}

/// 通知协作方
#[cfg_attr(test, automock)]
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> CollaboratorResult<()>;
}

/// 只写日志的邮件实现
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingMailer;

impl Mailer for LoggingMailer {
    fn deliver(&self, message: &MailMessage) -> CollaboratorResult<()> {
        info!(
            mailer = %message.mailer,
            template = %message.template,
            to = %message.to,
            subject = %message.subject,
            "邮件已投递"
        );
        Ok(())
    }
}

/// 记录所有投递的邮件，测试与命令行使用
#[derive(Debug, Default)]
pub struct RecordingMailer {
    outbox: Mutex<Vec<MailMessage>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<MailMessage> {
        self.outbox.lock().clone()
    }
}

impl Mailer for RecordingMailer {
    fn deliver(&self, message: &MailMessage) -> CollaboratorResult<()> {
        self.outbox.lock().push(message.clone());
        Ok(())
    }
}

/// 删除本地文件；文件不存在时什么也不做
#[derive(Debug, Default, Clone, Copy)]
pub struct FsFileCleanup;

impl FileCleanup for FsFileCleanup {
    fn remove(&self, path: &Path) -> CollaboratorResult<()> {
        if path.exists() {
            std::fs::remove_file(path)?;
            info!(path = %path.display(), "孤立文件已删除");
        } else {
            debug!(path = %path.display(), "文件不存在，跳过删除");
        }
        Ok(())
    }
}

/// 只写日志的通知实现
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifier;

impl Notifier for LoggingNotifier {
    fn notify(&self, notification: &Notification) -> CollaboratorResult<()> {
        info!(
            record_type = %notification.record_type,
            record_id = ?notification.record_id,
            event = %notification.event,
            "通知已发送"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_fs_cleanup_removes_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("picture.png");
        fs::write(&path, b"png").unwrap();

        FsFileCleanup.remove(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_fs_cleanup_ignores_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FsFileCleanup.remove(&dir.path().join("missing.png")).is_ok());
    }

    #[test]
    fn test_recording_mailer() {
        let mailer = RecordingMailer::new();
        let message = MailMessage {
            mailer: "user_mailer".to_string(),
            template: "welcome_email".to_string(),
            to: "ana@example.com".to_string(),
            subject: "Welcome to Our Platform!".to_string(),
        };

        mailer.deliver(&message).unwrap();
        assert_eq!(mailer.delivered(), vec![message]);
    }

    #[test]
    fn test_transient_errors() {
        assert!(CollaboratorError::Unavailable("x".into()).is_transient());
        assert!(!CollaboratorError::Conflict("x".into()).is_transient());
    }
}
