//! 规则引擎错误类型
//!
//! 累积型校验错误不走这里，它们进入记录的 `ErrorSet`。
//! 这里只包含会中断当前评估批次或生命周期操作的错误。

use crate::collaborators::CollaboratorError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// 注册期的配置错误：未知守卫、非法参数、无效正则等
    #[error("规则配置错误: {0}")]
    Config(String),

    #[error("记录类型未注册: {0}")]
    RecordTypeNotFound(String),

    #[error("无效的记录数据: {0}")]
    InvalidRecord(String),

    /// strict 规则失败，直接终止评估
    #[error("strict 校验失败: {record_type}.{field} {message}")]
    StrictValidation {
        record_type: String,
        field: String,
        message: String,
    },

    /// 自定义校验器抛出的异常
    #[error("自定义校验器 '{validator}' 执行失败: {message}")]
    Validator { validator: String, message: String },

    #[error("回调 '{action}' 执行失败: {message}")]
    Callback { action: String, message: String },

    #[error("唯一性查询失败: {0}")]
    Lookup(CollaboratorError),

    /// 持久化协作方在校验通过后失败，属于事后错误
    #[error("持久化失败: {0}")]
    Persistence(CollaboratorError),

    #[error("JSON 序列化错误: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::RecordTypeNotFound(_) => "RECORD_TYPE_NOT_FOUND",
            Self::InvalidRecord(_) => "INVALID_RECORD",
            Self::StrictValidation { .. } => "STRICT_VALIDATION_FAILED",
            Self::Validator { .. } => "VALIDATOR_FAILED",
            Self::Callback { .. } => "CALLBACK_FAILED",
            Self::Lookup(_) => "LOOKUP_FAILED",
            Self::Persistence(_) => "PERSISTENCE_FAILED",
            Self::JsonError(_) => "JSON_ERROR",
        }
    }

    /// 是否为可重试错误（只有协作方的暂时性故障可以重试，由调用方决定策略）
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Lookup(e) | Self::Persistence(e) => e.is_transient(),
            _ => false,
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
