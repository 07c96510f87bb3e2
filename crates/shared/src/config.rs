//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

use crate::observability::ObservabilityConfig;

/// 环境变量前缀（RECORD_RULES_ENGINE__TRACE_ENABLED -> engine.trace_enabled）
pub const ENV_PREFIX: &str = "RECORD_RULES";

/// 规则引擎配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// 是否记录每条规则的评估追踪
    pub trace_enabled: bool,
    /// 声明式规则定义文件（JSON），为空时使用内置模型目录
    pub definitions_path: Option<String>,
    /// 未显式指定时使用的校验上下文（如 "account_setup"）
    pub default_context: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            trace_enabled: false,
            definitions_path: None,
            default_context: None,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub engine: EngineSettings,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 配置目录取自 `CONFIG_DIR`（默认 `config`），环境取自 `RECORD_RULES_ENV`
    /// （默认 `development`）。
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("RECORD_RULES_ENV").unwrap_or_else(|_| "development".to_string());
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        Self::load_from(Path::new(&config_dir), service_name, &env)
    }

    /// 从指定目录加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. {dir}/default.toml
    /// 2. {dir}/{environment}.toml
    /// 3. 环境变量（RECORD_RULES_ 前缀，嵌套字段用双下划线分隔）
    pub fn load_from(dir: &Path, service_name: &str, environment: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", environment)?
            .add_source(File::from(dir.join("default.toml")).required(false))
            .add_source(File::from(dir.join(format!("{}.toml", environment))).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert!(!config.engine.trace_enabled);
        assert!(config.engine.definitions_path.is_none());
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_load_without_files_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(dir.path(), "record-rules", "test").unwrap();

        assert_eq!(config.service_name, "record-rules");
        assert_eq!(config.environment, "test");
        assert!(!config.engine.trace_enabled);
    }

    #[test]
    fn test_environment_file_overrides_default() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            "[engine]\ntrace_enabled = false\ndefault_context = \"create\"\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("staging.toml"),
            "[engine]\ntrace_enabled = true\n\n[observability]\nlog_format = \"json\"\n",
        )
        .unwrap();

        let config = AppConfig::load_from(dir.path(), "record-rules", "staging").unwrap();

        assert!(config.engine.trace_enabled);
        assert_eq!(config.engine.default_context.as_deref(), Some("create"));
        assert_eq!(config.observability.log_format, "json");
    }
}
