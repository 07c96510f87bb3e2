//! CLI 命令定义
//!
//! 使用 clap derive 宏定义命令行接口结构。

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// 记录校验命令行工具
#[derive(Parser, Debug)]
#[command(name = "record-rules")]
#[command(version, about = "声明式记录校验与回调规则引擎")]
#[command(propagate_version = true)]
pub struct Cli {
    /// 覆盖配置中的日志级别 (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// 声明式规则定义文件（JSON），覆盖配置中的 engine.definitions_path
    #[arg(short, long, global = true)]
    pub definitions: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// 子命令枚举
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 校验一条记录并以 JSON 输出错误集合
    ///
    /// 记录文件中带 `id` 字段时按已持久化记录处理（默认上下文为 update）。
    Validate {
        /// 记录类型
        #[arg(short = 't', long = "type")]
        record_type: String,

        /// 记录 JSON 文件
        #[arg(short, long)]
        record: PathBuf,

        /// 校验上下文（create、update 或自定义名）
        #[arg(short, long)]
        context: Option<String>,

        /// 输出每条规则的评估追踪
        #[arg(long)]
        trace: bool,

        /// 唯一性查询使用的预置数据
        #[arg(long)]
        seed: Option<PathBuf>,
    },

    /// 执行 save 生命周期
    ///
    /// 在内存存储上运行回调、校验与持久化，输出生命周期报告。
    Save {
        /// 记录类型
        #[arg(short = 't', long = "type")]
        record_type: String,

        /// 记录 JSON 文件
        #[arg(short, long)]
        record: PathBuf,

        /// 校验上下文
        #[arg(short, long)]
        context: Option<String>,

        /// 预置数据文件：`{"Type": [{...}, ...]}`
        #[arg(long)]
        seed: Option<PathBuf>,
    },

    /// 列出已注册的记录类型及规则统计
    ListTypes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_validate() {
        let cli = Cli::parse_from([
            "record-rules",
            "validate",
            "-t",
            "Person",
            "-r",
            "person.json",
            "--context",
            "account_setup",
            "--trace",
        ]);

        match cli.command {
            Commands::Validate {
                record_type,
                context,
                trace,
                ..
            } => {
                assert_eq!(record_type, "Person");
                assert_eq!(context.as_deref(), Some("account_setup"));
                assert!(trace);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_definitions_flag() {
        let cli = Cli::parse_from(["record-rules", "list-types", "--definitions", "rules.json"]);
        assert!(matches!(cli.command, Commands::ListTypes));
        assert_eq!(cli.definitions, Some(PathBuf::from("rules.json")));
    }
}
