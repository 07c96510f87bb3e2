//! 记录校验命令行工具
//!
//! 加载配置与可观测性后分发到各子命令。

use std::io;
use std::process::ExitCode;

use clap::Parser;
use record_rules::cli::{Cli, CommandRunner, Commands};
use record_shared::config::AppConfig;
use record_shared::observability;
use tracing::error;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // 统一加载配置：config/default.toml、config/{env}.toml，再由 RECORD_RULES_ 环境变量覆盖
    let mut config = AppConfig::load("record-rules").unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });
    if let Some(level) = &cli.log_level {
        config.observability.log_level = level.clone();
    }

    if let Err(e) = observability::init(&config.service_name, &config.observability) {
        eprintln!("Failed to initialize observability: {}", e);
    }

    let runner = CommandRunner::new(config.engine.clone(), cli.definitions.clone());
    let mut stdout = io::stdout().lock();

    let result = match &cli.command {
        Commands::Validate {
            record_type,
            record,
            context,
            trace,
            seed,
        } => runner.run_validate(
            record_type,
            record,
            context.as_deref(),
            *trace,
            seed.as_deref(),
            &mut stdout,
        ),
        Commands::Save {
            record_type,
            record,
            context,
            seed,
        } => runner.run_save(record_type, record, context.as_deref(), seed.as_deref(), &mut stdout),
        Commands::ListTypes => runner.run_list_types(&mut stdout),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(error = %e, "命令执行失败");
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
