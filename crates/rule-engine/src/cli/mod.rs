//! CLI 模块
//!
//! 提供命令行接口，支持以下功能：
//!
//! - `validate` - 按注册表校验一条记录
//! - `save` - 在内存存储上执行 save 生命周期
//! - `list-types` - 输出注册表统计
//!
//! # 使用示例
//!
//! ```bash
//! # 校验记录（无效时退出码为 1，strict 失败为 2）
//! record-rules validate -t Person -r person.json --trace
//!
//! # 使用声明式定义并指定上下文
//! record-rules validate -t Persontwo -r p.json -c account_setup -d definitions/catalog.json
//!
//! # 在预置数据上保存
//! record-rules save -t Account -r account.json --seed seed.json
//! ```

pub mod commands;
pub mod runner;

pub use commands::{Cli, Commands};
pub use runner::{CommandRunner, EXIT_INVALID, EXIT_STRICT};
