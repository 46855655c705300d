//! Wren - Rust 任务型对话核心
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分层（可恢复 / 取消 / 致命）
//! - **exec**: 执行协调器、执行器抽象与模拟实现
//! - **observability**: tracing 初始化
//! - **resolve**: 槽位消歧与具体化（线索收集、实体匹配、外部能力接口）
//! - **state**: 对话状态模型与状态迁移算法

pub mod config;
pub mod core;
pub mod exec;
pub mod observability;
pub mod resolve;
pub mod state;

pub use crate::core::DialogueError;
pub use crate::exec::{
    ExecutionCoordinator, SimulatedExecutor, SimulatorOptions, StatementExecutor,
};
pub use crate::resolve::DialogueDelegate;
pub use crate::state::{DialogueState, Statement};
