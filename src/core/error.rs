//! 对话错误类型
//!
//! 分三类处理：查找失败（可恢复，向用户提示后仅放弃当前槽位）、
//! 取消（展开本轮、丢弃未提交上下文、可携带重注入意图）、
//! 其余错误原样向上传播。不变量违规不走错误通道，直接 assert/panic。

use thiserror::Error;

use crate::state::DialogueState;

/// 对话运行过程中可能出现的错误（查找失败、取消、编译/执行失败等）
#[derive(Error, Debug)]
pub enum DialogueError {
    /// 实体查找无候选：提示用户后放弃当前槽位解析
    #[error("No entity of type {entity_type} matching \"{name}\"")]
    EntityNotFound { entity_type: String, name: String },

    #[error("Location not found: {0}")]
    LocationNotFound(String),

    #[error("Contact not found: {0}")]
    ContactNotFound(String),

    /// 用户取消（「算了」/话题打断）：展开本轮；intent 为下一轮要处理的重注入意图
    #[error("Dialogue cancelled")]
    Cancelled { intent: Option<Box<DialogueState>> },

    /// 语句编译失败：说明上游的值解析有 bug，而非运行时状况
    #[error("Statement failed to compile: {0}")]
    CompileFailed(String),

    #[error("Statement execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl DialogueError {
    /// 是否为可恢复的「未找到」类错误（重新询问用户即可，无需放弃整轮）
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DialogueError::EntityNotFound { .. }
                | DialogueError::LocationNotFound(_)
                | DialogueError::ContactNotFound(_)
        )
    }

    pub fn cancelled() -> Self {
        DialogueError::Cancelled { intent: None }
    }
}
