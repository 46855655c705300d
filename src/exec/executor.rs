//! 语句执行抽象
//!
//! 协调器只面向这个 trait。State 是执行器的私有状态（模拟执行器放
//! 随机数发生器与缓存，真实执行器放平台句柄），随对话逐轮穿线传递，
//! 所有权交进来、新状态交回去。

use async_trait::async_trait;

use crate::core::DialogueError;
use crate::state::{ResultList, Statement};

/// 可执行语句的后端
#[async_trait]
pub trait StatementExecutor: Send + Sync {
    /// 执行器的逐轮私有状态
    type State: Send;

    /// 执行一条完全具体化的语句。
    /// state 为 None 表示对话的第一次执行，执行器自行初始化。
    async fn execute_statement(
        &self,
        statement: &Statement,
        state: Option<Self::State>,
    ) -> Result<(ResultList, Self::State), DialogueError>;
}
