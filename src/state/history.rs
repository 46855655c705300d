//! 对话状态容器
//!
//! DialogueState 表示「到目前为止的整段对话」：策略名、对话动作与有序语句历史。
//! 所有状态变换都返回新状态（或显式克隆），持有旧状态的读者看到的是稳定快照。

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::state::statement::Statement;
use crate::state::value::Value;

/// 历史条目的确认阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confirm {
    /// 智能体提出、用户尚未接受
    Proposed,
    /// 用户已接受、尚未（静默或显式）确认
    Accepted,
    /// 已确认，可执行
    Confirmed,
}

/// 一行结果：输出字段名 -> 类型化值（保持 schema 输出顺序）
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResultItem {
    pub values: IndexMap<String, Value>,
}

impl ResultItem {
    pub fn new(values: IndexMap<String, Value>) -> Self {
        Self { values }
    }
}

/// 一条语句的执行结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultList {
    /// 可见行（至多 PAGE_SIZE 条）
    pub results: Vec<ResultItem>,
    /// 饱和计数（至多 MORE_SIZE）
    pub count: usize,
    /// 是否还有未物化的更多行
    pub more: bool,
    pub error: Option<Value>,
}

impl ResultList {
    pub fn empty() -> Self {
        Self {
            results: Vec::new(),
            count: 0,
            more: false,
            error: None,
        }
    }
}

/// 历史条目：语句 + 结果 + 确认阶段。
/// 不变量：results 为 Some 时 confirm 必为 Confirmed（反向不要求立即成立）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub statement: Statement,
    pub results: Option<ResultList>,
    pub confirm: Confirm,
}

impl HistoryItem {
    pub fn new(statement: Statement, confirm: Confirm) -> Self {
        Self {
            statement,
            results: None,
            confirm,
        }
    }

    /// 上下文压缩用的等价性：调用的函数键序列相同即视为「同一话题」
    pub fn compatible(&self, other: &HistoryItem) -> bool {
        self.statement.function_keys() == other.statement.function_keys()
    }
}

/// 对话状态：策略、对话动作（及可选参数）与语句历史
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueState {
    pub policy: String,
    pub dialogue_act: String,
    pub dialogue_act_param: Option<Value>,
    pub history: Vec<HistoryItem>,
}

impl DialogueState {
    pub fn new(
        policy: impl Into<String>,
        dialogue_act: impl Into<String>,
        dialogue_act_param: Option<Value>,
    ) -> Self {
        Self {
            policy: policy.into(),
            dialogue_act: dialogue_act.into(),
            dialogue_act_param,
            history: Vec::new(),
        }
    }

    pub fn with_history(mut self, history: Vec<HistoryItem>) -> Self {
        self.history = history;
        self
    }

    /// 校验 results/confirm 不变量（调试断言用）
    pub fn check_invariants(&self) {
        for item in &self.history {
            if item.results.is_some() {
                assert_eq!(
                    item.confirm,
                    Confirm::Confirmed,
                    "history item with results must be confirmed"
                );
            }
        }
    }
}
