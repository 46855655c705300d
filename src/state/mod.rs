//! 状态模型：值、语句、对话历史与状态迁移算法

pub mod history;
pub mod statement;
pub mod transition;
pub mod value;

pub use history::{Confirm, DialogueState, HistoryItem, ResultItem, ResultList};
pub use statement::{
    ArgDef, ArgDirection, ConfirmAnnotation, DeviceSelector, FunctionDef, FunctionType,
    InputParam, Invocation, SlotPath, Statement,
};
pub use transition::{
    compute_new_state, compute_prediction, prepare_context_for_prediction, Target,
    MAX_CONTEXT_SEGMENTS,
};
pub use value::{EntityValue, Location, Time, TimeValue, Value, ValueType};
