//! 状态迁移算法
//!
//! 三个互补操作推动状态机前进：
//! - compute_new_state：把预测的增量合并进旧状态（丢弃旧状态未确认后缀）
//! - compute_prediction：由前后两个完整状态反推预测增量（训练数据构造用）
//! - prepare_context_for_prediction：为预测器裁剪出有界的历史投影

use crate::state::history::{Confirm, DialogueState, HistoryItem};

/// 当前发言方：影响静默确认的方向与可见结果行数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    User,
    Agent,
}

/// 投影保留的已执行分段上限（更早的分段因上下文长度预算被丢弃）
pub const MAX_CONTEXT_SEGMENTS: usize = 3;

/// 将预测合并进旧状态，得到新一轮的完整状态。
///
/// 旧历史仅保留 Confirmed 前缀（未确认的后缀被新预测取代）；
/// 随后追加预测的全部条目。面向用户侧时，已接受、可执行且可静默确认的
/// 条目在浅克隆中直接提升为 Confirmed，免去无副作用查询的二次确认。
pub fn compute_new_state(
    state: Option<&DialogueState>,
    prediction: &DialogueState,
    for_target: Target,
) -> DialogueState {
    let mut next = DialogueState::new(
        prediction.policy.clone(),
        prediction.dialogue_act.clone(),
        prediction.dialogue_act_param.clone(),
    );

    if let Some(state) = state {
        for item in &state.history {
            if item.confirm != Confirm::Confirmed {
                break;
            }
            next.history.push(item.clone());
        }
    }

    for item in &prediction.history {
        let mut item = item.clone();
        if for_target == Target::User
            && item.confirm == Confirm::Accepted
            && item.statement.is_executable()
            && item.statement.should_auto_confirm()
        {
            item.confirm = Confirm::Confirmed;
        }
        next.history.push(item);
    }

    next
}

/// 由前后状态反推「预测器必须产出的增量」。
///
/// 注意：old 为 None 时也不能直接返回 new——新状态里可静默确认的条目
/// 已是 Confirmed，需要还原回 Accepted（compute_new_state 中提升的逆操作）。
///
/// 两侧历史在 Confirmed 前缀内必须结构相等；不等说明调用方有 bug，
/// 记录日志并 panic。
pub fn compute_prediction(
    old_state: Option<&DialogueState>,
    new_state: &DialogueState,
    for_target: Target,
) -> DialogueState {
    let mut delta = DialogueState::new(
        new_state.policy.clone(),
        new_state.dialogue_act.clone(),
        new_state.dialogue_act_param.clone(),
    );

    // 同步前进到 old 中第一个未确认条目：增量从那里开始
    let mut start = 0;
    if let Some(old_state) = old_state {
        let bound = old_state.history.len().min(new_state.history.len());
        while start < bound {
            let old_item = &old_state.history[start];
            if old_item.confirm != Confirm::Confirmed {
                break;
            }
            let new_item = &new_state.history[start];
            if old_item != new_item {
                tracing::error!(
                    old = %old_item.statement,
                    new = %new_item.statement,
                    index = start,
                    "history items unexpectedly different while computing prediction"
                );
                panic!("history items unexpectedly different in compute_prediction");
            }
            start += 1;
        }
    }

    for item in &new_state.history[start..] {
        assert!(
            item.results.is_none(),
            "prediction items must not carry results"
        );
        let mut item = HistoryItem::new(item.statement.clone(), item.confirm);
        if for_target == Target::User && item.statement.should_auto_confirm() {
            item.confirm = Confirm::Accepted;
        }
        delta.history.push(item);
    }

    delta
}

/// 为预测器准备有界的上下文投影。
///
/// 连续「同一话题」（compatible）的已执行条目合并为一段，仅留最后一条；
/// 至多保留最后 MAX_CONTEXT_SEGMENTS 段；每段克隆后把可见结果行裁到
/// 1（用户侧）或 3（智能体侧）。尚未执行的后缀原样追加——此处它们必定
/// 不是 Confirmed（带结果才允许 Confirmed，此断言过去抓到过别处的问题）。
pub fn prepare_context_for_prediction(
    context: Option<&DialogueState>,
    for_target: Target,
) -> Option<DialogueState> {
    let context = context?;
    let mut projected = DialogueState::new(
        context.policy.clone(),
        context.dialogue_act.clone(),
        context.dialogue_act_param.clone(),
    );

    let mut segments: Vec<&HistoryItem> = Vec::new();
    let mut rest = 0;
    while rest < context.history.len() {
        let item = &context.history[rest];
        if item.results.is_none() {
            break;
        }
        match segments.last_mut() {
            Some(last) if item.compatible(last) => *last = item,
            _ => segments.push(item),
        }
        rest += 1;
    }

    if segments.len() > MAX_CONTEXT_SEGMENTS {
        segments.drain(..segments.len() - MAX_CONTEXT_SEGMENTS);
    }

    let visible_rows = match for_target {
        Target::User => 1,
        Target::Agent => 3,
    };
    for segment in segments {
        let mut item = segment.clone();
        if let Some(results) = item.results.as_mut() {
            results.results.truncate(visible_rows);
        }
        projected.history.push(item);
    }

    for item in &context.history[rest..] {
        assert!(item.results.is_none(), "unexecuted suffix must not carry results");
        assert!(
            item.confirm != Confirm::Confirmed,
            "confirmed item without results while preparing context"
        );
        projected.history.push(item.clone());
    }

    Some(projected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::history::{ResultItem, ResultList};
    use crate::state::statement::{
        ArgDef, ConfirmAnnotation, FunctionDef, FunctionType, InputParam, Invocation, Statement,
    };
    use crate::state::value::{EntityValue, Value, ValueType};

    fn search_fn(name: &str) -> FunctionDef {
        FunctionDef {
            kind: "com.yelp".into(),
            name: name.into(),
            function_type: FunctionType::Query,
            confirm: Some(ConfirmAnnotation::Auto),
            is_list: true,
            is_monitorable: false,
            args: vec![
                ArgDef::input("cuisine", ValueType::String, false),
                ArgDef::output("id", ValueType::Entity { entity_type: "com.yelp:restaurant".into() }),
            ],
            require_either: vec![],
            error_codes: vec![],
        }
    }

    fn search_stmt(cuisine: &str) -> Statement {
        Statement::command(vec![Invocation::new(
            search_fn("restaurant"),
            vec![InputParam::new("cuisine", Value::String(cuisine.into()))],
        )])
    }

    fn executed(statement: Statement, rows: usize) -> HistoryItem {
        let mut item = HistoryItem::new(statement, Confirm::Confirmed);
        let results: Vec<ResultItem> = (0..rows)
            .map(|i| {
                let mut values = indexmap::IndexMap::new();
                values.insert(
                    "id".to_string(),
                    Value::Entity(EntityValue::resolved(
                        "com.yelp:restaurant",
                        format!("r{i}"),
                        format!("Restaurant {i}"),
                    )),
                );
                ResultItem::new(values)
            })
            .collect();
        item.results = Some(ResultList {
            count: results.len(),
            results,
            more: false,
            error: None,
        });
        item
    }

    fn state_with(history: Vec<HistoryItem>) -> DialogueState {
        DialogueState::new("transaction", "execute", None).with_history(history)
    }

    #[test]
    fn test_compute_new_state_drops_unconfirmed_suffix() {
        let old = state_with(vec![
            executed(search_stmt("italian"), 2),
            HistoryItem::new(search_stmt("thai"), Confirm::Proposed),
        ]);
        let prediction = state_with(vec![HistoryItem::new(
            search_stmt("mexican"),
            Confirm::Accepted,
        )]);

        let merged = compute_new_state(Some(&old), &prediction, Target::User);
        assert_eq!(merged.history.len(), 2);
        assert!(merged.history[0].results.is_some());
        assert_eq!(merged.history[1].statement, search_stmt("mexican"));
    }

    #[test]
    fn test_compute_new_state_promotes_auto_confirmable_for_user() {
        let prediction = state_with(vec![HistoryItem::new(
            search_stmt("italian"),
            Confirm::Accepted,
        )]);

        let merged = compute_new_state(None, &prediction, Target::User);
        assert_eq!(merged.history[0].confirm, Confirm::Confirmed);
        assert!(merged.history[0].results.is_none());

        let merged = compute_new_state(None, &prediction, Target::Agent);
        assert_eq!(merged.history[0].confirm, Confirm::Accepted);
    }

    #[test]
    fn test_prediction_then_merge_round_trips() {
        let old = state_with(vec![executed(search_stmt("italian"), 1)]);
        let mut new = state_with(vec![
            executed(search_stmt("italian"), 1),
            HistoryItem::new(search_stmt("thai"), Confirm::Confirmed),
        ]);
        new.history[1].results = None;

        let prediction = compute_prediction(Some(&old), &new, Target::User);
        assert_eq!(prediction.history.len(), 1);
        assert_eq!(prediction.history[0].confirm, Confirm::Accepted);

        let merged = compute_new_state(Some(&old), &prediction, Target::User);
        assert_eq!(merged.history.len(), new.history.len());
        assert_eq!(merged.history[0], new.history[0]);
        assert_eq!(merged.history[1].statement, new.history[1].statement);
        assert_eq!(merged.history[1].confirm, Confirm::Confirmed);
    }

    #[test]
    #[should_panic(expected = "unexpectedly different")]
    fn test_prediction_panics_on_mismatched_prefix() {
        let old = state_with(vec![executed(search_stmt("italian"), 1)]);
        let new = state_with(vec![executed(search_stmt("thai"), 1)]);
        compute_prediction(Some(&old), &new, Target::User);
    }

    #[test]
    fn test_context_keeps_at_most_three_segments() {
        let history: Vec<HistoryItem> = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|name| {
                let stmt = Statement::command(vec![Invocation::new(search_fn(name), vec![])]);
                executed(stmt, 2)
            })
            .collect();
        let context = state_with(history);

        let projected = prepare_context_for_prediction(Some(&context), Target::Agent).unwrap();
        assert_eq!(projected.history.len(), MAX_CONTEXT_SEGMENTS);
        // 留下的是最后三段
        assert_eq!(projected.history[0].statement.function_keys(), vec!["com.yelp:c"]);
    }

    #[test]
    fn test_context_merges_compatible_runs_and_trims_rows() {
        let context = state_with(vec![
            executed(search_stmt("italian"), 5),
            executed(search_stmt("thai"), 5),
            HistoryItem::new(search_stmt("mexican"), Confirm::Accepted),
        ]);

        // 两次同函数查询合并为一段，只留最后一条
        let projected = prepare_context_for_prediction(Some(&context), Target::User).unwrap();
        assert_eq!(projected.history.len(), 2);
        assert_eq!(
            projected.history[0].statement,
            search_stmt("thai"),
        );
        assert_eq!(projected.history[0].results.as_ref().unwrap().results.len(), 1);
        // 未执行后缀原样保留
        assert!(projected.history[1].results.is_none());

        let projected = prepare_context_for_prediction(Some(&context), Target::Agent).unwrap();
        assert_eq!(projected.history[0].results.as_ref().unwrap().results.len(), 3);
    }

    #[test]
    fn test_context_of_none_is_none() {
        assert!(prepare_context_for_prediction(None, Target::User).is_none());
    }
}
