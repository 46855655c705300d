//! 执行协调器
//!
//! 拿到一个新状态后，找出所有还没有结果的历史条目，逐个补齐默认参数、
//! 走具体化流水线（未确认的条目也提前填槽，等用户点头即可立刻执行）、
//! 把可静默确认的已接受条目提升为已确认，再把已确认的交给执行器。
//! 输入状态不被修改：第一次需要写入时才整体克隆。

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use crate::core::DialogueError;
use crate::exec::executor::StatementExecutor;
use crate::resolve::{collect_hints, prepare_for_execution, DialogueDelegate};
use crate::state::{Confirm, DialogueState};

/// 一轮执行的产出
#[derive(Debug)]
pub struct ExecutionOutcome<S> {
    /// 补上结果后的新状态（未执行任何条目时是输入状态的等价克隆）
    pub state: DialogueState,
    /// 穿线传递的执行器私有状态
    pub exec_state: Option<S>,
    /// 本轮是否改动了状态（执行了语句，或只是提前填了槽）
    pub changed: bool,
}

/// 对话执行协调器
pub struct ExecutionCoordinator<E: StatementExecutor> {
    executor: E,
    delegate: Arc<dyn DialogueDelegate>,
    conversation_id: Uuid,
}

impl<E: StatementExecutor> ExecutionCoordinator<E> {
    pub fn new(executor: E, delegate: Arc<dyn DialogueDelegate>) -> Self {
        Self {
            executor,
            delegate,
            conversation_id: Uuid::new_v4(),
        }
    }

    pub fn with_conversation_id(mut self, conversation_id: Uuid) -> Self {
        self.conversation_id = conversation_id;
        self
    }

    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    /// 执行状态里所有已确认且无结果的条目。
    ///
    /// 消歧线索只在进入时收集一次：本轮新产生的结果不回流给本轮的
    /// 后续条目（它们引用的是上一轮用户已经看到的内容）。
    /// 无结果但未确认的条目跳过执行、保留在状态里等待用户表态。
    pub async fn execute(
        &self,
        state: &DialogueState,
        private_state: Option<E::State>,
    ) -> Result<ExecutionOutcome<E::State>, DialogueError> {
        let hints = collect_hints(state);
        let mut next: Option<DialogueState> = None;
        let mut exec_state = private_state;
        let mut changed = false;

        for index in 0..state.history.len() {
            if state.history[index].results.is_some() {
                continue;
            }

            // 无结果的条目至少会被填槽，本轮即算有改动
            changed = true;
            let next_state = next.get_or_insert_with(|| state.clone());
            let item = &mut next_state.history[index];
            item.statement.add_default_params();
            prepare_for_execution(&mut item.statement, &hints, self.delegate.as_ref()).await?;

            if item.confirm == Confirm::Accepted && item.statement.should_auto_confirm() {
                item.confirm = Confirm::Confirmed;
            }
            if item.confirm != Confirm::Confirmed {
                continue;
            }
            assert!(
                item.statement.is_executable(),
                "confirmed statement not executable after preparation: {}",
                item.statement
            );

            let started = std::time::Instant::now();
            let (results, new_exec_state) = self
                .executor
                .execute_statement(&item.statement, exec_state.take())
                .await?;

            let audit = json!({
                "conversation_id": self.conversation_id.to_string(),
                "functions": item.statement.function_keys(),
                "statement": item.statement.to_string(),
                "row_count": results.count,
                "more": results.more,
                "has_error": results.error.is_some(),
                "duration_ms": started.elapsed().as_millis() as u64,
            });
            tracing::info!(audit = %audit.to_string(), "statement executed");

            item.results = Some(results);
            exec_state = Some(new_exec_state);
        }

        let state = next.unwrap_or_else(|| state.clone());
        state.check_invariants();
        Ok(ExecutionOutcome { state, exec_state, changed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use indexmap::IndexMap;
    use std::sync::Mutex;

    use crate::resolve::{Contact, ContactCategory, DeviceInfo, EntityRecord};
    use crate::state::{
        ArgDef, ConfirmAnnotation, FunctionDef, FunctionType, HistoryItem, Invocation, Location,
        ResultItem, ResultList, Statement, Value, ValueType,
    };

    /// 逐条记录被执行语句的假执行器
    #[derive(Default)]
    struct RecordingExecutor {
        executed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StatementExecutor for RecordingExecutor {
        type State = u32;

        async fn execute_statement(
            &self,
            statement: &Statement,
            state: Option<u32>,
        ) -> Result<(ResultList, u32), DialogueError> {
            self.executed.lock().unwrap().push(statement.to_string());
            let mut values = IndexMap::new();
            values.insert("answer".to_string(), Value::Number(42.0));
            let results = ResultList {
                results: vec![ResultItem::new(values)],
                count: 1,
                more: false,
                error: None,
            };
            Ok((results, state.unwrap_or(0) + 1))
        }
    }

    struct NoopDelegate;

    #[async_trait]
    impl crate::resolve::DialogueDelegate for NoopDelegate {
        async fn devices_of_kind(&self, kind: &str) -> Vec<DeviceInfo> {
            vec![DeviceInfo {
                kind: kind.into(),
                unique_id: format!("{kind}-1"),
                name: kind.into(),
            }]
        }

        async fn try_configure_device(
            &self,
            _kind: &str,
        ) -> Result<Option<DeviceInfo>, DialogueError> {
            Ok(None)
        }

        async fn disambiguate(
            &self,
            _category: &str,
            _name: Option<&str>,
            _choices: &[String],
        ) -> Result<usize, DialogueError> {
            Ok(0)
        }

        async fn lookup_contact(
            &self,
            _category: ContactCategory,
            _name: &str,
        ) -> Result<Vec<Contact>, DialogueError> {
            Ok(vec![])
        }

        async fn contact_display(&self, _principal: &str) -> Option<String> {
            None
        }

        async fn device_display(&self, _id: &str) -> Option<String> {
            None
        }

        async fn lookup_location(
            &self,
            _name: &str,
            _previous: &[Location],
        ) -> Result<Option<Location>, DialogueError> {
            Ok(None)
        }

        async fn lookup_entity_candidates(
            &self,
            _entity_type: &str,
            _name: &str,
        ) -> Result<Vec<EntityRecord>, DialogueError> {
            Ok(vec![])
        }

        async fn resolve_user_context(&self, variable: &str) -> Result<Value, DialogueError> {
            Err(DialogueError::ExecutionFailed(format!(
                "unknown context variable {variable}"
            )))
        }

        fn preferred_unit(&self, _dimension: &str) -> Option<String> {
            None
        }
    }

    fn query_fn(name: &str, confirm: ConfirmAnnotation) -> FunctionDef {
        FunctionDef {
            kind: "org.example".into(),
            name: name.into(),
            function_type: FunctionType::Query,
            confirm: Some(confirm),
            is_list: false,
            is_monitorable: false,
            args: vec![ArgDef::output("answer", ValueType::Number)],
            require_either: vec![],
            error_codes: vec![],
        }
    }

    fn item(name: &str, confirm: Confirm) -> HistoryItem {
        HistoryItem::new(
            Statement::command(vec![Invocation::new(
                query_fn(name, ConfirmAnnotation::Auto),
                vec![],
            )]),
            confirm,
        )
    }

    fn coordinator() -> ExecutionCoordinator<RecordingExecutor> {
        ExecutionCoordinator::new(RecordingExecutor::default(), Arc::new(NoopDelegate))
    }

    #[tokio::test]
    async fn test_executes_confirmed_items_only() {
        let state = DialogueState::new("transaction", "execute", None).with_history(vec![
            item("alpha", Confirm::Confirmed),
            item("beta", Confirm::Proposed),
            item("gamma", Confirm::Confirmed),
        ]);

        let coordinator = coordinator();
        let outcome = coordinator.execute(&state, None).await.unwrap();
        assert!(outcome.changed);
        assert!(outcome.state.history[0].results.is_some());
        assert!(outcome.state.history[1].results.is_none());
        // 中间有未确认条目也不挡住后面的已确认条目
        assert!(outcome.state.history[2].results.is_some());
        assert_eq!(outcome.exec_state, Some(2));
    }

    #[tokio::test]
    async fn test_promotes_accepted_auto_confirmable() {
        let state = DialogueState::new("transaction", "execute", None)
            .with_history(vec![item("alpha", Confirm::Accepted)]);

        let outcome = coordinator().execute(&state, None).await.unwrap();
        assert_eq!(outcome.state.history[0].confirm, Confirm::Confirmed);
        assert!(outcome.state.history[0].results.is_some());
    }

    #[tokio::test]
    async fn test_slot_fill_without_execution_counts_as_change() {
        let state = DialogueState::new("transaction", "execute", None)
            .with_history(vec![item("alpha", Confirm::Proposed)]);

        let coordinator = coordinator();
        let outcome = coordinator.execute(&state, None).await.unwrap();
        // 未确认条目不执行，但填槽本身已是改动
        assert!(outcome.changed);
        assert!(outcome.state.history[0].results.is_none());
        assert!(coordinator.executor.executed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_input_state_left_untouched() {
        let state = DialogueState::new("transaction", "execute", None)
            .with_history(vec![item("alpha", Confirm::Confirmed)]);
        let before = state.clone();

        let outcome = coordinator().execute(&state, None).await.unwrap();
        assert_eq!(state, before);
        assert_ne!(outcome.state, before);
    }

    #[tokio::test]
    async fn test_no_pending_items_means_unchanged() {
        let mut executed = item("alpha", Confirm::Confirmed);
        executed.results = Some(ResultList::empty());
        let state = DialogueState::new("transaction", "execute", None)
            .with_history(vec![executed]);

        let coordinator = coordinator();
        let outcome = coordinator.execute(&state, Some(7)).await.unwrap();
        assert!(!outcome.changed);
        assert_eq!(outcome.exec_state, Some(7));
        assert!(coordinator.executor.executed.lock().unwrap().is_empty());
    }
}
