//! 端到端对话流程测试：状态迁移 + 具体化 + 模拟执行串起来跑两轮

use std::sync::Arc;

use serde_json::json;

use wren::exec::{
    ExecutionCoordinator, SimulatedDelegate, SimulatedExecutor, SimulationDatabase,
    SimulatorOptions,
};
use wren::state::{
    compute_new_state, prepare_context_for_prediction, ArgDef, Confirm, ConfirmAnnotation,
    DialogueState, EntityValue, FunctionDef, FunctionType, HistoryItem, InputParam, Invocation,
    Statement, Target, Value, ValueType,
};

fn restaurant_search_fn() -> FunctionDef {
    FunctionDef {
        kind: "com.yelp".into(),
        name: "restaurant".into(),
        function_type: FunctionType::Query,
        confirm: Some(ConfirmAnnotation::Auto),
        is_list: true,
        is_monitorable: false,
        args: vec![
            ArgDef::input("cuisine", ValueType::String, false),
            ArgDef::output(
                "id",
                ValueType::Entity { entity_type: "com.yelp:restaurant".into() },
            ),
            ArgDef::output("rating", ValueType::Number),
        ],
        require_either: vec![],
        error_codes: vec![],
    }
}

fn reserve_fn() -> FunctionDef {
    FunctionDef {
        kind: "com.yelp".into(),
        name: "make_reservation".into(),
        function_type: FunctionType::Action,
        confirm: Some(ConfirmAnnotation::Auto),
        is_list: false,
        is_monitorable: false,
        args: vec![ArgDef::input(
            "restaurant",
            ValueType::Entity { entity_type: "com.yelp:restaurant".into() },
            true,
        )],
        require_either: vec![],
        error_codes: vec![],
    }
}

fn database() -> SimulationDatabase {
    let mut database = SimulationDatabase::new();
    database.insert(
        "com.yelp:restaurant".into(),
        vec![
            json!({"id": {"value": "r1", "display": "The Alembic"}, "cuisine": "italian", "rating": 4.5}),
            json!({"id": {"value": "r2", "display": "Nopa"}, "cuisine": "italian", "rating": 4.0}),
            json!({"id": {"value": "r3", "display": "Mission Chinese"}, "cuisine": "chinese", "rating": 3.9}),
        ],
    );
    database
}

fn coordinator() -> ExecutionCoordinator<SimulatedExecutor> {
    let options = SimulatorOptions::default()
        .with_seed(7)
        .with_simulate_errors(false)
        .with_database(database());
    let delegate = Arc::new(SimulatedDelegate::new(7).with_database(database()));
    ExecutionCoordinator::new(SimulatedExecutor::new(options), delegate)
}

fn prediction(history: Vec<HistoryItem>) -> DialogueState {
    DialogueState::new("transaction", "execute", None).with_history(history)
}

#[tokio::test]
async fn test_two_turn_conversation() {
    let coordinator = coordinator();

    // 第一轮：用户要找意大利餐厅，查询可静默确认
    let turn1 = prediction(vec![HistoryItem::new(
        Statement::command(vec![Invocation::new(
            restaurant_search_fn(),
            vec![InputParam::new("cuisine", Value::String("italian".into()))],
        )]),
        Confirm::Accepted,
    )]);

    let state1 = compute_new_state(None, &turn1, Target::User);
    assert_eq!(state1.history[0].confirm, Confirm::Confirmed);

    let outcome1 = coordinator.execute(&state1, None).await.unwrap();
    assert!(outcome1.changed);
    let results = outcome1.state.history[0].results.as_ref().unwrap();
    // 数据库里两家意大利餐厅都过了参数过滤
    assert_eq!(results.count, 2);
    assert!(results.error.is_none());
    // 模拟宿主为 kind 虚构的设备已经落到选择器上
    assert_eq!(
        outcome1.state.history[0].statement.invocations[0].selector.id.as_deref(),
        Some("com.yelp")
    );

    // 第二轮：用户只说了店名，实体要靠上一轮结果里的 id 解析
    let turn2 = prediction(vec![HistoryItem::new(
        Statement::command(vec![Invocation::new(
            reserve_fn(),
            vec![InputParam::new(
                "restaurant",
                Value::Entity(EntityValue::unresolved("com.yelp:restaurant", "the alembic")),
            )],
        )]),
        Confirm::Accepted,
    )]);

    let state2 = compute_new_state(Some(&outcome1.state), &turn2, Target::User);
    assert_eq!(state2.history.len(), 2);
    assert!(state2.history[0].results.is_some());

    let outcome2 = coordinator.execute(&state2, outcome1.exec_state).await.unwrap();
    assert!(outcome2.changed);
    // 第一轮条目原样保留，没有被重新执行
    assert_eq!(outcome2.state.history[0], outcome1.state.history[0]);

    let reserved = &outcome2.state.history[1];
    assert_eq!(reserved.confirm, Confirm::Confirmed);
    assert!(reserved.results.is_some());
    let entity = reserved.statement.invocations[0]
        .param("restaurant")
        .and_then(Value::as_entity)
        .unwrap();
    assert_eq!(entity.value.as_deref(), Some("r1"));
    assert_eq!(entity.display.as_deref(), Some("The Alembic"));
}

#[tokio::test]
async fn test_proposed_item_waits_for_user() {
    let coordinator = coordinator();

    let state = prediction(vec![HistoryItem::new(
        Statement::command(vec![Invocation::new(
            restaurant_search_fn(),
            vec![InputParam::new("cuisine", Value::String("chinese".into()))],
        )]),
        Confirm::Proposed,
    )]);

    let outcome = coordinator.execute(&state, None).await.unwrap();
    assert!(outcome.state.history[0].results.is_none());
    // 槽位已提前填好（这本身算一次改动），等用户接受即可直接执行
    assert!(outcome.changed);
    assert!(outcome.state.history[0].statement.is_executable());
}

#[tokio::test]
async fn test_context_projection_after_execution() {
    let coordinator = coordinator();
    let mut state = None;
    let mut exec_state = None;

    // 连续四轮同话题查询，全部执行
    for cuisine in ["italian", "chinese", "italian", "chinese"] {
        let turn = prediction(vec![HistoryItem::new(
            Statement::command(vec![Invocation::new(
                restaurant_search_fn(),
                vec![InputParam::new("cuisine", Value::String(cuisine.into()))],
            )]),
            Confirm::Accepted,
        )]);
        let merged = compute_new_state(state.as_ref(), &turn, Target::User);
        let outcome = coordinator.execute(&merged, exec_state).await.unwrap();
        state = Some(outcome.state);
        exec_state = outcome.exec_state;
    }

    let state = state.unwrap();
    assert_eq!(state.history.len(), 4);

    // 同函数的连续执行段合并，投影只留单行结果
    let projected = prepare_context_for_prediction(Some(&state), Target::User).unwrap();
    assert_eq!(projected.history.len(), 1);
    assert_eq!(
        projected.history[0].results.as_ref().unwrap().results.len(),
        1
    );
}

#[tokio::test]
async fn test_config_drives_simulator_options() {
    let config = wren::config::load_config(None).unwrap();
    let options = SimulatorOptions::default()
        .with_seed(config.simulator.seed)
        .with_simulate_errors(config.simulator.simulate_errors)
        .with_overrides(config.simulator.overrides.clone());
    assert_eq!(options.seed, 42);
    assert!(options.simulate_errors);
    assert!(options.overrides.is_empty());
}
