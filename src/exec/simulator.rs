//! 模拟执行器
//!
//! 不碰任何真实服务，为批量对话生成和测试提供可复现的执行结果。
//! 数据来源分两层：配置了模拟数据库的函数按参数过滤返回真实行，
//! 其余函数按 schema 生成合成行。查询结果带缓存，同一会话里重复
//! 问同一个问题得到一致的答案；随机种子固定后整段对话可复现。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value as JsonValue;

use crate::core::DialogueError;
use crate::exec::executor::StatementExecutor;
use crate::exec::generator::ResultGenerator;
use crate::resolve::{best_match, EntityRecord};
use crate::state::{
    EntityValue, FunctionDef, FunctionType, InputParam, Invocation, Location, ResultItem,
    ResultList, Statement, Time, TimeValue, Value, ValueType,
};

/// 超过这个行数只显示计数，不展示完整列表
pub const PAGE_SIZE: usize = 10;
/// 超过这个行数置 more 位，计数饱和
pub const MORE_SIZE: usize = 50;

/// 模拟数据库：函数键 -> JSON 行
pub type SimulationDatabase = HashMap<String, Vec<JsonValue>>;

/// 模拟执行器配置
#[derive(Debug, Clone)]
pub struct SimulatorOptions {
    pub seed: u64,
    pub simulate_errors: bool,
    pub database: Option<SimulationDatabase>,
    /// 输出参数名 -> 强制值
    pub overrides: HashMap<String, String>,
}

impl Default for SimulatorOptions {
    fn default() -> Self {
        Self {
            seed: 42,
            simulate_errors: true,
            database: None,
            overrides: HashMap::new(),
        }
    }
}

impl SimulatorOptions {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_simulate_errors(mut self, simulate_errors: bool) -> Self {
        self.simulate_errors = simulate_errors;
        self
    }

    pub fn with_database(mut self, database: SimulationDatabase) -> Self {
        self.database = Some(database);
        self
    }

    pub fn with_overrides(mut self, overrides: HashMap<String, String>) -> Self {
        self.overrides = overrides;
        self
    }
}

/// 编译产物：已校验可执行的语句快照
#[derive(Debug)]
pub struct CompiledProgram {
    statement: Statement,
}

/// 模拟里抛出的业务错误（会落到 ResultList.error，不终止对话）
#[derive(Debug, Clone)]
struct SimulatedError {
    message: String,
    code: Option<String>,
}

impl SimulatedError {
    fn into_value(self) -> Value {
        match self.code {
            Some(code) => Value::Enum(code),
            None => Value::String(self.message),
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    function_key: String,
    params: Vec<InputParam>,
    rows: Vec<ResultItem>,
}

/// 每个会话的模拟执行状态：随机数发生器、查询缓存与见过的 id 实体
#[derive(Debug)]
pub struct SimulatorState {
    generator: ResultGenerator,
    exec_cache: Vec<CacheEntry>,
    /// 实体类型 -> 此前结果里出现过的 id 实体（空引用替换用）
    seen_entities: HashMap<String, Vec<EntityRecord>>,
}

impl SimulatorState {
    pub fn new(seed: u64) -> Self {
        Self {
            generator: ResultGenerator::new(StdRng::seed_from_u64(seed)),
            exec_cache: Vec::new(),
            seen_entities: HashMap::new(),
        }
    }

    fn find_in_cache(&self, function_key: &str, params: &[InputParam]) -> Option<Vec<ResultItem>> {
        self.exec_cache
            .iter()
            .find(|entry| entry.function_key == function_key && params_equal(&entry.params, params))
            .map(|entry| entry.rows.clone())
    }

    /// 在编译前替换掉模拟里解析不了的抽象值：相对地点换成固定的合成
    /// 坐标，仍然没有 id 的实体在见过的候选里挑最像的一个
    fn substitute(&self, statement: &Statement) -> Statement {
        let mut statement = statement.clone();
        for invocation in &mut statement.invocations {
            for param in &mut invocation.in_params {
                substitute_value(&mut param.value, &self.seen_entities);
            }
        }
        statement
    }

    fn record_seen_entities(&mut self, results: &ResultList) {
        for row in &results.results {
            let Some(Value::Entity(entity)) = row.values.get("id") else {
                continue;
            };
            let (Some(id), Some(display)) = (&entity.value, &entity.display) else {
                continue;
            };
            self.seen_entities
                .entry(entity.entity_type.clone())
                .or_default()
                .push(EntityRecord::new(id.clone(), display.clone()));
        }
    }
}

fn substitute_value(value: &mut Value, seen: &HashMap<String, Vec<EntityRecord>>) {
    match value {
        Value::Location(Location::Relative { tag }) => {
            let (latitude, longitude, display) = match tag.as_str() {
                "current_location" => (2.0, 2.0, "here"),
                "home" => (3.0, 3.0, "home"),
                "work" => (4.0, 4.0, "work"),
                _ => return,
            };
            *value = Value::Location(Location::Absolute {
                latitude,
                longitude,
                display: Some(display.to_string()),
            });
        }
        Value::Entity(entity) if entity.value.is_none() => {
            let Some(display) = entity.display.clone() else {
                return;
            };
            let Some(records) = seen.get(&entity.entity_type) else {
                return;
            };
            if records.is_empty() {
                return;
            }
            let matched = best_match(&display, &entity.entity_type, records);
            entity.value = Some(matched.value.clone());
            entity.display = Some(matched.name.clone());
        }
        Value::Array(items) => {
            for item in items {
                substitute_value(item, seen);
            }
        }
        Value::Object(fields) => {
            for field in fields.values_mut() {
                substitute_value(field, seen);
            }
        }
        _ => {}
    }
}

fn params_equal(a: &[InputParam], b: &[InputParam]) -> bool {
    a.len() == b.len()
        && a.iter()
            .all(|p| b.iter().any(|q| q.name == p.name && q.value == p.value))
}

/// 模拟执行器：无状态，可同时服务多段对话；编译缓存跨会话共享
pub struct SimulatedExecutor {
    options: SimulatorOptions,
    compile_cache: Mutex<HashMap<String, Arc<CompiledProgram>>>,
}

impl SimulatedExecutor {
    pub fn new(options: SimulatorOptions) -> Self {
        Self {
            options,
            compile_cache: Mutex::new(HashMap::new()),
        }
    }

    /// 编译 = 校验加快照：规范文本相同的语句直接复用
    fn compile(&self, statement: &Statement) -> Result<Arc<CompiledProgram>, DialogueError> {
        let key = statement.canonical_form();
        let mut cache = self.compile_cache.lock().unwrap();
        if let Some(hit) = cache.get(&key) {
            return Ok(hit.clone());
        }

        if !statement.is_executable() {
            tracing::error!(statement = %statement, "failed to compile statement");
            return Err(DialogueError::CompileFailed(key));
        }
        let compiled = Arc::new(CompiledProgram { statement: statement.clone() });
        cache.insert(key, compiled.clone());
        Ok(compiled)
    }

    fn simulate(&self, statement: &Statement, state: &mut SimulatorState) -> ResultList {
        state.generator.reset();
        for invocation in &statement.invocations {
            for param in &invocation.in_params {
                state.generator.add_candidate(&param.value);
            }
        }

        let mut rows: Vec<ResultItem> = Vec::new();
        let mut error = None;
        for invocation in &statement.invocations {
            let outcome = match invocation.function.function_type {
                FunctionType::Query => self.invoke_query(state, invocation),
                FunctionType::Action => self.invoke_action(state, invocation),
            };
            match outcome {
                // 链式语句以最后一个调用的输出为准
                Ok(new_rows) => rows = new_rows,
                Err(simulated) => {
                    error = Some(simulated.into_value());
                    break;
                }
            }
        }

        let total = rows.len();
        rows.truncate(PAGE_SIZE);
        ResultList {
            results: rows,
            count: total.min(MORE_SIZE),
            more: total > MORE_SIZE,
            error,
        }
    }

    fn invoke_query(
        &self,
        state: &mut SimulatorState,
        invocation: &Invocation,
    ) -> Result<Vec<ResultItem>, SimulatedError> {
        let function_key = invocation.function.key();
        if let Some(cached) = state.find_in_cache(&function_key, &invocation.in_params) {
            return Ok(cached);
        }

        let (rows, cacheable) = self.query_rows(state, invocation)?;
        if cacheable {
            state.exec_cache.push(CacheEntry {
                function_key,
                params: invocation.in_params.clone(),
                rows: rows.clone(),
            });
        }
        Ok(rows)
    }

    fn query_rows(
        &self,
        state: &mut SimulatorState,
        invocation: &Invocation,
    ) -> Result<(Vec<ResultItem>, bool), SimulatedError> {
        if let Some(from_db) = self.try_from_database(state, invocation)? {
            return Ok(from_db);
        }

        if self.options.simulate_errors && state.generator.coin(0.1) {
            return Err(fail(state, &invocation.function));
        }

        let (num_results, cacheable) = if invocation.function.is_list {
            // 偶尔空手而归，让「没找到」的对话路径也有训练数据
            if state.generator.coin(0.1) {
                (0, false)
            } else {
                (state.generator.randint(50, 100) as usize, true)
            }
        } else {
            (1, true)
        };

        let rows = (0..num_results)
            .map(|index| {
                ResultItem::new(state.generator.generate_row(
                    &invocation.function,
                    &invocation.in_params,
                    index,
                    &self.options.overrides,
                ))
            })
            .collect();
        Ok((rows, cacheable))
    }

    fn invoke_action(
        &self,
        state: &mut SimulatorState,
        invocation: &Invocation,
    ) -> Result<Vec<ResultItem>, SimulatedError> {
        if let Some(mut mapped) = self.database_rows(invocation) {
            if !mapped.is_empty() {
                let index = state.generator.choice_index(mapped.len());
                let (row, error) = mapped.swap_remove(index);
                if let Some(error) = error {
                    return Err(error);
                }
                return Ok(vec![row]);
            }
        }

        if self.options.simulate_errors && state.generator.coin(0.1) {
            return Err(fail(state, &invocation.function));
        }

        if invocation.function.out_args().next().is_some() {
            let row = state.generator.generate_row(
                &invocation.function,
                &invocation.in_params,
                0,
                &self.options.overrides,
            );
            Ok(vec![ResultItem::new(row)])
        } else {
            Ok(vec![])
        }
    }

    /// 数据库命中则按参数过滤返回；列表查询给全部行且不缓存（排序可能
    /// 随用户过滤变化），单行查询均匀抽一行、可监控时缓存
    fn try_from_database(
        &self,
        state: &mut SimulatorState,
        invocation: &Invocation,
    ) -> Result<Option<(Vec<ResultItem>, bool)>, SimulatedError> {
        let Some(mut mapped) = self.database_rows(invocation) else {
            return Ok(None);
        };
        if mapped.is_empty() {
            return Ok(None);
        }

        if invocation.function.is_list {
            let rows = mapped.into_iter().map(|(row, _)| row).collect();
            return Ok(Some((rows, false)));
        }

        let index = state.generator.choice_index(mapped.len());
        let (row, error) = mapped.swap_remove(index);
        if let Some(error) = error {
            return Err(error);
        }
        Ok(Some((vec![row], invocation.function.is_monitorable)))
    }

    fn database_rows(
        &self,
        invocation: &Invocation,
    ) -> Option<Vec<(ResultItem, Option<SimulatedError>)>> {
        let database = self.options.database.as_ref()?;
        let data = database.get(&invocation.function.key())?;

        let mapped = data
            .iter()
            .filter_map(|raw| map_database_row(&invocation.function, raw))
            .filter(|(row, _)| {
                invocation.in_params.iter().all(|param| {
                    match row.values.get(&param.name) {
                        Some(value) => *value == param.value,
                        None => true,
                    }
                })
            })
            .collect();
        Some(mapped)
    }
}

fn fail(state: &mut SimulatorState, function: &FunctionDef) -> SimulatedError {
    let message = state.generator.generate_error_message();
    let code = if function.error_codes.is_empty() {
        None
    } else {
        let index = state.generator.choice_index(function.error_codes.len());
        Some(function.error_codes[index].clone())
    };
    SimulatedError { message, code }
}

/// 把一行 JSON 数据映射成类型化结果。$error 字段标记这行是预置的失败。
fn map_database_row(
    function: &FunctionDef,
    raw: &JsonValue,
) -> Option<(ResultItem, Option<SimulatedError>)> {
    let object = raw.as_object()?;
    let mut values = IndexMap::new();
    let mut error = None;

    for (key, field) in object {
        if key == "$error" {
            error = Some(SimulatedError {
                message: field
                    .get("message")
                    .and_then(JsonValue::as_str)
                    .unwrap_or_default()
                    .to_string(),
                code: field.get("code").and_then(JsonValue::as_str).map(str::to_owned),
            });
            continue;
        }

        let mapped = match function.arg(key) {
            Some(arg) => load_value(&arg.arg_type, field),
            None => infer_value(field),
        };
        if let Some(value) = mapped {
            values.insert(key.clone(), value);
        }
    }

    Some((ResultItem::new(values), error))
}

/// 按声明类型加载 JSON 值；null 与无法解释的形状返回 None（字段被跳过）
fn load_value(value_type: &ValueType, raw: &JsonValue) -> Option<Value> {
    if raw.is_null() {
        return None;
    }
    match value_type {
        ValueType::Bool => raw.as_bool().map(Value::Bool),
        ValueType::Number => raw.as_f64().map(Value::Number),
        ValueType::String => raw.as_str().map(|s| Value::String(s.to_string())),
        ValueType::Enum { .. } => raw.as_str().map(|s| Value::Enum(s.to_string())),
        ValueType::Currency => match raw {
            JsonValue::Number(n) => Some(Value::Currency { value: n.as_f64()?, code: "usd".into() }),
            JsonValue::Object(fields) => Some(Value::Currency {
                value: fields.get("value")?.as_f64()?,
                code: fields
                    .get("code")
                    .and_then(JsonValue::as_str)
                    .unwrap_or("usd")
                    .to_string(),
            }),
            _ => None,
        },
        ValueType::Measure { unit } => raw.as_f64().map(|value| Value::Measure {
            value,
            unit: unit.clone(),
        }),
        ValueType::Time => match raw {
            JsonValue::String(text) => {
                let mut parts = text.split(':');
                let hour = parts.next()?.parse().ok()?;
                let minute = parts.next()?.parse().ok()?;
                let second = parts.next().map_or(Some(0), |s| s.parse().ok())?;
                Some(Value::Time(TimeValue::Absolute(Time::new(hour, minute, second))))
            }
            JsonValue::Object(fields) => Some(Value::Time(TimeValue::Absolute(Time::new(
                fields.get("hour")?.as_u64()? as u8,
                fields.get("minute")?.as_u64()? as u8,
                fields.get("second").and_then(JsonValue::as_u64).unwrap_or(0) as u8,
            )))),
            _ => None,
        },
        ValueType::Date => match raw {
            JsonValue::String(text) => DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|d| Value::Date(d.with_timezone(&Utc))),
            JsonValue::Number(n) => Utc
                .timestamp_millis_opt(n.as_i64()?)
                .single()
                .map(Value::Date),
            _ => None,
        },
        ValueType::Location => {
            let parts = raw.as_array()?;
            Some(Value::Location(Location::Absolute {
                latitude: parts.first()?.as_f64()?,
                longitude: parts.get(1)?.as_f64()?,
                display: parts.get(2).and_then(JsonValue::as_str).map(str::to_owned),
            }))
        }
        ValueType::Entity { entity_type } => match raw {
            JsonValue::String(id) => Some(Value::Entity(EntityValue {
                entity_type: entity_type.clone(),
                value: Some(id.clone()),
                display: None,
            })),
            JsonValue::Object(fields) => Some(Value::Entity(EntityValue {
                entity_type: entity_type.clone(),
                value: Some(fields.get("value")?.as_str()?.to_string()),
                display: fields
                    .get("display")
                    .and_then(JsonValue::as_str)
                    .map(str::to_owned),
            })),
            _ => None,
        },
        ValueType::Array(inner) => {
            let items = raw
                .as_array()?
                .iter()
                .filter_map(|item| load_value(inner, item))
                .collect();
            Some(Value::Array(items))
        }
        ValueType::Compound(fields) => {
            let object = raw.as_object()?;
            let mut mapped = IndexMap::new();
            for (name, field) in object {
                let loaded = match fields.get(name) {
                    Some(field_type) => load_value(field_type, field),
                    None => infer_value(field),
                };
                if let Some(value) = loaded {
                    mapped.insert(name.clone(), value);
                }
            }
            Some(Value::Object(mapped))
        }
        ValueType::Any => infer_value(raw),
    }
}

/// 无声明时按 JSON 形状推断类型
fn infer_value(raw: &JsonValue) -> Option<Value> {
    match raw {
        JsonValue::Null => None,
        JsonValue::Bool(b) => Some(Value::Bool(*b)),
        JsonValue::Number(n) => n.as_f64().map(Value::Number),
        JsonValue::String(s) => Some(Value::String(s.clone())),
        JsonValue::Array(items) => Some(Value::Array(
            items.iter().filter_map(infer_value).collect(),
        )),
        JsonValue::Object(fields) => {
            let mut mapped = IndexMap::new();
            for (name, field) in fields {
                if let Some(value) = infer_value(field) {
                    mapped.insert(name.clone(), value);
                }
            }
            Some(Value::Object(mapped))
        }
    }
}

#[async_trait]
impl StatementExecutor for SimulatedExecutor {
    type State = SimulatorState;

    async fn execute_statement(
        &self,
        statement: &Statement,
        state: Option<SimulatorState>,
    ) -> Result<(ResultList, SimulatorState), DialogueError> {
        let mut state = state.unwrap_or_else(|| SimulatorState::new(self.options.seed));

        // 常驻规则只是登记监控，当下没有结果
        if statement.stream {
            return Ok((ResultList::empty(), state));
        }

        let prepared = state.substitute(statement);
        let compiled = self.compile(&prepared)?;
        let results = self.simulate(&compiled.statement, &mut state);
        state.record_seen_entities(&results);
        Ok((results, state))
    }
}
