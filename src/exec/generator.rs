//! 合成结果生成
//!
//! 模拟执行器没有真实数据时，按 schema 类型生成可信的输出值。
//! 倾向复用：语句里用户给出的常量有一半概率被直接回显，此前生成过的
//! 常量偶尔也会再次出现，让同一个值在多轮结果里反复露面，接近真实
//! 服务的数据分布。候选池按语句重置，随机数发生器跨语句延续。

use std::collections::HashMap;

use chrono::{Duration, TimeZone, Utc};
use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::Rng;

use crate::state::{
    ArgDef, ArgDirection, EntityValue, FunctionDef, InputParam, Location, Time, TimeValue, Value,
    ValueType,
};

/// 候选池的分桶键与入池值（同桶的值可互相替代）。
/// 货币、度量与实体拆成裸数值 / id 字符串入池，生成路径才能命中。
fn pool_entry(value: &Value) -> Option<(String, Value)> {
    match value {
        Value::String(_) => Some(("QUOTED_STRING".into(), value.clone())),
        Value::Number(_) => Some(("NUMBER".into(), value.clone())),
        Value::Currency { value: amount, .. } => {
            Some(("CURRENCY".into(), Value::Number(*amount)))
        }
        Value::Measure { value: amount, unit } => {
            Some((format!("MEASURE_{unit}"), Value::Number(*amount)))
        }
        Value::Time(TimeValue::Absolute(_)) => Some(("TIME".into(), value.clone())),
        Value::Date(_) => Some(("DATE".into(), value.clone())),
        Value::Location(Location::Absolute { .. }) => Some(("LOCATION".into(), value.clone())),
        Value::Entity(entity) => entity.value.as_ref().map(|id| {
            (
                format!("ENTITY_{}", entity.entity_type),
                Value::String(id.clone()),
            )
        }),
        // 布尔与枚举取值空间太小，复用没有意义
        _ => None,
    }
}

/// 按类型生成合成值，并维护可复用的常量候选池
#[derive(Debug)]
pub struct ResultGenerator {
    rng: StdRng,
    /// 程序常量（用户说出的值）：复用概率高
    candidates: HashMap<String, Vec<Value>>,
    /// 此前生成过的值：偶尔复用
    constants: HashMap<String, Vec<Value>>,
}

impl ResultGenerator {
    pub fn new(rng: StdRng) -> Self {
        Self {
            rng,
            candidates: HashMap::new(),
            constants: HashMap::new(),
        }
    }

    /// 清空候选池，开始模拟一条新语句
    pub fn reset(&mut self) {
        self.candidates.clear();
        self.constants.clear();
    }

    /// 登记一个程序常量作为复用候选（数组与非常量被忽略）
    pub fn add_candidate(&mut self, value: &Value) {
        if !value.is_constant() {
            return;
        }
        if let Some((key, pooled)) = pool_entry(value) {
            self.candidates.entry(key).or_default().push(pooled);
        }
    }

    /// 伯努利抛硬币
    pub fn coin(&mut self, probability: f64) -> bool {
        self.rng.gen_bool(probability)
    }

    /// 闭区间均匀整数
    pub fn randint(&mut self, low: i64, high: i64) -> i64 {
        self.rng.gen_range(low..=high)
    }

    /// 均匀挑选一个下标
    pub fn choice_index(&mut self, len: usize) -> usize {
        self.rng.gen_range(0..len)
    }

    /// 生成一行结果：回显输入参数，再为每个输出参数生成值。
    /// id 实体按行下标编号，保证同一批结果里 id 互不相同；
    /// overrides 可按参数名强制指定输出（multiwoz 风格的数据集需要）。
    pub fn generate_row(
        &mut self,
        function: &FunctionDef,
        params: &[InputParam],
        index: usize,
        overrides: &HashMap<String, String>,
    ) -> IndexMap<String, Value> {
        let mut row = IndexMap::new();
        for param in params {
            row.insert(param.name.clone(), param.value.clone());
        }
        for arg in &function.args {
            if arg.direction != ArgDirection::Out {
                continue;
            }
            // 复合字段的子参数由父字段一并生成
            if arg.name.contains('.') {
                continue;
            }
            let value = if let Some(forced) = overrides.get(&arg.name) {
                Value::String(forced.clone())
            } else if arg.name == "id" {
                if let ValueType::Entity { entity_type } = &arg.arg_type {
                    Value::Entity(EntityValue {
                        entity_type: entity_type.clone(),
                        value: Some(format!("str:ENTITY_{entity_type}::{index}:")),
                        display: None,
                    })
                } else {
                    self.generate(&arg.arg_type, false, Some(arg))
                }
            } else {
                self.generate(&arg.arg_type, true, Some(arg))
            };
            row.insert(arg.name.clone(), value);
        }
        row
    }

    /// 生成一个该类型的值。
    /// repeatable 为假时跳过复用（id 字段和数组元素不允许撞车）。
    pub fn generate(
        &mut self,
        value_type: &ValueType,
        repeatable: bool,
        arg: Option<&ArgDef>,
    ) -> Value {
        match value_type {
            ValueType::Bool => Value::Bool(self.coin(0.5)),
            ValueType::Number => Value::Number(self.generate_number("NUMBER", repeatable, arg)),
            // Any 出现在未声明的输出字段上，退化为字符串
            ValueType::String | ValueType::Any => {
                Value::String(self.generate_string("QUOTED_STRING", repeatable))
            }
            ValueType::Currency => Value::Currency {
                value: self.generate_number("CURRENCY", repeatable, None),
                code: "usd".into(),
            },
            ValueType::Measure { unit } => {
                let key = format!("MEASURE_{unit}");
                Value::Measure {
                    value: self.generate_number(&key, repeatable, arg),
                    unit: unit.clone(),
                }
            }
            ValueType::Time => {
                if let Some(reused) = self.reuse_constant("TIME", repeatable) {
                    return reused;
                }
                let value = Value::Time(TimeValue::Absolute(Time::new(
                    self.randint(0, 23) as u8,
                    self.randint(0, 59) as u8,
                    0,
                )));
                self.remember("TIME", &value);
                value
            }
            ValueType::Date => {
                if let Some(reused) = self.reuse_constant("DATE", repeatable) {
                    return reused;
                }
                let days = self.generate_number("DATE::number", repeatable, None) as i64;
                let epoch = Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap();
                let value = Value::Date(epoch + Duration::days(days - 1));
                self.remember("DATE", &value);
                value
            }
            ValueType::Location => {
                if let Some(reused) = self.reuse_constant("LOCATION", repeatable) {
                    return reused;
                }
                let value = Value::Location(Location::Absolute {
                    latitude: self.randint(-90, 90) as f64,
                    longitude: self.randint(-180, 180) as f64,
                    display: None,
                });
                self.remember("LOCATION", &value);
                value
            }
            ValueType::Entity { entity_type } => {
                let key = format!("ENTITY_{entity_type}");
                let id = self.generate_string(&key, repeatable);
                Value::Entity(EntityValue {
                    entity_type: entity_type.clone(),
                    value: Some(id),
                    display: None,
                })
            }
            ValueType::Enum { entries } => {
                let index = self.choice_index(entries.len());
                Value::Enum(entries[index].clone())
            }
            // 数组元素之间不复用，避免同一数组里出现重复值
            ValueType::Array(inner) => {
                let length = self.randint(1, 3);
                let items = (0..length).map(|_| self.generate(inner, false, arg)).collect();
                Value::Array(items)
            }
            ValueType::Compound(fields) => {
                let mut object = IndexMap::new();
                for (name, field_type) in fields {
                    object.insert(name.clone(), self.generate(field_type, true, None));
                }
                Value::Object(object)
            }
        }
    }

    /// 模拟错误消息用的随机字符串
    pub fn generate_error_message(&mut self) -> String {
        self.generate_string("QUOTED_STRING", false)
    }

    fn generate_string(&mut self, key: &str, repeatable: bool) -> String {
        if let Some(Value::String(reused)) = self.reuse_constant(key, repeatable) {
            return reused;
        }
        let fresh = format!("str:{key}::{}:", self.randint(0, 49));
        self.remember(key, &Value::String(fresh.clone()));
        fresh
    }

    fn generate_number(&mut self, key: &str, repeatable: bool, arg: Option<&ArgDef>) -> f64 {
        if let Some(Value::Number(reused)) = self.reuse_constant(key, repeatable) {
            return reused;
        }

        let mut min: i64 = 20;
        let mut max: i64 = 1000;
        if let Some(arg) = arg {
            if let Some(annotated_min) = arg.min_number {
                min = annotated_min as i64;
                max = max.max(min + 20);
            }
            if let Some(annotated_max) = arg.max_number {
                max = annotated_max as i64;
            }
        }
        // 一半概率落到小数字，贴近计数类输出的真实分布
        if self.coin(0.5) {
            min = min.max(1);
            max = max.min(20);
        }
        if max <= min {
            max = min;
        }

        let fresh = self.randint(min, max) as f64;
        self.remember(key, &Value::Number(fresh));
        fresh
    }

    /// 复用顺序：程序常量 p=0.5，再试生成过的常量 p=0.1
    fn reuse_constant(&mut self, key: &str, repeatable: bool) -> Option<Value> {
        if !repeatable {
            return None;
        }
        let candidate_len = self.candidates.get(key).map_or(0, Vec::len);
        if candidate_len > 0 && self.coin(0.5) {
            let index = self.choice_index(candidate_len);
            return Some(self.candidates[key][index].clone());
        }
        let constant_len = self.constants.get(key).map_or(0, Vec::len);
        if constant_len > 0 && self.coin(0.1) {
            let index = self.choice_index(constant_len);
            return Some(self.constants[key][index].clone());
        }
        None
    }

    fn remember(&mut self, key: &str, value: &Value) {
        self.constants.entry(key.to_string()).or_default().push(value.clone());
    }
}
