//! 类型化值模型
//!
//! 语句槽位与结果字段共用的值表示：基础类型、货币/度量、时间/日期、
//! 地点、实体、枚举与嵌套复合记录。Display 输出稳定的规范文本形式，
//! 供模拟执行器作为编译缓存键使用。

use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// 一天内的时刻（无时区）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Time {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl Time {
    pub fn new(hour: u8, minute: u8, second: u8) -> Self {
        Self { hour, minute, second }
    }
}

/// 时间值：绝对时刻，或相对引用（如 "morning"，执行前需经上下文变量解析）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeValue {
    Absolute(Time),
    Relative { tag: String },
}

/// 地点值：绝对坐标、相对引用（"home" / "current_location"）或仅有名字的未解析地点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Location {
    Absolute {
        latitude: f64,
        longitude: f64,
        display: Option<String>,
    },
    Relative { tag: String },
    Unresolved { name: String },
}

/// 实体值：类型 + 可选 id + 可选展示名。value 为 None 表示尚未解析的引用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityValue {
    pub entity_type: String,
    pub value: Option<String>,
    pub display: Option<String>,
}

impl EntityValue {
    pub fn resolved(entity_type: impl Into<String>, value: impl Into<String>, display: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            value: Some(value.into()),
            display: Some(display.into()),
        }
    }

    /// 仅有展示名的未解析引用（需经实体匹配得到 value）
    pub fn unresolved(entity_type: impl Into<String>, display: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            value: None,
            display: Some(display.into()),
        }
    }
}

/// 槽位与结果字段的值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// 未填写的槽位：含有 Undefined 的语句不可执行
    Undefined,
    Bool(bool),
    Number(f64),
    String(String),
    Currency { value: f64, code: String },
    Measure { value: f64, unit: String },
    Time(TimeValue),
    Date(DateTime<Utc>),
    Location(Location),
    Entity(EntityValue),
    Enum(String),
    Array(Vec<Value>),
    Object(IndexMap<String, Value>),
}

impl Value {
    /// 值是否已可执行：无 Undefined、无相对/未解析地点时间、实体均有 id
    pub fn is_concrete(&self) -> bool {
        match self {
            Value::Undefined => false,
            Value::Location(Location::Relative { .. }) | Value::Location(Location::Unresolved { .. }) => false,
            Value::Time(TimeValue::Relative { .. }) => false,
            Value::Entity(entity) => entity.value.is_some(),
            Value::Array(items) => items.iter().all(Value::is_concrete),
            Value::Object(fields) => fields.values().all(Value::is_concrete),
            _ => true,
        }
    }

    /// 是否为可作为生成候选的常量（合成数据会回显用户给出的过滤值）
    pub fn is_constant(&self) -> bool {
        !matches!(self, Value::Array(_)) && self.is_concrete()
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&EntityValue> {
        match self {
            Value::Entity(entity) => Some(entity),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "$?"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "\"{}\"", s.replace('"', "\\\"")),
            Value::Currency { value, code } => write!(f, "{value}{code}"),
            Value::Measure { value, unit } => write!(f, "{value}{unit}"),
            Value::Time(TimeValue::Absolute(t)) => {
                write!(f, "{:02}:{:02}:{:02}", t.hour, t.minute, t.second)
            }
            Value::Time(TimeValue::Relative { tag }) => write!(f, "$time.{tag}"),
            Value::Date(d) => write!(f, "{}", d.to_rfc3339()),
            Value::Location(Location::Absolute { latitude, longitude, display }) => match display {
                Some(name) => write!(f, "location({latitude}, {longitude}, \"{name}\")"),
                None => write!(f, "location({latitude}, {longitude})"),
            },
            Value::Location(Location::Relative { tag }) => write!(f, "$location.{tag}"),
            Value::Location(Location::Unresolved { name }) => write!(f, "location(\"{name}\")"),
            Value::Entity(entity) => {
                match &entity.value {
                    Some(value) => write!(f, "\"{value}\"^^{}", entity.entity_type)?,
                    None => write!(f, "null^^{}", entity.entity_type)?,
                }
                if let Some(display) = &entity.display {
                    write!(f, "(\"{display}\")")?;
                }
                Ok(())
            }
            Value::Enum(name) => write!(f, "enum({name})"),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Object(fields) => {
                write!(f, "{{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}={value}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// schema 参数类型：用于结果映射与合成数据生成
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Any,
    Bool,
    Number,
    String,
    Currency,
    Measure { unit: String },
    Time,
    Date,
    Location,
    Entity { entity_type: String },
    Enum { entries: Vec<String> },
    Array(Box<ValueType>),
    /// 嵌套复合记录：字段名 -> 字段类型
    Compound(IndexMap<String, ValueType>),
}
