//! 语句模型
//!
//! 一条语句是一串函数调用（查询或动作），每个调用带设备选择器与输入参数。
//! 这里还承载 schema（FunctionDef）、确认注解归一化、可执行性判定与
//! 槽位遍历顺序（设备选择器先于值槽位，按调用源顺序）。

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::state::value::{Value, ValueType};

/// 函数种类：查询（无副作用）或动作（有副作用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionType {
    Query,
    Action,
}

/// 确认注解：
/// - Confirm：执行前必须带全部参数向用户显式确认
/// - DisplayResult：喂给该函数参数的查询结果需先展示（由语句拆分承担）
/// - Auto：无需显式确认即可调用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmAnnotation {
    Confirm,
    DisplayResult,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgDirection {
    In,
    Out,
}

/// schema 参数定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgDef {
    pub name: String,
    pub arg_type: ValueType,
    pub direction: ArgDirection,
    #[serde(default)]
    pub required: bool,
    /// 可选输入参数的默认值：准备执行时自动补齐
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub min_number: Option<f64>,
    #[serde(default)]
    pub max_number: Option<f64>,
}

impl ArgDef {
    pub fn input(name: impl Into<String>, arg_type: ValueType, required: bool) -> Self {
        Self {
            name: name.into(),
            arg_type,
            direction: ArgDirection::In,
            required,
            default: None,
            min_number: None,
            max_number: None,
        }
    }

    pub fn output(name: impl Into<String>, arg_type: ValueType) -> Self {
        Self {
            name: name.into(),
            arg_type,
            direction: ArgDirection::Out,
            required: false,
            default: None,
            min_number: None,
            max_number: None,
        }
    }
}

/// 函数 schema：技能标识（kind）、函数名、种类、确认注解与参数表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub kind: String,
    pub name: String,
    pub function_type: FunctionType,
    #[serde(default)]
    pub confirm: Option<ConfirmAnnotation>,
    /// 查询是否返回列表（影响模拟执行的行数与缓存策略）
    #[serde(default)]
    pub is_list: bool,
    #[serde(default)]
    pub is_monitorable: bool,
    pub args: Vec<ArgDef>,
    /// 「任选其一」参数组：每组至少要提供一个成员，否则语句不可执行
    #[serde(default)]
    pub require_either: Vec<Vec<String>>,
    /// 已声明的错误码（模拟失败时从中抽取）
    #[serde(default)]
    pub error_codes: Vec<String>,
}

impl FunctionDef {
    /// 归一化确认注解：未注明时动作默认 Confirm、查询默认 DisplayResult
    pub fn effective_confirm(&self) -> ConfirmAnnotation {
        self.confirm.unwrap_or(match self.function_type {
            FunctionType::Action => ConfirmAnnotation::Confirm,
            FunctionType::Query => ConfirmAnnotation::DisplayResult,
        })
    }

    pub fn arg(&self, name: &str) -> Option<&ArgDef> {
        self.args.iter().find(|a| a.name == name)
    }

    pub fn out_args(&self) -> impl Iterator<Item = &ArgDef> {
        self.args.iter().filter(|a| a.direction == ArgDirection::Out)
    }

    /// 函数键：`kind:name`，用于模拟数据库与执行缓存
    pub fn key(&self) -> String {
        format!("{}:{}", self.kind, self.name)
    }
}

/// 调用输入参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputParam {
    pub name: String,
    pub value: Value,
}

impl InputParam {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self { name: name.into(), value }
    }
}

/// 设备选择器：kind 定类，id 定具体设备；all 表示面向该类全部设备
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSelector {
    pub kind: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub all: bool,
    /// 属性（目前仅 name）：用户说出的设备名，消歧时作子串过滤
    #[serde(default)]
    pub attributes: Vec<InputParam>,
}

impl DeviceSelector {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: None,
            all: false,
            attributes: Vec::new(),
        }
    }

    pub fn name_attribute(&self) -> Option<&Value> {
        self.attributes.iter().find(|a| a.name == "name").map(|a| &a.value)
    }

    pub fn set_name_attribute(&mut self, name: String) {
        match self.attributes.iter_mut().find(|a| a.name == "name") {
            Some(attr) => attr.value = Value::String(name),
            None => self.attributes.push(InputParam::new("name", Value::String(name))),
        }
    }
}

/// 一次函数调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub selector: DeviceSelector,
    pub function: FunctionDef,
    pub in_params: Vec<InputParam>,
}

impl Invocation {
    pub fn new(function: FunctionDef, in_params: Vec<InputParam>) -> Self {
        let selector = DeviceSelector::new(function.kind.clone());
        Self { selector, function, in_params }
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.in_params.iter().find(|p| p.name == name).map(|p| &p.value)
    }

    /// 该调用是否可执行：参数值全部具体、每个 require_either 组至少给出一个成员
    fn is_executable(&self) -> bool {
        if !self.in_params.iter().all(|p| p.value.is_concrete()) {
            return false;
        }
        self.function.require_either.iter().all(|group| {
            group.iter().any(|member| self.param(member).is_some())
        })
    }

    /// 补齐带默认值的可选输入参数
    fn add_default_params(&mut self) {
        let missing: Vec<InputParam> = self
            .function
            .args
            .iter()
            .filter(|arg| {
                arg.direction == ArgDirection::In
                    && !arg.required
                    && arg.default.is_some()
                    && self.param(&arg.name).is_none()
            })
            .map(|arg| InputParam::new(arg.name.clone(), arg.default.clone().unwrap()))
            .collect();
        self.in_params.extend(missing);
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.function.key())?;
        if let Some(id) = &self.selector.id {
            write!(f, "(id={id})")?;
        }
        write!(f, "(")?;
        for (i, p) in self.in_params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", p.name, p.value)?;
        }
        write!(f, ")")
    }
}

/// 语句槽位地址：按「每个调用先设备选择器、后值槽位」的源顺序遍历
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPath {
    Device { invocation: usize },
    Value { invocation: usize, param: usize },
}

/// 一条语句：调用链；stream 为真表示常驻规则（监控触发，不自动确认）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    #[serde(default)]
    pub stream: bool,
    pub invocations: Vec<Invocation>,
}

impl Statement {
    pub fn command(invocations: Vec<Invocation>) -> Self {
        Self { stream: false, invocations }
    }

    pub fn rule(invocations: Vec<Invocation>) -> Self {
        Self { stream: true, invocations }
    }

    pub fn is_executable(&self) -> bool {
        self.invocations.iter().all(Invocation::is_executable)
    }

    /// 是否可静默确认：非常驻规则，且没有任何调用的有效确认注解为 Confirm。
    /// DisplayResult 由语句拆分处理，此处只拦截 Confirm。
    pub fn should_auto_confirm(&self) -> bool {
        if self.stream {
            return false;
        }
        !self
            .invocations
            .iter()
            .any(|inv| inv.function.effective_confirm() == ConfirmAnnotation::Confirm)
    }

    pub fn add_default_params(&mut self) {
        for invocation in &mut self.invocations {
            invocation.add_default_params();
        }
    }

    /// 槽位地址列表：同一调用内设备先于参数，调用间按源顺序
    pub fn slot_paths(&self) -> Vec<SlotPath> {
        let mut paths = Vec::new();
        for (i, invocation) in self.invocations.iter().enumerate() {
            paths.push(SlotPath::Device { invocation: i });
            for p in 0..invocation.in_params.len() {
                paths.push(SlotPath::Value { invocation: i, param: p });
            }
        }
        paths
    }

    /// 调用的函数键序列（上下文合并的等价性依据）
    pub fn function_keys(&self) -> Vec<String> {
        self.invocations.iter().map(|inv| inv.function.key()).collect()
    }

    /// 规范文本形式（编译缓存键）
    pub fn canonical_form(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.stream {
            write!(f, "monitor ")?;
        }
        for (i, invocation) in self.invocations.iter().enumerate() {
            if i > 0 {
                write!(f, " => ")?;
            }
            write!(f, "{invocation}")?;
        }
        write!(f, ";")
    }
}

/// 嵌套复合类型的便捷构造
pub fn compound(fields: Vec<(&str, ValueType)>) -> ValueType {
    let mut map = IndexMap::new();
    for (name, ty) in fields {
        map.insert(name.to_string(), ty);
    }
    ValueType::Compound(map)
}
