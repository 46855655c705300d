//! 消歧线索收集
//!
//! 扫描已执行的历史前缀，汇出三类可复用上下文：本轮已选过的设备
//! （后写覆盖，最新选择生效）、结果行里带展示名的 id 实体（只追加，
//! 此前提到的都算候选）、以及最近出现过的绝对地点。派生数据，不持久化，
//! 每次需要时重新计算。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::state::{DialogueState, Location, ResultItem, Value};

/// 实体候选记录：id、展示名与规范化形式（匹配打分用）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub value: String,
    pub name: String,
    pub canonical: String,
}

impl EntityRecord {
    pub fn new(value: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        let canonical = canonicalize(&name);
        Self {
            value: value.into(),
            name,
            canonical,
        }
    }
}

/// 展示名规范化：小写并去掉标点
pub fn canonicalize(display: &str) -> String {
    display
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '.' | ',' | '/' | '#' | '!' | '$' | '%' | '^' | '&' | '*' | ';' | ':' | '{' | '}' | '=' | '-' | '_' | '`' | '~' | '(' | ')'))
        .collect()
}

/// 槽位消歧线索
#[derive(Debug, Clone, Default)]
pub struct DisambiguationHints {
    /// kind -> (已选设备 id, 记住的 name 属性值)
    pub devices: HashMap<String, (Option<String>, Option<Value>)>,
    /// 实体类型 -> 此前结果里出现过的 id 实体（按出现顺序）
    pub id_entities: HashMap<String, Vec<EntityRecord>>,
    /// 最近出现过的绝对地点（按出现顺序）
    pub previous_locations: Vec<Location>,
}

/// 从状态的已执行前缀收集消歧线索
pub fn collect_hints(state: &DialogueState) -> DisambiguationHints {
    let mut hints = DisambiguationHints::default();

    for item in &state.history {
        let Some(results) = &item.results else {
            continue;
        };

        for invocation in &item.statement.invocations {
            let selector = &invocation.selector;
            hints.devices.insert(
                selector.kind.clone(),
                (selector.id.clone(), selector.name_attribute().cloned()),
            );
        }

        for row in &results.results {
            collect_result_hints(row, &mut hints);
        }
    }

    hints
}

/// 扫描一行结果：绝对地点与带展示名的 id 实体
pub fn collect_result_hints(row: &ResultItem, hints: &mut DisambiguationHints) {
    for (field, value) in &row.values {
        if let Value::Location(location @ Location::Absolute { .. }) = value {
            hints.previous_locations.push(location.clone());
        }

        if field != "id" {
            continue;
        }
        let Value::Entity(entity) = value else {
            continue;
        };
        let (Some(id), Some(display)) = (&entity.value, &entity.display) else {
            continue;
        };
        hints
            .id_entities
            .entry(entity.entity_type.clone())
            .or_default()
            .push(EntityRecord::new(id.clone(), display.clone()));
    }
}
