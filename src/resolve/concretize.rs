//! 槽位具体化流水线
//!
//! 执行前把语句里所有抽象槽位落到具体值：设备选择器补上 id、
//! 用户名换成联系人、相对地点/时间经上下文变量解析、默认单位换成
//! 用户偏好、仅有展示名的实体经候选检索与模糊匹配拿到 id。
//! 槽位按源顺序处理（同一调用内设备先于参数），分支互斥、先到先处理。

use crate::core::DialogueError;
use crate::resolve::delegate::{Contact, ContactCategory, DeviceInfo, DialogueDelegate};
use crate::resolve::hints::{DisambiguationHints, EntityRecord};
use crate::resolve::matcher::best_match;
use crate::state::{
    DeviceSelector, EntityValue, Location, SlotPath, Statement, TimeValue, Value, ValueType,
};

fn contact_category(entity_type: &str) -> Option<ContactCategory> {
    match entity_type {
        "tt:phone_number" => Some(ContactCategory::PhoneNumber),
        "tt:email_address" => Some(ContactCategory::EmailAddress),
        "tt:contact" => Some(ContactCategory::Contact),
        _ => None,
    }
}

/// 把语句准备到可执行：遍历全部槽位并逐个具体化。
///
/// 成功返回后语句必然 is_executable（违反即 panic，说明某分支漏写了）。
pub async fn prepare_for_execution(
    statement: &mut Statement,
    hints: &DisambiguationHints,
    delegate: &dyn DialogueDelegate,
) -> Result<(), DialogueError> {
    for path in statement.slot_paths() {
        match path {
            SlotPath::Device { invocation } => {
                let selector = &mut statement.invocations[invocation].selector;
                choose_device(selector, hints, delegate).await?;
            }
            SlotPath::Value { invocation, param } => {
                let inv = &statement.invocations[invocation];
                let expected = inv
                    .function
                    .arg(&inv.in_params[param].name)
                    .map(|a| a.arg_type.clone());
                let value = &mut statement.invocations[invocation].in_params[param].value;
                concretize_value(value, expected.as_ref(), hints, delegate).await?;
                assert!(
                    value.is_concrete(),
                    "slot value still abstract after concretization: {value}"
                );
            }
        }
    }

    backfill_entity_displays(statement, delegate).await;
    Ok(())
}

/// 为设备选择器定出具体设备。
///
/// 顺序：已有 id 直接用；本轮选过同类设备则沿用（并带上记住的名字）；
/// 枚举已配置设备，没有就引导配置（用户放弃视为取消）；面向全类则到此
/// 为止；有名字先按子串过滤；唯一即选，多个交还用户追问。
pub async fn choose_device(
    selector: &mut DeviceSelector,
    hints: &DisambiguationHints,
    delegate: &dyn DialogueDelegate,
) -> Result<(), DialogueError> {
    if selector.id.is_some() {
        return Ok(());
    }

    if !selector.all {
        if let Some((Some(id), remembered_name)) = hints.devices.get(&selector.kind) {
            selector.id = Some(id.clone());
            // 记住的名字覆盖用户这次说的：选中的就是那台设备
            if let Some(Value::String(name)) = remembered_name {
                selector.set_name_attribute(name.clone());
            }
            return Ok(());
        }
    }

    let mut devices = delegate.devices_of_kind(&selector.kind).await;
    if devices.is_empty() {
        match delegate.try_configure_device(&selector.kind).await? {
            Some(device) => devices.push(device),
            None => return Err(DialogueError::cancelled()),
        }
    }

    if selector.all {
        return Ok(());
    }

    let spoken_name = selector
        .name_attribute()
        .and_then(Value::as_string)
        .map(str::to_owned);
    let mut name_matched = false;
    if let Some(name) = &spoken_name {
        let needle = name.to_lowercase();
        let filtered: Vec<DeviceInfo> = devices
            .iter()
            .filter(|d| d.name.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        if !filtered.is_empty() {
            devices = filtered;
            name_matched = true;
        }
    }

    let chosen = if devices.len() == 1 {
        devices.into_iter().next().unwrap()
    } else {
        let choices: Vec<String> = devices.iter().map(|d| d.name.clone()).collect();
        // 没命中任何设备的名字对追问没有参考价值
        let name = if name_matched { spoken_name.as_deref() } else { None };
        let index = delegate.disambiguate("device", name, &choices).await?;
        devices.swap_remove(index)
    };
    selector.id = Some(chosen.unique_id);
    selector.set_name_attribute(chosen.name);
    Ok(())
}

/// 具体化单个槽位值（容器逐项处理）
async fn concretize_value(
    value: &mut Value,
    expected: Option<&ValueType>,
    hints: &DisambiguationHints,
    delegate: &dyn DialogueDelegate,
) -> Result<(), DialogueError> {
    match value {
        Value::Array(items) => {
            let item_type = match expected {
                Some(ValueType::Array(inner)) => Some(inner.as_ref()),
                _ => None,
            };
            for item in items {
                concretize_scalar(item, item_type, hints, delegate).await?;
            }
            Ok(())
        }
        Value::Object(fields) => {
            let field_types = match expected {
                Some(ValueType::Compound(types)) => Some(types),
                _ => None,
            };
            for (name, field) in fields {
                let field_type = field_types.and_then(|types| types.get(name));
                concretize_scalar(field, field_type, hints, delegate).await?;
            }
            Ok(())
        }
        _ => concretize_scalar(value, expected, hints, delegate).await,
    }
}

async fn concretize_scalar(
    value: &mut Value,
    expected: Option<&ValueType>,
    hints: &DisambiguationHints,
    delegate: &dyn DialogueDelegate,
) -> Result<(), DialogueError> {
    // 用户名槽位被声明为联系人类型：按姓名检索联系人并换掉整个值
    if let Value::Entity(entity) = &*value {
        if entity.entity_type == "tt:username" {
            if let Some(ValueType::Entity { entity_type }) = expected {
                if let Some(category) = contact_category(entity_type) {
                    let name = entity
                        .display
                        .clone()
                        .or_else(|| entity.value.clone())
                        .unwrap_or_default();
                    *value = Value::Entity(contact_search(category, &name, delegate).await?);
                    return Ok(());
                }
            }
        }
    }

    match value {
        Value::Measure { unit, .. } if unit.starts_with("default") => {
            let dimension = unit["default".len()..].to_lowercase();
            match delegate.preferred_unit(&dimension) {
                Some(preferred) => *unit = preferred,
                None => {
                    return Err(DialogueError::ConfigError(format!(
                        "no preferred unit configured for {dimension}"
                    )))
                }
            }
        }

        Value::Entity(entity) if entity.value.is_none() => {
            let name = entity.display.clone().unwrap_or_default();
            if let Some(category) = contact_category(&entity.entity_type) {
                *entity = contact_search(category, &name, delegate).await?;
                return Ok(());
            }
            let record = resolve_entity(&entity.entity_type, &name, hints, delegate).await?;
            entity.value = Some(record.value.clone());
            entity.display = Some(record.name.clone());
        }

        Value::Location(Location::Unresolved { name }) => {
            let resolved = delegate
                .lookup_location(name, &hints.previous_locations)
                .await?
                .ok_or_else(|| DialogueError::LocationNotFound(name.clone()))?;
            *value = Value::Location(resolved);
        }

        Value::Location(Location::Relative { tag }) => {
            let variable = format!("$context.location.{tag}");
            *value = delegate.resolve_user_context(&variable).await?;
        }

        Value::Time(TimeValue::Relative { tag }) => {
            let variable = format!("$context.time.{tag}");
            *value = delegate.resolve_user_context(&variable).await?;
        }

        _ => {}
    }
    Ok(())
}

/// 解析仅有展示名的实体：优先复用此前结果里出现过的候选，
/// 否则走候选检索；两头都空才算找不到。
async fn resolve_entity(
    entity_type: &str,
    name: &str,
    hints: &DisambiguationHints,
    delegate: &dyn DialogueDelegate,
) -> Result<EntityRecord, DialogueError> {
    if let Some(records) = hints.id_entities.get(entity_type) {
        if !records.is_empty() {
            return Ok(best_match(name, entity_type, records).clone());
        }
    }

    let candidates = delegate.lookup_entity_candidates(entity_type, name).await?;
    if candidates.is_empty() {
        return Err(DialogueError::EntityNotFound {
            entity_type: entity_type.to_string(),
            name: name.to_string(),
        });
    }
    Ok(best_match(name, entity_type, &candidates).clone())
}

/// 按姓名检索联系人并在候选里挑最像的一个
async fn contact_search(
    category: ContactCategory,
    name: &str,
    delegate: &dyn DialogueDelegate,
) -> Result<EntityValue, DialogueError> {
    let contacts: Vec<Contact> = delegate.lookup_contact(category, name).await?;
    if contacts.is_empty() {
        return Err(DialogueError::ContactNotFound(name.to_string()));
    }

    let records: Vec<EntityRecord> = contacts
        .iter()
        .map(|c| EntityRecord::new(c.value.clone(), c.display_name.clone()))
        .collect();
    let matched = best_match(name, category.entity_type(), &records);
    Ok(EntityValue::resolved(
        category.entity_type(),
        matched.value.clone(),
        matched.name.clone(),
    ))
}

/// 为已解析但缺展示名的实体补上展示名（联系人与设备）
async fn backfill_entity_displays(statement: &mut Statement, delegate: &dyn DialogueDelegate) {
    for invocation in &mut statement.invocations {
        for param in &mut invocation.in_params {
            let Value::Entity(entity) = &mut param.value else {
                continue;
            };
            if entity.display.is_some() {
                continue;
            }
            let Some(id) = &entity.value else {
                continue;
            };
            entity.display = match entity.entity_type.as_str() {
                "tt:contact" => delegate.contact_display(id).await,
                "tt:device" => delegate.device_display(id).await,
                _ => None,
            };
        }
    }
}
