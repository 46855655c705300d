//! 模拟宿主
//!
//! 批量生成对话时没有真实平台可问，这个实现给出合成但自洽的答案：
//! 每个 kind 虚构一台设备（id 即 kind，不会进入上下文线索）、追问一律
//! 随机选、上下文变量取固定坐标、实体候选从模拟数据库的 id 列取。
//! 真实对话场景换成接平台服务的实现即可，流水线代码不变。

use std::sync::Mutex;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value as JsonValue;

use crate::core::DialogueError;
use crate::exec::simulator::SimulationDatabase;
use crate::resolve::{Contact, ContactCategory, DeviceInfo, DialogueDelegate, EntityRecord};
use crate::state::{Location, Time, TimeValue, Value};

/// 批量生成用的脚本化宿主
pub struct SimulatedDelegate {
    rng: Mutex<StdRng>,
    database: Option<SimulationDatabase>,
}

impl SimulatedDelegate {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            database: None,
        }
    }

    pub fn with_database(mut self, database: SimulationDatabase) -> Self {
        self.database = Some(database);
        self
    }

    /// 数据库 id 列转为实体候选
    fn database_entities(&self, entity_type: &str) -> Option<Vec<EntityRecord>> {
        let rows = self.database.as_ref()?.get(entity_type)?;
        let records = rows
            .iter()
            .filter_map(|row| {
                let id = row.get("id")?;
                Some(EntityRecord::new(
                    id.get("value")?.as_str()?,
                    id.get("display").and_then(JsonValue::as_str)?,
                ))
            })
            .collect();
        Some(records)
    }
}

#[async_trait]
impl DialogueDelegate for SimulatedDelegate {
    async fn devices_of_kind(&self, kind: &str) -> Vec<DeviceInfo> {
        // 唯一一台虚构设备，unique_id 取 kind 本身，
        // 选择器带上它之后上下文里看不出任何额外信息
        vec![DeviceInfo {
            kind: kind.to_string(),
            unique_id: kind.to_string(),
            name: kind.to_string(),
        }]
    }

    async fn try_configure_device(
        &self,
        kind: &str,
    ) -> Result<Option<DeviceInfo>, DialogueError> {
        Err(DialogueError::ExecutionFailed(format!(
            "cannot configure device of kind {kind} in simulation"
        )))
    }

    async fn disambiguate(
        &self,
        _category: &str,
        _name: Option<&str>,
        choices: &[String],
    ) -> Result<usize, DialogueError> {
        let mut rng = self.rng.lock().unwrap();
        Ok(rng.gen_range(0..choices.len()))
    }

    async fn lookup_contact(
        &self,
        _category: ContactCategory,
        name: &str,
    ) -> Result<Vec<Contact>, DialogueError> {
        Err(DialogueError::ExecutionFailed(format!(
            "cannot look up contact {name} in simulation"
        )))
    }

    async fn contact_display(&self, _principal: &str) -> Option<String> {
        // 模拟里的实体都是虚构的，展示名无所谓
        None
    }

    async fn device_display(&self, _id: &str) -> Option<String> {
        None
    }

    async fn lookup_location(
        &self,
        name: &str,
        _previous_locations: &[Location],
    ) -> Result<Option<Location>, DialogueError> {
        Err(DialogueError::ExecutionFailed(format!(
            "cannot look up location {name} in simulation"
        )))
    }

    async fn lookup_entity_candidates(
        &self,
        entity_type: &str,
        _name: &str,
    ) -> Result<Vec<EntityRecord>, DialogueError> {
        Ok(self.database_entities(entity_type).unwrap_or_default())
    }

    async fn resolve_user_context(&self, variable: &str) -> Result<Value, DialogueError> {
        match variable {
            "$context.location.current_location" => Ok(Value::Location(Location::Absolute {
                latitude: 2.0,
                longitude: 2.0,
                display: Some("here".into()),
            })),
            "$context.location.home" => Ok(Value::Location(Location::Absolute {
                latitude: 3.0,
                longitude: 3.0,
                display: Some("home".into()),
            })),
            "$context.location.work" => Ok(Value::Location(Location::Absolute {
                latitude: 4.0,
                longitude: 4.0,
                display: Some("work".into()),
            })),
            "$context.time.morning" => {
                Ok(Value::Time(TimeValue::Absolute(Time::new(9, 0, 0))))
            }
            "$context.time.evening" => {
                Ok(Value::Time(TimeValue::Absolute(Time::new(19, 0, 0))))
            }
            other => Err(DialogueError::ExecutionFailed(format!(
                "unknown $context variable {other}"
            ))),
        }
    }

    fn preferred_unit(&self, dimension: &str) -> Option<String> {
        match dimension {
            "temperature" => {
                let mut rng = self.rng.lock().unwrap();
                Some(if rng.gen_bool(0.5) { "C" } else { "F" }.to_string())
            }
            _ => None,
        }
    }
}
