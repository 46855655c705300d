//! 对话代理的外部能力接口
//!
//! 具体化流水线只依赖这个 trait：设备枚举与配置、联系人检索、地点查询、
//! 实体候选检索、用户上下文变量与偏好单位，全部由宿主实现注入。
//! 真实运行接平台服务，测试与批量仿真接脚本化实现。

use async_trait::async_trait;

use crate::core::DialogueError;
use crate::resolve::hints::EntityRecord;
use crate::state::{Location, Value};

/// 可选设备的摘要信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub kind: String,
    pub unique_id: String,
    pub name: String,
}

/// 联系人检索的目标字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactCategory {
    PhoneNumber,
    EmailAddress,
    Contact,
}

impl ContactCategory {
    /// 对应的实体类型名（检索与审计日志用）
    pub fn entity_type(self) -> &'static str {
        match self {
            ContactCategory::PhoneNumber => "tt:phone_number",
            ContactCategory::EmailAddress => "tt:email_address",
            ContactCategory::Contact => "tt:contact",
        }
    }
}

/// 联系人候选：可拨号/发信的值 + 展示名
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub value: String,
    pub display_name: String,
}

/// 宿主环境注入的对话外部能力
#[async_trait]
pub trait DialogueDelegate: Send + Sync {
    /// 枚举某一 kind 下已配置的设备
    async fn devices_of_kind(&self, kind: &str) -> Vec<DeviceInfo>;

    /// 引导用户配置一台该 kind 的新设备；None 表示用户放弃
    async fn try_configure_device(&self, kind: &str)
        -> Result<Option<DeviceInfo>, DialogueError>;

    /// 向用户追问，在多个候选中选一个；返回所选下标
    async fn disambiguate(
        &self,
        category: &str,
        name: Option<&str>,
        choices: &[String],
    ) -> Result<usize, DialogueError>;

    /// 按姓名检索联系人（空列表表示没找到）
    async fn lookup_contact(
        &self,
        category: ContactCategory,
        name: &str,
    ) -> Result<Vec<Contact>, DialogueError>;

    /// 查询联系人主体的展示名
    async fn contact_display(&self, principal: &str) -> Option<String>;

    /// 查询设备的展示名
    async fn device_display(&self, id: &str) -> Option<String>;

    /// 地名解析为绝对坐标；None 表示查无此地
    async fn lookup_location(
        &self,
        name: &str,
        previous_locations: &[Location],
    ) -> Result<Option<Location>, DialogueError>;

    /// 按展示名检索某实体类型的候选（空列表表示没找到）
    async fn lookup_entity_candidates(
        &self,
        entity_type: &str,
        name: &str,
    ) -> Result<Vec<EntityRecord>, DialogueError>;

    /// 解析用户上下文变量（"$context.location.home" 之类）
    async fn resolve_user_context(&self, variable: &str) -> Result<Value, DialogueError>;

    /// 某量纲的用户偏好单位（未设置时返回 None）
    fn preferred_unit(&self, dimension: &str) -> Option<String>;
}
