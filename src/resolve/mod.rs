//! 槽位消歧与具体化：线索收集、实体匹配、外部能力接口与具体化流水线

pub mod concretize;
pub mod delegate;
pub mod hints;
pub mod matcher;

pub use concretize::{choose_device, prepare_for_execution};
pub use delegate::{Contact, ContactCategory, DeviceInfo, DialogueDelegate};
pub use hints::{collect_hints, DisambiguationHints, EntityRecord};
pub use matcher::{best_match, edit_distance};
