//! "Right now" checklist model, optionally tied to one block.

use super::{new_entity_id, EntityId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RightNowItem {
    pub id: EntityId,
    pub text: String,
    pub completed: bool,
}

impl RightNowItem {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: new_entity_id(),
            text: text.into(),
            completed: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RightNowList {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<EntityId>,
    #[serde(default)]
    pub items: Vec<RightNowItem>,
    pub created_at: i64,
}

impl RightNowList {
    pub fn new(block_id: Option<EntityId>, now_ms: i64) -> Self {
        Self {
            id: new_entity_id(),
            block_id,
            items: Vec::new(),
            created_at: now_ms,
        }
    }

    pub fn item_mut(&mut self, item_id: &str) -> Option<&mut RightNowItem> {
        self.items.iter_mut().find(|item| item.id == item_id)
    }
}
