use serde::{Deserialize, Serialize};

/// Item kind used when a producer would otherwise have nothing to produce.
pub const DEFAULT_ITEM_KIND: &str = "cobblestone";

/// One entry in a producer's output table: an item kind, the stack size to
/// drop, and the host's opaque item state (enchantments, names, etc.).
///
/// The core never interprets `state`; it only round-trips it through
/// persistence and hands it back to the host on production.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemTemplate {
    pub kind: String,
    pub amount: u32,
    #[serde(default)]
    pub state: Vec<u8>,
}

impl ItemTemplate {
    pub fn new(kind: impl Into<String>, amount: u32) -> Self {
        Self {
            kind: kind.into(),
            amount,
            state: Vec::new(),
        }
    }

    pub fn with_state(mut self, state: Vec<u8>) -> Self {
        self.state = state;
        self
    }
}

impl Default for ItemTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_ITEM_KIND, 1)
    }
}

/// Normalize an item table: clamp to `max_types` entries and substitute the
/// default template if nothing is left.
pub fn normalize_items(mut items: Vec<ItemTemplate>, max_types: usize) -> Vec<ItemTemplate> {
    items.truncate(max_types.max(1));
    if items.is_empty() {
        items.push(ItemTemplate::default());
    }
    items
}
