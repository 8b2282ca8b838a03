use serde::{Deserialize, Serialize};

/// An item whose price players guess.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricedItem {
    pub name: String,
    pub price: f64,
    #[serde(default)]
    pub description: Option<String>,
}

impl PricedItem {
    fn is_playable(&self) -> bool {
        !self.name.trim().is_empty() && self.price.is_finite() && self.price > 0.0
    }
}

/// Parse content rows, skipping anything that isn't a playable item.
pub fn parse_items(rows: &[serde_json::Value]) -> Vec<PricedItem> {
    rows.iter()
        .filter_map(|row| serde_json::from_value::<PricedItem>(row.clone()).ok())
        .filter(PricedItem::is_playable)
        .collect()
}

fn item(name: &str, price: f64, description: &str) -> PricedItem {
    PricedItem {
        name: name.to_string(),
        price,
        description: Some(description.to_string()),
    }
}

/// Items used when a room has no content of its own.
pub fn builtin_items() -> Vec<PricedItem> {
    vec![
        item("Cast-iron skillet", 34.99, "10-inch, pre-seasoned"),
        item("Wireless earbuds", 129.0, "Noise cancelling, charging case"),
        item("Houseplant", 18.5, "Potted snake plant, 40 cm"),
        item("Board game", 44.95, "Strategy game for 2-5 players"),
        item("Espresso machine", 549.0, "Dual boiler, stainless steel"),
        item("Bag of coffee beans", 14.0, "1 kg, medium roast"),
    ]
}
