//! Small helpers shared by the model and runner layers.

use serde_json::{Map, Value};

/// Identifier generation
pub mod id_utils {
    use uuid::Uuid;

    /// Creates a new random, URL safe identifier.
    pub fn create() -> String {
        Uuid::new_v4().simple().to_string()
    }
}

/// Deep merges `right` into `left`: nested objects are merged key by key, any other value
/// in `right` replaces the one in `left`.
pub fn merge_maps(left: &mut Map<String, Value>, right: Map<String, Value>) {
    for (key, value) in right {
        match (left.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_maps(existing, incoming);
            }
            (_, value) => {
                left.insert(key, value);
            }
        }
    }
}

/// Converts a std duration into a chrono one, saturating on overflow.
pub fn to_chrono(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
