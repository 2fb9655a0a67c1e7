use trellis_common::{ComponentId, Value};

/// Builds attribute values from configuration (explicit config or declared defaults)
pub trait ValueFactory {
    fn create(&self, config: &serde_json::Value, owner: ComponentId) -> Value;
}

/// Treats every configuration value as literal data
#[derive(Debug, Default, Clone, Copy)]
pub struct LiteralValueFactory;

impl ValueFactory for LiteralValueFactory {
    fn create(&self, config: &serde_json::Value, _owner: ComponentId) -> Value {
        Value::from_json(config)
    }
}
