//! Items streamed between operators.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One unit of streamed data: a JSON payload plus named attachments
/// (for example `meta`, which carries the originating document key).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnnotatedValue {
    value: Value,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    attachments: HashMap<String, Value>,
}

impl AnnotatedValue {
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            attachments: HashMap::new(),
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    /// Looks up a top-level field of an object payload.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.value.as_object().and_then(|obj| obj.get(name))
    }

    pub fn set_attachment(&mut self, name: impl Into<String>, value: Value) {
        self.attachments.insert(name.into(), value);
    }

    pub fn attachment(&self, name: &str) -> Option<&Value> {
        self.attachments.get(name)
    }

    pub fn attachments(&self) -> &HashMap<String, Value> {
        &self.attachments
    }
}

impl From<Value> for AnnotatedValue {
    fn from(value: Value) -> Self {
        AnnotatedValue::new(value)
    }
}
