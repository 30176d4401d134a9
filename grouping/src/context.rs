use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use serde_json::Value;

use crate::registry::GroupingConfig;

/// Layered key/value state threaded through the strategies.
///
/// The bottom layer holds the configuration's initial flags. Strategies push
/// a scope to override values (current variant, exception data, recursion
/// marker) for the duration of a nested call; dropping the scope restores
/// whatever was visible before.
pub struct GroupingContext<'a> {
    config: &'a GroupingConfig,
    stack: Vec<HashMap<String, Value>>,
}

impl<'a> GroupingContext<'a> {
    pub fn new(config: &'a GroupingConfig) -> Self {
        let mut context = GroupingContext {
            config,
            stack: vec![config.initial_context().to_layer()],
        };
        context.stack.push(HashMap::new());
        context.set("variant", Value::Null);
        context
    }

    pub fn config(&self) -> &'a GroupingConfig {
        self.config
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.stack.iter().rev().find_map(|layer| layer.get(key))
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Whether `platform` is listed under the given array-valued key.
    pub fn contains(&self, key: &str, platform: &str) -> bool {
        self.get(key)
            .and_then(Value::as_array)
            .is_some_and(|values| values.iter().any(|value| value.as_str() == Some(platform)))
    }

    /// The variant currently being computed, `None` at the top level.
    pub fn variant(&self) -> Option<&str> {
        self.get_str("variant")
    }

    /// Writes to the innermost layer.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        if let Some(layer) = self.stack.last_mut() {
            layer.insert(key.into(), value.into());
        }
    }

    pub fn scope(&mut self) -> ContextScope<'_, 'a> {
        self.stack.push(HashMap::new());
        ContextScope { context: self }
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }
}

/// A pushed layer of a [`GroupingContext`], popped again on drop.
pub struct ContextScope<'s, 'a> {
    context: &'s mut GroupingContext<'a>,
}

impl<'a> Deref for ContextScope<'_, 'a> {
    type Target = GroupingContext<'a>;

    fn deref(&self) -> &Self::Target {
        self.context
    }
}

impl DerefMut for ContextScope<'_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.context
    }
}

impl Drop for ContextScope<'_, '_> {
    fn drop(&mut self) {
        if self.context.stack.len() > 1 {
            self.context.stack.pop();
        }
    }
}
