//! The grouping component tree.
//!
//! Strategies describe *why* an event hashes the way it does by building a
//! tree of components. Leaves are strings, inner nodes are components with an
//! id. Only contributing parts of the tree end up in the hash, everything else
//! stays around so the result can be explained to users.

use serde_json::{Value, json};

use crate::utils::hash_from_values;

/// Human-readable names of the components that make up a variant description.
fn known_major_component_name(id: &str) -> Option<&'static str> {
    Some(match id {
        "app" => "in-app",
        "exception" => "exception",
        "stacktrace" => "stack-trace",
        "threads" => "thread",
        "hostname" => "hostname",
        "violation" => "violation",
        "uri" => "URI",
        "message" => "message",
        "salt" => "type",
        _ => return None,
    })
}

#[derive(Clone, Debug, PartialEq)]
pub enum ComponentValue {
    Component(GroupingComponent),
    Value(String),
}

impl ComponentValue {
    fn contributes(&self) -> bool {
        match self {
            ComponentValue::Component(component) => component.contributes,
            ComponentValue::Value(_) => true,
        }
    }
}

impl From<GroupingComponent> for ComponentValue {
    fn from(component: GroupingComponent) -> Self {
        ComponentValue::Component(component)
    }
}

impl From<String> for ComponentValue {
    fn from(value: String) -> Self {
        ComponentValue::Value(value)
    }
}

impl From<&str> for ComponentValue {
    fn from(value: &str) -> Self {
        ComponentValue::Value(value.to_owned())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GroupingComponent {
    id: String,
    values: Vec<ComponentValue>,
    contributes: bool,
    contributes_to_similarity: bool,
    hint: Option<String>,
    in_app: Option<bool>,
}

impl GroupingComponent {
    /// An empty component. It has nothing to hash and therefore does not contribute.
    pub fn new(id: impl Into<String>) -> Self {
        GroupingComponent {
            id: id.into(),
            values: Vec::new(),
            contributes: false,
            contributes_to_similarity: false,
            hint: None,
            in_app: None,
        }
    }

    pub fn with_values<V>(id: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self
    where
        V: Into<ComponentValue>,
    {
        let mut rv = GroupingComponent::new(id);
        rv.set_values(values);
        rv
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn values(&self) -> &[ComponentValue] {
        &self.values
    }

    pub fn contributes(&self) -> bool {
        self.contributes
    }

    pub fn contributes_to_similarity(&self) -> bool {
        self.contributes_to_similarity
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn in_app(&self) -> Option<bool> {
        self.in_app
    }

    pub fn set_in_app(&mut self, in_app: bool) {
        self.in_app = Some(in_app);
    }

    /// Replaces the children and recomputes whether this component contributes.
    pub fn set_values<V>(&mut self, values: impl IntoIterator<Item = V>)
    where
        V: Into<ComponentValue>,
    {
        self.values = values.into_iter().map(Into::into).collect();
        self.contributes = self.values.iter().any(ComponentValue::contributes);
        self.contributes_to_similarity = self.contributes;
    }

    /// Sets both contribution flags.
    pub fn set_contributes(&mut self, contributes: bool) {
        self.contributes = contributes;
        self.contributes_to_similarity = contributes;
    }

    pub fn set_contributes_to_similarity(&mut self, contributes_to_similarity: bool) {
        self.contributes_to_similarity = contributes_to_similarity;
    }

    pub fn set_hint(&mut self, hint: impl Into<String>) {
        self.hint = Some(hint.into());
    }

    /// Removes this component from the hash and from similarity.
    pub fn ignore(&mut self, hint: impl Into<String>) {
        self.set_contributes(false);
        self.set_hint(hint);
    }

    /// Removes this component from the hash because something else takes
    /// precedence. It is still relevant for similarity.
    pub fn mark_superseded(&mut self, hint: impl Into<String>) {
        self.contributes = false;
        self.contributes_to_similarity = true;
        self.set_hint(hint);
    }

    /// Leaf values of all contributing subtrees in order.
    pub fn iter_values(&self) -> Vec<&str> {
        let mut rv = Vec::new();
        self.collect_values(&mut rv);
        rv
    }

    fn collect_values<'a>(&'a self, out: &mut Vec<&'a str>) {
        for value in &self.values {
            match value {
                ComponentValue::Component(component) if component.contributes => {
                    component.collect_values(out)
                }
                ComponentValue::Component(_) => {}
                ComponentValue::Value(value) => out.push(value),
            }
        }
    }

    pub fn get_hash(&self) -> Option<String> {
        self.contributes
            .then(|| hash_from_values(self.iter_values()))
    }

    /// Known display name of this component, if it has one.
    pub fn name(&self) -> Option<&'static str> {
        known_major_component_name(&self.id)
    }

    /// Describes the component by the deepest chain of contributing,
    /// well-known components, e.g. `"in-app exception stack-trace"`.
    pub fn description(&self) -> String {
        let mut paths: Vec<Vec<&'static str>> = Vec::new();
        let mut stack: Vec<Option<&'static str>> = Vec::new();
        self.collect_paths(&mut stack, &mut paths);

        paths.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
        match paths.last() {
            Some(path) if !path.is_empty() => path.join(" "),
            _ => self.name().unwrap_or("others").to_owned(),
        }
    }

    fn collect_paths(
        &self,
        stack: &mut Vec<Option<&'static str>>,
        paths: &mut Vec<Vec<&'static str>>,
    ) {
        stack.push(self.name());
        for value in &self.values {
            if let ComponentValue::Component(child) = value
                && child.contributes
            {
                child.collect_paths(stack, paths);
            }
        }
        paths.push(stack.iter().flatten().copied().collect());
        stack.pop();
    }

    pub fn as_dict(&self) -> Value {
        let values: Vec<Value> = self
            .values
            .iter()
            .map(|value| match value {
                ComponentValue::Component(component) => component.as_dict(),
                ComponentValue::Value(value) => Value::String(value.clone()),
            })
            .collect();
        let mut rv = json!({
            "id": self.id,
            "name": self.name(),
            "contributes": self.contributes,
            "contributes_to_similarity": self.contributes_to_similarity,
            "hint": self.hint,
            "values": values,
        });
        if let (Some(in_app), Some(map)) = (self.in_app, rv.as_object_mut()) {
            map.insert("in_app".to_owned(), Value::Bool(in_app));
        }
        rv
    }
}
