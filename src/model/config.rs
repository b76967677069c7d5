use serde::{Deserialize, Serialize};

/// Layer ordering for dynamic configuration injection: later entries
/// override earlier ones when the same key is set at multiple layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConfigLayer {
    Bundle,
    Room,
    Group,
    User,
}

/// A `(bundle, layer, owner, key) -> value` row. `owner` is empty when
/// `layer = Bundle`; otherwise it names the room/group/user the value
/// applies to. Uniqueness is on the four-tuple.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DynamicConfiguration {
    pub bundle: String,
    pub layer: ConfigLayer,
    pub owner: String,
    pub key: String,
    pub value: String,
    pub secret: bool,
}

impl DynamicConfiguration {
    /// The key used to display this entry to UI-facing listing paths,
    /// where secret values must be masked per the persistence contract.
    pub fn masked_value(&self) -> &str {
        if self.secret {
            "<secret>"
        } else {
            &self.value
        }
    }

    /// Whether this entry applies to an invocation in the given room,
    /// for the given groups, by the given user.
    pub fn applies_to(&self, room: &str, groups: &[String], user: &str) -> bool {
        match self.layer {
            ConfigLayer::Bundle => true,
            ConfigLayer::Room => self.owner == room,
            ConfigLayer::Group => groups.iter().any(|g| g == &self.owner),
            ConfigLayer::User => self.owner == user,
        }
    }
}

/// Resolves the env value for `key` within `bundle`, applying the
/// layer order `bundle < room < group < user` (later overrides
/// earlier), per §4.5.
pub fn resolve_env(
    entries: &[DynamicConfiguration],
    bundle: &str,
    key: &str,
    room: &str,
    groups: &[String],
    user: &str,
) -> Option<String> {
    let mut applicable: Vec<&DynamicConfiguration> = entries
        .iter()
        .filter(|e| e.bundle == bundle && e.key == key && e.applies_to(room, groups, user))
        .collect();
    applicable.sort_by_key(|e| e.layer);
    applicable.last().map(|e| e.value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_layer_overrides_bundle_layer() {
        let entries = vec![
            DynamicConfiguration {
                bundle: "gort".into(),
                layer: ConfigLayer::Bundle,
                owner: String::new(),
                key: "greeting".into(),
                value: "hello".into(),
                secret: false,
            },
            DynamicConfiguration {
                bundle: "gort".into(),
                layer: ConfigLayer::User,
                owner: "alice".into(),
                key: "greeting".into(),
                value: "hi alice".into(),
                secret: false,
            },
        ];
        let resolved = resolve_env(&entries, "gort", "greeting", "C1", &[], "alice");
        assert_eq!(resolved.as_deref(), Some("hi alice"));

        let resolved_other_user = resolve_env(&entries, "gort", "greeting", "C1", &[], "bob");
        assert_eq!(resolved_other_user.as_deref(), Some("hello"));
    }
}
