use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::bundle::Bundle;

/// Username `admin` is protected from deletion by the persistence layer.
pub const ADMIN_USERNAME: &str = "admin";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password_hash: String,
    /// adapter name -> provider-specific user id. Each (adapter,
    /// provider-id) pair is unique across all users; persistence
    /// enforces that, not this type.
    #[serde(default)]
    pub mappings: HashMap<String, String>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.username == ADMIN_USERNAME
    }

    /// Applies a partial update in place: a `None` field in `patch`
    /// leaves the existing value untouched (§8: "`UserUpdate` with only
    /// non-empty fields never clears other fields").
    pub fn apply_patch(&mut self, patch: UserPatch) {
        if let Some(email) = patch.email {
            self.email = email;
        }
        if let Some(full_name) = patch.full_name {
            self.full_name = full_name;
        }
        if let Some(password_hash) = patch.password_hash {
            self.password_hash = password_hash;
        }
    }
}

/// A partial update to a `User`. Every field besides `username` is
/// optional; an absent field is left unchanged by `User::apply_patch`
/// rather than clearing it to empty.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub username: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub password_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Group {
    pub name: String,
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RolePermission {
    pub bundle_name: String,
    pub permission_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Role {
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<RolePermission>,
}

/// Snapshot of everything `effective_permissions` needs, fetched once
/// from persistence per invocation rather than cached in memory (§5
/// forbids a catalog cache).
pub struct PermissionGraph<'a> {
    pub groups: &'a [Group],
    pub roles: &'a [Role],
    pub bundles: &'a [Bundle],
}

/// Derives the bundle-qualified permission set of a user: the union,
/// over every group the user belongs to, every role that group has,
/// and every `(bundle, permission)` that role grants, restricted to
/// bundles whose contributing version is currently enabled.
///
/// Rendered as `"bundle:permission"` strings, per §3.
pub fn effective_permissions(user: &User, graph: &PermissionGraph<'_>) -> HashSet<String> {
    let enabled_bundles: HashSet<&str> = graph
        .bundles
        .iter()
        .filter(|b| b.enabled)
        .map(|b| b.name.as_str())
        .collect();

    let mut perms = HashSet::new();
    for group in graph.groups.iter().filter(|g| g.users.contains(&user.username)) {
        for role_name in &group.roles {
            let Some(role) = graph.roles.iter().find(|r| &r.name == role_name) else {
                continue;
            };
            for rp in &role.permissions {
                if enabled_bundles.contains(rp.bundle_name.as_str()) {
                    perms.insert(format!("{}:{}", rp.bundle_name, rp.permission_name));
                }
            }
        }
    }
    perms
}

/// The union of every role name reachable from the user's groups.
pub fn effective_roles(user: &User, graph: &PermissionGraph<'_>) -> HashSet<String> {
    graph
        .groups
        .iter()
        .filter(|g| g.users.contains(&user.username))
        .flat_map(|g| g.roles.iter().cloned())
        .collect()
}

/// The set of groups the user belongs to, derived from `Group.users`
/// (the canonical membership record) rather than the denormalized
/// `User.groups` field, which nothing in persistence keeps in sync.
pub fn effective_groups(user: &User, graph: &PermissionGraph<'_>) -> HashSet<String> {
    graph
        .groups
        .iter()
        .filter(|g| g.users.contains(&user.username))
        .map(|g| g.name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn enabled_bundle(name: &str) -> Bundle {
        Bundle {
            gort_bundle_version: 1,
            name: name.to_string(),
            version: "1.0.0".to_string(),
            description: String::new(),
            long_description: String::new(),
            author: String::new(),
            homepage: String::new(),
            image: None,
            permissions: vec!["admin".to_string()],
            commands: Default::default(),
            templates: Default::default(),
            kubernetes: None,
            enabled: true,
            install_user: "admin".to_string(),
            install_timestamp: Utc::now(),
        }
    }

    #[test]
    fn derives_permission_through_group_and_role() {
        let user = User {
            username: "alice".into(),
            email: "alice@example.com".into(),
            full_name: "Alice".into(),
            password_hash: String::new(),
            mappings: Default::default(),
        };
        let groups = vec![Group {
            name: "ops".into(),
            users: vec!["alice".into()],
            roles: vec!["admins".into()],
        }];
        let roles = vec![Role {
            name: "admins".into(),
            permissions: vec![RolePermission {
                bundle_name: "gort".into(),
                permission_name: "admin".into(),
            }],
        }];
        let bundles = vec![enabled_bundle("gort")];
        let graph = PermissionGraph {
            groups: &groups,
            roles: &roles,
            bundles: &bundles,
        };
        let perms = effective_permissions(&user, &graph);
        assert!(perms.contains("gort:admin"));
    }

    #[test]
    fn disabled_bundle_contributes_no_permission() {
        let user = User {
            username: "alice".into(),
            email: "alice@example.com".into(),
            full_name: "Alice".into(),
            password_hash: String::new(),
            mappings: Default::default(),
        };
        let groups = vec![Group {
            name: "ops".into(),
            users: vec!["alice".into()],
            roles: vec!["admins".into()],
        }];
        let roles = vec![Role {
            name: "admins".into(),
            permissions: vec![RolePermission {
                bundle_name: "gort".into(),
                permission_name: "admin".into(),
            }],
        }];
        let mut bundle = enabled_bundle("gort");
        bundle.enabled = false;
        let bundles = vec![bundle];
        let graph = PermissionGraph {
            groups: &groups,
            roles: &roles,
            bundles: &bundles,
        };
        assert!(effective_permissions(&user, &graph).is_empty());
    }

    #[test]
    fn effective_groups_comes_from_group_membership_not_a_user_field() {
        let user = User {
            username: "alice".into(),
            email: "alice@example.com".into(),
            full_name: "Alice".into(),
            password_hash: String::new(),
            mappings: Default::default(),
        };
        let groups = vec![
            Group {
                name: "ops".into(),
                users: vec!["alice".into()],
                roles: vec![],
            },
            Group {
                name: "finance".into(),
                users: vec!["bob".into()],
                roles: vec![],
            },
        ];
        let roles = vec![];
        let bundles = vec![];
        let graph = PermissionGraph {
            groups: &groups,
            roles: &roles,
            bundles: &bundles,
        };
        let result = effective_groups(&user, &graph);
        assert_eq!(result, HashSet::from(["ops".to_string()]));
    }
}
