use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::GortError;

/// A versioned unit declaring commands, permissions, and templates.
///
/// Immutable once installed at a given `(name, version)`. At most one
/// version of a given bundle name may be enabled at a time; that
/// invariant is enforced by the persistence layer, not by this type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bundle {
    pub gort_bundle_version: u32,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub long_description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub homepage: String,
    /// `repository[:tag]`. Absence implies the local-process backend.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub commands: HashMap<String, Command>,
    #[serde(default)]
    pub templates: Templates,
    #[serde(default)]
    pub kubernetes: Option<KubernetesSpec>,
    #[serde(default)]
    pub enabled: bool,
    pub install_user: String,
    pub install_timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct KubernetesSpec {
    pub service_account: Option<String>,
    pub env_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Templates {
    pub command: Option<String>,
    pub command_error: Option<String>,
    pub message: Option<String>,
    pub message_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Command {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub long_description: String,
    /// Ordered argv prefix; must be non-empty.
    pub executable: Vec<String>,
    #[serde(default)]
    pub rules: Vec<String>,
    #[serde(default)]
    pub triggers: Vec<String>,
    #[serde(default)]
    pub templates: Templates,
}

/// One hit from `Resolver::resolve`: a command found inside a specific,
/// currently enabled bundle version.
#[derive(Debug, Clone)]
pub struct CommandEntry {
    pub bundle_name: String,
    pub bundle_version: String,
    pub command: Command,
}

impl CommandEntry {
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.bundle_name, self.command.name)
    }
}

/// The raw YAML bundle file, before server-assigned fields
/// (`install_user`, `install_timestamp`, `enabled`) are attached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BundleFile {
    pub gort_bundle_version: u32,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub long_description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub homepage: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub commands: HashMap<String, CommandFile>,
    #[serde(default)]
    pub templates: Templates,
    #[serde(default)]
    pub kubernetes: Option<KubernetesSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandFile {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub long_description: String,
    pub executable: Vec<String>,
    #[serde(default)]
    pub rules: Vec<String>,
    #[serde(default)]
    pub triggers: Vec<String>,
    #[serde(default)]
    pub templates: Templates,
}

impl BundleFile {
    /// Parses a bundle YAML document. Validates the invariants the
    /// loader, rather than the YAML schema, is responsible for:
    /// non-empty name/version and at least one non-empty `executable`
    /// per command.
    pub fn parse(yaml: &str) -> Result<Self, GortError> {
        let file: BundleFile = serde_yaml::from_str(yaml)
            .map_err(|e| GortError::Parse {
                offset: 0,
                message: format!("bundle yaml: {e}"),
            })?;
        if file.name.trim().is_empty() {
            return Err(GortError::Parse {
                offset: 0,
                message: "bundle name must not be empty".to_string(),
            });
        }
        if file.version.trim().is_empty() {
            return Err(GortError::Parse {
                offset: 0,
                message: "bundle version must not be empty".to_string(),
            });
        }
        for (name, cmd) in &file.commands {
            if cmd.executable.is_empty() {
                return Err(GortError::Parse {
                    offset: 0,
                    message: format!("command {name}: executable must not be empty"),
                });
            }
        }
        Ok(file)
    }

    /// Attaches server-assigned fields to produce a storable `Bundle`.
    pub fn into_bundle(
        self,
        install_user: String,
        install_timestamp: chrono::DateTime<chrono::Utc>,
    ) -> Bundle {
        let commands = self
            .commands
            .into_iter()
            .map(|(name, cf)| {
                (
                    name.clone(),
                    Command {
                        name,
                        description: cf.description,
                        long_description: cf.long_description,
                        executable: cf.executable,
                        rules: cf.rules,
                        triggers: cf.triggers,
                        templates: cf.templates,
                    },
                )
            })
            .collect();
        Bundle {
            gort_bundle_version: self.gort_bundle_version,
            name: self.name,
            version: self.version,
            description: self.description,
            long_description: self.long_description,
            author: self.author,
            homepage: self.homepage,
            image: self.image,
            permissions: self.permissions,
            commands,
            templates: self.templates,
            kubernetes: self.kubernetes,
            enabled: false,
            install_user,
            install_timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_bundle() {
        let yaml = r#"
gort_bundle_version: 1
name: gort
version: "0.1.0"
commands:
  echo:
    executable: ["/bin/echo"]
    rules: ["allow"]
"#;
        let file = BundleFile::parse(yaml).unwrap();
        assert_eq!(file.name, "gort");
        assert_eq!(file.commands["echo"].executable, vec!["/bin/echo"]);
    }

    #[test]
    fn rejects_empty_name() {
        let yaml = r#"
gort_bundle_version: 1
name: ""
version: "0.1.0"
commands: {}
"#;
        assert!(BundleFile::parse(yaml).is_err());
    }

    #[test]
    fn rejects_empty_executable() {
        let yaml = r#"
gort_bundle_version: 1
name: gort
version: "0.1.0"
commands:
  broken:
    executable: []
"#;
        assert!(BundleFile::parse(yaml).is_err());
    }
}
