//! Maps `(bundle?, command)` to one or more enabled `CommandEntry`
//! values (§4.2).

use regex::Regex;

use crate::error::GortError;
use crate::model::bundle::{Bundle, CommandEntry};

/// `Resolve(bundle?, command) -> []CommandEntry`.
///
/// If `bundle` is given, only its enabled version is considered. If
/// omitted, every enabled bundle is searched; zero hits is
/// `NoSuchCommand`, more than one is `Ambiguous`, exactly one is a
/// success.
pub fn resolve(
    bundle: Option<&str>,
    command: &str,
    bundles: &[Bundle],
) -> Result<Vec<CommandEntry>, GortError> {
    let enabled = bundles.iter().filter(|b| b.enabled);

    let matches: Vec<CommandEntry> = match bundle {
        Some(bundle_name) => enabled
            .filter(|b| b.name == bundle_name)
            .filter_map(|b| b.commands.get(command).map(|c| entry(b, c)))
            .collect(),
        None => enabled
            .filter_map(|b| b.commands.get(command).map(|c| entry(b, c)))
            .collect(),
    };

    match matches.len() {
        0 => Err(GortError::NoSuchCommand {
            name: qualified_display(bundle, command),
        }),
        1 => Ok(matches),
        _ => Err(GortError::Ambiguous {
            name: qualified_display(bundle, command),
            candidates: matches.iter().map(|m| m.qualified_name()).collect(),
        }),
    }
}

/// Trigger-based resolution (§4.4 step 4): when raw input doesn't begin
/// with a known command token, each enabled command's regex triggers
/// are tried in bundle-name, then command-name order; first match wins.
pub fn resolve_by_trigger(
    raw_text: &str,
    bundles: &[Bundle],
) -> Result<Option<CommandEntry>, GortError> {
    let mut enabled: Vec<&Bundle> = bundles.iter().filter(|b| b.enabled).collect();
    enabled.sort_by(|a, b| a.name.cmp(&b.name));

    for b in enabled {
        let mut commands: Vec<&crate::model::bundle::Command> = b.commands.values().collect();
        commands.sort_by(|a, c| a.name.cmp(&c.name));
        for cmd in commands {
            for trigger in &cmd.triggers {
                let re = Regex::new(trigger).map_err(|e| GortError::Parse {
                    offset: 0,
                    message: format!("bad trigger regex {trigger:?}: {e}"),
                })?;
                if re.is_match(raw_text) {
                    return Ok(Some(entry(b, cmd)));
                }
            }
        }
    }
    Ok(None)
}

fn entry(bundle: &Bundle, command: &crate::model::bundle::Command) -> CommandEntry {
    CommandEntry {
        bundle_name: bundle.name.clone(),
        bundle_version: bundle.version.clone(),
        command: command.clone(),
    }
}

fn qualified_display(bundle: Option<&str>, command: &str) -> String {
    match bundle {
        Some(b) => format!("{b}:{command}"),
        None => command.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::bundle::Command;
    use chrono::Utc;
    use std::collections::HashMap;

    fn bundle(name: &str, enabled: bool, commands: &[&str]) -> Bundle {
        let mut map = HashMap::new();
        for c in commands {
            map.insert(
                c.to_string(),
                Command {
                    name: c.to_string(),
                    description: String::new(),
                    long_description: String::new(),
                    executable: vec!["/bin/true".to_string()],
                    rules: vec!["allow".to_string()],
                    triggers: vec![],
                    templates: Default::default(),
                },
            );
        }
        Bundle {
            gort_bundle_version: 1,
            name: name.to_string(),
            version: "1.0.0".to_string(),
            description: String::new(),
            long_description: String::new(),
            author: String::new(),
            homepage: String::new(),
            image: None,
            permissions: vec![],
            commands: map,
            templates: Default::default(),
            kubernetes: None,
            enabled,
            install_user: "admin".to_string(),
            install_timestamp: Utc::now(),
        }
    }

    #[test]
    fn resolves_unique_bare_command() {
        let bundles = vec![bundle("gort", true, &["echo"])];
        let hits = resolve(None, "echo", &bundles).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].bundle_name, "gort");
    }

    #[test]
    fn no_hits_is_no_such_command() {
        let bundles = vec![bundle("gort", true, &["echo"])];
        let err = resolve(None, "missing", &bundles).unwrap_err();
        assert!(matches!(err, GortError::NoSuchCommand { .. }));
    }

    #[test]
    fn two_enabled_bundles_with_same_command_is_ambiguous() {
        let bundles = vec![bundle("bundle-a", true, &["ping"]), bundle("bundle-b", true, &["ping"])];
        let err = resolve(None, "ping", &bundles).unwrap_err();
        match err {
            GortError::Ambiguous { candidates, .. } => {
                assert_eq!(candidates.len(), 2);
                assert!(candidates.contains(&"bundle-a:ping".to_string()));
                assert!(candidates.contains(&"bundle-b:ping".to_string()));
            }
            other => panic!("expected Ambiguous, got {other:?}"),
        }
    }

    #[test]
    fn disabled_bundle_is_not_considered() {
        let bundles = vec![bundle("gort", false, &["echo"])];
        let err = resolve(None, "echo", &bundles).unwrap_err();
        assert!(matches!(err, GortError::NoSuchCommand { .. }));
    }

    #[test]
    fn qualified_bundle_restricts_search() {
        let bundles = vec![bundle("bundle-a", true, &["ping"]), bundle("bundle-b", true, &["ping"])];
        let hits = resolve(Some("bundle-a"), "ping", &bundles).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].bundle_name, "bundle-a");
    }
}
