//! # Dependency declaration parsing.
//!
//! Recipes declare dependencies as free text:
//!
//! ```text
//! dependencies: "storage, net:running; camera:f"
//! ```
//!
//! Entries are separated by commas, semicolons or spaces. Each entry is a
//! component name with an optional `:<state>` fragment; the fragment
//! matches a lifecycle state by case-insensitive prefix
//! ([`State::match_prefix`]), and an omitted fragment means `Running`.

use thiserror::Error;

use crate::state::State;

/// A dependency declaration that could not be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DepSyntaxError {
    /// The `:<state>` fragment matched no lifecycle state.
    #[error("'{fragment}' does not match any lifecycle state")]
    UnknownState { fragment: String },
    /// An entry had an empty name or a dangling `:`.
    #[error("malformed dependency entry '{entry}'")]
    Malformed { entry: String },
}

/// Parses a dependency declaration into `(name, required_state)` pairs.
///
/// Duplicate names are preserved here; the dependency graph de-duplicates
/// and keeps the strictest required state.
pub fn parse_dependencies(decl: &str) -> Result<Vec<(String, State)>, DepSyntaxError> {
    let mut out = Vec::new();
    for entry in decl.split([',', ';', ' ']).filter(|t| !t.is_empty()) {
        let (name, required) = match entry.split_once(':') {
            None => (entry, State::Running),
            Some((name, fragment)) => {
                if name.is_empty() || fragment.is_empty() {
                    return Err(DepSyntaxError::Malformed {
                        entry: entry.to_string(),
                    });
                }
                let state = State::match_prefix(fragment).ok_or_else(|| {
                    DepSyntaxError::UnknownState {
                        fragment: fragment.to_string(),
                    }
                })?;
                (name, state)
            }
        };
        out.push((name.to_string(), required));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_separators_and_defaults() {
        let deps = parse_dependencies("storage, net:running; camera:f  gps").unwrap();
        assert_eq!(
            deps,
            vec![
                ("storage".to_string(), State::Running),
                ("net".to_string(), State::Running),
                ("camera".to_string(), State::Finished),
                ("gps".to_string(), State::Running),
            ]
        );
    }

    #[test]
    fn state_fragments_match_by_prefix() {
        let deps = parse_dependencies("a:RUN, b:await").unwrap();
        assert_eq!(deps[0].1, State::Running);
        assert_eq!(deps[1].1, State::AwaitingStartup);
    }

    #[test]
    fn rejects_unknown_states_and_dangling_colons() {
        assert!(matches!(
            parse_dependencies("a:nonsense"),
            Err(DepSyntaxError::UnknownState { .. })
        ));
        assert!(matches!(
            parse_dependencies("a:"),
            Err(DepSyntaxError::Malformed { .. })
        ));
        assert!(matches!(
            parse_dependencies(":running"),
            Err(DepSyntaxError::Malformed { .. })
        ));
    }

    #[test]
    fn empty_declaration_is_no_deps() {
        assert!(parse_dependencies("").unwrap().is_empty());
        assert!(parse_dependencies("  , ; ").unwrap().is_empty());
    }
}
