//! Interface filtering for reported node state

use log::warn;
use regex::Regex;
use serde_yaml::Value;

use crate::error::{PatternError, StateError};
use nmstate_shared_types::State;

/// Compiled interface exclusion glob
///
/// Supports `*`, `?`, `[...]` / `[!...]` classes, `{a,b}` alternation and
/// `\` escapes. A glob that matches the empty string disables filtering.
#[derive(Debug, Clone)]
pub struct InterfaceFilter {
    pattern: String,
    regex: Regex,
}

impl InterfaceFilter {
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        let source = glob_to_regex(pattern)?;
        let regex = Regex::new(&source).map_err(|e| PatternError {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    /// True when no interfaces should be filtered
    pub fn is_disabled(&self) -> bool {
        self.regex.is_match("")
    }
}

/// Remove interfaces matching `filter` from an observed state document.
///
/// Never fails: if the document cannot be parsed or re-serialized the
/// original is returned untouched and a warning is logged.
pub fn filter_out(observed: &State, filter: &InterfaceFilter) -> State {
    if filter.is_disabled() {
        return observed.clone();
    }

    match try_filter_out(observed, filter) {
        Ok(filtered) => filtered,
        Err(e) => {
            warn!(
                "failed filtering out interfaces matching '{}' from node state, keeping original content: {}",
                filter.pattern(),
                e
            );
            observed.clone()
        }
    }
}

fn try_filter_out(observed: &State, filter: &InterfaceFilter) -> Result<State, StateError> {
    let mut root: Value = serde_yaml::from_slice(observed.as_bytes()).map_err(StateError::Parse)?;

    let mapping = root
        .as_mapping_mut()
        .ok_or_else(|| StateError::Layout("document is not a mapping".to_string()))?;

    let interfaces = match mapping.get_mut("interfaces") {
        Some(Value::Sequence(interfaces)) => interfaces,
        Some(_) => {
            return Err(StateError::Layout(
                "interfaces is not a list".to_string(),
            ))
        }
        None => {
            return Err(StateError::Layout(
                "interfaces list is missing".to_string(),
            ))
        }
    };

    // Entries without a usable name are kept
    interfaces.retain(|iface| match iface.get("name").and_then(Value::as_str) {
        Some(name) => !filter.is_match(name),
        None => true,
    });

    let filtered = serde_yaml::to_string(&root).map_err(StateError::Serialize)?;
    Ok(State::from(filtered))
}

fn glob_to_regex(pattern: &str) -> Result<String, PatternError> {
    let error = |message: &str| PatternError {
        pattern: pattern.to_string(),
        message: message.to_string(),
    };

    let mut out = String::from("^(?:");
    let mut chars = pattern.chars().peekable();
    let mut brace_depth = 0usize;

    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => {
                let escaped = chars.next().ok_or_else(|| error("dangling escape"))?;
                out.push_str(&regex::escape(&escaped.to_string()));
            }
            '[' => {
                out.push('[');
                if chars.peek() == Some(&'!') {
                    chars.next();
                    out.push('^');
                }
                let mut closed = false;
                let mut empty = true;
                for c in chars.by_ref() {
                    match c {
                        ']' if !empty => {
                            closed = true;
                            break;
                        }
                        '\\' | '[' | ']' | '^' | '&' | '~' => {
                            out.push('\\');
                            out.push(c);
                        }
                        _ => out.push(c),
                    }
                    empty = false;
                }
                if !closed {
                    return Err(error("unterminated character class"));
                }
                out.push(']');
            }
            '{' => {
                brace_depth += 1;
                out.push_str("(?:");
            }
            ',' if brace_depth > 0 => out.push('|'),
            '}' if brace_depth > 0 => {
                brace_depth -= 1;
                out.push(')');
            }
            _ => out.push_str(&regex::escape(&c.to_string())),
        }
    }

    if brace_depth > 0 {
        return Err(error("unterminated alternation"));
    }

    out.push_str(")$");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateView;

    const OBSERVED: &str = r#"
interfaces:
  - name: veth0
    type: veth
    state: up
  - name: eth0
    type: ethernet
    state: up
routes:
  running: []
"#;

    fn names(state: &State) -> Vec<String> {
        StateView::parse(state)
            .unwrap()
            .interfaces()
            .iter()
            .filter_map(|iface| iface.name().map(str::to_string))
            .collect()
    }

    #[test]
    fn test_glob_matching() {
        let filter = InterfaceFilter::new("veth*").unwrap();
        assert!(filter.is_match("veth0"));
        assert!(filter.is_match("veth"));
        assert!(!filter.is_match("eth0"));
        assert!(!filter.is_match("aveth0"));

        let filter = InterfaceFilter::new("{veth,tap}?").unwrap();
        assert!(filter.is_match("tap1"));
        assert!(filter.is_match("veth9"));
        assert!(!filter.is_match("tap10"));

        let filter = InterfaceFilter::new("eth[!0-1]").unwrap();
        assert!(filter.is_match("eth2"));
        assert!(!filter.is_match("eth1"));

        let filter = InterfaceFilter::new("br.0").unwrap();
        assert!(filter.is_match("br.0"));
        assert!(!filter.is_match("brx0"));
    }

    #[test]
    fn test_invalid_globs_are_rejected() {
        assert!(InterfaceFilter::new("eth[0").is_err());
        assert!(InterfaceFilter::new("{veth,tap").is_err());
        assert!(InterfaceFilter::new("eth\\").is_err());
    }

    #[test]
    fn test_filter_removes_matching_interfaces() {
        let filter = InterfaceFilter::new("veth*").unwrap();
        let filtered = filter_out(&State::from(OBSERVED), &filter);
        assert_eq!(names(&filtered), vec!["eth0".to_string()]);

        // Other sections survive
        let view = StateView::parse(&filtered).unwrap();
        assert!(view.root().get("routes").is_some());
    }

    #[test]
    fn test_empty_filter_returns_input_unchanged() {
        for pattern in ["", "*"] {
            let filter = InterfaceFilter::new(pattern).unwrap();
            assert!(filter.is_disabled());
            let observed = State::from(OBSERVED);
            assert_eq!(filter_out(&observed, &filter), observed);
        }
    }

    #[test]
    fn test_malformed_input_is_returned_as_is() {
        let filter = InterfaceFilter::new("veth*").unwrap();
        for raw in [
            "interfaces: [unterminated",
            "- just\n- a list\n",
            "interfaces: not-a-list\n",
            "routes: {}\n",
            "",
        ] {
            let observed = State::from(raw);
            assert_eq!(filter_out(&observed, &filter), observed);
        }
    }

    #[test]
    fn test_interfaces_without_name_are_kept() {
        let filter = InterfaceFilter::new("veth*").unwrap();
        let observed = State::from("interfaces:\n  - type: ethernet\n  - name: veth1\n");
        let filtered = filter_out(&observed, &filter);
        let view = StateView::parse(&filtered).unwrap();
        assert_eq!(view.interfaces().len(), 1);
        assert_eq!(view.interfaces()[0].iface_type(), Some("ethernet"));
    }
}
