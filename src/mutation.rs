use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::config::Rule;
use crate::document::Document;
use crate::resolver::{NodeResolver, Resolution};

/// Why a target was left alone although the rule is satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlreadyCorrectReason {
    /// Expected, new and current value are all equal
    IdentityRule,
    /// The target already holds the new value
    AlreadyApplied,
}

/// Result of applying one rule to one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Outcome {
    Mutated {
        old: String,
        new: String,
    },
    AlreadyCorrect {
        value: String,
        reason: AlreadyCorrectReason,
    },
    Mismatch {
        expected: String,
        found: String,
    },
    NotFound,
    Unresolvable {
        reason: String,
    },
}

impl Outcome {
    pub fn is_mutation(&self) -> bool {
        matches!(self, Outcome::Mutated { .. })
    }
}

/// What to do with a target holding `current`
pub fn decide(current: &str, expected: &str, new: &str) -> Outcome {
    if current == expected {
        if expected == new {
            Outcome::AlreadyCorrect {
                value: current.to_string(),
                reason: AlreadyCorrectReason::IdentityRule,
            }
        } else {
            Outcome::Mutated {
                old: current.to_string(),
                new: new.to_string(),
            }
        }
    } else if current == new {
        Outcome::AlreadyCorrect {
            value: current.to_string(),
            reason: AlreadyCorrectReason::AlreadyApplied,
        }
    } else {
        Outcome::Mismatch {
            expected: expected.to_string(),
            found: current.to_string(),
        }
    }
}

/// One line of the audit trail: a rule, the node it touched, and what happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub rule_path: String,
    /// Location of the target, absent when no node was involved
    pub target: Option<String>,
    pub outcome: Outcome,
}

/// Replace control characters with their escapes so `text` fits on one line
pub(crate) fn single_line(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_control() {
                c.escape_debug().to_string()
            } else {
                c.to_string()
            }
        })
        .collect()
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let at = match &self.target {
            Some(target) => single_line(&format!("{} ({})", self.rule_path, target)),
            None => single_line(&self.rule_path),
        };
        // Node values are escaped in full, paths and reasons only for control characters
        match &self.outcome {
            Outcome::Mutated { old, new } => write!(
                f,
                "Updated {} from '{}' to '{}'",
                at,
                old.escape_debug(),
                new.escape_debug()
            ),
            Outcome::AlreadyCorrect {
                value,
                reason: AlreadyCorrectReason::IdentityRule,
            } => write!(
                f,
                "No change needed for {}: value is '{}'",
                at,
                value.escape_debug()
            ),
            Outcome::AlreadyCorrect {
                value,
                reason: AlreadyCorrectReason::AlreadyApplied,
            } => write!(
                f,
                "Value at {} is already set to '{}'",
                at,
                value.escape_debug()
            ),
            Outcome::Mismatch { expected, found } => write!(
                f,
                "Value mismatch at {}. Expected: '{}', Found: '{}'",
                at,
                expected.escape_debug(),
                found.escape_debug()
            ),
            Outcome::NotFound => write!(f, "Path not found: {}", at),
            Outcome::Unresolvable { reason } => {
                write!(f, "Cannot resolve {}: {}", at, single_line(reason))
            }
        }
    }
}

/// Applies rules to documents
#[derive(Debug, Clone)]
pub struct MutationEngine {
    resolver: NodeResolver,
}

impl MutationEngine {
    pub fn new(resolver: NodeResolver) -> Self {
        Self { resolver }
    }

    /// Apply every rule in order; later rules see earlier writes
    pub fn apply_all(&self, document: &mut Document, rules: &[Rule]) -> Vec<LogEntry> {
        rules
            .iter()
            .flat_map(|rule| self.apply_rule(document, rule))
            .collect()
    }

    /// Apply one rule to every node its path selects
    pub fn apply_rule(&self, document: &mut Document, rule: &Rule) -> Vec<LogEntry> {
        let entry = |target: Option<String>, outcome: Outcome| LogEntry {
            rule_path: rule.path.clone(),
            target,
            outcome,
        };

        let entries = match self.resolver.resolve(document.tree(), &rule.path) {
            Resolution::NotFound => vec![entry(None, Outcome::NotFound)],
            Resolution::Unresolvable(reason) => {
                vec![entry(None, Outcome::Unresolvable { reason })]
            }
            Resolution::Matched { targets, skipped } => {
                let mut entries = Vec::with_capacity(targets.len() + skipped.len());
                for target in targets {
                    let location = target.describe();
                    let current = target.value();
                    let outcome = match decide(&current, &rule.expected_value, rule.new_value()) {
                        Outcome::Mutated { old, new } => match target.write(&new) {
                            Ok(()) => Outcome::Mutated { old, new },
                            Err(e) => Outcome::Unresolvable {
                                reason: format!("value could not be assigned: {}", e),
                            },
                        },
                        other => other,
                    };
                    entries.push(entry(Some(location), outcome));
                }
                for kind in skipped {
                    entries.push(entry(
                        Some(kind.to_string()),
                        Outcome::Unresolvable {
                            reason: format!("a {} has no rewritable value", kind),
                        },
                    ));
                }
                entries
            }
        };

        if entries.iter().any(|e| e.outcome.is_mutation()) {
            document.mark_modified();
        }
        for e in &entries {
            debug!(path = %document.path().display(), "{}", e);
        }
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentLoader;
    use crate::libxml2::LibXml2Wrapper;
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::sync::Arc;

    fn engine() -> MutationEngine {
        let libxml2 = Arc::new(LibXml2Wrapper::new());
        MutationEngine::new(NodeResolver::new(libxml2, BTreeMap::new()))
    }

    fn load(xml: &str, handle_cdata: bool) -> Document {
        DocumentLoader::new(Arc::new(LibXml2Wrapper::new()), handle_cdata)
            .load_from_bytes(Path::new("test.xml"), xml.as_bytes())
            .unwrap()
    }

    fn rule(path: &str, expected: &str, new: Option<&str>) -> Rule {
        Rule::new(path, expected, new.map(str::to_string))
    }

    fn value_at(document: &Document, path: &str) -> String {
        let resolver = NodeResolver::new(Arc::new(LibXml2Wrapper::new()), BTreeMap::new());
        match resolver.resolve(document.tree(), path) {
            Resolution::Matched { targets, .. } => targets[0].value(),
            other => panic!("Expected a match at {}, got {:?}", path, other),
        }
    }

    #[test]
    fn test_decide_cases() {
        assert_eq!(
            decide("X", "X", "Y"),
            Outcome::Mutated {
                old: "X".to_string(),
                new: "Y".to_string()
            }
        );
        assert_eq!(
            decide("X", "X", "X"),
            Outcome::AlreadyCorrect {
                value: "X".to_string(),
                reason: AlreadyCorrectReason::IdentityRule
            }
        );
        assert_eq!(
            decide("Y", "X", "Y"),
            Outcome::AlreadyCorrect {
                value: "Y".to_string(),
                reason: AlreadyCorrectReason::AlreadyApplied
            }
        );
        assert_eq!(
            decide("Z", "X", "Y"),
            Outcome::Mismatch {
                expected: "X".to_string(),
                found: "Z".to_string()
            }
        );
    }

    #[test]
    fn test_conditional_write() {
        let mut document = load("<a><b>X</b></a>", false);
        let entries = engine().apply_rule(&mut document, &rule("/a/b", "X", Some("Y")));

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].target.as_deref(), Some("element <b>"));
        assert!(entries[0].outcome.is_mutation());
        assert!(document.is_modified());
        assert_eq!(value_at(&document, "/a/b"), "Y");
    }

    #[test]
    fn test_idempotence() {
        let mut document = load("<a><b>X</b></a>", false);
        let rules = vec![rule("/a/b", "X", Some("Y"))];
        engine().apply_all(&mut document, &rules);

        let again = engine().apply_all(&mut document, &rules);
        assert_eq!(
            again[0].outcome,
            Outcome::AlreadyCorrect {
                value: "Y".to_string(),
                reason: AlreadyCorrectReason::AlreadyApplied
            }
        );
        assert_eq!(value_at(&document, "/a/b"), "Y");
    }

    #[test]
    fn test_mismatch_leaves_value() {
        let mut document = load("<a><b>Z</b></a>", false);
        let entries = engine().apply_rule(&mut document, &rule("/a/b", "X", Some("Y")));

        assert_eq!(
            entries[0].outcome,
            Outcome::Mismatch {
                expected: "X".to_string(),
                found: "Z".to_string()
            }
        );
        assert!(!document.is_modified());
        assert_eq!(value_at(&document, "/a/b"), "Z");
    }

    #[test]
    fn test_identity_rule_does_not_modify() {
        let mut document = load("<a><b>X</b></a>", false);
        let entries = engine().apply_rule(&mut document, &rule("/a/b", "X", None));
        assert!(matches!(
            entries[0].outcome,
            Outcome::AlreadyCorrect {
                reason: AlreadyCorrectReason::IdentityRule,
                ..
            }
        ));
        assert!(!document.is_modified());
    }

    #[test]
    fn test_not_found_and_unresolvable() {
        let mut document = load("<a><b>X</b></a>", false);
        let engine = engine();

        let entries = engine.apply_rule(&mut document, &rule("/a/missing", "X", Some("Y")));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].outcome, Outcome::NotFound);
        assert_eq!(entries[0].target, None);

        let entries = engine.apply_rule(&mut document, &rule("count(/a/b)", "1", Some("2")));
        assert_eq!(entries.len(), 1);
        assert!(matches!(entries[0].outcome, Outcome::Unresolvable { .. }));
        assert!(!document.is_modified());
    }

    #[test]
    fn test_multi_match_fan_out() {
        let mut document = load("<a><b>X</b><b>X</b><b>Z</b></a>", false);
        let entries = engine().apply_rule(&mut document, &rule("/a/b", "X", Some("Y")));

        assert_eq!(entries.len(), 3);
        assert!(entries[0].outcome.is_mutation());
        assert!(entries[1].outcome.is_mutation());
        assert!(matches!(entries[2].outcome, Outcome::Mismatch { .. }));
        assert!(document.is_modified());
    }

    #[test]
    fn test_later_rules_see_earlier_writes() {
        let mut document = load("<a><b>X</b></a>", false);
        let rules = vec![rule("/a/b", "X", Some("Y")), rule("/a/b", "Y", Some("Z"))];
        let entries = engine().apply_all(&mut document, &rules);

        assert!(entries.iter().all(|e| e.outcome.is_mutation()));
        assert_eq!(value_at(&document, "/a/b"), "Z");
    }

    #[test]
    fn test_attribute_text_and_cdata_targets() {
        let mut document = load(
            r#"<a v="1"><t>old</t><c><![CDATA[<raw>]]></c></a>"#,
            true,
        );
        let rules = vec![
            rule("/a/@v", "1", Some("2")),
            rule("/a/t/text()", "old", Some("new")),
            rule("/a/c/text()", "<raw>", Some("<cooked>")),
        ];
        let entries = engine().apply_all(&mut document, &rules);

        assert!(entries.iter().all(|e| e.outcome.is_mutation()));
        assert_eq!(value_at(&document, "/a/@v"), "2");
        assert_eq!(value_at(&document, "/a/t"), "new");
        assert_eq!(value_at(&document, "/a/c/text()"), "<cooked>");
    }

    #[test]
    fn test_element_with_children_keeps_children() {
        let mut document = load("<a><b>X<c>keep</c></b></a>", false);
        engine().apply_rule(&mut document, &rule("/a/b", "X", Some("Y")));

        assert_eq!(value_at(&document, "/a/b"), "Y");
        assert_eq!(value_at(&document, "/a/b/c"), "keep");
    }

    #[test]
    fn test_comment_target_is_unresolvable() {
        let mut document = load("<a><!--X--></a>", false);
        let entries = engine().apply_rule(&mut document, &rule("/a/comment()", "X", Some("Y")));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].target.as_deref(), Some("comment"));
        assert!(matches!(entries[0].outcome, Outcome::Unresolvable { .. }));
    }

    #[test]
    fn test_log_entry_display() {
        let entry = LogEntry {
            rule_path: "/a/b".to_string(),
            target: Some("element <b>".to_string()),
            outcome: Outcome::Mismatch {
                expected: "X".to_string(),
                found: "Z".to_string(),
            },
        };
        assert_eq!(
            entry.to_string(),
            "Value mismatch at /a/b (element <b>). Expected: 'X', Found: 'Z'"
        );

        let entry = LogEntry {
            rule_path: "/a/missing".to_string(),
            target: None,
            outcome: Outcome::NotFound,
        };
        assert_eq!(entry.to_string(), "Path not found: /a/missing");
    }

    #[test]
    fn test_multiline_value_renders_on_one_line() {
        let mut document = load("<a>\n  <b>X</b>\n</a>", false);
        let entries = engine().apply_rule(&mut document, &rule("/a", "X", Some("Y")));

        assert_eq!(entries.len(), 1);
        let line = entries[0].to_string();
        assert_eq!(line.lines().count(), 1);
        assert_eq!(
            line,
            "Value mismatch at /a (element <a>). Expected: 'X', Found: '\\n  '"
        );
    }

    #[test]
    fn test_quotes_in_values_are_escaped() {
        let entry = LogEntry {
            rule_path: "/a/@title".to_string(),
            target: None,
            outcome: Outcome::Mutated {
                old: "it's".to_string(),
                new: "tab\there".to_string(),
            },
        };
        assert_eq!(
            entry.to_string(),
            "Updated /a/@title from 'it\\'s' to 'tab\\there'"
        );
    }

    #[test]
    fn test_namespace_axis_is_unresolvable() {
        let mut document = load(r#"<a xmlns:p="urn:x"><b>X</b></a>"#, false);
        let entries = engine().apply_rule(&mut document, &rule("/a/namespace::*", "X", Some("Y")));

        assert!(!entries.is_empty());
        for entry in &entries {
            assert_eq!(entry.target.as_deref(), Some("namespace declaration"));
            assert!(matches!(entry.outcome, Outcome::Unresolvable { .. }));
            assert!(entry.to_string().contains("namespace declaration"));
        }
        assert!(!document.is_modified());
    }
}
