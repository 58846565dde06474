//! A tagged-variant pane node tree, parsed once during registry build
//! rather than re-walked against a dynamic JSON map on every request
//! (spec.md §9 redesign note).
//!
//! Source pane payloads are an options tree keyed by `nodes`; this module
//! is the one place that ever looks at the raw `serde_json::Value` shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One node in a pane's rendered content tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaneNode {
    /// A generic markup element: `<tag>children</tag>`.
    Element {
        tag: String,
        #[serde(default)]
        nodes: Vec<PaneNode>,
    },
    /// An interactive `<code>` element. Whether this is a belief widget is
    /// determined later by `belief::registry::scan_widgets`, not here —
    /// this variant just carries the raw shape through.
    Code {
        copy: String,
        #[serde(default)]
        code_hook_params: Vec<String>,
    },
    Text(String),
}

/// Parse a pane's root options payload (`{"nodes": [...]}`) into a node
/// list. Unrecognized shapes are skipped rather than treated as a parse
/// error — a malformed sibling node shouldn't take down the whole pane.
pub fn parse_root(payload: &Value) -> Vec<PaneNode> {
    match payload.get("nodes").and_then(Value::as_array) {
        Some(nodes) => nodes.iter().map(parse_node).collect(),
        None => Vec::new(),
    }
}

fn parse_node(value: &Value) -> PaneNode {
    if let Some(s) = value.as_str() {
        return PaneNode::Text(s.to_string());
    }

    let tag = value
        .get("tagName")
        .and_then(Value::as_str)
        .unwrap_or_default();

    if tag == "code" {
        let copy = value
            .get("copy")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let code_hook_params = value
            .get("codeHookParams")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default();
        return PaneNode::Code {
            copy,
            code_hook_params,
        };
    }

    let children = value
        .get("nodes")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().map(parse_node).collect())
        .unwrap_or_default();

    PaneNode::Element {
        tag: tag.to_string(),
        nodes: children,
    }
}

/// Extract the widget-type identifier from a code node's `copy` text:
/// `"belief(someSlug, val)"` -> `Some("belief")`. Returns `None` if `copy`
/// doesn't look like a call expression at all.
pub fn widget_type_of(copy: &str) -> Option<&str> {
    let paren = copy.find('(')?;
    let name = copy[..paren].trim();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_nested_elements_and_code_nodes() {
        let payload = json!({
            "nodes": [
                {
                    "tagName": "p",
                    "nodes": [
                        {
                            "tagName": "code",
                            "copy": "belief(tier, pro)",
                            "codeHookParams": ["tier", "pro"]
                        }
                    ]
                }
            ]
        });

        let tree = parse_root(&payload);
        assert_eq!(tree.len(), 1);
        match &tree[0] {
            PaneNode::Element { tag, nodes } => {
                assert_eq!(tag, "p");
                assert_eq!(nodes.len(), 1);
                match &nodes[0] {
                    PaneNode::Code {
                        copy,
                        code_hook_params,
                    } => {
                        assert_eq!(copy, "belief(tier, pro)");
                        assert_eq!(code_hook_params[0], "tier");
                    }
                    other => panic!("expected Code node, got {other:?}"),
                }
            }
            other => panic!("expected Element node, got {other:?}"),
        }
    }

    #[test]
    fn missing_nodes_array_parses_as_empty() {
        assert!(parse_root(&json!({})).is_empty());
    }

    #[test]
    fn widget_type_parses_leading_identifier() {
        assert_eq!(widget_type_of("belief(a, b)"), Some("belief"));
        assert_eq!(widget_type_of("toggle(x)"), Some("toggle"));
        assert_eq!(widget_type_of("not a call"), None);
    }
}
