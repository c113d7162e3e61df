// Copyright 2025 the Terrace Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Pure resolution helpers: selection extraction from marker-carrying levels,
//! the administrative code-length fallback, depth clamping, and display text.
//!
//! Extraction never guesses: the server-provided selection marker is
//! preferred, the configured code-length prefix match is the fallback, and if
//! neither identifies a node at some depth, the path simply stops at the
//! previous depth. A partial path is an acceptable result.

use alloc::string::String;
use alloc::vec::Vec;
use core::num::NonZeroUsize;

use crate::types::{Node, RelatedNode};

/// Per-depth code-length scheme used by the selection-extraction fallback.
///
/// Administrative code systems commonly encode ancestry as prefixes with fixed
/// lengths per depth. The default matches the original deployment's scheme
/// (2/4/6/9/12 digits); inject another via
/// [`CascadeConfig::scheme`](crate::CascadeConfig) for other coding systems.
/// Depths beyond the scheme fall back to exact code equality.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeScheme {
    lengths: Vec<usize>,
}

impl CodeScheme {
    /// A scheme with the given per-depth prefix lengths.
    pub fn new(lengths: impl Into<Vec<usize>>) -> Self {
        Self {
            lengths: lengths.into(),
        }
    }

    /// Prefix length for `depth`, if the scheme covers it.
    pub fn prefix_len(&self, depth: usize) -> Option<usize> {
        self.lengths.get(depth).copied()
    }

    /// Find the node at `depth` whose code matches `target` under this
    /// scheme: prefix match where a length is configured, exact equality
    /// otherwise.
    pub fn match_at<'a>(
        &self,
        depth: usize,
        target: &str,
        nodes: impl IntoIterator<Item = &'a Node>,
    ) -> Option<&'a Node> {
        match self.prefix_len(depth) {
            Some(len) => {
                // A target shorter than the depth's length degrades to
                // matching on the whole target, mirroring substring semantics.
                let prefix = target.get(..len).unwrap_or(target);
                nodes
                    .into_iter()
                    .find(|n| n.code.starts_with(prefix) || n.code == target)
            }
            None => nodes.into_iter().find(|n| n.code == target),
        }
    }
}

impl Default for CodeScheme {
    fn default() -> Self {
        Self::new([2, 4, 6, 9, 12])
    }
}

/// Extract the selected path from marker-carrying levels.
///
/// Per level: prefer the server `selected` marker; otherwise fall back to
/// [`CodeScheme::match_at`] against `target`. Construction stops at the first
/// depth with no match; the partial path is returned as-is.
pub fn extract_path(levels: &[Vec<RelatedNode>], target: &str, scheme: &CodeScheme) -> Vec<Node> {
    let mut path = Vec::new();
    for (depth, level) in levels.iter().enumerate() {
        let marked = level.iter().find(|r| r.selected).map(|r| &r.node);
        let hit = marked.or_else(|| scheme.match_at(depth, target, level.iter().map(|r| &r.node)));
        match hit {
            Some(node) => path.push(node.clone()),
            None => break,
        }
    }
    path
}

/// Clamp a level or path length to a configured maximum depth.
pub(crate) fn clamp_depth(max_depth: Option<NonZeroUsize>, len: usize) -> usize {
    max_depth.map_or(len, |m| len.min(m.get()))
}

/// Join a path's node names with `separator`.
pub fn display_text(path: &[Node], separator: &str) -> String {
    let mut text = String::new();
    for (i, node) in path.iter().enumerate() {
        if i > 0 {
            text.push_str(separator);
        }
        text.push_str(&node.name);
    }
    text
}

#[cfg(test)]
mod tests {
    use alloc::vec;
    use alloc::vec::Vec;

    use super::*;

    fn related(code: &str, name: &str, selected: bool) -> RelatedNode {
        RelatedNode::new(Node::new(code, name, false), selected)
    }

    fn levels() -> Vec<Vec<RelatedNode>> {
        vec![
            vec![related("11", "Beijing", false), related("12", "Tianjin", false)],
            vec![related("1101", "City", false)],
            vec![related("110108", "Haidian", false), related("110105", "Chaoyang", false)],
        ]
    }

    #[test]
    fn server_marker_wins_over_code_matching() {
        let mut data = levels();
        // Mark an entry that code matching would NOT pick for this target.
        data[0][1].selected = true;

        let path = extract_path(&data, "110108", &CodeScheme::default());
        assert_eq!(path[0].code, "12");
    }

    #[test]
    fn code_prefix_fallback_builds_full_path() {
        let path = extract_path(&levels(), "110108", &CodeScheme::default());
        let codes: Vec<_> = path.iter().map(|n| n.code.as_str()).collect();
        assert_eq!(codes, ["11", "1101", "110108"]);
    }

    #[test]
    fn unmatched_depth_stops_construction_without_guessing() {
        let mut data = levels();
        // No entry at depth 1 matches the target prefix "9901".
        data[1] = vec![related("8801", "Elsewhere", false)];

        let path = extract_path(&data, "990199", &CodeScheme::new([2, 4, 6]));
        assert!(path.is_empty(), "no match at depth 0 yields an empty path");

        // A partial match keeps the matched prefix of the path.
        let path = extract_path(&data, "110108", &CodeScheme::default());
        let codes: Vec<_> = path.iter().map(|n| n.code.as_str()).collect();
        assert_eq!(codes, ["11"]);
    }

    #[test]
    fn depths_beyond_scheme_require_exact_equality() {
        let data = vec![
            vec![related("11", "Beijing", false)],
            vec![related("1101", "City", false)],
        ];
        let scheme = CodeScheme::new([2]);

        let path = extract_path(&data, "1101", &scheme);
        let codes: Vec<_> = path.iter().map(|n| n.code.as_str()).collect();
        assert_eq!(codes, ["11", "1101"]);

        let path = extract_path(&data, "1102", &scheme);
        assert_eq!(path.len(), 1, "depth 1 has no exact match for 1102");
    }

    #[test]
    fn short_target_degrades_to_whole_target_prefix() {
        let data = vec![
            vec![related("11", "Beijing", false)],
            vec![related("1101", "City", false)],
        ];
        // Depth 1 wants 4 characters but the target only has 2.
        let path = extract_path(&data, "11", &CodeScheme::default());
        let codes: Vec<_> = path.iter().map(|n| n.code.as_str()).collect();
        assert_eq!(codes, ["11", "1101"]);
    }

    #[test]
    fn clamp_depth_applies_only_when_configured() {
        assert_eq!(clamp_depth(None, 5), 5);
        assert_eq!(clamp_depth(NonZeroUsize::new(2), 5), 2);
        assert_eq!(clamp_depth(NonZeroUsize::new(7), 5), 5);
    }

    #[test]
    fn display_text_joins_names() {
        let path = [
            Node::new("11", "Beijing", false),
            Node::new("110108", "Haidian", true),
        ];
        assert_eq!(display_text(&path, " / "), "Beijing / Haidian");
        assert_eq!(display_text(&path[..1], " / "), "Beijing");
        assert_eq!(display_text(&[], " / "), "");
    }
}
