// Copyright 2025 the Terrace Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Public data model: hierarchy nodes, selections, configuration, and the
//! effect vocabulary the host executes.
//!
//! All of these are plain owned values. The state machine never holds
//! references into host data, and hosts never hold references into live
//! machine state; snapshots and cache entries are deep copies by
//! construction.

use alloc::string::String;
use core::num::NonZeroUsize;

use smallvec::SmallVec;

use crate::coordinator::RequestToken;
use crate::error::Notice;
use crate::resolve::CodeScheme;

/// One selectable entry at a hierarchy level.
///
/// `code` is unique within its level; `leaf` is the server's claim that the
/// node has no children. Nodes are immutable once fetched.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Node {
    /// Stable identifier, unique within the node's level.
    pub code: String,
    /// Human-readable name, used to build display text.
    pub name: String,
    /// Server-flagged "has no children". A `false` here can still turn out to
    /// be childless at fetch time; see the leaf-promotion rule on
    /// [`CascadeState`](crate::CascadeState).
    pub leaf: bool,
}

impl Node {
    /// Convenience constructor.
    pub fn new(code: impl Into<String>, name: impl Into<String>, leaf: bool) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            leaf,
        }
    }
}

/// A node plus the server-provided selection marker.
///
/// This is the wire shape of the multi-level "related" lookup: every sibling
/// list in the response may mark at most one entry as the one on the resolved
/// path.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RelatedNode {
    /// The node itself.
    pub node: Node,
    /// `true` if the server marked this entry as selected at its level.
    pub selected: bool,
}

impl RelatedNode {
    /// Wraps a node with its selection marker.
    pub fn new(node: Node, selected: bool) -> Self {
        Self { node, selected }
    }
}

/// Geographic coordinate attached to geolocation-originated selections.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GeoPoint {
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
}

/// A finalized selection as reported to the host.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Selection {
    /// Code of the deepest selected node.
    pub code: String,
    /// Name of the deepest selected node.
    pub name: String,
    /// The selected path's names joined by the configured separator.
    pub display_text: String,
    /// Raw device coordinate; present only when the selection originated from
    /// geolocation.
    pub geo: Option<GeoPoint>,
}

bitflags::bitflags! {
    /// Capability flags for a selector instance.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct CascadeFlags: u8 {
        /// The free-text search overlay is available.
        const SEARCH = 1 << 0;
        /// The geolocation shortcut is available.
        const GEOLOCATION = 1 << 1;
        /// The selector ignores all interaction.
        const DISABLED = 1 << 2;
    }
}

impl Default for CascadeFlags {
    fn default() -> Self {
        Self::SEARCH | Self::GEOLOCATION
    }
}

/// Configuration for a [`CascadeState`](crate::CascadeState) instance.
///
/// Plain pub-field struct; unspecified fields come from [`Default`]:
///
/// ```
/// use core::num::NonZeroUsize;
/// use terrace_cascade::CascadeConfig;
///
/// let config = CascadeConfig {
///     max_depth: NonZeroUsize::new(2),
///     ..CascadeConfig::default()
/// };
/// assert_eq!(config.debounce_ms, 500);
/// ```
#[derive(Clone, Debug)]
pub struct CascadeConfig {
    /// Capability flags. Defaults to search and geolocation enabled.
    pub flags: CascadeFlags,
    /// Deepest level a selection may reach: `1` = first level only. `None`
    /// means "drill to the bottom". Once this depth is reached it takes
    /// priority over the server leaf flag.
    pub max_depth: Option<NonZeroUsize>,
    /// Externally bound value present at construction, if any.
    pub initial_value: Option<String>,
    /// Per-depth code-length scheme for the selection-extraction fallback.
    pub scheme: CodeScheme,
    /// Separator between node names in display text.
    pub separator: String,
    /// Debounce delay for search input, in milliseconds.
    pub debounce_ms: u64,
    /// Cooldown suppressing double clicks, in milliseconds.
    pub click_cooldown_ms: u64,
    /// Timeout forwarded with [`Effect::RequestPosition`], in milliseconds.
    pub position_timeout_ms: u64,
    /// Acceptable cached-position age forwarded with
    /// [`Effect::RequestPosition`], in milliseconds.
    pub position_maximum_age_ms: u64,
    /// Entry-count bound of the snapshot cache.
    pub cache_capacity: usize,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            flags: CascadeFlags::default(),
            max_depth: None,
            initial_value: None,
            scheme: CodeScheme::default(),
            separator: String::from(" / "),
            debounce_ms: 500,
            click_cooldown_ms: 300,
            position_timeout_ms: 15_000,
            position_maximum_age_ms: 300_000,
            cache_capacity: 16,
        }
    }
}

/// One instruction for the host to execute.
///
/// State-machine entry points return an ordered sequence of these. Fetch
/// variants carry a [`RequestToken`]; the host performs the transport call and
/// reports the outcome through the matching `apply_*` method on
/// [`CascadeState`](crate::CascadeState), passing the token back. A completion
/// whose token has since been superseded is ignored: results are gated by
/// token, never by arrival order.
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    /// List the children of `parent` (empty string = root level); report via
    /// [`apply_children`](crate::CascadeState::apply_children).
    FetchChildren {
        /// Parent node code, or empty for the root set.
        parent: String,
        /// Token to pass back on completion.
        token: RequestToken,
    },
    /// Fetch the full multi-level sibling set (with selection markers) for
    /// `code`; report via [`apply_related`](crate::CascadeState::apply_related).
    ResolveRelated {
        /// Code whose related levels are requested.
        code: String,
        /// Token to pass back on completion.
        token: RequestToken,
    },
    /// Fetch the ancestor chain for `code`; report via
    /// [`apply_find`](crate::CascadeState::apply_find).
    FindPath {
        /// Code whose ancestor chain is requested.
        code: String,
        /// Token to pass back on completion.
        token: RequestToken,
    },
    /// Run a free-text search; report via
    /// [`apply_search`](crate::CascadeState::apply_search).
    Search {
        /// Trimmed keyword to search for.
        keyword: String,
        /// Token to pass back on completion.
        token: RequestToken,
    },
    /// Reverse-geocode a device position; report via
    /// [`apply_geocode`](crate::CascadeState::apply_geocode).
    ReverseGeocode {
        /// The coordinate to resolve.
        point: GeoPoint,
        /// Token to pass back on completion.
        token: RequestToken,
    },
    /// Ask the platform for a device position; report via
    /// [`position_resolved`](crate::CascadeState::position_resolved) or
    /// [`position_failed`](crate::CascadeState::position_failed).
    RequestPosition {
        /// Give up after this many milliseconds.
        timeout_ms: u64,
        /// A cached position no older than this is acceptable.
        maximum_age_ms: u64,
    },
    /// Abort the transport of a superseded request. Best-effort: even without
    /// transport-level abortion, the stale result is dropped by token.
    CancelFetch {
        /// The superseded token.
        token: RequestToken,
    },
    /// Arm (or re-arm) the debounce timer; call
    /// [`poll_debounce`](crate::CascadeState::poll_debounce) at or after
    /// `deadline` (same clock as the caller-supplied `now` values).
    StartTimer {
        /// Absolute deadline in milliseconds.
        deadline: u64,
    },
    /// Deliver the selection to the host callback: `Some` on completion or
    /// geolocation update, `None` when the selection is cleared.
    Emit(Option<Selection>),
    /// Show a non-blocking notification.
    Notify(Notice),
}

/// Ordered effect sequence returned by state-machine entry points.
///
/// Execute in order; fetches may of course complete asynchronously and out of
/// order; tokens take care of that.
pub type Effects = SmallVec<[Effect; 4]>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_flags_enable_both_shortcuts() {
        let flags = CascadeFlags::default();
        assert!(flags.contains(CascadeFlags::SEARCH));
        assert!(flags.contains(CascadeFlags::GEOLOCATION));
        assert!(!flags.contains(CascadeFlags::DISABLED));
    }

    #[test]
    fn default_config_matches_documented_values() {
        let config = CascadeConfig::default();
        assert_eq!(config.separator, " / ");
        assert_eq!(config.debounce_ms, 500);
        assert_eq!(config.click_cooldown_ms, 300);
        assert_eq!(config.position_timeout_ms, 15_000);
        assert_eq!(config.position_maximum_age_ms, 300_000);
        assert_eq!(config.cache_capacity, 16);
        assert!(config.max_depth.is_none());
        assert!(config.initial_value.is_none());
    }
}
