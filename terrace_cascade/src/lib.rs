// Copyright 2025 the Terrace Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Terrace Cascade: a headless state machine for cascading hierarchy
//! selectors.
//!
//! This crate is the engine behind an administrative-region/address picker:
//! the user drills down level by level (province → city → district → …), or
//! jumps ahead via free-text search or geolocation, and the host receives one
//! finalized selection. The crate owns the hard parts — multi-level async
//! data dependency, snapshot caching, speculative truncate-then-fetch state
//! with rollback-on-close, and token-based request cancellation — while the
//! host owns rendering, time, and transport.
//!
//! ## Sans-io host protocol
//!
//! [`CascadeState`] performs no I/O and never reads a clock. Interactions
//! (open, click, type, locate) and completed network results go in; an
//! ordered sequence of [`Effect`] values comes out: fetches to start,
//! transports to abort, a timer to arm, selections and notices to deliver.
//! Timestamps are caller-supplied milliseconds.
//!
//! Each fetch effect carries a [`RequestToken`]. The host performs the call
//! and reports the outcome through the matching `apply_*` method, passing the
//! token back. Completions are gated by token, never by arrival order: a slow
//! superseded response can never overwrite state written by a faster later
//! one. On [`Effect::CancelFetch`] the host may abort the transport, but even
//! without that the stale result is dropped.
//!
//! ## Minimal example
//!
//! A full manual drill-down session against an imaginary backend:
//!
//! ```rust
//! use terrace_cascade::{CascadeConfig, CascadeState, Effect, Node};
//!
//! let mut selector = CascadeState::new(CascadeConfig::default());
//!
//! // Opening with no bound value asks for the root level.
//! let effects = selector.open();
//! let token = match &effects[0] {
//!     Effect::FetchChildren { parent, token } => {
//!         assert_eq!(parent, "");
//!         *token
//!     }
//!     other => panic!("unexpected effect {other:?}"),
//! };
//! selector.apply_children(token, Ok(vec![Node::new("11", "Beijing", false)]));
//! assert_eq!(selector.levels().len(), 1);
//!
//! // Clicking a non-leaf node requests its children.
//! let effects = selector.click(0, "11", 1_000);
//! let token = match &effects[0] {
//!     Effect::FetchChildren { token, .. } => *token,
//!     other => panic!("unexpected effect {other:?}"),
//! };
//! selector.apply_children(token, Ok(vec![Node::new("110108", "Haidian", true)]));
//!
//! // Clicking a leaf finalizes: the selection is emitted and the selector
//! // closes itself.
//! let effects = selector.click(1, "110108", 2_000);
//! match &effects[0] {
//!     Effect::Emit(Some(selection)) => {
//!         assert_eq!(selection.code, "110108");
//!         assert_eq!(selection.display_text, "Beijing / Haidian");
//!     }
//!     other => panic!("unexpected effect {other:?}"),
//! }
//! assert!(!selector.is_open());
//! ```
//!
//! ## Resolution pipelines
//!
//! Four pipelines produce candidate paths; all converge on the same internal
//! finalize logic (cache the snapshot, update value and display text, emit):
//!
//! - **Manual drill-down**: [`CascadeState::click`] with reuse of
//!   already-materialized children, a click cooldown, and rejection of picks
//!   while a fetch is in flight. An empty child list for a non-leaf node is
//!   promoted to a completed leaf selection.
//! - **Initial value**: a bound code is resolved for display while closed
//!   ([`Effect::FindPath`]) and into full sibling levels on open
//!   ([`Effect::ResolveRelated`]), preferring server selection markers with a
//!   configurable code-length fallback ([`CodeScheme`]).
//! - **Search**: debounced input ([`Effect::StartTimer`] +
//!   [`CascadeState::poll_debounce`]), candidate paths per keyword, and
//!   sibling-level rebuild on pick so drilling can continue.
//! - **Geolocation**: [`Effect::RequestPosition`], reverse geocoding, the
//!   same rebuild, and a finalize that keeps the selector open so the user
//!   can review the resolved location.
//!
//! Reopening with a previously resolved value restores levels from an
//! in-memory snapshot cache with no network traffic; closing without
//! finalizing reverts to the state captured when the selector opened.
//!
//! ## Example: revert on close
//!
//! ```rust
//! use terrace_cascade::{CascadeConfig, CascadeState, Effect, Node};
//!
//! let mut selector = CascadeState::new(CascadeConfig::default());
//! let effects = selector.open();
//! let token = match &effects[0] {
//!     Effect::FetchChildren { token, .. } => *token,
//!     other => panic!("unexpected effect {other:?}"),
//! };
//! selector.apply_children(
//!     token,
//!     Ok(vec![
//!         Node::new("11", "Beijing", false),
//!         Node::new("12", "Tianjin", false),
//!     ]),
//! );
//!
//! // Wander around without finalizing…
//! let effects = selector.click(0, "12", 500);
//! let token = match &effects[0] {
//!     Effect::FetchChildren { token, .. } => *token,
//!     other => panic!("unexpected effect {other:?}"),
//! };
//! selector.apply_children(token, Ok(vec![Node::new("1201", "Heping", true)]));
//! assert_eq!(selector.path().len(), 1);
//!
//! // …then close: the pre-open state (nothing selected) is restored.
//! selector.close();
//! assert!(selector.path().is_empty());
//! assert_eq!(selector.display_text(), "");
//! ```
//!
//! ## Features
//!
//! - `std` (default): enables `std` support for dependencies such as
//!   `thiserror` and `tracing`.
//! - `serde`: `Serialize`/`Deserialize` derives on the wire-shaped data model
//!   ([`Node`], [`RelatedNode`], [`GeoPoint`], [`Selection`]).
//!
//! This crate is `no_std` and uses `alloc`.

#![no_std]

extern crate alloc;

mod cache;
mod coordinator;
mod error;
mod rebuild;
mod resolve;
mod state;
mod types;

pub use cache::{CacheEntry, SnapshotCache};
pub use coordinator::RequestToken;
pub use error::{FetchError, GeoError, Notice};
pub use resolve::{CodeScheme, display_text, extract_path};
pub use state::{CascadeState, Phase};
pub use types::{
    CascadeConfig, CascadeFlags, Effect, Effects, GeoPoint, Node, RelatedNode, Selection,
};
