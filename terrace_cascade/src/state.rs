// Copyright 2025 the Terrace Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The selection state machine.
//!
//! [`CascadeState`] owns the materialized levels, the selected path, the
//! open/closed lifecycle with snapshot-revert, and the convergence point for
//! the four resolution pipelines: manual drill-down, initial-value load,
//! free-text search, and geolocation. Pipeline-specific code is limited to
//! obtaining a candidate path; applying one (finalize, cache, emit) is
//! shared.
//!
//! Every entry point returns an ordered [`Effects`] sequence for the host to
//! execute. Fetch completions come back through the `apply_*` methods tagged
//! with their [`RequestToken`]; a completion whose token has been superseded
//! is dropped silently, so a slow stale response can never overwrite state
//! written by a faster later one.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use tracing::{debug, warn};

use crate::cache::SnapshotCache;
use crate::coordinator::{ClickGate, Debounce, OpSlot, RequestToken, TokenSource};
use crate::error::{FetchError, GeoError, Notice};
use crate::rebuild::{LevelRebuild, RebuildOrigin, RebuildStep};
use crate::resolve::{clamp_depth, display_text, extract_path};
use crate::types::{CascadeConfig, CascadeFlags, Effect, Effects, GeoPoint, Node, RelatedNode, Selection};

/// Lifecycle phase of the selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Not open; no finalized selection pending from this session.
    Closed,
    /// Open, waiting for the initial levels (root set or related levels).
    Loading,
    /// Open with levels displayed, awaiting a pick.
    Browsing,
    /// Open with a child-level fetch in flight after a pick.
    LevelLoading,
    /// A selection was finalized and the selector closed itself, keeping the
    /// finalized state. An explicit close settles this back to [`Closed`].
    Completed,
}

/// Pre-open state captured for rollback when the user closes without
/// finalizing.
#[derive(Clone, Debug)]
struct OpenSnapshot {
    value: Option<String>,
    display_text: String,
    path: Vec<Node>,
    levels: Vec<Vec<Node>>,
}

/// Headless cascading hierarchy selector.
///
/// See the crate docs for the host protocol and a worked example.
#[derive(Debug)]
pub struct CascadeState {
    config: CascadeConfig,
    phase: Phase,

    /// Externally bound code, if any.
    value: Option<String>,
    display_text: String,
    levels: Vec<Vec<Node>>,
    path: Vec<Node>,

    /// Set once the user completes an action this session (finalize, clear,
    /// search pick, locate); suppresses snapshot revert on close.
    manual_selection: bool,
    snapshot: Option<OpenSnapshot>,

    cache: SnapshotCache,
    /// Memo of the root sibling list, reused by rebuild plans.
    root_level: Option<Vec<Node>>,

    tokens: TokenSource,
    level_op: OpSlot,
    resolve_op: OpSlot,
    find_op: OpSlot,
    search_op: OpSlot,
    geocode_op: OpSlot,
    rebuild_op: OpSlot,
    rebuild: Option<LevelRebuild>,

    click_gate: ClickGate,
    debounce: Debounce,
    keyword: String,
    search_results: Vec<Vec<Node>>,

    /// Code of the node currently being expanded, for per-node spinners.
    loading_code: Option<String>,
    /// Position request or geocode/rebuild in flight.
    locating: bool,
    /// Coordinate awaiting reverse-geocode completion.
    pending_position: Option<GeoPoint>,
}

impl CascadeState {
    /// Create a selector with the given configuration.
    ///
    /// If `config.initial_value` is set, call [`start`](Self::start) once to
    /// obtain the display-resolution effects for it.
    pub fn new(config: CascadeConfig) -> Self {
        let value = config.initial_value.clone().filter(|v| !v.is_empty());
        let cache = SnapshotCache::new(config.cache_capacity);
        let debounce = Debounce::new(config.debounce_ms);
        let click_gate = ClickGate::new(config.click_cooldown_ms);
        Self {
            config,
            phase: Phase::Closed,
            value,
            display_text: String::new(),
            levels: Vec::new(),
            path: Vec::new(),
            manual_selection: false,
            snapshot: None,
            cache,
            root_level: None,
            tokens: TokenSource::new(),
            level_op: OpSlot::default(),
            resolve_op: OpSlot::default(),
            find_op: OpSlot::default(),
            search_op: OpSlot::default(),
            geocode_op: OpSlot::default(),
            rebuild_op: OpSlot::default(),
            rebuild: None,
            click_gate,
            debounce,
            keyword: String::new(),
            search_results: Vec::new(),
            loading_code: None,
            locating: false,
            pending_position: None,
        }
    }

    // ---------------------------------------------------------------------
    // Host-facing interaction entry points
    // ---------------------------------------------------------------------

    /// Kick off display resolution for a value bound at construction.
    pub fn start(&mut self) -> Effects {
        let mut fx = Effects::new();
        self.display_resolution(&mut fx);
        fx
    }

    /// The host changed (or cleared) the externally bound value.
    ///
    /// Resets path, levels, and display text and re-runs the initial-value
    /// resolution pipeline.
    pub fn set_value(&mut self, value: Option<&str>) -> Effects {
        let next = value.filter(|v| !v.is_empty()).map(String::from);
        let mut fx = Effects::new();
        if next == self.value {
            return fx;
        }
        self.abort_resolution(&mut fx);
        self.debounce.cancel();
        self.value = next;
        self.manual_selection = false;
        self.path.clear();
        self.levels.clear();
        self.display_text.clear();
        if self.is_open() {
            self.open_resolution(&mut fx);
        } else {
            self.display_resolution(&mut fx);
        }
        self.check_invariants();
        fx
    }

    /// Open the selector.
    ///
    /// Takes the rollback snapshot, then restores levels from the cache (no
    /// network) or requests resolution for the bound value / the root set.
    pub fn open(&mut self) -> Effects {
        let mut fx = Effects::new();
        if self.disabled() || self.is_open() {
            return fx;
        }
        self.snapshot = Some(OpenSnapshot {
            value: self.value.clone(),
            display_text: self.display_text.clone(),
            path: self.path.clone(),
            levels: self.levels.clone(),
        });
        self.manual_selection = false;
        self.keyword.clear();
        self.search_results.clear();
        self.open_resolution(&mut fx);
        self.check_invariants();
        fx
    }

    /// Close the selector.
    ///
    /// Without a completed action this session, the pre-open snapshot is
    /// restored. Pending requests are invalidated and their transports asked
    /// to abort.
    pub fn close(&mut self) -> Effects {
        let mut fx = Effects::new();
        if !self.is_open() {
            // Settle a Completed phase; state is kept either way.
            self.snapshot = None;
            self.phase = Phase::Closed;
            return fx;
        }
        self.abort_resolution(&mut fx);
        self.debounce.cancel();
        self.keyword.clear();
        self.search_results.clear();
        if !self.manual_selection {
            if let Some(snapshot) = self.snapshot.take() {
                debug!("closing without a selection; reverting to pre-open state");
                self.value = snapshot.value;
                self.display_text = snapshot.display_text;
                self.path = snapshot.path;
                self.levels = snapshot.levels;
            }
        }
        self.snapshot = None;
        self.phase = Phase::Closed;
        self.check_invariants();
        fx
    }

    /// A node at `depth` was clicked at time `now` (milliseconds).
    ///
    /// Rejected while a level fetch or rebuild is in flight, and within the
    /// click cooldown window. Finalizes on a leaf or at the configured depth
    /// limit; otherwise reuses already-materialized children or issues a
    /// fetch, optimistically truncating stale deeper levels first.
    pub fn click(&mut self, depth: usize, code: &str, now: u64) -> Effects {
        let mut fx = Effects::new();
        if self.disabled() || !self.is_open() {
            return fx;
        }
        if self.phase == Phase::LevelLoading || self.rebuild.is_some() {
            return fx;
        }
        if !self.click_gate.admit(now) {
            return fx;
        }
        let Some(node) = self
            .levels
            .get(depth)
            .and_then(|level| level.iter().find(|n| n.code == code))
            .cloned()
        else {
            return fx;
        };

        // The configured depth limit takes priority over the leaf flag.
        let limit_reached = self.config.max_depth.is_some_and(|m| depth + 1 >= m.get());
        if limit_reached || node.leaf {
            let mut path = self.path.clone();
            path.truncate(depth);
            path.push(node);
            let mut levels = self.levels.clone();
            levels.truncate(depth + 1);
            self.finalize(path, levels, None, true, &mut fx);
            return fx;
        }

        let same_pick = self.path.get(depth).is_some_and(|n| n.code == node.code);
        let next_ready = self.levels.get(depth + 1).is_some_and(|l| !l.is_empty());
        if same_pick && next_ready {
            // Re-picking the current node with children already materialized:
            // just drop levels beyond the next one.
            self.path.truncate(depth);
            self.path.push(node);
            self.levels.truncate(depth + 2);
            self.check_invariants();
            return fx;
        }

        // Optimistically drop stale deeper levels while the fetch is out.
        self.levels.truncate(depth + 1);
        self.path.truncate(depth);
        self.path.push(node.clone());
        self.loading_code = Some(node.code.clone());
        self.phase = Phase::LevelLoading;
        let (token, superseded) = self.level_op.begin(&mut self.tokens);
        if let Some(old) = superseded {
            fx.push(Effect::CancelFetch { token: old });
        }
        debug!(code = %node.code, depth, "expanding node");
        fx.push(Effect::FetchChildren {
            parent: node.code,
            token,
        });
        self.check_invariants();
        fx
    }

    /// The user cleared the selection.
    ///
    /// Wipes value, path, levels, display text, and the snapshot cache, and
    /// reports `Emit(None)` to the host.
    pub fn clear(&mut self) -> Effects {
        let mut fx = Effects::new();
        if self.disabled() {
            return fx;
        }
        self.abort_resolution(&mut fx);
        self.debounce.cancel();
        self.manual_selection = true;
        self.value = None;
        self.display_text.clear();
        self.path.clear();
        self.levels.clear();
        self.keyword.clear();
        self.search_results.clear();
        self.cache.clear();
        if self.is_open() {
            self.open_resolution(&mut fx);
        }
        fx.push(Effect::Emit(None));
        self.check_invariants();
        fx
    }

    // ---------------------------------------------------------------------
    // Search overlay
    // ---------------------------------------------------------------------

    /// The search input changed at time `now` (milliseconds).
    ///
    /// Restarts the debounce; the returned [`Effect::StartTimer`] tells the
    /// host when to call [`poll_debounce`](Self::poll_debounce).
    pub fn search_input(&mut self, keyword: &str, now: u64) -> Effects {
        let mut fx = Effects::new();
        if self.disabled() || !self.is_open() || !self.config.flags.contains(CascadeFlags::SEARCH) {
            return fx;
        }
        self.keyword = String::from(keyword);
        let trimmed = keyword.trim();
        if trimmed.is_empty() {
            self.debounce.cancel();
            self.search_op.cancel();
            self.search_results.clear();
            return fx;
        }
        let deadline = self.debounce.submit(trimmed, now);
        fx.push(Effect::StartTimer { deadline });
        fx
    }

    /// The debounce timer fired (or may have fired) at time `now`.
    ///
    /// Issues the search for the settled keyword, superseding any in-flight
    /// search. The old transport is not aborted; its result is dropped by
    /// token.
    pub fn poll_debounce(&mut self, now: u64) -> Effects {
        let mut fx = Effects::new();
        let Some(keyword) = self.debounce.poll(now) else {
            return fx;
        };
        if !self.is_open() || keyword.is_empty() {
            return fx;
        }
        let (token, _superseded) = self.search_op.begin(&mut self.tokens);
        debug!(keyword = %keyword, "issuing search");
        fx.push(Effect::Search { keyword, token });
        fx
    }

    /// The host completed a [`Effect::Search`] request.
    pub fn apply_search(
        &mut self,
        token: RequestToken,
        result: Result<Vec<Vec<Node>>, FetchError>,
    ) -> Effects {
        let mut fx = Effects::new();
        if !self.search_op.accepts(token) {
            debug!("dropping stale search result");
            return fx;
        }
        self.search_op.finish(token);
        match result {
            Err(error) if error.is_cancelled() => {}
            Err(error) => {
                warn!(error = %error, "search failed");
                self.search_results.clear();
                fx.push(Effect::Notify(Notice::SearchFailed));
            }
            Ok(paths) => {
                self.search_results = paths.into_iter().filter(|p| !p.is_empty()).collect();
                debug!(count = self.search_results.len(), "search results updated");
            }
        }
        fx
    }

    /// The user picked the search candidate at `index`.
    ///
    /// A candidate already at the depth limit, or ending in a leaf, finalizes
    /// immediately with no further network calls. Otherwise sibling levels
    /// are rebuilt depth by depth so the drill-down can continue from the
    /// picked node.
    pub fn pick_search_result(&mut self, index: usize) -> Effects {
        let mut fx = Effects::new();
        if self.disabled() || !self.is_open() {
            return fx;
        }
        if self.phase == Phase::LevelLoading || self.rebuild.is_some() {
            return fx;
        }
        let Some(candidate) = self.search_results.get(index).cloned() else {
            return fx;
        };
        self.manual_selection = true;
        // The pick supersedes any in-flight initial-value resolution.
        self.cancel_value_resolution(&mut fx);

        if self.config.max_depth.is_some_and(|m| candidate.len() >= m.get()) {
            let keep = clamp_depth(self.config.max_depth, candidate.len());
            self.finalize_unmaterialized(&candidate[..keep], None, true, &mut fx);
            return fx;
        }
        if candidate.last().is_some_and(|n| n.leaf) {
            self.finalize_unmaterialized(&candidate, None, true, &mut fx);
            return fx;
        }

        let plan = LevelRebuild::new(RebuildOrigin::Search, candidate, self.root_level.clone());
        self.start_rebuild(plan, &mut fx);
        fx
    }

    // ---------------------------------------------------------------------
    // Geolocation
    // ---------------------------------------------------------------------

    /// The user pressed the locate button.
    pub fn locate(&mut self) -> Effects {
        let mut fx = Effects::new();
        if self.disabled()
            || !self.is_open()
            || !self.config.flags.contains(CascadeFlags::GEOLOCATION)
            || self.locating
        {
            return fx;
        }
        self.locating = true;
        self.manual_selection = true;
        // Locating supersedes any in-flight initial-value resolution.
        self.cancel_value_resolution(&mut fx);
        fx.push(Effect::RequestPosition {
            timeout_ms: self.config.position_timeout_ms,
            maximum_age_ms: self.config.position_maximum_age_ms,
        });
        fx
    }

    /// The host obtained a device position.
    pub fn position_resolved(&mut self, point: GeoPoint) -> Effects {
        let mut fx = Effects::new();
        if !self.locating || !self.is_open() {
            return fx;
        }
        self.pending_position = Some(point);
        let (token, superseded) = self.geocode_op.begin(&mut self.tokens);
        if let Some(old) = superseded {
            fx.push(Effect::CancelFetch { token: old });
        }
        fx.push(Effect::ReverseGeocode { point, token });
        fx
    }

    /// The host failed to obtain a device position.
    pub fn position_failed(&mut self, error: GeoError) -> Effects {
        let mut fx = Effects::new();
        if !self.locating {
            return fx;
        }
        self.locating = false;
        warn!(error = %error, "device position request failed");
        fx.push(Effect::Notify(Notice::from(error)));
        fx
    }

    /// The host completed a [`Effect::ReverseGeocode`] request.
    pub fn apply_geocode(
        &mut self,
        token: RequestToken,
        result: Result<Vec<Node>, FetchError>,
    ) -> Effects {
        let mut fx = Effects::new();
        if !self.geocode_op.accepts(token) {
            debug!("dropping stale geocode result");
            return fx;
        }
        self.geocode_op.finish(token);
        let point = self.pending_position.take();
        match result {
            Err(error) if error.is_cancelled() => {
                self.locating = false;
            }
            Err(error) => {
                warn!(error = %error, "reverse geocoding failed");
                self.locating = false;
                fx.push(Effect::Notify(Notice::LocateFailed));
            }
            Ok(chain) => {
                if chain.is_empty() {
                    self.locating = false;
                    fx.push(Effect::Notify(Notice::LocateFailed));
                    return fx;
                }
                let Some(point) = point else {
                    self.locating = false;
                    return fx;
                };
                let plan =
                    LevelRebuild::new(RebuildOrigin::Locate(point), chain, self.root_level.clone());
                self.start_rebuild(plan, &mut fx);
            }
        }
        fx
    }

    // ---------------------------------------------------------------------
    // Fetch completions
    // ---------------------------------------------------------------------

    /// The host completed a [`Effect::FetchChildren`] request.
    ///
    /// Serves three flows, told apart by the token: rebuild steps, the root
    /// set for a value-less open, and child levels after a pick. An empty
    /// child list after a pick is promoted to a completed leaf selection.
    pub fn apply_children(
        &mut self,
        token: RequestToken,
        result: Result<Vec<Node>, FetchError>,
    ) -> Effects {
        let mut fx = Effects::new();
        if self.rebuild_op.accepts(token) {
            self.rebuild_op.finish(token);
            self.apply_rebuild_step(result, &mut fx);
            self.check_invariants();
            return fx;
        }
        if !self.level_op.accepts(token) {
            debug!("dropping stale children result");
            return fx;
        }
        self.level_op.finish(token);
        let expanding = self.loading_code.take();
        match result {
            Err(error) if error.is_cancelled() => {
                if matches!(self.phase, Phase::Loading | Phase::LevelLoading) {
                    self.phase = Phase::Browsing;
                }
            }
            Err(error) => {
                warn!(error = %error, "children fetch failed");
                if matches!(self.phase, Phase::Loading | Phase::LevelLoading) {
                    self.phase = Phase::Browsing;
                }
                fx.push(Effect::Notify(Notice::LoadFailed));
            }
            Ok(children) => match self.phase {
                Phase::Loading => {
                    // Root set for a value-less open.
                    self.root_level = Some(children.clone());
                    self.levels = vec![children];
                    self.path.clear();
                    self.phase = Phase::Browsing;
                }
                Phase::LevelLoading => {
                    if children.is_empty() {
                        debug!(code = ?expanding, "empty children list; promoting to leaf");
                        let path = self.path.clone();
                        let levels = self.levels.clone();
                        self.finalize(path, levels, None, true, &mut fx);
                    } else {
                        self.levels.push(children);
                        self.phase = Phase::Browsing;
                    }
                }
                _ => debug!("children result arrived outside a loading phase; ignored"),
            },
        }
        self.check_invariants();
        fx
    }

    /// The host completed a [`Effect::ResolveRelated`] request.
    ///
    /// Applies the multi-level sibling set for the bound value: empty levels
    /// are dropped, the set is truncated to the depth limit, and the selected
    /// path is extracted: server markers first, code-scheme fallback second,
    /// and a partial path is acceptable. The result is cached for the next open.
    pub fn apply_related(
        &mut self,
        token: RequestToken,
        result: Result<Vec<Vec<RelatedNode>>, FetchError>,
    ) -> Effects {
        let mut fx = Effects::new();
        if !self.resolve_op.accepts(token) {
            debug!("dropping stale related result");
            return fx;
        }
        self.resolve_op.finish(token);
        match result {
            Err(error) if error.is_cancelled() => {
                if self.phase == Phase::Loading {
                    self.phase = Phase::Browsing;
                }
            }
            Err(error) => {
                warn!(error = %error, "related-levels fetch failed");
                if self.phase == Phase::Loading {
                    self.phase = Phase::Browsing;
                }
                fx.push(Effect::Notify(Notice::LoadFailed));
            }
            Ok(related) => {
                let Some(target) = self.value.clone() else {
                    self.phase = Phase::Browsing;
                    return fx;
                };
                let mut marked: Vec<Vec<RelatedNode>> =
                    related.into_iter().filter(|l| !l.is_empty()).collect();
                let keep = clamp_depth(self.config.max_depth, marked.len());
                marked.truncate(keep);
                let path = extract_path(&marked, &target, &self.config.scheme);
                let mut levels: Vec<Vec<Node>> = marked
                    .into_iter()
                    .map(|l| l.into_iter().map(|r| r.node).collect())
                    .collect();
                // Levels below the last extracted node have no known
                // ancestry; showing them would let a pick fabricate one.
                levels.truncate(path.len() + 1);
                if levels.is_empty() {
                    self.phase = Phase::Browsing;
                    return fx;
                }
                if self.root_level.is_none() {
                    self.root_level = Some(levels[0].clone());
                }
                self.levels = levels;
                self.path = path;
                if !self.path.is_empty() {
                    self.display_text = display_text(&self.path, &self.config.separator);
                    self.cache.put(&target, &self.levels, &self.path);
                }
                debug!(depth = self.path.len(), "related levels applied");
                self.phase = Phase::Browsing;
            }
        }
        self.check_invariants();
        fx
    }

    /// The host completed a [`Effect::FindPath`] request.
    ///
    /// Display-only resolution for a bound value: sets the display text from
    /// the ancestor chain without materializing levels. If the depth limit
    /// shortens the chain to a different code, the adjusted selection is
    /// emitted so the host can update its bound value.
    pub fn apply_find(
        &mut self,
        token: RequestToken,
        result: Result<Vec<Node>, FetchError>,
    ) -> Effects {
        let mut fx = Effects::new();
        if !self.find_op.accepts(token) {
            debug!("dropping stale find result");
            return fx;
        }
        self.find_op.finish(token);
        match result {
            Err(error) if error.is_cancelled() => {}
            Err(error) => {
                warn!(error = %error, "path lookup failed");
                fx.push(Effect::Notify(Notice::LoadFailed));
            }
            Ok(chain) => {
                if self.manual_selection || !self.path.is_empty() || chain.is_empty() {
                    return fx;
                }
                let keep = clamp_depth(self.config.max_depth, chain.len());
                let truncated = &chain[..keep];
                self.display_text = display_text(truncated, &self.config.separator);
                let last = truncated.last().expect("truncated chain is non-empty");
                if self.value.as_deref() != Some(last.code.as_str()) {
                    // The depth limit resolved the bound value to a shallower
                    // node; report the adjustment.
                    self.value = Some(last.code.clone());
                    fx.push(Effect::Emit(Some(Selection {
                        code: last.code.clone(),
                        name: last.name.clone(),
                        display_text: self.display_text.clone(),
                        geo: None,
                    })));
                }
            }
        }
        fx
    }

    // ---------------------------------------------------------------------
    // Views
    // ---------------------------------------------------------------------

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether the selector is open.
    pub fn is_open(&self) -> bool {
        matches!(self.phase, Phase::Loading | Phase::Browsing | Phase::LevelLoading)
    }

    /// The currently bound code, if any.
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Display text for the current selection (possibly from display-only
    /// resolution while levels are not materialized).
    pub fn display_text(&self) -> &str {
        &self.display_text
    }

    /// Materialized sibling lists, root first.
    pub fn levels(&self) -> &[Vec<Node>] {
        &self.levels
    }

    /// The selected chain; `path()[i]` belongs to `levels()[i]`.
    pub fn path(&self) -> &[Node] {
        &self.path
    }

    /// Current raw search input.
    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    /// Whether the search overlay is active (open, search enabled, non-blank
    /// keyword).
    pub fn in_search_mode(&self) -> bool {
        self.is_open()
            && self.config.flags.contains(CascadeFlags::SEARCH)
            && !self.keyword.trim().is_empty()
    }

    /// Latest search candidates, one path per entry.
    pub fn search_results(&self) -> &[Vec<Node>] {
        &self.search_results
    }

    /// Code of the node currently being expanded, for a per-node spinner.
    pub fn loading_code(&self) -> Option<&str> {
        self.loading_code.as_deref()
    }

    /// Whether a geolocation flow is in progress.
    pub fn is_locating(&self) -> bool {
        self.locating
    }

    /// Whether a sibling-level rebuild is in progress.
    pub fn is_rebuilding(&self) -> bool {
        self.rebuild.is_some()
    }

    /// The configuration this selector was created with.
    pub fn config(&self) -> &CascadeConfig {
        &self.config
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn disabled(&self) -> bool {
        self.config.flags.contains(CascadeFlags::DISABLED)
    }

    /// Resolution to run when the selector is (or just became) open.
    fn open_resolution(&mut self, fx: &mut Effects) {
        match self.value.clone() {
            Some(code) => {
                if let Some(entry) = self.cache.get(&code) {
                    debug!(code = %code, "restored levels from cache");
                    self.levels = entry.levels;
                    self.path = entry.path;
                    self.display_text = display_text(&self.path, &self.config.separator);
                    self.phase = Phase::Browsing;
                } else {
                    self.phase = Phase::Loading;
                    let (token, superseded) = self.resolve_op.begin(&mut self.tokens);
                    if let Some(old) = superseded {
                        fx.push(Effect::CancelFetch { token: old });
                    }
                    fx.push(Effect::ResolveRelated { code, token });
                }
            }
            None => {
                if let Some(root) = self.root_level.clone() {
                    self.levels = vec![root];
                    self.path.clear();
                    self.phase = Phase::Browsing;
                } else {
                    self.phase = Phase::Loading;
                    let (token, superseded) = self.level_op.begin(&mut self.tokens);
                    if let Some(old) = superseded {
                        fx.push(Effect::CancelFetch { token: old });
                    }
                    fx.push(Effect::FetchChildren {
                        parent: String::new(),
                        token,
                    });
                }
            }
        }
    }

    /// Display-only resolution for a bound value while closed.
    fn display_resolution(&mut self, fx: &mut Effects) {
        if self.manual_selection || !self.path.is_empty() {
            return;
        }
        let Some(code) = self.value.clone() else {
            return;
        };
        let (token, superseded) = self.find_op.begin(&mut self.tokens);
        if let Some(old) = superseded {
            fx.push(Effect::CancelFetch { token: old });
        }
        debug!(code = %code, "resolving display path for bound value");
        fx.push(Effect::FindPath { code, token });
    }

    /// Invalidate an outstanding initial-value resolution (related levels or
    /// display path) once a user action has made its result moot.
    fn cancel_value_resolution(&mut self, fx: &mut Effects) {
        for token in [self.resolve_op.cancel(), self.find_op.cancel()]
            .into_iter()
            .flatten()
        {
            fx.push(Effect::CancelFetch { token });
        }
        if self.phase == Phase::Loading {
            self.phase = Phase::Browsing;
        }
    }

    /// Invalidate every outstanding resolution operation.
    fn abort_resolution(&mut self, fx: &mut Effects) {
        for token in [
            self.level_op.cancel(),
            self.resolve_op.cancel(),
            self.find_op.cancel(),
            self.search_op.cancel(),
            self.geocode_op.cancel(),
            self.rebuild_op.cancel(),
        ]
        .into_iter()
        .flatten()
        {
            fx.push(Effect::CancelFetch { token });
        }
        self.rebuild = None;
        self.loading_code = None;
        self.locating = false;
        self.pending_position = None;
    }

    /// The convergence point: apply a fully materialized selection.
    ///
    /// Caches the snapshot, updates value/display/levels/path, emits the
    /// selection, and either closes (`Completed`) or stays open (`Browsing`,
    /// used by geolocation).
    fn finalize(
        &mut self,
        path: Vec<Node>,
        levels: Vec<Vec<Node>>,
        geo: Option<GeoPoint>,
        close: bool,
        fx: &mut Effects,
    ) {
        let Some(last) = path.last().cloned() else {
            return;
        };
        let text = display_text(&path, &self.config.separator);
        self.cache.put(&last.code, &levels, &path);
        self.path = path;
        self.levels = levels;
        self.value = Some(last.code.clone());
        self.display_text = text.clone();
        self.manual_selection = true;
        self.keyword.clear();
        self.search_results.clear();
        self.debounce.cancel();
        self.loading_code = None;
        if close {
            self.snapshot = None;
            self.phase = Phase::Completed;
        } else {
            self.phase = Phase::Browsing;
        }
        debug!(code = %last.code, "selection finalized");
        fx.push(Effect::Emit(Some(Selection {
            code: last.code,
            name: last.name,
            display_text: text,
            geo,
        })));
        self.check_invariants();
    }

    /// Finalize a selection whose sibling levels were never materialized
    /// (search shortcut at the depth limit, leaf-terminated search pick).
    ///
    /// Levels and path are cleared rather than half-populated, and nothing is
    /// cached; reopening resolves the value through the related-levels call.
    fn finalize_unmaterialized(
        &mut self,
        path: &[Node],
        geo: Option<GeoPoint>,
        close: bool,
        fx: &mut Effects,
    ) {
        let Some(last) = path.last().cloned() else {
            return;
        };
        let text = display_text(path, &self.config.separator);
        self.path.clear();
        self.levels.clear();
        self.value = Some(last.code.clone());
        self.display_text = text.clone();
        self.manual_selection = true;
        self.keyword.clear();
        self.search_results.clear();
        self.debounce.cancel();
        self.loading_code = None;
        if close {
            self.snapshot = None;
            self.phase = Phase::Completed;
        } else {
            self.phase = Phase::Browsing;
        }
        debug!(code = %last.code, "selection finalized without levels");
        fx.push(Effect::Emit(Some(Selection {
            code: last.code,
            name: last.name,
            display_text: text,
            geo,
        })));
        self.check_invariants();
    }

    fn start_rebuild(&mut self, plan: LevelRebuild, fx: &mut Effects) {
        match plan.next_fetch() {
            Some(parent) => {
                let (token, superseded) = self.rebuild_op.begin(&mut self.tokens);
                if let Some(old) = superseded {
                    fx.push(Effect::CancelFetch { token: old });
                }
                self.rebuild = Some(plan);
                fx.push(Effect::FetchChildren { parent, token });
            }
            None => self.complete_rebuild(plan, fx),
        }
    }

    /// Feed one fetched level into the active rebuild plan.
    fn apply_rebuild_step(&mut self, result: Result<Vec<Node>, FetchError>, fx: &mut Effects) {
        let Some(mut plan) = self.rebuild.take() else {
            return;
        };
        let origin = plan.origin();
        match result {
            Err(error) if error.is_cancelled() => {
                if matches!(origin, RebuildOrigin::Locate(_)) {
                    self.locating = false;
                }
            }
            Err(error) => {
                warn!(error = %error, "sibling-level rebuild failed");
                self.fail_rebuild(origin, fx);
            }
            Ok(level) => match plan.push_level(level) {
                RebuildStep::Fetch(parent) => {
                    let (token, superseded) = self.rebuild_op.begin(&mut self.tokens);
                    if let Some(old) = superseded {
                        fx.push(Effect::CancelFetch { token: old });
                    }
                    self.rebuild = Some(plan);
                    fx.push(Effect::FetchChildren { parent, token });
                }
                RebuildStep::Complete => self.complete_rebuild(plan, fx),
                RebuildStep::Inconsistent => {
                    warn!("rebuilt level inconsistent with candidate path");
                    self.fail_rebuild(origin, fx);
                }
            },
        }
    }

    fn fail_rebuild(&mut self, origin: RebuildOrigin, fx: &mut Effects) {
        let notice = match origin {
            RebuildOrigin::Search => Notice::PickupFailed,
            RebuildOrigin::Locate(_) => {
                self.locating = false;
                Notice::LocateFailed
            }
        };
        fx.push(Effect::Notify(notice));
    }

    /// Apply a completed rebuild according to its origin.
    fn complete_rebuild(&mut self, plan: LevelRebuild, fx: &mut Effects) {
        let (path, levels, origin) = plan.into_parts();
        if self.root_level.is_none() {
            self.root_level = levels.first().cloned();
        }
        match origin {
            RebuildOrigin::Search => {
                let last = path.last().expect("candidate paths are non-empty").clone();
                if last.leaf {
                    self.finalize(path, levels, None, true, fx);
                    return;
                }
                // Picking a non-leaf hands the partial selection to the host
                // and keeps drilling from the picked node.
                let text = display_text(&path, &self.config.separator);
                self.levels = levels;
                self.path = path;
                self.value = Some(last.code.clone());
                self.display_text = text.clone();
                self.keyword.clear();
                self.search_results.clear();
                self.debounce.cancel();
                fx.push(Effect::Emit(Some(Selection {
                    code: last.code.clone(),
                    name: last.name.clone(),
                    display_text: text,
                    geo: None,
                })));
                let depth_allows = self
                    .config
                    .max_depth
                    .is_none_or(|m| self.path.len() < m.get());
                if depth_allows {
                    self.loading_code = Some(last.code.clone());
                    self.phase = Phase::LevelLoading;
                    let (token, superseded) = self.level_op.begin(&mut self.tokens);
                    if let Some(old) = superseded {
                        fx.push(Effect::CancelFetch { token: old });
                    }
                    fx.push(Effect::FetchChildren {
                        parent: last.code,
                        token,
                    });
                } else {
                    self.phase = Phase::Browsing;
                }
            }
            RebuildOrigin::Locate(point) => {
                let keep = clamp_depth(self.config.max_depth, path.len());
                let mut path = path;
                path.truncate(keep);
                let mut levels = levels;
                levels.truncate(keep);
                self.locating = false;
                // Geolocation keeps the selector open so the user can review
                // the resolved location before dismissing it.
                self.finalize(path, levels, Some(point), false, fx);
            }
        }
        self.check_invariants();
    }

    fn check_invariants(&self) {
        #[cfg(debug_assertions)]
        {
            assert!(
                self.path.len() <= self.levels.len(),
                "path may not exceed materialized levels"
            );
            assert!(
                self.levels.len() <= self.path.len() + 1,
                "at most one candidate level below the path may be materialized"
            );
            for (depth, picked) in self.path.iter().enumerate() {
                assert!(
                    self.levels[depth].iter().any(|n| n.code == picked.code),
                    "path node must belong to its level"
                );
            }
        }
    }
}
