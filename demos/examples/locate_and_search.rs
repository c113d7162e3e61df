// Copyright 2025 the Terrace Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Search and geolocation shortcuts against a scripted backend.
//!
//! Shows the two jump-ahead pipelines: debounced free-text search (the host
//! drives the timer via `poll_debounce`) and a device position that is
//! reverse-geocoded, rebuilt into sibling levels, and finalized while the
//! selector stays open.

use std::collections::HashMap;

use terrace_cascade::{
    CascadeConfig, CascadeState, Effect, Effects, FetchError, GeoPoint, Node, RelatedNode,
};

struct ScriptedBackend {
    children: HashMap<&'static str, Vec<Node>>,
    searches: HashMap<&'static str, Vec<Vec<Node>>>,
    geocode: Vec<Node>,
}

impl ScriptedBackend {
    fn new() -> Self {
        let mut children = HashMap::new();
        children.insert(
            "",
            vec![
                Node::new("11", "Beijing", false),
                Node::new("31", "Shanghai", false),
            ],
        );
        children.insert(
            "11",
            vec![
                Node::new("110108", "Haidian", true),
                Node::new("110105", "Chaoyang", true),
            ],
        );

        let mut searches = HashMap::new();
        searches.insert(
            "Haidian",
            vec![vec![
                Node::new("11", "Beijing", false),
                Node::new("110108", "Haidian", true),
            ]],
        );

        let geocode = vec![
            Node::new("11", "Beijing", false),
            Node::new("110105", "Chaoyang", true),
        ];

        Self {
            children,
            searches,
            geocode,
        }
    }

    fn list_children(&self, parent: &str) -> Result<Vec<Node>, FetchError> {
        self.children
            .get(parent)
            .cloned()
            .ok_or_else(|| FetchError::failed("unknown parent code"))
    }

    /// Sibling lists for every level on the path to `code`, with markers.
    fn related(&self, code: &str) -> Vec<Vec<RelatedNode>> {
        let mut levels = Vec::new();
        let mut parent = String::new();
        while let Some(level) = self.children.get(parent.as_str()) {
            let on_path = level.iter().find(|n| code.starts_with(n.code.as_str()));
            levels.push(
                level
                    .iter()
                    .map(|n| {
                        let selected = on_path.is_some_and(|p| p.code == n.code);
                        RelatedNode::new(n.clone(), selected)
                    })
                    .collect(),
            );
            match on_path {
                Some(next) if next.code != parent => parent = next.code.clone(),
                _ => break,
            }
        }
        levels
    }
}

fn pump(selector: &mut CascadeState, backend: &ScriptedBackend, effects: Effects) {
    let mut queue: Vec<Effect> = effects.into_vec();
    while !queue.is_empty() {
        for effect in std::mem::take(&mut queue) {
            match effect {
                Effect::FetchChildren { parent, token } => {
                    let result = backend.list_children(&parent);
                    queue.extend(selector.apply_children(token, result));
                }
                Effect::ResolveRelated { code, token } => {
                    let result = backend.related(&code);
                    queue.extend(selector.apply_related(token, Ok(result)));
                }
                Effect::Search { keyword, token } => {
                    let result = backend
                        .searches
                        .get(keyword.as_str())
                        .cloned()
                        .unwrap_or_default();
                    queue.extend(selector.apply_search(token, Ok(result)));
                }
                Effect::StartTimer { deadline } => {
                    // A real host arms a timer; the demo just lets it fire.
                    queue.extend(selector.poll_debounce(deadline));
                }
                Effect::RequestPosition { timeout_ms, .. } => {
                    tracing::debug!(timeout_ms, "pretending to read the GPS");
                    queue.extend(selector.position_resolved(GeoPoint {
                        latitude: 39.93,
                        longitude: 116.44,
                    }));
                }
                Effect::ReverseGeocode { token, .. } => {
                    queue.extend(selector.apply_geocode(token, Ok(backend.geocode.clone())));
                }
                Effect::Emit(Some(selection)) => {
                    match selection.geo {
                        Some(geo) => println!(
                            "-> selected {} ({}) at {:.2},{:.2}",
                            selection.display_text, selection.code, geo.latitude, geo.longitude
                        ),
                        None => println!(
                            "-> selected {} ({})",
                            selection.display_text, selection.code
                        ),
                    }
                }
                Effect::Emit(None) => println!("-> selection cleared"),
                Effect::Notify(notice) => println!("-> notice: {notice}"),
                other => tracing::debug!(?other, "effect not used by this demo"),
            }
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let backend = ScriptedBackend::new();
    let mut selector = CascadeState::new(CascadeConfig::default());

    let fx = selector.open();
    pump(&mut selector, &backend, fx);

    println!("typing 'Haidian' and letting the debounce settle");
    let fx = selector.search_input("Haidian", 1_000);
    pump(&mut selector, &backend, fx);
    println!("{} search result(s)", selector.search_results().len());

    println!("picking the leaf candidate: finalizes with no child fetches");
    let fx = selector.pick_search_result(0);
    pump(&mut selector, &backend, fx);
    assert!(!selector.is_open());

    println!("reopening and locating instead");
    let fx = selector.open();
    pump(&mut selector, &backend, fx);
    let fx = selector.locate();
    pump(&mut selector, &backend, fx);

    // Geolocation keeps the selector open for review.
    assert!(selector.is_open());
    println!("still open, showing: {}", selector.display_text());
    selector.close();
    println!("closed, kept: {}", selector.display_text());
}
