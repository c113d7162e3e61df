// Copyright 2025 the Terrace Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Manual drill-down against a scripted in-memory backend.
//!
//! Demonstrates the sans-io host protocol: execute the returned effects,
//! report fetch completions back with their tokens, and forward emitted
//! selections to wherever they need to go.

use std::collections::HashMap;

use terrace_cascade::{
    CascadeConfig, CascadeState, Effect, Effects, FetchError, Node,
};

/// A fake hierarchy service: parent code → children.
struct ScriptedBackend {
    children: HashMap<&'static str, Vec<Node>>,
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
        children.insert(
            "31",
            vec![
                Node::new("310104", "Xuhui", true),
                Node::new("310110", "Yangpu", true),
            ],
        );
        Self { children }
    }

    fn list_children(&self, parent: &str) -> Result<Vec<Node>, FetchError> {
        self.children
            .get(parent)
            .cloned()
            .ok_or_else(|| FetchError::failed("unknown parent code"))
    }
}

/// Drain an effect sequence, synchronously "performing" every fetch.
fn pump(selector: &mut CascadeState, backend: &ScriptedBackend, effects: Effects) {
    let mut queue: Vec<Effect> = effects.into_vec();
    while !queue.is_empty() {
        for effect in std::mem::take(&mut queue) {
            match effect {
                Effect::FetchChildren { parent, token } => {
                    let result = backend.list_children(&parent);
                    queue.extend(selector.apply_children(token, result));
                }
                Effect::Emit(Some(selection)) => {
                    println!("-> selected {} ({})", selection.display_text, selection.code);
                }
                Effect::Emit(None) => println!("-> selection cleared"),
                Effect::Notify(notice) => println!("-> notice: {notice}"),
                Effect::CancelFetch { token } => {
                    tracing::debug!(?token, "transport abort requested");
                }
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

    println!("opening selector");
    let fx = selector.open();
    pump(&mut selector, &backend, fx);
    println!(
        "root level: {:?}",
        selector.levels()[0]
            .iter()
            .map(|n| n.name.as_str())
            .collect::<Vec<_>>()
    );

    println!("clicking Beijing");
    let fx = selector.click(0, "11", 1_000);
    pump(&mut selector, &backend, fx);

    println!("clicking Haidian (leaf)");
    let fx = selector.click(1, "110108", 2_000);
    pump(&mut selector, &backend, fx);
    assert!(!selector.is_open());

    println!("reopening: levels restore from the snapshot cache, no fetch");
    let fx = selector.open();
    assert!(fx.is_empty());
    println!("display: {}", selector.display_text());

    println!("browsing to Shanghai, then closing without finalizing");
    let fx = selector.click(0, "31", 3_000);
    pump(&mut selector, &backend, fx);
    let fx = selector.close();
    pump(&mut selector, &backend, fx);
    println!("display after revert: {}", selector.display_text());
}
