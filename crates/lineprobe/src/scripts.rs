//! Loaded-script registry and partial-path resolution.

use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::debug;

use crate::protocol::{ScriptId, ScriptParsed};

const FILE_SCHEME: &str = "file:";

/// Script matched by a partial path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptMatch {
    pub url: String,
    pub script_id: ScriptId,
}

/// Scripts announced by the host runtime.
///
/// Only `file:` urls are candidates for resolution; `node:`, `wasm:` and
/// anonymous scripts can never be instrumented. Every script id is still
/// remembered so stack frames lacking a url can be named.
#[derive(Debug, Default)]
pub struct ScriptRegistry {
    by_url: IndexMap<String, ScriptId>,
    urls: HashMap<ScriptId, String>,
}

impl ScriptRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a `scriptParsed` notification.
    pub fn register(&mut self, script: ScriptParsed) {
        if script.url.starts_with(FILE_SCHEME) {
            // Re-parse of a known url keeps its original position.
            self.by_url.insert(script.url.clone(), script.script_id.clone());
        }
        self.urls.insert(script.script_id, script.url);
    }

    /// Find the shortest file url ending in `path`.
    ///
    /// Ties keep the first-registered url. A shorter unrelated url that happens
    /// to share the suffix wins over a deeper intended one, so callers should
    /// pass the most specific path they know.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<ScriptMatch> {
        if path.is_empty() {
            return None;
        }
        let mut best: Option<(&String, &ScriptId)> = None;
        let mut candidates = 0usize;
        for (url, script_id) in &self.by_url {
            if !url.ends_with(path) {
                continue;
            }
            candidates += 1;
            if best.map_or(true, |(current, _)| url.len() < current.len()) {
                best = Some((url, script_id));
            }
        }
        if candidates > 1 {
            debug!(path, candidates, "partial path matches several scripts");
        }
        best.map(|(url, script_id)| ScriptMatch {
            url: url.clone(),
            script_id: script_id.clone(),
        })
    }

    #[must_use]
    pub fn url_for(&self, script_id: &str) -> Option<&str> {
        self.urls.get(script_id).map(String::as_str)
    }

    /// Number of instrumentable scripts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_url.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_url.is_empty()
    }
}
