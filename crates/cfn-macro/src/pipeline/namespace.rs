//! unique, readable namespaces for pipeline actions
use crate::util::slug;
use indexmap::IndexMap;
use std::collections::HashSet;

/// Memoized `"<stage>:<action>"` -> namespace assignment
///
/// A key always maps to the same namespace and no two keys share one. The namespace is the slug
/// of stage and action name; when that slug is already handed out, the first free `-<n>` suffix
/// (starting at 2) is appended.
#[derive(Debug, Default)]
pub struct NamespaceTable {
    assigned: IndexMap<String, String>,
    taken: HashSet<String>,
}

impl NamespaceTable {
    pub fn resolve(&mut self, key: &str) -> String {
        if let Some(namespace) = self.assigned.get(key) {
            return namespace.clone();
        }

        let base = derive(key);
        let mut namespace = base.clone();
        let mut suffix = 2;
        while self.taken.contains(&namespace) {
            namespace = format!("{base}-{suffix}");
            suffix += 1;
        }

        tracing::debug!(%key, %namespace, "namespace assigned");
        self.taken.insert(namespace.clone());
        self.assigned.insert(key.to_string(), namespace.clone());
        namespace
    }

    /// Namespace previously assigned to `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.assigned.get(key).map(String::as_str)
    }

    pub fn is_taken(&self, namespace: &str) -> bool {
        self.taken.contains(namespace)
    }

    /// Keep `namespace` from being handed out without assigning it to a key
    ///
    /// False when it is taken already.
    pub fn reserve(&mut self, namespace: &str) -> bool {
        if !self.taken.insert(namespace.to_string()) {
            return false;
        }
        tracing::debug!(%namespace, "namespace reserved");
        true
    }

    /// Assign an author-chosen namespace
    ///
    /// Fails (returns false) when `namespace` already belongs to a different key or `key` already
    /// has a different namespace.
    pub fn pin(&mut self, key: &str, namespace: &str) -> bool {
        if let Some(existing) = self.assigned.get(key) {
            return existing == namespace;
        }
        if self.taken.contains(namespace) {
            return false;
        }

        tracing::debug!(%key, %namespace, "namespace pinned");
        self.taken.insert(namespace.to_string());
        self.assigned.insert(key.to_string(), namespace.to_string());
        true
    }
}

fn derive(key: &str) -> String {
    let (stage, action) = key.split_once(':').unwrap_or((key, ""));
    let parts: Vec<String> = [slug(stage), slug(action)]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect();

    if parts.is_empty() {
        "action".to_string()
    } else {
        parts.join("-")
    }
}
