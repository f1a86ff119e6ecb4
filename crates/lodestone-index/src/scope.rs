//! Scope restriction: exact files, folder prefixes, and tag expansion.

use std::collections::BTreeSet;

use crate::corpus::Corpus;
use crate::error::Result;

/// Caller-facing scope description before resolution. Tags are expanded
/// against corpus metadata at resolve time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeSpec {
    pub files: Vec<String>,
    pub folders: Vec<String>,
    pub tags: Vec<String>,
}

impl ScopeSpec {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.folders.is_empty() && self.tags.is_empty()
    }
}

/// A resolved scope: exact paths plus folder prefixes. An empty set means
/// "no restriction".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeSet {
    files: BTreeSet<String>,
    /// Normalized to end with `/`. The corpus root is the empty string and
    /// matches every path.
    folders: BTreeSet<String>,
}

impl ScopeSet {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.folders.is_empty()
    }

    /// True when `path` is inside the scope. An empty scope matches every
    /// path.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        if self.is_empty() {
            return true;
        }
        self.files.contains(path) || self.folders.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }

    pub fn insert_file(&mut self, path: impl Into<String>) {
        self.files.insert(path.into());
    }

    /// Folder prefixes match on `/` boundaries: scoping to `notes` covers
    /// `notes/a.md` but not `notes-old/a.md`.
    pub fn insert_folder(&mut self, folder: &str) {
        let trimmed = folder.trim_matches('/');
        if trimmed.is_empty() {
            self.folders.insert(String::new());
        } else {
            self.folders.insert(format!("{trimmed}/"));
        }
    }

    pub fn exact_files(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(String::as_str)
    }

    pub fn folder_prefixes(&self) -> impl Iterator<Item = &str> {
        self.folders.iter().map(String::as_str)
    }
}

/// Resolve `spec` against current corpus metadata. Tag membership is looked
/// up fresh on every call; nothing is cached between reindex runs.
///
/// # Errors
///
/// Returns an error if tag lookup fails.
pub async fn resolve_scope<C: Corpus>(corpus: &C, spec: &ScopeSpec) -> Result<ScopeSet> {
    let mut set = ScopeSet::default();
    for file in &spec.files {
        set.insert_file(file.clone());
    }
    for folder in &spec.folders {
        set.insert_folder(folder);
    }
    for tag in &spec.tags {
        for path in corpus.paths_with_tag(tag).await? {
            set.insert_file(path);
        }
    }
    Ok(set)
}
