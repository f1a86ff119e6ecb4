//! Document sources: the trait the indexer reads from, a filesystem
//! implementation, and an in-memory implementation for tests.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::UNIX_EPOCH;

use crate::error::{IndexError, Result};

/// Metadata for one corpus document. `path` is relative to the corpus root
/// and uses `/` separators on every platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentMeta {
    pub path: String,
    /// Modification time, epoch seconds.
    pub mtime: i64,
}

/// Read-only view of the document corpus.
pub trait Corpus: Send + Sync {
    /// Enumerate every document with its modification time.
    ///
    /// # Errors
    ///
    /// Returns an error if the corpus cannot be enumerated.
    fn list(&self) -> impl Future<Output = Result<Vec<DocumentMeta>>> + Send;

    /// Read one document's raw text.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be read.
    fn read(&self, path: &str) -> impl Future<Output = Result<String>> + Send;

    /// Paths of documents carrying `tag`, either in front matter or as an
    /// inline `#tag`.
    ///
    /// # Errors
    ///
    /// Returns an error if tag metadata cannot be read.
    fn paths_with_tag(&self, tag: &str) -> impl Future<Output = Result<Vec<String>>> + Send;
}

/// Filesystem corpus rooted at a directory. Hidden files and gitignored
/// paths are skipped; only the configured extensions are listed.
#[derive(Debug, Clone)]
pub struct FsCorpus {
    root: PathBuf,
    extensions: Vec<String>,
}

impl FsCorpus {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extensions: vec!["md".to_owned(), "txt".to_owned()],
        }
    }

    #[must_use]
    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    fn keeps(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
    }

    fn relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        rel.to_string_lossy().replace('\\', "/")
    }

    fn walk(&self) -> Result<Vec<DocumentMeta>> {
        let mut docs = Vec::new();
        for entry in ignore::WalkBuilder::new(&self.root)
            .hidden(true)
            .git_ignore(true)
            .build()
            .flatten()
        {
            if !entry.file_type().is_some_and(|ft| ft.is_file()) || !self.keeps(entry.path()) {
                continue;
            }
            let path = self.relative(entry.path());
            let metadata = entry
                .metadata()
                .map_err(|e| IndexError::Other(format!("metadata for {path}: {e}")))?;
            let mtime = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .and_then(|d| i64::try_from(d.as_secs()).ok())
                .unwrap_or(0);
            docs.push(DocumentMeta { path, mtime });
        }
        docs.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(docs)
    }
}

impl Corpus for FsCorpus {
    async fn list(&self) -> Result<Vec<DocumentMeta>> {
        self.walk()
    }

    async fn read(&self, path: &str) -> Result<String> {
        Ok(tokio::fs::read_to_string(self.root.join(path)).await?)
    }

    async fn paths_with_tag(&self, tag: &str) -> Result<Vec<String>> {
        let tag = tag.trim_start_matches('#');
        let mut paths = Vec::new();
        for doc in self.walk()? {
            let content = tokio::fs::read_to_string(self.root.join(&doc.path)).await?;
            if extract_tags(&content).contains(tag) {
                paths.push(doc.path);
            }
        }
        Ok(paths)
    }
}

/// Tags from YAML front matter (`tags:` inline list, flow list, or a single
/// value) plus inline `#tag` markers.
fn extract_tags(content: &str) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    if let Some(rest) = content.strip_prefix("---\n")
        && let Some(end) = rest.find("\n---")
    {
        collect_front_matter_tags(&rest[..end], &mut tags);
    }
    collect_inline_tags(content, &mut tags);
    tags
}

fn collect_front_matter_tags(block: &str, tags: &mut BTreeSet<String>) {
    let mut lines = block.lines().peekable();
    while let Some(line) = lines.next() {
        let Some(value) = line.strip_prefix("tags:") else {
            continue;
        };
        let value = value.trim();
        if let Some(inner) = value.strip_prefix('[').and_then(|v| v.strip_suffix(']')) {
            for tag in inner.split(',') {
                insert_tag(tag, tags);
            }
        } else if value.is_empty() {
            while let Some(next) = lines.peek() {
                let Some(item) = next.trim().strip_prefix("- ") else {
                    break;
                };
                insert_tag(item, tags);
                lines.next();
            }
        } else {
            insert_tag(value, tags);
        }
        break;
    }
}

fn insert_tag(raw: &str, tags: &mut BTreeSet<String>) {
    let tag = raw.trim().trim_matches('"').trim_matches('\'').trim_start_matches('#');
    if !tag.is_empty() {
        tags.insert(tag.to_owned());
    }
}

fn collect_inline_tags(content: &str, tags: &mut BTreeSet<String>) {
    let mut prev: Option<char> = None;
    for (i, c) in content.char_indices() {
        if c == '#' && prev.is_none_or(char::is_whitespace) {
            let rest = &content[i + 1..];
            let end = rest
                .find(|ch: char| !(ch.is_alphanumeric() || ch == '-' || ch == '_' || ch == '/'))
                .unwrap_or(rest.len());
            if end > 0 {
                tags.insert(rest[..end].to_owned());
            }
        }
        prev = Some(c);
    }
}

/// In-memory corpus for tests and ephemeral pipelines. Mutable through
/// shared references so tests can edit documents between reindex runs.
#[derive(Debug, Default)]
pub struct MemoryCorpus {
    docs: RwLock<BTreeMap<String, MemoryDoc>>,
}

#[derive(Debug, Clone)]
struct MemoryDoc {
    mtime: i64,
    content: String,
    tags: Vec<String>,
    readable: bool,
}

impl MemoryCorpus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, path: &str, mtime: i64, content: &str) {
        self.put_tagged(path, mtime, content, &[]);
    }

    pub fn put_tagged(&self, path: &str, mtime: i64, content: &str, tags: &[&str]) {
        self.docs.write().expect("corpus lock poisoned").insert(
            path.to_owned(),
            MemoryDoc {
                mtime,
                content: content.to_owned(),
                tags: tags.iter().map(|t| (*t).to_owned()).collect(),
                readable: true,
            },
        );
    }

    pub fn remove(&self, path: &str) {
        self.docs.write().expect("corpus lock poisoned").remove(path);
    }

    /// Keep the document listed but make `read` fail for it.
    pub fn poison(&self, path: &str) {
        if let Some(doc) = self.docs.write().expect("corpus lock poisoned").get_mut(path) {
            doc.readable = false;
        }
    }

    fn lock_read(&self) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<String, MemoryDoc>>> {
        self.docs
            .read()
            .map_err(|e| IndexError::Other(format!("corpus lock poisoned: {e}")))
    }
}

impl Corpus for MemoryCorpus {
    async fn list(&self) -> Result<Vec<DocumentMeta>> {
        Ok(self
            .lock_read()?
            .iter()
            .map(|(path, doc)| DocumentMeta {
                path: path.clone(),
                mtime: doc.mtime,
            })
            .collect())
    }

    async fn read(&self, path: &str) -> Result<String> {
        let docs = self.lock_read()?;
        match docs.get(path) {
            Some(doc) if doc.readable => Ok(doc.content.clone()),
            Some(_) => Err(IndexError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                path.to_owned(),
            ))),
            None => Err(IndexError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                path.to_owned(),
            ))),
        }
    }

    async fn paths_with_tag(&self, tag: &str) -> Result<Vec<String>> {
        let tag = tag.trim_start_matches('#');
        Ok(self
            .lock_read()?
            .iter()
            .filter(|(_, doc)| doc.tags.iter().any(|t| t == tag))
            .map(|(path, _)| path.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[tokio::test]
    async fn fs_corpus_lists_matching_extensions() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.md"), "alpha").unwrap();
        fs::write(dir.path().join("b.txt"), "beta").unwrap();
        fs::write(dir.path().join("c.png"), [0u8; 4]).unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/d.md"), "delta").unwrap();

        let corpus = FsCorpus::new(dir.path());
        let docs = corpus.list().await.unwrap();
        let paths: Vec<&str> = docs.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["a.md", "b.txt", "sub/d.md"]);
        assert!(docs.iter().all(|d| d.mtime > 0));
    }

    #[tokio::test]
    async fn fs_corpus_skips_hidden_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".hidden.md"), "secret").unwrap();
        fs::write(dir.path().join("seen.md"), "visible").unwrap();

        let corpus = FsCorpus::new(dir.path());
        let docs = corpus.list().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].path, "seen.md");
    }

    #[tokio::test]
    async fn fs_corpus_reads_documents() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("note.md"), "content here").unwrap();

        let corpus = FsCorpus::new(dir.path());
        assert_eq!(corpus.read("note.md").await.unwrap(), "content here");
        assert!(corpus.read("missing.md").await.is_err());
    }

    #[tokio::test]
    async fn fs_corpus_custom_extensions() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.rst"), "alpha").unwrap();
        fs::write(dir.path().join("b.md"), "beta").unwrap();

        let corpus = FsCorpus::new(dir.path()).with_extensions(vec!["rst".into()]);
        let docs = corpus.list().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].path, "a.rst");
    }

    #[tokio::test]
    async fn fs_corpus_finds_tagged_documents() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("front.md"),
            "---\ntags: [project, draft]\n---\nbody",
        )
        .unwrap();
        fs::write(dir.path().join("inline.md"), "notes on #project work").unwrap();
        fs::write(dir.path().join("plain.md"), "nothing tagged").unwrap();

        let corpus = FsCorpus::new(dir.path());
        let paths = corpus.paths_with_tag("project").await.unwrap();
        assert_eq!(paths, vec!["front.md", "inline.md"]);

        let paths = corpus.paths_with_tag("#draft").await.unwrap();
        assert_eq!(paths, vec!["front.md"]);
    }

    #[test]
    fn front_matter_flow_list_tags() {
        let tags = extract_tags("---\ntags: [alpha, \"beta\", #gamma]\n---\n");
        assert!(tags.contains("alpha"));
        assert!(tags.contains("beta"));
        assert!(tags.contains("gamma"));
    }

    #[test]
    fn front_matter_block_list_tags() {
        let tags = extract_tags("---\ntitle: x\ntags:\n  - alpha\n  - beta\n---\nbody");
        assert!(tags.contains("alpha"));
        assert!(tags.contains("beta"));
    }

    #[test]
    fn front_matter_single_value_tag() {
        let tags = extract_tags("---\ntags: solo\n---\n");
        assert!(tags.contains("solo"));
    }

    #[test]
    fn inline_tags_require_word_boundary() {
        let tags = extract_tags("see #alpha and code#beta plus #gamma-1");
        assert!(tags.contains("alpha"));
        assert!(!tags.contains("beta"));
        assert!(tags.contains("gamma-1"));
    }

    #[test]
    fn headings_are_not_tags() {
        let tags = extract_tags("# Title\n\n## Section\n\nbody #real\n");
        assert_eq!(tags.len(), 1);
        assert!(tags.contains("real"));
    }

    #[tokio::test]
    async fn memory_corpus_round_trip() {
        let corpus = MemoryCorpus::new();
        corpus.put("a.md", 100, "alpha");
        corpus.put_tagged("b.md", 200, "beta", &["work"]);

        let docs = corpus.list().await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(corpus.read("a.md").await.unwrap(), "alpha");
        assert_eq!(corpus.paths_with_tag("work").await.unwrap(), vec!["b.md"]);

        corpus.remove("a.md");
        assert!(corpus.read("a.md").await.is_err());
    }

    #[tokio::test]
    async fn memory_corpus_poisoned_reads_fail() {
        let corpus = MemoryCorpus::new();
        corpus.put("a.md", 100, "alpha");
        corpus.poison("a.md");

        assert_eq!(corpus.list().await.unwrap().len(), 1);
        assert!(corpus.read("a.md").await.is_err());
    }
}
