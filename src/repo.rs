//! The cartridge repository: reference resolution and a search index.
//!
//! The index is a collaborator of the core, not part of it: it maintains a
//! list of relative paths under the repository directory, refreshed by a
//! background watcher thread, and answers plain term queries against them.
//! Directory changes are batched: the searchable view is flushed once a
//! hundred changes have accumulated, or after five seconds of quiet.
//! References resolve either to a file inside the repository or to an
//! `http(s)://` location.
use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use parking_lot::RwLock;
use serde::Serialize;

/// Characters replaced with blanks before matching, so that terms hit
/// decorated file names.
const REPLACE_CHARS: &str = "`~!@#$%^&*_-+=()[]{}|;:',.<>?";

/// Accumulated index changes that force a flush.
const FLUSH_OPS: usize = 100;
/// Quiet time after the last change that forces a flush.
const IDLE_FLUSH: Duration = Duration::from_secs(5);
/// How often the watcher samples the repository directory.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A search reply.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub hits: Vec<String>,
    pub total: usize,
    pub complete: bool,
}

/// Full text index over the repository directory.
pub struct RepoIndex {
    repo: PathBuf,
    entries: RwLock<Vec<String>>,
    stopped: Arc<AtomicBool>,
}

impl RepoIndex {
    pub fn new(repo: impl Into<PathBuf>) -> Arc<RepoIndex> {
        Arc::new(RepoIndex {
            repo: repo.into(),
            entries: RwLock::new(Vec::new()),
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Builds the initial index and starts the watcher thread.
    pub fn start(self: &Arc<Self>) {
        self.rescan();
        info!(
            "repo index ready: {} entries under {}",
            self.entries.read().len(),
            self.repo.display()
        );
        let index = Arc::clone(self);
        std::thread::spawn(move || {
            let mut batch = Batch::new(index.entries.read().clone());
            loop {
                std::thread::sleep(POLL_INTERVAL);
                if index.stopped.load(Ordering::Relaxed) {
                    return;
                }
                index.watch_tick(&mut batch);
            }
        });
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    /// Scans and publishes immediately, bypassing the batch rules. Used
    /// for the initial index build.
    fn rescan(&self) {
        let mut found = Vec::new();
        walk(&self.repo, &self.repo, &mut found);
        found.sort();

        let mut entries = self.entries.write();
        if *entries != found {
            debug!(
                "repo index refresh: {} -> {} entries",
                entries.len(),
                found.len()
            );
            *entries = found;
        }
    }

    // one watcher tick: stage directory changes and flush the searchable
    // view once enough have accumulated or the directory has gone quiet
    fn watch_tick(&self, batch: &mut Batch) {
        let mut found = Vec::new();
        walk(&self.repo, &self.repo, &mut found);
        found.sort();

        let ops = count_ops(&batch.staged, &found);
        if ops > 0 {
            debug!("repo index: {} pending change(s)", batch.pending + ops);
            batch.pending += ops;
            batch.staged = found;
            batch.last_change = Instant::now();
        }

        if flush_due(batch.pending, batch.last_change.elapsed()) {
            debug!("flushing {} pending index action(s)", batch.pending);
            *self.entries.write() = batch.staged.clone();
            batch.pending = 0;
        }
    }

    /// Case insensitive term search over the indexed paths. `complete`
    /// reports whether the hit list was not truncated by `max`.
    pub fn search(&self, term: &str, max: usize) -> io::Result<SearchResult> {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "no search term"));
        }
        let words: Vec<&str> = term.split_whitespace().collect();

        let entries = self.entries.read();
        let mut hits = Vec::new();
        let mut total = 0;
        for path in entries.iter() {
            let haystack = clean(path);
            if words.iter().all(|w| haystack.contains(w)) {
                total += 1;
                if hits.len() < max {
                    hits.push(path.clone());
                }
            }
        }
        Ok(SearchResult {
            complete: hits.len() == total,
            hits,
            total,
        })
    }
}

/// Staged changes of the watcher between flushes.
struct Batch {
    staged: Vec<String>,
    pending: usize,
    last_change: Instant,
}

impl Batch {
    fn new(staged: Vec<String>) -> Batch {
        Batch {
            staged,
            pending: 0,
            last_change: Instant::now(),
        }
    }
}

/// Number of additions and removals between two sorted listings.
fn count_ops(old: &[String], new: &[String]) -> usize {
    let mut ops = 0;
    let mut o = old.iter().peekable();
    let mut n = new.iter().peekable();
    loop {
        match (o.peek(), n.peek()) {
            (Some(a), Some(b)) => {
                if a == b {
                    o.next();
                    n.next();
                } else {
                    ops += 1;
                    if a < b {
                        o.next();
                    } else {
                        n.next();
                    }
                }
            }
            (Some(_), None) => {
                ops += 1;
                o.next();
            }
            (None, Some(_)) => {
                ops += 1;
                n.next();
            }
            (None, None) => return ops,
        }
    }
}

fn flush_due(pending: usize, idle: Duration) -> bool {
    pending > 0 && (pending >= FLUSH_OPS || idle >= IDLE_FLUSH)
}

fn walk(root: &Path, dir: &Path, found: &mut Vec<String>) {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            warn!("cannot read {}: {}", dir.display(), e);
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk(root, &path, found);
        } else if let Ok(rel) = path.strip_prefix(root) {
            found.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
}

fn clean(path: &str) -> String {
    path.to_lowercase()
        .chars()
        .map(|c| if REPLACE_CHARS.contains(c) || c == '/' { ' ' } else { c })
        .collect()
}

/// Resolves a cartridge reference to a readable byte stream: a path inside
/// the repository, or an `http(s)://` location.
pub fn resolve(reference: &str, repo: Option<&Path>) -> io::Result<Box<dyn Read>> {
    if reference.starts_with("http://") || reference.starts_with("https://") {
        let response = ureq::get(reference)
            .call()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        return Ok(Box::new(response.into_reader()));
    }

    let repo = repo.ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "no repository configured")
    })?;

    // keep references inside the repository
    let rel = Path::new(reference);
    if rel.is_absolute()
        || rel
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
    {
        return Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            format!("invalid reference: {}", reference),
        ));
    }

    let path = repo.join(rel);
    Ok(Box::new(fs::File::open(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    fn repo_fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("games")).unwrap();
        fs::create_dir_all(dir.path().join("docs")).unwrap();
        File::create(dir.path().join("games/elite.mdr")).unwrap();
        File::create(dir.path().join("games/chuckie.mdr.gz")).unwrap();
        File::create(dir.path().join("docs/readme.txt")).unwrap();
        dir
    }

    #[test]
    fn search_finds_by_term() {
        let dir = repo_fixture();
        let index = RepoIndex::new(dir.path());
        index.rescan();

        let res = index.search("elite", 10).unwrap();
        assert_eq!(res.hits, vec!["games/elite.mdr".to_string()]);
        assert_eq!(res.total, 1);
        assert!(res.complete);

        let res = index.search("games", 1).unwrap();
        assert_eq!(res.total, 2);
        assert_eq!(res.hits.len(), 1);
        assert!(!res.complete);

        let res = index.search("nothing-like-this", 10).unwrap();
        assert_eq!(res.total, 0);
        assert!(res.complete);

        assert!(index.search("  ", 10).is_err());
    }

    #[test]
    fn search_is_case_insensitive() {
        let dir = repo_fixture();
        let index = RepoIndex::new(dir.path());
        index.rescan();
        let res = index.search("ELITE", 10).unwrap();
        assert_eq!(res.total, 1);
    }

    #[test]
    fn counts_listing_changes() {
        let old: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let same = old.clone();
        assert_eq!(count_ops(&old, &same), 0);
        let new: Vec<String> = ["a", "c", "d"].iter().map(|s| s.to_string()).collect();
        assert_eq!(count_ops(&old, &new), 2); // b removed, d added
        assert_eq!(count_ops(&[], &new), 3);
        assert_eq!(count_ops(&old, &[]), 3);
    }

    #[test]
    fn flush_rules() {
        // nothing pending, nothing to flush
        assert!(!flush_due(0, Duration::from_secs(60)));
        // below the op limit, flush only once the directory goes quiet
        assert!(!flush_due(1, Duration::from_secs(1)));
        assert!(flush_due(1, IDLE_FLUSH));
        // the op limit flushes immediately
        assert!(flush_due(FLUSH_OPS, Duration::from_millis(0)));
    }

    #[test]
    fn watcher_stages_and_flushes() {
        let dir = repo_fixture();
        let index = RepoIndex::new(dir.path());
        index.rescan();
        let mut batch = Batch::new(index.entries.read().clone());

        File::create(dir.path().join("games/jetpac.mdr")).unwrap();
        index.watch_tick(&mut batch);
        assert_eq!(batch.pending, 1);
        // staged but not yet visible to search
        assert_eq!(index.search("jetpac", 10).unwrap().total, 0);

        // pretend the directory has been quiet long enough
        batch.last_change = Instant::now() - IDLE_FLUSH;
        index.watch_tick(&mut batch);
        assert_eq!(batch.pending, 0);
        assert_eq!(index.search("jetpac", 10).unwrap().total, 1);
    }

    #[test]
    fn resolve_reads_repo_files() {
        let dir = repo_fixture();
        let mut f = File::create(dir.path().join("games/data.mdr")).unwrap();
        f.write_all(b"cartridge bytes").unwrap();

        let mut rd = resolve("games/data.mdr", Some(dir.path())).unwrap();
        let mut out = Vec::new();
        rd.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"cartridge bytes");
    }

    #[test]
    fn resolve_rejects_escapes() {
        let dir = repo_fixture();
        assert!(resolve("../secret", Some(dir.path())).is_err());
        assert!(resolve("/etc/passwd", Some(dir.path())).is_err());
        assert!(resolve("games/elite.mdr", None).is_err());
    }
}
