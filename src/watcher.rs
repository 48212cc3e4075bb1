//! Filesystem watcher (§4.11): OS notifications via `notify`, paired with a
//! polling fallback that stats the tracked file set on a fixed interval, both
//! feeding into a shared [`Debouncer`]. Coalesced, filtered events are
//! delivered to the coordinator as [`FileEvent`]s.

use crate::config::WatcherConfig;
use crate::debounce::{Debouncer, RawKind};
use glob::Pattern;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    Create(PathBuf),
    Modify(PathBuf),
    Delete(PathBuf),
    GitignoreChanged,
    ConfigChanged,
}

/// Drops paths matching an active `.gitignore`, a secret-like glob, or a
/// known vendored directory name. Constructed fresh whenever the gitignore
/// set changes.
pub struct EventFilter {
    gitignore: Gitignore,
    secret_globs: Vec<Pattern>,
    vendored_dirs: Vec<String>,
}

impl EventFilter {
    pub fn build(root: &Path, cfg: &WatcherConfig) -> Self {
        let mut builder = GitignoreBuilder::new(root);
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let candidate = dir.join(".gitignore");
            if candidate.is_file() {
                builder.add(&candidate);
            }
            if let Ok(entries) = std::fs::read_dir(&dir) {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.is_dir() && !cfg.vendored_dirs.iter().any(|v| path.file_name().map(|n| n == v.as_str()).unwrap_or(false)) {
                        stack.push(path);
                    }
                }
            }
        }
        let gitignore = builder.build().unwrap_or_else(|_| Gitignore::empty());
        EventFilter {
            gitignore,
            secret_globs: cfg.secret_globs.iter().filter_map(|p| Pattern::new(p).ok()).collect(),
            vendored_dirs: cfg.vendored_dirs.clone(),
        }
    }

    pub fn should_index(&self, path: &Path) -> bool {
        if self.gitignore.matched(path, path.is_dir()).is_ignore() {
            return false;
        }
        if path.components().any(|c| self.vendored_dirs.iter().any(|v| c.as_os_str() == v.as_str())) {
            return false;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if self.secret_globs.iter().any(|g| g.matches(name)) {
                return false;
            }
        }
        true
    }
}

struct PollState {
    seen: HashMap<PathBuf, (i64, u64)>,
}

/// Owns the OS watcher handle (dropping it stops notifications) plus the
/// background debounce/poll tasks. Hold on to it for the lifetime of the
/// indexing coordinator for one project.
pub struct ProjectWatcher {
    _os_watcher: RecommendedWatcher,
    cancel: CancellationToken,
}

impl ProjectWatcher {
    pub fn start(root: PathBuf, cfg: WatcherConfig, filter: Arc<Mutex<EventFilter>>, out: mpsc::Sender<FileEvent>) -> notify::Result<Self> {
        let debouncer = Arc::new(Debouncer::new(Duration::from_millis(cfg.debounce_ms)));
        let cancel = CancellationToken::new();

        let (raw_tx, raw_rx) = std::sync::mpsc::channel::<Event>();
        let mut os_watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                if let Ok(event) = res {
                    let _ = raw_tx.send(event);
                }
            },
            NotifyConfig::default(),
        )?;
        os_watcher.watch(&root, RecursiveMode::Recursive)?;

        // Bridge the `notify` callback thread's std channel into the debouncer.
        let deb_for_bridge = debouncer.clone();
        let root_for_bridge = root.clone();
        std::thread::spawn(move || {
            while let Ok(event) = raw_rx.recv() {
                let kind = match event.kind {
                    EventKind::Create(_) => RawKind::Create,
                    EventKind::Modify(_) => RawKind::Modify,
                    EventKind::Remove(_) => RawKind::Delete,
                    _ => continue,
                };
                for path in event.paths {
                    if is_gitignore_file(&path, &root_for_bridge) {
                        continue; // handled by the dedicated gitignore poll below
                    }
                    deb_for_bridge.record(path, kind);
                }
            }
        });

        let (coalesced_tx, mut coalesced_rx) = mpsc::channel::<(PathBuf, RawKind)>(1024);
        tokio::spawn(debouncer.clone().run(coalesced_tx, Duration::from_millis(50)));

        let filter_for_emit = filter.clone();
        let out_for_emit = out.clone();
        let cancel_for_emit = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_for_emit.cancelled() => break,
                    next = coalesced_rx.recv() => {
                        let Some((path, kind)) = next else { break };
                        let allowed = filter_for_emit.lock().expect("filter lock poisoned").should_index(&path);
                        if !allowed {
                            continue;
                        }
                        let event = match kind {
                            RawKind::Create => FileEvent::Create(path),
                            RawKind::Modify => FileEvent::Modify(path),
                            RawKind::Delete => FileEvent::Delete(path),
                        };
                        if out_for_emit.send(event).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        // Polling fallback: periodically re-stat the whole tree and synthesize
        // any events the OS watcher missed (common on network filesystems).
        let poll_root = root.clone();
        let poll_cfg = cfg.clone();
        let poll_cancel = cancel.clone();
        let poll_debouncer = debouncer.clone();
        let poll_filter = filter.clone();
        tokio::spawn(async move {
            let mut state = PollState { seen: HashMap::new() };
            let mut interval = tokio::time::interval(Duration::from_millis(poll_cfg.poll_interval_ms.max(1000)));
            loop {
                tokio::select! {
                    _ = poll_cancel.cancelled() => break,
                    _ = interval.tick() => {
                        poll_once(&poll_root, &poll_filter, &mut state, &poll_debouncer);
                    }
                }
            }
        });

        // Dedicated gitignore-content poll: a change to any .gitignore file's
        // own mtime fires GitignoreChanged directly, bypassing the per-file
        // debounce path (reconciliation, not a single-file reindex).
        let gi_root = root.clone();
        let gi_cancel = cancel.clone();
        let gi_out = out;
        tokio::spawn(async move {
            let mut last_hash = crate::coordinator::gitignore_set_hash(&gi_root);
            let mut interval = tokio::time::interval(Duration::from_millis(1000));
            loop {
                tokio::select! {
                    _ = gi_cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let current = crate::coordinator::gitignore_set_hash(&gi_root);
                        if current != last_hash {
                            last_hash = current;
                            if gi_out.send(FileEvent::GitignoreChanged).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok(ProjectWatcher { _os_watcher: os_watcher, cancel })
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ProjectWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn is_gitignore_file(path: &Path, _root: &Path) -> bool {
    path.file_name().and_then(|n| n.to_str()) == Some(".gitignore")
}

fn poll_once(root: &Path, filter: &Arc<Mutex<EventFilter>>, state: &mut PollState, debouncer: &Arc<Debouncer>) {
    let guard = filter.lock().expect("filter lock poisoned");
    let mut current: HashMap<PathBuf, (i64, u64)> = HashMap::new();
    let walker = ignore::WalkBuilder::new(root).standard_filters(true).build();
    for entry in walker.flatten() {
        let path = entry.path().to_path_buf();
        if entry.file_type().map(|t| !t.is_file()).unwrap_or(true) {
            continue;
        }
        if !guard.should_index(&path) {
            continue;
        }
        if let Ok(meta) = entry.metadata() {
            let mtime = meta.modified().ok().and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok()).map(|d| d.as_secs() as i64).unwrap_or(0);
            current.insert(path, (mtime, meta.len()));
        }
    }
    drop(guard);

    for (path, (mtime, size)) in &current {
        match state.seen.get(path) {
            Some(prev) if prev == &(*mtime, *size) => {}
            Some(_) => debouncer.record(path.clone(), RawKind::Modify),
            None => debouncer.record(path.clone(), RawKind::Create),
        }
    }
    for path in state.seen.keys() {
        if !current.contains_key(path) {
            debouncer.record(path.clone(), RawKind::Delete);
        }
    }
    state.seen = current;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_glob_blocks_matching_filename() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = WatcherConfig::default();
        let filter = EventFilter::build(dir.path(), &cfg);
        assert!(!filter.should_index(&dir.path().join("id_rsa.pem")));
        assert!(filter.should_index(&dir.path().join("main.rs")));
    }

    #[test]
    fn secret_glob_supports_question_mark_and_character_classes() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = WatcherConfig::default();
        cfg.secret_globs = vec!["id_rsa?".to_string(), "*.[pP][eE][mM]".to_string()];
        let filter = EventFilter::build(dir.path(), &cfg);
        assert!(!filter.should_index(&dir.path().join("id_rsa1")));
        assert!(!filter.should_index(&dir.path().join("key.PEM")));
        assert!(filter.should_index(&dir.path().join("id_rsa12")));
    }

    #[test]
    fn vendored_dir_is_excluded() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = WatcherConfig::default();
        let filter = EventFilter::build(dir.path(), &cfg);
        assert!(!filter.should_index(&dir.path().join("node_modules/pkg/index.js")));
    }

    #[test]
    fn gitignored_path_is_excluded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "*.log\n").unwrap();
        let cfg = WatcherConfig::default();
        let filter = EventFilter::build(dir.path(), &cfg);
        assert!(!filter.should_index(&dir.path().join("debug.log")));
        assert!(filter.should_index(&dir.path().join("main.rs")));
    }
}
