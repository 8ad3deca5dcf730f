/*!
 * Tree expansion into an ordered list of transfer units
 *
 * Runs on the caller's thread inside `enqueue_*`. Directories are emitted
 * before their contents (pre-order), children in listing order, so the worker
 * always creates a container before writing into it.
 */

use std::path::Path;

use tracing::{debug, warn};
use walkdir::WalkDir;

use super::unit::{Direction, TransferUnit};
use crate::error::Result;
use crate::session::{join_remote, remote_file_name, stat_remote, RemoteEntry, SessionAdapter};

/// Result of expanding one enqueue batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expansion {
    pub units: Vec<TransferUnit>,
    /// Units discovered past the cap and left out
    pub dropped: usize,
}

impl Expansion {
    pub fn is_truncated(&self) -> bool {
        self.dropped > 0
    }
}

/// Limits applied while expanding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpandLimits {
    pub max_depth: usize,
    pub max_units: usize,
}

/// What a remote root path turned out to be
enum RemoteKind {
    Directory(Vec<RemoteEntry>),
    File,
}

struct Collector {
    expansion: Expansion,
    max_units: usize,
}

impl Collector {
    fn new(max_units: usize) -> Self {
        Self {
            expansion: Expansion::default(),
            max_units,
        }
    }

    fn push(&mut self, unit: TransferUnit) {
        if self.expansion.units.len() < self.max_units {
            self.expansion.units.push(unit);
        } else {
            self.expansion.dropped += 1;
        }
    }
}

/// Expand remote paths into download units targeting `local_dir`
///
/// `/photos` downloaded into `out` lands at `out/photos`.
pub fn plan_download<S: AsRef<str>>(
    session: &mut dyn SessionAdapter,
    remote_paths: &[S],
    local_dir: &Path,
    limits: ExpandLimits,
) -> Expansion {
    let mut collector = Collector::new(limits.max_units);

    for remote in remote_paths {
        let remote = remote.as_ref();
        let name = remote_file_name(remote);
        let (local_root, display) = if name.is_empty() {
            (local_dir.to_path_buf(), remote.to_string())
        } else {
            (local_dir.join(name), name.to_string())
        };

        match classify_remote(session, remote) {
            Ok(RemoteKind::Directory(entries)) => {
                collector.push(TransferUnit::container(
                    remote,
                    path_string(&local_root),
                    display,
                    Direction::Download,
                ));
                walk_remote(session, remote, &local_root, entries, 1, limits, &mut collector);
            }
            Ok(RemoteKind::File) => {
                collector.push(TransferUnit::file(
                    remote,
                    path_string(&local_root),
                    display,
                    Direction::Download,
                ));
            }
            Err(e) => {
                // Queue it anyway; the unit fails with the real error when it runs
                warn!(path = %remote, error = %e, "Cannot classify remote path");
                collector.push(TransferUnit::file(
                    remote,
                    path_string(&local_root),
                    display,
                    Direction::Download,
                ));
            }
        }
    }

    debug!(
        units = collector.expansion.units.len(),
        dropped = collector.expansion.dropped,
        "Planned download"
    );
    collector.expansion
}

/// Expand local paths into upload units targeting `remote_dir`
pub fn plan_upload<P: AsRef<Path>>(
    local_paths: &[P],
    remote_dir: &str,
    limits: ExpandLimits,
) -> Expansion {
    let mut collector = Collector::new(limits.max_units);

    for local in local_paths {
        let local = local.as_ref();
        let name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path_string(local));
        let remote_root = join_remote(remote_dir, &name);

        if !local.is_dir() {
            collector.push(TransferUnit::file(
                path_string(local),
                remote_root,
                name,
                Direction::Upload,
            ));
            continue;
        }

        let walker = WalkDir::new(local)
            .follow_links(false)
            .max_depth(limits.max_depth)
            .sort_by_file_name();

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(root = %local.display(), error = %e, "Failed to read local entry");
                    continue;
                }
            };

            let remote = match entry.path().strip_prefix(local) {
                Ok(rel) => rel
                    .components()
                    .fold(remote_root.clone(), |acc, c| {
                        join_remote(&acc, &c.as_os_str().to_string_lossy())
                    }),
                Err(_) => continue,
            };
            let display = if entry.depth() == 0 {
                name.clone()
            } else {
                entry.file_name().to_string_lossy().into_owned()
            };

            if entry.file_type().is_dir() {
                collector.push(TransferUnit::container(
                    path_string(entry.path()),
                    remote,
                    display,
                    Direction::Upload,
                ));
            } else if entry.path().is_file() {
                collector.push(TransferUnit::file(
                    path_string(entry.path()),
                    remote,
                    display,
                    Direction::Upload,
                ));
            } else {
                debug!(path = %entry.path().display(), "Skipping special file");
            }
        }
    }

    debug!(
        units = collector.expansion.units.len(),
        dropped = collector.expansion.dropped,
        "Planned upload"
    );
    collector.expansion
}

/// Decide whether a remote root is a directory or a leaf
///
/// A direct listing of a leaf may return zero entries or one entry carrying
/// the leaf's own name, so both cases are confirmed through the parent
/// listing before deciding.
fn classify_remote(session: &mut dyn SessionAdapter, path: &str) -> Result<RemoteKind> {
    let listed = match session.list(path) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(path = %path, error = %e, "Direct listing failed, checking parent");
            return match stat_remote(session, path)? {
                Some(entry) if entry.is_directory => Ok(RemoteKind::Directory(Vec::new())),
                Some(_) => Ok(RemoteKind::File),
                None => Err(e),
            };
        }
    };

    let entries: Vec<_> = listed.into_iter().filter(|e| !e.is_dot_entry()).collect();
    let name = remote_file_name(path);
    let ambiguous = match entries.as_slice() {
        [] => true,
        [only] => !only.is_directory && only.name == name,
        _ => false,
    };
    if !ambiguous {
        return Ok(RemoteKind::Directory(entries));
    }

    match stat_remote(session, path) {
        Ok(Some(entry)) if entry.is_directory => Ok(RemoteKind::Directory(entries)),
        Ok(Some(_)) => Ok(RemoteKind::File),
        Ok(None) if entries.is_empty() => Ok(RemoteKind::Directory(entries)),
        Ok(None) => Ok(RemoteKind::File),
        Err(e) => {
            debug!(path = %path, error = %e, "Parent lookup failed");
            if entries.is_empty() {
                Ok(RemoteKind::Directory(entries))
            } else {
                Ok(RemoteKind::File)
            }
        }
    }
}

fn walk_remote(
    session: &mut dyn SessionAdapter,
    remote_dir: &str,
    local_dir: &Path,
    entries: Vec<RemoteEntry>,
    depth: usize,
    limits: ExpandLimits,
    collector: &mut Collector,
) {
    for entry in entries {
        if entry.is_dot_entry() {
            continue;
        }
        let remote = join_remote(remote_dir, &entry.name);
        let local = local_dir.join(&entry.name);

        if !entry.is_directory {
            collector.push(TransferUnit::file(
                remote,
                path_string(&local),
                entry.name,
                Direction::Download,
            ));
            continue;
        }

        collector.push(TransferUnit::container(
            remote.as_str(),
            path_string(&local),
            entry.name.as_str(),
            Direction::Download,
        ));

        if depth >= limits.max_depth {
            warn!(path = %remote, depth, "Maximum directory depth reached, not descending");
            continue;
        }

        match session.list(&remote) {
            Ok(children) => walk_remote(
                session,
                &remote,
                &local,
                children,
                depth + 1,
                limits,
                collector,
            ),
            Err(e) => warn!(path = %remote, error = %e, "Failed to list remote directory"),
        }
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
