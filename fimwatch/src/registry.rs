use std::collections::HashMap;
use std::path::{Path, PathBuf};

use fimwatch_common::FsIdentity;

/// Last known path of every watched object.
///
/// Seeded from the installed rules and kept current from the event stream.
/// Only used for reporting; entries are never removed on unlink so a late
/// event still renders with a path.
#[derive(Debug, Default)]
pub struct PathRegistry {
    paths: HashMap<FsIdentity, PathBuf>,
}

impl PathRegistry {
    pub fn insert(&mut self, identity: FsIdentity, path: PathBuf) {
        self.paths.insert(identity, path);
    }

    pub fn path_of(&self, identity: FsIdentity) -> Option<&Path> {
        self.paths.get(&identity).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// `child` appeared as `name` inside `parent`.
    pub fn record_child(
        &mut self,
        parent: FsIdentity,
        child: FsIdentity,
        name: &str,
    ) -> Option<PathBuf> {
        let path = self.path_of(parent)?.join(name);
        self.insert(child, path.clone());
        Some(path)
    }

    /// `source` was renamed to `name`. With `replaced`, `dest` is the entry
    /// it took the place of; otherwise `dest` is the receiving directory.
    pub fn record_rename(
        &mut self,
        source: FsIdentity,
        dest: FsIdentity,
        name: &str,
        replaced: bool,
    ) -> Option<PathBuf> {
        let path = match replaced {
            true => self.paths.remove(&dest)?,
            false => self.path_of(dest)?.join(name),
        };
        self.insert(source, path.clone());
        Some(path)
    }
}
