//! State directory layout and permissions (§6).

use std::path::{Path, PathBuf};

/// Default socket-map capacity, and therefore the default bound on
/// destination IDs (§3).
pub const DEFAULT_SOCKET_CAPACITY: u32 = 512;

pub const PROGRAM_PIN: &str = "program";
pub const LINK_PIN: &str = "link";
pub const BINDINGS_PIN: &str = "bindings";
pub const SOCKETS_PIN: &str = "sockets";
pub const METRICS_PIN: &str = "destination_metrics";
pub const DESTINATIONS_PIN: &str = "destinations";

/// Directory mode 0775, file mode 0664 (§6): owner-writable,
/// group-readable so unprivileged metrics readers can open the pinned
/// maps read-only.
pub const DIR_MODE: u32 = 0o775;
pub const FILE_MODE: u32 = 0o664;

/// Paths to every pinned object under one namespace's state directory.
#[derive(Debug, Clone)]
pub struct StateDirLayout {
    pub root: PathBuf,
}

impl StateDirLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<state-root>/<netns-inode>_dispatcher`.
    pub fn for_namespace(state_root: &Path, namespace_inode: u64) -> Self {
        Self::new(state_root.join(format!("{namespace_inode}_dispatcher")))
    }

    pub fn program(&self) -> PathBuf {
        self.root.join(PROGRAM_PIN)
    }

    pub fn link(&self) -> PathBuf {
        self.root.join(LINK_PIN)
    }

    pub fn bindings(&self) -> PathBuf {
        self.root.join(BINDINGS_PIN)
    }

    pub fn sockets(&self) -> PathBuf {
        self.root.join(SOCKETS_PIN)
    }

    pub fn metrics(&self) -> PathBuf {
        self.root.join(METRICS_PIN)
    }

    pub fn destinations(&self) -> PathBuf {
        self.root.join(DESTINATIONS_PIN)
    }

    /// A sibling scratch directory used for atomic creation/upgrade,
    /// e.g. `<state-root>/.<netns-inode>_dispatcher.scratch`.
    pub fn scratch_sibling(&self) -> PathBuf {
        let file_name = self
            .root
            .file_name()
            .map(|n| format!(".{}.scratch", n.to_string_lossy()))
            .unwrap_or_else(|| ".dispatcher.scratch".to_string());
        self.root
            .parent()
            .map(|p| p.join(&file_name))
            .unwrap_or_else(|| PathBuf::from(file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_directory_naming() {
        let layout = StateDirLayout::for_namespace(Path::new("/sys/fs/bpf"), 4026531840);
        assert_eq!(layout.root, PathBuf::from("/sys/fs/bpf/4026531840_dispatcher"));
        assert_eq!(layout.bindings(), PathBuf::from("/sys/fs/bpf/4026531840_dispatcher/bindings"));
    }

    #[test]
    fn scratch_sibling_is_hidden_and_adjacent() {
        let layout = StateDirLayout::for_namespace(Path::new("/sys/fs/bpf"), 42);
        assert_eq!(
            layout.scratch_sibling(),
            PathBuf::from("/sys/fs/bpf/.42_dispatcher.scratch")
        );
    }
}
