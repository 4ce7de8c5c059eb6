use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

pub const DIR_PREFIX: &str = "ipatool_";
pub const PACKAGE_EXTENSION: &str = "ipa";

/// A downloaded package sitting in its acquisition directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedArtifact {
    pub dir: PathBuf,
    pub file_name: String,
    pub size: u64,
}

impl StagedArtifact {
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }
}

/// The set of `ipatool_<nanos>` directories under one root.
///
/// There is no index: every lookup lists the directories again. Another
/// request may be writing into one of them at the same time, so anything
/// that disappears or cannot be stat'ed mid-scan is simply skipped.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates a fresh, empty acquisition directory named after the current
    /// time in nanoseconds.
    pub fn prepare_destination(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.root)?;

        let mut stamp = unix_nanos();
        loop {
            let dir = self.root.join(format!("{}{}", DIR_PREFIX, stamp));
            match fs::create_dir(&dir) {
                Ok(()) => {
                    debug!(dir = %dir.display(), "prepared acquisition directory");
                    return Ok(dir);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => stamp += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Finds the package for `bundle_id`.
    ///
    /// A package whose file name contains the identifier wins. Failing that,
    /// the first package found anywhere is returned, whatever app it holds.
    pub fn resolve(&self, bundle_id: &str) -> Option<StagedArtifact> {
        let dirs = self.acquisition_dirs();

        for dir in &dirs {
            if let Some(artifact) = packages_in(dir)
                .into_iter()
                .find(|a| a.file_name.contains(bundle_id))
            {
                return Some(artifact);
            }
        }

        let fallback = dirs.iter().find_map(|dir| first_package(dir));
        if let Some(ref artifact) = fallback {
            warn!(
                bundle_id,
                file = %artifact.file_name,
                "no package named after bundle id, using first staged package"
            );
        }
        fallback
    }

    /// Exact file name lookup across all acquisition directories.
    pub fn locate_by_name(&self, file_name: &str) -> Option<PathBuf> {
        if !is_plain_file_name(file_name) {
            return None;
        }

        self.acquisition_dirs()
            .into_iter()
            .map(|dir| dir.join(file_name))
            .find(|path| path.is_file())
    }

    fn acquisition_dirs(&self) -> Vec<PathBuf> {
        let pattern = format!(
            "{}/{}*",
            glob::Pattern::escape(&self.root.to_string_lossy()),
            DIR_PREFIX
        );

        match glob::glob(&pattern) {
            Ok(entries) => entries.flatten().filter(|p| p.is_dir()).collect(),
            Err(e) => {
                warn!(error = %e, root = %self.root.display(), "cannot scan staging root");
                Vec::new()
            }
        }
    }
}

/// The package inside a single acquisition directory, if the download
/// produced one.
pub fn first_package<P: AsRef<Path>>(dir: P) -> Option<StagedArtifact> {
    packages_in(dir.as_ref()).into_iter().next()
}

fn packages_in(dir: &Path) -> Vec<StagedArtifact> {
    let pattern = format!(
        "{}/*.{}",
        glob::Pattern::escape(&dir.to_string_lossy()),
        PACKAGE_EXTENSION
    );

    let Ok(entries) = glob::glob(&pattern) else {
        return Vec::new();
    };

    entries
        .flatten()
        .filter_map(|path| {
            let metadata = fs::metadata(&path).ok().filter(|m| m.is_file())?;
            let file_name = path.file_name()?.to_string_lossy().to_string();
            Some(StagedArtifact {
                dir: dir.to_path_buf(),
                file_name,
                size: metadata.len(),
            })
        })
        .collect()
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}

fn unix_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
}
