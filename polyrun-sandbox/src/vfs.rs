//! Private per-sandbox filesystem roots

use std::io;
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;

/// Filesystem owned by exactly one sandbox instance, removed when dropped
#[derive(Debug)]
pub struct Vfs {
    root: TempDir,
}

impl Vfs {
    pub fn new(prefix: &str) -> io::Result<Self> {
        let root = tempfile::Builder::new().prefix(prefix).tempdir()?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Read a file by sandbox-visible name
    pub async fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        let path = resolve(self.root(), name)?;
        tokio::fs::read(path).await
    }
}

/// Map a sandbox-visible name to a path under `root`.
///
/// Absolute names are re-rooted. Names that climb out of the root are
/// reported as not found.
pub fn resolve(root: &Path, name: &str) -> io::Result<PathBuf> {
    let mut resolved = root.to_path_buf();
    let mut depth = 0usize;

    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::ParentDir => {
                if depth == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("{} is outside the sandbox filesystem", name),
                    ));
                }
                resolved.pop();
                depth -= 1;
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }

    if depth == 0 {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{:?} does not name a file", name),
        ));
    }

    Ok(resolved)
}
