//! Atomic replace-by-rename for the state store.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use mchr_errors::ReplicationResult;

/// A temporary sibling file that is renamed over `target` on [`Guard::commit`],
/// and removed on drop if never committed. Guarantees the temp file's handle
/// is closed on every exit path, including early returns via `?`.
struct Guard {
    tmp_path: PathBuf,
    file: Option<File>,
}

impl Guard {
    fn new(target: &Path) -> ReplicationResult<Self> {
        let tmp_path = tmp_path_for(target);
        let file = File::create(&tmp_path)?;
        Ok(Guard {
            tmp_path,
            file: Some(file),
        })
    }

    fn write_all(&mut self, data: &[u8]) -> ReplicationResult<()> {
        self.file
            .as_mut()
            .expect("file open until commit")
            .write_all(data)?;
        Ok(())
    }

    fn commit(mut self, target: &Path) -> ReplicationResult<()> {
        if let Some(file) = self.file.take() {
            file.sync_all()?;
            drop(file);
        }
        fs::rename(&self.tmp_path, target)?;
        Ok(())
    }
}

impl Drop for Guard {
    fn drop(&mut self) {
        self.file.take();
        let _ = fs::remove_file(&self.tmp_path);
    }
}

fn tmp_path_for(target: &Path) -> PathBuf {
    let mut tmp = target.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Write `data` to `target` atomically: serialize to a temporary sibling
/// file, `fsync`, then rename over `target`. No partial write is ever
/// observable by a concurrent reader of `target`.
pub fn atomic_write(target: &Path, data: &[u8]) -> ReplicationResult<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut guard = Guard::new(target)?;
    guard.write_all(data)?;
    guard.commit(target)
}
