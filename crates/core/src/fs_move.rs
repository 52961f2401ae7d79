use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// First free `stem_N.ext` sibling of `dest`.
pub async fn resolve_conflict(dest: &Path) -> io::Result<PathBuf> {
    let stem = dest
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file")
        .to_string();
    let ext = dest
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_string();
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    let mut counter = 1;
    loop {
        let name = if ext.is_empty() {
            format!("{}_{}", stem, counter)
        } else {
            format!("{}_{}.{}", stem, counter, ext)
        };
        let candidate = parent.join(name);
        if !fs::try_exists(&candidate).await? {
            return Ok(candidate);
        }
        counter += 1;
    }
}

#[cfg(unix)]
const CROSS_DEVICE: i32 = 18; // EXDEV
#[cfg(windows)]
const CROSS_DEVICE: i32 = 17; // ERROR_NOT_SAME_DEVICE

fn is_cross_device(err: &io::Error) -> bool {
    #[cfg(any(unix, windows))]
    {
        err.raw_os_error() == Some(CROSS_DEVICE)
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = err;
        false
    }
}

/// Renames `from` to `to`. Only a cross-filesystem rename falls back to
/// copy + delete; every other rename error is returned as is.
pub async fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(rename_err) if is_cross_device(&rename_err) => {
            debug!(from = %from.display(), to = %to.display(), "cross-device rename, copying");
            copy_then_remove(from, to, |p| async move { fs::remove_file(p).await }).await
        }
        Err(rename_err) => Err(rename_err),
    }
}

/// Copies `from` to `to` and then removes `from` with `remove`. On any
/// failure the copy at `to` is deleted again so the file exists in exactly
/// one place.
async fn copy_then_remove<R, Fut>(from: &Path, to: &Path, remove: R) -> io::Result<()>
where
    R: FnOnce(PathBuf) -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    if let Err(copy_err) = fs::copy(from, to).await {
        let _ = fs::remove_file(to).await;
        return Err(copy_err);
    }
    if let Err(remove_err) = remove(from.to_path_buf()).await {
        if let Err(e) = fs::remove_file(to).await {
            warn!(to = %to.display(), error = %e, "could not roll back copy");
        }
        return Err(remove_err);
    }
    Ok(())
}
