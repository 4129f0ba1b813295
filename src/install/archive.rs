//! Distribution archive extraction.

use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;

use crate::error::{Error, Result};

/// Extract a gzipped tarball into `destination`, mapping the archive's
/// single top-level directory (`elasticsearch-<version>/`) onto
/// `destination` itself.
pub(crate) fn extract_into(archive_path: &Path, destination: &Path) -> Result<()> {
    let extract_error = |message: String| Error::Extract {
        path: archive_path.to_path_buf(),
        message,
    };

    std::fs::create_dir_all(destination)?;
    let file = std::fs::File::open(archive_path)?;
    let decoder = GzDecoder::new(std::io::BufReader::new(file));
    let mut archive = Archive::new(decoder);
    archive.set_preserve_permissions(true);

    for entry in archive.entries().map_err(|e| extract_error(e.to_string()))? {
        let mut entry = entry.map_err(|e| extract_error(e.to_string()))?;
        let path = entry
            .path()
            .map_err(|e| extract_error(e.to_string()))?
            .into_owned();
        if !is_safe_path(&path) {
            return Err(extract_error(format!(
                "unsafe path in archive: {}",
                path.display()
            )));
        }
        // Drop the top-level directory component
        let stripped: PathBuf = path.components().skip(1).collect();
        if stripped.as_os_str().is_empty() {
            continue;
        }
        let target = destination.join(&stripped);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        entry
            .unpack(&target)
            .map_err(|e| extract_error(format!("{}: {e}", stripped.display())))?;
    }
    Ok(())
}

fn is_safe_path(path: &Path) -> bool {
    path.components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}
