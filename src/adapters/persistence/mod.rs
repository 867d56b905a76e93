//! File-backed persistence: crawl watermark and JSON output artifact.

pub mod json_artifact;
pub mod watermark_file;

use crate::domain::DomainError;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Write-replace: temp file, `sync_all`, then rename over the target.
///
/// A crash mid-write leaves the previous file intact. Parent directories are created.
pub(crate) async fn atomic_write(path: &Path, contents: &[u8]) -> Result<(), DomainError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| DomainError::from_io(&e))?;
    }
    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = std::path::PathBuf::from(temp_name);

    let mut f = fs::File::create(&temp_path)
        .await
        .map_err(|e| DomainError::from_io(&e))?;
    f.write_all(contents)
        .await
        .map_err(|e| DomainError::from_io(&e))?;
    f.sync_all().await.map_err(|e| DomainError::from_io(&e))?;
    drop(f);

    fs::rename(&temp_path, path)
        .await
        .map_err(|e| DomainError::from_io(&e))
}
