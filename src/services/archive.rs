use crate::api::error::AppError;
use std::io::{Cursor, Write};
use std::path::PathBuf;
use zip::CompressionMethod;
use zip::write::FileOptions;

/// A stored file and the name it takes inside the archive.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub name: String,
    pub path: PathBuf,
}

/// Builds an in-memory zip of `entries`, deflated at level 6.
///
/// Entries whose bytes are gone from disk are skipped.
pub async fn zip_entries(entries: Vec<ArchiveEntry>) -> Result<Vec<u8>, AppError> {
    let mut contents = Vec::with_capacity(entries.len());
    for entry in entries {
        match tokio::fs::read(&entry.path).await {
            Ok(bytes) => contents.push((entry.name, bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("Skipping archive entry {}: no bytes at {:?}", entry.name, entry.path);
            }
            Err(e) => return Err(e.into()),
        }
    }

    tokio::task::spawn_blocking(move || write_zip(contents))
        .await
        .map_err(|e| AppError::Internal(format!("Archive task failed: {}", e)))?
}

fn write_zip(contents: Vec<(String, Vec<u8>)>) -> Result<Vec<u8>, AppError> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(6));

    for (name, bytes) in contents {
        zip.start_file(name, options)?;
        zip.write_all(&bytes)?;
    }

    Ok(zip.finish()?.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[tokio::test]
    async fn test_zip_entries_skips_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("1.png");
        tokio::fs::write(&present, b"thumb").await.unwrap();

        let bytes = zip_entries(vec![
            ArchiveEntry {
                name: "1_0".to_string(),
                path: present,
            },
            ArchiveEntry {
                name: "2_1".to_string(),
                path: dir.path().join("2.png"),
            },
        ])
        .await
        .unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 1);
        let mut entry = archive.by_name("1_0").unwrap();
        let mut content = Vec::new();
        entry.read_to_end(&mut content).unwrap();
        assert_eq!(content, b"thumb");
    }
}
