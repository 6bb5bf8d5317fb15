//! Workspace artifact discovery after an execution (spec.md §4.5 step 6).

use std::path::Path;

use chrono::Utc;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use sandbox_core::model::ArtifactMetadata;

/// Files the wrapper itself writes, never reported as user artifacts.
const IGNORED: &[&str] = &["_wrapper.py", "_wrapper.js", "handler.py", "handler.js", "handler.sh"];

/// Walks `workspace` and returns metadata for every non-hidden file, skipping
/// the generated wrapper/handler files so output artifacts aren't polluted
/// by the execution harness itself.
pub fn scan_workspace(workspace: &Path) -> Vec<ArtifactMetadata> {
    let mut artifacts = Vec::new();

    for entry in WalkDir::new(workspace).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') || IGNORED.contains(&name.as_ref()) {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(workspace)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .to_string();

        let Ok(meta) = entry.metadata() else { continue };
        let mime_type = mime_guess::from_path(entry.path())
            .first_or_octet_stream()
            .to_string();
        let checksum = checksum_file(entry.path()).ok();

        artifacts.push(ArtifactMetadata {
            path: relative,
            size_bytes: meta.len(),
            mime_type,
            kind: "file".to_string(),
            created_at: meta
                .created()
                .or_else(|_| meta.modified())
                .map(chrono::DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now()),
            checksum,
        });
    }

    artifacts
}

fn checksum_file(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    let digest = Sha256::digest(&bytes);
    Ok(format!("sha256:{digest:x}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn skips_hidden_and_wrapper_files() {
        let dir = tempfile_dir();
        std::fs::write(dir.join("result.txt"), b"hi").unwrap();
        std::fs::write(dir.join(".secret"), b"nope").unwrap();
        std::fs::write(dir.join("_wrapper.py"), b"nope").unwrap();

        let found = scan_workspace(&dir);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, "result.txt");

        std::fs::remove_dir_all(&dir).ok();
    }

    fn tempfile_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("sandbox-executor-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut marker = std::fs::File::create(dir.join(".keep")).unwrap();
        let _ = marker.write_all(b"");
        dir
    }
}
