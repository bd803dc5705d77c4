use std::fs::File;
use std::io;
use std::path::Path;

use tracing::{debug, warn};

use crate::ExtractionError;

/// Extracts every file entry of the zip at `archive_path` into `dest_dir`.
///
/// Entries are flattened to their file name, so a feed zipped inside a folder
/// still lands at the destination root. Existing files are overwritten and
/// entries with unsafe paths are skipped. Returns the written file names.
pub fn extract_archive(
    archive_path: &Path,
    dest_dir: &Path,
) -> Result<Vec<String>, ExtractionError> {
    let file = File::open(archive_path).map_err(|source| ExtractionError::Io {
        path: archive_path.to_path_buf(),
        source,
    })?;
    let mut archive = zip::ZipArchive::new(file).map_err(|source| ExtractionError::Archive {
        path: archive_path.to_path_buf(),
        source,
    })?;
    std::fs::create_dir_all(dest_dir).map_err(|source| ExtractionError::Io {
        path: dest_dir.to_path_buf(),
        source,
    })?;

    let mut extracted = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|source| ExtractionError::Entry {
                name: format!("#{}", index),
                source,
            })?;
        if entry.is_dir() {
            continue;
        }
        let Some(file_name) = flattened_name(entry.enclosed_name()) else {
            warn!("Skipping zip entry with unsafe path: {}", entry.name());
            continue;
        };
        if extracted.contains(&file_name) {
            warn!("Zip entry {} overwrites an earlier {}", entry.name(), file_name);
        }

        let target = dest_dir.join(&file_name);
        let mut output = File::create(&target).map_err(|source| ExtractionError::Io {
            path: target.clone(),
            source,
        })?;
        io::copy(&mut entry, &mut output).map_err(|source| ExtractionError::Io {
            path: target.clone(),
            source,
        })?;
        debug!("Extracted {} ({} bytes)", file_name, entry.size());
        if !extracted.contains(&file_name) {
            extracted.push(file_name);
        }
    }

    Ok(extracted)
}

fn flattened_name(enclosed: Option<&Path>) -> Option<String> {
    let name = enclosed?.file_name()?.to_str()?;
    if name.is_empty() {
        return None;
    }
    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time")
            .as_nanos();
        std::env::temp_dir().join(format!("{}_{}_{}", prefix, std::process::id(), nanos))
    }

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = File::create(path).expect("create zip");
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default();
        for (name, contents) in entries {
            if name.ends_with('/') {
                writer.add_directory(*name, options).expect("add dir");
            } else {
                writer.start_file(*name, options).expect("start file");
                writer.write_all(contents.as_bytes()).expect("write entry");
            }
        }
        writer.finish().expect("finish zip");
    }

    #[test]
    fn flattens_nested_entries_to_destination_root() {
        let dir = temp_dir("gtfs_extract");
        fs::create_dir_all(&dir).expect("create dir");
        let zip_path = dir.join("latest.zip");
        write_zip(
            &zip_path,
            &[
                ("feed/", ""),
                ("feed/stops.txt", "stop_id\nS1\n"),
                ("agency.txt", "agency_id\nA\n"),
            ],
        );

        let extracted = extract_archive(&zip_path, &dir).expect("extract");
        assert_eq!(extracted, vec!["stops.txt".to_string(), "agency.txt".to_string()]);
        assert_eq!(
            fs::read_to_string(dir.join("stops.txt")).expect("read"),
            "stop_id\nS1\n"
        );

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn overwrites_existing_files() {
        let dir = temp_dir("gtfs_extract_overwrite");
        fs::create_dir_all(&dir).expect("create dir");
        fs::write(dir.join("routes.txt"), "stale").expect("write");
        let zip_path = dir.join("latest.zip");
        write_zip(&zip_path, &[("routes.txt", "route_id\nR1\n")]);

        extract_archive(&zip_path, &dir).expect("extract");
        assert_eq!(
            fs::read_to_string(dir.join("routes.txt")).expect("read"),
            "route_id\nR1\n"
        );

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn rejects_non_zip_input() {
        let dir = temp_dir("gtfs_extract_corrupt");
        fs::create_dir_all(&dir).expect("create dir");
        let zip_path = dir.join("latest.zip");
        fs::write(&zip_path, "<html>not found</html>").expect("write");

        let err = extract_archive(&zip_path, &dir).expect_err("corrupt archive");
        assert!(matches!(err, ExtractionError::Archive { .. }));

        fs::remove_dir_all(&dir).ok();
    }
}
