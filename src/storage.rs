//! Reading and atomically replacing suite documents

/// Read a suite document
pub fn read(path: &std::path::Path) -> Result<String, crate::Error> {
    std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e).into())
}

/// Replace `path` with `text`, leaving either the old or the new content on failure
///
/// Returns whether the file changed.
pub fn write_atomic(path: &std::path::Path, text: &str) -> Result<bool, crate::Error> {
    if let Ok(current) = std::fs::read_to_string(path) {
        if current == text {
            snapbox::debug!("{} unchanged", path.display());
            return Ok(false);
        }
    }

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| format!("Failed to create temporary file in {}: {}", dir.display(), e))?;
    std::io::Write::write_all(&mut temp, text.as_bytes())
        .map_err(|e| format!("Failed to write {}: {}", temp.path().display(), e))?;
    if let Ok(metadata) = std::fs::metadata(path) {
        temp.as_file()
            .set_permissions(metadata.permissions())
            .map_err(|e| format!("Failed to copy permissions of {}: {}", path.display(), e))?;
    }
    temp.persist(path)
        .map_err(|e| format!("Failed to replace {}: {}", path.display(), e.error))?;
    Ok(true)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn replaces_content() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("check.test");
        std::fs::write(&path, "[case a]\nold\n").unwrap();

        assert!(write_atomic(&path, "[case a]\nnew\n").unwrap());
        assert_eq!(read(&path).unwrap(), "[case a]\nnew\n");
        let leftovers = std::fs::read_dir(root.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn unchanged_is_not_written() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("check.test");
        std::fs::write(&path, "[case a]\n").unwrap();
        let before = std::fs::metadata(&path).unwrap().modified().unwrap();

        assert!(!write_atomic(&path, "[case a]\n").unwrap());
        let after = std::fs::metadata(&path).unwrap().modified().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn creates_missing_file() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("new.test");
        assert!(write_atomic(&path, "[case a]\n").unwrap());
        assert_eq!(read(&path).unwrap(), "[case a]\n");
    }

    #[test]
    fn read_missing_file() {
        let root = tempfile::tempdir().unwrap();
        let err = read(&root.path().join("missing.test")).unwrap_err();
        assert!(err.to_string().contains("missing.test"), "{err}");
    }

    #[test]
    #[cfg(unix)]
    fn keeps_permissions() {
        use std::os::unix::fs::PermissionsExt as _;

        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("check.test");
        std::fs::write(&path, "[case a]\nold\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        assert!(write_atomic(&path, "[case a]\nnew\n").unwrap());
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
        assert_eq!(read(&path).unwrap(), "[case a]\nnew\n");
    }
}
