//! Template discovery on disk.
//!
//! Recursively scans a directory for `.html` files holding `<template $name>` declarations. This
//! is the native-host counterpart of the hosting script's `import` list.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{ComponentError, Result};

/// Every `.html` file under `dir`, sorted by path so registration order is stable.
pub fn find_template_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(ComponentError::Config(format!("not a directory: {}", dir.display())));
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| ComponentError::Io(e.into()))?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("html")) {
            files.push(path.to_path_buf());
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("uifactory-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(dir.join("nested")).unwrap();
        dir
    }

    #[test]
    fn test_finds_html_recursively() {
        let dir = scratch_dir("discover");
        fs::write(dir.join("b.html"), "").unwrap();
        fs::write(dir.join("a.HTML"), "").unwrap();
        fs::write(dir.join("notes.txt"), "").unwrap();
        fs::write(dir.join("nested").join("c.html"), "").unwrap();

        let names: Vec<String> = find_template_files(&dir)
            .unwrap()
            .iter()
            .map(|p| p.strip_prefix(&dir).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(names, vec!["a.HTML", "b.html", "nested/c.html"]);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let missing = std::env::temp_dir().join("uifactory-definitely-missing-dir");
        assert!(find_template_files(&missing).is_err());
    }
}
