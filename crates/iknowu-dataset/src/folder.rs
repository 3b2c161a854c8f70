//! Labeled image folders.
//!
//! A folder holds one subdirectory per class. Class indices follow the
//! sorted subdirectory names, which is the order the trained model's
//! output vector uses.

use std::path::{Path, PathBuf};
use thiserror::Error;

const IMAGE_EXTENSIONS: [&str; 9] = [
    "jpg", "jpeg", "png", "bmp", "gif", "webp", "tif", "tiff", "ico",
];

#[derive(Error, Debug)]
pub enum FolderError {
    #[error("directory not found: {0}")]
    DirectoryNotFound(PathBuf),
    #[error("cannot read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One labeled picture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub path: PathBuf,
    pub label: usize,
}

/// Pictures found under a `<dir>/<class>/<file>` tree.
#[derive(Debug, Clone)]
pub struct ImageFolder {
    root: PathBuf,
    classes: Vec<String>,
    samples: Vec<Sample>,
}

impl ImageFolder {
    /// Scan `root` for class subdirectories and their pictures.
    ///
    /// Non-image files and nested directories below a class are ignored.
    pub fn scan(root: &Path) -> Result<Self, FolderError> {
        if !root.is_dir() {
            return Err(FolderError::DirectoryNotFound(root.to_path_buf()));
        }

        let mut classes: Vec<String> = read_dir(root)?
            .into_iter()
            .filter(|p| p.is_dir())
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        classes.sort();

        let mut samples = Vec::new();
        for (label, class) in classes.iter().enumerate() {
            let mut files: Vec<PathBuf> = read_dir(&root.join(class))?
                .into_iter()
                .filter(|p| p.is_file() && is_image(p))
                .collect();
            files.sort();
            samples.extend(files.into_iter().map(|path| Sample { path, label }));
        }

        tracing::debug!(
            root = %root.display(),
            classes = classes.len(),
            samples = samples.len(),
            "scanned image folder"
        );

        Ok(Self {
            root: root.to_path_buf(),
            classes,
            samples,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Class names, index-aligned with sample labels.
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of samples per class, index-aligned with [`classes`](Self::classes).
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.classes.len()];
        for sample in &self.samples {
            counts[sample.label] += 1;
        }
        counts
    }

    /// Re-index samples onto `classes`, matching by class name.
    ///
    /// Samples whose class is not in `classes` are dropped; the names of the
    /// dropped classes are returned alongside the aligned folder.
    pub fn align_to(&self, classes: &[String]) -> (Self, Vec<String>) {
        let mapping: Vec<Option<usize>> = self
            .classes
            .iter()
            .map(|name| classes.iter().position(|c| c == name))
            .collect();

        let samples = self
            .samples
            .iter()
            .filter_map(|s| {
                mapping[s.label].map(|label| Sample {
                    path: s.path.clone(),
                    label,
                })
            })
            .collect();
        let dropped = self
            .classes
            .iter()
            .zip(&mapping)
            .filter(|(_, m)| m.is_none())
            .map(|(name, _)| name.clone())
            .collect();

        let aligned = Self {
            root: self.root.clone(),
            classes: classes.to_vec(),
            samples,
        };
        (aligned, dropped)
    }
}

fn read_dir(dir: &Path) -> Result<Vec<PathBuf>, FolderError> {
    let io_err = |e| FolderError::Io {
        path: dir.to_path_buf(),
        source: e,
    };
    std::fs::read_dir(dir)
        .map_err(io_err)?
        .map(|entry| entry.map(|e| e.path()).map_err(io_err))
        .collect()
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_scan_missing_root() {
        let tmp = tempfile::tempdir().unwrap();
        let err = ImageFolder::scan(&tmp.path().join("training")).unwrap_err();
        assert!(matches!(err, FolderError::DirectoryNotFound(_)));
    }

    #[test]
    fn test_classes_sorted_and_labeled() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        touch(&root.join("bob").join("1.jpg"));
        touch(&root.join("amy").join("1.PNG"));
        touch(&root.join("amy").join("2.jpeg"));
        touch(&root.join("carl").join("notes.txt"));

        let folder = ImageFolder::scan(root).unwrap();
        assert_eq!(folder.classes(), ["amy", "bob", "carl"]);
        assert_eq!(folder.len(), 3);
        assert_eq!(folder.class_counts(), vec![2, 1, 0]);

        let labels: Vec<usize> = folder.samples().iter().map(|s| s.label).collect();
        assert_eq!(labels, vec![0, 0, 1]);
        assert!(folder.samples()[0].path.ends_with("amy/1.PNG"));
    }

    #[test]
    fn test_loose_files_at_root_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("stray.jpg"));
        let folder = ImageFolder::scan(tmp.path()).unwrap();
        assert!(folder.classes().is_empty());
        assert!(folder.is_empty());
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_align_drops_unknown_class() {
        let tmp = tempfile::tempdir().unwrap();
        for class in ["amy", "bob", "carl"] {
            touch(&tmp.path().join(class).join("1.jpg"));
        }
        let folder = ImageFolder::scan(tmp.path()).unwrap();

        let (aligned, dropped) = folder.align_to(&names(&["amy", "bob"]));
        assert_eq!(dropped, ["carl"]);
        assert_eq!(aligned.classes(), ["amy", "bob"]);
        assert_eq!(aligned.len(), 2);
        assert!(aligned.samples().iter().all(|s| s.label < 2));
        assert_eq!(aligned.class_counts(), vec![1, 1]);
    }

    #[test]
    fn test_align_missing_class_keeps_names() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("amy").join("1.jpg"));
        touch(&tmp.path().join("carl").join("1.jpg"));
        let folder = ImageFolder::scan(tmp.path()).unwrap();
        assert_eq!(folder.samples()[1].label, 1);

        let (aligned, dropped) = folder.align_to(&names(&["amy", "bob", "carl"]));
        assert!(dropped.is_empty());
        assert_eq!(aligned.class_counts(), vec![1, 0, 1]);
        let carl = &aligned.samples()[1];
        assert!(carl.path.ends_with("carl/1.jpg"));
        assert_eq!(carl.label, 2);
    }

    #[test]
    fn test_is_image() {
        assert!(is_image(Path::new("a/b.JPG")));
        assert!(is_image(Path::new("x.webp")));
        assert!(!is_image(Path::new("x.txt")));
        assert!(!is_image(Path::new("noext")));
    }
}
