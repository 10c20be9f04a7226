//! Photo discovery and slideshow ordering.
use std::ffi::OsStr;
use std::path::Path;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

use crate::error::Error;
use crate::source::ImageKey;

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "webp", "gif"];

#[inline]
pub fn is_image(p: &Path) -> bool {
    matches!(
        p.extension()
            .and_then(OsStr::to_str)
            .map(|s| s.to_ascii_lowercase()),
        Some(ref e) if IMAGE_EXTENSIONS.contains(&e.as_str())
    )
}

/// Recursively collects the images under `root`.
///
/// Paths are sorted so a given tree always yields the same order; with a
/// `shuffle_seed` that order is then shuffled deterministically.
#[instrument(skip(root), fields(root = %root.display()))]
pub fn scan(root: &Path, shuffle_seed: Option<u64>) -> Result<Vec<ImageKey>, Error> {
    if !root.is_dir() {
        return Err(Error::BadDir(root.display().to_string()));
    }
    let mut paths: Vec<_> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && is_image(e.path()))
        .map(|e| e.into_path())
        .collect();
    paths.sort();
    if paths.is_empty() {
        return Err(Error::EmptyLibrary(root.display().to_string()));
    }
    if let Some(seed) = shuffle_seed {
        paths.shuffle(&mut StdRng::seed_from_u64(seed));
        debug!(seed, "shuffled library");
    }
    info!(discovered = paths.len(), "library scan complete");
    Ok(paths.iter().map(|p| ImageKey::from(p.as_path())).collect())
}

/// Wrapping cursor over the library.
#[derive(Debug, Clone)]
pub struct Playlist {
    keys: Vec<ImageKey>,
    cursor: usize,
}

impl Playlist {
    pub fn new(keys: Vec<ImageKey>) -> Self {
        Self { keys, cursor: 0 }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[ImageKey] {
        &self.keys
    }

    pub fn current(&self) -> Option<&ImageKey> {
        self.keys.get(self.cursor)
    }

    /// Neighbour before the current photo; `None` unless there are two or more.
    pub fn prev(&self) -> Option<&ImageKey> {
        if self.keys.len() < 2 {
            return None;
        }
        self.keys.get((self.cursor + self.keys.len() - 1) % self.keys.len())
    }

    pub fn next(&self) -> Option<&ImageKey> {
        if self.keys.len() < 2 {
            return None;
        }
        self.keys.get((self.cursor + 1) % self.keys.len())
    }

    /// Moves to the next photo, wrapping at the end.
    pub fn advance(&mut self) -> Option<&ImageKey> {
        if !self.keys.is_empty() {
            self.cursor = (self.cursor + 1) % self.keys.len();
        }
        self.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn recognises_extensions_case_insensitively() {
        assert!(is_image(Path::new("a/B.JPG")));
        assert!(is_image(Path::new("x.webp")));
        assert!(!is_image(Path::new("notes.txt")));
        assert!(!is_image(Path::new("jpg")));
    }

    #[test]
    fn scan_is_sorted_and_recursive() {
        let tmp = tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("nested")).unwrap();
        fs::write(tmp.path().join("b.png"), b"x").unwrap();
        fs::write(tmp.path().join("nested").join("a.jpg"), b"x").unwrap();
        fs::write(tmp.path().join("c.txt"), b"x").unwrap();

        let keys = scan(tmp.path(), None).unwrap();
        let names: Vec<_> = keys
            .iter()
            .map(|k| k.as_path().strip_prefix(tmp.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(names, vec![Path::new("b.png"), Path::new("nested/a.jpg")]);
    }

    #[test]
    fn seeded_shuffle_is_repeatable() {
        let tmp = tempdir().unwrap();
        for i in 0..12 {
            fs::write(tmp.path().join(format!("{i:02}.jpg")), b"x").unwrap();
        }
        let a = scan(tmp.path(), Some(7)).unwrap();
        let b = scan(tmp.path(), Some(7)).unwrap();
        assert_eq!(a, b);
        let mut sorted = a.clone();
        sorted.sort();
        assert_eq!(sorted, scan(tmp.path(), None).unwrap());
    }

    #[test]
    fn missing_and_empty_dirs_are_errors() {
        let tmp = tempdir().unwrap();
        assert!(matches!(scan(tmp.path(), None), Err(Error::EmptyLibrary(_))));
        assert!(matches!(
            scan(&tmp.path().join("nope"), None),
            Err(Error::BadDir(_))
        ));
    }

    #[test]
    fn playlist_wraps_both_ways() {
        let mut list = Playlist::new(vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(list.prev(), Some(&ImageKey::from("c")));
        assert_eq!(list.next(), Some(&ImageKey::from("b")));
        list.advance();
        list.advance();
        assert_eq!(list.current(), Some(&ImageKey::from("c")));
        assert_eq!(list.next(), Some(&ImageKey::from("a")));
        assert_eq!(list.advance(), Some(&ImageKey::from("a")));
    }

    #[test]
    fn single_photo_has_no_neighbours() {
        let mut list = Playlist::new(vec!["only".into()]);
        assert_eq!(list.prev(), None);
        assert_eq!(list.next(), None);
        assert_eq!(list.advance(), Some(&ImageKey::from("only")));
    }
}
