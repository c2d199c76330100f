use std::path::{Path, PathBuf};
use thiserror::Error;

/// Why a name taken from a URL cannot address a file inside one media directory.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilenameError {
    #[error("file name is empty")]
    Empty,
    #[error("file name contains a path separator")]
    ContainsPathSeparator,
    #[error("file name is a parent directory reference")]
    PathTraversal,
    #[error("file name contains a control character")]
    ControlCharacter,
    #[error("file name is hidden")]
    Hidden,
}

/// Trims `filename` and accepts it only when it names an entry directly inside a directory.
/// Control characters are refused since the name may end up in a `Content-Disposition` header.
pub fn validate_flat_filename(filename: &str) -> Result<&str, FilenameError> {
    let trimmed = filename.trim();
    if trimmed.is_empty() {
        return Err(FilenameError::Empty);
    }
    if trimmed.chars().any(|c| c.is_control()) {
        return Err(FilenameError::ControlCharacter);
    }
    if trimmed.contains(['/', '\\']) {
        return Err(FilenameError::ContainsPathSeparator);
    }
    if trimmed == ".." {
        return Err(FilenameError::PathTraversal);
    }
    if trimmed.starts_with('.') {
        return Err(FilenameError::Hidden);
    }
    Ok(trimmed)
}

/// `dir/filename` for a validated flat `filename`.
pub fn join_flat(dir: &Path, filename: &str) -> Result<PathBuf, FilenameError> {
    validate_flat_filename(filename).map(|name| dir.join(name))
}

#[test]
fn test_accepts_plain_names() {
    assert_eq!(validate_flat_filename(" logo.png "), Ok("logo.png"));
    assert_eq!(validate_flat_filename("logo..v2.svg"), Ok("logo..v2.svg"));
}

#[test]
fn test_rejects_unsafe_names() {
    assert_eq!(validate_flat_filename("  "), Err(FilenameError::Empty));
    assert_eq!(validate_flat_filename("../etc"), Err(FilenameError::ContainsPathSeparator));
    assert_eq!(validate_flat_filename("a\\b.png"), Err(FilenameError::ContainsPathSeparator));
    assert_eq!(validate_flat_filename(".."), Err(FilenameError::PathTraversal));
    assert_eq!(validate_flat_filename(".hidden"), Err(FilenameError::Hidden));
    assert_eq!(validate_flat_filename("a\r\nb"), Err(FilenameError::ControlCharacter));
    assert_eq!(validate_flat_filename("a\0b"), Err(FilenameError::ControlCharacter));
}

#[test]
fn test_join_flat_stays_inside_dir() {
    let dir = Path::new("/media/logos");
    assert_eq!(join_flat(dir, " main.svg"), Ok(PathBuf::from("/media/logos/main.svg")));
    assert_eq!(join_flat(dir, "../originals/x.png"), Err(FilenameError::ContainsPathSeparator));
}
