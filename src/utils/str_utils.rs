use std::collections::BTreeSet;
use std::path::Path;

pub trait StringExtensions {
    /// Normalize a tag for storage: trimmed, lowercased, comma-free.
    /// E.g. `" Sunset,Beach "` becomes `"sunsetbeach"`.
    fn normalize_tag(&self) -> String;

    /// Replace everything outside printable ASCII (and the characters that would break a quoted
    /// header value) with `_`.
    fn to_ascii_lossy(&self) -> String;
}

impl StringExtensions for str {
    fn normalize_tag(&self) -> String {
        self.trim()
            .chars()
            .filter(|c| *c != ',')
            .flat_map(char::to_lowercase)
            .collect::<String>()
            .trim()
            .to_string()
    }

    fn to_ascii_lossy(&self) -> String {
        self.chars()
            .map(|c| match c {
                '"' | '\\' => '_',
                c if c.is_ascii_graphic() || c == ' ' => c,
                _ => '_',
            })
            .collect()
    }
}

impl StringExtensions for String {
    fn normalize_tag(&self) -> String {
        self.as_str().normalize_tag()
    }

    fn to_ascii_lossy(&self) -> String {
        self.as_str().to_ascii_lossy()
    }
}

/// Split a comma separated tag list and normalize every entry, dropping empties and duplicates.
pub fn parse_tag_list(raw: &str) -> BTreeSet<String> {
    normalize_tags(raw.split(','))
}

pub fn normalize_tags<I, T>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    tags.into_iter()
        .map(|tag| tag.as_ref().normalize_tag())
        .filter(|tag| !tag.is_empty())
        .collect()
}

/// Lowercased extension of `filename`, only when it is short and alphanumeric.
pub fn file_extension(filename: &str) -> Option<String> {
    let ext = Path::new(filename).extension()?.to_str()?;
    if ext.is_empty() || ext.len() > 10 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[test]
fn test_normalize_tag() {
    assert_eq!(" Sunset ".normalize_tag(), "sunset");
    assert_eq!("Beach,Party".normalize_tag(), "beachparty");
    assert_eq!(" , ".normalize_tag(), "");
    assert_eq!("ÉTÉ".normalize_tag(), "été");
}

#[test]
fn test_parse_tag_list() {
    let tags = parse_tag_list("cat, Dog,,cat ,  ");
    assert_eq!(tags.into_iter().collect::<Vec<_>>(), vec!["cat".to_string(), "dog".to_string()]);
}

#[test]
fn test_to_ascii_lossy() {
    assert_eq!("résumé \"final\".pdf".to_ascii_lossy(), "r_sum_ _final_.pdf");
    assert_eq!("plain.png".to_ascii_lossy(), "plain.png");
}

#[test]
fn test_file_extension() {
    assert_eq!(file_extension("photo.JPG"), Some("jpg".to_string()));
    assert_eq!(file_extension("archive.tar.gz"), Some("gz".to_string()));
    assert_eq!(file_extension("noext"), None);
    assert_eq!(file_extension("weird.ex t"), None);
}
