//! File path values: a root directory plus a relative path.

use std::fmt;

/// Root directory a [`FilePath`] is relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[repr(u8)]
pub enum GameDirectory {
    #[default]
    Unknown = 0,
    Config = 1,
    Content = 2,
    Log = 3,
    Save = 4,
    Tools = 5,
    Videos = 6,
}

impl GameDirectory {
    const ALL: [GameDirectory; 6] = [
        GameDirectory::Config,
        GameDirectory::Content,
        GameDirectory::Log,
        GameDirectory::Save,
        GameDirectory::Tools,
        GameDirectory::Videos,
    ];

    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        if value == 0 {
            return Some(GameDirectory::Unknown);
        }
        Self::ALL.get(usize::from(value) - 1).copied()
    }

    /// URL scheme prefix, e.g. `config://`. Empty for `Unknown`.
    #[must_use]
    pub fn scheme(self) -> &'static str {
        match self {
            GameDirectory::Unknown => "",
            GameDirectory::Config => "config://",
            GameDirectory::Content => "content://",
            GameDirectory::Log => "log://",
            GameDirectory::Save => "save://",
            GameDirectory::Tools => "tools://",
            GameDirectory::Videos => "videos://",
        }
    }
}

/// A path relative to a [`GameDirectory`].
///
/// Separators are normalized to `/`. Paths compare case-insensitively on the
/// relative part, see [`FilePath::same_file`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FilePath {
    directory: GameDirectory,
    relative: String,
}

impl FilePath {
    #[must_use]
    pub fn new(directory: GameDirectory, relative: &str) -> Self {
        FilePath {
            directory,
            relative: relative.replace('\\', "/"),
        }
    }

    /// Parse a `dir://relative` URL. Unknown schemes return `None`.
    #[must_use]
    pub fn parse(url: &str) -> Option<Self> {
        GameDirectory::ALL.iter().find_map(|&dir| {
            let scheme = dir.scheme();
            let prefix = url.get(..scheme.len())?;
            if prefix.eq_ignore_ascii_case(scheme) {
                Some(FilePath::new(dir, &url[scheme.len()..]))
            } else {
                None
            }
        })
    }

    #[inline]
    #[must_use]
    pub fn directory(&self) -> GameDirectory {
        self.directory
    }

    #[inline]
    #[must_use]
    pub fn relative(&self) -> &str {
        &self.relative
    }

    /// A path is valid when it names a known directory.
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.directory != GameDirectory::Unknown
    }

    /// `dir://relative`, or an empty string for an invalid path.
    #[must_use]
    pub fn to_url(&self) -> String {
        if !self.is_valid() {
            return String::new();
        }
        format!("{}{}", self.directory.scheme(), self.relative)
    }

    /// Same directory and same relative path ignoring ASCII case.
    #[must_use]
    pub fn same_file(&self, other: &FilePath) -> bool {
        self.directory == other.directory && self.relative.eq_ignore_ascii_case(&other.relative)
    }
}

impl fmt::Display for FilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_url())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_url() {
        let path = FilePath::parse("config://Hi").unwrap();
        assert_eq!(path.directory(), GameDirectory::Config);
        assert_eq!(path.relative(), "Hi");
        assert_eq!(path.to_url(), "config://Hi");
    }

    #[test]
    fn test_parse_normalizes_separators_and_scheme_case() {
        let path = FilePath::parse("Content://Textures\\ui\\button.png").unwrap();
        assert_eq!(path.directory(), GameDirectory::Content);
        assert_eq!(path.relative(), "Textures/ui/button.png");
    }

    #[test]
    fn test_parse_rejects_unknown_scheme() {
        assert_eq!(FilePath::parse("http://example.com"), None);
        assert_eq!(FilePath::parse("plain text"), None);
        assert_eq!(FilePath::parse(""), None);
    }

    #[test]
    fn test_invalid_path() {
        let path = FilePath::default();
        assert!(!path.is_valid());
        assert_eq!(path.to_url(), "");
    }

    #[test]
    fn test_same_file_ignores_case() {
        let a = FilePath::new(GameDirectory::Save, "Slot1.dat");
        let b = FilePath::new(GameDirectory::Save, "slot1.DAT");
        let c = FilePath::new(GameDirectory::Log, "slot1.dat");
        assert!(a.same_file(&b));
        assert!(!a.same_file(&c));
    }

    #[test]
    fn test_directory_codes() {
        for code in 0..=6u8 {
            assert_eq!(GameDirectory::from_u8(code).map(|d| d as u8), Some(code));
        }
        assert_eq!(GameDirectory::from_u8(7), None);
    }
}
