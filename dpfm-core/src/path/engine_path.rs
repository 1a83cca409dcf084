//! Tagged path values covering every navigable surface: local drives, UNC
//! shares, archive interiors and plugin file systems.
//!
//! Values are immutable and normalized on ingest: forward slashes become
//! backslashes, separator runs collapse (except the leading `\\` of UNC),
//! `.`/`..` segments are resolved, and every component is validated. Ingest
//! that cannot be normalized fails instead of producing a lossy value.

use std::fmt;

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::PathError;

static RESERVED_DEVICES: Lazy<Vec<String>> = Lazy::new(|| {
    let mut names: Vec<String> = ["CON", "PRN", "AUX", "NUL"]
        .iter()
        .map(|n| (*n).to_string())
        .collect();
    for i in 1..=9 {
        names.push(format!("COM{i}"));
        names.push(format!("LPT{i}"));
    }
    names
});

/// Platform limit for a fully composed path, in characters.
pub const PLATFORM_MAX_PATH: usize = 260;

/// Reparse-walk hop limit shared with the volume resolver.
pub const MAX_REPARSE_HOPS: usize = 50;

const SEP: char = '\\';

/// Structural path kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathKind {
    Disk,
    Unc,
    Archive,
    PluginFs,
}

/// A normalized path value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EnginePath {
    /// Local or mapped letter drive. `tail` is empty for the root and never
    /// carries leading or trailing separators.
    Disk { root: char, tail: String },

    /// `\\server\share\tail`; `tail` may be empty.
    Unc {
        server: String,
        share: String,
        tail: String,
    },

    /// A path into an archive file. The container is always Disk or UNC.
    Archive {
        container: Box<EnginePath>,
        interior: String,
    },

    /// `fs_name:user_part`; the name is owned by a registered plugin.
    PluginFs { fs_name: String, user_part: String },
}

/// Archive-association table consulted during classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveAssoc {
    exts: Vec<String>,
}

impl Default for ArchiveAssoc {
    fn default() -> Self {
        Self {
            exts: ["zip", "7z", "rar", "tar", "gz", "tgz", "cab", "jar", "iso"]
                .iter()
                .map(|e| (*e).to_string())
                .collect(),
        }
    }
}

impl ArchiveAssoc {
    pub fn new(exts: impl IntoIterator<Item = String>) -> Self {
        Self {
            exts: exts.into_iter().map(|e| e.to_lowercase()).collect(),
        }
    }

    /// Extension match, case-insensitive, on the last `.`-separated suffix.
    pub fn is_archive_name(&self, name: &str) -> bool {
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => {
                let ext = ext.to_lowercase();
                self.exts.iter().any(|e| *e == ext)
            }
            _ => false,
        }
    }
}

/// Remembered per-drive current directories, consulted for bare drive-letter
/// input and DOS-style drive-relative input (`C:foo`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriveDirs {
    map: FxHashMap<char, String>,
}

impl DriveDirs {
    /// Tail (no root, no separators at either end) last used on `drive`.
    pub fn get(&self, drive: char) -> Option<&str> {
        self.map
            .get(&drive.to_ascii_uppercase())
            .map(String::as_str)
    }

    pub fn remember(&mut self, drive: char, tail: &str) {
        self.map
            .insert(drive.to_ascii_uppercase(), tail.to_string());
    }
}

/// Context for resolving relative and drive-relative input.
#[derive(Clone, Copy)]
pub struct ParseContext<'a> {
    /// The panel's current path, if any.
    pub current: Option<&'a EnginePath>,
    pub drive_dirs: Option<&'a DriveDirs>,
    pub archives: &'a ArchiveAssoc,
}

impl<'a> ParseContext<'a> {
    pub fn bare(archives: &'a ArchiveAssoc) -> Self {
        Self {
            current: None,
            drive_dirs: None,
            archives,
        }
    }
}

/// Case-insensitive string equality (simple Unicode folding).
pub fn eq_ci(a: &str, b: &str) -> bool {
    if a.eq_ignore_ascii_case(b) {
        return true;
    }
    a.to_lowercase() == b.to_lowercase()
}

/// Per-segment validity: non-empty, not all dots or whitespace, no wildcard
/// or separator characters, no control characters, not a reserved device
/// name.
pub fn validate_component(s: &str) -> bool {
    if s.is_empty() || s.chars().all(|c| c == '.') || s.trim().is_empty() {
        return false;
    }
    if s.chars()
        .any(|c| matches!(c, '*' | '?' | '\\' | '/' | '<' | '>' | '|' | '"' | ':') || c < ' ')
    {
        return false;
    }
    !is_reserved_device(s)
}

fn is_reserved_device(s: &str) -> bool {
    let base = s.split('.').next().unwrap_or(s).trim_end();
    let upper = base.to_ascii_uppercase();
    RESERVED_DEVICES.iter().any(|n| *n == upper)
}

/// Repair a component so that `validate_component` accepts it.
pub fn make_valid_component(s: &str) -> String {
    let mut out: String = s
        .chars()
        .map(|c| {
            if matches!(c, '*' | '?' | '\\' | '/' | '<' | '>' | '|' | '"' | ':') || c < ' ' {
                '_'
            } else {
                c
            }
        })
        .collect();
    out = out.trim().trim_end_matches('.').to_string();
    if out.is_empty() || out.chars().all(|c| c == '.') {
        return "_".to_string();
    }
    if is_reserved_device(&out) {
        out.insert(0, '_');
    }
    out
}

/// Normalize a raw tail: separator conversion and collapse, `.`/`..`
/// resolution, per-component validation. `display` names the offending input
/// in errors.
fn normalize_tail(raw: &str, display: &str) -> Result<String, PathError> {
    let mut segments: Vec<&str> = Vec::new();
    for seg in raw.split(['\\', '/']) {
        match seg {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(PathError::PathIsInvalid(display.to_string()));
                }
            }
            s => {
                if !validate_component(s) {
                    return Err(PathError::InvalidPath(display.to_string()));
                }
                segments.push(s);
            }
        }
    }
    Ok(segments.join("\\"))
}

fn check_length(path: &EnginePath, display: &str) -> Result<(), PathError> {
    if path.to_string().chars().count() > PLATFORM_MAX_PATH {
        return Err(PathError::NameTooLong(display.to_string()));
    }
    Ok(())
}

/// Split a disk/UNC tail at the first archive-file segment.
fn detect_archive(
    base: EnginePath,
    archives: &ArchiveAssoc,
    display: &str,
) -> Result<EnginePath, PathError> {
    let tail = match &base {
        EnginePath::Disk { tail, .. } | EnginePath::Unc { tail, .. } => tail.clone(),
        _ => return Ok(base),
    };
    if tail.is_empty() {
        return Ok(base);
    }
    let segments: Vec<&str> = tail.split(SEP).collect();
    for (i, seg) in segments.iter().enumerate() {
        if archives.is_archive_name(seg) {
            let container_tail = segments[..=i].join("\\");
            let interior = segments[i + 1..].join("\\");
            let container = base.with_tail(container_tail);
            let path = EnginePath::Archive {
                container: Box::new(container),
                interior,
            };
            check_length(&path, display)?;
            return Ok(path);
        }
    }
    Ok(base)
}

impl EnginePath {
    /// Parse user input, absolute or relative, into a normalized path.
    ///
    /// Relative input resolves against the context's current path when that
    /// path is Disk or UNC; in an Archive context it resolves against the
    /// archive's container; in a PluginFS context (or with no context) it
    /// yields `IncompletePath`. Bare drive letters use the remembered
    /// per-drive directory.
    pub fn parse(input: &str, ctx: &ParseContext<'_>) -> Result<EnginePath, PathError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(PathError::IncompletePath(String::new()));
        }

        // Plugin-FS syntax: identifier of at least two characters before the
        // first colon. A single letter before the colon is a drive.
        if let Some(colon) = input.find(':') {
            let head = &input[..colon];
            if colon >= 2
                && head
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
                && head.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
            {
                let path = EnginePath::PluginFs {
                    fs_name: head.to_string(),
                    user_part: input[colon + 1..].to_string(),
                };
                check_length(&path, input)?;
                return Ok(path);
            }
        }

        let bytes = input.as_bytes();

        // Drive-letter forms: "X:", "X:\tail", "X:tail".
        if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
            let root = (bytes[0] as char).to_ascii_uppercase();
            let rest = &input[2..];
            let raw_tail = if rest.is_empty() {
                // Bare drive letter: remembered directory, else the root.
                ctx.drive_dirs
                    .and_then(|d| d.get(root))
                    .unwrap_or("")
                    .to_string()
            } else if rest.starts_with(['\\', '/']) {
                rest.to_string()
            } else {
                // DOS drive-relative input.
                let base = ctx.drive_dirs.and_then(|d| d.get(root)).unwrap_or("");
                if base.is_empty() {
                    rest.to_string()
                } else {
                    format!("{base}\\{rest}")
                }
            };
            let tail = normalize_tail(&raw_tail, input)?;
            let path = EnginePath::Disk { root, tail };
            check_length(&path, input)?;
            return detect_archive(path, ctx.archives, input);
        }

        // UNC: "\\server\share\tail".
        if input.starts_with("\\\\") || input.starts_with("//") {
            let body = &input[2..];
            let mut parts = body.splitn(3, ['\\', '/']);
            let server = parts.next().unwrap_or("");
            let share = parts.next().unwrap_or("");
            if server.is_empty() {
                return Err(PathError::InvalidPath(input.to_string()));
            }
            if share.is_empty() {
                return Err(PathError::ShareNameMissing(input.to_string()));
            }
            let tail = normalize_tail(parts.next().unwrap_or(""), input)?;
            let path = EnginePath::Unc {
                server: server.to_string(),
                share: share.to_string(),
                tail,
            };
            check_length(&path, input)?;
            return detect_archive(path, ctx.archives, input);
        }

        // Rooted-relative ("\tail") and plain relative input need a context.
        let current = match ctx.current {
            Some(c) => c,
            None => return Err(PathError::IncompletePath(input.to_string())),
        };

        if input.starts_with(['\\', '/']) {
            let base = match current {
                EnginePath::Disk { .. } | EnginePath::Unc { .. } => current.with_tail(String::new()),
                EnginePath::Archive { container, .. } => container.with_tail(String::new()),
                EnginePath::PluginFs { .. } => {
                    return Err(PathError::IncompletePath(input.to_string()))
                }
            };
            let tail = normalize_tail(input, input)?;
            let path = base.with_tail(tail);
            check_length(&path, input)?;
            return detect_archive(path, ctx.archives, input);
        }

        // Plain relative input.
        let (base, base_tail) = match current {
            EnginePath::Disk { tail, .. } | EnginePath::Unc { tail, .. } => {
                (current.clone(), tail.clone())
            }
            EnginePath::Archive { container, .. } => {
                let tail = container.tail().to_string();
                ((**container).clone(), tail)
            }
            EnginePath::PluginFs { .. } => {
                return Err(PathError::IncompletePath(input.to_string()))
            }
        };
        let raw = if base_tail.is_empty() {
            input.to_string()
        } else {
            format!("{base_tail}\\{input}")
        };
        let tail = normalize_tail(&raw, input)?;
        let path = base.with_tail(tail);
        check_length(&path, input)?;
        detect_archive(path, ctx.archives, input)
    }

    /// Structural kind of this value.
    pub fn kind(&self) -> PathKind {
        match self {
            EnginePath::Disk { .. } => PathKind::Disk,
            EnginePath::Unc { .. } => PathKind::Unc,
            EnginePath::Archive { .. } => PathKind::Archive,
            EnginePath::PluginFs { .. } => PathKind::PluginFs,
        }
    }

    pub fn is_root(&self) -> bool {
        match self {
            EnginePath::Disk { tail, .. } | EnginePath::Unc { tail, .. } => tail.is_empty(),
            EnginePath::Archive { interior, .. } => interior.is_empty(),
            EnginePath::PluginFs { user_part, .. } => {
                user_part.trim_matches(['\\', '/']).is_empty()
            }
        }
    }

    /// The tail/interior/user-part string of this value.
    pub fn tail(&self) -> &str {
        match self {
            EnginePath::Disk { tail, .. } | EnginePath::Unc { tail, .. } => tail,
            EnginePath::Archive { interior, .. } => interior,
            EnginePath::PluginFs { user_part, .. } => user_part,
        }
    }

    /// Same variant and root, new tail. Panics never; archives replace the
    /// interior, plugin paths the user part.
    pub fn with_tail(&self, new_tail: String) -> EnginePath {
        match self {
            EnginePath::Disk { root, .. } => EnginePath::Disk {
                root: *root,
                tail: new_tail,
            },
            EnginePath::Unc { server, share, .. } => EnginePath::Unc {
                server: server.clone(),
                share: share.clone(),
                tail: new_tail,
            },
            EnginePath::Archive { container, .. } => EnginePath::Archive {
                container: container.clone(),
                interior: new_tail,
            },
            EnginePath::PluginFs { fs_name, .. } => EnginePath::PluginFs {
                fs_name: fs_name.clone(),
                user_part: new_tail,
            },
        }
    }

    /// The root form of this path (empty tail).
    pub fn root_of(&self) -> EnginePath {
        self.with_tail(String::new())
    }

    /// Tail segments; empty for roots.
    pub fn segments(&self) -> Vec<&str> {
        let tail = self.tail();
        if tail.is_empty() {
            Vec::new()
        } else {
            tail.split(['\\', '/']).filter(|s| !s.is_empty()).collect()
        }
    }

    /// Case-insensitive whole-path equality.
    pub fn same_path(&self, other: &EnginePath) -> bool {
        self.same_root(other) && {
            let a = self.segments();
            let b = other.segments();
            a.len() == b.len() && a.iter().zip(&b).all(|(x, y)| eq_ci(x, y))
        }
    }

    fn same_root(&self, other: &EnginePath) -> bool {
        match (self, other) {
            (EnginePath::Disk { root: a, .. }, EnginePath::Disk { root: b, .. }) => {
                a.eq_ignore_ascii_case(b)
            }
            (
                EnginePath::Unc {
                    server: s1,
                    share: h1,
                    ..
                },
                EnginePath::Unc {
                    server: s2,
                    share: h2,
                    ..
                },
            ) => eq_ci(s1, s2) && eq_ci(h1, h2),
            (
                EnginePath::Archive { container: c1, .. },
                EnginePath::Archive { container: c2, .. },
            ) => c1.same_path(c2),
            (
                EnginePath::PluginFs { fs_name: f1, .. },
                EnginePath::PluginFs { fs_name: f2, .. },
            ) => eq_ci(f1, f2),
            _ => false,
        }
    }

    /// Structural ancestry test, case-insensitive. A path is a prefix of
    /// itself.
    pub fn is_prefix(&self, other: &EnginePath) -> bool {
        if !self.same_root(other) {
            return false;
        }
        let mine = self.segments();
        let theirs = other.segments();
        mine.len() <= theirs.len() && mine.iter().zip(&theirs).all(|(a, b)| eq_ci(a, b))
    }

    /// Character length of the shared directory prefix. Partial segment
    /// overlaps do not count; UNC roots require both server and share to
    /// match.
    pub fn common_prefix_len(&self, other: &EnginePath) -> usize {
        if !self.same_root(other) {
            return 0;
        }
        let mine = self.segments();
        let theirs = other.segments();
        let mut matched: Vec<&str> = Vec::new();
        for (a, b) in mine.iter().zip(&theirs) {
            if !eq_ci(a, b) {
                break;
            }
            matched.push(a);
        }
        // Measure the materialized prefix so every variant's own joining
        // rules apply.
        self.with_tail(matched.join("\\")).to_string().chars().count()
    }

    /// Remove the last segment. Fails for any root.
    pub fn cut_last_segment(&self) -> Result<(EnginePath, String), PathError> {
        let tail = self.tail();
        let trimmed = tail.trim_matches(['\\', '/']);
        if trimmed.is_empty() {
            return Err(PathError::NoShorter);
        }
        match trimmed.rsplit_once(['\\', '/']) {
            Some((parent, cut)) => Ok((self.with_tail(parent.to_string()), cut.to_string())),
            None => Ok((self.with_tail(String::new()), trimmed.to_string())),
        }
    }

    /// Append one validated component.
    pub fn append(&self, name: &str) -> Result<EnginePath, PathError> {
        if !validate_component(name) {
            return Err(PathError::InvalidPath(name.to_string()));
        }
        let tail = self.tail();
        let new_tail = if tail.is_empty() {
            name.to_string()
        } else {
            format!("{tail}\\{name}")
        };
        let path = self.with_tail(new_tail);
        check_length(&path, name)?;
        Ok(path)
    }

    /// Native filesystem path for Disk/UNC values (and archive containers).
    pub fn to_native(&self) -> Option<std::path::PathBuf> {
        match self {
            EnginePath::Disk { .. } | EnginePath::Unc { .. } => {
                Some(std::path::PathBuf::from(self.to_string()))
            }
            EnginePath::Archive { container, .. } => container.to_native(),
            EnginePath::PluginFs { .. } => None,
        }
    }
}

impl fmt::Display for EnginePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnginePath::Disk { root, tail } => {
                if tail.is_empty() {
                    write!(f, "{root}:\\")
                } else {
                    write!(f, "{root}:\\{tail}")
                }
            }
            EnginePath::Unc {
                server,
                share,
                tail,
            } => {
                if tail.is_empty() {
                    write!(f, "\\\\{server}\\{share}")
                } else {
                    write!(f, "\\\\{server}\\{share}\\{tail}")
                }
            }
            EnginePath::Archive {
                container,
                interior,
            } => {
                if interior.is_empty() {
                    write!(f, "{container}")
                } else {
                    write!(f, "{container}\\{interior}")
                }
            }
            EnginePath::PluginFs { fs_name, user_part } => write!(f, "{fs_name}:{user_part}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(archives: &ArchiveAssoc) -> ParseContext<'_> {
        ParseContext::bare(archives)
    }

    #[test]
    fn parse_disk_roundtrip() {
        let archives = ArchiveAssoc::default();
        for input in ["C:\\", "C:\\proj\\src", "d:/mixed/seps\\here"] {
            let p = EnginePath::parse(input, &ctx(&archives)).unwrap();
            let reparsed = EnginePath::parse(&p.to_string(), &ctx(&archives)).unwrap();
            assert_eq!(p, reparsed);
            assert_eq!(p.kind(), reparsed.kind());
        }
    }

    #[test]
    fn parse_unc_and_plugin_roundtrip() {
        let archives = ArchiveAssoc::default();
        for input in ["\\\\srv\\share", "\\\\srv\\share\\a\\b", "ftp:host/a/b"] {
            let p = EnginePath::parse(input, &ctx(&archives)).unwrap();
            let reparsed = EnginePath::parse(&p.to_string(), &ctx(&archives)).unwrap();
            assert_eq!(p, reparsed);
        }
    }

    #[test]
    fn parse_archive_structurally() {
        let archives = ArchiveAssoc::default();
        let p = EnginePath::parse("C:\\data\\pack.zip\\inner\\f.txt", &ctx(&archives)).unwrap();
        match &p {
            EnginePath::Archive {
                container,
                interior,
            } => {
                assert_eq!(container.to_string(), "C:\\data\\pack.zip");
                assert_eq!(interior, "inner\\f.txt");
            }
            other => panic!("expected archive, got {other:?}"),
        }
        let reparsed = EnginePath::parse(&p.to_string(), &ctx(&archives)).unwrap();
        assert_eq!(p, reparsed);
    }

    #[test]
    fn empty_input_is_incomplete() {
        let archives = ArchiveAssoc::default();
        assert!(matches!(
            EnginePath::parse("", &ctx(&archives)),
            Err(PathError::IncompletePath(_))
        ));
    }

    #[test]
    fn unc_without_share_is_rejected() {
        let archives = ArchiveAssoc::default();
        assert!(matches!(
            EnginePath::parse("\\\\server", &ctx(&archives)),
            Err(PathError::ShareNameMissing(_))
        ));
    }

    #[test]
    fn over_pop_past_root_fails() {
        let archives = ArchiveAssoc::default();
        assert!(matches!(
            EnginePath::parse("C:\\a\\..\\..", &ctx(&archives)),
            Err(PathError::PathIsInvalid(_))
        ));
    }

    #[test]
    fn dot_segments_collapse() {
        let archives = ArchiveAssoc::default();
        let p = EnginePath::parse("C:\\a\\.\\b\\..\\c", &ctx(&archives)).unwrap();
        assert_eq!(p.to_string(), "C:\\a\\c");
    }

    #[test]
    fn relative_resolves_against_disk_context() {
        let archives = ArchiveAssoc::default();
        let cur = EnginePath::parse("C:\\proj\\src", &ctx(&archives)).unwrap();
        let parse_ctx = ParseContext {
            current: Some(&cur),
            drive_dirs: None,
            archives: &archives,
        };
        assert_eq!(
            EnginePath::parse("..\\docs", &parse_ctx).unwrap().to_string(),
            "C:\\proj\\docs"
        );
        assert_eq!(
            EnginePath::parse("\\other", &parse_ctx).unwrap().to_string(),
            "C:\\other"
        );
    }

    #[test]
    fn relative_in_plugin_context_is_incomplete() {
        let archives = ArchiveAssoc::default();
        let cur = EnginePath::parse("ftp:host/a", &ctx(&archives)).unwrap();
        let parse_ctx = ParseContext {
            current: Some(&cur),
            drive_dirs: None,
            archives: &archives,
        };
        assert!(matches!(
            EnginePath::parse("sub", &parse_ctx),
            Err(PathError::IncompletePath(_))
        ));
    }

    #[test]
    fn bare_drive_uses_remembered_directory() {
        let archives = ArchiveAssoc::default();
        let mut dirs = DriveDirs::default();
        dirs.remember('c', "work\\deep");
        let parse_ctx = ParseContext {
            current: None,
            drive_dirs: Some(&dirs),
            archives: &archives,
        };
        assert_eq!(
            EnginePath::parse("c:", &parse_ctx).unwrap().to_string(),
            "C:\\work\\deep"
        );
        assert_eq!(
            EnginePath::parse("c:more", &parse_ctx).unwrap().to_string(),
            "C:\\work\\deep\\more"
        );
    }

    #[test]
    fn length_boundary() {
        let archives = ArchiveAssoc::default();
        // "C:\" plus tail: total exactly at the limit succeeds.
        let tail = "a".repeat(PLATFORM_MAX_PATH - 3);
        let ok = format!("C:\\{tail}");
        assert!(EnginePath::parse(&ok, &ctx(&archives)).is_ok());
        let too_long = format!("C:\\{tail}b");
        assert!(matches!(
            EnginePath::parse(&too_long, &ctx(&archives)),
            Err(PathError::NameTooLong(_))
        ));
    }

    #[test]
    fn cut_last_segment_roots() {
        let archives = ArchiveAssoc::default();
        let disk_root = EnginePath::parse("C:\\", &ctx(&archives)).unwrap();
        assert!(matches!(
            disk_root.cut_last_segment(),
            Err(PathError::NoShorter)
        ));
        let unc_root = EnginePath::parse("\\\\srv\\share", &ctx(&archives)).unwrap();
        assert!(matches!(
            unc_root.cut_last_segment(),
            Err(PathError::NoShorter)
        ));
    }

    #[test]
    fn cut_and_append_are_inverse() {
        let archives = ArchiveAssoc::default();
        let p = EnginePath::parse("C:\\a\\b\\c", &ctx(&archives)).unwrap();
        let (parent, cut) = p.cut_last_segment().unwrap();
        assert_eq!(parent.to_string(), "C:\\a\\b");
        assert_eq!(cut, "c");
        assert_eq!(parent.append(&cut).unwrap(), p);
    }

    #[test]
    fn prefix_laws() {
        let archives = ArchiveAssoc::default();
        let a = EnginePath::parse("C:\\a\\b", &ctx(&archives)).unwrap();
        let b = EnginePath::parse("c:\\A\\B\\c", &ctx(&archives)).unwrap();
        assert!(a.is_prefix(&b));
        assert!(!b.is_prefix(&a));
        // Mutual prefix iff same path.
        let c = EnginePath::parse("c:\\A\\B", &ctx(&archives)).unwrap();
        assert!(a.is_prefix(&c) && c.is_prefix(&a));
        assert!(a.same_path(&c));
    }

    #[test]
    fn common_prefix_length() {
        let archives = ArchiveAssoc::default();
        let a = EnginePath::parse("C:\\proj\\src", &ctx(&archives)).unwrap();
        let b = EnginePath::parse("C:\\proj\\docs", &ctx(&archives)).unwrap();
        // "C:\proj" is 7 characters.
        assert_eq!(a.common_prefix_len(&b), 7);
        assert_eq!(a.common_prefix_len(&a), a.to_string().chars().count());
        let root = EnginePath::parse("C:\\", &ctx(&archives)).unwrap();
        assert_eq!(root.common_prefix_len(&root), 3);
        let u1 = EnginePath::parse("\\\\s\\share\\x", &ctx(&archives)).unwrap();
        let u2 = EnginePath::parse("\\\\s\\other\\x", &ctx(&archives)).unwrap();
        assert_eq!(u1.common_prefix_len(&u2), 0);
    }

    #[test]
    fn component_validation() {
        assert!(validate_component("file.txt"));
        assert!(!validate_component(""));
        assert!(!validate_component("..."));
        assert!(!validate_component("   "));
        assert!(!validate_component("a*b"));
        assert!(!validate_component("con"));
        assert!(!validate_component("COM1.txt"));
        assert!(validate_component("COM0"));
        assert_eq!(make_valid_component("a*b?"), "a_b_");
        assert_eq!(make_valid_component("con"), "_con");
        assert_eq!(make_valid_component("..."), "_");
    }
}
