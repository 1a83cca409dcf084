//! Operation masks: the glob dialect used for filtering listings and for
//! composing target names in bulk operations.
//!
//! `?` matches one character, `*` any (possibly empty) run, and `#` one
//! digit when extended mode is on. Matching is case-insensitive. A group
//! string separates masks by `;` (escaped by doubling); `|` begins an
//! inverse sub-group whose matches produce a negative verdict.

use crate::error::PathError;

/// Match-all convention: `*.*` matches every name, dot or not.
const MATCH_ALL: &str = "*.*";

/// Single-mask match against a name.
pub fn mask_match(name: &str, mask: &str, extended: bool) -> bool {
    if mask == MATCH_ALL || mask == "*" {
        return true;
    }
    let name: Vec<char> = name.to_lowercase().chars().collect();
    let mask: Vec<char> = mask.to_lowercase().chars().collect();
    glob(&mask, &name, extended)
}

fn glob(mask: &[char], name: &[char], extended: bool) -> bool {
    match mask.first() {
        None => name.is_empty(),
        Some('*') => {
            // Any run, including empty.
            (0..=name.len()).any(|i| glob(&mask[1..], &name[i..], extended))
        }
        Some('?') => !name.is_empty() && glob(&mask[1..], &name[1..], extended),
        Some('#') if extended => {
            name.first().is_some_and(|c| c.is_ascii_digit()) && glob(&mask[1..], &name[1..], extended)
        }
        Some(c) => name.first() == Some(c) && glob(&mask[1..], &name[1..], extended),
    }
}

/// Compose a target name by applying an operation mask to a source name.
///
/// Name and mask are split at their last dot and the parts applied
/// positionally: a literal replaces the source character at the cursor, `?`
/// copies it, `*` copies the rest of the part. The dot is emitted only when
/// the applied extension is non-empty, so `*.*` is the identity and names
/// without a dot gain nothing.
pub fn mask_apply(name: &str, mask: &str) -> String {
    let (name_base, name_ext) = split_ext(name);
    let (mask_base, mask_ext) = split_ext(mask);

    let base = apply_part(name_base, mask_base);
    let ext = match mask_ext {
        Some(me) => apply_part(name_ext.unwrap_or(""), me),
        None => String::new(),
    };

    if ext.is_empty() {
        base
    } else {
        format!("{base}.{ext}")
    }
}

fn split_ext(s: &str) -> (&str, Option<&str>) {
    match s.rsplit_once('.') {
        Some((base, ext)) => (base, Some(ext)),
        None => (s, None),
    }
}

fn apply_part(source: &str, mask: &str) -> String {
    let src: Vec<char> = source.chars().collect();
    let mut out = String::new();
    let mut cursor = 0usize;
    for m in mask.chars() {
        match m {
            '*' => {
                out.extend(src[cursor.min(src.len())..].iter());
                cursor = src.len();
            }
            '?' => {
                if let Some(c) = src.get(cursor) {
                    out.push(*c);
                    cursor += 1;
                }
            }
            c => {
                out.push(c);
                cursor += 1;
            }
        }
    }
    out
}

/// A parsed mask group: positive masks plus an optional inverse sub-group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskGroup {
    positive: Vec<String>,
    negative: Vec<String>,
    extended: bool,
}

impl MaskGroup {
    /// Parse a group string. `;` separates masks (`;;` escapes a literal
    /// semicolon); the first `|` switches to the inverse sub-group.
    pub fn parse(spec: &str, extended: bool) -> Result<MaskGroup, PathError> {
        let mut positive = Vec::new();
        let mut negative = Vec::new();
        let mut inverse = false;
        let mut current = String::new();
        let mut chars = spec.chars().peekable();

        let mut push = |buf: &mut String, inverse: bool, pos: &mut Vec<String>, neg: &mut Vec<String>| {
            let mask = buf.trim().to_string();
            buf.clear();
            if !mask.is_empty() {
                if inverse {
                    neg.push(mask);
                } else {
                    pos.push(mask);
                }
            }
        };

        while let Some(c) = chars.next() {
            match c {
                ';' => {
                    if chars.peek() == Some(&';') {
                        chars.next();
                        current.push(';');
                    } else {
                        push(&mut current, inverse, &mut positive, &mut negative);
                    }
                }
                '|' => {
                    if inverse {
                        return Err(PathError::BadMask(spec.to_string()));
                    }
                    push(&mut current, inverse, &mut positive, &mut negative);
                    inverse = true;
                }
                c => current.push(c),
            }
        }
        push(&mut current, inverse, &mut positive, &mut negative);

        if positive.is_empty() && negative.is_empty() {
            return Err(PathError::BadMask(spec.to_string()));
        }
        Ok(MaskGroup {
            positive,
            negative,
            extended,
        })
    }

    /// Positive verdict: some positive mask matches (an empty positive set
    /// means match-all) and no inverse mask does.
    pub fn matches(&self, name: &str) -> bool {
        let pos = self.positive.is_empty()
            || self
                .positive
                .iter()
                .any(|m| mask_match(name, m, self.extended));
        pos && !self
            .negative
            .iter()
            .any(|m| mask_match(name, m, self.extended))
    }
}
