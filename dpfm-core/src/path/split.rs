//! Target splitting for Copy/Move/Pack target entry: find the longest
//! existing prefix of user input, the segment run still to be created, and
//! the operation mask.

use crate::{
    error::{EngineError, FsError, PathError},
    path::{
        engine_path::{EnginePath, ParseContext, PathKind},
        probe::{PathProbe, Probe},
    },
};

/// Result of splitting a target path for a bulk operation.
#[derive(Debug, Clone)]
pub struct OperationTarget {
    /// Longest prefix of the input that exists on disk.
    pub existing_prefix: EnginePath,
    /// Backslash-joined segments below the prefix still to be created.
    pub to_create: String,
    /// Operation mask; `*.*` when the input carried no wildcard token.
    pub mask: String,
    pub kind: PathKind,
    /// The existing prefix is a directory.
    pub is_dir: bool,
    /// The existing prefix is an archive file; the operation writes into it.
    pub into_archive: bool,
}

/// Split user-entered target input.
///
/// A trailing token containing `*` or `?` becomes the mask. With a single
/// selected source, a sole missing trailing segment is interpreted as a
/// rename mask instead of a directory to create.
pub fn split_for_operation<P: PathProbe + ?Sized>(
    input: &str,
    ctx: &ParseContext<'_>,
    probe: &P,
    selection_count: usize,
) -> Result<OperationTarget, EngineError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(PathError::IncompletePath(String::new()).into());
    }

    // Peel a wildcard mask off the end before parsing; wildcard characters
    // never survive component validation.
    let (path_part, mask) = match input.trim_end_matches(['\\', '/']).rsplit_once(['\\', '/'])
    {
        Some((head, token)) if token.contains(['*', '?']) => {
            (head.to_string(), token.to_string())
        }
        None if input.contains(['*', '?']) => (String::new(), input.to_string()),
        _ => (input.to_string(), "*.*".to_string()),
    };

    let parsed = if path_part.is_empty() {
        match ctx.current {
            Some(cur) => cur.clone(),
            None => return Err(PathError::IncompletePath(input.to_string()).into()),
        }
    } else {
        EnginePath::parse(&path_part, ctx)?
    };

    // Archive paths probe their container; the interior is the plugin
    // archiver's business.
    if let EnginePath::Archive {
        container,
        interior,
    } = &parsed
    {
        return match probe.probe(container) {
            Probe::File => Ok(OperationTarget {
                existing_prefix: parsed.clone(),
                to_create: String::new(),
                mask,
                kind: PathKind::Archive,
                is_dir: false,
                into_archive: true,
            }),
            Probe::Dir => {
                // A directory that merely looks like an archive: fold the
                // interior back into a plain disk path and retry.
                let tail = if interior.is_empty() {
                    container.tail().to_string()
                } else if container.tail().is_empty() {
                    interior.clone()
                } else {
                    format!("{}\\{interior}", container.tail())
                };
                let folded = container.with_tail(tail);
                split_existing(folded, mask, probe, selection_count, ctx)
            }
            Probe::Denied => Err(FsError::not_accessible(container.to_string()).into()),
            Probe::Missing => Err(PathError::InvalidPath(input.to_string()).into()),
        };
    }

    if matches!(parsed, EnginePath::PluginFs { .. }) {
        // Plugin targets are not probed; the provider owns their namespace.
        return Ok(OperationTarget {
            existing_prefix: parsed,
            to_create: String::new(),
            mask,
            kind: PathKind::PluginFs,
            is_dir: true,
            into_archive: false,
        });
    }

    split_existing(parsed, mask, probe, selection_count, ctx)
}

fn split_existing<P: PathProbe + ?Sized>(
    parsed: EnginePath,
    mask: String,
    probe: &P,
    selection_count: usize,
    ctx: &ParseContext<'_>,
) -> Result<OperationTarget, EngineError> {
    let mut cur = parsed;
    let mut cut: Vec<String> = Vec::new();

    let found = loop {
        match probe.probe(&cur) {
            Probe::Missing => match cur.cut_last_segment() {
                Ok((parent, seg)) => {
                    cut.push(seg);
                    cur = parent;
                }
                Err(_) => {
                    return Err(FsError::not_accessible(cur.to_string()).into());
                }
            },
            other => break other,
        }
    };
    cut.reverse();

    match found {
        Probe::Denied => Err(FsError::not_accessible(cur.to_string()).into()),
        Probe::File => {
            if ctx.archives.is_archive_name(cur.segments().last().unwrap_or(&"")) {
                // Into-archive: the remainder is the interior path.
                Ok(OperationTarget {
                    kind: PathKind::Archive,
                    is_dir: false,
                    into_archive: true,
                    to_create: cut.join("\\"),
                    mask,
                    existing_prefix: cur,
                })
            } else if cut.is_empty() {
                // The full target names an existing file: its parent is the
                // target directory and the file name the rename mask.
                let (parent, name) = cur.cut_last_segment()?;
                Ok(OperationTarget {
                    kind: parent.kind(),
                    is_dir: true,
                    into_archive: false,
                    to_create: String::new(),
                    mask: name,
                    existing_prefix: parent,
                })
            } else {
                Err(FsError::NotAnArchive(cur.to_string()).into())
            }
        }
        _dir => {
            if cut.len() == 1 && selection_count == 1 && mask == "*.*" {
                // Single missing trailing segment, single source: rename.
                Ok(OperationTarget {
                    kind: cur.kind(),
                    is_dir: true,
                    into_archive: false,
                    to_create: String::new(),
                    mask: cut.remove(0),
                    existing_prefix: cur,
                })
            } else {
                Ok(OperationTarget {
                    kind: cur.kind(),
                    is_dir: true,
                    into_archive: false,
                    to_create: cut.join("\\"),
                    mask,
                    existing_prefix: cur,
                })
            }
        }
    }
}
