//! Depth-first plan building: one entry per primitive, target names subject
//! to the operation mask.

use std::{
    io,
    path::{Path, PathBuf},
};

use tracing::warn;
use walkdir::WalkDir;

use crate::{
    ops::operation::{AttrChange, OpKind, Operation},
    path::mask::mask_apply,
};

#[derive(Debug, Clone)]
pub enum PlanAction {
    CreateDir {
        target: PathBuf,
    },
    CopyFile {
        source: PathBuf,
        target: PathBuf,
        size: u64,
    },
    MoveFile {
        source: PathBuf,
        target: PathBuf,
        size: u64,
    },
    RemoveFile {
        path: PathBuf,
    },
    RemoveDir {
        path: PathBuf,
    },
    SetAttrs {
        path: PathBuf,
        attr: AttrChange,
    },
    PackFile {
        archive: PathBuf,
        interior: String,
        source: PathBuf,
        size: u64,
    },
    UnpackAll {
        archive: PathBuf,
        dest: PathBuf,
    },
}

impl PlanAction {
    /// Path shown in progress and dialogs.
    pub fn display_path(&self) -> &Path {
        match self {
            PlanAction::CreateDir { target } => target,
            PlanAction::CopyFile { source, .. } | PlanAction::MoveFile { source, .. } => source,
            PlanAction::RemoveFile { path }
            | PlanAction::RemoveDir { path }
            | PlanAction::SetAttrs { path, .. } => path,
            PlanAction::PackFile { source, .. } => source,
            PlanAction::UnpackAll { archive, .. } => archive,
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            PlanAction::CreateDir { .. } => "create directory",
            PlanAction::CopyFile { .. } => "copy",
            PlanAction::MoveFile { .. } => "move",
            PlanAction::RemoveFile { .. } | PlanAction::RemoveDir { .. } => "delete",
            PlanAction::SetAttrs { .. } => "change attributes",
            PlanAction::PackFile { .. } => "pack",
            PlanAction::UnpackAll { .. } => "unpack",
        }
    }
}

#[derive(Debug, Default)]
pub struct OperationPlan {
    pub entries: Vec<PlanAction>,
    pub bytes_total: u64,
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn masked(name: &str, mask: &str) -> String {
    mask_apply(name, mask)
}

/// Enumerate sources depth-first into a plan. Unreadable subtree entries
/// are logged and skipped; the primitives themselves surface their own
/// failures through the error policy at execution time.
pub fn build_plan(op: &Operation) -> io::Result<OperationPlan> {
    let mut plan = OperationPlan::default();
    match op.kind {
        OpKind::Copy | OpKind::Move => plan_transfer(op, &mut plan),
        OpKind::Delete => plan_delete(op, &mut plan),
        OpKind::Attr => plan_attrs(op, &mut plan),
        OpKind::Pack => plan_pack(op, &mut plan)?,
        OpKind::Unpack => plan_unpack(op, &mut plan),
    }
    plan.bytes_total = plan
        .entries
        .iter()
        .map(|e| match e {
            PlanAction::CopyFile { size, .. }
            | PlanAction::MoveFile { size, .. }
            | PlanAction::PackFile { size, .. } => *size,
            _ => 0,
        })
        .sum();
    Ok(plan)
}

fn transfer_entry(kind: OpKind, source: PathBuf, target: PathBuf, size: u64) -> PlanAction {
    match kind {
        OpKind::Move => PlanAction::MoveFile {
            source,
            target,
            size,
        },
        _ => PlanAction::CopyFile {
            source,
            target,
            size,
        },
    }
}

fn plan_transfer(op: &Operation, plan: &mut OperationPlan) {
    let Some(target_dir) = &op.target else { return };
    let mask = &op.options.mask;

    if !target_dir.exists() {
        plan.entries.push(PlanAction::CreateDir {
            target: target_dir.clone(),
        });
    }

    for source in &op.sources {
        let meta = match std::fs::symlink_metadata(source) {
            Ok(m) => m,
            Err(e) => {
                // Leave a primitive in the plan; the worker surfaces the
                // error through the policy machine.
                warn!(source = %source.display(), error = %e, "source not enumerable");
                plan.entries.push(transfer_entry(
                    op.kind,
                    source.clone(),
                    target_dir.join(masked(&file_name(source), mask)),
                    0,
                ));
                continue;
            }
        };

        if meta.is_file() {
            plan.entries.push(transfer_entry(
                op.kind,
                source.clone(),
                target_dir.join(masked(&file_name(source), mask)),
                meta.len(),
            ));
            continue;
        }

        // Directory: create the top, then walk depth-first, directories
        // before their contents. Directory names are not subject to the
        // mask; file names are.
        let top = target_dir.join(file_name(source));
        plan.entries.push(PlanAction::CreateDir { target: top.clone() });
        let mut source_dirs: Vec<PathBuf> = vec![source.clone()];

        for dirent in WalkDir::new(source).min_depth(1) {
            let dirent = match dirent {
                Ok(d) => d,
                Err(e) => {
                    warn!(source = %source.display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            let rel = match dirent.path().strip_prefix(source) {
                Ok(r) => r,
                Err(_) => continue,
            };
            if dirent.file_type().is_dir() {
                plan.entries.push(PlanAction::CreateDir {
                    target: top.join(rel),
                });
                source_dirs.push(dirent.path().to_path_buf());
            } else {
                let parent = rel.parent().unwrap_or_else(|| Path::new(""));
                let target = top.join(parent).join(masked(&file_name(dirent.path()), mask));
                plan.entries.push(transfer_entry(
                    op.kind,
                    dirent.path().to_path_buf(),
                    target,
                    dirent.metadata().map(|m| m.len()).unwrap_or(0),
                ));
            }
        }

        if op.kind == OpKind::Move {
            // Source directories go away deepest-first once emptied.
            for dir in source_dirs.into_iter().rev() {
                plan.entries.push(PlanAction::RemoveDir { path: dir });
            }
        }
    }
}

fn plan_delete(op: &Operation, plan: &mut OperationPlan) {
    for source in &op.sources {
        let meta = match std::fs::symlink_metadata(source) {
            Ok(m) => m,
            Err(_) => {
                plan.entries.push(PlanAction::RemoveFile {
                    path: source.clone(),
                });
                continue;
            }
        };
        if !meta.is_dir() {
            plan.entries.push(PlanAction::RemoveFile {
                path: source.clone(),
            });
            continue;
        }
        // Post-order so directories empty out before their removal.
        for dirent in WalkDir::new(source).min_depth(1).contents_first(true) {
            let Ok(dirent) = dirent else { continue };
            if dirent.file_type().is_dir() {
                plan.entries.push(PlanAction::RemoveDir {
                    path: dirent.path().to_path_buf(),
                });
            } else {
                plan.entries.push(PlanAction::RemoveFile {
                    path: dirent.path().to_path_buf(),
                });
            }
        }
        plan.entries.push(PlanAction::RemoveDir {
            path: source.clone(),
        });
    }
}

fn plan_attrs(op: &Operation, plan: &mut OperationPlan) {
    let attr = op.options.attr.unwrap_or_default();
    for source in &op.sources {
        plan.entries.push(PlanAction::SetAttrs {
            path: source.clone(),
            attr,
        });
        if source.is_dir() {
            for dirent in WalkDir::new(source).min_depth(1) {
                let Ok(dirent) = dirent else { continue };
                plan.entries.push(PlanAction::SetAttrs {
                    path: dirent.path().to_path_buf(),
                    attr,
                });
            }
        }
    }
}

fn plan_pack(op: &Operation, plan: &mut OperationPlan) -> io::Result<()> {
    let archive = op
        .target
        .clone()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "pack without an archive"))?;
    let mask = &op.options.mask;

    for source in &op.sources {
        let meta = std::fs::symlink_metadata(source)?;
        if meta.is_file() {
            plan.entries.push(PlanAction::PackFile {
                archive: archive.clone(),
                interior: masked(&file_name(source), mask),
                source: source.clone(),
                size: meta.len(),
            });
            continue;
        }
        let top = file_name(source);
        for dirent in WalkDir::new(source).min_depth(1) {
            let Ok(dirent) = dirent else { continue };
            if !dirent.file_type().is_file() {
                continue;
            }
            let rel = dirent
                .path()
                .strip_prefix(source)
                .unwrap_or(dirent.path())
                .to_string_lossy()
                .replace('/', "\\");
            let interior = match rel.rsplit_once('\\') {
                Some((dir, name)) => format!("{top}\\{dir}\\{}", masked(name, mask)),
                None => format!("{top}\\{}", masked(&rel, mask)),
            };
            plan.entries.push(PlanAction::PackFile {
                archive: archive.clone(),
                interior,
                source: dirent.path().to_path_buf(),
                size: dirent.metadata().map(|m| m.len()).unwrap_or(0),
            });
        }
    }
    Ok(())
}

fn plan_unpack(op: &Operation, plan: &mut OperationPlan) {
    let Some(dest) = &op.target else { return };
    for source in &op.sources {
        plan.entries.push(PlanAction::UnpackAll {
            archive: source.clone(),
            dest: dest.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn copy_plan_walks_depth_first_with_mask() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("tree");
        std::fs::create_dir_all(src.join("sub")).unwrap();
        std::fs::write(src.join("a.txt"), b"aaa").unwrap();
        std::fs::write(src.join("sub/b.txt"), b"bb").unwrap();
        let target = tmp.path().join("out");

        let mut op = Operation::copy(vec![src.clone()], target.clone());
        op.options.mask = "*.bak".to_string();
        let plan = build_plan(&op).unwrap();

        // Target dir creation, tree dir, then contents with masked names.
        assert!(matches!(&plan.entries[0], PlanAction::CreateDir { target: t } if *t == target));
        assert!(plan.entries.iter().any(
            |e| matches!(e, PlanAction::CopyFile { target: t, .. } if t.ends_with("tree/a.bak")),
        ));
        assert!(plan.entries.iter().any(
            |e| matches!(e, PlanAction::CopyFile { target: t, .. } if t.ends_with("tree/sub/b.bak")),
        ));
        assert_eq!(plan.bytes_total, 5);
    }

    #[test]
    fn delete_plan_is_post_order() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("tree");
        std::fs::create_dir_all(src.join("sub")).unwrap();
        std::fs::write(src.join("sub/b.txt"), b"bb").unwrap();

        let plan = build_plan(&Operation::delete(vec![src.clone()])).unwrap();
        let positions: Vec<usize> = plan
            .entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| match e {
                PlanAction::RemoveDir { path } if *path == src.join("sub") || *path == src => {
                    Some(i)
                }
                _ => None,
            })
            .collect();
        // The file precedes both directory removals; sub precedes the root.
        assert!(matches!(&plan.entries[0], PlanAction::RemoveFile { .. }));
        assert_eq!(positions.len(), 2);
        assert!(positions[0] < positions[1]);
    }

    #[test]
    fn move_plan_removes_source_dirs_deepest_first() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("tree");
        std::fs::create_dir_all(src.join("sub")).unwrap();
        std::fs::write(src.join("sub/b.txt"), b"bb").unwrap();
        let target = tmp.path().join("out");

        let plan = build_plan(&Operation::move_to(vec![src.clone()], target)).unwrap();
        let removes: Vec<&PathBuf> = plan
            .entries
            .iter()
            .filter_map(|e| match e {
                PlanAction::RemoveDir { path } => Some(path),
                _ => None,
            })
            .collect();
        assert_eq!(removes, vec![&src.join("sub"), &src]);
    }
}
