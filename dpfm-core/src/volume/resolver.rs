//! Resolution of substs and reparse chains, and same-volume answers.
//!
//! Resolution is a pure function of the live filesystem at the moment of the
//! call; callers that need stability cache results. The resolver itself only
//! memoizes volume-GUID probes, which are stable for the life of a mount.

use std::{sync::Arc, time::Duration};

use moka::sync::Cache;
use tracing::{debug, trace};

use crate::{
    path::engine_path::{eq_ci, ArchiveAssoc, EnginePath, ParseContext, MAX_REPARSE_HOPS},
    volume::oracle::{LinkKind, VolumeOracle},
};

/// Result of a reparse-chain walk.
#[derive(Debug, Clone)]
pub struct ResolvedReparse {
    pub resolved: EnginePath,
    /// Deepest prefix that was a reparse point, in input coordinates.
    pub last_reparse_point: Option<EnginePath>,
    pub link_target: Option<String>,
    pub link_kind: Option<LinkKind>,
    /// Network root a symlink redirected to, when the walk stopped there.
    pub net_redirect: Option<EnginePath>,
    /// False when the walk terminated at an opaque reparse point; callers
    /// must not shorten past it, they would cross a volume.
    pub truncatable: bool,
}

/// Answer to a same-volume query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeAnswer {
    pub same: bool,
    pub certain: bool,
}

#[derive(Debug, Clone)]
pub struct MountPointInfo {
    pub mount_point: EnginePath,
    pub guid_path: String,
}

pub struct VolumeResolver {
    oracle: Arc<dyn VolumeOracle>,
    guid_cache: Cache<String, String>,
    /// Reparse targets are classified without archive detection.
    no_archives: ArchiveAssoc,
}

impl VolumeResolver {
    pub fn new(oracle: Arc<dyn VolumeOracle>) -> Self {
        Self {
            oracle,
            guid_cache: Cache::builder()
                .max_capacity(256)
                .time_to_live(Duration::from_secs(300))
                .build(),
            no_archives: ArchiveAssoc::new(Vec::new()),
        }
    }

    fn parse_target(&self, raw: &str) -> Option<EnginePath> {
        EnginePath::parse(raw, &ParseContext::bare(&self.no_archives)).ok()
    }

    /// Replace mapped-drive aliases with their true targets.
    pub fn resolve_substs(&self, path: &EnginePath) -> EnginePath {
        let mut cur = path.clone();
        for _ in 0..MAX_REPARSE_HOPS {
            let EnginePath::Disk { root, tail } = &cur else {
                break;
            };
            let Some(raw) = self.oracle.subst_target(*root) else {
                break;
            };
            let Some(target) = self.parse_target(&raw) else {
                break;
            };
            trace!(drive = %root, target = %target, "resolved subst");
            let joined_tail = if tail.is_empty() {
                target.tail().to_string()
            } else if target.tail().is_empty() {
                tail.clone()
            } else {
                format!("{}\\{tail}", target.tail())
            };
            cur = target.with_tail(joined_tail);
        }
        cur
    }

    /// Walk reparse points under `path`, at most [`MAX_REPARSE_HOPS`] hops.
    /// One hop past the limit falls back to the original path.
    pub fn resolve_reparse_points(&self, path: &EnginePath) -> ResolvedReparse {
        let mut out = ResolvedReparse {
            resolved: path.clone(),
            last_reparse_point: None,
            link_target: None,
            link_kind: None,
            net_redirect: None,
            truncatable: true,
        };
        if !matches!(path, EnginePath::Disk { .. } | EnginePath::Unc { .. }) {
            return out;
        }

        let mut cur = path.clone();
        let mut hops = 0usize;
        'walk: loop {
            let segments: Vec<String> = cur.segments().iter().map(|s| s.to_string()).collect();
            for depth in 1..=segments.len() {
                let prefix = cur.with_tail(segments[..depth].join("\\"));
                let Some(info) = self.oracle.reparse_point(&prefix) else {
                    continue;
                };

                hops += 1;
                if hops > MAX_REPARSE_HOPS {
                    debug!(path = %path, "reparse chain exceeds hop limit, keeping original");
                    return ResolvedReparse {
                        resolved: path.clone(),
                        last_reparse_point: None,
                        link_target: None,
                        link_kind: None,
                        net_redirect: None,
                        truncatable: true,
                    };
                }

                out.last_reparse_point = Some(prefix.clone());
                out.link_target = Some(info.target.clone());
                out.link_kind = Some(info.kind);

                match info.kind {
                    LinkKind::MountPoint | LinkKind::Unknown => {
                        // Opaque: the resolved path ends at this point.
                        out.resolved = cur;
                        out.truncatable = false;
                        return out;
                    }
                    LinkKind::Junction | LinkKind::Symlink => {
                        let Some(target) = self.parse_target(&info.target) else {
                            out.resolved = cur;
                            out.truncatable = false;
                            return out;
                        };
                        if info.kind == LinkKind::Symlink
                            && matches!(target, EnginePath::Unc { .. })
                        {
                            out.resolved = cur;
                            out.net_redirect = Some(target.root_of());
                            return out;
                        }
                        let rest = segments[depth..].join("\\");
                        let joined = if rest.is_empty() {
                            target
                        } else if target.tail().is_empty() {
                            target.with_tail(rest)
                        } else {
                            let tail = format!("{}\\{rest}", target.tail());
                            target.with_tail(tail)
                        };
                        cur = joined;
                        continue 'walk;
                    }
                }
            }
            break;
        }
        out.resolved = cur;
        out
    }

    /// Identify the storage behind a path across substs and reparses.
    pub fn get_guid_and_mount_point(&self, path: &EnginePath) -> Option<MountPointInfo> {
        let resolved = self.resolve_reparse_points(&self.resolve_substs(path)).resolved;
        let mount_point = self.oracle.mount_point(&resolved)?;
        let key = mount_point.to_string().to_lowercase();
        let oracle = Arc::clone(&self.oracle);
        let mp = mount_point.clone();
        let guid_path = self
            .guid_cache
            .optionally_get_with(key, move || oracle.volume_guid(&mp))?;
        Some(MountPointInfo {
            mount_point,
            guid_path,
        })
    }

    /// Compare the volumes behind two paths. `certain` only when both GUID
    /// probes succeed on local paths; otherwise a best-effort answer based
    /// on root equality.
    pub fn same_volume(&self, a: &EnginePath, b: &EnginePath) -> VolumeAnswer {
        let ra = self.resolve_reparse_points(&self.resolve_substs(a)).resolved;
        let rb = self.resolve_reparse_points(&self.resolve_substs(b)).resolved;
        let local = matches!(ra, EnginePath::Disk { .. }) && matches!(rb, EnginePath::Disk { .. });

        match (
            self.get_guid_and_mount_point(&ra),
            self.get_guid_and_mount_point(&rb),
        ) {
            (Some(ga), Some(gb)) => VolumeAnswer {
                same: eq_ci(&ga.guid_path, &gb.guid_path),
                certain: local,
            },
            _ => VolumeAnswer {
                same: eq_ci(&ra.root_of().to_string(), &rb.root_of().to_string()),
                certain: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::oracle::map::MapOracle;

    fn parse(s: &str) -> EnginePath {
        let archives = ArchiveAssoc::new(Vec::new());
        EnginePath::parse(s, &ParseContext::bare(&archives)).unwrap()
    }

    #[test]
    fn subst_resolution_replaces_alias() {
        let oracle = MapOracle::new();
        oracle.add_subst('X', "C:\\mapped\\base");
        let resolver = VolumeResolver::new(Arc::new(oracle));
        let resolved = resolver.resolve_substs(&parse("X:\\sub\\file"));
        assert_eq!(resolved.to_string(), "C:\\mapped\\base\\sub\\file");
    }

    #[test]
    fn symlink_chain_is_followed() {
        let oracle = MapOracle::new();
        oracle.add_reparse("C:\\link", LinkKind::Symlink, "C:\\real");
        oracle.add_reparse("C:\\real\\hop", LinkKind::Junction, "D:\\end");
        let resolver = VolumeResolver::new(Arc::new(oracle));
        let out = resolver.resolve_reparse_points(&parse("C:\\link\\hop\\leaf"));
        assert_eq!(out.resolved.to_string(), "D:\\end\\leaf");
        assert!(out.truncatable);
        assert_eq!(out.link_kind, Some(LinkKind::Junction));
    }

    #[test]
    fn opaque_reparse_stops_and_is_not_truncatable() {
        let oracle = MapOracle::new();
        oracle.add_reparse("C:\\mnt", LinkKind::MountPoint, "\\??\\Volume{abc}");
        let resolver = VolumeResolver::new(Arc::new(oracle));
        let out = resolver.resolve_reparse_points(&parse("C:\\mnt\\inside"));
        assert_eq!(out.resolved.to_string(), "C:\\mnt\\inside");
        assert!(!out.truncatable);
        assert_eq!(
            out.last_reparse_point.unwrap().to_string(),
            "C:\\mnt"
        );
    }

    #[test]
    fn symlink_to_network_reports_redirect() {
        let oracle = MapOracle::new();
        oracle.add_reparse("C:\\share", LinkKind::Symlink, "\\\\srv\\data\\sub");
        let resolver = VolumeResolver::new(Arc::new(oracle));
        let out = resolver.resolve_reparse_points(&parse("C:\\share\\x"));
        assert_eq!(out.net_redirect.unwrap().to_string(), "\\\\srv\\data");
    }

    #[test]
    fn hop_limit_boundary() {
        let oracle = MapOracle::new();
        // A chain of exactly MAX_REPARSE_HOPS links resolves.
        for i in 0..MAX_REPARSE_HOPS {
            let next = if i + 1 == MAX_REPARSE_HOPS {
                "C:\\final".to_string()
            } else {
                format!("C:\\l{}", i + 1)
            };
            oracle.add_reparse(&format!("C:\\l{i}"), LinkKind::Symlink, &next);
        }
        let resolver = VolumeResolver::new(Arc::new(oracle));
        let out = resolver.resolve_reparse_points(&parse("C:\\l0"));
        assert_eq!(out.resolved.to_string(), "C:\\final");

        // One more hop falls back to the original path.
        let oracle = MapOracle::new();
        for i in 0..=MAX_REPARSE_HOPS {
            let next = if i == MAX_REPARSE_HOPS {
                "C:\\final".to_string()
            } else {
                format!("C:\\l{}", i + 1)
            };
            oracle.add_reparse(&format!("C:\\l{i}"), LinkKind::Symlink, &next);
        }
        let resolver = VolumeResolver::new(Arc::new(oracle));
        let out = resolver.resolve_reparse_points(&parse("C:\\l0"));
        assert_eq!(out.resolved.to_string(), "C:\\l0");
    }

    #[test]
    fn same_volume_certain_only_with_guids() {
        let oracle = MapOracle::new();
        oracle.add_guid("C:\\", "\\\\?\\Volume{11}\\");
        oracle.add_guid("D:\\", "\\\\?\\Volume{11}\\");
        let resolver = VolumeResolver::new(Arc::new(oracle));
        let answer = resolver.same_volume(&parse("C:\\a"), &parse("D:\\b"));
        assert!(answer.same);
        assert!(answer.certain);

        // No GUID for a network path: uncertain, root comparison only.
        let oracle = MapOracle::new();
        oracle.add_guid("C:\\", "\\\\?\\Volume{11}\\");
        let resolver = VolumeResolver::new(Arc::new(oracle));
        let answer = resolver.same_volume(&parse("C:\\a"), &parse("\\\\srv\\share\\b"));
        assert!(!answer.certain);
    }
}
