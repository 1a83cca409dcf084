//! Existence probing behind a seam so target-splitting and panel fallback
//! logic can run against an in-memory tree in tests.

use crate::path::engine_path::EnginePath;

/// Result of probing a path for existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Dir,
    File,
    Missing,
    /// The filesystem declined access (permission, offline volume).
    Denied,
}

pub trait PathProbe: Send + Sync {
    fn probe(&self, path: &EnginePath) -> Probe;
}

/// In-memory path tree used by tests across the crate.
#[cfg(test)]
pub mod mem {
    use std::collections::BTreeMap;

    use rustc_hash::FxHashSet;

    use super::{PathProbe, Probe};
    use crate::path::engine_path::EnginePath;

    #[derive(Debug, Clone)]
    pub struct MemNode {
        pub name: String,
        pub is_dir: bool,
        pub size: u64,
    }

    /// Map from normalized (lowercased, no trailing separator except drive
    /// roots) formatted path to node.
    #[derive(Debug, Default)]
    pub struct MemTree {
        nodes: BTreeMap<String, MemNode>,
        denied: FxHashSet<String>,
    }

    fn norm(path: &str) -> String {
        let k = path.to_lowercase().replace('/', "\\");
        if k.len() > 3 && k.ends_with('\\') {
            k.trim_end_matches('\\').to_string()
        } else {
            k
        }
    }

    /// Split into (root key, tail segments). Drive roots keep their
    /// trailing separator; UNC roots do not.
    fn split_root(path: &str) -> Option<(String, Vec<String>)> {
        let path = norm(path);
        let bytes = path.as_bytes();
        if bytes.len() >= 2 && bytes[1] == b':' {
            let root = format!("{}:\\", bytes[0] as char);
            let tail: Vec<String> = path[2..]
                .split('\\')
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            Some((root, tail))
        } else if path.starts_with("\\\\") {
            let mut it = path[2..].split('\\').filter(|s| !s.is_empty());
            let server = it.next()?;
            let share = it.next()?;
            let root = format!("\\\\{server}\\{share}");
            let tail = it.map(String::from).collect();
            Some((root, tail))
        } else {
            None
        }
    }

    impl MemTree {
        pub fn new() -> Self {
            Self::default()
        }

        /// Add a directory and all its ancestors.
        pub fn add_dir(&mut self, path: &str) {
            let Some((root, tail)) = split_root(path) else {
                return;
            };
            self.nodes.entry(root.clone()).or_insert(MemNode {
                name: root.clone(),
                is_dir: true,
                size: 0,
            });
            let mut cur = root;
            for seg in tail {
                cur = format!("{}\\{seg}", cur.trim_end_matches('\\'));
                self.nodes.entry(cur.clone()).or_insert(MemNode {
                    name: seg.clone(),
                    is_dir: true,
                    size: 0,
                });
            }
        }

        pub fn add_file(&mut self, path: &str, size: u64) {
            let Some((root, mut tail)) = split_root(path) else {
                return;
            };
            let Some(file_name) = tail.pop() else {
                return;
            };
            let mut parent = root;
            if !tail.is_empty() {
                parent = format!(
                    "{}\\{}",
                    parent.trim_end_matches('\\'),
                    tail.join("\\")
                );
            }
            self.add_dir(&parent);
            let full = format!("{}\\{file_name}", parent.trim_end_matches('\\'));
            self.nodes.insert(
                full,
                MemNode {
                    name: file_name,
                    is_dir: false,
                    size,
                },
            );
        }

        pub fn deny(&mut self, path: &str) {
            self.denied.insert(norm(path));
        }

        pub fn allow(&mut self, path: &str) {
            self.denied.remove(&norm(path));
        }

        pub fn remove(&mut self, path: &str) {
            let k = norm(path);
            let prefix = format!("{}\\", k.trim_end_matches('\\'));
            self.nodes.retain(|n, _| *n != k && !n.starts_with(&prefix));
        }

        pub fn file_size(&self, path: &str) -> Option<u64> {
            self.nodes.get(&norm(path)).map(|n| n.size)
        }

        pub fn probe_str(&self, path: &str) -> Probe {
            let k = norm(path);
            if self.denied.contains(&k) {
                return Probe::Denied;
            }
            match self.nodes.get(&k) {
                Some(n) if n.is_dir => Probe::Dir,
                Some(_) => Probe::File,
                None => Probe::Missing,
            }
        }

        /// Direct children of a directory, in key order.
        pub fn children(&self, path: &str) -> Vec<MemNode> {
            let prefix = format!("{}\\", norm(path).trim_end_matches('\\'));
            self.nodes
                .iter()
                .filter(|(k, _)| {
                    k.starts_with(&prefix)
                        && k.len() > prefix.len()
                        && !k[prefix.len()..].contains('\\')
                })
                .map(|(_, n)| n.clone())
                .collect()
        }
    }

    impl PathProbe for MemTree {
        fn probe(&self, path: &EnginePath) -> Probe {
            self.probe_str(&path.to_string())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::path::engine_path::{ArchiveAssoc, ParseContext};

        #[test]
        fn probe_and_children() {
            let mut tree = MemTree::new();
            tree.add_dir("C:\\a\\b");
            tree.add_file("C:\\a\\f.txt", 10);
            assert_eq!(tree.probe_str("C:\\"), Probe::Dir);
            assert_eq!(tree.probe_str("c:\\A"), Probe::Dir);
            assert_eq!(tree.probe_str("C:\\a\\f.txt"), Probe::File);
            assert_eq!(tree.probe_str("C:\\missing"), Probe::Missing);
            let names: Vec<String> = tree.children("C:\\a").into_iter().map(|n| n.name).collect();
            assert_eq!(names, vec!["b".to_string(), "f.txt".to_string()]);

            let archives = ArchiveAssoc::default();
            let p = EnginePath::parse("C:\\a\\b", &ParseContext::bare(&archives)).unwrap();
            assert_eq!(tree.probe(&p), Probe::Dir);
        }
    }
}
