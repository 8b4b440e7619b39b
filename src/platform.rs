//! # Host platform tags and tagged-block selection.
//!
//! A lifecycle block (or any config subtree) may be keyed by *platform
//! tags* (`posix`, `linux`, `ubuntu`, a hostname, ...). [`TagRanks`] holds
//! the integer specificity rank of every tag that applies to this host and
//! selects the most specific child of a tagged block.
//!
//! ## Ranks
//! The more specific a tag is, the higher its rank:
//!
//! ```text
//! all/any = 0, posix = 3, windows = 5, linux = 10, debian/fedora = 11,
//! ubuntu/macos = 20, raspbian/qnx/cygwin/freebsd/solaris = 22, <hostname> = 99
//! ```
//!
//! ## Rules
//! - Ranks are probed **once** at process start ([`TagRanks::detect`]);
//!   the table is immutable afterwards, so [`TagRanks::pick`] is a pure
//!   function of the child map and the table.
//! - Unknown tags rank −1.
//! - Ties are broken by insertion order (first child wins).

use std::collections::HashMap;
use std::path::Path;
use std::process::Command;

use indexmap::IndexMap;

/// Immutable table of platform tag ranks for this host.
#[derive(Debug, Clone)]
pub struct TagRanks {
    ranks: HashMap<String, i32>,
}

impl TagRanks {
    /// Probes the host and builds the rank table.
    ///
    /// Side effects are confined to this call: filesystem markers, the
    /// Windows environment marker, one `uname -a` invocation, and the local
    /// hostname. The selector is pure thereafter.
    pub fn detect() -> Self {
        let mut ranks = HashMap::new();
        ranks.insert("all".to_string(), 0);
        ranks.insert("any".to_string(), 0);

        if Path::new("/bin/bash").exists() || Path::new("/usr/bin/bash").exists() {
            ranks.insert("posix".to_string(), 3);
        }
        if Path::new("/proc").exists() {
            ranks.insert("linux".to_string(), 10);
        }
        if Path::new("/usr/bin/apt-get").exists() {
            ranks.insert("debian".to_string(), 11);
        }
        if Path::new("/usr/bin/yum").exists() {
            ranks.insert("fedora".to_string(), 11);
        }
        if cfg!(windows) || std::env::var_os("SystemRoot").is_some() {
            ranks.insert("windows".to_string(), 5);
        }

        let sysver = uname().to_lowercase();
        for (needle, tag, rank) in [
            ("ubuntu", "ubuntu", 20),
            ("darwin", "macos", 20),
            ("raspbian", "raspbian", 22),
            ("qnx", "qnx", 22),
            ("cygwin", "cygwin", 22),
            ("freebsd", "freebsd", 22),
            ("solaris", "solaris", 22),
            ("sunos", "solaris", 22),
        ] {
            if sysver.contains(needle) {
                ranks.insert(tag.to_string(), rank);
            }
        }

        if let Ok(name) = hostname::get() {
            ranks.insert(name.to_string_lossy().into_owned(), 99);
        }

        Self { ranks }
    }

    /// Builds a table from explicit ranks. Used by tests and demos that
    /// need deterministic platform selection.
    pub fn from_ranks<I, S>(ranks: I) -> Self
    where
        I: IntoIterator<Item = (S, i32)>,
        S: Into<String>,
    {
        Self {
            ranks: ranks.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Rank of a tag; −1 for unknown tags.
    pub fn rank(&self, tag: &str) -> i32 {
        self.ranks.get(tag).copied().unwrap_or(-1)
    }

    /// Selects the most specific child of a tag-keyed block.
    ///
    /// - The child with the highest positive rank wins; ties are broken by
    ///   insertion order (first wins).
    /// - If no child has positive rank, the `all`/`any` child is returned
    ///   if present, else the first child, else `None`.
    pub fn pick<'a, T>(&self, children: &'a IndexMap<String, T>) -> Option<&'a T> {
        let mut best: Option<&'a T> = None;
        let mut best_rank = 0;
        for (key, node) in children {
            let rank = self.rank(key);
            if rank > best_rank {
                best_rank = rank;
                best = Some(node);
            }
        }
        best.or_else(|| children.get("all"))
            .or_else(|| children.get("any"))
            .or_else(|| children.values().next())
    }

    /// Whether any child key of a block is a tag known to this host.
    ///
    /// Used to distinguish platform-keyed blocks from structured step
    /// blocks (`script`/`skipif`/...), whose keys are never host tags.
    pub fn is_tagged<T>(&self, children: &IndexMap<String, T>) -> bool {
        children.keys().any(|k| self.rank(k) >= 0)
    }
}

/// One-shot `uname -a` probe; empty string when unavailable.
fn uname() -> String {
    Command::new("uname")
        .arg("-a")
        .output()
        .ok()
        .map(|out| String::from_utf8_lossy(&out.stdout).into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags() -> TagRanks {
        TagRanks::from_ranks([("all", 0), ("any", 0), ("posix", 3), ("ubuntu", 20)])
    }

    fn block(keys: &[&str]) -> IndexMap<String, String> {
        keys.iter().map(|k| (k.to_string(), k.to_string())).collect()
    }

    #[test]
    fn highest_rank_wins() {
        let b = block(&["posix", "ubuntu", "all"]);
        assert_eq!(tags().pick(&b), Some(&"ubuntu".to_string()));
    }

    #[test]
    fn insertion_order_breaks_ties() {
        let t = TagRanks::from_ranks([("left", 7), ("right", 7)]);
        let b = block(&["right", "left"]);
        assert_eq!(t.pick(&b), Some(&"right".to_string()));
    }

    #[test]
    fn falls_back_to_all_then_first() {
        let b = block(&["mystery", "all"]);
        assert_eq!(tags().pick(&b), Some(&"all".to_string()));

        let b = block(&["mystery", "enigma"]);
        assert_eq!(tags().pick(&b), Some(&"mystery".to_string()));

        let empty: IndexMap<String, String> = IndexMap::new();
        assert_eq!(tags().pick(&empty), None);
    }

    #[test]
    fn unknown_tags_rank_negative() {
        assert_eq!(tags().rank("zx81"), -1);
        assert_eq!(tags().rank("ubuntu"), 20);
    }

    #[test]
    fn pick_is_deterministic() {
        let b = block(&["posix", "ubuntu", "all"]);
        let t = tags();
        let first = t.pick(&b).cloned();
        for _ in 0..16 {
            assert_eq!(t.pick(&b).cloned(), first);
        }
    }
}
