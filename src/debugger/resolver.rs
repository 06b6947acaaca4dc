use std::collections::BTreeMap;

use tracing::{debug, trace};

use super::breakpoints::{BreakPoint, BreakPointTable};
use super::host::SourceRegistry;

/// Source text of every script the host has loaded, keyed by canonical path.
///
/// Entries are copied from the host once per path and never dropped; the
/// host's registry only grows.
#[derive(Debug, Default)]
pub struct LoadedSources {
    scripts: BTreeMap<String, Vec<String>>,
}

impl LoadedSources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pulls in any script the host loaded since the last refresh.
    pub fn refresh(&mut self, registry: &dyn SourceRegistry) {
        for path in registry.loaded_scripts() {
            if self.scripts.contains_key(&path) {
                continue;
            }
            if let Some(lines) = registry.script_lines(&path) {
                trace!(path = %path, lines = lines.len(), "source loaded");
                self.scripts.insert(path, lines);
            }
        }
    }

    pub fn lines(&self, path: &str) -> Option<&[String]> {
        self.scripts.get(path).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    /// Binds `bp` to the first loaded path that contains `bp.file`
    /// (ignoring case) and is long enough to hold `bp.line`. On success
    /// `bp.file` is rewritten to that path.
    pub fn resolve(&self, bp: &mut BreakPoint) -> bool {
        let hit = self.scripts.iter().find(|(path, lines)| {
            contains_ignore_case(path, &bp.file) && bp.line <= lines.len()
        });
        match hit {
            Some((path, _)) => {
                bp.file = path.clone();
                true
            }
            None => false,
        }
    }

    /// Retries every pending breakpoint once, promoting the ones that now
    /// resolve. Failures stay queued in their original order.
    pub fn resolve_pending(&self, table: &mut BreakPointTable) -> usize {
        let mut promoted = 0;
        for mut bp in table.take_unresolved() {
            if self.resolve(&mut bp) {
                debug!(index = bp.index, file = %bp.file, "pending breakpoint bound");
                table.add(&mut bp, true);
                promoted += 1;
            } else {
                table.requeue(bp);
            }
        }
        promoted
    }
}

/// Substring search that ignores case.
pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<(&'static str, usize)>);

    impl SourceRegistry for Fixed {
        fn loaded_scripts(&self) -> Vec<String> {
            self.0.iter().map(|(p, _)| p.to_string()).collect()
        }

        fn script_lines(&self, path: &str) -> Option<Vec<String>> {
            self.0
                .iter()
                .find(|(p, _)| *p == path)
                .map(|(_, n)| (1..=*n).map(|i| format!("echo {i}")).collect())
        }
    }

    fn sources(files: Vec<(&'static str, usize)>) -> LoadedSources {
        let mut loaded = LoadedSources::new();
        loaded.refresh(&Fixed(files));
        loaded
    }

    #[test]
    fn matches_partial_path_ignoring_case() {
        let loaded = sources(vec![("/abs/path/Foo.bat", 12)]);
        let mut bp = BreakPoint::new("foo.BAT", 10);
        assert!(loaded.resolve(&mut bp));
        assert_eq!(bp.file, "/abs/path/Foo.bat");
    }

    #[test]
    fn rejects_lines_past_the_end() {
        let loaded = sources(vec![("/abs/foo.bat", 9)]);
        let mut bp = BreakPoint::new("foo.bat", 10);
        assert!(!loaded.resolve(&mut bp));
        assert_eq!(bp.file, "foo.bat");
    }

    #[test]
    fn first_candidate_long_enough_wins() {
        let loaded = sources(vec![("/a/util.bat", 3), ("/b/util.bat", 30)]);
        let mut short = BreakPoint::new("util.bat", 2);
        assert!(loaded.resolve(&mut short));
        assert_eq!(short.file, "/a/util.bat");

        let mut long = BreakPoint::new("util.bat", 20);
        assert!(loaded.resolve(&mut long));
        assert_eq!(long.file, "/b/util.bat");
    }

    #[test]
    fn pending_breakpoints_are_promoted() {
        let mut table = BreakPointTable::new();
        let mut early = BreakPoint::new("foo.bat", 10);
        let mut never = BreakPoint::new("missing.bat", 1);
        table.add(&mut early, false);
        table.add(&mut never, false);

        let loaded = sources(vec![("/abs/path/foo.bat", 10)]);
        assert_eq!(loaded.resolve_pending(&mut table), 1);

        assert!(table.lookup("/abs/path/foo.bat", 10).is_some());
        assert!(table.has_unresolved());
        let listed = table.list();
        assert_eq!(listed[0].index, early.index);
        assert_eq!(listed[0].file, "/abs/path/foo.bat");
        assert_eq!(listed[1].file, "missing.bat");
    }

    #[test]
    fn refresh_keeps_first_copy() {
        let mut loaded = sources(vec![("/x.bat", 2)]);
        loaded.refresh(&Fixed(vec![("/x.bat", 50), ("/y.bat", 1)]));
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.lines("/x.bat").map(<[String]>::len), Some(2));
    }
}
