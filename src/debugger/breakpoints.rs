use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tracing::debug;

use crate::error::LocationError;

/// A user breakpoint. `index` is 0 until the table registers it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakPoint {
    pub index: usize,
    pub file: String,
    pub line: usize,
}

impl BreakPoint {
    pub fn new(file: impl Into<String>, line: usize) -> Self {
        Self {
            index: 0,
            file: file.into(),
            line,
        }
    }
}

impl fmt::Display for BreakPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Parses `path/to/file.bat:12`. The last colon separates the line so that
/// drive letters survive.
impl FromStr for BreakPoint {
    type Err = LocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (file, line) = s
            .rsplit_once(':')
            .ok_or_else(|| LocationError::MissingLine(s.to_string()))?;
        if file.is_empty() {
            return Err(LocationError::MissingLine(s.to_string()));
        }
        let line: usize = line
            .trim()
            .parse()
            .map_err(|_| LocationError::InvalidLine(line.to_string()))?;
        if line == 0 {
            return Err(LocationError::InvalidLine(line.to_string()));
        }
        Ok(Self::new(file, line))
    }
}

/// Resolved breakpoints keyed by line then canonical file, plus the queue of
/// breakpoints whose file has not been matched to a loaded source yet.
#[derive(Debug, Default)]
pub struct BreakPointTable {
    resolved: BTreeMap<usize, BTreeMap<String, BreakPoint>>,
    unresolved: Vec<BreakPoint>,
    last_index: usize,
}

impl BreakPointTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `bp`, assigning the next index if it has none, and returns
    /// the index. A resolved breakpoint on an occupied `(line, file)` slot
    /// replaces the previous one.
    pub fn add(&mut self, bp: &mut BreakPoint, resolved: bool) -> usize {
        if bp.index == 0 {
            self.last_index += 1;
            bp.index = self.last_index;
        }

        if resolved {
            debug!(index = bp.index, file = %bp.file, line = bp.line, "breakpoint resolved");
            self.resolved
                .entry(bp.line)
                .or_default()
                .insert(bp.file.clone(), bp.clone());
        } else {
            debug!(index = bp.index, file = %bp.file, line = bp.line, "breakpoint pending");
            self.unresolved.push(bp.clone());
        }
        bp.index
    }

    /// Exact `(file, line)` match against resolved breakpoints.
    pub fn lookup(&self, file: &str, line: usize) -> Option<&BreakPoint> {
        self.resolved.get(&line).and_then(|files| files.get(file))
    }

    /// Removes the breakpoint with `index`, resolved ones first.
    pub fn remove(&mut self, index: usize) -> bool {
        let hit = self.resolved.iter().find_map(|(line, files)| {
            files
                .iter()
                .find(|(_, bp)| bp.index == index)
                .map(|(file, _)| (*line, file.clone()))
        });

        if let Some((line, file)) = hit {
            if let Some(files) = self.resolved.get_mut(&line) {
                files.remove(&file);
                if files.is_empty() {
                    self.resolved.remove(&line);
                }
            }
            debug!(index, "breakpoint removed");
            return true;
        }

        if let Some(pos) = self.unresolved.iter().position(|bp| bp.index == index) {
            self.unresolved.remove(pos);
            debug!(index, "pending breakpoint removed");
            return true;
        }
        false
    }

    /// All breakpoints in index order, regardless of resolution state.
    pub fn list(&self) -> Vec<BreakPoint> {
        let mut all: Vec<BreakPoint> = self
            .resolved
            .values()
            .flat_map(|files| files.values().cloned())
            .chain(self.unresolved.iter().cloned())
            .collect();
        all.sort_by_key(|bp| bp.index);
        all
    }

    pub fn has_unresolved(&self) -> bool {
        !self.unresolved.is_empty()
    }

    /// Drains the pending queue so the resolver can retry each entry.
    pub(crate) fn take_unresolved(&mut self) -> Vec<BreakPoint> {
        std::mem::take(&mut self.unresolved)
    }

    pub(crate) fn requeue(&mut self, bp: BreakPoint) {
        self.unresolved.push(bp);
    }

    /// Empties both sets. `last_index` is kept so indices are never reused.
    pub fn clear(&mut self) {
        self.resolved.clear();
        self.unresolved.clear();
    }
}
