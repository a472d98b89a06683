//! Directory-like navigation over an open archive: a path-rooted view
//! with filtering and sorting, including directories that exist only
//! implicitly (as prefixes of deeper entry paths).

use std::cmp::Ordering;
use std::io::{Read, Seek};

use crate::entry::{EntryInfo, EntryKind};
use crate::error::Error;
use crate::path::clean_path;
use crate::ZipArchive;

/// Which entries [ZipDirectory::entries] yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryFilters(pub u32);

impl EntryFilters {
    /// include files (and symlinks)
    pub const FILES: Self = Self(1 << 0);
    /// include directories
    pub const DIRS: Self = Self(1 << 1);
    /// keep only entries with the DOS hidden attribute
    pub const HIDDEN: Self = Self(1 << 2);
    /// keep only entries with the DOS system attribute
    pub const SYSTEM: Self = Self(1 << 3);
    /// keep only read-only entries
    pub const READ_ONLY: Self = Self(1 << 4);
    /// keep only writable entries
    pub const WRITABLE: Self = Self(1 << 5);
    /// keep only entries with an execute permission bit
    pub const EXECUTABLE: Self = Self(1 << 6);
    /// keep only entries modified after creation
    pub const MODIFIED: Self = Self(1 << 7);
    /// compare name filters case-insensitively
    pub const CASE_INSENSITIVE: Self = Self(1 << 8);

    fn has(self, rhs: Self) -> bool {
        self.0 & rhs.0 != 0
    }
}

impl Default for EntryFilters {
    fn default() -> Self {
        Self(Self::FILES.0 | Self::DIRS.0)
    }
}

impl std::ops::BitOr for EntryFilters {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Primary sort key for directory listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    /// keep central directory order
    #[default]
    Unsorted,
    /// by final path segment
    Name,
    /// by extension, then name
    Type,
    /// by uncompressed size
    Size,
    /// by modification time
    Time,
}

/// Sort order for directory listings.
#[derive(Debug, Clone, Copy, Default)]
pub struct SortSpec {
    /// primary key
    pub key: SortKey,
    /// group directories before everything else
    pub dirs_first: bool,
    /// group directories after everything else
    pub dirs_last: bool,
    /// reverse the order
    pub reversed: bool,
    /// compare names case-insensitively
    pub ignore_case: bool,
    /// custom name comparator, for locale-aware ordering
    pub comparator: Option<fn(&str, &str) -> Ordering>,
}

impl SortSpec {
    /// Sort by the given key, ascending.
    pub fn by(key: SortKey) -> Self {
        Self {
            key,
            ..Default::default()
        }
    }
}

/// A directory-like view rooted somewhere in an archive.
pub struct ZipDirectory<'a, R: Read + Seek> {
    archive: &'a mut ZipArchive<R>,
    /// current base: empty for the root, otherwise `a/b/` with a trailing
    /// slash
    base: String,
}

impl<'a, R: Read + Seek> ZipDirectory<'a, R> {
    /// A view rooted at the top of the archive.
    pub fn new(archive: &'a mut ZipArchive<R>) -> Self {
        Self {
            archive,
            base: String::new(),
        }
    }

    /// A view rooted at `path`; fails if nothing in the archive lives
    /// there.
    pub fn with_path(archive: &'a mut ZipArchive<R>, path: &str) -> Result<Self, Error> {
        let mut dir = Self::new(archive);
        if !dir.cd(path)? {
            return Err(Error::InvalidArgument("no such directory in archive"));
        }
        Ok(dir)
    }

    /// The view's current path, with a trailing slash (empty at the
    /// root).
    pub fn path(&self) -> &str {
        &self.base
    }

    /// Change directory: `..`, `.`, absolute (`/a/b`) and relative paths
    /// all work; a trailing slash is tolerated. Returns false (without
    /// moving) if the target doesn't exist.
    pub fn cd(&mut self, path: &str) -> Result<bool, Error> {
        let target = if let Some(absolute) = path.strip_prefix('/') {
            clean_path(absolute)
        } else {
            clean_path(&format!("{}{}", self.base, path))
        };

        let mut base = target.trim_end_matches('/').to_string();
        if !base.is_empty() {
            base.push('/');
        }

        if !base.is_empty() && !self.dir_exists(&base)? {
            return Ok(false);
        }
        self.base = base;
        Ok(true)
    }

    /// Whether anything in the archive lives under `base`.
    fn dir_exists(&mut self, base: &str) -> Result<bool, Error> {
        for entry in self.archive.entries() {
            let entry = entry?;
            let path = clean_path(&entry.path);
            if path.starts_with(base) || path == base.trim_end_matches('/') {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Whether a file or directory exists relative to the view.
    pub fn exists(&mut self, name: &str) -> Result<bool, Error> {
        let full = clean_path(&format!("{}{}", self.base, name));
        for entry in self.archive.entries() {
            let entry = entry?;
            let path = clean_path(&entry.path);
            if path == full || path.trim_end_matches('/') == full || path.starts_with(&format!("{}/", full)) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Number of entries the view would yield with the given filters.
    pub fn count(&mut self, name_filters: &[&str], filters: EntryFilters) -> Result<usize, Error> {
        Ok(self
            .entries(name_filters, filters, SortSpec::default())?
            .len())
    }

    /// List the view's immediate children.
    ///
    /// Directories that only exist as prefixes of deeper paths are
    /// synthesized. `name_filters` are glob patterns (`*`, `?`, `[...]`)
    /// matched against the final path segment; an empty list keeps
    /// everything.
    pub fn entries(
        &mut self,
        name_filters: &[&str],
        filters: EntryFilters,
        sort: SortSpec,
    ) -> Result<Vec<EntryInfo>, Error> {
        let mut seen: Vec<String> = Vec::new();
        let mut out: Vec<EntryInfo> = Vec::new();
        let ci_names = filters.has(EntryFilters::CASE_INSENSITIVE);

        let base = self.base.clone();
        for entry in self.archive.entries() {
            let entry = entry?;
            let path = clean_path(&entry.path);
            let rest = match path.strip_prefix(base.as_str()) {
                Some(rest) if !rest.is_empty() => rest,
                _ => continue,
            };

            // first segment below the base; anything deeper materializes
            // as a (possibly synthesized) directory
            let (segment, deeper) = match rest.find('/') {
                Some(i) => (&rest[..i], rest.len() > i + 1),
                None => (rest, false),
            };

            let key = if ci_names {
                segment.to_ascii_lowercase()
            } else {
                segment.to_string()
            };
            if seen.contains(&key) {
                continue;
            }

            let child = if deeper {
                // only the prefix of a deeper path; synthesize the
                // directory unless an explicit entry for it comes later
                let mut synth = EntryInfo::directory(format!("{}{}", base, segment));
                synth.uncompressed_size = 0;
                synth
            } else {
                let mut child = entry;
                child.path = path;
                child
            };

            seen.push(key);
            out.push(child);
        }

        // an explicit directory entry may have been shadowed by a deeper
        // path that came first; prefer the explicit one
        for entry in &mut out {
            if entry.kind == EntryKind::Directory {
                let explicit = self
                    .archive
                    .find_entry(&entry.path, crate::CaseSensitivity::Sensitive)?;
                if let Some(explicit) = explicit {
                    *entry = explicit;
                }
            }
        }

        out.retain(|entry| keep(entry, name_filters, filters, ci_names));
        sort_entries(&mut out, sort);
        Ok(out)
    }
}

fn final_segment(entry: &EntryInfo) -> &str {
    let path = entry.path.trim_end_matches('/');
    match path.rfind('/') {
        Some(i) => &path[i + 1..],
        None => path,
    }
}

fn keep(
    entry: &EntryInfo,
    name_filters: &[&str],
    filters: EntryFilters,
    ci_names: bool,
) -> bool {
    let is_dir = entry.kind == EntryKind::Directory;
    if is_dir && !filters.has(EntryFilters::DIRS) {
        return false;
    }
    if !is_dir && !filters.has(EntryFilters::FILES) {
        return false;
    }

    if filters.has(EntryFilters::HIDDEN) && !entry.is_hidden() {
        return false;
    }
    if filters.has(EntryFilters::SYSTEM) && !entry.is_system() {
        return false;
    }
    if filters.has(EntryFilters::READ_ONLY) && !entry.is_read_only() {
        return false;
    }
    if filters.has(EntryFilters::WRITABLE) && entry.is_read_only() {
        return false;
    }
    if filters.has(EntryFilters::EXECUTABLE) && entry.permissions() & 0o111 == 0 {
        return false;
    }
    if filters.has(EntryFilters::MODIFIED)
        && !entry.created.map_or(false, |c| c < entry.modified)
    {
        return false;
    }

    if name_filters.is_empty() {
        return true;
    }
    let name = final_segment(entry);
    name_filters
        .iter()
        .any(|pattern| glob_match(pattern, name, ci_names))
}

fn sort_entries(entries: &mut [EntryInfo], sort: SortSpec) {
    if matches!(sort.key, SortKey::Unsorted) && !sort.dirs_first && !sort.dirs_last {
        if sort.reversed {
            entries.reverse();
        }
        return;
    }

    let name_cmp = move |a: &EntryInfo, b: &EntryInfo| -> Ordering {
        let (a, b) = (final_segment(a), final_segment(b));
        if let Some(custom) = sort.comparator {
            custom(a, b)
        } else if sort.ignore_case {
            a.to_ascii_lowercase().cmp(&b.to_ascii_lowercase())
        } else {
            a.cmp(b)
        }
    };

    entries.sort_by(|a, b| {
        if sort.dirs_first || sort.dirs_last {
            let (da, db) = (a.kind == EntryKind::Directory, b.kind == EntryKind::Directory);
            if da != db {
                let mut ord = if da { Ordering::Less } else { Ordering::Greater };
                if sort.dirs_last {
                    ord = ord.reverse();
                }
                if sort.reversed {
                    ord = ord.reverse();
                }
                return ord;
            }
        }

        let mut ord = match sort.key {
            SortKey::Unsorted => Ordering::Equal,
            SortKey::Name => name_cmp(a, b),
            SortKey::Type => {
                let ext = |e: &EntryInfo| {
                    let name = final_segment(e).to_string();
                    name.rfind('.').map(|i| name[i + 1..].to_string()).unwrap_or_default()
                };
                ext(a).cmp(&ext(b)).then_with(|| name_cmp(a, b))
            }
            SortKey::Size => a
                .uncompressed_size
                .cmp(&b.uncompressed_size)
                .then_with(|| name_cmp(a, b)),
            SortKey::Time => a.modified.cmp(&b.modified).then_with(|| name_cmp(a, b)),
        };
        if sort.reversed {
            ord = ord.reverse();
        }
        ord
    });
}

/// Match a glob pattern (`*`, `?`, `[set]`, `[!set]`, ranges) against a
/// name.
fn glob_match(pattern: &str, name: &str, ignore_case: bool) -> bool {
    let pat: Vec<char> = if ignore_case {
        pattern.chars().flat_map(|c| c.to_lowercase()).collect()
    } else {
        pattern.chars().collect()
    };
    let txt: Vec<char> = if ignore_case {
        name.chars().flat_map(|c| c.to_lowercase()).collect()
    } else {
        name.chars().collect()
    };
    glob_rec(&pat, &txt)
}

fn glob_rec(pat: &[char], txt: &[char]) -> bool {
    match pat.first() {
        None => txt.is_empty(),
        Some('*') => {
            // try every split point
            (0..=txt.len()).any(|i| glob_rec(&pat[1..], &txt[i..]))
        }
        Some('?') => !txt.is_empty() && glob_rec(&pat[1..], &txt[1..]),
        Some('[') => {
            let close = match pat.iter().position(|&c| c == ']') {
                // tolerate an unterminated set by matching it literally
                None => return !txt.is_empty() && txt[0] == '[' && glob_rec(&pat[1..], &txt[1..]),
                Some(i) => i,
            };
            let (set, negated) = if pat.get(1) == Some(&'!') {
                (&pat[2..close], true)
            } else {
                (&pat[1..close], false)
            };
            let Some(&c) = txt.first() else { return false };
            let mut matched = false;
            let mut i = 0;
            while i < set.len() {
                if i + 2 < set.len() && set[i + 1] == '-' {
                    if set[i] <= c && c <= set[i + 2] {
                        matched = true;
                    }
                    i += 3;
                } else {
                    if set[i] == c {
                        matched = true;
                    }
                    i += 1;
                }
            }
            if matched == negated {
                return false;
            }
            glob_rec(&pat[close + 1..], &txt[1..])
        }
        Some(&c) => !txt.is_empty() && txt[0] == c && glob_rec(&pat[1..], &txt[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_basics() {
        assert!(glob_match("*.txt", "notes.txt", false));
        assert!(!glob_match("*.txt", "notes.txt.bak", false));
        assert!(glob_match("file?.rs", "file1.rs", false));
        assert!(glob_match("[a-c]*", "banana", false));
        assert!(!glob_match("[!a-c]*", "banana", false));
        assert!(glob_match("*", "", false));
        assert!(glob_match("NOTES.*", "notes.txt", true));
        assert!(!glob_match("NOTES.*", "notes.txt", false));
    }
}
