//! Three-way text merge.
//!
//! Given a common ancestor ("base") and two descendant texts ("local" and
//! "remote"), produce one text incorporating both sides' changes, with
//! conflict markers where they collide.
//!
//! The alignment trick: diff base against each side independently, then
//! intersect the two sets of matching blocks. A span of base that survives
//! unchanged in *both* descendants is a sync region - indisputably common
//! ground. Whatever sits between two consecutive sync regions changed
//! somewhere, and a straight comparison of the three sub-spans classifies it:
//! both sides made the same edit, one side edited, or the sides disagree.
//! A zero-length sync region at end-of-file guarantees the final span gets
//! classified like any other.

use std::ops::Range;

use crate::error::RevlogError;
use crate::matcher::{matching_blocks, split_lines};

const START_MARKER: &[u8] = b"<<<<<<<";
const BASE_MARKER: &[u8] = b"|||||||";
const MID_MARKER: &[u8] = b"=======";
const END_MARKER: &[u8] = b">>>>>>>";

/// Merge policy knobs, handed down from configuration as plain values.
#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    /// Label after the opening marker (conventionally the local revision).
    pub label_local: Option<String>,
    /// Label after the closing marker.
    pub label_remote: Option<String>,
    /// Label after the base marker, when `show_base` is on.
    pub label_base: Option<String>,
    /// Include the base text between the markers. Mutually exclusive with
    /// `minimize`.
    pub show_base: bool,
    /// Re-diff conflicting spans against each other and shrink the markers
    /// to the lines that truly diverge.
    pub minimize: bool,
}

/// One classified span of the merge output. Ranges are line indices into the
/// respective input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeRegion {
    /// Untouched by either side; content from base.
    Unchanged { base: Range<usize> },
    /// Both sides made the identical change; content from local.
    Same { local: Range<usize> },
    /// Only local changed.
    LocalOnly { local: Range<usize> },
    /// Only remote changed.
    RemoteOnly { remote: Range<usize> },
    /// The sides disagree. (After minimizing, the base range is empty.)
    Conflict {
        base: Range<usize>,
        local: Range<usize>,
        remote: Range<usize>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeResult {
    pub text: Vec<u8>,
    /// True when any conflict markers were emitted. This flag, not the
    /// output text, is the authoritative "did it conflict" answer.
    pub conflicts: bool,
}

/// A span of base present verbatim in both descendants.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SyncRegion {
    base: Range<usize>,
    local: Range<usize>,
    remote: Range<usize>,
}

pub struct Merge3<'a> {
    base: Vec<&'a [u8]>,
    local: Vec<&'a [u8]>,
    remote: Vec<&'a [u8]>,
}

impl<'a> Merge3<'a> {
    pub fn new(base: &'a [u8], local: &'a [u8], remote: &'a [u8]) -> Self {
        Merge3 {
            base: split_lines(base),
            local: split_lines(local),
            remote: split_lines(remote),
        }
    }

    fn sync_regions(&self) -> Vec<SyncRegion> {
        let local_matches = matching_blocks(&self.base, &self.local);
        let remote_matches = matching_blocks(&self.base, &self.remote);

        let mut out = Vec::new();
        let (mut il, mut ir) = (0, 0);
        while il < local_matches.len() && ir < remote_matches.len() {
            let lm = local_matches[il];
            let rm = remote_matches[ir];

            // Intersect the two base spans.
            let lo = lm.a_start.max(rm.a_start);
            let hi = (lm.a_start + lm.len).min(rm.a_start + rm.len);
            if lo < hi {
                let local_start = lm.b_start + (lo - lm.a_start);
                let remote_start = rm.b_start + (lo - rm.a_start);
                let len = hi - lo;

                debug_assert_eq!(
                    &self.base[lo..hi],
                    &self.local[local_start..local_start + len]
                );
                debug_assert_eq!(
                    &self.base[lo..hi],
                    &self.remote[remote_start..remote_start + len]
                );

                out.push(SyncRegion {
                    base: lo..hi,
                    local: local_start..local_start + len,
                    remote: remote_start..remote_start + len,
                });
            }

            if lm.a_start + lm.len < rm.a_start + rm.len {
                il += 1;
            } else {
                ir += 1;
            }
        }

        // The end of file always lines up.
        out.push(SyncRegion {
            base: self.base.len()..self.base.len(),
            local: self.local.len()..self.local.len(),
            remote: self.remote.len()..self.remote.len(),
        });
        out
    }

    /// Classify the whole merge into ordered regions.
    pub fn merge_regions(&self) -> Vec<MergeRegion> {
        let mut out = Vec::new();
        let (mut iz, mut ia, mut ib) = (0, 0, 0);

        for sync in self.sync_regions() {
            let len_local = sync.local.start - ia;
            let len_remote = sync.remote.start - ib;

            if len_local > 0 || len_remote > 0 {
                let local_span = &self.local[ia..sync.local.start];
                let remote_span = &self.remote[ib..sync.remote.start];
                let base_span = &self.base[iz..sync.base.start];

                if local_span == remote_span {
                    out.push(MergeRegion::Same { local: ia..sync.local.start });
                } else if local_span == base_span {
                    out.push(MergeRegion::RemoteOnly { remote: ib..sync.remote.start });
                } else if remote_span == base_span {
                    out.push(MergeRegion::LocalOnly { local: ia..sync.local.start });
                } else {
                    out.push(MergeRegion::Conflict {
                        base: iz..sync.base.start,
                        local: ia..sync.local.start,
                        remote: ib..sync.remote.start,
                    });
                }
                ia = sync.local.start;
                ib = sync.remote.start;
            }
            iz = sync.base.start;

            if sync.base.end > sync.base.start {
                out.push(MergeRegion::Unchanged { base: sync.base.clone() });
                ia = sync.local.end;
                ib = sync.remote.end;
                iz = sync.base.end;
            }
        }
        out
    }

    /// Like [`merge_regions`](Self::merge_regions), but re-diff each conflict
    /// against itself: runs of lines both sides agree on inside a conflict
    /// become `Same`, leaving markers around only the truly divergent lines.
    pub fn minimized_regions(&self) -> Vec<MergeRegion> {
        let mut out = Vec::new();
        for region in self.merge_regions() {
            let MergeRegion::Conflict { base, local, remote } = &region else {
                out.push(region);
                continue;
            };

            let local_lines = &self.local[local.clone()];
            let remote_lines = &self.remote[remote.clone()];
            let blocks = matching_blocks(local_lines, remote_lines);

            let mut next_local = local.start;
            let mut next_remote = remote.start;
            for block in &blocks[..blocks.len() - 1] {
                let block_local = local.start + block.a_start;
                let block_remote = remote.start + block.b_start;

                push_conflict(&mut out, base.start, next_local..block_local, next_remote..block_remote);
                out.push(MergeRegion::Same { local: block_local..block_local + block.len });

                next_local = block_local + block.len;
                next_remote = block_remote + block.len;
            }
            push_conflict(&mut out, base.start, next_local..local.end, next_remote..remote.end);
        }
        out
    }

    /// Render the merge, CVS style. Reports whether any conflict survived.
    pub fn merge_lines(&self, opts: &MergeOptions) -> Result<MergeResult, RevlogError> {
        if opts.show_base && opts.minimize {
            return Err(RevlogError::validation(
                "cannot both minimize conflicts and show base markers",
            ));
        }

        // Match the marker lines to whatever the local side uses.
        let newline: &[u8] = match self.local.first() {
            Some(l) if l.ends_with(b"\r\n") => b"\r\n",
            Some(l) if l.ends_with(b"\r") => b"\r",
            _ => b"\n",
        };

        let regions =
            if opts.minimize { self.minimized_regions() } else { self.merge_regions() };

        let mut text = Vec::new();
        let mut conflicts = false;
        for region in &regions {
            match region {
                MergeRegion::Unchanged { base } => self.push_lines(&mut text, &self.base, base),
                MergeRegion::Same { local } | MergeRegion::LocalOnly { local } => {
                    self.push_lines(&mut text, &self.local, local)
                }
                MergeRegion::RemoteOnly { remote } => {
                    self.push_lines(&mut text, &self.remote, remote)
                }
                MergeRegion::Conflict { base, local, remote } => {
                    conflicts = true;
                    push_marker(&mut text, START_MARKER, opts.label_local.as_deref(), newline);
                    self.push_lines(&mut text, &self.local, local);
                    if opts.show_base {
                        push_marker(&mut text, BASE_MARKER, opts.label_base.as_deref(), newline);
                        self.push_lines(&mut text, &self.base, base);
                    }
                    push_marker(&mut text, MID_MARKER, None, newline);
                    self.push_lines(&mut text, &self.remote, remote);
                    push_marker(&mut text, END_MARKER, opts.label_remote.as_deref(), newline);
                }
            }
        }

        Ok(MergeResult { text, conflicts })
    }

    fn push_lines(&self, out: &mut Vec<u8>, from: &[&[u8]], range: &Range<usize>) {
        for line in &from[range.clone()] {
            out.extend_from_slice(line);
        }
    }
}

fn push_conflict(
    out: &mut Vec<MergeRegion>,
    base_at: usize,
    local: Range<usize>,
    remote: Range<usize>,
) {
    if local.is_empty() && remote.is_empty() {
        return;
    }
    // Minimized conflicts carry no base span; there's no meaningful base
    // alignment inside a re-diffed conflict.
    out.push(MergeRegion::Conflict { base: base_at..base_at, local, remote });
}

fn push_marker(out: &mut Vec<u8>, marker: &[u8], label: Option<&str>, newline: &[u8]) {
    out.extend_from_slice(marker);
    if let Some(label) = label {
        out.push(b' ');
        out.extend_from_slice(label.as_bytes());
    }
    out.extend_from_slice(newline);
}

/// One-shot merge of three texts.
pub fn three_way_merge(
    base: &[u8],
    local: &[u8],
    remote: &[u8],
    opts: &MergeOptions,
) -> Result<MergeResult, RevlogError> {
    Merge3::new(base, local, remote).merge_lines(opts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merge(base: &str, local: &str, remote: &str) -> MergeResult {
        three_way_merge(
            base.as_bytes(),
            local.as_bytes(),
            remote.as_bytes(),
            &MergeOptions::default(),
        )
        .unwrap()
    }

    fn merge_str(base: &str, local: &str, remote: &str) -> (String, bool) {
        let r = merge(base, local, remote);
        (String::from_utf8(r.text).unwrap(), r.conflicts)
    }

    #[test]
    fn identical_sides_merge_to_themselves() {
        let (out, conflicts) = merge_str("a\nb\nc\n", "a\nX\nc\n", "a\nX\nc\n");
        assert_eq!(out, "a\nX\nc\n");
        assert!(!conflicts);
    }

    #[test]
    fn one_sided_changes_win() {
        // Only remote changed.
        let (out, conflicts) = merge_str("a\nb\nc\n", "a\nb\nc\n", "a\nZ\nc\n");
        assert_eq!(out, "a\nZ\nc\n");
        assert!(!conflicts);

        // Only local changed.
        let (out, conflicts) = merge_str("a\nb\nc\n", "a\nY\nc\n", "a\nb\nc\n");
        assert_eq!(out, "a\nY\nc\n");
        assert!(!conflicts);
    }

    #[test]
    fn non_overlapping_changes_both_apply() {
        let (out, conflicts) =
            merge_str("a\nb\nc\nd\ne\n", "A\nb\nc\nd\ne\n", "a\nb\nc\nd\nE\n");
        assert_eq!(out, "A\nb\nc\nd\nE\n");
        assert!(!conflicts);
    }

    #[test]
    fn colliding_changes_conflict() {
        let (out, conflicts) = merge_str("a\nb\nc\n", "a\nX\nc\n", "a\nY\nc\n");
        assert!(conflicts);
        assert_eq!(out, "a\n<<<<<<<\nX\n=======\nY\n>>>>>>>\nc\n");
    }

    #[test]
    fn conflict_regions_carry_all_three_spans() {
        let m = Merge3::new(b"a\nb\nc\n", b"a\nX\nc\n", b"a\nY\nc\n");
        let regions = m.merge_regions();
        assert_eq!(
            regions,
            vec![
                MergeRegion::Unchanged { base: 0..1 },
                MergeRegion::Conflict { base: 1..2, local: 1..2, remote: 1..2 },
                MergeRegion::Unchanged { base: 2..3 },
            ]
        );
    }

    #[test]
    fn labels_are_appended_to_markers() {
        let opts = MergeOptions {
            label_local: Some("working copy".into()),
            label_remote: Some("merge rev".into()),
            ..Default::default()
        };
        let r = three_way_merge(b"b\n", b"x\n", b"y\n", &opts).unwrap();
        let out = String::from_utf8(r.text).unwrap();
        assert!(out.contains("<<<<<<< working copy\n"));
        assert!(out.contains(">>>>>>> merge rev\n"));
        assert!(r.conflicts);
    }

    #[test]
    fn show_base_includes_ancestor_text() {
        let opts = MergeOptions { show_base: true, ..Default::default() };
        let r = three_way_merge(b"orig\n", b"x\n", b"y\n", &opts).unwrap();
        let out = String::from_utf8(r.text).unwrap();
        assert_eq!(out, "<<<<<<<\nx\n|||||||\norig\n=======\ny\n>>>>>>>\n");
    }

    #[test]
    fn show_base_and_minimize_reject_each_other() {
        let opts = MergeOptions { show_base: true, minimize: true, ..Default::default() };
        let err = three_way_merge(b"b\n", b"x\n", b"y\n", &opts);
        assert!(matches!(err, Err(RevlogError::Validation(_))));
    }

    #[test]
    fn minimize_narrows_conflicts_to_divergent_lines() {
        // Both sides appended the same two lines, but disagree on one in the
        // middle. Unminimized, the whole tail is one conflict.
        let base = "start\n";
        let local = "start\ncommon one\nLOCAL\ncommon two\n";
        let remote = "start\ncommon one\nREMOTE\ncommon two\n";

        let plain = merge(base, local, remote);
        assert!(plain.conflicts);

        let opts = MergeOptions { minimize: true, ..Default::default() };
        let r = three_way_merge(base.as_bytes(), local.as_bytes(), remote.as_bytes(), &opts)
            .unwrap();
        let out = String::from_utf8(r.text).unwrap();
        assert!(r.conflicts);
        assert_eq!(
            out,
            "start\ncommon one\n<<<<<<<\nLOCAL\n=======\nREMOTE\n>>>>>>>\ncommon two\n"
        );
    }

    #[test]
    fn both_empty_sides() {
        let (out, conflicts) = merge_str("a\n", "", "");
        assert_eq!(out, "");
        assert!(!conflicts);

        let (out, conflicts) = merge_str("", "", "");
        assert_eq!(out, "");
        assert!(!conflicts);
    }

    #[test]
    fn deletion_against_edit_conflicts() {
        let (out, conflicts) = merge_str("a\nb\nc\n", "a\nc\n", "a\nB\nc\n");
        assert!(conflicts);
        assert_eq!(out, "a\n<<<<<<<\n=======\nB\n>>>>>>>\nc\n");
    }

    #[test]
    fn crlf_input_gets_crlf_markers() {
        let (out, conflicts) = merge_str("a\r\nb\r\n", "a\r\nx\r\n", "a\r\ny\r\n");
        assert!(conflicts);
        assert_eq!(out, "a\r\n<<<<<<<\r\nx\r\n=======\r\ny\r\n>>>>>>>\r\n");
    }

    #[test]
    fn no_trailing_newline_is_preserved() {
        let (out, conflicts) = merge_str("a\nend", "a\nend", "a\nend");
        assert_eq!(out, "a\nend");
        assert!(!conflicts);
    }
}
