//! Longest-matching-block diff between two sequences.
//!
//! This is the classic difflib approach: index every element of `b` by value,
//! then for each position of `a` extend runs of matches using the previous
//! row's run lengths. Recursing on the regions either side of the longest
//! match gives all maximal common blocks.
//!
//! Very common ("popular") elements are dropped from the index on large
//! inputs - think thousands of identical blank lines - because they blow the
//! quadratic phase up for no real alignment value. The extension steps at the
//! end of [`SequenceMatcher::find_longest_match`] stitch them back onto the
//! blocks they belong to.

use std::collections::HashMap;
use std::hash::Hash;

/// One maximal run of equal elements: `a[a_start..a_start+len] ==
/// b[b_start..b_start+len]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MatchBlock {
    pub a_start: usize,
    pub b_start: usize,
    pub len: usize,
}

pub struct SequenceMatcher<'a, T> {
    a: &'a [T],
    b: &'a [T],
    /// Element -> positions in b. Popular elements are absent.
    b_index: HashMap<&'a T, Vec<usize>>,
}

impl<'a, T: Eq + Hash> SequenceMatcher<'a, T> {
    pub fn new(a: &'a [T], b: &'a [T]) -> Self {
        let n = b.len();
        let mut b_index: HashMap<&T, Vec<usize>> = HashMap::new();
        let mut popular: Vec<&T> = Vec::new();

        for (i, elt) in b.iter().enumerate() {
            let positions = b_index.entry(elt).or_default();
            if n >= 2000 && positions.len() * 100 > n {
                popular.push(elt);
                positions.clear();
            } else {
                positions.push(i);
            }
        }
        for elt in popular {
            b_index.remove(elt);
        }

        SequenceMatcher { a, b, b_index }
    }

    /// Longest run of matching elements within `a[alo..ahi]` / `b[blo..bhi]`.
    /// Of equally long runs, the one starting earliest in `a` (then `b`) wins,
    /// which keeps the output deterministic.
    fn find_longest_match(&self, alo: usize, ahi: usize, blo: usize, bhi: usize) -> MatchBlock {
        let (mut best_a, mut best_b, mut best_len) = (alo, blo, 0);
        let mut run_len: HashMap<usize, usize> = HashMap::new();

        for i in alo..ahi {
            let mut new_run_len = HashMap::new();
            if let Some(positions) = self.b_index.get(&self.a[i]) {
                for &j in positions {
                    if j < blo {
                        continue;
                    }
                    if j >= bhi {
                        break;
                    }
                    let k = if j > blo { run_len.get(&(j - 1)).copied().unwrap_or(0) + 1 } else { 1 };
                    new_run_len.insert(j, k);
                    if k > best_len {
                        best_a = i + 1 - k;
                        best_b = j + 1 - k;
                        best_len = k;
                    }
                }
            }
            run_len = new_run_len;
        }

        // Grow over popular elements that were left out of the index.
        while best_a > alo && best_b > blo && self.a[best_a - 1] == self.b[best_b - 1] {
            best_a -= 1;
            best_b -= 1;
            best_len += 1;
        }
        while best_a + best_len < ahi
            && best_b + best_len < bhi
            && self.a[best_a + best_len] == self.b[best_b + best_len]
        {
            best_len += 1;
        }

        MatchBlock { a_start: best_a, b_start: best_b, len: best_len }
    }

    /// All maximal matching blocks, in increasing `(a_start, b_start)` order,
    /// terminated by the zero-length `(a.len(), b.len(), 0)` sentinel.
    pub fn matching_blocks(&self) -> Vec<MatchBlock> {
        let (la, lb) = (self.a.len(), self.b.len());

        // An explicit queue rather than recursion: a huge file with many
        // matches would otherwise blow the stack.
        let mut queue = vec![(0, la, 0, lb)];
        let mut raw: Vec<MatchBlock> = Vec::new();
        while let Some((alo, ahi, blo, bhi)) = queue.pop() {
            let m = self.find_longest_match(alo, ahi, blo, bhi);
            if m.len > 0 {
                raw.push(m);
                if alo < m.a_start && blo < m.b_start {
                    queue.push((alo, m.a_start, blo, m.b_start));
                }
                if m.a_start + m.len < ahi && m.b_start + m.len < bhi {
                    queue.push((m.a_start + m.len, ahi, m.b_start + m.len, bhi));
                }
            }
        }
        raw.sort_unstable();

        // Blocks split around popular elements can come out adjacent; fold
        // them back into single runs.
        let mut blocks: Vec<MatchBlock> = Vec::with_capacity(raw.len() + 1);
        let mut cur = MatchBlock { a_start: 0, b_start: 0, len: 0 };
        for m in raw {
            if cur.a_start + cur.len == m.a_start && cur.b_start + cur.len == m.b_start {
                cur.len += m.len;
            } else {
                if cur.len > 0 {
                    blocks.push(cur);
                }
                cur = m;
            }
        }
        if cur.len > 0 {
            blocks.push(cur);
        }

        blocks.push(MatchBlock { a_start: la, b_start: lb, len: 0 });
        blocks
    }
}

pub fn matching_blocks<T: Eq + Hash>(a: &[T], b: &[T]) -> Vec<MatchBlock> {
    SequenceMatcher::new(a, b).matching_blocks()
}

/// Split text into lines, keeping the `\n` terminators. A trailing fragment
/// with no newline is still a line.
pub fn split_lines(text: &[u8]) -> Vec<&[u8]> {
    let mut out = Vec::new();
    let mut start = 0;
    for (i, &byte) in text.iter().enumerate() {
        if byte == b'\n' {
            out.push(&text[start..=i]);
            start = i + 1;
        }
    }
    if start < text.len() {
        out.push(&text[start..]);
    }
    out
}
