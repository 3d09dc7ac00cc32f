//! Replaying delta chains.
//!
//! Applying a long chain of patches by materializing every intermediate text
//! costs O(patches * text size). Instead the running text is kept as a list
//! of fragments - `(offset, len)` spans into one append-only arena that holds
//! the original source plus every inserted literal. Applying a patch only
//! shuffles fragments around; bytes are copied once, at the end.
//!
//! The fragment list is collapsed (copied out into a single fresh span) when
//! it grows past [`COLLAPSE_AT`] entries, which bounds both lookup cost and
//! the arena bookkeeping on pathological chains.

use std::collections::VecDeque;

use crate::delta::{unpack_deltas, PatchError};

const COLLAPSE_AT: usize = 128;

/// `(offset, len)` into the arena.
type Fragment = (usize, usize);

/// Apply a sequence of delta payloads to `source`, in order. An empty patch
/// list returns the source verbatim.
pub fn apply_patches(source: &[u8], patches: &[Vec<u8>]) -> Result<Vec<u8>, PatchError> {
    if patches.is_empty() {
        return Ok(source.to_vec());
    }

    let mut arena: Vec<u8> = source.to_vec();
    let mut frags: VecDeque<Fragment> = VecDeque::new();
    if !source.is_empty() {
        frags.push_back((0, source.len()));
    }

    for payload in patches {
        let deltas = unpack_deltas(payload)?;

        if frags.len() > COLLAPSE_AT {
            collapse(&mut arena, &mut frags);
        }

        let mut next: Vec<Fragment> = Vec::new();
        let mut last_end = 0;
        for d in &deltas {
            // Everything between the previous instruction and this one is
            // kept; the replaced range is dropped.
            take(&mut next, &mut frags, d.start - last_end)?;
            skip(&mut frags, d.end - d.start)?;
            if !d.data.is_empty() {
                let off = arena.len();
                arena.extend_from_slice(&d.data);
                next.push((off, d.data.len()));
            }
            last_end = d.end;
        }
        // The tail of the previous text, untouched.
        next.extend(frags.drain(..));
        frags = next.into();
    }

    let total: usize = frags.iter().map(|f| f.1).sum();
    let mut out = Vec::with_capacity(total);
    for (off, len) in frags {
        out.extend_from_slice(&arena[off..off + len]);
    }
    Ok(out)
}

/// Move `n` bytes worth of fragments from the head of `src` onto `dst`,
/// splitting the last fragment if needed.
fn take(dst: &mut Vec<Fragment>, src: &mut VecDeque<Fragment>, mut n: usize) -> Result<(), PatchError> {
    while n > 0 {
        let Some((off, len)) = src.pop_front() else {
            return Err(PatchError::RangeOutOfBounds);
        };
        if len > n {
            src.push_front((off + n, len - n));
            dst.push((off, n));
            return Ok(());
        }
        dst.push((off, len));
        n -= len;
    }
    Ok(())
}

/// Drop `n` bytes worth of fragments from the head of `src`.
fn skip(src: &mut VecDeque<Fragment>, mut n: usize) -> Result<(), PatchError> {
    while n > 0 {
        let Some((off, len)) = src.pop_front() else {
            return Err(PatchError::RangeOutOfBounds);
        };
        if len > n {
            src.push_front((off + n, len - n));
            return Ok(());
        }
        n -= len;
    }
    Ok(())
}

fn collapse(arena: &mut Vec<u8>, frags: &mut VecDeque<Fragment>) {
    let total: usize = frags.iter().map(|f| f.1).sum();
    let start = arena.len();
    arena.reserve(total);
    for &(off, len) in frags.iter() {
        arena.extend_from_within(off..off + len);
    }
    frags.clear();
    frags.push_back((start, total));
}

/// Length of `apply_patches(text_of_len(original_len), [payload])` without
/// building anything - used to preflight allocations.
pub fn patched_size(original_len: usize, payload: &[u8]) -> Result<usize, PatchError> {
    let deltas = unpack_deltas(payload)?;
    let mut out = 0;
    let mut last_end = 0;
    for d in &deltas {
        if d.end > original_len {
            return Err(PatchError::RangeOutOfBounds);
        }
        out += (d.start - last_end) + d.data.len();
        last_end = d.end;
    }
    Ok(out + (original_len - last_end))
}

#[cfg(test)]
mod tests {
    use rand::prelude::*;

    use super::*;
    use crate::delta::{diff_texts, pack_deltas, Delta};

    fn apply_one(source: &[u8], payload: &[u8]) -> Vec<u8> {
        apply_patches(source, &[payload.to_vec()]).unwrap()
    }

    #[test]
    fn empty_patch_list_is_identity() {
        assert_eq!(apply_patches(b"hello", &[]).unwrap(), b"hello");
        assert_eq!(apply_patches(b"", &[]).unwrap(), b"");
    }

    #[test]
    fn whole_text_replacement() {
        let source = b"old contents\n";
        let payload = pack_deltas(&[Delta {
            start: 0,
            end: source.len(),
            data: b"new contents\n".to_vec(),
        }]);
        assert_eq!(apply_one(source, &payload), b"new contents\n");
        assert_eq!(patched_size(source.len(), &payload).unwrap(), 13);
    }

    #[test]
    fn patch_beyond_text_is_corruption() {
        let payload = pack_deltas(&[Delta { start: 3, end: 10, data: vec![] }]);
        assert_eq!(
            apply_patches(b"ab", &[payload.clone()]),
            Err(PatchError::RangeOutOfBounds)
        );
        assert_eq!(patched_size(2, &payload), Err(PatchError::RangeOutOfBounds));
    }

    #[test]
    fn diffs_round_trip() {
        let cases: &[(&[u8], &[u8])] = &[
            (b"a\nb\nc\n", b"a\nX\nc\n"),
            (b"a\nb\nc\n", b"c\n"),
            (b"", b"whole new file\n"),
            (b"only\n", b""),
            (b"no newline at end", b"no newline at the end"),
            (b"a\nb\nc\nd\ne\n", b"e\nd\nc\nb\na\n"),
        ];
        for (a, b) in cases {
            let payload = diff_texts(a, b);
            assert_eq!(apply_one(a, &payload), *b, "diff {:?} -> {:?}", a, b);
            assert_eq!(patched_size(a.len(), &payload).unwrap(), b.len());
        }
    }

    #[test]
    fn chains_apply_in_order() {
        // Each payload applies to the output of the one before it.
        let v0 = b"a\nb\nc\n".to_vec();
        let v1 = b"a\nx\nc\n".to_vec();
        let v2 = b"start\na\nx\nc\n".to_vec();
        let v3 = b"start\nx\nc\nend\n".to_vec();

        let patches = vec![
            diff_texts(&v0, &v1),
            diff_texts(&v1, &v2),
            diff_texts(&v2, &v3),
        ];
        assert_eq!(apply_patches(&v0, &patches).unwrap(), v3);
    }

    #[test]
    fn long_chains_collapse_correctly() {
        // Hundreds of single-line edits, enough to trip the fragment-list
        // collapse several times over.
        let mut versions = vec![Vec::new()];
        let mut text = Vec::new();
        for i in 0..400 {
            text.extend_from_slice(format!("line {i}\n").as_bytes());
            versions.push(text.clone());
        }

        let patches: Vec<Vec<u8>> = versions
            .windows(2)
            .map(|w| diff_texts(&w[0], &w[1]))
            .collect();

        assert_eq!(apply_patches(&versions[0], &patches).unwrap(), *versions.last().unwrap());
    }

    fn random_text(rng: &mut SmallRng, max_lines: usize) -> Vec<u8> {
        let lines = rng.gen_range(0..max_lines);
        let mut out = Vec::new();
        for _ in 0..lines {
            // A tiny alphabet, so diffs actually find matches.
            let word = ["alpha", "beta", "gamma", "delta", "x"][rng.gen_range(0..5)];
            out.extend_from_slice(word.as_bytes());
            out.push(b'\n');
        }
        out
    }

    #[test]
    fn fuzz_diff_apply_round_trip() {
        let mut rng = SmallRng::seed_from_u64(12);

        for _ in 0..300 {
            let a = random_text(&mut rng, 30);
            let b = random_text(&mut rng, 30);
            let payload = diff_texts(&a, &b);
            assert_eq!(apply_one(&a, &payload), b);
            assert_eq!(patched_size(a.len(), &payload).unwrap(), b.len());
        }
    }

    #[test]
    fn fuzz_chain_replay() {
        let mut rng = SmallRng::seed_from_u64(99);

        for _ in 0..30 {
            let mut current = random_text(&mut rng, 20);
            let first = current.clone();
            let mut patches = Vec::new();
            for _ in 0..rng.gen_range(1..200) {
                let next = random_text(&mut rng, 20);
                patches.push(diff_texts(&current, &next));
                current = next;
            }
            assert_eq!(apply_patches(&first, &patches).unwrap(), current);
        }
    }
}
