//! Closest common ancestor search.
//!
//! The obvious approach - materialize `ancestors(a)`, materialize
//! `ancestors(b)`, intersect - walks all of history even when the answer is
//! two edges away, which is the common case when merging in an active
//! repository. So this runs lazily instead:
//!
//! 1. Rank every node reachable from `a` or `b` with a depth:
//!    `depth(v) = min(depth(parent)) - 1`, roots at zero. Depths get more
//!    negative toward the search heads. (If a parent of something we visit
//!    *is* `a` or `b`, that parent is the answer and we're done already.)
//! 2. Run one lazy ancestor iterator per side, each yielding nodes grouped
//!    by depth, most recent (most negative) groups first, driven by a
//!    priority queue and a seen set.
//! 3. Keep the two iterators synchronized on depth, always advancing the one
//!    that's behind. The first depth level where the two emitted groups
//!    intersect holds the closest common ancestor.
//!
//! Disconnected histories simply run both iterators dry: that's a `None`,
//! not an error.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use smallvec::SmallVec;

use crate::error::RevlogError;
use crate::file::LogFile;
use crate::node::NodeId;
use crate::revlog::Revlog;
use crate::Rev;

type Depth = i64;

/// Lazily yields the ancestors of one seed, one depth group per call,
/// in increasing depth (most recent first).
struct AncestorGroups<'a, P> {
    parents: &'a P,
    depth: &'a HashMap<Rev, Depth>,
    heap: BinaryHeap<Reverse<(Depth, Rev)>>,
    seen: HashSet<Rev>,
}

impl<'a, P> AncestorGroups<'a, P>
where
    P: Fn(Rev) -> SmallVec<[Rev; 2]>,
{
    fn new(seed: Rev, depth: &'a HashMap<Rev, Depth>, parents: &'a P) -> Self {
        let mut heap = BinaryHeap::new();
        heap.push(Reverse((depth[&seed], seed)));
        AncestorGroups { parents, depth, heap, seen: HashSet::new() }
    }

    fn visit(&mut self, node: Rev) {
        for p in (self.parents)(node) {
            // Anything queued here was ranked in the depth pass.
            self.heap.push(Reverse((self.depth[&p], p)));
        }
    }

    /// The next batch of ancestors, all at the same depth.
    fn next_group(&mut self) -> Option<(Depth, HashSet<Rev>)> {
        let mut group = HashSet::new();

        // Find the first node we haven't emitted yet; duplicates queue up
        // whenever histories re-merge.
        let group_depth = loop {
            let Reverse((d, node)) = self.heap.pop()?;
            if self.seen.insert(node) {
                group.insert(node);
                self.visit(node);
                break d;
            }
        };

        // And everything else sitting at the same depth.
        while let Some(&Reverse((d, node))) = self.heap.peek() {
            if d != group_depth {
                break;
            }
            self.heap.pop();
            if self.seen.insert(node) {
                group.insert(node);
                self.visit(node);
            }
        }

        Some((group_depth, group))
    }
}

/// Find the closest common ancestor of `a` and `b` in the DAG described by
/// `parents`. The parent function returns the (0, 1 or 2) parents of a node.
/// Returns `None` when the two share no history at all.
pub fn common_ancestor<P>(a: Rev, b: Rev, parents: P) -> Option<Rev>
where
    P: Fn(Rev) -> SmallVec<[Rev; 2]>,
{
    if a == b {
        return Some(a);
    }

    // Depth pass: an explicit stack, popping a node only once every parent
    // has been ranked.
    let mut depth: HashMap<Rev, Depth> = HashMap::new();
    let mut to_visit = vec![a, b];
    while let Some(&node) = to_visit.last() {
        if depth.contains_key(&node) {
            to_visit.pop();
            continue;
        }
        let ps = parents(node);
        if ps.is_empty() {
            depth.insert(node, 0);
            to_visit.pop();
            continue;
        }
        for &p in &ps {
            // One input sitting in the other's history short-circuits the
            // whole search.
            if p == a || p == b {
                return Some(p);
            }
        }
        let mut ready = true;
        for &p in &ps {
            if !depth.contains_key(&p) {
                to_visit.push(p);
                ready = false;
            }
        }
        if ready {
            let min = ps.iter().map(|p| depth[p]).min().unwrap();
            depth.insert(node, min - 1);
            to_visit.pop();
        }
    }

    let mut side_a = AncestorGroups::new(a, &depth, &parents);
    let mut side_b = AncestorGroups::new(b, &depth, &parents);

    let mut ga = side_a.next_group();
    let mut gb = side_b.next_group();

    loop {
        let (da, db) = match (&ga, &gb) {
            (Some((da, _)), Some((db, _))) => (*da, *db),
            // Either side running dry means the histories never meet.
            _ => return None,
        };

        if da == db {
            let sa = &ga.as_ref().unwrap().1;
            let sb = &gb.as_ref().unwrap().1;
            let common = sa.iter().filter(|n| sb.contains(*n)).max().copied();
            if let Some(found) = common {
                return Some(found);
            }
            ga = side_a.next_group();
            gb = side_b.next_group();
        } else if da > db {
            // b's side is behind in emission order; let it catch up.
            gb = side_b.next_group();
        } else {
            ga = side_a.next_group();
        }
    }
}

impl<F: LogFile> Revlog<F> {
    /// Closest common ancestor of two revisions.
    pub fn common_ancestor_rev(&self, a: Rev, b: Rev) -> Option<Rev> {
        if a >= self.revision_count() || b >= self.revision_count() {
            return None;
        }
        common_ancestor(a, b, |rev| self.parent_revs(rev))
    }

    /// Closest common ancestor by node id. Unknown inputs are a caller
    /// error; two valid nodes without shared history are `Ok(None)`.
    pub fn common_ancestor_node(
        &self,
        a: NodeId,
        b: NodeId,
    ) -> Result<Option<NodeId>, RevlogError> {
        let ra = self
            .index_of(a)
            .ok_or_else(|| RevlogError::validation(format!("unknown node {a:?}")))?;
        let rb = self
            .index_of(b)
            .ok_or_else(|| RevlogError::validation(format!("unknown node {b:?}")))?;
        Ok(self.common_ancestor_rev(ra, rb).map(|r| self.node_id(r).unwrap()))
    }
}
