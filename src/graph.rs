//! Traversals over the revision DAG.
//!
//! Everything here works purely off the parent pointers in the index, so the
//! algorithms never care whether a revision is stored as a snapshot or a
//! delta. Two properties do the heavy lifting:
//!
//! - parents always have a smaller revision number than their children (the
//!   log is a topologically-ordered append log), so "all descendants" is a
//!   single forward scan;
//! - children aren't stored, so anything that needs them derives a
//!   rev -> children table from the parent pointers, lazily, once.

use std::collections::{HashMap, HashSet, VecDeque};

use smallvec::SmallVec;

use crate::error::RevlogError;
use crate::file::LogFile;
use crate::node::{NodeId, NULL_ID};
use crate::revlog::Revlog;
use crate::{Rev, NULL_REV};

/// What must travel between two repository states: every node on a path from
/// a root to a head, plus the roots/heads that survived pruning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodesBetween {
    /// Topologically ordered.
    pub between: Vec<NodeId>,
    pub roots: Vec<NodeId>,
    pub heads: Vec<NodeId>,
}

impl NodesBetween {
    fn empty() -> Self {
        NodesBetween { between: vec![], roots: vec![], heads: vec![] }
    }
}

impl<F: LogFile> Revlog<F> {
    /// Every revision reachable from the seeds by following parent edges.
    /// The seeds themselves are only included if some other seed reaches
    /// them.
    pub fn ancestors(&self, seeds: &[Rev]) -> HashSet<Rev> {
        let mut to_visit: VecDeque<Rev> = seeds.iter().copied().collect();
        let mut seen = HashSet::new();
        while let Some(rev) = to_visit.pop_front() {
            for p in self.parent_revs(rev) {
                if seen.insert(p) {
                    to_visit.push_back(p);
                }
            }
        }
        seen
    }

    /// Every revision that has some seed among its ancestors, excluding the
    /// seeds. One forward pass, thanks to the topological ordering.
    pub fn descendants(&self, seeds: &[Rev]) -> HashSet<Rev> {
        let Some(&min) = seeds.iter().min() else {
            return HashSet::new();
        };
        let mut reached: HashSet<Rev> = seeds.iter().copied().collect();
        let mut out = HashSet::new();
        for rev in min + 1..self.revision_count() {
            if self.parent_revs(rev).iter().any(|p| reached.contains(p)) {
                reached.insert(rev);
                out.insert(rev);
            }
        }
        out
    }

    pub(crate) fn children_map(&self) -> &[SmallVec<[Rev; 2]>] {
        self.children_cache.get_or_init(|| {
            let mut map = vec![SmallVec::new(); self.revision_count()];
            for rev in 0..self.revision_count() {
                for p in self.parent_revs(rev) {
                    map[p].push(rev);
                }
            }
            map
        })
    }

    /// Direct children of one node. For the null id, the roots of the graph.
    /// `None` if the node isn't in the log.
    pub fn children(&self, node: NodeId) -> Option<Vec<NodeId>> {
        if node.is_null() {
            let roots = (0..self.revision_count())
                .filter(|&r| self.parent_revs(r).is_empty())
                .filter_map(|r| self.node_id(r))
                .collect();
            return Some(roots);
        }
        let rev = self.index_of(node)?;
        Some(
            self.children_map()[rev]
                .iter()
                .filter_map(|&c| self.node_id(c))
                .collect(),
        )
    }

    /// All revisions with no recorded child. Non-empty whenever the log is.
    pub fn heads(&self) -> Vec<Rev> {
        let children = self.children_map();
        (0..self.revision_count()).filter(|&r| children[r].is_empty()).collect()
    }

    /// Heads that are descendants of `start` (the null id meaning "the whole
    /// log"). Revisions in `stop` are treated as if they had no children.
    /// `None` if `start` isn't in the log.
    pub fn heads_from(&self, start: NodeId, stop: &[NodeId]) -> Option<Vec<NodeId>> {
        let start_rev = if start.is_null() { NULL_REV } else { self.index_of(start)? };
        let stop_revs: HashSet<Rev> =
            stop.iter().filter_map(|&n| self.index_of(n)).collect();

        let mut reachable = HashSet::from([start_rev]);
        let mut heads = HashSet::from([start_rev]);

        let first = if start_rev == NULL_REV { 0 } else { start_rev + 1 };
        for rev in first..self.revision_count() {
            let (p1, p2) = self.parents_of(rev).unwrap();
            for p in [p1, p2] {
                // Root revisions have NULL_REV parents, which is exactly how
                // they become reachable from a null start.
                if p == NULL_REV && start_rev != NULL_REV {
                    continue;
                }
                if reachable.contains(&p) {
                    if !stop_revs.contains(&rev) {
                        reachable.insert(rev);
                    }
                    heads.insert(rev);
                }
                if heads.contains(&p) && !stop_revs.contains(&p) {
                    heads.remove(&p);
                }
            }
        }

        let mut out: Vec<Rev> = heads.into_iter().collect();
        out.sort_unstable();
        Some(
            out.into_iter()
                .map(|r| if r == NULL_REV { NULL_ID } else { self.node_id(r).unwrap() })
                .collect(),
        )
    }

    /// The ancestor closure of `node` (inclusive), in node-id space. Parents
    /// below `stop` are not expanded. `None` if `node` isn't in the log.
    pub fn reachable_nodes(&self, node: NodeId, stop: Option<NodeId>) -> Option<HashSet<NodeId>> {
        if node.is_null() {
            return Some(HashSet::new());
        }
        self.index_of(node)?;
        let stop_rev = match stop {
            Some(s) => self.index_of(s)?,
            None => 0,
        };

        let mut reachable = HashSet::from([node]);
        let mut to_visit = VecDeque::from([node]);
        while let Some(n) = to_visit.pop_front() {
            if Some(n) == stop || n.is_null() {
                continue;
            }
            let (p1, p2) = self.parents_of_node(n).unwrap();
            for p in [p1, p2] {
                if p.is_null() {
                    continue;
                }
                if self.index_of(p).unwrap() < stop_rev {
                    continue;
                }
                if reachable.insert(p) {
                    to_visit.push_back(p);
                }
            }
        }
        Some(reachable)
    }

    /// Topologically sorted `ancestors(heads) - ancestors(common)`: what a
    /// repository holding `common` is missing up to `heads`. Both sets are
    /// inclusive of their seeds.
    pub fn find_missing(
        &self,
        common: &[NodeId],
        heads: &[NodeId],
    ) -> Result<Vec<NodeId>, RevlogError> {
        let common_revs = self.revs_of(common)?;
        let head_revs = self.revs_of(heads)?;

        let mut has: HashSet<Rev> = self.ancestors(&common_revs);
        has.extend(common_revs);

        let mut missing = HashSet::new();
        let mut to_visit: VecDeque<Rev> =
            head_revs.into_iter().filter(|r| !has.contains(r)).collect();
        while let Some(rev) = to_visit.pop_front() {
            if !missing.insert(rev) {
                continue;
            }
            for p in self.parent_revs(rev) {
                if !has.contains(&p) {
                    to_visit.push_back(p);
                }
            }
        }

        let mut revs: Vec<Rev> = missing.into_iter().collect();
        revs.sort_unstable();
        Ok(revs.into_iter().map(|r| self.node_id(r).unwrap()).collect())
    }

    /// The nodes on any path from `roots` to `heads`. `None` for either set
    /// means "no constraint" (all roots / all heads). Fake heads (heads that
    /// are ancestors of other heads) and roots that reach no head are pruned
    /// from the returned sets.
    pub fn nodes_between(
        &self,
        roots: Option<&[NodeId]>,
        heads: Option<&[NodeId]>,
    ) -> Result<NodesBetween, RevlogError> {
        if roots.is_some_and(|r| r.is_empty()) || heads.is_some_and(|h| h.is_empty()) {
            return Ok(NodesBetween::empty());
        }

        let mut roots: Vec<NodeId> = match roots {
            None => vec![NULL_ID],
            Some(r) => r.to_vec(),
        };
        let mut lowest_rev = self.lowest_rev_of(&roots)?;

        if lowest_rev == NULL_REV && heads.is_none() {
            // Unconstrained on both sides: everything.
            let between = (0..self.revision_count()).map(|r| self.node_id(r).unwrap()).collect();
            let heads =
                self.heads().into_iter().map(|r| self.node_id(r).unwrap()).collect();
            return Ok(NodesBetween { between, roots: vec![NULL_ID], heads });
        }

        // ancestors == None means "every node counts as an ancestor of some
        // head", and real heads get discovered during the forward sweep.
        let mut ancestors: Option<HashSet<NodeId>> = None;
        let mut head_marks: HashMap<NodeId, bool> = HashMap::new();
        let highest_rev;

        match heads {
            None => {
                highest_rev = self.revision_count().saturating_sub(1);
            }
            Some(heads) => {
                for &h in heads {
                    head_marks.insert(h, false);
                }
                let head_revs = self.revs_of(heads)?;
                highest_rev = head_revs.iter().copied().max().unwrap_or(0);

                // Walk back from the heads, marking every node at or above
                // the lowest root. Seeing a head again from above means it
                // was never really a head.
                let mut marked = HashSet::new();
                let mut to_visit: Vec<NodeId> = head_marks.keys().copied().collect();
                while let Some(node) = to_visit.pop() {
                    if node.is_null() {
                        continue;
                    }
                    let rev = self.index_of(node).unwrap();
                    if rev == NULL_REV || (lowest_rev != NULL_REV && rev < lowest_rev) {
                        continue;
                    }
                    if marked.insert(node) {
                        let (p1, p2) = self.parents_of_node(node).unwrap();
                        to_visit.extend([p1, p2].into_iter().filter(|p| !p.is_null()));
                    } else if head_marks.contains_key(&node) {
                        head_marks.remove(&node);
                    }
                }
                if marked.is_empty() {
                    return Ok(NodesBetween::empty());
                }

                if lowest_rev != NULL_REV {
                    // Only roots that are actually below some head matter.
                    roots.retain(|r| marked.contains(r));
                    if roots.is_empty() {
                        return Ok(NodesBetween::empty());
                    }
                    lowest_rev = self.lowest_rev_of(&roots)?;
                } else {
                    roots = vec![NULL_ID];
                }
                ancestors = Some(marked);
            }
        }

        let mut descendants: HashSet<NodeId> = roots.iter().copied().collect();
        let mut surviving_roots: HashSet<NodeId> = descendants.clone();
        let mut between = Vec::new();

        let first = if lowest_rev == NULL_REV { 0 } else { lowest_rev };
        for rev in first..=highest_rev.min(self.revision_count().saturating_sub(1)) {
            let node = self.node_id(rev).unwrap();
            let (p1, p2) = self.parents_of_node(node).unwrap();

            let is_descendant = if lowest_rev == NULL_REV {
                true
            } else if descendants.contains(&node) {
                // Roots descended from other roots aren't roots at all.
                if surviving_roots.contains(&node)
                    && (descendants.contains(&p1) || descendants.contains(&p2))
                {
                    surviving_roots.remove(&node);
                }
                true
            } else if descendants.contains(&p1) || descendants.contains(&p2) {
                descendants.insert(node);
                true
            } else {
                false
            };

            if !is_descendant {
                continue;
            }
            match &ancestors {
                Some(marked) if !marked.contains(&node) => continue,
                Some(_) => {
                    between.push(node);
                    if let Some(mark) = head_marks.get_mut(&node) {
                        *mark = true;
                    }
                }
                None => {
                    between.push(node);
                    // Discovering heads: assume everything is one until a
                    // child shows up.
                    head_marks.insert(node, true);
                    for p in [p1, p2] {
                        head_marks.remove(&p);
                    }
                }
            }
        }

        let mut head_nodes: Vec<NodeId> =
            head_marks.into_iter().filter(|(_, reached)| *reached).map(|(n, _)| n).collect();
        head_nodes.sort_unstable_by_key(|n| self.index_of(*n).unwrap_or(NULL_REV));
        let mut root_nodes: Vec<NodeId> = surviving_roots.into_iter().collect();
        root_nodes.sort_unstable_by_key(|n| self.index_of(*n).unwrap_or(0));

        Ok(NodesBetween { between, roots: root_nodes, heads: head_nodes })
    }

    fn revs_of(&self, nodes: &[NodeId]) -> Result<Vec<Rev>, RevlogError> {
        nodes
            .iter()
            .filter(|n| !n.is_null())
            .map(|&n| {
                self.index_of(n)
                    .ok_or_else(|| RevlogError::validation(format!("unknown node {n:?}")))
            })
            .collect()
    }

    /// Lowest revision among `nodes`, where the null id maps to [`NULL_REV`]
    /// (which sorts below everything for this purpose).
    fn lowest_rev_of(&self, nodes: &[NodeId]) -> Result<Rev, RevlogError> {
        let mut lowest = None;
        for &n in nodes {
            if n.is_null() {
                return Ok(NULL_REV);
            }
            let rev = self
                .index_of(n)
                .ok_or_else(|| RevlogError::validation(format!("unknown node {n:?}")))?;
            lowest = Some(lowest.map_or(rev, |l: Rev| l.min(rev)));
        }
        Ok(lowest.unwrap_or(NULL_REV))
    }
}
