use std::collections::{BTreeMap, BTreeSet};

use crate::model::TableId;

/// The combination graph: one undirected edge per pair of merged tables.
///
/// Each edge is stored once as `(min, max)`, so "A lists B" and "B lists A"
/// are the same fact and cannot drift apart. Self-edges are never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Combinations {
    edges: BTreeSet<(TableId, TableId)>,
}

fn pair(a: TableId, b: TableId) -> (TableId, TableId) {
    if a < b { (a, b) } else { (b, a) }
}

impl Combinations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false for self-links and links that already exist.
    pub fn link(&mut self, a: TableId, b: TableId) -> bool {
        if a == b {
            return false;
        }
        self.edges.insert(pair(a, b))
    }

    /// Link every member of `group` to every other member.
    pub fn link_all(&mut self, group: &BTreeSet<TableId>) {
        for &a in group {
            for &b in group.range(a..).skip(1) {
                self.edges.insert((a, b));
            }
        }
    }

    /// Remove every edge touching `id`. Returns the former partners.
    pub fn unlink(&mut self, id: TableId) -> BTreeSet<TableId> {
        let partners = self.partners(id);
        for &p in &partners {
            self.edges.remove(&pair(id, p));
        }
        partners
    }

    pub fn partners(&self, id: TableId) -> BTreeSet<TableId> {
        self.edges
            .iter()
            .filter_map(|&(a, b)| {
                if a == id {
                    Some(b)
                } else if b == id {
                    Some(a)
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn is_combined(&self, id: TableId) -> bool {
        self.edges.iter().any(|&(a, b)| a == id || b == id)
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Connected components with at least two members, ordered by their
    /// smallest id.
    pub fn groups(&self) -> Vec<BTreeSet<TableId>> {
        let mut adjacency: BTreeMap<TableId, Vec<TableId>> = BTreeMap::new();
        for &(a, b) in &self.edges {
            adjacency.entry(a).or_default().push(b);
            adjacency.entry(b).or_default().push(a);
        }

        let mut seen = BTreeSet::new();
        let mut groups = Vec::new();
        for &root in adjacency.keys() {
            if seen.contains(&root) {
                continue;
            }
            let mut group = BTreeSet::new();
            let mut stack = vec![root];
            while let Some(id) = stack.pop() {
                if !seen.insert(id) {
                    continue;
                }
                group.insert(id);
                if let Some(next) = adjacency.get(&id) {
                    stack.extend(next.iter().copied().filter(|n| !seen.contains(n)));
                }
            }
            groups.push(group);
        }
        groups
    }
}
