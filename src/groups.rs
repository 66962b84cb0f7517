//! Match-graph grouping
//!
//! Matched pairs are edges of an undirected graph; the connected
//! components are the groups of records judged to refer to one entity.
//! Breadth-first search is plenty at the scale the engine targets, and
//! discovery order plus in-group sorting keep the output stable for a
//! stable input order.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::types::{Record, RecordPair};

/// Adjacency list of the match graph.
///
/// Only records that appear in some pair are present. `order` remembers
/// first-seen order so that component discovery is deterministic.
pub struct Adjacency {
    order: Vec<Record>,
    neighbours: HashMap<Record, Vec<Record>>,
}

impl Adjacency {
    pub fn contains(&self, record: &Record) -> bool {
        self.neighbours.contains_key(record)
    }

    pub fn neighbours_of(&self, record: &Record) -> &[Record] {
        self.neighbours
            .get(record)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Build the adjacency list from match pairs; each edge is inserted in
/// both directions.
pub fn adjacency_list<'a>(pairs: impl IntoIterator<Item = &'a RecordPair>) -> Adjacency {
    let mut order = Vec::new();
    let mut neighbours: HashMap<Record, Vec<Record>> = HashMap::new();
    for (a, b) in pairs {
        for (from, to) in [(a, b), (b, a)] {
            if !neighbours.contains_key(from) {
                order.push(from.clone());
            }
            neighbours.entry(from.clone()).or_default().push(to.clone());
        }
    }
    Adjacency { order, neighbours }
}

/// Connected components by breadth-first search, in discovery order,
/// each group sorted by record order.
pub fn components(adjacency: &Adjacency) -> Vec<Vec<Record>> {
    let mut groups = Vec::new();
    let mut visited: HashSet<Record> = HashSet::new();
    for start in &adjacency.order {
        if visited.contains(start) {
            continue;
        }
        let mut group = Vec::new();
        let mut queue = VecDeque::from([start.clone()]);
        while let Some(record) = queue.pop_front() {
            if !visited.insert(record.clone()) {
                continue;
            }
            queue.extend(adjacency.neighbours_of(&record).iter().cloned());
            group.push(record);
        }
        group.sort();
        groups.push(group);
    }
    groups
}

/// Split all records into grouped duplicates and unmatched singles.
///
/// `singles` keeps the order of `allrecords` and contains exactly the
/// records with degree zero in the match graph.
pub fn singles_and_groups<'a>(
    matches: impl IntoIterator<Item = &'a RecordPair>,
    allrecords: &[Record],
) -> (Vec<Record>, Vec<Vec<Record>>) {
    let adjacency = adjacency_list(matches);
    let groups = components(&adjacency);
    let singles = allrecords
        .iter()
        .filter(|record| !adjacency.contains(record))
        .cloned()
        .collect();
    (singles, groups)
}
