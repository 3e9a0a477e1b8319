//! Relationship graph for ReBAC
//!
//! The graph is an adjacency index over the active relationships of one
//! snapshot. Transitive checks are an iterative breadth-first search bounded
//! by a depth cap and a visited set, so cyclic or dense graphs terminate.
//! Hitting the cap yields "not found", never an error.

mod rules;

pub use rules::{RelationRule, RelationRules};

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, trace};

use crate::types::{EntityRef, Relationship};

/// Default traversal depth cap
pub const DEFAULT_MAX_DEPTH: usize = 5;

/// Edge direction for neighbourhood queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Edges leaving the entity
    Outgoing,
    /// Edges entering the entity
    Incoming,
    Both,
}

/// One hop of a traversal path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathStep {
    pub from: EntityRef,
    pub relation: String,
    pub to: EntityRef,
}

/// Outcome of a transitive check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraversalResult {
    pub found: bool,

    /// Edges from the subject to the target, empty when not found
    pub path: Vec<PathStep>,

    /// Some frontier was cut off by the depth cap
    pub depth_exceeded: bool,

    /// The abort callback fired before the search finished
    pub aborted: bool,

    /// Distinct entities expanded
    pub visited: usize,
}

/// Adjacency index over active relationships
#[derive(Debug, Clone, Default)]
pub struct RelationshipGraph {
    edges: Vec<Relationship>,
    outgoing: HashMap<EntityRef, Vec<usize>>,
    incoming: HashMap<EntityRef, Vec<usize>>,
    transitive: HashSet<String>,
}

impl RelationshipGraph {
    /// Build from relationship records; inactive edges are not indexed
    pub fn new<I, S>(relationships: &[Relationship], transitive_relations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let edges: Vec<Relationship> = relationships
            .iter()
            .filter(|r| r.is_active)
            .cloned()
            .collect();

        let mut outgoing: HashMap<EntityRef, Vec<usize>> = HashMap::new();
        let mut incoming: HashMap<EntityRef, Vec<usize>> = HashMap::new();
        for (idx, edge) in edges.iter().enumerate() {
            outgoing.entry(edge.source()).or_default().push(idx);
            incoming.entry(edge.target()).or_default().push(idx);
        }

        let skipped = relationships.len() - edges.len();
        if skipped > 0 {
            debug!("Relationship graph ignored {} inactive edges", skipped);
        }

        Self {
            edges,
            outgoing,
            incoming,
            transitive: transitive_relations.into_iter().map(Into::into).collect(),
        }
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_transitive(&self, relation: &str) -> bool {
        self.transitive.contains(relation)
    }

    /// Whether an edge is visible to a request in `org_id`
    ///
    /// Org-less edges are visible everywhere; org edges only inside their org.
    fn in_scope(edge: &Relationship, org_id: Option<&str>) -> bool {
        match edge.org_id.as_deref() {
            None => true,
            Some(org) => org_id == Some(org),
        }
    }

    fn edges_from<'a>(
        &'a self,
        entity: &EntityRef,
        org_id: Option<&'a str>,
    ) -> impl Iterator<Item = &'a Relationship> + 'a {
        self.outgoing
            .get(entity)
            .into_iter()
            .flatten()
            .map(move |&idx| &self.edges[idx])
            .filter(move |edge| Self::in_scope(edge, org_id))
    }

    /// Direct edge `source --relation--> target`
    pub fn has_relationship(
        &self,
        source: &EntityRef,
        relation: &str,
        target: &EntityRef,
        org_id: Option<&str>,
    ) -> bool {
        self.edges_from(source, org_id)
            .any(|edge| edge.relation_type == relation && edge.target() == *target)
    }

    /// Edges touching `entity`, optionally filtered by relation
    pub fn relationships_of(
        &self,
        entity: &EntityRef,
        relation: Option<&str>,
        direction: Direction,
        org_id: Option<&str>,
    ) -> Vec<&Relationship> {
        let mut indices: Vec<usize> = Vec::new();
        if matches!(direction, Direction::Outgoing | Direction::Both) {
            indices.extend(self.outgoing.get(entity).into_iter().flatten());
        }
        if matches!(direction, Direction::Incoming | Direction::Both) {
            indices.extend(self.incoming.get(entity).into_iter().flatten());
        }
        indices.sort_unstable();
        indices.dedup();

        indices
            .into_iter()
            .map(|idx| &self.edges[idx])
            .filter(|edge| Self::in_scope(edge, org_id))
            .filter(|edge| relation.map_or(true, |r| edge.relation_type == r))
            .collect()
    }

    /// Whether `subject` reaches `target` through `relation`
    ///
    /// The final hop must carry `relation`; earlier hops must be transitive
    /// relations. At most `max_depth` edges are followed.
    pub fn check_transitive_access(
        &self,
        subject: &EntityRef,
        relation: &str,
        target: &EntityRef,
        max_depth: usize,
        org_id: Option<&str>,
    ) -> TraversalResult {
        self.check_transitive_access_with(subject, relation, target, max_depth, org_id, || false)
    }

    /// Like [`check_transitive_access`](Self::check_transitive_access), polling
    /// `should_abort` before each expansion
    pub fn check_transitive_access_with<F>(
        &self,
        subject: &EntityRef,
        relation: &str,
        target: &EntityRef,
        max_depth: usize,
        org_id: Option<&str>,
        should_abort: F,
    ) -> TraversalResult
    where
        F: Fn() -> bool,
    {
        let mut result = TraversalResult::default();
        let mut visited: HashSet<EntityRef> = HashSet::new();
        let mut parents: HashMap<EntityRef, (EntityRef, String)> = HashMap::new();
        let mut queue: VecDeque<(EntityRef, usize)> = VecDeque::new();

        visited.insert(subject.clone());
        queue.push_back((subject.clone(), 0));

        while let Some((node, depth)) = queue.pop_front() {
            if should_abort() {
                result.aborted = true;
                break;
            }
            result.visited += 1;

            let mut edges = self.edges_from(&node, org_id).peekable();
            if depth >= max_depth {
                if edges.peek().is_some() {
                    result.depth_exceeded = true;
                }
                continue;
            }

            for edge in edges {
                let next = edge.target();

                if edge.relation_type == relation && next == *target {
                    result.found = true;
                    result.path = Self::build_path(&parents, &node, edge);
                    trace!(
                        "{} --{}--> {} found at depth {}",
                        subject,
                        relation,
                        target,
                        depth + 1
                    );
                    return result;
                }

                if self.transitive.contains(&edge.relation_type) && visited.insert(next.clone()) {
                    parents.insert(next.clone(), (node.clone(), edge.relation_type.clone()));
                    queue.push_back((next, depth + 1));
                }
            }
        }

        result
    }

    fn build_path(
        parents: &HashMap<EntityRef, (EntityRef, String)>,
        last: &EntityRef,
        final_edge: &Relationship,
    ) -> Vec<PathStep> {
        let mut path = vec![PathStep {
            from: last.clone(),
            relation: final_edge.relation_type.clone(),
            to: final_edge.target(),
        }];

        let mut current = last.clone();
        while let Some((parent, relation)) = parents.get(&current) {
            path.push(PathStep {
                from: parent.clone(),
                relation: relation.clone(),
                to: current.clone(),
            });
            current = parent.clone();
        }

        path.reverse();
        path
    }
}
