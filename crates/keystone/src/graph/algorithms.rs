//! Structural algorithms over a [`GraphView`].
//!
//! Cycle detection uses Tarjan's SCC algorithm, ordering uses petgraph's
//! `toposort`, and traversals are breadth-first with a visited set.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::Direction;
use petgraph::algo::{has_path_connecting, tarjan_scc, toposort};
use petgraph::graph::NodeIndex;

use super::{GraphView, Reached};
use crate::config::PathLimits;
use crate::error::{Error, Result};
use crate::types::EntityId;

impl GraphView {
    // === Cycles ===

    /// Every strongly connected component, members sorted, largest first
    /// (ties broken by the smallest member id).
    #[must_use]
    pub fn strongly_connected_components(&self) -> Vec<Vec<EntityId>> {
        let mut components: Vec<Vec<EntityId>> = tarjan_scc(self.graph())
            .into_iter()
            .map(|component| {
                let mut members: Vec<EntityId> =
                    component.into_iter().map(|n| self.graph()[n].clone()).collect();
                members.sort();
                members
            })
            .collect();
        components.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a[0].cmp(&b[0])));
        components
    }

    /// Groups of entities that depend on each other circularly.
    ///
    /// Only components with more than one member are returned; self-loops
    /// cannot exist in a view.
    #[must_use]
    pub fn find_circular_dependencies(&self) -> Vec<Vec<EntityId>> {
        self.strongly_connected_components()
            .into_iter()
            .filter(|component| component.len() > 1)
            .collect()
    }

    /// Whether the view contains no cycle.
    #[must_use]
    pub fn is_acyclic(&self) -> bool {
        toposort(self.graph(), None).is_ok()
    }

    // === Ordering ===

    /// Order entities so every dependency comes before its dependents.
    ///
    /// # Errors
    ///
    /// Returns `Error::CycleDetected` with the sorted members of the strongly
    /// connected component that blocks the ordering.
    pub fn topological_sort(&self) -> Result<Vec<EntityId>> {
        match toposort(self.graph(), None) {
            Ok(order) => Ok(order.into_iter().map(|n| self.graph()[n].clone()).collect()),
            Err(cycle) => {
                let culprit = &self.graph()[cycle.node_id()];
                let members = self
                    .find_circular_dependencies()
                    .into_iter()
                    .find(|component| component.contains(culprit))
                    .unwrap_or_else(|| vec![culprit.clone()]);
                Err(Error::CycleDetected { cycle: members })
            }
        }
    }

    // === Reachability ===

    /// Whether `to` can be reached from `from` by following edges.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if either entity is not in the view.
    pub fn is_reachable(&self, from: &EntityId, to: &EntityId) -> Result<bool> {
        let start = self.node(from)?;
        let goal = self.node(to)?;
        Ok(has_path_connecting(self.graph(), start, goal, None))
    }

    /// Shortest path (by edge count) from `from` to `to`, both included.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if either entity is not in the view.
    pub fn find_path(&self, from: &EntityId, to: &EntityId) -> Result<Option<Vec<EntityId>>> {
        let start = self.node(from)?;
        let goal = self.node(to)?;
        if start == goal {
            return Ok(Some(vec![from.clone()]));
        }

        let mut previous: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut visited = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);

        while let Some(current) = queue.pop_front() {
            for next in self.neighbour_nodes(current, Direction::Outgoing) {
                if !visited.insert(next) {
                    continue;
                }
                previous.insert(next, current);
                if next == goal {
                    return Ok(Some(self.unwind(&previous, start, goal)));
                }
                queue.push_back(next);
            }
        }

        Ok(None)
    }

    fn unwind(
        &self,
        previous: &HashMap<NodeIndex, NodeIndex>,
        start: NodeIndex,
        goal: NodeIndex,
    ) -> Vec<EntityId> {
        let mut path = vec![self.graph()[goal].clone()];
        let mut current = goal;
        while current != start {
            let Some(&prev) = previous.get(&current) else {
                break;
            };
            path.push(self.graph()[prev].clone());
            current = prev;
        }
        path.reverse();
        path
    }

    /// Simple paths from `from` to `to`, shortest first.
    ///
    /// Enumeration stops once `max_paths` paths are found.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if either entity is not in the view and
    /// `Error::LimitExceeded` if the search expands more than
    /// `max_expansions` nodes.
    pub fn find_all_paths(
        &self,
        from: &EntityId,
        to: &EntityId,
        limits: &PathLimits,
    ) -> Result<Vec<Vec<EntityId>>> {
        let start = self.node(from)?;
        let goal = self.node(to)?;
        if start == goal {
            return Ok(vec![vec![from.clone()]]);
        }

        let mut paths: Vec<Vec<NodeIndex>> = Vec::new();
        let mut expansions = 0usize;
        let mut path = vec![start];
        let mut on_path = HashSet::from([start]);
        // Each frame holds the remaining successors of the node at the same depth
        let mut stack = vec![self.neighbour_nodes(start, Direction::Outgoing).into_iter()];

        while let Some(successors) = stack.last_mut() {
            if paths.len() >= limits.max_paths {
                break;
            }
            let Some(next) = successors.next() else {
                stack.pop();
                if let Some(node) = path.pop() {
                    on_path.remove(&node);
                }
                continue;
            };
            if on_path.contains(&next) {
                continue;
            }

            expansions += 1;
            if expansions > limits.max_expansions {
                tracing::warn!(
                    from = %from,
                    to = %to,
                    max_expansions = limits.max_expansions,
                    "Path enumeration budget exhausted"
                );
                return Err(Error::LimitExceeded(format!(
                    "path search from {from} to {to} exceeded {} expansions",
                    limits.max_expansions
                )));
            }

            if next == goal {
                let mut found = path.clone();
                found.push(goal);
                paths.push(found);
                continue;
            }

            path.push(next);
            on_path.insert(next);
            stack.push(self.neighbour_nodes(next, Direction::Outgoing).into_iter());
        }

        let mut resolved: Vec<Vec<EntityId>> = paths
            .into_iter()
            .map(|p| p.into_iter().map(|n| self.graph()[n].clone()).collect())
            .collect();
        resolved.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
        Ok(resolved)
    }

    // === Transitive closure ===

    /// Every entity this one depends on, directly or transitively.
    ///
    /// `max_depth` limits the number of hops (`None` for unlimited).
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the entity is not in the view.
    pub fn transitive_dependencies(
        &self,
        id: &EntityId,
        max_depth: Option<usize>,
    ) -> Result<Vec<Reached>> {
        self.traverse(id, Direction::Incoming, max_depth)
    }

    /// Every entity depending on this one, directly or transitively.
    ///
    /// `max_depth` limits the number of hops (`None` for unlimited).
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the entity is not in the view.
    pub fn transitive_dependents(
        &self,
        id: &EntityId,
        max_depth: Option<usize>,
    ) -> Result<Vec<Reached>> {
        self.traverse(id, Direction::Outgoing, max_depth)
    }

    /// BFS from `id`; results ordered by depth, then id. The start is excluded.
    fn traverse(
        &self,
        id: &EntityId,
        direction: Direction,
        max_depth: Option<usize>,
    ) -> Result<Vec<Reached>> {
        let start = self.node(id)?;

        let mut reached = Vec::new();
        let mut visited = HashSet::from([start]);
        let mut queue: VecDeque<(NodeIndex, usize)> = VecDeque::from([(start, 0)]);

        while let Some((current, depth)) = queue.pop_front() {
            if max_depth.is_some_and(|max| depth >= max) {
                continue;
            }
            for next in self.graph().neighbors_directed(current, direction) {
                if visited.insert(next) {
                    reached.push(Reached {
                        id: self.graph()[next].clone(),
                        depth: depth + 1,
                    });
                    queue.push_back((next, depth + 1));
                }
            }
        }

        reached.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.id.cmp(&b.id)));
        Ok(reached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{chain, entity, relation};
    use crate::types::RelationType;

    #[test]
    fn topological_sort_of_chain_follows_edges() {
        let (view, ids) = chain(4);

        let order = view.topological_sort().expect("chain is acyclic");

        assert_eq!(order, ids);
    }

    #[test]
    fn cycle_blocks_topological_sort() {
        let a = entity("a");
        let b = entity("b");
        let c = entity("c");
        let view = GraphView::from_parts(
            vec![a.clone(), b.clone(), c.clone()],
            vec![
                relation(&a, &b, RelationType::Requires),
                relation(&b, &a, RelationType::Requires),
                relation(&b, &c, RelationType::Requires),
            ],
        )
        .expect("view should build");

        let err = view.topological_sort().unwrap_err();
        let Error::CycleDetected { cycle } = err else {
            panic!("expected CycleDetected, got {err:?}");
        };
        let mut expected = vec![a.id, b.id];
        expected.sort();
        assert_eq!(cycle, expected);
        assert!(!view.is_acyclic());
    }

    #[test]
    fn components_sorted_largest_first() {
        let nodes: Vec<_> = ["a", "b", "c", "d", "e"].into_iter().map(entity).collect();
        let edges = vec![
            relation(&nodes[0], &nodes[1], RelationType::Requires),
            relation(&nodes[1], &nodes[0], RelationType::Requires),
            relation(&nodes[2], &nodes[3], RelationType::Requires),
            relation(&nodes[3], &nodes[4], RelationType::Requires),
            relation(&nodes[4], &nodes[2], RelationType::Requires),
        ];
        let view = GraphView::from_parts(nodes, edges).expect("view should build");

        let cycles = view.find_circular_dependencies();

        assert_eq!(cycles.len(), 2);
        assert_eq!(cycles[0].len(), 3);
        assert_eq!(cycles[1].len(), 2);
        assert_eq!(view.strongly_connected_components().len(), 2);
    }

    #[test]
    fn find_path_prefers_fewest_edges() {
        let a = entity("a");
        let b = entity("b");
        let c = entity("c");
        let view = GraphView::from_parts(
            vec![a.clone(), b.clone(), c.clone()],
            vec![
                relation(&a, &b, RelationType::Requires),
                relation(&b, &c, RelationType::Requires),
                relation(&a, &c, RelationType::Requires),
            ],
        )
        .expect("view should build");

        let path = view.find_path(&a.id, &c.id).expect("ids exist");
        assert_eq!(path, Some(vec![a.id.clone(), c.id.clone()]));

        let backwards = view.find_path(&c.id, &a.id).expect("ids exist");
        assert_eq!(backwards, None);

        let same = view.find_path(&b.id, &b.id).expect("ids exist");
        assert_eq!(same, Some(vec![b.id]));
    }

    #[test]
    fn find_all_paths_shortest_first_and_capped() {
        // a -> b -> d, a -> c -> d, a -> d
        let nodes: Vec<_> = ["a", "b", "c", "d"].into_iter().map(entity).collect();
        let edges = vec![
            relation(&nodes[0], &nodes[1], RelationType::Requires),
            relation(&nodes[1], &nodes[3], RelationType::Requires),
            relation(&nodes[0], &nodes[2], RelationType::Requires),
            relation(&nodes[2], &nodes[3], RelationType::Requires),
            relation(&nodes[0], &nodes[3], RelationType::Requires),
        ];
        let (a, d) = (nodes[0].id.clone(), nodes[3].id.clone());
        let view = GraphView::from_parts(nodes, edges).expect("view should build");

        let all = view
            .find_all_paths(&a, &d, &PathLimits::default())
            .expect("ids exist");
        assert_eq!(all.len(), 3);
        assert_eq!(all[0], vec![a.clone(), d.clone()]);
        assert!(all[1..].iter().all(|p| p.len() == 3));

        let capped = view
            .find_all_paths(&a, &d, &PathLimits::with_max_paths(1))
            .expect("ids exist");
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn find_all_paths_respects_expansion_budget() {
        let (view, ids) = chain(6);
        let limits = PathLimits {
            max_paths: 10,
            max_expansions: 2,
        };

        let err = view
            .find_all_paths(&ids[0], &ids[5], &limits)
            .unwrap_err();
        assert!(matches!(err, Error::LimitExceeded(_)));
    }

    #[test]
    fn transitive_traversal_respects_max_depth() {
        let (view, ids) = chain(4);

        let all = view.transitive_dependents(&ids[0], None).expect("id exists");
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].depth, 3);

        let near = view
            .transitive_dependents(&ids[0], Some(1))
            .expect("id exists");
        assert_eq!(
            near,
            vec![Reached {
                id: ids[1].clone(),
                depth: 1
            }]
        );

        let upstream = view
            .transitive_dependencies(&ids[3], None)
            .expect("id exists");
        assert_eq!(upstream.len(), 3);
        assert!(upstream.iter().all(|r| r.id != ids[3]));
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let (view, ids) = chain(2);
        let missing = EntityId::from("ent-missing");

        assert!(view.is_reachable(&ids[0], &missing).unwrap_err().is_not_found());
        assert!(view.find_path(&missing, &ids[0]).unwrap_err().is_not_found());
        assert!(view
            .transitive_dependents(&missing, None)
            .unwrap_err()
            .is_not_found());
    }
}
