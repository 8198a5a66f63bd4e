//! Depth-first topological ordering.
//!
//! Only direct self-dependencies are reported. A longer cycle (`a -> b -> a`)
//! is not an error: a node that is still being expanded is treated as already
//! placed, so the walk terminates and the cycle shows up as an ordering
//! violation instead.

use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;

/// A node listed as its own dependency.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Node {node:?} depends on itself")]
pub struct CycleError<T: Debug> {
    /// The offending node.
    pub node: T,
}

/// Orders `nodes` so that every node follows everything reachable through
/// `get_deps`.
///
/// `get_deps` returns `None` for a terminal node. The visited set is shared
/// across all roots, so a dependency pulled in by one root is emitted once and
/// skipped afterwards. Ties keep input order.
pub fn topological_sort<T, I, F, D>(nodes: I, mut get_deps: F) -> Result<Vec<T>, CycleError<T>>
where
    T: Clone + Eq + Hash + Debug,
    I: IntoIterator<Item = T>,
    F: FnMut(&T) -> Option<D>,
    D: IntoIterator<Item = T>,
{
    let mut order = Vec::new();
    let mut visited: HashSet<T> = HashSet::new();
    let mut expanding: HashSet<T> = HashSet::new();
    let mut stack: Vec<(T, std::vec::IntoIter<T>)> = Vec::new();

    for root in nodes {
        if visited.contains(&root) {
            continue;
        }
        enter(root, &mut get_deps, &mut expanding, &mut stack)?;

        loop {
            let next = match stack.last_mut() {
                Some((_, deps)) => deps.next(),
                None => break,
            };

            match next {
                Some(dep) => {
                    if visited.contains(&dep) || expanding.contains(&dep) {
                        continue;
                    }
                    enter(dep, &mut get_deps, &mut expanding, &mut stack)?;
                }
                None => {
                    if let Some((node, _)) = stack.pop() {
                        expanding.remove(&node);
                        visited.insert(node.clone());
                        order.push(node);
                    }
                }
            }
        }
    }

    Ok(order)
}

fn enter<T, F, D>(
    node: T,
    get_deps: &mut F,
    expanding: &mut HashSet<T>,
    stack: &mut Vec<(T, std::vec::IntoIter<T>)>,
) -> Result<(), CycleError<T>>
where
    T: Clone + Eq + Hash + Debug,
    F: FnMut(&T) -> Option<D>,
    D: IntoIterator<Item = T>,
{
    let deps: Vec<T> = get_deps(&node)
        .map(|deps| deps.into_iter().collect())
        .unwrap_or_default();

    if deps.contains(&node) {
        return Err(CycleError { node });
    }

    expanding.insert(node.clone());
    stack.push((node, deps.into_iter()));
    Ok(())
}
