//! Assembly-time validation of wait-condition edges

use std::collections::HashMap;

use crate::error::{OrchestraError, Result};
use crate::resource::ResourceDescriptor;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Reject references to undeclared resources.
pub(super) fn check_references(
    resources: &[ResourceDescriptor],
    index: &HashMap<String, usize>,
) -> Result<()> {
    for resource in resources {
        let referenced = resource
            .wait_conditions()
            .iter()
            .map(|c| c.dependency.as_str())
            .chain(resource.references())
            .chain(resource.parent());
        for name in referenced {
            if !index.contains_key(name) {
                return Err(OrchestraError::Configuration(format!(
                    "resource {} refers to unknown resource {name}",
                    resource.name()
                )));
            }
        }
    }
    Ok(())
}

/// Depth-first search over wait edges; the first back edge found is
/// reported as `a -> b -> ... -> a`.
pub(super) fn check_cycles(
    resources: &[ResourceDescriptor],
    index: &HashMap<String, usize>,
) -> Result<()> {
    let mut marks = vec![Mark::Unvisited; resources.len()];
    let mut path = Vec::new();

    for start in 0..resources.len() {
        if marks[start] == Mark::Unvisited {
            visit(start, resources, index, &mut marks, &mut path)?;
        }
    }
    Ok(())
}

fn visit(
    node: usize,
    resources: &[ResourceDescriptor],
    index: &HashMap<String, usize>,
    marks: &mut [Mark],
    path: &mut Vec<usize>,
) -> Result<()> {
    marks[node] = Mark::InProgress;
    path.push(node);

    for condition in resources[node].wait_conditions() {
        let Some(&next) = index.get(&condition.dependency) else {
            continue;
        };
        match marks[next] {
            Mark::InProgress => {
                let from = path.iter().position(|&n| n == next).unwrap_or(0);
                let mut cycle: Vec<&str> = path[from..]
                    .iter()
                    .map(|&n| resources[n].name())
                    .collect();
                cycle.push(resources[next].name());
                let cycle = cycle.join(" -> ");
                tracing::error!(%cycle, "Wait dependency cycle detected");
                return Err(OrchestraError::CycleDetected { cycle });
            }
            Mark::Unvisited => visit(next, resources, index, marks, path)?,
            Mark::Done => {}
        }
    }

    path.pop();
    marks[node] = Mark::Done;
    Ok(())
}
