use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Where an assembly pass runs.
///
/// `Host` walks the mesh objects in order on the calling thread with a single
/// scratch set. `Teams` hands objects to the rayon pool; every worker builds
/// its own scratch through the `init` closure, so scratch buffers are never
/// shared between concurrently running objects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionSpace {
    #[default]
    Host,
    Teams,
}

impl ExecutionSpace {
    /// Run `body` once per item with team-private scratch from `init`.
    ///
    /// Returns the scratch of every team once all items are done, so
    /// per-team buffers can be merged without locking inside the loop.
    /// Stops at the first error. In `Teams` mode other workers may still
    /// finish the item they are holding.
    pub fn for_each<T, S, E, I, F>(self, items: &[T], init: I, body: F) -> Result<Vec<S>, E>
    where
        T: Sync,
        S: Send,
        E: Send,
        I: Fn() -> S + Sync + Send,
        F: Fn(&mut S, &T) -> Result<(), E> + Sync + Send,
    {
        match self {
            ExecutionSpace::Host => {
                let mut scratch = init();
                for item in items {
                    body(&mut scratch, item)?;
                }
                Ok(vec![scratch])
            }
            ExecutionSpace::Teams => items
                .par_iter()
                .try_fold(init, |mut scratch, item| {
                    body(&mut scratch, item).map(|()| scratch)
                })
                .collect(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ExecutionSpace::Host => "host",
            ExecutionSpace::Teams => "teams",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn both_spaces_visit_every_item_once() {
        let items: Vec<usize> = (0..257).collect();
        for space in [ExecutionSpace::Host, ExecutionSpace::Teams] {
            let sum = AtomicUsize::new(0);
            space
                .for_each(&items, Vec::<usize>::new, |scratch, &i| {
                    scratch.clear();
                    scratch.push(i);
                    sum.fetch_add(scratch[0], Ordering::Relaxed);
                    Ok::<(), ()>(())
                })
                .unwrap();
            assert_eq!(sum.load(Ordering::Relaxed), 256 * 257 / 2);
        }
    }

    #[test]
    fn host_stops_at_first_error() {
        let items = [1, 2, 3, 4];
        let visited = AtomicUsize::new(0);
        let result = ExecutionSpace::Host.for_each(&items, || (), |_, &i| {
            visited.fetch_add(1, Ordering::Relaxed);
            if i == 2 { Err(i) } else { Ok(()) }
        });
        assert_eq!(result, Err(2));
        assert_eq!(visited.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn team_scratch_is_returned_for_merging() {
        let items: Vec<usize> = (0..1000).collect();
        for space in [ExecutionSpace::Host, ExecutionSpace::Teams] {
            let teams = space
                .for_each(&items, Vec::<usize>::new, |seen, &i| {
                    if i % 7 == 0 {
                        seen.push(i);
                    }
                    Ok::<(), ()>(())
                })
                .unwrap();
            let mut merged: Vec<usize> = teams.into_iter().flatten().collect();
            merged.sort_unstable();
            assert_eq!(merged, (0..1000).step_by(7).collect::<Vec<_>>());
        }
    }
}
