//! C6: the pipeline runner (§4.6).
//!
//! Holds an ordered collection of "items", each declaring a name, the
//! `deps` keys it provides and requires, and a `consume` step. The
//! runner topologically sorts items by their provides/requires edges
//! (diagnosing cycles and ambiguous fan-in before any commit is
//! processed), then for every commit threads a type-erased `deps` map
//! through the sorted items, merging each item's output back in.
//!
//! Grounded on the teacher's own commit-walk-then-process shape
//! (`walking.rs`'s `CommitWalk` drives a single linear sequence this
//! runner consumes) generalized to spec.md's explicit DAG-of-items
//! design, since `cochange-tool` itself runs a fixed, hardcoded sequence
//! rather than a declared dependency graph.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::error::{CommitError, HerculesError, Result};
use crate::ir::CommitRecord;

/// Type-erased per-commit fact map. Every item reads its `requires` keys
/// out of this map and returns a map containing its `provides` keys;
/// the runner merges the two after every item.
pub type Deps = HashMap<&'static str, Rc<dyn Any>>;

pub fn get<'a, T: 'static>(deps: &'a Deps, key: &str) -> Option<&'a T> {
    deps.get(key).and_then(|v| v.downcast_ref::<T>())
}

pub trait PipelineItem {
    fn name(&self) -> &'static str;
    fn provides(&self) -> &'static [&'static str];
    fn requires(&self) -> &'static [&'static str];
    /// Consumes `deps` (already containing everything `requires` names)
    /// and returns a map with every key in `provides`.
    fn consume(&mut self, deps: &Deps) -> Result<Deps>;
    /// Called once after the last commit. Items with no terminal output
    /// may leave this as a no-op.
    fn finalize(&mut self) -> Option<(&'static str, Rc<dyn Any>)> {
        None
    }
}

pub struct PipelineRunner<'a> {
    order: Vec<usize>,
    items: Vec<Box<dyn PipelineItem + 'a>>,
}

impl<'a> PipelineRunner<'a> {
    /// Topologically sorts `items` by provides/requires, failing with
    /// [`HerculesError::AmbiguousProvider`] if two items provide the same
    /// key, or [`HerculesError::DependencyCycle`] if no valid order
    /// exists. Both failures are fatal before any commit is processed
    /// (§4.6, §7).
    pub fn new(items: Vec<Box<dyn PipelineItem + 'a>>) -> Result<Self> {
        let mut provider_of: HashMap<&'static str, usize> = HashMap::new();
        for (idx, item) in items.iter().enumerate() {
            for &key in item.provides() {
                if let Some(&existing) = provider_of.get(key) {
                    return Err(HerculesError::AmbiguousProvider {
                        key: key.to_string(),
                        providers: format!("'{}' and '{}'", items[existing].name(), item.name()),
                    });
                }
                provider_of.insert(key, idx);
            }
        }

        // "commit" and "index" are seeded by the runner itself (§4.6).
        provider_of.entry("commit").or_insert(usize::MAX);
        provider_of.entry("index").or_insert(usize::MAX);

        let mut requires_edges: Vec<Vec<usize>> = vec![Vec::new(); items.len()];
        for (idx, item) in items.iter().enumerate() {
            for &key in item.requires() {
                match provider_of.get(key) {
                    Some(&p) if p != usize::MAX => requires_edges[idx].push(p),
                    Some(_) => {} // seeded key, no edge needed
                    None => {
                        return Err(HerculesError::InvariantViolation(format!(
                            "item '{}' requires undeclared key '{}'",
                            item.name(),
                            key
                        )))
                    }
                }
            }
        }

        let order = topological_sort(&requires_edges, &items)?;
        Ok(Self { order, items })
    }

    /// Runs every commit in `commits` through the sorted items in order,
    /// aborting on the first failure (§4.6, §5, §7: whole run is
    /// abortive on the first item returning a failure).
    pub fn run(&mut self, commits: &[CommitRecord]) -> std::result::Result<(), CommitError> {
        for (index, commit) in commits.iter().enumerate() {
            let mut deps: Deps = HashMap::new();
            deps.insert("commit", Rc::new(commit.clone()));
            deps.insert("index", Rc::new(index));

            for &item_idx in &self.order {
                let item = &mut self.items[item_idx];
                match item.consume(&deps) {
                    Ok(produced) => deps.extend(produced),
                    Err(source) => {
                        return Err(CommitError {
                            item: item.name().to_string(),
                            index,
                            id: commit.id.to_string(),
                            source,
                        })
                    }
                }
            }
        }
        Ok(())
    }

    /// Collects `finalize()` results from every item, in sorted order.
    pub fn finalize(&mut self) -> Vec<(&'static str, Rc<dyn Any>)> {
        self.order.iter().filter_map(|&idx| self.items[idx].finalize()).collect()
    }

    pub fn into_items(self) -> Vec<Box<dyn PipelineItem + 'a>> {
        self.items
    }
}

/// Kahn's algorithm over the requires-edges built in [`PipelineRunner::new`].
fn topological_sort(edges: &[Vec<usize>], items: &[Box<dyn PipelineItem + '_>]) -> Result<Vec<usize>> {
    let n = edges.len();
    let mut in_degree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (idx, deps) in edges.iter().enumerate() {
        in_degree[idx] = deps.len();
        for &dep in deps {
            dependents[dep].push(idx);
        }
    }

    let mut ready: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    ready.sort();
    let mut order = Vec::with_capacity(n);
    let mut visited = HashSet::new();

    while let Some(idx) = ready.pop() {
        if !visited.insert(idx) {
            continue;
        }
        order.push(idx);
        let mut newly_ready = Vec::new();
        for &dep in &dependents[idx] {
            in_degree[dep] -= 1;
            if in_degree[dep] == 0 {
                newly_ready.push(dep);
            }
        }
        newly_ready.sort();
        ready.extend(newly_ready);
        ready.sort();
    }

    if order.len() != n {
        let stuck: Vec<&str> = (0..n).filter(|i| !visited.contains(i)).map(|i| items[i].name()).collect();
        return Err(HerculesError::DependencyCycle(stuck.join(", ")));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::CommitRecord;
    use git2::Oid;
    use time::OffsetDateTime;

    struct FixedItem {
        name: &'static str,
        provides: &'static [&'static str],
        requires: &'static [&'static str],
    }

    impl PipelineItem for FixedItem {
        fn name(&self) -> &'static str {
            self.name
        }
        fn provides(&self) -> &'static [&'static str] {
            self.provides
        }
        fn requires(&self) -> &'static [&'static str] {
            self.requires
        }
        fn consume(&mut self, _deps: &Deps) -> Result<Deps> {
            let mut out = Deps::new();
            for &key in self.provides {
                out.insert(key, Rc::new(()));
            }
            Ok(out)
        }
    }

    fn dummy_commit() -> CommitRecord {
        CommitRecord::new(Oid::zero(), "a".into(), "a@b.com".into(), OffsetDateTime::UNIX_EPOCH, Oid::zero())
    }

    #[test]
    fn sorts_items_by_dependency_order() {
        let items: Vec<Box<dyn PipelineItem>> = vec![
            Box::new(FixedItem { name: "b", provides: &["b"], requires: &["a"] }),
            Box::new(FixedItem { name: "a", provides: &["a"], requires: &["commit"] }),
        ];
        let mut runner = PipelineRunner::new(items).unwrap();
        runner.run(&[dummy_commit()]).unwrap();
        let names: Vec<&str> = runner.order.iter().map(|&i| runner.items[i].name()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn detects_ambiguous_provider() {
        let items: Vec<Box<dyn PipelineItem>> = vec![
            Box::new(FixedItem { name: "x", provides: &["k"], requires: &[] }),
            Box::new(FixedItem { name: "y", provides: &["k"], requires: &[] }),
        ];
        let err = PipelineRunner::new(items).unwrap_err();
        assert!(matches!(err, HerculesError::AmbiguousProvider { .. }));
    }

    #[test]
    fn detects_dependency_cycle() {
        let items: Vec<Box<dyn PipelineItem>> = vec![
            Box::new(FixedItem { name: "x", provides: &["x"], requires: &["y"] }),
            Box::new(FixedItem { name: "y", provides: &["y"], requires: &["x"] }),
        ];
        let err = PipelineRunner::new(items).unwrap_err();
        assert!(matches!(err, HerculesError::DependencyCycle(_)));
    }

    #[test]
    fn aborts_run_on_first_failure() {
        struct Failing;
        impl PipelineItem for Failing {
            fn name(&self) -> &'static str {
                "failing"
            }
            fn provides(&self) -> &'static [&'static str] {
                &[]
            }
            fn requires(&self) -> &'static [&'static str] {
                &[]
            }
            fn consume(&mut self, _: &Deps) -> Result<Deps> {
                Err(HerculesError::InvariantViolation("boom".into()))
            }
        }
        let mut runner = PipelineRunner::new(vec![Box::new(Failing)]).unwrap();
        let err = runner.run(&[dummy_commit()]).unwrap_err();
        assert_eq!(err.item, "failing");
        assert_eq!(err.index, 0);
    }
}
