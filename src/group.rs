// Copyright (c) The simgrade Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test groups: the runnable unit.
//!
//! A group is built from seed names (test ids or tags), optionally expanded
//! through each test's `depends` list into the transitive closure. The
//! dependency graph over the group must be acyclic; a topological order is
//! exposed for scheduling and presentation.

use crate::{environment::TestEnvironment, errors::GroupBuildError, test::Test};
use indexmap::IndexMap;
use petgraph::{algo::scc::kosaraju_scc, algo::toposort, graph::NodeIndex, Directed, Graph};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Instructions for building a [`TestGroup`].
#[derive(Clone, Debug, Default)]
pub struct GroupConfig {
    /// A name for the group (the target name for graded runs).
    pub name: String,
    /// Whether to pull in dependencies transitively.
    pub use_deps: bool,
    /// Seed names: test ids or tags.
    pub tests: Vec<String>,
}

/// A runnable collection of tests, keyed by dependency id.
#[derive(Clone, Debug, Default)]
pub struct TestGroup {
    /// The group name.
    pub name: String,
    /// The tests, in seed-then-discovery order.
    pub tests: IndexMap<String, Test>,
}

impl TestGroup {
    /// Builds a group from seeds, expanding and validating dependencies.
    ///
    /// All discoverable errors are reported, not just the first: unknown
    /// seeds, unresolvable dependencies, and dependency cycles.
    pub fn from_config(
        config: &GroupConfig,
        env: &TestEnvironment,
    ) -> Result<Self, Vec<GroupBuildError>> {
        let mut errors = Vec::new();
        let mut tests: IndexMap<String, Test> = IndexMap::new();

        for seed in &config.tests {
            let resolved = resolve(env, seed);
            if resolved.is_empty() {
                errors.push(GroupBuildError::UnknownTest { name: seed.clone() });
                continue;
            }
            for test in resolved {
                tests.entry(test.dependency_id.clone()).or_insert_with(|| {
                    debug!(id = %test.dependency_id, "adding seed test");
                    test.clone()
                });
            }
        }

        if config.use_deps {
            let mut stack: Vec<String> = tests.keys().cloned().collect();
            while let Some(id) = stack.pop() {
                let depends = tests[&id].depends.clone();
                for dep in depends {
                    let resolved = resolve(env, &dep);
                    if resolved.is_empty() {
                        errors.push(GroupBuildError::UnknownDependency {
                            name: dep.clone(),
                            wanted_by: id.clone(),
                        });
                        continue;
                    }
                    for test in resolved {
                        if !tests.contains_key(&test.dependency_id) {
                            debug!(id = %test.dependency_id, wanted_by = %id, "adding dependency");
                            let mut test = test.clone();
                            test.is_dependency = true;
                            let dep_id = test.dependency_id.clone();
                            tests.insert(dep_id.clone(), test);
                            stack.push(dep_id);
                        }
                    }
                }
            }
        }

        let mut group = TestGroup {
            name: config.name.clone(),
            tests,
        };

        if let Err(cycle_errors) = group.check_cycles() {
            errors.extend(cycle_errors);
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        group.populate_expanded_deps();

        Ok(group)
    }

    /// Returns the group's tests in a valid execution order: every test
    /// after all of its dependencies.
    pub fn dependency_order(&self) -> Result<Vec<String>, GroupBuildError> {
        let (graph, ids) = self.dependency_graph();
        match toposort(&graph, None) {
            Ok(order) => Ok(order.into_iter().map(|idx| ids[&idx].clone()).collect()),
            Err(cycle) => Err(GroupBuildError::DependencyCycle {
                members: vec![ids[&cycle.node_id()].clone()],
            }),
        }
    }

    // Builds the DAG: an edge dep -> test means the dependency must
    // complete first. Only dependencies present in the group become edges,
    // which is what makes no-dependency groups runnable.
    fn dependency_graph(&self) -> (Graph<String, (), Directed>, HashMap<NodeIndex, String>) {
        let mut graph = Graph::new();
        let mut nodes: HashMap<String, NodeIndex> = HashMap::new();
        let mut ids: HashMap<NodeIndex, String> = HashMap::new();

        for id in self.tests.keys() {
            let idx = graph.add_node(id.clone());
            nodes.insert(id.clone(), idx);
            ids.insert(idx, id.clone());
        }
        for (id, test) in &self.tests {
            for dep in &test.depends {
                if let (Some(&from), Some(&to)) = (nodes.get(dep), nodes.get(id)) {
                    graph.add_edge(from, to, ());
                }
            }
        }

        (graph, ids)
    }

    // Reports every dependency cycle, listing its members.
    fn check_cycles(&self) -> Result<(), Vec<GroupBuildError>> {
        let (graph, ids) = self.dependency_graph();
        let mut errors = Vec::new();

        for scc in kosaraju_scc(&graph) {
            let is_cycle = scc.len() >= 2
                || graph
                    .find_edge(scc[0], scc[0])
                    .is_some();
            if is_cycle {
                let mut members: Vec<String> =
                    scc.iter().map(|idx| ids[idx].clone()).collect();
                members.sort_unstable();
                errors.push(GroupBuildError::DependencyCycle { members });
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    // Fills each test's transitive dependency closure, restricted to tests
    // in the group. Only called once the graph is known to be acyclic.
    fn populate_expanded_deps(&mut self) {
        let direct: HashMap<String, Vec<String>> = self
            .tests
            .iter()
            .map(|(id, test)| {
                let deps = test
                    .depends
                    .iter()
                    .filter(|d| self.tests.contains_key(*d))
                    .cloned()
                    .collect();
                (id.clone(), deps)
            })
            .collect();

        let mut closures: HashMap<String, BTreeSet<String>> = HashMap::new();
        for id in self.tests.keys() {
            closure_of(id, &direct, &mut closures);
        }

        for (id, test) in self.tests.iter_mut() {
            if let Some(closure) = closures.get(id) {
                test.expanded_deps = closure.clone();
            }
        }
    }
}

fn closure_of(
    id: &str,
    direct: &HashMap<String, Vec<String>>,
    closures: &mut HashMap<String, BTreeSet<String>>,
) -> BTreeSet<String> {
    if let Some(done) = closures.get(id) {
        return done.clone();
    }

    let mut closure = BTreeSet::new();
    if let Some(deps) = direct.get(id) {
        for dep in deps {
            closure.insert(dep.clone());
            closure.extend(closure_of(dep, direct, closures));
        }
    }
    closures.insert(id.to_string(), closure.clone());
    closure
}

// A seed or dependency name resolves to a test id first, then to a tag.
fn resolve<'e>(env: &'e TestEnvironment, name: &str) -> Vec<&'e Test> {
    if let Some(test) = env.test(name) {
        return vec![test];
    }
    env.tests_for_tag(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::TestEnvironment;
    use camino_tempfile::{tempdir, Utf8TempDir};
    use pretty_assertions::assert_eq;
    use std::fs;

    // Writes a tree of test files and loads it as an environment.
    fn env_with(files: &[(&str, &str)]) -> (Utf8TempDir, TestEnvironment) {
        let dir = tempdir().unwrap();
        for (name, contents) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, contents).unwrap();
        }
        let env = TestEnvironment::load(dir.path()).unwrap();
        (dir, env)
    }

    fn config(use_deps: bool, tests: &[&str]) -> GroupConfig {
        GroupConfig {
            name: "test".to_string(),
            use_deps,
            tests: tests.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn seeds_only() {
        let (_dir, env) = env_with(&[
            ("boot.t", "q"),
            ("threads/tt1.t", "---\ndepends: [boot]\n---\ntt1"),
        ]);

        let group = TestGroup::from_config(&config(false, &["threads/tt1"]), &env).unwrap();
        assert_eq!(group.tests.len(), 1);
        assert!(group.tests.contains_key("threads/tt1"));
    }

    #[test]
    fn dependency_expansion() {
        let (_dir, env) = env_with(&[
            ("boot.t", "q"),
            ("threads/tt1.t", "---\ndepends: [boot]\n---\ntt1"),
            (
                "sync/sy1.t",
                "---\ndepends: [threads/tt1]\n---\nsy1",
            ),
        ]);

        let group = TestGroup::from_config(&config(true, &["sync/sy1"]), &env).unwrap();
        assert_eq!(group.tests.len(), 3);

        let sy1 = &group.tests["sync/sy1"];
        assert!(!sy1.is_dependency);
        assert_eq!(
            sy1.expanded_deps,
            ["boot", "threads/tt1"]
                .iter()
                .map(|s| s.to_string())
                .collect()
        );
        assert!(group.tests["boot"].is_dependency);
        assert!(group.tests["threads/tt1"].is_dependency);
    }

    #[test]
    fn dependency_order_is_topological() {
        let (_dir, env) = env_with(&[
            ("boot.t", "q"),
            ("threads/tt1.t", "---\ndepends: [boot]\n---\ntt1"),
            ("sync/sy1.t", "---\ndepends: [threads/tt1]\n---\nsy1"),
        ]);

        let group = TestGroup::from_config(&config(true, &["sync/sy1"]), &env).unwrap();
        let order = group.dependency_order().unwrap();
        let pos = |id: &str| order.iter().position(|o| o == id).unwrap();
        assert!(pos("boot") < pos("threads/tt1"));
        assert!(pos("threads/tt1") < pos("sync/sy1"));
    }

    #[test]
    fn tag_seeds() {
        let (_dir, env) = env_with(&[
            ("threads/tt1.t", "---\ntags: [threads]\n---\ntt1"),
            ("threads/tt2.t", "---\ntags: [threads]\n---\ntt2"),
        ]);

        let group = TestGroup::from_config(&config(false, &["threads"]), &env).unwrap();
        assert_eq!(group.tests.len(), 2);
    }

    #[test]
    fn unknown_seed() {
        let (_dir, env) = env_with(&[("boot.t", "q")]);
        let errs = TestGroup::from_config(&config(false, &["nope"]), &env).unwrap_err();
        assert!(matches!(
            errs.as_slice(),
            [GroupBuildError::UnknownTest { name }] if name == "nope"
        ));
    }

    #[test]
    fn unknown_dependency() {
        let (_dir, env) = env_with(&[("a.t", "---\ndepends: [missing]\n---\na")]);
        let errs = TestGroup::from_config(&config(true, &["a"]), &env).unwrap_err();
        assert!(matches!(
            errs.as_slice(),
            [GroupBuildError::UnknownDependency { name, wanted_by }]
                if name == "missing" && wanted_by == "a"
        ));
    }

    #[test]
    fn missing_dependency_ignored_without_use_deps() {
        let (_dir, env) = env_with(&[("a.t", "---\ndepends: [missing]\n---\na")]);
        let group = TestGroup::from_config(&config(false, &["a"]), &env).unwrap();
        assert_eq!(group.tests.len(), 1);
    }

    #[test]
    fn dependency_cycle() {
        let (_dir, env) = env_with(&[
            ("a.t", "---\ndepends: [b]\n---\na"),
            ("b.t", "---\ndepends: [a]\n---\nb"),
        ]);

        let errs = TestGroup::from_config(&config(true, &["a"]), &env).unwrap_err();
        assert!(errs.iter().any(|e| matches!(
            e,
            GroupBuildError::DependencyCycle { members }
                if members == &["a".to_string(), "b".to_string()]
        )));
    }

    #[test]
    fn self_dependency_cycle() {
        let (_dir, env) = env_with(&[("a.t", "---\ndepends: [a]\n---\na")]);
        let errs = TestGroup::from_config(&config(true, &["a"]), &env).unwrap_err();
        assert!(errs
            .iter()
            .any(|e| matches!(e, GroupBuildError::DependencyCycle { .. })));
    }
}
