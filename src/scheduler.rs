//! Graph construction for `DeploymentManager`. A pure function from
//! `(deploys, deployable name -> deps)` to `Vec<Wave>` — unlike the destructive
//! in-place list mutation this is re-architected from (spec.md §9), it never
//! mutates the input deploys.

use crate::models::deploy::Deploy;
use crate::models::wave::Wave;
use std::collections::{HashMap, HashSet};

/// Builds the wave plan per spec.md §4.1's Kahn's-algorithm, level-partitioned
/// construction. Dangling and self dependencies are dropped with one warning
/// each. Deploys left over after the graph stabilizes (cycle members) are
/// silently excluded from the plan (spec.md §9 Open Question 1 — see
/// DESIGN.md for why this implementation keeps that behavior unchanged).
pub fn plan_waves(deploys: Vec<Deploy>) -> Vec<Wave> {
    let names: HashSet<&str> = deploys.iter().map(|d| d.deployable.name.as_str()).collect();
    let order: Vec<String> = deploys.iter().map(|d| d.deployable.name.clone()).collect();

    let mut remaining_deps: HashMap<String, HashSet<String>> = HashMap::new();
    for d in &deploys {
        let mut deps = HashSet::new();
        for dep in &d.deployable.deployment_depends_on {
            if dep == &d.deployable.name {
                warn!("dropping self-dependency for deployable {}", d.deployable.name);
                continue;
            }
            if !names.contains(dep.as_str()) {
                warn!("dropping dangling dependency {} -> {}", d.deployable.name, dep);
                continue;
            }
            deps.insert(dep.clone());
        }
        remaining_deps.insert(d.deployable.name.clone(), deps);
    }

    let mut by_name: HashMap<String, Deploy> = deploys.into_iter().map(|d| (d.deployable.name.clone(), d)).collect();

    let mut waves = Vec::new();
    let mut level = 0usize;

    loop {
        // Preserve the caller's original ordering within a wave (spec.md §4.1
        // Tie-break), rather than the arbitrary order `HashMap` iteration gives.
        let ready_names: Vec<String> = order
            .iter()
            .filter(|name| remaining_deps.get(name.as_str()).is_some_and(HashSet::is_empty))
            .cloned()
            .collect();

        if ready_names.is_empty() {
            break;
        }

        for name in &ready_names {
            remaining_deps.remove(name);
        }
        for deps in remaining_deps.values_mut() {
            for name in &ready_names {
                deps.remove(name);
            }
        }

        let wave_deploys: Vec<Deploy> = ready_names.into_iter().filter_map(|name| by_name.remove(&name)).collect();

        waves.push(Wave {
            level,
            deploys: wave_deploys,
        });
        level += 1;
    }

    if !remaining_deps.is_empty() {
        warn!(
            "{} deployable(s) excluded from the plan due to an unresolved dependency cycle: {:?}",
            remaining_deps.len(),
            remaining_deps.keys().collect::<Vec<_>>()
        );
    }

    waves
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::deploy::DeployStatus;
    use crate::models::deployable::{Deployable, DeployableType};
    use std::collections::HashMap as Map;
    use uuid::Uuid;

    fn deploy(name: &str, deps: &[&str]) -> Deploy {
        Deploy {
            uuid: Uuid::new_v4(),
            run_uuid: Uuid::new_v4(),
            status: DeployStatus::Queued,
            status_message: None,
            docker_image: None,
            init_docker_image: None,
            env: Map::new(),
            init_env: Map::new(),
            sha: "abcdef0123".into(),
            branch_name: "main".into(),
            manifest: None,
            replica_count: 1,
            active: true,
            keda_scale_to_zero: None,
            build_output: None,
            cname: None,
            deployable: Deployable {
                name: name.to_string(),
                r#type: DeployableType::Docker,
                helm: None,
                resource_requests_cpu: None,
                resource_requests_memory: None,
                resource_limits_cpu: None,
                resource_limits_memory: None,
                probes: vec![],
                ports: vec![],
                deployment_depends_on: deps.iter().map(|s| s.to_string()).collect(),
                service_disks_yaml: None,
            },
        }
    }

    #[test]
    fn four_deploy_example_partitions_into_two_waves() {
        let deploys = vec![
            deploy("postgres", &[]),
            deploy("nginx", &[]),
            deploy("jenkins", &[]),
            deploy("redis", &["postgres"]),
        ];

        let waves = plan_waves(deploys);
        assert_eq!(waves.len(), 2);
        let l0: Vec<_> = waves[0].deploys.iter().map(|d| d.deployable.name.clone()).collect();
        assert_eq!(l0, vec!["postgres", "nginx", "jenkins"]);
        let l1: Vec<_> = waves[1].deploys.iter().map(|d| d.deployable.name.clone()).collect();
        assert_eq!(l1, vec!["redis"]);
    }

    #[test]
    fn seven_node_chain_yields_four_waves() {
        let deploys = vec![
            deploy("lc-test", &[]),
            deploy("nginx", &[]),
            deploy("postgres-db", &[]),
            deploy("jenkins", &[]),
            deploy("redis", &["postgres-db"]),
            deploy("lc-test-gh-type", &["redis"]),
            deploy("grpc-echo", &["lc-test-gh-type"]),
        ];

        let waves = plan_waves(deploys);
        assert_eq!(waves.len(), 4);
    }

    #[test]
    fn single_deploy_no_deps_yields_one_wave_of_one() {
        let waves = plan_waves(vec![deploy("solo", &[])]);
        assert_eq!(waves.len(), 1);
        assert_eq!(waves[0].deploys.len(), 1);
    }

    #[test]
    fn empty_input_yields_empty_plan() {
        let waves = plan_waves(vec![]);
        assert!(waves.is_empty());
    }

    #[test]
    fn dangling_dependency_is_dropped_not_fatal() {
        let deploys = vec![deploy("a", &["does-not-exist"])];
        let waves = plan_waves(deploys);
        assert_eq!(waves.len(), 1);
        assert_eq!(waves[0].deploys.len(), 1);
    }

    #[test]
    fn self_dependency_is_dropped() {
        let deploys = vec![deploy("a", &["a"])];
        let waves = plan_waves(deploys);
        assert_eq!(waves.len(), 1);
        assert_eq!(waves[0].deploys.len(), 1);
    }

    #[test]
    fn cycle_members_are_excluded_from_the_plan() {
        let deploys = vec![deploy("a", &["b"]), deploy("b", &["a"]), deploy("c", &[])];
        let waves = plan_waves(deploys);
        let placed: Vec<_> = waves.iter().flat_map(|w| w.deploys.iter().map(|d| d.deployable.name.clone())).collect();
        assert_eq!(placed, vec!["c"]);
    }

    #[test]
    fn independent_deploys_preserve_insertion_order_within_a_wave() {
        let deploys = vec![deploy("zebra", &[]), deploy("alpha", &[]), deploy("mike", &[])];
        let waves = plan_waves(deploys);
        assert_eq!(waves.len(), 1);
        let names: Vec<_> = waves[0].deploys.iter().map(|d| d.deployable.name.clone()).collect();
        assert_eq!(names, vec!["zebra", "alpha", "mike"]);
    }

    #[test]
    fn repeated_planning_of_unchanged_input_is_deterministic() {
        let deploys1 = vec![deploy("a", &[]), deploy("b", &["a"])];
        let deploys2 = vec![deploy("a", &[]), deploy("b", &["a"])];
        let waves1 = plan_waves(deploys1);
        let waves2 = plan_waves(deploys2);
        let names1: Vec<_> = waves1.iter().map(|w| w.deploys.iter().map(|d| d.deployable.name.clone()).collect::<Vec<_>>()).collect();
        let names2: Vec<_> = waves2.iter().map(|w| w.deploys.iter().map(|d| d.deployable.name.clone()).collect::<Vec<_>>()).collect();
        assert_eq!(names1, names2);
    }
}
