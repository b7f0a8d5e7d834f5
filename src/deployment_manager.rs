//! Scheduling head: builds the wave plan at construction time, then drives
//! deployment wave-by-wave with intra-wave concurrency (spec.md §4.1).
//! Mirrors the shape of the teacher's `EnvironmentDeployment` driving a
//! bounded worker pool (`DeploymentThreadsPool`): each wave member runs on
//! its own OS thread since `DeployExecutor::execute` is itself synchronous
//! (it bridges into async Kubernetes/Helm calls via `runtime::block_on`).

use crate::activity_feed::{ActivityFeed, StatusUpdate};
use crate::config::GlobalConfig;
use crate::deploy_executor::{execute_deploy, DeployContext};
use crate::errors::EngineError;
use crate::models::build::Build;
use crate::models::deploy::{Deploy, DeployStatus};
use crate::models::wave::Wave;
use crate::scheduler::plan_waves;
use crate::services::kube_client::QubeClient;

pub struct DeploymentManager {
    waves: Vec<Wave>,
}

impl DeploymentManager {
    /// Builds the wave plan at construction time. Invalid input (dangling
    /// deps, cycles) is logged by `plan_waves` but never fatal here.
    pub fn construct(deploys: Vec<Deploy>) -> DeploymentManager {
        DeploymentManager {
            waves: plan_waves(deploys),
        }
    }

    pub fn wave_count(&self) -> usize {
        self.waves.len()
    }

    /// Completes successfully iff every wave completes successfully; fails
    /// with the first deploy's error once all wave members have settled
    /// (spec.md §4.1 Execution).
    pub fn deploy(&mut self, build: &Build, config: &GlobalConfig, client: &QubeClient, activity_feed: &dyn ActivityFeed) -> Result<(), Box<EngineError>> {
        for wave in &mut self.waves {
            for deploy in &mut wave.deploys {
                deploy.status = DeployStatus::Queued;
                activity_feed.publish(StatusUpdate {
                    deploy_uuid: deploy.uuid,
                    run_uuid: deploy.run_uuid,
                    status: DeployStatus::Queued,
                    status_message: None,
                });
            }
        }

        for wave in &mut self.waves {
            info!("starting wave {} with {} deploy(s)", wave.level, wave.deploys.len());
            let max_parallel = config.max_parallel_deploy.unwrap_or(wave.deploys.len().max(1)).max(1);

            let ctx = DeployContext {
                build,
                config,
                client,
                activity_feed,
            };

            let mut first_error: Option<Box<EngineError>> = None;
            for batch in wave.deploys.chunks_mut(max_parallel) {
                std::thread::scope(|scope| {
                    let handles: Vec<_> = batch
                        .iter_mut()
                        .map(|deploy| scope.spawn(|| execute_deploy(&ctx, deploy)))
                        .collect();

                    for handle in handles {
                        match handle.join() {
                            Ok(Ok(())) => {}
                            Ok(Err(err)) => {
                                if first_error.is_none() {
                                    first_error = Some(err);
                                }
                            }
                            Err(_) => {
                                if first_error.is_none() {
                                    first_error = Some(EngineError::new_unknown(
                                        crate::events::EventDetails::new(
                                            build.uuid,
                                            uuid::Uuid::nil(),
                                            "unknown",
                                            crate::events::Stage::Deploy,
                                        ),
                                        "deploy task panicked".to_string(),
                                        None,
                                    ));
                                }
                            }
                        }
                    }
                });
            }

            info!("wave {} settled", wave.level);
            if let Some(err) = first_error {
                return Err(err);
            }
        }

        Ok(())
    }
}
