//! Context that rides along with every `EngineError` / `EngineEvent`, modeled on
//! the teacher's `events` module but rescoped from organisation/cluster/cloud-provider
//! identity down to the Build/Deploy identity this domain actually carries.

use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Deploy,
    Monitor,
    Reconcile,
    Rbac,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Deploy => "deploy",
            Stage::Monitor => "monitor",
            Stage::Reconcile => "reconcile",
            Stage::Rbac => "rbac",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone)]
pub struct EventDetails {
    pub build_uuid: Uuid,
    pub deploy_uuid: Uuid,
    pub deployable_name: String,
    pub stage: Stage,
}

impl EventDetails {
    pub fn new(build_uuid: Uuid, deploy_uuid: Uuid, deployable_name: impl Into<String>, stage: Stage) -> Self {
        EventDetails {
            build_uuid,
            deploy_uuid,
            deployable_name: deployable_name.into(),
            stage,
        }
    }
}

impl fmt::Display for EventDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "build={} deploy={} deployable={} stage={}",
            self.build_uuid, self.deploy_uuid, self.deployable_name, self.stage
        )
    }
}

#[derive(Debug, Clone)]
pub enum EngineEvent {
    Debug(EventDetails, String),
    Info(EventDetails, String),
    Warning(EventDetails, String),
    Error(EventDetails, String),
}

impl EngineEvent {
    pub fn details(&self) -> &EventDetails {
        match self {
            EngineEvent::Debug(d, _) | EngineEvent::Info(d, _) | EngineEvent::Warning(d, _) | EngineEvent::Error(d, _) => d,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            EngineEvent::Debug(_, m) | EngineEvent::Info(_, m) | EngineEvent::Warning(_, m) | EngineEvent::Error(_, m) => m,
        }
    }
}
