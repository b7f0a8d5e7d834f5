//! External status-reporting collaborator. Mirrors the teacher's
//! `msg_publisher::MsgPublisher` shape: a trait the caller supplies a real
//! implementation of (persisting to a Build/Deploy row, pushing to a comment
//! renderer), with a logging no-op default for local use and tests.

use crate::models::deploy::DeployStatus;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub deploy_uuid: Uuid,
    pub run_uuid: Uuid,
    pub status: DeployStatus,
    pub status_message: Option<String>,
}

pub trait ActivityFeed: Send + Sync {
    fn publish(&self, update: StatusUpdate);
    fn clone_dyn(&self) -> Box<dyn ActivityFeed>;
}

impl Clone for Box<dyn ActivityFeed> {
    fn clone(&self) -> Self {
        self.clone_dyn()
    }
}

#[derive(Clone, Default)]
pub struct StdActivityFeed {}

impl StdActivityFeed {
    pub fn new() -> Self {
        StdActivityFeed {}
    }
}

impl ActivityFeed for StdActivityFeed {
    fn publish(&self, update: StatusUpdate) {
        info!(
            "deploy {} (run {}) -> {:?} {}",
            update.deploy_uuid,
            update.run_uuid,
            update.status,
            update.status_message.as_deref().unwrap_or("")
        );
    }

    fn clone_dyn(&self) -> Box<dyn ActivityFeed> {
        Box::new(self.clone())
    }
}
