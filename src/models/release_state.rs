#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartVariant {
    OrgChart,
    Public,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseStatus {
    Deployed,
    PendingInstall,
    PendingUpgrade,
    PendingRollback,
    Failed,
    Unknown,
    Absent,
}

impl ReleaseStatus {
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            ReleaseStatus::PendingInstall | ReleaseStatus::PendingUpgrade | ReleaseStatus::PendingRollback
        )
    }

    pub fn from_helm_status_str(s: &str) -> ReleaseStatus {
        match s {
            "deployed" => ReleaseStatus::Deployed,
            "pending-install" => ReleaseStatus::PendingInstall,
            "pending-upgrade" => ReleaseStatus::PendingUpgrade,
            "pending-rollback" => ReleaseStatus::PendingRollback,
            "failed" => ReleaseStatus::Failed,
            _ => ReleaseStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReleaseState {
    pub status: ReleaseStatus,
    pub revision: Option<u32>,
    pub description: Option<String>,
}

impl ReleaseState {
    pub fn absent() -> Self {
        ReleaseState {
            status: ReleaseStatus::Absent,
            revision: None,
            description: None,
        }
    }
}
