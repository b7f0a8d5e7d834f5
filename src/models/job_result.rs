#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Succeeded,
    Failed,
    Superseded,
}

#[derive(Debug, Clone)]
pub struct JobResult {
    pub success: bool,
    pub status: JobStatus,
    pub logs: String,
}

impl JobResult {
    pub fn succeeded(logs: String) -> Self {
        JobResult {
            success: true,
            status: JobStatus::Succeeded,
            logs,
        }
    }

    pub fn failed(logs: String) -> Self {
        JobResult {
            success: false,
            status: JobStatus::Failed,
            logs,
        }
    }

    pub fn superseded(logs: String) -> Self {
        JobResult {
            success: true,
            status: JobStatus::Superseded,
            logs,
        }
    }
}
