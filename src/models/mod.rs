pub mod build;
pub mod deploy;
pub mod deployable;
pub mod job_result;
pub mod release_state;
pub mod wave;

pub use build::Build;
pub use deploy::{Deploy, DeployStatus};
pub use deployable::{Deployable, DeployableType};
pub use job_result::{JobResult, JobStatus};
pub use release_state::{ReleaseState, ReleaseStatus};
pub use wave::Wave;
