//! Wraps the `helm` binary via `QoveryCommand`, mirroring the subprocess
//! idiom of the teacher's `cmd::command` module rather than the legacy
//! `cmd::helm` free-function style built on the old `SimpleError`.

use crate::cmd::command::{CommandError as SubprocessError, CommandKiller, ExecutableCommand, QoveryCommand};
use crate::cmd::structs::HelmStatusRow;
use crate::models::release_state::{ReleaseState, ReleaseStatus};
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum HelmError {
    #[error("helm command failed: {0}")]
    CmdError(#[from] SubprocessError),
    #[error("unable to parse helm output: {0}")]
    ParsingError(String),
}

pub struct ChartSetValue {
    pub key: String,
    pub value: String,
}

impl ChartSetValue {
    /// Escapes `/` to `\/` so Helm does not interpret it as a nested-path
    /// separator inside the flag value (spec.md §4.2 step 6, testable
    /// property 7).
    pub fn escaped_set_arg(&self) -> String {
        format!("{}={}", self.key, self.value.replace('/', "\\/"))
    }
}

pub struct Helm {
    kubeconfig: Option<String>,
}

impl Helm {
    pub fn new(kubeconfig: Option<String>) -> Helm {
        Helm { kubeconfig }
    }

    pub fn uninstall(&self, release_name: &str, namespace: &str, timeout: Duration) -> Result<(), HelmError> {
        let mut owned_args = vec![
            "uninstall".to_string(),
            release_name.to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
            "--wait".to_string(),
            "--timeout".to_string(),
            format!("{}s", timeout.as_secs()),
        ];
        if let Some(kubeconfig) = &self.kubeconfig {
            owned_args.push("--kubeconfig".to_string());
            owned_args.push(kubeconfig.clone());
        }
        let arg_refs: Vec<&str> = owned_args.iter().map(String::as_str).collect();
        let mut cmd = QoveryCommand::new("helm", &arg_refs, &[]);
        cmd.exec_with_abort(
            &mut |line| info!("{}", line),
            &mut |line| warn!("{}", line),
            &CommandKiller::from_timeout(timeout),
        )?;
        Ok(())
    }

    /// "not found" is surfaced as `ReleaseStatus::Absent`, per spec.md §4.5 step 3.
    pub fn status(&self, release_name: &str, namespace: &str) -> Result<ReleaseState, HelmError> {
        let mut owned_args = vec![
            "status".to_string(),
            release_name.to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
            "-o".to_string(),
            "json".to_string(),
        ];
        if let Some(kubeconfig) = &self.kubeconfig {
            owned_args.push("--kubeconfig".to_string());
            owned_args.push(kubeconfig.clone());
        }
        let arg_refs: Vec<&str> = owned_args.iter().map(String::as_str).collect();
        let mut cmd = QoveryCommand::new("helm", &arg_refs, &[]);

        let mut stdout = String::new();
        let mut stderr = String::new();
        let result = cmd.exec_with_output(&mut |line| stdout.push_str(&line), &mut |line| stderr.push_str(&line));

        match result {
            Ok(()) => {
                let row: HelmStatusRow = serde_json::from_str(&stdout).map_err(|e| HelmError::ParsingError(e.to_string()))?;
                Ok(ReleaseState {
                    status: ReleaseStatus::from_helm_status_str(&row.status),
                    revision: row.revision.parse().ok(),
                    description: Some(row.description),
                })
            }
            Err(_) if stderr.contains("release: not found") => Ok(ReleaseState::absent()),
            Err(err) => Err(HelmError::CmdError(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_value_escapes_forward_slash() {
        let v = ChartSetValue {
            key: "deployment.env.PATH_VAR".to_string(),
            value: "/usr/local/bin".to_string(),
        };
        assert_eq!(v.escaped_set_arg(), "deployment.env.PATH_VAR=\\/usr\\/local\\/bin");
    }
}
