use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    Pending,
    Deploying,
    Ready,
    Failed,
}

#[derive(Debug, Clone)]
pub struct Build {
    pub uuid: Uuid,
    pub namespace: String,
    pub is_static: bool,
    pub enable_full_yaml: bool,
    pub comment_runtime_env: HashMap<String, String>,
    pub comment_init_env: HashMap<String, String>,
    pub capacity_type: String,
    pub status: BuildStatus,
}

impl Build {
    /// `commentRuntimeEnv`/`commentInitEnv` are merged over `Deploy.env`/`Deploy.initEnv`
    /// with comment values winning (spec.md §3 invariant).
    pub fn merged_runtime_env(&self, deploy_env: &HashMap<String, String>) -> HashMap<String, String> {
        merge_comment_over(deploy_env, &self.comment_runtime_env)
    }

    pub fn merged_init_env(&self, deploy_init_env: &HashMap<String, String>) -> HashMap<String, String> {
        merge_comment_over(deploy_init_env, &self.comment_init_env)
    }
}

fn merge_comment_over(base: &HashMap<String, String>, comment: &HashMap<String, String>) -> HashMap<String, String> {
    let mut merged = base.clone();
    for (k, v) in comment {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(comment_runtime_env: HashMap<String, String>) -> Build {
        Build {
            uuid: Uuid::nil(),
            namespace: "lifecycle-1234".into(),
            is_static: false,
            enable_full_yaml: false,
            comment_runtime_env,
            comment_init_env: HashMap::new(),
            capacity_type: "ON_DEMAND".into(),
            status: BuildStatus::Pending,
        }
    }

    #[test]
    fn comment_env_wins_over_deploy_env() {
        let mut comment = HashMap::new();
        comment.insert("FOO".to_string(), "comment-value".to_string());
        let b = build(comment);

        let mut deploy_env = HashMap::new();
        deploy_env.insert("FOO".to_string(), "deploy-value".to_string());
        deploy_env.insert("BAR".to_string(), "kept".to_string());

        let merged = b.merged_runtime_env(&deploy_env);
        assert_eq!(merged.get("FOO").unwrap(), "comment-value");
        assert_eq!(merged.get("BAR").unwrap(), "kept");
    }
}
