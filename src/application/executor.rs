//! The job executor port and the execution profiles it runs under.

use std::{fmt, path::PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::tasks::RenderResult;

#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The container backend could not be reached or refused the request.
    #[error("execution backend failure: {0}")]
    Backend(String),
}

impl ExecutorError {
    pub fn backend(err: impl fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct RemoteCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
}

impl fmt::Debug for RemoteCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("region", &self.region)
            .finish()
    }
}

/// How one `execute` call exposes its output destination to the renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionProfile {
    /// Output goes to a bucket; credentials travel as environment variables.
    Remote {
        bucket: String,
        credentials: RemoteCredentials,
    },
    /// Output goes to a host directory mounted at the same path in the container.
    Local { media_root: PathBuf },
}

impl ExecutionProfile {
    /// The output location as the renderer must see it.
    pub fn output_target(&self, output_location: &str) -> String {
        match self {
            ExecutionProfile::Remote { bucket, .. } => {
                format!("s3://{bucket}/{}", output_location.trim_start_matches('/'))
            }
            ExecutionProfile::Local { .. } => output_location.to_string(),
        }
    }

    pub fn environment(&self) -> Vec<String> {
        match self {
            ExecutionProfile::Remote { credentials, .. } => vec![
                format!("AWS_ACCESS_KEY_ID={}", credentials.access_key_id),
                format!("AWS_SECRET_ACCESS_KEY={}", credentials.secret_access_key),
                format!("AWS_S3_REGION_NAME={}", credentials.region),
            ],
            ExecutionProfile::Local { .. } => Vec::new(),
        }
    }

    pub fn binds(&self) -> Vec<String> {
        match self {
            ExecutionProfile::Remote { .. } => Vec::new(),
            ExecutionProfile::Local { media_root } => {
                let root = media_root.display();
                vec![format!("{root}:{root}:rw")]
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ExecutionProfile::Remote { .. } => "remote",
            ExecutionProfile::Local { .. } => "local",
        }
    }
}

/// Runs the renderer once and reports how it went. A nonzero exit is a normal result;
/// only failures of the execution environment itself are errors.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(
        &self,
        source_location: &str,
        output_location: &str,
        profile: &ExecutionProfile,
    ) -> Result<RenderResult, ExecutorError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::renders::{OutputLayout, RenderRecord, SourceRef};
    use crate::domain::types::SourceType;

    fn remote() -> ExecutionProfile {
        ExecutionProfile::Remote {
            bucket: "renders".into(),
            credentials: RemoteCredentials {
                access_key_id: "AKIA".into(),
                secret_access_key: "s3cr3t".into(),
                region: "us-east-1".into(),
            },
        }
    }

    #[test]
    fn remote_profile_rewrites_output_and_passes_credentials() {
        let profile = remote();
        assert_eq!(
            profile.output_target("render-output/abc"),
            "s3://renders/render-output/abc"
        );
        assert_eq!(
            profile.environment(),
            vec![
                "AWS_ACCESS_KEY_ID=AKIA".to_string(),
                "AWS_SECRET_ACCESS_KEY=s3cr3t".to_string(),
                "AWS_S3_REGION_NAME=us-east-1".to_string(),
            ]
        );
        assert!(profile.binds().is_empty());
    }

    #[test]
    fn remote_html_location_points_into_the_bucket() {
        let layout = OutputLayout::remote("https://renders.s3.amazonaws.com/");
        let record = RenderRecord::new(
            SourceRef::new(SourceType::Arxiv, "1707.08219").expect("valid source"),
        );

        assert_eq!(
            remote().output_target(&record.html_location(&layout)),
            format!("s3://renders/render-output/{}/index.html", record.id)
        );
    }

    #[test]
    fn local_profile_mounts_media_root_read_write() {
        let profile = ExecutionProfile::Local {
            media_root: PathBuf::from("/srv/media"),
        };
        assert_eq!(
            profile.output_target("/srv/media/render-output/abc"),
            "/srv/media/render-output/abc"
        );
        assert!(profile.environment().is_empty());
        assert_eq!(profile.binds(), vec!["/srv/media:/srv/media:rw".to_string()]);
    }

    #[test]
    fn credentials_debug_hides_secret() {
        let rendered = format!("{:?}", remote());
        assert!(!rendered.contains("s3cr3t"));
        assert!(rendered.contains("<redacted>"));
    }
}
