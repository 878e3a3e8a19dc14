//! Renderer execution in throwaway Docker containers.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::{
    Docker,
    container::{
        Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
        StartContainerOptions, WaitContainerOptions,
    },
    errors::Error as BollardError,
    image::CreateImageOptions,
    models::HostConfig,
};
use futures::{StreamExt, TryStreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::executor::{ExecutionProfile, ExecutorError, JobExecutor};
use crate::domain::tasks::RenderResult;

use super::error::InfraError;

const CONTAINER_LABEL: &str = "vellum.render";

#[derive(Clone)]
pub struct DockerExecutor {
    docker: Docker,
    image: String,
    command: String,
}

impl DockerExecutor {
    /// Connect using the local Docker defaults (`DOCKER_HOST` or the unix socket).
    pub fn connect(image: impl Into<String>, command: impl Into<String>) -> Result<Self, InfraError> {
        let docker = Docker::connect_with_local_defaults().map_err(|err| {
            InfraError::container(format!("failed to connect to docker: {err}"))
        })?;
        Ok(Self {
            docker,
            image: qualified_image(&image.into()),
            command: command.into(),
        })
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    async fn ensure_image(&self) -> Result<(), BollardError> {
        if self.docker.inspect_image(&self.image).await.is_ok() {
            return Ok(());
        }

        info!(target = "vellum::docker", image = %self.image, "pulling renderer image");
        let mut stream = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: self.image.clone(),
                ..Default::default()
            }),
            None,
            None,
        );
        while stream.try_next().await?.is_some() {}
        Ok(())
    }

    fn container_config(
        &self,
        source_location: &str,
        output_target: String,
        profile: &ExecutionProfile,
    ) -> Config<String> {
        let env = profile.environment();
        let binds = profile.binds();

        Config {
            image: Some(self.image.clone()),
            cmd: Some(vec![
                self.command.clone(),
                source_location.to_string(),
                output_target,
            ]),
            env: (!env.is_empty()).then_some(env),
            labels: Some(HashMap::from([(
                CONTAINER_LABEL.to_string(),
                profile.label().to_string(),
            )])),
            host_config: Some(HostConfig {
                auto_remove: Some(false),
                binds: (!binds.is_empty()).then_some(binds),
                ..Default::default()
            }),
            tty: Some(false),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        }
    }

    async fn run_to_completion(&self, name: &str) -> Result<RenderResult, BollardError> {
        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await?;

        let exit_code = self.wait(name).await?;
        let logs = self.collect_logs(name).await?;
        Ok(RenderResult { exit_code, logs })
    }

    async fn wait(&self, name: &str) -> Result<i32, BollardError> {
        let mut stream = self
            .docker
            .wait_container(name, None::<WaitContainerOptions<String>>);

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code as i32),
            // Nonzero exits surface as a wait error carrying the code.
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code as i32),
            Some(Err(err)) => Err(err),
            None => {
                let inspect = self.docker.inspect_container(name, None).await?;
                Ok(inspect
                    .state
                    .and_then(|state| state.exit_code)
                    .unwrap_or(-1) as i32)
            }
        }
    }

    async fn collect_logs(&self, name: &str) -> Result<String, BollardError> {
        let mut stream = self.docker.logs(
            name,
            Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                follow: false,
                tail: "all".to_string(),
                ..Default::default()
            }),
        );

        let mut buffer = Vec::new();
        while let Some(chunk) = stream.try_next().await? {
            match chunk {
                LogOutput::StdOut { message }
                | LogOutput::StdErr { message }
                | LogOutput::Console { message } => buffer.extend_from_slice(&message),
                LogOutput::StdIn { .. } => {}
            }
        }
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    async fn remove(&self, name: &str) {
        if let Err(err) = self
            .docker
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            warn!(
                target = "vellum::docker",
                container = name,
                error = %err,
                "failed to remove renderer container"
            );
        }
    }
}

#[async_trait]
impl JobExecutor for DockerExecutor {
    async fn execute(
        &self,
        source_location: &str,
        output_location: &str,
        profile: &ExecutionProfile,
    ) -> Result<RenderResult, ExecutorError> {
        self.ensure_image().await.map_err(ExecutorError::backend)?;

        let name = format!("vellum-render-{}", Uuid::new_v4());
        let output_target = profile.output_target(output_location);
        debug!(
            target = "vellum::docker",
            container = %name,
            source = source_location,
            output = %output_target,
            profile = profile.label(),
            "creating renderer container"
        );

        let config = self.container_config(source_location, output_target, profile);
        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.as_str(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(ExecutorError::backend)?;

        let outcome = self.run_to_completion(&name).await;
        self.remove(&name).await;

        outcome.map_err(ExecutorError::backend)
    }
}

/// Docker pulls every tag of an untagged image; pin `latest` instead.
fn qualified_image(image: &str) -> String {
    let last_segment = image.rsplit('/').next().unwrap_or(image);
    if last_segment.contains(':') || last_segment.contains('@') {
        image.to_string()
    } else {
        format!("{image}:latest")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untagged_images_are_pinned_to_latest() {
        assert_eq!(qualified_image("arxivvanity/engrafo"), "arxivvanity/engrafo:latest");
        assert_eq!(
            qualified_image("arxivvanity/engrafo:2.1"),
            "arxivvanity/engrafo:2.1"
        );
        assert_eq!(
            qualified_image("registry.local:5000/engrafo"),
            "registry.local:5000/engrafo:latest"
        );
    }
}
