use std::collections::HashMap;

use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, PruneContainersOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::image::{BuildImageOptions, RemoveImageOptions};
use bollard::models::{HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum};
use bollard::network::CreateNetworkOptions;
use bollard::{Docker, API_DEFAULT_VERSION};
use futures::stream::StreamExt;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{LABEL_EXERCISE, LABEL_SUBDOMAIN, LABEL_SUBJECT, SANDBOX_PORT};

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("cannot reach container runtime: {0}")]
    Unavailable(String),
    #[error("container runtime refused the request: {0}")]
    Refused(String),
    #[error("image build failed: {0}")]
    Build(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl RuntimeError {
    fn classify(err: bollard::errors::Error) -> Self {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => Self::NotFound(message),
            bollard::errors::Error::DockerResponseServerError { message, .. } => {
                Self::Refused(message)
            }
            other => Self::Unavailable(other.to_string()),
        }
    }
}

/// Everything the runtime needs to start a sandbox. The host port is always
/// ephemeral and read back after start.
#[derive(Debug, Clone)]
pub struct SandboxSpec {
    pub image_tag: String,
    pub container_name: String,
    pub subdomain: String,
    pub subject_id: String,
    pub exercise_id: String,
    pub env: Vec<String>,
    pub network: String,
}

#[derive(Debug, Clone)]
pub struct SandboxSummary {
    pub id: String,
    pub labels: HashMap<String, String>,
    pub state: Option<String>,
}

/// Thin contract over the Docker daemon. All sandbox containers carry the
/// `training.*` label set.
pub struct RuntimeClient {
    docker: Docker,
}

impl RuntimeClient {
    pub async fn connect(socket_path: Option<&str>) -> Result<Self, RuntimeError> {
        let docker = match socket_path {
            Some(socket) => Docker::connect_with_socket(socket, 120, &API_DEFAULT_VERSION),
            None => Docker::connect_with_socket_defaults(),
        }
        .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;

        let version = docker
            .version()
            .await
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;
        info!(
            "Connected to Docker daemon version: {}",
            version.version.unwrap_or_default()
        );

        Ok(Self { docker })
    }

    /// Idempotently create the sandbox network. One retry on transport
    /// errors.
    pub async fn ensure_network(&self, name: &str) -> Result<(), RuntimeError> {
        for attempt in 0..2 {
            let options = CreateNetworkOptions {
                name: name.to_string(),
                check_duplicate: true,
                ..Default::default()
            };
            match self.docker.create_network(options).await {
                Ok(_) => {
                    info!("Created network {}", name);
                    return Ok(());
                }
                Err(bollard::errors::Error::DockerResponseServerError {
                    status_code: 409, ..
                }) => return Ok(()),
                Err(e) if attempt == 0 => {
                    warn!("Network create failed, retrying: {}", e);
                }
                Err(e) => return Err(RuntimeError::classify(e)),
            }
        }
        unreachable!("network create loop exits within two attempts")
    }

    /// Build an image from a gzipped tar build context. Any progress record
    /// carrying an error fails the call with the daemon's message.
    pub async fn build_image(&self, tag: &str, context: Vec<u8>) -> Result<(), RuntimeError> {
        info!("Building image: {}", tag);

        let options = BuildImageOptions {
            dockerfile: "Dockerfile",
            t: tag,
            rm: true,
            ..Default::default()
        };

        let mut stream = self.docker.build_image(options, None, Some(context.into()));

        while let Some(result) = stream.next().await {
            match result {
                Ok(progress) => {
                    if let Some(line) = progress.stream {
                        debug!("Build: {}", line.trim());
                    }
                    if let Some(error) = progress.error {
                        return Err(RuntimeError::Build(error));
                    }
                }
                Err(e) => return Err(RuntimeError::Build(e.to_string())),
            }
        }

        info!("Successfully built image: {}", tag);
        Ok(())
    }

    /// Create and start a sandbox container; returns the container id. The
    /// runtime picks the host port.
    pub async fn create_and_start(&self, spec: &SandboxSpec) -> Result<String, RuntimeError> {
        let mut labels = HashMap::new();
        labels.insert(LABEL_SUBDOMAIN.to_string(), spec.subdomain.clone());
        labels.insert(LABEL_SUBJECT.to_string(), spec.subject_id.clone());
        labels.insert(LABEL_EXERCISE.to_string(), spec.exercise_id.clone());

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(SANDBOX_PORT.to_string(), HashMap::new());

        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            SANDBOX_PORT.to_string(),
            Some(vec![PortBinding {
                host_ip: Some("127.0.0.1".to_string()),
                // Empty host port asks the runtime for an ephemeral one
                host_port: Some(String::new()),
            }]),
        );

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            network_mode: Some(spec.network.clone()),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::NO),
                maximum_retry_count: None,
            }),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image_tag.clone()),
            env: Some(spec.env.clone()),
            labels: Some(labels),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.container_name.as_str(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(RuntimeError::classify)?;

        if let Err(e) = self
            .docker
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await
        {
            // Don't leave the created-but-unstarted container behind
            let _ = self
                .docker
                .remove_container(
                    &response.id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await;
            return Err(RuntimeError::classify(e));
        }

        info!(
            "Started container {} ({})",
            spec.container_name, response.id
        );
        Ok(response.id)
    }

    /// Read back the ephemeral host port mapped to the sandbox port.
    pub async fn host_port(&self, container_id: &str) -> Result<Option<String>, RuntimeError> {
        let info = self
            .docker
            .inspect_container(container_id, None)
            .await
            .map_err(RuntimeError::classify)?;

        Ok(info
            .network_settings
            .and_then(|ns| ns.ports)
            .and_then(|ports| ports.get(SANDBOX_PORT).cloned().flatten())
            .and_then(|bindings| bindings.into_iter().next())
            .and_then(|binding| binding.host_port)
            .filter(|port| !port.is_empty()))
    }

    /// Stop and remove a container. "Already stopped" and "already removed"
    /// both count as success.
    pub async fn stop_and_remove(&self, container_id: &str) -> Result<(), RuntimeError> {
        match self
            .docker
            .stop_container(container_id, Some(StopContainerOptions { t: 10 }))
            .await
        {
            Ok(_) => {}
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304 | 404,
                ..
            }) => {}
            Err(e) => return Err(RuntimeError::classify(e)),
        }

        match self
            .docker
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(RuntimeError::classify(e)),
        }
    }

    /// All containers carrying the sandbox label set.
    pub async fn list_sandboxes(
        &self,
        include_stopped: bool,
    ) -> Result<Vec<SandboxSummary>, RuntimeError> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![LABEL_SUBDOMAIN.to_string()]);

        let options = ListContainersOptions {
            all: include_stopped,
            filters,
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(RuntimeError::classify)?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                Some(SandboxSummary {
                    id: c.id?,
                    labels: c.labels.unwrap_or_default(),
                    state: c.state,
                })
            })
            .collect())
    }

    pub async fn remove_image(&self, tag: &str) -> Result<(), RuntimeError> {
        match self
            .docker
            .remove_image(
                tag,
                Some(RemoveImageOptions {
                    force: true,
                    ..Default::default()
                }),
                None,
            )
            .await
        {
            Ok(_) => {
                info!("Removed image {}", tag);
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(RuntimeError::classify(e)),
        }
    }

    /// Best-effort cleanup of stopped containers.
    pub async fn prune(&self) -> Result<u64, RuntimeError> {
        let response = self
            .docker
            .prune_containers(None::<PruneContainersOptions<String>>)
            .await
            .map_err(RuntimeError::classify)?;
        Ok(response
            .containers_deleted
            .map(|ids| ids.len() as u64)
            .unwrap_or(0))
    }
}
