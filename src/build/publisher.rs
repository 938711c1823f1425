//! Artifact relocation and upload to the artifact store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::catalog::RecordId;
use crate::config::ForgelineConfig;
use crate::error::BuildError;

const BUILD_TOKEN_HEADER: &str = "build-token";
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Whether relocation takes the stage output away or leaves it in place
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relocation {
    /// Freshly built output; the fixed path is cleared
    Move,
    /// Stored output reused across builds
    Copy,
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Failed to read artifact: {0}")]
    Read(#[from] std::io::Error),

    #[error("Upload request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Artifact store rejected upload with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Destination for finished payload binaries
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Uploads `path` for `record_id` and returns the store's acknowledgment
    async fn upload(
        &self,
        record_id: RecordId,
        build_token: &str,
        path: &Path,
    ) -> Result<String, PublishError>;
}

/// Multipart upload to `{base_url}/{record_id}/file/`
pub struct HttpArtifactStore {
    base_url: String,
    http_client: Client,
}

impl HttpArtifactStore {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, PublishError> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    pub fn from_config(config: &ForgelineConfig) -> Result<Self, PublishError> {
        Self::new(config.artifact_store_url.clone(), config.upload_timeout())
    }

    pub fn upload_url(&self, record_id: RecordId) -> String {
        format!("{}/{}/file/", self.base_url, record_id)
    }
}

#[async_trait]
impl ArtifactStore for HttpArtifactStore {
    async fn upload(
        &self,
        record_id: RecordId,
        build_token: &str,
        path: &Path,
    ) -> Result<String, PublishError> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string());
        let size = bytes.len();
        let form = Form::new().part("file", Part::bytes(bytes).file_name(file_name));

        let url = self.upload_url(record_id);
        debug!(url = %url, size, "Uploading artifact");
        let response = self
            .http_client
            .post(&url)
            .header(BUILD_TOKEN_HEADER, build_token)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(PublishError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

/// Components of a relocated artifact's file name
#[derive(Debug, Clone)]
pub struct ArtifactName {
    /// Agent type or module name
    pub catalog: String,
    /// Configuration or format name
    pub variant: String,
    /// Payload name from the request
    pub request: String,
    pub built_at: DateTime<Utc>,
}

impl ArtifactName {
    /// `<catalog>_<variant>_<request>_<YYYYmmddHHMMSS><ext>` where `ext` keeps its dot
    pub fn file_name(&self, extension: &str) -> String {
        format!(
            "{}_{}_{}_{}{}",
            sanitize(&self.catalog),
            sanitize(&self.variant),
            sanitize(&self.request),
            self.built_at.format("%Y%m%d%H%M%S"),
            extension
        )
    }
}

fn sanitize(component: &str) -> String {
    component.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|', ' '], "_")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedArtifact {
    pub path: PathBuf,
    pub ack: String,
}

pub struct ArtifactPublisher {
    store: Arc<dyn ArtifactStore>,
    build_dir: PathBuf,
}

impl ArtifactPublisher {
    pub fn new(store: Arc<dyn ArtifactStore>, build_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            build_dir: build_dir.into(),
        }
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    /// Moves (or copies, for stored outputs) a stage output to a unique name in
    /// the build directory. An existing file is never overwritten; a numeric
    /// suffix is added until the name is free.
    pub async fn relocate(
        &self,
        output: &Path,
        name: &ArtifactName,
        mode: Relocation,
    ) -> Result<PathBuf, BuildError> {
        let extension = output
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        tokio::fs::create_dir_all(&self.build_dir)
            .await
            .map_err(|e| BuildError::io("creating build output directory", e))?;
        let destination = self.reserve(name, &extension).await?;

        let moved = match mode {
            Relocation::Move => match tokio::fs::rename(output, &destination).await {
                Ok(()) => true,
                Err(e) => {
                    debug!(error = %e, "Rename failed, falling back to copy");
                    false
                }
            },
            Relocation::Copy => false,
        };
        if !moved {
            if let Err(e) = tokio::fs::copy(output, &destination).await {
                let _ = tokio::fs::remove_file(&destination).await;
                return Err(BuildError::io(format!("copying {}", output.display()), e));
            }
            if mode == Relocation::Move {
                if let Err(e) = tokio::fs::remove_file(output).await {
                    warn!(path = %output.display(), "Could not remove stage output after copy: {}", e);
                }
            }
        }

        info!(
            from = %output.display(),
            to = %destination.display(),
            ?mode,
            "Relocated artifact"
        );
        Ok(destination)
    }

    /// Claims a free destination path by creating it exclusively
    async fn reserve(&self, name: &ArtifactName, extension: &str) -> Result<PathBuf, BuildError> {
        let base = name.file_name("");
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let file_name = match attempt {
                0 => format!("{}{}", base, extension),
                n => format!("{}_{}{}", base, n, extension),
            };
            let candidate = self.build_dir.join(file_name);
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
                .await
            {
                Ok(_) => return Ok(candidate),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(BuildError::io(
                        format!("creating {}", candidate.display()),
                        e,
                    ))
                }
            }
        }
        Err(BuildError::io(
            "reserving artifact name",
            std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("no free name for {} in {}", base, self.build_dir.display()),
            ),
        ))
    }

    /// Uploads a relocated artifact. Any failure leaves the file in place.
    pub async fn publish(
        &self,
        path: &Path,
        record_id: RecordId,
        build_token: &str,
    ) -> Result<PublishedArtifact, BuildError> {
        match self.store.upload(record_id, build_token, path).await {
            Ok(ack) => {
                info!(record_id, path = %path.display(), "Artifact uploaded");
                Ok(PublishedArtifact {
                    path: path.to_path_buf(),
                    ack,
                })
            }
            Err(e) => {
                warn!(record_id, path = %path.display(), "Artifact upload failed: {}", e);
                Err(BuildError::PublishFailure {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })
            }
        }
    }
}
