use bytes::Bytes;
use portal_config::StorageConfig;
use portal_database::{
    ContractRepository, CreateProjectFileRequest, FileStats, Page, Pagination, Project,
    ProjectFile, ProjectRepository,
};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::actor::Actor;
use crate::error::{ServiceError, ServiceResult};
use crate::storage::{validate_path, FileMetadata, FileStorage, StorageError};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif"];

/// A file received from a multipart request
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// Where an upload ended up
#[derive(Debug, Clone, Serialize)]
pub struct StoredUpload {
    pub file_name: String,
    pub file_path: String,
    pub file_size: u64,
    pub file_type: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    #[serde(flatten)]
    pub metadata: FileMetadata,
    pub mime_type: String,
    pub project_file: Option<ProjectFile>,
}

#[derive(Debug, Clone)]
pub struct DownloadedFile {
    pub file_name: String,
    pub mime_type: String,
    pub content: Bytes,
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageStats {
    pub backend: &'static str,
    #[serde(flatten)]
    pub files: FileStats,
}

/// Extension and size limits applied to every upload
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    allowed_extensions: Vec<String>,
    max_bytes: usize,
}

impl UploadPolicy {
    pub fn new(allowed_extensions: Vec<String>, max_bytes: usize) -> Self {
        Self {
            allowed_extensions,
            max_bytes,
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.allowed_extensions.clone(), config.max_upload_bytes)
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Validate an upload and return its lowercased extension.
    pub fn check(&self, upload: &Upload) -> ServiceResult<String> {
        let name = upload.file_name.trim();
        if name.is_empty() {
            return Err(ServiceError::validation("No file selected"));
        }
        if upload.bytes.is_empty() {
            return Err(ServiceError::validation("File is empty"));
        }
        if upload.bytes.len() > self.max_bytes {
            return Err(ServiceError::validation(format!(
                "File exceeds the maximum size of {} bytes",
                self.max_bytes
            )));
        }

        let extension = extension_of(name)
            .ok_or_else(|| ServiceError::validation("File type not allowed"))?;
        if !self.allowed_extensions.iter().any(|allowed| *allowed == extension) {
            return Err(ServiceError::validation("File type not allowed"));
        }
        Ok(extension)
    }

    pub fn check_image(&self, upload: &Upload) -> ServiceResult<String> {
        let extension = self.check(upload)?;
        if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
            Ok(extension)
        } else {
            Err(ServiceError::validation("Only image files are allowed"))
        }
    }
}

fn extension_of(name: &str) -> Option<String> {
    let (stem, extension) = name.rsplit_once('.')?;
    if stem.is_empty() || extension.is_empty() {
        return None;
    }
    Some(extension.to_ascii_lowercase())
}

/// Strip directories and anything outside `[A-Za-z0-9._-]`.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    cleaned.chars().take(255).collect()
}

pub fn mime_type_for(path: &str) -> &'static str {
    match extension_of(path).as_deref() {
        Some("txt") => "text/plain",
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("doc") => "application/msword",
        Some("docx") => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        Some("zip") => "application/zip",
        Some("rar") => "application/vnd.rar",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

/// Owner of a stored path, derived from its first two segments.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PathScope<'a> {
    Project(&'a str),
    Identity(&'a str),
    Contract(&'a str),
    General(&'a str),
    Other,
}

fn scope_of(path: &str) -> PathScope<'_> {
    let mut segments = path.split('/');
    match (segments.next(), segments.next(), segments.next()) {
        (Some("projects"), Some(id), Some(_)) => PathScope::Project(id),
        (Some("identity"), Some(id), Some(_)) => PathScope::Identity(id),
        (Some("contracts"), Some(id), Some(_)) => PathScope::Contract(id),
        (Some("general"), Some(id), Some(_)) => PathScope::General(id),
        _ => PathScope::Other,
    }
}

#[derive(Clone)]
pub struct FileService {
    storage: Arc<dyn FileStorage>,
    policy: UploadPolicy,
    projects: ProjectRepository,
    contracts: ContractRepository,
}

impl FileService {
    pub fn new(pool: SqlitePool, storage: Arc<dyn FileStorage>, policy: UploadPolicy) -> Self {
        Self {
            storage,
            policy,
            projects: ProjectRepository::new(pool.clone()),
            contracts: ContractRepository::new(pool),
        }
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    /// Store an already validated upload as `<folder>/<prefix><uuid>.<ext>`.
    pub(crate) async fn store_in(
        &self,
        folder: &str,
        prefix: &str,
        upload: &Upload,
        extension: &str,
    ) -> ServiceResult<StoredUpload> {
        let path = format!("{folder}/{prefix}{}.{extension}", Uuid::new_v4().simple());
        let meta = self.storage.store(&path, upload.bytes.clone()).await?;

        Ok(StoredUpload {
            file_name: sanitize_file_name(&upload.file_name),
            file_path: path.clone(),
            file_size: meta.size,
            file_type: extension.to_string(),
            mime_type: upload
                .content_type
                .clone()
                .unwrap_or_else(|| mime_type_for(&path).to_string()),
        })
    }

    /// Best-effort removal of an object nothing references anymore.
    pub(crate) async fn discard(&self, path: &str) {
        if let Err(err) = self.storage.delete(path).await {
            warn!(path, error = %err, "failed to remove stored file");
        }
    }

    pub async fn upload_general(&self, actor: &Actor, upload: &Upload) -> ServiceResult<StoredUpload> {
        let extension = self.policy.check(upload)?;
        let stored = self
            .store_in(&format!("general/{}", actor.user_id), "", upload, &extension)
            .await?;
        info!(user_id = %actor.user_id, path = %stored.file_path, "general file uploaded");
        Ok(stored)
    }

    /// Enforce the path ownership rules for `actor`.
    pub async fn authorize(&self, actor: &Actor, path: &str) -> ServiceResult<()> {
        validate_path(path)?;
        if actor.is_admin() {
            return Ok(());
        }

        let allowed = match scope_of(path) {
            PathScope::Project(project_id) => self
                .projects
                .find_by_id(project_id)
                .await?
                .map(|project| project.client_id == actor.user_id)
                .unwrap_or(false),
            PathScope::Contract(contract_id) => self
                .contracts
                .find_by_id(contract_id)
                .await?
                .map(|contract| contract.client_id == actor.user_id)
                .unwrap_or(false),
            PathScope::Identity(user_id) | PathScope::General(user_id) => user_id == actor.user_id,
            PathScope::Other => false,
        };

        if allowed {
            Ok(())
        } else {
            Err(ServiceError::forbidden("Access denied"))
        }
    }

    pub async fn download(&self, actor: &Actor, path: &str) -> ServiceResult<DownloadedFile> {
        self.authorize(actor, path).await?;
        let content = self.storage.retrieve(path).await?;

        let file_name = match self.projects.find_file_by_path(path).await? {
            Some(file) => file.file_name,
            None => path.rsplit('/').next().unwrap_or(path).to_string(),
        };
        Ok(DownloadedFile {
            mime_type: mime_type_for(&file_name).to_string(),
            file_name,
            content,
        })
    }

    pub async fn info(&self, actor: &Actor, path: &str) -> ServiceResult<FileInfo> {
        self.authorize(actor, path).await?;
        let metadata = self.storage.metadata(path).await?;
        let project_file = self.projects.find_file_by_path(path).await?;

        Ok(FileInfo {
            mime_type: mime_type_for(path).to_string(),
            metadata,
            project_file,
        })
    }

    pub async fn delete(&self, actor: &Actor, path: &str) -> ServiceResult<()> {
        self.authorize(actor, path).await?;
        if !self.storage.delete(path).await? {
            return Err(StorageError::NotFound(path.to_string()).into());
        }
        if let Some(file) = self.projects.find_file_by_path(path).await? {
            self.projects.delete_file(&file.id).await?;
        }
        info!(user_id = %actor.user_id, path, "file deleted");
        Ok(())
    }

    async fn accessible_project(&self, actor: &Actor, project_id: &str) -> ServiceResult<Project> {
        let project = self
            .projects
            .find_by_id(project_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Project"))?;
        actor.require_access(&project.client_id)?;
        Ok(project)
    }

    pub async fn list_project_files(
        &self,
        actor: &Actor,
        project_id: &str,
        pagination: Pagination,
    ) -> ServiceResult<Page<ProjectFile>> {
        self.accessible_project(actor, project_id).await?;
        Ok(self.projects.list_files(project_id, pagination).await?)
    }

    pub async fn upload_project_file(
        &self,
        actor: &Actor,
        project_id: &str,
        upload: &Upload,
        description: Option<String>,
        is_public: bool,
    ) -> ServiceResult<ProjectFile> {
        let project = self.accessible_project(actor, project_id).await?;
        let extension = self.policy.check(upload)?;
        let stored = self
            .store_in(&format!("projects/{}", project.id), "", upload, &extension)
            .await?;

        let created = self
            .projects
            .create_file(&CreateProjectFileRequest {
                project_id: project.id.clone(),
                uploaded_by: actor.user_id.clone(),
                file_name: stored.file_name.clone(),
                file_path: stored.file_path.clone(),
                file_size: i64::try_from(stored.file_size).unwrap_or(i64::MAX),
                file_type: Some(stored.file_type.clone()),
                mime_type: Some(stored.mime_type.clone()),
                description: description.filter(|text| !text.trim().is_empty()),
                is_public,
            })
            .await;

        match created {
            Ok(file) => {
                info!(project_id = %project.id, file_id = %file.id, "project file uploaded");
                Ok(file)
            }
            Err(err) => {
                self.discard(&stored.file_path).await;
                Err(err.into())
            }
        }
    }

    /// Admins and the uploader may delete a project file.
    pub async fn delete_project_file(
        &self,
        actor: &Actor,
        project_id: &str,
        file_id: &str,
    ) -> ServiceResult<()> {
        self.accessible_project(actor, project_id).await?;
        let file = self
            .projects
            .find_file(file_id)
            .await?
            .filter(|file| file.project_id == project_id)
            .ok_or_else(|| ServiceError::not_found("File"))?;

        if !actor.is_admin() && file.uploaded_by != actor.user_id {
            return Err(ServiceError::forbidden("Only the uploader can delete this file"));
        }

        self.projects.delete_file(&file.id).await?;
        self.discard(&file.file_path).await;
        info!(project_id, file_id, "project file deleted");
        Ok(())
    }

    pub async fn stats(&self, actor: &Actor) -> ServiceResult<StorageStats> {
        actor.require_admin()?;
        Ok(StorageStats {
            backend: self.storage.backend_name(),
            files: self.projects.file_stats().await?,
        })
    }
}
