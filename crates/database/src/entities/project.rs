//! Project, project type, milestone and file rows

use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row};

use super::enum_column;

text_enum! {
    /// Workflow state of a project
    pub enum ProjectStatus ("project status") {
        Submitted => "submitted",
        Reviewing => "reviewing",
        Approved => "approved",
        InProgress => "in-progress",
        Review => "review",
        Completed => "completed",
        Cancelled => "cancelled",
        OnHold => "on-hold",
    }
}

impl ProjectStatus {
    pub fn display_name(&self) -> &'static str {
        match self {
            ProjectStatus::Submitted => "Submitted",
            ProjectStatus::Reviewing => "Under Review",
            ProjectStatus::Approved => "Approved",
            ProjectStatus::InProgress => "In Progress",
            ProjectStatus::Review => "In Review",
            ProjectStatus::Completed => "Completed",
            ProjectStatus::Cancelled => "Cancelled",
            ProjectStatus::OnHold => "On Hold",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProjectStatus::Completed | ProjectStatus::Cancelled)
    }
}

text_enum! {
    pub enum ProjectPriority ("project priority") {
        Low => "low",
        Medium => "medium",
        High => "high",
        Urgent => "urgent",
    }
}

impl Default for ProjectPriority {
    fn default() -> Self {
        ProjectPriority::Medium
    }
}

text_enum! {
    pub enum MilestoneStatus ("milestone status") {
        Pending => "pending",
        InProgress => "in-progress",
        Completed => "completed",
        Overdue => "overdue",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectType {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub is_active: bool,
    pub created_at: String,
}

impl ProjectType {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            icon: row.try_get("icon")?,
            color: row.try_get("color")?,
            is_active: row.try_get("is_active")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CreateProjectTypeRequest {
    pub name: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateProjectTypeRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub client_id: String,
    pub project_type_id: String,
    pub name: String,
    pub description: String,
    pub features: Option<String>,
    pub timeline: Option<String>,
    pub budget_range: Option<String>,
    pub estimated_cost: Option<f64>,
    pub final_cost: Option<f64>,
    pub status: ProjectStatus,
    pub priority: ProjectPriority,
    pub progress: i64,
    pub start_date: Option<String>,
    pub deadline: Option<String>,
    pub completion_date: Option<String>,
    pub assigned_to: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Project {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            client_id: row.try_get("client_id")?,
            project_type_id: row.try_get("project_type_id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            features: row.try_get("features")?,
            timeline: row.try_get("timeline")?,
            budget_range: row.try_get("budget_range")?,
            estimated_cost: row.try_get("estimated_cost")?,
            final_cost: row.try_get("final_cost")?,
            status: enum_column(row, "status")?,
            priority: enum_column(row, "priority")?,
            progress: row.try_get("progress")?,
            start_date: row.try_get("start_date")?,
            deadline: row.try_get("deadline")?,
            completion_date: row.try_get("completion_date")?,
            assigned_to: row.try_get("assigned_to")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CreateProjectRequest {
    pub client_id: String,
    pub project_type_id: String,
    pub name: String,
    pub description: String,
    pub features: Option<String>,
    pub timeline: Option<String>,
    pub budget_range: Option<String>,
}

/// Administrative project changes; `None` keeps the stored value
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateProjectRequest {
    pub status: Option<ProjectStatus>,
    pub priority: Option<ProjectPriority>,
    pub progress: Option<i64>,
    pub estimated_cost: Option<f64>,
    pub final_cost: Option<f64>,
    pub start_date: Option<String>,
    pub deadline: Option<String>,
    pub completion_date: Option<String>,
    pub assigned_to: Option<String>,
}

impl UpdateProjectRequest {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.priority.is_none()
            && self.progress.is_none()
            && self.estimated_cost.is_none()
            && self.final_cost.is_none()
            && self.start_date.is_none()
            && self.deadline.is_none()
            && self.completion_date.is_none()
            && self.assigned_to.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProjectFilter {
    pub client_id: Option<String>,
    pub status: Option<ProjectStatus>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectMilestone {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<String>,
    pub completion_date: Option<String>,
    pub status: MilestoneStatus,
    pub payment_percentage: f64,
    pub order_index: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl ProjectMilestone {
    /// Past its due date without being completed.
    pub fn is_overdue(&self, today: &str) -> bool {
        self.status != MilestoneStatus::Completed
            && self
                .due_date
                .as_deref()
                .map(|due| due < today)
                .unwrap_or(false)
    }

    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            project_id: row.try_get("project_id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            due_date: row.try_get("due_date")?,
            completion_date: row.try_get("completion_date")?,
            status: enum_column(row, "status")?,
            payment_percentage: row.try_get("payment_percentage")?,
            order_index: row.try_get("order_index")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CreateMilestoneRequest {
    pub project_id: String,
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<String>,
    pub payment_percentage: f64,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateMilestoneRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub due_date: Option<String>,
    pub status: Option<MilestoneStatus>,
    pub payment_percentage: Option<f64>,
}

/// Result of completing a milestone
#[derive(Debug, Clone, Serialize)]
pub struct MilestoneCompletion {
    pub milestone: ProjectMilestone,
    /// False when the milestone was already completed.
    pub newly_completed: bool,
    pub project_progress: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectFile {
    pub id: String,
    pub project_id: String,
    pub uploaded_by: String,
    pub file_name: String,
    pub file_path: String,
    pub file_size: i64,
    pub file_type: Option<String>,
    pub mime_type: Option<String>,
    pub description: Option<String>,
    pub is_public: bool,
    pub created_at: String,
}

impl ProjectFile {
    pub fn file_size_mb(&self) -> f64 {
        (self.file_size as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
    }

    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            project_id: row.try_get("project_id")?,
            uploaded_by: row.try_get("uploaded_by")?,
            file_name: row.try_get("file_name")?,
            file_path: row.try_get("file_path")?,
            file_size: row.try_get("file_size")?,
            file_type: row.try_get("file_type")?,
            mime_type: row.try_get("mime_type")?,
            description: row.try_get("description")?,
            is_public: row.try_get("is_public")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CreateProjectFileRequest {
    pub project_id: String,
    pub uploaded_by: String,
    pub file_name: String,
    pub file_path: String,
    pub file_size: i64,
    pub file_type: Option<String>,
    pub mime_type: Option<String>,
    pub description: Option<String>,
    pub is_public: bool,
}

/// Aggregate over all project files
#[derive(Debug, Clone, Default, Serialize)]
pub struct FileStats {
    pub total_files: i64,
    pub total_size: i64,
    pub by_type: Vec<(String, i64)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn milestone(status: MilestoneStatus, due: Option<&str>) -> ProjectMilestone {
        ProjectMilestone {
            id: "m1".into(),
            project_id: "p1".into(),
            title: "Design".into(),
            description: None,
            due_date: due.map(str::to_string),
            completion_date: None,
            status,
            payment_percentage: 0.0,
            order_index: 1,
            created_at: "2024-01-01T00:00:00Z".into(),
            updated_at: "2024-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn overdue_requires_past_due_date_and_open_status() {
        assert!(milestone(MilestoneStatus::Pending, Some("2024-01-01")).is_overdue("2024-02-01"));
        assert!(!milestone(MilestoneStatus::Completed, Some("2024-01-01")).is_overdue("2024-02-01"));
        assert!(!milestone(MilestoneStatus::Pending, Some("2024-03-01")).is_overdue("2024-02-01"));
        assert!(!milestone(MilestoneStatus::Pending, None).is_overdue("2024-02-01"));
    }

    #[test]
    fn display_names_match_portal_labels() {
        assert_eq!(ProjectStatus::Reviewing.display_name(), "Under Review");
        assert_eq!(ProjectStatus::OnHold.display_name(), "On Hold");
        assert!(ProjectStatus::Cancelled.is_terminal());
        assert!(!ProjectStatus::Review.is_terminal());
    }
}
