//! Project repository: project types, projects, milestones and files.

use crate::entities::{
    enum_column, new_id, now_timestamp, CreateMilestoneRequest, CreateProjectFileRequest,
    CreateProjectRequest, CreateProjectTypeRequest, FileStats, MilestoneCompletion, Project,
    ProjectFile, ProjectFilter, ProjectMilestone, ProjectStatus, ProjectType,
    UpdateMilestoneRequest, UpdateProjectRequest, UpdateProjectTypeRequest,
};
use crate::types::{DatabaseError, DatabaseResult, Page, Pagination};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

#[derive(Clone)]
pub struct ProjectRepository {
    pool: SqlitePool,
}

impl ProjectRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // Project types

    pub async fn list_types(&self, active_only: bool) -> DatabaseResult<Vec<ProjectType>> {
        let rows = sqlx::query(
            "SELECT * FROM project_types WHERE (? = 0 OR is_active = 1) ORDER BY name",
        )
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(ProjectType::from_row)
            .collect::<Result<_, _>>()
            .map_err(Into::into)
    }

    pub async fn find_type(&self, id: &str) -> DatabaseResult<Option<ProjectType>> {
        let row = sqlx::query("SELECT * FROM project_types WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref()
            .map(ProjectType::from_row)
            .transpose()
            .map_err(Into::into)
    }

    pub async fn create_type(&self, request: &CreateProjectTypeRequest) -> DatabaseResult<ProjectType> {
        let id = new_id();
        sqlx::query(
            "INSERT INTO project_types (id, name, description, icon, color, is_active, created_at) \
             VALUES (?, ?, ?, ?, ?, 1, ?)",
        )
        .bind(&id)
        .bind(&request.name)
        .bind(&request.description)
        .bind(&request.icon)
        .bind(&request.color)
        .bind(now_timestamp())
        .execute(&self.pool)
        .await?;

        self.find_type(&id)
            .await?
            .ok_or_else(|| DatabaseError::InternalError("created project type not found".into()))
    }

    pub async fn update_type(
        &self,
        id: &str,
        request: &UpdateProjectTypeRequest,
    ) -> DatabaseResult<Option<ProjectType>> {
        sqlx::query(
            "UPDATE project_types SET name = COALESCE(?, name), description = COALESCE(?, description), \
             icon = COALESCE(?, icon), color = COALESCE(?, color), is_active = COALESCE(?, is_active) \
             WHERE id = ?",
        )
        .bind(&request.name)
        .bind(&request.description)
        .bind(&request.icon)
        .bind(&request.color)
        .bind(request.is_active)
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.find_type(id).await
    }

    // Projects

    pub async fn create(&self, request: &CreateProjectRequest) -> DatabaseResult<Project> {
        let id = new_id();
        let now = now_timestamp();
        sqlx::query(
            "INSERT INTO projects (id, client_id, project_type_id, name, description, features, timeline, \
             budget_range, status, priority, progress, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'submitted', 'medium', 0, ?, ?)",
        )
        .bind(&id)
        .bind(&request.client_id)
        .bind(&request.project_type_id)
        .bind(&request.name)
        .bind(&request.description)
        .bind(&request.features)
        .bind(&request.timeline)
        .bind(&request.budget_range)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.find_by_id(&id)
            .await?
            .ok_or_else(|| DatabaseError::InternalError("created project not found".into()))
    }

    pub async fn find_by_id(&self, id: &str) -> DatabaseResult<Option<Project>> {
        let row = sqlx::query("SELECT * FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Project::from_row).transpose().map_err(Into::into)
    }

    pub async fn list(
        &self,
        filter: &ProjectFilter,
        pagination: Pagination,
    ) -> DatabaseResult<Page<Project>> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM projects WHERE 1 = 1");
        push_project_filters(&mut count, filter);
        let total = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM projects WHERE 1 = 1");
        push_project_filters(&mut query, filter);
        query
            .push(" ORDER BY created_at DESC, id LIMIT ")
            .push_bind(pagination.limit())
            .push(" OFFSET ")
            .push_bind(pagination.offset());

        let rows = query.build().fetch_all(&self.pool).await?;
        let items = rows
            .iter()
            .map(Project::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, total, pagination))
    }

    /// Apply administrative changes. With `expected_status` the update only
    /// happens while the project is still in that status; `None` is returned
    /// when no row matched.
    pub async fn update(
        &self,
        id: &str,
        expected_status: Option<ProjectStatus>,
        changes: &UpdateProjectRequest,
    ) -> DatabaseResult<Option<Project>> {
        let mut query = QueryBuilder::<Sqlite>::new("UPDATE projects SET updated_at = ");
        query.push_bind(now_timestamp());

        if let Some(status) = changes.status {
            query.push(", status = ").push_bind(status.as_str());
        }
        if let Some(priority) = changes.priority {
            query.push(", priority = ").push_bind(priority.as_str());
        }
        if let Some(progress) = changes.progress {
            query.push(", progress = ").push_bind(progress.clamp(0, 100));
        }
        if let Some(cost) = changes.estimated_cost {
            query.push(", estimated_cost = ").push_bind(cost);
        }
        if let Some(cost) = changes.final_cost {
            query.push(", final_cost = ").push_bind(cost);
        }
        if let Some(date) = &changes.start_date {
            query.push(", start_date = ").push_bind(date.clone());
        }
        if let Some(date) = &changes.deadline {
            query.push(", deadline = ").push_bind(date.clone());
        }
        if let Some(date) = &changes.completion_date {
            query.push(", completion_date = ").push_bind(date.clone());
        }
        if let Some(admin_id) = &changes.assigned_to {
            query.push(", assigned_to = ").push_bind(admin_id.clone());
        }

        query.push(" WHERE id = ").push_bind(id.to_string());
        if let Some(expected) = expected_status {
            query.push(" AND status = ").push_bind(expected.as_str());
        }

        let result = query.build().execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.find_by_id(id).await
    }

    pub async fn recent(&self, limit: i64) -> DatabaseResult<Vec<Project>> {
        let rows = sqlx::query("SELECT * FROM projects ORDER BY created_at DESC, id LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(Project::from_row)
            .collect::<Result<_, _>>()
            .map_err(Into::into)
    }

    pub async fn recent_for_client(&self, client_id: &str, limit: i64) -> DatabaseResult<Vec<Project>> {
        let rows = sqlx::query(
            "SELECT * FROM projects WHERE client_id = ? ORDER BY created_at DESC, id LIMIT ?",
        )
        .bind(client_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(Project::from_row)
            .collect::<Result<_, _>>()
            .map_err(Into::into)
    }

    pub async fn count_by_status(&self) -> DatabaseResult<Vec<(ProjectStatus, i64)>> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS total FROM projects GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<(ProjectStatus, i64), sqlx::Error> {
                Ok((enum_column(row, "status")?, row.try_get("total")?))
            })
            .collect::<Result<_, _>>()
            .map_err(Into::into)
    }

    pub async fn count_since(&self, since: &str) -> DatabaseResult<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM projects WHERE created_at >= ?")
            .bind(since)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Sum of final costs (falling back to estimates) over the given statuses.
    pub async fn sum_value(&self, statuses: &[ProjectStatus]) -> DatabaseResult<f64> {
        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT COALESCE(SUM(COALESCE(final_cost, estimated_cost, 0.0)), 0.0) FROM projects WHERE status IN (",
        );
        let mut separated = query.separated(", ");
        for status in statuses {
            separated.push_bind(status.as_str());
        }
        separated.push_unseparated(")");

        let total = query.build_query_scalar::<f64>().fetch_one(&self.pool).await?;
        Ok(total)
    }

    // Milestones

    pub async fn list_milestones(&self, project_id: &str) -> DatabaseResult<Vec<ProjectMilestone>> {
        let rows = sqlx::query(
            "SELECT * FROM project_milestones WHERE project_id = ? ORDER BY order_index",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(ProjectMilestone::from_row)
            .collect::<Result<_, _>>()
            .map_err(Into::into)
    }

    pub async fn find_milestone(&self, id: &str) -> DatabaseResult<Option<ProjectMilestone>> {
        let row = sqlx::query("SELECT * FROM project_milestones WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref()
            .map(ProjectMilestone::from_row)
            .transpose()
            .map_err(Into::into)
    }

    /// Total payment percentage allocated to a project's milestones,
    /// optionally ignoring one milestone.
    pub async fn allocated_percentage(
        &self,
        project_id: &str,
        excluding: Option<&str>,
    ) -> DatabaseResult<f64> {
        let total = sqlx::query_scalar(
            "SELECT COALESCE(SUM(payment_percentage), 0.0) FROM project_milestones \
             WHERE project_id = ? AND (? IS NULL OR id != ?)",
        )
        .bind(project_id)
        .bind(excluding)
        .bind(excluding)
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }

    /// Append a milestone after the project's current last one.
    pub async fn create_milestone(
        &self,
        request: &CreateMilestoneRequest,
    ) -> DatabaseResult<ProjectMilestone> {
        let id = new_id();
        let now = now_timestamp();
        let mut tx = self.pool.begin().await?;

        let next_index: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(order_index), 0) + 1 FROM project_milestones WHERE project_id = ?",
        )
        .bind(&request.project_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO project_milestones (id, project_id, title, description, due_date, status, \
             payment_percentage, order_index, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, 'pending', ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&request.project_id)
        .bind(&request.title)
        .bind(&request.description)
        .bind(&request.due_date)
        .bind(request.payment_percentage)
        .bind(next_index)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.find_milestone(&id)
            .await?
            .ok_or_else(|| DatabaseError::InternalError("created milestone not found".into()))
    }

    pub async fn update_milestone(
        &self,
        id: &str,
        request: &UpdateMilestoneRequest,
    ) -> DatabaseResult<Option<ProjectMilestone>> {
        sqlx::query(
            "UPDATE project_milestones SET title = COALESCE(?, title), description = COALESCE(?, description), \
             due_date = COALESCE(?, due_date), status = COALESCE(?, status), \
             payment_percentage = COALESCE(?, payment_percentage), updated_at = ? \
             WHERE id = ? AND status != 'completed'",
        )
        .bind(&request.title)
        .bind(&request.description)
        .bind(&request.due_date)
        .bind(request.status.map(|status| status.as_str()))
        .bind(request.payment_percentage)
        .bind(now_timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.find_milestone(id).await
    }

    /// Complete a milestone and recompute the project's progress in one
    /// transaction. Completing an already completed milestone changes nothing.
    pub async fn complete_milestone(
        &self,
        milestone_id: &str,
        completion_date: &str,
    ) -> DatabaseResult<MilestoneCompletion> {
        let now = now_timestamp();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE project_milestones SET status = 'completed', completion_date = ?, updated_at = ? \
             WHERE id = ? AND status != 'completed'",
        )
        .bind(completion_date)
        .bind(&now)
        .bind(milestone_id)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query("SELECT * FROM project_milestones WHERE id = ?")
            .bind(milestone_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("milestone {milestone_id}")))?;
        let milestone = ProjectMilestone::from_row(&row)?;

        let newly_completed = updated.rows_affected() > 0;
        if newly_completed {
            let (total, completed): (i64, i64) = sqlx::query_as(
                "SELECT COUNT(*), COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0) \
                 FROM project_milestones WHERE project_id = ?",
            )
            .bind(&milestone.project_id)
            .fetch_one(&mut *tx)
            .await?;

            let progress = if total == 0 { 0 } else { completed * 100 / total };
            sqlx::query(
                "UPDATE projects SET progress = ?, updated_at = ? WHERE id = ? AND status != 'completed'",
            )
            .bind(progress)
            .bind(&now)
            .bind(&milestone.project_id)
            .execute(&mut *tx)
            .await?;
        }

        let project_progress: i64 = sqlx::query_scalar("SELECT progress FROM projects WHERE id = ?")
            .bind(&milestone.project_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(MilestoneCompletion {
            milestone,
            newly_completed,
            project_progress,
        })
    }

    // Files

    pub async fn create_file(&self, request: &CreateProjectFileRequest) -> DatabaseResult<ProjectFile> {
        let id = new_id();
        sqlx::query(
            "INSERT INTO project_files (id, project_id, uploaded_by, file_name, file_path, file_size, \
             file_type, mime_type, description, is_public, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&request.project_id)
        .bind(&request.uploaded_by)
        .bind(&request.file_name)
        .bind(&request.file_path)
        .bind(request.file_size)
        .bind(&request.file_type)
        .bind(&request.mime_type)
        .bind(&request.description)
        .bind(request.is_public)
        .bind(now_timestamp())
        .execute(&self.pool)
        .await?;

        self.find_file(&id)
            .await?
            .ok_or_else(|| DatabaseError::InternalError("created file not found".into()))
    }

    pub async fn find_file(&self, id: &str) -> DatabaseResult<Option<ProjectFile>> {
        let row = sqlx::query("SELECT * FROM project_files WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref()
            .map(ProjectFile::from_row)
            .transpose()
            .map_err(Into::into)
    }

    pub async fn find_file_by_path(&self, path: &str) -> DatabaseResult<Option<ProjectFile>> {
        let row = sqlx::query("SELECT * FROM project_files WHERE file_path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref()
            .map(ProjectFile::from_row)
            .transpose()
            .map_err(Into::into)
    }

    pub async fn list_files(
        &self,
        project_id: &str,
        pagination: Pagination,
    ) -> DatabaseResult<Page<ProjectFile>> {
        let total = self.count_files(project_id).await?;
        let rows = sqlx::query(
            "SELECT * FROM project_files WHERE project_id = ? ORDER BY created_at DESC, id LIMIT ? OFFSET ?",
        )
        .bind(project_id)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .iter()
            .map(ProjectFile::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, total, pagination))
    }

    pub async fn count_files(&self, project_id: &str) -> DatabaseResult<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM project_files WHERE project_id = ?")
            .bind(project_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn delete_file(&self, id: &str) -> DatabaseResult<bool> {
        let result = sqlx::query("DELETE FROM project_files WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn file_stats(&self) -> DatabaseResult<FileStats> {
        let (total_files, total_size): (i64, i64) =
            sqlx::query_as("SELECT COUNT(*), COALESCE(SUM(file_size), 0) FROM project_files")
                .fetch_one(&self.pool)
                .await?;

        let by_type = sqlx::query_as::<_, (String, i64)>(
            "SELECT COALESCE(file_type, 'unknown'), COUNT(*) FROM project_files \
             GROUP BY COALESCE(file_type, 'unknown') ORDER BY 2 DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(FileStats {
            total_files,
            total_size,
            by_type,
        })
    }
}

fn push_project_filters(query: &mut QueryBuilder<'_, Sqlite>, filter: &ProjectFilter) {
    if let Some(client_id) = &filter.client_id {
        query.push(" AND client_id = ").push_bind(client_id.clone());
    }
    if let Some(status) = filter.status {
        query.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{search}%");
        query
            .push(" AND (name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR description LIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{MilestoneStatus, ProjectPriority};
    use crate::repos::UserRepository;
    use crate::test_support::{create_client, create_project, test_pool};

    fn milestone(project_id: &str, title: &str) -> CreateMilestoneRequest {
        CreateMilestoneRequest {
            project_id: project_id.to_string(),
            title: title.to_string(),
            description: None,
            due_date: None,
            payment_percentage: 25.0,
        }
    }

    #[tokio::test]
    async fn guarded_update_only_applies_from_expected_status() {
        let (pool, _dir) = test_pool().await;
        let client = create_client(&UserRepository::new(pool.clone()), "hana@example.com").await;
        let repo = ProjectRepository::new(pool);
        let project = create_project(&repo, &client.id).await;
        assert_eq!(project.status, ProjectStatus::Submitted);

        let changes = UpdateProjectRequest {
            status: Some(ProjectStatus::Reviewing),
            priority: Some(ProjectPriority::High),
            ..Default::default()
        };
        let stale = repo
            .update(&project.id, Some(ProjectStatus::Approved), &changes)
            .await
            .unwrap();
        assert!(stale.is_none());
        let unchanged = repo.find_by_id(&project.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, ProjectStatus::Submitted);
        assert_eq!(unchanged.priority, ProjectPriority::Medium);

        let updated = repo
            .update(&project.id, Some(ProjectStatus::Submitted), &changes)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, ProjectStatus::Reviewing);
        assert_eq!(updated.priority, ProjectPriority::High);
    }

    #[tokio::test]
    async fn milestone_completion_is_idempotent_and_updates_progress() {
        let (pool, _dir) = test_pool().await;
        let client = create_client(&UserRepository::new(pool.clone()), "ian@example.com").await;
        let repo = ProjectRepository::new(pool);
        let project = create_project(&repo, &client.id).await;

        let first = repo.create_milestone(&milestone(&project.id, "Design")).await.unwrap();
        let second = repo.create_milestone(&milestone(&project.id, "Build")).await.unwrap();
        let third = repo.create_milestone(&milestone(&project.id, "Launch")).await.unwrap();
        assert_eq!(
            (first.order_index, second.order_index, third.order_index),
            (1, 2, 3)
        );

        let completion = repo.complete_milestone(&first.id, "2024-05-01").await.unwrap();
        assert!(completion.newly_completed);
        assert_eq!(completion.milestone.status, MilestoneStatus::Completed);
        assert_eq!(completion.project_progress, 33);

        let repeat = repo.complete_milestone(&first.id, "2024-06-01").await.unwrap();
        assert!(!repeat.newly_completed);
        assert_eq!(repeat.milestone.completion_date.as_deref(), Some("2024-05-01"));
        assert_eq!(repeat.project_progress, 33);

        assert_eq!(repo.allocated_percentage(&project.id, None).await.unwrap(), 75.0);
        assert_eq!(
            repo.allocated_percentage(&project.id, Some(&third.id)).await.unwrap(),
            50.0
        );
    }

    #[tokio::test]
    async fn listing_filters_by_client_status_and_search() {
        let (pool, _dir) = test_pool().await;
        let users = UserRepository::new(pool.clone());
        let alice = create_client(&users, "alice@example.com").await;
        let bob = create_client(&users, "bob@example.com").await;
        let repo = ProjectRepository::new(pool);
        create_project(&repo, &alice.id).await;
        create_project(&repo, &bob.id).await;

        let mine = repo
            .list(
                &ProjectFilter {
                    client_id: Some(alice.id.clone()),
                    ..Default::default()
                },
                Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(mine.total, 1);
        assert_eq!(mine.items[0].client_id, alice.id);

        let searched = repo
            .list(
                &ProjectFilter {
                    search: Some("storefront".into()),
                    status: Some(ProjectStatus::Submitted),
                    ..Default::default()
                },
                Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(searched.total, 2);

        let counts = repo.count_by_status().await.unwrap();
        assert_eq!(counts, vec![(ProjectStatus::Submitted, 2)]);
    }
}
