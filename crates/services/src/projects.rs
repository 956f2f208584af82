use chrono::NaiveDate;
use portal_auth::{AuthError, Authenticator, NewAccount};
use portal_database::{
    today, CreateMilestoneRequest, CreateProjectRequest, CreateProjectTypeRequest,
    MessageRepository, MilestoneCompletion, MilestoneStatus, Page, Pagination, Project,
    ProjectFilter, ProjectMilestone, ProjectPriority, ProjectRepository, ProjectStatus,
    ProjectType, UpdateMilestoneRequest, UpdateProjectRequest, UpdateProjectTypeRequest, User,
    UserRepository, UserRole,
};
use serde::Serialize;
use serde_json::json;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use tracing::info;

use crate::activity::{ActivityEntry, ActivityService};
use crate::actor::Actor;
use crate::error::{ServiceError, ServiceResult};
use crate::mail::MailNotifier;
use crate::notifications::{Notice, NotificationKind, NotificationService};
use crate::workflow::project_transition_allowed;

/// Fields a client supplies when submitting a project
#[derive(Debug, Clone, Default)]
pub struct NewProject {
    pub project_type_id: Option<String>,
    pub name: String,
    pub description: String,
    pub features: Option<String>,
    pub timeline: Option<String>,
    pub budget_range: Option<String>,
}

/// Anonymous submission: contact details plus the project
#[derive(Debug, Clone, Default)]
pub struct PublicSubmission {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub project: NewProject,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmissionOutcome {
    pub project: Project,
    pub account_created: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectDetail {
    pub project: Project,
    pub client: Option<User>,
    pub project_type: Option<ProjectType>,
    pub assigned_admin: Option<User>,
    pub milestones: Vec<ProjectMilestone>,
    pub file_count: i64,
    pub message_count: i64,
}

/// Administrative project edit
#[derive(Debug, Clone, Default)]
pub struct ProjectChanges {
    pub status: Option<ProjectStatus>,
    pub priority: Option<ProjectPriority>,
    pub progress: Option<i64>,
    pub estimated_cost: Option<f64>,
    pub final_cost: Option<f64>,
    pub start_date: Option<String>,
    pub deadline: Option<String>,
    pub assigned_to: Option<String>,
    /// Skip the transition table. Recorded in the activity log.
    pub force: bool,
}

#[derive(Debug, Clone, Default)]
pub struct NewMilestone {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<String>,
    pub payment_percentage: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectStats {
    pub total_projects: i64,
    pub by_status: BTreeMap<&'static str, i64>,
    pub total_revenue: f64,
    pub estimated_revenue: f64,
}

pub(crate) fn validate_date(field: &str, value: &str) -> ServiceResult<()> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(|_| ())
        .map_err(|_| ServiceError::validation(format!("{field} must be a YYYY-MM-DD date")))
}

fn required(field: &str, value: &str) -> ServiceResult<()> {
    if value.trim().is_empty() {
        Err(ServiceError::validation(format!("{field} is required")))
    } else {
        Ok(())
    }
}

fn validate_percentage(value: f64) -> ServiceResult<()> {
    if value.is_finite() && (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(ServiceError::validation(
            "Payment percentage must be between 0 and 100",
        ))
    }
}

#[derive(Clone)]
pub struct ProjectService {
    projects: ProjectRepository,
    users: UserRepository,
    messages: MessageRepository,
    auth: Authenticator,
    notifications: NotificationService,
    activity: ActivityService,
    mail: MailNotifier,
}

impl ProjectService {
    pub fn new(
        pool: SqlitePool,
        auth: Authenticator,
        notifications: NotificationService,
        activity: ActivityService,
        mail: MailNotifier,
    ) -> Self {
        Self {
            projects: ProjectRepository::new(pool.clone()),
            users: UserRepository::new(pool.clone()),
            messages: MessageRepository::new(pool),
            auth,
            notifications,
            activity,
            mail,
        }
    }

    pub(crate) async fn require_project(&self, id: &str) -> ServiceResult<Project> {
        self.projects
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Project"))
    }

    /// Load a project the actor owns (or any project for admins).
    pub async fn accessible(&self, actor: &Actor, id: &str) -> ServiceResult<Project> {
        let project = self.require_project(id).await?;
        actor.require_access(&project.client_id)?;
        Ok(project)
    }

    // Project types

    pub async fn list_types(&self, include_inactive: bool) -> ServiceResult<Vec<ProjectType>> {
        Ok(self.projects.list_types(!include_inactive).await?)
    }

    pub async fn create_type(
        &self,
        actor: &Actor,
        request: CreateProjectTypeRequest,
    ) -> ServiceResult<ProjectType> {
        actor.require_admin()?;
        required("Name", &request.name)?;
        let project_type = self.projects.create_type(&request).await?;
        self.activity
            .record(
                Some(actor),
                ActivityEntry::new("project_type_created", "project_type", &project_type.id)
                    .new_values(json!({ "name": project_type.name })),
            )
            .await;
        Ok(project_type)
    }

    pub async fn update_type(
        &self,
        actor: &Actor,
        id: &str,
        request: UpdateProjectTypeRequest,
    ) -> ServiceResult<ProjectType> {
        actor.require_admin()?;
        if let Some(name) = &request.name {
            required("Name", name)?;
        }
        let project_type = self
            .projects
            .update_type(id, &request)
            .await?
            .ok_or_else(|| ServiceError::not_found("Project type"))?;
        self.activity
            .record(
                Some(actor),
                ActivityEntry::new("project_type_updated", "project_type", id),
            )
            .await;
        Ok(project_type)
    }

    // Submission

    async fn validate_submission(&self, project: &NewProject) -> ServiceResult<String> {
        let type_id = project
            .project_type_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ServiceError::validation("project_type_id is required"))?;
        required("Name", &project.name)?;
        required("Description", &project.description)?;
        if project.name.chars().count() > 200 {
            return Err(ServiceError::validation(
                "Name must be less than 200 characters long",
            ));
        }

        match self.projects.find_type(type_id).await? {
            Some(project_type) if project_type.is_active => Ok(project_type.id),
            _ => Err(ServiceError::validation("Invalid project type")),
        }
    }

    async fn create_submitted(&self, client: &User, project: NewProject, type_id: String) -> ServiceResult<Project> {
        let created = self
            .projects
            .create(&CreateProjectRequest {
                client_id: client.id.clone(),
                project_type_id: type_id,
                name: project.name.trim().to_string(),
                description: project.description.trim().to_string(),
                features: project.features,
                timeline: project.timeline,
                budget_range: project.budget_range,
            })
            .await?;

        info!(project_id = %created.id, client_id = %client.id, "project submitted");
        self.activity
            .record_from(
                Some(&client.id),
                &Default::default(),
                ActivityEntry::new("project_submitted", "project", &created.id)
                    .new_values(json!({ "name": created.name, "status": created.status })),
            )
            .await;
        self.notifications
            .notify_admins(
                &Notice::new(
                    NotificationKind::ProjectSubmitted,
                    "New project submitted",
                    format!("{} submitted \"{}\"", client.full_name(), created.name),
                )
                .about("project", created.id.clone())
                .link(format!("/admin/projects/{}", created.id)),
            )
            .await;
        self.mail.project_submitted(client, &created);

        Ok(created)
    }

    pub async fn submit(&self, actor: &Actor, project: NewProject) -> ServiceResult<Project> {
        let type_id = self.validate_submission(&project).await?;
        let client = self
            .users
            .find_by_id(&actor.user_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("User"))?;
        self.create_submitted(&client, project, type_id).await
    }

    /// Submission without a login. Unknown emails get a client account.
    pub async fn submit_public(&self, submission: PublicSubmission) -> ServiceResult<SubmissionOutcome> {
        let type_id = self.validate_submission(&submission.project).await?;
        required("Email", &submission.email)?;

        let email = submission.email.trim().to_lowercase();
        let (client, account_created) = match self.users.find_by_email(&email).await? {
            Some(user) if !user.is_active => return Err(AuthError::AccountDisabled.into()),
            Some(user) => (user, false),
            None => {
                let account = self
                    .auth
                    .create_account(NewAccount {
                        email,
                        password: None,
                        first_name: submission.first_name,
                        last_name: submission.last_name,
                        company: submission.company,
                        phone: submission.phone,
                        role: UserRole::Client,
                    })
                    .await?;
                self.mail
                    .welcome(&account.user, account.generated_password.as_deref());
                (account.user, true)
            }
        };

        let project = self
            .create_submitted(&client, submission.project, type_id)
            .await?;
        Ok(SubmissionOutcome {
            project,
            account_created,
        })
    }

    // Listing

    pub async fn list(
        &self,
        actor: &Actor,
        status: Option<ProjectStatus>,
        search: Option<String>,
        pagination: Pagination,
    ) -> ServiceResult<Page<Project>> {
        let filter = ProjectFilter {
            client_id: (!actor.is_admin()).then(|| actor.user_id.clone()),
            status,
            search: search.filter(|term| !term.trim().is_empty()),
        };
        Ok(self.projects.list(&filter, pagination).await?)
    }

    pub async fn detail(&self, actor: &Actor, id: &str) -> ServiceResult<ProjectDetail> {
        let project = self.accessible(actor, id).await?;

        let assigned_admin = match &project.assigned_to {
            Some(admin_id) => self.users.find_by_id(admin_id).await?,
            None => None,
        };

        Ok(ProjectDetail {
            client: self.users.find_by_id(&project.client_id).await?,
            project_type: self.projects.find_type(&project.project_type_id).await?,
            assigned_admin,
            milestones: self.projects.list_milestones(&project.id).await?,
            file_count: self.projects.count_files(&project.id).await?,
            message_count: self.messages.count_for_project(&project.id).await?,
            project,
        })
    }

    // Administration

    pub async fn update(
        &self,
        actor: &Actor,
        id: &str,
        changes: ProjectChanges,
    ) -> ServiceResult<Project> {
        actor.require_admin()?;
        let current = self.require_project(id).await?;

        for (field, value) in [("start_date", &changes.start_date), ("deadline", &changes.deadline)] {
            if let Some(date) = value {
                validate_date(field, date)?;
            }
        }
        for cost in [changes.estimated_cost, changes.final_cost].into_iter().flatten() {
            if !cost.is_finite() || cost < 0.0 {
                return Err(ServiceError::validation("Costs cannot be negative"));
            }
        }
        if let Some(admin_id) = &changes.assigned_to {
            let assignee = self.users.find_by_id(admin_id).await?;
            if !assignee.map(|user| user.is_admin() && user.is_active).unwrap_or(false) {
                return Err(ServiceError::validation(
                    "Projects can only be assigned to an active admin",
                ));
            }
        }

        let target = changes.status.filter(|status| *status != current.status);
        let mut overridden = false;
        if let Some(to) = target {
            if !project_transition_allowed(current.status, to) {
                if !changes.force {
                    return Err(ServiceError::transition("project", current.status, to));
                }
                overridden = true;
            }
        }

        let mut update = UpdateProjectRequest {
            status: target,
            priority: changes.priority,
            progress: changes.progress.map(|progress| progress.clamp(0, 100)),
            estimated_cost: changes.estimated_cost,
            final_cost: changes.final_cost,
            start_date: changes.start_date,
            deadline: changes.deadline,
            completion_date: None,
            assigned_to: changes.assigned_to,
        };
        if target == Some(ProjectStatus::Completed) {
            update.completion_date = Some(today());
            update.progress = Some(100);
        }
        if update.is_empty() {
            return Err(ServiceError::validation("No changes supplied"));
        }

        let expected = target.map(|_| current.status);
        let project = match self.projects.update(id, expected, &update).await? {
            Some(project) => project,
            None => {
                let latest = self.require_project(id).await?;
                return Err(ServiceError::transition(
                    "project",
                    latest.status,
                    target.map(|status| status.to_string()).unwrap_or_default(),
                ));
            }
        };

        let action = if overridden {
            "project_status_override"
        } else {
            "project_updated"
        };
        self.activity
            .record(
                Some(actor),
                ActivityEntry::new(action, "project", id)
                    .old(json!({ "status": current.status, "progress": current.progress }))
                    .new_values(serde_json::to_value(&update).unwrap_or_default()),
            )
            .await;

        if target.is_some() {
            info!(project_id = id, from = %current.status, to = %project.status, overridden, "project status changed");
            self.notifications
                .notify(
                    &project.client_id,
                    &Notice::new(
                        NotificationKind::ProjectStatus,
                        "Project status updated",
                        format!(
                            "Your project \"{}\" is now {}",
                            project.name,
                            project.status.display_name()
                        ),
                    )
                    .about("project", project.id.clone())
                    .link(format!("/projects/{}", project.id)),
                )
                .await;
            if let Some(client) = self.users.find_by_id(&project.client_id).await? {
                self.mail.project_status(&client, &project);
            }
        }

        Ok(project)
    }

    /// Administrative status change outside the workflow, used by the
    /// contract lifecycle. Returns `None` when the project moved meanwhile.
    pub(crate) async fn advance(
        &self,
        actor: &Actor,
        project_id: &str,
        from: Option<ProjectStatus>,
        to: ProjectStatus,
    ) -> ServiceResult<Option<Project>> {
        let mut update = UpdateProjectRequest {
            status: Some(to),
            ..UpdateProjectRequest::default()
        };
        if to == ProjectStatus::Completed {
            update.completion_date = Some(today());
            update.progress = Some(100);
        }

        let project = self.projects.update(project_id, from, &update).await?;
        if let Some(project) = &project {
            self.activity
                .record(
                    Some(actor),
                    ActivityEntry::new("project_status_override", "project", project_id)
                        .new_values(json!({ "status": to })),
                )
                .await;
            self.notifications
                .notify(
                    &project.client_id,
                    &Notice::new(
                        NotificationKind::ProjectStatus,
                        "Project status updated",
                        format!(
                            "Your project \"{}\" is now {}",
                            project.name,
                            to.display_name()
                        ),
                    )
                    .about("project", project.id.clone()),
                )
                .await;
        }
        Ok(project)
    }

    // Milestones

    pub async fn milestones(&self, actor: &Actor, project_id: &str) -> ServiceResult<Vec<ProjectMilestone>> {
        self.accessible(actor, project_id).await?;
        Ok(self.projects.list_milestones(project_id).await?)
    }

    pub async fn create_milestone(
        &self,
        actor: &Actor,
        project_id: &str,
        milestone: NewMilestone,
    ) -> ServiceResult<ProjectMilestone> {
        actor.require_admin()?;
        let project = self.require_project(project_id).await?;
        required("Title", &milestone.title)?;
        if let Some(due) = &milestone.due_date {
            validate_date("due_date", due)?;
        }

        let percentage = milestone.payment_percentage.unwrap_or(0.0);
        validate_percentage(percentage)?;
        let allocated = self.projects.allocated_percentage(&project.id, None).await?;
        if allocated + percentage > 100.0 {
            return Err(ServiceError::validation(format!(
                "Milestone payments would exceed 100% ({allocated}% already allocated)"
            )));
        }

        let created = self
            .projects
            .create_milestone(&CreateMilestoneRequest {
                project_id: project.id.clone(),
                title: milestone.title.trim().to_string(),
                description: milestone.description,
                due_date: milestone.due_date,
                payment_percentage: percentage,
            })
            .await?;

        self.activity
            .record(
                Some(actor),
                ActivityEntry::new("milestone_created", "milestone", &created.id)
                    .new_values(json!({ "project_id": project.id, "title": created.title })),
            )
            .await;
        Ok(created)
    }

    async fn project_milestone(&self, project_id: &str, milestone_id: &str) -> ServiceResult<ProjectMilestone> {
        self.projects
            .find_milestone(milestone_id)
            .await?
            .filter(|milestone| milestone.project_id == project_id)
            .ok_or_else(|| ServiceError::not_found("Milestone"))
    }

    pub async fn update_milestone(
        &self,
        actor: &Actor,
        project_id: &str,
        milestone_id: &str,
        changes: UpdateMilestoneRequest,
    ) -> ServiceResult<ProjectMilestone> {
        actor.require_admin()?;
        let milestone = self.project_milestone(project_id, milestone_id).await?;
        if milestone.status == MilestoneStatus::Completed {
            return Err(ServiceError::conflict("Completed milestones cannot be edited"));
        }
        if changes.status == Some(MilestoneStatus::Completed) {
            return Err(ServiceError::validation(
                "Use the complete action to finish a milestone",
            ));
        }
        if let Some(title) = &changes.title {
            required("Title", title)?;
        }
        if let Some(due) = &changes.due_date {
            validate_date("due_date", due)?;
        }
        if let Some(percentage) = changes.payment_percentage {
            validate_percentage(percentage)?;
            let allocated = self
                .projects
                .allocated_percentage(project_id, Some(milestone_id))
                .await?;
            if allocated + percentage > 100.0 {
                return Err(ServiceError::validation(
                    "Milestone payments would exceed 100%",
                ));
            }
        }

        let updated = self
            .projects
            .update_milestone(milestone_id, &changes)
            .await?
            .ok_or_else(|| ServiceError::not_found("Milestone"))?;
        self.activity
            .record(
                Some(actor),
                ActivityEntry::new("milestone_updated", "milestone", milestone_id),
            )
            .await;
        Ok(updated)
    }

    /// Idempotent: completing a completed milestone returns it unchanged.
    pub async fn complete_milestone(
        &self,
        actor: &Actor,
        project_id: &str,
        milestone_id: &str,
    ) -> ServiceResult<MilestoneCompletion> {
        actor.require_admin()?;
        let project = self.require_project(project_id).await?;
        self.project_milestone(project_id, milestone_id).await?;

        let completion = self
            .projects
            .complete_milestone(milestone_id, &today())
            .await?;

        if completion.newly_completed {
            info!(project_id, milestone_id, progress = completion.project_progress, "milestone completed");
            self.activity
                .record(
                    Some(actor),
                    ActivityEntry::new("milestone_completed", "milestone", milestone_id)
                        .new_values(json!({ "project_progress": completion.project_progress })),
                )
                .await;
            self.notifications
                .notify(
                    &project.client_id,
                    &Notice::new(
                        NotificationKind::MilestoneCompleted,
                        "Milestone completed",
                        format!(
                            "\"{}\" of {} is complete",
                            completion.milestone.title, project.name
                        ),
                    )
                    .about("milestone", milestone_id.to_string())
                    .link(format!("/projects/{}", project.id)),
                )
                .await;
            if let Some(client) = self.users.find_by_id(&project.client_id).await? {
                self.mail
                    .milestone_completed(&client, &project, &completion.milestone);
            }
        }

        Ok(completion)
    }

    pub async fn stats(&self, actor: &Actor) -> ServiceResult<ProjectStats> {
        actor.require_admin()?;
        let counts = self.projects.count_by_status().await?;

        let mut by_status: BTreeMap<&'static str, i64> =
            ProjectStatus::ALL.iter().map(|status| (status.as_str(), 0)).collect();
        for (status, count) in &counts {
            by_status.insert(status.as_str(), *count);
        }

        Ok(ProjectStats {
            total_projects: counts.iter().map(|(_, count)| count).sum(),
            by_status,
            total_revenue: self.projects.sum_value(&[ProjectStatus::Completed]).await?,
            estimated_revenue: self
                .projects
                .sum_value(&[ProjectStatus::Approved, ProjectStatus::InProgress])
                .await?,
        })
    }
}
