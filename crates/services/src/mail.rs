//! Outgoing email rendering. Messages are logged rather than delivered.

use portal_config::MailConfig;
use portal_database::{Project, ProjectMilestone, User};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingMail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct MailNotifier {
    sender: String,
    frontend_url: String,
}

impl MailNotifier {
    pub fn new(config: &MailConfig, frontend_url: &str) -> Self {
        Self {
            sender: config.default_sender.clone(),
            frontend_url: frontend_url.trim_end_matches('/').to_string(),
        }
    }

    fn dispatch(&self, to: &str, subject: String, body: String) -> OutgoingMail {
        let mail = OutgoingMail {
            from: self.sender.clone(),
            to: to.to_string(),
            subject,
            body,
        };
        info!(to = %mail.to, subject = %mail.subject, "outgoing email");
        mail
    }

    pub fn welcome(&self, user: &User, generated_password: Option<&str>) -> OutgoingMail {
        let mut body = format!(
            "Dear {},\n\nYour client portal account has been created for {}.\n",
            user.first_name, user.email
        );
        if let Some(password) = generated_password {
            body.push_str(&format!(
                "\nA temporary password was generated for you: {password}\n\
                 Please change it after your first login.\n"
            ));
        }
        body.push_str(&format!("\nSign in at {}/login\n", self.frontend_url));
        self.dispatch(&user.email, "Welcome to the client portal".to_string(), body)
    }

    pub fn email_verification(&self, user: &User, token: &str) -> OutgoingMail {
        let body = format!(
            "Dear {},\n\nConfirm your email address here: {}/verify-email?token={}\n",
            user.first_name, self.frontend_url, token
        );
        self.dispatch(&user.email, "Confirm your email address".to_string(), body)
    }

    pub fn password_reset(&self, user: &User, token: &str) -> OutgoingMail {
        let body = format!(
            "Dear {},\n\nReset your password here: {}/reset-password?token={}\n\n\
             This link expires in one hour. If you did not ask for a reset, ignore this email.\n",
            user.first_name, self.frontend_url, token
        );
        self.dispatch(&user.email, "Password reset request".to_string(), body)
    }

    pub fn project_submitted(&self, user: &User, project: &Project) -> OutgoingMail {
        let body = format!(
            "Dear {},\n\nWe received your project \"{}\" and will review it shortly.\n\
             Track it at {}/projects/{}\n",
            user.first_name, project.name, self.frontend_url, project.id
        );
        self.dispatch(&user.email, "Project submission received".to_string(), body)
    }

    pub fn project_status(&self, user: &User, project: &Project) -> OutgoingMail {
        let body = format!(
            "Dear {},\n\nYour project \"{}\" is now {} ({}% complete).\n",
            user.first_name,
            project.name,
            project.status.display_name(),
            project.progress
        );
        self.dispatch(&user.email, format!("Project update: {}", project.name), body)
    }

    pub fn milestone_completed(
        &self,
        user: &User,
        project: &Project,
        milestone: &ProjectMilestone,
    ) -> OutgoingMail {
        let body = format!(
            "Dear {},\n\nMilestone \"{}\" of \"{}\" is complete.\n",
            user.first_name, milestone.title, project.name
        );
        self.dispatch(&user.email, format!("Milestone completed - {}", project.name), body)
    }
}
