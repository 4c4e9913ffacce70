//! Command execution against the session manager and API client.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing::{debug, warn};

use studytrack_core::auth::{validate_login, validate_registration};
use studytrack_core::{ApiClient, Config, Resource, SessionManager, SessionObserver, UserSummary};

use crate::commands::{Command, USAGE};

/// Prints the session manager's navigation events.
pub struct CliObserver;

impl SessionObserver for CliObserver {
    fn logged_in(&self, user: &UserSummary) {
        eprintln!("Logged in as {}", user.username);
    }

    fn login_required(&self) {
        eprintln!("Your session has expired. Run `studytrack login` to sign in again.");
    }
}

pub struct App {
    config: Config,
    session: Arc<SessionManager>,
    api: ApiClient,
}

impl App {
    pub fn new(config: Config, session: Arc<SessionManager>) -> Self {
        let api = ApiClient::new(session.clone());
        Self {
            config,
            session,
            api,
        }
    }

    pub async fn run(&mut self, command: Command) -> Result<()> {
        debug!(?command, "Running command");
        match command {
            Command::Help => {
                println!("{}", USAGE);
                Ok(())
            }
            Command::Login { username } => self.login(username).await,
            Command::Register { username, email } => self.register(&username, &email).await,
            Command::Logout => {
                self.session.logout();
                println!("Logged out");
                Ok(())
            }
            Command::Status => {
                self.status();
                Ok(())
            }
            Command::List { resource, subject } => {
                self.require_login()?;
                let items: Vec<Value> = self.api.list(resource, subject).await?;
                print_json(&Value::Array(items))
            }
            Command::Show { resource, id } => {
                self.require_login()?;
                let item: Value = self.api.retrieve(resource, id).await?;
                print_json(&item)
            }
            Command::Create { resource, body } => {
                self.require_login()?;
                let created: Value = self.api.create(resource, &body).await?;
                print_json(&created)
            }
            Command::Update { resource, id, body } => {
                self.require_login()?;
                let updated: Value = self.api.update(resource, id, &body).await?;
                print_json(&updated)
            }
            Command::Delete { resource, id } => {
                self.require_login()?;
                self.api.delete(resource, id).await?;
                println!("Deleted {} {}", resource, id);
                Ok(())
            }
            Command::Suggest { subject } => {
                self.require_login()?;
                let tip = self.api.study_suggestion(subject).await?;
                println!("{}", tip);
                Ok(())
            }
            Command::Profile { changes } => self.profile(changes).await,
            Command::Dashboard => self.dashboard().await,
        }
    }

    fn require_login(&self) -> Result<()> {
        if !self.session.is_authenticated() {
            bail!("Not logged in. Run `studytrack login` first.");
        }
        Ok(())
    }

    // ===== Session commands =====

    async fn login(&mut self, username: Option<String>) -> Result<()> {
        let username = match username.or_else(|| self.config.last_username.clone()) {
            Some(name) => name,
            None => prompt("Username: ")?,
        };
        let password = rpassword::prompt_password(format!("Password for {}: ", username))
            .context("Failed to read password")?;
        validate_login(&username, &password)?;

        self.session.login(&username, &password).await?;
        self.remember_username(&username);
        Ok(())
    }

    async fn register(&mut self, username: &str, email: &str) -> Result<()> {
        let password = rpassword::prompt_password("Choose a password: ")
            .context("Failed to read password")?;
        validate_registration(username, &password, email)?;

        self.session.register(username, &password, email).await?;
        self.remember_username(username);
        Ok(())
    }

    fn remember_username(&mut self, username: &str) {
        self.config.last_username = Some(username.to_string());
        if let Err(e) = self.config.save() {
            warn!(error = %e, "Failed to save config");
        }
    }

    fn status(&self) {
        let Some(credentials) = self.session.credentials() else {
            println!("Not logged in ({})", self.config.base_url);
            return;
        };

        let user = &credentials.user;
        println!("Logged in as {} ({})", user.username, self.config.base_url);
        if !user.email.is_empty() {
            println!("  email:      {}", user.email);
        }
        if user.is_superuser {
            println!("  superuser:  yes");
        }
        println!("  state:      {:?}", self.session.state());
        match credentials.minutes_until_access_expiry() {
            Some(0) => println!("  access:     expired (renewed on next request)"),
            Some(minutes) => println!("  access:     expires in {}m", minutes),
            None => {}
        }
        if let Some(expiry) = credentials.refresh_expires_at() {
            println!("  refresh:    valid until {}", expiry.format("%Y-%m-%d %H:%M UTC"));
        }
    }

    // ===== Data commands =====

    async fn profile(&self, changes: Option<Value>) -> Result<()> {
        self.require_login()?;
        let user_id = self
            .session
            .user()
            .map(|u| u.id)
            .ok_or_else(|| anyhow::anyhow!("Not logged in"))?;

        let profile: Value = match changes {
            Some(body) => {
                self.api
                    .partial_update(Resource::UserProfile, user_id, &body)
                    .await?
            }
            None => self.api.retrieve(Resource::UserProfile, user_id).await?,
        };
        print_json(&profile)
    }

    async fn dashboard(&self) -> Result<()> {
        self.require_login()?;

        let (subjects, sessions, progress, tips) = futures::try_join!(
            self.api.list::<Value>(Resource::Subject, None),
            self.api.list::<Value>(Resource::StudySession, None),
            self.api.list::<Value>(Resource::StudyProgress, None),
            self.api.list::<Value>(Resource::StudyTip, None),
        )?;

        println!("Subjects ({})", subjects.len());
        for subject in &subjects {
            let name = field(subject, "subject_name");
            let minutes: u64 = progress
                .iter()
                .filter(|p| p["subject"] == subject["id"])
                .filter_map(|p| p["total_minutes_studied"].as_u64())
                .sum();
            let count = sessions.iter().filter(|s| s["subject"] == subject["id"]).count();
            println!("  {:<4} {:<30} {:>4} sessions {:>6} min", field(subject, "id"), name, count, minutes);
        }

        if !tips.is_empty() {
            println!("\nStudy tips ({})", tips.len());
            for tip in &tips {
                println!("  [{}] {}", field(tip, "subject_name"), field(tip, "suggestion"));
            }
        }
        Ok(())
    }
}

/// Render a JSON field for display, without quotes around strings
fn field(value: &Value, key: &str) -> String {
    match &value[key] {
        Value::Null => "-".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read input")?;
    Ok(line.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_display() {
        let subject = json!({"id": 3, "subject_name": "Algebra", "notes": null});
        assert_eq!(field(&subject, "id"), "3");
        assert_eq!(field(&subject, "subject_name"), "Algebra");
        assert_eq!(field(&subject, "notes"), "-");
        assert_eq!(field(&subject, "missing"), "-");
    }
}
