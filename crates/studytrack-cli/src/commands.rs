//! Command-line parsing.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use studytrack_core::Resource;

pub const USAGE: &str = "\
Usage: studytrack <command> [args]

Session:
  login [username]                 Log in (password is prompted)
  register <username> <email>      Create an account and log in
  logout                           Forget the stored session
  status                           Show the current session

Data:
  list <resource> [--subject ID]   List subjects, sessions, progress or tips
  show <resource> <id>             Show one record
  create <resource> <json>         Create a record from a JSON object
  update <resource> <id> <json>    Replace a record
  delete <resource> <id>           Delete a record
  suggest <subject-id>             Generate a study tip for a subject
  profile [json]                   Show or update your profile
  dashboard                        Everything at a glance

Resources: subjects, sessions, progress, tips, profile

Environment:
  STUDYTRACK_BASE_URL              Backend base URL (default http://127.0.0.1:8000/)
  STUDYTRACK_LOG_DIR               Also write logs to a daily file in this directory
  RUST_LOG                         Log filter (default warn)";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Login { username: Option<String> },
    Register { username: String, email: String },
    Logout,
    Status,
    List { resource: Resource, subject: Option<i64> },
    Show { resource: Resource, id: i64 },
    Create { resource: Resource, body: Value },
    Update { resource: Resource, id: i64, body: Value },
    Delete { resource: Resource, id: i64 },
    Suggest { subject: i64 },
    Profile { changes: Option<Value> },
    Dashboard,
    Help,
}

impl Command {
    /// Parse arguments (without the program name)
    pub fn parse(args: &[String]) -> Result<Self> {
        let Some((name, rest)) = args.split_first() else {
            return Ok(Command::Help);
        };

        let command = match name.as_str() {
            "login" => {
                expect_at_most(rest, 1, "login [username]")?;
                Command::Login {
                    username: rest.first().cloned(),
                }
            }
            "register" => {
                expect_exactly(rest, 2, "register <username> <email>")?;
                Command::Register {
                    username: rest[0].clone(),
                    email: rest[1].clone(),
                }
            }
            "logout" => Command::Logout,
            "status" | "whoami" => Command::Status,
            "list" | "ls" => parse_list(rest)?,
            "show" => {
                expect_exactly(rest, 2, "show <resource> <id>")?;
                Command::Show {
                    resource: rest[0].parse()?,
                    id: parse_id(&rest[1])?,
                }
            }
            "create" | "add" => {
                expect_exactly(rest, 2, "create <resource> <json>")?;
                Command::Create {
                    resource: rest[0].parse()?,
                    body: parse_json(&rest[1])?,
                }
            }
            "update" => {
                expect_exactly(rest, 3, "update <resource> <id> <json>")?;
                Command::Update {
                    resource: rest[0].parse()?,
                    id: parse_id(&rest[1])?,
                    body: parse_json(&rest[2])?,
                }
            }
            "delete" | "rm" => {
                expect_exactly(rest, 2, "delete <resource> <id>")?;
                Command::Delete {
                    resource: rest[0].parse()?,
                    id: parse_id(&rest[1])?,
                }
            }
            "suggest" => {
                expect_exactly(rest, 1, "suggest <subject-id>")?;
                Command::Suggest {
                    subject: parse_id(&rest[0])?,
                }
            }
            "profile" => {
                expect_at_most(rest, 1, "profile [json]")?;
                Command::Profile {
                    changes: rest.first().map(|s| parse_json(s)).transpose()?,
                }
            }
            "dashboard" => Command::Dashboard,
            "help" | "-h" | "--help" => Command::Help,
            other => bail!("Unknown command '{}'. Run `studytrack help` for usage.", other),
        };
        Ok(command)
    }
}

fn parse_list(rest: &[String]) -> Result<Command> {
    let Some((resource, flags)) = rest.split_first() else {
        bail!("Usage: studytrack list <resource> [--subject ID]");
    };
    let resource: Resource = resource.parse()?;

    let subject = match flags {
        [] => None,
        [flag, id] if flag == "--subject" => Some(parse_id(id)?),
        _ => bail!("Usage: studytrack list <resource> [--subject ID]"),
    };
    if subject.is_some() && !resource.filters_by_subject() {
        bail!("{} cannot be filtered by subject", resource);
    }

    Ok(Command::List { resource, subject })
}

fn parse_id(value: &str) -> Result<i64> {
    value
        .parse()
        .with_context(|| format!("Invalid id '{}'", value))
}

fn parse_json(value: &str) -> Result<Value> {
    let parsed: Value = serde_json::from_str(value)
        .with_context(|| format!("Invalid JSON: {}", value))?;
    if !parsed.is_object() {
        bail!("Expected a JSON object, got: {}", value);
    }
    Ok(parsed)
}

fn expect_exactly(rest: &[String], count: usize, usage: &str) -> Result<()> {
    if rest.len() != count {
        bail!("Usage: studytrack {}", usage);
    }
    Ok(())
}

fn expect_at_most(rest: &[String], count: usize, usage: &str) -> Result<()> {
    if rest.len() > count {
        bail!("Usage: studytrack {}", usage);
    }
    Ok(())
}
