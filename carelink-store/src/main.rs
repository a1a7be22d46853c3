//! carelink: operator CLI over a local CareLink data file
//!
//! Each invocation restores the persisted session, runs one command and
//! exits. Commands acting for an account need a prior `login` or
//! `register`.

use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use carelink_core::{GroupId, PrescriptionId, Role, TimeOfDay};
use carelink_store::{
    ActiveTarget, CareApp, CareError, Config, HttpAnalyzer, PrescriptionRepository, Session,
    SqliteStore,
};

type App = CareApp<SqliteStore, Arc<SqliteStore>>;

#[derive(Parser)]
#[command(name = "carelink")]
#[command(about = "Manage care targets, links and prescriptions in a local data file")]
struct Cli {
    /// SQLite data file
    #[arg(long, env = "CARELINK_DATA")]
    data: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an account and sign in
    Register {
        email: String,
        #[arg(long, env = "CARELINK_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long, default_value = "family", value_parser = parse_role)]
        role: Role,
    },
    /// Sign in
    Login {
        email: String,
        #[arg(long, env = "CARELINK_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Sign out
    Logout,
    /// Show the signed-in account and its active care target
    Whoami,
    /// Create a care target and make it active
    CreateGroup {
        name: String,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Join a care target with its invite code
    Join { code: String },
    /// List linked care targets
    Groups,
    /// Choose the active care target
    Select {
        group_id: Option<String>,
        /// Clear the selection instead
        #[arg(long, conflicts_with = "group_id")]
        clear: bool,
    },
    /// List prescriptions of the active care target
    Prescriptions {
        /// Only items taken at this time of day
        #[arg(long, value_parser = parse_time)]
        time: Option<TimeOfDay>,
    },
    /// Print one prescription as JSON
    Show { id: String },
    /// Delete a prescription
    DeletePrescription { id: String },
    /// Analyze a prescription image and store the result
    Analyze { image_ref: String },
    /// Remove every account, care target and prescription
    Reset {
        #[arg(long)]
        yes: bool,
    },
    /// List quarantined data, or print one entry
    Quarantine { key: Option<String> },
}

fn parse_role(s: &str) -> Result<Role, String> {
    s.parse().map_err(|e: carelink_core::Error| e.to_string())
}

fn parse_time(s: &str) -> Result<TimeOfDay, String> {
    TimeOfDay::parse(s).ok_or_else(|| format!("unknown time of day: {}", s))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "carelink_store=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        match e.downcast_ref::<CareError>() {
            Some(care) => {
                tracing::debug!(error = %care, "Command failed");
                eprintln!("{}", care.user_message());
            }
            None => eprintln!("error: {:#}", e),
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::from_env();
    if let Some(data) = cli.data {
        config.data_path = data;
    }

    let store = Arc::new(SqliteStore::open(&config.data_path)?);
    let analyzer = config
        .analysis_endpoint
        .is_some()
        .then(|| HttpAnalyzer::from_config(&config))
        .transpose()?;

    let mut app: App = CareApp::with_repository(store.clone(), store, config);
    if let Some(analyzer) = analyzer {
        app = app.with_analyzer(Arc::new(analyzer));
    }
    let session = app.start().await?;

    match cli.command {
        Command::Register {
            email,
            password,
            role,
        } => {
            let session = app.identity().register(&email, &password, role).await?;
            println!("Registered {} ({})", session.account.email, session.account.role);
        }
        Command::Login { email, password } => {
            let session = app.identity().login(&email, &password).await?;
            println!("Signed in as {}", session.account.email);
        }
        Command::Logout => match session {
            Some(session) => {
                app.identity().logout(&session).await?;
                println!("Signed out");
            }
            None => println!("Not signed in"),
        },
        Command::Whoami => {
            let session = require(session)?;
            let account = app.identity().current_account(&session).await?;
            println!("{} ({}) {}", account.email, account.role, account.id);
            match app.resolver().active_group(&session).await? {
                Some(group) => println!("Active care target: {} [{}]", group.name, group.id),
                None => println!("No active care target"),
            }
        }
        Command::CreateGroup { name, notes } => {
            let session = require(session)?;
            let group = app
                .linking()
                .create_group(&session, &name, notes.as_deref())
                .await?;
            let code = group
                .invite_code
                .as_ref()
                .map(|c| c.as_str())
                .unwrap_or("-");
            println!("Created {} [{}], invite code {}", group.name, group.id, code);
        }
        Command::Join { code } => {
            let session = require(session)?;
            let outcome = app.linking().link_by_invite_code(&session, &code).await?;
            if outcome.already_linked {
                println!("Already linked to {}", outcome.group.name);
            } else {
                println!("Joined {} [{}]", outcome.group.name, outcome.group.id);
            }
        }
        Command::Groups => {
            let session = require(session)?;
            let active = app.resolver().resolve(&session).await?;
            for group in app.linking().linked_groups(&session).await? {
                let marker = if active.group_id() == Some(&group.id) {
                    "*"
                } else {
                    " "
                };
                let code = group
                    .invite_code
                    .as_ref()
                    .map(|c| c.as_str())
                    .unwrap_or("-");
                println!("{} {} {} {}", marker, group.id, code, group.name);
            }
        }
        Command::Select { group_id, clear } => {
            let session = require(session)?;
            if clear {
                app.resolver().clear_active(&session).await?;
                println!("Selection cleared");
            } else {
                let Some(group_id) = group_id else {
                    bail!("pass a care target id or --clear");
                };
                app.resolver()
                    .set_active(&session, &GroupId::from(group_id))
                    .await?;
                println!("Selection updated");
            }
        }
        Command::Prescriptions { time } => {
            let session = require(session)?;
            let care_target_id = active_target(&app, &session).await?;
            match time {
                Some(time) => {
                    for scheduled in app
                        .prescriptions()
                        .items_taken_at(&care_target_id, time)
                        .await?
                    {
                        println!(
                            "{} {} {}",
                            scheduled.prescription_id,
                            scheduled.item.drug_name_local,
                            scheduled.item.dose
                        );
                    }
                }
                None => {
                    for rx in app
                        .prescriptions()
                        .list_by_care_target(&care_target_id)
                        .await?
                    {
                        println!(
                            "{} {} {} items, {}",
                            rx.id,
                            rx.created_at.format("%Y-%m-%d %H:%M"),
                            rx.items.len(),
                            rx.status.as_str()
                        );
                    }
                }
            }
        }
        Command::Show { id } => {
            require(session)?;
            match app
                .prescriptions()
                .get_by_id(&PrescriptionId::from(id.as_str()))
                .await?
            {
                Some(rx) => println!("{}", serde_json::to_string_pretty(&rx)?),
                None => bail!("no prescription {}", id),
            }
        }
        Command::DeletePrescription { id } => {
            require(session)?;
            app.prescriptions()
                .delete(&PrescriptionId::from(id.as_str()))
                .await?;
            println!("Deleted {}", id);
        }
        Command::Analyze { image_ref } => {
            let session = require(session)?;
            let id = app.submit_analysis(&session, &image_ref).await?;
            println!("Stored prescription {}", id);
        }
        Command::Reset { yes } => {
            if !yes {
                bail!("refusing to reset without --yes");
            }
            let removed = app.reset_all_data().await?;
            println!("Removed {} keys", removed);
        }
        Command::Quarantine { key } => match key {
            Some(key) => match app.quarantine_entry(&key).await? {
                Some(payload) => println!("{}", payload),
                None => bail!("no quarantine entry {}", key),
            },
            None => {
                for key in app.quarantined().await? {
                    println!("{}", key);
                }
            }
        },
    }

    Ok(())
}

fn require(session: Option<Session>) -> Result<Session> {
    match session {
        Some(session) => Ok(session),
        None => Err(CareError::Auth("not signed in".to_string()).into()),
    }
}

async fn active_target(app: &App, session: &Session) -> Result<GroupId> {
    match app.resolver().resolve(session).await? {
        ActiveTarget::Set(id) => Ok(id),
        ActiveTarget::Unset => bail!("no care target linked yet; create or join one first"),
    }
}
