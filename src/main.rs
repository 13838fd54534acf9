use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use uuid::Uuid;

mod config;
mod dashboard;
mod error;
mod github;
mod models;
mod repo_url;
mod report;
mod roster;
mod spreadsheet;
mod store;
mod sync;

use config::Config;
use dashboard::{DashboardParams, DashboardQuery};
use github::{CommitFetcher, GithubClient};
use models::StudentPatch;
use roster::RosterService;
use store::postgres::PgStore;
use store::Store;
use sync::SyncEngine;

#[derive(Parser)]
#[command(name = "commit-tracker")]
#[command(about = "Tracks GitHub commit activity for class rosters", long_about = None)]
struct Cli {
    /// Optional TOML config file; environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Required for mutating commands when ADMIN_TOKEN is configured
    #[arg(long, global = true)]
    admin_token: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Manage classes
    #[command(subcommand)]
    Class(ClassCommand),
    /// Manage individual students
    #[command(subcommand)]
    Student(StudentCommand),
    /// Import or export a class roster as CSV
    #[command(subcommand)]
    Roster(RosterCommand),
    /// Fetch commits for every student in a class
    Sync {
        #[arg(long)]
        class: Uuid,
        #[arg(long)]
        days: Option<i64>,
        #[arg(long)]
        json: bool,
    },
    /// Show per-student commit counts
    Dashboard(DashboardArgs),
    /// Sync every class on the configured interval
    Schedule {
        /// Run a single pass and exit
        #[arg(long)]
        once: bool,
    },
}

#[derive(Subcommand)]
enum ClassCommand {
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    List,
    Show {
        #[arg(long)]
        class: Uuid,
        #[arg(long)]
        students: bool,
    },
    Update {
        #[arg(long)]
        class: Uuid,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
}

#[derive(Subcommand)]
enum StudentCommand {
    List {
        #[arg(long)]
        class: Uuid,
    },
    Add {
        #[arg(long)]
        class: Uuid,
        #[arg(long)]
        name: String,
        #[arg(long)]
        roll: String,
        #[arg(long)]
        repo: String,
        #[arg(long, default_value = "courseWork")]
        group: String,
    },
    Update {
        #[arg(long)]
        class: Uuid,
        #[arg(long)]
        student: Uuid,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        roll: Option<String>,
        #[arg(long)]
        repo: Option<String>,
        #[arg(long)]
        group: Option<String>,
    },
    Remove {
        #[arg(long)]
        class: Uuid,
        #[arg(long)]
        student: Uuid,
    },
}

#[derive(Subcommand)]
enum RosterCommand {
    Import {
        #[arg(long)]
        class: Uuid,
        #[arg(long)]
        csv: PathBuf,
    },
    Export {
        #[arg(long)]
        class: Uuid,
        /// Defaults to <class name>_students.csv
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Args)]
struct DashboardArgs {
    #[arg(long)]
    class: Uuid,
    #[arg(long)]
    group: Option<String>,
    #[arg(long)]
    days: Option<i64>,
    #[arg(long)]
    sort_by: Option<String>,
    #[arg(long)]
    order: Option<String>,
    #[arg(long)]
    search: Option<String>,
    #[arg(long, allow_hyphen_values = true)]
    min_commits: Option<i64>,
    #[arg(long, allow_hyphen_values = true)]
    max_commits: Option<i64>,
    #[arg(long, conflicts_with_all = ["markdown", "csv"])]
    json: bool,
    #[arg(long, conflicts_with = "csv")]
    markdown: bool,
    #[arg(long)]
    csv: Option<PathBuf>,
}

impl DashboardArgs {
    fn params(&self) -> DashboardParams {
        DashboardParams {
            group: self.group.clone(),
            days: self.days,
            sort_by: self.sort_by.clone(),
            sort_order: self.order.clone(),
            search: self.search.clone(),
            min_commits: self.min_commits,
            max_commits: self.max_commits,
        }
    }
}

/// Commands that write to the database or call GitHub on the class's behalf.
fn requires_admin(command: &Commands) -> bool {
    match command {
        Commands::InitDb | Commands::Sync { .. } | Commands::Schedule { .. } => true,
        Commands::Class(ClassCommand::Create { .. } | ClassCommand::Update { .. }) => true,
        Commands::Class(_) => false,
        Commands::Student(StudentCommand::List { .. }) => false,
        Commands::Student(_) => true,
        Commands::Roster(RosterCommand::Import { .. }) => true,
        Commands::Roster(RosterCommand::Export { .. }) => false,
        Commands::Dashboard(_) => false,
    }
}

fn sync_engine(config: &Config, store: Arc<dyn Store>) -> anyhow::Result<SyncEngine> {
    if config.github_token.is_none() {
        tracing::warn!("GITHUB_TOKEN is not set; unauthenticated requests are rate limited quickly");
    }
    let client = GithubClient::from_config(config).context("failed to build GitHub client")?;
    let fetcher = CommitFetcher::new(Arc::new(client), config.page_size);
    Ok(SyncEngine::new(store, fetcher))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref(), |key| std::env::var(key).ok())?;
    if requires_admin(&cli.command) {
        config.authorize(cli.admin_token.as_deref())?;
    }
    let database_url = config
        .database_url
        .clone()
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;
    let pg = PgStore::new(pool).with_transactions(config.db_transactions);

    if let Commands::InitDb = cli.command {
        pg.init_db().await?;
        println!("Schema ready.");
        return Ok(());
    }

    let store: Arc<dyn Store> = Arc::new(pg);
    let roster = RosterService::new(store.clone());

    match cli.command {
        Commands::InitDb => {}
        Commands::Class(command) => match command {
            ClassCommand::Create { name, description } => {
                let class = roster.create_class(&name, description.as_deref()).await?;
                println!("Created class {} ({}).", class.name, class.id);
            }
            ClassCommand::List => {
                let classes = roster.list_classes().await?;
                if classes.is_empty() {
                    println!("No classes yet.");
                }
                for class in classes {
                    println!(
                        "- {} ({}){}",
                        class.name,
                        class.id,
                        if class.students_uploaded { "" } else { " [no roster]" }
                    );
                }
            }
            ClassCommand::Show { class, students } => {
                let (class, roster_rows) = roster.show_class(class, students).await?;
                println!("{}", serde_json::to_string_pretty(&class)?);
                if students {
                    println!("{}", serde_json::to_string_pretty(&roster_rows)?);
                }
            }
            ClassCommand::Update {
                class,
                name,
                description,
            } => {
                let class = roster
                    .update_class(class, name.as_deref(), description.as_deref())
                    .await?;
                println!("Updated class {} ({}).", class.name, class.id);
            }
        },
        Commands::Student(StudentCommand::List { class }) => {
            let students = roster.list_students(class).await?;
            if students.is_empty() {
                println!("No students in this class.");
            }
            for student in students {
                let synced = student
                    .last_synced_at
                    .map(|at| at.format("%Y-%m-%d %H:%M UTC").to_string())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "- {} ({}) {} [{}] synced {}",
                    student.name, student.roll_number, student.repo_url, student.group_type, synced
                );
            }
        }
        Commands::Student(command) => {
            match command {
                StudentCommand::List { .. } => {}
                StudentCommand::Add {
                    class,
                    name,
                    roll,
                    repo,
                    group,
                } => {
                    let student = roster.add_student(class, &name, &roll, &repo, &group).await?;
                    println!("Added {} ({}).", student.name, student.id);
                }
                StudentCommand::Update {
                    class,
                    student,
                    name,
                    roll,
                    repo,
                    group,
                } => {
                    let group_type = group
                        .as_deref()
                        .map(roster::parse_group_strict)
                        .transpose()?;
                    let patch = StudentPatch {
                        name,
                        roll_number: roll,
                        repo_url: repo,
                        group_type,
                    };
                    let student = roster.update_student(class, student, patch).await?;
                    println!("Updated {} ({}).", student.name, student.id);
                }
                StudentCommand::Remove { class, student } => {
                    let removed = roster.remove_student(class, student).await?;
                    println!("Student removed along with {removed} commits.");
                }
            }
        }
        Commands::Roster(command) => match command {
            RosterCommand::Import { class, csv } => {
                let file = std::fs::File::open(&csv)
                    .with_context(|| format!("failed to open {}", csv.display()))?;
                let rows = spreadsheet::parse_roster(file)?;
                let outcome = roster.import_roster(class, rows).await?;
                println!(
                    "Inserted {} students from {} ({} already present).",
                    outcome.inserted_count,
                    csv.display(),
                    outcome.skipped_existing
                );
            }
            RosterCommand::Export { class, out } => {
                let (class, students) = roster.show_class(class, true).await?;
                let out = out.unwrap_or_else(|| PathBuf::from(spreadsheet::export_file_name(&class.name)));
                let mut buffer = Vec::new();
                spreadsheet::write_roster(&mut buffer, &students)?;
                std::fs::write(&out, buffer)?;
                println!("Roster written to {}.", out.display());
            }
        },
        Commands::Sync { class, days, json } => {
            let engine = sync_engine(&config, store.clone())?;
            let summary = engine
                .synchronize(class, days.unwrap_or(config.sync_window_days))
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print!("{}", report::format_sync_summary(&summary));
            }
        }
        Commands::Dashboard(args) => {
            let query = DashboardQuery::resolve(args.class, args.params());
            let result = dashboard::compute_dashboard(store.as_ref(), &query).await?;

            if args.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else if let Some(path) = &args.csv {
                let mut buffer = Vec::new();
                spreadsheet::write_dashboard(&mut buffer, &result)?;
                std::fs::write(path, buffer)?;
                println!("Dashboard written to {}.", path.display());
            } else {
                let (class, _) = roster.show_class(args.class, false).await?;
                let rendered = report::build_dashboard_report(&class.name, &result);
                if args.markdown {
                    print!("{rendered}");
                } else {
                    println!(
                        "{} students, {} commits, {:.2} average ({} - {})",
                        result.student_count,
                        result.total_commits,
                        result.average_commits,
                        result.since.format("%Y-%m-%d"),
                        result.until.format("%Y-%m-%d")
                    );
                    for row in &result.students {
                        println!("- {} ({}) {} commits", row.name, row.roll_number, row.total_commits);
                    }
                }
            }
        }
        Commands::Schedule { once } => {
            let engine = sync_engine(&config, store.clone())?;
            if once {
                let outcomes = engine.run_scheduled_tick(config.sync_window_days).await?;
                let failed = outcomes.iter().filter(|(_, r)| r.is_err()).count();
                println!("Synced {} classes ({} failed).", outcomes.len(), failed);
                return Ok(());
            }
            if !config.auto_sync {
                println!("Auto sync is disabled. Set ENABLE_AUTO_SYNC=true to enable it.");
                return Ok(());
            }

            let (tx, rx) = watch::channel(());
            let interval = config.sync_interval;
            let window_days = config.sync_window_days;
            let handle = tokio::spawn(async move {
                engine.run_scheduler(interval, window_days, rx).await;
            });

            tokio::signal::ctrl_c().await?;
            let _ = tx.send(());
            let _ = handle.await;
        }
    }

    Ok(())
}
