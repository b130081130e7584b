use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use server_inventory::audit::{self, AuditAction, AuditContext};
use server_inventory::authz::Role;
use server_inventory::db::{self, users};
use server_inventory::models::department::{DbDepartment, Department};
use server_inventory::models::user::{DbUser, USER_COLUMNS};
use server_inventory::ssl::{self, DisabledProbe, LogNotifier, SslSettings};
use server_inventory::utils::hash_password;

#[derive(Parser, Debug)]
#[command(author, version, about = "server inventory administration tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Create an active superuser
    CreateSuperuser {
        #[arg(long)]
        username: String,
        #[arg(long, default_value = "")]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Add a user to a role group (Admin, Manager or Viewer)
    AssignRole {
        #[arg(long)]
        username: String,
        #[arg(long)]
        role: String,
    },
    /// Create a department if needed, optionally adding a member to it
    AddDepartment {
        name: String,
        #[arg(long)]
        member: Option<String>,
    },
    /// Refresh certificates of every enabled hyperlink
    CheckSsl {
        /// Also send expiry notices for the configured day offsets
        #[arg(long)]
        notify: bool,
    },
    /// Flag certificates past their expiry date
    MarkExpired,
    /// Recompute the audit hash chain
    VerifyAudit,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Fall back to the crate-local `.env` when the CWD has none.
    if dotenvy::dotenv().is_err() {
        let crate_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let pool = get_pool().await?;

    match cli.command {
        Commands::MigrateRun => {
            let migrator = get_migrator().await?;
            migrator.run(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let migrator = get_migrator().await?;
            print_status(&pool, &migrator).await?;
        }
        Commands::CreateSuperuser {
            username,
            email,
            password,
        } => {
            let password_hash = hash_password(&password)?;
            let user_id = Uuid::new_v4();

            let mut tx = db::begin_write(&pool).await?;
            users::insert_user(&mut tx, user_id, &username, &email, "", "", &password_hash, true).await?;
            let db_user = fetch_required_user(&mut tx, &username).await?;
            let user = users::load_user(&mut tx, db_user).await?;
            audit::record(&mut tx, &AuditContext::system(), AuditAction::Create, None, Some(&user)).await?;
            tx.commit().await?;

            println!("Created superuser {} ({})", user.username, user.id);
        }
        Commands::AssignRole { username, role } => {
            let role = Role::from_group_name(&role)
                .with_context(|| format!("unknown role {role}, expected Admin, Manager or Viewer"))?;

            let mut tx = db::begin_write(&pool).await?;
            let db_user = fetch_required_user(&mut tx, &username).await?;
            let user_id = server_inventory::utils::parse_uuid(&db_user.id)?;
            let old = users::load_user(&mut tx, db_user.clone()).await?;
            users::add_group(&mut tx, user_id, role).await?;
            let new = users::load_user(&mut tx, db_user).await?;
            audit::record(&mut tx, &AuditContext::system(), AuditAction::Update, Some(&old), Some(&new)).await?;
            tx.commit().await?;

            println!("{username} is now in group {role}");
        }
        Commands::AddDepartment { name, member } => {
            let department = ensure_department(&pool, &name).await?;
            println!("Department {} ({})", department.name, department.id);

            if let Some(username) = member {
                let mut tx = db::begin_write(&pool).await?;
                let db_user = fetch_required_user(&mut tx, &username).await?;
                let user_id = server_inventory::utils::parse_uuid(&db_user.id)?;
                let old = users::load_user(&mut tx, db_user.clone()).await?;
                users::add_department(&mut tx, user_id, department.id).await?;
                let new = users::load_user(&mut tx, db_user).await?;
                audit::record(&mut tx, &AuditContext::system(), AuditAction::Update, Some(&old), Some(&new)).await?;
                tx.commit().await?;

                println!("Added {username} to {}", department.name);
            }
        }
        Commands::CheckSsl { notify } => {
            let summary = ssl::check_all(&pool, &DisabledProbe, &AuditContext::system()).await?;
            println!(
                "updated: {}, skipped: {}, errors: {}",
                summary.updated, summary.skipped, summary.errors
            );

            if notify {
                let settings = SslSettings::from_env()?;
                let notices =
                    ssl::send_expiry_notifications(&pool, &LogNotifier, &settings.notification_days, Utc::now())
                        .await?;
                println!(
                    "notifications sent: {}, skipped: {}, errors: {}",
                    notices.sent, notices.skipped, notices.errors
                );
            }
        }
        Commands::MarkExpired => {
            let expired = ssl::mark_expired(&pool, Utc::now()).await?;
            println!("certificates marked expired: {expired}");
        }
        Commands::VerifyAudit => {
            let report = audit::verify_chain(&pool).await?;
            if report.valid {
                println!("audit chain intact ({} entries)", report.entries);
            } else {
                anyhow::bail!(
                    "audit chain broken at seq {} ({} entries)",
                    report.first_broken_seq.unwrap_or_default(),
                    report.entries
                );
            }
        }
    }

    Ok(())
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to database")
}

async fn fetch_required_user(conn: &mut sqlx::SqliteConnection, username: &str) -> anyhow::Result<DbUser> {
    sqlx::query_as::<_, DbUser>(&format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?"))
        .bind(username)
        .fetch_optional(&mut *conn)
        .await?
        .with_context(|| format!("no user named {username}"))
}

async fn ensure_department(pool: &SqlitePool, name: &str) -> anyhow::Result<Department> {
    let existing = sqlx::query_as::<_, DbDepartment>(
        "SELECT id, name, created_at, updated_at FROM departments WHERE name = ?",
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;
    if let Some(row) = existing {
        return Ok(Department::try_from(row)?);
    }

    let id = Uuid::new_v4();
    let now = Utc::now();
    let mut tx = db::begin_write(pool).await?;
    sqlx::query("INSERT INTO departments (id, name, created_at, updated_at) VALUES (?, ?, ?, ?)")
        .bind(id.to_string())
        .bind(name)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    let row = sqlx::query_as::<_, DbDepartment>(
        "SELECT id, name, created_at, updated_at FROM departments WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_one(&mut *tx)
    .await?;
    let department = Department::try_from(row)?;
    audit::record(&mut tx, &AuditContext::system(), AuditAction::Create, None, Some(&department)).await?;
    tx.commit().await?;

    Ok(department)
}

async fn print_status(pool: &SqlitePool, migrator: &sqlx::migrate::Migrator) -> anyhow::Result<()> {
    // Nothing is applied until the migrations table exists.
    let table: Option<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'")
            .fetch_optional(pool)
            .await?;
    let applied_versions: HashSet<i64> = if table.is_some() {
        let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?;
        rows.iter().filter_map(|row| row.try_get::<i64, _>("version").ok()).collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} Name", "Status", "Version");
    for migration in migrator.iter() {
        let status = if applied_versions.contains(&migration.version) {
            "applied"
        } else {
            "pending"
        };
        let desc = migration.description.as_ref().trim();
        let name = if desc.is_empty() { "unknown" } else { desc };
        println!("{:<8} {:<20} {}", status, migration.version, name);
    }

    Ok(())
}

async fn get_migrator() -> anyhow::Result<sqlx::migrate::Migrator> {
    // ./migrations when run from the repo root, else the crate-local folder.
    let local = Path::new("./migrations");
    let migrator_path = if local.exists() {
        local.to_path_buf()
    } else {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
    };

    let migrator_path_display = migrator_path.display().to_string();
    sqlx::migrate::Migrator::new(migrator_path)
        .await
        .with_context(|| format!("failed to load migrations from {}", migrator_path_display))
}
