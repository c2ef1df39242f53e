//! Panka CLI - multi-tenant AWS stack orchestration

use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;

use panka::context::ExecutionContext;
use panka::error::PankaError;
use panka::graph::DependencyGraph;
use panka::lock::{DynamoLockStore, LockStore, MemoryLockStore};
use panka::parser::{parse_overrides, parse_stack_folder, ResourceSet};
use panka::plan::ChangeType;
use panka::provider::{MockProvider, ProviderRegistry};
use panka::reconciler::{DriftStatus, ReconcileOptions, Reconciler};
use panka::registry::{TenantRegistry, TenantStatus};
use panka::session::{Session, SessionKind, SessionStore};
use panka::state::{state_key, MemoryStateBackend, S3StateBackend, StateBackend};
use panka::tenancy::{TenantLockStore, TenantStateBackend};
use panka::types::TenantId;
use panka::validator::Validator;

#[derive(Parser)]
#[command(name = "panka")]
#[command(about = "Panka - deploy declarative AWS stacks, tenant-isolated")]
#[command(version)]
struct Cli {
    /// S3 bucket holding state and the tenant registry
    #[arg(long, global = true, env = "PANKA_BUCKET")]
    bucket: Option<String>,

    /// DynamoDB table backing distributed locks
    #[arg(long, global = true, env = "PANKA_LOCK_TABLE")]
    lock_table: Option<String>,

    /// In-process state and locks (testing only; nothing persists)
    #[arg(long, global = true, hide = true)]
    ephemeral: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scaffold a new stack folder
    Init {
        /// Stack name (also the folder name)
        name: String,
    },

    /// Parse and validate a stack folder
    Validate {
        /// Path to the stack folder
        path: PathBuf,
        /// Variable overrides, KEY=VALUE
        #[arg(long = "var")]
        vars: Vec<String>,
    },

    /// Show the dependency graph, levels, and critical path
    Graph {
        path: PathBuf,
        #[arg(long = "var")]
        vars: Vec<String>,
    },

    /// Compute the change-set and stage plan without deploying
    Plan {
        path: PathBuf,
        /// Target environment
        #[arg(short, long, default_value = "dev")]
        environment: String,
        #[arg(long = "var")]
        vars: Vec<String>,
    },

    /// Deploy a stack folder
    Apply {
        path: PathBuf,
        #[arg(short, long, default_value = "dev")]
        environment: String,
        #[arg(long = "var")]
        vars: Vec<String>,
        /// Plan only; make no cloud or state mutations
        #[arg(long)]
        dry_run: bool,
        /// Skip the interactive confirmation
        #[arg(long)]
        auto_approve: bool,
        /// Leave partially applied resources in place on failure
        #[arg(long)]
        no_rollback: bool,
        /// Lock TTL in seconds
        #[arg(long, default_value_t = 3600)]
        lock_ttl: u64,
    },

    /// Tear down everything recorded in state
    Destroy {
        /// Stack name
        stack: String,
        #[arg(short, long, default_value = "dev")]
        environment: String,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        auto_approve: bool,
        #[arg(long, default_value_t = 3600)]
        lock_ttl: u64,
    },

    /// Inspect stored deployment state
    State {
        #[command(subcommand)]
        command: StateCommands,
    },

    /// Compare stored state against the live cloud
    Drift {
        stack: String,
        #[arg(short, long, default_value = "dev")]
        environment: String,
    },

    /// Authenticate as a tenant
    Login {
        /// Tenant id
        tenant: String,
    },

    /// Drop the tenant session
    Logout,

    /// Administrative operations
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },
}

#[derive(Subcommand)]
enum StateCommands {
    /// List stacks with stored state
    List,
    /// Print the state document for a stack/environment
    Show {
        stack: String,
        #[arg(short, long, default_value = "dev")]
        environment: String,
    },
    /// Remove a state document (the cloud resources are untouched)
    Rm {
        stack: String,
        #[arg(short, long, default_value = "dev")]
        environment: String,
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Authenticate as the platform admin
    Login,
    /// Drop the admin session
    Logout,
    /// Tenant lifecycle management
    Tenant {
        #[command(subcommand)]
        command: TenantCommands,
    },
}

#[derive(Subcommand)]
enum TenantCommands {
    /// Create a tenant and print its one-time secret
    Init {
        id: String,
        #[arg(long, default_value = "")]
        display_name: String,
        #[arg(long, default_value = "")]
        email: String,
        #[arg(long)]
        dry_run: bool,
    },
    /// List tenants
    List {
        /// Filter: active, suspended, or deleted
        #[arg(long)]
        status: Option<String>,
    },
    /// Show one tenant entry
    Show { id: String },
    /// Rotate credentials; prints the new one-time secret
    Rotate {
        id: String,
        #[arg(long)]
        dry_run: bool,
    },
    /// Suspend a tenant
    Suspend {
        id: String,
        #[arg(long)]
        dry_run: bool,
    },
    /// Reactivate a tenant
    Activate {
        id: String,
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("{} {}", "Error:".red().bold(), err);
        if let Some(hint) = err.hint() {
            eprintln!("  {} {}", "Hint:".yellow(), hint);
        }
        std::process::exit(err.exit_code());
    }
}

async fn run(cli: Cli) -> Result<(), PankaError> {
    match cli.command {
        Commands::Init { ref name } => init_stack(name),
        Commands::Validate { ref path, ref vars } => {
            let set = load_set(path, vars)?;
            validate_set(&set)?;
            println!(
                "{} stack '{}' is valid ({} components)",
                "✓".green(),
                set.stack_name(),
                set.components.len()
            );
            Ok(())
        }
        Commands::Graph { ref path, ref vars } => {
            let set = load_set(path, vars)?;
            validate_set(&set)?;
            show_graph(&set)
        }
        Commands::Plan {
            ref path,
            ref environment,
            ref vars,
        } => {
            let set = load_set(path, vars)?;
            let (reconciler, _) = build_reconciler(&cli, ReconcileOptions::default()).await?;
            let (changes, plan) = reconciler.preview(&set, environment).await?;
            print_plan_summary(&changes, &plan);
            Ok(())
        }
        Commands::Apply {
            ref path,
            ref environment,
            ref vars,
            dry_run,
            auto_approve,
            no_rollback,
            lock_ttl,
        } => {
            let set = load_set(path, vars)?;
            let options = ReconcileOptions {
                lock_ttl: std::time::Duration::from_secs(lock_ttl),
                rollback_enabled: !no_rollback,
                dry_run,
            };
            let (reconciler, _) = build_reconciler(&cli, options).await?;

            let (changes, plan) = reconciler.preview(&set, environment).await?;
            if changes.is_noop() {
                println!("{} no changes", "✓".green());
                return Ok(());
            }
            print_plan_summary(&changes, &plan);
            if dry_run {
                return Ok(());
            }

            let destructive = changes.pending().any(|c| {
                matches!(c.change_type, ChangeType::Delete | ChangeType::Recreate)
            });
            if destructive && !auto_approve && !confirm("Destructive changes planned. Continue?")? {
                println!("aborted");
                return Ok(());
            }

            let report = reconciler.apply(&set, environment).await?;
            if report.no_changes {
                println!("{} no changes", "✓".green());
            } else {
                println!(
                    "{} applied {} resource(s); state version {}",
                    "✓".green(),
                    report.resources_applied,
                    report.state_version.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
        Commands::Destroy {
            ref stack,
            ref environment,
            dry_run,
            auto_approve,
            lock_ttl,
        } => {
            if !auto_approve
                && !dry_run
                && !confirm(&format!(
                    "Destroy every resource of '{stack}' in '{environment}'?"
                ))?
            {
                println!("aborted");
                return Ok(());
            }
            let options = ReconcileOptions {
                lock_ttl: std::time::Duration::from_secs(lock_ttl),
                rollback_enabled: false,
                dry_run,
            };
            let (reconciler, _) = build_reconciler(&cli, options).await?;
            let report = reconciler.destroy(stack, environment).await?;
            println!(
                "{} deleted {} resource(s){}",
                "✓".green(),
                report.resources_deleted,
                if report.state_removed {
                    "; state removed"
                } else {
                    ""
                }
            );
            Ok(())
        }
        Commands::State { ref command } => state_command(&cli, command).await,
        Commands::Drift {
            ref stack,
            ref environment,
        } => {
            let (reconciler, _) = build_reconciler(&cli, ReconcileOptions::default()).await?;
            let report = reconciler.drift(stack, environment).await?;
            if report.entries.is_empty() {
                println!("no deployed resources");
                return Ok(());
            }
            for entry in &report.entries {
                let status = match entry.status {
                    DriftStatus::InSync => "in-sync".green(),
                    DriftStatus::Modified => "modified".yellow(),
                    DriftStatus::Deleted => "deleted".red(),
                    DriftStatus::Unknown => "unknown".magenta(),
                };
                match &entry.detail {
                    Some(detail) => println!("{:<24} {:<12} {status}  {detail}", entry.id, entry.kind),
                    None => println!("{:<24} {:<12} {status}", entry.id, entry.kind),
                }
            }
            Ok(())
        }
        Commands::Login { ref tenant } => login_tenant(&cli, tenant).await,
        Commands::Logout => {
            SessionStore::new(SessionStore::default_dir()).delete(SessionKind::Tenant)?;
            println!("{} logged out", "✓".green());
            Ok(())
        }
        Commands::Admin { ref command } => admin_command(&cli, command).await,
    }
}

// ============================================================================
// BACKEND AND CONTEXT WIRING
// ============================================================================

/// Raw (un-namespaced) backends from CLI configuration
async fn build_backends(
    cli: &Cli,
) -> Result<(Arc<dyn StateBackend>, Arc<dyn LockStore>), PankaError> {
    if cli.ephemeral {
        return Ok((
            Arc::new(MemoryStateBackend::new()),
            Arc::new(MemoryLockStore::new()),
        ));
    }
    let bucket = cli.bucket.clone().ok_or_else(|| {
        PankaError::other("no state bucket configured; pass --bucket or set PANKA_BUCKET")
    })?;
    let table = cli.lock_table.clone().ok_or_else(|| {
        PankaError::other("no lock table configured; pass --lock-table or set PANKA_LOCK_TABLE")
    })?;
    Ok((
        Arc::new(S3StateBackend::from_env(bucket).await),
        Arc::new(DynamoLockStore::from_env(table).await),
    ))
}

/// Resolve the execution context from stored sessions
///
/// Tenant session wins; then admin; otherwise single-tenant mode under the
/// invoking OS user.
fn resolve_context() -> ExecutionContext {
    let store = SessionStore::new(SessionStore::default_dir());
    if let Ok(session) = store.load(SessionKind::Tenant) {
        if let Ok(id) = TenantId::new(&session.principal_id) {
            return ExecutionContext::for_tenant(
                id,
                session.storage_prefix,
                session.lock_prefix,
            );
        }
    }
    if let Ok(session) = store.load(SessionKind::Admin) {
        return ExecutionContext::for_admin(session.principal_id);
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "local".to_string());
    ExecutionContext::single_tenant(user)
}

/// Tenancy-wrapped reconciler for the resolved context
async fn build_reconciler(
    cli: &Cli,
    options: ReconcileOptions,
) -> Result<(Reconciler, ExecutionContext), PankaError> {
    let (state, locks) = build_backends(cli).await?;
    let context = resolve_context();

    let providers = Arc::new(ProviderRegistry::new());
    providers.register_for_all(Arc::new(MockProvider::new()));

    let wrapped_state: Arc<dyn StateBackend> =
        Arc::new(TenantStateBackend::new(state, &context));
    let wrapped_locks: Arc<dyn LockStore> = Arc::new(TenantLockStore::new(locks, &context));

    Ok((
        Reconciler::new(wrapped_state, wrapped_locks, providers, context.clone(), options),
        context,
    ))
}

fn load_set(path: &PathBuf, vars: &[String]) -> Result<ResourceSet, PankaError> {
    let overrides = parse_overrides(vars)?;
    Ok(parse_stack_folder(path, &overrides)?)
}

fn validate_set(set: &ResourceSet) -> Result<(), PankaError> {
    let report = Validator::new().validate(set);
    for warning in &report.warnings {
        eprintln!("{} {}", "Warning:".yellow(), warning);
    }
    if report.is_valid() {
        Ok(())
    } else {
        Err(report.into())
    }
}

fn confirm(question: &str) -> Result<bool, PankaError> {
    print!("{question} [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

// ============================================================================
// SUBCOMMAND BODIES
// ============================================================================

fn init_stack(name: &str) -> Result<(), PankaError> {
    let root = PathBuf::from(name);
    std::fs::create_dir_all(root.join("services/api"))?;
    std::fs::write(
        root.join("stack.yaml"),
        format!(
            r#"apiVersion: core.panka.io/v1
kind: Stack
metadata:
  name: {name}
spec:
  provider:
    name: aws
    region: us-east-1
  variables: {{}}
  environments: [dev, prod]
"#
        ),
    )?;
    std::fs::write(
        root.join("services/api/service.yaml"),
        r#"apiVersion: core.panka.io/v1
kind: Service
metadata:
  name: api
spec:
  description: Example service
"#,
    )?;
    std::fs::write(
        root.join("services/api/queue.yaml"),
        r#"apiVersion: components.panka.io/v1
kind: SQS
metadata:
  name: jobs
spec:
  visibilityTimeoutSeconds: 60
"#,
    )?;
    println!("{} scaffolded stack folder '{name}'", "✓".green());
    Ok(())
}

fn show_graph(set: &ResourceSet) -> Result<(), PankaError> {
    let mut graph = DependencyGraph::from_resources(set);
    graph.ensure_acyclic()?;

    println!("{}", "Deployment order:".cyan().bold());
    for (level, group) in graph.level_groups()?.into_iter().enumerate() {
        println!("  stage {level}: {}", group.join(", "));
    }
    let critical = graph.critical_path()?;
    if critical.len() > 1 {
        println!(
            "{} {}",
            "Critical path:".cyan().bold(),
            critical.join(" → ")
        );
    }
    Ok(())
}

fn print_plan_summary(changes: &panka::plan::ChangeSet, plan: &panka::plan::DeploymentPlan) {
    if plan.is_empty() {
        println!("{} no changes", "✓".green());
        return;
    }
    for (index, stage) in plan.stages.iter().enumerate() {
        println!("{}", format!("Stage {index}:").cyan().bold());
        for resource in &stage.resources {
            let verb = match resource.action {
                ChangeType::Create => "+ create".green(),
                ChangeType::Update => "~ update".yellow(),
                ChangeType::Recreate => "± recreate".red(),
                ChangeType::Delete => "- delete".red(),
                ChangeType::NoOp => "  none".dimmed(),
            };
            println!("  {verb} {} ({})", resource.id, resource.kind);
            if let Some(change) = changes.get(&resource.id) {
                for diff in change.diffs.iter().take(8) {
                    println!(
                        "      {}: {} → {}",
                        diff.path.dimmed(),
                        diff.old
                            .as_ref()
                            .map(ToString::to_string)
                            .unwrap_or_else(|| "∅".into()),
                        diff.new
                            .as_ref()
                            .map(ToString::to_string)
                            .unwrap_or_else(|| "∅".into()),
                    );
                }
            }
        }
    }
    let counts = changes.counts();
    let summary: Vec<String> = counts.iter().map(|(k, v)| format!("{v} {k}")).collect();
    println!(
        "{} {} | ~{}s estimated",
        "Plan:".cyan().bold(),
        summary.join(", "),
        plan.estimated_duration().as_secs()
    );
}

async fn state_command(cli: &Cli, command: &StateCommands) -> Result<(), PankaError> {
    let (state, _) = build_backends(cli).await?;
    let context = resolve_context();
    let wrapped: Arc<dyn StateBackend> = Arc::new(TenantStateBackend::new(state, &context));

    match command {
        StateCommands::List => {
            let keys = wrapped.list("stacks/").await?;
            if keys.is_empty() {
                println!("no stored state");
            }
            for key in keys {
                println!("{key}");
            }
        }
        StateCommands::Show { stack, environment } => {
            let (body, version) = wrapped.load(&state_key(stack, environment)).await?;
            eprintln!("{} version {}", "#".dimmed(), version.dimmed());
            println!("{body}");
        }
        StateCommands::Rm {
            stack,
            environment,
            dry_run,
        } => {
            let key = state_key(stack, environment);
            if *dry_run {
                println!("would remove {key}");
            } else {
                wrapped.delete(&key).await?;
                println!("{} removed {key}", "✓".green());
            }
        }
    }
    Ok(())
}

async fn login_tenant(cli: &Cli, tenant: &str) -> Result<(), PankaError> {
    let id = TenantId::new(tenant)?;
    let secret = match std::env::var("PANKA_SECRET") {
        Ok(secret) => secret,
        Err(_) => {
            print!("Secret for tenant '{id}': ");
            std::io::stdout().flush()?;
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
            line.trim().to_string()
        }
    };

    let (state, locks) = build_backends(cli).await?;
    let registry = TenantRegistry::new(state, locks);
    let entry = registry.verify(&id, &secret).await?;

    let session = Session::new(
        SessionKind::Tenant,
        id.as_str(),
        entry.storage.prefix,
        entry.locks.prefix,
        chrono::Duration::days(7),
    );
    SessionStore::new(SessionStore::default_dir()).save(&session)?;
    println!(
        "{} logged in as tenant '{id}' until {}",
        "✓".green(),
        session.expires_at
    );
    Ok(())
}

async fn admin_command(cli: &Cli, command: &AdminCommands) -> Result<(), PankaError> {
    match command {
        AdminCommands::Login => {
            let admin = std::env::var("USER").unwrap_or_else(|_| "admin".to_string());
            let session = Session::new(
                SessionKind::Admin,
                admin,
                "",
                "",
                chrono::Duration::hours(8),
            );
            SessionStore::new(SessionStore::default_dir()).save(&session)?;
            println!(
                "{} admin session active until {}",
                "✓".green(),
                session.expires_at
            );
            Ok(())
        }
        AdminCommands::Logout => {
            SessionStore::new(SessionStore::default_dir()).delete(SessionKind::Admin)?;
            println!("{} admin logged out", "✓".green());
            Ok(())
        }
        AdminCommands::Tenant { command } => {
            let store = SessionStore::new(SessionStore::default_dir());
            let admin = store.load(SessionKind::Admin)?.principal_id;
            let (state, locks) = build_backends(cli).await?;
            let registry = TenantRegistry::new(state, locks);
            tenant_command(&registry, &admin, command).await
        }
    }
}

async fn tenant_command(
    registry: &TenantRegistry,
    admin: &str,
    command: &TenantCommands,
) -> Result<(), PankaError> {
    match command {
        TenantCommands::Init {
            id,
            display_name,
            email,
            dry_run,
        } => {
            let id = TenantId::new(id)?;
            if *dry_run {
                println!("would create tenant '{id}' with prefix tenants/{id}/v1");
                return Ok(());
            }
            let (entry, secret) = registry.create(&id, display_name, email, admin).await?;
            println!("{} tenant '{id}' created", "✓".green());
            println!("  storage prefix: {}", entry.storage.prefix);
            println!("  lock prefix:    {}", entry.locks.prefix);
            println!();
            println!(
                "{} one-time secret (store it now, it is not recoverable):",
                "!".yellow().bold()
            );
            println!("  {secret}");
        }
        TenantCommands::List { status } => {
            let filter = match status.as_deref() {
                Some("active") => Some(TenantStatus::Active),
                Some("suspended") => Some(TenantStatus::Suspended),
                Some("deleted") => Some(TenantStatus::Deleted),
                Some(other) => {
                    return Err(PankaError::other(format!(
                        "unknown status filter '{other}'"
                    )))
                }
                None => None,
            };
            for entry in registry.list(filter).await? {
                println!(
                    "{:<24} {:<10} {}",
                    entry.id.as_str(),
                    format!("{:?}", entry.status).to_lowercase(),
                    entry.email
                );
            }
        }
        TenantCommands::Show { id } => {
            let entry = registry.get(&TenantId::new(id)?).await?;
            println!("{}", serde_yaml::to_string(&entry)?);
        }
        TenantCommands::Rotate { id, dry_run } => {
            if *dry_run {
                println!("would rotate credentials for tenant '{id}'");
                return Ok(());
            }
            let secret = registry.rotate(&TenantId::new(id)?, admin).await?;
            println!("{} credentials rotated; new one-time secret:", "✓".green());
            println!("  {secret}");
        }
        TenantCommands::Suspend { id, dry_run } => {
            if *dry_run {
                println!("would suspend tenant '{id}'");
                return Ok(());
            }
            registry.suspend(&TenantId::new(id)?, admin).await?;
            println!("{} tenant '{id}' suspended", "✓".green());
        }
        TenantCommands::Activate { id, dry_run } => {
            if *dry_run {
                println!("would activate tenant '{id}'");
                return Ok(());
            }
            registry.activate(&TenantId::new(id)?, admin).await?;
            println!("{} tenant '{id}' activated", "✓".green());
        }
    }
    Ok(())
}
