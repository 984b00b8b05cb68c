//! tsql-batch CLI Entry Point
//!
//! Subcommands:
//! - `run` - Execute a batch of work items
//! - `credentials` - Manage stored credential profiles
//! - `preview` - Print the synthesized listing statement without connecting
//!
//! All output to stdout is JSON-only. Logs go to stderr.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};

use tsql_batch::config::{load_with_precedence, lookup_credentials};
use tsql_batch::{
    build_list_databases_query, list_credentials, logging, remove_credentials, run_batch,
    save_credentials, AdditionalFields, BatchError, BatchSettings, ConfigLocation, ErrorEnvelope,
    ErrorInfo, Metadata, Operation, SqlServerDriver, StoredCredentials, SuccessEnvelope, WorkItem,
};

/// tsql-batch - batch T-SQL execution against SQL Server
#[derive(Parser)]
#[command(name = "tsql-batch")]
#[command(about = "Run batches of T-SQL work items with per-item connection overrides")]
#[command(version)]
struct Cli {
    /// Increase log verbosity on stderr (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Pretty-print the JSON output
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a batch of work items
    Run {
        /// executeQuery, listAll, listUser, or listSystem
        #[arg(long)]
        operation: Operation,

        /// JSON file with a work item or an array of work items ("-" for stdin)
        #[arg(long)]
        input: Option<PathBuf>,

        /// Credential profile name (defaults to the store default)
        #[arg(long)]
        credentials: Option<String>,

        /// Record failed items as error items instead of aborting
        #[arg(long)]
        continue_on_fail: bool,
    },

    /// Manage stored credential profiles
    Credentials {
        #[command(subcommand)]
        action: CredentialsAction,
    },

    /// Print the listing statement for a listing operation
    Preview {
        /// listAll, listUser, or listSystem
        #[arg(long)]
        operation: Operation,

        #[command(flatten)]
        fields: FieldArgs,
    },
}

#[derive(Subcommand)]
enum CredentialsAction {
    /// Add or replace a credential profile
    Add {
        /// Profile name
        name: String,

        #[arg(long)]
        server: String,

        #[arg(long)]
        instance: Option<String>,

        #[arg(long, default_value_t = tsql_batch::config::DEFAULT_PORT)]
        port: u16,

        #[arg(long)]
        user: String,

        /// Password (prompted for when neither this nor --password-env is given)
        #[arg(long, conflicts_with = "password_env")]
        password: Option<String>,

        /// Environment variable holding the password
        #[arg(long)]
        password_env: Option<String>,

        #[arg(long, default_value = tsql_batch::config::DEFAULT_DATABASE)]
        database: String,

        #[arg(long)]
        encrypt: bool,

        #[arg(long)]
        trust_server_certificate: bool,

        /// Save to the global store instead of the local one
        #[arg(long)]
        global: bool,
    },

    /// List credential profiles
    List,

    /// Remove a credential profile
    Remove {
        name: String,

        /// Remove from the global store instead of the local one
        #[arg(long)]
        global: bool,
    },
}

#[derive(Args)]
struct FieldArgs {
    #[arg(long)]
    include_database_id: bool,

    #[arg(long)]
    include_create_date: bool,

    #[arg(long)]
    include_state: bool,
}

impl From<FieldArgs> for AdditionalFields {
    fn from(args: FieldArgs) -> Self {
        Self {
            include_database_id: args.include_database_id,
            include_create_date: args.include_create_date,
            include_state: args.include_state,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let pretty = cli.pretty;
    let label = command_label(&cli.command);

    match dispatch(cli.command, pretty).await {
        Ok(code) => code,
        Err(e) => {
            let info = match e.downcast_ref::<BatchError>() {
                Some(err) => ErrorInfo::new(err.error_code(), err.message(), None),
                None => ErrorInfo::new("INVALID_INPUT", format!("{e:#}"), None),
            };
            let envelope = ErrorEnvelope::new(label, info, Vec::new());
            if let Err(write_err) = emit(&envelope, pretty) {
                tracing::error!(error = %write_err, "failed to write error envelope");
            }
            ExitCode::FAILURE
        }
    }
}

fn command_label(command: &Commands) -> String {
    match command {
        Commands::Run { operation, .. } | Commands::Preview { operation, .. } => {
            operation.to_string()
        }
        Commands::Credentials { action } => match action {
            CredentialsAction::Add { .. } => "credentials.add".to_string(),
            CredentialsAction::List => "credentials.list".to_string(),
            CredentialsAction::Remove { .. } => "credentials.remove".to_string(),
        },
    }
}

async fn dispatch(command: Commands, pretty: bool) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Run { operation, input, credentials, continue_on_fail } => {
            run(operation, input.as_deref(), credentials.as_deref(), continue_on_fail, pretty)
                .await
        }
        Commands::Credentials { action } => {
            manage_credentials(action, pretty)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Preview { operation, fields } => {
            let statement = build_list_databases_query(operation, &fields.into())?;
            emit(&json!({"ok": true, "operation": operation, "query": statement}), pretty)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(
    operation: Operation,
    input: Option<&Path>,
    credentials: Option<&str>,
    continue_on_fail: bool,
    pretty: bool,
) -> anyhow::Result<ExitCode> {
    let stored = load_credentials(credentials)?;
    let items = read_work_items(input)?;
    let settings = BatchSettings::new(operation).continue_on_fail(continue_on_fail);

    let start = Instant::now();
    let result = run_batch(&SqlServerDriver, &stored, &items, &settings).await;
    let execution_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(data) => {
            let meta = Metadata::from_items(execution_ms, items.len(), &data);
            emit(&SuccessEnvelope::new(operation.as_str(), data, meta), pretty)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(aborted) => {
            emit(&ErrorEnvelope::from_aborted(operation.as_str(), aborted), pretty)?;
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Resolve the credential profile; an empty store yields defaults so items can carry
/// everything in their overrides
fn load_credentials(name: Option<&str>) -> anyhow::Result<StoredCredentials> {
    let store = load_with_precedence()?;
    if name.is_none() && store.credentials.is_empty() {
        tracing::debug!("no stored credentials, relying on per-item overrides");
        return Ok(StoredCredentials::default());
    }
    Ok(lookup_credentials(&store, name)?)
}

/// Read work items from a file or stdin; no input means a single empty item
fn read_work_items(input: Option<&Path>) -> anyhow::Result<Vec<WorkItem>> {
    let Some(path) = input else {
        return Ok(vec![WorkItem::default()]);
    };

    let contents = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).context("Could not read work items from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Could not read work items from {}", path.display()))?
    };

    let value: Value = serde_json::from_str(&contents).context("Work items are not valid JSON")?;
    let items = match value {
        Value::Array(_) => serde_json::from_value(value).context("Invalid work item array")?,
        Value::Object(_) => vec![serde_json::from_value(value).context("Invalid work item")?],
        _ => bail!("Work items must be a JSON object or an array of objects"),
    };
    Ok(items)
}

fn manage_credentials(action: CredentialsAction, pretty: bool) -> anyhow::Result<()> {
    match action {
        CredentialsAction::Add {
            name,
            server,
            instance,
            port,
            user,
            password,
            password_env,
            database,
            encrypt,
            trust_server_certificate,
            global,
        } => {
            let password = match (password, &password_env) {
                (Some(p), _) => Some(p),
                (None, Some(_)) => None,
                (None, None) => Some(
                    dialoguer::Password::new()
                        .with_prompt(format!("Password for {user}@{server}"))
                        .allow_empty_password(true)
                        .interact()
                        .context("Could not read password")?,
                ),
            };

            let creds = StoredCredentials {
                server,
                instance,
                port,
                user,
                password,
                password_env,
                database,
                encrypt,
                trust_server_certificate,
            };
            let location = if global { ConfigLocation::Global } else { ConfigLocation::Local };
            save_credentials(&name, creds, location)?;

            let path = location.path()?;
            emit(&json!({"ok": true, "name": name, "path": path.display().to_string()}), pretty)
        }
        CredentialsAction::List => {
            let profiles: Vec<Value> = list_credentials()?
                .into_iter()
                .map(|(name, is_default)| json!({"name": name, "default": is_default}))
                .collect();
            emit(&json!({"ok": true, "credentials": profiles}), pretty)
        }
        CredentialsAction::Remove { name, global } => {
            let location = if global { ConfigLocation::Global } else { ConfigLocation::Local };
            remove_credentials(&name, location)?;
            emit(&json!({"ok": true, "removed": name}), pretty)
        }
    }
}

/// Write one JSON document to stdout
fn emit<T: Serialize>(value: &T, pretty: bool) -> anyhow::Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{text}");
    Ok(())
}
