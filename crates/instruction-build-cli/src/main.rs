//! `ibuild` - Instruction Build CLI
//!
//! Drives the build engine against SurrealDB. Every command prints its
//! result as pretty JSON on stdout; logs go to stderr.
//!
//! ## Commands
//!
//! - `instruction`: author instructions and their versions
//! - `build`: create, edit, review, diff, publish and roll back builds
//!
//! The database is picked from the environment (`SURREALDB_ENDPOINT` for a
//! remote server, `SURREALDB_URL` such as `surrealkv://./ibuild.db` for a
//! local file, otherwise in-memory).

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use tracing::{debug, Level};

use instruction_build::{init_tracing, BuildService, LogFormat, NewBuild};
use instruction_state::{
    BuildId, BuildSource, BuildStatus, ContentStore, Instruction, InstructionId,
    InstructionReference, InstructionSource, LoadMode, OrgId, Page, SurrealContentStore,
    SurrealHandle, VersionDraft, VersionId,
};

type Service = BuildService<SurrealContentStore>;

#[derive(Parser)]
#[command(name = "ibuild")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Staged, versioned deployment of instruction corpora", long_about = None)]
struct Cli {
    /// Organization that owns the instructions and builds
    #[arg(long, global = true, env = "IBUILD_ORG", default_value = "default")]
    org: String,

    /// User recorded as creator, approver or publisher
    #[arg(long, global = true, env = "IBUILD_USER", default_value = "ibuild")]
    user: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Author instructions and versions
    Instruction {
        #[command(subcommand)]
        action: InstructionAction,
    },

    /// Build lifecycle, editing, diff, publish and rollback
    Build {
        #[command(subcommand)]
        action: BuildAction,
    },
}

#[derive(Args)]
struct VersionArgs {
    /// Instruction text
    #[arg(long)]
    text: String,
    #[arg(long, default_value = "")]
    title: String,
    #[arg(long)]
    category: Option<String>,
    #[arg(long, value_enum, default_value_t = LoadModeArg::Always)]
    load_mode: LoadModeArg,
    /// Referenced object as `type:id`; repeatable
    #[arg(long = "reference", value_parser = parse_reference)]
    references: Vec<InstructionReference>,
}

#[derive(Subcommand)]
enum InstructionAction {
    /// Create an instruction with its first version
    Create {
        #[command(flatten)]
        version: VersionArgs,
        #[arg(long, value_enum, default_value_t = SourceArg::User)]
        source: SourceArg,
    },
    /// Add a new version to an instruction
    Version {
        instruction: String,
        #[command(flatten)]
        version: VersionArgs,
    },
    /// Soft-delete an instruction (reversible through rollback)
    Delete { instruction: String },
    /// Show an instruction
    Show { instruction: String },
}

#[derive(Subcommand)]
enum BuildAction {
    /// Create a draft build, seeded from the current main build
    Create {
        #[arg(long, value_enum, default_value_t = SourceArg::User)]
        source: SourceArg,
        /// Start empty instead of copying main
        #[arg(long)]
        empty: bool,
        /// Branch label shown in git build titles
        #[arg(long)]
        branch: Option<String>,
    },
    /// Show a build
    Show { build: String },
    /// List builds, newest first
    List {
        #[arg(long, value_parser = clap::value_parser!(BuildStatus))]
        status: Option<BuildStatus>,
        #[arg(long)]
        page: Option<u64>,
        #[arg(long)]
        per_page: Option<u64>,
    },
    /// List the pinned instructions of a build
    Contents { build: String },
    /// Pin an instruction version into a build
    Add {
        build: String,
        instruction: String,
        version: String,
    },
    /// Unpin an instruction from a build
    Remove { build: String, instruction: String },
    /// Submit a draft for approval
    Submit { build: String },
    /// Approve a pending build
    Approve { build: String },
    /// Reject a pending build
    Reject {
        build: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Make an approved build the main build
    Promote { build: String },
    /// Diff two builds (`from` is the old side)
    Diff {
        from: String,
        to: String,
        /// Include version payloads and changed fields
        #[arg(long)]
        detailed: bool,
    },
    /// Approve and promote a build, merging it onto main if stale
    Publish { build: String },
    /// Restore main to the snapshot of an earlier approved build
    Rollback { target: String },
    /// Show the current main build
    Main,
}

#[derive(Clone, Copy, ValueEnum)]
enum LoadModeArg {
    Always,
    Intelligent,
    Disabled,
}

impl From<LoadModeArg> for LoadMode {
    fn from(arg: LoadModeArg) -> Self {
        match arg {
            LoadModeArg::Always => LoadMode::Always,
            LoadModeArg::Intelligent => LoadMode::Intelligent,
            LoadModeArg::Disabled => LoadMode::Disabled,
        }
    }
}

/// Sources a caller may start a build or instruction from.
#[derive(Clone, Copy, ValueEnum)]
enum SourceArg {
    User,
    Git,
    Ai,
}

impl From<SourceArg> for BuildSource {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::User => BuildSource::User,
            SourceArg::Git => BuildSource::Git,
            SourceArg::Ai => BuildSource::Ai,
        }
    }
}

impl From<SourceArg> for InstructionSource {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::User => InstructionSource::User,
            SourceArg::Git => InstructionSource::Git,
            SourceArg::Ai => InstructionSource::Ai,
        }
    }
}

fn parse_reference(raw: &str) -> std::result::Result<InstructionReference, String> {
    match raw.split_once(':') {
        Some((kind, id)) if !kind.is_empty() && !id.is_empty() => {
            Ok(InstructionReference::new(kind, id))
        }
        _ => Err(format!("expected `type:id`, got `{}`", raw)),
    }
}

impl VersionArgs {
    fn into_draft(self) -> VersionDraft {
        let mut draft = VersionDraft::new(self.text)
            .with_title(self.title)
            .with_load_mode(self.load_mode.into());
        draft.category = self.category;
        draft.references = self.references;
        draft
    }
}

/// Caller identity shared by every command.
struct Caller {
    org: OrgId,
    user: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let format = if cli.json {
        LogFormat::Json
    } else {
        LogFormat::from_env()
    };
    init_tracing(format, level);

    let handle = SurrealHandle::setup_from_env()
        .await
        .context("Failed to connect to instruction build database")?;
    let service = BuildService::new(SurrealContentStore::new(Arc::new(handle)));
    let ctx = Caller {
        org: OrgId::from(cli.org),
        user: cli.user,
    };

    let output = run(&service, &ctx, cli.command).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run(service: &Service, ctx: &Caller, command: Commands) -> Result<Value> {
    match command {
        Commands::Instruction { action } => run_instruction(service, ctx, action).await,
        Commands::Build { action } => run_build(service, ctx, action).await,
    }
}

async fn run_instruction(service: &Service, ctx: &Caller, action: InstructionAction) -> Result<Value> {
    let store = service.store();
    match action {
        InstructionAction::Create { version, source } => {
            let instruction = store
                .insert_instruction(Instruction::new(ctx.org.clone(), source.into()))
                .await
                .context("failed to create instruction")?;
            let version = store
                .create_version(&instruction.id, version.into_draft())
                .await
                .context("failed to create first version")?;
            debug!(instruction_id = %instruction.id, "instruction created");
            Ok(json!({ "instruction": instruction, "version": version }))
        }
        InstructionAction::Version {
            instruction,
            version,
        } => {
            let id = owned_instruction(service, ctx, &instruction).await?;
            let version = store
                .create_version(&id, version.into_draft())
                .await
                .context("failed to create version")?;
            Ok(serde_json::to_value(version)?)
        }
        InstructionAction::Delete { instruction } => {
            let id = owned_instruction(service, ctx, &instruction).await?;
            store
                .soft_delete_instruction(&id)
                .await
                .context("failed to delete instruction")?;
            Ok(serde_json::to_value(store.get_instruction(&id).await?)?)
        }
        InstructionAction::Show { instruction } => {
            let id = owned_instruction(service, ctx, &instruction).await?;
            Ok(serde_json::to_value(store.get_instruction(&id).await?)?)
        }
    }
}

async fn run_build(service: &Service, ctx: &Caller, action: BuildAction) -> Result<Value> {
    let value = match action {
        BuildAction::Create {
            source,
            empty,
            branch,
        } => {
            let mut request =
                NewBuild::new(ctx.org.clone(), source.into()).with_created_by(ctx.user.as_str());
            if empty {
                request = request.empty();
            }
            if let Some(label) = branch {
                request = request.with_branch_label(label);
            }
            serde_json::to_value(service.create_build(request).await?)?
        }
        BuildAction::Show { build } => {
            serde_json::to_value(service.get_build_for_org(&ctx.org, &BuildId::from(build)).await?)?
        }
        BuildAction::List {
            status,
            page,
            per_page,
        } => serde_json::to_value(
            service
                .list_builds(&ctx.org, status, &Page::new(page, per_page))
                .await?,
        )?,
        BuildAction::Contents { build } => {
            let id = owned_build(service, ctx, &build).await?;
            serde_json::to_value(service.list_build_contents(&id).await?)?
        }
        BuildAction::Add {
            build,
            instruction,
            version,
        } => {
            let id = owned_build(service, ctx, &build).await?;
            let result = service
                .add_instruction(
                    &id,
                    &InstructionId::from(instruction),
                    &VersionId::from(version),
                )
                .await?;
            serde_json::to_value(result)?
        }
        BuildAction::Remove { build, instruction } => {
            let id = owned_build(service, ctx, &build).await?;
            let result = service
                .remove_instruction(&id, &InstructionId::from(instruction))
                .await?;
            serde_json::to_value(result)?
        }
        BuildAction::Submit { build } => {
            let id = owned_build(service, ctx, &build).await?;
            serde_json::to_value(service.submit_build(&id).await?)?
        }
        BuildAction::Approve { build } => {
            let id = owned_build(service, ctx, &build).await?;
            serde_json::to_value(service.approve_build(&id, &ctx.user).await?)?
        }
        BuildAction::Reject { build, reason } => {
            let id = owned_build(service, ctx, &build).await?;
            serde_json::to_value(
                service
                    .reject_build(&id, &ctx.user, reason.as_deref())
                    .await?,
            )?
        }
        BuildAction::Promote { build } => {
            let id = owned_build(service, ctx, &build).await?;
            serde_json::to_value(service.promote_build(&id).await?)?
        }
        BuildAction::Diff { from, to, detailed } => {
            let (from, to) = (BuildId::from(from), BuildId::from(to));
            if detailed {
                service.get_build_for_org(&ctx.org, &from).await?;
                service.get_build_for_org(&ctx.org, &to).await?;
                serde_json::to_value(service.detailed_diff(&from, &to).await?)?
            } else {
                serde_json::to_value(service.diff_builds(&ctx.org, &from, &to).await?)?
            }
        }
        BuildAction::Publish { build } => {
            let id = owned_build(service, ctx, &build).await?;
            let outcome = service.publish(&id, &ctx.user).await.map_err(|err| {
                if err.is_retryable() {
                    anyhow::Error::new(err).context("publish raced another publish; run it again")
                } else {
                    err.into()
                }
            })?;
            serde_json::to_value(outcome)?
        }
        BuildAction::Rollback { target } => serde_json::to_value(
            service
                .rollback(&ctx.org, &BuildId::from(target), &ctx.user)
                .await?,
        )?,
        BuildAction::Main => serde_json::to_value(service.get_main_build(&ctx.org).await?)?,
    };
    Ok(value)
}

/// Resolve a build id, refusing builds of other organizations.
async fn owned_build(service: &Service, ctx: &Caller, raw: &str) -> Result<BuildId> {
    let build = service
        .get_build_for_org(&ctx.org, &BuildId::from(raw))
        .await?;
    Ok(build.id)
}

/// Resolve an instruction id, refusing instructions of other organizations.
async fn owned_instruction(service: &Service, ctx: &Caller, raw: &str) -> Result<InstructionId> {
    match service
        .store()
        .get_instruction(&InstructionId::from(raw))
        .await?
    {
        Some(instruction) if instruction.org_id == ctx.org => Ok(instruction.id),
        _ => anyhow::bail!("instruction not found: {}", raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn service() -> Service {
        BuildService::new(SurrealContentStore::in_memory().await.unwrap())
    }

    fn ctx() -> Caller {
        Caller {
            org: OrgId::from("acme"),
            user: "tester".to_string(),
        }
    }

    fn parse(args: &[&str]) -> Commands {
        let mut argv = vec!["ibuild"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap().command
    }

    fn id_of(value: &Value, pointer: &str) -> String {
        value
            .pointer(pointer)
            .and_then(Value::as_str)
            .unwrap()
            .to_string()
    }

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "ibuild", "build", "list", "--status", "approved", "--org", "acme", "--json",
        ])
        .unwrap();
        assert_eq!(cli.org, "acme");
        assert!(cli.json);
        assert!(matches!(
            cli.command,
            Commands::Build {
                action: BuildAction::List {
                    status: Some(BuildStatus::Approved),
                    ..
                }
            }
        ));
    }

    #[test]
    fn reference_requires_type_and_id() {
        assert_eq!(
            parse_reference("table:orders").unwrap(),
            InstructionReference::new("table", "orders")
        );
        assert!(parse_reference("orders").is_err());
        assert!(parse_reference(":orders").is_err());
    }

    #[test]
    fn version_args_build_full_draft() {
        let Commands::Instruction {
            action: InstructionAction::Create { version, .. },
        } = parse(&[
            "instruction",
            "create",
            "--text",
            "Prefer CTEs",
            "--category",
            "style",
            "--load-mode",
            "intelligent",
            "--reference",
            "table:orders",
        ])
        else {
            panic!("expected instruction create");
        };
        let draft = version.into_draft();
        assert_eq!(draft.text, "Prefer CTEs");
        assert_eq!(draft.category.as_deref(), Some("style"));
        assert_eq!(draft.load_mode, LoadMode::Intelligent);
        assert_eq!(draft.references.len(), 1);
    }

    #[tokio::test]
    async fn publish_flow_through_commands() {
        let service = service().await;
        let ctx = ctx();

        let created = run(&service, &ctx, parse(&["instruction", "create", "--text", "a"]))
            .await
            .unwrap();
        let instruction = id_of(&created, "/instruction/id");
        let version = id_of(&created, "/version/id");

        let build = run(&service, &ctx, parse(&["build", "create"])).await.unwrap();
        let build_id = id_of(&build, "/id");
        run(
            &service,
            &ctx,
            parse(&["build", "add", &build_id, &instruction, &version]),
        )
        .await
        .unwrap();

        let published = run(&service, &ctx, parse(&["build", "publish", &build_id]))
            .await
            .unwrap();
        assert_eq!(published["merged"], json!(false));
        assert_eq!(published["build"]["is_main"], json!(true));

        let main = run(&service, &ctx, parse(&["build", "main"])).await.unwrap();
        assert_eq!(id_of(&main, "/id"), build_id);

        let shown = run(&service, &ctx, parse(&["instruction", "show", &instruction]))
            .await
            .unwrap();
        assert_eq!(id_of(&shown, "/current_version_id"), version);
    }

    #[tokio::test]
    async fn foreign_builds_are_not_found() {
        let service = service().await;
        let build = run(&service, &ctx(), parse(&["build", "create"])).await.unwrap();
        let other = Caller {
            org: OrgId::from("globex"),
            user: "intruder".to_string(),
        };

        let err = run(&service, &other, parse(&["build", "submit", &id_of(&build, "/id")]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn file_backed_store_serves_commands() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("surrealkv://{}", dir.path().join("ibuild.db").display());
        let handle = SurrealHandle::connect_url(&url).await.unwrap();
        let service = BuildService::new(SurrealContentStore::new(Arc::new(handle)));

        let build = run(&service, &ctx(), parse(&["build", "create", "--empty"]))
            .await
            .unwrap();
        assert_eq!(build["build_number"], json!(1));
        assert_eq!(build["title"], json!("Empty build"));
    }
}
