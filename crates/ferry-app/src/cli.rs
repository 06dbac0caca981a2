//! Command-line front end: parses arguments, drives one trigger through the
//! orchestrator and maps the result to an exit code.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use ferry_config::CONFIG_PATH_ENV;
use ferry_events::{TransferClass, WorkerResult};
use ferry_runtime::RunStateStore;
use ferry_transfer_core::{
    ChatId, MessageKind, NodeRef, OneShotEvent, TransferError, TransferTrigger,
};
use tracing::{debug, info};

use crate::bootstrap::{build_app, init_logging};
use crate::error::{AppError, AppResult};
use crate::orchestrator::TransferOrchestrator;

/// Exit code of a run that finished without failures.
pub const EXIT_OK: i32 = 0;
/// Exit code when a large operation was not confirmed.
pub const EXIT_DECLINED: i32 = 2;
/// Exit code for configuration, wiring or argument errors.
pub const EXIT_FAILURE: i32 = 3;
/// Exit code when transfers failed, were cancelled or did not finish.
pub const EXIT_TRANSFER_FAILED: i32 = 4;

/// Time allowed for follow-up prompts after the terminal event.
const FOLLOW_UP_GRACE: Duration = Duration::from_millis(250);

#[derive(Parser)]
#[command(name = "ferry", about = "Local transfer orchestration")]
struct Cli {
    #[arg(long, global = true, env = CONFIG_PATH_ENV, help = "Path to a JSON configuration document")]
    config: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        env = "FERRY_SOURCE_ROOT",
        default_value = ".",
        help = "Directory that node paths are resolved against"
    )]
    source_root: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download nodes from the source root.
    Download(DownloadArgs),
    /// Upload local files as chat attachments.
    Upload(UploadArgs),
    /// Finish runs interrupted by a previous process.
    Resume,
    /// Show persisted run records.
    Status,
}

#[derive(Args)]
struct DownloadArgs {
    #[arg(required = true, help = "Node paths relative to the source root")]
    paths: Vec<String>,
    #[arg(long, conflicts_with = "preview", help = "Save a single node for offline use")]
    offline: bool,
    #[arg(long, help = "Fetch a single node into the preview cache")]
    preview: bool,
    #[arg(long, help = "Destination used when a location must be picked")]
    dest: Option<String>,
    #[arg(long, help = "Confirm large downloads")]
    yes: bool,
    #[arg(long, help = "Remember confirmation and picked destination choices")]
    remember: bool,
}

#[derive(Args)]
struct UploadArgs {
    #[arg(long, help = "Target chat identifier")]
    chat: u64,
    #[arg(required = true, help = "Local files to attach")]
    files: Vec<String>,
    #[arg(long, help = "Mark the attachment as a voice clip")]
    voice: bool,
}

/// Answers the driver gives to prompts.
#[derive(Debug, Clone, Default)]
pub struct Answers {
    /// Location handed to the destination picker; `None` cancels it.
    pub destination: Option<String>,
    /// Whether large operations are confirmed.
    pub confirm_large: bool,
    /// Whether confirmation opt-outs and picked locations are remembered.
    pub remember: bool,
}

/// How a driven trigger ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Every transfer finished.
    Succeeded,
    /// The pass ended with a failure message.
    Failed(String),
    /// A large operation needed confirmation that was not given.
    Declined {
        /// Human-readable payload size.
        size_label: String,
    },
}

impl Verdict {
    /// Process exit code for the verdict.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Succeeded => EXIT_OK,
            Self::Failed(_) => EXIT_TRANSFER_FAILED,
            Self::Declined { .. } => EXIT_DECLINED,
        }
    }
}

/// Parse arguments, execute the command and return the process exit code.
pub async fn run() -> i32 {
    let cli = Cli::parse();
    match dispatch(cli).await {
        Ok(verdict) => verdict.exit_code(),
        Err(err) => {
            eprintln!("error: {}", error_chain(&err));
            EXIT_FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> AppResult<Verdict> {
    let config = ferry_config::load(cli.config.as_deref())
        .await
        .map_err(|err| AppError::config("config.load", err))?;
    init_logging(&config.telemetry)?;

    if matches!(cli.command, Command::Status) {
        let store = RunStateStore::new(&config.storage.state_dir);
        print_status(&store).await?;
        return Ok(Verdict::Succeeded);
    }

    let app = build_app(config, &cli.source_root).await?;
    match cli.command {
        Command::Download(args) => {
            let trigger = download_trigger(&cli.source_root, &args).await?;
            let answers = Answers {
                destination: args.dest,
                confirm_large: args.yes,
                remember: args.remember,
            };
            drive(&app.orchestrator, trigger, &answers).await
        }
        Command::Upload(args) => {
            let trigger = TransferTrigger::UploadChatAttachment {
                chat_id: ChatId(args.chat),
                sources: args.files,
                is_voice_clip: args.voice,
            };
            drive(&app.orchestrator, trigger, &Answers::default()).await
        }
        Command::Resume => {
            let mut verdict = Verdict::Succeeded;
            for ticket in app.recovered {
                let run_id = ticket.run_id;
                match ticket.finished().await {
                    Some(report) => {
                        println!("run {run_id}: {}", report.outcome.as_str());
                        if report.outcome.worker_result() == WorkerResult::Failure {
                            verdict = Verdict::Failed(report.outcome.as_str().to_string());
                        }
                    }
                    None => verdict = Verdict::Failed(format!("run {run_id} vanished")),
                }
            }
            Ok(verdict)
        }
        Command::Status => Ok(Verdict::Succeeded),
    }
}

/// Start `trigger` and answer prompts until the pass ends.
///
/// # Errors
///
/// Returns [`AppError::Transfer`] when a remembered choice cannot be written.
pub async fn drive(
    orchestrator: &TransferOrchestrator,
    trigger: TransferTrigger,
    answers: &Answers,
) -> AppResult<Verdict> {
    let mut events = orchestrator.events();
    orchestrator.start(trigger).await;

    let mut verdict = None;
    loop {
        let changed = if verdict.is_some() {
            matches!(
                tokio::time::timeout(FOLLOW_UP_GRACE, events.changed()).await,
                Ok(Ok(()))
            )
        } else {
            events.changed().await.is_ok()
        };
        if !changed {
            break;
        }
        let Some(event) = orchestrator.consume_one_off_event() else {
            continue;
        };
        debug!(event = ?event, "one-off event");
        match event {
            OneShotEvent::AskDestination { .. } => {
                if answers.destination.is_none() {
                    eprintln!("a destination must be picked; pass --dest");
                }
                if !orchestrator.provide_destination(answers.destination.clone()) {
                    debug!("destination answered after the picker closed");
                }
            }
            OneShotEvent::ConfirmLargeOperation {
                size_label,
                trigger,
            } => {
                if !answers.confirm_large {
                    println!("{size_label} to download; rerun with --yes to continue");
                    return Ok(Verdict::Declined { size_label });
                }
                info!(size = %size_label, remember = answers.remember, "large operation confirmed");
                orchestrator
                    .start_without_confirmation(trigger, answers.remember)
                    .await;
            }
            OneShotEvent::FinishProcessing {
                error,
                total_nodes,
                total_files,
                already_downloaded,
            } => {
                println!(
                    "{total_nodes} items, {total_files} files, {already_downloaded} already present"
                );
                verdict = Some(error.map_or(Verdict::Succeeded, |error| {
                    println!("{error}");
                    Verdict::Failed(error.to_string())
                }));
            }
            OneShotEvent::Message(kind) => {
                println!("{kind}");
                if is_failure(kind) {
                    return Ok(Verdict::Failed(kind.to_string()));
                }
            }
            OneShotEvent::PromptSaveDestination { path } => {
                let saved = if answers.remember {
                    println!("remembering {path} as the download location");
                    orchestrator.save_destination(path).await
                } else {
                    orchestrator.dismiss_save_destination(false).await
                };
                saved.map_err(|source| AppError::Transfer {
                    operation: "orchestrator.save_destination",
                    source,
                })?;
            }
        }
    }
    Ok(verdict.unwrap_or_else(|| {
        Verdict::Failed(TransferError::TransferCancelled.to_string())
    }))
}

const fn is_failure(kind: MessageKind) -> bool {
    matches!(
        kind,
        MessageKind::NotConnected
            | MessageKind::TransferCancelled
            | MessageKind::InsufficientSpace
            | MessageKind::StorageOverQuota
    )
}

async fn download_trigger(source_root: &Path, args: &DownloadArgs) -> AppResult<TransferTrigger> {
    let mut nodes = nodes_from_paths(source_root, &args.paths).await?;
    if !args.offline && !args.preview {
        return Ok(TransferTrigger::DownloadNodes {
            nodes,
            high_priority: false,
        });
    }
    if nodes.len() != 1 {
        return Err(AppError::InvalidArgument {
            field: "paths",
            reason: "single_node_required",
            value: Some(args.paths.join(" ")),
        });
    }
    let node = nodes.remove(0);
    Ok(if args.preview {
        TransferTrigger::DownloadForPreview { node }
    } else {
        TransferTrigger::DownloadForOffline {
            node,
            high_priority: false,
        }
    })
}

/// Map slash-separated paths under `source_root` to node handles.
///
/// # Errors
///
/// Returns [`AppError::InvalidArgument`] for empty paths or paths naming `.`
/// or `..`.
pub async fn nodes_from_paths(source_root: &Path, paths: &[String]) -> AppResult<Vec<NodeRef>> {
    let mut nodes = Vec::with_capacity(paths.len());
    for (index, raw) in paths.iter().enumerate() {
        let trimmed = raw.trim().trim_matches('/');
        let (parent, name) = trimmed.rsplit_once('/').unwrap_or(("", trimmed));
        if name.is_empty() || name == "." || name == ".." {
            return Err(AppError::InvalidArgument {
                field: "paths",
                reason: "invalid_node_path",
                value: Some(raw.clone()),
            });
        }
        let parent_path = format!("/{parent}");
        let id = u64::try_from(index + 1).unwrap_or(u64::MAX);
        let is_folder = tokio::fs::metadata(source_root.join(trimmed))
            .await
            .is_ok_and(|meta| meta.is_dir());
        nodes.push(if is_folder {
            NodeRef::folder(id, name, parent_path)
        } else {
            NodeRef::file(id, name, parent_path)
        });
    }
    Ok(nodes)
}

async fn print_status(store: &RunStateStore) -> AppResult<()> {
    for class in TransferClass::ALL {
        let record = store
            .load(class)
            .await
            .map_err(|err| AppError::runtime("run_state.load", err))?;
        match record {
            Some(record) => println!(
                "{class}: run {} with {} requests, {} of {} transfers finished",
                record.run_id,
                record.requests.len(),
                record.totals.finished(),
                record.totals.total_transfers
            ),
            None => println!("{class}: idle"),
        }
    }
    Ok(())
}

fn error_chain(err: &dyn Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
