use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use client_core::{
    dialogs::{FieldError, SubmitOutcome, UploadedPdf},
    AppContext, ClientError, ClientEvent, CollectionDetailView, CollectionRow, CollectionsView,
    ExamApi, HttpExamApi, NoticeLevel, PdfPane, PollState, TokenSource, TriggerOutcome, Viewing,
};
use shared::domain::{AnsPdfId, CollectionId, PdfKind};
use storage::Storage;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, normalize_database_url, Settings, DEFAULT_CONFIG_FILE};

#[derive(Parser, Debug)]
#[command(name = "admin_cli", about = "Administer exam collections on the evaluation backend")]
struct Cli {
    /// Settings file; missing files are ignored.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[arg(long, global = true)]
    api_base_url: Option<String>,
    #[arg(long, global = true)]
    database_url: Option<String>,
    #[arg(long, global = true)]
    poll_interval_ms: Option<u64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage the stored bearer token.
    #[command(subcommand)]
    Token(TokenCommand),
    #[command(subcommand)]
    Collections(CollectionsCommand),
    #[command(subcommand)]
    Upload(UploadCommand),
    /// Start the backend evaluation of a collection.
    Evaluate {
        collection: CollectionId,
        /// Wait until the backend reports the collection evaluated.
        #[arg(long)]
        watch: bool,
    },
    Results {
        collection: CollectionId,
    },
    /// Download a document to disk.
    #[command(subcommand)]
    Pdf(PdfCommand),
}

#[derive(Subcommand, Debug)]
enum TokenCommand {
    Set { token: String },
    Show,
    Clear,
}

#[derive(Args, Debug)]
struct CollectionFields {
    #[arg(long)]
    branch: Option<String>,
    #[arg(long)]
    department: Option<String>,
    #[arg(long)]
    school: Option<String>,
}

#[derive(Subcommand, Debug)]
enum CollectionsCommand {
    List,
    Show {
        id: CollectionId,
    },
    Create {
        name: String,
        #[command(flatten)]
        fields: CollectionFields,
    },
    Edit {
        id: CollectionId,
        #[arg(long)]
        name: Option<String>,
        #[command(flatten)]
        fields: CollectionFields,
    },
    Delete {
        id: CollectionId,
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
enum UploadCommand {
    AnswerSheet { collection: CollectionId, file: PathBuf },
    QuestionPaper { collection: CollectionId, file: PathBuf },
}

#[derive(Subcommand, Debug)]
enum PdfCommand {
    AnswerSheet {
        collection: CollectionId,
        pdf_id: AnsPdfId,
        #[arg(long)]
        out: PathBuf,
    },
    QuestionPaper {
        collection: CollectionId,
        #[arg(long)]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = resolve_settings(&cli)?;
    let database_url = normalize_database_url(&settings.database_url);
    let storage = Storage::new(&database_url)
        .await
        .with_context(|| format!("failed to open local storage at '{database_url}'"))?;

    let command = match cli.command {
        Command::Token(command) => return run_token(&storage, command).await,
        command => command,
    };

    let tokens: Arc<dyn TokenSource> = Arc::new(storage);
    let api: Arc<dyn ExamApi> = Arc::new(HttpExamApi::new(&settings.api_base_url, tokens)?);
    let ctx = AppContext::new(api);
    let mut notices = ctx.subscribe_events();
    info!(api_base_url = %settings.api_base_url, "admin_cli: connected");

    let result = run(&ctx, &settings, command, &mut notices).await;
    print_notices(&mut notices);
    if let Err(err) = &result {
        if let Some(client_err) = err.downcast_ref::<ClientError>() {
            if client_err.requires_reauth() {
                eprintln!("hint: store a token with `admin_cli token set <token>`");
            }
        }
    }
    result
}

fn resolve_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = load_settings(&cli.config)?;
    if let Some(v) = &cli.api_base_url {
        settings.api_base_url = v.clone();
    }
    if let Some(v) = &cli.database_url {
        settings.database_url = v.clone();
    }
    if let Some(v) = cli.poll_interval_ms {
        settings.poll_interval_ms = v;
    }
    settings.validate()?;
    Ok(settings)
}

async fn run_token(storage: &Storage, command: TokenCommand) -> Result<()> {
    match command {
        TokenCommand::Set { token } => {
            storage.save_access_token(&token).await?;
            println!("Access token saved.");
        }
        TokenCommand::Show => match storage.access_token().await? {
            Some(token) => {
                let saved_at = storage
                    .access_token_saved_at()
                    .await?
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_default();
                println!("{} (saved {saved_at})", mask_token(&token));
            }
            None => println!("No access token stored."),
        },
        TokenCommand::Clear => {
            if storage.clear_access_token().await? {
                println!("Access token cleared.");
            } else {
                println!("No access token stored.");
            }
        }
    }
    Ok(())
}

async fn run(
    ctx: &AppContext,
    settings: &Settings,
    command: Command,
    notices: &mut broadcast::Receiver<ClientEvent>,
) -> Result<()> {
    match command {
        Command::Token(_) => bail!("token commands do not use the backend"),
        Command::Collections(command) => run_collections(ctx, command).await,
        Command::Upload(command) => {
            let (collection_id, file, kind) = match command {
                UploadCommand::AnswerSheet { collection, file } => {
                    (collection, file, PdfKind::AnswerSheet)
                }
                UploadCommand::QuestionPaper { collection, file } => {
                    (collection, file, PdfKind::QuestionPaper)
                }
            };
            let view = CollectionDetailView::mount(ctx.clone(), collection_id).await?;
            let mut dialog = view.upload_dialog(kind);
            dialog.open();
            dialog.select_path(&file).await?;
            match dialog.submit().await {
                SubmitOutcome::Success(UploadedPdf::AnswerSheet(pdf)) => {
                    println!("{}  {}", pdf.id, pdf.name)
                }
                SubmitOutcome::Success(UploadedPdf::QuestionPaper(pdf)) => {
                    println!("{}  {}", pdf.id, pdf.name)
                }
                SubmitOutcome::ValidationError(errors) => bail!(field_errors(&errors)),
                SubmitOutcome::ServerError(err) => return Err(err.into()),
            }
            Ok(())
        }
        Command::Evaluate { collection, watch } => {
            let mut view =
                CollectionDetailView::mount_with_period(ctx.clone(), collection, settings.poll_interval())
                    .await?;
            match view.start_evaluation().await? {
                TriggerOutcome::Started { message } => info!(%message, "admin_cli: evaluation accepted"),
                TriggerOutcome::Ignored(reason) => {
                    println!("Evaluation not started: {reason:?}");
                    return Ok(());
                }
            }
            print_notices(notices);
            if watch {
                watch_until_evaluated(&mut view, notices).await?;
                println!("{}", view.open_results().await.render());
            }
            view.unmount();
            Ok(())
        }
        Command::Results { collection } => {
            let mut view = CollectionDetailView::mount(ctx.clone(), collection).await?;
            println!("{}", view.open_results().await.render());
            Ok(())
        }
        Command::Pdf(command) => {
            let (collection, out) = match &command {
                PdfCommand::AnswerSheet {
                    collection, out, ..
                }
                | PdfCommand::QuestionPaper { collection, out } => (*collection, out.clone()),
            };
            let mut view = CollectionDetailView::mount(ctx.clone(), collection).await?;
            let viewing = match command {
                PdfCommand::AnswerSheet { pdf_id, .. } => Viewing::AnswerSheet(pdf_id),
                PdfCommand::QuestionPaper { .. } => {
                    let snapshot = view.snapshot().await?;
                    let Some(paper) = snapshot.question_paper else {
                        bail!("no question paper has been uploaded for collection {collection}");
                    };
                    Viewing::QuestionPaper(paper.id)
                }
            };
            view.select(Some(viewing));
            match view.view_pdf().await? {
                PdfPane::Document { bytes, .. } => {
                    tokio::fs::write(&out, bytes.as_slice())
                        .await
                        .with_context(|| format!("failed to write '{}'", out.display()))?;
                    println!("Saved {} bytes to {}", bytes.len(), out.display());
                    Ok(())
                }
                pane => bail!(pane.message().unwrap_or_default().to_string()),
            }
        }
    }
}

async fn run_collections(ctx: &AppContext, command: CollectionsCommand) -> Result<()> {
    let view = CollectionsView::new(ctx.clone());
    match command {
        CollectionsCommand::List => {
            let rows = view.load().await?;
            if rows.is_empty() {
                println!("No collections yet.");
            }
            for row in &rows {
                print_row(row);
            }
        }
        CollectionsCommand::Show { id } => {
            let mut detail = CollectionDetailView::mount(ctx.clone(), id).await?;
            let snapshot = detail.snapshot().await?;
            print_row(&CollectionRow::from(&snapshot.collection));
            println!(
                "question paper: {}",
                snapshot
                    .question_paper
                    .as_ref()
                    .map_or("(none)", |paper| paper.name.as_str())
            );
            println!("answer sheets: {}", snapshot.answer_sheets.len());
            for sheet in &snapshot.answer_sheets {
                println!("  {}  {}", sheet.id, sheet.name);
            }
            println!(
                "evaluation: {}{}",
                snapshot.control.label,
                if snapshot.control.enabled { "" } else { " (unavailable)" }
            );
        }
        CollectionsCommand::Create { name, fields } => {
            let mut dialog = view.add_dialog();
            dialog.open();
            dialog.form.name = name;
            dialog.form.branch = fields.branch.unwrap_or_default();
            dialog.form.department = fields.department.unwrap_or_default();
            dialog.form.school = fields.school.unwrap_or_default();
            let created = submitted(dialog.submit().await)?;
            print_row(&CollectionRow::from(&created));
        }
        CollectionsCommand::Edit { id, name, fields } => {
            let current = ctx.collection(id).await?;
            let mut dialog = view.edit_dialog(current);
            dialog.open();
            if let Some(name) = name {
                dialog.form.name = name;
            }
            if let Some(branch) = fields.branch {
                dialog.form.branch = branch;
            }
            if let Some(department) = fields.department {
                dialog.form.department = department;
            }
            if let Some(school) = fields.school {
                dialog.form.school = school;
            }
            let updated = submitted(dialog.submit().await)?;
            print_row(&CollectionRow::from(&updated));
        }
        CollectionsCommand::Delete { id, yes } => {
            let current = ctx.collection(id).await?;
            let mut dialog = view.delete_dialog(current);
            dialog.open();
            if !yes && !confirm(&dialog.prompt())? {
                println!("Cancelled.");
                return Ok(());
            }
            submitted(dialog.confirm().await)?;
        }
    }
    Ok(())
}

async fn watch_until_evaluated(
    view: &mut CollectionDetailView,
    notices: &mut broadcast::Receiver<ClientEvent>,
) -> Result<()> {
    let mut state = view.watch_poll_state();
    println!("Waiting for the evaluation to finish (Ctrl-C to stop watching)...");
    loop {
        if *state.borrow_and_update() == PollState::Idle {
            return Ok(());
        }
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!(collection_id = %view.collection_id(), "admin_cli: stopped watching");
                bail!("stopped watching; the evaluation keeps running on the backend");
            }
        }
        print_notices(notices);
    }
}

fn submitted<T>(outcome: SubmitOutcome<T>) -> Result<T> {
    match outcome {
        SubmitOutcome::Success(value) => Ok(value),
        SubmitOutcome::ValidationError(errors) => bail!(field_errors(&errors)),
        SubmitOutcome::ServerError(err) => Err(err.into()),
    }
}

fn field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|error| format!("{}: {}", error.field, error.message))
        .collect::<Vec<_>>()
        .join("; ")
}

fn print_notices(notices: &mut broadcast::Receiver<ClientEvent>) {
    while let Ok(event) = notices.try_recv() {
        match event {
            ClientEvent::Notice(notice) => match notice.level {
                NoticeLevel::Success => println!("{}", notice.message),
                NoticeLevel::Error => eprintln!("error: {}", notice.message),
            },
            ClientEvent::EvaluationStateChanged { state, .. } => {
                info!(?state, "admin_cli: evaluation state changed")
            }
        }
    }
}

fn print_row(row: &CollectionRow) {
    println!(
        "{}  {:<24} {:<10} {:<14} {:<14} {}",
        row.id, row.name, row.branch, row.department, row.school, row.status
    );
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

fn mask_token(token: &str) -> String {
    let visible: String = token.chars().take(6).collect();
    if token.chars().count() <= 6 {
        "*".repeat(token.chars().count())
    } else {
        format!("{visible}...")
    }
}
