//! CLI for imagewand - natural-language image editing.

use clap::{Args, Parser, Subcommand};
use imagewand::config::CredentialCheck;
use imagewand::{GeminiEditor, GeminiModel, ImageEditor, IntakeOptions, Session};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "imagewand")]
#[command(about = "Edit images by describing the change (Gemini)")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Model identifier (overrides IMAGEWAND_MODEL)
    #[arg(long, global = true)]
    model: Option<String>,

    /// Reject input files larger than this many bytes
    #[arg(long, global = true)]
    max_bytes: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Edit one image and save the result
    Edit(EditArgs),

    /// Interactive editing session
    Session(SessionArgs),

    /// Check that the API key and model are usable
    Check,
}

#[derive(Args)]
struct EditArgs {
    /// Image to edit
    input: PathBuf,

    /// Description of the edit
    prompt: String,

    /// Directory for the edited image
    #[arg(short, long, default_value = ".")]
    output: PathBuf,
}

#[derive(Args)]
struct SessionArgs {
    /// Image to load at start
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Default directory for :save
    #[arg(short, long, default_value = ".")]
    output: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Edit(args) => edit(&cli, args).await?,
        Commands::Session(args) => run_session(&cli, args).await?,
        Commands::Check => check(&cli).await?,
    }

    Ok(())
}

fn build_editor(cli: &Cli, check: CredentialCheck) -> anyhow::Result<GeminiEditor> {
    let mut builder = GeminiEditor::builder().credential_check(check);
    if let Some(ref model) = cli.model {
        builder = builder.model(GeminiModel::from_id(model));
    }
    Ok(builder.build()?)
}

fn build_session(cli: &Cli, check: CredentialCheck) -> anyhow::Result<Session<GeminiEditor>> {
    let mut intake = IntakeOptions::default();
    if let Some(limit) = cli.max_bytes {
        intake = intake.with_max_bytes(limit);
    }
    Ok(Session::new(build_editor(cli, check)?).with_intake_options(intake))
}

async fn edit(cli: &Cli, args: &EditArgs) -> anyhow::Result<()> {
    let session = build_session(cli, CredentialCheck::Eager)?;

    session.upload_path(&args.input).await?;
    session.set_prompt(args.prompt.as_str()).await?;

    let image = match session.generate().await {
        Ok(image) => image,
        Err(e) => anyhow::bail!(e.user_message()),
    };
    let path = session.download(&args.output).await?;

    if cli.json {
        let result = serde_json::json!({
            "success": true,
            "output": path.display().to_string(),
            "mime_type": image.mime_type(),
            "model": session.editor().model(),
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!(
            "Edited image: {} ({}) via {}",
            path.display(),
            image.mime_type(),
            session.editor().name()
        );
    }

    Ok(())
}

async fn check(cli: &Cli) -> anyhow::Result<()> {
    let editor = build_editor(cli, CredentialCheck::Eager)?;
    let outcome = editor.health_check().await;

    if cli.json {
        let result = serde_json::json!({
            "ok": outcome.is_ok(),
            "model": editor.model(),
            "error": outcome.as_ref().err().map(|e| e.user_message()),
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        match &outcome {
            Ok(()) => println!("✓ {} ({})", editor.name(), editor.model()),
            Err(e) => println!("✗ {} ({}): {}", editor.name(), editor.model(), e.user_message()),
        }
    }

    outcome.map_err(Into::into)
}

const SESSION_HELP: &str = "\
Commands:
  load <path>    load an image
  <text>         use text as the instruction and generate
  :regen         run the last edit again
  :save [dir]    save the edited image
  :status        show the session state
  :reset         clear image, prompt and result
  :quit          exit";

async fn run_session(cli: &Cli, args: &SessionArgs) -> anyhow::Result<()> {
    // Lazy so the session opens even before a key is configured.
    let session = build_session(cli, CredentialCheck::Lazy)?;

    if let Some(ref input) = args.input {
        report(session.upload_path(input).await.map(|_| "Image loaded.".to_string()));
    }

    println!("{SESSION_HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (command, rest) = line
            .split_once(char::is_whitespace)
            .map(|(c, r)| (c, r.trim()))
            .unwrap_or((line, ""));

        match command {
            ":quit" | ":q" => break,
            ":help" => println!("{SESSION_HELP}"),
            "load" | ":load" => {
                report(session.upload_path(rest).await.map(|_| "Image loaded.".to_string()));
            }
            ":regen" => {
                report(session.regenerate().await.map(|uri| {
                    format!("Edited image ready ({}). Use :save to download.", uri.mime_type())
                }));
            }
            ":save" => {
                let dir = if rest.is_empty() {
                    args.output.clone()
                } else {
                    PathBuf::from(rest)
                };
                report(
                    session
                        .download(dir)
                        .await
                        .map(|p| format!("Saved {}", p.display())),
                );
            }
            ":status" => {
                let state = session.snapshot().await;
                if cli.json {
                    let result = serde_json::json!({
                        "status": state.status,
                        "image": state.current_image.as_ref().map(|i| i.name.clone()),
                        "prompt": state.current_prompt,
                        "error": state.last_error,
                        "has_result": state.result_image().is_some(),
                    });
                    println!("{}", serde_json::to_string_pretty(&result)?);
                } else {
                    println!("status: {}", state.status);
                    if let Some(image) = &state.current_image {
                        println!("image:  {} ({})", image.name, image.mime_type());
                    }
                    if !state.current_prompt.is_empty() {
                        println!("prompt: {}", state.current_prompt);
                    }
                    if let Some(error) = &state.last_error {
                        println!("error:  {}", error);
                    }
                }
            }
            ":reset" => report(session.reset().await.map(|_| "Session cleared.".to_string())),
            _ => {
                if let Err(e) = session.set_prompt(line).await {
                    report::<String>(Err(e));
                    continue;
                }
                println!("Generating...");
                report(session.generate().await.map(|uri| {
                    format!("Edited image ready ({}). Use :save to download.", uri.mime_type())
                }));
            }
        }
    }

    Ok(())
}

fn report<T: std::fmt::Display>(outcome: imagewand::Result<T>) {
    match outcome {
        Ok(message) => println!("{message}"),
        Err(e) => println!("⚠️ {}", e.user_message()),
    }
}
