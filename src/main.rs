use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use fixit::{
    AnthropicClient, AttachmentStore, ConversationController, ImageInput, JsonSecretStore,
    Project, ProjectJsonRepository, ProjectRepository, SecretStore, SendOutcome, API_KEY_SECRET,
};

#[derive(Parser)]
#[command(name = "fixit", about = "AI-assisted household repair guidance")]
struct Args {
    /// Title for the repair project
    #[arg(long, default_value = "New repair project")]
    title: String,

    /// Override the data directory (defaults to the user config dir)
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

fn prompt(text: &str) -> Result<()> {
    print!("{}", text);
    std::io::stdout().flush().context("Failed to flush stdout")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let data_dir = match args.data_dir {
        Some(dir) => dir,
        None => dirs::config_dir()
            .context("Could not determine config directory")?
            .join("fixit"),
    };

    let secrets: Arc<dyn SecretStore> =
        Arc::new(JsonSecretStore::with_path(data_dir.join("secrets.json")));
    let attachments = Arc::new(AttachmentStore::new(data_dir.join("attachments")));
    let repository: Arc<dyn ProjectRepository> =
        Arc::new(ProjectJsonRepository::with_dir(data_dir.join("projects")));

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    if secrets.get(API_KEY_SECRET).await.is_none() {
        prompt("Enter your Anthropic API key: ")?;
        let key = lines
            .next_line()
            .await
            .context("Failed to read API key")?
            .unwrap_or_default();
        let key = key.trim();
        if key.is_empty() {
            anyhow::bail!("An API key is required");
        }
        secrets.set(API_KEY_SECRET, key.to_string()).await?;
        info!("API key saved");
    }

    let completion = Arc::new(AnthropicClient::new(secrets, attachments.clone()));
    let controller = ConversationController::new(repository, completion, attachments);

    let mut project = Project::new(args.title);
    info!(project_id = %project.id(), "Started repair project");

    println!("Describe your repair problem. Commands: /attach <path>, exit");

    let mut pending_images: Vec<ImageInput> = Vec::new();

    loop {
        prompt("> ")?;
        let Some(line) = lines.next_line().await.context("Failed to read input")? else {
            break;
        };
        let line = line.trim();

        if line == "exit" || line == "quit" {
            break;
        }

        if let Some(path) = line.strip_prefix("/attach ") {
            let path = PathBuf::from(path.trim());
            match std::fs::read(&path) {
                Ok(bytes) => {
                    let filename = path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or("attachment")
                        .to_string();
                    println!("Attached {} ({} bytes)", filename, bytes.len());
                    pending_images.push(ImageInput::new(filename, bytes));
                }
                Err(e) => eprintln!("Could not read {}: {}", path.display(), e),
            }
            continue;
        }

        let images = std::mem::take(&mut pending_images);
        match controller.send_message(&mut project, line, images).await {
            Ok(SendOutcome::Sent { reply }) => {
                println!("\n{}\n", reply);
            }
            Ok(SendOutcome::Ignored) => {
                warn!("Nothing to send");
            }
            Err(e) => {
                eprintln!("Send failed: {}", e);
            }
        }
    }

    Ok(())
}
