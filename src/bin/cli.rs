//! Thin smoke-testing CLI for the coordinator's HTTP surface (§6). Not part
//! of the core spec; grounded in the teacher's `src/cli` stub and in
//! `qntx-machi`'s `clap`-derive bot binary.

use clap::{Parser, Subcommand};
use serde_json::json;

#[derive(Parser)]
#[command(name = "coordinator-cli", about = "Submit tasks and inspect a running coordinator")]
struct Cli {
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    base_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit a task description and print the batch result.
    Submit {
        description: String,
        /// Stream SSE events instead of waiting for the batch response.
        #[arg(long)]
        stream: bool,
    },
    /// Fetch status for a previously submitted task.
    Status { task_id: String },
    /// Force one discovery refresh cycle.
    Rediscover,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Command::Submit { description, stream } => {
            let url = format!("{}/task", cli.base_url);
            let body = json!({ "description": description });
            let request = client.post(&url).json(&body);

            if stream {
                let request = request.header("Accept", "text/event-stream");
                let response = request.send().await?;
                let mut bytes = response.bytes_stream();
                use futures::StreamExt;
                while let Some(chunk) = bytes.next().await {
                    let chunk = chunk?;
                    print!("{}", String::from_utf8_lossy(&chunk));
                }
            } else {
                let response = request.send().await?;
                let value: serde_json::Value = response.json().await?;
                println!("{}", serde_json::to_string_pretty(&value)?);
            }
        }
        Command::Status { task_id } => {
            let url = format!("{}/task/{}", cli.base_url, task_id);
            let value: serde_json::Value = client.get(&url).send().await?.json().await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Command::Rediscover => {
            let url = format!("{}/admin/rediscover", cli.base_url);
            let value: serde_json::Value = client.post(&url).send().await?.json().await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }

    Ok(())
}
