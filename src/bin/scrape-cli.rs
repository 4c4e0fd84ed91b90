use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "scrape-cli")]
#[command(about = "Management CLI for the scrape coordinator", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:7071")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a manual scrape of every unbooked target date
    Trigger,
    /// Start a batch scrape
    Batch {
        #[arg(short, long, default_value = "batch")]
        source: String,
        /// Skip target dates before today
        #[arg(long)]
        upcoming: bool,
    },
    /// Scrape a single date (YYYY-MM-DD)
    Date { date: String },
    /// Show today's rate-limit record
    Status,
    /// Report a status for a day's record, as the scraper would
    Mark {
        date: String,
        /// pending, running, completed or failed
        status: String,
    },
    /// Show version and circuit breaker state
    Admin,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let res = match cli.command {
        Commands::Trigger => client.post(format!("{base}/scrape")).send().await?,
        Commands::Batch { source, upcoming } => {
            client
                .post(format!("{base}/scrape/batch"))
                .json(&json!({ "source": source, "upcomingOnly": upcoming }))
                .send()
                .await?
        }
        Commands::Date { date } => {
            client
                .post(format!("{base}/scrape/date"))
                .json(&json!({ "date": date }))
                .send()
                .await?
        }
        Commands::Status => client.get(format!("{base}/scrape/status")).send().await?,
        Commands::Mark { date, status } => {
            client
                .put(format!("{base}/scrape/status"))
                .json(&json!({ "id": format!("rate-limit-{date}"), "date": date, "status": status }))
                .send()
                .await?
        }
        Commands::Admin => client.get(format!("{base}/admin/status")).send().await?,
    };

    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;

    match serde_json::from_str::<Value>(&text) {
        Ok(json) if status.is_success() => println!("{}", serde_json::to_string_pretty(&json)?),
        Ok(json) => {
            eprintln!("Error: API returned status {}", status);
            eprintln!("{}", serde_json::to_string_pretty(&json)?);
        }
        Err(_) => {
            eprintln!("Error: API returned status {}", status);
            eprintln!("Response: {}", text);
        }
    }
    Ok(())
}
