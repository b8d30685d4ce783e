use clap::{Parser, Subcommand};
use pkg_types::lease::Lease;
use pkg_types::status::LeaderStatus;
use tracing::info;

#[derive(Parser)]
#[command(name = "lease-electorctl", about = "Query a running lease-elector")]
struct Cli {
    /// Status API endpoint
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show whether the instance is currently leader
    Leader,
    /// Show the lease record as stored
    Lease {
        /// Print the raw JSON record
        #[arg(long)]
        json: bool,
    },
}

fn url(server: &str, path: &str) -> String {
    format!("{}{}", server.trim_end_matches('/'), path)
}

fn print_lease(lease: &Lease) {
    let spec = lease.spec.clone().unwrap_or_default();
    let time = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
            .unwrap_or_else(|| "-".to_string())
    };
    println!(
        "Lease:        {}/{}",
        lease.metadata.namespace, lease.metadata.name
    );
    println!("Holder:       {}", lease.holder().unwrap_or("(free)"));
    println!(
        "Duration:     {}",
        spec.lease_duration_seconds
            .map(|d| format!("{}s", d))
            .unwrap_or_else(|| "-".to_string())
    );
    println!("Renewed:      {}", time(spec.renew_time));
    println!("Acquired:     {}", time(spec.acquire_time));
    println!("Transitions:  {}", spec.lease_transitions.unwrap_or(0));
    println!(
        "Version:      {}",
        lease.metadata.resource_version.as_deref().unwrap_or("-")
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match &cli.command {
        Commands::Leader => {
            info!("Querying leader status from {}", cli.server);
            let resp = client.get(url(&cli.server, "/api/v1/leader")).send().await?;
            if !resp.status().is_success() {
                eprintln!("Error: server returned {}", resp.status());
                std::process::exit(1);
            }

            let status: LeaderStatus = resp.json().await?;
            println!("Identity:  {}", status.identity);
            println!("Lease:     {}/{}", status.namespace, status.lease);
            println!("Backend:   {}", status.backend);
            println!("Leader:    {}", if status.leader { "yes" } else { "no" });
        }
        Commands::Lease { json } => {
            info!("Querying lease from {}", cli.server);
            let resp = client.get(url(&cli.server, "/api/v1/lease")).send().await?;
            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                println!("(lease does not exist yet)");
                return Ok(());
            }
            if !resp.status().is_success() {
                eprintln!("Error: server returned {}", resp.status());
                std::process::exit(1);
            }

            let lease: Lease = resp.json().await?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&lease)?);
            } else {
                print_lease(&lease);
            }
        }
    }

    Ok(())
}
