//! Poll Admin - create polls and print results
//!
//! Usage:
//!   cargo run --bin poll_admin -- add "Favourite language" rust go zig
//!   cargo run --bin poll_admin -- results
//!   cargo run --bin poll_admin -- results --json
//!
//! Environment variables:
//!   BALLOTFLOW_DB_PATH - Poll store (default: data/ballots.db)

use ballotflow::config::PipelineConfig;
use ballotflow::store::{PollStore, SqlitePollStore};
use dotenv::dotenv;
use std::env;

const USAGE: &str = "usage: poll_admin add <title> <option>... | poll_admin results [--json]";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    let config = PipelineConfig::from_env();
    ballotflow::init_logging("warn");

    let args: Vec<String> = env::args().skip(1).collect();
    let store = SqlitePollStore::open(&config.db_path)?;

    match args.first().map(String::as_str) {
        Some("add") => {
            let title = args.get(1).ok_or(USAGE)?;
            let options = &args[2..];
            if options.is_empty() {
                return Err(USAGE.into());
            }
            let poll = store.add_poll(title, options)?;
            println!("created poll {} '{}': {}", poll.id, poll.title, poll.options.join(", "));
        }
        Some("results") => {
            let polls = store.load_polls().await?;
            if args.iter().any(|a| a == "--json") {
                println!("{}", serde_json::to_string_pretty(&polls)?);
            } else {
                for poll in polls {
                    println!("#{} {}", poll.id, poll.title);
                    for option in &poll.options {
                        let count = poll.results.get(option).copied().unwrap_or(0);
                        println!("    {:<24} {}", option, count);
                    }
                }
            }
        }
        _ => return Err(USAGE.into()),
    }

    Ok(())
}
