use anyhow::Result;
use clap::{Parser, Subcommand};
use storage::{Storage, COOKIE_CACHE_KEY, SESSION_CACHE_KEY};

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/booking_cache.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every cache slot.
    ShowCache,
    /// Print the cached session, if any.
    ShowSession,
    /// Remove one slot, or the session and cookie slots when no key is given.
    ClearCache { key: Option<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::ShowCache => {
            for entry in storage.list_entries().await? {
                let updated_at = entry
                    .updated_at
                    .map(|at| at.to_string())
                    .unwrap_or_else(|| "-".into());
                println!("{:<16} {updated_at:<26} {}", entry.key, entry.value);
            }
        }
        Command::ShowSession => match storage.load_session().await? {
            Some(session) => println!(
                "user_id={} username={} email={} admin={}",
                session.user_id, session.display_name, session.email, session.is_admin
            ),
            None => println!("no cached session"),
        },
        Command::ClearCache { key: Some(key) } => {
            let removed = storage.remove_entry(&key).await?;
            println!("{key}: {}", if removed { "removed" } else { "absent" });
        }
        Command::ClearCache { key: None } => {
            for key in [SESSION_CACHE_KEY, COOKIE_CACHE_KEY] {
                let removed = storage.remove_entry(key).await?;
                println!("{key}: {}", if removed { "removed" } else { "absent" });
            }
        }
    }

    Ok(())
}
