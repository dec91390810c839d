use anyhow::{anyhow, Context, Result};
use ck_core::{CryptoManager, ManagerConfig, SealedHalf};
use clap::{Parser, Subcommand};
use tracing::debug;

#[derive(Parser)]
#[command(name = "ck")]
#[command(about = "Chatkeys key management and message encryption", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a fresh random identity handle
    Identity,

    /// Generate and store a key pair for an identity
    Setup {
        /// Identity to store the keys under (generated if omitted)
        #[arg(long)]
        identity: Option<String>,
        /// Display name
        #[arg(long)]
        name: String,
    },

    /// Show the stored public record for an identity
    Show {
        #[arg(long)]
        identity: String,
    },

    /// Encrypt a message; prints the envelope as JSON
    Encrypt {
        #[arg(long)]
        identity: String,
        /// Recipient public key (base64)
        #[arg(long)]
        recipient: String,
        /// Sender public key (base64); defaults to the identity's own key
        #[arg(long)]
        sender: Option<String>,
        #[arg(long)]
        message: String,
    },

    /// Decrypt one envelope half
    Decrypt {
        #[arg(long)]
        identity: String,
        /// Counterpart public key (base64)
        #[arg(long)]
        counterpart: String,
        /// Envelope half as JSON: {"encrypted": "...", "nonce": "..."}
        #[arg(long)]
        half: String,
    },

    /// Replace the identity's key pair, keeping the passcode
    Rotate {
        #[arg(long)]
        identity: String,
    },

    /// Delete the stored keys for an identity
    Forget {
        #[arg(long)]
        identity: String,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ck_core=info,ck_store=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn read_passcode(prompt: &str) -> Result<String> {
    let passcode = rpassword::prompt_password(prompt).context("failed to read passcode")?;
    if passcode.is_empty() {
        return Err(anyhow!("passcode must not be empty"));
    }
    Ok(passcode)
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = ManagerConfig::from_env().context("invalid configuration")?;
    debug!("[cli] database: {:?}", config.db_path);
    let manager = CryptoManager::open(&config)
        .await
        .context("failed to open key store")?;

    let outcome = run(&manager, cli.command).await;
    manager.shutdown().await;
    outcome
}

async fn run(manager: &CryptoManager, command: Commands) -> Result<()> {
    match command {
        Commands::Identity => {
            println!("{}", manager.generate_identity());
        }

        Commands::Setup { identity, name } => {
            let identity = identity.unwrap_or_else(|| manager.generate_identity());
            let passcode = read_passcode("New passcode: ")?;
            if read_passcode("Repeat passcode: ")? != passcode {
                return Err(anyhow!("passcodes do not match"));
            }
            let setup = manager.setup_user_keys(&name, &passcode).await?;
            let record = manager
                .store_user_keys(&identity, &setup, &passcode)
                .await
                .with_context(|| format!("failed to store keys for {identity}"))?;
            print_json(&serde_json::json!({
                "identity": identity,
                "name": setup.name,
                "publicKey": record.public_key,
                "createdAt": record.created_at,
            }))?;
        }

        Commands::Show { identity } => {
            let record = manager.key_record(&identity).await?;
            print_json(&record)?;
        }

        Commands::Encrypt {
            identity,
            recipient,
            sender,
            message,
        } => {
            let passcode = read_passcode("Passcode: ")?;
            manager.unlock(&identity, &passcode).await?;
            let sender = match sender {
                Some(sender) => sender,
                None => manager.key_record(&identity).await?.public_key,
            };
            let envelope = manager
                .encrypt_message(&message, &recipient, &sender, &identity)
                .await?;
            print_json(&envelope)?;
        }

        Commands::Decrypt {
            identity,
            counterpart,
            half,
        } => {
            let half: SealedHalf =
                serde_json::from_str(&half).context("--half is not a valid envelope half")?;
            let passcode = read_passcode("Passcode: ")?;
            manager.unlock(&identity, &passcode).await?;
            let message = manager
                .decrypt_message(&half, &counterpart, &identity)
                .await?;
            print_json(&message)?;
        }

        Commands::Rotate { identity } => {
            let passcode = read_passcode("Passcode: ")?;
            let record = manager.rotate_keys(&identity, &passcode).await?;
            print_json(&record)?;
        }

        Commands::Forget { identity } => {
            let removed = manager.forget_device(&identity).await?;
            print_json(&serde_json::json!({ "identity": identity, "removed": removed }))?;
        }
    }
    Ok(())
}
