//! `shop` — operator CLI.
//!
//! Output contract: one `key=value` pair per line on stdout, errors on
//! stderr with a non-zero exit. Scripts depend on that shape; keep stdout
//! free of logging (tracing goes to stderr).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

mod commands;

use commands::{resolve_config_dir, resolve_mode};

#[derive(Parser)]
#[command(name = "shop")]
#[command(about = "Shop backend operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Layered config inspection
    Config {
        #[command(subcommand)]
        cmd: ConfigCmd,
    },

    /// Catalog management
    Product {
        #[command(subcommand)]
        cmd: ProductCmd,
    },

    /// Account management
    User {
        #[command(subcommand)]
        cmd: UserCmd,
    },

    /// Payment attempt maintenance
    Payments {
        #[command(subcommand)]
        cmd: PaymentsCmd,
    },

    /// Audit trail utilities
    Audit {
        #[command(subcommand)]
        cmd: AuditCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    /// Connectivity probe, schema presence, applied migration count.
    Status,

    /// Apply SQL migrations. Guardrail: refuses when the database already
    /// holds orders unless --yes is provided.
    Migrate {
        /// Acknowledge you are migrating a store that has taken orders.
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum ConfigCmd {
    /// Compute the layered config hash + print canonical JSON.
    Hash {
        /// Config directory (default: $SHOP_CONFIG_DIR or ./config)
        #[arg(long)]
        dir: Option<String>,

        /// Mode overlay (LIVE | SANDBOX | TEST; default: $SHOP_MODE or SANDBOX)
        #[arg(long)]
        mode: Option<String>,
    },

    /// Print one merged config value by JSON pointer.
    Show {
        /// JSON pointer, e.g. /checkout/max_charge_minor
        #[arg(long)]
        pointer: String,

        #[arg(long)]
        dir: Option<String>,

        #[arg(long)]
        mode: Option<String>,
    },
}

#[derive(Subcommand)]
enum ProductCmd {
    /// Insert one product.
    Add {
        #[arg(long)]
        sku: String,

        #[arg(long)]
        name: String,

        /// Decimal price, e.g. 12.34
        #[arg(long)]
        price: String,

        /// Currency code (USD | EUR | GBP)
        #[arg(long)]
        currency: String,

        #[arg(long)]
        stock: i64,

        #[arg(long, default_value = "")]
        description: String,
    },

    /// Bulk upsert from a CSV file (sku,name,description,price,currency,stock).
    Import {
        /// CSV file path
        #[arg(long)]
        csv: String,

        /// Validate and report without writing anything.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },

    /// List products, one per line.
    List {
        /// Include inactive (delisted) products.
        #[arg(long, default_value_t = false)]
        all: bool,
    },
}

#[derive(Subcommand)]
enum UserCmd {
    /// Promote a customer account to admin (audited).
    Promote {
        #[arg(long)]
        email: String,
    },
}

#[derive(Subcommand)]
enum PaymentsCmd {
    /// List (default) or fail stale PENDING payment attempts.
    Sweep {
        /// Only attempts older than this many seconds.
        #[arg(long)]
        older_than_secs: i64,

        /// Actually mark the attempts FAILED; without this, dry-run.
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum AuditCmd {
    /// Verify the hash chain of one audit JSONL file.
    Verify {
        /// Audit file path
        #[arg(long)]
        file: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Silent if the file does not exist.
    let _ = dotenvy::from_filename(".env.local");
    init_tracing_stderr();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => match cmd {
            DbCmd::Status => commands::db_status().await?,
            DbCmd::Migrate { yes } => commands::db_migrate(yes).await?,
        },

        Commands::Config { cmd } => match cmd {
            ConfigCmd::Hash { dir, mode } => {
                let loaded = shop_config::load_dir(resolve_config_dir(dir), resolve_mode(mode)?)?;
                println!("config_hash={}", loaded.config_hash);
                println!("{}", loaded.canonical_json);
            }
            ConfigCmd::Show { pointer, dir, mode } => {
                let loaded = shop_config::load_dir(resolve_config_dir(dir), resolve_mode(mode)?)?;
                let value = loaded
                    .config_json
                    .pointer(&pointer)
                    .with_context(|| format!("no config value at pointer {pointer}"))?;
                println!("{value}");
            }
        },

        Commands::Product { cmd } => match cmd {
            ProductCmd::Add {
                sku,
                name,
                price,
                currency,
                stock,
                description,
            } => commands::product::add(sku, name, price, currency, stock, description).await?,
            ProductCmd::Import { csv, dry_run } => {
                commands::product::import(csv, dry_run).await?
            }
            ProductCmd::List { all } => commands::product::list(all).await?,
        },

        Commands::User { cmd } => match cmd {
            UserCmd::Promote { email } => commands::user_promote(email).await?,
        },

        Commands::Payments { cmd } => match cmd {
            PaymentsCmd::Sweep {
                older_than_secs,
                yes,
            } => commands::payments::sweep(older_than_secs, yes).await?,
        },

        Commands::Audit { cmd } => match cmd {
            AuditCmd::Verify { file } => commands::audit_verify(file)?,
        },
    }

    Ok(())
}

/// Logging goes to stderr so stdout stays pure `key=value`.
fn init_tracing_stderr() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();
}
