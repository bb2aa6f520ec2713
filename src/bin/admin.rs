//! Operational CLI for the governance control plane.

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rule_governance::authorization::{Permission, Principal};
use rule_governance::catalog::registry::RegistryPublisher;
use rule_governance::catalog::CatalogService;
use rule_governance::compiler;
use rule_governance::config::AppConfig;
use rule_governance::database::{schema, Database};
use rule_governance::storage;

#[derive(Parser)]
#[command(name = "admin", about = "Rule governance administration")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply database migrations.
    Migrate,
    /// Print the SQL schema without touching any database.
    PrintSchema,
    /// Install the standard field catalog (idempotent).
    SeedFields,
    /// Publish the next field registry version to object storage.
    PublishRegistry {
        #[arg(long, default_value = "admin-cli")]
        actor: String,
    },
    /// Compile a ruleset version offline and print its checksum.
    Compile {
        ruleset_version_id: String,
        /// Also print the canonical artifact bytes.
        #[arg(long)]
        print_artifact: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rule_governance=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    if let Commands::PrintSchema = cli.command {
        print!(
            "{}\n{}\n{}",
            schema::INITIAL_SCHEMA,
            schema::APPROVALS_AUDIT_SCHEMA,
            schema::MANIFESTS_SCHEMA
        );
        return Ok(());
    }

    let config = AppConfig::load().context("loading configuration")?;
    let database = Database::new(config.database.admin_url())
        .await
        .context("connecting to database")?;

    match cli.command {
        Commands::Migrate => {
            database.run_migrations().await?;
            println!("migrations applied");
        }
        Commands::SeedFields => {
            database.run_migrations().await?;
            let catalog = CatalogService::new(database.clone());
            let seeded = catalog.seed_standard_fields("system").await?;
            println!("seeded {} standard fields", seeded);
        }
        Commands::PublishRegistry { actor } => {
            let catalog = CatalogService::new(database.clone());
            let store = storage::build_store(&config.storage)?;
            let publisher =
                RegistryPublisher::new(catalog, store, config.storage.prefix.clone());
            let principal = Principal::new(actor, [Permission::PublishRegistry]);
            let manifest = publisher.publish(&principal).await?;
            println!(
                "published field registry v{} ({} fields) {}",
                manifest.registry_version, manifest.field_count, manifest.checksum
            );
        }
        Commands::Compile {
            ruleset_version_id,
            print_artifact,
        } => {
            let catalog = CatalogService::new(database.clone());
            let fields = catalog.get_active_catalog().await?;
            let mut conn = database.pool().acquire().await?;
            let artifact = compiler::compile(&mut conn, &fields, &ruleset_version_id).await?;
            println!("{}", artifact.checksum);
            if print_artifact {
                println!("{}", String::from_utf8_lossy(&artifact.bytes));
            }
        }
        Commands::PrintSchema => unreachable!("handled above"),
    }

    Ok(())
}
