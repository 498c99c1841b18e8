use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Connection, SqliteConnection};
use tabula::{ConfigBuilder, MigrateConfig, Migrator};

mod logging;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    #[clap(long, global = true, default_value = tabula::DEFAULT_TARGET_ALIAS,
           help = "Alias the target schema is attached under")]
    target_alias: String,

    #[clap(long, global = true, help = "Directory for the ephemeral target database")]
    temp_dir: Option<PathBuf>,

    #[clap(long, global = true, action = clap::ArgAction::Append,
           help = "Leave objects starting with this prefix alone (repeatable)")]
    ignore_prefix: Vec<String>,

    #[clap(long, global = true, help = "Log as JSON lines")]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reconcile a database with a schema file and commit
    Apply {
        #[clap(short, long, help = "SQLite database file")]
        database: PathBuf,

        #[clap(short, long, help = "Script of CREATE statements describing the wanted schema")]
        schema: PathBuf,

        #[clap(long, help = "Create the database file if it does not exist")]
        create: bool,
    },
    /// Show what apply would change, without changing anything
    Plan {
        #[clap(short, long, help = "SQLite database file")]
        database: PathBuf,

        #[clap(short, long, help = "Script of CREATE statements describing the wanted schema")]
        schema: PathBuf,
    },
}

impl Cli {
    fn config(&self) -> MigrateConfig {
        let mut builder = ConfigBuilder::new().target_alias(&self.target_alias);

        if let Some(dir) = &self.temp_dir {
            builder = builder.target_dir(dir);
        }

        for prefix in &self.ignore_prefix {
            builder = builder.ignore_prefix(prefix);
        }

        builder.build()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.json);

    let migrator = Migrator::new(cli.config());

    match &cli.command {
        Commands::Apply {
            database,
            schema,
            create,
        } => {
            let script = read_schema(schema).await?;
            let mut conn = open(database, *create).await?;

            let plan = migrator
                .migrate_until(&mut conn, &script, interrupted())
                .await
                .with_context(|| format!("failed to migrate {}", database.display()))?;

            conn.close().await?;
            print!("{plan}");
        }
        Commands::Plan { database, schema } => {
            let script = read_schema(schema).await?;
            let mut conn = open(database, false).await?;

            let plan = migrator
                .plan(&mut conn, &script)
                .await
                .with_context(|| format!("failed to plan {}", database.display()))?;

            conn.close().await?;
            print!("{plan}");
        }
    }

    Ok(())
}

async fn read_schema(path: &Path) -> anyhow::Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read schema {}", path.display()))
}

async fn open(path: &Path, create: bool) -> anyhow::Result<SqliteConnection> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(create);

    SqliteConnection::connect_with(&options)
        .await
        .with_context(|| format!("failed to open {}", path.display()))
}

/// Completes on Ctrl-C. Never completes if the signal cannot be listened for.
async fn interrupted() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "cannot listen for Ctrl-C, migration is not cancellable");
        std::future::pending::<()>().await;
    }

    tracing::warn!("interrupted, rolling back");
}
