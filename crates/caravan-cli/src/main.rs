//! Caravan CLI - layer values from templated files and drive workflows

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "caravan")]
#[command(author = "Caravan Contributors")]
#[command(version)]
#[command(about = "Declarative deployment workflows for Kubernetes", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Additional value files, rendered as templates before merging
    #[arg(short = 't', long = "template", global = true)]
    templates: Vec<PathBuf>,

    /// Explicit KEY=VALUE overrides
    #[arg(long = "value", global = true)]
    values: Vec<String>,

    /// Build the named image (NAME=REF)
    #[arg(long = "build", global = true)]
    builds: Vec<String>,

    /// Look up the digest of the named image (NAME=REF)
    #[arg(long = "tag", global = true)]
    tags: Vec<String>,

    /// Kubernetes config file
    #[arg(long = "kube-config", global = true)]
    kube_config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the given workflow, installing resources that do not exist
    /// and upgrading those that do
    Run {
        /// Workflow file
        workflow: PathBuf,

        /// Purge all stages, top-down
        #[arg(short, long)]
        destroy: bool,

        /// Force install / upgrade / delete
        #[arg(short, long)]
        force: bool,

        /// Only deploy the named stage and its dependencies
        #[arg(short, long)]
        until: Option<String>,

        /// Context directory for image builds
        #[arg(short = 'c', long, default_value = ".")]
        context: PathBuf,

        /// Namespace to search for the release daemon
        #[arg(short = 'n', long = "tillerName", default_value = "kube-system")]
        tiller_name: String,

        /// Port to connect to on the release daemon
        #[arg(short = 'p', long = "tillerPort", default_value_t = 44134)]
        tiller_port: u16,

        /// Helm configuration directory
        #[arg(long = "helm-config")]
        helm_config: Option<PathBuf>,
    },

    /// Template and deploy a single Kubernetes spec
    #[command(alias = "kubernetes")]
    Kube {
        /// Manifest file
        spec: PathBuf,

        /// Namespace to deploy into
        #[arg(short, long)]
        namespace: String,
    },

    /// Print the layered values
    #[command(alias = "out")]
    Output {
        /// Emit KEY=VALUE lines instead of JSON
        #[arg(short = 'e', long = "to-env")]
        to_env: bool,
    },

    /// Print version information
    Version {
        /// Only output the version
        #[arg(long)]
        short: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let globals = commands::Globals {
        templates: cli.templates,
        values: cli.values,
        builds: cli.builds,
        tags: cli.tags,
        kube_config: cli.kube_config,
    };

    match cli.command {
        Commands::Run {
            workflow,
            destroy,
            force,
            until,
            context,
            tiller_name,
            tiller_port,
            helm_config,
        } => {
            commands::run::run(
                globals,
                commands::run::Options {
                    workflow,
                    destroy,
                    force,
                    until,
                    context,
                    tiller_name,
                    tiller_port,
                    helm_config,
                },
            )
            .await
        }

        Commands::Kube { spec, namespace } => commands::kube::run(globals, &spec, &namespace).await,

        Commands::Output { to_env } => commands::output::run(globals, to_env).await,

        Commands::Version { short } => {
            commands::version::run(short);
            Ok(())
        }
    }
}
