//! sentential - deploy container images as serverless functions
//!
//! Resolves the deployment context once, selects a driver for the requested
//! target and runs a single command against it. Command results go to stdout
//! as JSON or plain text; logs go to stderr.

mod config;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use config::Settings;
use serde::Serialize;
use sntl_aws::{AwsClients, AwsDriver};
use sntl_core::{Context, ControlPlane, Driver, FilePolicy, Ontology, PolicyTemplate, Target};
use sntl_local::{BollardRuntime, LocalDriver, Publisher};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "sntl")]
#[command(about = "Deploy container images as serverless functions", long_about = None)]
struct Args {
    /// Configuration file (default: sentential.toml, then .sntl/sentential.toml)
    #[arg(long, global = true, env = "SNTL_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info", env = "SNTL_LOG_LEVEL")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deploy an image version
    Deploy {
        /// aws or local
        target: Target,
        /// Image version (tag) to deploy
        #[arg(short, long, default_value = "latest")]
        version: String,
        /// Expose a public endpoint
        #[arg(long)]
        public_url: bool,
    },
    /// Tear down everything a deploy created
    Destroy { target: Target },
    /// Describe the deployed function
    Deployed { target: Target },
    /// List images in the catalog
    Images { target: Target },
    /// Describe one image version
    Image {
        target: Target,
        #[arg(default_value = "latest")]
        version: String,
    },
    /// Tail the function's logs
    Logs {
        target: Target,
        #[arg(short, long)]
        follow: bool,
    },
    /// Invoke the deployed function
    Invoke { target: Target, payload: String },
    /// Push a local image version to the registry
    Publish {
        #[arg(default_value = "latest")]
        version: String,
    },
}

impl Command {
    fn target(&self) -> Option<Target> {
        match self {
            Self::Deploy { target, .. }
            | Self::Destroy { target }
            | Self::Deployed { target }
            | Self::Images { target }
            | Self::Image { target, .. }
            | Self::Logs { target, .. }
            | Self::Invoke { target, .. } => Some(*target),
            Self::Publish { .. } => None,
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn driver(
    target: Target,
    settings: &Settings,
    ontology: Ontology,
    control: ControlPlane,
    policy: Arc<dyn PolicyTemplate>,
) -> anyhow::Result<Box<dyn Driver>> {
    Ok(match target {
        Target::Aws => Box::new(
            AwsDriver::new(ontology, control, policy).with_timings(settings.timings.clone()),
        ),
        Target::Local => {
            let runtime = Arc::new(BollardRuntime::connect().context("connecting to docker")?);
            Box::new(
                LocalDriver::new(ontology, control, runtime, policy)
                    .with_options(settings.local.clone()),
            )
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "sntl={level},sntl_core={level},sntl_aws={level},sntl_local={level}",
                    level = args.log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let settings = Settings::load(args.config.as_deref())?;

    let clients = Arc::new(AwsClients::from_env(settings.region.clone()).await);
    let region = settings
        .region
        .clone()
        .or_else(|| clients.region().map(ToString::to_string))
        .context("no region configured; set SNTL_REGION or AWS_REGION")?;
    let control = clients.control_plane();

    let context = Context::resolve(
        control.tokens.as_ref(),
        settings.repository_name()?,
        region,
        settings.partition.clone(),
    )
    .await?;
    info!(resource = %context.resource_name(), "Resolved deployment context");

    if let Command::Publish { version } = &args.command {
        let runtime = Arc::new(BollardRuntime::connect().context("connecting to docker")?);
        let publisher = Publisher::new(runtime, control.registry.clone(), &context);
        println!("{}", publisher.publish(version).await?);
        return Ok(());
    }

    let ontology = Ontology::new(context, settings.envs.clone(), settings.provision.clone());
    let policy: Arc<dyn PolicyTemplate> = Arc::new(FilePolicy::new(&settings.policy_path));
    let target = args
        .command
        .target()
        .context("command has no target")?;
    let driver = driver(target, &settings, ontology, control, policy)?;

    match args.command {
        Command::Deploy {
            version,
            public_url,
            ..
        } => {
            let image = driver.image(&version).await?;
            println!("{}", driver.deploy(&image, public_url).await?);
        }
        Command::Destroy { .. } => driver.destroy().await?,
        Command::Deployed { .. } => print_json(&driver.deployed().await?)?,
        Command::Images { .. } => print_json(&driver.images().await?)?,
        Command::Image { version, .. } => print_json(&driver.image(&version).await?)?,
        Command::Logs { follow, .. } => driver.logs(follow).await?,
        Command::Invoke { payload, .. } => println!("{}", driver.invoke(&payload).await?),
        Command::Publish { .. } => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_deploy() {
        let args = Args::parse_from(["sntl", "deploy", "aws", "--version", "v2", "--public-url"]);
        match args.command {
            Command::Deploy {
                target,
                version,
                public_url,
            } => {
                assert_eq!(target, Target::Aws);
                assert_eq!(version, "v2");
                assert!(public_url);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_target_aliases() {
        let args = Args::parse_from(["sntl", "logs", "docker", "-f"]);
        assert_eq!(args.command.target(), Some(Target::Local));
        assert!(Args::try_parse_from(["sntl", "destroy", "mars"]).is_err());
    }

    #[test]
    fn test_publish_has_no_target() {
        let args = Args::parse_from(["sntl", "publish", "v3"]);
        assert!(args.command.target().is_none());
    }
}
