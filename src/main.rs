use clap::{Parser, Subcommand};
use sitesmith::config::{self, BuildConfig, BuildMode, Overrides};
use sitesmith::output;
use sitesmith::publish::{DirectoryPublisher, GitPagesPublisher, Publisher};
use sitesmith::site::{self, Site};
use sitesmith::{serve, watch};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "sitesmith")]
#[command(about = "Static site builder with incremental rebuilds")]
#[command(long_about = "\
Static site builder with incremental rebuilds

Pages are markdown files with optional YAML front matter, rendered into Tera
layouts. Stylesheets are compiled from SCSS, scripts are copied (development)
or minified and fingerprinted (distribution).

Project structure:

  project/
  ├── site.toml                 # Optional config (see gen-config)
  └── app/
      ├── content/              # index.md → index.html, other files copied
      ├── templates/            # default.html and other layouts
      ├── styles/main.scss      # Stylesheet entry point
      └── scripts/              # Script sources

Asset regions in templates are bundled in distribution builds:

  <!-- build:css styles/vendor.css -->
  <link rel=\"stylesheet\" href=\"styles/normalize.css\">
  <!-- endbuild -->

Without a subcommand, sitesmith builds, watches and serves the output.")]
#[command(version = version_string())]
struct Cli {
    /// Project root (the directory holding site.toml)
    #[arg(long, default_value = ".", global = true)]
    project: PathBuf,

    /// Distribution build: bundled, minified, fingerprinted assets
    #[arg(short, long, global = true)]
    dist: bool,

    /// Dev server host
    #[arg(short = 'H', long, global = true)]
    host: Option<String>,

    /// Dev server port
    #[arg(short, long, global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Clear the output and build everything
    Build,
    /// Build, then rebuild on changes and serve the output
    Serve,
    /// Rebuild on changes without serving
    Watch,
    /// Distribution build handed to a publisher
    Publish {
        /// Mirror into this directory instead of pushing to git
        #[arg(long)]
        target: Option<PathBuf>,
    },
    /// Empty the output directory
    Clean,
    /// Run named tasks and their dependencies
    Run {
        #[arg(required = true)]
        tasks: Vec<String>,
        /// Print the execution levels instead of running
        #[arg(long)]
        plan: bool,
    },
    /// List registered tasks
    Tasks,
    /// Print a stock site.toml with all options documented
    GenConfig,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sitesmith=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::print_error(e.as_ref());
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let command = cli.command.unwrap_or(Command::Serve);
    if let Command::GenConfig = command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let overrides = Overrides {
        dist: cli.dist,
        host: cli.host,
        port: cli.port,
    };
    let config = BuildConfig::load(&cli.project, overrides)?;

    match command {
        Command::Build => {
            let report = Site::new(config)?.build()?;
            output::print_build_summary(&report);
        }
        Command::Serve => {
            let site = Arc::new(Site::new(config.clone())?);
            let report = site.build()?;
            output::print_build_summary(&report);
            start_watcher(Arc::clone(&site))?;
            output::print_serving(&config.output, &config.host, config.port);
            serve::serve(&config.output, &config.host, config.port)?;
        }
        Command::Watch => {
            let site = Arc::new(Site::new(config)?);
            watch::watch(site, Arc::new(watch::ConsoleNotifier))?;
        }
        Command::Publish { target } => {
            let config = config.with_mode(BuildMode::Distribution);
            let publisher: Arc<dyn Publisher> = match target {
                Some(dir) => Arc::new(DirectoryPublisher::new(dir)),
                None => Arc::new(GitPagesPublisher::new(
                    &config.project_root,
                    &config.publish,
                )),
            };
            let report = Site::new(config)?
                .with_publisher(publisher)
                .run(&[site::PUBLISH])?;
            output::print_build_summary(&report);
        }
        Command::Clean => {
            Site::new(config.clone())?.run(&[site::CLEANUP])?;
            println!("Cleared {}", config.output.display());
        }
        Command::Run { tasks, plan } => {
            let site = Site::new(config)?;
            let names: Vec<&str> = tasks.iter().map(String::as_str).collect();
            if plan {
                output::print_plan(&site.graph().plan(&names)?);
            } else {
                output::print_build_summary(&site.run(&names)?);
            }
        }
        Command::Tasks => {
            output::print_tasks(Site::new(config)?.graph());
        }
        Command::GenConfig => unreachable!("handled before loading the config"),
    }

    Ok(())
}

fn start_watcher(site: Arc<Site>) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("watch".into())
        .spawn(move || {
            if let Err(e) = watch::watch(site, Arc::new(watch::ConsoleNotifier)) {
                warn!(error = %e, "Watcher stopped");
            }
        })?;
    Ok(())
}
