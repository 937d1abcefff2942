mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use output::OutputFormat;

/// kiln - build packages from recipes, reusing what was already built
#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

/// Options shared by every command that resolves recipes.
#[derive(Args, Debug, Clone)]
pub struct RecipeArgs {
  /// Defaults set to use (defaults-<name>.sh)
  #[arg(long, default_value = "release")]
  pub defaults: String,

  /// Architecture tag (detected when omitted)
  #[arg(short, long)]
  pub architecture: Option<String>,

  /// Recipe directory [env: KILN_CONFIG_DIR, default: recipes]
  #[arg(short, long)]
  pub config_dir: Option<PathBuf>,

  /// Packages to leave out, comma separated or repeated
  #[arg(long, value_delimiter = ',')]
  pub disable: Vec<String>,

  /// Run system checks for every package, not only those preferring the system
  #[arg(long)]
  pub always_prefer_system: bool,

  /// Never take these packages from the system (`*` for all)
  #[arg(long, num_args = 0..=1, default_missing_value = "*")]
  pub no_system: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
  /// Build packages and everything they depend on
  Build {
    /// Packages to build
    #[arg(required = true)]
    packages: Vec<String>,

    #[command(flatten)]
    recipes: RecipeArgs,

    /// Work directory [env: KILN_WORK_DIR, default: sw]
    #[arg(short, long)]
    work_dir: Option<PathBuf>,

    /// Remote store directory; append ::rw to upload [env: KILN_REMOTE_STORE]
    #[arg(long)]
    remote_store: Option<String>,

    /// Parallel jobs passed to build scripts
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Extra KEY=VALUE for build scripts
    #[arg(short = 'e', value_name = "KEY=VALUE")]
    environment: Vec<String>,

    /// Rebuild these packages even when up to date
    #[arg(long, value_delimiter = ',')]
    force_rebuild: Vec<String>,

    /// Version used for development packages
    #[arg(short = 'z', long)]
    devel_prefix: Option<String>,

    /// Do not treat these checkouts as development packages
    #[arg(long, value_delimiter = ',')]
    no_local: Vec<String>,

    /// Ignore development checkouts altogether
    #[arg(long)]
    force_tracked: bool,

    /// Also remove checked out sources after each build
    #[arg(long)]
    aggressive_cleanup: bool,

    /// Keep build and staging directories
    #[arg(long)]
    no_auto_cleanup: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },

  /// Print the dependency graph of a package in Graphviz format
  Deps {
    /// Package to graph
    package: String,

    #[command(flatten)]
    recipes: RecipeArgs,

    /// Write the graph to this file instead of stdout
    #[arg(long)]
    outdot: Option<PathBuf>,
  },

  /// Check whether packages can be built on this host
  Doctor {
    /// Packages to check
    #[arg(required = true)]
    packages: Vec<String>,

    #[command(flatten)]
    recipes: RecipeArgs,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },

  /// Remove build leftovers from the work directory
  Clean {
    /// Work directory [env: KILN_WORK_DIR, default: sw]
    #[arg(short, long)]
    work_dir: Option<PathBuf>,

    /// Architecture tag (detected when omitted)
    #[arg(short, long)]
    architecture: Option<String>,

    /// Also remove the artifact store and checked out sources
    #[arg(long)]
    aggressive_cleanup: bool,

    /// Only list what would be removed
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },

  /// Show how packages resolve, and the detected architecture
  Info {
    /// Packages to resolve
    packages: Vec<String>,

    #[command(flatten)]
    recipes: RecipeArgs,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match cli.command {
    Commands::Build {
      packages,
      recipes,
      work_dir,
      remote_store,
      jobs,
      environment,
      force_rebuild,
      devel_prefix,
      no_local,
      force_tracked,
      aggressive_cleanup,
      no_auto_cleanup,
      output,
    } => {
      let code = cmd::cmd_build(cmd::BuildArgs {
        packages,
        recipes,
        work_dir,
        remote_store,
        jobs,
        environment,
        force_rebuild,
        devel_prefix,
        no_local,
        force_tracked,
        aggressive_cleanup,
        no_auto_cleanup,
        output,
      })?;
      if code != 0 {
        std::process::exit(code);
      }
    }
    Commands::Deps {
      package,
      recipes,
      outdot,
    } => cmd::cmd_deps(&package, &recipes, outdot.as_deref())?,
    Commands::Info {
      packages,
      recipes,
      output,
    } => cmd::cmd_info(&packages, &recipes, output)?,
    Commands::Doctor {
      packages,
      recipes,
      output,
    } => {
      let code = cmd::cmd_doctor(&packages, &recipes, output)?;
      if code != 0 {
        std::process::exit(code);
      }
    }
    Commands::Clean {
      work_dir,
      architecture,
      aggressive_cleanup,
      dry_run,
      output,
    } => {
      let code = cmd::cmd_clean(work_dir, architecture.as_deref(), aggressive_cleanup, dry_run, output)?;
      if code != 0 {
        std::process::exit(code);
      }
    }
  }

  Ok(())
}
