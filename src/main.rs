// src/main.rs
//! sitepkr - CLI entry point

use anyhow::Result;
use clap::{Parser, Subcommand};
use sitepkr::planner::{InstallOptions, RpmSpec, UpdateMode};
use sitepkr::{Context, ContextOptions};

#[derive(Parser)]
#[command(name = "sitepkr")]
#[command(version)]
#[command(about = "Installs RPM packages under a relocatable site root", long_about = None)]
struct Cli {
    /// Site root directory (defaults to $MYSITEROOT, then the profile default)
    #[arg(short = 's', long, global = true)]
    siteroot: Option<String>,

    /// Deployment profile
    #[arg(short = 't', long = "type", global = true, default_value = "lhcb")]
    profile: String,

    /// Enable debug logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install RPMs (name, name-version, or name-version-release)
    Install {
        /// Package specs
        #[arg(required = true)]
        packages: Vec<String>,

        /// Bypass dependency checks
        #[arg(long)]
        force: bool,

        /// Do not install package dependencies
        #[arg(long)]
        nodeps: bool,

        /// Show what would be installed without installing
        #[arg(long)]
        dry_run: bool,
    },

    /// Install a whole project from the repositories
    InstallProject {
        /// Project name (e.g. BRUNEL)
        project: String,

        /// Project version (e.g. v45r1)
        version: Option<String>,

        /// Release
        release: Option<String>,

        /// Comma-separated list of (regex) platforms to install
        /// (defaults to $CMTCONFIG; "all" accepts every platform)
        #[arg(long)]
        platforms: Option<String>,

        /// Bypass dependency checks
        #[arg(long)]
        force: bool,

        /// Do not install package dependencies
        #[arg(long)]
        nodeps: bool,

        /// Update the database but do not modify the filesystem
        #[arg(long)]
        justdb: bool,

        /// Show what would be installed without installing
        #[arg(long)]
        dry_run: bool,
    },

    /// Remove installed RPMs
    #[command(alias = "rm")]
    Remove {
        /// Package specs
        #[arg(required = true)]
        packages: Vec<String>,

        /// Force removal (--nodeps)
        #[arg(long)]
        force: bool,

        /// Show what would be removed without removing
        #[arg(long)]
        dry_run: bool,
    },

    /// Update installed RPMs from the repositories
    Update {
        /// Accept version bumps too, not only release bumps
        #[arg(long)]
        upgrade: bool,

        /// Update the database but do not modify the filesystem
        #[arg(long)]
        justdb: bool,

        /// Show what would be updated without updating
        #[arg(long)]
        dry_run: bool,
    },

    /// Check for available updates without applying them
    Check {
        /// Report version bumps too, not only release bumps
        #[arg(long)]
        upgrade: bool,
    },

    /// List repository packages matching the patterns
    List {
        name: Option<String>,
        version: Option<String>,
        release: Option<String>,
    },

    /// List installed packages matching the patterns
    Installed {
        name: Option<String>,
        version: Option<String>,
        release: Option<String>,
    },

    /// List the dependencies of a package
    Deps {
        name: String,
        version: Option<String>,
        release: Option<String>,
    },

    /// Dump the dependency graph in DOT format
    DepGraph {
        name: Option<String>,
        version: Option<String>,
        release: Option<String>,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// List installed packages providing a file
    Provides {
        /// Filename pattern (regex)
        file: String,
    },

    /// Pass arguments through to the rpm binary
    Rpm {
        /// Arguments after `--`
        #[arg(required = true, last = true)]
        args: Vec<String>,
    },

    /// Add a repository
    RepoAdd {
        name: String,
        url: String,
    },

    /// List configured repositories
    RepoLs,

    /// Remove a repository
    RepoRm {
        name: String,
    },

    /// Print version information
    Version,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(if cli.verbose { "debug" } else { "info" })
            }),
        )
        .with_target(false)
        .init();

    if let Err(err) = run(cli) {
        eprintln!("**error** {err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    if matches!(cli.command, Commands::Version) {
        println!("sitepkr version {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let dry_run = match &cli.command {
        Commands::Install { dry_run, .. }
        | Commands::InstallProject { dry_run, .. }
        | Commands::Remove { dry_run, .. }
        | Commands::Update { dry_run, .. } => *dry_run,
        _ => false,
    };
    let just_db = matches!(
        &cli.command,
        Commands::Update { justdb: true, .. } | Commands::InstallProject { justdb: true, .. }
    );

    let mut ctx = Context::new(ContextOptions {
        profile: cli.profile,
        siteroot: cli.siteroot,
        dry_run,
        just_db,
        local_only: false,
    })?;

    match cli.command {
        Commands::Install {
            packages,
            force,
            nodeps,
            ..
        } => {
            let specs: Vec<RpmSpec> = packages.iter().map(|s| RpmSpec::parse(s)).collect();
            let opts = InstallOptions {
                no_deps: nodeps,
                force,
                update: false,
            };
            ctx.install(&specs, &opts)?;
        }

        Commands::InstallProject {
            project,
            version,
            release,
            platforms,
            force,
            nodeps,
            ..
        } => {
            let opts = InstallOptions {
                no_deps: nodeps,
                force,
                update: false,
            };
            ctx.install_project(
                &project,
                version.as_deref().unwrap_or(""),
                release.as_deref().unwrap_or(""),
                platforms.as_deref().unwrap_or(""),
                &opts,
            )?;
        }

        Commands::Remove {
            packages, force, ..
        } => {
            let specs: Vec<RpmSpec> = packages.iter().map(|s| RpmSpec::parse(s)).collect();
            ctx.remove(&specs, force)?;
        }

        Commands::Update { upgrade, .. } => {
            let mode = if upgrade {
                UpdateMode::Upgrade
            } else {
                UpdateMode::Update
            };
            ctx.update(mode, false)?;
        }

        Commands::Check { upgrade } => {
            let mode = if upgrade {
                UpdateMode::Upgrade
            } else {
                UpdateMode::Update
            };
            ctx.update(mode, true)?;
        }

        Commands::List {
            name,
            version,
            release,
        } => {
            ctx.list(
                name.as_deref().unwrap_or(""),
                version.as_deref().unwrap_or(""),
                release.as_deref().unwrap_or(""),
            )?;
        }

        Commands::Installed {
            name,
            version,
            release,
        } => {
            ctx.list_installed(
                name.as_deref().unwrap_or(""),
                version.as_deref().unwrap_or(""),
                release.as_deref().unwrap_or(""),
            )?;
        }

        Commands::Deps {
            name,
            version,
            release,
        } => {
            ctx.list_deps(
                &name,
                version.as_deref().unwrap_or(""),
                release.as_deref().unwrap_or(""),
            )?;
        }

        Commands::DepGraph {
            name,
            version,
            release,
            output,
        } => {
            let dot = ctx.dep_graph(
                name.as_deref().unwrap_or(""),
                version.as_deref().unwrap_or(""),
                release.as_deref().unwrap_or(""),
            )?;
            match output {
                Some(path) => std::fs::write(path, dot)?,
                None => print!("{dot}"),
            }
        }

        Commands::Provides { file } => {
            ctx.provides(&file)?;
        }

        Commands::Rpm { args } => {
            ctx.rpm(&args)?;
        }

        Commands::RepoAdd { name, url } => {
            ctx.repo_add(&name, &url)?;
        }

        Commands::RepoLs => {
            ctx.repo_ls()?;
        }

        Commands::RepoRm { name } => {
            ctx.repo_rm(&name)?;
        }

        Commands::Version => unreachable!("handled above"),
    }

    Ok(())
}
