#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

mod commands;
mod logging;

use clap::Parser;
use commands::mirrors::SourceArgs;
use commands::SelectorArgs;
use miette::Result;
use rpack_core::Config;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "rpack")]
#[command(author, version, about = "R package repositories, dependency resolution and graphs", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    /// Repositories config file (default: $RPACK_CONFIG, then the user config dir)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Build the dependency graph of packages in a repository
    Graph {
        /// Repository instance to read from
        instance: String,

        /// Root packages (default: every package the instance lists)
        packages: Vec<String>,

        /// Also look up dependencies in this instance (repeatable, searched in order)
        #[arg(long, value_name = "INSTANCE")]
        fallback: Vec<String>,

        /// Follow Suggests
        #[arg(long)]
        suggests: bool,

        /// Follow LinkingTo
        #[arg(long)]
        linkingto: bool,

        /// Maximum depth from a root package
        #[arg(long, default_value_t = 50)]
        max_depth: usize,

        /// Output file (if not specified, prints to stdout)
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,

        /// Output format: gml or json
        #[arg(long, default_value = "gml")]
        format: String,

        #[command(flatten)]
        selector: SelectorArgs,
    },

    /// Install packages and their dependencies into a live R environment
    Clone {
        /// Repository instance to read packages from
        from: String,

        /// R environment instance to install into
        to: String,

        /// Packages to clone (default: every package the source lists)
        packages: Vec<String>,

        /// Reinstall packages that are already installed
        #[arg(long)]
        overwrite: bool,

        /// Only reinstall these packages when they already exist
        #[arg(long, value_delimiter = ',')]
        overwrite_only: Vec<String>,

        /// Write an install script into DIR instead of installing
        #[arg(long, value_name = "DIR")]
        dry_run: Option<PathBuf>,

        #[command(flatten)]
        selector: SelectorArgs,
    },

    /// Download package archives into a folder
    Download {
        /// Repository instance to download from
        instance: String,

        /// Destination folder
        dest: PathBuf,

        /// Packages to download
        #[arg(required = true)]
        packages: Vec<String>,

        /// Downloads in flight (default from the repositories config)
        #[arg(long)]
        concurrency: Option<usize>,

        /// Also download every dependency
        #[arg(long)]
        deps: bool,

        #[command(flatten)]
        selector: SelectorArgs,
    },

    /// Find archives in a repository by glob pattern
    Query {
        /// Repository instance to search
        instance: String,

        /// Glob pattern, e.g. "Rcpp_*"
        pattern: String,

        #[command(flatten)]
        selector: SelectorArgs,
    },

    /// Upload package archives into a repository
    Publish {
        /// Repository instance to publish to
        instance: String,

        /// Archives to publish
        #[arg(required = true)]
        archives: Vec<PathBuf>,

        /// Destination repo folder
        #[arg(long)]
        repo: Option<String>,

        /// Replace archives that already exist
        #[arg(long)]
        overwrite: bool,
    },

    /// Copy a CRAN snapshot or Bioconductor release into a hosted repository
    Mirror {
        /// Instance to copy from (cran, bioc, or any listable instance)
        from: String,

        /// Artifactory or local instance to publish into
        to: String,

        /// Packages to copy (default: everything the source lists)
        packages: Vec<String>,

        /// Destination repo folder
        #[arg(long)]
        repo: Option<String>,

        /// Replace archives that already exist
        #[arg(long)]
        overwrite: bool,

        /// Downloads in flight (default from the repositories config)
        #[arg(long)]
        concurrency: Option<usize>,

        #[command(flatten)]
        source: SourceArgs,
    },

    /// Write a CSV of package metadata across instances
    Scan {
        /// Instances to scan
        #[arg(required = true)]
        instances: Vec<String>,

        /// Output file (if not specified, prints to stdout)
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,

        #[command(flatten)]
        selector: SelectorArgs,
    },

    /// List MRAN snapshot dates grouped by R version
    Snapshots {
        /// Only show snapshots taken for this R version
        #[arg(long, value_name = "X.Y.Z")]
        r_version: Option<String>,
    },

    /// List Bioconductor releases, newest first
    BiocReleases,

    /// Build every configured instance and check its connectivity
    ConfigCheck,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let config = Config::new(cwd)
        .with_verbosity(cli.verbose)
        .with_json_logs(cli.json)
        .with_repos_config(cli.config);

    let Some(command) = cli.command else {
        commands::version::run();
        return Ok(());
    };

    if matches!(command, Commands::Version) {
        commands::version::run();
        return Ok(());
    }

    logging::init(config.verbosity, config.json_logs);

    match command {
        Commands::Version => unreachable!(), // Handled above
        Commands::Graph {
            instance,
            fallback,
            packages,
            suggests,
            linkingto,
            max_depth,
            out,
            format,
            selector,
        } => {
            let span = tracing::info_span!("graph", cmd = "graph", instance = %instance);
            let _guard = span.enter();
            let format = commands::graph::GraphFormat::parse(&format)?;
            let out = out.map(|p| if p.is_absolute() { p } else { config.cwd.join(p) });
            commands::graph::run(
                &config,
                &commands::graph::GraphArgs {
                    instance,
                    fallback,
                    packages,
                    suggests,
                    linkingto,
                    max_depth,
                    out,
                    format,
                    selector,
                },
            )
        }
        Commands::Clone {
            from,
            to,
            packages,
            overwrite,
            overwrite_only,
            dry_run,
            selector,
        } => {
            let span = tracing::info_span!("clone", cmd = "clone", from = %from, to = %to);
            let _guard = span.enter();
            let dry_run = dry_run.map(|p| if p.is_absolute() { p } else { config.cwd.join(p) });
            commands::clone::run(
                &config,
                &commands::clone::CloneArgs {
                    from,
                    to,
                    packages,
                    overwrite,
                    overwrite_only,
                    dry_run,
                    selector,
                },
            )
        }
        Commands::Download {
            instance,
            dest,
            packages,
            concurrency,
            deps,
            selector,
        } => {
            let span = tracing::info_span!("download", cmd = "download", instance = %instance);
            let _guard = span.enter();
            let dest = if dest.is_absolute() { dest } else { config.cwd.join(dest) };
            commands::download::run(
                &config,
                &commands::download::DownloadArgs {
                    instance,
                    dest,
                    packages,
                    concurrency,
                    deps,
                    selector,
                },
            )
        }
        Commands::Query {
            instance,
            pattern,
            selector,
        } => commands::query::run(&config, &instance, &pattern, &selector),
        Commands::Publish {
            instance,
            archives,
            repo,
            overwrite,
        } => {
            let archives = archives
                .into_iter()
                .map(|p| if p.is_absolute() { p } else { config.cwd.join(p) })
                .collect::<Vec<_>>();
            commands::publish::run(&config, &instance, &archives, repo, overwrite)
        }
        Commands::Mirror {
            from,
            to,
            packages,
            repo,
            overwrite,
            concurrency,
            source,
        } => {
            let span = tracing::info_span!("mirror", cmd = "mirror", from = %from, to = %to);
            let _guard = span.enter();
            commands::mirrors::mirror(
                &config,
                &commands::mirrors::MirrorArgs {
                    from,
                    to,
                    packages,
                    repo,
                    overwrite,
                    concurrency,
                    source,
                },
            )
        }
        Commands::Scan {
            instances,
            out,
            selector,
        } => {
            let span = tracing::info_span!("scan", cmd = "scan");
            let _guard = span.enter();
            let out = out.map(|p| if p.is_absolute() { p } else { config.cwd.join(p) });
            commands::scan::run(
                &config,
                &commands::scan::ScanArgs {
                    instances,
                    out,
                    selector,
                },
            )
        }
        Commands::Snapshots { r_version } => {
            commands::mirrors::snapshots(&config, r_version.as_deref())
        }
        Commands::BiocReleases => commands::mirrors::bioc_releases(&config),
        Commands::ConfigCheck => commands::config_check::run(&config),
    }
}
