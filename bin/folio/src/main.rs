mod commands;

use clap::{Args, Parser, Subcommand};
use folio_core::NotebookHints;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::Context;

#[derive(Parser)]
#[command(name = "folio")]
#[command(about = "Drive a NotebookLM account from the command line", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Run the browser with a visible window
    #[arg(long, global = true)]
    show_browser: bool,

    /// Save a screenshot and page HTML when the page misbehaves
    #[arg(long, global = true)]
    debug: bool,

    /// Print machine-readable JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    /// State directory (defaults to $FOLIO_HOME or ~/.folio)
    #[arg(long, global = true)]
    home: Option<PathBuf>,
}

/// Which notebook a command targets. At most one may be given; with none the
/// remembered default is used.
#[derive(Args, Debug, Default)]
#[group(multiple = false)]
struct NotebookArgs {
    /// Full notebook URL
    #[arg(long)]
    notebook_url: Option<String>,

    /// Notebook id
    #[arg(long)]
    notebook_id: Option<String>,

    /// Notebook name (fuzzy match)
    #[arg(long)]
    notebook_name: Option<String>,
}

impl From<NotebookArgs> for NotebookHints {
    fn from(args: NotebookArgs) -> Self {
        NotebookHints {
            url: args.notebook_url,
            id: args.notebook_id,
            name: args.notebook_name,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the stored browser session
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },

    /// Ask a notebook a question
    Ask {
        /// The question to submit
        question: String,

        #[command(flatten)]
        notebook: NotebookArgs,
    },

    /// Manage the sources of a notebook
    Sources {
        #[command(subcommand)]
        command: SourcesCommands,
    },

    /// Manage notebooks
    Notebooks {
        #[command(subcommand)]
        command: NotebooksCommands,
    },

    /// Remove leftovers of crashed sessions
    Cleanup {
        /// Actually delete; without this only a preview is shown
        #[arg(long)]
        confirm: bool,

        /// Also remove the stored session and the default notebook
        #[arg(long)]
        all: bool,
    },
}

#[derive(Subcommand)]
enum AuthCommands {
    /// Sign in through a visible browser window
    Setup,
    /// Show whether a usable session is stored
    Status,
    /// Delete the stored session
    Clear,
}

#[derive(Subcommand)]
enum SourcesCommands {
    /// Add a website or YouTube URL
    AddUrl {
        url: String,
        #[command(flatten)]
        notebook: NotebookArgs,
    },
    /// Upload a local file
    AddFile {
        path: PathBuf,
        #[command(flatten)]
        notebook: NotebookArgs,
    },
    /// List sources with their active state
    List {
        #[command(flatten)]
        notebook: NotebookArgs,
    },
    /// Remove a source (preview unless --confirm)
    Remove {
        /// Source name or a distinctive part of it
        source: String,
        #[arg(long)]
        confirm: bool,
        #[command(flatten)]
        notebook: NotebookArgs,
    },
    /// Save the text extracted from a source to a file
    Download {
        /// Source name or a distinctive part of it
        source: String,
        /// Destination file (default: a new file under the downloads directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        notebook: NotebookArgs,
    },
    /// Flip, activate or deactivate a source for answering
    Toggle {
        source: String,
        #[arg(long, conflicts_with = "deactivate")]
        activate: bool,
        #[arg(long)]
        deactivate: bool,
        #[command(flatten)]
        notebook: NotebookArgs,
    },
}

#[derive(Subcommand)]
enum NotebooksCommands {
    /// List notebooks in the account
    List,
    /// Create a notebook
    Create {
        #[arg(long)]
        name: Option<String>,
    },
    /// Delete a notebook (preview unless --confirm)
    Delete {
        #[arg(long)]
        confirm: bool,
        #[command(flatten)]
        notebook: NotebookArgs,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let json = cli.json;
    if let Err(e) = run(cli).await {
        commands::output::print_error(&e, json);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let ctx = Context::new(cli.home, cli.show_browser, cli.debug, cli.json)?;

    match cli.command {
        Commands::Auth { command } => match command {
            AuthCommands::Setup => commands::auth::setup(&ctx).await?,
            AuthCommands::Status => commands::auth::status(&ctx)?,
            AuthCommands::Clear => commands::auth::clear(&ctx)?,
        },
        Commands::Ask { question, notebook } => {
            commands::ask::run(&ctx, notebook.into(), question).await?;
        }
        Commands::Sources { command } => match command {
            SourcesCommands::AddUrl { url, notebook } => {
                commands::sources::add_url(&ctx, notebook.into(), url).await?;
            }
            SourcesCommands::AddFile { path, notebook } => {
                commands::sources::add_file(&ctx, notebook.into(), path).await?;
            }
            SourcesCommands::List { notebook } => {
                commands::sources::list(&ctx, notebook.into()).await?;
            }
            SourcesCommands::Remove {
                source,
                confirm,
                notebook,
            } => {
                commands::sources::remove(&ctx, notebook.into(), source, confirm).await?;
            }
            SourcesCommands::Download {
                source,
                output,
                notebook,
            } => {
                commands::sources::download(&ctx, notebook.into(), source, output).await?;
            }
            SourcesCommands::Toggle {
                source,
                activate,
                deactivate,
                notebook,
            } => {
                commands::sources::toggle(&ctx, notebook.into(), source, activate, deactivate).await?;
            }
        },
        Commands::Notebooks { command } => match command {
            NotebooksCommands::List => commands::notebooks::list(&ctx).await?,
            NotebooksCommands::Create { name } => commands::notebooks::create(&ctx, name).await?,
            NotebooksCommands::Delete { confirm, notebook } => {
                commands::notebooks::delete(&ctx, notebook.into(), confirm).await?;
            }
        },
        Commands::Cleanup { confirm, all } => commands::cleanup::run(&ctx, confirm, all)?,
    }

    Ok(())
}
