#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use clap::{parser::ValueSource, ArgMatches, CommandFactory, FromArgMatches, Parser, Subcommand};
use notesearch::{RuntimeConfig, ScopedKeyIssuer, SubjectId};
use notesearch_client::{ClientConfig, SearchSession};
use notesearch_http::serve;
use notesearch_http::server::{DEFAULT_BIND_ADDR, DEFAULT_CONFIG_PATH};

#[derive(Parser)]
#[command(name = "notesearch")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[arg(long, env = "NOTESEARCH_BIND_ADDR", default_value = DEFAULT_BIND_ADDR)]
    bind_addr: String,

    /// Functions-config JSON holding the `algolia` credentials.
    #[arg(long, env = "NOTESEARCH_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Serve an in-process Algolia-compatible index under /1/indexes (not allowed in production)
    #[arg(long)]
    emulate_index: bool,

    #[arg(long = "env", env = "NOTESEARCH_ENV", default_value = "development")]
    env_mode: String,
}

#[derive(Subcommand)]
enum Command {
    /// Print a scoped search key for a subject
    GenerateKey { subject: String },
    /// Search the notes index as the configured client would
    Search { query: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cmd = Cli::command();
    let matches = cmd.get_matches();
    let cli = Cli::from_arg_matches(&matches)?;

    match cli.command {
        Some(Command::GenerateKey { ref subject }) => run_generate_key(&cli.config, subject),
        Some(Command::Search { ref query }) => run_search(query).await,
        None => {
            check_server_flags(&cli, &matches)
                .map_err(|msg| std::io::Error::new(std::io::ErrorKind::InvalidInput, msg))?;
            std::env::set_var("NOTESEARCH_BIND_ADDR", &cli.bind_addr);
            std::env::set_var("NOTESEARCH_CONFIG", &cli.config);
            std::env::set_var("NOTESEARCH_ENV", &cli.env_mode);
            if cli.emulate_index {
                std::env::set_var("NOTESEARCH_EMULATE_INDEX", "1");
            }
            serve().await
        }
    }
}

fn run_generate_key(config_path: &str, subject: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = RuntimeConfig::load(std::path::Path::new(config_path));
    let issuer = ScopedKeyIssuer::new(config.algolia).with_validity(config.key_validity);
    match SubjectId::new(subject).and_then(|s| issuer.issue(&s)) {
        Ok(key) => {
            println!("{}", key.as_str());
            Ok(())
        }
        Err(e) => {
            eprintln!("ERROR: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run_search(query: &str) -> Result<(), Box<dyn std::error::Error>> {
    let session = SearchSession::from_config(&ClientConfig::from_env())?;
    let response = session.search(query).await?;
    for hit in &response.hits {
        println!("{}", serde_json::to_string(hit)?);
    }
    eprintln!("{} of {} hits", response.hits.len(), response.nb_hits);
    Ok(())
}

fn check_server_flags(cli: &Cli, matches: &ArgMatches) -> Result<(), String> {
    if cli.env_mode != "production" {
        return Ok(());
    }
    if cli.emulate_index {
        return Err("--emulate-index cannot be used in production mode".to_string());
    }
    if !is_set_explicitly(matches, "bind_addr") {
        eprintln!(
            "WARNING: production mode is binding the default address {}",
            DEFAULT_BIND_ADDR
        );
    }
    Ok(())
}

fn is_set_explicitly(matches: &ArgMatches, arg: &str) -> bool {
    matches!(
        matches.value_source(arg),
        Some(ValueSource::CommandLine) | Some(ValueSource::EnvVariable)
    )
}
