use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use davcopy::config::DEFAULT_CA_PATH;
use davcopy::token::DEFAULT_TOKEN_LIFETIME;
use davcopy::{
    Activity, ClientParameters, CredentialLocator, EnvCredentialLocator, TransferOptions,
};
use miette::{Context, IntoDiagnostic};
use tracing_subscriber::EnvFilter;

/// Third-party copies between HTTP/WebDAV endpoints, authorised with macaroons
#[derive(Parser)]
#[command(name = "davcopy")]
#[command(author, version)]
#[command(after_help = "EXAMPLES:
    # Ask the source to push a file to the destination
    davcopy copy https://source.example.org/data/f https://dest.example.org/data/f

    # Only request a macaroon
    davcopy macaroon https://dest.example.org/data/f UPLOAD LIST
")]
struct Cli {
    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// User certificate (defaults to the proxy or grid certificate)
    #[arg(long, global = true)]
    cert: Option<PathBuf>,

    /// User private key (defaults to the certificate)
    #[arg(long, global = true)]
    key: Option<PathBuf>,

    /// Directory with trusted CA certificates
    #[arg(long, default_value = DEFAULT_CA_PATH, global = true)]
    capath: PathBuf,

    /// Do not verify the remote certificates
    #[arg(long, global = true)]
    insecure: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Trigger a third-party copy from SOURCE to DESTINATION
    Copy {
        source: String,
        destination: String,

        /// Lifetime of the destination token (0s for no expiry)
        #[arg(long, default_value = "5m", value_parser = humantime::parse_duration)]
        lifetime: Duration,
    },

    /// Request a macaroon for URL and print it
    Macaroon {
        url: String,

        /// Activities the macaroon should allow (UPLOAD, LIST, DOWNLOAD, ...).
        /// Names the server defines itself are passed through.
        #[arg(required = true, value_parser = parse_activity)]
        activities: Vec<Activity>,

        /// Macaroon lifetime (0s for no expiry)
        #[arg(long, value_parser = humantime::parse_duration)]
        lifetime: Option<Duration>,
    },
}

fn parse_activity(s: &str) -> Result<Activity, String> {
    s.parse().map_err(|e: davcopy::Error| e.to_string())
}

fn setup_tracing(debug: bool) {
    let default = if debug {
        "davcopy=debug,info"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

// An explicit --cert wins; otherwise ask the locator.
fn client_parameters(
    cli: &Cli,
    locator: &impl CredentialLocator,
) -> miette::Result<ClientParameters> {
    let (cert, key) = match &cli.cert {
        Some(cert) => (cert.clone(), cli.key.clone().unwrap_or_default()),
        None => locator
            .locate()
            .into_diagnostic()
            .wrap_err("failed to find user credentials")?,
    };

    Ok(ClientParameters::new(cert, key, &cli.capath).with_insecure(cli.insecure))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    setup_tracing(cli.debug);

    let params = client_parameters(&cli, &EnvCredentialLocator::new())?;

    match &cli.command {
        Commands::Copy {
            source,
            destination,
            lifetime,
        } => {
            let options = TransferOptions::new(*lifetime);
            davcopy::do_third_party_copy_with(&params, &options, source, destination)
                .await
                .into_diagnostic()
                .wrap_err_with(|| format!("copy from {} to {} failed", source, destination))?;
            tracing::info!("Copy finished");
        }
        Commands::Macaroon {
            url,
            activities,
            lifetime,
        } => {
            let lifetime = lifetime.unwrap_or(DEFAULT_TOKEN_LIFETIME);
            let token = davcopy::get_token(&params, lifetime, url, activities.clone())
                .await
                .into_diagnostic()
                .wrap_err_with(|| format!("failed to get a macaroon for {}", url))?;
            println!("Macaroon: {}", token.macaroon);
            println!("URL + Macaroon: {}", token.uri.target_with_macaroon);
        }
    }

    Ok(())
}
