use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum, ValueHint};
use tracing_subscriber::EnvFilter;

use opcall::telemetry::{ConsoleTelemetrySink, TracingTelemetrySink};
use opcall::{ApiClient, BasicAuthProvider, ClientConfig, Error, OperationRegistry, OperationSpec};

#[derive(Parser)]
#[command(name = "opcall")]
#[command(about = "Execute API operations by id", long_about = None)]
struct Cli {
    /// Operation id to execute; lists the known operations when omitted
    #[arg(long, value_name = "ID")]
    operation: Option<String>,

    /// JSON object with the operation's parameters
    #[arg(long, value_name = "JSON")]
    input: Option<String>,

    /// Print the response body instead of "OK"
    #[arg(long)]
    dump: bool,

    /// Log every request with a correlation id and timing
    #[arg(short, long)]
    verbose: bool,

    /// JSON file with the operation descriptors
    #[arg(
        long,
        value_name = "FILE",
        value_hint = ValueHint::FilePath,
        env = "API_OPERATIONS_FILE"
    )]
    operations: Option<PathBuf>,

    /// Telemetry sink for request events
    #[arg(long, value_enum)]
    telemetry: Option<TelemetryKind>,
}

#[derive(Clone, Copy, ValueEnum)]
enum TelemetryKind {
    Console,
    Tracing,
}

fn load_registry(path: Option<&Path>) -> Result<OperationRegistry, Error> {
    let Some(path) = path else {
        return OperationRegistry::new(std::iter::empty::<OperationSpec>());
    };
    let json = std::fs::read_to_string(path).map_err(|e| {
        Error::ConfigurationError(format!("Failed to read {}: {e}", path.display()))
    })?;
    OperationRegistry::from_json(&json)
}

fn build_client(cli: &Cli) -> Result<ApiClient, Error> {
    let mut config = ClientConfig::from_env()?;
    match cli.telemetry {
        Some(TelemetryKind::Console) => {
            config = config.with_telemetry_sink(Arc::new(ConsoleTelemetrySink));
        }
        Some(TelemetryKind::Tracing) => {
            config = config.with_telemetry_sink(Arc::new(TracingTelemetrySink));
        }
        None => {}
    }

    let registry = load_registry(cli.operations.as_deref())?;
    let client = ApiClient::new(config, registry, BasicAuthProvider::from_env())?;
    client.set_verbose(cli.verbose);
    Ok(client)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "opcall=info" } else { "opcall=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let client = match build_client(&cli) {
        Ok(client) => client,
        Err(error) => {
            eprintln!("{error}");
            return ExitCode::from(2);
        }
    };

    let Some(ref operation) = cli.operation else {
        let mut ids = client.list_operations();
        ids.sort();
        for id in ids {
            println!("{id}");
        }
        return ExitCode::SUCCESS;
    };

    match client.execute(operation, cli.input.as_deref()).await {
        Ok(value) if cli.dump => {
            match serde_json::to_string_pretty(&value) {
                Ok(pretty) => println!("{pretty}"),
                Err(_) => println!("{value}"),
            }
            ExitCode::SUCCESS
        }
        Ok(_) => {
            println!("OK");
            ExitCode::SUCCESS
        }
        Err(Error::Api(error)) => {
            tracing::error!(operation = %operation, status = error.status, "Operation failed");
            eprintln!("{}", error.detailed());
            ExitCode::from(1)
        }
        Err(error) => {
            eprintln!("{error}");
            ExitCode::from(2)
        }
    }
}
