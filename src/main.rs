//! C2PA Bridge CLI
//!
//! Read and sign C2PA manifests from the command line.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use c2pa_bridge::{Builder, Engine, LocalSigner, Reader, Signer};

/// Manifest definition used when `sign` is given no `--manifest`.
const DEFAULT_MANIFEST: &str = "{}";

/// C2PA Bridge - read and sign content credentials
#[derive(Parser, Debug)]
#[command(name = "c2pa-bridge")]
#[command(author = "Best Day Labs")]
#[command(version)]
#[command(about = "Read and sign C2PA manifests from the command line")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Output format: text or json
    #[arg(short, long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Show verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the manifest store embedded in an asset
    Read {
        /// Asset to read
        #[arg(value_name = "INPUT")]
        input: PathBuf,
    },

    /// Sign an asset with a manifest definition
    Sign {
        /// Asset to sign
        #[arg(short, long)]
        input: PathBuf,

        /// Where to write the signed asset
        #[arg(short, long)]
        output: PathBuf,

        /// Manifest definition JSON file
        #[arg(short, long)]
        manifest: Option<PathBuf>,

        /// PEM certificate chain
        #[arg(short, long)]
        certs: PathBuf,

        /// PKCS#8 PEM private key (RSA, P-256 or Ed25519)
        #[arg(short, long)]
        key: PathBuf,

        /// Time stamp authority URL
        #[arg(long, value_name = "URL")]
        tsa_url: Option<String>,

        /// Write the manifest next to the output instead of embedding it
        #[arg(long)]
        no_embed: bool,
    },

    /// Print CLI and engine versions
    Version,
}

#[derive(Clone, Debug, PartialEq)]
enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown format: {}. Use 'text' or 'json'", s)),
        }
    }
}

/// What a successful command reports.
enum Outcome {
    Read {
        input: PathBuf,
        store: serde_json::Value,
    },
    Signed {
        input: PathBuf,
        output: PathBuf,
        manifest_bytes: usize,
        sidecar: Option<PathBuf>,
    },
    Version {
        engine: String,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(&args) {
        Ok(outcome) => {
            print_success(&outcome, &args);
            ExitCode::SUCCESS
        }
        Err(e) => {
            let code = exit_code(&e);
            print_error(&e, code, &args);
            ExitCode::from(code)
        }
    }
}

fn exit_code(error: &anyhow::Error) -> u8 {
    error
        .downcast_ref::<c2pa_bridge::Error>()
        .map(|e| u8::try_from(e.exit_code()).unwrap_or(1))
        .unwrap_or(1)
}

fn run(args: &Args) -> anyhow::Result<Outcome> {
    let engine = Engine::default();
    match &args.command {
        Command::Read { input } => read(engine, input),
        Command::Sign {
            input,
            output,
            manifest,
            certs,
            key,
            tsa_url,
            no_embed,
        } => {
            let definition = match manifest {
                Some(path) => fs::read_to_string(path)
                    .with_context(|| format!("reading manifest definition {}", path.display()))?,
                None => DEFAULT_MANIFEST.to_string(),
            };

            let mut signer = LocalSigner::from_files(certs, key)?;
            if let Some(url) = tsa_url {
                signer = signer.with_tsa_url(url.clone());
            }
            let signer: Arc<dyn Signer> = Arc::new(signer);

            sign(engine, &definition, input, output, &signer, *no_embed)
        }
        Command::Version => Ok(Outcome::Version {
            engine: engine.version(),
        }),
    }
}

fn read(engine: Engine, input: &Path) -> anyhow::Result<Outcome> {
    let mut reader = Reader::from_file(engine, input)?;
    let store = serde_json::Value::try_from(&reader)?;
    reader.close()?;
    Ok(Outcome::Read {
        input: input.to_path_buf(),
        store,
    })
}

fn sign(
    engine: Engine,
    definition: &str,
    input: &Path,
    output: &Path,
    signer: &Arc<dyn Signer>,
    no_embed: bool,
) -> anyhow::Result<Outcome> {
    let mut builder = Builder::with_json(engine, definition)?;
    if no_embed {
        builder.set_no_embed()?;
    }
    let manifest = builder.sign(input, output, signer)?;
    builder.close()?;

    let sidecar = if no_embed {
        let path = output.with_extension("c2pa");
        fs::write(&path, &manifest)
            .with_context(|| format!("writing sidecar manifest {}", path.display()))?;
        Some(path)
    } else {
        None
    };

    Ok(Outcome::Signed {
        input: input.to_path_buf(),
        output: output.to_path_buf(),
        manifest_bytes: manifest.len(),
        sidecar,
    })
}

fn print_success(outcome: &Outcome, args: &Args) {
    if args.format == OutputFormat::Json {
        print_success_json(outcome);
    } else {
        print_success_text(outcome, args.verbose);
    }
}

fn print_success_text(outcome: &Outcome, verbose: bool) {
    let reset = "\x1b[0m";
    let green = "\x1b[32m";
    let bold = "\x1b[1m";

    match outcome {
        Outcome::Read { input, store } => {
            if verbose {
                eprintln!("{}MANIFEST STORE{} {}", bold, reset, input.display());
            }
            let text = serde_json::to_string_pretty(store).unwrap_or_else(|_| store.to_string());
            println!("{}", text);
        }
        Outcome::Signed {
            input,
            output,
            manifest_bytes,
            sidecar,
        } => {
            println!();
            println!("{}C2PA SIGNING SUMMARY{}", bold, reset);
            println!("====================");
            println!("Status:      {}{}SIGNED{}", bold, green, reset);
            println!("Input:       {}", input.display());
            println!("Output:      {}", output.display());
            match sidecar {
                Some(path) => println!("Manifest:    {} ({} bytes)", path.display(), manifest_bytes),
                None => println!("Manifest:    embedded ({} bytes)", manifest_bytes),
            }
            println!();
        }
        Outcome::Version { engine } => {
            println!("c2pa-bridge {}", env!("CARGO_PKG_VERSION"));
            println!("engine      {}", engine);
        }
    }
}

fn print_success_json(outcome: &Outcome) {
    let json = match outcome {
        Outcome::Read { input, store } => serde_json::json!({
            "status": "ok",
            "input": input.display().to_string(),
            "manifestStore": store
        }),
        Outcome::Signed {
            input,
            output,
            manifest_bytes,
            sidecar,
        } => serde_json::json!({
            "status": "signed",
            "input": input.display().to_string(),
            "output": output.display().to_string(),
            "manifestBytes": manifest_bytes,
            "embedded": sidecar.is_none(),
            "sidecar": sidecar.as_ref().map(|p| p.display().to_string())
        }),
        Outcome::Version { engine } => serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "engine": engine
        }),
    };

    println!("{}", json);
}

fn print_error(error: &anyhow::Error, code: u8, args: &Args) {
    if args.format == OutputFormat::Json {
        print_error_json(error, code);
    } else {
        print_error_text(error);
    }
}

fn print_error_text(error: &anyhow::Error) {
    let reset = "\x1b[0m";
    let red = "\x1b[31m";
    let bold = "\x1b[1m";

    eprintln!();
    eprintln!("Status:      {}{}FAILED{}", bold, red, reset);
    eprintln!("Error:       {:#}", error);
    eprintln!();

    match error.downcast_ref::<c2pa_bridge::Error>() {
        Some(c2pa_bridge::Error::UnsupportedFormat(_)) => {
            eprintln!("The asset type is taken from the file extension.");
            eprintln!("Rename the file with a supported extension and try again.");
        }
        Some(c2pa_bridge::Error::Credentials(_)) => {
            eprintln!("The certificate chain must be PEM and the key a PKCS#8");
            eprintln!("PEM RSA, P-256 or Ed25519 private key.");
        }
        _ => {}
    }
    eprintln!();
}

fn print_error_json(error: &anyhow::Error, code: u8) {
    let json = serde_json::json!({
        "status": "failed",
        "error": format!("{:#}", error),
        "exitCode": code
    });

    println!("{}", json);
}
