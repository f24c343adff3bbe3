use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use tessera_api::engine::{VerificationEngine, VerifyParams};
use tessera_core::error::TesseraError;
use tessera_core::proof::GpuExpectations;
use tessera_fetch::{Config, Fetchers};

const EXIT_FAILED: i32 = 1;
const EXIT_PENDING: i32 = 2;

#[derive(Parser)]
#[command(name = "tessera")]
#[command(about = "Remote attestation verifier for signed inference transcripts")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the verification API server
    Serve {
        /// Bind address
        #[arg(long, default_value = "127.0.0.1:8787")]
        bind: String,

        /// Bearer token (TESSERA_TOKEN, generated if neither is set)
        #[arg(long)]
        token: Option<String>,
    },

    /// Verify one transcript and print the verdict
    Verify {
        /// Verification identifier (usually the chat completion id)
        verification_id: String,

        /// Remote transcript id, if different from the verification id
        #[arg(long)]
        message_id: Option<String>,

        #[arg(long)]
        model: Option<String>,

        /// Nonce that was sent with the original request
        #[arg(long)]
        nonce: Option<String>,

        #[arg(long)]
        request_hash: Option<String>,

        #[arg(long)]
        response_hash: Option<String>,

        #[arg(long)]
        expected_arch: Option<String>,

        #[arg(long)]
        expected_device_cert_hash: Option<String>,

        #[arg(long)]
        expected_rim_hash: Option<String>,

        #[arg(long)]
        expected_ueid: Option<String>,

        /// Reference measurement, repeatable
        #[arg(long = "expected-measurement")]
        expected_measurements: Vec<String>,

        /// Print the full outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Decode a JWT payload and check it as an NRAS token
    DecodeJwt { token: String },

    /// Extract request/response hashes from a signed transcript text
    ExtractHashes { text: String },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let code = match cli.command {
        Commands::Serve { bind, token } => cmd_serve(&bind, token).map(|()| 0),
        Commands::Verify {
            verification_id,
            message_id,
            model,
            nonce,
            request_hash,
            response_hash,
            expected_arch,
            expected_device_cert_hash,
            expected_rim_hash,
            expected_ueid,
            expected_measurements,
            json,
        } => {
            let params = VerifyParams {
                verification_id,
                message_id,
                model,
                nonce,
                request_hash,
                response_hash,
                expectations: GpuExpectations {
                    arch: expected_arch,
                    device_cert_hash: expected_device_cert_hash,
                    rim_hash: expected_rim_hash,
                    ueid: expected_ueid,
                    measurements: expected_measurements,
                },
            };
            cmd_verify(params, json)
        }
        Commands::DecodeJwt { token } => cmd_decode_jwt(&token),
        Commands::ExtractHashes { text } => cmd_extract_hashes(&text),
    };

    match code {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(EXIT_FAILED);
        }
    }
}

fn build_engine(config: &Config) -> Result<VerificationEngine> {
    let fetchers = Fetchers::from_config(config)?;
    if !config.missing().is_empty() {
        tracing::warn!(missing = ?config.missing(), "required settings are unset");
    }
    Ok(VerificationEngine::new(fetchers, config))
}

fn cmd_serve(bind: &str, token: Option<String>) -> Result<()> {
    let config = Config::from_env();
    let token = token.or_else(|| config.api_token.clone());
    let engine = build_engine(&config)?;

    let rt = tokio::runtime::Runtime::new()?;
    let server = tessera_api::ApiServer::new(bind.to_string(), token, engine);
    rt.block_on(server.run())?;
    Ok(())
}

fn cmd_verify(params: VerifyParams, json: bool) -> Result<i32> {
    use tessera_attest::OverallStatus;

    let config = Config::from_env();
    let engine = build_engine(&config)?;
    let rt = tokio::runtime::Runtime::new()?;

    let outcome = match rt.block_on(engine.verify(params)) {
        Ok(outcome) => outcome,
        Err(TesseraError::Unavailable(msg)) => {
            println!("pending: {msg}");
            return Ok(EXIT_PENDING);
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("verification: {}", outcome.verification_id);
        for (kind, step) in outcome.state.steps() {
            let kind = serde_json::to_value(kind)?;
            let status = serde_json::to_value(step.status)?;
            println!(
                "  {:<12} {:<8} {}",
                kind.as_str().unwrap_or_default(),
                status.as_str().unwrap_or_default(),
                step.message
            );
        }
        for note in &outcome.notes {
            println!("  note: {note}");
        }
        println!();
        println!("overall: {:?}", outcome.state.overall());
        for reason in outcome.state.reasons() {
            println!("  - {reason}");
        }
    }

    Ok(match outcome.state.overall() {
        OverallStatus::Verified => 0,
        OverallStatus::Failed => EXIT_FAILED,
        OverallStatus::Pending => EXIT_PENDING,
    })
}

fn cmd_decode_jwt(token: &str) -> Result<i32> {
    let claims = tessera_verify::jwt::decode(token).context("token payload is not a JSON object")?;
    if let Some(header) = tessera_verify::jwt::decode_header(token) {
        println!("header: {}", serde_json::to_string_pretty(&header)?);
    }
    println!("claims: {}", serde_json::to_string_pretty(&claims)?);
    let valid = tessera_verify::ClaimsValidator::nras().verify(token);
    println!("nras-valid: {valid}");
    Ok(if valid { 0 } else { EXIT_FAILED })
}

fn cmd_extract_hashes(text: &str) -> Result<i32> {
    match tessera_core::hashes::extract(text) {
        Some(h) => {
            println!("request:  {}", h.request_hash);
            println!("response: {}", h.response_hash);
            Ok(0)
        }
        None => {
            eprintln!("no request/response hash pair found");
            Ok(EXIT_FAILED)
        }
    }
}
