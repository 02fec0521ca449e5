use std::path::{Path, PathBuf};

use clap::Parser;
use dialectic::{
    config::{init_tracing, BackendKind, EngineArgs},
    PatternEngine, RunSummary,
};
use serde_json::Value;

const EXIT_OK: i32 = 0;
const EXIT_SCENARIO_FAILED: i32 = 1;
const EXIT_INVALID: i32 = 2;

#[derive(Parser)]
#[command(name = "pattern-run")]
#[command(about = "Run a pattern test once and print the report")]
struct Args {
    /// Pattern test request (.json, .yaml or .yml)
    #[arg(short, long)]
    request: PathBuf,

    /// Where samples come from (openai or scripted; there is no MCP client here)
    #[arg(long, value_enum, env = "DIALECTIC_BACKEND", default_value = "openai")]
    backend: BackendKind,

    #[command(flatten)]
    engine: EngineArgs,
}

fn load_request(path: &Path) -> Result<Value, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    let is_yaml = matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml") | Some("yml")
    );
    let value = if is_yaml {
        serde_yaml::from_str(&content)?
    } else {
        serde_json::from_str(&content)?
    };
    Ok(value)
}

/// Loads the request and builds the engine; any failure here means nothing ran.
fn prepare(args: &Args) -> Result<(Value, PatternEngine), Box<dyn std::error::Error>> {
    if args.backend == BackendKind::Client {
        return Err("the client backend needs a connected MCP client; use --backend openai or scripted".into());
    }
    let raw = load_request(&args.request)?;
    let backend = args.engine.build_backend(args.backend, None)?;
    Ok((raw, args.engine.build_engine(backend)))
}

fn exit_code(summary: &RunSummary) -> i32 {
    if summary.failed_scenarios == 0 {
        EXIT_OK
    } else {
        EXIT_SCENARIO_FAILED
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing("warn");

    let (raw, engine) = match prepare(&args) {
        Ok(prepared) => prepared,
        Err(error) => {
            eprintln!("{error}");
            std::process::exit(EXIT_INVALID);
        }
    };

    let report = match engine.run_raw(&raw).await {
        Ok(report) => report,
        Err(error) => {
            eprintln!("{error}");
            std::process::exit(EXIT_INVALID);
        }
    };

    println!("{}", report.to_json_pretty()?);

    let code = exit_code(&report.summary);
    if code != EXIT_OK {
        eprintln!(
            "{} of {} scenarios failed",
            report.summary.failed_scenarios, report.summary.total_scenarios
        );
    }
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn demo_path(file: &str) -> String {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("demos")
            .join("requests")
            .join(file)
            .to_string_lossy()
            .into_owned()
    }

    fn args(extra: &[&str]) -> Args {
        let request = demo_path("pair_programming.yaml");
        let mut argv = vec!["pattern-run", "--request", request.as_str()];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_to_a_backend_it_can_use() {
        assert_eq!(args(&[]).backend, BackendKind::Openai);
        assert!(prepare(&args(&["--backend", "client"])).is_err());
    }

    #[test]
    fn scripted_demo_prepares() {
        let responses = demo_path("scripted_responses.json");
        let prepared = prepare(&args(&["--backend", "scripted", "--scripted-responses", &responses]));
        assert!(prepared.is_ok());
    }

    #[test]
    fn unreadable_request_is_a_setup_failure() {
        let parsed = Args::try_parse_from([
            "pattern-run",
            "--request",
            "does/not/exist.json",
            "--backend",
            "scripted",
        ])
        .unwrap();
        assert!(prepare(&parsed).is_err());
    }

    #[test]
    fn failed_scenarios_exit_with_one() {
        let mut summary = RunSummary::from_results(&[], Utc::now());
        assert_eq!(exit_code(&summary), EXIT_OK);
        summary.failed_scenarios = 1;
        assert_eq!(exit_code(&summary), EXIT_SCENARIO_FAILED);
    }
}
