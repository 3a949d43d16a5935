use std::process::ExitCode;
use unity_cli::{cli, telemetry};

#[tokio::main]
async fn main() -> ExitCode {
    let matches = cli::command().get_matches();
    let level = matches
        .get_one::<String>("log-level")
        .map_or("info", String::as_str);
    telemetry::init(level, matches.get_flag("log-json"));

    match unity_cli::run(&matches).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
