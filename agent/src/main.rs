use std::process::ExitCode;

use envconfig::Envconfig;
use tracing::{error, info};

use host_agent::agent;
use host_agent::build_info::BuildInfo;
use host_agent::config::Config;
use host_agent::logging;

#[tokio::main]
async fn main() -> ExitCode {
    logging::init(logging::level_from_env());

    let build_info = BuildInfo::from_build_env();
    info!(
        version = %build_info.version,
        commit = %build_info.commit,
        build_time = %build_info.build_time,
        "Starting agent"
    );

    let result = match Config::init_from_env() {
        Ok(config) => agent::run(config, build_info).await,
        Err(e) => Err(e.into()),
    };

    match result {
        Ok(report) if !report.panicked.is_empty() => {
            error!(panicked = ?report.panicked, "agent stopped after a component panicked");
            ExitCode::FAILURE
        }
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!(fatal = true, error = %e, "agent failed to start");
            ExitCode::FAILURE
        }
    }
}
