use flowfuzz_core::config::FlowFuzzConfig;
use flowfuzz_core::fuzzer::FuzzContext;
use flowfuzz_core::openflow::OfVersion;
use flowfuzz_core::proxy::{ProxySession, SessionOptions};
use flowfuzz_core::rules::{InstructionSet, load_instruction_set};

use clap::Parser;
use env_logger::Env;
use log::{debug, error, info, warn};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    /// Rule file (JSON instruction set)
    #[clap(short, long)]
    rules: Option<PathBuf>,
    /// Address the switches connect to
    #[clap(short, long)]
    listen: Option<String>,
    /// Address of the real controller
    #[clap(long)]
    controller: Option<String>,
    #[clap(long)]
    of_version: Option<OfVersion>,
    #[clap(long)]
    seed: Option<u64>,
}

fn load_config(path: Option<PathBuf>) -> Result<(FlowFuzzConfig, String), anyhow::Error> {
    match path {
        Some(config_path) => {
            let config = FlowFuzzConfig::load_from_file(&config_path)?;
            Ok((
                config,
                format!("Loaded configuration from specified path: {config_path:?}"),
            ))
        }
        None => {
            let default_config_path = PathBuf::from("flowfuzz.toml");
            if default_config_path.exists() {
                let config = FlowFuzzConfig::load_from_file(&default_config_path)?;
                Ok((
                    config,
                    format!("No config file specified via CLI, loaded default: {default_config_path:?}"),
                ))
            } else {
                Ok((
                    FlowFuzzConfig::default(),
                    "No config file specified and default 'flowfuzz.toml' not found, using built-in defaults."
                        .to_string(),
                ))
            }
        }
    }
}

fn load_rules(config: &FlowFuzzConfig) -> Result<InstructionSet, anyhow::Error> {
    let path = &config.fuzzer.rules_path;
    let instructions = if path.exists() {
        load_instruction_set(path)
            .map_err(|e| anyhow::anyhow!("Failed to load rules from {:?}: {}", path, e))?
    } else {
        warn!("Rule file {path:?} not found, every message will be relayed untouched");
        InstructionSet::default()
    };
    let instructions = instructions.with_auto_filter(config.fuzzer.auto_filter);
    debug!("Active instructions: {}", instructions.to_json());
    Ok(instructions)
}

fn reap_finished(sessions: Vec<ProxySession>, timeout: Duration) -> Vec<ProxySession> {
    let (finished, running): (Vec<_>, Vec<_>) =
        sessions.into_iter().partition(ProxySession::is_finished);
    for session in finished {
        session.shutdown(timeout);
    }
    running
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    let (mut config, config_source) = load_config(cli.config_file)?;

    if let Some(rules) = cli.rules {
        config.fuzzer.rules_path = rules;
    }
    if let Some(listen) = cli.listen {
        config.proxy.listen_addr = listen;
    }
    if let Some(controller) = cli.controller {
        config.proxy.controller_addr = controller;
    }
    if let Some(version) = cli.of_version {
        config.openflow_version = version;
    }
    if cli.seed.is_some() {
        config.fuzzer.seed = cli.seed;
    }

    env_logger::Builder::from_env(Env::default().default_filter_or(config.logging.level.as_str()))
        .init();
    info!("{config_source}");
    debug!("Effective configuration: {config:#?}");

    let instructions = load_rules(&config)?;
    std::fs::create_dir_all(&config.fuzzer.report_dir).map_err(|e| {
        anyhow::anyhow!(
            "Failed to create report directory {:?}: {}",
            config.fuzzer.report_dir,
            e
        )
    })?;
    let ctx = FuzzContext::new(config.openflow_version, instructions)
        .with_report_dir(config.fuzzer.report_dir.clone());

    let listener = TcpListener::bind(&config.proxy.listen_addr).map_err(|e| {
        anyhow::anyhow!("Failed to listen on {}: {}", config.proxy.listen_addr, e)
    })?;
    info!(
        "Fuzzing OpenFlow {} between {} and {} ({} instruction(s), seed {:?})",
        config.openflow_version,
        config.proxy.listen_addr,
        config.proxy.controller_addr,
        ctx.instruction_count(),
        config.fuzzer.seed
    );

    let exit_timeout = config.proxy.exit_timeout();
    let mut sessions: Vec<ProxySession> = Vec::new();
    for (index, incoming) in listener.incoming().enumerate() {
        sessions = reap_finished(sessions, exit_timeout);

        let switch = match incoming {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to accept switch connection: {e}");
                continue;
            }
        };
        let controller = match TcpStream::connect(&config.proxy.controller_addr) {
            Ok(stream) => stream,
            Err(e) => {
                error!(
                    "Cannot reach controller at {}: {e}",
                    config.proxy.controller_addr
                );
                continue;
            }
        };

        let mut options = SessionOptions::from_config(&config);
        options.seed = options.seed.map(|s| s.wrapping_add(2 * index as u64));
        match ProxySession::spawn(switch, controller, ctx.clone(), options) {
            Ok(session) => sessions.push(session),
            Err(e) => error!("Failed to start proxy session: {e}"),
        }
    }

    for session in sessions {
        session.shutdown(exit_timeout);
    }
    Ok(())
}
