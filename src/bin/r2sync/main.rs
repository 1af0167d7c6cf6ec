use ::tracing::trace;
use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use rusty_fork::rusty_fork_test;

use r2sync::CLIArgs;
use r2sync::Config;

mod cli;
mod tracing;

#[cfg(not(tarpaulin_include))]
#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config_exit_if_err();

    if let Some(shell) = config.auto_complete_shell {
        generate(
            shell,
            &mut CLIArgs::command(),
            "r2sync",
            &mut std::io::stdout(),
        );

        return Ok(());
    }

    start_tracing_if_necessary(&config);

    trace!("config = {:?}", config);

    cli::run(config).await
}

#[cfg(not(tarpaulin_include))]
fn load_config_exit_if_err() -> Config {
    match Config::try_from(CLIArgs::parse()) {
        Ok(config) => config,
        Err(error_message) => {
            clap::Error::raw(clap::error::ErrorKind::ValueValidation, error_message).exit()
        }
    }
}

fn start_tracing_if_necessary(config: &Config) -> bool {
    let Some(tracing_config) = config.tracing_config.as_ref() else {
        return false;
    };

    tracing::init_tracing(tracing_config);
    true
}

rusty_fork_test! {
    #[test]
    fn with_tracing() {
        let args = vec![
            "unittest",
            "--profile",
            "r2",
            "sync",
            "r2://source-bucket",
            "r2://target-bucket",
        ];

        let config = r2sync::Config::try_from(CLIArgs::try_parse_from(args).unwrap()).unwrap();
        assert!(start_tracing_if_necessary(&config));
    }

    #[test]
    fn without_tracing() {
        let args = vec![
            "unittest",
            "--profile",
            "r2",
            "-qq",
            "ls",
            "r2://source-bucket",
        ];

        let config = r2sync::Config::try_from(CLIArgs::try_parse_from(args).unwrap()).unwrap();
        assert!(!start_tracing_if_necessary(&config));
    }
}
