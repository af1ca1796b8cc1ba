use anyhow::Result;
use std::process;
use tokio::runtime::Runtime;
use tracing::{debug, error};

use secrets_injector::{InjectorServer, cli, config::Config, tracing::setup_tracing};

fn main() -> Result<()> {
    let matches = cli::build_cli().get_matches();
    let config = match Config::from_args(&matches) {
        Ok(config) => config,
        Err(e) => fatal_error(e.to_string(), false),
    };

    // Starting from rustls 0.22, each application must set its default crypto provider.
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        fatal_error("Cannot install the rustls crypto provider".to_string(), false);
    }

    let rt = match Runtime::new() {
        Ok(r) => r,
        Err(error) => fatal_error(format!("error initializing tokio runtime: {error}"), false),
    };

    rt.block_on(async {
        if let Err(err) = setup_tracing(&config.log_level, &config.log_fmt, config.log_no_color) {
            fatal_error(err.to_string(), false);
        }
        debug!("tracing system ready");

        let server = match InjectorServer::new_from_config(config).await {
            Ok(server) => server,
            Err(e) => fatal_error(e.to_string(), true),
        };

        if let Err(e) = server.run().await {
            fatal_error(e.to_string(), true);
        }
    });

    Ok(())
}

fn fatal_error(msg: String, trace_system_ready: bool) -> ! {
    if trace_system_ready {
        error!("{}", msg);
    } else {
        eprintln!("{msg}");
    }

    process::exit(1);
}
