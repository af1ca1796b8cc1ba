use anyhow::{Result, anyhow};
use clap::ArgMatches;
use lazy_static::lazy_static;
use std::net::SocketAddr;
use std::path::PathBuf;

lazy_static! {
    pub(crate) static ref HOSTNAME: String =
        std::env::var("HOSTNAME").unwrap_or_else(|_| String::from("unknown"));
}

/// Process wide settings, built once at startup and never changed.
#[derive(Clone, Debug)]
pub struct Config {
    pub addr: SocketAddr,
    pub tls_config: TlsConfig,
    pub init_container_image: String,
    pub log_level: String,
    pub log_fmt: String,
    pub log_no_color: bool,
}

#[derive(Clone, Debug)]
pub struct TlsConfig {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

impl Config {
    pub fn from_args(matches: &ArgMatches) -> Result<Self> {
        let addr = api_bind_address(matches)?;
        let tls_config = tls_files(matches)?;
        let init_container_image = init_container_image(matches)?;

        let log_level = matches
            .get_one::<String>("log-level")
            .expect("This should not happen, there's a default value for log-level")
            .to_owned();
        let log_fmt = matches
            .get_one::<String>("log-fmt")
            .expect("This should not happen, there's a default value for log-fmt")
            .to_owned();
        let log_no_color = matches
            .get_one::<bool>("log-no-color")
            .expect("clap should have assigned a default value")
            .to_owned();

        Ok(Self {
            addr,
            tls_config,
            init_container_image,
            log_level,
            log_fmt,
            log_no_color,
        })
    }
}

fn api_bind_address(matches: &ArgMatches) -> Result<SocketAddr> {
    let address = matches
        .get_one::<String>("address")
        .ok_or_else(|| anyhow!("error parsing arguments: missing bind address"))?;
    let port = matches
        .get_one::<String>("port")
        .ok_or_else(|| anyhow!("error parsing arguments: missing port"))?;

    format!("{address}:{port}")
        .parse()
        .map_err(|e| anyhow!("error parsing arguments: {}", e))
}

fn tls_files(matches: &ArgMatches) -> Result<TlsConfig> {
    let cert_file = matches.get_one::<String>("cert-file").cloned().unwrap_or_default();
    let key_file = matches.get_one::<String>("key-file").cloned().unwrap_or_default();
    if cert_file.is_empty() || key_file.is_empty() {
        return Err(anyhow!(
            "error parsing arguments: both --cert-file and --key-file must be provided"
        ));
    }

    Ok(TlsConfig {
        cert_file: PathBuf::from(cert_file),
        key_file: PathBuf::from(key_file),
    })
}

fn init_container_image(matches: &ArgMatches) -> Result<String> {
    match matches.get_one::<String>("init-container-image") {
        Some(image) if !image.trim().is_empty() => Ok(image.trim().to_owned()),
        _ => Err(anyhow!(
            "error parsing arguments: --init-container-image cannot be empty"
        )),
    }
}
