use std::fs;
use std::path::PathBuf;

use bpq_types::Network;
use serde::Deserialize;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub datadir: PathBuf,
    pub network: Network,
}

fn get_env_var(var: &str) -> Option<String> {
    std::env::var(var).ok()
}

impl Config {
    /// Parse config
    ///
    /// # Errors
    /// * config file not exists
    /// * incorrect config
    pub fn load(file: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let config_toml = fs::read_to_string(file)?;
        let mut config: Config = toml::from_str(&config_toml)?;

        if let Some(datadir) = get_env_var("BPQ_DATADIR") {
            config.datadir = PathBuf::from(datadir);
        }
        if let Some(network) = get_env_var("BPQ_NETWORK") {
            config.network = match network.as_str() {
                "mainnet" => Network::Mainnet,
                "testnet" => Network::Testnet,
                "regtest" => Network::Regtest,
                other => return Err(format!("unknown network: {other}").into()),
            };
        }

        Ok(config)
    }

    /// Directory holding the header files of the selected network.
    pub fn headers_dir(&self) -> PathBuf {
        match self.network {
            Network::Mainnet => self.datadir.clone(),
            Network::Testnet => self.datadir.join("testnet"),
            Network::Regtest => self.datadir.join("regtest"),
        }
    }
}
