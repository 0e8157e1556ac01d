use std::path::PathBuf;

use serde::Deserialize;

use crate::burrow::common::{Error, Result};

#[derive(Deserialize)]
pub struct Settings {
    /// config_path is the path of the loaded config file
    #[serde(skip_deserializing)]
    pub config_path: PathBuf,
    /// client side settings, required by burrow-client
    pub client: Option<ClientConfig>,
    /// server side settings, required by burrow-server
    pub server: Option<ServerConfig>,
}

#[derive(Deserialize)]
pub struct ClientConfig {
    /// local port the client listens on for connections to forward
    pub port: u16,
    /// preshared key, must match the server
    pub key: String,
    pub backend: BackendConfig,
}

#[derive(Deserialize)]
pub struct ServerConfig {
    /// preshared key, must match the client
    pub key: String,
    pub backend: BackendConfig,
    pub frontend: FrontendConfig,
}

#[derive(Deserialize, Clone)]
#[serde(tag = "type")]
pub enum BackendConfig {
    #[serde(rename = "plain_tcp")]
    PlainTcp(PlainTcpConfig),
    #[serde(rename = "multi_tcp")]
    MultiTcp(MultiTcpConfig),
}

#[derive(Deserialize, Clone)]
pub struct PlainTcpConfig {
    /// host the client backend connects to, defaults to 127.0.0.1
    #[serde(default = "default_server")]
    pub server: String,
    /// address the server backend binds, defaults to all interfaces
    #[serde(default)]
    pub address: String,
    #[serde(default = "default_backend_port")]
    pub port: u16,
}

#[derive(Deserialize, Clone)]
pub struct MultiTcpConfig {
    #[serde(default = "default_server")]
    pub server: String,
    #[serde(default)]
    pub address: String,
    #[serde(default = "default_backend_port")]
    pub port: u16,
    /// number of parallel sockets the aggregate stream is striped across
    #[serde(default = "default_number")]
    pub number: usize,
    /// stripe block size in bytes; must match on both peers
    #[serde(default = "default_blocksize")]
    pub blocksize: usize,
}

#[derive(Deserialize, Clone)]
#[serde(tag = "type")]
pub enum FrontendConfig {
    #[serde(rename = "redirect")]
    Redirect(RedirectConfig),
}

#[derive(Deserialize, Clone)]
pub struct RedirectConfig {
    /// host every substream is redirected to, defaults to localhost
    #[serde(default = "default_frontend_server")]
    pub server: String,
    #[serde(default = "default_frontend_port")]
    pub port: u16,
}

fn default_server() -> String { "127.0.0.1".to_string() }
const fn default_backend_port() -> u16 { 4194 }
const fn default_number() -> usize { 5 }
const fn default_blocksize() -> usize { 8192 }
fn default_frontend_server() -> String { "localhost".to_string() }
const fn default_frontend_port() -> u16 { 80 }

impl Settings {
    pub(crate) fn load(&mut self, path: PathBuf) -> Result<()> {
        self.config_path = path;
        if let Some(client) = &self.client {
            if client.key.is_empty() {
                return Err(Error::new("client key cannot be empty"));
            }
            client.backend.validate()?;
        }
        if let Some(server) = &self.server {
            if server.key.is_empty() {
                return Err(Error::new("server key cannot be empty"));
            }
            server.backend.validate()?;
        }
        Ok(())
    }
}

impl BackendConfig {
    fn validate(&self) -> Result<()> {
        if let BackendConfig::MultiTcp(multi) = self {
            if multi.number == 0 {
                return Err(Error::new("multi_tcp number cannot be 0"));
            }
            if multi.blocksize == 0 {
                return Err(Error::new("multi_tcp blocksize cannot be 0"));
            }
        }
        Ok(())
    }
}
