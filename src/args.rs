use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config;

#[derive(Parser, Debug)]
#[command(name = "recvnc")]
#[command(author = "RecVNC Team")]
#[command(version)]
#[command(about = "Records VNC sessions and converts them into time-aligned datasets", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/recvnc.toml")]
    pub config: PathBuf,

    /// Public port viewers connect to
    #[arg(short = 'p', long)]
    pub listen_port: Option<u16>,

    /// VNC server host
    #[arg(long)]
    pub upstream_host: Option<String>,

    /// VNC server port
    #[arg(long)]
    pub upstream_port: Option<u16>,

    /// HTTP port for the control surface
    #[arg(long)]
    pub http_port: Option<u16>,

    /// X11 display to capture (e.g. ":1.0")
    #[arg(short, long)]
    pub display: Option<String>,

    /// Directory receiving recording sessions
    #[arg(long)]
    pub records_dir: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Convert a recorded session directory and exit
    Convert {
        /// Session directory holding screenshots and events.txt
        session_dir: PathBuf,

        /// Output directory (default: <converted_dir>/<session name>)
        output_dir: Option<PathBuf>,

        /// Grid step in seconds
        #[arg(long)]
        base_interval: Option<f64>,
    },
}

impl Args {
    pub fn load_config(&self) -> Result<config::Config, Box<dyn std::error::Error>> {
        config::Config::load(&self.config)
    }

    /// Command line values take precedence over the file
    pub fn apply_overrides(&self, config: &mut config::Config) {
        if let Some(port) = self.listen_port {
            config.proxy.listen_port = port;
        }
        if let Some(host) = &self.upstream_host {
            config.proxy.upstream_host = host.clone();
        }
        if let Some(port) = self.upstream_port {
            config.proxy.upstream_port = port;
        }
        if let Some(port) = self.http_port {
            config.http.port = port;
        }
        if let Some(display) = &self.display {
            config.capture.display = display.clone();
        }
        if let Some(dir) = &self.records_dir {
            config.capture.records_dir = dir.clone();
        }
        if let Some(Command::Convert {
            base_interval: Some(step),
            ..
        }) = &self.command
        {
            config.serializer.base_interval = *step;
        }
    }
}
