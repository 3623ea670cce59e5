//! CLI argument parsing: a `clap::Parser` derive struct with a
//! `load_config` helper that layers CLI overrides on top of the TOML
//! file.

use std::path::PathBuf;

use clap::Parser;

use crate::codec::Codec;
use crate::config::Config;

#[derive(Debug, Parser)]
#[command(name = "voice-bridge", about = "SIP/RTP to streaming-LLM voice bridge")]
pub struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "voice-bridge.toml")]
    pub config: PathBuf,

    /// Override the SIP listen port from the config file.
    #[arg(long)]
    pub listen_port: Option<u16>,

    /// Override the preferred codec (alaw|ulaw).
    #[arg(long)]
    pub preferred_codec: Option<String>,

    /// Run attached to the terminal instead of detaching.
    #[arg(long)]
    pub foreground: bool,

    /// Increase log verbosity (repeatable: -v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    /// Load the configured TOML file, then apply any CLI overrides.
    pub fn load_config(&self) -> Result<Config, String> {
        let mut config = Config::load(&self.config)?;

        if let Some(port) = self.listen_port {
            config.sip.listen_port = port;
        }

        if let Some(codec) = &self.preferred_codec {
            config.audio.preferred_codec = match codec.to_ascii_lowercase().as_str() {
                "alaw" => Codec::Alaw,
                "ulaw" => Codec::Ulaw,
                other => return Err(format!("unknown --preferred-codec value: {other}")),
            };
        }

        Ok(config)
    }

    pub fn log_level_override(&self) -> Option<&'static str> {
        match self.verbose {
            0 => None,
            1 => Some("debug"),
            _ => Some("trace"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_override_scales_with_verbosity() {
        let args = Args {
            config: PathBuf::from("x.toml"),
            listen_port: None,
            preferred_codec: None,
            foreground: false,
            verbose: 0,
        };
        assert_eq!(args.log_level_override(), None);

        let args = Args { verbose: 1, ..args };
        assert_eq!(args.log_level_override(), Some("debug"));

        let args = Args { verbose: 2, ..args };
        assert_eq!(args.log_level_override(), Some("trace"));
    }
}
