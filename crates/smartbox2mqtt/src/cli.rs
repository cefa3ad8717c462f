use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Bridge Smartbox electric heaters to MQTT.
///
/// Publishes every heater's state as retained messages under
/// `{baseTopic}/{name}/...` and applies commands received on
/// `{baseTopic}/{name}/mode/set` and `{baseTopic}/{name}/temperature/set`.
#[derive(Debug, Parser)]
#[command(name = "smartbox2mqtt", version, about, long_about)]
pub struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, env = "SMARTBOX2MQTT_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Disable the realtime push channel and rely on polling only
    #[arg(long)]
    pub no_realtime: bool,

    /// Print the config file path that would be used, then exit
    #[arg(long)]
    pub print_config_path: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_parse() {
        let cli = Cli::try_parse_from([
            "smartbox2mqtt",
            "--config",
            "/etc/smartbox2mqtt.json",
            "-vv",
            "--log-format",
            "json",
            "--no-realtime",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/smartbox2mqtt.json")));
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(cli.no_realtime);
        assert!(!cli.print_config_path);
    }
}
