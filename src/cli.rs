//! Command-line interface definitions.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Video transcoding orchestrator: cloud, edge and local FFmpeg strategies.
#[derive(Parser, Debug)]
#[command(name = "transcode-orchestrator", version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "/config/transcoder.yaml", env = "CONFIG_PATH", global = true)]
    pub config: PathBuf,

    /// Increase logging verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Returns the log level based on verbosity flags.
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP service and orchestrator.
    Serve(ServeArgs),

    /// Validate the configuration file without starting.
    #[command(name = "config-validate")]
    ConfigValidate,

    /// Display the parsed configuration.
    #[command(name = "config-show")]
    ConfigShow,

    /// List the quality presets.
    Presets {
        /// Only list presets that do not upscale a source of this height.
        #[arg(long)]
        source_height: Option<u32>,
    },

    /// Show the persisted status of a job.
    #[command(name = "job-status")]
    JobStatus {
        /// The job ID to look up.
        job_id: String,
    },

    /// Inspect a media file and list the presets that suit it.
    Analyze {
        /// Media file to inspect.
        path: PathBuf,

        /// FFprobe binary name or path.
        #[arg(long, default_value = "ffprobe")]
        ffprobe: PathBuf,
    },
}

/// Arguments for the serve subcommand.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Override the configured listen host.
    #[arg(long)]
    pub host: Option<String>,

    /// Override the configured listen port.
    #[arg(long)]
    pub port: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serve_with_overrides() {
        let cli = Cli::try_parse_from(["transcode-orchestrator", "-v", "serve", "--port", "9000"]).unwrap();
        assert_eq!(cli.log_level(), "debug");
        match cli.command {
            Commands::Serve(args) => {
                assert_eq!(args.port, Some(9000));
                assert!(args.host.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn job_status_requires_an_id() {
        assert!(Cli::try_parse_from(["transcode-orchestrator", "job-status"]).is_err());
        let cli = Cli::try_parse_from([
            "transcode-orchestrator",
            "--config",
            "/etc/t.yaml",
            "job-status",
            "abc",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/t.yaml"));
        assert!(matches!(cli.command, Commands::JobStatus { job_id } if job_id == "abc"));
    }

    #[test]
    fn analyze_takes_a_path_and_optional_binary() {
        let cli = Cli::try_parse_from(["transcode-orchestrator", "analyze", "/media/in.mov"]).unwrap();
        match cli.command {
            Commands::Analyze { path, ffprobe } => {
                assert_eq!(path, PathBuf::from("/media/in.mov"));
                assert_eq!(ffprobe, PathBuf::from("ffprobe"));
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert!(Cli::try_parse_from(["transcode-orchestrator", "analyze"]).is_err());
    }
}
