//! Command-line interface for wakescribe
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Always-listening voice dictation
#[derive(Parser, Debug)]
#[command(
    name = "wakescribe",
    version,
    about = "Always-listening voice dictation with wake and cancel phrases"
)]
pub struct Cli {
    /// Subcommand to execute (default: listen)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Audio input device (e.g., hw:0)
    #[arg(long, global = true, value_name = "DEVICE")]
    pub device: Option<String>,

    /// Path to a Whisper ggml model file
    #[arg(long, global = true, value_name = "FILE")]
    pub model: Option<PathBuf>,

    /// Wake phrase that starts a recording (default: "hey cat")
    #[arg(long, global = true, value_name = "PHRASE")]
    pub wake_phrase: Option<String>,

    /// Language code for transcription. Examples: auto, en, de
    #[arg(long, global = true, value_name = "LANG")]
    pub language: Option<String>,

    /// Print pipeline events as JSON lines on stderr instead of notices
    #[arg(long, global = true)]
    pub json_events: bool,

    /// Stop after this long. Examples: 30s, 5m, 1h30m
    #[arg(long, global = true, value_name = "DURATION", value_parser = parse_duration)]
    pub max_session: Option<Duration>,
}

/// Parse a duration string.
///
/// Supports bare numbers (seconds) and any format accepted by `humantime`:
/// single-unit (`30s`, `5m`, `2h`) and compound (`1h30m`, `2m30s`).
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Listen on the microphone for the wake phrase (default)
    Listen,

    /// Run the dictation flow over a WAV file instead of the microphone
    Replay {
        /// 16 kHz mono WAV file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Feed audio at real-time speed instead of as fast as possible
        #[arg(long)]
        realtime: bool,
    },

    /// List available audio input devices
    Devices,

    /// Manage configuration
    Config {
        /// Action to perform
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,

    /// Print the configuration file path
    Path,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
