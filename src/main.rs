use anyhow::Result;
use clap::{CommandFactory, Parser};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use wakescribe::app::{Overrides, SessionOptions, run_listen, run_replay};
use wakescribe::audio::capture::list_devices;
use wakescribe::cli::{Cli, Commands, ConfigAction};
use wakescribe::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    wakescribe::logging::init(cli.quiet, cli.verbose);

    let options = SessionOptions {
        quiet: cli.quiet,
        json_events: cli.json_events,
        max_session: cli.max_session,
    };
    let overrides = Overrides {
        device: cli.device,
        model: cli.model,
        wake_phrase: cli.wake_phrase,
        language: cli.language,
    };

    match cli.command {
        None | Some(Commands::Listen) => {
            let config = overrides.apply(load_config(cli.config.as_deref())?);
            run_until_interrupted(move |shutdown| run_listen(config, shutdown, options)).await?;
        }
        Some(Commands::Replay { file, realtime }) => {
            let config = overrides.apply(load_config(cli.config.as_deref())?);
            run_until_interrupted(move |shutdown| {
                run_replay(config, &file, realtime, shutdown, options)
            })
            .await?;
        }
        Some(Commands::Devices) => {
            list_audio_devices()?;
        }
        Some(Commands::Config { action }) => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "wakescribe",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// Run a blocking dictation session; Ctrl+C asks it to stop.
async fn run_until_interrupted<F>(session: F) -> Result<()>
where
    F: FnOnce(&AtomicBool) -> wakescribe::Result<()> + Send + 'static,
{
    let shutdown = Arc::new(AtomicBool::new(false));

    let signal_flag = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, shutting down");
            signal_flag.store(true, Ordering::SeqCst);
        }
    });

    let session_flag = shutdown.clone();
    tokio::task::spawn_blocking(move || session(session_flag.as_ref())).await??;
    Ok(())
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/wakescribe/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(&Config::default_path())?,
    };
    Ok(config.with_env_overrides())
}

/// List available audio input devices.
fn list_audio_devices() -> Result<()> {
    let devices = list_devices()?;

    if devices.is_empty() {
        eprintln!("No audio input devices found");
        std::process::exit(1);
    }

    println!("Available audio input devices:");
    for (idx, device) in devices.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }

    Ok(())
}

/// Handle configuration commands.
fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    let config_path = custom_path
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);

    match action {
        ConfigAction::Show => {
            let config = load_config(custom_path)?;
            print!("{}", config.to_toml_string()?);
        }
        ConfigAction::Path => {
            println!("{}", config_path.display());
        }
        ConfigAction::Init { force } => {
            if config_path.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    config_path.display()
                );
            }
            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&config_path, Config::default().to_toml_string()?)?;
            println!("Wrote {}", config_path.display());
        }
    }
    Ok(())
}
