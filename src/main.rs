use face_bridge::{
    bridge::{BridgeContext, CallerHandle, CommandResponse, CommandRouter},
    common::{config::LOCAL_CONFIG, system_config_file, user_config_file, Config, DevMode},
    engine::OnnxEngineFactory,
    service::{parse_request, BridgeReply},
};
use anyhow::{Context as _, Result};
use clap::Parser;
use crossbeam_channel::Sender;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "face-bridge")]
#[command(about = "Face engine command bridge speaking JSON lines on stdin/stdout")]
struct Args {
    /// Config file (defaults: dev config, ./configs, user config, /etc)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable development mode (keeps data under ./dev_data)
    #[arg(long)]
    dev: bool,

    /// Worker threads, overriding the config
    #[arg(long)]
    workers: Option<usize>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(args.dev);

    let dev_mode = DevMode::new(args.dev)?;
    let mut config = load_config(&args, &dev_mode)?;
    dev_mode.apply(&mut config);
    if let Some(workers) = args.workers {
        config.dispatch.worker_threads = workers;
    }

    tracing::info!("Starting face-bridge (dev_mode: {})", args.dev);
    let factory = Arc::new(OnnxEngineFactory::new(config.clone()));
    let context = BridgeContext::new(config, factory).context("Failed to start bridge")?;
    let router = CommandRouter::new(context);

    let (done_tx, done_rx) = crossbeam_channel::unbounded::<()>();
    let mut outstanding = 0usize;

    for line in io::stdin().lock().lines() {
        let line = line.context("Failed to read request")?;
        if line.trim().is_empty() {
            continue;
        }

        outstanding += 1;
        match parse_request(&line) {
            Ok(request) => {
                let caller = reply_handle(request.callback_id, done_tx.clone());
                router.dispatch(&request.action, &request.args, caller);
            }
            Err(e) => {
                tracing::warn!("{}", e);
                let caller = reply_handle(String::new(), done_tx.clone());
                router.context().delivery.post(caller, CommandResponse::from_error(&e));
            }
        }
    }

    drop(done_tx);
    tracing::info!("Input closed, waiting for {} outstanding replies", outstanding);
    for _ in 0..outstanding {
        if done_rx.recv().is_err() {
            tracing::warn!("Some requests will never be answered");
            break;
        }
    }

    tracing::info!("face-bridge exiting");
    Ok(())
}

/// Writes the reply line for `callback_id` and signals `done`.
fn reply_handle(callback_id: String, done: Sender<()>) -> CallerHandle {
    CallerHandle::from_fn(callback_id.clone(), move |response| {
        let written = BridgeReply::new(callback_id.clone(), response)
            .to_line()
            .map_err(anyhow::Error::from)
            .and_then(|line| {
                let mut stdout = io::stdout().lock();
                writeln!(stdout, "{}", line)?;
                stdout.flush()?;
                Ok(())
            });
        if let Err(e) = written {
            tracing::error!("Failed to write reply for {}: {}", callback_id, e);
        }
        done.send(()).ok();
    })
}

fn load_config(args: &Args, dev_mode: &DevMode) -> Result<Config> {
    if let Some(path) = &args.config {
        return Config::load_from_path(path).context("Failed to load config");
    }
    if dev_mode.is_enabled() && dev_mode.config_file().exists() {
        return Config::load_from_path(&dev_mode.config_file()).context("Failed to load dev config");
    }
    if Path::new(LOCAL_CONFIG).exists() {
        return Config::load().context("Failed to load config");
    }

    for path in user_config_file().into_iter().chain([system_config_file()]) {
        if path.exists() {
            return Config::load_from_path(&path).context("Failed to load config");
        }
    }

    tracing::warn!("No config file found, using defaults");
    Ok(Config::default())
}

fn setup_logging(dev_mode: bool) {
    // stdout carries the protocol
    if dev_mode {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .with_writer(io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt().with_writer(io::stderr).init();
    }
}
