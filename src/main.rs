//! Binary entrypoint for the photo frame agent.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use photo_frame_agent::config::Configuration;
use photo_frame_agent::events::SlideEvent;
use photo_frame_agent::frame::Frame;
use photo_frame_agent::{server, tasks};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "photo-frame-agent",
    version,
    about = "Photo frame agent: control server, FTP sync and smart shuffle"
)]
struct Args {
    /// Path to YAML config
    #[arg(value_name = "CONFIG", default_value = "config.yaml")]
    config: PathBuf,
    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
    /// Print the first N entries of the display sequence and exit
    #[arg(long = "print-sequence", value_name = "COUNT")]
    print_sequence: Option<usize>,
    /// Deterministic RNG seed for the shuffle (overrides startup-shuffle-seed)
    #[arg(long = "shuffle-seed", value_name = "SEED")]
    shuffle_seed: Option<u64>,
    /// Reconcile with the sync target once at startup
    #[arg(long = "sync-now")]
    sync_now: bool,
}

fn init_tracing(verbosity: u8) -> Result<()> {
    let mut filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if verbosity > 0 {
        let level = if verbosity == 1 {
            Level::DEBUG
        } else {
            Level::TRACE
        };
        filter = filter.add_directive(
            format!("photo_frame_agent={level}")
                .parse()
                .context("invalid log directive")?,
        );
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let Args {
        config,
        verbose,
        print_sequence,
        shuffle_seed,
        sync_now,
    } = Args::parse();
    init_tracing(verbose)?;

    let mut cfg = Configuration::from_yaml_file(&config)
        .with_context(|| format!("failed to load configuration from {}", config.display()))?
        .validated()
        .context("invalid configuration values")?;
    if shuffle_seed.is_some() {
        cfg.startup_shuffle_seed = shuffle_seed;
    }
    tracing::info!("Loaded configuration from {}:\n{:#?}", config.display(), cfg);

    let frame = Frame::open(&cfg)?;

    if let Some(count) = print_sequence {
        print_display_sequence(&frame, count).await;
        return Ok(());
    }

    let cancel = frame.shutdown_token();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("ctrl-c handler failed: {err}");
                return;
            }
            tracing::info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    let (slide_tx, slide_rx) = mpsc::channel::<SlideEvent>(16);
    let mut tasks = JoinSet::new();

    // Control server
    tasks.spawn({
        let frame = frame.clone();
        let control = cfg.control.clone();
        let cancel = cancel.clone();
        async move {
            server::run(frame, &control, cancel)
                .await
                .context("control server failed")
        }
    });

    // Slideshow driver
    tasks.spawn({
        let frame = frame.clone();
        let cancel = cancel.clone();
        async move {
            tasks::slideshow::run(frame, slide_tx, cancel)
                .await
                .context("slideshow task failed")
        }
    });

    // Display stand-in
    tasks.spawn({
        let cancel = cancel.clone();
        async move {
            log_slides(slide_rx, cancel).await;
            Ok::<(), anyhow::Error>(())
        }
    });

    // Sync scheduler
    tasks.spawn({
        let frame = frame.clone();
        let cancel = cancel.clone();
        async move {
            tasks::sync_schedule::run(frame, sync_now, cancel)
                .await
                .context("sync scheduler failed")
        }
    });

    while let Some(res) = tasks.join_next().await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!("task error: {e:?}");
                cancel.cancel();
            }
            Err(e) => tracing::error!("join error: {e}"),
        }
    }

    Ok(())
}

async fn log_slides(mut slides: mpsc::Receiver<SlideEvent>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = slides.recv() => match event {
                Some(SlideEvent::Show { name, location, capture_year }) => tracing::info!(
                    %name,
                    location = location.as_deref().unwrap_or("-"),
                    year = ?capture_year,
                    "display: show"
                ),
                Some(SlideEvent::Sleep) => tracing::info!("display: sleep"),
                Some(SlideEvent::Wake) => tracing::info!("display: wake"),
                None => break,
            },
        }
    }
}

async fn print_display_sequence(frame: &Frame, count: usize) {
    let sequence = frame.display_sequence();
    println!(
        "# display sequence\n# photos: {}\n# orientation: {}\n# eligible: {}\n",
        frame.list_files().len(),
        frame.orientation().await,
        sequence.len()
    );
    if sequence.is_empty() {
        println!(
            "(no photos match under {})",
            frame.store().root().display()
        );
        return;
    }
    for (idx, photo) in sequence.iter().take(count).enumerate() {
        let orientation = photo
            .orientation
            .map_or("unknown", |o| o.as_str());
        println!("{:>4}  {:<10} {}", idx + 1, orientation, photo.name);
    }
}
