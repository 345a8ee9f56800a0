//! `confctl build`: run the build in a worker process and observe it.
//!
//! The worker is this same executable started with the hidden `worker`
//! subcommand in its own process group, so a terminal Ctrl-C reaches only
//! the observer. The first Ctrl-C asks the worker to stop between actions;
//! the second kills it.

use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};

use anyhow::{Context as _, Result};
use optrace::{ControlMessage, ObserverEndpoint};
use tokio::time::MissedTickBehavior;

use crate::Context;
use crate::cli::BuildArgs;
use crate::config::Settings;
use crate::observer::Observer;
use crate::ui;

pub fn run(ctx: &Context, args: BuildArgs) -> Result<()> {
    let settings = Settings::load(args.root.root.as_deref())?;
    let mut child = spawn_worker(ctx, &settings, &args.specs)?;

    let events = child.stdout.take().context("Worker stdout is not piped")?;
    let control = child.stdin.take().context("Worker stdin is not piped")?;
    let endpoint = ObserverEndpoint::new(events, control, settings.backoff());
    let mut observer = Observer::new(args.plain, settings.ui.max_log_lines);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start the event loop")?;
    runtime.block_on(observe(endpoint, &mut observer, &mut child, &settings))?;
    observer.finish()?;

    let status = child.wait().context("Failed to wait for the build worker")?;
    let code = declarative::exit_code(status);
    let view = observer.view();

    match code {
        0 if !view.is_complete() => ui::warn("Build ended without reporting completion"),
        0 => {
            if !ctx.quiet {
                ui::success("Build finished");
            }
        }
        super::worker::EXIT_INTERRUPTED => ui::warn("Build interrupted"),
        _ if view.has_failures() => ui::error("Build failed"),
        _ => ui::error(&format!("Build worker exited with code {code}")),
    }

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn spawn_worker(ctx: &Context, settings: &Settings, specs: &[String]) -> Result<Child> {
    let exe = std::env::current_exe().context("Could not locate the confctl executable")?;
    let mut cmd = Command::new(exe);
    cmd.arg("worker").arg("--root").arg(settings.root());
    if ctx.verbose > 0 {
        cmd.arg(format!("-{}", "v".repeat(usize::from(ctx.verbose))));
    }
    if ctx.quiet {
        cmd.arg("--quiet");
    }
    cmd.arg("--").args(specs);

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .process_group(0);

    log::debug!("Spawning worker: {cmd:?}");
    cmd.spawn().context("Failed to start the build worker")
}

async fn observe(
    mut endpoint: ObserverEndpoint,
    observer: &mut Observer,
    child: &mut Child,
    settings: &Settings,
) -> Result<()> {
    let mut redraw = tokio::time::interval(settings.refresh_interval());
    redraw.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut interrupts = 0u8;

    loop {
        tokio::select! {
            event = endpoint.recv() => match event {
                Some(event) => observer.apply(event)?,
                None => break,
            },
            _ = redraw.tick() => observer.redraw()?,
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                interrupts = interrupts.saturating_add(1);
                if interrupts == 1 {
                    log::info!("Stopping after the current action (Ctrl-C again to kill)");
                    if let Err(e) = endpoint.send_control(ControlMessage::Shutdown) {
                        log::warn!("Could not ask the worker to stop: {e}");
                    }
                } else {
                    log::warn!("Killing the build worker");
                    if let Err(e) = child.kill() {
                        log::warn!("Could not kill the build worker: {e}");
                    }
                    endpoint.waker().shutdown();
                }
            }
        }
    }

    for event in endpoint.drain() {
        observer.apply(event)?;
    }
    Ok(())
}
