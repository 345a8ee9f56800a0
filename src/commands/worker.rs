//! The build process: runs the engine with events on stdout and control
//! messages on stdin.

use anyhow::Result;
use declarative::Engine;
use optrace::WorkerEndpoint;

use crate::Context;
use crate::cli::WorkerArgs;
use crate::config::Settings;

/// Exit code when the observer asked the build to stop.
pub const EXIT_INTERRUPTED: i32 = 130;

pub fn run(_ctx: &Context, args: WorkerArgs) -> Result<()> {
    let settings = Settings::load(args.root.root.as_deref())?;
    let options = settings.engine_options();
    log::info!(
        "Building {} spec(s) under {}",
        args.specs.len(),
        options.root.display()
    );

    let mut engine = Engine::with_toml_loader(options, Box::new(WorkerEndpoint::stdio()));
    let outcome = engine.run(&args.specs);
    // Dropping the engine flushes every queued event before exit.
    drop(engine);

    let code = match outcome {
        Ok(()) => 0,
        Err(e) if e.is_interrupt() => {
            log::info!("Build interrupted");
            EXIT_INTERRUPTED
        }
        Err(e) => {
            log::info!("Build failed: {e}");
            log::debug!("{}", e.trace());
            1
        }
    };
    std::process::exit(code)
}
