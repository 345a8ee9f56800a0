use anyhow::{Context as _, Result};
use colored::Colorize;
use declarative::{DefinitionLoader, TomlLoader};

use crate::Context;
use crate::cli::RootArg;
use crate::config::Settings;
use crate::ui;

pub fn run(ctx: &Context, root: RootArg) -> Result<()> {
    let settings = Settings::load(root.root.as_deref())?;
    let root = settings.root();
    let loader = TomlLoader::new(root.clone(), settings.build_file.as_str());

    let units = loader.units();
    if units.is_empty() {
        ui::warn(&format!(
            "No {} files under {}",
            settings.build_file,
            root.display()
        ));
        return Ok(());
    }

    if !ctx.quiet {
        ui::header(&format!("Targets in {}", root.display()));
    }

    for unit in &units {
        let manifest = loader
            .load(unit)
            .with_context(|| format!("Could not load build unit //{unit}"))?;
        let default = manifest.select_entry(unit, None);
        for (name, target) in &manifest.targets {
            let mut line = format!("//{unit}:{name}");
            if *name == default {
                let alias = format!("(//{unit})");
                line = format!("{line} {}", alias.dimmed());
            }
            if target.hidden {
                line = line.dimmed().to_string();
            }
            if target.failsafe {
                line = format!("{line} {}", "failsafe".yellow());
            }
            println!("  {line}");
        }
    }
    Ok(())
}
