use anyhow::Result;
use declarative::{Spec, is_relative};

use crate::Context;
use crate::config::Settings;
use crate::ui;

pub fn run(_ctx: &Context, raw: &str) -> Result<()> {
    let settings = Settings::load(None)?;
    let spec = Spec::parse(raw, &settings.default_resolver);

    ui::header(raw);
    ui::kv("resolver", &spec.resolver);
    ui::kv(
        "explicit",
        if spec.explicit { "yes" } else { "no (default)" },
    );
    ui::kv("body", &spec.body);
    ui::kv("fqn", &spec.fqn());
    if is_relative(raw) {
        ui::kv("relative", "yes (resolved against the requesting unit)");
    }
    for (key, value) in &spec.params {
        ui::kv(&format!("param {key}"), value);
    }
    Ok(())
}
