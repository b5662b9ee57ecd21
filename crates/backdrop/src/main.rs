//! Fluid backdrop desktop host.
//!
//! Usage: `backdrop [config.json]`

use std::path::Path;

use backdrop::{app, BackdropConfig, CardLayout};

fn main() {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => match BackdropConfig::load_json(Path::new(&path)) {
            Ok(config) => config,
            Err(e) => {
                log::error!("could not load config {path}: {e}");
                std::process::exit(1);
            }
        },
        None => BackdropConfig::default(),
    };

    let layout = match config.layout_path.as_deref() {
        Some(path) => CardLayout::load_json(path).unwrap_or_else(|e| {
            log::warn!("could not load layout {}: {e}; using the demo layout", path.display());
            CardLayout::demo()
        }),
        None => CardLayout::demo(),
    };

    if let Err(e) = app::run(config, layout) {
        log::error!("event loop error: {e}");
        std::process::exit(1);
    }
}
