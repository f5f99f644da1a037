mod archive;
mod catalog;
mod config;
mod error;
mod http;
mod installer;
mod preview;
mod store;
mod system;
mod ui;

use gtk4::prelude::*;
use libadwaita as adw;
use tracing_subscriber::EnvFilter;

const APP_ID: &str = "io.github.SoulInfernoDE.PlymouthThemeManager";

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();
}

fn main() -> gtk4::glib::ExitCode {
    init_logging();

    let settings = config::Settings::from_env();
    tracing::info!(config_dir = %settings.config_dir.display(), "Starting Plymouth Theme Manager");

    let app = adw::Application::builder()
        .application_id(APP_ID)
        .build();

    app.connect_startup(|app| {
        ui::load_css();
        ui::setup_actions(app);
    });

    app.connect_activate(move |app| {
        let window = ui::PtmWindow::new(app, settings.clone());
        window.present();
    });

    app.run()
}
