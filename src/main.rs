use color_eyre::{eyre::eyre, Result};
use eframe::egui;
use mqtt_car_controller::config::Config;
use mqtt_car_controller::controller::ControllerHandle;
use mqtt_car_controller::ui::OperatorPanel;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_path = Config::default_path();
    let config = Config::load_or_create(&config_path).await?;
    info!("Using configuration {}", config_path.display());

    let settings = config.controller_settings()?;
    let (controller, engine_task) = ControllerHandle::spawn(settings);

    info!("Starting operator panel");
    let mut native_options = eframe::NativeOptions::default();
    native_options.viewport = egui::ViewportBuilder::default()
        .with_title("MQTT Car Controller")
        .with_fullscreen(config.ui.fullscreen);

    let panel_controller = controller.clone();
    let ui_result = tokio::task::block_in_place(|| {
        eframe::run_native(
            "MQTT Car Controller",
            native_options,
            Box::new(|cc| Ok(Box::new(OperatorPanel::new(cc, panel_controller)))),
        )
    });

    info!("Operator panel closed, shutting down");
    controller.shutdown();
    if let Err(e) = engine_task.await {
        error!("Controller engine task failed: {}", e);
    }

    ui_result.map_err(|e| eyre!("Operator panel failed: {}", e))
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
