mod accessory;
mod behavior;
mod channel;
mod cli;
mod components;
mod config;
mod display;
mod endpoint;
mod protocol;
mod render;
mod schedule;
mod sender;
mod sprites;

use std::time::Duration;

use anyhow::{Context, Result};
use bevy::app::{ScheduleRunnerPlugin, TerminalCtrlCHandlerPlugin};
use bevy::log::LogPlugin;
use bevy::prelude::*;
use bevy::window::{CursorOptions, WindowLevel};
use rand::rngs::SmallRng;
use rand::SeedableRng;

use cli::{Invocation, SenderAction};
use components::HeadlessMode;
use config::MascotSettings;
use endpoint::Namespace;

fn main() -> Result<()> {
    let invocation = Invocation::parse();
    if invocation.actions.is_empty() {
        run_mascot(invocation.headless)
    } else {
        run_sender(invocation.actions)
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Deliver each action to the running mascots, in command-line order.
/// Unreachable mascots are reported but do not fail the invocation.
fn run_sender(actions: Vec<SenderAction>) -> Result<()> {
    init_tracing();
    let (_, settings) = config::load_startup_config().resolve();
    let namespace = Namespace::new(settings.socket_dir);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building sender runtime")?;
    let mut rng = SmallRng::from_entropy();

    runtime.block_on(cli::dispatch_actions(&namespace, &actions, &mut rng))
}

fn mascot_window(settings: &MascotSettings) -> Window {
    Window {
        title: "Gopher".to_string(),
        resolution: (settings.sprite_size, settings.sprite_size).into(),
        transparent: true,
        decorations: false,
        resizable: false,
        focused: false,
        skip_taskbar: true,
        window_level: WindowLevel::AlwaysOnTop,
        cursor_options: CursorOptions {
            hit_test: false,
            ..default()
        },
        ..default()
    }
}

fn run_mascot(headless: bool) -> Result<()> {
    let (behavior, settings) = config::load_startup_config().resolve();

    let namespace = Namespace::new(&settings.socket_dir);
    let (queue, inbox) = crossbeam_channel::unbounded();
    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
    let handle = channel::start(namespace.current_process(), queue, shutdown_tx)
        .context("starting command channel")?;
    println!("[Gopher channel] Listening on {}", handle.endpoint().display());

    let mut app = App::new();
    app.insert_resource(HeadlessMode(headless));

    if headless {
        app.add_plugins(MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(
            Duration::from_secs_f64(1.0 / 60.0),
        )));
        app.add_plugins(LogPlugin::default());
        app.add_plugins(TerminalCtrlCHandlerPlugin);
        app.insert_resource(display::HeadlessDisplay::default());
        println!("[Gopher] Starting in HEADLESS mode");
    } else {
        if settings.assets_dir.as_os_str() != "assets" {
            println!("[Gopher] Using assets dir: {}", settings.assets_dir.display());
        }
        app.add_plugins(
            DefaultPlugins
                .set(WindowPlugin {
                    primary_window: Some(mascot_window(&settings)),
                    ..default()
                })
                .set(AssetPlugin {
                    file_path: settings.assets_dir.to_string_lossy().into_owned(),
                    ..default()
                }),
        );
        app.insert_resource(ClearColor(Color::NONE));
        app.add_plugins(sprites::SpritePlugin);
        app.add_plugins(render::RenderPlugin);
        println!("[Gopher] Starting in WINDOWED mode");
    }

    app.insert_resource(behavior)
        .insert_resource(settings)
        .insert_resource(schedule::MascotRng(Box::new(SmallRng::from_entropy())))
        .insert_resource(schedule::CommandInbox(inbox))
        .insert_resource(channel::ShutdownRequests(shutdown_rx))
        .insert_resource(handle)
        .add_plugins(accessory::AccessoryPlugin)
        .add_plugins(schedule::BehaviorPlugin)
        .add_plugins(channel::ChannelPlugin);

    match app.run() {
        AppExit::Success => Ok(()),
        AppExit::Error(code) => std::process::exit(i32::from(code.get())),
    }
}
