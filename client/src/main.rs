use clap::Parser;
use client::camera::{Viewport, WorldSize};
use client::images::{FileLoader, ImageCache};
use client::network::{self, ConnectionConfig};
use client::rendering::{MacroquadSurface, Renderer, Surface};
use client::sync::{ClientContext, SyncController};
use log::{error, info};
use macroquad::prelude::{is_key_pressed, next_frame, Conf, KeyCode};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Websocket endpoint of the world server
    #[arg(short = 's', long, default_value = shared::DEFAULT_SERVER_URL)]
    server: String,

    /// Name to join with
    #[arg(short = 'u', long, default_value = "player")]
    username: String,

    /// Simulate inbound network latency in milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,

    /// Window width
    #[arg(short = 'w', long, default_value = "800")]
    width: i32,

    /// Window height (no short flag to avoid conflict with --help)
    #[arg(long, default_value = "600")]
    height: i32,

    /// World width in world units
    #[arg(long, default_value_t = shared::WORLD_WIDTH)]
    world_width: f32,

    /// World height in world units
    #[arg(long, default_value_t = shared::WORLD_HEIGHT)]
    world_height: f32,

    /// Directory that asset references are resolved against
    #[arg(short = 'a', long, default_value = "assets")]
    assets: String,

    /// Asset reference of the background image
    #[arg(short = 'b', long, default_value = shared::BACKGROUND_ASSET)]
    background: String,
}

fn window_conf() -> Conf {
    let args = Args::parse();
    Conf {
        window_title: "World Viewer".to_owned(),
        window_width: args.width,
        window_height: args.height,
        window_resizable: true,
        ..Default::default()
    }
}

#[macroquad::main(window_conf)]
async fn main() {
    if let Err(e) = run().await {
        error!("Client stopped: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    info!("Connecting to: {} as {}", args.server, args.username);
    if args.fake_ping > 0 {
        info!("Simulating {}ms latency", args.fake_ping);
    }

    let runtime = tokio::runtime::Runtime::new()?;

    let mut surface = MacroquadSurface::new();
    let mut renderer = Renderer::new();

    let loader = FileLoader::new(&args.assets, runtime.handle().clone());
    let context = ClientContext::new(
        ImageCache::new(Box::new(loader)),
        surface.size(),
        WorldSize::new(args.world_width, args.world_height),
        args.background.clone(),
    );

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let mut controller = SyncController::new(args.username.clone(), context, outbound_tx);

    controller.begin_connect();
    let mut events = network::spawn_connection(
        runtime.handle(),
        ConnectionConfig::new(args.server.clone()).with_fake_latency(args.fake_ping),
        outbound_rx,
    );

    loop {
        while let Ok(event) = events.try_recv() {
            if let Err(e) = controller.handle_event(event) {
                error!("{}", e);
            }
        }

        controller.poll_images();
        let size: Viewport = surface.size();
        controller.resize(size);

        renderer.render_frame(&mut surface, controller.context(), controller.state());

        if is_key_pressed(KeyCode::Escape) {
            break;
        }

        next_frame().await;
    }

    info!("Shutting down");
    Ok(())
}
