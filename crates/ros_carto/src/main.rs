use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use log::info;
use ros_carto::{
    cli::{CheckOptions, Options, Subcommands},
    config::{self, Config, CONFIG},
    handler::HandlerRegistry,
    playback::Playback,
    sensor_bridge::SensorBridge,
    static_transforms::StaticTransforms,
    topology::{parse_topology_config, TopologyState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = Options::new();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(options.log_level)
        .init();

    config::load(&options)?;
    let cfg = CONFIG.read().clone();

    match &options.subcommands {
        Some(Subcommands::Check(check_options)) => check(&cfg, check_options),
        None => run(cfg).await,
    }
}

/// Validate the configuration against the supported message types and print
/// the resulting topology.
fn check(cfg: &Config, options: &CheckOptions) -> anyhow::Result<()> {
    let topology = parse_topology_config(cfg)?;
    let registry = HandlerRegistry::init();
    for (name, source) in cfg.topics() {
        if let Some(ros_type) = source.ros_type()? {
            anyhow::ensure!(
                registry.supports(&ros_type),
                "sensor '{name}' uses unsupported message type {ros_type}"
            );
        }
    }

    print!("{topology}");
    if options.print_config {
        println!();
        print!("{}", config::to_toml(cfg)?);
    }
    Ok(())
}

async fn run(cfg: Config) -> anyhow::Result<()> {
    let Some(bag) = cfg.input.bag.clone() else {
        anyhow::bail!("nothing to play back, set input.bag or pass --bag");
    };
    info!("Starting ROS Cartographer sensor bridge...");

    let registry = HandlerRegistry::init();
    let topology = parse_topology_config(&cfg)?;
    let mut state = TopologyState::default();
    let routes = state.apply_config(&topology, &registry)?;

    let static_transforms = Arc::new(StaticTransforms::new());
    for frame in &cfg.frames {
        static_transforms.insert(&frame.parent, &frame.child, frame.parent_from_child());
    }
    let bridge = SensorBridge::new(
        cfg.bridge.num_subdivisions_per_laser_scan,
        &cfg.bridge.tracking_frame,
        cfg.bridge.lookup_transform_timeout_sec,
        static_transforms.clone(),
        Box::new(routes.trajectory_builder),
    );
    let mut playback = Playback::new(
        bridge,
        routes.subscribers,
        registry,
        static_transforms,
        &cfg.input.tf_static_topic,
    );

    let stop = Arc::new(AtomicBool::new(false));
    let playback_stop = stop.clone();
    let mut playback_task = tokio::task::spawn_blocking(move || {
        let result = playback.play_mcap(&bag, &playback_stop);
        (result, playback.into_stats())
    });

    let (result, stats) = tokio::select! {
        joined = &mut playback_task => joined?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping playback");
            stop.store(true, Ordering::Relaxed);
            state.shutdown();
            playback_task.await?
        }
    };
    info!("Playback finished: {stats}");

    state.join().await;
    result
}
