use std::{thread, time::Duration};

use anyhow::{Context, Result};
use rand::{rngs::StdRng, SeedableRng};

use sphere_tracer::{
    config_loader::ConfigFileLoader, scene::random::generate_random_scene, RenderCallInfo,
    Renderer,
};

const DEFAULT_CONFIG_PATH: &str = "config.json";

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = run() {
        log::error!("{err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let mut config_loader = ConfigFileLoader::new(config_path);
    let config = config_loader.get_or_load_config()?.clone();

    let seed = config.scene_seed.unwrap_or_else(rand::random);
    log::info!("Generating scene with seed {seed}");
    let scene = generate_random_scene(&mut StdRng::seed_from_u64(seed));

    let mut renderer =
        Renderer::new(&config.settings, &scene).context("Could not set up the renderer")?;

    let frame_delay = Duration::from_millis(config.frame_delay_ms);
    for info in RenderCallInfo::plan(config.total_calls, config.total_samples) {
        renderer.update();
        if renderer.should_exit() {
            log::info!("Window closed after {} of {} calls", info.number - 1, info.total_number);
            return Ok(());
        }

        renderer
            .render(&info)
            .with_context(|| format!("Render call {} failed", info.number))?;

        if info.is_last() {
            log::info!("Finished {} samples per pixel", info.samples_so_far());
            if let Some(path) = &config.screenshot_path {
                renderer
                    .capture()
                    .and_then(|capture| capture.save_png(path))
                    .context("Could not save the screenshot")?;
            }
        }

        thread::sleep(frame_delay);
    }

    // Keep the finished image on screen until the window gets closed
    while !renderer.should_exit() {
        renderer.update();
        thread::sleep(frame_delay);
    }
    Ok(())
}
