use std::error::Error;
use std::path::PathBuf;
use std::process::exit;

use clap::Parser;
use wavepath::integrator::{IntegratorConfig, WavefrontIntegrator};
use wavepath::{log, RuntimeConfig, WorkTile, PASS_UNUSED};

mod demo;

/// Renders the built-in demo scene with the wavefront path tracer and writes an EXR image.
#[derive(Debug, Parser)]
#[command(name = "wavepath-cli", version)]
struct Args {
    /// Integrator settings as JSON, missing fields take their defaults
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(short, long, default_value = "out.exr")]
    output: String,
    #[arg(long, default_value_t = 640)]
    width: u32,
    #[arg(long, default_value_t = 360)]
    height: u32,
    /// Overrides `spp` from the config
    #[arg(long)]
    spp: Option<u32>,
    #[arg(short, long)]
    threads: Option<usize>,
    /// Redirects logging to a file
    #[arg(long)]
    log_output: Option<String>,
    #[arg(long, default_value = "info")]
    log_level: String,
    #[arg(long)]
    no_progress: bool,
}

fn render_main(args: Args) -> Result<(), Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => IntegratorConfig::from_file(path)?,
        None => IntegratorConfig::default(),
    };
    if let Some(spp) = args.spp {
        config.spp = spp;
    }
    if config.is_baking() {
        return Err("the demo scene has no bake primitive passes, remove `bake` from the config".into());
    }
    if args.width == 0 || args.height == 0 {
        return Err(format!("invalid resolution {}x{}", args.width, args.height).into());
    }
    let integrator = WavefrontIntegrator::new(&config)?;
    let scene = demo::DemoScene::new(args.width, args.height);
    let buffer = integrator.create_render_buffer(args.width, args.height);
    log::info!("rendering with {} threads", wavepath::rayon::current_num_threads());
    let stats = integrator.render(
        &scene,
        &WorkTile::full_frame(args.width, args.height, config.spp),
        &buffer,
    );
    log::info!(
        "traced {} paths and {} shadow paths",
        stats.paths,
        stats.shadow_paths
    );

    let film = &integrator.kernel_data().film;
    let samples = stats.samples.max(1);
    // adaptive sampling leaves per-pixel sample counts
    let scale = |pixel: u32| {
        let n = if film.sample_count != PASS_UNUSED {
            buffer.load_uint(pixel, film.sample_count)
        } else {
            samples
        };
        if n == 0 {
            0.0
        } else {
            1.0 / n as f32
        }
    };
    buffer.write_exr(&args.output, film.combined, scale)?;
    log::info!("wrote {}", args.output);
    Ok(())
}

fn main() {
    let args = Args::parse();
    let mut runtime = RuntimeConfig {
        log_level: args.log_level.clone(),
        ..Default::default()
    };
    if let Some(threads) = args.threads {
        runtime.num_threads = threads;
    }
    if let Some(output) = &args.log_output {
        runtime.log_output = output.clone();
    }
    if let Err(e) = wavepath::init(&runtime) {
        eprintln!("{}", e);
        exit(1);
    }
    if args.no_progress {
        wavepath::util::enable_progress_bar(false);
    }
    if let Err(e) = render_main(args) {
        log::error!("{}", e);
        exit(1);
    }
}
