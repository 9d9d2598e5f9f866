use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use raytracing_lib::{run, RunSettings};
use scene::MissKind;

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Miss {
    Null,
    Constant,
    Sphere,
}

impl From<Miss> for MissKind {
    fn from(miss: Miss) -> Self {
        match miss {
            Miss::Null => MissKind::Null,
            Miss::Constant => MissKind::Constant,
            Miss::Sphere => MissKind::Sphere,
        }
    }
}

#[derive(Debug, clap::Parser)]
#[command(about = "Progressive path tracer, renders the default scene headless")]
struct CommandLineArguments {
    #[arg(short, long, default_value = "res/config.toml", help = "Configuration file")]
    config: PathBuf,
    #[arg(short, long, help = "Write the accumulated image as PNG")]
    output: Option<PathBuf>,

    #[arg(long, help = "Viewport width")]
    width: Option<u32>,
    #[arg(long, help = "Viewport height")]
    height: Option<u32>,
    #[arg(short, long, help = "Iterations to accumulate")]
    frames: Option<u32>,
    #[arg(long, help = "Render into a buffer shared with the display")]
    interop: Option<bool>,
    #[arg(long, help = "Add the area light")]
    light: Option<bool>,
    #[arg(long, value_enum, help = "Miss program and environment light")]
    miss: Option<Miss>,
    #[arg(short, long, help = "HDR or EXR image of the sphere environment")]
    environment: Option<String>,
    #[arg(long, help = "Don't load program binaries, the host device doesn't run them")]
    placeholder_programs: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = CommandLineArguments::parse();

    let settings = RunSettings {
        config_path: args.config,
        output: args.output,
        width: args.width,
        height: args.height,
        frames: args.frames,
        interop: args.interop,
        light: args.light,
        miss: args.miss.map(MissKind::from),
        environment: args.environment,
        placeholder_programs: args.placeholder_programs,
    };
    let iterations = run(&settings).context("Headless render failed")?;
    log::info!("Done after {} iterations", iterations);
    Ok(())
}
