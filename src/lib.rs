/*!
# Progressive Path Tracer

Host side of a progressive path tracer for a hardware ray tracing device. The device programs
do the tracing, this crate builds everything they need and drives them frame by frame.

## Overview

Each launch adds one sample per pixel to an accumulation buffer. As long as nothing changes the
image converges, any edit of the camera, a material, a light or a render setting discards the
accumulation and starts over at iteration 0.

## Feature Overview

- **Acceleration Structures**: One bottom-level structure per procedural shape and a single instance level on top.
- **Program Catalog**: Ten program modules, nineteen program groups and a stack budget computed from their usage.
- **Shader Binding Table**: Two hit records per instance, switched between the plain and the cutout variant at runtime.
- **Environment Lighting**: Constant or importance sampled spherical environments plus an optional area light.
- **Interop**: Renders straight into a buffer shared with the display, or into a private buffer that is read back.
- **Host Device**: An in-memory device that records every call, used for headless previews and the tests.

## Modules

- [`raytracing_lib`](../raytracing_lib/index.html): The renderer, its setup steps and the headless `run`.
- [`scene`](../scene/index.html): Configuration, camera, procedural meshes, materials, lights and textures.
- [`rt_utils`](../rt_utils/index.html): The device trait, buffers, shared buffer mapping and the host device.

## Usage

```rust no_run
use std::path::PathBuf;

use raytracing_lib::{run, RunSettings};

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let settings = RunSettings {
        config_path: PathBuf::from("res/config.toml"),
        output: Some(PathBuf::from("render.png")),
        placeholder_programs: true,
        ..Default::default()
    };
    run(&settings)?;
    Ok(())
}
```

The same is available on the command line:

```sh
cargo run --bin raytracing_bin -- --frames 128 --miss sphere --environment res/studio.hdr -o render.png
```
*/
pub use raytracing_lib::*;
pub use rt_utils;
pub use scene;
