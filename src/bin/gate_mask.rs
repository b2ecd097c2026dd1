//! gate_mask - render the exclusion masks of a camera config to PNG files

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use gate_counter::load_camera_config;
use gate_counter::ui::{Ui, UiMode};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Camera configuration file.
    cameras: PathBuf,
    /// Output directory for `mask_<ip>_ch<channel>.png` files.
    #[arg(long, default_value = ".", value_name = "DIR")]
    out: PathBuf,
    /// UI mode for stderr progress.
    #[arg(long, value_enum, default_value_t = UiMode::Auto, value_name = "MODE")]
    ui: UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let ui = Ui::new(args.ui, std::io::stderr().is_terminal());

    let cameras = {
        let _stage = ui.stage("read camera config");
        load_camera_config(&args.cameras)?
    };
    if cameras.is_empty() {
        return Err(anyhow!("no cameras in {}", args.cameras.display()));
    }
    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;

    let stage = ui.counted_stage("render masks", cameras.len() as u64);
    for camera in &cameras {
        let mask = camera.build_mask();
        let path = args.out.join(camera.mask_file_name());
        if let Err(e) = mask.save_png(&path) {
            stage.fail(&camera.unique_id);
            return Err(e);
        }
        stage.step(&format!(
            "{} -> {} ({} zone(s), {} excluded px)",
            camera.unique_id,
            path.display(),
            camera.zones.len(),
            mask.excluded_pixels()
        ));
    }
    drop(stage);
    println!("{} mask(s) written to {}", cameras.len(), args.out.display());
    Ok(())
}
