//! `kinfu pack`

use crate::PackArgs;
use kinfu_data::{
    DepthNormalization, FillPolicy, PackedGrid, PackingConfig, PointCloudPacker, ReaderOptions,
    read_point_cloud_file,
};
use std::error::Error;
use std::fs;
use tracing::info;

pub fn packing_config(args: &PackArgs) -> PackingConfig {
    PackingConfig {
        particle_size: args.particle_size,
        depth_normalization: match args.far {
            Some(far) => DepthNormalization::Fixed { far },
            None => DepthNormalization::MaxObserved,
        },
        fill: if args.clamp_to_last {
            FillPolicy::ClampToLast
        } else {
            FillPolicy::ZeroFill
        },
        ..PackingConfig::default()
    }
}

pub fn run(args: &PackArgs) -> Result<(), Box<dyn Error>> {
    let options = if args.lenient {
        ReaderOptions::lenient()
    } else {
        ReaderOptions::default()
    };
    let cloud = read_point_cloud_file(&args.file, options)?;
    let grid = PointCloudPacker::new(packing_config(args)).pack_cloud(&cloud);

    info!(
        points = grid.particle_count,
        width = grid.width,
        height = grid.height,
        far = grid.far,
        center = ?grid.bounds_center(),
        size = ?grid.bounds_size(),
        "Packed point cloud"
    );

    if let Some(dir) = &args.out {
        write_textures(&grid, dir)?;
    }
    Ok(())
}

fn write_textures(grid: &PackedGrid, dir: &std::path::Path) -> Result<(), Box<dyn Error>> {
    let Some((intensity, position_scale)) = grid.to_images() else {
        return Err("point cloud is empty, nothing to write".into());
    };
    fs::create_dir_all(dir)?;
    let intensity_path = dir.join("intensity.exr");
    let position_path = dir.join("position_scale.exr");
    intensity.save(&intensity_path)?;
    position_scale.save(&position_path)?;
    info!(
        intensity = %intensity_path.display(),
        position_scale = %position_path.display(),
        "Wrote particle textures"
    );
    Ok(())
}
