/// Splat tiler command line entry point
use clap::{Parser, Subcommand};
use log::info;
use splat_tiler::compressor::{CompressorConfig, GltfpackCompressor, compress_directory};
use splat_tiler::coordinates::{SourceProjection, TransverseMercator};
use splat_tiler::{CancelToken, Pipeline, PipelineConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "splat-tiler",
    version,
    about = "Convert Gaussian splat scans into 3D Tiles"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Split, clean, build LOD levels and assemble a tileset
    Convert {
        /// Input .splat file or directory of .splat files
        input: PathBuf,
        /// Run output directory
        output: PathBuf,
        /// JSON configuration; flags below override it
        #[arg(long)]
        config: Option<PathBuf>,
        /// Origin longitude of the local frame (degrees)
        #[arg(long, allow_hyphen_values = true)]
        lon: Option<f64>,
        /// Origin latitude of the local frame (degrees)
        #[arg(long, allow_hyphen_values = true)]
        lat: Option<f64>,
        #[arg(long)]
        tile_zoom: Option<u8>,
        #[arg(long)]
        lod_levels: Option<u8>,
        /// Decimation grid of the first LOD level (meters)
        #[arg(long)]
        tile_resolution: Option<f64>,
        /// Geometric error of the first LOD level (meters)
        #[arg(long)]
        tile_error: Option<f64>,
        #[arg(long)]
        min_alpha: Option<f32>,
        #[arg(long)]
        max_scale: Option<f32>,
        #[arg(long)]
        flyers_num: Option<usize>,
        #[arg(long)]
        flyers_dis: Option<f64>,
        /// Input positions are lon/lat degrees
        #[arg(long, conflicts_with = "central_meridian")]
        geographic: bool,
        /// Central meridian of the transverse Mercator source projection
        #[arg(long, allow_hyphen_values = true)]
        central_meridian: Option<f64>,
        /// Compress content with this gltfpack executable
        #[arg(long)]
        gltfpack: Option<PathBuf>,
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Compress the content of an assembled tileset directory
    Compress {
        input: PathBuf,
        output: PathBuf,
        #[arg(long, default_value = "gltfpack")]
        gltfpack: PathBuf,
        /// Kill a job after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
        #[arg(long)]
        workers: Option<usize>,
    },
}

fn init_thread_pool(workers: Option<usize>) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(workers) = workers {
        rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build_global()?;
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Command::Convert {
            input,
            output,
            config,
            lon,
            lat,
            tile_zoom,
            lod_levels,
            tile_resolution,
            tile_error,
            min_alpha,
            max_scale,
            flyers_num,
            flyers_dis,
            geographic,
            central_meridian,
            gltfpack,
            workers,
        } => {
            let mut settings = match &config {
                Some(path) => PipelineConfig::load(path)?,
                None => PipelineConfig::default(),
            };
            if let Some(lon) = lon {
                settings.origin[0] = lon;
            }
            if let Some(lat) = lat {
                settings.origin[1] = lat;
            }
            settings.tile_zoom = tile_zoom.unwrap_or(settings.tile_zoom);
            settings.lod_levels = lod_levels.unwrap_or(settings.lod_levels);
            settings.tile_resolution = tile_resolution.unwrap_or(settings.tile_resolution);
            settings.tile_error = tile_error.unwrap_or(settings.tile_error);
            settings.clean.min_alpha = min_alpha.unwrap_or(settings.clean.min_alpha);
            settings.clean.max_scale = max_scale.unwrap_or(settings.clean.max_scale);
            settings.clean.flyers_num = flyers_num.unwrap_or(settings.clean.flyers_num);
            settings.clean.flyers_dis = flyers_dis.unwrap_or(settings.clean.flyers_dis);
            if geographic {
                settings.source_projection = SourceProjection::Geographic;
            } else if let Some(central_meridian) = central_meridian {
                settings.source_projection = SourceProjection::TransverseMercator(TransverseMercator {
                    central_meridian,
                    ..Default::default()
                });
            }
            if let Some(program) = gltfpack {
                settings.compressor = Some(CompressorConfig {
                    program,
                    ..settings.compressor.unwrap_or_default()
                });
            }
            settings.workers = workers.or(settings.workers);

            init_thread_pool(settings.workers)?;
            let pipeline = Pipeline::new(settings, &input, &output)?;
            let report = pipeline.run()?;
            if let Some(tileset) = &report.tileset {
                info!("Tileset ready: {}", tileset.display());
            }
        }
        Command::Compress {
            input,
            output,
            gltfpack,
            timeout,
            workers,
        } => {
            init_thread_pool(workers)?;
            let config = CompressorConfig {
                program: gltfpack,
                timeout_secs: timeout,
                ..Default::default()
            };
            let cancel = CancelToken::new();
            let compressor = GltfpackCompressor::new(&config, cancel.clone());
            let workers = workers.unwrap_or_else(rayon::current_num_threads);
            let report = compress_directory(&input, &output, &compressor, workers, &cancel)?;
            info!(
                "Compressed {} files into {} ({} failures)",
                report.tiles,
                output.display(),
                report.failures.len()
            );
        }
    }

    Ok(())
}
