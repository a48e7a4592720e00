//! cropphase CLI - growth-phase animation frames and maximum-extent snapshots

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Instant;

use cropphase::core::{PhaseScheme, ThinningSeed};
use cropphase::io::{geotiff, GdalCatalog};
use cropphase::pipeline::{extents_for, CropPhasePipeline, PipelineConfig, PipelineRun};
use cropphase::render::{paint_outline, presentation, visualize, DisplaySession, LayerKind, WHITE};
use cropphase::PhaseRaster;

#[derive(Parser)]
#[command(name = "cropphase")]
#[command(author, version, about = "Cropland NDVI growth-phase classification", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct RunArgs {
    /// Catalog root: <root>/<dataset>/*.tif and <root>/<dataset>.geojson
    #[arg(short, long)]
    data: PathBuf,
    /// Output directory
    #[arg(short, long)]
    output: PathBuf,
    /// JSON pipeline configuration (defaults to Dhamtari 2020)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Fixed thinning seed; overrides the configuration
    #[arg(long, conflicts_with = "clock_seed")]
    seed: Option<u64>,
    /// Seed thinning from the clock
    #[arg(long)]
    clock_seed: bool,
    /// Use the scheme without a bare-soil class
    #[arg(long)]
    no_bare_soil: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Render one phase frame per acquisition plus a display manifest
    Animate {
        #[command(flatten)]
        args: RunArgs,
    },
    /// Render one maximum-extent snapshot per phase plus a display manifest
    Extents {
        #[command(flatten)]
        args: RunArgs,
    },
    /// Write the default configuration as JSON
    Config {
        /// Output file
        output: PathBuf,
    },
}

fn load_config(args: &RunArgs) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.mask.seed = ThinningSeed::Fixed(seed);
    }
    if args.clock_seed {
        config.mask.seed = ThinningSeed::Clock;
    }
    if args.no_bare_soil {
        config.phases = PhaseScheme::without_bare_soil();
    }
    Ok(config)
}

fn execute(args: &RunArgs) -> Result<(PipelineConfig, PipelineRun)> {
    let config = load_config(args)?;
    let catalog = GdalCatalog::new(&args.data)?;
    let pipeline = CropPhasePipeline::new(config.clone())?;
    let run = pipeline.execute(&catalog).context("Pipeline run failed")?;
    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;
    Ok((config, run))
}

fn path_string(path: &Path) -> Option<String> {
    Some(path.display().to_string())
}

fn write_common_layers(session: &mut DisplaySession, run: &PipelineRun, output: &Path) -> Result<()> {
    let mask_path = output.join("cropland_mask.tif");
    geotiff::write_mask(&run.analysis_mask.mask, &run.analysis_mask.grid, &mask_path)?;
    session.add_layer("Cropland Mask", LayerKind::CroplandMask, path_string(&mask_path));

    let boundary_path = output.join("boundary.tif");
    let region_mask = run.region.rasterize(&run.analysis_mask.grid);
    geotiff::write_mask(&region_mask, &run.analysis_mask.grid, &boundary_path)?;
    session.add_layer(
        format!("{} Boundary", run.region.name()),
        LayerKind::Boundary,
        path_string(&boundary_path),
    );
    Ok(())
}

fn animate(args: &RunArgs) -> Result<()> {
    let (config, run) = execute(args)?;
    let (palette, legend) = presentation(&config.phases);
    let region_mask = run.region.rasterize(&run.analysis_mask.grid);

    let mut session = DisplaySession::new(format!(
        "NDVI Crop Phase Animation ({})",
        config.start_date.format("%Y")
    ));
    session.set_legend(legend);

    for (i, raster) in run.series.iter().enumerate() {
        let date = raster.timestamp.format("%Y-%m-%d").to_string();

        let phase_path = args.output.join(format!("phase_{:03}_{}.tif", i, date));
        geotiff::write_phase(raster, &phase_path)?;

        let mut frame = visualize(raster, &palette)?;
        paint_outline(&mut frame, &region_mask, WHITE)?;
        let frame_path = args.output.join(format!("frame_{:03}_{}.tif", i, date));
        geotiff::write_rgb(&frame, &raster.grid, &frame_path)?;

        session.add_layer(
            date,
            LayerKind::Frame {
                timestamp: raster.timestamp,
            },
            path_string(&frame_path),
        );
    }

    write_common_layers(&mut session, &run, &args.output)?;
    session.write_manifest(args.output.join("session.json"))?;

    println!("Frames: {}", run.series.len());
    if !run.series.warnings.is_empty() {
        println!("Capacity warnings: {}", run.series.warnings.len());
    }
    Ok(())
}

fn extents(args: &RunArgs) -> Result<()> {
    let (config, run) = execute(args)?;
    let (palette, legend) = presentation(&config.phases);

    let mut session = DisplaySession::new(format!(
        "Crop Phase Maximum Extent ({})",
        config.start_date.format("%Y")
    ));
    session.set_legend(legend);

    for extent in extents_for(&run, &config.phases)? {
        let composite = PhaseRaster {
            timestamp: run.series.rasters[0].timestamp,
            phase: extent.composite.clone(),
            grid: extent.grid,
        };
        let frame = visualize(&composite, &palette)?;
        let path = args.output.join(format!("extent_phase_{}.tif", extent.phase));
        geotiff::write_rgb(&frame, &extent.grid, &path)?;

        let at_max_path = args.output.join(format!("extent_phase_{}_at_max.tif", extent.phase));
        geotiff::write_mask(&extent.at_max, &extent.grid, &at_max_path)?;

        println!(
            "Phase {}: region maximum {} acquisitions",
            extent.phase,
            extent
                .max_occurrence
                .map_or_else(|| "n/a".to_string(), |m| m.to_string())
        );
        session.add_layer(
            format!("Phase {} Maximum Extent", extent.phase),
            LayerKind::PhaseExtent {
                phase: extent.phase,
                max_occurrence: extent.max_occurrence,
            },
            path_string(&path),
        );
    }

    write_common_layers(&mut session, &run, &args.output)?;
    session.write_manifest(args.output.join("session.json"))?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let start = Instant::now();
    match cli.command {
        Commands::Animate { args } => animate(&args)?,
        Commands::Extents { args } => extents(&args)?,
        Commands::Config { output } => {
            PipelineConfig::default()
                .to_json_file(&output)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!("Configuration written to {}", output.display());
        }
    }
    log::info!("Done in {:.2?}", start.elapsed());
    Ok(())
}
