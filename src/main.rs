//main.rs
use anyhow::Context;
use clap::{Parser, Subcommand, ValueHint};
use std::path::PathBuf;
use vestis::{cluster, features, inspect, resize, verify, PipelineConfig, PixelScale, TensorLayout};

#[derive(Parser)]
#[clap(version = "0.2.0", author = "Stefan L. <stefan.lang@med.lu.se>")]
#[command(about = "Resize, embed, reduce and cluster fashion photos")]
struct Opts {
    /// JSON file with pipeline settings; flags below override it
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Project root holding the source and processed folders
    #[arg(short, long, value_hint = ValueHint::DirPath)]
    root: Option<PathBuf>,

    /// Folder with the raw category folders, relative to the root
    #[arg(long)]
    source_dir: Option<String>,

    /// Folder receiving resized images and all artifacts, relative to the root
    #[arg(long)]
    processed_dir: Option<String>,

    /// Side length of resized images
    #[arg(long)]
    image_size: Option<u32>,

    /// Log and skip undecodable images instead of aborting
    #[arg(long)]
    skip_corrupt: bool,

    /// ONNX backbone without its classification head
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    model: Option<PathBuf>,

    /// Side length the backbone expects
    #[arg(long)]
    model_input_size: Option<u32>,

    #[arg(long, value_enum)]
    pixel_scale: Option<PixelScale>,

    #[arg(long, value_enum)]
    tensor_layout: Option<TensorLayout>,

    /// ONNX Runtime intra-op threads
    #[arg(long)]
    threads: Option<usize>,

    /// PCA components
    #[arg(short, long)]
    dims: Option<usize>,

    /// Number of clusters
    #[arg(short, long)]
    k: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    /// Passes over the data
    #[arg(long)]
    max_iter: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// t-SNE perplexity
    #[arg(long)]
    perplexity: Option<f64>,

    /// Images drawn from the largest cluster
    #[arg(long)]
    samples: Option<usize>,

    /// Suffix for the derived artifacts of this run, e.g. `v1`
    #[arg(short, long)]
    tag: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resize the raw category images
    Resize,
    /// Embed resized images with the backbone
    Extract,
    /// PCA + mini-batch K-means over the embeddings
    Cluster,
    /// Cluster size statistics and a t-SNE view
    Verify {
        #[arg(long)]
        skip_tsne: bool,
    },
    /// Sample the largest cluster
    Inspect,
    /// All stages in order
    Run {
        #[arg(long)]
        skip_tsne: bool,
    },
}

fn build_config(opts: &Opts) -> anyhow::Result<PipelineConfig> {
    let mut cfg = match &opts.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(v) = &opts.root { cfg.root = v.clone(); }
    if let Some(v) = &opts.source_dir { cfg.source_dir = v.clone(); }
    if let Some(v) = &opts.processed_dir { cfg.processed_dir = v.clone(); }
    if let Some(v) = opts.image_size { cfg.image_size = v; }
    if opts.skip_corrupt { cfg.skip_corrupt = true; }
    if let Some(v) = &opts.model { cfg.model_path = v.clone(); }
    if let Some(v) = opts.model_input_size { cfg.model_input_size = v; }
    if let Some(v) = opts.pixel_scale { cfg.pixel_scale = v; }
    if let Some(v) = opts.tensor_layout { cfg.tensor_layout = v; }
    if let Some(v) = opts.threads { cfg.threads = v.max(1); }
    if let Some(v) = opts.dims { cfg.reduced_dims = v; }
    if let Some(v) = opts.k { cfg.n_clusters = v; }
    if let Some(v) = opts.batch_size { cfg.batch_size = v; }
    if let Some(v) = opts.max_iter { cfg.max_iter = v; }
    if let Some(v) = opts.seed { cfg.seed = v; }
    if let Some(v) = opts.perplexity { cfg.perplexity = v; }
    if let Some(v) = opts.samples { cfg.sample_size = v; }
    if let Some(v) = &opts.tag { cfg.run_tag = Some(v.clone()); }
    cfg.validate()?;
    Ok(cfg)
}

fn do_resize(cfg: &PipelineConfig) -> anyhow::Result<()> {
    for s in resize::run(cfg).context("resize stage failed")? {
        println!("{}: {} images resized, {} skipped", s.category, s.written, s.skipped);
    }
    Ok(())
}

fn do_extract(cfg: &PipelineConfig) -> anyhow::Result<()> {
    let index = features::run(cfg).context("feature extraction failed")?;
    println!(
        "Feature extraction complete! {} images indexed in {:?}",
        index.len(),
        cfg.processed_root()
    );
    Ok(())
}

fn do_cluster(cfg: &PipelineConfig) -> anyhow::Result<()> {
    let model = cluster::run(cfg).context("reduction/clustering failed")?;
    println!(
        "Assigned {} points into {} clusters",
        model.labels.len(),
        model.centroids.nrows()
    );
    Ok(())
}

fn do_verify(cfg: &PipelineConfig, skip_tsne: bool) -> anyhow::Result<()> {
    let stats = verify::run(cfg, !skip_tsne).context("cluster verification failed")?;
    println!("\n{stats}");
    Ok(())
}

fn do_inspect(cfg: &PipelineConfig) -> anyhow::Result<()> {
    let inspection = inspect::run(cfg).context("cluster inspection failed")?;
    println!("{inspection}");
    println!("Contact sheet: {:?}", inspection.sheet);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let opts = Opts::parse();
    let cfg = build_config(&opts)?;

    match opts.command {
        Command::Resize => do_resize(&cfg)?,
        Command::Extract => do_extract(&cfg)?,
        Command::Cluster => do_cluster(&cfg)?,
        Command::Verify { skip_tsne } => do_verify(&cfg, skip_tsne)?,
        Command::Inspect => do_inspect(&cfg)?,
        Command::Run { skip_tsne } => {
            do_resize(&cfg)?;
            do_extract(&cfg)?;
            do_cluster(&cfg)?;
            do_verify(&cfg, skip_tsne)?;
            do_inspect(&cfg)?;
        }
    }

    Ok(())
}
