use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "alphamux", version)]
struct Cli {
    /// Export settings JSON (codec, quality, queue_depth, ffmpeg_path, ffprobe_path).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output codec; overrides the config file.
    #[arg(long, value_enum, global = true)]
    codec: Option<CodecChoice>,

    /// Maximum number of sessions running at once.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..), global = true)]
    jobs: u16,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Merge a color video with its luminance mask video.
    Merge(MergeArgs),
    /// Convert an animated PNG into an alpha video.
    Apng(ApngArgs),
    /// Merge every `<name><source suffix>` / `<name><mask suffix>` pair under a directory.
    Batch(BatchArgs),
}

#[derive(Args, Debug)]
struct MergeArgs {
    /// Color video.
    source: PathBuf,
    /// Mask video; white keeps the color, black becomes transparent.
    mask: PathBuf,
    /// Output video path.
    output: PathBuf,
}

#[derive(Args, Debug)]
struct ApngArgs {
    /// Animated PNG input.
    input: PathBuf,
    /// Output video path.
    output: PathBuf,
}

#[derive(Args, Debug)]
struct BatchArgs {
    /// Directory searched recursively for source/mask pairs.
    #[arg(long)]
    root: PathBuf,

    #[arg(long, default_value = "_sozai.mp4")]
    source_suffix: String,

    #[arg(long, default_value = "_alpha.mp4")]
    mask_suffix: String,

    /// Directory receiving one `<pair directory name>.<ext>` output per pair.
    out_dir: PathBuf,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CodecChoice {
    Prores4444,
    Qtrle,
    HevcVideotoolbox,
    Vp9,
}

impl From<CodecChoice> for alphamux::VideoCodec {
    fn from(c: CodecChoice) -> Self {
        match c {
            CodecChoice::Prores4444 => Self::ProRes4444,
            CodecChoice::Qtrle => Self::Qtrle,
            CodecChoice::HevcVideotoolbox => Self::HevcVideoToolbox,
            CodecChoice::Vp9 => Self::Vp9,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_deref(), cli.codec)?;
    let jobs = usize::from(cli.jobs);
    match cli.cmd {
        Command::Merge(args) => cmd_merge(args, &cfg, jobs),
        Command::Apng(args) => cmd_apng(args, &cfg, jobs),
        Command::Batch(args) => cmd_batch(args, &cfg, jobs),
    }
}

fn load_config(
    path: Option<&Path>,
    codec: Option<CodecChoice>,
) -> anyhow::Result<alphamux::ExportConfig> {
    let mut cfg = match path {
        Some(path) => alphamux::ExportConfig::from_json_file(path)
            .with_context(|| format!("load config '{}'", path.display()))?,
        None => alphamux::ExportConfig::default(),
    };
    if let Some(codec) = codec {
        cfg = cfg.with_codec(codec.into());
    }
    cfg.validate()?;
    Ok(cfg)
}

fn cmd_merge(args: MergeArgs, cfg: &alphamux::ExportConfig, jobs: usize) -> anyhow::Result<()> {
    eprintln!("Merging…");
    let task = alphamux::MergeTask::track_pair(args.source, args.mask, args.output);
    report(vec![task], cfg, jobs, None)
}

fn cmd_apng(args: ApngArgs, cfg: &alphamux::ExportConfig, jobs: usize) -> anyhow::Result<()> {
    eprintln!("Converting…");
    let task = alphamux::MergeTask::animated_image(args.input, args.output);
    report(vec![task], cfg, jobs, None)
}

fn cmd_batch(args: BatchArgs, cfg: &alphamux::ExportConfig, jobs: usize) -> anyhow::Result<()> {
    let pairs =
        alphamux::dispatch::find_source_mask_pairs(&args.root, &args.source_suffix, &args.mask_suffix)
            .with_context(|| format!("scan '{}'", args.root.display()))?;
    let tasks = alphamux::dispatch::batch_tasks(&pairs, &args.out_dir, cfg.codec);
    eprintln!("Merging {} file(s)…", tasks.len());
    report(tasks, cfg, jobs, Some(&args.out_dir))
}

fn report(
    tasks: Vec<alphamux::MergeTask>,
    cfg: &alphamux::ExportConfig,
    jobs: usize,
    out_dir: Option<&Path>,
) -> anyhow::Result<()> {
    let batch = alphamux::dispatch::run_tasks(tasks, jobs, cfg);
    for failure in batch.failures() {
        if let Err(err) = &failure.result {
            eprintln!("Failed with error: {err} ({})", failure.task.source.describe());
        }
    }

    match out_dir {
        Some(dir) => eprintln!("Merged {} file(s) to folder: \"{}\"", batch.merged(), dir.display()),
        None => {
            for ok in batch.outcomes.iter().filter(|o| o.result.is_ok()) {
                eprintln!("Merged file: \"{}\"", ok.task.output.display());
            }
        }
    }

    if batch.failed() > 0 {
        anyhow::bail!("{} of {} file(s) failed", batch.failed(), batch.outcomes.len());
    }
    Ok(())
}
