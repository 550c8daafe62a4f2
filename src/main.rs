use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use imscore::harness::{self, RunOptions};
use imscore::{parse_device, parse_dtype, ModelName, Source};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Load each reward scorer and score the sample image pair once
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Scorers to run, in order (defaults to all of them)
    #[arg(short, long, num_args = 1..)]
    names: Vec<String>,

    /// Device (cpu, cuda, 0, 1, ...)
    #[arg(short, long)]
    device: Option<String>,

    /// Numeric type (f32, bf16, f16); bf16 on CUDA and f32 on CPU by default
    #[arg(long)]
    dtype: Option<String>,

    /// Preferred image
    #[arg(long, default_value = harness::GOOD_IMAGE)]
    good: PathBuf,

    /// Rejected image
    #[arg(long, default_value = harness::BAD_IMAGE)]
    bad: PathBuf,

    /// Prompt paired with both images
    #[arg(short, long, default_value = harness::DEFAULT_PROMPT)]
    prompt: String,

    /// Square size the images are resized to
    #[arg(short, long, default_value_t = harness::DEFAULT_SIZE)]
    size: usize,

    /// Build every scorer over this base model instead of its checkpoint
    #[arg(long)]
    base_model: Option<String>,

    /// Skip the gradient-link assertion
    #[arg(long)]
    no_grad_check: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let device = parse_device(args.device.as_deref())?;
    let dtype = parse_dtype(args.dtype.as_deref(), &device)?;
    info!("Device: {:?}, dtype: {:?}", device, dtype);

    let names = if args.names.is_empty() {
        ModelName::ALL.iter().map(|name| name.to_string()).collect()
    } else {
        args.names
    };

    let options = RunOptions {
        images: [args.good, args.bad],
        prompt: args.prompt,
        size: args.size,
        check_grad: !args.no_grad_check,
        source: args.base_model.map(Source::Base),
        ..RunOptions::new(device, dtype)
    };

    let template = concat!(
        "{spinner:.green} [{elapsed_precise}] [{bar:.cyan/blue}] ",
        "{wide_msg} {human_pos}/{human_len}"
    );
    let pb = ProgressBar::new(names.len() as u64);
    pb.set_style(ProgressStyle::with_template(template)?.progress_chars("#>-"));

    for name in &names {
        pb.set_message(name.clone());
        let score = pb
            .suspend(|| {
                info!("Testing {}", name);
                harness::testrun(name, &options)
            })
            .with_context(|| format!("smoke run of {name} failed"))?;
        pb.suspend(|| info!("Score: {}", score));
        pb.inc(1);
    }
    pb.finish_and_clear();

    Ok(())
}
