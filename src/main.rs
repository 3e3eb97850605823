use std::{env, path::PathBuf};

use anyhow::{Context, Result, bail};
use beauty_score::{BeautyConfig, BeautyModel, Dataset};
use env_logger::Env;
use log::info;

const USAGE: &str = "usage: beauty [--config <path>] [train | evaluate | predict <image>...]";

enum Command {
    Train,
    Evaluate,
    Predict(Vec<PathBuf>),
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let (config_path, command) = parse_args(env::args().skip(1))?;
    let config = BeautyConfig::resolve(config_path.as_deref())
        .context("failed to read the configuration")?;

    match command {
        Command::Train => train(&config),
        Command::Evaluate => evaluate(&config),
        Command::Predict(paths) => predict(&config, &paths),
    }
}

fn parse_args<I: Iterator<Item = String>>(mut args: I) -> Result<(Option<PathBuf>, Command)> {
    let mut config = None;
    let mut command = None;
    let mut images = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => match args.next() {
                Some(path) => config = Some(PathBuf::from(path)),
                None => bail!("--config needs a path\n{USAGE}"),
            },
            "-h" | "--help" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            "train" | "evaluate" | "predict" if command.is_none() => command = Some(arg.clone()),
            _ if command.as_deref() == Some("predict") => images.push(PathBuf::from(&arg)),
            _ => bail!("unexpected argument {arg:?}\n{USAGE}"),
        }
    }

    let command = match command.as_deref() {
        None | Some("train") => Command::Train,
        Some("evaluate") => Command::Evaluate,
        _ if images.is_empty() => bail!("predict needs at least one image\n{USAGE}"),
        _ => Command::Predict(images),
    };

    Ok((config, command))
}

fn train(config: &BeautyConfig) -> Result<()> {
    let dataset = Dataset::load(config).context("failed to load the dataset")?;
    let split = dataset.train_test_split(config.test_size, config.seed)?;

    let mut model = BeautyModel::from_config(config).context("failed to build the model")?;
    model.summary();

    let (_, score) = model.train(&split).context("training failed")?;
    info!("final score: {score:.2}");
    Ok(())
}

fn evaluate(config: &BeautyConfig) -> Result<()> {
    let dataset = Dataset::load(config).context("failed to load the dataset")?;
    let split = dataset.train_test_split(config.test_size, config.seed)?;

    let mut model = BeautyModel::load(config).context("failed to load the model")?;
    let score = model.evaluate(split.test_x.view(), split.test_y.view())?;

    println!("score: {score:.2}");
    Ok(())
}

fn predict(config: &BeautyConfig, paths: &[PathBuf]) -> Result<()> {
    let mut model = BeautyModel::load(config).context("failed to load the model")?;

    for path in paths {
        let score = model
            .predict_path(path)
            .with_context(|| format!("failed to score {}", path.display()))?;

        println!(
            "{}: {score:.4} (rating {:.2})",
            path.display(),
            model.rating(score)
        );
    }

    Ok(())
}
