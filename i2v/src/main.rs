use std::{panic, process};

use clap::Parser;
use tracing::level_filters::LevelFilter;

use crate::{
    cli::{Commands, I2vCli},
    commands::{check_handler, clean_handler, generate_handler, prompts_handler, setup_handler},
    logging::init_logging,
};

mod cli;
mod commands;
mod logging;

pub const DEFAULT_LOG_PATH: &str = "./logs/i2v.log";

fn main() -> anyhow::Result<()> {
    let orig_hook = panic::take_hook();
    // Catch panics in worker threads
    panic::set_hook(Box::new(move |panic_info| {
        orig_hook(panic_info);
        process::exit(1);
    }));
    run()
}

fn run() -> anyhow::Result<()> {
    let cli = I2vCli::parse();
    let cwd = std::env::current_dir()?;
    let logs = cli.logs.clone().unwrap_or_else(|| cwd.join(DEFAULT_LOG_PATH));
    let _guard = init_logging(LevelFilter::INFO, &logs, LevelFilter::DEBUG)?;

    match cli.command {
        Commands::Setup {
            datasets,
            dl3dv_videos,
            realestate_videos,
            max_videos_per_dataset,
            download_workers,
            skip_download,
            skip_prompts,
            clear_existing,
            seed,
        } => {
            setup_handler(
                &cli.root,
                datasets,
                dl3dv_videos,
                realestate_videos,
                max_videos_per_dataset,
                download_workers,
                skip_download,
                skip_prompts,
                clear_existing,
                seed,
            )?;
        },
        Commands::Prompts {
            seed,
            regenerate,
        } => {
            prompts_handler(&cli.root, seed, regenerate)?;
        },
        Commands::Generate(options) => {
            generate_handler(&cli.root, &options)?;
        },
        Commands::Check {
            generator,
            skip_download,
            datasets,
        } => {
            check_handler(&cli.root, generator.as_deref(), skip_download, datasets)?;
        },
        Commands::Clean {
            yes,
        } => {
            clean_handler(&cli.root, yes)?;
        },
    }

    Ok(())
}
