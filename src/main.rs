use clap::Parser;

use sfm_trainer::cli::{self, TrainArgs};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    cli::run(TrainArgs::parse())
}
