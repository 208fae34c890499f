use std::process;

use clap::Parser;
use log::error;
use pbf_extract::Config;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::parse();
    if let Err(err) = pbf_extract::run(&config) {
        error!("{err}");
        process::exit(err.exit_code());
    }
}
