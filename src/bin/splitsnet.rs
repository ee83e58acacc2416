use anyhow::Context;
use clap::{crate_name, crate_version, Parser};

use log::{error, info};
use splitsnet::{
    cli::{ProgramArgs, ProgramSubcommand},
    neighbour_net::neighbour_net::NeighbourNet,
    set_log_level,
};

fn main() {
    let app = ProgramArgs::parse();
    set_log_level(&app, true, crate_name!(), crate_version!());

    if let Err(err) = rayon::ThreadPoolBuilder::new()
        .num_threads(app.threads)
        .build_global()
        .context("Configuring rayon thread pool")
    {
        error!("{:#}", err);
        std::process::exit(1);
    }
    info!("Rayon threads: {}", rayon::current_num_threads());

    let result = match app.subcommand {
        ProgramSubcommand::NeighbourNet(args) => {
            NeighbourNet::new(app.output_directory, args).run().map(|_| ())
        }
    };

    if let Err(err) = result {
        error!("{:#}", err);
        std::process::exit(1);
    }
}
