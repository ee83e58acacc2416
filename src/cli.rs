use clap::{Args, Parser, Subcommand};

use crate::{algorithms::equal_angle::EqualAngleOpts, weights::NNLSParams};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct ProgramArgs {
    #[command(subcommand)]
    pub subcommand: ProgramSubcommand,
    #[arg(
        short,
        long,
        default_value = "1",
        global = true,
        help = "Number of threads to use."
    )]
    pub threads: usize,
    #[arg(
        short,
        long,
        default_value = "false",
        conflicts_with = "quiet",
        global = true
    )]
    pub verbose: bool,
    #[arg(
        short,
        long,
        default_value = "false",
        conflicts_with = "verbose",
        global = true
    )]
    pub quiet: bool,
    #[arg(
        short = 'd',
        long,
        default_value = "output",
        global = true,
        help = "Output directory"
    )]
    pub output_directory: String,
}

#[derive(Subcommand, Debug)]
pub enum ProgramSubcommand {
    #[clap(
        name = "neighbour_net",
        about = "Compute a NeighborNet split network from a distance matrix"
    )]
    NeighbourNet(NeighbourNetArgs),
}

#[derive(Args, Debug, Clone)]
pub struct NeighbourNetArgs {
    #[arg(short, long, help = "Input distance matrix file path", required = true)]
    pub input: String,
    #[arg(
        short,
        long,
        help = "Output prefix for result files",
        default_value = "output"
    )]
    pub output_prefix: String,
    #[clap(flatten)]
    pub nnls_params: NNLSParams,
    #[clap(flatten)]
    pub layout: EqualAngleOpts,
}

impl Default for NeighbourNetArgs {
    fn default() -> Self {
        Self {
            input: String::new(),
            output_prefix: String::from("output"),
            nnls_params: NNLSParams::default(),
            layout: EqualAngleOpts::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weights::LeastSquares;
    use clap::CommandFactory;

    #[test]
    fn command_is_well_formed() {
        ProgramArgs::command().debug_assert();
    }

    #[test]
    fn flags_reach_both_parameter_groups() {
        let args = ProgramArgs::parse_from([
            "splitsnet",
            "neighbour_net",
            "-i",
            "d.csv",
            "--least-squares",
            "weighted",
            "--star",
            "--daylight-iterations",
            "3",
            "--use-weights",
            "false",
            "-v",
        ]);
        assert!(args.verbose);
        let ProgramSubcommand::NeighbourNet(nn) = args.subcommand;
        assert_eq!(nn.input, "d.csv");
        assert_eq!(nn.nnls_params.least_squares, LeastSquares::Weighted);
        assert!(nn.nnls_params.star);
        assert_eq!(nn.layout.daylight_iterations, 3);
        assert!(!nn.layout.use_weights);
        assert!(nn.layout.avoid_collisions);
    }
}
