use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::engine::DEFAULT_RECOMMENDATIONS;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Directory holding config.yaml; relative catalog paths resolve against it
    #[clap(long, global = true, default_value = ".")]
    pub base_path: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the recommendation API.
    Serve {},

    /// Recommend products for a query and print them as JSON
    Recommend {
        /// Free-text description of what you are looking for
        query: String,

        /// Number of recommendations
        #[clap(short = 'n', long, default_value_t = DEFAULT_RECOMMENDATIONS)]
        count: usize,
    },

    /// Print engine status
    Status {},
}
