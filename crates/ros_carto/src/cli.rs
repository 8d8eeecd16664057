use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint};
use log::LevelFilter;

use crate::config::defs::Config;

/// CLI options for the ROS Cartographer sensor bridge.
#[derive(Parser, Debug)]
#[clap(author, about, version)]
pub struct Options {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Set the log level
    #[arg(long, default_value_t = LevelFilter::Info)]
    pub log_level: LevelFilter,

    /// MCAP recording to play back
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub bag: Option<PathBuf>,

    /// Frame all sensor records are expressed in
    #[arg(long)]
    pub tracking_frame: Option<String>,

    /// Subcommand passed to the CLI.
    #[command(subcommand)]
    pub subcommands: Option<Subcommands>,
}

impl Options {
    pub fn new() -> Self {
        Self::parse()
    }

    pub fn override_config(&self, config: &mut Config) {
        if let Some(bag) = &self.bag {
            config.input.bag = Some(bag.clone());
        }
        if let Some(tracking_frame) = &self.tracking_frame {
            config.bridge.tracking_frame.clone_from(tracking_frame);
        }
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Subcommands {
    /// Validate the configuration and print the resulting topology
    Check(CheckOptions),
}

#[derive(Args, Debug)]
pub struct CheckOptions {
    /// Also print the effective configuration
    #[arg(long)]
    pub print_config: bool,
}
