mod platform;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use mapjob_core::JobConfig;
use url::Url;

use crate::platform::logging::LogDestination;

#[derive(Parser)]
#[command(name = "mapjob", about = "Submit geospatial map jobs and follow them to completion")]
pub struct Cli {
    /// Processing service origin. Without it jobs run in a local simulation.
    #[arg(long, env = "MAPJOB_API_URL")]
    pub api_url: Option<Url>,

    /// Where pending jobs, the last outcome and config.ron live
    #[arg(long, env = "MAPJOB_DATA_DIR", default_value = ".mapjob")]
    pub data_dir: PathBuf,

    /// Where downloaded results are saved
    #[arg(long, env = "MAPJOB_DOWNLOAD_DIR", default_value = "downloads")]
    pub download_dir: PathBuf,

    /// Signed-in user id; omit to run anonymously
    #[arg(long)]
    pub user: Option<String>,

    #[arg(long, value_enum, default_value_t = LogDestination::File)]
    pub log: LogDestination,

    /// Log at debug level
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Upload a geospatial file and run a job on it
    Run {
        file: PathBuf,
        #[command(flatten)]
        job: JobArgs,
    },
    /// Run a job on an area given as coordinates ("lon,lat;lon,lat;...")
    Draw {
        #[arg(long = "polygon")]
        polygons: Vec<String>,
        #[arg(long = "line")]
        lines: Vec<String>,
        #[arg(long = "point")]
        points: Vec<String>,
        #[command(flatten)]
        job: JobArgs,
    },
    /// Submit the input of the last failed job again
    Retry {
        #[arg(long)]
        download: bool,
    },
    /// Show the last outcome if it is still fresh
    Show {
        #[arg(long)]
        download: bool,
    },
    /// Sign in as --user and claim jobs created anonymously
    Claim,
    /// Report rate-limit and service health
    Status,
    /// Forget the last outcome and start from an empty upload
    Reset,
}

#[derive(Args, Debug, Clone)]
pub struct JobArgs {
    /// Buffer distance around the input, in feet
    #[arg(long, default_value_t = 500)]
    pub buffer_feet: u32,

    /// Clip distance for the map extent, in miles
    #[arg(long, default_value_t = 1.0)]
    pub clip_miles: f64,

    #[arg(long, default_value = "")]
    pub project_name: String,

    #[arg(long, default_value = "")]
    pub project_id: String,

    /// Save the result archive into the download directory
    #[arg(long)]
    pub download: bool,
}

impl JobArgs {
    pub fn config(&self) -> JobConfig {
        JobConfig {
            buffer_distance_feet: self.buffer_feet,
            clip_buffer_miles: self.clip_miles,
            project_name: self.project_name.clone(),
            project_id: self.project_id.clone(),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    platform::logging::initialize(cli.log, cli.verbose);
    platform::app::run(cli)
}
