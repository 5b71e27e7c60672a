use clap::Parser;

#[derive(Parser)]
#[command(name = "liftgate")]
#[command(version = "0.3.0")]
#[command(about = "Experiment evaluation and pattern lifecycle engine for content A/B rollouts")]
pub struct Args {
    /// Path to a TOML config file (defaults are used when omitted)
    #[arg(long)]
    pub config: Option<String>,

    /// Number of simulated evaluation cycles to run
    #[arg(long, default_value = "4")]
    pub cycles: u32,

    /// Size of the simulated target universe (pages)
    #[arg(long, default_value = "12")]
    pub targets: usize,

    /// Number of targets assigned to the pilot subset
    #[arg(long, default_value = "2")]
    pub pilot: usize,

    /// Print each cycle report as JSON instead of the colored summary
    #[arg(long)]
    pub json: bool,

    /// Run the periodic loop instead of a fixed number of cycles
    #[arg(long)]
    pub watch: bool,

    /// Poll interval for --watch, in seconds
    #[arg(long, default_value = "3600")]
    pub interval_secs: u64,
}
