use clap::Parser;

/// wayback-discover-diff service cli
#[derive(Parser)]
#[command(name = "wayback-discover-diff")]
#[command(about = "Computes and serves SimHash fingerprints of archived web captures")]
#[command(version)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "conf.yml")]
    pub config: String,

    /// Address to bind the HTTP server to
    #[arg(short, long, default_value = "0.0.0.0:8096")]
    pub bind: String,

    /// Directory for rotating log files (stdout only when omitted)
    #[arg(long)]
    pub log_dir: Option<String>,
}

impl Cli {
    /// parse args
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
