use clap::Parser;

use ambient_common::args::OtelArgs;

#[derive(Parser, Debug)]
#[command(name = "ambient-operator")]
#[command(about = "Reconciles Session objects into runner workloads")]
pub struct Cli {
    /// Port for health probes and prometheus metrics
    #[arg(long, env = "METRICS_PORT", default_value_t = 9090)]
    pub metrics_port: u16,

    #[clap(flatten)]
    pub otel: OtelArgs,
}
