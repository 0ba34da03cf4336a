use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::time::Duration;

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Probe all 16 unit addresses once and print a table of cell voltages
    Scan,
    /// Repeatedly scan the bus at a fixed interval until interrupted
    Monitor {
        /// Time between scan cycles (e.g., "5s", "500ms")
        #[clap(long, short, value_parser = humantime::parse_duration, default_value = "5s")]
        interval: Duration,
    },
}

const fn about_text() -> &'static str {
    "ZEVA BMS12/BMS24 CAN bus monitor"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// SocketCAN interface name (e.g., can0)
    #[arg(short, long, default_value = "can0")]
    pub interface: String,

    #[command(subcommand)]
    pub command: CliCommands,

    /// How long to keep collecting unit replies after issuing requests
    /// (e.g., "100ms", "250ms")
    #[arg(value_parser = humantime::parse_duration, long, default_value = "100ms")]
    pub window: Duration,

    /// Shunt balancing level in millivolts carried by query frames
    /// (0 disables shunting)
    #[arg(long, default_value = "0")]
    pub shunt: u16,
}
