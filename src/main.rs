mod commandline;

use anyhow::{Context, Result};
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use std::{ops::Deref, panic, thread};
use zevabms_lib::monitor::UnitSnapshot;
use zevabms_lib::protocol::CELLS_PER_UNIT;
use zevabms_lib::socketcan::ZevaBus;

use crate::commandline::{CliArgs, CliCommands};

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    log_handle
}

fn print_unit(snapshot: &UnitSnapshot) {
    let version = snapshot
        .version
        .map(|v| v.to_string())
        .unwrap_or_else(|| String::from("?"));
    print!("[{:2}] v{:<6}", snapshot.unit, version);
    let mut next_cell = 0;
    for &(cell, millivolts) in &snapshot.cell_millivolts {
        // Cells that never reported this cycle show as blanks.
        for _ in next_cell..cell {
            print!("     -");
        }
        print!(" {millivolts:5}");
        next_cell = cell + 1;
    }
    for _ in next_cell..CELLS_PER_UNIT {
        print!("     -");
    }
    for &(_, celsius) in &snapshot.temperatures {
        print!(" {celsius:3}C");
    }
    println!();
}

fn run_cycle(bus: &mut ZevaBus) -> Result<()> {
    let found = bus.scan().with_context(|| "Scan cycle failed")?;
    if found == 0 {
        println!("No units responded");
    } else {
        for snapshot in bus.snapshots() {
            print_unit(&snapshot);
        }
    }
    if bus.decode_errors() > 0 {
        warn!("{} frames dropped as undecodable so far", bus.decode_errors());
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());

    let mut bus = ZevaBus::new(&args.interface)
        .with_context(|| format!("Cannot open CAN interface '{}'", args.interface))?;
    bus.set_collection_window(args.window);
    bus.set_shunt_millivolts(args.shunt);

    match args.command {
        CliCommands::Scan => run_cycle(&mut bus)?,
        CliCommands::Monitor { interval } => loop {
            run_cycle(&mut bus)?;
            thread::sleep(interval);
        },
    }

    Ok(())
}
