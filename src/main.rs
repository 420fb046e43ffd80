pub mod rp2040;

use clap::{Args, Parser, Subcommand};
use clap_num::maybe_hex;
use colored::Colorize;
use panic_message::panic_message;
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
    {panic, process, thread},
};
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Serial port connected to the RP2040 bootloader UART (defaults to the first port found)
    #[arg(long)]
    port: Option<String>,

    /// Bootloader UART baud rate
    #[arg(long, default_value_t = 921_600)]
    baud: u32,

    /// I2C bus device used to control the RP2040
    #[arg(long, default_value = "/dev/i2c-0")]
    i2c: PathBuf,

    /// RP2040 I2C address
    #[arg(long, value_parser = maybe_hex::<u16>, default_value_t = rp2040::DEFAULT_I2C_ADDRESS)]
    address: u16,

    /// Time to wait after each RP2040 reset, in milliseconds
    #[arg(long, default_value_t = 500)]
    settle: u64,

    /// Increase log verbosity (can be repeated)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// List available serial ports
    List,

    /// Install custom firmware if needed and launch it, falling back to stock firmware on error
    Run(RunArgs),

    /// Reboot the RP2040 into its stock firmware
    Stock,

    /// Print bootloader and flash information, then return to stock firmware
    Info(FirmwareArgs),

    /// Print length and checksum of a firmware image
    Firmware(FirmwareArgs),
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    image: FirmwareArgs,

    /// Exit right after launching instead of waiting for Ctrl-C to return to stock firmware
    #[arg(long)]
    detach: bool,
}

#[derive(Args)]
struct FirmwareArgs {
    /// Path to the custom firmware binary (defaults to the image embedded at build time)
    #[arg(long)]
    firmware: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    #[cfg(not(debug_assertions))]
    {
        panic::set_hook(Box::new(|_| {}));
    }

    match panic::catch_unwind(|| handle_command(&cli)) {
        Ok(_) => {}
        Err(payload) => {
            eprintln!("{}", panic_message(&payload).red());
            process::exit(1);
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    tracing_subscriber::fmt()
        .without_time()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn handle_command(cli: &Cli) {
    let result = match &cli.command {
        Commands::List => handle_list_command(),
        Commands::Run(args) => handle_run_command(cli, args),
        Commands::Stock => handle_stock_command(cli),
        Commands::Info(args) => handle_info_command(cli, args),
        Commands::Firmware(args) => handle_firmware_command(args),
    };
    match result {
        Ok(()) => {}
        Err(error) => panic!("{error}"),
    };
}

fn handle_list_command() -> Result<(), rp2040::Error> {
    let ports = rp2040::list_serial_ports()?;

    println!("{}", "Found serial ports:".bold());
    for (i, p) in ports.iter().enumerate() {
        println!(" {i}: {} ({})", p.port, p.description);
    }

    Ok(())
}

fn handle_run_command(cli: &Cli, args: &RunArgs) -> Result<(), rp2040::Error> {
    let firmware = rp2040::Firmware::resolve(args.image.firmware.as_deref())?;
    let exit = setup_exit_flag();
    let mut rp2040 = init_rp2040(cli)?.with_cancel_flag(exit.clone());

    match rp2040.run_custom(&firmware) {
        rp2040::Outcome::Launched => {}
        outcome => panic!("{outcome}"),
    }

    if args.detach {
        println!("{}", "Custom firmware running".green());
        return Ok(());
    }

    println!("{}", "Custom firmware running, press Ctrl-C to exit".bold());
    while !exit.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(50));
    }

    rp2040.reboot_to_stock()?;
    println!("{}", "Stock firmware restored".green());

    Ok(())
}

fn handle_stock_command(cli: &Cli) -> Result<(), rp2040::Error> {
    init_rp2040(cli)?.reboot_to_stock()?;
    println!("{}", "Stock firmware running".green());
    Ok(())
}

fn handle_info_command(cli: &Cli, args: &FirmwareArgs) -> Result<(), rp2040::Error> {
    let firmware = match &args.firmware {
        Some(path) => Some(rp2040::Firmware::load(path)?),
        None => rp2040::Firmware::embedded(),
    };

    let report = init_rp2040(cli)?.inspect(firmware.as_ref())?;

    println!("{}", "RP2040 information:".bold());
    println!(" Firmware version:   0x{:02X}", report.firmware_version);
    println!(" Bootloader version: 0x{:02X}", report.bootloader_version);
    println!(" Flash:              {}", report.flash);
    println!(
        " Custom region:      0x{:08X}, capacity 0x{:X}",
        rp2040::CUSTOM_FIRMWARE_ADDRESS,
        report.custom_capacity
    );
    match report.installed_matches {
        Some(true) => println!(" Installed image:    {}", "up to date".green()),
        Some(false) => println!(" Installed image:    {}", "differs".yellow()),
        None => println!(" Installed image:    no firmware to compare"),
    }

    Ok(())
}

fn handle_firmware_command(args: &FirmwareArgs) -> Result<(), rp2040::Error> {
    let firmware = rp2040::Firmware::resolve(args.firmware.as_deref())?;
    println!("{}", "Firmware image:".bold());
    println!("{}", firmware);
    println!(
        "Target address: 0x{:08X}",
        rp2040::CUSTOM_FIRMWARE_ADDRESS
    );
    Ok(())
}

fn init_rp2040(cli: &Cli) -> Result<rp2040::Rp2040, rp2040::Error> {
    let port = match &cli.port {
        Some(port) => port.clone(),
        None => rp2040::list_serial_ports()?[0].port.clone(),
    };

    let timings = rp2040::Timings {
        settle: Duration::from_millis(cli.settle),
        ..rp2040::Timings::default()
    };

    Ok(rp2040::new(&port, cli.baud, cli.i2c.clone(), cli.address).with_timings(timings))
}

fn setup_exit_flag() -> Arc<AtomicBool> {
    let exit_flag = Arc::new(AtomicBool::new(false));
    let handler_exit_flag = exit_flag.clone();

    ctrlc::set_handler(move || {
        handler_exit_flag.store(true, Ordering::Relaxed);
    })
    .unwrap();

    exit_flag
}
