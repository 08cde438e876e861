// uart2uart - Dual serial port bridge and firmware flasher
use clap::Parser;
use uart2uart::cli::args::Args;
use uart2uart::cli::commands::execute_command;
use uart2uart::domain::error::BridgeError;

#[tokio::main]
async fn main() -> Result<(), BridgeError> {
    let args = Args::parse();

    match execute_command(args).await {
        Ok(()) => Ok(()),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
