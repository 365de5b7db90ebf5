//! relstrap CLI entry point
//!
//! Parses arguments, forwards Ctrl-C to the installer as a cancellation
//! request and prints failures with context and suggestions.

use anyhow::Result;
use clap::Parser;
use relstrap::cli;
use relstrap::core::CancelFlag;
use relstrap::core::error::user_friendly_error;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    // Running steps finish; no new step starts after Ctrl-C
    let cancel = CancelFlag::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupt received, finishing running steps...");
            on_interrupt.cancel();
        }
    });

    match cli.execute(cancel).await {
        Ok(()) => Ok(()),
        Err(e) => {
            let error_ctx = user_friendly_error(e);
            error_ctx.display();
            std::process::exit(1);
        }
    }
}
