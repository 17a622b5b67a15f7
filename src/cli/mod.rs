mod hook;
mod serve;

use clap::{Args, Parser, Subcommand};
use tracing::info;

use crate::errors::Result;

#[derive(Debug, Parser)]
#[command(
    name = "hookgate",
    version,
    about = "Hook notification channel for a VCS hosting server"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the hook server and print the invocation environment for
    /// each configured repository.
    Serve(ServeArgs),
    /// Report a hook event back to the server (run from a VCS hook).
    Hook(HookArgs),
}

#[derive(Debug, Args, Clone, Default)]
pub struct ServeArgs {
    #[arg(long)]
    pub bind: Option<String>,
    #[arg(long)]
    pub port: Option<u16>,
}

#[derive(Debug, Args, Clone)]
pub struct HookArgs {
    /// pre-receive or post-receive
    pub hook_type: String,
}

pub async fn dispatch() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve::execute(args).await?,
        Command::Hook(args) => hook::execute(args).await?,
    }
    info!("command completed");
    Ok(())
}
