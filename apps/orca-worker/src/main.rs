use clap::Parser;

use orca_worker::Args;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	orca_worker::run(Args::parse()).await
}
