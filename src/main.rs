#![warn(clippy::pedantic)]

mod cli;
mod command;

use clap::Parser;

use cli::{Args, Commands};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(args.debug.as_level())
        .with_writer(std::io::stderr)
        .init();

    if let Err(error) = run(args).await {
        eprintln!("Error: {error:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    match args.cmd {
        Commands::Decode { value } => command::decode(&value),
        Commands::Info { torrent_file } => command::info(&torrent_file),
        Commands::Peers { torrent_file } => command::peers(&torrent_file).await,
        Commands::Handshake { torrent_file, peer } => {
            command::handshake(&torrent_file, peer.as_deref()).await
        }
        Commands::DownloadPiece {
            output_file,
            torrent_file,
            piece_index,
        } => command::download_piece(&output_file, &torrent_file, piece_index).await,
        Commands::Download {
            output_file,
            concurrency,
            torrent_file,
        } => command::download(&output_file, &torrent_file, concurrency).await,
    }
}
