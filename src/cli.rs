use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(version, about = "A command-line BitTorrent client for single-file torrents")]
pub struct Args {
    /// Log verbosity, written to stderr
    #[arg(long = "debug", value_enum, global = true, default_value_t = LogLevel::Warning)]
    pub debug: LogLevel,

    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Info,
    Debug,
    Warning,
}

impl LogLevel {
    pub fn as_level(self) -> tracing::Level {
        match self {
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Warning => tracing::Level::WARN,
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Print a bencoded value as JSON
    Decode { value: String },
    /// Summarise a .torrent file
    Info { torrent_file: String },
    /// List the swarm reported by the tracker
    Peers { torrent_file: String },
    /// Handshake with one peer and print its id
    Handshake {
        torrent_file: String,
        /// ip:port, defaults to the first peer the tracker reports
        peer: Option<String>,
    },
    /// Download a single piece
    #[command(name = "download_piece")]
    DownloadPiece {
        #[arg(short)]
        output_file: String,
        torrent_file: String,
        piece_index: u32,
    },
    /// Download the whole file
    Download {
        #[arg(short)]
        output_file: String,
        /// Concurrent peer connections
        #[arg(short, default_value_t = 3)]
        concurrency: usize,
        torrent_file: String,
    },
}
