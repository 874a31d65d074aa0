//! Command-line argument parsing.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// codedrop - P2P file drop paired by a 6-digit session code.
#[derive(Parser, Debug)]
#[command(author, version, about)]
#[command(propagate_version = true)]
pub struct Args {
    /// Verbosity level (-v, -vv, -vvv).
    #[clap(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Base URL of the signaling store (REST key-value service).
    /// Falls back to the CODEDROP_SIGNAL_URL environment variable.
    #[clap(long, global = true)]
    pub signal_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a session, print its code, and receive files into a directory.
    Recv {
        /// Directory where received files are written.
        #[clap(long, default_value = "received")]
        out: PathBuf,

        /// Delete the session record on exit instead of soft-closing it.
        #[clap(long)]
        delete_session: bool,
    },

    /// Join a session by its code and send files to the receiver.
    Send {
        /// 6-digit session code shown by the receiver.
        #[clap(long)]
        code: String,

        /// Bundle the files into one compressed archive stream.
        #[clap(long)]
        zip: bool,

        /// Files to send.
        #[clap(required = true)]
        files: Vec<PathBuf>,
    },

    /// Run both peers in-process through an in-memory store; useful as an
    /// end-to-end smoke test without a signaling service.
    Loopback {
        /// Directory where received files are written.
        #[clap(long, default_value = "received")]
        out: PathBuf,

        /// Bundle the files into one compressed archive stream.
        #[clap(long)]
        zip: bool,

        /// Files to send.
        #[clap(required = true)]
        files: Vec<PathBuf>,
    },
}

impl Args {
    pub fn load() -> Self {
        Args::parse()
    }

    /// Signaling store base URL: flag first, then environment.
    pub fn resolve_signal_url(&self) -> Option<String> {
        self.signal_url
            .clone()
            .or_else(|| std::env::var("CODEDROP_SIGNAL_URL").ok())
    }
}
