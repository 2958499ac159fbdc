use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Command-line SFTP client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Server address
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    pub host: String,

    /// Server port
    #[arg(short, long, default_value = "22")]
    pub port: u16,

    /// Username for password authentication
    #[arg(short, long, default_value = "admin")]
    pub username: String,

    /// Password for password authentication
    #[arg(long, default_value = "password")]
    pub password: String,

    /// Seconds to wait for each reply
    #[arg(long, default_value = "30")]
    pub timeout: u64,

    /// Read and write chunk size in bytes, at most 261120
    #[arg(long, default_value = "32768")]
    pub chunk_size: u32,

    /// Treat remote names as Latin-1 instead of UTF-8
    #[arg(long)]
    pub latin1: bool,

    /// Log protocol traffic
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List a directory
    Ls {
        path: Option<String>,
        /// Show long listing
        #[arg(short, long)]
        long: bool,
    },
    /// Download a file
    Get { remote: String, local: PathBuf },
    /// Upload a file
    Put {
        local: PathBuf,
        remote: String,
        /// Replace an existing remote file
        #[arg(long)]
        overwrite: bool,
        /// Copy mode and times to the remote file
        #[arg(short = 'P', long)]
        preserve: bool,
    },
    /// Remove a file
    Rm { path: String },
    /// Create a directory
    Mkdir { path: String },
    /// Remove an empty directory
    Rmdir { path: String },
    /// Rename a file or directory
    Mv {
        old: String,
        new: String,
        /// Replace the target atomically (posix-rename@openssh.com)
        #[arg(long)]
        posix: bool,
    },
    /// Create a link
    Ln {
        target: String,
        link: String,
        /// Hard link (hardlink@openssh.com) instead of a symlink
        #[arg(long)]
        hard: bool,
    },
    /// Show attributes
    Stat {
        path: String,
        /// Do not follow a final symlink
        #[arg(short = 'L', long)]
        no_follow: bool,
    },
    /// Print a symlink's target
    Readlink { path: String },
    /// Print the canonical form of a path
    Realpath { path: String },
    /// Show filesystem usage (statvfs@openssh.com)
    Df {
        #[arg(default_value = ".")]
        path: String,
    },
}
