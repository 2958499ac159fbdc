use std::time::Duration;

use anyhow::Context;
use args::{Args, Command};
use clap::Parser;
use log::{LevelFilter, error, warn};
use rustedbytes_sftpc::sftp::ops::{dir_ops, file_ops};
use rustedbytes_sftpc::sftp::utils::metadata::MetadataConverter;
use rustedbytes_sftpc::{SessionConfig, SftpSession, TextEncoding};
use ssh_session::SshConnection;

mod args;
mod ssh_session;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    env_logger::builder()
        .filter_level(if args.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .parse_default_env()
        .init();

    if let Err(err) = run(args).await {
        error!("{err:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let timeout = Duration::from_secs(args.timeout);
    let config = SessionConfig::default()
        .with_operation_timeout(timeout)
        .with_chunk_size(args.chunk_size)
        .with_encoding(if args.latin1 {
            TextEncoding::Latin1
        } else {
            TextEncoding::Utf8
        });

    let connection = SshConnection::connect(
        &args.host,
        args.port,
        &args.username,
        &args.password,
        timeout * 4,
    )
    .await?;
    let session = connection.open_sftp(config).await?;

    let result = execute(&session, args.command).await;

    if let Err(err) = session.shutdown().await {
        warn!("closing SFTP session: {err}");
    }
    if let Err(err) = connection.disconnect().await {
        warn!("{err:#}");
    }
    result
}

async fn execute(session: &SftpSession, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Ls { path, long } => {
            let path = path.unwrap_or_else(|| ".".to_string());
            let mut entries = dir_ops::list_directory(session, &path)
                .await
                .with_context(|| format!("listing {path}"))?;
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            for entry in entries {
                if long {
                    println!("{}", entry.longname);
                } else if entry.is_directory {
                    println!("{}/", entry.name);
                } else {
                    println!("{}", entry.name);
                }
            }
        }
        Command::Get { remote, local } => {
            let copied = file_ops::download_file(session, &remote, &local)
                .await
                .with_context(|| format!("downloading {remote} to {}", local.display()))?;
            println!("{remote} -> {} ({copied} bytes)", local.display());
        }
        Command::Put {
            local,
            remote,
            overwrite,
            preserve,
        } => {
            let sent = file_ops::upload_file(session, &local, &remote, overwrite, preserve)
                .await
                .with_context(|| format!("uploading {} to {remote}", local.display()))?;
            println!("{} -> {remote} ({sent} bytes)", local.display());
        }
        Command::Rm { path } => session
            .remove(&path)
            .await
            .with_context(|| format!("removing {path}"))?,
        Command::Mkdir { path } => session
            .mkdir(&path)
            .await
            .with_context(|| format!("creating directory {path}"))?,
        Command::Rmdir { path } => session
            .rmdir(&path)
            .await
            .with_context(|| format!("removing directory {path}"))?,
        Command::Mv { old, new, posix } => {
            let renamed = if posix {
                session.posix_rename(&old, &new).await
            } else {
                session.rename(&old, &new).await
            };
            renamed.with_context(|| format!("renaming {old} to {new}"))?;
        }
        Command::Ln { target, link, hard } => {
            let linked = if hard {
                session.hard_link(&target, &link).await
            } else {
                session.symlink(&link, &target).await
            };
            linked.with_context(|| format!("linking {link} to {target}"))?;
        }
        Command::Stat { path, no_follow } => {
            let attrs = if no_follow {
                session.lstat(&path).await
            } else {
                session.stat(&path).await
            };
            let attrs = attrs.with_context(|| format!("stat {path}"))?;
            println!("{}", MetadataConverter::format_longname(&path, &attrs));
        }
        Command::Readlink { path } => {
            let target = session
                .readlink(&path)
                .await
                .with_context(|| format!("reading link {path}"))?;
            println!("{target}");
        }
        Command::Realpath { path } => {
            let resolved = session
                .canonicalize(&path)
                .await
                .with_context(|| format!("resolving {path}"))?;
            println!("{resolved}");
        }
        Command::Df { path } => {
            let stats = session
                .statvfs(&path)
                .await
                .with_context(|| format!("statvfs {path}"))?;
            println!(
                "{:>14} {:>14} {:>14} {:>5}",
                "Size", "Used", "Avail", "Use%"
            );
            let total = stats.total_space();
            let used = total.saturating_sub(stats.free_space());
            let percent = if total == 0 { 0 } else { used * 100 / total };
            println!(
                "{:>14} {:>14} {:>14} {:>4}%",
                total,
                used,
                stats.available_space(),
                percent
            );
        }
    }
    Ok(())
}
