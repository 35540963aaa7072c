//! ext4_undel: 按 inode 编号恢复 ext4 上已删除的文件

use std::error::Error as _;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::LevelFilter;

use ext4_undelete::{inspect, recover_with, RecoveryOptions, UnwrittenPolicy};

#[derive(Parser)]
#[command(name = "ext4_undel")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Recover a deleted file from an ext4 filesystem by inode number", long_about = None)]
struct Cli {
    /// Block device or raw filesystem image
    device: PathBuf,

    /// Inode number of the file to recover
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
    inode: u32,

    /// Output file
    #[arg(short, long, default_value = "undeleted_file")]
    output: PathBuf,

    /// Byte offset of the filesystem inside the device
    #[arg(long, default_value_t = 0)]
    offset: u64,

    /// Copy on-disk bytes for preallocated (unwritten) extents instead of zeros
    #[arg(long)]
    read_unwritten: bool,

    /// Truncate the output to the size stored in the inode, when non-zero
    #[arg(long)]
    trim: bool,

    /// Print the inode and its block mapping without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn options(&self) -> RecoveryOptions {
        RecoveryOptions {
            partition_offset: self.offset,
            unwritten: if self.read_unwritten {
                UnwrittenPolicy::ReadRaw
            } else {
                UnwrittenPolicy::ZeroFill
            },
            trim_to_inode_size: self.trim,
            ..RecoveryOptions::default()
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let options = cli.options();
    let result = if cli.dry_run {
        inspect(&cli.device, cli.inode, &options).map(|report| println!("{report}"))
    } else {
        recover_with(&cli.device, cli.inode, &cli.output, &options).map(|report| {
            println!(
                "recovered inode {} to {} ({} bytes, {} blocks mapped, {} holes)",
                cli.inode,
                cli.output.display(),
                report.bytes_written,
                report.mapped_blocks,
                report.hole_blocks
            );
        })
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ext4_undel: {err}");
            let mut source = err.source();
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["ext4_undel", "/dev/sdb1", "-i", "12"]).unwrap();
        assert_eq!(cli.output, PathBuf::from("undeleted_file"));
        assert_eq!(cli.options(), RecoveryOptions::default());
    }

    #[test]
    fn test_inode_zero_rejected() {
        assert!(Cli::try_parse_from(["ext4_undel", "img", "-i", "0"]).is_err());
        assert!(Cli::try_parse_from(["ext4_undel", "img"]).is_err());
    }

    #[test]
    fn test_flags_map_to_options() {
        let cli = Cli::try_parse_from([
            "ext4_undel",
            "img",
            "-i",
            "7",
            "--offset",
            "1048576",
            "--read-unwritten",
            "--trim",
            "-vv",
        ])
        .unwrap();
        let options = cli.options();
        assert_eq!(options.partition_offset, 1 << 20);
        assert_eq!(options.unwritten, UnwrittenPolicy::ReadRaw);
        assert!(options.trim_to_inode_size);
        assert_eq!(cli.verbose, 2);
    }
}
