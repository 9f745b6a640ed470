#![allow(dead_code)]

use std::path::Path;
use std::process::ExitCode;

use error::Error;
use session::Session;

mod config;
mod device;
mod error;
mod filesystem;
mod session;
mod shell;
mod structs;
mod users;

fn main() -> ExitCode {
    env_logger::init();
    let mut args = std::env::args().skip(1);
    let Some(disk_path) = args.next() else {
        eprintln!("usage: daofs <disk_file> [size_bytes]");
        return ExitCode::FAILURE;
    };
    let size = args
        .next()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(config::DEFAULT_DISK_SIZE);
    let session = match Session::mount(Path::new(&disk_path), size) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("cannot mount {disk_path}: {e}");
            return ExitCode::FAILURE;
        }
    };
    shell::run(session);
    ExitCode::SUCCESS
}
