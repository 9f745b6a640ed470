use colored::Colorize;

use super::parse::Command;
use crate::config::{
    PERM_OTHER_EXEC, PERM_OTHER_READ, PERM_OTHER_WRITE, PERM_USER_EXEC, PERM_USER_READ,
    PERM_USER_WRITE,
};
use crate::session::Session;
use crate::structs::Inode;
use crate::Error;

/// What the loop should do after a command ran.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Exit,
}

fn mode_string(inode: &Inode) -> String {
    let bit = |mask: u16, letter: char| {
        if inode.permissions & mask != 0 {
            letter
        } else {
            '-'
        }
    };
    format!(
        "{}{}{}{}---{}{}{}",
        if inode.is_directory() { 'd' } else { '-' },
        bit(PERM_USER_READ, 'r'),
        bit(PERM_USER_WRITE, 'w'),
        bit(PERM_USER_EXEC, 'x'),
        bit(PERM_OTHER_READ, 'r'),
        bit(PERM_OTHER_WRITE, 'w'),
        bit(PERM_OTHER_EXEC, 'x'),
    )
}

pub fn execute_command(command: &Command, session: &mut Session) -> Result<Outcome, Error> {
    match command {
        Command::Help => print_help(),
        Command::Login(user, password) => {
            session.login(user, password)?;
            println!("logged in as {}", user.green());
        }
        Command::Logout => {
            session.logout();
            println!("logged out");
        }
        Command::Format => {
            session.format_disk()?;
            println!("disk formatted");
        }
        Command::Mkdir(path) => session.mkdir(path)?,
        Command::Cd(path) => session.chdir(path)?,
        Command::Ls(path) => {
            let path = path.as_deref().unwrap_or(".");
            let listing = session.list_dir(path)?;
            println!("{:<10} {:>5} {:>5} {:>9}  name", "mode", "links", "uid", "size");
            for (entry, inode) in listing {
                let name = if inode.is_directory() {
                    entry.name.blue().bold().to_string()
                } else {
                    entry.name
                };
                println!(
                    "{:<10} {:>5} {:>5} {:>9}  {}",
                    mode_string(&inode),
                    inode.link_count,
                    inode.owner,
                    inode.size,
                    name
                );
            }
        }
        Command::Pwd => println!("{}", session.pwd()?),
        Command::Create(path) => session.create(path)?,
        Command::Open(path, mode) => {
            let fd = session.open(path, *mode)?;
            println!("fd {fd}");
        }
        Command::Close(fd) => session.close(*fd)?,
        Command::Read(fd, length) => {
            let data = session.read(*fd, *length)?;
            println!("{} bytes", data.len());
            println!("{}", String::from_utf8_lossy(&data));
        }
        Command::Write(fd, text) => {
            let written = session.write(*fd, text.as_bytes())?;
            println!("{written} bytes");
        }
        Command::Rm(path) => session.unlink(path)?,
        Command::Exit => return Ok(Outcome::Exit),
    }
    Ok(Outcome::Continue)
}

fn print_help() {
    println!("{}", "commands".bold());
    println!(
        "  login <user> <password>   start a session (root/root, user/user)
  logout                    end the session
  format                    reinitialise the disk (root only)
  mkdir <path>              create a directory
  cd <path>                 change the working directory
  ls [path]                 list a directory
  pwd                       print the working directory
  create <path>             create an empty file
  open <path> <r|w|rw|a>    open a file, prints the fd
  close <fd>                close a descriptor
  read <fd> <len>           read bytes at the descriptor's offset
  write <fd> <text>         write text at the descriptor's offset
  rm <path>                 remove a file or empty directory
  exit                      leave the shell"
    );
}
