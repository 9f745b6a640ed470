//! The interactive shell: a prompt, a line parser and a command executor
//! over one [`Session`].

mod command;
mod parse;

use std::io::Write;

use colored::Colorize;

use crate::session::Session;
use command::{execute_command, Outcome};
use parse::parse_command;

fn prompt(session: &mut Session) -> String {
    let location = session.pwd().unwrap_or_else(|_| String::from("?"));
    match session.current_user() {
        Some(user) => format!("{}@{location}> ", user.name),
        None => format!("(login)@{location}> "),
    }
}

/// Run until `exit` or end of input. Errors are printed, never fatal.
pub fn run(mut session: Session) {
    println!("daofs shell, type 'help' for commands");
    let mut line = String::new();
    loop {
        print!("{}", prompt(&mut session));
        if std::io::stdout().flush().is_err() {
            break;
        }
        line.clear();
        match std::io::stdin().read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        if line.trim().is_empty() {
            continue;
        }
        let Some(command) = parse_command(&line) else {
            println!("invalid command, type 'help' for the list");
            continue;
        };
        match execute_command(&command, &mut session) {
            Ok(Outcome::Continue) => {}
            Ok(Outcome::Exit) => break,
            Err(e) => println!("{} {e}", "error:".red()),
        }
    }
    println!("bye");
}
