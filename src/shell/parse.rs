use crate::session::OpenMode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Login(String, String),
    Logout,
    Format,
    Mkdir(String),
    Cd(String),
    Ls(Option<String>),
    Pwd,
    Create(String),
    Open(String, OpenMode),
    Close(i32),
    Read(i32, usize),
    Write(i32, String),
    Rm(String),
    Exit,
}

fn open_mode(token: &str) -> Option<OpenMode> {
    match token {
        "r" => Some(OpenMode::Read),
        "w" => Some(OpenMode::Write),
        "rw" => Some(OpenMode::ReadWrite),
        "a" => Some(OpenMode::Append),
        _ => None,
    }
}

/// Tokenise one input line; `None` means the line is not a valid command.
pub fn parse_command(input: &str) -> Option<Command> {
    let tokens: Vec<&str> = input.trim().split_ascii_whitespace().collect();
    let (&command, args) = tokens.split_first()?;
    match command {
        "help" => Some(Command::Help),
        "login" => match args {
            [user, password] => Some(Command::Login(user.to_string(), password.to_string())),
            _ => None,
        },
        "logout" => Some(Command::Logout),
        "format" => Some(Command::Format),
        "mkdir" => args.first().map(|&path| Command::Mkdir(path.to_string())),
        "cd" | "chdir" => args.first().map(|&path| Command::Cd(path.to_string())),
        "ls" | "dir" => Some(Command::Ls(args.first().map(|&path| path.to_string()))),
        "pwd" => Some(Command::Pwd),
        "create" => args.first().map(|&path| Command::Create(path.to_string())),
        "open" => match args {
            [path, mode] => Some(Command::Open(path.to_string(), open_mode(mode)?)),
            _ => None,
        },
        "close" => args.first()?.parse().ok().map(Command::Close),
        "read" => match args {
            [fd, length] => Some(Command::Read(fd.parse().ok()?, length.parse().ok()?)),
            _ => None,
        },
        "write" => match args {
            [fd, rest @ ..] if !rest.is_empty() => {
                Some(Command::Write(fd.parse().ok()?, rest.join(" ")))
            }
            _ => None,
        },
        "rm" => args.first().map(|&path| Command::Rm(path.to_string())),
        "exit" | "quit" => Some(Command::Exit),
        _ => None,
    }
}
