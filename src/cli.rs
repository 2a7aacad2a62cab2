//! Line-oriented shell for a remote model.
//!
//! Terms use the node text syntax (`<uri>`, `_:id`, `"value"@lang`,
//! `"value"^^<datatype>`, `*`). A statement is three terms plus an optional context.
use std::io::{self, BufRead, Write};

use thiserror::Error;

use crate::{
    client::RemoteModel,
    graph::{Node, NodeParseError, Statement},
};

/// Possible commands from a user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShellCommand {
    /// `.exit`, or end of input
    Exit,
    /// `add s p o [c]`
    Add(Statement),
    /// `remove s p o [c]`
    Remove(Statement),
    /// `list [s [p [o [c]]]]`, missing terms match anything
    List(Statement),
    Contexts,
    Count,
    Blank,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("unrecognized command '{0}'")]
    Unrecognized(String),

    #[error("'{command}' takes {expected}")]
    Arity {
        command: &'static str,
        expected: &'static str,
    },

    #[error("unterminated quote")]
    UnterminatedQuote,

    #[error(transparent)]
    Node(#[from] NodeParseError),

    #[error(transparent)]
    Store(#[from] crate::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Prompt user for a shell command. Blank lines prompt again.
pub fn prompt<R, W>(mut reader: R, mut writer: W) -> Result<ShellCommand, CliError>
where
    R: BufRead,
    W: Write,
{
    loop {
        let mut s = String::default();
        write!(&mut writer, "> ")?;

        if reader.read_line(&mut s)? == 0 {
            return Ok(ShellCommand::Exit);
        }
        if !s.trim().is_empty() {
            return parse_command(&s);
        }
    }
}

pub fn parse_command(line: &str) -> Result<ShellCommand, CliError> {
    let tokens = tokenize(line)?;
    let Some((&command, args)) = tokens.split_first() else {
        return Err(CliError::Unrecognized(String::new()));
    };

    match command {
        ".exit" => Ok(ShellCommand::Exit),
        "add" => statement("add", args).map(ShellCommand::Add),
        "remove" => statement("remove", args).map(ShellCommand::Remove),
        "list" => pattern(args).map(ShellCommand::List),
        "contexts" => no_args("contexts", args).map(|()| ShellCommand::Contexts),
        "count" => no_args("count", args).map(|()| ShellCommand::Count),
        "blank" => no_args("blank", args).map(|()| ShellCommand::Blank),
        other => Err(CliError::Unrecognized(other.to_string())),
    }
}

/// Runs `command` against `model`, writing results one per line.
pub fn execute<W: Write>(
    command: &ShellCommand,
    model: &RemoteModel,
    mut writer: W,
) -> Result<(), CliError> {
    match command {
        ShellCommand::Exit => {}
        ShellCommand::Add(statement) => model.add_statement(statement)?,
        ShellCommand::Remove(statement) => model.remove_statement(statement)?,
        ShellCommand::List(pattern) => {
            for statement in model.list_statements(pattern)? {
                writeln!(writer, "{}", statement?)?;
            }
        }
        ShellCommand::Contexts => {
            for context in model.list_contexts()? {
                writeln!(writer, "{}", context?)?;
            }
        }
        ShellCommand::Count => writeln!(writer, "{}", model.statement_count()?)?,
        ShellCommand::Blank => writeln!(writer, "{}", model.create_blank_node()?)?,
    }
    Ok(())
}

fn no_args(command: &'static str, args: &[&str]) -> Result<(), CliError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(CliError::Arity {
            command,
            expected: "no arguments",
        })
    }
}

fn statement(command: &'static str, args: &[&str]) -> Result<Statement, CliError> {
    if !(3..=4).contains(&args.len()) {
        return Err(CliError::Arity {
            command,
            expected: "a subject, predicate, object and optional context",
        });
    }
    pattern(args)
}

fn pattern(args: &[&str]) -> Result<Statement, CliError> {
    if args.len() > 4 {
        return Err(CliError::Arity {
            command: "list",
            expected: "at most four terms",
        });
    }

    let mut terms = [Node::Empty, Node::Empty, Node::Empty, Node::Empty];
    for (term, arg) in terms.iter_mut().zip(args) {
        *term = arg.parse()?;
    }
    let [subject, predicate, object, context] = terms;
    Ok(Statement::new(subject, predicate, object).with_context(context))
}

/// Splits on whitespace outside double quotes. Quotes stay in the tokens so that
/// literals reach the node parser intact.
fn tokenize(line: &str) -> Result<Vec<&str>, CliError> {
    let mut tokens = Vec::new();
    let mut start = None;
    let mut quoted = false;
    let mut escaped = false;

    for (i, ch) in line.char_indices() {
        if quoted {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => quoted = false,
                _ => {}
            }
            continue;
        }

        if ch.is_whitespace() {
            if let Some(s) = start.take() {
                tokens.push(&line[s..i]);
            }
        } else {
            start.get_or_insert(i);
            quoted = ch == '"';
        }
    }

    if quoted {
        return Err(CliError::UnterminatedQuote);
    }
    if let Some(s) = start {
        tokens.push(&line[s..]);
    }
    Ok(tokens)
}
