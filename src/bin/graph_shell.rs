use std::{error::Error, io};

use clap::Parser;
use graphlink::{Client, ClientConfig, Endpoint, ShellCommand, execute, prompt};

#[derive(Debug, Parser)]
#[command(version, about = "Interactive shell for a remote graph model", long_about = None)]
struct Cli {
    /// Model to open, created if missing
    model: String,
    /// Server at `host:port`, `tcp:host:port`, `unix:/path` or an absolute path
    #[arg(short, long, default_value_t = Endpoint::default_local())]
    endpoint: Endpoint,
    /// Reply timeout in milliseconds; negative waits forever
    #[arg(short, long, default_value_t = 600_000, allow_negative_numbers = true)]
    timeout: i64,
    /// Redial once when the server connection drops
    #[arg(long)]
    reconnect: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let config = ClientConfig::new(cli.endpoint)
        .with_timeout_millis(cli.timeout)
        .with_auto_reconnect(cli.reconnect);
    let client = Client::new(config);
    let model = client.create_model(&cli.model)?;

    let stdio = io::stdin();
    let stdout = io::stdout();

    loop {
        let reader = stdio.lock();
        let writer = StdOut {
            inner: stdout.lock(),
        };

        let cmd = match prompt(reader, writer) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };

        if let ShellCommand::Exit = cmd {
            break;
        }

        if let Err(e) = execute(&cmd, &model, stdout.lock()) {
            eprintln!("error: {e}");
        }
    }

    Ok(())
}

/// StdOut wrapper than automatically flushes content after every write.
struct StdOut<W: io::Write> {
    inner: W,
}

impl<W: io::Write> io::Write for StdOut<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let res = self.inner.write(buf);
        if res.is_ok() {
            self.inner.flush()?
        }
        res
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
