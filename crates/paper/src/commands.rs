use std::future::Future;
use std::io::BufRead;
use std::thread::JoinHandle;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use common::ManualCommand;

/// Forward operator commands read from stdin on a dedicated thread.
///
/// A plain thread rather than a runtime task: a blocking stdin read cannot be
/// cancelled and must not hold up runtime shutdown.
pub fn spawn_stdin_listener(tx: mpsc::Sender<ManualCommand>) -> std::io::Result<JoinHandle<()>> {
    info!("Commands: 'b' buy now, 's' sell now, 'q' quit");
    std::thread::Builder::new()
        .name("stdin-commands".into())
        .spawn(move || forward_commands(std::io::stdin().lock(), &tx))
}

/// Turn Ctrl-C into a `Quit` so shutdown waits for the write in progress.
pub fn spawn_ctrl_c_listener(tx: mpsc::Sender<ManualCommand>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(quit_on(tokio::signal::ctrl_c(), tx))
}

/// Send `Quit` once `signal` resolves.
pub async fn quit_on<F>(signal: F, tx: mpsc::Sender<ManualCommand>)
where
    F: Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            info!("Shutdown signal received");
            if tx.send(ManualCommand::Quit).await.is_err() {
                debug!("Trader already stopped");
            }
        }
        Err(e) => warn!(error = %e, "Could not listen for the shutdown signal"),
    }
}

/// Parse `reader` line by line and send every recognised command.
/// Stops after `Quit`, at end of input, or once the receiver is gone.
pub fn forward_commands<R: BufRead>(reader: R, tx: &mpsc::Sender<ManualCommand>) {
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Command input failed");
                return;
            }
        };
        let Some(cmd) = ManualCommand::parse(&line) else {
            if !line.trim().is_empty() {
                debug!(input = %line.trim(), "Ignoring unknown command");
            }
            continue;
        };
        if tx.blocking_send(cmd).is_err() || cmd == ManualCommand::Quit {
            return;
        }
    }
    debug!("Command input closed");
}
