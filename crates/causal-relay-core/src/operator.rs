//! Operator input.

use std::io::BufRead;
use tokio::sync::mpsc;

/// Lines typed on stdin, delivered asynchronously.
///
/// Reading happens on a plain OS thread so a pending read never holds up
/// runtime shutdown. The channel closes at end of input.
pub fn stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}
