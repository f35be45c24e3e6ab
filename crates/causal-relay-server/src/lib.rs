//! Causal relay server.
//!
//! Accepts TCP clients, gives each a [`Session`](session::Session), and lets an
//! operator console broadcast, multicast, send files and disconnect clients.
//! Every relayed event carries a vector clock stamp.

pub mod config;
pub mod console;
pub mod dispatcher;
pub mod event;
pub mod registry;
pub mod session;

use anyhow::Context;
use causal_relay_core::{FileStore, stdin_lines};
use config::ServerConfig;
use console::Console;
use dispatcher::Dispatcher;
use event::EventSender;
use registry::{ConnId, Registry};
use session::Session;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// Accept loop for one listener.
pub struct Server {
    dispatcher: Arc<Dispatcher>,
    events: EventSender,
    grace: Duration,
}

impl Server {
    pub fn new(dispatcher: Arc<Dispatcher>, events: EventSender, grace: Duration) -> Self {
        Self {
            dispatcher,
            events,
            grace,
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Accept connections until the dispatcher announces shutdown, then give
    /// open sessions `grace` to finish before cutting them off.
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        let mut shutdown = self.dispatcher.subscribe_shutdown();
        let mut sessions = JoinSet::new();
        let mut next_id: ConnId = 0;

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        next_id += 1;
                        if let Err(e) = stream.set_nodelay(true) {
                            tracing::debug!(%addr, "set_nodelay failed: {e}");
                        }
                        let mut session = Session::new(
                            next_id,
                            addr,
                            self.dispatcher.clone(),
                            self.events.clone(),
                        );
                        sessions.spawn(async move { session.run(stream).await });
                    }
                    Err(e) => tracing::warn!("accept failed: {e}"),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        tracing::warn!("session task failed: {e}");
                    }
                }
            }
        }

        drop(listener);
        tracing::info!(open = sessions.len(), "stopped accepting connections");
        let drain = async { while sessions.join_next().await.is_some() {} };
        if tokio::time::timeout(self.grace, drain).await.is_err() {
            tracing::warn!(
                open = sessions.len(),
                "sessions still open after grace period, aborting"
            );
            sessions.abort_all();
            while sessions.join_next().await.is_some() {}
        }
        Ok(())
    }
}

/// Run a relay with an operator console on stdin/stdout until `exit` or Ctrl-C.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("binding {}:{}", config.host, config.port))?;
    tracing::info!(
        addr = %listener.local_addr()?,
        files = %config.files_dir.display(),
        "listening"
    );

    let store = FileStore::new(&config.files_dir);
    let dispatcher = Arc::new(Dispatcher::new(
        config.name.clone(),
        Arc::new(Registry::new()),
        store,
    ));

    let (events, event_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(console::print_events(event_rx, tokio::io::stdout()));
    let operator = Console::new(dispatcher.clone(), tokio::io::stdout());
    let operator = tokio::spawn(operator.run(stdin_lines()));
    let interrupt = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupted");
                dispatcher.shutdown_all().await;
            }
        })
    };

    let server = Server::new(dispatcher, events, config.shutdown_grace);
    let result = server.serve(listener).await;

    operator.abort();
    interrupt.abort();
    // Dropping the last event sender lets the printer drain and finish.
    drop(server);
    if let Ok(Err(e)) = printer.await {
        tracing::warn!("console output failed: {e}");
    }
    result
}
