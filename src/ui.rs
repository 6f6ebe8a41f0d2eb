use std::io;
use std::time::Duration;

use anyhow::Context;
use crossterm::event::{Event, EventStream, KeyEventKind};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::Settings;
use crate::connection::ConnectionEvent;
use crate::processor::{Flow, Session};
use crate::registry::ConnectionRegistry;
use crate::timer::TokioScheduler;
use crate::transport::WsTransport;

/// How long exit waits for sockets to finish their close handshake.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Raw mode for as long as the console owns the terminal.
struct RawMode;

impl RawMode {
    fn enable() -> io::Result<Self> {
        crossterm::terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = crossterm::terminal::disable_raw_mode();
    }
}

pub async fn run(settings: Settings) -> anyhow::Result<()> {
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let transport = WsTransport::new(events_tx.clone()).context("preparing websocket transport")?;
    let draining = transport.draining();
    let scheduler = TokioScheduler::new(events_tx);
    let registry = ConnectionRegistry::new(&settings.urls, Box::new(transport), Box::new(scheduler));

    let mut session = Session::open(settings, registry, io::stdout())?;
    if !session.has_connections() {
        session.leave_without_connections()?;
        return Ok(());
    }

    let _raw = RawMode::enable()?;
    if let Ok((columns, _)) = crossterm::terminal::size() {
        session.resize(columns)?;
    }
    if session.start()? == Flow::Continue {
        console(&mut session, &mut events).await?;
    }
    info!("console closed");

    // Sockets with a close queued finish the handshake once the session is gone.
    drop(session);
    draining.finish(CLOSE_GRACE).await;
    Ok(())
}

async fn console(
    session: &mut Session<io::Stdout>,
    events: &mut mpsc::UnboundedReceiver<ConnectionEvent>,
) -> anyhow::Result<()> {
    let mut input = EventStream::new();
    loop {
        let flow = tokio::select! {
            terminal = input.next() => match terminal {
                Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => session.handle_key(key)?,
                Some(Ok(Event::Resize(columns, _))) => {
                    session.resize(columns)?;
                    Flow::Continue
                }
                Some(Ok(_)) => Flow::Continue,
                Some(Err(err)) => return Err(err).context("reading terminal input"),
                None => {
                    debug!("terminal input closed");
                    session.end_of_input()?
                }
            },
            Some(event) = events.recv() => session.handle_connection_event(event)?,
        };
        if flow == Flow::Exit {
            return Ok(());
        }
    }
}
