use tracing::{debug, warn};

use crate::connection::{
    Connection, ConnectionEvent, ConnectionObserver, ReadyState, Scheduler, Transport,
};

/// Connection counts by ready state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    pub connecting: usize,
    pub open: usize,
    pub closing: usize,
    pub closed: usize,
}

impl Tally {
    /// Nothing open and nothing on its way to open.
    pub fn is_offline(&self) -> bool {
        self.open == 0 && self.connecting == 0
    }
}

/// Owns every connection together with the transport that opens their
/// sockets and the scheduler that times their reconnects.
pub struct ConnectionRegistry {
    connections: Vec<Connection>,
    transport: Box<dyn Transport>,
    scheduler: Box<dyn Scheduler>,
}

impl ConnectionRegistry {
    pub fn new<S: AsRef<str>>(
        urls: &[S],
        transport: Box<dyn Transport>,
        scheduler: Box<dyn Scheduler>,
    ) -> Self {
        let connections = urls
            .iter()
            .enumerate()
            .map(|(id, url)| Connection::new(id, url.as_ref()))
            .collect();
        Self {
            connections,
            transport,
            scheduler,
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter()
    }

    pub fn connect_all(&mut self, observer: &mut dyn ConnectionObserver) -> usize {
        let mut started = 0;
        for conn in &mut self.connections {
            if conn.connect(&mut *self.transport, &mut *self.scheduler, observer) {
                started += 1;
            }
        }
        started
    }

    /// Routes one event to the connection it names.
    pub fn dispatch(&mut self, event: ConnectionEvent, observer: &mut dyn ConnectionObserver) {
        let id = match &event {
            ConnectionEvent::Socket { id, .. } | ConnectionEvent::ReconnectDue { id, .. } => *id,
        };
        match self.connections.get_mut(id) {
            Some(conn) => conn.handle(event, &mut *self.transport, &mut *self.scheduler, observer),
            None => warn!(id, "event for unknown connection"),
        }
    }

    /// Sends `payload` to every open connection and returns how many took it.
    pub fn broadcast(&self, payload: &str) -> usize {
        if payload.is_empty() {
            return 0;
        }
        let sent = self.connections.iter().filter(|conn| conn.send(payload)).count();
        debug!(sent, len = payload.len(), "broadcast");
        sent
    }

    pub fn tally(&self) -> Tally {
        let mut tally = Tally::default();
        for conn in &self.connections {
            match conn.ready_state() {
                ReadyState::Connecting => tally.connecting += 1,
                ReadyState::Open => tally.open += 1,
                ReadyState::Closing => tally.closing += 1,
                ReadyState::Closed => tally.closed += 1,
            }
        }
        tally
    }

    pub fn online(&self) -> usize {
        self.connections.iter().filter(|conn| conn.is_online()).count()
    }

    /// Sends a close to every live socket and drops pending reconnects.
    pub fn close_all(&mut self) {
        for conn in &mut self.connections {
            conn.close(&mut *self.scheduler);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::connection::testing::{FakeScheduler, FakeTransport, Recorder};
    use crate::connection::SocketEvent;

    fn registry(urls: &[&str]) -> (ConnectionRegistry, FakeTransport, FakeScheduler) {
        let transport = FakeTransport::default();
        let scheduler = FakeScheduler::default();
        let registry = ConnectionRegistry::new(
            urls,
            Box::new(transport.clone()),
            Box::new(scheduler.clone()),
        );
        (registry, transport, scheduler)
    }

    fn socket(id: usize, event: SocketEvent) -> ConnectionEvent {
        ConnectionEvent::Socket { id, attempt: 1, event }
    }

    #[test]
    fn broadcast_reaches_only_open_connections() {
        let (mut registry, transport, _) = registry(&["ws://a", "ws://b", "ws://c"]);
        let mut observer = Recorder::default();
        assert_eq!(registry.connect_all(&mut observer), 3);

        registry.dispatch(socket(0, SocketEvent::Open), &mut observer);
        registry.dispatch(socket(2, SocketEvent::Open), &mut observer);

        assert_eq!(registry.broadcast("hello"), 2);
        assert_eq!(registry.broadcast(""), 0);
        let sent: Vec<usize> = transport.0.borrow().sent.iter().map(|(id, _)| *id).collect();
        assert_eq!(sent, [0, 2]);
        assert_eq!(registry.online(), 2);
    }

    #[test]
    fn tally_buckets_follow_connection_states() {
        let (mut registry, _, _) = registry(&["ws://a", "ws://b", "ws://c"]);
        let mut observer = Recorder::default();
        registry.connect_all(&mut observer);
        assert_eq!(
            registry.tally(),
            Tally { connecting: 3, open: 0, closing: 0, closed: 0 }
        );

        registry.dispatch(socket(0, SocketEvent::Open), &mut observer);
        registry.dispatch(socket(1, SocketEvent::Close(None)), &mut observer);
        assert_eq!(
            registry.tally(),
            Tally { connecting: 1, open: 1, closing: 0, closed: 1 }
        );

        registry.close_all();
        let tally = registry.tally();
        assert_eq!(tally.closing, 2);
        assert_eq!(tally.closed, 1);
    }

    #[test]
    fn losing_every_connection_without_reconnect_is_offline() {
        let (mut registry, _, scheduler) = registry(&["ws://a", "ws://b"]);
        let mut observer = Recorder {
            reconnect: None,
            ..Recorder::default()
        };
        registry.connect_all(&mut observer);
        registry.dispatch(socket(0, SocketEvent::Open), &mut observer);
        registry.dispatch(socket(1, SocketEvent::Open), &mut observer);
        assert!(!registry.tally().is_offline());

        registry.dispatch(socket(0, SocketEvent::Close(Some(1000))), &mut observer);
        assert!(!registry.tally().is_offline());
        registry.dispatch(socket(1, SocketEvent::Close(Some(1000))), &mut observer);

        let tally = registry.tally();
        assert_eq!((tally.open, tally.connecting), (0, 0));
        assert!(tally.is_offline());
        assert!(scheduler.0.borrow().scheduled.is_empty());
    }

    #[test]
    fn pending_reconnect_keeps_registry_online() {
        let (mut registry, _, _) = registry(&["ws://a"]);
        let mut observer = Recorder {
            reconnect: Some(Duration::from_millis(500)),
            ..Recorder::default()
        };
        registry.connect_all(&mut observer);
        registry.dispatch(socket(0, SocketEvent::Close(None)), &mut observer);

        let tally = registry.tally();
        assert_eq!(tally.connecting, 1);
        assert!(!tally.is_offline());
    }

    #[test]
    fn events_for_unknown_ids_are_dropped() {
        let (mut registry, _, _) = registry(&["ws://a"]);
        let mut observer = Recorder::default();
        registry.dispatch(socket(7, SocketEvent::Open), &mut observer);
        assert!(observer.lines.is_empty());
    }
}
