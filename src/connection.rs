// One reconnecting WebSocket client per configured URL.
//
// The state machine is driven only by `ConnectionEvent`s: socket events
// tagged with the attempt that produced them, and reconnect timer firings
// tagged with the timer token that scheduled them.
//
//   idle  --open-->   open
//   idle  --close-->  close
//   open  --close-->  close
//   close --timer-->  idle (next attempt)
//   close            terminal when the observer declines to reconnect
use std::fmt;
use std::time::Duration;

use tracing::{debug, trace};

use crate::error::ConnectError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Idle,
    Open,
    Close,
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnState::Idle => "idle",
            ConnState::Open => "open",
            ConnState::Close => "close",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Open,
    Close(Option<u16>),
    Message(String),
    Ping,
    Pong,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Socket {
        id: usize,
        attempt: u64,
        event: SocketEvent,
    },
    ReconnectDue {
        id: usize,
        token: u64,
    },
}

/// The live side of one connect attempt. Dropping it tears the socket down.
pub trait Socket {
    /// Queues a text frame; false when the socket can no longer accept it.
    fn send(&self, payload: &str) -> bool;
    fn close(&self);
}

/// Starts sockets. Events for the started socket must be reported as
/// `ConnectionEvent::Socket` carrying the given `id` and `attempt`.
pub trait Transport {
    fn open(&mut self, id: usize, attempt: u64, url: &str) -> Result<Box<dyn Socket>, ConnectError>;
}

/// Delivers `ConnectionEvent::ReconnectDue { id, token }` after `delay`.
/// Scheduling for an `id` that already has a timer replaces it.
pub trait Scheduler {
    fn schedule(&mut self, id: usize, token: u64, delay: Duration);
    fn cancel(&mut self, id: usize);
}

/// Receives the named events of a connection. `on_close` returns the
/// reconnect delay; `None` or zero means stay closed.
pub trait ConnectionObserver {
    fn on_open(&mut self, conn: &Connection);
    fn on_close(&mut self, conn: &Connection, code: Option<u16>, was_open: bool) -> Option<Duration>;
    fn on_message(&mut self, conn: &Connection, text: &str);
    fn on_error(&mut self, conn: &Connection, error: &str);
    fn on_ping(&mut self, conn: &Connection);
    fn on_pong(&mut self, conn: &Connection);
}

/// Tally bucket of a connection, mirroring a socket's ready state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

pub struct Connection {
    id: usize,
    label: String,
    url: String,
    state: ConnState,
    reconnect_count: u32,
    started: bool,
    attempt: u64,
    socket: Option<Box<dyn Socket>>,
    closing: bool,
    timer_seq: u64,
    pending_reconnect: Option<u64>,
}

impl Connection {
    pub fn new(id: usize, url: impl Into<String>) -> Self {
        Self {
            id,
            label: format!("url{id}"),
            url: url.into(),
            state: ConnState::Idle,
            reconnect_count: 0,
            started: false,
            attempt: 0,
            socket: None,
            closing: false,
            timer_seq: 0,
            pending_reconnect: None,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Stable display label, `url0`, `url1`, ...
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn reconnect_count(&self) -> u32 {
        self.reconnect_count
    }

    pub fn has_socket(&self) -> bool {
        self.socket.is_some()
    }

    pub fn has_pending_reconnect(&self) -> bool {
        self.pending_reconnect.is_some()
    }

    pub fn is_online(&self) -> bool {
        self.state == ConnState::Open && self.socket.is_some() && !self.closing
    }

    pub fn ready_state(&self) -> ReadyState {
        if self.pending_reconnect.is_some() {
            return ReadyState::Connecting;
        }
        match (&self.socket, self.state) {
            (None, _) => ReadyState::Closed,
            (Some(_), _) if self.closing => ReadyState::Closing,
            (Some(_), ConnState::Open) => ReadyState::Open,
            (Some(_), ConnState::Idle) => ReadyState::Connecting,
            (Some(_), ConnState::Close) => ReadyState::Closed,
        }
    }

    /// Starts a new attempt, replacing any previous socket. Returns false when
    /// the socket could not even be started; that failure goes to the
    /// observer's error channel and schedules nothing.
    pub fn connect(
        &mut self,
        transport: &mut dyn Transport,
        scheduler: &mut dyn Scheduler,
        observer: &mut dyn ConnectionObserver,
    ) -> bool {
        if self.pending_reconnect.take().is_some() {
            scheduler.cancel(self.id);
        }
        if self.started {
            self.reconnect_count += 1;
        }
        self.started = true;
        self.state = ConnState::Idle;
        self.closing = false;
        self.attempt += 1;
        self.socket = None;

        debug!(id = %self.label, url = %self.url, attempt = self.attempt, reconnects = self.reconnect_count, "connecting");
        match transport.open(self.id, self.attempt, &self.url) {
            Ok(socket) => {
                self.socket = Some(socket);
                true
            }
            Err(err) => {
                debug!(id = %self.label, error = %err, "connect failed");
                observer.on_error(self, &err.to_string());
                false
            }
        }
    }

    pub fn handle(
        &mut self,
        event: ConnectionEvent,
        transport: &mut dyn Transport,
        scheduler: &mut dyn Scheduler,
        observer: &mut dyn ConnectionObserver,
    ) {
        match event {
            ConnectionEvent::Socket { attempt, event, .. } if attempt == self.attempt => {
                self.handle_socket(event, scheduler, observer);
            }
            ConnectionEvent::Socket { attempt, event, .. } => {
                trace!(id = %self.label, attempt, current = self.attempt, ?event, "stale socket event");
            }
            ConnectionEvent::ReconnectDue { token, .. } if self.pending_reconnect == Some(token) => {
                self.pending_reconnect = None;
                self.connect(transport, scheduler, observer);
            }
            ConnectionEvent::ReconnectDue { token, .. } => {
                trace!(id = %self.label, token, "stale reconnect timer");
            }
        }
    }

    fn handle_socket(
        &mut self,
        event: SocketEvent,
        scheduler: &mut dyn Scheduler,
        observer: &mut dyn ConnectionObserver,
    ) {
        match event {
            SocketEvent::Open => {
                self.state = ConnState::Open;
                self.reconnect_count = 0;
                debug!(id = %self.label, "open");
                observer.on_open(self);
            }
            SocketEvent::Close(code) => {
                let was_open = self.state == ConnState::Open;
                self.state = ConnState::Close;
                self.socket = None;
                self.closing = false;
                debug!(id = %self.label, ?code, was_open, "closed");

                let delay = observer.on_close(self, code, was_open);
                if self.pending_reconnect.take().is_some() {
                    scheduler.cancel(self.id);
                }
                if let Some(delay) = delay.filter(|d| !d.is_zero()) {
                    self.timer_seq += 1;
                    self.pending_reconnect = Some(self.timer_seq);
                    debug!(id = %self.label, ?delay, "reconnect scheduled");
                    scheduler.schedule(self.id, self.timer_seq, delay);
                }
            }
            SocketEvent::Message(text) => observer.on_message(self, &text),
            SocketEvent::Ping => observer.on_ping(self),
            SocketEvent::Pong => observer.on_pong(self),
            SocketEvent::Error(error) => observer.on_error(self, &error),
        }
    }

    /// Sends on an open socket; false when offline.
    pub fn send(&self, payload: &str) -> bool {
        match &self.socket {
            Some(socket) if self.is_online() => socket.send(payload),
            _ => false,
        }
    }

    /// Asks the socket to close and drops any pending reconnect.
    pub fn close(&mut self, scheduler: &mut dyn Scheduler) {
        if self.pending_reconnect.take().is_some() {
            scheduler.cancel(self.id);
        }
        if let Some(socket) = &self.socket {
            socket.close();
            self.closing = true;
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    struct Rig {
        conn: Connection,
        transport: FakeTransport,
        scheduler: FakeScheduler,
        observer: Recorder,
    }

    impl Rig {
        fn new(reconnect: Option<Duration>) -> Self {
            Self {
                conn: Connection::new(0, "ws://localhost:9510/topics"),
                transport: FakeTransport::default(),
                scheduler: FakeScheduler::default(),
                observer: Recorder {
                    reconnect,
                    ..Recorder::default()
                },
            }
        }

        fn connect(&mut self) -> bool {
            self.conn
                .connect(&mut self.transport, &mut self.scheduler, &mut self.observer)
        }

        fn socket(&mut self, event: SocketEvent) {
            let attempt = self.conn.attempt;
            self.deliver(ConnectionEvent::Socket { id: 0, attempt, event });
        }

        fn deliver(&mut self, event: ConnectionEvent) {
            self.conn.handle(
                event,
                &mut self.transport,
                &mut self.scheduler,
                &mut self.observer,
            );
        }
    }

    #[test]
    fn open_resets_reconnect_count_and_notifies() {
        let mut rig = Rig::new(None);
        assert!(rig.connect());
        assert_eq!(rig.conn.state(), ConnState::Idle);
        assert_eq!(rig.conn.ready_state(), ReadyState::Connecting);

        rig.socket(SocketEvent::Open);
        assert_eq!(rig.conn.state(), ConnState::Open);
        assert_eq!(rig.conn.reconnect_count(), 0);
        assert_eq!(rig.conn.ready_state(), ReadyState::Open);
        assert_eq!(rig.observer.lines, ["url0 open"]);
    }

    #[test]
    fn declined_reconnect_never_schedules() {
        let mut rig = Rig::new(Some(Duration::ZERO));
        rig.connect();
        rig.socket(SocketEvent::Open);
        rig.socket(SocketEvent::Close(Some(1000)));

        assert_eq!(rig.conn.state(), ConnState::Close);
        assert!(!rig.conn.has_socket());
        assert!(!rig.conn.has_pending_reconnect());
        assert!(rig.scheduler.0.borrow().scheduled.is_empty());
        assert_eq!(rig.conn.ready_state(), ReadyState::Closed);
    }

    #[test]
    fn accepted_reconnect_schedules_once_and_reconnects_on_fire() {
        let mut rig = Rig::new(Some(Duration::from_millis(1000)));
        rig.connect();
        rig.socket(SocketEvent::Open);
        rig.socket(SocketEvent::Close(Some(1006)));

        let (id, token, delay) = rig.scheduler.0.borrow().scheduled[0];
        assert_eq!((id, delay), (0, Duration::from_millis(1000)));
        assert_eq!(rig.scheduler.0.borrow().scheduled.len(), 1);
        assert_eq!(rig.conn.ready_state(), ReadyState::Connecting);

        rig.deliver(ConnectionEvent::ReconnectDue { id: 0, token });
        assert_eq!(rig.conn.state(), ConnState::Idle);
        assert_eq!(rig.conn.reconnect_count(), 1);
        assert!(!rig.conn.has_pending_reconnect());
        assert_eq!(rig.transport.0.borrow().opened.len(), 2);

        rig.socket(SocketEvent::Open);
        assert_eq!(rig.conn.reconnect_count(), 0);
    }

    #[test]
    fn second_close_cancels_the_first_timer() {
        let mut rig = Rig::new(Some(Duration::from_millis(1000)));
        rig.connect();
        rig.socket(SocketEvent::Open);
        rig.socket(SocketEvent::Close(None));
        rig.socket(SocketEvent::Close(None));

        let timers = rig.scheduler.0.borrow();
        assert_eq!(timers.scheduled.len(), 2);
        assert_eq!(timers.cancelled, [0]);
        assert_eq!(timers.pending.len(), 1);
        let first = timers.scheduled[0].1;
        let second = timers.scheduled[1].1;
        assert_ne!(first, second);
        drop(timers);

        // The cancelled timer's firing is ignored.
        rig.deliver(ConnectionEvent::ReconnectDue { id: 0, token: first });
        assert_eq!(rig.transport.0.borrow().opened.len(), 1);
        assert!(rig.conn.has_pending_reconnect());

        rig.deliver(ConnectionEvent::ReconnectDue { id: 0, token: second });
        assert_eq!(rig.transport.0.borrow().opened.len(), 2);
    }

    #[test]
    fn reconnect_count_grows_across_failed_attempts() {
        let mut rig = Rig::new(Some(Duration::from_millis(10)));
        rig.connect();
        for expected in 1..=3 {
            rig.socket(SocketEvent::Error("refused".into()));
            rig.socket(SocketEvent::Close(None));
            let token = rig.scheduler.0.borrow().scheduled.last().unwrap().1;
            rig.deliver(ConnectionEvent::ReconnectDue { id: 0, token });
            assert_eq!(rig.conn.reconnect_count(), expected);
        }
        assert!(rig
            .observer
            .lines
            .iter()
            .any(|l| l == "url0 close None was_open=false reconnects=2"));
    }

    #[test]
    fn events_from_a_replaced_socket_are_ignored() {
        let mut rig = Rig::new(Some(Duration::from_millis(10)));
        rig.connect();
        let stale = rig.conn.attempt;
        rig.socket(SocketEvent::Close(None));
        let token = rig.scheduler.0.borrow().scheduled[0].1;
        rig.deliver(ConnectionEvent::ReconnectDue { id: 0, token });

        rig.deliver(ConnectionEvent::Socket {
            id: 0,
            attempt: stale,
            event: SocketEvent::Open,
        });
        assert_eq!(rig.conn.state(), ConnState::Idle);
    }

    #[test]
    fn start_failure_reports_error_without_retry() {
        let mut rig = Rig::new(Some(Duration::from_millis(10)));
        rig.transport.0.borrow_mut().refuse = true;

        assert!(!rig.connect());
        assert!(!rig.conn.has_socket());
        assert_eq!(rig.conn.ready_state(), ReadyState::Closed);
        assert!(rig.scheduler.0.borrow().scheduled.is_empty());
        assert_eq!(rig.observer.lines.len(), 1);
        assert!(rig.observer.lines[0].starts_with("url0 error cannot open"));
    }

    #[test]
    fn passive_events_do_not_change_state() {
        let mut rig = Rig::new(None);
        rig.connect();
        rig.socket(SocketEvent::Open);
        rig.socket(SocketEvent::Message("hello".into()));
        rig.socket(SocketEvent::Ping);
        rig.socket(SocketEvent::Pong);
        rig.socket(SocketEvent::Error("boom".into()));

        assert_eq!(rig.conn.state(), ConnState::Open);
        assert_eq!(
            rig.observer.lines,
            ["url0 open", "url0 message hello", "url0 ping", "url0 pong", "url0 error boom"]
        );
    }

    #[test]
    fn send_only_when_open_and_close_marks_closing() {
        let mut rig = Rig::new(None);
        rig.connect();
        assert!(!rig.conn.send("early"));

        rig.socket(SocketEvent::Open);
        assert!(rig.conn.send("hi"));
        assert_eq!(rig.transport.0.borrow().sent, [(0, "hi".to_string())]);

        rig.conn.close(&mut rig.scheduler);
        assert_eq!(rig.conn.ready_state(), ReadyState::Closing);
        assert!(!rig.conn.send("late"));
        assert_eq!(rig.transport.0.borrow().closed, [0]);
    }
}
