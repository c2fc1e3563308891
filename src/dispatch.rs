//! Routes parsed events to handler callbacks, at most one terminal per session.

use crate::stream::ParsedEvent;

/// Receiver of dispatched events.
pub trait EventHandler {
    fn on_token(&mut self, text: &str);
    fn on_error(&mut self, message: &str);
    fn on_done(&mut self);
}

/// Which terminal event closed the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    Done,
    Error,
}

/// Result of one [`Dispatcher::dispatch`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Forwarded,
    /// The session already saw a terminal event; nothing was called.
    Suppressed,
}

/// Per-session event router.
///
/// Once `Done` or `Error` has been forwarded, every later event is dropped,
/// so a trailing sentinel after an error (or the reverse) cannot finalize
/// the message twice.
#[derive(Debug, Default)]
pub struct Dispatcher {
    terminal: Option<Terminal>,
    tokens: u64,
    suppressed: u64,
}

impl Dispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatch<H>(&mut self, event: &ParsedEvent, handler: &mut H) -> Dispatch
    where
        H: EventHandler + ?Sized,
    {
        if let Some(terminal) = self.terminal {
            self.suppressed += 1;
            tracing::debug!(?terminal, ?event, "event after terminal suppressed");
            return Dispatch::Suppressed;
        }
        match event {
            ParsedEvent::Token(text) => {
                self.tokens += 1;
                handler.on_token(text);
            }
            ParsedEvent::Error(message) => {
                self.terminal = Some(Terminal::Error);
                handler.on_error(message);
            }
            ParsedEvent::Done => {
                self.terminal = Some(Terminal::Done);
                handler.on_done();
            }
        }
        Dispatch::Forwarded
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminal.is_some()
    }

    #[must_use]
    pub fn terminal(&self) -> Option<Terminal> {
        self.terminal
    }

    /// Tokens forwarded so far.
    #[must_use]
    pub fn tokens(&self) -> u64 {
        self.tokens
    }

    /// Events dropped because the session had already terminated.
    #[must_use]
    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }
}

/// [`EventHandler`] built from three closures.
pub struct Callbacks<T, E, D> {
    pub on_token: T,
    pub on_error: E,
    pub on_done: D,
}

impl<T, E, D> EventHandler for Callbacks<T, E, D>
where
    T: FnMut(&str),
    E: FnMut(&str),
    D: FnMut(),
{
    fn on_token(&mut self, text: &str) {
        (self.on_token)(text);
    }

    fn on_error(&mut self, message: &str) {
        (self.on_error)(message);
    }

    fn on_done(&mut self) {
        (self.on_done)();
    }
}
