//! Inbound command dispatch (§9 Design Notes: "Callback-registered inbound -> an explicit
//! Dispatcher the application drives with an update() call that drains the inbound queue
//! synchronously. No hidden threads call user code.").
//!
//! `Dispatcher` itself never touches a socket or spawns a thread; it is driven entirely by the
//! application calling `update` once per frame/tick, matching §5 "Inbound callbacks are dispatched
//! by the application's own thread on explicit 'update' invocations".
use crate::command::Command;
use crate::inbound::InboundQueue;
use hashbrown::HashMap;
use slog::Logger;

/// A registered inbound handler. Handlers run synchronously on the caller's thread inside
/// `update`, never on the session's worker thread.
pub type Handler = Box<dyn FnMut(Command) + Send>;

pub struct Dispatcher {
    handlers: HashMap<u8, Handler>,
    logger: Logger,
}

impl Dispatcher {
    pub fn new(logger: Logger) -> Dispatcher {
        Dispatcher {
            handlers: HashMap::new(),
            logger,
        }
    }

    /// Registers (or replaces) the handler for `opcode`. Real wire opcodes and FAKE opcodes share
    /// the `u8` namespace identically here, since `Command::opcode` is the dispatch key either way
    /// (§3 GLOSSARY "FAKE command").
    pub fn register<F>(&mut self, opcode: u8, handler: F)
    where
        F: FnMut(Command) + Send + 'static,
    {
        self.handlers.insert(opcode, Box::new(handler));
    }

    pub fn unregister(&mut self, opcode: u8) {
        self.handlers.remove(&opcode);
    }

    /// Drains `inbound` synchronously, invoking the registered handler for each command's opcode.
    /// A command whose opcode has no registered handler is logged and dropped — there is no
    /// hidden catch-all, per the design note's "no hidden threads call user code" intent extended
    /// to "no silent default behavior" either.
    pub fn update(&mut self, inbound: &mut InboundQueue) {
        while let Some(cmd) = inbound.pop() {
            let opcode = cmd.opcode;
            match self.handlers.get_mut(&opcode) {
                Some(handler) => handler(cmd),
                None => slog::debug!(self.logger, "no callback registered for inbound command"; "opcode" => opcode),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inbound::IN_QUEUE_DEFAULT_MAX_SIZE;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    fn node_destroy(node_id: u32) -> Command {
        Command::new(33, node_id.to_be_bytes().to_vec())
    }

    #[test]
    fn test_registered_handler_runs_in_fifo_order() {
        let mut dispatcher = Dispatcher::new(test_logger());
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_handle = seen.clone();
        dispatcher.register(33, move |cmd: Command| {
            seen_handle.lock().unwrap().push(cmd.payload);
        });

        let mut inbound = InboundQueue::new(IN_QUEUE_DEFAULT_MAX_SIZE);
        inbound.push(node_destroy(1));
        inbound.push(node_destroy(2));
        dispatcher.update(&mut inbound);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], 1u32.to_be_bytes().to_vec());
        assert_eq!(seen[1], 2u32.to_be_bytes().to_vec());
    }

    #[test]
    fn test_unregistered_opcode_is_dropped_not_panicked() {
        let mut dispatcher = Dispatcher::new(test_logger());
        let mut inbound = InboundQueue::new(IN_QUEUE_DEFAULT_MAX_SIZE);
        inbound.push(node_destroy(1));
        dispatcher.update(&mut inbound);
        assert!(inbound.is_empty());
    }

    #[test]
    fn test_unregister_stops_delivery() {
        let mut dispatcher = Dispatcher::new(test_logger());
        let count = Arc::new(AtomicU32::new(0));
        let count_handle = count.clone();
        dispatcher.register(33, move |_| {
            count_handle.fetch_add(1, Ordering::SeqCst);
        });
        dispatcher.unregister(33);

        let mut inbound = InboundQueue::new(IN_QUEUE_DEFAULT_MAX_SIZE);
        inbound.push(node_destroy(1));
        dispatcher.update(&mut inbound);

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
