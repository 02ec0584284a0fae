use parking_lot::Mutex;

/// A simple event emitter sending a single event to multiple MPSC channels.
#[derive(Debug)]
pub struct EventEmitter<T: Clone> {
    senders: Mutex<Vec<flume::Sender<T>>>,
}

impl<T: Clone> Default for EventEmitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> EventEmitter<T> {
    pub fn new() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }

    /// Creates a new receiver and adds the corresponding sender to the sender
    /// list.
    pub fn create_receiver(&self) -> flume::Receiver<T> {
        let (tx, rx) = flume::unbounded();
        self.senders.lock().push(tx);
        rx
    }

    /// Emits an event to all senders. Senders whose receivers were dropped are
    /// removed from the list.
    pub fn emit(&self, event: T) {
        self.senders
            .lock()
            .retain(|sender| sender.send(event.clone()).is_ok());
    }

    /// Drops every sender, ending all receivers once they are drained.
    pub fn close(&self) {
        self.senders.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_receiver_gets_every_event() {
        let emitter = EventEmitter::new();
        let a = emitter.create_receiver();
        let b = emitter.create_receiver();

        emitter.emit(1u8);
        emitter.emit(2u8);

        assert_eq!(a.drain().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(b.drain().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let emitter = EventEmitter::new();
        drop(emitter.create_receiver());
        let kept = emitter.create_receiver();

        emitter.emit(());
        assert_eq!(emitter.senders.lock().len(), 1);
        assert!(kept.try_recv().is_ok());

        emitter.close();
        assert!(kept.try_recv().is_err());
    }
}
