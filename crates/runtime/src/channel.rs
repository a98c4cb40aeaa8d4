//! Channel operations for CSP-style concurrency (§4.6).
//!
//! Grounded on `seq-runtime::channel`: channels are built on May's MPMC
//! channel, which is unbounded and never blocks a sender. `capacity == 0`
//! (rendezvous) and any bounded `capacity` are therefore advisory on top of
//! that same unbounded channel, exactly as the teacher's own `channel.rs`
//! never implements send-side backpressure either — only `receive` actually
//! blocks, cooperatively, via May's scheduler.

use limit_core::value::{ChannelHandle, Value};
use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lifetime count of channels created, for `diagnostics::dump`.
pub static OPEN_CHANNELS: AtomicU64 = AtomicU64::new(0);

pub fn new_channel(capacity: usize) -> ChannelHandle {
    let (sender, receiver) = may::sync::mpmc::channel();
    OPEN_CHANNELS.fetch_add(1, Ordering::Relaxed);
    ChannelHandle {
        sender,
        receiver,
        capacity,
        closed: std::rc::Rc::new(RefCell::new(false)),
    }
}

/// Sends never block (see module docs); fails only once the channel has
/// been explicitly closed.
pub fn send(channel: &ChannelHandle, value: Value) -> Result<(), crate::error::RuntimeError> {
    if *channel.closed.borrow() {
        return Err(crate::error::RuntimeError::ChannelClosed);
    }
    channel.sender.send(value).map_err(|_| crate::error::RuntimeError::ChannelClosed)
}

/// Cooperatively blocks the current coroutine until a value is available
/// or the channel is closed and drained.
pub fn receive(channel: &ChannelHandle) -> Option<Value> {
    channel.receiver.recv().ok()
}

pub fn close(channel: &ChannelHandle) {
    *channel.closed.borrow_mut() = true;
    OPEN_CHANNELS.fetch_sub(1, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_then_receive_round_trips_a_value() {
        let ch = new_channel(0);
        send(&ch, Value::Int(7)).unwrap();
        assert_eq!(receive(&ch), Some(Value::Int(7)));
    }

    #[test]
    fn send_on_closed_channel_fails() {
        let ch = new_channel(1);
        close(&ch);
        assert!(send(&ch, Value::Int(1)).is_err());
    }
}
