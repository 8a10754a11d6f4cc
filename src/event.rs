use crate::error::Error;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_stream::wrappers::UnboundedReceiverStream;

// Everything a live session reports back to its virtual user. Errors are
// events rather than return values because the read side runs in its own
// task, a failure there must not abort anything but this one client.
#[derive(Debug)]
pub enum Event {
    Message(String),
    Binary(Vec<u8>),
    Closed,
    Error(Error),
}

// Wraps the session's event channel so the workload consumes a plain
// futures Stream instead of touching the mpsc receiver directly.
pub struct EventStream {
    receiver: UnboundedReceiverStream<Event>,
}

impl EventStream {
    pub fn new(receiver: UnboundedReceiver<Event>) -> Self {
        Self {
            receiver: UnboundedReceiverStream::new(receiver),
        }
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.receiver).poll_next(cx)
    }
}
