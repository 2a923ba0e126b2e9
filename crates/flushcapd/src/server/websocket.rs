//! Adapts an axum WebSocket into the hub's connection halves.

use axum::extract::ws::{Message, WebSocket};
use futures::{future, SinkExt, StreamExt};

use crate::hub::{ConnectionError, ConnectionSink, PeerFrame, PeerStream};

/// Splits a socket into a text-frame sink and a frame-kind stream.
pub fn split_socket(socket: WebSocket) -> (ConnectionSink, PeerStream) {
    let (sink, stream) = socket.split();

    let sink = sink
        .sink_map_err(ConnectionError::transport)
        .with(|payload: String| future::ready(Ok::<_, ConnectionError>(Message::Text(payload.into()))));

    let stream = stream.map(|frame| match frame {
        Ok(Message::Close(_)) => Ok(PeerFrame::Close),
        Ok(Message::Ping(_) | Message::Pong(_)) => Ok(PeerFrame::Control),
        Ok(Message::Text(_) | Message::Binary(_)) => Ok(PeerFrame::Data),
        Err(e) => Err(ConnectionError::transport(e)),
    });

    (Box::pin(sink), Box::pin(stream))
}
