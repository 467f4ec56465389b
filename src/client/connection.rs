//! Client request multiplexer (`spec.md` §4.4).
//!
//! One [`Connection`] owns exactly one reader task (the recv loop) and
//! one write mutex (via [`WriteHalf`]). Callers get back a
//! [`oneshot::Receiver`] for their request's eventual response; the recv
//! loop demuxes incoming packets onto the matching receiver by id, and a
//! read error broadcasts `CONNECTION_LOST` to every request still
//! waiting, exactly once.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::framer::{self, WriteHalf};
use crate::protocol::Packet;

type Waiter = oneshot::Sender<Result<Packet>>;

struct InFlight {
    waiters: HashMap<u32, Waiter>,
    closed_err: Option<String>,
    /// Ids whose call was cancelled while still outstanding. A reply
    /// that later arrives for one of these is drained and dropped
    /// rather than treated as desync, per the "late server reply is
    /// drained and dropped" cancellation contract.
    cancelled: HashSet<u32>,
}

/// One live SFTP connection's request multiplexer.
///
/// Cloning shares the same in-flight table and write half; every clone
/// talks to the same underlying stream.
#[derive(Clone)]
pub struct Connection<W> {
    next_id: Arc<AtomicU32>,
    in_flight: Arc<Mutex<InFlight>>,
    writer: Arc<WriteHalf<W>>,
    cancellation: CancellationToken,
}

impl<W> Connection<W>
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    /// Build a connection around a writer half and spawn the recv loop
    /// reading from `reader`. The recv loop runs until `reader` errors or
    /// reaches EOF, at which point it broadcasts `CONNECTION_LOST`.
    pub fn new<R>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let conn = Self {
            next_id: Arc::new(AtomicU32::new(1)),
            in_flight: Arc::new(Mutex::new(InFlight {
                waiters: HashMap::new(),
                closed_err: None,
                cancelled: HashSet::new(),
            })),
            writer: Arc::new(WriteHalf::new(writer)),
            cancellation: CancellationToken::new(),
        };
        conn.clone().spawn_recv_loop(reader);
        conn
    }

    /// Attach the token whose cancellation aborts in-flight waits on this
    /// connection (`call`, and the pipelined transfer engine's dispatch
    /// loops built on top of it). Every clone of the returned connection
    /// shares it.
    #[must_use]
    pub(crate) fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// The token that cancels in-flight waits on this connection.
    pub(crate) fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    fn spawn_recv_loop<R>(self, mut reader: R)
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        tokio::spawn(async move {
            loop {
                let frame = match framer::read_frame(&mut reader).await {
                    Ok(frame) => frame,
                    Err(err) => {
                        debug!(%err, "recv loop exiting, broadcasting connection loss");
                        self.broadcast_err(err.to_string()).await;
                        return;
                    }
                };
                let packet = match Packet::decode(&frame.body) {
                    Ok(packet) => packet,
                    Err(err) => {
                        warn!(%err, "undecodable response, treating as fatal");
                        self.broadcast_err(err.to_string()).await;
                        return;
                    }
                };
                let Some(id) = packet.id() else {
                    warn!("response packet with no id, ignoring");
                    continue;
                };

                let waiter = {
                    let mut state = self.in_flight.lock().await;
                    state.waiters.remove(&id)
                };
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(Ok(packet));
                    }
                    None => {
                        let was_cancelled = {
                            let mut state = self.in_flight.lock().await;
                            state.cancelled.remove(&id)
                        };
                        if was_cancelled {
                            debug!(id, "dropping late reply for cancelled request");
                            continue;
                        }
                        warn!(id, "response for unknown request id, fatal protocol error");
                        self.broadcast_err(format!("unknown response id {id}")).await;
                        return;
                    }
                }
            }
        });
    }

    async fn broadcast_err(&self, message: String) {
        let mut state = self.in_flight.lock().await;
        if state.closed_err.is_some() {
            return;
        }
        state.closed_err = Some(message.clone());
        for (_, tx) in state.waiters.drain() {
            let _ = tx.send(Err(Error::ConnectionLost(message.clone())));
        }
    }

    /// Allocate a request id, install its waiter, marshal and write
    /// `packet`, and return a receiver for the eventual response.
    ///
    /// The caller must set `packet`'s id field to the value returned
    /// before calling this — see [`Connection::next_id`] — or more
    /// conveniently use [`Connection::call`], which does both.
    async fn dispatch(&self, id: u32, packet: &Packet) -> Result<oneshot::Receiver<Result<Packet>>> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.in_flight.lock().await;
            if let Some(err) = &state.closed_err {
                return Err(Error::ConnectionLost(err.clone()));
            }
            state.waiters.insert(id, tx);
        }

        if let Err(err) = self.writer.write_packet(packet).await {
            let mut state = self.in_flight.lock().await;
            state.waiters.remove(&id);
            return Err(err);
        }

        Ok(rx)
    }

    /// Allocate the next request id.
    pub fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Send `packet` (whose id must already be set to a value from
    /// [`Connection::next_id`]) and await its matching response.
    ///
    /// If the connection's cancellation token fires first, the in-flight
    /// waiter is removed and dropped (a late reply for `id` is then
    /// simply unmatched and ignored by the recv loop) and this returns
    /// [`Error::Cancelled`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionLost`] if the connection is already
    /// dead, [`Error::Cancelled`] if the token fired first, or any I/O
    /// error the write encountered.
    pub async fn call(&self, id: u32, packet: &Packet) -> Result<Packet> {
        let rx = self.dispatch(id, packet).await?;
        tokio::select! {
            () = self.cancellation.cancelled() => {
                let mut state = self.in_flight.lock().await;
                state.waiters.remove(&id);
                state.cancelled.insert(id);
                Err(Error::Cancelled)
            }
            result = rx => match result {
                Ok(result) => result,
                Err(_) => Err(Error::ConnectionLost(
                    "in-flight waiter dropped without a response".into(),
                )),
            },
        }
    }

    /// Number of requests currently awaiting a response, for tests and diagnostics.
    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.lock().await.waiters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::{Init, Status};
    use crate::protocol::StatusCode;

    #[tokio::test]
    async fn call_round_trips_a_response_by_id() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (client_r, client_w) = tokio::io::split(client_io);
        let conn = Connection::new(client_r, client_w);

        let (mut server_r, mut server_w) = tokio::io::split(server_io);
        tokio::spawn(async move {
            let frame = framer::read_frame(&mut server_r).await.unwrap();
            let req = Packet::decode(&frame.body).unwrap();
            let id = req.id().unwrap();
            framer::write_packet(&mut server_w, &Packet::Status(Status::ok(id)))
                .await
                .unwrap();
        });

        let id = conn.next_id();
        let response = conn
            .call(id, &Packet::Close(crate::protocol::packet::Close { id, handle: vec![] }))
            .await
            .unwrap();
        assert!(matches!(response, Packet::Status(s) if s.code == u32::from(StatusCode::Ok)));
    }

    #[tokio::test]
    async fn connection_loss_broadcasts_to_every_waiter_exactly_once() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (client_r, client_w) = tokio::io::split(client_io);
        let conn = Connection::new(client_r, client_w);
        drop(server_io); // closes the peer, recv loop will see EOF/error

        let id_a = conn.next_id();
        let id_b = conn.next_id();
        let a = conn.call(
            id_a,
            &Packet::Close(crate::protocol::packet::Close { id: id_a, handle: vec![] }),
        );
        let b = conn.call(
            id_b,
            &Packet::Close(crate::protocol::packet::Close { id: id_b, handle: vec![] }),
        );
        let (ra, rb) = tokio::join!(a, b);
        assert!(matches!(ra, Err(Error::ConnectionLost(_)) | Ok(_)));
        assert!(matches!(rb, Err(Error::ConnectionLost(_)) | Ok(_)));
    }

    #[tokio::test]
    async fn concurrent_calls_get_distinct_ids() {
        let (client_io, _server_io) = tokio::io::duplex(4096);
        let (client_r, client_w) = tokio::io::split(client_io);
        let conn = Connection::new(client_r, client_w);
        let mut ids = std::collections::HashSet::new();
        for _ in 0..100 {
            assert!(ids.insert(conn.next_id()));
        }
    }

    #[test]
    fn init_packet_type_compiles() {
        let _ = Init { version: 3 };
    }

    #[tokio::test]
    async fn cancelling_the_token_aborts_a_pending_call() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (client_r, client_w) = tokio::io::split(client_io);
        let conn = Connection::new(client_r, client_w);
        let token = conn.cancellation();
        // Never answered: the server side just holds the connection open.
        let (_server_r, _server_w) = tokio::io::split(server_io);

        let id = conn.next_id();
        let call = conn.call(id, &Packet::Close(crate::protocol::packet::Close { id, handle: vec![] }));
        token.cancel();
        assert!(matches!(call.await, Err(Error::Cancelled)));
        assert_eq!(conn.in_flight_count().await, 0);
    }

    #[tokio::test]
    async fn late_reply_for_a_cancelled_call_is_dropped_not_fatal() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (client_r, client_w) = tokio::io::split(client_io);
        let conn = Connection::new(client_r, client_w);
        let token = conn.cancellation();

        let (mut server_r, mut server_w) = tokio::io::split(server_io);
        let id = conn.next_id();
        let cancelled_call = conn.call(
            id,
            &Packet::Close(crate::protocol::packet::Close { id, handle: vec![] }),
        );
        token.cancel();
        assert!(matches!(cancelled_call.await, Err(Error::Cancelled)));

        // The server answers anyway, after the client stopped waiting.
        let frame = framer::read_frame(&mut server_r).await.unwrap();
        let req = Packet::decode(&frame.body).unwrap();
        framer::write_packet(&mut server_w, &Packet::Status(Status::ok(req.id().unwrap())))
            .await
            .unwrap();

        // A second, uncancelled call on the same connection still works:
        // the late reply above must not have been mistaken for desync.
        let conn2 = conn.clone();
        let next_id = conn2.next_id();
        tokio::spawn(async move {
            let frame = framer::read_frame(&mut server_r).await.unwrap();
            let req = Packet::decode(&frame.body).unwrap();
            framer::write_packet(&mut server_w, &Packet::Status(Status::ok(req.id().unwrap())))
                .await
                .unwrap();
        });
        let response = conn2
            .call(
                next_id,
                &Packet::Close(crate::protocol::packet::Close {
                    id: next_id,
                    handle: vec![],
                }),
            )
            .await
            .unwrap();
        assert!(matches!(response, Packet::Status(s) if s.code == u32::from(StatusCode::Ok)));
    }
}
