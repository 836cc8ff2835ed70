//! Broadcast collective over a worker group.
//!
//! Rank 0 parses requests off the socket and hands the typed struct to
//! every worker rank; each worker reconstructs its local state by applying
//! the request itself. Rendezvous channels make the broadcast a true
//! collective: it returns only once every rank has taken the message.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Sender};

use crate::error::{EngineError, EngineResult};
use crate::net::protocol::Request;

/// Applied by each worker rank to every broadcast request
pub trait RequestHandler: Send {
    fn handle(&mut self, request: &Request);
}

/// Worker ranks 1..=n participating in the request broadcast
pub struct BroadcastGroup {
    senders: Vec<Sender<Request>>,
    workers: Vec<JoinHandle<()>>,
}

impl BroadcastGroup {
    /// Spawn `ranks` workers; `factory` builds the per-rank handler.
    /// Zero ranks yields a single-ranked server with an unchanged wire
    /// protocol.
    pub fn spawn<H, F>(ranks: usize, factory: F) -> Self
    where
        H: RequestHandler + 'static,
        F: Fn(usize) -> H,
    {
        let mut senders = Vec::with_capacity(ranks);
        let mut workers = Vec::with_capacity(ranks);
        for rank in 1..=ranks {
            let (tx, rx) = bounded::<Request>(0);
            let mut handler = factory(rank);
            workers.push(
                thread::Builder::new()
                    .name(format!("brick-worker-{}", rank))
                    .spawn(move || {
                        for request in rx {
                            let stop = matches!(request, Request::Shutdown);
                            handler.handle(&request);
                            if stop {
                                break;
                            }
                        }
                        log::debug!("worker rank {} exits", rank);
                    })
                    .expect("spawn worker thread"),
            );
            senders.push(tx);
        }
        Self { senders, workers }
    }

    pub fn ranks(&self) -> usize {
        self.senders.len()
    }

    /// Deliver one request to every rank; blocks until all have taken it
    pub fn broadcast(&self, request: &Request) -> EngineResult<()> {
        for sender in &self.senders {
            sender
                .send(request.clone())
                .map_err(|_| EngineError::ChannelClosed {
                    name: "broadcast".to_string(),
                })?;
        }
        Ok(())
    }

    /// Stop the workers and wait for them
    pub fn shutdown(self) {
        drop(self.senders);
        for worker in self.workers {
            let _ = worker.join();
        }
    }
}
