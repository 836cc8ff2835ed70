//! Background brick prefetch.
//!
//! A worker thread pulls payloads through the dataset facade (which may
//! block on disk or socket I/O) and hands them back over a channel. The
//! render thread drains the channel and performs the uploads itself; the
//! worker never touches the GPU.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::dataset::{BrickData, BrickKey, BrickMetadata, Dataset};
use crate::error::{EngineError, EngineResult};
use crate::render::cache::GpuBrickCache;
use crate::render::gpu::GpuContext;

/// Fetched payload waiting for its render-thread upload
pub struct PrefetchedBrick {
    pub key: BrickKey,
    pub metadata: BrickMetadata,
    pub data: BrickData,
}

/// Asynchronous payload fetcher feeding the GPU brick cache
pub struct BrickPrefetcher {
    request_tx: Option<Sender<BrickKey>>,
    ready_rx: Receiver<PrefetchedBrick>,
    worker: Option<JoinHandle<()>>,
}

impl BrickPrefetcher {
    pub fn spawn(dataset: Arc<dyn Dataset>) -> Self {
        let (request_tx, request_rx) = unbounded::<BrickKey>();
        let (ready_tx, ready_rx) = unbounded();
        let worker = thread::Builder::new()
            .name("brick-prefetch".to_string())
            .spawn(move || {
                for key in request_rx {
                    let fetched = dataset
                        .brick_metadata(&key)
                        .and_then(|metadata| Ok((metadata, dataset.brick_data(&key)?)));
                    match fetched {
                        Ok((metadata, data)) => {
                            if ready_tx
                                .send(PrefetchedBrick {
                                    key,
                                    metadata,
                                    data,
                                })
                                .is_err()
                            {
                                break;
                            }
                        }
                        Err(e) => log::warn!("prefetch of {} failed: {}", key, e),
                    }
                }
            })
            .expect("spawn prefetch thread");
        Self {
            request_tx: Some(request_tx),
            ready_rx,
            worker: Some(worker),
        }
    }

    /// Queue one brick for background fetching
    pub fn request(&self, key: BrickKey) -> EngineResult<()> {
        self.request_tx
            .as_ref()
            .and_then(|tx| tx.send(key).ok())
            .ok_or(EngineError::ChannelClosed {
                name: "prefetch".to_string(),
            })
    }

    /// Upload every finished fetch into the cache; render thread only.
    /// Returns the number of bricks admitted.
    pub fn drain_into<G: GpuContext + ?Sized>(
        &self,
        ctx: &mut G,
        cache: &mut GpuBrickCache,
        frame: u64,
    ) -> usize {
        let mut admitted = 0;
        for brick in self.ready_rx.try_iter() {
            match cache.admit(ctx, brick.key, &brick.metadata, &brick.data, frame, 0) {
                Ok(_) => admitted += 1,
                // A prefetched brick that no longer fits is not an error;
                // the frame loop will fetch it again if it matters.
                Err(e) => log::debug!("prefetched {} not admitted: {}", brick.key, e),
            }
        }
        admitted
    }
}

impl Drop for BrickPrefetcher {
    fn drop(&mut self) {
        self.request_tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
