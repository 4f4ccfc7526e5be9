//! Wires one receiver and N handlers over exchange lanes and runs them on
//! supervised threads.

use crate::handler::{Handler, HandlerSettings, ReplyPath, reply_buffer};
use crate::metrics::{HandlerMetrics, HandlerSnapshot, ReceiverMetrics, ReceiverSnapshot};
use crate::receiver::Receiver;
use quarry_core::{AffinitySetter, spawn_worker};
use quarry_lanes::{AcquireRing, BackoffPolicy, ReleaseRing, exchange_lanes};
use quarry_net::{Transport, TransportError};
use quarry_store::{StateStore, StoreError};
use quarry_wire::PacketSlotBuffer;
use receiver_config::ReceiverConfig;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum StartError {
    #[error("failed to open state store for handler {lane}")]
    Store {
        lane: usize,
        #[source]
        source: StoreError,
    },
    #[error("failed to open reply transport for handler {lane}")]
    Transport {
        lane: usize,
        #[source]
        source: TransportError,
    },
    #[error("failed to spawn worker thread")]
    Spawn(#[from] io::Error),
}

pub struct ReceivePipeline {
    stop: Arc<AtomicBool>,
    receiver: Arc<ReceiverMetrics>,
    handlers: Vec<Arc<HandlerMetrics>>,
    threads: Vec<JoinHandle<()>>,
}

impl ReceivePipeline {
    /// Allocates the buffer pool, opens per-handler stores and reply paths,
    /// and starts every worker.
    ///
    /// Stores are opened only when `store_percent > 0`, reply transports only
    /// when `reply_percent > 0` and a reply address is configured. The config
    /// is expected to have passed [`ReceiverConfig::validate`].
    pub fn start<T, FS, FR>(
        cfg: &ReceiverConfig,
        transport: T,
        mut open_store: FS,
        mut open_reply: FR,
        affinity: Arc<dyn AffinitySetter>,
    ) -> Result<Self, StartError>
    where
        T: Transport + 'static,
        FS: FnMut(usize) -> Result<Box<dyn StateStore>, StoreError>,
        FR: FnMut(usize) -> Result<Box<dyn Transport>, TransportError>,
    {
        let lanes = cfg.handler_threads;
        let stop = Arc::new(AtomicBool::new(false));
        let settings = HandlerSettings {
            store_percent: cfg.store_percent,
            reply_percent: cfg.reply_percent,
            workload_iterations: cfg.workload_iterations,
        };

        let (filler, drainers) = exchange_lanes(lanes, cfg.buffers_per_lane, |_| {
            PacketSlotBuffer::allocate(cfg.slots_per_buffer, cfg.slot_size)
        });
        info!(
            lanes,
            buffers = lanes * cfg.buffers_per_lane,
            slots = cfg.slots_per_buffer,
            slot_size = cfg.slot_size,
            "buffer pool allocated"
        );

        let mut handlers = Vec::with_capacity(lanes);
        let mut workers = Vec::with_capacity(lanes);
        for (lane, ends) in drainers.into_iter().enumerate() {
            let store = if cfg.store_percent > 0.0 {
                Some(open_store(lane).map_err(|source| StartError::Store { lane, source })?)
            } else {
                None
            };
            let reply = match cfg.reply_address {
                Some(addr) if cfg.reply_percent > 0.0 => Some(ReplyPath {
                    transport: open_reply(lane).map_err(|source| StartError::Transport { lane, source })?,
                    buffer: reply_buffer(cfg.slots_per_buffer, cfg.slot_size, &addr),
                }),
                _ => None,
            };

            let metrics = Arc::new(HandlerMetrics::default());
            let used = AcquireRing::new(
                vec![ends.used],
                BackoffPolicy::HANDLER,
                metrics.lanes.clone(),
                stop.clone(),
            );
            let free = ReleaseRing::new(vec![ends.free], metrics.lanes.clone());
            let handler: Handler = Handler::new(
                lane,
                used,
                free,
                settings,
                store,
                reply,
                rand::random::<u64>(),
                metrics.clone(),
            );
            handlers.push(metrics);
            workers.push(handler);
        }

        let receiver_metrics = Arc::new(ReceiverMetrics::default());
        let free = AcquireRing::new(
            filler.free,
            BackoffPolicy::RECEIVER,
            receiver_metrics.lanes.clone(),
            stop.clone(),
        );
        let used = ReleaseRing::new(filler.used, receiver_metrics.lanes.clone());
        let receiver = Receiver::new(transport, free, used, cfg.max_batch, receiver_metrics.clone())
            .with_dump(cfg.dump);

        let mut pipeline = Self {
            stop: stop.clone(),
            receiver: receiver_metrics,
            handlers,
            threads: Vec::with_capacity(lanes + 1),
        };

        // Handlers first so nothing published by the receiver waits on a
        // thread that has not started yet.
        for (lane, handler) in workers.into_iter().enumerate() {
            match spawn_worker(handler, cfg.handler_cpu(lane), affinity.clone(), stop.clone()) {
                Ok(t) => pipeline.threads.push(t),
                Err(e) => {
                    pipeline.shutdown();
                    return Err(e.into());
                }
            }
        }
        match spawn_worker(receiver, cfg.receiver_cpu, affinity, stop) {
            Ok(t) => pipeline.threads.push(t),
            Err(e) => {
                pipeline.shutdown();
                return Err(e.into());
            }
        }
        Ok(pipeline)
    }

    pub fn stop_flag(&self) -> &Arc<AtomicBool> {
        &self.stop
    }

    pub fn receiver_metrics(&self) -> &Arc<ReceiverMetrics> {
        &self.receiver
    }

    pub fn handler_metrics(&self) -> &[Arc<HandlerMetrics>] {
        &self.handlers
    }

    /// Reads and resets the receiver counters.
    pub fn take_receiver(&self) -> ReceiverSnapshot {
        self.receiver.take()
    }

    /// Reads and resets every handler's counters, summed.
    pub fn take_handlers(&self) -> HandlerSnapshot {
        let mut total = HandlerSnapshot::default();
        for h in &self.handlers {
            total += h.take();
        }
        total
    }

    /// Raises stop and waits for every worker.
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.join();
    }

    /// Waits for every worker without raising stop.
    pub fn join(&mut self) {
        for t in self.threads.drain(..) {
            if t.join().is_err() {
                warn!("worker thread exited by panic");
            }
        }
    }
}

impl Drop for ReceivePipeline {
    fn drop(&mut self) {
        if !self.threads.is_empty() {
            self.shutdown();
        }
    }
}
