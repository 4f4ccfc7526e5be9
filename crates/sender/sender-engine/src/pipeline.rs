use crate::distribution::{DistributionError, DistributionTable};
use crate::metrics::{SenderMetrics, SenderSnapshot};
use crate::sender::{Sender, SenderSettings};
use quarry_core::{AffinitySetter, spawn_worker};
use quarry_net::{Transport, TransportError};
use quarry_wire::PacketSlotBuffer;
use sender_config::SenderConfig;
use std::io;
use std::net::Ipv6Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum StartError {
    #[error("no destination address configured")]
    NoDestination,
    #[error(transparent)]
    Distribution(#[from] DistributionError),
    #[error("failed to open transport for sender {id}")]
    Transport {
        id: usize,
        #[source]
        source: TransportError,
    },
    #[error("failed to spawn sender thread")]
    Spawn(#[from] io::Error),
}

/// Share of `total` for part `i` of `parts`. Every part but the last gets
/// `total / parts`; the last takes the remainder. -1 (unbounded) is passed
/// through unchanged.
pub fn split_budget(total: i64, parts: usize, i: usize) -> i64 {
    if total < 0 {
        return total;
    }
    let parts = parts as i64;
    let share = total / parts;
    if (i as i64) < parts - 1 {
        share
    } else {
        total - (parts - 1) * share
    }
}

/// Packets per second for sender `i` of `parts`, split like
/// [`split_budget`] so the shares add up to `pps`. Every sender is paced at
/// 1 pps or more. Values <= 0 (no pacing) pass through unchanged.
pub fn split_rate(pps: i64, parts: usize, i: usize) -> i64 {
    if pps <= 0 {
        return pps;
    }
    split_budget(pps, parts, i).max(1)
}

pub struct SendPipeline {
    stop: Arc<AtomicBool>,
    senders: Vec<Arc<SenderMetrics>>,
    threads: Vec<JoinHandle<()>>,
}

impl SendPipeline {
    /// Opens one transport per sender and starts them. The config is
    /// expected to have passed [`SenderConfig::validate`].
    pub fn start<F>(cfg: &SenderConfig, mut open: F, affinity: Arc<dyn AffinitySetter>) -> Result<Self, StartError>
    where
        F: FnMut(usize) -> Result<Box<dyn Transport>, TransportError>,
    {
        let destination: Ipv6Addr = cfg.destination.ok_or(StartError::NoDestination)?;
        let table = DistributionTable::new(cfg.distribution_weights())?;
        let shape = cfg.uni_shape();

        let mut workers = Vec::with_capacity(cfg.threads);
        let mut senders = Vec::with_capacity(cfg.threads);
        for id in 0..cfg.threads {
            let pps = split_rate(cfg.pps, cfg.threads, id);
            let settings = SenderSettings {
                destination,
                table,
                shape,
                batch: cfg.batch,
                packets: split_budget(cfg.packets, cfg.threads, id),
                pps,
            };
            let transport = open(id).map_err(|source| StartError::Transport { id, source })?;
            let metrics = Arc::new(SenderMetrics::default());
            let buffer = PacketSlotBuffer::allocate(cfg.slots_per_buffer, cfg.slot_size);
            info!(sender = id, packets = settings.packets, pps, "sender configured");
            workers.push(Sender::new(id, transport, buffer, settings, rand::random::<u64>(), metrics.clone()));
            senders.push(metrics);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let mut pipeline = Self {
            stop: stop.clone(),
            senders,
            threads: Vec::with_capacity(cfg.threads),
        };
        for (id, worker) in workers.into_iter().enumerate() {
            match spawn_worker(worker, cfg.sender_cpu(id), affinity.clone(), stop.clone()) {
                Ok(t) => pipeline.threads.push(t),
                Err(e) => {
                    pipeline.shutdown();
                    return Err(e.into());
                }
            }
        }
        Ok(pipeline)
    }

    pub fn stop_flag(&self) -> &Arc<AtomicBool> {
        &self.stop
    }

    pub fn metrics(&self) -> &[Arc<SenderMetrics>] {
        &self.senders
    }

    /// Reads and resets every sender's counters, in sender order.
    pub fn take(&self) -> Vec<SenderSnapshot> {
        self.senders.iter().map(|m| m.take()).collect()
    }

    /// Per-sender liveness, in sender order.
    pub fn running(&self) -> Vec<bool> {
        self.threads.iter().map(|t| !t.is_finished()).collect()
    }

    pub fn is_finished(&self) -> bool {
        self.threads.iter().all(JoinHandle::is_finished)
    }

    /// Waits for every sender to exhaust its budget.
    pub fn join(&mut self) {
        for t in self.threads.drain(..) {
            if t.join().is_err() {
                warn!("sender thread exited by panic");
            }
        }
    }

    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.join();
    }
}

impl Drop for SendPipeline {
    fn drop(&mut self) {
        if !self.threads.is_empty() {
            self.shutdown();
        }
    }
}
