//! Bounded, lossy per-core queues between the perf readers and the drain.
//!
//! Each core gets its own `tokio::sync::mpsc` channel. Producers only ever
//! `try_send`, so a full queue drops the event instead of waiting; the
//! single consumer polls every core.

use std::future::poll_fn;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};

use crate::event::RawEvent;
use crate::probe::{ChannelFull, EventSink};

/// Events refused per core because its queue was full.
pub struct DropCounts(Vec<AtomicU64>);

impl DropCounts {
    pub fn get(&self, cpu: u32) -> u64 {
        self.0
            .get(cpu as usize)
            .map_or(0, |counter| counter.load(Ordering::Relaxed))
    }

    pub fn total(&self) -> u64 {
        self.0.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }
}

/// Producer half for one core.
#[derive(Clone)]
pub struct CoreSender {
    cpu: u32,
    tx: mpsc::Sender<RawEvent>,
    drops: Arc<DropCounts>,
}

impl CoreSender {
    pub fn cpu(&self) -> u32 {
        self.cpu
    }

    /// Enqueue without waiting; a full queue drops `event`.
    pub fn try_push(&self, event: RawEvent) -> Result<(), ChannelFull> {
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                if let Some(counter) = self.drops.0.get(self.cpu as usize) {
                    counter.fetch_add(1, Ordering::Relaxed);
                }
                Err(ChannelFull)
            }
            Err(TrySendError::Closed(_)) => Err(ChannelFull),
        }
    }

    /// Events queued and not yet drained.
    pub fn occupancy(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

impl EventSink for CoreSender {
    fn submit(&self, event: &RawEvent) -> Result<(), ChannelFull> {
        self.try_push(*event)
    }
}

/// Consumer half over every core. Order is FIFO within a core and
/// unspecified across cores.
pub struct CoreReceiver {
    queues: Vec<mpsc::Receiver<RawEvent>>,
    next: usize,
}

impl CoreReceiver {
    fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<(u32, RawEvent)>> {
        let cores = self.queues.len();
        let mut closed = 0;
        for i in 0..cores {
            let cpu = (self.next + i) % cores;
            match self.queues[cpu].poll_recv(cx) {
                Poll::Ready(Some(event)) => {
                    self.next = (cpu + 1) % cores;
                    return Poll::Ready(Some((cpu as u32, event)));
                }
                Poll::Ready(None) => closed += 1,
                Poll::Pending => {}
            }
        }
        match closed == cores {
            true => Poll::Ready(None),
            false => Poll::Pending,
        }
    }

    /// Wait for the next event from any core. `None` once every sender
    /// is gone and the queues are empty.
    pub async fn recv(&mut self) -> Option<(u32, RawEvent)> {
        poll_fn(|cx| self.poll_recv(cx)).await
    }

    /// Move everything queued into `out`, tagged with its core.
    pub fn drain(&mut self, out: &mut Vec<(u32, RawEvent)>) -> usize {
        let mut total = 0;
        for (cpu, queue) in self.queues.iter_mut().enumerate() {
            loop {
                match queue.try_recv() {
                    Ok(event) => out.push((cpu as u32, event)),
                    Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
                }
                total += 1;
            }
        }
        total
    }
}

/// One bounded queue of `depth` slots per core.
pub fn per_core(cores: usize, depth: usize) -> (Vec<CoreSender>, CoreReceiver, Arc<DropCounts>) {
    let drops = Arc::new(DropCounts((0..cores).map(|_| AtomicU64::new(0)).collect()));
    let (senders, queues) = (0..cores)
        .map(|cpu| {
            let (tx, rx) = mpsc::channel(depth.max(1));
            let sender = CoreSender {
                cpu: cpu as u32,
                tx,
                drops: drops.clone(),
            };
            (sender, rx)
        })
        .unzip();
    (senders, CoreReceiver { queues, next: 0 }, drops)
}
