use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use aya::maps::AsyncPerfEventArray;
use aya::Ebpf;
use anyhow::Context;
use bytes::BytesMut;
use log::{debug, error, info, warn};
use prettytable::{color, row, Attr, Cell, Row, Table};
use tokio::sync::oneshot;
use users::get_user_by_uid;

use fimwatch_common::channel::{CoreReceiver, CoreSender, DropCounts};
use fimwatch_common::device::{major, minor};
use fimwatch_common::{EventKind, FsIdentity, MutationEvent, RawEvent};

use crate::registry::PathRegistry;
use crate::setup::RuleTable;

/// Records the kernel dropped because a perf ring was full, per cpu.
pub struct PerfLoss(Vec<AtomicU64>);

impl PerfLoss {
    pub fn new(cores: usize) -> Self {
        Self((0..cores).map(|_| AtomicU64::new(0)).collect())
    }

    fn add(&self, cpu: u32, lost: usize) {
        if let Some(counter) = self.0.get(cpu as usize) {
            counter.fetch_add(lost as u64, Ordering::Relaxed);
        }
    }

    pub fn get(&self, cpu: u32) -> u64 {
        self.0
            .get(cpu as usize)
            .map_or(0, |counter| counter.load(Ordering::Relaxed))
    }
}

/// Spawn one reader per cpu. Readers hand records to their core's queue
/// and never wait on the drain.
pub fn wait_events(
    bpf: &mut Ebpf,
    cpus: &[u32],
    senders: &[CoreSender],
    loss: Arc<PerfLoss>,
) -> Result<(), anyhow::Error> {
    let mut events =
        AsyncPerfEventArray::try_from(bpf.take_map("EVENTS").context("map EVENTS not found")?)?;
    for &cpu in cpus {
        let sender = senders
            .get(cpu as usize)
            .cloned()
            .with_context(|| format!("no queue for cpu {}", cpu))?;
        let mut buf = events.open(cpu, None)?;
        let loss = loss.clone();
        tokio::task::spawn(async move {
            let mut buffers = vec![BytesMut::with_capacity(RawEvent::SIZE); 10];
            loop {
                match buf.read_events(&mut buffers).await {
                    Ok(events) => {
                        debug!(
                            "fetch {} entrys, lost {} entrys on cpu {}!",
                            events.read, events.lost, cpu
                        );
                        loss.add(cpu, events.lost);
                        buffers[0..events.read].iter().for_each(|buf| {
                            match RawEvent::from_bytes(buf) {
                                Ok(raw) => {
                                    // a full queue counts the drop itself
                                    let _ = sender.try_push(raw);
                                }
                                Err(err) => error!("bad record on cpu {}: {}", cpu, err),
                            }
                        });
                    }
                    Err(err) => error!("failed to fetch event: {}", err),
                }
            }
        });
    }
    Ok(())
}

/// Consume every core until `shutdown` fires, then hand the drain back.
pub async fn drain_events<R: RuleTable>(
    mut queues: CoreReceiver,
    mut drain: Drain<R>,
    mut shutdown: oneshot::Receiver<()>,
) -> Drain<R> {
    loop {
        tokio::select! {
            received = queues.recv() => match received {
                Some((cpu, raw)) => {
                    if let Some(report) = drain.handle(cpu, &raw) {
                        print_report(&report);
                    }
                }
                None => break,
            },
            _ = &mut shutdown => break,
        }
    }
    drain
}

pub fn log_losses(drops: &DropCounts, loss: &PerfLoss, cores: usize) {
    for cpu in 0..cores as u32 {
        let dropped = drops.get(cpu);
        let lost = loss.get(cpu);
        if dropped + lost > 0 {
            warn!(
                "cpu {}: {} lost in perf buffer, {} dropped in queue",
                cpu, lost, dropped
            );
        }
    }
    info!("{} event(s) dropped in queues", drops.total());
}

/// One decoded event ready to print.
#[derive(Debug)]
pub struct Report {
    pub cpu: u32,
    pub event: MutationEvent,
    pub command: String,
    pub path: Option<PathBuf>,
}

/// Single consumer of the per-core queues.
///
/// Besides reporting, it extends the kernel rule table: files created in a
/// watched directory and files renamed over a watched name are watched from
/// then on.
pub struct Drain<R> {
    registry: PathRegistry,
    rules: R,
    ignore_processes: Vec<String>,
}

fn read_cmdline(pid: u32) -> Option<String> {
    let raw = fs::read(format!("/proc/{}/cmdline", pid)).ok()?;
    let args: Vec<_> = raw
        .split(|b| *b == 0)
        .filter(|arg| !arg.is_empty())
        .map(String::from_utf8_lossy)
        .collect();
    match args.is_empty() {
        true => None,
        false => Some(args.join(" ")),
    }
}

impl<R: RuleTable> Drain<R> {
    pub fn new(registry: PathRegistry, rules: R, ignore_processes: Vec<String>) -> Self {
        Self {
            registry,
            rules,
            ignore_processes,
        }
    }

    pub fn rules(&self) -> &R {
        &self.rules
    }

    fn ignores(&self, process_name: &[u8]) -> bool {
        self.ignore_processes
            .iter()
            .any(|prefix| process_name.starts_with(prefix.as_bytes()))
    }

    /// Objects that are watched only once this event has been seen.
    /// New directories already got an implicit rule in the kernel.
    fn newly_watched(event: &MutationEvent) -> Option<FsIdentity> {
        match event.kind {
            EventKind::Create => event.dest,
            EventKind::Rename => Some(event.subject),
            _ => None,
        }
    }

    /// Update the registry from `event` and return the path it concerns.
    fn track(&mut self, event: &MutationEvent) -> Option<PathBuf> {
        if let Some(identity) = Self::newly_watched(event) {
            if let Err(err) = self.rules.watch(identity) {
                warn!("failed to watch {}: {:#}", identity, err);
            }
        }
        let name = event.object_name().map(String::from_utf8_lossy);
        match (event.kind, event.dest, name) {
            (EventKind::Mkdir | EventKind::Create, Some(child), Some(name)) => {
                self.registry.record_child(event.subject, child, &name)
            }
            (EventKind::Rename, Some(dest), Some(name)) => {
                self.registry.record_rename(event.subject, dest, &name, event.replaced)
            }
            _ => self.registry.path_of(event.subject).map(PathBuf::from),
        }
    }

    pub fn handle(&mut self, cpu: u32, raw: &RawEvent) -> Option<Report> {
        let event = match MutationEvent::decode(raw) {
            Ok(event) => event,
            Err(err) => {
                error!("failed to decode event on cpu {}: {}", cpu, err);
                return None;
            }
        };
        let path = self.track(&event);
        if self.ignores(event.process_name()) {
            return None;
        }
        let command = read_cmdline(event.pid)
            .unwrap_or_else(|| String::from_utf8_lossy(event.process_name()).into_owned());
        Some(Report {
            cpu,
            event,
            command,
            path,
        })
    }
}

fn action_color(kind: EventKind) -> color::Color {
    match kind {
        EventKind::Write => color::YELLOW,
        EventKind::Unlink | EventKind::Rmdir => color::RED,
        EventKind::Rename | EventKind::Mkdir | EventKind::Create => color::GREEN,
    }
}

fn device_inode(identity: FsIdentity) -> String {
    format!(
        "{}:{}/{}",
        major(identity.device),
        minor(identity.device),
        identity.inode
    )
}

fn print_report(report: &Report) {
    let event = &report.event;
    let mut table = Table::new();
    let user_name = match get_user_by_uid(event.uid) {
        None => format!("{}", event.uid),
        Some(name) => name.name().to_string_lossy().to_string(),
    };
    let object = match event.dest {
        Some(dest) => format!("{} -> {}", device_inode(event.subject), device_inode(dest)),
        None => device_inode(event.subject),
    };
    let path = match (&report.path, event.object_name()) {
        (Some(path), _) => path.display().to_string(),
        (None, Some(name)) => String::from_utf8_lossy(name).into_owned(),
        (None, None) => "Unknown".to_string(),
    };
    table.set_titles(row!["cpu", "action", "user", "process", "dev/inode", "path"]);
    table.add_row(Row::new(vec![
        Cell::new(format!("{}", report.cpu).as_str())
            .with_style(Attr::ForegroundColor(color::BLUE)),
        Cell::new(&event.kind.to_string())
            .with_style(Attr::ForegroundColor(action_color(event.kind))),
        Cell::new(user_name.as_str()).with_style(Attr::ForegroundColor(color::BRIGHT_YELLOW)),
        Cell::new(&format!("{}/{}", event.pid, report.command))
            .with_style(Attr::ForegroundColor(color::BRIGHT_WHITE)),
        Cell::new(&object).with_style(Attr::ForegroundColor(color::BRIGHT_WHITE)),
        Cell::new(&path).with_style(Attr::ForegroundColor(color::BRIGHT_WHITE)),
    ]));
    {
        //prevent overprinting when using multithreading
        let _stdout = io::stdout().lock();
        if let Err(err) = table.print_tty(true) {
            error!("failed to print event: {}", err);
        }
    }
}
