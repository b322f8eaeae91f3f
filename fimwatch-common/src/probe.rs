//! The six detection handlers.
//!
//! Every handler runs the same pipeline: resolve identity, look the inode
//! up, check the device where required, then build and submit one event.
//! Any step may reject; a rejection is final and leaves no trace. Handlers
//! are generic over their environment so the same code runs inside the
//! kprobes and against a simulated kernel in tests.

use crate::event::{EventKind, MutationEvent, RawEvent};
use crate::identity::{is_dir, is_special, FsIdentity, RenameArgs, Resolver};
use crate::layout::ProbeConfig;
use crate::memory::{Fault, KernelMemory};
use crate::rules::{RulePropagation, TableFull, WatchRules};
use crate::{NAME_LEN, TASK_COMM_LEN};

//include/uapi/asm-generic/fcntl.h
pub const O_CREAT: u32 = 0o100;

/// Why a handler produced no event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    /// A guarded read failed somewhere in the chain.
    MalformedReference,
    RuleMiss,
    DeviceMismatch,
    /// Socket, device node or FIFO.
    SpecialFile,
    NotDirectory,
    NoCreateIntent,
    ChannelFull,
}

impl From<Fault> for Rejection {
    fn from(_: Fault) -> Self {
        Rejection::MalformedReference
    }
}

impl From<ChannelFull> for Rejection {
    fn from(_: ChannelFull) -> Self {
        Rejection::ChannelFull
    }
}

/// The output queue of the current core had no free slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelFull;

pub trait EventSink {
    /// Enqueue without blocking.
    fn submit(&self, event: &RawEvent) -> Result<(), ChannelFull>;
}

/// The task that triggered the probe.
pub trait TaskContext {
    fn pid(&self) -> u32;
    fn uid(&self) -> u32;
    fn command(&self) -> Result<[u8; TASK_COMM_LEN], Fault>;
}

/// What happened to the rule for a newly created directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Propagated {
    Watched(FsIdentity),
    /// The table is full; the directory stays unwatched.
    TableFull(FsIdentity),
}

pub struct Detector<'a, M, T, R, S> {
    resolver: Resolver<'a, M>,
    task: &'a T,
    rules: &'a R,
    sink: &'a S,
    strict_device: bool,
}

#[inline(always)]
fn verify_device(expected: u64, actual: u64) -> Result<(), Rejection> {
    match expected == actual {
        true => Ok(()),
        false => Err(Rejection::DeviceMismatch),
    }
}

impl<'a, M, T, R, S> Detector<'a, M, T, R, S>
where
    M: KernelMemory,
    T: TaskContext,
    R: WatchRules,
    S: EventSink,
{
    pub fn new(
        mem: &'a M,
        config: &'a ProbeConfig,
        task: &'a T,
        rules: &'a R,
        sink: &'a S,
    ) -> Self {
        Self {
            resolver: Resolver::new(mem, &config.layout),
            task,
            rules,
            sink,
            strict_device: config.strict_device(),
        }
    }

    pub fn resolver(&self) -> &Resolver<'a, M> {
        &self.resolver
    }

    #[inline(always)]
    fn watched(&self, inode: u64) -> Result<u64, Rejection> {
        self.rules.lookup(inode).ok_or(Rejection::RuleMiss)
    }

    #[inline(always)]
    fn emit(
        &self,
        kind: EventKind,
        subject: FsIdentity,
        dest: Option<FsIdentity>,
        replaced: bool,
        object_name: Option<[u8; NAME_LEN]>,
    ) -> Result<(), Rejection> {
        let event = MutationEvent {
            kind,
            pid: self.task.pid(),
            uid: self.task.uid(),
            subject,
            dest,
            replaced,
            process_name: self.task.command()?,
            object_name,
        };
        self.sink.submit(&event.encode())?;
        Ok(())
    }

    /// `vfs_write(struct file *file, ...)`
    pub fn on_write(&self, file: u64) -> Result<(), Rejection> {
        let r = &self.resolver;
        let inode = r.file_inode(file)?;
        if is_special(r.inode_mode(inode)?) {
            return Err(Rejection::SpecialFile);
        }
        let ino = r.inode_number(inode)?;
        let expected = self.watched(ino)?;
        let device = r.inode_device(inode)?;
        verify_device(expected, device)?;
        self.emit(EventKind::Write, FsIdentity::new(ino, device), None, false, None)
    }

    /// `vfs_rename`. The destination is watched through either the file
    /// being replaced or the directory receiving the entry; the file's
    /// rule wins when both exist.
    pub fn on_rename(&self, args: RenameArgs) -> Result<(), Rejection> {
        let r = &self.resolver;
        let dir_ino = r.inode_number(args.new_dir)?;
        let target_ino = match r.dentry_inode_opt(args.new_dentry)? {
            Some(inode) => Some(r.inode_number(inode)?),
            None => None,
        };
        let expected = target_ino
            .and_then(|ino| self.rules.lookup(ino))
            .or_else(|| self.rules.lookup(dir_ino))
            .ok_or(Rejection::RuleMiss)?;
        let device = r.inode_device(args.new_dir)?;
        verify_device(expected, device)?;

        let source = r.inode_identity(r.dentry_inode(args.old_dentry)?)?;
        let name = r.dentry_name(args.new_dentry)?;
        let dest = FsIdentity::new(target_ino.unwrap_or(dir_ino), device);
        self.emit(EventKind::Rename, source, Some(dest), target_ino.is_some(), Some(name))
    }

    /// `vfs_unlink(..., struct dentry *dentry, ...)`
    pub fn on_unlink(&self, dentry: u64) -> Result<(), Rejection> {
        self.on_removal(EventKind::Unlink, dentry)
    }

    /// `vfs_rmdir(..., struct dentry *dentry)`
    pub fn on_rmdir(&self, dentry: u64) -> Result<(), Rejection> {
        self.on_removal(EventKind::Rmdir, dentry)
    }

    #[inline(always)]
    fn on_removal(&self, kind: EventKind, dentry: u64) -> Result<(), Rejection> {
        let r = &self.resolver;
        let inode = r.dentry_inode(dentry)?;
        let ino = r.inode_number(inode)?;
        let expected = self.watched(ino)?;
        let device = r.inode_device(inode)?;
        if self.strict_device {
            verify_device(expected, device)?;
        }
        self.emit(kind, FsIdentity::new(ino, device), None, false, None)
    }

    /// `done_path_create(struct path *path, struct dentry *dentry)`.
    ///
    /// A directory appearing under a watched parent is watched from now on.
    /// Only this handler receives write access to the rule table.
    pub fn on_mkdir<P: RulePropagation>(
        &self,
        propagation: &P,
        path: u64,
        child: u64,
    ) -> Result<Propagated, Rejection> {
        let r = &self.resolver;
        let parent_inode = r.dentry_inode(r.path_dentry(path)?)?;
        let parent_ino = r.inode_number(parent_inode)?;
        let expected = self.watched(parent_ino)?;
        let parent_device = r.inode_device(parent_inode)?;
        if self.strict_device {
            verify_device(expected, parent_device)?;
        }

        let child_inode = r.dentry_inode(child)?;
        if !is_dir(r.inode_mode(child_inode)?) {
            return Err(Rejection::NotDirectory);
        }
        let created = r.inode_identity(child_inode)?;
        let name = r.dentry_name(child)?;

        let outcome = match propagation.propagate(created.inode, created.device) {
            Ok(()) => Propagated::Watched(created),
            Err(TableFull) => Propagated::TableFull(created),
        };
        self.emit(
            EventKind::Mkdir,
            FsIdentity::new(parent_ino, parent_device),
            Some(created),
            false,
            Some(name),
        )?;
        Ok(outcome)
    }

    /// `do_dentry_open(struct file *f, ...)` with `O_CREAT` in `f_flags`.
    pub fn on_open(&self, file: u64) -> Result<(), Rejection> {
        let r = &self.resolver;
        if r.file_flags(file)? & O_CREAT == 0 {
            return Err(Rejection::NoCreateIntent);
        }
        let dentry = r.file_dentry(file)?;
        let parent_inode = r.dentry_inode(r.dentry_parent(dentry)?)?;
        let parent_ino = r.inode_number(parent_inode)?;
        let expected = self.watched(parent_ino)?;

        let created = r.inode_identity(r.dentry_inode(dentry)?)?;
        verify_device(expected, created.device)?;
        let parent_device = r.inode_device(parent_inode)?;
        let name = r.dentry_name(dentry)?;
        self.emit(
            EventKind::Create,
            FsIdentity::new(parent_ino, parent_device),
            Some(created),
            false,
            Some(name),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{per_core, CoreReceiver, CoreSender, DropCounts};
    use std::cell::RefCell;
    use std::sync::Arc;
    use crate::layout::FLAG_STRICT_DEVICE;
    use crate::testing::{FakeKernel, MemRules, TestTask};

    const DEV5: (u32, u32) = (0, 5);
    const DEV9: (u32, u32) = (0, 9);

    type TestDetector<'a> = Detector<'a, FakeKernel, TestTask, MemRules, CoreSender>;

    struct World {
        k: FakeKernel,
        rules: MemRules,
        out: Vec<CoreSender>,
        rx: RefCell<CoreReceiver>,
        drops: Arc<DropCounts>,
        task: TestTask,
        config: ProbeConfig,
    }

    impl World {
        fn new() -> Self {
            let k = FakeKernel::new();
            let config = ProbeConfig::new(k.layout, 0);
            let (out, rx, drops) = per_core(2, 64);
            Self {
                k,
                rules: MemRules::new(64),
                out,
                rx: RefCell::new(rx),
                drops,
                task: TestTask::new(321, 1000, "vim"),
                config,
            }
        }

        fn strict(mut self) -> Self {
            self.config.flags |= FLAG_STRICT_DEVICE;
            self
        }

        /// Replace the output with a single core of `depth` slots.
        fn single_core(&mut self, depth: usize) {
            let (out, rx, drops) = per_core(1, depth);
            self.out = out;
            self.rx = RefCell::new(rx);
            self.drops = drops;
        }

        fn watch(&self, inode: u64, device: u64) {
            self.rules.install(inode, device);
        }

        fn run<F>(&self, f: F) -> Result<(), Rejection>
        where
            F: FnOnce(&TestDetector<'_>) -> Result<(), Rejection>,
        {
            let sink = &self.out[0];
            let detector = Detector::new(&self.k, &self.config, &self.task, &self.rules, sink);
            f(&detector)
        }

        fn events(&self) -> Vec<MutationEvent> {
            let mut raw = Vec::new();
            self.rx.borrow_mut().drain(&mut raw);
            raw.iter()
                .map(|(_, e)| MutationEvent::decode(e).unwrap())
                .collect()
        }

        /// A regular file `ino` on `dev`, opened for writing.
        fn open_file(&mut self, ino: u64, dev: (u32, u32)) -> u64 {
            let sb = self.k.super_block(dev.0, dev.1);
            let inode = self.k.inode(ino, 0o100644, sb);
            let dentry = self.k.dentry(inode, 0, "file");
            self.k.file(dentry, inode, 0o1)
        }
    }

    #[test]
    fn write_to_watched_file_on_its_device() {
        let mut w = World::new();
        w.watch(77, 5);
        let file = w.open_file(77, DEV5);
        assert_eq!(w.run(|d| d.on_write(file)), Ok(()));

        let events = w.events();
        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.kind, EventKind::Write);
        assert_eq!(e.subject, FsIdentity::new(77, 5));
        assert_eq!((e.pid, e.uid), (321, 1000));
        assert_eq!(e.process_name(), b"vim");
        assert_eq!(e.dest, None);
    }

    #[test]
    fn write_to_same_inode_on_other_device_is_ignored() {
        let mut w = World::new();
        w.watch(77, 5);
        let file = w.open_file(77, DEV9);
        assert_eq!(w.run(|d| d.on_write(file)), Err(Rejection::DeviceMismatch));
        assert!(w.events().is_empty());
    }

    #[test]
    fn unwatched_objects_produce_nothing() {
        let mut w = World::new();
        let sb = w.k.super_block(0, 5);
        let dir = w.k.inode(10, 0o040755, sb);
        let dir_dentry = w.k.dentry(dir, 0, "etc");
        let file_inode = w.k.inode(11, 0o100644, sb);
        let file_dentry = w.k.dentry(file_inode, dir_dentry, "hosts");
        let file = w.k.file(file_dentry, file_inode, O_CREAT);
        let sub = w.k.inode(12, 0o040755, sb);
        let sub_dentry = w.k.dentry(sub, dir_dentry, "sub");
        let path = w.k.path(dir_dentry);
        let moved = w.k.dentry(0, dir_dentry, "hosts.new");

        let miss = Err(Rejection::RuleMiss);
        assert_eq!(w.run(|d| d.on_write(file)), miss);
        assert_eq!(w.run(|d| d.on_unlink(file_dentry)), miss);
        assert_eq!(w.run(|d| d.on_rmdir(sub_dentry)), miss);
        assert_eq!(w.run(|d| d.on_open(file)), miss);
        assert_eq!(
            w.run(|d| d.on_rename(RenameArgs {
                old_dentry: file_dentry,
                new_dir: dir,
                new_dentry: moved,
            })),
            miss
        );
        assert_eq!(
            w.run(|d| d.on_mkdir(&w.rules, path, sub_dentry).map(|_| ())),
            miss
        );
        assert!(w.events().is_empty());
        assert_eq!(w.rules.len(), 0);
    }

    #[test]
    fn writes_to_special_files_are_ignored() {
        let mut w = World::new();
        let sb = w.k.super_block(0, 5);
        for (ino, mode) in [(20, 0o140777), (21, 0o020620), (22, 0o060660), (23, 0o010600)] {
            w.watch(ino, 5);
            let inode = w.k.inode(ino, mode, sb);
            let file = w.k.file(0, inode, 0);
            assert_eq!(w.run(|d| d.on_write(file)), Err(Rejection::SpecialFile));
        }
        let zero = w.k.inode(0, 0o100644, sb);
        let file = w.k.file(0, zero, 0);
        assert_eq!(w.run(|d| d.on_write(file)), Err(Rejection::MalformedReference));
        assert!(w.events().is_empty());
    }

    #[test]
    fn broken_chain_is_abandoned() {
        let mut w = World::new();
        w.watch(77, 5);
        let sb = w.k.super_block(0, 5);
        let inode = w.k.inode(77, 0o100644, sb);
        let file = w.k.file(0, inode, 0);
        w.k.unmap(sb, 64);
        assert_eq!(w.run(|d| d.on_write(file)), Err(Rejection::MalformedReference));
        assert_eq!(w.run(|d| d.on_write(0)), Err(Rejection::MalformedReference));
        assert!(w.events().is_empty());
    }

    #[test]
    fn missing_command_name_suppresses_the_event() {
        let mut w = World::new();
        w.watch(77, 5);
        let file = w.open_file(77, DEV5);
        w.task.fail_command();
        assert_eq!(w.run(|d| d.on_write(file)), Err(Rejection::MalformedReference));
        assert!(w.events().is_empty());
    }

    struct RenameFixture {
        w: World,
        source: u64,
        new_dir: u64,
        fresh: u64,
        existing: u64,
    }

    fn rename_fixture(dir_dev: (u32, u32)) -> RenameFixture {
        let mut w = World::new();
        let home = w.k.super_block(0, 5);
        let sb = w.k.super_block(dir_dev.0, dir_dev.1);
        let src_inode = w.k.inode(300, 0o100600, home);
        let source = w.k.dentry(src_inode, 0, "shadow.tmp");
        let new_dir = w.k.inode(100, 0o040755, sb);
        let dir_dentry = w.k.dentry(new_dir, 0, "etc");
        let fresh = w.k.dentry(0, dir_dentry, "shadow.bak");
        let old = w.k.inode(200, 0o100640, sb);
        let existing = w.k.dentry(old, dir_dentry, "shadow");
        RenameFixture {
            w,
            source,
            new_dir,
            fresh,
            existing,
        }
    }

    #[test]
    fn rename_into_watched_directory() {
        let f = rename_fixture(DEV5);
        f.w.watch(100, 5);
        let args = RenameArgs {
            old_dentry: f.source,
            new_dir: f.new_dir,
            new_dentry: f.fresh,
        };
        assert_eq!(f.w.run(|d| d.on_rename(args)), Ok(()));

        let events = f.w.events();
        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.kind, EventKind::Rename);
        assert_eq!(e.subject, FsIdentity::new(300, 5));
        assert_eq!(e.dest, Some(FsIdentity::new(100, 5)));
        assert!(!e.replaced);
        assert_eq!(e.object_name(), Some(&b"shadow.bak"[..]));
    }

    #[test]
    fn rename_over_watched_file_in_unwatched_directory() {
        let f = rename_fixture(DEV5);
        f.w.watch(200, 5);
        let args = RenameArgs {
            old_dentry: f.source,
            new_dir: f.new_dir,
            new_dentry: f.existing,
        };
        assert_eq!(f.w.run(|d| d.on_rename(args)), Ok(()));
        let events = f.w.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].dest, Some(FsIdentity::new(200, 5)));
        assert!(events[0].replaced);
        assert_eq!(events[0].object_name(), Some(&b"shadow"[..]));
    }

    #[test]
    fn rename_over_unwatched_file_in_watched_directory() {
        let f = rename_fixture(DEV5);
        f.w.watch(100, 5);
        let args = RenameArgs {
            old_dentry: f.source,
            new_dir: f.new_dir,
            new_dentry: f.existing,
        };
        assert_eq!(f.w.run(|d| d.on_rename(args)), Ok(()));
        assert_eq!(f.w.events()[0].dest, Some(FsIdentity::new(200, 5)));
    }

    #[test]
    fn rename_onto_other_device_is_ignored() {
        let f = rename_fixture(DEV9);
        f.w.watch(100, 5);
        let args = RenameArgs {
            old_dentry: f.source,
            new_dir: f.new_dir,
            new_dentry: f.fresh,
        };
        assert_eq!(f.w.run(|d| d.on_rename(args)), Err(Rejection::DeviceMismatch));
        assert!(f.w.events().is_empty());
    }

    #[test]
    fn rename_data_is_unpacked_through_the_layout() {
        let mut f = rename_fixture(DEV5);
        f.w.watch(100, 5);
        let rd = f.w.k.rename_data(f.source, f.new_dir, f.fresh);
        let args = f.w.run(|d| {
            let args = d.resolver().rename_data(rd)?;
            d.on_rename(args)
        });
        assert_eq!(args, Ok(()));
        assert_eq!(f.w.events().len(), 1);
    }

    fn removal_world(dev: (u32, u32)) -> (World, u64, u64) {
        let mut w = World::new();
        let sb = w.k.super_block(dev.0, dev.1);
        let file = w.k.inode(400, 0o100644, sb);
        let file_dentry = w.k.dentry(file, 0, "sudoers");
        let dir = w.k.inode(401, 0o040755, sb);
        let dir_dentry = w.k.dentry(dir, 0, "sudoers.d");
        w.watch(400, 5);
        w.watch(401, 5);
        (w, file_dentry, dir_dentry)
    }

    #[test]
    fn unlink_and_rmdir_of_watched_objects() {
        let (w, file, dir) = removal_world(DEV5);
        assert_eq!(w.run(|d| d.on_unlink(file)), Ok(()));
        assert_eq!(w.run(|d| d.on_rmdir(dir)), Ok(()));
        let events = w.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::Unlink);
        assert_eq!(events[0].subject, FsIdentity::new(400, 5));
        assert_eq!(events[1].kind, EventKind::Rmdir);
        assert_eq!(events[1].subject, FsIdentity::new(401, 5));
    }

    #[test]
    fn removals_skip_device_check_by_default() {
        let (w, file, dir) = removal_world(DEV9);
        assert_eq!(w.run(|d| d.on_unlink(file)), Ok(()));
        assert_eq!(w.run(|d| d.on_rmdir(dir)), Ok(()));
        let events = w.events();
        assert_eq!(events.len(), 2);
        // the reported device is the real one, not the stored one
        assert_eq!(events[0].subject.device, 9);
    }

    #[test]
    fn strict_mode_checks_removals_too() {
        let (w, file, dir) = removal_world(DEV9);
        let w = w.strict();
        assert_eq!(w.run(|d| d.on_unlink(file)), Err(Rejection::DeviceMismatch));
        assert_eq!(w.run(|d| d.on_rmdir(dir)), Err(Rejection::DeviceMismatch));
        assert!(w.events().is_empty());
    }

    fn mkdir_world() -> (World, u64, u64) {
        let mut w = World::new();
        let sb = w.k.super_block(0, 5);
        let parent = w.k.inode(500, 0o040755, sb);
        let parent_dentry = w.k.dentry(parent, 0, "cron.d");
        let child = w.k.inode(501, 0o040700, sb);
        let child_dentry = w.k.dentry(child, parent_dentry, "hourly");
        let path = w.k.path(parent_dentry);
        (w, path, child_dentry)
    }

    #[test]
    fn mkdir_under_watched_parent_propagates() {
        let (w, path, child) = mkdir_world();
        w.watch(500, 5);
        let mut outcome = None;
        let ran = w.run(|d| {
            outcome = Some(d.on_mkdir(&w.rules, path, child)?);
            Ok(())
        });
        assert_eq!(ran, Ok(()));
        assert_eq!(outcome, Some(Propagated::Watched(FsIdentity::new(501, 5))));

        assert_eq!(w.rules.len(), 2);
        let rule = w.rules.get(501).unwrap();
        assert_eq!(rule.device, 5);
        assert!(rule.is_implicit());
        assert!(!w.rules.get(500).unwrap().is_implicit());

        let events = w.events();
        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.kind, EventKind::Mkdir);
        assert_eq!(e.subject, FsIdentity::new(500, 5));
        assert_eq!(e.dest, Some(FsIdentity::new(501, 5)));
        assert_eq!(e.object_name(), Some(&b"hourly"[..]));
    }

    #[test]
    fn propagated_directory_is_watched_afterwards() {
        let (mut w, path, child) = mkdir_world();
        w.watch(500, 5);
        w.run(|d| d.on_mkdir(&w.rules, path, child).map(|_| ()))
            .unwrap();

        let sb = w.k.super_block(0, 5);
        let grandchild = w.k.inode(502, 0o040755, sb);
        let grandchild_dentry = w.k.dentry(grandchild, child, "deeper");
        let child_path = w.k.path(child);
        w.run(|d| d.on_mkdir(&w.rules, child_path, grandchild_dentry).map(|_| ()))
            .unwrap();
        assert!(w.rules.get(502).is_some());
        assert_eq!(w.events().len(), 2);
    }

    #[test]
    fn full_table_leaves_child_unwatched_but_reports() {
        let (mut w, path, child) = mkdir_world();
        w.rules = MemRules::new(1);
        w.watch(500, 5);
        let mut outcome = None;
        w.run(|d| {
            outcome = Some(d.on_mkdir(&w.rules, path, child)?);
            Ok(())
        })
        .unwrap();
        assert_eq!(outcome, Some(Propagated::TableFull(FsIdentity::new(501, 5))));
        assert!(w.rules.get(501).is_none());
        assert_eq!(w.events().len(), 1);
    }

    #[test]
    fn path_creation_of_non_directories_is_not_mkdir() {
        let mut w = World::new();
        let sb = w.k.super_block(0, 5);
        let parent = w.k.inode(500, 0o040755, sb);
        let parent_dentry = w.k.dentry(parent, 0, "dev");
        let node = w.k.inode(503, 0o010644, sb);
        let node_dentry = w.k.dentry(node, parent_dentry, "fifo");
        let path = w.k.path(parent_dentry);
        w.watch(500, 5);
        assert_eq!(
            w.run(|d| d.on_mkdir(&w.rules, path, node_dentry).map(|_| ())),
            Err(Rejection::NotDirectory)
        );
        assert_eq!(w.rules.len(), 1);
        assert!(w.events().is_empty());
    }

    #[test]
    fn strict_mode_checks_mkdir_parent_device() {
        let (w, path, child) = mkdir_world();
        let w = w.strict();
        w.watch(500, 9);
        assert_eq!(
            w.run(|d| d.on_mkdir(&w.rules, path, child).map(|_| ())),
            Err(Rejection::DeviceMismatch)
        );
        assert_eq!(w.rules.len(), 1);
    }

    fn create_world(flags: u32, dev: (u32, u32)) -> (World, u64) {
        let mut w = World::new();
        let home = w.k.super_block(0, 5);
        let sb = w.k.super_block(dev.0, dev.1);
        let parent = w.k.inode(600, 0o040755, home);
        let parent_dentry = w.k.dentry(parent, 0, "profile.d");
        let new = w.k.inode(601, 0o100644, sb);
        let dentry = w.k.dentry(new, parent_dentry, "evil.sh");
        let file = w.k.file(dentry, new, flags);
        w.watch(600, 5);
        (w, file)
    }

    #[test]
    fn open_with_create_intent_under_watched_parent() {
        let (w, file) = create_world(O_CREAT | 0o1, DEV5);
        assert_eq!(w.run(|d| d.on_open(file)), Ok(()));
        let events = w.events();
        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.kind, EventKind::Create);
        assert_eq!(e.subject, FsIdentity::new(600, 5));
        assert_eq!(e.dest, Some(FsIdentity::new(601, 5)));
        assert_eq!(e.object_name(), Some(&b"evil.sh"[..]));
    }

    #[test]
    fn open_without_create_intent_is_ignored() {
        let (w, file) = create_world(0o2, DEV5);
        assert_eq!(w.run(|d| d.on_open(file)), Err(Rejection::NoCreateIntent));
        assert!(w.events().is_empty());
    }

    #[test]
    fn create_on_other_device_is_ignored() {
        let (w, file) = create_world(O_CREAT, DEV9);
        assert_eq!(w.run(|d| d.on_open(file)), Err(Rejection::DeviceMismatch));
        assert!(w.events().is_empty());
    }

    #[test]
    fn full_channel_drops_without_side_effects() {
        let mut w = World::new();
        w.single_core(2);
        w.watch(77, 5);
        let file = w.open_file(77, DEV5);
        let results: Vec<_> = (0..5).map(|_| w.run(|d| d.on_write(file))).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 2);
        assert!(results[2..].iter().all(|r| *r == Err(Rejection::ChannelFull)));
        assert_eq!(w.out[0].occupancy(), 2);
        assert_eq!(w.drops.total(), 3);
    }

    #[test]
    fn full_channel_still_propagates_directories() {
        let (mut w, path, child) = mkdir_world();
        w.single_core(1);
        w.out[0].try_push(RawEvent::default()).unwrap();
        w.watch(500, 5);
        assert_eq!(
            w.run(|d| d.on_mkdir(&w.rules, path, child).map(|_| ())),
            Err(Rejection::ChannelFull)
        );
        assert!(w.rules.get(501).is_some());
    }
}
