//! Simulated kernel objects for exercising the handlers off-kernel.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

use crate::layout::KernelLayout;
use crate::memory::{Fault, KernelMemory};
use crate::probe::TaskContext;
use crate::rules::{RulePropagation, TableFull, WatchRule, WatchRules};
use crate::TASK_COMM_LEN;

/// Sparse byte-addressed memory. Reads of unmapped bytes fault.
pub struct FakeKernel {
    bytes: BTreeMap<u64, u8>,
    next: u64,
    pub layout: KernelLayout,
}

impl Default for FakeKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeKernel {
    pub fn new() -> Self {
        Self {
            bytes: BTreeMap::new(),
            next: 0xffff_8880_0010_0000,
            layout: KernelLayout::default(),
        }
    }

    fn alloc(&mut self, size: usize) -> u64 {
        let addr = self.next;
        // leave an unmapped gap after every object
        self.next += ((size as u64 + 0xff) & !0xff) + 0x100;
        for i in 0..size as u64 {
            self.bytes.insert(addr + i, 0);
        }
        addr
    }

    fn put(&mut self, addr: u64, data: &[u8]) {
        for (i, b) in data.iter().enumerate() {
            self.bytes.insert(addr + i as u64, *b);
        }
    }

    fn put_ptr(&mut self, obj: u64, offset: u32, value: u64) {
        self.put(obj + offset as u64, &value.to_ne_bytes());
    }

    pub fn unmap(&mut self, addr: u64, len: usize) {
        for i in 0..len as u64 {
            self.bytes.remove(&(addr + i));
        }
    }

    pub fn super_block(&mut self, major: u32, minor: u32) -> u64 {
        let sb = self.alloc(64);
        let s_dev = (major << 20) | minor;
        self.put(sb + self.layout.super_block_s_dev as u64, &s_dev.to_ne_bytes());
        sb
    }

    pub fn inode(&mut self, ino: u64, mode: u16, sb: u64) -> u64 {
        let inode = self.alloc(128);
        self.put(inode + self.layout.inode_i_mode as u64, &mode.to_ne_bytes());
        self.put_ptr(inode, self.layout.inode_i_sb, sb);
        self.put(inode + self.layout.inode_i_ino as u64, &ino.to_ne_bytes());
        inode
    }

    /// A dentry named `name`; `inode == 0` makes it negative.
    pub fn dentry(&mut self, inode: u64, parent: u64, name: &str) -> u64 {
        let text = self.alloc(name.len() + 1);
        self.put(text, name.as_bytes());
        let dentry = self.alloc(64);
        self.put_ptr(dentry, self.layout.dentry_d_parent, parent);
        self.put_ptr(dentry, self.layout.dentry_d_name, text);
        self.put_ptr(dentry, self.layout.dentry_d_inode, inode);
        dentry
    }

    pub fn file(&mut self, dentry: u64, inode: u64, flags: u32) -> u64 {
        let file = self.alloc(128);
        self.put_ptr(file, self.layout.file_f_path_dentry, dentry);
        self.put_ptr(file, self.layout.file_f_inode, inode);
        self.put(file + self.layout.file_f_flags as u64, &flags.to_ne_bytes());
        file
    }

    pub fn path(&mut self, dentry: u64) -> u64 {
        let path = self.alloc(16);
        self.put_ptr(path, self.layout.path_dentry, dentry);
        path
    }

    pub fn rename_data(&mut self, old_dentry: u64, new_dir: u64, new_dentry: u64) -> u64 {
        let rd = self.alloc(64);
        self.put_ptr(rd, self.layout.renamedata_old_dentry, old_dentry);
        self.put_ptr(rd, self.layout.renamedata_new_dir, new_dir);
        self.put_ptr(rd, self.layout.renamedata_new_dentry, new_dentry);
        rd
    }

    fn read<const N: usize>(&self, addr: u64) -> Result<[u8; N], Fault> {
        let mut out = [0u8; N];
        for (i, b) in out.iter_mut().enumerate() {
            *b = *self.bytes.get(&(addr + i as u64)).ok_or(Fault)?;
        }
        Ok(out)
    }
}

impl KernelMemory for FakeKernel {
    fn read_u64(&self, addr: u64) -> Result<u64, Fault> {
        self.read(addr).map(u64::from_ne_bytes)
    }

    fn read_u32(&self, addr: u64) -> Result<u32, Fault> {
        self.read(addr).map(u32::from_ne_bytes)
    }

    fn read_u16(&self, addr: u64) -> Result<u16, Fault> {
        self.read(addr).map(u16::from_ne_bytes)
    }

    fn read_str(&self, addr: u64, dst: &mut [u8]) -> Result<usize, Fault> {
        if dst.is_empty() {
            return Err(Fault);
        }
        let mut len = 0;
        while len < dst.len() - 1 {
            match *self.bytes.get(&(addr + len as u64)).ok_or(Fault)? {
                0 => break,
                b => dst[len] = b,
            }
            len += 1;
        }
        dst[len] = 0;
        Ok(len)
    }
}

/// Bounded rule table with the same overflow behaviour as the BPF hash map.
pub struct MemRules {
    rules: RefCell<HashMap<u64, WatchRule>>,
    capacity: usize,
}

impl MemRules {
    pub fn new(capacity: usize) -> Self {
        Self {
            rules: RefCell::new(HashMap::new()),
            capacity,
        }
    }

    pub fn install(&self, inode: u64, device: u64) {
        self.rules
            .borrow_mut()
            .insert(inode, WatchRule::external(device));
    }

    pub fn get(&self, inode: u64) -> Option<WatchRule> {
        self.rules.borrow().get(&inode).copied()
    }

    pub fn len(&self) -> usize {
        self.rules.borrow().len()
    }
}

impl WatchRules for MemRules {
    fn lookup(&self, inode: u64) -> Option<u64> {
        self.rules.borrow().get(&inode).map(|rule| rule.device)
    }
}

impl RulePropagation for MemRules {
    fn propagate(&self, inode: u64, device: u64) -> Result<(), TableFull> {
        let mut rules = self.rules.borrow_mut();
        if !rules.contains_key(&inode) && rules.len() >= self.capacity {
            return Err(TableFull);
        }
        rules.insert(inode, WatchRule::implicit(device));
        Ok(())
    }
}

pub struct TestTask {
    pid: u32,
    uid: u32,
    comm: [u8; TASK_COMM_LEN],
    comm_ok: bool,
}

impl TestTask {
    pub fn new(pid: u32, uid: u32, name: &str) -> Self {
        let mut comm = [0u8; TASK_COMM_LEN];
        comm[..name.len()].copy_from_slice(name.as_bytes());
        Self {
            pid,
            uid,
            comm,
            comm_ok: true,
        }
    }

    pub fn fail_command(&mut self) {
        self.comm_ok = false;
    }
}

impl TaskContext for TestTask {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn uid(&self) -> u32 {
        self.uid
    }

    fn command(&self) -> Result<[u8; TASK_COMM_LEN], Fault> {
        match self.comm_ok {
            true => Ok(self.comm),
            false => Err(Fault),
        }
    }
}
