/// Value stored under an inode key in the `RULES` map.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WatchRule {
    /// Expected device, in the `st_dev` encoding.
    pub device: u64,
    /// Non-zero when the probes inserted the rule for a new directory.
    pub implicit: u32,
    pub _pad: u32,
}

impl WatchRule {
    pub const fn external(device: u64) -> Self {
        Self {
            device,
            implicit: 0,
            _pad: 0,
        }
    }

    pub const fn implicit(device: u64) -> Self {
        Self {
            device,
            implicit: 1,
            _pad: 0,
        }
    }

    pub const fn is_implicit(&self) -> bool {
        self.implicit != 0
    }
}

/// Read side of the watch set. Every handler holds one.
pub trait WatchRules {
    /// Expected device for `inode`, if it is watched.
    fn lookup(&self, inode: u64) -> Option<u64>;
}

/// The rule table had no room left.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TableFull;

/// Write side of the watch set, handed only to the mkdir handler.
pub trait RulePropagation {
    /// Watch a directory created under a watched parent.
    /// Racing inserts on the same inode resolve last-write-wins.
    fn propagate(&self, inode: u64, device: u64) -> Result<(), TableFull>;
}
