use serde::{Deserialize, Serialize};

/// Registration parameters for a delayed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelaySpec {
    /// Registry name; autogenerated when `None`. Registering an existing
    /// name cancels the previous entry first (last-writer-wins).
    pub name: Option<String>,
    /// Countdown in seconds. `-1.0` means wait forever: the entry never
    /// fires and exists only to be cancelled.
    pub seconds: f64,
    /// `-1` repeats indefinitely, `0` fires once, `n > 0` fires then
    /// repeats `n` more times.
    pub loops: i32,
    /// Gated entries do not count down until [`DelayRegistry::open_gate`].
    pub gated: bool,
    /// Count down with unscaled (real) time instead of game time.
    pub unscaled: bool,
}

impl DelaySpec {
    pub fn once(seconds: f64) -> Self {
        Self {
            name: None,
            seconds,
            loops: 0,
            gated: false,
            unscaled: false,
        }
    }

    pub fn forever() -> Self {
        Self {
            name: None,
            seconds: -1.0,
            loops: 0,
            gated: false,
            unscaled: false,
        }
    }

    pub fn looping(seconds: f64) -> Self {
        Self {
            name: None,
            seconds,
            loops: -1,
            gated: false,
            unscaled: false,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// One live entry. Serialized whole so snapshots preserve remaining time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayRecord<W> {
    pub name: String,
    pub remaining: f64,
    pub period: f64,
    pub loops_left: i32,
    pub paused: bool,
    pub gated: bool,
    pub unscaled: bool,
    pub wake: W,
}

/// 命名延迟调用注册表：可取消、可暂停、按 tick 推进。
///
/// This is the cooperative scheduler underlying all Wait-family nodes and
/// validator polling. A tick-list rather than coroutines: the host drives
/// [`tick`](DelayRegistry::tick) once per frame and fired wake commands are
/// returned for the engine to interpret. Cancel/pause/resume on unknown
/// names are silent no-ops reporting `false`, never errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayRegistry<W> {
    entries: Vec<DelayRecord<W>>,
    /// Registry-wide halt (engine pause), independent of per-entry pauses.
    halted: bool,
    counter: u64,
}

impl<W> Default for DelayRegistry<W> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            halted: false,
            counter: 0,
        }
    }
}

impl<W> DelayRegistry<W> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, spec: DelaySpec, wake: W) -> String {
        let name = spec.name.unwrap_or_else(|| {
            self.counter += 1;
            format!("delay#{}", self.counter)
        });
        self.cancel(&name);
        self.entries.push(DelayRecord {
            name: name.clone(),
            remaining: spec.seconds,
            period: spec.seconds,
            loops_left: spec.loops,
            paused: false,
            gated: spec.gated,
            unscaled: spec.unscaled,
            wake,
        });
        name
    }

    pub fn cancel(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.name != name);
        before != self.entries.len()
    }

    pub fn pause(&mut self, name: &str) -> bool {
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => {
                entry.paused = true;
                true
            }
            None => false,
        }
    }

    pub fn resume(&mut self, name: &str) -> bool {
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => {
                entry.paused = false;
                true
            }
            None => false,
        }
    }

    pub fn open_gate(&mut self, name: &str) -> bool {
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => {
                entry.gated = false;
                true
            }
            None => false,
        }
    }

    /// Halt every entry without touching per-entry pause state.
    pub fn halt(&mut self) {
        self.halted = true;
    }

    pub fn unhalt(&mut self) {
        self.halted = false;
    }

    pub fn cancel_all(&mut self) {
        self.entries.clear();
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    pub fn remaining(&self, name: &str) -> Option<f64> {
        self.entries.iter().find(|e| e.name == name).map(|e| e.remaining)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<W: Clone> DelayRegistry<W> {
    /// Advance all running entries and return fired wake commands in
    /// registration order.
    pub fn tick(&mut self, scaled_dt: f64, unscaled_dt: f64) -> Vec<(String, W)> {
        if self.halted {
            return Vec::new();
        }
        let mut fired = Vec::new();
        let mut index = 0;
        while index < self.entries.len() {
            let entry = &mut self.entries[index];
            // Forever entries (period < 0) are cancel-only.
            if entry.paused || entry.gated || entry.period < 0.0 {
                index += 1;
                continue;
            }
            entry.remaining -= if entry.unscaled { unscaled_dt } else { scaled_dt };
            if entry.remaining > 0.0 {
                index += 1;
                continue;
            }
            fired.push((entry.name.clone(), entry.wake.clone()));
            match entry.loops_left {
                -1 => {
                    entry.remaining = entry.period;
                    index += 1;
                }
                0 => {
                    self.entries.remove(index);
                }
                _ => {
                    entry.loops_left -= 1;
                    entry.remaining = entry.period;
                    index += 1;
                }
            }
        }
        fired
    }
}

impl<W: Clone> DelayRegistry<W> {
    pub fn records(&self) -> Vec<DelayRecord<W>> {
        self.entries.clone()
    }

    pub fn from_records(records: Vec<DelayRecord<W>>, halted: bool) -> Self {
        // Keep autogenerated names unique across a restore.
        let counter = records
            .iter()
            .filter_map(|r| r.name.strip_prefix("delay#"))
            .filter_map(|n| n.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        Self {
            entries: records,
            halted,
            counter,
        }
    }
}
