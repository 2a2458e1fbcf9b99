//! The frame loop and its synchronization protocol.
//!
//! Every frame runs the same fixed sequence:
//!
//! 1. acquire a back buffer
//! 2. reset and open the command recorder (legal only because step 6 of the
//!    previous frame retired its submission)
//! 3. record the frame's commands
//! 4. submit, signaling a fresh fence value
//! 5. present the back buffer
//! 6. block until the fence reaches the value from step 4
//!
//! Step 6 before the next frame's step 2 is the whole synchronization
//! story: by the time the recorder is reset, the GPU is provably done with
//! its previous contents. The cost is zero frame overlap; the benefit is
//! that no per-frame resource needs more than one copy.
//!
//! [`FrameLoop`] drives the sequence over a [`FrameHost`], which supplies
//! the actual acquire/record/submit/present/wait mechanics. The production
//! host is the Vulkan renderer; tests substitute a scripted host to pin the
//! protocol down without a device.

use std::time::Duration;

use glint_rhi::WaitOutcome;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Bound on the steady-state per-frame completion wait. A frame that takes
/// longer than this has hung.
pub const FRAME_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on the shutdown drain wait. Exceeding it abandons the remaining
/// GPU work rather than hanging exit forever.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Mechanics a frame needs from the rendering backend.
///
/// All methods map one-to-one onto steps of the frame sequence; the loop
/// owns the ordering, hosts own the mechanism.
pub trait FrameHost {
    /// Host-side error type.
    type Error: std::error::Error;

    /// Whether shutdown has been requested.
    fn poll_closing(&mut self) -> bool;

    /// Acquires the next back buffer and returns its index.
    fn acquire_image(&mut self) -> Result<u32, Self::Error>;

    /// Resets the command recorder and opens it for recording.
    ///
    /// `retired` is the highest fence value the loop has observed as
    /// reached; the host must refuse the reset if its recorder's last
    /// submission is newer than that.
    fn begin_recording(&mut self, retired: u64) -> Result<(), Self::Error>;

    /// Records the frame's commands against the acquired back buffer.
    fn record(&mut self, image_index: u32) -> Result<(), Self::Error>;

    /// Closes the recorder and submits it, returning the fence value the
    /// submission will signal.
    fn submit(&mut self) -> Result<u64, Self::Error>;

    /// Queues presentation of the back buffer.
    fn present(&mut self, image_index: u32) -> Result<(), Self::Error>;

    /// Blocks until the fence reaches `value` or the timeout elapses.
    fn wait_until(&mut self, value: u64, timeout: Duration) -> Result<WaitOutcome, Self::Error>;

    /// Enqueues a standalone fence signal behind all submitted work and
    /// returns its value. Used by the shutdown drain.
    fn signal(&mut self) -> Result<u64, Self::Error>;
}

/// Frame sequencing errors.
#[derive(Error, Debug)]
pub enum FrameError<E: std::error::Error> {
    /// The host failed mid-frame.
    #[error(transparent)]
    Host(E),

    /// The steady-state completion wait timed out: the device has hung or
    /// been lost. Always fatal; only the shutdown drain tolerates timeouts.
    #[error("frame {frame} fence wait timed out at value {value}")]
    SyncTimeout {
        /// Frame number that hung.
        frame: u64,
        /// Fence value that was never reached.
        value: u64,
    },

    /// A submission returned a fence value at or below the previous one.
    /// Waiting on such a value would succeed immediately against stale
    /// work, so it is rejected before the present.
    #[error("fence value went backwards: submission signaled {current} after {previous}")]
    NonMonotonicFence {
        /// Value signaled by the previous submission.
        previous: u64,
        /// Value returned by this submission.
        current: u64,
    },
}

/// Drives the per-frame synchronization sequence over a [`FrameHost`].
pub struct FrameLoop<H: FrameHost> {
    host: H,
    frame_number: u64,
    /// Highest fence value observed as reached.
    retired: u64,
    /// Fence value signaled by the most recent submission.
    last_signaled: u64,
}

impl<H: FrameHost> FrameLoop<H> {
    /// Wraps a host with frame and fence counters at zero.
    pub fn new(host: H) -> Self {
        Self {
            host,
            frame_number: 0,
            retired: 0,
            last_signaled: 0,
        }
    }

    /// Frames completed so far.
    #[inline]
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Highest fence value observed as reached.
    #[inline]
    pub fn retired(&self) -> u64 {
        self.retired
    }

    /// Shared access to the host.
    #[inline]
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Mutable access to the host.
    #[inline]
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Runs one complete frame.
    ///
    /// # Errors
    ///
    /// Host errors and both sequencing violations propagate; all of them
    /// are fatal to the loop.
    pub fn run_frame(&mut self) -> Result<(), FrameError<H::Error>> {
        let image_index = self.host.acquire_image().map_err(FrameError::Host)?;

        self.host
            .begin_recording(self.retired)
            .map_err(FrameError::Host)?;
        self.host.record(image_index).map_err(FrameError::Host)?;

        let value = self.host.submit().map_err(FrameError::Host)?;
        if value <= self.last_signaled {
            return Err(FrameError::NonMonotonicFence {
                previous: self.last_signaled,
                current: value,
            });
        }
        self.last_signaled = value;

        self.host.present(image_index).map_err(FrameError::Host)?;

        match self
            .host
            .wait_until(value, FRAME_WAIT_TIMEOUT)
            .map_err(FrameError::Host)?
        {
            WaitOutcome::Reached => {
                self.retired = value;
            }
            WaitOutcome::TimedOut => {
                return Err(FrameError::SyncTimeout {
                    frame: self.frame_number,
                    value,
                });
            }
        }

        self.frame_number += 1;
        Ok(())
    }

    /// Runs frames until the host reports a close request, then drains.
    ///
    /// # Errors
    ///
    /// Propagates the first frame error; the drain still runs on the
    /// shutdown path but not on the error path (the device state is
    /// unknown after a frame failure).
    pub fn run_until_closed(&mut self) -> Result<(), FrameError<H::Error>> {
        while !self.host.poll_closing() {
            self.run_frame()?;
        }
        info!("close requested after {} frame(s)", self.frame_number);
        self.drain()
    }

    /// Waits out all submitted GPU work before teardown.
    ///
    /// Enqueues one final signal behind everything already submitted and
    /// waits for it with a bounded timeout. A timeout here is logged and
    /// tolerated: exit proceeds rather than hanging on a wedged device.
    pub fn drain(&mut self) -> Result<(), FrameError<H::Error>> {
        let value = self.host.signal().map_err(FrameError::Host)?;
        debug!("draining GPU work up to fence value {value}");

        match self
            .host
            .wait_until(value, DRAIN_TIMEOUT)
            .map_err(FrameError::Host)?
        {
            WaitOutcome::Reached => {
                self.retired = value;
                debug!("drain complete");
            }
            WaitOutcome::TimedOut => {
                warn!(
                    "GPU work still outstanding after {:?} drain timeout; proceeding with teardown",
                    DRAIN_TIMEOUT
                );
            }
        }
        Ok(())
    }
}
