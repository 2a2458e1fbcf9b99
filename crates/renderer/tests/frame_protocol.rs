//! Frame sequencing tests against a scripted host.
//!
//! The mock host models a queue that completes fence values strictly in
//! order, a surface that hands out back-buffer indices from a script (not
//! necessarily round-robin), and a recorder guarded by the real submission
//! gate. No device is involved; these tests pin the loop's ordering rules
//! down.

use std::time::Duration;

use glint_renderer::frame::{FrameError, FrameHost, FrameLoop};
use glint_rhi::{RhiError, SubmissionGate, WaitOutcome};
use thiserror::Error;

#[derive(Error, Debug)]
enum MockError {
    #[error(transparent)]
    Gate(#[from] RhiError),
    #[error("script exhausted")]
    ScriptExhausted,
}

/// Scripted frame host.
struct MockHost {
    /// Back-buffer indices handed out by successive acquires.
    image_script: Vec<u32>,
    acquires: usize,
    /// Frames to run before reporting a close request.
    close_after: u64,
    polls: u64,
    /// Values signaled so far.
    signaled: u64,
    /// Highest value the simulated queue has completed.
    completed: u64,
    /// Value at which the simulated queue stops making progress.
    hang_at: Option<u64>,
    /// When set, submissions re-sign the previous value.
    repeat_value: bool,
    gate: SubmissionGate,
    events: Vec<String>,
}

impl MockHost {
    fn new(image_script: Vec<u32>, close_after: u64) -> Self {
        Self {
            image_script,
            acquires: 0,
            close_after,
            polls: 0,
            signaled: 0,
            completed: 0,
            hang_at: None,
            repeat_value: false,
            gate: SubmissionGate::new(),
            events: Vec::new(),
        }
    }
}

impl FrameHost for MockHost {
    type Error = MockError;

    fn poll_closing(&mut self) -> bool {
        let closing = self.polls >= self.close_after;
        self.polls += 1;
        closing
    }

    fn acquire_image(&mut self) -> Result<u32, MockError> {
        let index = *self
            .image_script
            .get(self.acquires)
            .ok_or(MockError::ScriptExhausted)?;
        self.acquires += 1;
        self.events.push(format!("acquire {index}"));
        Ok(index)
    }

    fn begin_recording(&mut self, retired: u64) -> Result<(), MockError> {
        self.gate.check_reset(retired)?;
        self.events.push(format!("reset@{retired}"));
        Ok(())
    }

    fn record(&mut self, image_index: u32) -> Result<(), MockError> {
        self.events.push(format!("record {image_index}"));
        Ok(())
    }

    fn submit(&mut self) -> Result<u64, MockError> {
        if !self.repeat_value {
            self.signaled += 1;
        }
        self.gate.mark_submitted(self.signaled);
        self.events.push(format!("submit {}", self.signaled));
        Ok(self.signaled)
    }

    fn present(&mut self, image_index: u32) -> Result<(), MockError> {
        self.events.push(format!("present {image_index}"));
        Ok(())
    }

    fn wait_until(&mut self, value: u64, _timeout: Duration) -> Result<WaitOutcome, MockError> {
        // The queue completes values in order up to the hang point.
        let reachable = match self.hang_at {
            Some(hang) => value < hang,
            None => true,
        };
        if reachable && value <= self.signaled {
            self.completed = self.completed.max(value);
        }

        if self.completed >= value {
            self.events.push(format!("wait {value} reached"));
            Ok(WaitOutcome::Reached)
        } else {
            self.events.push(format!("wait {value} timeout"));
            Ok(WaitOutcome::TimedOut)
        }
    }

    fn signal(&mut self) -> Result<u64, MockError> {
        self.signaled += 1;
        self.events.push(format!("signal {}", self.signaled));
        Ok(self.signaled)
    }
}

#[test]
fn five_frames_interleave_waits_and_resets() {
    // Non-round-robin acquisition order: the loop must not assume the
    // surface alternates.
    let host = MockHost::new(vec![0, 1, 1, 0, 1], 5);
    let mut frame_loop = FrameLoop::new(host);

    frame_loop.run_until_closed().unwrap();

    assert_eq!(frame_loop.frame_number(), 5);
    // Drain signal is value 6; everything retired.
    assert_eq!(frame_loop.retired(), 6);

    let events = &frame_loop.host().events;
    let expected = [
        "acquire 0",
        "reset@0",
        "record 0",
        "submit 1",
        "present 0",
        "wait 1 reached",
        "acquire 1",
        "reset@1",
        "record 1",
        "submit 2",
        "present 1",
        "wait 2 reached",
        "acquire 1",
        "reset@2",
        "record 1",
        "submit 3",
        "present 1",
        "wait 3 reached",
        "acquire 0",
        "reset@3",
        "record 0",
        "submit 4",
        "present 0",
        "wait 4 reached",
        "acquire 1",
        "reset@4",
        "record 1",
        "submit 5",
        "present 1",
        "wait 5 reached",
        "signal 6",
        "wait 6 reached",
    ];
    assert_eq!(events, &expected);
}

#[test]
fn immediate_close_runs_zero_frames_and_drains() {
    let host = MockHost::new(vec![], 0);
    let mut frame_loop = FrameLoop::new(host);

    frame_loop.run_until_closed().unwrap();

    assert_eq!(frame_loop.frame_number(), 0);
    assert_eq!(
        frame_loop.host().events,
        vec!["signal 1", "wait 1 reached"]
    );
}

#[test]
fn repeated_fence_value_is_rejected_before_present() {
    let host = MockHost::new(vec![0, 0], 10);
    let mut frame_loop = FrameLoop::new(host);

    frame_loop.run_frame().unwrap();

    frame_loop.host_mut().repeat_value = true;
    let err = frame_loop.run_frame().unwrap_err();

    match err {
        FrameError::NonMonotonicFence { previous, current } => {
            assert_eq!(previous, 1);
            assert_eq!(current, 1);
        }
        other => panic!("expected NonMonotonicFence, got {other}"),
    }

    // The offending frame must not have been presented.
    assert!(!frame_loop
        .host()
        .events
        .iter()
        .skip(6)
        .any(|e| e.starts_with("present")));
}

#[test]
fn reset_before_retirement_is_detected() {
    let mut host = MockHost::new(vec![0], 10);

    // A submission retiring at value 5 with only value 4 observed: the
    // gate must refuse the reset rather than let the pool be recycled
    // under in-flight commands.
    host.submit().unwrap();
    host.gate.mark_submitted(5);
    let err = host.begin_recording(4).unwrap_err();
    assert!(matches!(
        err,
        MockError::Gate(RhiError::RecorderInUse {
            pending: 5,
            retired: 4
        })
    ));

    assert!(host.begin_recording(5).is_ok());
}

#[test]
fn steady_state_wait_timeout_is_fatal() {
    let mut host = MockHost::new(vec![0, 1, 0], 10);
    host.hang_at = Some(2);
    let mut frame_loop = FrameLoop::new(host);

    frame_loop.run_frame().unwrap();

    let err = frame_loop.run_frame().unwrap_err();
    match err {
        FrameError::SyncTimeout { frame, value } => {
            assert_eq!(frame, 1);
            assert_eq!(value, 2);
        }
        other => panic!("expected SyncTimeout, got {other}"),
    }
}

#[test]
fn drain_timeout_is_tolerated() {
    let mut host = MockHost::new(vec![], 0);
    // The queue never completes anything; shutdown must still succeed.
    host.hang_at = Some(0);
    let mut frame_loop = FrameLoop::new(host);

    frame_loop.run_until_closed().unwrap();

    assert_eq!(
        frame_loop.host().events,
        vec!["signal 1", "wait 1 timeout"]
    );
    // Nothing retired; teardown proceeds regardless.
    assert_eq!(frame_loop.retired(), 0);
}
