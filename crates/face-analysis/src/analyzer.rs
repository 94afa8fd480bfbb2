//! External face analysis routine

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use camera_capture::VideoFrame;
use tracing::{debug, info};

use crate::{AnalysisActions, AnalysisError, AttributeSet};

/// The slow face attribute call.
///
/// Implementations analyze the first face in the frame. "No face" is an
/// error, not an empty result.
pub trait FaceAnalyzer: Send + Sync {
    fn analyze(&self, frame: &VideoFrame, actions: AnalysisActions) -> Result<AttributeSet, AnalysisError>;

    /// Backend name for logs
    fn name(&self) -> &str {
        "face-analyzer"
    }
}

/// One call seen by [`MockFaceAnalyzer`]
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    pub frame_sequence: u64,
    pub width: u32,
    pub height: u32,
    pub actions: AnalysisActions,
}

#[derive(Default)]
struct GateState {
    open: bool,
    waiting: usize,
}

/// Blocks analysis calls until opened
#[derive(Default)]
pub struct Gate {
    state: Mutex<GateState>,
    cond: Condvar,
}

impl Gate {
    pub fn open(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.open = true;
        self.cond.notify_all();
    }

    /// Number of calls currently blocked
    pub fn waiting(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).waiting
    }

    fn pass(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.waiting += 1;
        while !state.open {
            state = self.cond.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        state.waiting -= 1;
    }
}

/// Deterministic analyzer for tests and demos
pub struct MockFaceAnalyzer {
    output: AttributeSet,
    latency: Duration,
    /// Results returned in order before falling back to `output`
    script: Mutex<VecDeque<Result<AttributeSet, AnalysisError>>>,
    /// Calls (1-based) that panic
    panic_on: Vec<usize>,
    gate: Option<Arc<Gate>>,
    calls: Mutex<Vec<MockCall>>,
}

impl MockFaceAnalyzer {
    /// Analyzer returning `output` for every frame
    pub fn new(output: AttributeSet) -> Self {
        info!("Creating mock face analyzer ({})", output.emotion);
        Self {
            output,
            latency: Duration::ZERO,
            script: Mutex::new(VecDeque::new()),
            panic_on: Vec::new(),
            gate: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Sleep this long in every call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Return these results first, in order
    pub fn with_script(self, script: Vec<Result<AttributeSet, AnalysisError>>) -> Self {
        *self.script.lock().unwrap_or_else(PoisonError::into_inner) = script.into();
        self
    }

    /// Panic on the given 1-based call number
    pub fn with_panic_on(mut self, call: usize) -> Self {
        self.panic_on.push(call);
        self
    }

    /// Hold every call until the returned gate is opened
    pub fn gated(mut self) -> (Self, Arc<Gate>) {
        let gate = Arc::new(Gate::default());
        self.gate = Some(gate.clone());
        (self, gate)
    }

    /// Calls seen so far
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl FaceAnalyzer for MockFaceAnalyzer {
    fn analyze(&self, frame: &VideoFrame, actions: AnalysisActions) -> Result<AttributeSet, AnalysisError> {
        let call_number = {
            let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
            calls.push(MockCall {
                frame_sequence: frame.sequence,
                width: frame.width,
                height: frame.height,
                actions,
            });
            calls.len()
        };

        if let Some(gate) = &self.gate {
            gate.pass();
        }
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        if self.panic_on.contains(&call_number) {
            panic!("mock analyzer panic on call {}", call_number);
        }

        let scripted = self.script.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        let result = scripted.unwrap_or_else(|| Ok(self.output.clone()));
        debug!("Mock analysis of frame {}: {:?}", frame.sequence, result.as_ref().map(|a| a.emotion));

        result.map(|attrs| attrs.restricted_to(actions))
    }

    fn name(&self) -> &str {
        "mock"
    }
}
