//! Deterministic test rig: a fake device backend and a harness that moves
//! the audio clock and the wall clock forward together.

use crossbeam::channel::{self, Receiver};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use super::graph::{AudioGraph, VoiceKind};
use super::layer::LayerId;
use super::lockfree_buffer::{InputWriter, input_ring};
use super::looper::{EngineEvent, LooperEngine, LooperState};
use super::metronome::MetronomeSettings;
use super::resources::{AudioBackend, InputStream, OutputStream};
use super::LooperNotification;
use crate::config::SessionSettings;
use crate::error::{LooperError, Result};

pub const RATE: u32 = 8000;
pub const STEP: Duration = Duration::from_millis(5);
const STEP_FRAMES: usize = 40;
const OUTPUT_CHANNELS: usize = 2;
const TONE_HZ: f32 = 220.0;

/// Device state shared between the fake backend and the test.
pub struct FakeDevices {
    pub input: Option<InputWriter>,
    pub graph: Option<AudioGraph>,
    pub fail_input: bool,
}

struct InputGuard(Rc<RefCell<FakeDevices>>);

impl Drop for InputGuard {
    fn drop(&mut self) {
        self.0.borrow_mut().input = None;
    }
}

struct OutputGuard(Rc<RefCell<FakeDevices>>);

impl Drop for OutputGuard {
    fn drop(&mut self) {
        self.0.borrow_mut().graph = None;
    }
}

pub struct FakeBackend {
    devices: Rc<RefCell<FakeDevices>>,
}

impl FakeBackend {
    pub fn new() -> (Self, Rc<RefCell<FakeDevices>>) {
        let devices = Rc::new(RefCell::new(FakeDevices {
            input: None,
            graph: None,
            fail_input: false,
        }));
        (
            Self {
                devices: Rc::clone(&devices),
            },
            devices,
        )
    }
}

impl AudioBackend for FakeBackend {
    fn open_input(&mut self) -> Result<InputStream> {
        let mut devices = self.devices.borrow_mut();
        if devices.fail_input {
            return Err(LooperError::DeviceUnavailable(
                "no input device".to_string(),
            ));
        }
        let (writer, reader) = input_ring(RATE as usize * 2, 1);
        devices.input = Some(writer);
        let guard = InputGuard(Rc::clone(&self.devices));
        Ok(InputStream::new(reader, 1, RATE, Box::new(guard)))
    }

    fn open_output(&mut self) -> Result<OutputStream> {
        let graph = AudioGraph::new(RATE, OUTPUT_CHANNELS);
        self.devices.borrow_mut().graph = Some(graph.clone());
        let guard = OutputGuard(Rc::clone(&self.devices));
        Ok(OutputStream::new(graph, Box::new(guard)))
    }
}

/// Engine at 8 kHz with mono input and stereo output, stepped in 5 ms
/// blocks: render, then feed one block of tone, then poll.
pub struct Harness {
    pub engine: LooperEngine,
    pub devices: Rc<RefCell<FakeDevices>>,
    pub start: Instant,
    pub now: Instant,
    pub input_enabled: bool,
    phase: f32,
    out: Vec<f32>,
}

impl Harness {
    pub fn new(count_in_beats: u8) -> Self {
        let (backend, devices) = FakeBackend::new();
        let session = SessionSettings {
            bpm: 120,
            count_in_beats,
        };
        let engine = LooperEngine::new(Box::new(backend), &session, MetronomeSettings::default())
            .expect("valid session settings");
        let start = Instant::now();
        Self {
            engine,
            devices,
            start,
            now: start,
            input_enabled: true,
            phase: 0.0,
            out: vec![0.0; STEP_FRAMES * OUTPUT_CHANNELS],
        }
    }

    pub fn notifications(&mut self) -> Receiver<LooperNotification> {
        let (tx, rx) = channel::unbounded();
        self.engine.set_notifier(tx);
        rx
    }

    pub fn elapsed_ms(&self) -> u64 {
        (self.now - self.start).as_millis() as u64
    }

    pub fn tap(&mut self) {
        self.engine.tap(self.now);
    }

    pub fn stop(&mut self) {
        self.engine.stop(self.now);
    }

    pub fn step(&mut self) {
        let graph = self.devices.borrow().graph.clone();
        if let Some(graph) = graph {
            graph.render_block(&mut self.out);
        }
        if self.input_enabled {
            let block = self.tone();
            if let Some(writer) = self.devices.borrow_mut().input.as_mut() {
                writer.write(&block);
            }
        }
        self.now += STEP;
        self.engine.poll(self.now);
    }

    pub fn run_ms(&mut self, millis: u64) {
        for _ in 0..millis / STEP.as_millis() as u64 {
            self.step();
        }
    }

    /// Step until `done` holds, for at most `max_millis`.
    pub fn run_until(&mut self, done: impl Fn(&LooperEngine) -> bool, max_millis: u64) {
        for _ in 0..max_millis / STEP.as_millis() as u64 {
            if done(&self.engine) {
                return;
            }
            self.step();
        }
    }

    /// Wait for the decoder thread and hand its result to the engine.
    pub fn finish_decode(&mut self) {
        if !self.engine.is_decoding() {
            return;
        }
        let done = self
            .engine
            .completions()
            .recv_timeout(Duration::from_secs(5))
            .expect("decoder finished");
        self.engine
            .handle(EngineEvent::CaptureDecoded(done), self.now);
    }

    /// First take of `millis`, left playing and clear of the double-tap window.
    pub fn record_first_take(&mut self, millis: u64) {
        self.tap();
        self.run_ms(millis);
        self.tap();
        self.finish_decode();
        assert_eq!(self.engine.state(), LooperState::Playing);
        self.run_ms(400);
    }

    /// Overdub of about `millis`, boundaries included.
    pub fn overdub_ms(&mut self, millis: u64) {
        self.tap();
        self.run_ms(millis);
        self.tap();
        self.run_until(|e| e.state() == LooperState::Playing, 2000);
        self.finish_decode();
        self.run_ms(400);
    }

    /// (layer, start frame) of every layer voice in the graph.
    pub fn scheduled_layers(&self) -> Vec<(LayerId, u64)> {
        let graph = self.devices.borrow().graph.clone();
        graph.map_or_else(Vec::new, |graph| {
            graph.with(|g| {
                g.voices()
                    .iter()
                    .filter_map(|v| match v.kind {
                        VoiceKind::Layer(id) => Some((id, v.start)),
                        VoiceKind::Click => None,
                    })
                    .collect()
            })
        })
    }

    fn tone(&mut self) -> Vec<f32> {
        let step = TONE_HZ * std::f32::consts::TAU / RATE as f32;
        (0..STEP_FRAMES)
            .map(|_| {
                self.phase = (self.phase + step) % std::f32::consts::TAU;
                0.5 * self.phase.sin()
            })
            .collect()
    }
}
