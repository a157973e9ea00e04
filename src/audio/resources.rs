use std::any::Any;
use std::thread;
use std::time::{Duration, Instant};

use super::graph::{AudioGraph, RenderGraph};
use super::lockfree_buffer::InputReader;
use crate::error::Result;

/// Fade applied to anything still sounding when the devices close.
const RELEASE_FADE: Duration = Duration::from_millis(10);

/// Longest `release` waits for the output callback to play the fade.
const RELEASE_WAIT: Duration = Duration::from_millis(50);

/// An open input device delivering frames into the input ring.
pub struct InputStream {
    pub(crate) reader: InputReader,
    channels: u16,
    sample_rate: u32,
    // dropping this closes the device
    _device: Box<dyn Any>,
}

impl InputStream {
    pub fn new(reader: InputReader, channels: u16, sample_rate: u32, device: Box<dyn Any>) -> Self {
        Self {
            reader,
            channels,
            sample_rate,
            _device: device,
        }
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// An open output device rendering the graph and driving its clock.
pub struct OutputStream {
    graph: AudioGraph,
    _device: Box<dyn Any>,
}

impl OutputStream {
    pub fn new(graph: AudioGraph, device: Box<dyn Any>) -> Self {
        Self {
            graph,
            _device: device,
        }
    }

    pub fn graph(&self) -> &AudioGraph {
        &self.graph
    }
}

/// Source of audio devices. Implemented over cpal, and by a fake in tests.
pub trait AudioBackend {
    fn open_input(&mut self) -> Result<InputStream>;
    fn open_output(&mut self) -> Result<OutputStream>;
}

/// Owns the input stream and the audio graph, and guarantees both are
/// released together.
pub struct ResourceManager {
    backend: Box<dyn AudioBackend>,
    input: Option<InputStream>,
    output: Option<OutputStream>,
}

impl ResourceManager {
    pub fn new(backend: Box<dyn AudioBackend>) -> Self {
        Self {
            backend,
            input: None,
            output: None,
        }
    }

    pub fn is_acquired(&self) -> bool {
        self.input.is_some() && self.output.is_some()
    }

    /// Open the output graph, then the input device. Nothing stays open
    /// when either fails.
    pub fn acquire(&mut self) -> Result<()> {
        if self.is_acquired() {
            return Ok(());
        }
        if self.output.is_none() {
            self.output = Some(self.backend.open_output()?);
        }
        match self.backend.open_input() {
            Ok(input) => {
                log::info!(
                    "audio acquired: input {} ch @ {} Hz, output @ {} Hz",
                    input.channels(),
                    input.sample_rate(),
                    self.graph().map_or(0, AudioGraph::sample_rate)
                );
                self.input = Some(input);
                Ok(())
            }
            Err(e) => {
                self.release();
                Err(e)
            }
        }
    }

    /// Fade the graph to silence and close both devices.
    pub fn release(&mut self) {
        if let Some(output) = self.output.take() {
            fade_to_silence(output.graph());
        }
        if self.input.take().is_some() {
            log::debug!("input stream released");
        }
    }

    pub fn input_mut(&mut self) -> Option<&mut InputStream> {
        self.input.as_mut()
    }

    pub fn graph(&self) -> Option<&AudioGraph> {
        self.output.as_ref().map(OutputStream::graph)
    }
}

/// Fade out every sounding voice, wait until the callback has played the
/// fade, then empty the graph. A stalled clock (lost device) bounds the wait
/// at `RELEASE_WAIT`.
fn fade_to_silence(graph: &AudioGraph) {
    let clock = graph.clock();
    let len = clock.frames_for(RELEASE_FADE.as_secs_f64());
    // the callback advances the clock under the graph lock
    let (at, sounding) = graph.with(|g| {
        let at = clock.now();
        g.fade_out_from(at, len as usize);
        (at, !g.voices().is_empty())
    });

    if sounding {
        let deadline = Instant::now() + RELEASE_WAIT;
        while clock.now() < at + len && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        if clock.now() < at + len {
            log::debug!("output clock stalled, closing without the full fade");
        }
    }
    graph.with(RenderGraph::clear);
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        self.release();
    }
}
