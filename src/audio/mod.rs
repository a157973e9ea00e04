pub mod buffer;
pub mod capture;
pub mod clock;
pub mod codec;
pub mod graph;
pub mod layer;
pub mod lockfree_buffer;
pub mod looper;
pub mod metronome;
pub mod peak_meter;
pub mod resources;
pub mod scheduler;
pub mod simd_mixer;
pub mod store;
pub mod stream;
pub mod undo_history;

#[cfg(test)]
pub(crate) mod testing;

pub use buffer::AudioBuffer;
pub use layer::{Layer, LayerId};
pub use looper::{EngineEvent, LayerView, LooperEngine, LooperState, SessionView};
pub use metronome::MetronomeSettings;
pub use resources::AudioBackend;
pub use stream::CpalBackend;

/// Wall-clock timers of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    CountInPulse,
    OverdubStart,
    OverdubStop,
    Lookahead,
}

/// Requests from the front-end to the engine thread.
#[derive(Debug, Clone, PartialEq)]
pub enum LooperCommand {
    Tap,
    Stop,
    Undo,
    HardReset,
    SetBpm(u32),
    SetCountInBeats(u8),
    SetMetronome(MetronomeSettings),
    SetLayerVolume(LayerId, f32),
    ToggleLayerMute(LayerId),
    DeleteLayer(LayerId),
    Shutdown,
}

/// What the engine reports back.
#[derive(Debug, Clone, PartialEq)]
pub enum LooperNotification {
    StateChanged(LooperState),
    Pulse {
        downbeat: bool,
        /// Count-in number shown on this pulse, if counting in
        countdown: Option<u8>,
    },
    LayerCommitted {
        id: LayerId,
        beats: u32,
        loop_seconds: f64,
    },
    LayerRemoved(LayerId),
    Undone,
    Error(String),
    Reset,
}
