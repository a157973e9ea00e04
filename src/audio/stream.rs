use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Host, SampleFormat, StreamConfig};
use crossbeam::channel::{self, Receiver, Sender};

use super::graph::AudioGraph;
use super::lockfree_buffer::input_ring;
use super::resources::{AudioBackend, InputStream, OutputStream};
use crate::config::DeviceSettings;
use crate::error::LooperError;

/// Opens the configured (or default) cpal devices.
///
/// The output callback renders the graph and drives the audio clock; the
/// input callback only copies into the input ring.
pub struct CpalBackend {
    host: Host,
    settings: DeviceSettings,
    errors: Sender<String>,
    error_rx: Receiver<String>,
}

impl CpalBackend {
    pub fn new(settings: DeviceSettings) -> Self {
        let (errors, error_rx) = channel::bounded(16);
        Self {
            host: cpal::default_host(),
            settings,
            errors,
            error_rx,
        }
    }

    /// Errors reported by the device streams.
    pub fn stream_errors(&self) -> Receiver<String> {
        self.error_rx.clone()
    }

    fn find_device(&self, name: Option<&str>, input: bool) -> Result<Device> {
        let kind = if input { "input" } else { "output" };
        let Some(name) = name else {
            let device = if input {
                self.host.default_input_device()
            } else {
                self.host.default_output_device()
            };
            return device.ok_or_else(|| anyhow!("no {} device available", kind));
        };

        let named = |device: &Device| device.name().is_ok_and(|n| n == name);
        let found = if input {
            self.host.input_devices()?.find(named)
        } else {
            self.host.output_devices()?.find(named)
        };
        found.ok_or_else(|| anyhow!("{} device '{}' not found", kind, name))
    }

    fn try_open_input(&mut self) -> Result<InputStream> {
        let device = self.find_device(self.settings.input.as_deref(), true)?;
        let supported = device
            .default_input_config()
            .context("querying input config")?;
        warn_if_not_f32(supported.sample_format(), "input");
        let config = StreamConfig {
            channels: supported.channels(),
            sample_rate: supported.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };
        let channels = config.channels;
        let sample_rate = config.sample_rate.0;
        log::info!(
            "input: {} ({} Hz, {} ch)",
            device.name().unwrap_or_else(|_| "Unknown".to_string()),
            sample_rate,
            channels
        );

        let capacity =
            (sample_rate as f32 * self.settings.input_ring_seconds) as usize * channels as usize;
        let (mut writer, reader) = input_ring(capacity, channels);
        let errors = self.errors.clone();
        let stream = device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                writer.write(data);
            },
            move |_err| {
                let _ = errors.try_send(String::from("input stream error"));
            },
            None,
        )?;
        stream.play()?;

        Ok(InputStream::new(reader, channels, sample_rate, Box::new(stream)))
    }

    fn try_open_output(&mut self) -> Result<OutputStream> {
        let device = self.find_device(self.settings.output.as_deref(), false)?;
        let supported = device
            .default_output_config()
            .context("querying output config")?;
        warn_if_not_f32(supported.sample_format(), "output");
        let config = StreamConfig {
            channels: supported.channels(),
            sample_rate: supported.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };
        log::info!(
            "output: {} ({} Hz, {} ch)",
            device.name().unwrap_or_else(|_| "Unknown".to_string()),
            config.sample_rate.0,
            config.channels
        );

        let graph = AudioGraph::new(config.sample_rate.0, config.channels as usize);
        let render = graph.clone();
        let errors = self.errors.clone();
        let stream = device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                render.render_block(data);
            },
            move |_err| {
                let _ = errors.try_send(String::from("output stream error"));
            },
            None,
        )?;
        stream.play()?;

        Ok(OutputStream::new(graph, Box::new(stream)))
    }
}

impl AudioBackend for CpalBackend {
    fn open_input(&mut self) -> crate::error::Result<InputStream> {
        self.try_open_input()
            .map_err(|e| LooperError::DeviceUnavailable(format!("{:#}", e)))
    }

    fn open_output(&mut self) -> crate::error::Result<OutputStream> {
        self.try_open_output()
            .map_err(|e| LooperError::DeviceUnavailable(format!("{:#}", e)))
    }
}

fn warn_if_not_f32(format: SampleFormat, kind: &str) {
    if format != SampleFormat::F32 {
        log::warn!("{} device prefers {:?}, requesting f32", kind, format);
    }
}

/// (input names, output names) of the default host.
pub fn enumerate_device_names() -> Result<(Vec<String>, Vec<String>)> {
    let host = cpal::default_host();

    let mut inputs = Vec::new();
    let mut outputs = Vec::new();

    for device in host.input_devices()? {
        inputs.push(device.name().unwrap_or_else(|_| "Unknown".to_string()));
    }

    for device in host.output_devices()? {
        outputs.push(device.name().unwrap_or_else(|_| "Unknown".to_string()));
    }

    Ok((inputs, outputs))
}

pub fn list_devices() -> Result<()> {
    let (inputs, outputs) = enumerate_device_names()?;

    println!("Available input devices:");
    for (i, name) in inputs.iter().enumerate() {
        println!("  {}: {}", i, name);
    }

    println!("\nAvailable output devices:");
    for (i, name) in outputs.iter().enumerate() {
        println!("  {}: {}", i, name);
    }

    Ok(())
}
