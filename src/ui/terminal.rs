use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Gauge, Paragraph, Row, Table},
};
use std::{
    io,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use crate::audio::metronome::MAX_COUNT_IN_BEATS;
use crate::audio::{LooperCommand, LooperNotification, LooperState, SessionView};
use crate::config::{LooperConfig, save_config};

const REDRAW_INTERVAL: Duration = Duration::from_millis(33);
const STATUS_TIMEOUT: Duration = Duration::from_secs(3);
const VOLUME_STEP: f32 = 0.1;

#[derive(Debug, Clone, PartialEq)]
enum HeaderStatus {
    InputPrompt(String, String), // (prompt, current_input)
    Message(String),
    Error(String),
}

pub struct TerminalUI {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
    session: Arc<Mutex<SessionView>>,
    command_sender: crossbeam::channel::Sender<LooperCommand>,
    notifications: crossbeam::channel::Receiver<LooperNotification>,
    selected_layer: usize,
    is_running: bool,
    last_update: Instant,
    devices: String,
    bpm_input: Option<String>,
    header_status: Option<HeaderStatus>,
    status_timer: Option<Instant>,
    config: LooperConfig,
    config_path: PathBuf,
}

impl TerminalUI {
    pub fn new(
        session: Arc<Mutex<SessionView>>,
        command_sender: crossbeam::channel::Sender<LooperCommand>,
        notifications: crossbeam::channel::Receiver<LooperNotification>,
        config: LooperConfig,
        config_path: PathBuf,
    ) -> io::Result<Self> {
        let input_device_name = config.devices.input.as_deref().unwrap_or("default");
        let output_device_name = config.devices.output.as_deref().unwrap_or("default");
        let devices = format!("In: {} | Out: {}", input_device_name, output_device_name);
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;

        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend)?;

        Ok(Self {
            terminal,
            session,
            command_sender,
            notifications,
            selected_layer: 0,
            is_running: true,
            last_update: Instant::now(),
            devices,
            bpm_input: None,
            header_status: None,
            status_timer: None,
            config,
            config_path,
        })
    }

    pub fn run(&mut self) -> io::Result<()> {
        while self.is_running {
            if event::poll(Duration::from_millis(5))?
                && let Event::Key(key) = event::read()?
                && key.kind == KeyEventKind::Press
            {
                self.handle_key_event(key);
            }

            while let Ok(notification) = self.notifications.try_recv() {
                self.handle_notification(notification);
            }

            if let Some(timer) = self.status_timer
                && timer.elapsed() >= STATUS_TIMEOUT
            {
                self.header_status = None;
                self.status_timer = None;
            }

            if self.last_update.elapsed() >= REDRAW_INTERVAL {
                self.draw()?;
                self.last_update = Instant::now();
            }
        }
        let _ = self.command_sender.send(LooperCommand::Shutdown);
        Ok(())
    }

    fn snapshot(&self) -> SessionView {
        match self.session.lock() {
            Ok(view) => view.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn send(&self, command: LooperCommand) {
        let _ = self.command_sender.send(command);
    }

    fn handle_key_event(&mut self, key: KeyEvent) {
        if self.bpm_input.is_some() {
            self.handle_bpm_key(key);
            return;
        }

        let view = self.snapshot();
        let selected = view.layers.get(self.selected_layer).map(|l| l.id);

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => self.is_running = false,
            KeyCode::Char(' ') | KeyCode::Enter => self.send(LooperCommand::Tap),
            KeyCode::Char('s') => self.send(LooperCommand::Stop),
            KeyCode::Char('u') => self.send(LooperCommand::Undo),
            KeyCode::Char('x') => self.send(LooperCommand::HardReset),
            KeyCode::Char('p') => self.save_settings(&view),
            KeyCode::Char('t') => {
                if view.bpm_locked {
                    self.show_error("BPM is locked while layers exist");
                } else {
                    self.bpm_input = Some(String::new());
                    self.header_status =
                        Some(HeaderStatus::InputPrompt("Set BPM:".to_string(), String::new()));
                    self.status_timer = None;
                }
            }
            KeyCode::Char('c') => {
                let beats = (view.count_in_beats + 1) % (MAX_COUNT_IN_BEATS + 1);
                self.send(LooperCommand::SetCountInBeats(beats));
                self.show_message(&format!("Count-in: {} beat(s)", beats));
            }
            KeyCode::Char('n') => {
                let mut settings = view.metronome;
                settings.enabled = !settings.enabled;
                self.send(LooperCommand::SetMetronome(settings));
                self.show_message(if settings.enabled {
                    "Metronome ON"
                } else {
                    "Metronome OFF"
                });
            }
            KeyCode::Char('a') => {
                let mut settings = view.metronome;
                settings.audible = !settings.audible;
                self.send(LooperCommand::SetMetronome(settings));
                self.show_message(if settings.audible {
                    "Click audible"
                } else {
                    "Click visual only"
                });
            }
            KeyCode::Char('w') => {
                let mut settings = view.metronome;
                settings.while_looping = !settings.while_looping;
                self.send(LooperCommand::SetMetronome(settings));
                self.show_message(if settings.while_looping {
                    "Click while looping ON"
                } else {
                    "Click while looping OFF"
                });
            }
            KeyCode::Up => self.selected_layer = self.selected_layer.saturating_sub(1),
            KeyCode::Down => {
                if self.selected_layer + 1 < view.layers.len() {
                    self.selected_layer += 1;
                }
            }
            KeyCode::Char('+') | KeyCode::Char('=') => {
                if let Some(layer) = view.layers.get(self.selected_layer) {
                    self.send(LooperCommand::SetLayerVolume(
                        layer.id,
                        layer.volume + VOLUME_STEP,
                    ));
                }
            }
            KeyCode::Char('-') => {
                if let Some(layer) = view.layers.get(self.selected_layer) {
                    self.send(LooperCommand::SetLayerVolume(
                        layer.id,
                        layer.volume - VOLUME_STEP,
                    ));
                }
            }
            KeyCode::Char('m') => {
                if let Some(id) = selected {
                    self.send(LooperCommand::ToggleLayerMute(id));
                }
            }
            KeyCode::Char('d') | KeyCode::Delete => {
                if let Some(id) = selected {
                    self.send(LooperCommand::DeleteLayer(id));
                }
            }
            _ => {}
        }
    }

    fn save_settings(&mut self, view: &SessionView) {
        self.config.update_from_session(view);
        match save_config(&self.config, &self.config_path) {
            Ok(()) => {
                log::info!("settings saved to {}", self.config_path.display());
                self.show_message(&format!("Saved {}", self.config_path.display()));
            }
            Err(e) => {
                log::warn!("saving settings failed: {:#}", e);
                self.show_error(&format!("Save failed: {}", e));
            }
        }
    }

    fn handle_bpm_key(&mut self, key: KeyEvent) {
        let Some(buffer) = self.bpm_input.as_mut() else {
            return;
        };
        match key.code {
            KeyCode::Char(c) if c.is_ascii_digit() && buffer.len() < 3 => buffer.push(c),
            KeyCode::Backspace => {
                buffer.pop();
            }
            KeyCode::Enter => {
                let entered = buffer.parse::<u32>();
                self.bpm_input = None;
                match entered {
                    Ok(bpm) => {
                        self.send(LooperCommand::SetBpm(bpm));
                        self.show_message(&format!("BPM: {}", bpm));
                    }
                    Err(_) => self.show_error("Not a number"),
                }
                return;
            }
            KeyCode::Esc => {
                self.bpm_input = None;
                self.show_message("Cancelled");
                return;
            }
            _ => {}
        }
        let current = buffer.clone();
        self.header_status = Some(HeaderStatus::InputPrompt("Set BPM:".to_string(), current));
    }

    fn handle_notification(&mut self, notification: LooperNotification) {
        match notification {
            LooperNotification::LayerCommitted {
                id,
                beats,
                loop_seconds,
            } => self.show_message(&format!(
                "Layer {} recorded ({} beats, {:.2}s loop)",
                id, beats, loop_seconds
            )),
            LooperNotification::LayerRemoved(id) => {
                self.show_message(&format!("Layer {} deleted", id))
            }
            LooperNotification::Undone => self.show_message("Undo"),
            LooperNotification::Reset => {
                self.selected_layer = 0;
                self.show_message("Session reset");
            }
            LooperNotification::Error(message) => self.show_error(&message),
            LooperNotification::StateChanged(_) | LooperNotification::Pulse { .. } => {}
        }
    }

    fn show_message(&mut self, message: &str) {
        self.header_status = Some(HeaderStatus::Message(message.to_string()));
        self.status_timer = Some(Instant::now());
    }

    fn show_error(&mut self, message: &str) {
        self.header_status = Some(HeaderStatus::Error(message.to_string()));
        self.status_timer = Some(Instant::now());
    }

    fn draw(&mut self) -> io::Result<()> {
        let view = self.snapshot();
        if self.selected_layer >= view.layers.len() {
            self.selected_layer = view.layers.len().saturating_sub(1);
        }
        let selected_layer = self.selected_layer;
        let devices = self.devices.clone();
        let header_status = self.header_status.clone();

        self.terminal.draw(|f| {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([
                    Constraint::Length(3), // Header
                    Constraint::Length(9), // Button
                    Constraint::Min(0),    // Layers
                    Constraint::Length(5), // Footer
                ])
                .split(f.area());

            Self::draw_header_static(f, chunks[0], &devices, &header_status, &view);
            Self::draw_button_static(f, chunks[1], &view);
            Self::draw_layer_list_static(f, chunks[2], &view, selected_layer);
            Self::draw_footer_static(f, chunks[3], &view);
        })?;
        Ok(())
    }

    fn draw_header_static(
        f: &mut Frame,
        area: Rect,
        devices: &str,
        header_status: &Option<HeaderStatus>,
        view: &SessionView,
    ) {
        let (text, color) = match (header_status, &view.error) {
            (Some(HeaderStatus::InputPrompt(prompt, input)), _) => {
                (format!("{} {}_", prompt, input), Color::Yellow)
            }
            (Some(HeaderStatus::Error(message)), _) | (None, Some(message)) => {
                (format!("✗ {}", message), Color::Red)
            }
            (Some(HeaderStatus::Message(message)), _) => (format!("✓ {}", message), Color::Green),
            (None, None) => (devices.to_string(), Color::White),
        };

        let header = Paragraph::new(text)
            .style(Style::default().fg(color).add_modifier(Modifier::BOLD))
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL).title("Taplooper"));
        f.render_widget(header, area);
    }

    fn draw_button_static(f: &mut Frame, area: Rect, view: &SessionView) {
        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(area);

        let (label, color) = match view.state {
            LooperState::Empty if view.layers.is_empty() => {
                ("TAP TO RECORD".to_string(), Color::Gray)
            }
            LooperState::Empty => ("STOPPED".to_string(), Color::Gray),
            LooperState::Countdown => (
                format!("COUNT-IN {}", view.countdown.unwrap_or(0)),
                Color::Cyan,
            ),
            LooperState::Recording => (
                format!(
                    "RECORDING {:.1}s",
                    view.recording_elapsed.unwrap_or_default().as_secs_f64()
                ),
                Color::Red,
            ),
            LooperState::Playing => ("PLAYING".to_string(), Color::Green),
            LooperState::Overdubbing if view.overdub_pending => {
                ("OVERDUB (waiting for beat)".to_string(), Color::Magenta)
            }
            LooperState::Overdubbing => ("OVERDUBBING".to_string(), Color::Magenta),
        };

        let border = if view.flash {
            Style::default().fg(Color::White).bg(color)
        } else {
            Style::default().fg(color)
        };
        let button = Paragraph::new(vec![
            Line::from(""),
            Line::from(""),
            Line::from(Span::styled(
                label,
                Style::default().fg(color).add_modifier(Modifier::BOLD),
            )),
        ])
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(border)
                .title("Space"),
        );
        f.render_widget(button, chunks[0]);

        let meters = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(3), Constraint::Length(3), Constraint::Min(0)])
            .split(chunks[1]);

        let progress = match (view.loop_position, view.loop_duration) {
            (Some(position), Some(duration)) if duration > 0.0 => {
                (position / duration).clamp(0.0, 1.0)
            }
            _ => 0.0,
        };
        let loop_label = match (view.loop_position, view.loop_duration) {
            (Some(position), Some(duration)) => format!("{:.2}s / {:.2}s", position, duration),
            (None, Some(duration)) => format!("-- / {:.2}s", duration),
            _ => "no loop".to_string(),
        };
        let loop_gauge = Gauge::default()
            .block(Block::default().borders(Borders::ALL).title("Loop"))
            .gauge_style(Style::default().fg(Color::Green))
            .label(loop_label)
            .ratio(progress);
        f.render_widget(loop_gauge, meters[0]);

        let level = view.input_level.clamp(0.0, 1.0) as f64;
        let level_color = if level > 0.9 { Color::Red } else { Color::Yellow };
        let input_gauge = Gauge::default()
            .block(Block::default().borders(Borders::ALL).title("Input"))
            .gauge_style(Style::default().fg(level_color))
            .label(format!("{:.1} dB", view.input_db))
            .ratio(level);
        f.render_widget(input_gauge, meters[1]);
    }

    fn draw_layer_list_static(
        f: &mut Frame,
        area: Rect,
        view: &SessionView,
        selected_layer: usize,
    ) {
        let header_style = Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD);

        let rows: Vec<Row> = view
            .layers
            .iter()
            .enumerate()
            .map(|(i, layer)| {
                let (r, g, b) = hue_to_rgb(layer.hue);
                let swatch = Cell::from(Span::styled(
                    "██",
                    Style::default().fg(Color::Rgb(r, g, b)),
                ));
                let status = if layer.muted {
                    Cell::from(Span::styled("MUTED", Style::default().fg(Color::Yellow)))
                } else {
                    Cell::from(Span::styled("ON", Style::default().fg(Color::Green)))
                };
                let row_style = if i == selected_layer {
                    Style::default()
                        .fg(Color::Yellow)
                        .add_modifier(Modifier::BOLD)
                } else {
                    Style::default().fg(Color::White)
                };

                Row::new(vec![
                    swatch,
                    Cell::from(format!("Layer {}", layer.id)),
                    status,
                    Cell::from(format!("{:.0}%", layer.volume * 100.0)),
                    Cell::from(format!("{:.2}s", layer.duration)),
                ])
                .style(row_style)
            })
            .collect();

        let title = match view.loop_beats {
            Some(beats) => format!("Layers ({} beats, {} undo)", beats, view.undo_levels),
            None => format!("Layers ({} undo)", view.undo_levels),
        };
        let table = Table::new(
            rows,
            &[
                Constraint::Length(3),
                Constraint::Length(10),
                Constraint::Length(7),
                Constraint::Length(7),
                Constraint::Length(9),
            ],
        )
        .header(Row::new(vec![
            Cell::from(""),
            Cell::from("Layer").style(header_style),
            Cell::from("Status").style(header_style),
            Cell::from("Volume").style(header_style),
            Cell::from("Length").style(header_style),
        ]))
        .block(Block::default().borders(Borders::ALL).title(title));

        f.render_widget(table, area);
    }

    fn draw_footer_static(f: &mut Frame, area: Rect, view: &SessionView) {
        let key_color = Color::Yellow;
        let desc_color = Color::White;
        let sep_color = Color::DarkGray;

        let key_desc = |key: &str, desc: &str| -> Vec<Span> {
            vec![
                Span::styled(
                    key.to_string(),
                    Style::default().fg(key_color).add_modifier(Modifier::BOLD),
                ),
                Span::styled("=".to_string(), Style::default().fg(sep_color)),
                Span::styled(desc.to_string(), Style::default().fg(desc_color)),
            ]
        };
        let separator = || Span::styled(" | ".to_string(), Style::default().fg(sep_color));
        let on_off = |on: bool| if on { "On" } else { "Off" };

        let mut line1 = Vec::new();
        line1.extend(key_desc("Space", "Tap"));
        line1.push(separator());
        line1.extend(key_desc("S", "Stop"));
        line1.push(separator());
        line1.extend(key_desc("U", "Undo"));
        line1.push(separator());
        line1.extend(key_desc("X", "Reset"));
        line1.push(separator());
        line1.extend(key_desc("Q", "Quit"));

        let mut line2 = Vec::new();
        line2.extend(key_desc("↑↓", "Select"));
        line2.push(separator());
        line2.extend(key_desc("+/-", "Volume"));
        line2.push(separator());
        line2.extend(key_desc("M", "Mute"));
        line2.push(separator());
        line2.extend(key_desc("D", "Delete"));
        line2.push(separator());
        line2.extend(key_desc("P", "Save settings"));

        let mut line3 = Vec::new();
        line3.extend(key_desc("T", "BPM"));
        line3.push(separator());
        line3.extend(key_desc("C", "Count-in"));
        line3.push(separator());
        line3.extend(key_desc("N", &format!("Metronome {}", on_off(view.metronome.enabled))));
        line3.push(separator());
        line3.extend(key_desc("A", &format!("Click {}", on_off(view.metronome.audible))));
        line3.push(separator());
        line3.extend(key_desc(
            "W",
            &format!("While looping {}", on_off(view.metronome.while_looping)),
        ));

        let status = Line::from(vec![
            Span::styled(
                format!(" BPM: {}{} ", view.bpm, if view.bpm_locked { " (locked)" } else { "" }),
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!(" Count-in: {} ", view.count_in_beats),
                Style::default()
                    .fg(Color::Green)
                    .add_modifier(Modifier::BOLD),
            ),
        ]);

        let footer = Paragraph::new(vec![
            Line::from(line1),
            Line::from(line2),
            Line::from(line3),
            status,
        ])
        .block(Block::default().borders(Borders::ALL).title("Controls"));

        f.render_widget(footer, area);
    }
}

/// Fully saturated colour for a hue in degrees.
fn hue_to_rgb(hue: f32) -> (u8, u8, u8) {
    let h = hue.rem_euclid(360.0) / 60.0;
    let x = 1.0 - (h % 2.0 - 1.0).abs();
    let (r, g, b) = match h as u32 {
        0 => (1.0, x, 0.0),
        1 => (x, 1.0, 0.0),
        2 => (0.0, 1.0, x),
        3 => (0.0, x, 1.0),
        4 => (x, 0.0, 1.0),
        _ => (1.0, 0.0, x),
    };
    let scale = |v: f32| (v * 255.0).round() as u8;
    (scale(r), scale(g), scale(b))
}

impl Drop for TerminalUI {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(
            self.terminal.backend_mut(),
            LeaveAlternateScreen,
            DisableMouseCapture
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hue_to_rgb() {
        assert_eq!(hue_to_rgb(0.0), (255, 0, 0));
        assert_eq!(hue_to_rgb(120.0), (0, 255, 0));
        assert_eq!(hue_to_rgb(240.0), (0, 0, 255));
        assert_eq!(hue_to_rgb(360.0), (255, 0, 0));
    }
}
