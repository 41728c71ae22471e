// src/gui.rs
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use eframe::egui;
use egui::Color32;
use egui_plot::{Legend, Line, Plot, PlotPoints};
use log::{error, info};

use crate::config::Config;
use crate::recorder::{SessionRecorder, TickOutcome};
use crate::sensor::SensorLink;

#[derive(Clone, Copy, Debug, PartialEq)]
enum RecordingState {
    Idle,
    Recording,
}

/// The application shell: owns the sensor handle and the session recorder,
/// and drives the tick loop from the egui update cycle. Everything runs on
/// the UI thread; a tick runs to completion before the next can fire.
pub struct SensorApp {
    sensor: Box<dyn SensorLink>,
    recorder: SessionRecorder,
    state: RecordingState,
    read_interval: Duration,
    read_period_ms: u32,
    last_tick: Instant,
    status_log: Vec<String>,
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

impl SensorApp {
    pub fn new(config: &Config, sensor: Box<dyn SensorLink>) -> Self {
        let recorder = SessionRecorder::new(
            config.read_interval_seconds,
            config.auto_export_interval_minutes,
            &config.data_dir,
        );
        Self {
            sensor,
            recorder,
            state: RecordingState::Idle,
            read_interval: Duration::from_secs_f64(config.read_interval_seconds),
            read_period_ms: config.read_period_ms(),
            last_tick: Instant::now(),
            status_log: vec!["> Ready.".to_owned()],
        }
    }

    fn log_status(&mut self, msg: impl Into<String>) {
        self.status_log.push(format!("> {}", msg.into()));
        if self.status_log.len() > 8 {
            self.status_log.remove(0);
        }
    }

    fn start_recording(&mut self) {
        if self.state == RecordingState::Recording {
            return;
        }
        if let Err(err) = self.sensor.start(self.read_period_ms) {
            self.log_status(format!("Could not start sensor: {err:#}"));
            return;
        }
        self.recorder.begin_session(unix_now());
        self.last_tick = Instant::now();
        self.state = RecordingState::Recording;
        info!("recording started");
        self.log_status("Recording started.");
    }

    fn stop_recording(&mut self) {
        if self.state != RecordingState::Recording {
            return;
        }
        self.state = RecordingState::Idle;
        if let Err(err) = self.sensor.stop() {
            self.log_status(format!("Sensor stop: {err:#}"));
        }
        // Whatever accumulated since the last auto-export goes out now, even
        // if the session produced nothing.
        match self.recorder.export_and_reset() {
            Ok(Some(path)) => self.log_status(format!("Saved {}", path.display())),
            Ok(None) => self.log_status("Nothing to save."),
            Err(err) => {
                error!("export on stop failed: {err}");
                self.log_status(format!("Export failed: {err}"));
            }
        }
        info!("recording stopped");
    }

    fn tick(&mut self) {
        match self.recorder.ingest_tick(self.sensor.as_mut(), unix_now()) {
            TickOutcome::Skipped | TickOutcome::Appended => {}
            TickOutcome::Exported(path) => {
                self.log_status(format!("Auto-saved {}", path.display()));
            }
            TickOutcome::ExportFailed(err) => {
                error!("auto-export failed: {err}");
                self.log_status(format!("Auto-export failed: {err}"));
            }
        }
    }
}

impl eframe::App for SensorApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if self.state == RecordingState::Recording {
            if self.last_tick.elapsed() >= self.read_interval {
                self.last_tick = Instant::now();
                self.tick();
            }
            // Keep the timer alive even when no input events arrive.
            ctx.request_repaint_after(self.read_interval.saturating_sub(self.last_tick.elapsed()));
        }

        egui::TopBottomPanel::bottom("controls").show(ctx, |ui| {
            ui.add_space(4.0);
            ui.horizontal(|ui| {
                let idle = self.state == RecordingState::Idle;
                if ui
                    .add_enabled(idle, egui::Button::new("Start Recording"))
                    .clicked()
                {
                    self.start_recording();
                }
                if ui
                    .add_enabled(!idle, egui::Button::new("Stop Recording"))
                    .clicked()
                {
                    self.stop_recording();
                }
                if !idle && !self.recorder.is_empty() {
                    ui.label(
                        egui::RichText::new(format!("● {} samples", self.recorder.len()))
                            .color(Color32::RED),
                    );
                }
            });
            egui::ScrollArea::vertical().max_height(80.0).show(ui, |ui| {
                for line in &self.status_log {
                    ui.monospace(line);
                }
            });
            ui.add_space(4.0);
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            let (force, respiration) = self.recorder.series();
            Plot::new("sensor_plot")
                .legend(Legend::default())
                .show(ui, |plot_ui| {
                    plot_ui.line(
                        Line::new(PlotPoints::new(force))
                            .name("Force (N)")
                            .color(Color32::BLUE),
                    );
                    plot_ui.line(
                        Line::new(PlotPoints::new(respiration))
                            .name("Respiration Rate (bpm)")
                            .color(Color32::RED),
                    );
                });
        });
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        self.stop_recording();
        self.sensor.close();
        info!("sensor connection closed");
    }
}
