// src/main.rs
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]
mod config;
mod godirect;
mod gui;
mod recorder;
mod sensor;

use std::path::Path;

use anyhow::{anyhow, Result};
use eframe::egui;
use log::info;

use crate::config::Config;
use crate::godirect::GoDirectLink;
use crate::sensor::{SensorLink, SimulatedSensor};

const CONFIG_FILE: &str = "sensorlog.json";

fn open_sensor(config: &Config) -> Result<Box<dyn SensorLink>> {
    if config.connection == "sim" {
        info!("using the simulated sensor");
        return Ok(Box::new(SimulatedSensor::new()));
    }
    let link = GoDirectLink::open(&config.connection, &config.device_to_open, &config.channels)?;
    Ok(Box::new(link))
}

fn main() -> Result<()> {
    env_logger::init();
    let config = Config::load(Path::new(CONFIG_FILE))?;
    // Opened once, up front; if the device is unreachable the app exits here
    // with the context chain as the message.
    let sensor = open_sensor(&config)?;

    let viewport = egui::ViewportBuilder::default()
        .with_inner_size([900.0, 600.0])
        .with_min_inner_size([640.0, 420.0])
        .with_title("Sensor Data Logger");
    let options = eframe::NativeOptions {
        viewport,
        ..Default::default()
    };
    eframe::run_native(
        "Sensor Data Logger",
        options,
        Box::new(move |_cc| Box::new(gui::SensorApp::new(&config, sensor))),
    )
    .map_err(|err| anyhow!("could not start the UI: {err}"))
}
