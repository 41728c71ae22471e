//! Minimal binding to the vendor Go Direct shared library.
//!
//! Covers the subset of the C API the logger needs: open one device by name,
//! select the channels to acquire, start/stop periodic acquisition, and poll
//! a single measurement. The handle is constructed once in `main` and passed
//! to the app; there is no global driver state.

use std::ffi::CString;
use std::os::raw::{c_char, c_double, c_int, c_uint};

use anyhow::{anyhow, Context, Result};
use libloading::Library;
use log::{info, warn};

use crate::sensor::{Reading, SensorLink};

#[cfg(target_os = "windows")]
const LIBRARY_NAME: &str = "GoDirect.dll";
#[cfg(target_os = "macos")]
const LIBRARY_NAME: &str = "libGoDirect.dylib";
#[cfg(all(unix, not(target_os = "macos")))]
const LIBRARY_NAME: &str = "libGoDirect.so";

const TRANSPORT_USB: c_int = 0;
const TRANSPORT_BLE: c_int = 1;

struct GoDirectApi {
    #[allow(dead_code)]
    lib: Library,
    open: unsafe extern "C" fn(c_int, *const c_char) -> c_int,
    select_sensors: unsafe extern "C" fn(*const c_int, c_int) -> c_int,
    start: unsafe extern "C" fn(c_uint) -> c_int,
    read: unsafe extern "C" fn(*mut c_double, c_int) -> c_int,
    stop: unsafe extern "C" fn() -> c_int,
    close: unsafe extern "C" fn() -> c_int,
}

impl GoDirectApi {
    fn load() -> Result<Self> {
        // The vendor library must ship next to the executable.
        let lib = unsafe { Library::new(LIBRARY_NAME) }
            .with_context(|| format!("{LIBRARY_NAME} not found in working directory"))?;
        // Safety: signatures match the published Go Direct C API.
        unsafe {
            Ok(Self {
                open: *lib.get(b"gdx_open\0")?,
                select_sensors: *lib.get(b"gdx_select_sensors\0")?,
                start: *lib.get(b"gdx_start\0")?,
                read: *lib.get(b"gdx_read\0")?,
                stop: *lib.get(b"gdx_stop\0")?,
                close: *lib.get(b"gdx_close\0")?,
                lib,
            })
        }
    }

    fn check(code: c_int, ctx: &str) -> Result<()> {
        if code == 0 {
            Ok(())
        } else {
            Err(anyhow!("{ctx} failed (Go Direct code {code})"))
        }
    }
}

/// Owned connection to one Go Direct device.
pub struct GoDirectLink {
    api: GoDirectApi,
    started: bool,
}

impl GoDirectLink {
    /// Opens the device and selects the channels to acquire. Failure here is
    /// fatal to the application; there is no recovery path.
    pub fn open(connection: &str, device: &str, channels: &[u32]) -> Result<Self> {
        let transport = match connection {
            "usb" => TRANSPORT_USB,
            "ble" => TRANSPORT_BLE,
            other => return Err(anyhow!("unknown connection type {other:?}")),
        };
        let api = GoDirectApi::load()?;
        let name = CString::new(device).context("device name contains a NUL byte")?;
        GoDirectApi::check(unsafe { (api.open)(transport, name.as_ptr()) }, "gdx_open")
            .with_context(|| format!("could not open {device:?} over {connection}"))?;
        let ids: Vec<c_int> = channels.iter().map(|&c| c as c_int).collect();
        GoDirectApi::check(
            unsafe { (api.select_sensors)(ids.as_ptr(), ids.len() as c_int) },
            "gdx_select_sensors",
        )?;
        info!("opened {device:?} over {connection}, channels {channels:?}");
        Ok(Self {
            api,
            started: false,
        })
    }
}

impl SensorLink for GoDirectLink {
    fn start(&mut self, period_ms: u32) -> Result<()> {
        GoDirectApi::check(unsafe { (self.api.start)(period_ms) }, "gdx_start")?;
        self.started = true;
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Reading>> {
        let mut values = [0.0 as c_double; 2];
        let count = unsafe { (self.api.read)(values.as_mut_ptr(), values.len() as c_int) };
        match count {
            n if n < 0 => Err(anyhow!("gdx_read failed (Go Direct code {n})")),
            // Nothing ready this period.
            0 => Ok(None),
            // Force only; the belt had no fresh rate.
            1 => Ok(Some(Reading {
                force: values[0],
                respiration: f64::NAN,
            })),
            _ => Ok(Some(Reading {
                force: values[0],
                respiration: values[1],
            })),
        }
    }

    fn stop(&mut self) -> Result<()> {
        if !self.started {
            return Ok(());
        }
        self.started = false;
        GoDirectApi::check(unsafe { (self.api.stop)() }, "gdx_stop")
    }

    fn close(&mut self) {
        if let Err(err) = self.stop() {
            warn!("stopping acquisition during teardown: {err:#}");
        }
        if let Err(err) = GoDirectApi::check(unsafe { (self.api.close)() }, "gdx_close") {
            warn!("closing device: {err:#}");
        }
    }
}
