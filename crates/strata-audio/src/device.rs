//! Device enumeration, grounded on `rf_audio::device`.

use cpal::traits::{DeviceTrait, HostTrait};

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub max_channels: u16,
    pub default_sample_rate: u32,
}

fn host() -> cpal::Host {
    cpal::default_host()
}

pub fn list_output_devices() -> Vec<DeviceInfo> {
    let host = host();
    let default_name = host
        .default_output_device()
        .and_then(|d| d.name().ok());

    let Ok(devices) = host.output_devices() else {
        return Vec::new();
    };

    devices
        .filter_map(|d| {
            let name = d.name().ok()?;
            let cfg = d.default_output_config().ok()?;
            Some(DeviceInfo {
                is_default: Some(&name) == default_name.as_ref(),
                max_channels: cfg.channels(),
                default_sample_rate: cfg.sample_rate().0,
                name,
            })
        })
        .collect()
}

pub fn list_input_devices() -> Vec<DeviceInfo> {
    let host = host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let Ok(devices) = host.input_devices() else {
        return Vec::new();
    };

    devices
        .filter_map(|d| {
            let name = d.name().ok()?;
            let cfg = d.default_input_config().ok()?;
            Some(DeviceInfo {
                is_default: Some(&name) == default_name.as_ref(),
                max_channels: cfg.channels(),
                default_sample_rate: cfg.sample_rate().0,
                name,
            })
        })
        .collect()
}
