use crate::db::models as dbm;
use crate::db::store::{DoseStore, StoreError};
use crate::models::dose::{DeviceKind, device_label, fits_dose_column};
use chrono::NaiveDate;
use log::{debug, info, warn};
use rust_decimal::Decimal;

/// Register a hardware/firmware version for `kind`; returns the existing row if already known.
pub fn ensure_device_version<S: DoseStore>(
    store: &mut S,
    kind: DeviceKind,
    version: &str,
) -> Result<dbm::DeviceVersion, String> {
    let version = version.trim();
    if version.is_empty() {
        return Err("device version cannot be empty".to_string());
    }
    if let Some(existing) = store
        .find_device_version(kind, version)
        .map_err(|e| format!("lookup {} version {} failed: {}", kind, version, e))?
    {
        debug!("Refs: {} version {} already registered (id={})", kind, version, existing.id);
        return Ok(existing);
    }

    let saved = store
        .insert_device_version(dbm::NewDeviceVersion {
            kind: kind.as_str().to_string(),
            version: version.to_string(),
        })
        .map_err(|e| format!("insert {} version {} failed: {}", kind, version, e))?;
    info!("Refs: registered {} version {} (id={})", kind, version, saved.id);
    Ok(saved)
}

/// Register a physical device; the version, when given, must already exist.
pub fn ensure_device<S: DoseStore>(
    store: &mut S,
    kind: DeviceKind,
    version: Option<&str>,
    serial: &str,
) -> Result<dbm::Device, String> {
    let serial = serial.trim();
    if serial.is_empty() {
        return Err("serial number cannot be empty".to_string());
    }
    let version_id = match version {
        Some(v) => Some(
            store
                .find_device_version(kind, v)
                .map_err(|e| format!("lookup {} version {} failed: {}", kind, v, e))?
                .ok_or_else(|| format!("{} version {} is not registered", kind, v))?
                .id,
        ),
        None => None,
    };
    let label = device_label(kind, version, serial);

    if let Some(existing) = store
        .find_device(kind, version_id, serial)
        .map_err(|e| format!("lookup device {} failed: {}", label, e))?
    {
        debug!("Refs: device {} already registered (id={})", label, existing.id);
        return Ok(existing);
    }

    let saved = store
        .insert_device(dbm::NewDevice {
            kind: kind.as_str().to_string(),
            version_id,
            serial_num: serial.to_string(),
        })
        .map_err(|e| format!("insert device {} failed: {}", label, e))?;
    info!("Refs: registered device {} (id={})", label, saved.id);
    Ok(saved)
}

pub fn add_calibration<S: DoseStore>(
    store: &mut S,
    device_id: i64,
    effective_from: NaiveDate,
    low_let_coefficient: Decimal,
    high_let_coefficient: Decimal,
) -> Result<dbm::Calibration, String> {
    let device = store
        .device(device_id)
        .map_err(|e| format!("calibration target: {}", e))?;
    for (name, value) in [("low-LET", low_let_coefficient), ("high-LET", high_let_coefficient)] {
        if !fits_dose_column(value) {
            return Err(format!("{} coefficient {} is out of range", name, value));
        }
    }
    if device.kind != DeviceKind::Telemetry.as_str() {
        warn!(
            "Refs: calibrating device {} of kind {}; only {} files use calibrations",
            device.id,
            device.kind,
            DeviceKind::Telemetry
        );
    }

    let saved = store
        .insert_calibration(dbm::NewCalibration {
            device_id,
            effective_from,
            low_let_coefficient,
            high_let_coefficient,
        })
        .map_err(|e| format!("insert calibration failed: {}", e))?;
    info!(
        "Refs: calibration {} for device {} from {} (low={}, high={})",
        saved.id, device_id, effective_from, low_let_coefficient, high_let_coefficient
    );
    Ok(saved)
}

/// Human-readable `<Name>-[<version>-]<serial>` label of a stored device.
pub fn describe_device<S: DoseStore>(store: &mut S, device: &dbm::Device) -> Result<String, StoreError> {
    let version = match device.version_id {
        Some(id) => Some(store.device_version(id)?.version),
        None => None,
    };
    Ok(match device.kind.parse::<DeviceKind>() {
        Ok(kind) => device_label(kind, version.as_deref(), &device.serial_num),
        Err(_) => format!("{}-{}", device.kind, device.serial_num),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use std::str::FromStr;

    #[test]
    fn registration_is_idempotent() {
        let mut store = MemoryStore::default();
        let v1 = ensure_device_version(&mut store, DeviceKind::GammaNeutron, "v2").unwrap();
        let v2 = ensure_device_version(&mut store, DeviceKind::GammaNeutron, " v2 ").unwrap();
        assert_eq!(v1.id, v2.id);

        let d1 = ensure_device(&mut store, DeviceKind::GammaNeutron, Some("v2"), "1234567").unwrap();
        let d2 = ensure_device(&mut store, DeviceKind::GammaNeutron, Some("v2"), "1234567").unwrap();
        assert_eq!(d1.id, d2.id);
        assert_eq!(d1.version_id, Some(v1.id));

        // same serial without a version is a different device
        let d3 = ensure_device(&mut store, DeviceKind::GammaNeutron, None, "1234567").unwrap();
        assert_ne!(d1.id, d3.id);
        assert_eq!(store.devices.len(), 2);
    }

    #[test]
    fn device_needs_registered_version() {
        let mut store = MemoryStore::default();
        let err = ensure_device(&mut store, DeviceKind::Spectrometer, Some("x"), "77").unwrap_err();
        assert!(err.contains("not registered"), "{}", err);
        assert!(store.devices.is_empty());
    }

    #[test]
    fn calibration_checks_device_and_range() {
        let mut store = MemoryStore::default();
        let dev = ensure_device(&mut store, DeviceKind::Telemetry, None, "0042").unwrap();
        let from = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let low = Decimal::from_str("1.5").unwrap();

        assert!(add_calibration(&mut store, dev.id + 100, from, low, low).is_err());
        assert!(add_calibration(&mut store, dev.id, from, Decimal::from(10_000_000), low).is_err());
        let cal = add_calibration(&mut store, dev.id, from, low, Decimal::from(2)).unwrap();
        assert_eq!(cal.device_id, dev.id);
        assert_eq!(store.calibrations.len(), 1);
    }

    #[test]
    fn labels_stored_devices() {
        let mut store = MemoryStore::default();
        ensure_device_version(&mut store, DeviceKind::Spectrometer, "MDU-5").unwrap();
        let dev = ensure_device(&mut store, DeviceKind::Spectrometer, Some("MDU-5"), "339").unwrap();
        assert_eq!(describe_device(&mut store, &dev).unwrap(), "Liulin-MDU-5-339");
    }
}
