//! Device Information service reads
//!
//! The four DIS characteristics are read one at a time, in a fixed order, on a
//! client link that has just finished subscribing. A failed read leaves its
//! field empty and the sequence moves on.

use core::fmt;

use uuid::Uuid;

use crate::protocol::{
    DEVICE_INFO_FIRMWARE_UUID, DEVICE_INFO_HARDWARE_UUID, DEVICE_INFO_MANUFACTURER_UUID,
    DEVICE_INFO_MODEL_UUID,
};

/// Characteristics read, in order
pub const READ_ORDER: [Uuid; 4] = [
    DEVICE_INFO_MANUFACTURER_UUID,
    DEVICE_INFO_MODEL_UUID,
    DEVICE_INFO_HARDWARE_UUID,
    DEVICE_INFO_FIRMWARE_UUID,
];

/// Contents of a remote Device Information service
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfoRecord {
    pub manufacturer: String,
    pub model: String,
    pub hardware_revision: String,
    pub firmware_revision: String,
}

impl fmt::Display for DeviceInfoRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Manufacturer : {}", self.manufacturer)?;
        writeln!(f, "Model        : {}", self.model)?;
        writeln!(f, "Firmware     : {}", self.firmware_revision)
    }
}

/// Progress of the read sequence on one link
#[derive(Debug, Clone, Default)]
pub struct DeviceInfoReader {
    record: DeviceInfoRecord,
    step: usize,
}

impl DeviceInfoReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Characteristic to read next, `None` once all four responses are in
    pub fn next_characteristic(&self) -> Option<Uuid> {
        READ_ORDER.get(self.step).copied()
    }

    /// Store a read response and advance
    ///
    /// Responses for any characteristic other than the expected one are
    /// ignored and return `false`.
    pub fn accept(&mut self, characteristic: Uuid, value: Option<&[u8]>) -> bool {
        if self.next_characteristic() != Some(characteristic) {
            return false;
        }

        let text = value
            .map(|bytes| String::from_utf8_lossy(bytes).trim_end_matches('\0').to_string())
            .unwrap_or_default();

        match self.step {
            0 => self.record.manufacturer = text,
            1 => self.record.model = text,
            2 => self.record.hardware_revision = text,
            _ => self.record.firmware_revision = text,
        }
        self.step += 1;
        true
    }

    pub fn is_complete(&self) -> bool {
        self.step >= READ_ORDER.len()
    }

    /// Finished record, available only after the fourth response
    pub fn finish(self) -> Option<DeviceInfoRecord> {
        self.is_complete().then_some(self.record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_in_order() {
        let mut reader = DeviceInfoReader::new();
        assert_eq!(reader.next_characteristic(), Some(DEVICE_INFO_MANUFACTURER_UUID));

        // Out of order response is ignored
        assert!(!reader.accept(DEVICE_INFO_MODEL_UUID, Some(b"X")));

        assert!(reader.accept(DEVICE_INFO_MANUFACTURER_UUID, Some(b"Acme")));
        assert!(reader.accept(DEVICE_INFO_MODEL_UUID, Some(b"U1")));
        assert!(reader.accept(DEVICE_INFO_HARDWARE_UUID, None));
        assert!(!reader.is_complete());
        assert!(reader.accept(DEVICE_INFO_FIRMWARE_UUID, Some(b"1.2\0")));
        assert_eq!(reader.next_characteristic(), None);

        let record = reader.finish().unwrap();
        assert_eq!(record.manufacturer, "Acme");
        assert_eq!(record.hardware_revision, "");
        assert_eq!(record.firmware_revision, "1.2");
    }

    #[test]
    fn test_incomplete_reader_has_no_record() {
        let mut reader = DeviceInfoReader::new();
        reader.accept(DEVICE_INFO_MANUFACTURER_UUID, Some(b"Acme"));
        assert!(reader.finish().is_none());
    }

    #[test]
    fn test_render_format() {
        let record = DeviceInfoRecord {
            manufacturer: "Acme".into(),
            model: "U1".into(),
            hardware_revision: "B".into(),
            firmware_revision: "1.2".into(),
        };
        assert_eq!(
            record.to_string(),
            "Manufacturer : Acme\nModel        : U1\nFirmware     : 1.2\n"
        );
    }
}
