use crate::modbus_frame::{ExceptionCode, ENCAPSULATED_INTERFACE, MEI_READ_DEVICE_ID};

pub const READ_BASIC: u8 = 0x01;
pub const READ_REGULAR: u8 = 0x02;
pub const READ_EXTENDED: u8 = 0x03;
pub const READ_INDIVIDUAL: u8 = 0x04;

/// Regular identification, stream and individual access
const CONFORMITY_LEVEL: u8 = 0x82;
const LAST_BASIC_OBJECT: u8 = 0x02;
const LAST_REGULAR_OBJECT: u8 = 0x05;

/// Static identification strings reported by the meter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub vendor_name: String,
    pub product_code: String,
    pub revision: String,
    pub vendor_url: String,
    pub product_name: String,
    pub model_name: String,
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            vendor_name: "VirtualEnergyMeter".to_string(),
            product_code: "VEM".to_string(),
            revision: env!("CARGO_PKG_VERSION").to_string(),
            vendor_url: "https://github.com/Eltonsean69x/virtual-energymeter".to_string(),
            product_name: "Virtual Energy Meter".to_string(),
            model_name: "VEM-Simple-3P".to_string(),
        }
    }
}

/// Objects selected by one Read Device Identification request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentification {
    pub code: u8,
    pub objects: Vec<(u8, String)>,
}

impl DeviceIdentity {
    fn object(&self, id: u8) -> Option<&str> {
        match id {
            0x00 => Some(self.vendor_name.as_str()),
            0x01 => Some(self.product_code.as_str()),
            0x02 => Some(self.revision.as_str()),
            0x03 => Some(self.vendor_url.as_str()),
            0x04 => Some(self.product_name.as_str()),
            0x05 => Some(self.model_name.as_str()),
            _ => None,
        }
    }

    pub fn read(&self, code: u8, object_id: u8) -> Result<DeviceIdentification, ExceptionCode> {
        let last = match code {
            READ_BASIC => LAST_BASIC_OBJECT,
            // No extended objects exist, so an extended read stops at the regular ones
            READ_REGULAR | READ_EXTENDED => LAST_REGULAR_OBJECT,
            READ_INDIVIDUAL => {
                let value = self
                    .object(object_id)
                    .ok_or(ExceptionCode::IllegalDataAddress)?;
                return Ok(DeviceIdentification {
                    code,
                    objects: vec![(object_id, value.to_string())],
                });
            }
            _ => return Err(ExceptionCode::IllegalDataValue),
        };
        let first = if object_id > last { 0 } else { object_id };
        let objects = (first..=last)
            .filter_map(|id| self.object(id).map(|value| (id, value.to_string())))
            .collect();
        Ok(DeviceIdentification { code, objects })
    }
}

impl DeviceIdentification {
    pub fn to_pdu(&self) -> Vec<u8> {
        let mut pdu = vec![
            ENCAPSULATED_INTERFACE,
            MEI_READ_DEVICE_ID,
            self.code,
            CONFORMITY_LEVEL,
            0x00, // more follows
            0x00, // next object id
            self.objects.len() as u8,
        ];
        for (id, value) in &self.objects {
            let bytes = &value.as_bytes()[..value.len().min(u8::MAX as usize)];
            pdu.push(*id);
            pdu.push(bytes.len() as u8);
            pdu.extend_from_slice(bytes);
        }
        pdu
    }
}
