// Message catalog domain model - message and signal layouts
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Intel layout, start bit is the least significant bit.
    LittleEndian,
    /// Motorola layout, start bit is the most significant bit in DBC sawtooth numbering.
    BigEndian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Multiplex {
    None,
    Multiplexor,
    Multiplexed(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalSpec {
    pub name: String,
    pub start_bit: u16,
    pub bit_length: u16,
    pub byte_order: ByteOrder,
    pub signed: bool,
    pub scale: f64,
    pub offset: f64,
    pub unit: String,
    pub multiplex: Multiplex,
}

impl SignalSpec {
    pub fn new(name: impl Into<String>, start_bit: u16, bit_length: u16, byte_order: ByteOrder) -> Self {
        Self {
            name: name.into(),
            start_bit,
            bit_length,
            byte_order,
            signed: false,
            scale: 1.0,
            offset: 0.0,
            unit: String::new(),
            multiplex: Multiplex::None,
        }
    }

    pub fn signed(mut self, signed: bool) -> Self {
        self.signed = signed;
        self
    }

    pub fn scaled(mut self, scale: f64, offset: f64) -> Self {
        self.scale = scale;
        self.offset = offset;
        self
    }

    pub fn multiplexed(mut self, multiplex: Multiplex) -> Self {
        self.multiplex = multiplex;
        self
    }

    /// Raw (unscaled, unsigned) bits of this signal in `payload`.
    ///
    /// Payloads shorter than eight bytes are zero padded at the end.
    pub fn extract_raw(&self, payload: &[u8]) -> u64 {
        let mut padded = [0u8; 8];
        let len = payload.len().min(8);
        padded[..len].copy_from_slice(&payload[..len]);

        let length = u32::from(self.bit_length.clamp(1, 64));
        let mask = if length == 64 { u64::MAX } else { (1u64 << length) - 1 };

        match self.byte_order {
            ByteOrder::LittleEndian => {
                let word = u64::from_le_bytes(padded);
                let start = u32::from(self.start_bit);
                if start >= 64 {
                    return 0;
                }
                (word >> start) & mask
            }
            ByteOrder::BigEndian => {
                let word = u64::from_be_bytes(padded);
                let start = u32::from(self.start_bit);
                // Position of the MSB counted from the first transmitted bit.
                let msb = (start / 8) * 8 + (7 - start % 8);
                let lsb = msb + length - 1;
                if lsb >= 64 {
                    return 0;
                }
                (word >> (63 - lsb)) & mask
            }
        }
    }

    /// Convert raw bits to a physical value: `raw * scale + offset`.
    pub fn to_physical(&self, raw: u64) -> f64 {
        let length = u32::from(self.bit_length.clamp(1, 64));
        let value = if self.signed && length < 64 && raw & (1u64 << (length - 1)) != 0 {
            (raw | (u64::MAX << length)) as i64 as f64
        } else if self.signed {
            raw as i64 as f64
        } else {
            raw as f64
        };
        value * self.scale + self.offset
    }

    pub fn decode(&self, payload: &[u8]) -> f64 {
        self.to_physical(self.extract_raw(payload))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageDef {
    pub id: u32,
    pub name: String,
    pub length: usize,
    pub signals: Vec<SignalSpec>,
}

impl MessageDef {
    pub fn new(id: u32, name: impl Into<String>, length: usize) -> Self {
        Self {
            id,
            name: name.into(),
            length,
            signals: Vec::new(),
        }
    }

    pub fn with_signal(mut self, signal: SignalSpec) -> Self {
        self.signals.push(signal);
        self
    }

    pub fn multiplexor(&self) -> Option<&SignalSpec> {
        self.signals
            .iter()
            .find(|s| s.multiplex == Multiplex::Multiplexor)
    }
}

/// Read-only set of message definitions keyed by arbitration id.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    messages: HashMap<u32, MessageDef>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, message: MessageDef) {
        self.messages.insert(message.id, message);
    }

    pub fn with_message(mut self, message: MessageDef) -> Self {
        self.insert(message);
        self
    }

    pub fn message(&self, id: u32) -> Option<&MessageDef> {
        self.messages.get(&id)
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn signal_count(&self) -> usize {
        self.messages.values().map(|m| m.signals.len()).sum()
    }

    /// Signal namespace: ascending message id, definition order, first occurrence wins.
    pub fn signal_names(&self) -> Vec<String> {
        let mut ids: Vec<&u32> = self.messages.keys().collect();
        ids.sort_unstable();

        let mut seen = HashSet::new();
        let mut names = Vec::new();
        for id in ids {
            for signal in &self.messages[id].signals {
                if seen.insert(signal.name.as_str()) {
                    names.push(signal.name.clone());
                }
            }
        }
        names
    }

    pub fn has_signal(&self, name: &str) -> bool {
        self.messages
            .values()
            .any(|m| m.signals.iter().any(|s| s.name == name))
    }

    /// Exact name first, then a case-insensitive match.
    pub fn resolve_signal(&self, name: &str) -> Option<String> {
        let names = self.signal_names();
        if let Some(exact) = names.iter().find(|n| n.as_str() == name) {
            return Some(exact.clone());
        }
        names.into_iter().find(|n| n.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_little_endian_extraction() {
        let spec = SignalSpec::new("speed", 8, 16, ByteOrder::LittleEndian).scaled(0.01, 0.0);
        let payload = [0x00, 0x10, 0x27, 0x00, 0, 0, 0, 0];
        assert_eq!(spec.extract_raw(&payload), 0x2710);
        assert!((spec.decode(&payload) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_big_endian_extraction() {
        // Motorola start bit 7, 16 bits: byte0 is the high byte.
        let spec = SignalSpec::new("pressure", 7, 16, ByteOrder::BigEndian);
        let payload = [0x12, 0x34, 0, 0, 0, 0, 0, 0];
        assert_eq!(spec.extract_raw(&payload), 0x1234);

        // Nibble inside byte 1: start bit 11 (bit 3 of byte 1), 4 bits.
        let nibble = SignalSpec::new("nibble", 11, 4, ByteOrder::BigEndian);
        assert_eq!(nibble.extract_raw(&[0x00, 0xAB]), 0xB);
    }

    #[test]
    fn test_signed_values() {
        let spec = SignalSpec::new("temp", 0, 8, ByteOrder::LittleEndian)
            .signed(true)
            .scaled(0.5, -10.0);
        assert_eq!(spec.decode(&[0xFF]), -10.5);
        assert_eq!(spec.decode(&[0x02]), -9.0);
    }

    #[test]
    fn test_short_payload_is_zero_padded() {
        let spec = SignalSpec::new("tail", 16, 8, ByteOrder::LittleEndian);
        assert_eq!(spec.extract_raw(&[0x01, 0x02]), 0);
    }

    #[test]
    fn test_signal_namespace_order() {
        let catalog = Catalog::new()
            .with_message(
                MessageDef::new(0x200, "Rear", 8)
                    .with_signal(SignalSpec::new("RL_Pressure", 0, 16, ByteOrder::LittleEndian))
                    .with_signal(SignalSpec::new("Shared", 16, 8, ByteOrder::LittleEndian)),
            )
            .with_message(
                MessageDef::new(0x100, "Front", 8)
                    .with_signal(SignalSpec::new("FL_Pressure", 0, 16, ByteOrder::LittleEndian))
                    .with_signal(SignalSpec::new("Shared", 16, 8, ByteOrder::LittleEndian)),
            );

        assert_eq!(catalog.signal_names(), vec!["FL_Pressure", "Shared", "RL_Pressure"]);
        assert_eq!(catalog.signal_count(), 4);
        assert_eq!(catalog.resolve_signal("fl_pressure").as_deref(), Some("FL_Pressure"));
        assert_eq!(catalog.resolve_signal("missing"), None);
    }
}
