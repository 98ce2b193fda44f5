// DBC catalog loader
use crate::domain::catalog::{ByteOrder, Catalog, MessageDef, Multiplex, SignalSpec};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use thiserror::Error;

/// Bit 31 of a DBC message id flags an extended (29-bit) identifier.
const EXTENDED_ID_FLAG: u32 = 0x8000_0000;

static MESSAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^BO_\s+(\d+)\s+(\w+)\s*:\s*(\d+)\s*(\w*)").expect("valid message regex")
});

static SIGNAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^SG_\s+(\w+)(?:\s+(M|m\d+M?))?\s*:\s*(\d+)\|(\d+)@([01])([+-])\s*\(\s*([^,]+?)\s*,\s*([^)]+?)\s*\)\s*\[\s*([^|\]]*?)\s*\|\s*([^\]]*?)\s*\]\s*"([^"]*)""#,
    )
    .expect("valid signal regex")
});

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("catalog defines no messages")]
    Empty,
}

pub fn load_catalog(path: &Path) -> Result<Catalog, CatalogError> {
    let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let catalog = parse_catalog(&text)?;

    tracing::info!(
        "Loaded catalog {} ({} messages, {} signals)",
        path.display(),
        catalog.message_count(),
        catalog.signal_count()
    );
    Ok(catalog)
}

/// Parse the `BO_`/`SG_` sections of a DBC file; every other section is ignored.
pub fn parse_catalog(text: &str) -> Result<Catalog, CatalogError> {
    let mut catalog = Catalog::new();
    let mut current: Option<MessageDef> = None;

    for (index, raw_line) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw_line.trim();

        if line.starts_with("BO_ ") || line == "BO_" {
            if let Some(message) = current.take() {
                catalog.insert(message);
            }
            current = Some(parse_message(line, line_no)?);
        } else if line.starts_with("SG_ ") {
            let signal = parse_signal(line, line_no)?;
            match current.as_mut() {
                Some(message) => message.signals.push(signal),
                None => {
                    return Err(CatalogError::Parse {
                        line: line_no,
                        message: format!("signal {} appears before any message", signal.name),
                    });
                }
            }
        }
    }

    if let Some(message) = current.take() {
        catalog.insert(message);
    }

    if catalog.message_count() == 0 {
        return Err(CatalogError::Empty);
    }
    Ok(catalog)
}

fn parse_message(line: &str, line_no: usize) -> Result<MessageDef, CatalogError> {
    let caps = MESSAGE_RE.captures(line).ok_or_else(|| CatalogError::Parse {
        line: line_no,
        message: format!("malformed message definition: {}", line),
    })?;

    let raw_id: u32 = parse_field(&caps[1], "message id", line_no)?;
    let length: usize = parse_field(&caps[3], "message length", line_no)?;

    Ok(MessageDef::new(raw_id & !EXTENDED_ID_FLAG, &caps[2], length))
}

fn parse_signal(line: &str, line_no: usize) -> Result<SignalSpec, CatalogError> {
    let caps = SIGNAL_RE.captures(line).ok_or_else(|| CatalogError::Parse {
        line: line_no,
        message: format!("malformed signal definition: {}", line),
    })?;

    let multiplex = match caps.get(2).map(|m| m.as_str()) {
        None => Multiplex::None,
        Some("M") => Multiplex::Multiplexor,
        // m<k>M is an extended multiplexor that is itself selected by k
        Some(tag) => Multiplex::Multiplexed(parse_field(
            tag[1..].trim_end_matches('M'),
            "multiplexer value",
            line_no,
        )?),
    };

    let start_bit: u16 = parse_field(&caps[3], "start bit", line_no)?;
    let bit_length: u16 = parse_field(&caps[4], "bit length", line_no)?;
    if bit_length == 0 || bit_length > 64 {
        return Err(CatalogError::Parse {
            line: line_no,
            message: format!("bit length {} out of range", bit_length),
        });
    }

    let byte_order = if &caps[5] == "1" {
        ByteOrder::LittleEndian
    } else {
        ByteOrder::BigEndian
    };

    let scale: f64 = parse_field(&caps[7], "scale", line_no)?;
    let offset: f64 = parse_field(&caps[8], "offset", line_no)?;

    let mut spec = SignalSpec::new(&caps[1], start_bit, bit_length, byte_order)
        .signed(&caps[6] == "-")
        .scaled(scale, offset)
        .multiplexed(multiplex);
    spec.unit = caps[11].to_string();
    Ok(spec)
}

fn parse_field<T: std::str::FromStr>(text: &str, what: &str, line_no: usize) -> Result<T, CatalogError> {
    text.trim().parse().map_err(|_| CatalogError::Parse {
        line: line_no,
        message: format!("invalid {}: {}", what, text),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"VERSION ""

NS_ :
    CM_

BU_: ESP ECU

BO_ 256 WheelPressures: 8 ESP
 SG_ FL_Pressure : 0|16@1+ (0.1,0) [0|6553.5] "bar" ECU
 SG_ FR_Pressure : 16|16@1+ (0.1,0) [0|6553.5] "bar" ECU
 SG_ RL_Pressure : 32|16@1+ (0.1,0) [0|6553.5] "bar" ECU
 SG_ RR_Pressure : 48|16@1+ (0.1,0) [0|6553.5] "bar" ECU

BO_ 2147484160 PedalExt: 4 ECU
 SG_ Travel : 7|16@0- (0.01,-5) [-327.68|327.67] "mm" ESP

BO_ 768 Diag: 8 ECU
 SG_ Page M : 0|8@1+ (1,0) [0|255] "" ESP
 SG_ Temp m1 : 8|8@1- (1,-40) [-40|215] "degC" ESP

CM_ SG_ 256 FL_Pressure "front left";
"#;

    #[test]
    fn test_parse_catalog() {
        let catalog = parse_catalog(SAMPLE).unwrap();
        assert_eq!(catalog.message_count(), 3);
        assert_eq!(catalog.signal_count(), 7);

        let wheels = catalog.message(256).unwrap();
        assert_eq!(wheels.length, 8);
        assert_eq!(wheels.signals[1].name, "FR_Pressure");
        assert_eq!(wheels.signals[1].start_bit, 16);
        assert_eq!(wheels.signals[1].scale, 0.1);
        assert_eq!(wheels.signals[1].unit, "bar");
    }

    #[test]
    fn test_extended_id_and_motorola_signal() {
        let catalog = parse_catalog(SAMPLE).unwrap();
        let pedal = catalog.message(0x200).unwrap();
        let travel = &pedal.signals[0];

        assert_eq!(travel.byte_order, ByteOrder::BigEndian);
        assert!(travel.signed);
        assert_eq!(travel.offset, -5.0);
    }

    #[test]
    fn test_multiplex_markers() {
        let catalog = parse_catalog(SAMPLE).unwrap();
        let diag = catalog.message(768).unwrap();
        assert_eq!(diag.signals[0].multiplex, Multiplex::Multiplexor);
        assert_eq!(diag.signals[1].multiplex, Multiplex::Multiplexed(1));
    }

    #[test]
    fn test_signal_before_message_is_an_error() {
        let err = parse_catalog(" SG_ X : 0|8@1+ (1,0) [0|1] \"\" ECU\n").unwrap_err();
        assert!(matches!(err, CatalogError::Parse { line: 1, .. }));
    }

    #[test]
    fn test_malformed_signal_reports_line() {
        let text = "BO_ 1 M: 8 ECU\n SG_ Broken : x|8@1+ (1,0) [0|1] \"\" ECU\n";
        let err = parse_catalog(text).unwrap_err();
        assert!(matches!(err, CatalogError::Parse { line: 2, .. }));
    }

    #[test]
    fn test_mux_tag_needs_whitespace() {
        let text = "BO_ 1 M: 8 ECU\n SG_ Sigm1 : 0|8@1+ (1,0) [0|1] \"\" ECU\n";
        let catalog = parse_catalog(text).unwrap();
        let signal = &catalog.message(1).unwrap().signals[0];
        assert_eq!(signal.name, "Sigm1");
        assert_eq!(signal.multiplex, Multiplex::None);
    }

    #[test]
    fn test_extended_mux_tag() {
        let text = "BO_ 1 M: 8 ECU\n SG_ Page M : 0|8@1+ (1,0) [0|255] \"\" ECU\n SG_ Sub m1M : 8|8@1+ (1,0) [0|255] \"\" ECU\n";
        let catalog = parse_catalog(text).unwrap();
        let signals = &catalog.message(1).unwrap().signals;
        assert_eq!(signals[0].multiplex, Multiplex::Multiplexor);
        assert_eq!(signals[1].name, "Sub");
        assert_eq!(signals[1].multiplex, Multiplex::Multiplexed(1));
    }

    #[test]
    fn test_empty_catalog() {
        assert!(matches!(parse_catalog("VERSION \"\"\n"), Err(CatalogError::Empty)));
    }
}
