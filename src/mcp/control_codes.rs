//! The closed set of named control codes accepted by `write_input`.

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedCode {
    Enter,
    Return,
    Tab,
    Escape,
    Backspace,
    CtrlA,
    CtrlB,
    CtrlC,
    CtrlD,
    CtrlE,
    CtrlF,
    CtrlG,
    CtrlH,
    CtrlK,
    CtrlL,
    CtrlN,
    CtrlO,
    CtrlP,
    CtrlQ,
    CtrlR,
    CtrlS,
    CtrlT,
    CtrlU,
    CtrlV,
    CtrlW,
    CtrlX,
    CtrlY,
    CtrlZ,
    ArrowUp,
    ArrowDown,
    ArrowRight,
    ArrowLeft,
}

impl NamedCode {
    pub fn as_bytes(&self) -> &'static [u8] {
        use NamedCode::*;
        match self {
            Enter => b"\n",
            Return => b"\r",
            Tab => b"\t",
            Escape => b"\x1b",
            Backspace => b"\x7f",
            CtrlA => b"\x01",
            CtrlB => b"\x02",
            CtrlC => b"\x03",
            CtrlD => b"\x04",
            CtrlE => b"\x05",
            CtrlF => b"\x06",
            CtrlG => b"\x07",
            CtrlH => b"\x08",
            CtrlK => b"\x0b",
            CtrlL => b"\x0c",
            CtrlN => b"\x0e",
            CtrlO => b"\x0f",
            CtrlP => b"\x10",
            CtrlQ => b"\x11",
            CtrlR => b"\x12",
            CtrlS => b"\x13",
            CtrlT => b"\x14",
            CtrlU => b"\x15",
            CtrlV => b"\x16",
            CtrlW => b"\x17",
            CtrlX => b"\x18",
            CtrlY => b"\x19",
            CtrlZ => b"\x1a",
            ArrowUp => b"\x1b[A",
            ArrowDown => b"\x1b[B",
            ArrowRight => b"\x1b[C",
            ArrowLeft => b"\x1b[D",
        }
    }

    pub fn description(&self) -> &'static str {
        use NamedCode::*;
        match self {
            Enter => "Line feed (0x0A); alias Ctrl+J",
            Return => "Carriage return (0x0D); alias Ctrl+M",
            Tab => "Horizontal tab (0x09); alias Ctrl+I",
            Escape => "Escape (0x1B); alias Ctrl+[",
            Backspace => "Delete (0x7F)",
            CtrlA => "Start of heading (0x01)",
            CtrlB => "Start of text (0x02)",
            CtrlC => "Interrupt (0x03); alias Interrupt",
            CtrlD => "End of transmission (0x04); alias EOF",
            CtrlE => "Enquiry (0x05)",
            CtrlF => "Acknowledge (0x06)",
            CtrlG => "Bell (0x07)",
            CtrlH => "Backspace (0x08)",
            CtrlK => "Vertical tab (0x0B)",
            CtrlL => "Form feed / clear screen (0x0C)",
            CtrlN => "Shift out (0x0E)",
            CtrlO => "Shift in (0x0F)",
            CtrlP => "Data link escape (0x10)",
            CtrlQ => "Device control 1 / resume (0x11)",
            CtrlR => "Device control 2 / reverse search (0x12)",
            CtrlS => "Device control 3 / pause (0x13)",
            CtrlT => "Device control 4 (0x14)",
            CtrlU => "Negative acknowledge / clear line (0x15)",
            CtrlV => "Synchronous idle (0x16)",
            CtrlW => "End of transmission block / delete word (0x17)",
            CtrlX => "Cancel (0x18)",
            CtrlY => "End of medium (0x19)",
            CtrlZ => "Substitute / suspend (0x1A)",
            ArrowUp => "Cursor up (ESC [ A)",
            ArrowDown => "Cursor down (ESC [ B)",
            ArrowRight => "Cursor right (ESC [ C)",
            ArrowLeft => "Cursor left (ESC [ D)",
        }
    }

    /// Resolves a code by name, including the `EOF`/`Interrupt`/`Ctrl+[`
    /// aliases and the `Ctrl+I`/`Ctrl+J`/`Ctrl+M` aliases for
    /// `Tab`/`Enter`/`Return` (the control-code and named-key forms of
    /// the same byte).
    pub fn from_name(name: &str) -> Option<Self> {
        use NamedCode::*;
        Some(match name {
            "Enter" | "Ctrl+J" => Enter,
            "Return" | "Ctrl+M" => Return,
            "Tab" | "Ctrl+I" => Tab,
            "Escape" | "Ctrl+[" => Escape,
            "Backspace" => Backspace,
            "Ctrl+A" => CtrlA,
            "Ctrl+B" => CtrlB,
            "Ctrl+C" | "Interrupt" => CtrlC,
            "Ctrl+D" | "EOF" => CtrlD,
            "Ctrl+E" => CtrlE,
            "Ctrl+F" => CtrlF,
            "Ctrl+G" => CtrlG,
            "Ctrl+H" => CtrlH,
            "Ctrl+K" => CtrlK,
            "Ctrl+L" => CtrlL,
            "Ctrl+N" => CtrlN,
            "Ctrl+O" => CtrlO,
            "Ctrl+P" => CtrlP,
            "Ctrl+Q" => CtrlQ,
            "Ctrl+R" => CtrlR,
            "Ctrl+S" => CtrlS,
            "Ctrl+T" => CtrlT,
            "Ctrl+U" => CtrlU,
            "Ctrl+V" => CtrlV,
            "Ctrl+W" => CtrlW,
            "Ctrl+X" => CtrlX,
            "Ctrl+Y" => CtrlY,
            "Ctrl+Z" => CtrlZ,
            "ArrowUp" => ArrowUp,
            "ArrowDown" => ArrowDown,
            "ArrowRight" => ArrowRight,
            "ArrowLeft" => ArrowLeft,
            _ => return None,
        })
    }

    pub fn all() -> &'static [NamedCode] {
        use NamedCode::*;
        &[
            Enter, Return, Tab, Escape, Backspace, CtrlA, CtrlB, CtrlC, CtrlD, CtrlE, CtrlF,
            CtrlG, CtrlH, CtrlK, CtrlL, CtrlN, CtrlO, CtrlP, CtrlQ, CtrlR, CtrlS, CtrlT, CtrlU,
            CtrlV, CtrlW, CtrlX, CtrlY, CtrlZ, ArrowUp, ArrowDown, ArrowRight, ArrowLeft,
        ]
    }
}

/// Either a name from the closed set or a raw byte string of length ≤4.
#[derive(Debug, Clone)]
pub enum CtrlCode {
    Named(NamedCode),
    Raw(Vec<u8>),
}

impl CtrlCode {
    pub fn resolve(input: &str) -> Result<Self, AppError> {
        if let Some(named) = NamedCode::from_name(input) {
            return Ok(CtrlCode::Named(named));
        }
        let bytes = input.as_bytes();
        if !bytes.is_empty() && bytes.len() <= 4 {
            return Ok(CtrlCode::Raw(bytes.to_vec()));
        }
        Err(AppError::Validation(format!(
            "unknown control code '{input}'"
        )))
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            CtrlCode::Named(code) => code.as_bytes(),
            CtrlCode::Raw(bytes) => bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_named_aliases() {
        assert_eq!(NamedCode::from_name("EOF"), Some(NamedCode::CtrlD));
        assert_eq!(NamedCode::from_name("Interrupt"), Some(NamedCode::CtrlC));
        assert_eq!(NamedCode::from_name("Ctrl+["), Some(NamedCode::Escape));
    }

    #[test]
    fn resolves_ctrl_i_j_m_aliases() {
        assert_eq!(NamedCode::from_name("Ctrl+I"), Some(NamedCode::Tab));
        assert_eq!(NamedCode::from_name("Ctrl+J"), Some(NamedCode::Enter));
        assert_eq!(NamedCode::from_name("Ctrl+M"), Some(NamedCode::Return));
        assert_eq!(CtrlCode::resolve("Ctrl+I").unwrap().as_bytes(), b"\t");
        assert_eq!(CtrlCode::resolve("Ctrl+J").unwrap().as_bytes(), b"\n");
        assert_eq!(CtrlCode::resolve("Ctrl+M").unwrap().as_bytes(), b"\r");
    }

    #[test]
    fn unknown_name_falls_back_to_raw_when_short() {
        let resolved = CtrlCode::resolve("xy").unwrap();
        assert_eq!(resolved.as_bytes(), b"xy");
    }

    #[test]
    fn overlong_unknown_name_is_rejected() {
        assert!(CtrlCode::resolve("not-a-code").is_err());
    }

    #[test]
    fn every_named_code_round_trips_through_bytes() {
        for code in NamedCode::all() {
            assert!(!code.as_bytes().is_empty());
            assert!(!code.description().is_empty());
        }
    }
}
