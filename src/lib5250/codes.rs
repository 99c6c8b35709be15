//! TN5250 protocol constants used by the bridge
//!
//! Command codes, orders, AID bytes and field attribute bits, following
//! lib5250's codes5250.h and the 5494 Functions Reference (SC30-3533-04).

/// Escape that precedes every 5250 command inside a record
pub const ESC: u8 = 0x04;

/// 5250 commands (host to workstation)
pub const CMD_CLEAR_UNIT: u8 = 0x40;
pub const CMD_CLEAR_UNIT_ALTERNATE: u8 = 0x20;
pub const CMD_CLEAR_FORMAT_TABLE: u8 = 0x50;
pub const CMD_WRITE_TO_DISPLAY: u8 = 0x11;
pub const CMD_WRITE_ERROR_CODE: u8 = 0x21;
pub const CMD_READ_INPUT_FIELDS: u8 = 0x42;
pub const CMD_READ_MDT_FIELDS: u8 = 0x52;
pub const CMD_READ_SCREEN_IMMEDIATE: u8 = 0x62;
pub const CMD_READ_IMMEDIATE: u8 = 0x72;

/// 5250 orders inside Write To Display
pub const SOH: u8 = 0x01; // Start of header
pub const RA: u8 = 0x02; // Repeat to address
pub const EA: u8 = 0x03; // Erase to address
pub const SBA: u8 = 0x11; // Set buffer address
pub const WEA: u8 = 0x12; // Write extended attribute
pub const IC: u8 = 0x13; // Insert cursor
pub const MC: u8 = 0x14; // Move cursor
pub const SF: u8 = 0x1D; // Start of field

/// GDS record header
pub const GDS_HEADER_LEN: usize = 10;
pub const GDS_RECORD_TYPE: u16 = 0x12A0;
pub const GDS_VAR_HEADER_LEN: u8 = 0x04;
/// The length field is two bytes and counts the header
pub const MAX_RECORD_LEN: usize = u16::MAX as usize;

/// Header flag bits
pub const FLAG_ERR: u8 = 0x80;
pub const FLAG_ATN: u8 = 0x40;
pub const FLAG_SRQ: u8 = 0x04;
pub const FLAG_HLP: u8 = 0x01;

/// Header operation codes
pub const OPCODE_NO_OP: u8 = 0x00;
pub const OPCODE_INVITE: u8 = 0x01;
pub const OPCODE_OUTPUT_ONLY: u8 = 0x02;
pub const OPCODE_PUT_GET: u8 = 0x03;
pub const OPCODE_SAVE_SCREEN: u8 = 0x04;
pub const OPCODE_RESTORE_SCREEN: u8 = 0x05;
pub const OPCODE_READ_IMMEDIATE: u8 = 0x06;
pub const OPCODE_READ_SCREEN: u8 = 0x08;
pub const OPCODE_CANCEL_INVITE: u8 = 0x0A;

/// AID bytes (workstation to host)
pub const AID_ENTER: u8 = 0xF1;
pub const AID_F1: u8 = 0x31;
pub const AID_F13: u8 = 0xB1;
pub const AID_CLEAR: u8 = 0xBD;
pub const AID_HELP: u8 = 0xF3;
pub const AID_ROLL_DOWN: u8 = 0xF4;
pub const AID_ROLL_UP: u8 = 0xF5;
pub const AID_PRINT: u8 = 0xF6;
pub const AID_RECORD_BACKSPACE: u8 = 0xF8;

/// Field format word, first byte. Bits 7-6 are always 01.
pub const FFW_ID_MASK: u8 = 0xC0;
pub const FFW_ID: u8 = 0x40;
pub const FFW_BYPASS: u8 = 0x20;
pub const FFW_MDT: u8 = 0x08;

/// Field control words carry 0b100 in their top bits
pub const FCW_ID_MASK: u8 = 0xE0;
pub const FCW_ID: u8 = 0x80;

/// Display attributes. Bits 7-5 are always 001.
pub const ATTR_MASK: u8 = 0xE0;
pub const ATTR_ID: u8 = 0x20;
pub const ATTR_5250_NORMAL: u8 = 0x20;
pub const ATTR_5250_NONDISP: u8 = 0x27;

/// True if `byte` is a display attribute
pub fn is_attribute(byte: u8) -> bool {
    byte & ATTR_MASK == ATTR_ID
}

/// Non-display attributes have the low three bits set
pub fn is_nondisplay(attribute: u8) -> bool {
    attribute & 0x07 == 0x07
}

/// Enum representation of the 5250 commands the decoder understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandCode {
    ClearUnit = CMD_CLEAR_UNIT as isize,
    ClearUnitAlternate = CMD_CLEAR_UNIT_ALTERNATE as isize,
    ClearFormatTable = CMD_CLEAR_FORMAT_TABLE as isize,
    WriteToDisplay = CMD_WRITE_TO_DISPLAY as isize,
    WriteErrorCode = CMD_WRITE_ERROR_CODE as isize,
    ReadInputFields = CMD_READ_INPUT_FIELDS as isize,
    ReadMdtFields = CMD_READ_MDT_FIELDS as isize,
    ReadScreenImmediate = CMD_READ_SCREEN_IMMEDIATE as isize,
    ReadImmediate = CMD_READ_IMMEDIATE as isize,
}

impl CommandCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            CMD_CLEAR_UNIT => Some(Self::ClearUnit),
            CMD_CLEAR_UNIT_ALTERNATE => Some(Self::ClearUnitAlternate),
            CMD_CLEAR_FORMAT_TABLE => Some(Self::ClearFormatTable),
            CMD_WRITE_TO_DISPLAY => Some(Self::WriteToDisplay),
            CMD_WRITE_ERROR_CODE => Some(Self::WriteErrorCode),
            CMD_READ_INPUT_FIELDS => Some(Self::ReadInputFields),
            CMD_READ_MDT_FIELDS => Some(Self::ReadMdtFields),
            CMD_READ_SCREEN_IMMEDIATE => Some(Self::ReadScreenImmediate),
            CMD_READ_IMMEDIATE => Some(Self::ReadImmediate),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}
