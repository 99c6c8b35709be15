//! 5250 data stream translation
//!
//! Decodes one host record (GDS header plus 5250 commands) into an immutable
//! [`ScreenState`], and builds host records for scripted hosts.
//!
//! ## Record Format
//!
//! ```text
//! 0-1  record length, big-endian, header included
//! 2-3  record type (0x12A0)
//! 4-5  reserved
//! 6    variable header length (0x04)
//! 7    flags
//! 8    reserved
//! 9    operation code
//! 10.. ESC command [parameters] [orders and data] ...
//! ```

use log::{debug, trace};

use crate::catalog::{ScreenCatalog, ScreenDefinition};
use crate::ebcdic::Charset;
use crate::error::ProtocolError;
use crate::lib5250::codes::*;
use crate::screen::{ScreenField, ScreenState};

/// Decoded fixed part of a GDS header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub flags: u8,
    pub opcode: u8,
}

/// Validate the GDS header and return it with the payload that follows
pub fn parse_header(record: &[u8]) -> Result<(RecordHeader, &[u8]), ProtocolError> {
    if record.len() < GDS_HEADER_LEN {
        return Err(ProtocolError::RecordTooShort { need: GDS_HEADER_LEN, got: record.len() });
    }

    let declared = u16::from_be_bytes([record[0], record[1]]) as usize;
    if declared != record.len() {
        return Err(ProtocolError::RecordLengthMismatch { declared, actual: record.len() });
    }

    let record_type = u16::from_be_bytes([record[2], record[3]]);
    if record_type != GDS_RECORD_TYPE {
        return Err(ProtocolError::InvalidRecordType(record_type));
    }

    let data_start = 6 + record[6] as usize;
    if data_start > record.len() {
        return Err(ProtocolError::RecordTooShort { need: data_start, got: record.len() });
    }

    let header = RecordHeader { flags: record[7], opcode: record[9] };
    Ok((header, &record[data_start..]))
}

/// Prefix `payload` with a GDS header.
///
/// Fails when header plus payload would not fit the 16-bit length field.
pub fn wrap_record(opcode: u8, flags: u8, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let total = GDS_HEADER_LEN + payload.len();
    let length = u16::try_from(total)
        .map_err(|_| ProtocolError::RecordTooLong { length: total, max: MAX_RECORD_LEN })?;
    let mut record = Vec::with_capacity(total);
    record.extend_from_slice(&length.to_be_bytes());
    record.extend_from_slice(&GDS_RECORD_TYPE.to_be_bytes());
    record.extend_from_slice(&[0x00, 0x00, GDS_VAR_HEADER_LEN, flags, 0x00, opcode]);
    record.extend_from_slice(payload);
    Ok(record)
}

/// Decode a complete host record into a screen snapshot.
///
/// The screen id comes from the first catalog definition whose signature
/// matches the decoded text; fields without a catalog label are named
/// `R{row}C{col}` after their first data position.
pub fn decode_record(
    record: &[u8],
    catalog: &ScreenCatalog,
    charset: Charset,
) -> Result<ScreenState, ProtocolError> {
    let (header, payload) = parse_header(record)?;
    trace!(
        "decoding record: opcode=0x{:02X} flags=0x{:02X} payload={} bytes",
        header.opcode,
        header.flags,
        payload.len()
    );

    let mut decoder = Decoder::new(payload, charset);
    decoder.run()?;
    decoder.into_screen(record, catalog)
}

#[derive(Debug, Clone, Copy)]
struct RawField {
    start: usize,
    length: usize,
    protected: bool,
    hidden: bool,
}

struct Decoder<'a> {
    data: &'a [u8],
    offset: usize,
    charset: Charset,
    rows: usize,
    cols: usize,
    grid: Vec<u8>,
    pos: usize,
    cursor: Option<usize>,
    fields: Vec<RawField>,
}

impl<'a> Decoder<'a> {
    fn new(data: &'a [u8], charset: Charset) -> Self {
        let mut decoder = Self {
            data,
            offset: 0,
            charset,
            rows: 0,
            cols: 0,
            grid: Vec::new(),
            pos: 0,
            cursor: None,
            fields: Vec::new(),
        };
        decoder.reset(24, 80);
        decoder
    }

    fn reset(&mut self, rows: usize, cols: usize) {
        self.rows = rows;
        self.cols = cols;
        self.grid = vec![self.charset.space(); rows * cols];
        self.pos = 0;
        self.cursor = None;
        self.fields.clear();
    }

    fn run(&mut self) -> Result<(), ProtocolError> {
        while let Some(&byte) = self.data.get(self.offset) {
            self.offset += 1;
            if byte != ESC {
                return Err(ProtocolError::InvalidCommandCode(byte));
            }

            let code = self.next_byte(ESC)?;
            match CommandCode::from_u8(code) {
                Some(CommandCode::ClearUnit) => self.reset(24, 80),
                Some(CommandCode::ClearUnitAlternate) => {
                    // 0x00 selects 27x132; 0x80 keeps 24x80
                    if self.next_byte(code)? == 0x80 {
                        self.reset(24, 80);
                    } else {
                        self.reset(27, 132);
                    }
                }
                Some(CommandCode::ClearFormatTable) => self.fields.clear(),
                Some(CommandCode::WriteToDisplay) => {
                    self.take(2, code)?;
                    self.write_to_display()?;
                }
                Some(CommandCode::WriteErrorCode) => self.write_error_line()?,
                Some(CommandCode::ReadInputFields) | Some(CommandCode::ReadMdtFields) => {
                    self.take(2, code)?;
                }
                Some(CommandCode::ReadScreenImmediate) | Some(CommandCode::ReadImmediate) => {}
                None => return Err(ProtocolError::InvalidCommandCode(code)),
            }
        }
        Ok(())
    }

    fn write_to_display(&mut self) -> Result<(), ProtocolError> {
        while let Some(&byte) = self.data.get(self.offset) {
            if byte == ESC {
                break;
            }
            self.offset += 1;

            match byte {
                SBA => self.pos = self.address(SBA)?,
                IC | MC => self.cursor = Some(self.address(byte)?),
                RA => {
                    let end = self.address(RA)?;
                    let fill = self.next_byte(RA)?;
                    self.fill_to(end, fill);
                }
                EA => {
                    let end = self.address(EA)?;
                    let len = self.next_byte(EA)? as usize;
                    self.take(len.saturating_sub(1), EA)?;
                    self.fill_to(end, self.charset.space());
                }
                SOH => {
                    let len = self.next_byte(SOH)? as usize;
                    self.take(len, SOH)?;
                }
                WEA => {
                    self.take(2, WEA)?;
                }
                SF => self.start_field()?,
                _ => self.put(byte),
            }
        }
        Ok(())
    }

    /// Write Error Code text goes to the message line
    fn write_error_line(&mut self) -> Result<(), ProtocolError> {
        let saved = self.pos;
        self.pos = (self.rows - 1) * self.cols;
        while let Some(&byte) = self.data.get(self.offset) {
            if byte == ESC {
                break;
            }
            self.offset += 1;
            self.put(byte);
        }
        self.pos = saved;
        Ok(())
    }

    fn start_field(&mut self) -> Result<(), ProtocolError> {
        let first = self.next_byte(SF)?;
        let (protected, attribute) = if first & FFW_ID_MASK == FFW_ID {
            self.next_byte(SF)?;
            while self
                .data
                .get(self.offset)
                .is_some_and(|b| b & FCW_ID_MASK == FCW_ID)
            {
                self.take(2, SF)?;
            }
            (first & FFW_BYPASS != 0, self.next_byte(SF)?)
        } else {
            // No format word: output-only field
            (true, first)
        };

        if !is_attribute(attribute) {
            return Err(ProtocolError::InvalidAttribute {
                byte: attribute,
                offset: self.offset - 1,
            });
        }

        let len_bytes = self.take(2, SF)?;
        let declared = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;

        // The attribute occupies one cell; data starts right after it
        self.put(self.charset.space());
        let start = self.pos;
        let room = self.cols - start % self.cols;
        let length = declared.min(room);
        if length < declared {
            debug!(
                "field at {} clipped from {} to {} columns",
                start, declared, length
            );
        }
        if length == 0 {
            return Ok(());
        }

        self.fields.retain(|f| f.start != start);
        self.fields.push(RawField {
            start,
            length,
            protected,
            hidden: is_nondisplay(attribute),
        });
        Ok(())
    }

    fn next_byte(&mut self, order: u8) -> Result<u8, ProtocolError> {
        let byte = self
            .data
            .get(self.offset)
            .copied()
            .ok_or(ProtocolError::TruncatedOrder { order, offset: self.offset })?;
        self.offset += 1;
        Ok(byte)
    }

    fn take(&mut self, n: usize, order: u8) -> Result<&'a [u8], ProtocolError> {
        let data: &'a [u8] = self.data;
        let end = self.offset + n;
        let slice = data
            .get(self.offset..end)
            .ok_or(ProtocolError::TruncatedOrder { order, offset: self.offset })?;
        self.offset = end;
        Ok(slice)
    }

    /// Read a 1-based row/column pair as a linear buffer position
    fn address(&mut self, order: u8) -> Result<usize, ProtocolError> {
        let row = self.next_byte(order)?;
        let col = self.next_byte(order)?;
        let (r, c) = (row as usize, col as usize);
        if r == 0 || c == 0 || r > self.rows || c > self.cols {
            return Err(ProtocolError::InvalidAddress { row, col });
        }
        Ok((r - 1) * self.cols + (c - 1))
    }

    fn put(&mut self, byte: u8) {
        self.grid[self.pos] = byte;
        self.pos = (self.pos + 1) % self.grid.len();
    }

    /// Write `byte` from the current position through `end` inclusive
    fn fill_to(&mut self, end: usize, byte: u8) {
        while self.pos != end {
            self.put(byte);
        }
        self.put(byte);
    }

    fn into_screen(
        mut self,
        record: &[u8],
        catalog: &ScreenCatalog,
    ) -> Result<ScreenState, ProtocolError> {
        self.fields.sort_by_key(|f| f.start);

        let mut cells: Vec<char> = self
            .grid
            .iter()
            .map(|&b| self.charset.decode_display(b))
            .collect();
        for field in self.fields.iter().filter(|f| f.hidden) {
            cells[field.start..field.start + field.length].fill(' ');
        }
        let text_rows: Vec<String> = cells
            .chunks(self.cols)
            .map(|row| row.iter().collect())
            .collect();

        let definition = catalog.identify(&text_rows);
        let fields = self
            .fields
            .iter()
            .map(|raw| self.named_field(raw, definition))
            .collect::<Vec<_>>();

        let cursor = self
            .cursor
            .or_else(|| self.fields.iter().find(|f| !f.protected).map(|f| f.start))
            .unwrap_or(0);

        let screen = ScreenState::builder(self.rows, self.cols)
            .cursor(cursor / self.cols + 1, cursor % self.cols + 1)
            .fields(fields)
            .raw(record.to_vec())
            .raw_charset(self.charset)
            .text_rows(text_rows)
            .maybe_screen_id(definition.map(|d| d.id.clone()))
            .build()?;
        Ok(screen)
    }

    fn named_field(&self, raw: &RawField, definition: Option<&ScreenDefinition>) -> ScreenField {
        let row = raw.start / self.cols + 1;
        let col = raw.start % self.cols + 1;
        let id = definition
            .and_then(|d| d.label_at(row, col))
            .map(str::to_string)
            .unwrap_or_else(|| ScreenCatalog::positional_id(row, col));

        let value = self
            .charset
            .decode_str(&self.grid[raw.start..raw.start + raw.length])
            .trim_end()
            .to_string();

        let mut field = ScreenField::new(id, row, col, raw.length).with_value(value);
        field.protected = raw.protected;
        field.hidden = raw.hidden;
        field
    }
}

/// Builds host-to-workstation records for scripted hosts and tests
#[derive(Debug, Clone)]
pub struct ScreenRecordBuilder {
    charset: Charset,
    opcode: u8,
    flags: u8,
    payload: Vec<u8>,
}

impl ScreenRecordBuilder {
    pub fn new(charset: Charset) -> Self {
        Self {
            charset,
            opcode: OPCODE_PUT_GET,
            flags: 0,
            payload: Vec::new(),
        }
    }

    pub fn opcode(mut self, opcode: u8) -> Self {
        self.opcode = opcode;
        self
    }

    pub fn flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    pub fn clear_unit(mut self) -> Self {
        self.payload.extend_from_slice(&[ESC, CMD_CLEAR_UNIT]);
        self
    }

    pub fn clear_unit_alternate(mut self) -> Self {
        self.payload.extend_from_slice(&[ESC, CMD_CLEAR_UNIT_ALTERNATE, 0x00]);
        self
    }

    /// Start a Write To Display with a keyboard-unlock control character
    pub fn write_to_display(mut self) -> Self {
        self.payload.extend_from_slice(&[ESC, CMD_WRITE_TO_DISPLAY, 0x00, 0x08]);
        self
    }

    pub fn sba(mut self, row: u8, col: u8) -> Self {
        self.payload.extend_from_slice(&[SBA, row, col]);
        self
    }

    /// Text in the record's charset; unrepresentable characters become spaces
    pub fn text(mut self, text: &str) -> Self {
        let space = self.charset.space();
        self.payload
            .extend(text.chars().map(|ch| self.charset.encode_char(ch).unwrap_or(space)));
        self
    }

    pub fn text_at(self, row: u8, col: u8, text: &str) -> Self {
        self.sba(row, col).text(text)
    }

    /// Unprotected input field whose attribute sits at the current position
    pub fn input_field(self, length: u16) -> Self {
        self.field(Some([FFW_ID, 0x00]), ATTR_5250_NORMAL, length)
    }

    /// Unprotected, non-display input field
    pub fn hidden_field(self, length: u16) -> Self {
        self.field(Some([FFW_ID, 0x00]), ATTR_5250_NONDISP, length)
    }

    /// Input-capable field with the bypass bit set
    pub fn protected_field(self, length: u16) -> Self {
        self.field(Some([FFW_ID | FFW_BYPASS, 0x00]), ATTR_5250_NORMAL, length)
    }

    /// Output-only field (no format word)
    pub fn output_field(self, length: u16) -> Self {
        self.field(None, ATTR_5250_NORMAL, length)
    }

    fn field(mut self, ffw: Option<[u8; 2]>, attribute: u8, length: u16) -> Self {
        self.payload.push(SF);
        if let Some(ffw) = ffw {
            self.payload.extend_from_slice(&ffw);
        }
        self.payload.push(attribute);
        self.payload.extend_from_slice(&length.to_be_bytes());
        self
    }

    pub fn repeat_to(mut self, row: u8, col: u8, ch: char) -> Self {
        let byte = self.charset.encode_char(ch).unwrap_or(self.charset.space());
        self.payload.extend_from_slice(&[RA, row, col, byte]);
        self
    }

    pub fn insert_cursor(mut self, row: u8, col: u8) -> Self {
        self.payload.extend_from_slice(&[IC, row, col]);
        self
    }

    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.payload.extend_from_slice(bytes);
        self
    }

    pub fn build(self) -> Result<Vec<u8>, ProtocolError> {
        wrap_record(self.opcode, self.flags, &self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ScreenDefinition, TextMatch};

    fn login_record() -> Vec<u8> {
        ScreenRecordBuilder::new(Charset::Ebcdic037)
            .clear_unit()
            .write_to_display()
            .text_at(1, 36, "Sign On")
            .text_at(6, 17, "User  . . . . . . . . . . . . .")
            .sba(6, 52)
            .input_field(10)
            .text_at(7, 17, "Password  . . . . . . . . . . .")
            .sba(7, 52)
            .hidden_field(10)
            .text("SECRET")
            .insert_cursor(6, 53)
            .build()
            .unwrap()
    }

    fn login_catalog() -> ScreenCatalog {
        ScreenCatalog::new().with(
            ScreenDefinition::new("Login")
                .signature(TextMatch::on_row(1, "Sign On"))
                .label("user", 6, 53)
                .label("password", 7, 53),
        )
    }

    #[test]
    fn test_decode_login_screen() {
        let screen = decode_record(&login_record(), &login_catalog(), Charset::Ebcdic037).unwrap();

        assert_eq!((screen.rows(), screen.cols()), (24, 80));
        assert_eq!(screen.screen_id(), Some("Login"));
        assert_eq!(screen.cursor(), (6, 53));

        let user = screen.get_field("user").unwrap();
        assert_eq!((user.row, user.col, user.length), (6, 53, 10));
        assert!(!user.protected && !user.hidden);

        let password = screen.get_field("password").unwrap();
        assert!(password.hidden);
        assert_eq!(password.value, "SECRET");
        assert!(!screen.row_text(7).unwrap_or_default().contains("SECRET"));

        assert!(screen.row_text(1).unwrap_or_default().contains("Sign On"));
        assert_eq!(screen.raw(), login_record().as_slice());
    }

    #[test]
    fn test_unlabelled_and_protected_fields() {
        let record = ScreenRecordBuilder::new(Charset::Ebcdic037)
            .clear_unit()
            .write_to_display()
            .text_at(1, 2, "Claim Entry")
            .sba(5, 19)
            .protected_field(12)
            .text("AUTO-123")
            .sba(6, 19)
            .output_field(20)
            .text("Pending")
            .build()
            .unwrap();
        let screen = decode_record(&record, &ScreenCatalog::new(), Charset::Ebcdic037).unwrap();

        assert_eq!(screen.screen_id(), None);
        let policy = screen.get_field("R5C20").unwrap();
        assert!(policy.protected);
        assert_eq!(policy.value, "AUTO-123");
        assert!(screen.get_field("R6C20").unwrap().protected);
        assert_eq!(screen.cursor(), (1, 1));
    }

    #[test]
    fn test_clear_unit_alternate_and_repeat() {
        let record = ScreenRecordBuilder::new(Charset::Ebcdic037)
            .clear_unit_alternate()
            .write_to_display()
            .sba(2, 1)
            .repeat_to(2, 132, '-')
            .build()
            .unwrap();
        let screen = decode_record(&record, &ScreenCatalog::new(), Charset::Ebcdic037).unwrap();
        assert_eq!((screen.rows(), screen.cols()), (27, 132));
        assert_eq!(screen.row_text(2), Some("-".repeat(132).as_str()));
    }

    #[test]
    fn test_field_clipped_to_row_end() {
        let record = ScreenRecordBuilder::new(Charset::Ebcdic037)
            .clear_unit()
            .write_to_display()
            .sba(3, 70)
            .input_field(40)
            .build()
            .unwrap();
        let screen = decode_record(&record, &ScreenCatalog::new(), Charset::Ebcdic037).unwrap();
        assert_eq!(screen.get_field("R3C71").unwrap().length, 10);
    }

    #[test]
    fn test_header_errors() {
        let catalog = ScreenCatalog::new();
        assert_eq!(
            decode_record(&[0x00, 0x05], &catalog, Charset::Ebcdic037),
            Err(ProtocolError::RecordTooShort { need: 10, got: 2 })
        );

        let mut record = login_record();
        record.push(0x40);
        assert!(matches!(
            decode_record(&record, &catalog, Charset::Ebcdic037),
            Err(ProtocolError::RecordLengthMismatch { .. })
        ));

        let mut record = login_record();
        record[2] = 0x00;
        assert!(matches!(
            decode_record(&record, &catalog, Charset::Ebcdic037),
            Err(ProtocolError::InvalidRecordType(_))
        ));
    }

    #[test]
    fn test_order_errors() {
        let catalog = ScreenCatalog::new();
        let truncated = ScreenRecordBuilder::new(Charset::Ebcdic037)
            .write_to_display()
            .raw(&[SBA, 5])
            .build()
            .unwrap();
        assert!(matches!(
            decode_record(&truncated, &catalog, Charset::Ebcdic037),
            Err(ProtocolError::TruncatedOrder { order: SBA, .. })
        ));

        let bad_address = ScreenRecordBuilder::new(Charset::Ebcdic037)
            .write_to_display()
            .sba(25, 1)
            .build()
            .unwrap();
        assert_eq!(
            decode_record(&bad_address, &catalog, Charset::Ebcdic037),
            Err(ProtocolError::InvalidAddress { row: 25, col: 1 })
        );

        let bad_command = wrap_record(OPCODE_PUT_GET, 0, &[ESC, 0x99]).unwrap();
        assert_eq!(
            decode_record(&bad_command, &catalog, Charset::Ebcdic037),
            Err(ProtocolError::InvalidCommandCode(0x99))
        );
    }

    #[test]
    fn test_header_round_trip() {
        let record = wrap_record(OPCODE_INVITE, FLAG_HLP, &[ESC, CMD_CLEAR_UNIT]).unwrap();
        let (header, payload) = parse_header(&record).unwrap();
        assert_eq!(header, RecordHeader { flags: FLAG_HLP, opcode: OPCODE_INVITE });
        assert_eq!(payload, &[ESC, CMD_CLEAR_UNIT]);
    }

    #[test]
    fn test_oversized_record_rejected() {
        let largest = vec![0x40; MAX_RECORD_LEN - GDS_HEADER_LEN];
        let record = wrap_record(OPCODE_PUT_GET, 0, &largest).unwrap();
        assert_eq!(record.len(), MAX_RECORD_LEN);
        assert!(parse_header(&record).is_ok());

        assert_eq!(
            wrap_record(OPCODE_PUT_GET, 0, &[0x40; 70_000]),
            Err(ProtocolError::RecordTooLong { length: 70_010, max: MAX_RECORD_LEN })
        );
    }

    #[test]
    fn test_ebcdic_screen_matches_decoded_text_only() {
        let screen = decode_record(&login_record(), &login_catalog(), Charset::Ebcdic037).unwrap();
        assert!(!screen.text().contains('@'));

        // 0x40 is the EBCDIC space and 0x4B the EBCDIC period
        assert!(!screen.matches("@"));
        assert!(!screen.matches("K"));
        assert!(!screen.matches("K@K"));

        assert!(screen.matches("Sign On"));
        assert!(screen.matches("User  . . ."));
    }

    #[test]
    fn test_ascii_screen_still_matches_raw_frame() {
        let record = ScreenRecordBuilder::new(Charset::Ascii)
            .clear_unit()
            .write_to_display()
            .text_at(1, 2, "Claim Entry")
            .build()
            .unwrap();
        let screen = decode_record(&record, &ScreenCatalog::new(), Charset::Ascii).unwrap();
        assert!(screen.matches("Claim Entry"));
        assert!(!screen.matches("Claim Inquiry"));
    }
}
