//! Telnet option negotiation and record framing for TN5250
//!
//! RFC 854/885/1091/1572 negotiation as used by IBM i telnet servers
//! (RFC 2877/4777). The negotiator keeps separate state for each direction of
//! an option: what we agreed to do (WILL) and what we asked the host to do
//! (DO). [`RecordFramer`] splits the inbound byte stream into 5250 records
//! terminated by `IAC EOR`.

use std::collections::HashMap;
use std::fmt;

use log::{debug, trace};

use crate::config::Credentials;
use crate::error::ProtocolError;
use crate::lib5250::codes::MAX_RECORD_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TelnetOption {
    Binary = 0,
    Echo = 1,
    SuppressGoAhead = 3,
    EndOfRecord = 19,
    TerminalType = 24,
    NewEnvironment = 39,
}

impl TelnetOption {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(TelnetOption::Binary),
            1 => Some(TelnetOption::Echo),
            3 => Some(TelnetOption::SuppressGoAhead),
            19 => Some(TelnetOption::EndOfRecord),
            24 => Some(TelnetOption::TerminalType),
            39 => Some(TelnetOption::NewEnvironment),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TelnetCommand {
    SE = 240,
    EOR = 239,
    SB = 250,
    WILL = 251,
    WONT = 252,
    DO = 253,
    DONT = 254,
    IAC = 255,
}

impl TelnetCommand {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            240 => Some(TelnetCommand::SE),
            239 => Some(TelnetCommand::EOR),
            250 => Some(TelnetCommand::SB),
            251 => Some(TelnetCommand::WILL),
            252 => Some(TelnetCommand::WONT),
            253 => Some(TelnetCommand::DO),
            254 => Some(TelnetCommand::DONT),
            255 => Some(TelnetCommand::IAC),
            _ => None,
        }
    }
}

const IAC: u8 = TelnetCommand::IAC as u8;

/// TERMINAL-TYPE and NEW-ENVIRON subcommands
const SUB_IS: u8 = 0;
const SUB_SEND: u8 = 1;

/// NEW-ENVIRON type codes (RFC 1572)
const ENV_VAR: u8 = 0;
const ENV_VALUE: u8 = 1;
const ENV_USERVAR: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NegotiationState {
    /// Nothing sent or received for this direction yet
    Initial,
    /// We sent DO, waiting for WILL/WONT
    RequestedDo,
    /// We sent DONT, waiting for WONT
    RequestedDont,
    /// We sent WILL, waiting for DO/DONT
    RequestedWill,
    /// We sent WONT, waiting for DONT
    RequestedWont,
    Active,
    Inactive,
}

/// What the workstation tells the host about itself during negotiation
#[derive(Clone, Default)]
pub struct TerminalProfile {
    pub terminal_type: String,
    pub device_name: Option<String>,
    pub credentials: Option<Credentials>,
}

impl fmt::Debug for TerminalProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TerminalProfile")
            .field("terminal_type", &self.terminal_type)
            .field("device_name", &self.device_name)
            .field("user", &self.credentials.as_ref().map(|c| c.user.as_str()))
            .finish()
    }
}

/// Options we are willing to perform ourselves
const LOCAL_OPTIONS: [TelnetOption; 5] = [
    TelnetOption::Binary,
    TelnetOption::EndOfRecord,
    TelnetOption::SuppressGoAhead,
    TelnetOption::TerminalType,
    TelnetOption::NewEnvironment,
];

/// Options we want the host to perform
const REMOTE_OPTIONS: [TelnetOption; 3] = [
    TelnetOption::Binary,
    TelnetOption::EndOfRecord,
    TelnetOption::SuppressGoAhead,
];

#[derive(Debug)]
pub struct TelnetNegotiator {
    profile: TerminalProfile,
    /// Our side of each option (WILL/WONT)
    local: HashMap<TelnetOption, NegotiationState>,
    /// The host's side of each option (DO/DONT)
    remote: HashMap<TelnetOption, NegotiationState>,
    output_buffer: Vec<u8>,
    negotiation_complete: bool,
}

impl TelnetNegotiator {
    pub fn new(profile: TerminalProfile) -> Self {
        let mut negotiator = Self {
            profile,
            local: HashMap::new(),
            remote: HashMap::new(),
            output_buffer: Vec::new(),
            negotiation_complete: false,
        };
        for option in LOCAL_OPTIONS {
            negotiator.local.insert(option, NegotiationState::Initial);
        }
        for option in REMOTE_OPTIONS {
            negotiator.remote.insert(option, NegotiationState::Initial);
        }
        negotiator
    }

    /// Opening requests: binary and end-of-record in both directions, SGA from
    /// the host. Terminal type and environment wait for the host to ask.
    pub fn generate_initial_negotiation(&mut self) -> Vec<u8> {
        self.output_buffer.clear();
        for option in [TelnetOption::Binary, TelnetOption::EndOfRecord] {
            self.local.insert(option, NegotiationState::RequestedWill);
            self.send(TelnetCommand::WILL, option as u8);
        }
        for option in REMOTE_OPTIONS {
            self.remote.insert(option, NegotiationState::RequestedDo);
            self.send(TelnetCommand::DO, option as u8);
        }
        std::mem::take(&mut self.output_buffer)
    }

    /// Process complete negotiation sequences (as split out by
    /// [`RecordFramer`]) and return the bytes to send back.
    pub fn process_incoming_data(&mut self, data: &[u8]) -> Vec<u8> {
        self.output_buffer.clear();

        let mut pos = 0;
        while pos < data.len() {
            let remaining = &data[pos..];
            if remaining[0] != IAC || remaining.len() < 2 {
                pos += 1;
                continue;
            }

            match TelnetCommand::from_u8(remaining[1]) {
                Some(
                    cmd @ (TelnetCommand::DO
                    | TelnetCommand::DONT
                    | TelnetCommand::WILL
                    | TelnetCommand::WONT),
                ) if remaining.len() >= 3 => {
                    let option = remaining[2];
                    trace!("telnet recv {:?} {}", cmd, option);
                    match cmd {
                        TelnetCommand::DO => self.handle_do_command(option),
                        TelnetCommand::DONT => self.handle_dont_command(option),
                        TelnetCommand::WILL => self.handle_will_command(option),
                        _ => self.handle_wont_command(option),
                    }
                    pos += 3;
                }
                Some(TelnetCommand::SB) => match find_subnegotiation_end(remaining, 2) {
                    Some(end) => {
                        self.handle_subnegotiation(&remaining[2..end - 2]);
                        pos += end;
                    }
                    None => break,
                },
                _ => pos += 2,
            }
        }

        self.check_negotiation_complete();
        std::mem::take(&mut self.output_buffer)
    }

    pub fn is_negotiation_complete(&self) -> bool {
        self.negotiation_complete
    }

    /// Active in either direction
    pub fn is_option_active(&self, option: TelnetOption) -> bool {
        self.local.get(&option) == Some(&NegotiationState::Active)
            || self.remote.get(&option) == Some(&NegotiationState::Active)
    }

    pub fn local_state(&self, option: TelnetOption) -> NegotiationState {
        self.local.get(&option).copied().unwrap_or(NegotiationState::Inactive)
    }

    pub fn remote_state(&self, option: TelnetOption) -> NegotiationState {
        self.remote.get(&option).copied().unwrap_or(NegotiationState::Inactive)
    }

    /// Host asks us to perform an option
    fn handle_do_command(&mut self, raw: u8) {
        let Some(option) = TelnetOption::from_u8(raw).filter(|o| LOCAL_OPTIONS.contains(o)) else {
            self.send_raw(TelnetCommand::WONT, raw);
            return;
        };
        match self.local_state(option) {
            NegotiationState::Active => {}
            NegotiationState::RequestedWill => {
                self.local.insert(option, NegotiationState::Active);
            }
            _ => {
                self.local.insert(option, NegotiationState::Active);
                self.send(TelnetCommand::WILL, raw);
            }
        }
    }

    /// Host asks us to stop performing an option
    fn handle_dont_command(&mut self, raw: u8) {
        let Some(option) = TelnetOption::from_u8(raw) else {
            return;
        };
        match self.local_state(option) {
            NegotiationState::Active => {
                self.local.insert(option, NegotiationState::Inactive);
                self.send(TelnetCommand::WONT, raw);
            }
            NegotiationState::Inactive => {}
            _ => {
                self.local.insert(option, NegotiationState::Inactive);
            }
        }
    }

    /// Host offers to perform an option
    fn handle_will_command(&mut self, raw: u8) {
        let Some(option) = TelnetOption::from_u8(raw).filter(|o| REMOTE_OPTIONS.contains(o)) else {
            self.send_raw(TelnetCommand::DONT, raw);
            return;
        };
        match self.remote_state(option) {
            NegotiationState::Active => {}
            NegotiationState::RequestedDo => {
                self.remote.insert(option, NegotiationState::Active);
            }
            _ => {
                self.remote.insert(option, NegotiationState::Active);
                self.send(TelnetCommand::DO, raw);
            }
        }
    }

    /// Host refuses or stops performing an option
    fn handle_wont_command(&mut self, raw: u8) {
        let Some(option) = TelnetOption::from_u8(raw) else {
            return;
        };
        match self.remote_state(option) {
            NegotiationState::Active => {
                self.remote.insert(option, NegotiationState::Inactive);
                self.send(TelnetCommand::DONT, raw);
            }
            NegotiationState::Inactive => {}
            _ => {
                self.remote.insert(option, NegotiationState::Inactive);
            }
        }
    }

    fn handle_subnegotiation(&mut self, data: &[u8]) {
        let (Some(&option), Some(&sub_command)) = (data.first(), data.get(1)) else {
            return;
        };
        if sub_command != SUB_SEND {
            return;
        }
        match TelnetOption::from_u8(option) {
            Some(TelnetOption::TerminalType) => self.send_terminal_type_response(),
            Some(TelnetOption::NewEnvironment) => self.send_environment_variables(),
            _ => debug!("ignoring subnegotiation for option {}", option),
        }
    }

    fn send(&mut self, command: TelnetCommand, option: u8) {
        trace!("telnet send {:?} {}", command, option);
        self.output_buffer.extend_from_slice(&[IAC, command as u8, option]);
    }

    fn send_raw(&mut self, command: TelnetCommand, option: u8) {
        debug!("refusing unsupported telnet option {}", option);
        self.send(command, option);
    }

    fn send_terminal_type_response(&mut self) {
        self.output_buffer.extend_from_slice(&[
            IAC,
            TelnetCommand::SB as u8,
            TelnetOption::TerminalType as u8,
            SUB_IS,
        ]);
        self.output_buffer
            .extend(escape_iac(self.profile.terminal_type.as_bytes()));
        self.output_buffer.extend_from_slice(&[IAC, TelnetCommand::SE as u8]);
    }

    /// NEW-ENVIRON IS with the device name and, when configured, the sign-on
    /// user and a clear-text password (empty IBMRSEED).
    fn send_environment_variables(&mut self) {
        let mut body = vec![SUB_IS];
        if let Some(credentials) = &self.profile.credentials {
            push_env(&mut body, ENV_VAR, "USER", credentials.user.as_bytes());
            push_env(&mut body, ENV_USERVAR, "IBMRSEED", &[]);
            push_env(&mut body, ENV_USERVAR, "IBMSUBSPW", credentials.password.as_bytes());
        }
        if let Some(device) = &self.profile.device_name {
            push_env(&mut body, ENV_USERVAR, "DEVNAME", device.as_bytes());
        }

        self.output_buffer.extend_from_slice(&[
            IAC,
            TelnetCommand::SB as u8,
            TelnetOption::NewEnvironment as u8,
        ]);
        self.output_buffer.extend(escape_iac(&body));
        self.output_buffer.extend_from_slice(&[IAC, TelnetCommand::SE as u8]);
    }

    fn check_negotiation_complete(&mut self) {
        let essential = [
            TelnetOption::Binary,
            TelnetOption::EndOfRecord,
            TelnetOption::SuppressGoAhead,
        ];
        if essential.iter().all(|&opt| self.is_option_active(opt)) {
            self.negotiation_complete = true;
        }
    }
}

fn push_env(body: &mut Vec<u8>, kind: u8, name: &str, value: &[u8]) {
    body.push(kind);
    body.extend_from_slice(name.as_bytes());
    body.push(ENV_VALUE);
    body.extend_from_slice(value);
}

/// Index just past `IAC SE`, searching from `start`
fn find_subnegotiation_end(data: &[u8], start: usize) -> Option<usize> {
    let mut i = start;
    while i + 1 < data.len() {
        if data[i] == IAC {
            if data[i + 1] == TelnetCommand::SE as u8 {
                return Some(i + 2);
            }
            // Escaped IAC inside the parameters
            i += 2;
            continue;
        }
        i += 1;
    }
    None
}

/// Double every IAC byte
pub fn escape_iac(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 2);
    for &byte in data {
        out.push(byte);
        if byte == IAC {
            out.push(IAC);
        }
    }
    out
}

/// Escape a record and terminate it with `IAC EOR`
pub fn frame_record(record: &[u8]) -> Vec<u8> {
    let mut out = escape_iac(record);
    out.extend_from_slice(&[IAC, TelnetCommand::EOR as u8]);
    out
}

/// One unit split out of the inbound telnet stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A complete, unescaped 5250 record
    Record(Vec<u8>),
    /// A complete negotiation sequence for [`TelnetNegotiator`]
    Negotiation(Vec<u8>),
}

/// Incremental splitter for the inbound stream.
///
/// Partial sequences at the end of a read are kept until the next `push`.
/// A record or subnegotiation that grows past [`MAX_RECORD_LEN`] without its
/// terminator is an error and resets the framer.
#[derive(Debug, Default)]
pub struct RecordFramer {
    buffer: Vec<u8>,
    record: Vec<u8>,
}

impl RecordFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Inbound>, ProtocolError> {
        self.buffer.extend_from_slice(data);
        let mut out = Vec::new();

        let mut i = 0;
        while i < self.buffer.len() {
            let byte = self.buffer[i];
            if byte != IAC {
                self.record.push(byte);
                i += 1;
                continue;
            }
            let Some(&command) = self.buffer.get(i + 1) else {
                break;
            };

            match TelnetCommand::from_u8(command) {
                Some(TelnetCommand::IAC) => {
                    self.record.push(IAC);
                    i += 2;
                }
                Some(TelnetCommand::EOR) => {
                    out.push(Inbound::Record(std::mem::take(&mut self.record)));
                    i += 2;
                }
                Some(
                    TelnetCommand::DO | TelnetCommand::DONT | TelnetCommand::WILL | TelnetCommand::WONT,
                ) => {
                    if i + 3 > self.buffer.len() {
                        break;
                    }
                    out.push(Inbound::Negotiation(self.buffer[i..i + 3].to_vec()));
                    i += 3;
                }
                Some(TelnetCommand::SB) => match find_subnegotiation_end(&self.buffer[i..], 2) {
                    Some(len) => {
                        out.push(Inbound::Negotiation(self.buffer[i..i + len].to_vec()));
                        i += len;
                    }
                    None => break,
                },
                // NOP, GA and friends carry no payload
                _ => i += 2,
            }
        }

        self.buffer.drain(..i);

        let length = self.record.len().max(self.buffer.len());
        if length > MAX_RECORD_LEN {
            self.record.clear();
            self.buffer.clear();
            return Err(ProtocolError::RecordTooLong { length, max: MAX_RECORD_LEN });
        }
        Ok(out)
    }

    /// Bytes of a record still waiting for its `IAC EOR`
    pub fn pending_len(&self) -> usize {
        self.record.len()
    }
}
