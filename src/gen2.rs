//! Gen2 anti-collision parameters and their protocol-parameter encoding.
//!
//! The parameter keys for session, target and Q were recovered from captured
//! traffic of the vendor tool rather than protocol documentation. Verify them
//! against a fresh capture before relying on them on new firmware.

use log::{debug, warn};

use crate::protocol::opcode;
use crate::reader::{DEFAULT_TIMEOUT_MS, NanoRfid};
use crate::transport::{Clock, RfidTransport};
use crate::types::{Module, UhfError, bytes_to_hex};

/// Protocol id of Gen2 in protocol-parameter commands
pub const GEN2_PROTOCOL_ID: u8 = 0x05;

/// Highest initial Q the module accepts
pub const MAX_INITIAL_Q: u8 = 10;

/// Gen2 protocol-parameter keys
pub mod param {
    pub const SESSION: u8 = 0x00;
    pub const TARGET: u8 = 0x01;
    pub const TAG_ENCODING: u8 = 0x02;
    pub const Q: u8 = 0x12;
    pub const INITIAL_Q: u8 = 0x16;
    pub const RF_MODE: u8 = 0x18;
}

/// Inventory session; decides how long a tag stays quiet after being read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Session {
    S0 = 0x00,
    S1 = 0x01,
    S2 = 0x02,
    S3 = 0x03,
}

impl TryFrom<u8> for Session {
    type Error = UhfError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Session::S0),
            0x01 => Ok(Session::S1),
            0x02 => Ok(Session::S2),
            0x03 => Ok(Session::S3),
            _ => Err(UhfError::InvalidResponse(format!(
                "Unknown Gen2 session: 0x{:02X}",
                value
            ))),
        }
    }
}

/// Which inventoried-flag state the reader queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    A,
    B,
    /// A until exhausted, then B
    AB,
    /// B until exhausted, then A
    BA,
}

impl Target {
    /// Two-byte value: first byte disables A/B alternation, second selects
    /// the starting flag state
    pub fn to_bytes(self) -> [u8; 2] {
        match self {
            Target::A => [0x01, 0x00],
            Target::B => [0x01, 0x01],
            Target::AB => [0x00, 0x00],
            Target::BA => [0x00, 0x01],
        }
    }

    pub fn from_bytes(bytes: [u8; 2]) -> Result<Self, UhfError> {
        match bytes {
            [0x01, 0x00] => Ok(Target::A),
            [0x01, 0x01] => Ok(Target::B),
            [0x00, 0x00] => Ok(Target::AB),
            [0x00, 0x01] => Ok(Target::BA),
            _ => Err(UhfError::InvalidResponse(format!(
                "Unknown Gen2 target: {}",
                bytes_to_hex(&bytes)
            ))),
        }
    }
}

/// Q algorithm: how the number of slots per inventory round is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum QAlgorithm {
    /// The module adapts Q to the collisions it sees
    Dynamic = 0x00,
    /// Q stays at its initial value
    Static = 0x01,
}

/// Predefined link profile: backscatter frequency, tag encoding and Tari. M7E only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum RfMode {
    /// 160 kHz BLF, Miller 8, 20 us Tari
    Blf160M8Tari20 = 285,
    /// 250 kHz BLF, Miller 4, 20 us Tari
    Blf250M4Tari20 = 244,
    /// 320 kHz BLF, Miller 2, 15 us Tari
    Blf320M2Tari15 = 223,
    /// 320 kHz BLF, Miller 2, 20 us Tari
    Blf320M2Tari20 = 222,
    /// 320 kHz BLF, Miller 4, 20 us Tari
    Blf320M4Tari20 = 241,
    /// 640 kHz BLF, FM0, 7.5 us Tari
    Blf640Fm0Tari7_5 = 302,
    /// 640 kHz BLF, Miller 2, 7.5 us Tari
    Blf640M2Tari7_5 = 323,
    /// 640 kHz BLF, Miller 4, 7.5 us Tari
    Blf640M4Tari7_5 = 344,
}

impl RfMode {
    pub fn id(self) -> u16 {
        self as u16
    }
}

/// Tag-to-reader encoding. M6E only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TagEncoding {
    /// Only valid with 250 kHz or 640 kHz BLF
    Fm0 = 0,
    MillerM2 = 1,
    MillerM4 = 2,
    MillerM8 = 3,
}

/// Link timing override; which one applies depends on the module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSetting {
    RfMode(RfMode),
    TagEncoding(TagEncoding),
}

/// Gen2 inventory configuration applied before a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gen2Config {
    pub session: Session,
    pub target: Target,
    pub q: QAlgorithm,
    /// Initial Q (0..=10); `None` leaves the module's value alone
    pub initial_q: Option<u8>,
    /// `None` leaves the module's link timing alone
    pub link: Option<LinkSetting>,
}

impl Default for Gen2Config {
    fn default() -> Self {
        Self {
            session: Session::S2,
            target: Target::A,
            q: QAlgorithm::Dynamic,
            initial_q: None,
            link: None,
        }
    }
}

/// One set-protocol-parameter call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolParam {
    pub key: u8,
    pub value: Vec<u8>,
}

impl ProtocolParam {
    pub fn new(key: u8, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }

    pub fn session(session: Session) -> Self {
        Self::new(param::SESSION, [session as u8])
    }

    pub fn target(target: Target) -> Self {
        Self::new(param::TARGET, target.to_bytes())
    }

    pub fn q(q: QAlgorithm) -> Self {
        Self::new(param::Q, [q as u8])
    }

    pub fn initial_q(q: u8) -> Result<Self, UhfError> {
        if q > MAX_INITIAL_Q {
            return Err(UhfError::InvalidParameter(format!(
                "Initial Q {} exceeds maximum of {}",
                q, MAX_INITIAL_Q
            )));
        }
        Ok(Self::new(param::INITIAL_Q, [0x01, q]))
    }

    pub fn rf_mode(mode: RfMode, module: Module) -> Result<Self, UhfError> {
        if module != Module::M7eHecto {
            return Err(UhfError::ConfigurationUnsupported {
                setting: "RF mode",
                module,
            });
        }
        Ok(Self::new(param::RF_MODE, mode.id().to_be_bytes()))
    }

    pub fn tag_encoding(encoding: TagEncoding, module: Module) -> Result<Self, UhfError> {
        if module != Module::M6eNano {
            return Err(UhfError::ConfigurationUnsupported {
                setting: "Tag encoding",
                module,
            });
        }
        Ok(Self::new(param::TAG_ENCODING, [encoding as u8]))
    }

    /// Command payload: `[protocol][key][value..]`
    pub fn payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(2 + self.value.len());
        payload.push(GEN2_PROTOCOL_ID);
        payload.push(self.key);
        payload.extend_from_slice(&self.value);
        payload
    }
}

impl Gen2Config {
    /// Translate into the parameter calls needed on `module`, in the order
    /// they are sent. Fails without side effects if any part is invalid for
    /// the module.
    pub fn encode(&self, module: Module) -> Result<Vec<ProtocolParam>, UhfError> {
        let mut params = vec![
            ProtocolParam::session(self.session),
            ProtocolParam::target(self.target),
            ProtocolParam::q(self.q),
        ];
        if let Some(q) = self.initial_q {
            params.push(ProtocolParam::initial_q(q)?);
        }
        match self.link {
            Some(LinkSetting::RfMode(mode)) => params.push(ProtocolParam::rf_mode(mode, module)?),
            Some(LinkSetting::TagEncoding(enc)) => {
                params.push(ProtocolParam::tag_encoding(enc, module)?)
            }
            None => {}
        }
        Ok(params)
    }
}

impl<T: RfidTransport, C: Clock> NanoRfid<T, C> {
    /// Send one Gen2 protocol parameter.
    ///
    /// On failure the module keeps its previous value; the error must not be
    /// ignored or inventory runs with stale anti-collision settings.
    pub fn set_protocol_param(&mut self, param: &ProtocolParam) -> Result<(), UhfError> {
        debug!(
            "Setting Gen2 parameter 0x{:02X} = {}",
            param.key,
            bytes_to_hex(&param.value)
        );
        match self.send_command(opcode::SET_PROTOCOL_PARAM, &param.payload(), DEFAULT_TIMEOUT_MS) {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!("Gen2 parameter 0x{:02X} not applied: {}", param.key, e);
                Err(e)
            }
        }
    }

    /// Read one Gen2 protocol parameter, returning its value bytes
    pub fn get_protocol_param(&mut self, key: u8) -> Result<Vec<u8>, UhfError> {
        let response = self.send_command(
            opcode::GET_PROTOCOL_PARAM,
            &[GEN2_PROTOCOL_ID, key],
            DEFAULT_TIMEOUT_MS,
        )?;
        // The reply echoes protocol and key ahead of the value
        match response.data.as_slice() {
            [GEN2_PROTOCOL_ID, echoed, value @ ..] if *echoed == key => Ok(value.to_vec()),
            data => Err(UhfError::InvalidResponse(format!(
                "Gen2 parameter 0x{:02X} reply echoes {}",
                key,
                bytes_to_hex(data)
            ))),
        }
    }

    pub fn set_gen2_session(&mut self, session: Session) -> Result<(), UhfError> {
        self.set_protocol_param(&ProtocolParam::session(session))
    }

    pub fn set_gen2_target(&mut self, target: Target) -> Result<(), UhfError> {
        self.set_protocol_param(&ProtocolParam::target(target))
    }

    /// Set the Q algorithm and, optionally, the initial Q
    pub fn set_gen2_q(&mut self, q: QAlgorithm, initial_q: Option<u8>) -> Result<(), UhfError> {
        let initial = initial_q.map(ProtocolParam::initial_q).transpose()?;
        self.set_protocol_param(&ProtocolParam::q(q))?;
        if let Some(initial) = initial {
            self.set_protocol_param(&initial)?;
        }
        Ok(())
    }

    /// Select a predefined RF mode. M7E only.
    pub fn set_gen2_rf_mode(&mut self, mode: RfMode) -> Result<(), UhfError> {
        let param = ProtocolParam::rf_mode(mode, self.module)?;
        self.set_protocol_param(&param)
    }

    /// Select the tag encoding directly. M6E only.
    pub fn set_gen2_tag_encoding(&mut self, encoding: TagEncoding) -> Result<(), UhfError> {
        let param = ProtocolParam::tag_encoding(encoding, self.module)?;
        self.set_protocol_param(&param)
    }

    /// Apply a complete Gen2 configuration.
    ///
    /// The whole configuration is validated before anything is sent. A
    /// rejected parameter stops the sequence; earlier parameters stay applied.
    pub fn apply_gen2_config(&mut self, config: &Gen2Config) -> Result<(), UhfError> {
        for param in config.encode(self.module)? {
            self.set_protocol_param(&param)?;
        }
        Ok(())
    }

    pub fn gen2_session(&mut self) -> Result<Session, UhfError> {
        let value = self.get_protocol_param(param::SESSION)?;
        match value.first() {
            Some(&session) => Session::try_from(session),
            None => Err(UhfError::InvalidResponse("Empty Gen2 session value".into())),
        }
    }

    pub fn gen2_target(&mut self) -> Result<Target, UhfError> {
        let value = self.get_protocol_param(param::TARGET)?;
        match value.as_slice() {
            [a, b, ..] => Target::from_bytes([*a, *b]),
            _ => Err(UhfError::InvalidResponse(format!(
                "Gen2 target value too short: {}",
                bytes_to_hex(&value)
            ))),
        }
    }

    pub fn gen2_q(&mut self) -> Result<QAlgorithm, UhfError> {
        let value = self.get_protocol_param(param::Q)?;
        match value.first() {
            Some(0x00) => Ok(QAlgorithm::Dynamic),
            Some(0x01) => Ok(QAlgorithm::Static),
            _ => Err(UhfError::InvalidResponse(format!(
                "Unknown Gen2 Q value: {}",
                bytes_to_hex(&value)
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{STATUS_OK, encode_command, encode_response};
    use crate::sim::{self, Script, reply};

    fn param_frame(key: u8, value: &[u8]) -> Vec<u8> {
        let mut payload = vec![GEN2_PROTOCOL_ID, key];
        payload.extend_from_slice(value);
        encode_command(opcode::SET_PROTOCOL_PARAM, &payload).unwrap()
    }

    fn set_ok() -> Script {
        sim::ok_reply(opcode::SET_PROTOCOL_PARAM)
    }

    #[test]
    fn test_target_encoding() {
        assert_eq!(Target::A.to_bytes(), [1, 0]);
        assert_eq!(Target::B.to_bytes(), [1, 1]);
        assert_eq!(Target::AB.to_bytes(), [0, 0]);
        assert_eq!(Target::BA.to_bytes(), [0, 1]);
    }

    #[test]
    fn test_target_from_bytes() {
        for target in [Target::A, Target::B, Target::AB, Target::BA] {
            assert_eq!(Target::from_bytes(target.to_bytes()).unwrap(), target);
        }
        assert!(Target::from_bytes([0x02, 0x00]).is_err());
    }

    #[test]
    fn test_param_payloads() {
        assert_eq!(ProtocolParam::session(Session::S2).payload(), [0x05, 0x00, 0x02]);
        assert_eq!(ProtocolParam::target(Target::BA).payload(), [0x05, 0x01, 0x00, 0x01]);
        assert_eq!(ProtocolParam::q(QAlgorithm::Static).payload(), [0x05, 0x12, 0x01]);
        assert_eq!(ProtocolParam::initial_q(4).unwrap().payload(), [0x05, 0x16, 0x01, 0x04]);
        assert_eq!(
            ProtocolParam::rf_mode(RfMode::Blf160M8Tari20, Module::M7eHecto)
                .unwrap()
                .payload(),
            [0x05, 0x18, 0x01, 0x1D]
        );
        assert_eq!(
            ProtocolParam::tag_encoding(TagEncoding::MillerM4, Module::M6eNano)
                .unwrap()
                .payload(),
            [0x05, 0x02, 0x02]
        );
    }

    #[test]
    fn test_initial_q_out_of_range() {
        assert!(ProtocolParam::initial_q(MAX_INITIAL_Q).is_ok());
        assert!(matches!(
            ProtocolParam::initial_q(11),
            Err(UhfError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_link_setting_depends_on_module() {
        assert!(matches!(
            ProtocolParam::rf_mode(RfMode::Blf250M4Tari20, Module::M6eNano),
            Err(UhfError::ConfigurationUnsupported { module: Module::M6eNano, .. })
        ));
        assert!(matches!(
            ProtocolParam::tag_encoding(TagEncoding::Fm0, Module::M7eHecto),
            Err(UhfError::ConfigurationUnsupported { module: Module::M7eHecto, .. })
        ));
    }

    #[test]
    fn test_config_encode_order() {
        let config = Gen2Config {
            session: Session::S1,
            target: Target::AB,
            q: QAlgorithm::Static,
            initial_q: Some(6),
            link: Some(LinkSetting::TagEncoding(TagEncoding::MillerM2)),
        };
        let keys: Vec<u8> = config
            .encode(Module::M6eNano)
            .unwrap()
            .iter()
            .map(|p| p.key)
            .collect();
        assert_eq!(
            keys,
            [param::SESSION, param::TARGET, param::Q, param::INITIAL_Q, param::TAG_ENCODING]
        );
    }

    #[test]
    fn test_set_session_sends_frame() {
        let mut rfid = sim::reader(Module::M6eNano, vec![set_ok()]);
        rfid.set_gen2_session(Session::S1).unwrap();
        assert_eq!(rfid.transport().written, vec![param_frame(param::SESSION, &[0x01])]);
    }

    #[test]
    fn test_set_target_rejected() {
        let rejected = reply(encode_response(opcode::SET_PROTOCOL_PARAM, 0x0105, &[]));
        let mut rfid = sim::reader(Module::M6eNano, vec![rejected]);
        assert!(matches!(
            rfid.set_gen2_target(Target::B),
            Err(UhfError::DeviceRejected { status: 0x0105, .. })
        ));
    }

    #[test]
    fn test_set_q_with_initial_value() {
        let mut rfid = sim::reader(Module::M6eNano, vec![set_ok(), set_ok()]);
        rfid.set_gen2_q(QAlgorithm::Static, Some(3)).unwrap();
        assert_eq!(
            rfid.transport().written,
            vec![
                param_frame(param::Q, &[0x01]),
                param_frame(param::INITIAL_Q, &[0x01, 0x03]),
            ]
        );
    }

    #[test]
    fn test_set_q_invalid_initial_sends_nothing() {
        let mut rfid = sim::reader(Module::M6eNano, vec![]);
        assert!(rfid.set_gen2_q(QAlgorithm::Static, Some(12)).is_err());
        assert!(rfid.transport().written.is_empty());
    }

    #[test]
    fn test_rf_mode_on_m6e_sends_nothing() {
        let mut rfid = sim::reader(Module::M6eNano, vec![]);
        assert!(matches!(
            rfid.set_gen2_rf_mode(RfMode::Blf640M4Tari7_5),
            Err(UhfError::ConfigurationUnsupported { .. })
        ));
        assert!(rfid.transport().written.is_empty());
    }

    #[test]
    fn test_apply_config_on_m7e() {
        let config = Gen2Config {
            session: Session::S2,
            target: Target::A,
            q: QAlgorithm::Dynamic,
            initial_q: None,
            link: Some(LinkSetting::RfMode(RfMode::Blf250M4Tari20)),
        };
        let mut rfid = sim::reader(Module::M7eHecto, vec![set_ok(); 4]);
        rfid.apply_gen2_config(&config).unwrap();
        assert_eq!(
            rfid.transport().written,
            vec![
                param_frame(param::SESSION, &[0x02]),
                param_frame(param::TARGET, &[0x01, 0x00]),
                param_frame(param::Q, &[0x00]),
                param_frame(param::RF_MODE, &[0x00, 0xF4]),
            ]
        );
    }

    #[test]
    fn test_apply_config_stops_at_rejection() {
        let rejected = reply(encode_response(opcode::SET_PROTOCOL_PARAM, 0x0105, &[]));
        let mut rfid = sim::reader(Module::M6eNano, vec![set_ok(), rejected, set_ok()]);
        assert!(rfid.apply_gen2_config(&Gen2Config::default()).is_err());
        assert_eq!(rfid.transport().written.len(), 2);
    }

    #[test]
    fn test_apply_config_unsupported_sends_nothing() {
        let config = Gen2Config {
            link: Some(LinkSetting::TagEncoding(TagEncoding::MillerM8)),
            ..Gen2Config::default()
        };
        let mut rfid = sim::reader(Module::M7eHecto, vec![]);
        assert!(rfid.apply_gen2_config(&config).is_err());
        assert!(rfid.transport().written.is_empty());
    }

    #[test]
    fn test_read_back_session() {
        let response = reply(encode_response(
            opcode::GET_PROTOCOL_PARAM,
            STATUS_OK,
            &[GEN2_PROTOCOL_ID, param::SESSION, 0x03],
        ));
        let mut rfid = sim::reader(Module::M6eNano, vec![response]);
        assert_eq!(rfid.gen2_session().unwrap(), Session::S3);
    }

    #[test]
    fn test_read_back_target() {
        let response = reply(encode_response(
            opcode::GET_PROTOCOL_PARAM,
            STATUS_OK,
            &[GEN2_PROTOCOL_ID, param::TARGET, 0x00, 0x01],
        ));
        let mut rfid = sim::reader(Module::M6eNano, vec![response]);
        assert_eq!(rfid.gen2_target().unwrap(), Target::BA);
    }

    #[test]
    fn test_read_back_wrong_key_rejected() {
        let response = reply(encode_response(
            opcode::GET_PROTOCOL_PARAM,
            STATUS_OK,
            &[GEN2_PROTOCOL_ID, param::TARGET, 0x00, 0x01],
        ));
        let mut rfid = sim::reader(Module::M6eNano, vec![response]);
        assert!(matches!(
            rfid.get_protocol_param(param::SESSION),
            Err(UhfError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_read_back_without_echo_rejected() {
        let response = reply(encode_response(opcode::GET_PROTOCOL_PARAM, STATUS_OK, &[0x02]));
        let mut rfid = sim::reader(Module::M6eNano, vec![response]);
        assert!(matches!(rfid.gen2_session(), Err(UhfError::InvalidResponse(_))));
    }
}
