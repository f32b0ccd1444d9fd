//! Known audio sources and how each kind is started, stopped and skipped.

use crate::domain::{SourceRecord, TxRequest};
use crate::protocol::op;

const FBLOCK_TUNER: u8 = 0x40;
const FBLOCK_PLAYER: u8 = 0x31;

/// Shadow instance of a player whose transport is driven by this host
const HOST_PLAYER_SHADOW: u8 = 0xa2;

/// Shadow instance of a phone projection player
const PROJECTED_SHADOW: u8 = 0xa4;

/// name, fblock, instance, shadow, address high, address low
const REGISTRY: &[(&str, u8, u8, u8, u8, u8)] = &[
    ("amFmTuner", 0x40, 0x01, 0xa1, 0x01, 0x80),
    ("dabTuner", 0x43, 0x01, 0xa1, 0x01, 0x80),
    ("audioDiskPlayer", 0x31, 0x02, 0xa1, 0x01, 0x80),
    ("usbAudio", 0x31, 0x05, 0xa2, 0x01, 0x6e),
    ("unknown", 0x23, 0x05, 0xa1, 0x01, 0x86),
    ("auxIn", 0x24, 0x01, 0xa1, 0x01, 0x80),
    ("carplay", 0x31, 0x03, 0xa4, 0x01, 0x6e),
];

/// Every source this head unit can select.
pub fn registry() -> Vec<SourceRecord> {
    REGISTRY
        .iter()
        .map(|&(name, fblock_id, instance_id, shadow_instance_id, address_high, address_low)| {
            SourceRecord {
                fblock_id,
                instance_id,
                shadow_instance_id,
                address_high,
                address_low,
                name: name.to_string(),
            }
        })
        .collect()
}

pub fn find_source(name: &str) -> Option<SourceRecord> {
    registry().into_iter().find(|s| s.name == name)
}

/// The AM/FM tuner, selected when nothing else was ever chosen.
pub fn default_source() -> SourceRecord {
    SourceRecord {
        fblock_id: 0x40,
        instance_id: 0x01,
        shadow_instance_id: 0xa1,
        address_high: 0x01,
        address_low: 0x80,
        name: "amFmTuner".to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    Forward,
    Backward,
}

/// How a source reacts to start, stop and skip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Started and stopped through the tuner function block
    Tuner,
    /// Disc-style player with its own transport control
    Player,
    /// Player whose transport lives in this process; skips are surfaced
    /// to the application instead of sent
    HostPlayer,
    /// Phone projection: started and stopped like a player, skips stay
    /// on the phone
    Projected,
    /// No start/stop control messages
    Passive,
}

/// What a skip request turns into for the current source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipAction {
    Send(TxRequest),
    /// Hand the skip to the local application
    Surface(Skip),
    Ignore,
}

impl SourceKind {
    pub fn of(source: &SourceRecord) -> Self {
        match source.fblock_id {
            FBLOCK_TUNER => Self::Tuner,
            FBLOCK_PLAYER if source.shadow_instance_id == HOST_PLAYER_SHADOW => Self::HostPlayer,
            FBLOCK_PLAYER if source.shadow_instance_id == PROJECTED_SHADOW => Self::Projected,
            FBLOCK_PLAYER => Self::Player,
            _ => Self::Passive,
        }
    }

    pub fn start_request(self, source: &SourceRecord) -> Option<TxRequest> {
        match self {
            Self::Tuner => Some(to_source(source, 0x103, op::SET_GET, vec![0x01, 0x02])),
            Self::Player | Self::HostPlayer | Self::Projected => {
                Some(to_source(source, 0x200, op::SET, vec![0x00]))
            }
            Self::Passive => None,
        }
    }

    pub fn stop_request(self, source: &SourceRecord) -> Option<TxRequest> {
        match self {
            Self::Tuner => Some(to_source(source, 0x103, op::SET_GET, vec![0x01, 0x00])),
            Self::Player | Self::Projected => {
                Some(to_source(source, 0x200, op::SET, vec![0x01]))
            }
            // The host keeps playing until it is told otherwise locally
            Self::HostPlayer | Self::Passive => None,
        }
    }

    pub fn skip(self, source: &SourceRecord, skip: Skip) -> SkipAction {
        match (self, skip) {
            (Self::Tuner, Skip::Forward) => {
                SkipAction::Send(to_source(source, 0xd03, op::SET_GET, vec![0x11]))
            }
            (Self::Tuner, Skip::Backward) => {
                SkipAction::Send(to_source(source, 0xd03, op::SET_GET, vec![0x31]))
            }
            (Self::Player, Skip::Forward) => {
                SkipAction::Send(to_source(source, 0x202, op::INCREMENT, vec![0x01]))
            }
            (Self::Player, Skip::Backward) => {
                SkipAction::Send(to_source(source, 0x202, op::DECREMENT, vec![0x01]))
            }
            (Self::HostPlayer, skip) => SkipAction::Surface(skip),
            (Self::Projected | Self::Passive, _) => SkipAction::Ignore,
        }
    }
}

fn to_source(source: &SourceRecord, function_id: u16, op_type: u8, payload: Vec<u8>) -> TxRequest {
    TxRequest {
        target_address_high: source.address_high,
        target_address_low: source.address_low,
        fblock_id: source.fblock_id,
        instance_id: source.instance_id,
        function_id,
        op_type,
        payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> SourceRecord {
        find_source(name).unwrap()
    }

    #[test]
    fn registry_kinds() {
        assert_eq!(SourceKind::of(&named("amFmTuner")), SourceKind::Tuner);
        assert_eq!(SourceKind::of(&named("audioDiskPlayer")), SourceKind::Player);
        assert_eq!(SourceKind::of(&named("carplay")), SourceKind::Projected);
        assert_eq!(SourceKind::of(&named("usbAudio")), SourceKind::HostPlayer);
        assert_eq!(SourceKind::of(&named("auxIn")), SourceKind::Passive);
        assert_eq!(SourceKind::of(&named("dabTuner")), SourceKind::Passive);
    }

    #[test]
    fn default_source_is_registered() {
        assert_eq!(named("amFmTuner"), default_source());
    }

    #[test]
    fn tuner_start_and_stop() {
        let tuner = named("amFmTuner");
        let start = SourceKind::Tuner.start_request(&tuner).unwrap();
        assert_eq!((start.function_id, start.op_type), (0x103, 0x02));
        assert_eq!(start.payload, vec![0x01, 0x02]);
        assert_eq!((start.target_address_high, start.target_address_low), (0x01, 0x80));

        let stop = SourceKind::Tuner.stop_request(&tuner).unwrap();
        assert_eq!(stop.payload, vec![0x01, 0x00]);
    }

    #[test]
    fn player_start_and_stop() {
        let disc = named("audioDiskPlayer");
        let start = SourceKind::Player.start_request(&disc).unwrap();
        assert_eq!((start.function_id, start.op_type, start.instance_id), (0x200, 0x00, 0x02));
        assert_eq!(start.payload, vec![0x00]);
        let stop = SourceKind::Player.stop_request(&disc).unwrap();
        assert_eq!(stop.payload, vec![0x01]);
    }

    #[test]
    fn host_player_is_never_stopped_over_the_network() {
        let usb = named("usbAudio");
        assert!(SourceKind::HostPlayer.start_request(&usb).is_some());
        assert!(SourceKind::HostPlayer.stop_request(&usb).is_none());
    }

    #[test]
    fn projected_player_starts_and_stops_but_never_skips() {
        let carplay = named("carplay");
        let start = SourceKind::Projected.start_request(&carplay).unwrap();
        assert_eq!((start.function_id, start.instance_id), (0x200, 0x03));
        let stop = SourceKind::Projected.stop_request(&carplay).unwrap();
        assert_eq!(stop.payload, vec![0x01]);
        for skip in [Skip::Forward, Skip::Backward] {
            assert_eq!(SourceKind::Projected.skip(&carplay, skip), SkipAction::Ignore);
        }
    }

    #[test]
    fn passive_sources_send_nothing() {
        let aux = named("auxIn");
        assert!(SourceKind::Passive.start_request(&aux).is_none());
        assert!(SourceKind::Passive.stop_request(&aux).is_none());
        assert_eq!(SourceKind::Passive.skip(&aux, Skip::Forward), SkipAction::Ignore);
    }

    #[test]
    fn skip_controls_per_kind() {
        let tuner = named("amFmTuner");
        match SourceKind::Tuner.skip(&tuner, Skip::Backward) {
            SkipAction::Send(tx) => {
                assert_eq!(tx.function_id, 0xd03);
                assert_eq!(tx.payload, vec![0x31]);
            }
            other => panic!("unexpected {other:?}"),
        }

        let disc = named("audioDiskPlayer");
        match SourceKind::Player.skip(&disc, Skip::Forward) {
            SkipAction::Send(tx) => assert_eq!((tx.function_id, tx.op_type), (0x202, 0x03)),
            other => panic!("unexpected {other:?}"),
        }

        let usb = named("usbAudio");
        assert_eq!(
            SourceKind::HostPlayer.skip(&usb, Skip::Forward),
            SkipAction::Surface(Skip::Forward)
        );
    }
}
