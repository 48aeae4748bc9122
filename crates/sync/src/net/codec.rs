use std::collections::BTreeSet;

use rkyv::rancor;
use rkyv::util::AlignedVec;

use super::packets::{Packet, PacketKind};
use super::protocol::{CompoundType, CompoundValue};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("{kind:?} references unregistered compound type {ty}")]
    UnregisteredType { kind: PacketKind, ty: CompoundType },
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
    #[error("a handler for {0:?} is already subscribed")]
    DuplicateHandler(PacketKind),
}

/// Packet encoder/decoder with a closed registry of compound value types.
///
/// `encode` writes into one reusable buffer that is cleared right before each
/// call. The returned bytes borrow that buffer, so they must be handed to the
/// transport (which copies them) before the next `encode`. Only one writer may
/// use a codec at a time.
#[derive(Debug, Default)]
pub struct Codec {
    registered: BTreeSet<CompoundType>,
    buffer: AlignedVec,
}

impl Codec {
    pub fn new() -> Self {
        Self::default()
    }

    /// A codec with every compound type the catalog uses already registered.
    pub fn with_builtin_types() -> Self {
        use super::types::{BogieData, ModInfo, Vector3};

        let mut codec = Self::new();
        codec.register_type::<Vector3>();
        codec.register_type::<ModInfo>();
        codec.register_type::<BogieData>();
        codec
    }

    /// Returns false if the type was already registered.
    pub fn register_type<T: CompoundValue>(&mut self) -> bool {
        self.registered.insert(T::TYPE)
    }

    pub fn is_registered(&self, ty: CompoundType) -> bool {
        self.registered.contains(&ty)
    }

    pub fn encode(&mut self, packet: &Packet) -> Result<&[u8], CodecError> {
        self.check_types(packet.kind())?;

        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.clear();
        self.buffer = rkyv::api::high::to_bytes_in::<_, rancor::Error>(packet, buffer)
            .map_err(CodecError::Serialize)?;

        Ok(self.buffer.as_slice())
    }

    pub fn decode(&self, data: &[u8]) -> Result<Packet, CodecError> {
        let mut aligned = AlignedVec::<16>::with_capacity(data.len());
        aligned.extend_from_slice(data);

        let packet = rkyv::from_bytes::<Packet, rancor::Error>(&aligned)
            .map_err(CodecError::Deserialize)?;
        self.check_types(packet.kind())?;

        Ok(packet)
    }

    fn check_types(&self, kind: PacketKind) -> Result<(), CodecError> {
        match kind
            .compound_types()
            .iter()
            .find(|ty| !self.registered.contains(ty))
        {
            Some(&ty) => Err(CodecError::UnregisteredType { kind, ty }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::packets::*;
    use crate::net::types::{BogieData, ModInfo, Vector3};
    use crate::net::PeerId;

    fn catalog_samples() -> Vec<Packet> {
        let bogie = BogieData {
            track: "[Y]_[#]_[01-S]".to_string(),
            position_along_track: 120.25,
            is_derailed: false,
        };
        vec![
            ClientLogin {
                password: String::new(),
                build_version: 98,
                username: String::new(),
                mods: Vec::new(),
            }
            .into(),
            ClientLogin {
                password: "hunter2".to_string(),
                build_version: u16::MAX,
                username: "Dispatcher".to_string(),
                mods: vec![ModInfo::new("Multiplayer", "0.1.0"), ModInfo::new("Tweaks", "2")],
            }
            .into(),
            ClientReady.into(),
            PositionSample {
                position: Vector3::new(1.0, 2.0, 3.0),
                rotation_y: 90.0,
                is_jumping: true,
            }
            .into(),
            TimeAdvanceRequest { seconds: 3600.0 }.into(),
            ServerDeny {
                reason: "Mod mismatch".to_string(),
                missing: vec![ModInfo::new("A", "1")],
                extra: Vec::new(),
            }
            .into(),
            PlayerJoined {
                id: PeerId::MAX,
                username: String::new(),
            }
            .into(),
            RosterEntry {
                id: PeerId(9),
                username: "roster".to_string(),
                position: Vector3::new(4.0, -2.0, 0.25),
                rotation_y: 45.0,
                is_jumping: true,
            }
            .into(),
            PlayerDisconnect { id: PeerId::MAX }.into(),
            PlayerPosition {
                id: PeerId(7),
                position: Vector3::new(-1.5, 0.0, 1e6),
                rotation_y: -180.0,
                is_jumping: false,
            }
            .into(),
            PingUpdate {
                id: PeerId::MIN,
                ping: u32::MAX,
            }
            .into(),
            TimeSync { server_time: 999 }.into(),
            TimeAdvance { seconds: 0.5 }.into(),
            BeginWorldSync.into(),
            WeatherState {
                preset: "Storm".to_string(),
                rain: 1.0,
                clouds: 0.8,
                fog: 0.1,
                wind: 12.0,
            }
            .into(),
            JunctionState {
                selected_branches: vec![0, 1, 1, 0, 2],
            }
            .into(),
            TurntableState {
                rotations: vec![0.0, 179.5],
            }
            .into(),
            VehicleSnapshot {
                car_guid: "c0ffee".to_string(),
                livery_id: "LocoShunter".to_string(),
                position: Vector3::new(10.0, 120.0, -4.0),
                forward: Vector3::new(0.0, 0.0, 1.0),
                bogie_front: bogie.clone(),
                bogie_rear: bogie.clone(),
                coupled_front: Some("beef".to_string()),
                coupled_rear: None,
                hose_front_connected: true,
                hose_rear_connected: false,
                cock_front_open: true,
                cock_rear_open: false,
                player_spawned: true,
            }
            .into(),
            SpawnNewVehicle {
                car_guid: "beef".to_string(),
                livery_id: "FlatbedEmpty".to_string(),
                track: "[Y]_[#]_[01-S]".to_string(),
                position: Vector3::ZERO,
                forward: Vector3::new(1.0, 0.0, 0.0),
                player_spawned: false,
            }
            .into(),
            BogieUpdate {
                car_guid: "beef".to_string(),
                front: bogie.clone(),
                rear: bogie,
            }
            .into(),
            RemoveLoadingScreen.into(),
            ChangeJunction {
                index: 12,
                selected_branch: 1,
            }
            .into(),
            RotateTurntable {
                index: 0,
                rotation: 45.0,
            }
            .into(),
            TrainCouple {
                car_guid: "a".to_string(),
                is_front: true,
                other_car_guid: "b".to_string(),
                other_is_front: false,
                play_audio: true,
                via_chain_interaction: false,
            }
            .into(),
            TrainUncouple {
                car_guid: "a".to_string(),
                is_front: true,
                play_audio: false,
                due_to_broken_couple: true,
                via_chain_interaction: false,
            }
            .into(),
            HoseConnected {
                car_guid: "a".to_string(),
                is_front: false,
                other_car_guid: "b".to_string(),
                other_is_front: true,
                play_sound: true,
            }
            .into(),
            HoseDisconnected {
                car_guid: "a".to_string(),
                is_front: false,
                play_sound: false,
            }
            .into(),
            CockFiddle {
                car_guid: "a".to_string(),
                is_front: true,
                is_open: true,
            }
            .into(),
        ]
    }

    #[test]
    fn test_every_kind_survives_the_wire() {
        let mut codec = Codec::with_builtin_types();
        let samples = catalog_samples();

        for kind in PacketKind::ALL {
            assert!(
                samples.iter().any(|p| p.kind() == *kind),
                "no sample for {kind:?}"
            );
        }

        for packet in samples {
            let bytes = codec.encode(&packet).unwrap().to_vec();
            let decoded = codec.decode(&bytes).unwrap();
            assert_eq!(decoded, packet);
        }
    }

    #[test]
    fn test_encoding_is_deterministic_and_buffer_is_reset() {
        let mut codec = Codec::with_builtin_types();
        let big = Packet::from(JunctionState {
            selected_branches: vec![1; 512],
        });
        let small = Packet::from(PlayerDisconnect { id: PeerId(3) });

        let first = codec.encode(&small).unwrap().to_vec();
        codec.encode(&big).unwrap();
        let second = codec.encode(&small).unwrap().to_vec();

        assert_eq!(first, second);
        assert_eq!(codec.decode(&second).unwrap(), small);
    }

    #[test]
    fn test_unregistered_compound_type_is_rejected_at_encode() {
        let mut codec = Codec::new();
        codec.register_type::<ModInfo>();

        let packet = Packet::from(PositionSample {
            position: Vector3::ZERO,
            rotation_y: 0.0,
            is_jumping: false,
        });
        match codec.encode(&packet) {
            Err(CodecError::UnregisteredType { kind, ty }) => {
                assert_eq!(kind, PacketKind::PositionSample);
                assert_eq!(ty, CompoundType::Vector3);
            }
            other => panic!("expected unregistered type error, got {other:?}"),
        }

        assert!(codec.encode(&ClientReady.into()).is_ok());
        assert!(codec.register_type::<Vector3>());
        assert!(!codec.register_type::<Vector3>());
        assert!(codec.encode(&packet).is_ok());
    }

    #[test]
    fn test_garbage_fails_to_decode() {
        let mut codec = Codec::with_builtin_types();
        assert!(codec.decode(&[]).is_err());
        assert!(codec.decode(&[0xff; 3]).is_err());

        let bytes = codec
            .encode(&PlayerJoined {
                id: PeerId(1),
                username: "a rather long username".to_string(),
            }
            .into())
            .unwrap()
            .to_vec();
        assert!(codec.decode(&bytes[..bytes.len() / 2]).is_err());
    }
}
