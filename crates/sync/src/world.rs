//! Game-world collaborators. The server reads snapshots from a `WorldState`
//! and clients apply what they receive to a `WorldSink`.

use std::collections::BTreeMap;

use crate::net::{
    BogieData, BogieUpdate, ChangeJunction, CockFiddle, HoseConnected, HoseDisconnected,
    JunctionState, Packet, RotateTurntable, SpawnNewVehicle, TrainCouple, TrainUncouple,
    TurntableState, VehicleSnapshot, WeatherState,
};

#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    #[error("{0} state is unavailable")]
    Unavailable(&'static str),
    #[error("unknown vehicle {0}")]
    UnknownVehicle(String),
    #[error("{kind} index {index} is past the layout limit of {limit}")]
    OutOfLayout {
        kind: &'static str,
        index: u32,
        limit: usize,
    },
}

/// Largest junction count a cache will track. Indices past it are rejected
/// rather than grown into.
pub const MAX_JUNCTIONS: usize = 4096;

/// Largest turntable count a cache will track.
pub const MAX_TURNTABLES: usize = 256;

/// A world mutation that travels between peers.
#[derive(Debug, Clone, PartialEq)]
pub enum WorldEvent {
    ChangeJunction(ChangeJunction),
    RotateTurntable(RotateTurntable),
    TrainCouple(TrainCouple),
    TrainUncouple(TrainUncouple),
    HoseConnected(HoseConnected),
    HoseDisconnected(HoseDisconnected),
    CockFiddle(CockFiddle),
    SpawnVehicle(SpawnNewVehicle),
    BogieUpdate(BogieUpdate),
}

impl From<WorldEvent> for Packet {
    fn from(event: WorldEvent) -> Self {
        match event {
            WorldEvent::ChangeJunction(e) => e.into(),
            WorldEvent::RotateTurntable(e) => e.into(),
            WorldEvent::TrainCouple(e) => e.into(),
            WorldEvent::TrainUncouple(e) => e.into(),
            WorldEvent::HoseConnected(e) => e.into(),
            WorldEvent::HoseDisconnected(e) => e.into(),
            WorldEvent::CockFiddle(e) => e.into(),
            WorldEvent::SpawnVehicle(e) => e.into(),
            WorldEvent::BogieUpdate(e) => e.into(),
        }
    }
}

impl TryFrom<Packet> for WorldEvent {
    type Error = Packet;

    fn try_from(packet: Packet) -> Result<Self, Packet> {
        Ok(match packet {
            Packet::ChangeJunction(e) => WorldEvent::ChangeJunction(e),
            Packet::RotateTurntable(e) => WorldEvent::RotateTurntable(e),
            Packet::TrainCouple(e) => WorldEvent::TrainCouple(e),
            Packet::TrainUncouple(e) => WorldEvent::TrainUncouple(e),
            Packet::HoseConnected(e) => WorldEvent::HoseConnected(e),
            Packet::HoseDisconnected(e) => WorldEvent::HoseDisconnected(e),
            Packet::CockFiddle(e) => WorldEvent::CockFiddle(e),
            Packet::SpawnNewVehicle(e) => WorldEvent::SpawnVehicle(e),
            Packet::BogieUpdate(e) => WorldEvent::BogieUpdate(e),
            other => return Err(other),
        })
    }
}

/// Read side of the world, used to build snapshots for joining peers.
pub trait WorldState {
    fn weather(&self) -> Result<WeatherState, WorldError>;

    fn junctions(&self) -> Result<JunctionState, WorldError>;

    fn turntables(&self) -> Result<TurntableState, WorldError>;

    fn vehicles(&self) -> Result<Vec<VehicleSnapshot>, WorldError>;

    /// Sees every event the server relays.
    fn observe(&mut self, _event: &WorldEvent) {}
}

/// Write side of the world on a client.
pub trait WorldSink {
    fn begin_sync(&mut self) {}

    fn load_weather(&mut self, weather: WeatherState);

    fn load_junctions(&mut self, junctions: JunctionState);

    fn load_turntables(&mut self, turntables: TurntableState);

    fn spawn_vehicle(&mut self, vehicle: VehicleSnapshot);

    fn apply_event(&mut self, event: WorldEvent);

    fn finish_sync(&mut self) {}
}

/// In-memory world. A dedicated server keeps one current from relayed events
/// so late joiners get a meaningful snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldCache {
    weather: WeatherState,
    junctions: Vec<u8>,
    turntables: Vec<f32>,
    vehicles: BTreeMap<String, VehicleSnapshot>,
    syncing: bool,
}

impl Default for WorldCache {
    fn default() -> Self {
        Self {
            weather: WeatherState {
                preset: "clear".to_string(),
                ..WeatherState::default()
            },
            junctions: Vec::new(),
            turntables: Vec::new(),
            vehicles: BTreeMap::new(),
            syncing: false,
        }
    }
}

impl WorldCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layout(junctions: usize, turntables: usize) -> Self {
        Self {
            junctions: vec![0; junctions],
            turntables: vec![0.0; turntables],
            ..Self::default()
        }
    }

    pub fn set_weather(&mut self, weather: WeatherState) {
        self.weather = weather;
    }

    pub fn insert_vehicle(&mut self, vehicle: VehicleSnapshot) {
        self.vehicles.insert(vehicle.car_guid.clone(), vehicle);
    }

    pub fn remove_vehicle(&mut self, guid: &str) -> Option<VehicleSnapshot> {
        self.vehicles.remove(guid)
    }

    pub fn vehicle(&self, guid: &str) -> Option<&VehicleSnapshot> {
        self.vehicles.get(guid)
    }

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    pub fn selected_branch(&self, index: usize) -> Option<u8> {
        self.junctions.get(index).copied()
    }

    pub fn turntable_rotation(&self, index: usize) -> Option<f32> {
        self.turntables.get(index).copied()
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing
    }

    fn vehicle_mut(&mut self, guid: &str) -> Result<&mut VehicleSnapshot, WorldError> {
        self.vehicles
            .get_mut(guid)
            .ok_or_else(|| WorldError::UnknownVehicle(guid.to_string()))
    }

    pub fn apply(&mut self, event: &WorldEvent) -> Result<(), WorldError> {
        match event {
            WorldEvent::ChangeJunction(e) => {
                *slot(&mut self.junctions, e.index, MAX_JUNCTIONS, "junction")? =
                    e.selected_branch;
            }
            WorldEvent::RotateTurntable(e) => {
                *slot(&mut self.turntables, e.index, MAX_TURNTABLES, "turntable")? = e.rotation;
            }
            WorldEvent::TrainCouple(e) => {
                self.vehicle_mut(&e.other_car_guid)?;
                *coupler(self.vehicle_mut(&e.car_guid)?, e.is_front) = Some(e.other_car_guid.clone());
                *coupler(self.vehicle_mut(&e.other_car_guid)?, e.other_is_front) =
                    Some(e.car_guid.clone());
            }
            WorldEvent::TrainUncouple(e) => {
                let partner = coupler(self.vehicle_mut(&e.car_guid)?, e.is_front).take();
                if let Some(partner) = partner.and_then(|guid| self.vehicles.get_mut(&guid)) {
                    for side in [true, false] {
                        let slot = coupler(partner, side);
                        if slot.as_deref() == Some(e.car_guid.as_str()) {
                            *slot = None;
                        }
                    }
                }
            }
            WorldEvent::HoseConnected(e) => {
                self.vehicle_mut(&e.other_car_guid)?;
                *hose(self.vehicle_mut(&e.car_guid)?, e.is_front) = true;
                *hose(self.vehicle_mut(&e.other_car_guid)?, e.other_is_front) = true;
            }
            WorldEvent::HoseDisconnected(e) => {
                *hose(self.vehicle_mut(&e.car_guid)?, e.is_front) = false;
            }
            WorldEvent::CockFiddle(e) => {
                let vehicle = self.vehicle_mut(&e.car_guid)?;
                if e.is_front {
                    vehicle.cock_front_open = e.is_open;
                } else {
                    vehicle.cock_rear_open = e.is_open;
                }
            }
            WorldEvent::SpawnVehicle(e) => {
                let bogie = BogieData {
                    track: e.track.clone(),
                    ..BogieData::default()
                };
                self.insert_vehicle(VehicleSnapshot {
                    car_guid: e.car_guid.clone(),
                    livery_id: e.livery_id.clone(),
                    position: e.position,
                    forward: e.forward,
                    bogie_front: bogie.clone(),
                    bogie_rear: bogie,
                    player_spawned: e.player_spawned,
                    ..VehicleSnapshot::default()
                });
            }
            WorldEvent::BogieUpdate(e) => {
                let vehicle = self.vehicle_mut(&e.car_guid)?;
                vehicle.bogie_front = e.front.clone();
                vehicle.bogie_rear = e.rear.clone();
            }
        }
        Ok(())
    }
}

/// Grows `values` up to `limit` entries so a map whose layout is not known up
/// front still fills in.
fn slot<'a, T: Default + Clone>(
    values: &'a mut Vec<T>,
    index: u32,
    limit: usize,
    kind: &'static str,
) -> Result<&'a mut T, WorldError> {
    let at = index as usize;
    if at >= limit.max(values.len()) {
        return Err(WorldError::OutOfLayout { kind, index, limit });
    }
    if values.len() <= at {
        values.resize(at + 1, T::default());
    }
    Ok(&mut values[at])
}

fn coupler(vehicle: &mut VehicleSnapshot, front: bool) -> &mut Option<String> {
    if front {
        &mut vehicle.coupled_front
    } else {
        &mut vehicle.coupled_rear
    }
}

fn hose(vehicle: &mut VehicleSnapshot, front: bool) -> &mut bool {
    if front {
        &mut vehicle.hose_front_connected
    } else {
        &mut vehicle.hose_rear_connected
    }
}

impl WorldState for WorldCache {
    fn weather(&self) -> Result<WeatherState, WorldError> {
        Ok(self.weather.clone())
    }

    fn junctions(&self) -> Result<JunctionState, WorldError> {
        Ok(JunctionState {
            selected_branches: self.junctions.clone(),
        })
    }

    fn turntables(&self) -> Result<TurntableState, WorldError> {
        Ok(TurntableState {
            rotations: self.turntables.clone(),
        })
    }

    fn vehicles(&self) -> Result<Vec<VehicleSnapshot>, WorldError> {
        Ok(self.vehicles.values().cloned().collect())
    }

    fn observe(&mut self, event: &WorldEvent) {
        if let Err(e) = self.apply(event) {
            log::debug!("world cache skipped {event:?}: {e}");
        }
    }
}

impl WorldSink for WorldCache {
    fn begin_sync(&mut self) {
        self.vehicles.clear();
        self.syncing = true;
    }

    fn load_weather(&mut self, weather: WeatherState) {
        self.weather = weather;
    }

    fn load_junctions(&mut self, junctions: JunctionState) {
        self.junctions = junctions.selected_branches;
    }

    fn load_turntables(&mut self, turntables: TurntableState) {
        self.turntables = turntables.rotations;
    }

    fn spawn_vehicle(&mut self, vehicle: VehicleSnapshot) {
        self.insert_vehicle(vehicle);
    }

    fn apply_event(&mut self, event: WorldEvent) {
        self.observe(&event);
    }

    fn finish_sync(&mut self) {
        self.syncing = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn car(guid: &str) -> VehicleSnapshot {
        VehicleSnapshot {
            car_guid: guid.to_string(),
            ..VehicleSnapshot::default()
        }
    }

    #[test]
    fn test_junction_and_turntable_events_grow_the_layout() {
        let mut world = WorldCache::with_layout(2, 0);
        world.observe(&WorldEvent::ChangeJunction(ChangeJunction {
            index: 4,
            selected_branch: 1,
        }));
        world.observe(&WorldEvent::RotateTurntable(RotateTurntable {
            index: 0,
            rotation: 90.0,
        }));

        assert_eq!(world.junctions().unwrap().selected_branches, vec![0, 0, 0, 0, 1]);
        assert_eq!(world.turntable_rotation(0), Some(90.0));
    }

    #[test]
    fn test_indices_past_the_limit_are_rejected() {
        let mut world = WorldCache::with_layout(2, 1);
        let junction = WorldEvent::ChangeJunction(ChangeJunction {
            index: u32::MAX,
            selected_branch: 1,
        });
        let turntable = WorldEvent::RotateTurntable(RotateTurntable {
            index: MAX_TURNTABLES as u32,
            rotation: 90.0,
        });

        assert!(matches!(
            world.apply(&junction),
            Err(WorldError::OutOfLayout { kind: "junction", .. })
        ));
        assert!(matches!(
            world.apply(&turntable),
            Err(WorldError::OutOfLayout { kind: "turntable", .. })
        ));
        world.observe(&junction);

        assert_eq!(world.junctions().unwrap().selected_branches.len(), 2);
        assert_eq!(world.turntables().unwrap().rotations.len(), 1);
    }

    #[test]
    fn test_coupling_links_both_cars_and_uncoupling_clears_both() {
        let mut world = WorldCache::new();
        world.insert_vehicle(car("a"));
        world.insert_vehicle(car("b"));

        world
            .apply(&WorldEvent::TrainCouple(TrainCouple {
                car_guid: "a".into(),
                is_front: false,
                other_car_guid: "b".into(),
                other_is_front: true,
                play_audio: true,
                via_chain_interaction: false,
            }))
            .unwrap();
        assert_eq!(world.vehicle("a").unwrap().coupled_rear.as_deref(), Some("b"));
        assert_eq!(world.vehicle("b").unwrap().coupled_front.as_deref(), Some("a"));

        world
            .apply(&WorldEvent::TrainUncouple(TrainUncouple {
                car_guid: "b".into(),
                is_front: true,
                play_audio: false,
                due_to_broken_couple: false,
                via_chain_interaction: false,
            }))
            .unwrap();
        assert_eq!(world.vehicle("a").unwrap().coupled_rear, None);
        assert_eq!(world.vehicle("b").unwrap().coupled_front, None);
    }

    #[test]
    fn test_events_for_unknown_vehicles_are_errors() {
        let mut world = WorldCache::new();
        world.insert_vehicle(car("a"));
        let result = world.apply(&WorldEvent::HoseConnected(HoseConnected {
            car_guid: "a".into(),
            is_front: true,
            other_car_guid: "ghost".into(),
            other_is_front: false,
            play_sound: false,
        }));
        assert!(matches!(result, Err(WorldError::UnknownVehicle(guid)) if guid == "ghost"));
        assert!(!world.vehicle("a").unwrap().hose_front_connected);
    }

    #[test]
    fn test_spawned_vehicles_show_up_in_snapshots() {
        let mut world = WorldCache::new();
        world.observe(&WorldEvent::SpawnVehicle(SpawnNewVehicle {
            car_guid: "loco".into(),
            livery_id: "DE2".into(),
            track: "[Y]_[#]_[1]".into(),
            position: crate::net::Vector3::new(1.0, 2.0, 3.0),
            forward: crate::net::Vector3::new(0.0, 0.0, 1.0),
            player_spawned: true,
        }));

        let vehicles = world.vehicles().unwrap();
        assert_eq!(vehicles.len(), 1);
        assert_eq!(vehicles[0].bogie_front.track, "[Y]_[#]_[1]");
        assert!(vehicles[0].player_spawned);
    }

    #[test]
    fn test_packets_convert_to_world_events_and_back() {
        let packet = Packet::from(CockFiddle {
            car_guid: "a".into(),
            is_front: true,
            is_open: true,
        });
        let event = WorldEvent::try_from(packet.clone()).unwrap();
        assert_eq!(Packet::from(event), packet);

        let not_world = Packet::from(crate::net::ClientReady);
        assert!(WorldEvent::try_from(not_world).is_err());
    }
}
