use rkyv::{Archive, Deserialize, Serialize};

use crate::net::types::{BogieData, Vector3};

#[derive(Debug, Clone, Copy, Default, PartialEq, Archive, Serialize, Deserialize)]
pub struct BeginWorldSync;

/// Always the last packet of a world snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Archive, Serialize, Deserialize)]
pub struct RemoveLoadingScreen;

#[derive(Debug, Clone, Default, PartialEq, Archive, Serialize, Deserialize)]
pub struct WeatherState {
    pub preset: String,
    pub rain: f32,
    pub clouds: f32,
    pub fog: f32,
    pub wind: f32,
}

/// Selected branch of every junction, in the world's junction order.
#[derive(Debug, Clone, Default, PartialEq, Archive, Serialize, Deserialize)]
pub struct JunctionState {
    pub selected_branches: Vec<u8>,
}

/// Y rotation in degrees of every turntable, in the world's turntable order.
#[derive(Debug, Clone, Default, PartialEq, Archive, Serialize, Deserialize)]
pub struct TurntableState {
    pub rotations: Vec<f32>,
}

/// Everything a client needs to recreate one existing vehicle.
#[derive(Debug, Clone, Default, PartialEq, Archive, Serialize, Deserialize)]
pub struct VehicleSnapshot {
    pub car_guid: String,
    pub livery_id: String,
    pub position: Vector3,
    pub forward: Vector3,
    pub bogie_front: BogieData,
    pub bogie_rear: BogieData,
    pub coupled_front: Option<String>,
    pub coupled_rear: Option<String>,
    pub hose_front_connected: bool,
    pub hose_rear_connected: bool,
    pub cock_front_open: bool,
    pub cock_rear_open: bool,
    pub player_spawned: bool,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct SpawnNewVehicle {
    pub car_guid: String,
    pub livery_id: String,
    pub track: String,
    pub position: Vector3,
    pub forward: Vector3,
    pub player_spawned: bool,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct BogieUpdate {
    pub car_guid: String,
    pub front: BogieData,
    pub rear: BogieData,
}

#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
pub struct ChangeJunction {
    pub index: u32,
    pub selected_branch: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
pub struct RotateTurntable {
    pub index: u32,
    pub rotation: f32,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct TrainCouple {
    pub car_guid: String,
    pub is_front: bool,
    pub other_car_guid: String,
    pub other_is_front: bool,
    pub play_audio: bool,
    pub via_chain_interaction: bool,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct TrainUncouple {
    pub car_guid: String,
    pub is_front: bool,
    pub play_audio: bool,
    pub due_to_broken_couple: bool,
    pub via_chain_interaction: bool,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct HoseConnected {
    pub car_guid: String,
    pub is_front: bool,
    pub other_car_guid: String,
    pub other_is_front: bool,
    pub play_sound: bool,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct HoseDisconnected {
    pub car_guid: String,
    pub is_front: bool,
    pub play_sound: bool,
}

/// Brake cock on one end of a vehicle opened or closed.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct CockFiddle {
    pub car_guid: String,
    pub is_front: bool,
    pub is_open: bool,
}
